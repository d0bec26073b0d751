//! Fakes de transporte, pipeline y canal de texto para los tests de sesión

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::all::{ChannelId, GuildId, MessageId};
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{mpsc, watch};

use super::{
    connection::ConnectionState,
    notify::{MessageHandle, Notice, TextSink},
    pipeline::{AudioPipeline, PlayerEvent, StreamError},
    registry::SessionRegistry,
    session::{PlaybackSession, SessionParts},
    transport::VoiceTransport,
};
use crate::{
    sources::{MockResolver, Song, SongOrigin},
    storage::VoiceSettings,
};

pub fn song(title: &str) -> Song {
    Song::new(title, Some(format!("https://youtu.be/{}", title)), SongOrigin::DirectLink)
}

pub fn title_only(title: &str) -> Song {
    Song::new(title, None, SongOrigin::TitleOnly)
}

pub struct FakeTransport {
    state: watch::Sender<ConnectionState>,
    channel: Mutex<Option<ChannelId>>,
    rejoins: AtomicUsize,
    destroys: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Ready);
        Arc::new(Self {
            state,
            channel: Mutex::new(Some(ChannelId::new(10))),
            rejoins: AtomicUsize::new(0),
            destroys: AtomicUsize::new(0),
        })
    }

    pub fn emit(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    pub fn rejoins(&self) -> usize {
        self.rejoins.load(Ordering::SeqCst)
    }

    pub fn destroys(&self) -> usize {
        self.destroys.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoiceTransport for FakeTransport {
    fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn channel_id(&self) -> Option<ChannelId> {
        *self.channel.lock()
    }

    fn observe_channel(&self, channel: Option<ChannelId>) {
        *self.channel.lock() = channel;
    }

    async fn rejoin(&self) -> Result<()> {
        self.rejoins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn destroy(&self) {
        if !self.state.borrow().is_destroyed() {
            self.destroys.fetch_add(1, Ordering::SeqCst);
            self.state.send_replace(ConnectionState::Destroyed);
        }
    }
}

/// Pipeline que no reproduce nada: registra aperturas y permite simular el
/// fin o el error del stream activo
pub struct FakePipeline {
    events: mpsc::UnboundedSender<PlayerEvent>,
    opened: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    open_delay: Mutex<Duration>,
    opening: AtomicUsize,
    max_opening: AtomicUsize,
    playing: AtomicBool,
    stops: AtomicUsize,
}

impl FakePipeline {
    pub fn set_open_delay(&self, delay: Duration) {
        *self.open_delay.lock() = delay;
    }

    pub fn fail_on(&self, title: &str) {
        self.failing.lock().insert(title.to_string());
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().clone()
    }

    pub fn max_concurrent_opens(&self) -> usize {
        self.max_opening.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Fin natural del stream activo
    pub fn finish(&self) {
        if self.playing.swap(false, Ordering::SeqCst) {
            let _ = self.events.send(PlayerEvent::Ended);
        }
    }

    pub fn fail_stream(&self, message: &str, premature_close: bool) {
        if self.playing.swap(false, Ordering::SeqCst) {
            let _ = self.events.send(PlayerEvent::Errored(StreamError {
                message: message.to_string(),
                premature_close,
            }));
        }
    }
}

#[async_trait]
impl AudioPipeline for FakePipeline {
    async fn open_stream(&self, song: &Song) -> Result<Song> {
        let opening = self.opening.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_opening.fetch_max(opening, Ordering::SeqCst);

        let delay = *self.open_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.opening.fetch_sub(1, Ordering::SeqCst);

        if self.failing.lock().contains(song.title()) {
            anyhow::bail!("video no disponible");
        }

        self.playing.store(true, Ordering::SeqCst);
        self.opened.lock().push(song.title().to_string());
        Ok(song.clone())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.finish();
    }
}

#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<(MessageHandle, Notice)>>,
    deleted: Mutex<Vec<MessageHandle>>,
    next_id: AtomicU64,
    failing: AtomicBool,
}

impl RecordingSink {
    pub fn sent(&self) -> Vec<Notice> {
        self.sent.lock().iter().map(|(_, n)| n.clone()).collect()
    }

    pub fn handles(&self) -> Vec<MessageHandle> {
        self.sent.lock().iter().map(|(h, _)| *h).collect()
    }

    pub fn deleted(&self) -> Vec<MessageHandle> {
        self.deleted.lock().clone()
    }

    pub fn fail_all(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl TextSink for RecordingSink {
    async fn send(&self, notice: Notice) -> Result<MessageHandle> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("Missing Permissions");
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = MessageHandle(MessageId::new(id));
        self.sent.lock().push((handle, notice));
        Ok(handle)
    }

    async fn delete(&self, handle: MessageHandle) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("Unknown Message");
        }
        self.deleted.lock().push(handle);
        Ok(())
    }
}

pub fn fake_parts(
    resolver: MockResolver,
) -> (SessionParts, Arc<FakeTransport>, Arc<FakePipeline>, Arc<RecordingSink>) {
    let (events, player_events) = mpsc::unbounded_channel();
    let transport = FakeTransport::new();
    let pipeline = Arc::new(FakePipeline {
        events,
        opened: Mutex::new(Vec::new()),
        failing: Mutex::new(HashSet::new()),
        open_delay: Mutex::new(Duration::ZERO),
        opening: AtomicUsize::new(0),
        max_opening: AtomicUsize::new(0),
        playing: AtomicBool::new(false),
        stops: AtomicUsize::new(0),
    });
    let sink = Arc::new(RecordingSink::default());

    let parts = SessionParts {
        transport: transport.clone(),
        pipeline: pipeline.clone(),
        player_events,
        resolver: Arc::new(resolver),
        text: sink.clone(),
    };
    (parts, transport, pipeline, sink)
}

pub struct Harness {
    pub registry: Arc<SessionRegistry>,
    pub session: PlaybackSession,
    pub transport: Arc<FakeTransport>,
    pub pipeline: Arc<FakePipeline>,
    pub sink: Arc<RecordingSink>,
}

pub async fn harness(max_songs: usize, resolver: MockResolver) -> Harness {
    let registry = SessionRegistry::new();
    let (parts, transport, pipeline, sink) = fake_parts(resolver);
    let settings = VoiceSettings {
        max_songs,
        ..VoiceSettings::default()
    };

    let (session, _) = registry
        .get_or_try_create(GuildId::new(1), settings, || async { Ok(parts) })
        .await
        .unwrap();

    Harness {
        registry,
        session,
        transport,
        pipeline,
        sink,
    }
}
