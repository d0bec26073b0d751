use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::all::GuildId;
use songbird::{
    input::{Compose, YoutubeDl},
    tracks::{PlayMode, TrackHandle},
    Call, Event, EventContext, EventHandler as VoiceEventHandler, TrackEvent,
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{config::ExtractorConfig, sources::Song};

/// Tiempo máximo para que yt-dlp entregue la metadata del stream
const OPEN_TIMEOUT: Duration = Duration::from_secs(30);

/// Error de un stream que ya estaba sonando
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct StreamError {
    pub message: String,
    /// El stream se cerró porque lo detuvimos nosotros
    pub premature_close: bool,
}

/// Eventos terminales de un stream
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    Ended,
    Errored(StreamError),
}

pub type PlayerEvents = mpsc::UnboundedReceiver<PlayerEvent>;

/// Convierte una canción en audio. Los eventos de fin y error llegan por el
/// canal que se entrega al crear la implementación.
#[async_trait]
pub trait AudioPipeline: Send + Sync {
    /// Abre el stream y empieza a reproducirlo. Devuelve la canción con la
    /// metadata que trae el stream.
    async fn open_stream(&self, song: &Song) -> Result<Song>;

    /// Detiene el stream activo, si hay uno
    async fn stop(&self);
}

/// Pipeline sobre el `Call` de songbird usando yt-dlp como fuente
pub struct SongbirdPipeline {
    guild_id: GuildId,
    call: Arc<tokio::sync::Mutex<Call>>,
    http: reqwest::Client,
    extractor: Arc<ExtractorConfig>,
    events: mpsc::UnboundedSender<PlayerEvent>,
    current: Mutex<Option<TrackHandle>>,
    stopping: Arc<AtomicBool>,
}

impl SongbirdPipeline {
    pub fn new(
        guild_id: GuildId,
        call: Arc<tokio::sync::Mutex<Call>>,
        http: reqwest::Client,
        extractor: Arc<ExtractorConfig>,
    ) -> (Self, PlayerEvents) {
        let (events, rx) = mpsc::unbounded_channel();
        let pipeline = Self {
            guild_id,
            call,
            http,
            extractor,
            events,
            current: Mutex::new(None),
            stopping: Arc::new(AtomicBool::new(false)),
        };
        (pipeline, rx)
    }
}

#[async_trait]
impl AudioPipeline for SongbirdPipeline {
    async fn open_stream(&self, song: &Song) -> Result<Song> {
        let url = song
            .url()
            .context("La canción no tiene una referencia reproducible")?;

        info!("🎵 Abriendo stream para: {}", song.title());

        let mut source = YoutubeDl::new_ytdl_like(self.extractor.program, self.http.clone(), url.to_string())
            .user_args(self.extractor.stream_args());

        // Aquí falla yt-dlp si el video no está disponible
        let metadata = tokio::time::timeout(OPEN_TIMEOUT, source.aux_metadata())
            .await
            .context("Timeout obteniendo el stream")?
            .context("yt-dlp no pudo abrir el stream")?;

        let resolved = song.clone().with_stream_metadata(
            metadata.title,
            metadata.channel.or(metadata.artist),
            metadata.thumbnail,
            metadata.duration,
        );

        self.stopping.store(false, Ordering::SeqCst);
        let handle = {
            let mut call = self.call.lock().await;
            call.stop();
            call.play_input(source.into())
        };

        for event in [TrackEvent::End, TrackEvent::Error] {
            handle
                .add_event(
                    Event::Track(event),
                    TrackEventForwarder {
                        guild_id: self.guild_id,
                        events: self.events.clone(),
                        stopping: self.stopping.clone(),
                    },
                )
                .map_err(|e| anyhow::anyhow!("Error al agregar event handler: {}", e))?;
        }

        *self.current.lock() = Some(handle);
        Ok(resolved)
    }

    async fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        if let Some(handle) = self.current.lock().take() {
            if let Err(e) = handle.stop() {
                debug!("Track ya detenido en guild {}: {}", self.guild_id, e);
            }
        }
    }
}

/// Reenvía el fin o el error de un track a la sesión
struct TrackEventForwarder {
    guild_id: GuildId,
    events: mpsc::UnboundedSender<PlayerEvent>,
    stopping: Arc<AtomicBool>,
}

#[async_trait]
impl VoiceEventHandler for TrackEventForwarder {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::Track(tracks) = ctx {
            if let Some((state, _handle)) = tracks.first() {
                let event = match &state.playing {
                    PlayMode::Errored(e) => PlayerEvent::Errored(StreamError {
                        message: format!("{:?}", e),
                        premature_close: self.stopping.load(Ordering::SeqCst),
                    }),
                    _ => PlayerEvent::Ended,
                };

                if self.events.send(event).is_err() {
                    warn!("Sesión de guild {} ya cerrada, evento descartado", self.guild_id);
                }
            }
        }

        // Cada track se escucha una sola vez
        Some(Event::Cancel)
    }
}
