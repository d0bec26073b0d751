//! Playback session: everything that plays music in one guild.
//!
//! A session owns the queue, the playback state machine and the connection
//! health machine, plus handles to the transport, pipeline, resolver and text
//! sink. Two watcher tasks are spawned on creation (transport state changes
//! and player events); they live as long as the session and stop on teardown.
//!
//! Mutable state sits behind one `parking_lot::Mutex` that is never held
//! across an `.await`. The resolve+open section of advancement is guarded by
//! an atomic in-flight flag, so at most one `open_stream` runs per session.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serenity::all::{ChannelId, GuildId};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    time::Duration,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    connection::{ConnectionHealth, ConnectionState, HealthAction, MAX_REJOIN_ATTEMPTS},
    notify::{MessageHandle, Notice, TextSink},
    pipeline::{AudioPipeline, PlayerEvent, PlayerEvents},
    playback::{transition, PlaybackEffect, PlaybackEvent, PlaybackState, Transition},
    queue::{RemoveOutcome, SongQueue},
    registry::SessionRegistry,
    transport::VoiceTransport,
};
use crate::{
    sources::{Resolver, Song},
    storage::VoiceSettings,
};

/// Capacidades externas con las que se arma una sesión
pub struct SessionParts {
    pub transport: Arc<dyn VoiceTransport>,
    pub pipeline: Arc<dyn AudioPipeline>,
    pub player_events: PlayerEvents,
    pub resolver: Arc<dyn Resolver>,
    pub text: Arc<dyn TextSink>,
}

/// Copia del estado para mostrarlo (comando `/queue`)
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub playback: PlaybackState,
    pub current: Option<Song>,
    pub queued: Vec<Song>,
    pub total_duration: Duration,
    pub max_songs: usize,
    pub joined_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct PlaybackSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    guild_id: GuildId,
    joined_at: DateTime<Utc>,
    state: Mutex<SessionState>,
    advancing: AtomicBool,
    closed: AtomicBool,
    transport: Arc<dyn VoiceTransport>,
    pipeline: Arc<dyn AudioPipeline>,
    resolver: Arc<dyn Resolver>,
    text: Arc<dyn TextSink>,
    registry: Weak<SessionRegistry>,
    disconnect_timer: Mutex<Option<CancellationToken>>,
    shutdown: CancellationToken,
}

struct SessionState {
    queue: SongQueue,
    playback: PlaybackState,
    now_playing: Option<MessageHandle>,
    settings: VoiceSettings,
}

/// Trabajo asíncrono que queda después de aplicar una transición
#[derive(Default)]
struct Followup {
    delete: Option<MessageHandle>,
    notices: Vec<Notice>,
    announce: Option<Song>,
    advance: bool,
}

impl SessionState {
    /// Aplica un evento a la máquina de reproducción. Los efectos sobre el
    /// estado se aplican aquí mismo; el resto se devuelve.
    fn apply(&mut self, event: PlaybackEvent, subject: &str) -> Followup {
        let Transition { next, effects } = transition(self.playback, event);
        self.playback = next;

        let mut followup = Followup::default();
        for effect in effects {
            match effect {
                PlaybackEffect::AnnounceNowPlaying => followup.announce = self.queue.current().cloned(),
                PlaybackEffect::NotifyOpenFailure(error) => followup.notices.push(Notice::OpenFailed {
                    title: subject.to_string(),
                    error,
                }),
                PlaybackEffect::NotifyStreamError(error) => followup.notices.push(Notice::StreamFailed {
                    title: subject.to_string(),
                    error,
                }),
                PlaybackEffect::DeleteNowPlaying => followup.delete = self.now_playing.take(),
                PlaybackEffect::ClearCurrent => self.queue.set_current(None),
                PlaybackEffect::Advance => followup.advance = true,
            }
        }
        followup
    }
}

/// Cómo terminó una espera con tiempo límite del watcher de conexión
enum Waited {
    Reached,
    Superseded(ConnectionState),
    Elapsed,
    Closed,
}

/// Marca de avance en curso; se libera al salir de cualquier rama
struct AdvanceGuard<'a>(&'a AtomicBool);

impl<'a> AdvanceGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for AdvanceGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl PlaybackSession {
    /// Crea la sesión y arranca los watchers de conexión y reproducción
    pub(crate) fn start(
        guild_id: GuildId,
        settings: VoiceSettings,
        parts: SessionParts,
        registry: Weak<SessionRegistry>,
    ) -> Self {
        let SessionParts {
            transport,
            pipeline,
            player_events,
            resolver,
            text,
        } = parts;

        let connection = transport.subscribe();
        let inner = Arc::new(SessionInner {
            guild_id,
            joined_at: Utc::now(),
            state: Mutex::new(SessionState {
                queue: SongQueue::new(settings.max_songs),
                playback: PlaybackState::Idle,
                now_playing: None,
                settings,
            }),
            advancing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            transport,
            pipeline,
            resolver,
            text,
            registry,
            disconnect_timer: Mutex::new(None),
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(inner.clone().watch_connection(connection));
        tokio::spawn(inner.clone().watch_player(player_events));

        info!("🎶 Sesión creada para guild {}", guild_id);
        Self { inner }
    }

    pub fn guild_id(&self) -> GuildId {
        self.inner.guild_id
    }

    /// Canal de voz en el que está el bot
    pub fn channel_id(&self) -> Option<ChannelId> {
        self.inner.transport.channel_id()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn is_full(&self) -> bool {
        self.inner.state.lock().queue.is_full()
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.inner.state.lock().playback
    }

    pub fn current_song(&self) -> Option<Song> {
        self.inner.state.lock().queue.current().cloned()
    }

    pub fn queue_len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn settings(&self) -> VoiceSettings {
        self.inner.state.lock().settings
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.inner.state.lock();
        SessionSnapshot {
            playback: state.playback,
            current: state.queue.current().cloned(),
            queued: state.queue.iter().cloned().collect(),
            total_duration: state.queue.total_duration(),
            max_songs: state.queue.max_songs(),
            joined_at: self.inner.joined_at,
        }
    }

    pub fn same_session(&self, other: &PlaybackSession) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Agrega canciones y arranca la reproducción si no hay nada sonando
    pub fn enqueue(&self, songs: Vec<Song>, front: bool) -> usize {
        if self.inner.is_closed() {
            return 0;
        }

        let added = self.inner.state.lock().queue.enqueue(songs, front);
        debug!("Guild {}: {} canciones agregadas", self.inner.guild_id, added);
        self.inner.request_advance();
        added
    }

    /// Descarta `n - 1` canciones y detiene la actual
    pub async fn skip(&self, n: usize) {
        let inner = &self.inner;
        if inner.is_closed() {
            return;
        }

        let playing = {
            let mut state = inner.state.lock();
            state.queue.skip(n);
            state.playback == PlaybackState::Playing
        };

        info!("⏭️ Skip x{} en guild {}", n.max(1), inner.guild_id);
        inner.pipeline.stop().await;

        // Sonando: el fin del stream dispara el avance
        if !playing {
            inner.request_advance();
        }
    }

    /// Quita la canción en `position` (1 = la actual, que se salta)
    pub async fn remove(&self, position: usize) -> RemoveOutcome {
        if self.inner.is_closed() {
            return RemoveOutcome::NothingToRemove;
        }

        let outcome = self.inner.state.lock().queue.remove(position);
        if outcome == RemoveOutcome::SkipCurrent {
            self.skip(1).await;
        }
        outcome
    }

    /// Vacía todo, detiene el stream y suelta el enlace de voz. La sesión
    /// queda inválida pero sigue en el registro.
    pub async fn erase_queue(&self, notify: bool) {
        self.inner.erase(notify).await;
    }

    /// Como [`erase_queue`](Self::erase_queue) y además sale del registro
    pub async fn teardown(&self, notify: bool) {
        self.inner.teardown(notify).await;
    }

    pub fn update_settings(&self, settings: VoiceSettings) {
        let mut state = self.inner.state.lock();
        state.settings = settings;
        state.queue.set_max_songs(settings.max_songs);
        info!("⚙️ Ajustes de voz actualizados en guild {}", self.inner.guild_id);
    }

    /// Cambió la gente del canal de voz del bot
    pub fn membership_changed(&self, listeners_present: bool) {
        self.inner.membership_changed(listeners_present);
    }

    /// Voice state del propio bot
    pub fn observe_channel(&self, channel: Option<ChannelId>) {
        if !self.inner.is_closed() {
            self.inner.transport.observe_channel(channel);
        }
    }
}

impl SessionInner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn request_advance(self: &Arc<Self>) {
        if self.is_closed() || self.state.lock().playback != PlaybackState::Idle {
            return;
        }

        let inner = self.clone();
        tokio::spawn(async move { inner.advance().await });
    }

    /// Saca la siguiente canción, la busca si hace falta y abre el stream.
    /// Si algo falla pasa a la siguiente, en orden.
    async fn advance(self: Arc<Self>) {
        loop {
            let Some(guard) = AdvanceGuard::acquire(&self.advancing) else {
                debug!("Avance ya en curso en guild {}", self.guild_id);
                return;
            };

            if self.is_closed() {
                return;
            }

            let song = {
                let mut state = self.state.lock();
                if state.playback != PlaybackState::Idle {
                    return;
                }
                let Some(song) = state.queue.pop_next() else {
                    debug!("Cola vacía en guild {}", self.guild_id);
                    return;
                };
                state.apply(PlaybackEvent::Dequeued, song.title());
                song
            };

            let subject = song.title().to_string();
            let (event, opened) = self.open(song).await;

            if self.is_closed() {
                if opened.is_some() {
                    self.pipeline.stop().await;
                }
                return;
            }

            let followup = {
                let mut state = self.state.lock();
                state.queue.settle_pending(opened);
                state.apply(event, &subject)
            };
            drop(guard);

            if !self.run_followup(followup).await {
                return;
            }
        }
    }

    async fn open(&self, song: Song) -> (PlaybackEvent, Option<Song>) {
        let song = if song.needs_lookup() {
            match self.resolver.lookup(song.title()).await {
                Ok(found) if !found.needs_lookup() => found,
                Ok(_) => {
                    warn!("🔍 \"{}\" sigue sin link en guild {}", song.title(), self.guild_id);
                    return (PlaybackEvent::LookupFailed, None);
                }
                Err(e) => {
                    warn!("🔍 No se encontró \"{}\" en guild {}: {}", song.title(), self.guild_id, e);
                    return (PlaybackEvent::LookupFailed, None);
                }
            }
        } else {
            song
        };

        match self.pipeline.open_stream(&song).await {
            Ok(resolved) => {
                info!("▶️ Reproduciendo en guild {}: {}", self.guild_id, resolved.title());
                (PlaybackEvent::StreamOpened, Some(resolved))
            }
            Err(e) => {
                error!("❌ No se pudo abrir \"{}\" en guild {}: {:#}", song.title(), self.guild_id, e);
                (PlaybackEvent::StreamOpenFailed(format!("{:#}", e)), None)
            }
        }
    }

    /// Ejecuta los efectos pendientes. Devuelve si hay que seguir avanzando.
    async fn run_followup(&self, followup: Followup) -> bool {
        if let Some(handle) = followup.delete {
            self.delete_message(handle).await;
        }

        for notice in followup.notices {
            self.notify(notice).await;
        }

        if let Some(song) = followup.announce {
            if let Some(handle) = self.notify(Notice::NowPlaying(song.clone())).await {
                let stale = {
                    let mut state = self.state.lock();
                    let still_playing =
                        state.playback == PlaybackState::Playing && state.queue.current() == Some(&song);
                    if still_playing {
                        state.now_playing = Some(handle);
                        None
                    } else {
                        Some(handle)
                    }
                };
                // La canción terminó antes de que llegara el anuncio
                if let Some(handle) = stale {
                    self.delete_message(handle).await;
                }
            }
        }

        followup.advance && !self.is_closed()
    }

    async fn notify(&self, notice: Notice) -> Option<MessageHandle> {
        match self.text.send(notice).await {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("No se pudo enviar mensaje en guild {}: {:#}", self.guild_id, e);
                None
            }
        }
    }

    async fn delete_message(&self, handle: MessageHandle) {
        if let Err(e) = self.text.delete(handle).await {
            warn!("No se pudo borrar mensaje en guild {}: {:#}", self.guild_id, e);
        }
    }

    async fn on_player_event(self: &Arc<Self>, event: PlayerEvent) {
        let followup = {
            let mut state = self.state.lock();
            if self.is_closed() {
                return;
            }

            let subject = state
                .queue
                .current()
                .map(|song| song.title().to_string())
                .unwrap_or_default();

            let event = match event {
                PlayerEvent::Ended => {
                    debug!("Stream terminado en guild {}: {}", self.guild_id, subject);
                    PlaybackEvent::StreamEnded
                }
                PlayerEvent::Errored(e) => {
                    if !e.premature_close {
                        error!("💥 Error de stream en guild {} ({}): {}", self.guild_id, subject, e);
                    }
                    PlaybackEvent::StreamErrored(e)
                }
            };
            state.apply(event, &subject)
        };

        if self.run_followup(followup).await {
            self.clone().advance().await;
        }
    }

    async fn watch_player(self: Arc<Self>, mut events: PlayerEvents) {
        loop {
            let event = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            self.on_player_event(event).await;
        }
        debug!("Watcher de reproducción terminado en guild {}", self.guild_id);
    }

    async fn watch_connection(self: Arc<Self>, mut rx: watch::Receiver<ConnectionState>) {
        let mut health = ConnectionHealth::new();
        // Estado que cortó una espera y todavía no se clasificó
        let mut superseding: Option<ConnectionState> = None;

        loop {
            let state = match superseding.take() {
                Some(state) => state,
                None => {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        changed = rx.changed() => if changed.is_err() { break },
                    }
                    rx.borrow_and_update().clone()
                }
            };
            debug!("🔌 Estado de voz en guild {}: {:?}", self.guild_id, state);

            match health.observe(&state) {
                HealthAction::Nothing => {}
                HealthAction::AwaitMove { grace } => {
                    match self.await_state(&mut rx, grace, ConnectionState::is_recovering).await {
                        Waited::Reached => info!("🔀 Bot movido de canal en guild {}", self.guild_id),
                        Waited::Superseded(next) => superseding = Some(next),
                        Waited::Elapsed => {
                            warn!("🥾 Bot expulsado del canal de voz en guild {}", self.guild_id);
                            self.teardown(false).await;
                            break;
                        }
                        Waited::Closed => break,
                    }
                }
                HealthAction::Rejoin { after, attempt } => {
                    warn!(
                        "🔄 Reconexión {}/{} en guild {} dentro de {}",
                        attempt,
                        MAX_REJOIN_ATTEMPTS,
                        self.guild_id,
                        humantime::format_duration(after)
                    );
                    match self.await_state(&mut rx, after, |_| false).await {
                        Waited::Elapsed | Waited::Reached => {
                            if let Err(e) = self.transport.rejoin().await {
                                warn!("Reconexión fallida en guild {}: {:#}", self.guild_id, e);
                            }
                        }
                        Waited::Superseded(next) => superseding = Some(next),
                        Waited::Closed => break,
                    }
                }
                HealthAction::AwaitReady { timeout } => {
                    match self.await_state(&mut rx, timeout, ConnectionState::is_ready).await {
                        Waited::Reached => health.mark_ready(),
                        Waited::Superseded(next) => superseding = Some(next),
                        Waited::Elapsed => {
                            warn!("⌛ La voz no quedó lista a tiempo en guild {}", self.guild_id);
                            self.teardown(false).await;
                            break;
                        }
                        Waited::Closed => break,
                    }
                }
                HealthAction::Teardown => {
                    if !state.is_destroyed() {
                        warn!("💀 Demasiados intentos de reconexión en guild {}", self.guild_id);
                    }
                    self.teardown(false).await;
                    break;
                }
            }
        }
        debug!("Watcher de conexión terminado en guild {}", self.guild_id);
    }

    /// Espera hasta `limit` a un estado que cumpla `wanted`. Los estados
    /// intermedios no cortan la espera; una caída o un destroy sí, y se
    /// devuelven para clasificarlos de nuevo.
    async fn await_state(
        &self,
        rx: &mut watch::Receiver<ConnectionState>,
        limit: Duration,
        wanted: fn(&ConnectionState) -> bool,
    ) -> Waited {
        let deadline = tokio::time::sleep(limit);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return Waited::Closed,
                _ = &mut deadline => return Waited::Elapsed,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Waited::Closed;
                    }
                    let state = rx.borrow_and_update().clone();
                    if wanted(&state) {
                        return Waited::Reached;
                    }
                    if state.is_lost() {
                        debug!("Espera interrumpida en guild {}: {:?}", self.guild_id, state);
                        return Waited::Superseded(state);
                    }
                }
            }
        }
    }

    fn membership_changed(self: &Arc<Self>, listeners_present: bool) {
        if self.is_closed() {
            return;
        }

        let after = self.state.lock().settings.disconnect_after();
        let mut timer = self.disconnect_timer.lock();

        if let Some(previous) = timer.take() {
            previous.cancel();
            if listeners_present {
                info!("⏹️ Desconexión automática cancelada en guild {}", self.guild_id);
            }
        }
        if listeners_present {
            return;
        }

        let token = self.shutdown.child_token();
        *timer = Some(token.clone());
        drop(timer);

        info!(
            "⏳ Canal vacío en guild {}, desconectando en {}",
            self.guild_id,
            humantime::format_duration(after)
        );

        let inner = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(after) => {
                    info!("💤 Desconexión por inactividad en guild {}", inner.guild_id);
                    inner.teardown(true).await;
                }
            }
        });
    }

    fn cancel_disconnect_timer(&self) {
        if let Some(token) = self.disconnect_timer.lock().take() {
            token.cancel();
        }
    }

    /// Devuelve `false` si la sesión ya estaba cerrada
    async fn erase(&self, notify: bool) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }

        info!("🧹 Cerrando sesión de guild {}", self.guild_id);
        self.shutdown.cancel();
        self.cancel_disconnect_timer();

        let delete = {
            let mut state = self.state.lock();
            state.queue.clear();
            state.apply(PlaybackEvent::Reset, "").delete
        };

        self.pipeline.stop().await;
        self.transport.destroy().await;

        if let Some(handle) = delete {
            self.delete_message(handle).await;
        }
        if notify {
            self.notify(Notice::Farewell).await;
        }
        true
    }

    async fn teardown(self: &Arc<Self>, notify: bool) {
        self.erase(notify).await;

        if let Some(registry) = self.registry.upgrade() {
            let session = PlaybackSession { inner: self.clone() };
            registry.remove_if_same(self.guild_id, &session);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::connection::DisconnectReason;
    use crate::audio::testing::{harness, song, title_only, Harness};
    use crate::sources::{MockResolver, QueryError};
    use pretty_assertions::assert_eq;

    fn kick() -> ConnectionState {
        ConnectionState::Disconnected(DisconnectReason::WebSocketClose { code: 4014 })
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_then_play() {
        let Harness { session, pipeline, sink, .. } = harness(2, MockResolver::new()).await;

        assert_eq!(session.enqueue(vec![song("A"), song("B")], false), 2);
        settle().await;

        assert_eq!(session.playback_state(), PlaybackState::Playing);
        assert_eq!(session.current_song(), Some(song("A")));
        assert_eq!(session.snapshot().queued, vec![song("B")]);
        assert_eq!(pipeline.opened(), vec!["A"]);
        assert_eq!(sink.sent(), vec![Notice::NowPlaying(song("A"))]);
    }

    #[tokio::test(start_paused = true)]
    async fn full_session_truncates_new_songs() {
        let Harness { session, .. } = harness(2, MockResolver::new()).await;
        session.enqueue(vec![song("A"), song("B")], false);
        settle().await;

        assert!(session.is_full());
        assert_eq!(session.enqueue(vec![song("C")], false), 0);
        assert_eq!(session.snapshot().queued, vec![song("B")]);
    }

    #[tokio::test(start_paused = true)]
    async fn song_being_opened_counts_toward_capacity() {
        let Harness { session, pipeline, .. } = harness(2, MockResolver::new()).await;
        pipeline.set_open_delay(Duration::from_secs(1));

        assert_eq!(session.enqueue(vec![song("A"), song("B")], false), 2);
        settle().await;
        assert_eq!(session.playback_state(), PlaybackState::Buffering);
        assert!(session.is_full());
        assert_eq!(session.enqueue(vec![song("C")], false), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let snapshot = session.snapshot();
        assert_eq!(snapshot.current, Some(song("A")));
        assert_eq!(snapshot.queued, vec![song("B")]);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_triggers_open_one_stream_at_a_time() {
        let Harness { session, pipeline, .. } = harness(10, MockResolver::new()).await;
        pipeline.set_open_delay(Duration::from_secs(1));

        session.enqueue(vec![song("A")], false);
        session.enqueue(vec![song("B")], false);
        session.enqueue(vec![song("C")], false);
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(pipeline.max_concurrent_opens(), 1);
        assert_eq!(pipeline.opened(), vec!["A"]);
        assert_eq!(session.snapshot().queued, vec![song("B"), song("C")]);

        // Fin del stream y enqueue en el mismo tick
        pipeline.finish();
        session.enqueue(vec![song("D")], false);
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(pipeline.max_concurrent_opens(), 1);
        assert_eq!(pipeline.opened(), vec!["A", "B"]);
    }

    #[tokio::test(start_paused = true)]
    async fn title_only_song_is_looked_up_once() {
        let mut resolver = MockResolver::new();
        resolver
            .expect_lookup()
            .times(1)
            .returning(|title| {
                assert_eq!(title.to_string(), "solo titulo");
                Ok(song("encontrada"))
            });

        let Harness { session, pipeline, .. } = harness(10, resolver).await;
        session.enqueue(vec![title_only("solo titulo")], false);
        settle().await;

        assert_eq!(pipeline.opened(), vec!["encontrada"]);
        assert_eq!(session.current_song(), Some(song("encontrada")));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_lookup_skips_silently() {
        let mut resolver = MockResolver::new();
        resolver
            .expect_lookup()
            .times(1)
            .returning(|title| Err(QueryError::NoResults(title.to_string())));

        let Harness { session, pipeline, sink, .. } = harness(10, resolver).await;
        session.enqueue(vec![title_only("perdida"), song("B")], false);
        settle().await;

        assert_eq!(pipeline.opened(), vec!["B"]);
        assert_eq!(sink.sent(), vec![Notice::NowPlaying(song("B"))]);
        assert_eq!(session.queue_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_lookup_of_last_song_returns_to_idle() {
        let mut resolver = MockResolver::new();
        resolver
            .expect_lookup()
            .returning(|title| Err(QueryError::NoResults(title.to_string())));

        let Harness { session, sink, .. } = harness(10, resolver).await;
        session.enqueue(vec![title_only("perdida")], false);
        settle().await;

        assert_eq!(session.playback_state(), PlaybackState::Idle);
        assert!(sink.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn open_failure_notifies_and_moves_on() {
        let Harness { session, pipeline, sink, .. } = harness(10, MockResolver::new()).await;
        pipeline.fail_on("A");

        session.enqueue(vec![song("A"), song("B")], false);
        settle().await;

        assert_eq!(session.current_song(), Some(song("B")));
        let sent = sink.sent();
        assert!(matches!(&sent[0], Notice::OpenFailed { title, .. } if title == "A"));
        assert_eq!(sent[1], Notice::NowPlaying(song("B")));
    }

    #[tokio::test(start_paused = true)]
    async fn stream_end_deletes_announcement_and_advances() {
        let Harness { session, pipeline, sink, .. } = harness(10, MockResolver::new()).await;
        session.enqueue(vec![song("A"), song("B")], false);
        settle().await;
        let announced = sink.handles()[0];

        pipeline.finish();
        settle().await;

        assert_eq!(sink.deleted(), vec![announced]);
        assert_eq!(session.current_song(), Some(song("B")));

        pipeline.finish();
        settle().await;
        assert_eq!(session.playback_state(), PlaybackState::Idle);
        assert_eq!(session.current_song(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn stream_errors_are_reported_unless_premature_close() {
        let Harness { session, pipeline, sink, .. } = harness(10, MockResolver::new()).await;
        session.enqueue(vec![song("A"), song("B"), song("C")], false);
        settle().await;

        pipeline.fail_stream("decoder", false);
        settle().await;
        assert!(sink
            .sent()
            .iter()
            .any(|n| matches!(n, Notice::StreamFailed { title, error } if title == "A" && error == "decoder")));
        assert_eq!(session.current_song(), Some(song("B")));

        pipeline.fail_stream("closed", true);
        settle().await;
        assert!(!sink
            .sent()
            .iter()
            .any(|n| matches!(n, Notice::StreamFailed { title, .. } if title == "B")));
        assert_eq!(session.current_song(), Some(song("C")));
    }

    #[tokio::test(start_paused = true)]
    async fn skip_past_the_queue_goes_idle() {
        let Harness { session, .. } = harness(10, MockResolver::new()).await;
        session.enqueue(vec![song("A"), song("B")], false);
        settle().await;

        session.skip(2).await;
        settle().await;

        assert_eq!(session.playback_state(), PlaybackState::Idle);
        assert_eq!(session.current_song(), None);
        assert_eq!(session.queue_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn skip_one_plays_the_next_song() {
        let Harness { session, pipeline, .. } = harness(10, MockResolver::new()).await;
        session.enqueue(vec![song("A"), song("B")], false);
        settle().await;

        session.skip(1).await;
        settle().await;

        assert_eq!(pipeline.stops(), 1);
        assert_eq!(session.current_song(), Some(song("B")));
    }

    #[tokio::test(start_paused = true)]
    async fn remove_first_position_skips_current() {
        let Harness { session, .. } = harness(10, MockResolver::new()).await;
        session.enqueue(vec![song("A"), song("B"), song("C")], false);
        settle().await;

        assert_eq!(session.remove(5).await, RemoveOutcome::NothingToRemove);
        assert_eq!(session.remove(3).await, RemoveOutcome::Removed(song("C")));
        assert_eq!(session.remove(1).await, RemoveOutcome::SkipCurrent);
        settle().await;

        assert_eq!(session.current_song(), Some(song("B")));
        assert_eq!(session.queue_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn erase_queue_is_idempotent_and_keeps_registry_entry() {
        let Harness { registry, session, transport, pipeline, sink } =
            harness(10, MockResolver::new()).await;
        session.enqueue(vec![song("A"), song("B")], false);
        settle().await;
        let announced = sink.handles()[0];

        session.erase_queue(true).await;
        session.erase_queue(true).await;
        settle().await;

        assert!(session.is_closed());
        assert_eq!(transport.destroys(), 1);
        assert_eq!(session.playback_state(), PlaybackState::Idle);
        assert_eq!(session.current_song(), None);
        assert_eq!(session.queue_len(), 0);
        assert!(pipeline.stops() >= 1);
        assert_eq!(sink.deleted(), vec![announced]);
        assert_eq!(sink.sent().iter().filter(|n| **n == Notice::Farewell).count(), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(session.guild_id()).is_none());

        // Una sesión cerrada ignora comandos
        assert_eq!(session.enqueue(vec![song("C")], false), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn kick_without_reconnect_tears_down_once() {
        let Harness { registry, session, transport, sink, .. } = harness(10, MockResolver::new()).await;
        session.enqueue(vec![song("A")], false);
        settle().await;

        transport.emit(kick());
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(!session.is_closed());

        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;

        assert!(session.is_closed());
        assert_eq!(transport.destroys(), 1);
        assert_eq!(registry.len(), 0);
        assert!(!sink.sent().contains(&Notice::Farewell));
    }

    #[tokio::test(start_paused = true)]
    async fn channel_move_within_grace_keeps_session() {
        let Harness { registry, session, transport, .. } = harness(10, MockResolver::new()).await;

        transport.emit(kick());
        tokio::time::sleep(Duration::from_secs(2)).await;
        transport.emit(ConnectionState::Connecting);
        tokio::time::sleep(Duration::from_secs(1)).await;
        transport.emit(ConnectionState::Ready);
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert!(!session.is_closed());
        assert_eq!(transport.destroys(), 0);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn network_drop_rejoins_with_backoff() {
        let Harness { session, transport, .. } = harness(10, MockResolver::new()).await;

        transport.emit(ConnectionState::Disconnected(DisconnectReason::TimedOut));
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(transport.rejoins(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(transport.rejoins(), 1);

        // Segundo corte seguido: espera 10s
        transport.emit(ConnectionState::Disconnected(DisconnectReason::TimedOut));
        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(transport.rejoins(), 1);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(transport.rejoins(), 2);
        assert!(!session.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn drop_while_waiting_for_ready_is_rejoined() {
        let Harness { session, transport, .. } = harness(10, MockResolver::new()).await;

        transport.emit(ConnectionState::Signalling);
        tokio::time::sleep(Duration::from_secs(2)).await;
        transport.emit(ConnectionState::Disconnected(DisconnectReason::TimedOut));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(transport.rejoins(), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(transport.rejoins(), 1);

        // El límite de 20s de la señalización ya no aplica
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(!session.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn other_drop_during_move_grace_is_rejoined() {
        let Harness { session, transport, .. } = harness(10, MockResolver::new()).await;

        transport.emit(kick());
        tokio::time::sleep(Duration::from_secs(2)).await;
        transport.emit(ConnectionState::Disconnected(DisconnectReason::TimedOut));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(!session.is_closed());
        assert_eq!(transport.rejoins(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(transport.rejoins(), 1);
        assert!(!session.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn kick_during_rejoin_backoff_is_not_rejoined() {
        let Harness { session, transport, .. } = harness(10, MockResolver::new()).await;

        transport.emit(ConnectionState::Disconnected(DisconnectReason::TimedOut));
        tokio::time::sleep(Duration::from_secs(2)).await;
        transport.emit(kick());

        tokio::time::sleep(Duration::from_secs(6)).await;
        settle().await;

        assert_eq!(transport.rejoins(), 0);
        assert!(session.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn rejoin_ceiling_tears_down() {
        let Harness { session, transport, .. } = harness(10, MockResolver::new()).await;

        for _ in 0..MAX_REJOIN_ATTEMPTS {
            transport.emit(ConnectionState::Disconnected(DisconnectReason::TimedOut));
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        assert_eq!(transport.rejoins(), MAX_REJOIN_ATTEMPTS as usize);
        assert!(!session.is_closed());

        transport.emit(ConnectionState::Disconnected(DisconnectReason::TimedOut));
        settle().await;
        assert!(session.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_signalling_times_out() {
        let Harness { session, transport, .. } = harness(10, MockResolver::new()).await;

        transport.emit(ConnectionState::Signalling);
        tokio::time::sleep(Duration::from_secs(19)).await;
        assert!(!session.is_closed());

        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;
        assert!(session.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn signalling_that_reaches_ready_survives() {
        let Harness { session, transport, .. } = harness(10, MockResolver::new()).await;

        transport.emit(ConnectionState::Signalling);
        tokio::time::sleep(Duration::from_secs(10)).await;
        transport.emit(ConnectionState::Ready);
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert!(!session.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_channel_disconnects_with_farewell() {
        let Harness { registry, session, sink, .. } = harness(10, MockResolver::new()).await;

        session.membership_changed(false);
        tokio::time::sleep(Duration::from_secs(179)).await;
        assert!(!session.is_closed());

        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;
        assert!(session.is_closed());
        assert_eq!(registry.len(), 0);
        assert!(sink.sent().contains(&Notice::Farewell));
    }

    #[tokio::test(start_paused = true)]
    async fn returning_listener_cancels_countdown() {
        let Harness { session, .. } = harness(10, MockResolver::new()).await;

        session.membership_changed(false);
        tokio::time::sleep(Duration::from_secs(100)).await;
        session.membership_changed(true);
        tokio::time::sleep(Duration::from_secs(600)).await;

        assert!(!session.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_restarts_instead_of_layering() {
        let Harness { session, .. } = harness(10, MockResolver::new()).await;

        session.membership_changed(false);
        tokio::time::sleep(Duration::from_secs(100)).await;
        session.membership_changed(false);

        // El primer contador habría vencido a los 180s
        tokio::time::sleep(Duration::from_secs(150)).await;
        assert!(!session.is_closed());

        tokio::time::sleep(Duration::from_secs(40)).await;
        settle().await;
        assert!(session.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn sink_failures_do_not_stop_playback() {
        let Harness { session, pipeline, sink, .. } = harness(10, MockResolver::new()).await;
        sink.fail_all();

        session.enqueue(vec![song("A"), song("B")], false);
        settle().await;
        pipeline.finish();
        settle().await;

        assert_eq!(session.current_song(), Some(song("B")));
    }

    #[tokio::test(start_paused = true)]
    async fn shrinking_capacity_truncates_the_tail() {
        let Harness { session, .. } = harness(10, MockResolver::new()).await;
        session.enqueue(vec![song("A"), song("B"), song("C"), song("D")], false);
        settle().await;

        let settings = VoiceSettings { max_songs: 2, ..session.settings() };
        session.update_settings(settings);

        assert_eq!(session.snapshot().queued, vec![song("B")]);
        assert!(session.is_full());
    }

    async fn settle() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }
}
