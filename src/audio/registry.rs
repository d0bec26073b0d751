use anyhow::Result;
use dashmap::DashMap;
use serenity::all::GuildId;
use std::{future::Future, sync::Arc};
use tokio::sync::Mutex;
use tracing::info;

use super::session::{PlaybackSession, SessionParts};
use crate::storage::VoiceSettings;

/// Sesiones activas por guild. Como mucho una sesión viva por guild.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<GuildId, PlaybackSession>,
    // Serializa la creación por guild: dos /play simultáneos no crean dos sesiones
    creating: DashMap<GuildId, Arc<Mutex<()>>>,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sesión viva del guild; las que ya se cerraron no cuentan
    pub fn get(&self, guild_id: GuildId) -> Option<PlaybackSession> {
        self.sessions
            .get(&guild_id)
            .map(|entry| entry.value().clone())
            .filter(|session| !session.is_closed())
    }

    /// Devuelve la sesión del guild o la crea con `connect`. El booleano
    /// indica si se creó en esta llamada.
    pub async fn get_or_try_create<F, Fut>(
        self: &Arc<Self>,
        guild_id: GuildId,
        settings: VoiceSettings,
        connect: F,
    ) -> Result<(PlaybackSession, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SessionParts>>,
    {
        if let Some(session) = self.get(guild_id) {
            return Ok((session, false));
        }

        let lock = self.creating.entry(guild_id).or_default().clone();
        let _creating = lock.lock().await;
        let result = self.create_locked(guild_id, settings, connect).await;

        // Sin nadie más esperando, el lock del guild sobra (el mapa y `lock`)
        self.creating
            .remove_if(&guild_id, |_, entry| Arc::strong_count(entry) == 2);
        result
    }

    async fn create_locked<F, Fut>(
        self: &Arc<Self>,
        guild_id: GuildId,
        settings: VoiceSettings,
        connect: F,
    ) -> Result<(PlaybackSession, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SessionParts>>,
    {
        // Otro comando pudo haberla creado mientras esperábamos
        if let Some(session) = self.get(guild_id) {
            return Ok((session, false));
        }

        let parts = connect().await?;
        let session = PlaybackSession::start(guild_id, settings, parts, Arc::downgrade(self));
        self.sessions.insert(guild_id, session.clone());

        Ok((session, true))
    }

    /// Quita la sesión solo si sigue siendo la misma instancia
    pub fn remove_if_same(&self, guild_id: GuildId, session: &PlaybackSession) -> bool {
        let removed = self
            .sessions
            .remove_if(&guild_id, |_, current| current.same_session(session))
            .is_some();

        if removed {
            info!("🗑️ Sesión de guild {} eliminada del registro", guild_id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Cierra todas las sesiones (apagado del bot)
    pub async fn shutdown_all(&self) {
        let sessions: Vec<PlaybackSession> = self.sessions.iter().map(|e| e.value().clone()).collect();
        for session in sessions {
            session.teardown(true).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::{fake_parts, harness, Harness};
    use crate::sources::MockResolver;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn concurrent_creates_build_one_session() {
        let registry = SessionRegistry::new();
        let guild = GuildId::new(1);
        let built = Arc::new(AtomicUsize::new(0));

        let create = || {
            let registry = registry.clone();
            let built = built.clone();
            async move {
                registry
                    .get_or_try_create(guild, VoiceSettings::default(), || async move {
                        built.fetch_add(1, Ordering::SeqCst);
                        // Simula la latencia del join
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(fake_parts(MockResolver::new()).0)
                    })
                    .await
                    .unwrap()
            }
        };

        let ((a, a_new), (b, b_new)) = tokio::join!(create(), create());

        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert!(a.same_session(&b));
        assert!(a_new ^ b_new);
        assert_eq!(registry.len(), 1);
        assert!(registry.creating.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connect_leaves_no_session() {
        let registry = SessionRegistry::new();
        let result = registry
            .get_or_try_create(GuildId::new(2), VoiceSettings::default(), || async {
                anyhow::bail!("sin permisos para conectar")
            })
            .await;

        assert!(result.is_err());
        assert!(registry.is_empty());
        assert!(registry.creating.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_session_is_replaced() {
        let Harness { registry, session, .. } = harness(10, MockResolver::new()).await;
        session.erase_queue(false).await;

        let (fresh, created) = registry
            .get_or_try_create(session.guild_id(), VoiceSettings::default(), || async {
                Ok(fake_parts(MockResolver::new()).0)
            })
            .await
            .unwrap();

        assert!(created);
        assert!(!fresh.same_session(&session));

        // La vieja ya no puede sacar a la nueva del registro
        assert!(!registry.remove_if_same(session.guild_id(), &session));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_all_tears_everything_down() {
        let Harness { registry, session, transport, .. } = harness(10, MockResolver::new()).await;

        registry.shutdown_all().await;

        assert!(session.is_closed());
        assert_eq!(transport.destroys(), 1);
        assert!(registry.is_empty());
    }
}
