use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serenity::all::{ChannelId, GuildId};
use songbird::{
    events::context_data::DisconnectReason as DriverDisconnectReason,
    model::CloseCode,
    Call, CoreEvent, Event, EventContext, EventHandler as VoiceEventHandler, Songbird,
};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use super::connection::{ConnectionState, DisconnectReason, KICK_CLOSE_CODE};

/// Enlace de voz de una sesión. Los cambios de estado se publican por un
/// `watch`, que la sesión observa durante toda su vida.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    fn subscribe(&self) -> watch::Receiver<ConnectionState>;

    /// Canal de voz en el que está el bot
    fn channel_id(&self) -> Option<ChannelId>;

    /// Actualiza el canal según el voice state del propio bot
    fn observe_channel(&self, channel: Option<ChannelId>);

    async fn rejoin(&self) -> Result<()>;

    /// Libera el enlace. Idempotente.
    async fn destroy(&self);
}

pub struct SongbirdTransport {
    guild_id: GuildId,
    manager: Arc<Songbird>,
    call: Arc<Mutex<Call>>,
    channel: RwLock<Option<ChannelId>>,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl SongbirdTransport {
    /// Se une al canal y registra los eventos del driver
    pub async fn join(manager: Arc<Songbird>, guild_id: GuildId, channel_id: ChannelId) -> Result<Self> {
        let (state, _) = watch::channel(ConnectionState::Signalling);
        let state = Arc::new(state);

        let call = manager
            .join(guild_id, channel_id)
            .await
            .context("Error al conectar al canal de voz")?;

        {
            let mut handler = call.lock().await;
            for event in [CoreEvent::DriverConnect, CoreEvent::DriverReconnect, CoreEvent::DriverDisconnect] {
                handler.add_global_event(
                    Event::Core(event),
                    DriverStateForwarder {
                        guild_id,
                        state: state.clone(),
                    },
                );
            }

            if let Err(e) = handler.deafen(true).await {
                warn!("No se pudo ensordecer al bot en guild {}: {}", guild_id, e);
            }
        }

        state.send_replace(ConnectionState::Ready);
        info!("🔊 Conectado al canal de voz {} en guild {}", channel_id, guild_id);

        Ok(Self {
            guild_id,
            manager,
            call,
            channel: RwLock::new(Some(channel_id)),
            state,
        })
    }

    pub fn call(&self) -> Arc<Mutex<Call>> {
        self.call.clone()
    }
}

#[async_trait]
impl VoiceTransport for SongbirdTransport {
    fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn channel_id(&self) -> Option<ChannelId> {
        *self.channel.read()
    }

    fn observe_channel(&self, channel: Option<ChannelId>) {
        if self.state.borrow().is_destroyed() {
            return;
        }

        let previous = std::mem::replace(&mut *self.channel.write(), channel);
        match channel {
            Some(id) if previous != Some(id) => {
                info!("🔀 Bot movido al canal {} en guild {}", id, self.guild_id);
                self.state.send_replace(ConnectionState::Connecting);
            }
            Some(_) => {}
            None => {
                info!("🚪 Bot fuera del canal de voz en guild {}", self.guild_id);
                self.state.send_replace(ConnectionState::Disconnected(DisconnectReason::WebSocketClose {
                    code: KICK_CLOSE_CODE,
                }));
            }
        }
    }

    async fn rejoin(&self) -> Result<()> {
        let channel = self
            .channel_id()
            .context("No hay canal de voz al que volver")?;

        self.state.send_replace(ConnectionState::Signalling);
        info!("🔄 Reconectando al canal {} en guild {}", channel, self.guild_id);

        let join = {
            let mut call = self.call.lock().await;
            call.join(channel).await.context("Error al reconectar")?
        };
        join.await.context("Error al reconectar")?;

        self.state.send_replace(ConnectionState::Ready);
        Ok(())
    }

    async fn destroy(&self) {
        if self.state.borrow().is_destroyed() {
            return;
        }
        self.state.send_replace(ConnectionState::Destroyed);

        if let Err(e) = self.manager.remove(self.guild_id).await {
            debug!("Llamada de guild {} ya eliminada: {}", self.guild_id, e);
        }
        info!("👋 Desconectado del canal de voz en guild {}", self.guild_id);
    }
}

/// Traduce los eventos del driver de songbird a [`ConnectionState`]
struct DriverStateForwarder {
    guild_id: GuildId,
    state: Arc<watch::Sender<ConnectionState>>,
}

#[async_trait]
impl VoiceEventHandler for DriverStateForwarder {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if self.state.borrow().is_destroyed() {
            return None;
        }

        match ctx {
            EventContext::DriverConnect(_) | EventContext::DriverReconnect(_) => {
                debug!("Driver de voz listo en guild {}", self.guild_id);
                self.state.send_replace(ConnectionState::Ready);
            }
            EventContext::DriverDisconnect(data) => {
                let reason = map_disconnect_reason(data.reason);
                warn!("⚠️ Voz desconectada en guild {}: {}", self.guild_id, reason);
                self.state.send_replace(ConnectionState::Disconnected(reason));
            }
            _ => {}
        }

        None
    }
}

fn map_disconnect_reason(reason: Option<DriverDisconnectReason>) -> DisconnectReason {
    match reason {
        Some(DriverDisconnectReason::WsClosed(Some(code))) => DisconnectReason::WebSocketClose {
            code: close_code_number(code),
        },
        Some(DriverDisconnectReason::WsClosed(None)) => {
            DisconnectReason::Network("websocket cerrado sin código".to_string())
        }
        Some(DriverDisconnectReason::TimedOut) => DisconnectReason::TimedOut,
        Some(DriverDisconnectReason::Io) => DisconnectReason::Network("io".to_string()),
        Some(other) => DisconnectReason::Other(format!("{:?}", other)),
        None => DisconnectReason::Other("desconocido".to_string()),
    }
}

fn close_code_number(code: CloseCode) -> u16 {
    match code {
        CloseCode::Disconnected => KICK_CLOSE_CODE,
        CloseCode::SessionInvalid => 4006,
        CloseCode::SessionTimeout => 4009,
        CloseCode::ServerNotFound => 4011,
        CloseCode::VoiceServerCrash => 4015,
        _ => 4000,
    }
}
