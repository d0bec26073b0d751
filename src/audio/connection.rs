//! Connection health state machine: decides what to do with every voice link
//! state the transport reports. Timers are run by the session; this type only
//! keeps the rejoin counter.

use std::{fmt, time::Duration};

/// Código de cierre del websocket de voz: movido de canal o expulsado
pub const KICK_CLOSE_CODE: u16 = 4014;
/// Tiempo para distinguir un cambio de canal de una expulsión
pub const MOVE_GRACE: Duration = Duration::from_secs(5);
/// Tiempo máximo atascado en señalización antes de rendirse
pub const READY_TIMEOUT: Duration = Duration::from_secs(20);
pub const MAX_REJOIN_ATTEMPTS: u32 = 5;
const REJOIN_BACKOFF_STEP: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    WebSocketClose { code: u16 },
    TimedOut,
    Network(String),
    Other(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::WebSocketClose { code } => write!(f, "websocket cerrado ({})", code),
            DisconnectReason::TimedOut => f.write_str("timeout"),
            DisconnectReason::Network(e) => write!(f, "red: {}", e),
            DisconnectReason::Other(e) => f.write_str(e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Signalling,
    Ready,
    Disconnected(DisconnectReason),
    Destroyed,
}

impl ConnectionState {
    /// Estados que indican que un 4014 fue un cambio de canal
    pub fn is_recovering(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Ready)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }

    pub fn is_destroyed(&self) -> bool {
        matches!(self, ConnectionState::Destroyed)
    }

    /// El enlace se cayó o fue destruido
    pub fn is_lost(&self) -> bool {
        matches!(self, ConnectionState::Disconnected(_) | ConnectionState::Destroyed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthAction {
    Nothing,
    /// Esperar `grace` a que el enlace vuelva a conectarse; si no, teardown
    AwaitMove { grace: Duration },
    /// Esperar `after` y volver a unirse al canal
    Rejoin { after: Duration, attempt: u32 },
    /// Esperar `timeout` a llegar a `Ready`; si no, teardown
    AwaitReady { timeout: Duration },
    Teardown,
}

#[derive(Debug, Default)]
pub struct ConnectionHealth {
    rejoin_attempts: u32,
}

impl ConnectionHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejoin_attempts(&self) -> u32 {
        self.rejoin_attempts
    }

    pub fn mark_ready(&mut self) {
        self.rejoin_attempts = 0;
    }

    pub fn observe(&mut self, state: &ConnectionState) -> HealthAction {
        match state {
            ConnectionState::Ready => {
                self.mark_ready();
                HealthAction::Nothing
            }
            ConnectionState::Connecting => HealthAction::Nothing,
            ConnectionState::Disconnected(DisconnectReason::WebSocketClose { code })
                if *code == KICK_CLOSE_CODE =>
            {
                HealthAction::AwaitMove { grace: MOVE_GRACE }
            }
            ConnectionState::Disconnected(_) if self.rejoin_attempts < MAX_REJOIN_ATTEMPTS => {
                self.rejoin_attempts += 1;
                HealthAction::Rejoin {
                    after: REJOIN_BACKOFF_STEP * self.rejoin_attempts,
                    attempt: self.rejoin_attempts,
                }
            }
            ConnectionState::Disconnected(_) => HealthAction::Teardown,
            ConnectionState::Signalling => HealthAction::AwaitReady { timeout: READY_TIMEOUT },
            ConnectionState::Destroyed => HealthAction::Teardown,
        }
    }
}
