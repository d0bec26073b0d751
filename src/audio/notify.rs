use anyhow::Result;
use async_trait::async_trait;
use serenity::all::MessageId;

use crate::sources::Song;

/// Mensaje ya enviado que se puede borrar después
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageHandle(pub MessageId);

/// Avisos que la sesión manda al canal de texto
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    NowPlaying(Song),
    OpenFailed { title: String, error: String },
    StreamFailed { title: String, error: String },
    Farewell,
    Text(String),
}

/// Canal de texto de la sesión. Ambas operaciones son best-effort: quien
/// las llama registra el error y sigue.
#[async_trait]
pub trait TextSink: Send + Sync {
    async fn send(&self, notice: Notice) -> Result<MessageHandle>;

    async fn delete(&self, handle: MessageHandle) -> Result<()>;
}
