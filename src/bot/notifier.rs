use anyhow::{Context, Result};
use async_trait::async_trait;
use serenity::{all::ChannelId, http::Http};
use std::sync::Arc;
use tracing::debug;

use crate::{
    audio::{MessageHandle, Notice, TextSink},
    ui::{embeds, PlayEmojis},
};

/// Canal de texto desde el que se creó la sesión
pub struct ChannelNotifier {
    http: Arc<Http>,
    channel_id: ChannelId,
    emojis: Arc<PlayEmojis>,
}

impl ChannelNotifier {
    pub fn new(http: Arc<Http>, channel_id: ChannelId, emojis: Arc<PlayEmojis>) -> Self {
        Self {
            http,
            channel_id,
            emojis,
        }
    }
}

#[async_trait]
impl TextSink for ChannelNotifier {
    async fn send(&self, notice: Notice) -> Result<MessageHandle> {
        let message = embeds::notice_message(&notice, self.emojis.random());
        let sent = self
            .channel_id
            .send_message(self.http.as_ref(), message)
            .await
            .with_context(|| format!("No se pudo enviar mensaje a {}", self.channel_id))?;

        debug!("📨 Mensaje {} enviado a {}", sent.id, self.channel_id);
        Ok(MessageHandle(sent.id))
    }

    async fn delete(&self, handle: MessageHandle) -> Result<()> {
        self.channel_id
            .delete_message(self.http.as_ref(), handle.0)
            .await
            .with_context(|| format!("No se pudo borrar el mensaje {}", handle.0))
    }
}
