//! # Bot Module
//!
//! Discord glue around the playback sessions.
//!
//! [`GuildPlayerBot`] implements Serenity's [`EventHandler`]:
//!
//! - `ready`: registers the slash commands (per guild in development,
//!   global otherwise)
//! - `interaction_create`: dispatches slash commands to [`handlers`], the
//!   music commands plus the `/ping`, `/emoji` and `/user` utilities
//! - `voice_state_update`: feeds channel occupancy into the session's
//!   auto-disconnect timer and the bot's own moves into its transport
//!
//! Sessions are created lazily by `/play`, which joins the caller's voice
//! channel through songbird and wires a [`SongbirdTransport`],
//! [`SongbirdPipeline`] and [`notifier::ChannelNotifier`] into
//! [`SessionParts`].

use anyhow::{Context as _, Result};
use serenity::{
    all::{ActivityData, ChannelId, Context, EventHandler, GuildId, Interaction, Ready, ShardManager, UserId, VoiceState},
    async_trait,
    prelude::TypeMapKey,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod handlers;
pub mod notifier;

use crate::{
    audio::{connection::READY_TIMEOUT, SessionParts, SessionRegistry, SongbirdPipeline, SongbirdTransport},
    config::{Config, ExtractorConfig},
    sources::{QueryResolver, Resolver},
    storage::SettingsStore,
    ui::PlayEmojis,
};
use notifier::ChannelNotifier;

/// Shard manager del cliente, guardado en `Context::data` para `/ping`
pub struct ShardManagerKey;

impl TypeMapKey for ShardManagerKey {
    type Value = Arc<ShardManager>;
}

/// Handler de eventos de Discord para el reproductor
pub struct GuildPlayerBot {
    config: Arc<Config>,
    storage: Arc<dyn SettingsStore>,
    resolver: Arc<dyn Resolver>,
    registry: Arc<SessionRegistry>,
    emojis: Arc<PlayEmojis>,
    extractor: Arc<ExtractorConfig>,
    http: reqwest::Client,
}

impl GuildPlayerBot {
    pub fn new(config: Config, storage: Arc<dyn SettingsStore>, registry: Arc<SessionRegistry>) -> Self {
        let http = reqwest::Client::new();
        let extractor = Arc::new(config.extractor());
        let resolver = Arc::new(QueryResolver::new(extractor.clone(), http.clone()));
        let emojis = Arc::new(PlayEmojis::load(config.emoji_file.as_deref()));

        Self {
            config: Arc::new(config),
            storage,
            resolver,
            registry,
            emojis,
            extractor,
            http,
        }
    }

    /// Registra los comandos slash según la configuración
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");
        info!("🔧 Application ID: {}", self.config.application_id);

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);

                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id, &self.config)
                    .await
                    .context("No se pudieron registrar comandos de guild. Verifica el permiso 'applications.commands'.")?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                commands::register_global_commands(ctx, &self.config)
                    .await
                    .context("No se pudieron registrar comandos globales. Verifica el permiso 'applications.commands'.")?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }

    /// Se une al canal de voz y arma las piezas de una sesión nueva
    async fn connect(
        &self,
        ctx: &Context,
        guild_id: GuildId,
        voice_channel: ChannelId,
        text_channel: ChannelId,
    ) -> Result<SessionParts> {
        let manager = songbird::get(ctx)
            .await
            .context("Songbird no inicializado")?;

        let transport = tokio::time::timeout(
            READY_TIMEOUT,
            SongbirdTransport::join(manager, guild_id, voice_channel),
        )
        .await
        .with_context(|| format!("El canal de voz no estuvo listo en {:?}", READY_TIMEOUT))??;

        let (pipeline, player_events) =
            SongbirdPipeline::new(guild_id, transport.call(), self.http.clone(), self.extractor.clone());

        Ok(SessionParts {
            transport: Arc::new(transport),
            pipeline: Arc::new(pipeline),
            player_events,
            resolver: self.resolver.clone(),
            text: Arc::new(ChannelNotifier::new(ctx.http.clone(), text_channel, self.emojis.clone())),
        })
    }
}

#[async_trait]
impl EventHandler for GuildPlayerBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }

        ctx.set_activity(Some(ActivityData::listening("/play")));
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id else {
            return;
        };
        let Some(session) = self.registry.get(guild_id) else {
            return;
        };

        let bot_id = ctx.cache.current_user().id;
        let previous_channel = old.as_ref().and_then(|state| state.channel_id);

        // Movimientos del propio bot van al transporte
        if new.user_id == bot_id && previous_channel != new.channel_id {
            info!(
                "🔀 Bot movido en guild {}: {:?} -> {:?}",
                guild_id, previous_channel, new.channel_id
            );
            session.observe_channel(new.channel_id);
        }

        let Some(channel_id) = session.channel_id() else {
            return;
        };
        if new.user_id != bot_id && previous_channel != Some(channel_id) && new.channel_id != Some(channel_id) {
            return;
        }

        match count_listeners(&ctx, guild_id, channel_id, bot_id) {
            Some(listeners) => {
                debug!("👥 {} oyentes en el canal {} de guild {}", listeners, channel_id, guild_id);
                session.membership_changed(listeners > 0);
            }
            None => debug!("Guild {} no está en caché", guild_id),
        }
    }
}

/// Usuarios que no son bots en el canal de voz
fn count_listeners(ctx: &Context, guild_id: GuildId, channel_id: ChannelId, bot_id: UserId) -> Option<usize> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;

    let listeners = guild
        .voice_states
        .values()
        .filter(|state| state.channel_id == Some(channel_id) && state.user_id != bot_id)
        .filter(|state| {
            let is_bot = guild
                .members
                .get(&state.user_id)
                .or(state.member.as_ref())
                .is_some_and(|member| member.user.bot);
            !is_bot
        })
        .count();

    Some(listeners)
}
