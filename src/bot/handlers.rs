use anyhow::{Context as _, Result};
use serenity::{
    all::{CommandDataOption, CommandDataOptionValue},
    builder::{CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse},
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use std::time::Duration;
use tracing::{info, warn};

use super::{commands, GuildPlayerBot, ShardManagerKey};
use crate::{
    audio::{PlaybackSession, RemoveOutcome, SKIP_CURRENT_REPLY},
    config::Config,
    sources::{classify, QueryError, Song},
    storage::{FilterSettings, VoiceSettings},
    ui::{
        embeds,
        messages::{self, EmojiFilter, GuildEmoji},
    },
};

const FULL_QUEUE_REPLY: &str = "¡La cola del servidor está llena! Salta o quita canciones antes de agregar más.";
const JOIN_VOICE_REPLY: &str = "¡Primero únete al canal de voz!";
const SKIP_ALL_REPLY: &str = "¿¡para qué agregan canciones si las van a saltar todas!?";

/// Maneja comandos slash
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &GuildPlayerBot) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    match command.data.name.as_str() {
        "play" => handle_play(ctx, &command, bot, guild_id).await,
        "settings" => handle_settings(ctx, &command, bot, guild_id).await,
        "ping" => handle_ping(ctx, &command).await,
        "emoji" => handle_emoji(ctx, &command, guild_id).await,
        "user" => handle_user(ctx, &command).await,
        name => {
            let Some(session) = session_for(ctx, &command, bot, guild_id).await? else {
                return Ok(());
            };

            match name {
                "add" => handle_add(ctx, &command, bot, session).await,
                "skip" => handle_skip(ctx, &command, bot, session).await,
                "remove" => handle_remove(ctx, &command, bot, session).await,
                "queue" => handle_queue(ctx, &command, session).await,
                "leave" => handle_leave(ctx, &command, session).await,
                _ => reply(ctx, &command, "❌ Comando no reconocido", true).await,
            }
        }
    }
}

// Handlers específicos para cada comando

async fn handle_play(ctx: &Context, command: &CommandInteraction, bot: &GuildPlayerBot, guild_id: GuildId) -> Result<()> {
    let query = option(&command.data.options, "song")
        .and_then(CommandDataOptionValue::as_str)
        .context("Query no proporcionado")?
        .to_string();

    // Defer la respuesta ya que puede tomar tiempo
    defer(ctx, command).await?;

    let Some(voice_channel) = user_voice_channel(ctx, guild_id, command.user.id) else {
        return follow_up(ctx, command, "¡Únete a un canal de voz!").await;
    };

    let settings = match bot.registry.get(guild_id) {
        Some(session) if session.is_full() => return follow_up(ctx, command, FULL_QUEUE_REPLY).await,
        Some(session) => session.settings(),
        None => bot.storage.voice_settings(guild_id.get()).await?,
    };

    let songs = match bot
        .resolver
        .resolve(&query, settings.shuffle, settings.duration_limit())
        .await
    {
        Ok(songs) => songs,
        Err(e) => return follow_up(ctx, command, e.to_string()).await,
    };

    let connect = || bot.connect(ctx, guild_id, voice_channel, command.channel_id);
    let session = match bot.registry.get_or_try_create(guild_id, settings, connect).await {
        Ok((session, created)) => {
            if created {
                info!("🔊 Nueva sesión en guild {} (canal {})", guild_id, voice_channel);
            }
            session
        }
        Err(e) => {
            warn!("No se pudo crear la sesión en guild {}: {:#}", guild_id, e);
            return follow_up(
                ctx,
                command,
                "No pude entrar al canal de voz en 20 segundos, intenta de nuevo más tarde.",
            )
            .await;
        }
    };

    let added = session.enqueue(songs.clone(), false);
    follow_up(ctx, command, enqueue_reply(&songs, added)).await
}

async fn handle_add(ctx: &Context, command: &CommandInteraction, bot: &GuildPlayerBot, session: PlaybackSession) -> Result<()> {
    if session.is_full() {
        return reply(ctx, command, FULL_QUEUE_REPLY, false).await;
    }

    let query = option(&command.data.options, "song")
        .and_then(CommandDataOptionValue::as_str)
        .context("Query no proporcionado")?
        .to_string();

    // Solo canciones sueltas
    match classify(&query) {
        Err(e) => return reply(ctx, command, e.to_string(), false).await,
        Ok(kind) if kind.is_collection() => {
            return reply(ctx, command, QueryError::UnsupportedCollection.to_string(), false).await
        }
        Ok(_) => {}
    }

    defer(ctx, command).await?;

    let settings = session.settings();
    let song = match bot.resolver.resolve(&query, false, settings.duration_limit()).await {
        Ok(songs) => songs.into_iter().next(),
        Err(e) => return follow_up(ctx, command, e.to_string()).await,
    };
    let Some(song) = song else {
        return follow_up(ctx, command, QueryError::NoResults(query).to_string()).await;
    };

    let title = song.title().to_string();
    if session.enqueue(vec![song], true) == 0 {
        return follow_up(ctx, command, FULL_QUEUE_REPLY).await;
    }
    follow_up(ctx, command, format!("{} es la siguiente en la cola.", title)).await
}

async fn handle_skip(ctx: &Context, command: &CommandInteraction, bot: &GuildPlayerBot, session: PlaybackSession) -> Result<()> {
    let skips = commands::normalize_count(option(&command.data.options, "skips").and_then(CommandDataOptionValue::as_i64));

    if skips > session.queue_len() && bot.config.leave_on_skip_all {
        session.teardown(false).await;
        return reply(ctx, command, SKIP_ALL_REPLY, false).await;
    }

    session.skip(skips).await;
    reply(ctx, command, format!("⏭️ Saltando {} canción(es)", skips), false).await
}

async fn handle_remove(ctx: &Context, command: &CommandInteraction, bot: &GuildPlayerBot, session: PlaybackSession) -> Result<()> {
    let position =
        commands::normalize_count(option(&command.data.options, "position").and_then(CommandDataOptionValue::as_i64));

    if position == 1 && session.queue_len() == 0 && bot.config.leave_on_final_remove {
        session.teardown(false).await;
        return reply(ctx, command, SKIP_CURRENT_REPLY, false).await;
    }

    let content = match session.remove(position).await {
        RemoveOutcome::Removed(song) => format!("❌ Canción #{} eliminada: {}.", position, song.title()),
        other => other.to_string(),
    };
    reply(ctx, command, content, false).await
}

async fn handle_queue(ctx: &Context, command: &CommandInteraction, session: PlaybackSession) -> Result<()> {
    let embed = embeds::create_queue_embed(&session.snapshot());

    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .embed(embed)
                    .ephemeral(true),
            ),
        )
        .await?;

    Ok(())
}

async fn handle_leave(ctx: &Context, command: &CommandInteraction, session: PlaybackSession) -> Result<()> {
    session.teardown(true).await;
    reply(ctx, command, "👋 Desconectado del canal de voz", false).await
}

async fn handle_settings(ctx: &Context, command: &CommandInteraction, bot: &GuildPlayerBot, guild_id: GuildId) -> Result<()> {
    let subcommand = command
        .data
        .options
        .first()
        .context("Falta el subcomando de /settings")?;
    let CommandDataOptionValue::SubCommand(options) = &subcommand.value else {
        anyhow::bail!("Opción inesperada en /settings: {}", subcommand.name);
    };

    defer(ctx, command).await?;

    let mut settings = bot.storage.settings(guild_id.get()).await?;
    let changed = match subcommand.name.as_str() {
        "voice" => {
            let voice = apply_voice_update(settings.voice, &VoiceUpdate::from_options(options), &bot.config);
            let changed = voice != settings.voice;
            settings.voice = voice;
            changed
        }
        "filter" => {
            let filter = FilterSettings {
                uwu: option(options, "uwu")
                    .and_then(CommandDataOptionValue::as_bool)
                    .unwrap_or(settings.filter.uwu),
                nya: option(options, "nya")
                    .and_then(CommandDataOptionValue::as_bool)
                    .unwrap_or(settings.filter.nya),
            };
            let changed = filter != settings.filter;
            settings.filter = filter;
            changed
        }
        _ => false,
    };

    if changed {
        bot.storage.save(settings.clone()).await?;
        if subcommand.name == "voice" {
            if let Some(session) = bot.registry.get(guild_id) {
                session.update_settings(settings.voice);
            }
        }
    }

    let emoji = bot.emojis.random();
    let content = format!(
        "{}  ***Configuración {}:***  {}",
        emoji,
        if changed { "nueva" } else { "actual" },
        emoji
    );

    command
        .edit_response(
            &ctx.http,
            EditInteractionResponse::new()
                .content(content)
                .embed(embeds::create_settings_embed(&settings)),
        )
        .await?;

    Ok(())
}

async fn handle_ping(ctx: &Context, command: &CommandInteraction) -> Result<()> {
    let content = match shard_latency(ctx).await {
        Some(latency) => format!("🏓 Latido del websocket: {}ms.", latency.as_millis()),
        None => "🏓 Latido del websocket: todavía sin medir.".to_string(),
    };
    reply(ctx, command, content, false).await
}

async fn handle_emoji(ctx: &Context, command: &CommandInteraction, guild_id: GuildId) -> Result<()> {
    let filter = EmojiFilter::parse(option(&command.data.options, "flag").and_then(CommandDataOptionValue::as_str));

    let Some((guild_name, emojis)) = guild_emojis(ctx, guild_id) else {
        return reply(ctx, command, "No tengo este servidor en caché, intenta más tarde.", true).await;
    };

    let listing = messages::emoji_listing(&emojis, filter);
    if listing.is_empty() {
        return reply(ctx, command, format!("**{}** no tiene emojis de ese tipo.", guild_name), false).await;
    }

    reply(ctx, command, format!("**Emojis de {}:**", guild_name), false).await?;
    for chunk in listing.listing {
        command.channel_id.say(&ctx.http, chunk).await?;
    }

    if !listing.ids.is_empty() {
        command.channel_id.say(&ctx.http, "**IDs:**").await?;
        for chunk in listing.ids {
            command.channel_id.say(&ctx.http, chunk).await?;
        }
    }

    Ok(())
}

async fn handle_user(ctx: &Context, command: &CommandInteraction) -> Result<()> {
    reply(ctx, command, format!("Este comando lo usó {}.", command.user.name), false).await
}

/// Cambios pedidos en `/settings voice`; lo que no viene se conserva
#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct VoiceUpdate {
    shuffle: Option<bool>,
    max_songs: Option<i64>,
    disconnect_timeout: Option<i64>,
    max_duration: Option<i64>,
}

impl VoiceUpdate {
    fn from_options(options: &[CommandDataOption]) -> Self {
        Self {
            shuffle: option(options, "shuffle").and_then(CommandDataOptionValue::as_bool),
            max_songs: option(options, "max_songs").and_then(CommandDataOptionValue::as_i64),
            disconnect_timeout: option(options, "dc_tolerance").and_then(CommandDataOptionValue::as_i64),
            max_duration: option(options, "max_duration").and_then(CommandDataOptionValue::as_i64),
        }
    }
}

/// Aplica los cambios dentro de los límites de la configuración del bot
fn apply_voice_update(prev: VoiceSettings, update: &VoiceUpdate, config: &Config) -> VoiceSettings {
    let clamp = |value: i64, min: u64, max: u64| value.unsigned_abs().clamp(min, max.max(min));

    VoiceSettings {
        shuffle: update.shuffle.unwrap_or(prev.shuffle),
        max_songs: update.max_songs.map_or(prev.max_songs, |n| {
            let max = u64::try_from(config.max_songs).unwrap_or(u64::MAX);
            usize::try_from(clamp(n, commands::MIN_MAX_SONGS as u64, max)).unwrap_or(config.max_songs)
        }),
        disconnect_timeout: update.disconnect_timeout.map_or(prev.disconnect_timeout, |secs| {
            clamp(
                secs,
                commands::MIN_DISCONNECT_TIMEOUT,
                config.max_disconnect_timeout.as_secs(),
            )
        }),
        max_duration: update
            .max_duration
            .map_or(prev.max_duration, |secs| secs.unsigned_abs().max(1)),
    }
}

fn enqueue_reply(songs: &[Song], added: usize) -> String {
    match (songs.first(), added) {
        (Some(first), 1) => format!("{} se agregó a la cola.", first.title()),
        (Some(first), n) if n > 1 => format!(
            "{}\n + {} canción(es) más se agregaron a la cola.",
            first.title(),
            n - 1
        ),
        _ => FULL_QUEUE_REPLY.to_string(),
    }
}

// Funciones auxiliares

/// Sesión viva del guild, siempre que quien llama esté en el mismo canal
async fn session_for(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &GuildPlayerBot,
    guild_id: GuildId,
) -> Result<Option<PlaybackSession>> {
    let Some(session) = bot.registry.get(guild_id) else {
        let name = guild_id.name(&ctx.cache).unwrap_or_else(|| "este servidor".to_string());
        reply(ctx, command, format!("No hay nada sonando en {}. (?)", name), true).await?;
        return Ok(None);
    };

    let caller = user_voice_channel(ctx, guild_id, command.user.id);
    if caller.is_none() || caller != session.channel_id() {
        reply(ctx, command, JOIN_VOICE_REPLY, true).await?;
        return Ok(None);
    }

    Ok(Some(session))
}

/// Latencia del heartbeat del shard que recibió el comando
async fn shard_latency(ctx: &Context) -> Option<Duration> {
    let manager = ctx.data.read().await.get::<ShardManagerKey>()?.clone();
    let runners = manager.runners.lock().await;
    runners.get(&ctx.shard_id)?.latency
}

/// Nombre del servidor y sus emojis ordenados por nombre
fn guild_emojis(ctx: &Context, guild_id: GuildId) -> Option<(String, Vec<GuildEmoji>)> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;

    let mut emojis: Vec<GuildEmoji> = guild
        .emojis
        .values()
        .map(|emoji| GuildEmoji {
            name: emoji.name.clone(),
            id: emoji.id.get(),
            animated: emoji.animated,
        })
        .collect();
    emojis.sort_by(|a, b| a.name.cmp(&b.name));

    Some((guild.name.clone(), emojis))
}

fn option<'a>(options: &'a [CommandDataOption], name: &str) -> Option<&'a CommandDataOptionValue> {
    options.iter().find(|opt| opt.name == name).map(|opt| &opt.value)
}

fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}

async fn defer(ctx: &Context, command: &CommandInteraction) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;
    Ok(())
}

async fn reply(ctx: &Context, command: &CommandInteraction, content: impl Into<String>, ephemeral: bool) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(content)
                    .ephemeral(ephemeral),
            ),
        )
        .await?;
    Ok(())
}

async fn follow_up(ctx: &Context, command: &CommandInteraction, content: impl Into<String>) -> Result<()> {
    command
        .edit_response(&ctx.http, EditInteractionResponse::new().content(content))
        .await?;
    Ok(())
}
