use regex::Regex;
use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedAuthor, CreateEmbedFooter, CreateMessage},
};
use std::{sync::LazyLock, time::Duration};

use crate::{
    audio::{Notice, PlaybackState, SessionSnapshot},
    sources::Song,
    storage::GuildSettings,
};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const QUEUE_CYAN: Colour = Colour::from_rgb(41, 209, 234);
    pub const SNOW: Colour = Colour::from_rgb(253, 253, 253);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Guild Player";

/// Títulos más largos que esto se parten en varias líneas
const LONG_TITLE: usize = 37;
/// Líneas de la cola que se muestran, contando la actual
const QUEUE_LINES: usize = 19;

static TITLE_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-|]|\sby\s").expect("regex de separadores válida"));

/// Mensaje de "reproduciendo ahora" con un emoji al azar como encabezado
pub fn now_playing_message(song: &Song, emoji: &str) -> CreateMessage {
    let content = format!("{} **Reproduciendo:** {}", emoji, emoji);

    let mut embed = CreateEmbed::default()
        .color(colors::SNOW)
        .description(match song.url() {
            Some(url) => format!("[`{}`]({})", split_long_title(song.title()), url),
            None => format!("`{}`", split_long_title(song.title())),
        })
        .timestamp(Timestamp::now());

    if let Some(author) = song.author() {
        let mut header = CreateEmbedAuthor::new(&author.name);
        if let Some(url) = &author.url {
            header = header.url(url);
        }
        embed = embed.author(header);
    }

    if let Some(thumbnail) = song.thumbnail() {
        embed = embed.image(thumbnail);
    }

    let duration = song
        .duration()
        .map_or_else(|| "🔴 En vivo".to_string(), format_duration);
    embed = embed.footer(CreateEmbedFooter::new(format!("Duración: {}", duration)));

    CreateMessage::new().content(content).embed(embed)
}

/// Mensaje para cada aviso de la sesión
pub fn notice_message(notice: &Notice, emoji: &str) -> CreateMessage {
    match notice {
        Notice::NowPlaying(song) => now_playing_message(song, emoji),
        Notice::OpenFailed { title, error } => CreateMessage::new().embed(create_error_embed(
            "❌ No se pudo reproducir",
            &format!("**{}**\n`{}`", title, truncate(error, 300)),
        )),
        Notice::StreamFailed { title, error } => CreateMessage::new().embed(create_error_embed(
            "💥 Error mientras sonaba",
            &format!("**{}**\n`{}`", title, truncate(error, 300)),
        )),
        Notice::Farewell => CreateMessage::new().content("Desconectando... 👋"),
        Notice::Text(text) => CreateMessage::new().content(text),
    }
}

/// Lista la canción actual y las siguientes con su posición para `/remove`
pub fn queue_lines(snapshot: &SessionSnapshot) -> Vec<String> {
    let mut lines = Vec::with_capacity(snapshot.queued.len() + 1);

    match &snapshot.current {
        Some(current) => lines.push(format!("**ACTUAL:** {}", current.title())),
        None if snapshot.playback == PlaybackState::Buffering => {
            lines.push("**ACTUAL:** *cargando...*".to_string())
        }
        None => lines.push("**ACTUAL:** *nada*".to_string()),
    }

    lines.extend(
        snapshot
            .queued
            .iter()
            .enumerate()
            .map(|(i, song)| format!("{}.- {}", i + 2, song.title())),
    );

    if lines.len() > QUEUE_LINES {
        let hidden = lines.len() - QUEUE_LINES;
        lines.truncate(QUEUE_LINES);
        lines.push(format!("y {} más...", hidden));
    }
    lines
}

pub fn create_queue_embed(snapshot: &SessionSnapshot) -> CreateEmbed {
    let mut footer = format!(
        "{}/{} canciones",
        snapshot.queued.len() + usize::from(snapshot.current.is_some()),
        snapshot.max_songs
    );
    if !snapshot.total_duration.is_zero() {
        footer.push_str(&format!(" • {}", format_duration(snapshot.total_duration)));
    }

    CreateEmbed::default()
        .title("📋 Cola:")
        .description(queue_lines(snapshot).join("\n"))
        .color(colors::QUEUE_CYAN)
        .footer(CreateEmbedFooter::new(footer))
}

pub fn create_settings_embed(settings: &GuildSettings) -> CreateEmbed {
    let voice = &settings.voice;
    let on_off = |flag: bool| if flag { "✅" } else { "❌" };

    CreateEmbed::default()
        .title("⚙️ Configuración del servidor")
        .color(colors::INFO_BLUE)
        .field("🔀 Aleatorio", on_off(voice.shuffle), true)
        .field("📋 Máx. canciones", voice.max_songs.to_string(), true)
        .field(
            "⏳ Desconexión",
            humantime::format_duration(voice.disconnect_after()).to_string(),
            true,
        )
        .field("⏱️ Duración máx.", format_duration(voice.duration_limit()), true)
        .field("🐱 nya", on_off(settings.filter.nya), true)
        .field("🥺 uwu", on_off(settings.filter.uwu), true)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        .timestamp(Timestamp::now())
}

pub fn create_error_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(title)
        .description(description)
        .color(colors::ERROR_RED)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Parte títulos largos de YouTube en "artista - canción | extra"
pub fn split_long_title(title: &str) -> String {
    if title.chars().count() <= LONG_TITLE {
        return title.to_string();
    }

    TITLE_SEPARATORS
        .split(title)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Formatea una duración como `mm:ss` o `hh:mm:ss`
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut short: String = text.chars().take(max_chars).collect();
    short.push('…');
    short
}
