use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

use crate::config::Config;

/// Valor mínimo aceptado para `max_songs` en `/settings voice`
pub const MIN_MAX_SONGS: usize = 10;
/// Valor mínimo aceptado para `dc_tolerance` en `/settings voice`
pub const MIN_DISCONNECT_TIMEOUT: u64 = 5;

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context, config: &Config) -> Result<()> {
    for command in all_commands(config) {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId, config: &Config) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands(config)).await?;

    Ok(())
}

pub fn all_commands(config: &Config) -> Vec<CreateCommand> {
    vec![
        play_command(),
        add_command(),
        skip_command(),
        remove_command(),
        queue_command(),
        leave_command(),
        settings_command(config),
        ping_command(),
        emoji_command(),
        user_command(),
    ]
}

/// Normaliza cantidades y posiciones: 0 cuenta como 1 y los negativos se
/// toman en valor absoluto
pub fn normalize_count(value: Option<i64>) -> usize {
    match value.map(i64::unsigned_abs) {
        None | Some(0) => 1,
        Some(n) => usize::try_from(n).unwrap_or(usize::MAX),
    }
}

// Comandos de reproducción

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Busca una canción o playlist y la agrega a la cola")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "song", "Búsqueda o URL")
                .required(true),
        )
}

fn add_command() -> CreateCommand {
    CreateCommand::new("add")
        .description("Agrega UNA canción al principio de la cola")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "song", "Búsqueda o URL")
                .required(true),
        )
}

// Comandos de cola

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip")
        .description("Salta canciones de la cola")
        .add_option(CreateCommandOption::new(
            CommandOptionType::Integer,
            "skips",
            "Número de canciones a saltar",
        ))
}

fn remove_command() -> CreateCommand {
    CreateCommand::new("remove")
        .description("Quita una canción de la cola")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::Integer,
                "position",
                "Posición en /queue de la canción a quitar",
            )
            .required(true),
        )
}

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue").description("Muestra la cola de reproducción")
}

// Comandos de conexión

fn leave_command() -> CreateCommand {
    CreateCommand::new("leave").description("Detiene la reproducción y saca al bot del canal de voz")
}

// Configuración

fn settings_command(config: &Config) -> CreateCommand {
    let max_songs = u64::try_from(config.max_songs).unwrap_or(u64::MAX);
    let max_timeout = config.max_disconnect_timeout.as_secs();

    CreateCommand::new("settings")
        .description("Muestra o cambia la configuración del servidor")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::SubCommand,
                "voice",
                "Cambia la configuración de voz",
            )
            .add_sub_option(CreateCommandOption::new(
                CommandOptionType::Boolean,
                "shuffle",
                "Mezclar las playlists al agregarlas",
            ))
            .add_sub_option(
                CreateCommandOption::new(
                    CommandOptionType::Integer,
                    "max_songs",
                    "Máximo de canciones en la cola",
                )
                .min_int_value(MIN_MAX_SONGS as u64)
                .max_int_value(max_songs),
            )
            .add_sub_option(
                CreateCommandOption::new(
                    CommandOptionType::Integer,
                    "dc_tolerance",
                    "Segundos de espera antes de desconectarse solo",
                )
                .min_int_value(MIN_DISCONNECT_TIMEOUT)
                .max_int_value(max_timeout),
            )
            .add_sub_option(
                CreateCommandOption::new(
                    CommandOptionType::Integer,
                    "max_duration",
                    "Duración máxima de cada canción, en segundos",
                )
                .min_int_value(1),
            ),
        )
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::SubCommand,
                "filter",
                "Cambia los filtros de texto",
            )
            .add_sub_option(CreateCommandOption::new(
                CommandOptionType::Boolean,
                "uwu",
                "Filtrar uwu",
            ))
            .add_sub_option(CreateCommandOption::new(
                CommandOptionType::Boolean,
                "nya",
                "Filtrar nya",
            )),
        )
        .add_option(CreateCommandOption::new(
            CommandOptionType::SubCommand,
            "show",
            "Muestra la configuración del servidor",
        ))
}

// Utilidades

fn ping_command() -> CreateCommand {
    CreateCommand::new("ping").description("Muestra el ping del bot")
}

fn emoji_command() -> CreateCommand {
    CreateCommand::new("emoji")
        .description("Lista los emojis del servidor")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "flag", "all/anim/static")
                .add_string_choice("all", "all")
                .add_string_choice("anim", "anim")
                .add_string_choice("static", "static"),
        )
}

fn user_command() -> CreateCommand {
    CreateCommand::new("user").description("Muestra quién usó el comando")
}
