use anyhow::{Context, Result};
use std::{path::PathBuf, str::FromStr, time::Duration};

use crate::storage::VoiceSettings;

#[derive(Debug, Clone)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Paths
    pub data_dir: PathBuf,
    pub emoji_file: Option<PathBuf>,

    // Valores por defecto de cada guild
    pub default_shuffle: bool,
    pub default_max_songs: usize,
    pub default_disconnect_timeout: Duration,
    pub default_max_duration: Duration,

    // Límites para /settings
    pub max_songs: usize,
    pub max_disconnect_timeout: Duration,

    // yt-dlp
    pub search_limit: usize,
    pub max_playlist_size: usize,
    // songbird necesita el ejecutable como &'static str
    pub ytdlp_path: &'static str,
    pub ytdlp_cookies: Option<PathBuf>,
    pub ytdlp_user_agent: Option<String>,

    // Comportamiento
    pub leave_on_final_remove: bool,
    pub leave_on_skip_all: bool,
    pub widen_duration_filter: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN").context("Falta DISCORD_TOKEN")?,
            application_id: std::env::var("APPLICATION_ID")
                .context("Falta APPLICATION_ID")?
                .parse()
                .context("APPLICATION_ID inválido")?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            // Paths
            data_dir: std::env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            emoji_file: optional_var("EMOJI_FILE").map(PathBuf::from),

            default_shuffle: env_or("DEFAULT_SHUFFLE", defaults.default_shuffle)?,
            default_max_songs: env_or("DEFAULT_MAX_SONGS", defaults.default_max_songs)?,
            default_disconnect_timeout: env_duration(
                "DEFAULT_DISCONNECT_TIMEOUT",
                defaults.default_disconnect_timeout,
            )?,
            default_max_duration: env_duration("DEFAULT_MAX_DURATION", defaults.default_max_duration)?,

            max_songs: env_or("MAX_SONGS", defaults.max_songs)?,
            max_disconnect_timeout: env_duration("MAX_DISCONNECT_TIMEOUT", defaults.max_disconnect_timeout)?,

            search_limit: env_or("SEARCH_LIMIT", defaults.search_limit)?,
            max_playlist_size: env_or("MAX_PLAYLIST_SIZE", defaults.max_playlist_size)?,
            ytdlp_path: optional_var("YTDLP_PATH").map_or(defaults.ytdlp_path, leak_program),
            ytdlp_cookies: optional_var("YTDLP_COOKIES").map(PathBuf::from),
            ytdlp_user_agent: optional_var("YTDLP_USER_AGENT"),

            leave_on_final_remove: env_or("LEAVE_ON_FINAL_REMOVE", defaults.leave_on_final_remove)?,
            leave_on_skip_all: env_or("LEAVE_ON_SKIP_ALL", defaults.leave_on_skip_all)?,
            widen_duration_filter: env_or("WIDEN_DURATION_FILTER", defaults.widen_duration_filter)?,
        };

        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("No se pudo crear {}", config.data_dir.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// The per-guild defaults must fit inside the ceilings that `/settings`
    /// enforces, otherwise a fresh guild would start with settings it could
    /// never set again.
    pub fn validate(&self) -> Result<()> {
        if self.max_songs == 0 {
            anyhow::bail!("MAX_SONGS must be greater than 0");
        }

        if self.default_max_songs == 0 || self.default_max_songs > self.max_songs {
            anyhow::bail!(
                "DEFAULT_MAX_SONGS must be between 1 and {}, got: {}",
                self.max_songs,
                self.default_max_songs
            );
        }

        if self.default_disconnect_timeout > self.max_disconnect_timeout {
            anyhow::bail!(
                "DEFAULT_DISCONNECT_TIMEOUT cannot exceed {}",
                humantime::format_duration(self.max_disconnect_timeout)
            );
        }

        if self.default_max_duration.is_zero() {
            anyhow::bail!("DEFAULT_MAX_DURATION must be greater than 0");
        }

        if self.search_limit == 0 || self.max_playlist_size == 0 {
            anyhow::bail!("SEARCH_LIMIT and MAX_PLAYLIST_SIZE must be greater than 0");
        }

        if self.ytdlp_path.trim().is_empty() {
            anyhow::bail!("YTDLP_PATH cannot be empty");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Tokens and cookie paths are left out.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Defaults: shuffle={}, {} songs, {} idle, {} max duration\n  \
            Limits: {} songs, {} idle\n  \
            yt-dlp: {} (search {}, playlist {}, cookies={})\n  \
            Behaviour: leave_on_final_remove={}, leave_on_skip_all={}, widen_duration_filter={}",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.default_shuffle,
            self.default_max_songs,
            humantime::format_duration(self.default_disconnect_timeout),
            humantime::format_duration(self.default_max_duration),
            self.max_songs,
            humantime::format_duration(self.max_disconnect_timeout),
            self.ytdlp_path,
            self.search_limit,
            self.max_playlist_size,
            self.ytdlp_cookies.is_some(),
            self.leave_on_final_remove,
            self.leave_on_skip_all,
            self.widen_duration_filter,
        )
    }

    /// Configuración por defecto para guilds sin settings guardados
    pub fn default_voice_settings(&self) -> VoiceSettings {
        VoiceSettings {
            shuffle: self.default_shuffle,
            max_songs: self.default_max_songs,
            disconnect_timeout: self.default_disconnect_timeout.as_secs(),
            max_duration: self.default_max_duration.as_secs(),
        }
    }

    /// Se construye una sola vez y se comparte entre el resolver y los pipelines
    pub fn extractor(&self) -> ExtractorConfig {
        ExtractorConfig {
            program: self.ytdlp_path,
            cookies: self.ytdlp_cookies.clone(),
            user_agent: self.ytdlp_user_agent.clone(),
            search_limit: self.search_limit,
            max_playlist_size: self.max_playlist_size,
            widen_duration_filter: self.widen_duration_filter,
        }
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            data_dir: "./data".into(),
            emoji_file: None,

            default_shuffle: true,
            default_max_songs: 150,
            default_disconnect_timeout: Duration::from_secs(180),
            default_max_duration: Duration::from_secs(36001),

            max_songs: 500,
            max_disconnect_timeout: Duration::from_secs(3600),

            search_limit: 5,
            max_playlist_size: 100,
            ytdlp_path: "yt-dlp",
            ytdlp_cookies: None,
            ytdlp_user_agent: None,

            leave_on_final_remove: false,
            leave_on_skip_all: false,
            widen_duration_filter: false,
        }
    }
}

/// Ajustes de yt-dlp compartidos por el resolver y el pipeline de audio
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub program: &'static str,
    pub cookies: Option<PathBuf>,
    pub user_agent: Option<String>,
    pub search_limit: usize,
    pub max_playlist_size: usize,
    pub widen_duration_filter: bool,
}

impl ExtractorConfig {
    /// Argumentos comunes a todas las invocaciones de yt-dlp
    pub fn common_args(&self) -> Vec<String> {
        let mut args = vec!["--no-warnings".to_string()];
        if let Some(cookies) = &self.cookies {
            args.push("--cookies".to_string());
            args.push(cookies.display().to_string());
        }
        if let Some(agent) = &self.user_agent {
            args.push("--user-agent".to_string());
            args.push(agent.clone());
        }
        args
    }

    pub fn stream_args(&self) -> Vec<String> {
        self.common_args()
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Config::default().extractor()
    }
}

/// Se llama una vez por carga de configuración
fn leak_program(path: String) -> &'static str {
    Box::leak(path.into_boxed_str())
}

fn optional_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_var(key) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("Valor inválido para {}: {}", key, value)),
        None => Ok(default),
    }
}

fn env_duration(key: &str, default: Duration) -> Result<Duration> {
    match optional_var(key) {
        Some(value) => parse_duration(&value).with_context(|| format!("Duración inválida para {}", key)),
        None => Ok(default),
    }
}

/// Segundos a secas (`180`) o formato humantime (`3m`)
pub fn parse_duration(value: &str) -> Result<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    Ok(humantime::parse_duration(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());

        let voice = config.default_voice_settings();
        assert!(voice.shuffle);
        assert_eq!(voice.max_songs, 150);
        assert_eq!(voice.disconnect_timeout, 180);
        assert_eq!(voice.max_duration, 36001);
    }

    #[test]
    fn default_above_ceiling_is_rejected() {
        let config = Config {
            default_max_songs: 600,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn durations_accept_seconds_and_humantime() {
        assert_eq!(parse_duration("180").unwrap(), Duration::from_secs(180));
        assert_eq!(parse_duration("3m").unwrap(), Duration::from_secs(180));
        assert_eq!(parse_duration(" 1h 30s ").unwrap(), Duration::from_secs(3630));
        assert!(parse_duration("pronto").is_err());
    }

    #[test]
    fn extractor_args_include_cookies_and_agent() {
        let config = Config {
            ytdlp_cookies: Some("/tmp/cookies.txt".into()),
            ytdlp_user_agent: Some("bot/1.0".into()),
            ..Config::default()
        };
        let extractor = config.extractor();

        assert_eq!(extractor.program, "yt-dlp");
        assert_eq!(
            extractor.common_args(),
            vec!["--no-warnings", "--cookies", "/tmp/cookies.txt", "--user-agent", "bot/1.0"]
        );
    }

    #[test]
    fn extractor_reuses_the_configured_program() {
        let config = Config {
            ytdlp_path: "/opt/yt-dlp/bin/yt-dlp",
            ..Config::default()
        };

        let first = config.extractor();
        let second = config.extractor();
        assert!(std::ptr::eq(first.program, config.ytdlp_path));
        assert!(std::ptr::eq(first.program, second.program));
        assert_eq!(ExtractorConfig::default().program, "yt-dlp");
    }
}
