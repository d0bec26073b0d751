use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::{fs, sync::Mutex};
use tracing::{info, warn};

/// Ajustes de reproducción de un guild (segundos en los campos de tiempo)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceSettings {
    pub shuffle: bool,
    pub max_songs: usize,
    pub disconnect_timeout: u64,
    pub max_duration: u64,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            shuffle: true,
            max_songs: 150,
            disconnect_timeout: 180,
            max_duration: 36001,
        }
    }
}

impl VoiceSettings {
    pub fn disconnect_after(&self) -> Duration {
        Duration::from_secs(self.disconnect_timeout)
    }

    pub fn duration_limit(&self) -> Duration {
        Duration::from_secs(self.max_duration)
    }
}

/// Filtros de mensajes del canal de texto
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSettings {
    pub nya: bool,
    pub uwu: bool,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self { nya: true, uwu: true }
    }
}

/// Configuración de servidor almacenada en JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuildSettings {
    pub guild_id: u64,
    #[serde(default)]
    pub voice: VoiceSettings,
    #[serde(default)]
    pub filter: FilterSettings,
}

impl GuildSettings {
    pub fn new(guild_id: u64, voice: VoiceSettings) -> Self {
        Self {
            guild_id,
            voice,
            filter: FilterSettings::default(),
        }
    }
}

/// Lectura y escritura de [`GuildSettings`]
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn settings(&self, guild_id: u64) -> Result<GuildSettings>;

    async fn save(&self, settings: GuildSettings) -> Result<()>;

    async fn voice_settings(&self, guild_id: u64) -> Result<VoiceSettings> {
        Ok(self.settings(guild_id).await?.voice)
    }
}

/// Manager de almacenamiento basado en archivos JSON
pub struct JsonStorage {
    data_dir: PathBuf,
    defaults: VoiceSettings,
    guilds_cache: HashMap<u64, GuildSettings>,
}

impl JsonStorage {
    pub async fn new(data_dir: PathBuf, defaults: VoiceSettings) -> Result<Self> {
        let guilds_dir = data_dir.join("guilds");
        fs::create_dir_all(&guilds_dir)
            .await
            .with_context(|| format!("No se pudo crear {}", guilds_dir.display()))?;

        info!("📁 Storage inicializado en: {}", data_dir.display());

        let mut storage = Self {
            data_dir,
            defaults,
            guilds_cache: HashMap::new(),
        };

        // Cargar configuraciones existentes
        storage.load_all_guilds().await?;

        Ok(storage)
    }

    /// Obtiene la configuración de un guild, creando la de por defecto si no existe
    pub async fn get_settings(&mut self, guild_id: u64) -> Result<GuildSettings> {
        if let Some(settings) = self.guilds_cache.get(&guild_id) {
            return Ok(settings.clone());
        }

        match self.load_settings(guild_id).await {
            Ok(settings) => {
                self.guilds_cache.insert(guild_id, settings.clone());
                Ok(settings)
            }
            Err(e) => {
                if self.guild_file_path(guild_id).exists() {
                    warn!("Configuración ilegible para guild {}, se reemplaza: {}", guild_id, e);
                }

                let settings = GuildSettings::new(guild_id, self.defaults);
                self.write_settings(&settings).await?;
                self.guilds_cache.insert(guild_id, settings.clone());

                info!("📝 Configuración por defecto creada para guild {}", guild_id);
                Ok(settings)
            }
        }
    }

    /// Actualiza la configuración de un guild
    pub async fn update_settings(&mut self, settings: GuildSettings) -> Result<()> {
        let guild_id = settings.guild_id;

        self.write_settings(&settings).await?;
        self.guilds_cache.insert(guild_id, settings);

        info!("💾 Configuración actualizada para guild {}", guild_id);
        Ok(())
    }

    pub fn cached_guilds(&self) -> usize {
        self.guilds_cache.len()
    }

    // Métodos privados

    async fn load_settings(&self, guild_id: u64) -> Result<GuildSettings> {
        let file_path = self.guild_file_path(guild_id);
        let content = fs::read_to_string(&file_path).await?;
        let settings: GuildSettings = serde_json::from_str(&content)?;
        Ok(settings)
    }

    async fn write_settings(&self, settings: &GuildSettings) -> Result<()> {
        let file_path = self.guild_file_path(settings.guild_id);
        let content = serde_json::to_string_pretty(settings)?;
        fs::write(&file_path, content)
            .await
            .with_context(|| format!("No se pudo escribir {}", file_path.display()))?;
        Ok(())
    }

    async fn load_all_guilds(&mut self) -> Result<()> {
        let guilds_dir = self.data_dir.join("guilds");
        let mut files = fs::read_dir(&guilds_dir).await?;
        let mut loaded_count = 0;

        while let Some(entry) = files.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }

            let guild_id = path
                .file_stem()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix("guild_"))
                .and_then(|id| id.parse::<u64>().ok());

            if let Some(guild_id) = guild_id {
                match self.load_settings(guild_id).await {
                    Ok(settings) => {
                        self.guilds_cache.insert(guild_id, settings);
                        loaded_count += 1;
                    }
                    Err(e) => {
                        warn!("Error cargando configuración para guild {}: {}", guild_id, e);
                    }
                }
            }
        }

        if loaded_count > 0 {
            info!("📂 Cargadas {} configuraciones de guild", loaded_count);
        }

        Ok(())
    }

    fn guild_file_path(&self, guild_id: u64) -> PathBuf {
        self.data_dir.join("guilds").join(format!("guild_{}.json", guild_id))
    }
}

#[async_trait]
impl SettingsStore for Mutex<JsonStorage> {
    async fn settings(&self, guild_id: u64) -> Result<GuildSettings> {
        self.lock().await.get_settings(guild_id).await
    }

    async fn save(&self, settings: GuildSettings) -> Result<()> {
        self.lock().await.update_settings(settings).await
    }
}
