use rand::seq::SliceRandom;
use std::path::Path;
use tracing::{info, warn};

const DEFAULT_EMOJI: &str = "★★★";

/// Emojis para el encabezado de "reproduciendo ahora", uno por línea en un .txt
#[derive(Debug, Clone)]
pub struct PlayEmojis {
    emojis: Vec<String>,
}

impl Default for PlayEmojis {
    fn default() -> Self {
        Self {
            emojis: vec![DEFAULT_EMOJI.to_string()],
        }
    }
}

impl PlayEmojis {
    /// Si el archivo no sirve se usan los de por defecto
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        if path.extension().map_or(true, |ext| ext != "txt") || !path.is_file() {
            warn!("⚠️ Archivo de emojis inválido: {}", path.display());
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(data) => {
                let emojis: Vec<String> = data
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string)
                    .collect();

                if emojis.is_empty() {
                    return Self::default();
                }
                info!("😀 Cargados {} emojis desde {}", emojis.len(), path.display());
                Self { emojis }
            }
            Err(e) => {
                warn!("⚠️ No se pudo leer {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn random(&self) -> &str {
        self.emojis
            .choose(&mut rand::thread_rng())
            .map_or(DEFAULT_EMOJI, String::as_str)
    }

    pub fn len(&self) -> usize {
        self.emojis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emojis.is_empty()
    }
}
