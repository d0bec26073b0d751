use anyhow::{Context, Result};
use async_process::Command;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::song::VideoInfo;
use crate::config::ExtractorConfig;

/// Cliente para obtener metadata de YouTube vía yt-dlp
pub struct YtDlpClient {
    extractor: Arc<ExtractorConfig>,
    // Limitar procesos concurrentes para evitar rate limiting
    rate_limiter: Semaphore,
}

impl YtDlpClient {
    pub fn new(extractor: Arc<ExtractorConfig>) -> Self {
        Self {
            extractor,
            rate_limiter: Semaphore::new(3),
        }
    }

    /// Obtiene información de un video
    pub async fn video(&self, url: &str) -> Result<VideoInfo> {
        debug!("📊 Obteniendo info de: {}", url);

        let stdout = self.run(&["--no-playlist", "--dump-json", url]).await?;
        let line = stdout
            .lines()
            .find(|l| !l.trim().is_empty())
            .context("yt-dlp no devolvió información")?;

        serde_json::from_str(line).context("Error al parsear respuesta de yt-dlp")
    }

    /// Obtiene las entradas de una playlist sin resolver cada video
    pub async fn playlist(&self, url: &str, max_items: usize) -> Result<Vec<VideoInfo>> {
        info!("📋 Obteniendo playlist: {}", url);

        let max_items = max_items.to_string();
        let stdout = self
            .run(&["--flat-playlist", "--dump-json", "--playlist-end", &max_items, url])
            .await?;

        Ok(parse_entries(&stdout))
    }

    /// Busca videos en YouTube
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<VideoInfo>> {
        info!("🔍 Buscando en YouTube: {}", query);

        let search_query = format!("ytsearch{}:{}", limit.max(1), query);
        let stdout = self
            .run(&["--no-playlist", "--dump-json", "--flat-playlist", &search_query])
            .await?;

        Ok(parse_entries(&stdout))
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let _permit = self.rate_limiter.acquire().await?;

        let output = Command::new(self.extractor.program)
            .args(self.extractor.common_args())
            .args(args)
            .output()
            .await
            .context("Error al ejecutar yt-dlp")?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("yt-dlp error: {}", error.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Verifica que yt-dlp se pueda ejecutar
    pub async fn check(program: &str) -> Result<String> {
        let output = Command::new(program)
            .arg("--version")
            .output()
            .await
            .with_context(|| format!("No se pudo ejecutar {}", program))?;

        if !output.status.success() {
            anyhow::bail!("{} --version falló", program);
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Una entrada JSON por línea; las que no se pueden leer se ignoran
fn parse_entries(stdout: &str) -> Vec<VideoInfo> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<VideoInfo>(line) {
            Ok(info) => Some(info),
            Err(e) => {
                warn!("Entrada de yt-dlp ignorada: {}", e);
                None
            }
        })
        .collect()
}
