use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;
use url::Url;

const OEMBED_ENDPOINT: &str = "https://open.spotify.com/oembed";

/// Cliente de Spotify sin credenciales: solo usa el endpoint público de oEmbed.
/// Spotify no entrega audio, así que de un track solo nos quedamos con el
/// título y se busca en YouTube antes de reproducirlo.
pub struct SpotifyClient {
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct OEmbed {
    title: String,
}

impl SpotifyClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    pub async fn track_title(&self, track_url: &str) -> Result<String> {
        let endpoint = Url::parse_with_params(OEMBED_ENDPOINT, &[("url", track_url)])?;
        debug!("🎧 Consultando oEmbed de Spotify: {}", track_url);

        let embed: OEmbed = self
            .http
            .get(endpoint)
            .send()
            .await
            .context("Error al consultar Spotify")?
            .error_for_status()
            .context("Spotify rechazó el link")?
            .json()
            .await
            .context("Respuesta de Spotify inválida")?;

        let title = embed.title.trim();
        if title.is_empty() {
            anyhow::bail!("Spotify no devolvió título para {}", track_url);
        }
        Ok(title.to_string())
    }
}
