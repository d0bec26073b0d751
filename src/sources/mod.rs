//! Resolver: turns what a user typed into playable [`Song`]s.
//!
//! Queries are classified first (see [`query::classify`]) so malformed or
//! foreign links are rejected without touching the network. YouTube metadata
//! comes from yt-dlp; Spotify tracks only yield a title that the playback
//! session looks up again right before playing it.

pub mod query;
pub mod song;
pub mod spotify;
pub mod youtube;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

use crate::config::ExtractorConfig;
pub use query::{classify, QueryKind};
pub use song::{Author, Song, SongOrigin, SongSeed, VideoInfo};
pub use spotify::SpotifyClient;
pub use youtube::YtDlpClient;

/// Errores que se muestran tal cual al usuario
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("No manejo esa página")]
    UnsupportedHost,
    #[error("El link de YouTube parece defectuoso, prueba con otro.")]
    DefectiveLink,
    #[error("Este comando es para una sola canción. Usa un link /watch de YouTube o /track de Spotify.")]
    UnsupportedCollection,
    #[error("No encontré nada para \"{0}\"")]
    NoResults(String),
    #[error("Ninguna canción dura menos de {}", humantime::format_duration(*.0))]
    TooLong(Duration),
    #[error("yt-dlp me está dando dolores de cabeza, intenta de nuevo en un rato")]
    Extractor(String),
}

impl QueryError {
    fn extractor(error: anyhow::Error) -> Self {
        warn!("❌ Error del extractor: {:#}", error);
        QueryError::Extractor(format!("{:#}", error))
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Convierte una consulta en canciones. Las playlists se expanden y se
    /// barajan si `shuffle` está activo.
    async fn resolve(
        &self,
        query: &str,
        shuffle: bool,
        max_duration: Duration,
    ) -> Result<Vec<Song>, QueryError>;

    /// Busca por título una canción que no trae referencia reproducible
    async fn lookup(&self, title: &str) -> Result<Song, QueryError>;
}

/// Resolver real: yt-dlp para YouTube y oEmbed para Spotify
pub struct QueryResolver {
    extractor: Arc<ExtractorConfig>,
    ytdlp: YtDlpClient,
    spotify: SpotifyClient,
}

impl QueryResolver {
    pub fn new(extractor: Arc<ExtractorConfig>, http: reqwest::Client) -> Self {
        Self {
            ytdlp: YtDlpClient::new(extractor.clone()),
            spotify: SpotifyClient::new(http),
            extractor,
        }
    }

    async fn search(&self, text: &str, limit: usize, max_duration: Duration) -> Result<Song, QueryError> {
        let hits: Vec<Song> = self
            .ytdlp
            .search(text, limit)
            .await
            .map_err(QueryError::extractor)?
            .into_iter()
            .map(|info| Song::from(SongSeed::SearchResult(info)))
            .collect();

        pick_within(hits, max_duration, self.extractor.widen_duration_filter, text)
    }
}

#[async_trait]
impl Resolver for QueryResolver {
    async fn resolve(
        &self,
        query: &str,
        shuffle: bool,
        max_duration: Duration,
    ) -> Result<Vec<Song>, QueryError> {
        info!("🔎 Resolviendo: {}", query.trim());

        match classify(query)? {
            QueryKind::Video(url) => {
                let info = self.ytdlp.video(&url).await.map_err(QueryError::extractor)?;
                keep_within(vec![Song::from(SongSeed::DirectLink(info))], max_duration)
            }
            QueryKind::Playlist(url) => {
                let mut songs: Vec<Song> = self
                    .ytdlp
                    .playlist(&url, self.extractor.max_playlist_size)
                    .await
                    .map_err(QueryError::extractor)?
                    .into_iter()
                    .map(|info| Song::from(SongSeed::PlaylistItem(info)))
                    .collect();

                if songs.is_empty() {
                    return Err(QueryError::NoResults(url));
                }
                if shuffle {
                    songs.shuffle(&mut rand::thread_rng());
                }
                info!("📋 Playlist con {} canciones", songs.len());
                keep_within(songs, max_duration)
            }
            QueryKind::SpotifyTrack(url) => {
                let title = self
                    .spotify
                    .track_title(&url)
                    .await
                    .map_err(QueryError::extractor)?;
                Ok(vec![Song::from(SongSeed::TitleOnly(title))])
            }
            QueryKind::Text(text) => {
                let song = self
                    .search(&text, self.extractor.search_limit, max_duration)
                    .await?;
                Ok(vec![song])
            }
        }
    }

    async fn lookup(&self, title: &str) -> Result<Song, QueryError> {
        self.search(title, 1, Duration::MAX).await
    }
}

/// Descarta las canciones más largas que `max_duration`. Las que no tienen
/// duración conocida se quedan.
pub fn keep_within(songs: Vec<Song>, max_duration: Duration) -> Result<Vec<Song>, QueryError> {
    let kept: Vec<Song> = songs
        .into_iter()
        .filter(|song| song.duration().map_or(true, |d| d <= max_duration))
        .collect();

    if kept.is_empty() {
        return Err(QueryError::TooLong(max_duration));
    }
    Ok(kept)
}

/// Primer resultado de búsqueda que respeta `max_duration`. Con `widen`
/// activo se acepta el primero aunque sea más largo.
pub fn pick_within(
    hits: Vec<Song>,
    max_duration: Duration,
    widen: bool,
    query: &str,
) -> Result<Song, QueryError> {
    let Some(first) = hits.first().cloned() else {
        return Err(QueryError::NoResults(query.to_string()));
    };

    let within = hits
        .into_iter()
        .find(|song| song.duration().map_or(true, |d| d <= max_duration));

    match within {
        Some(song) => Ok(song),
        None if widen => {
            info!("⏱️ Ningún resultado dentro del límite, usando el primero: {}", first.title());
            Ok(first)
        }
        None => Err(QueryError::TooLong(max_duration)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn hit(title: &str, secs: Option<u64>) -> Song {
        let song = Song::new(title, Some(format!("https://youtu.be/{}", title)), SongOrigin::SearchResult);
        match secs {
            Some(secs) => song.with_duration(Duration::from_secs(secs)),
            None => song,
        }
    }

    #[test]
    fn keep_within_drops_long_songs() {
        let songs = vec![hit("a", Some(100)), hit("b", Some(9000)), hit("live", None)];
        let kept = keep_within(songs, Duration::from_secs(600)).unwrap();
        let titles: Vec<_> = kept.iter().map(Song::title).collect();
        assert_eq!(titles, vec!["a", "live"]);
    }

    #[test]
    fn keep_within_reports_when_nothing_fits() {
        let result = keep_within(vec![hit("b", Some(9000))], Duration::from_secs(600));
        assert_eq!(result, Err(QueryError::TooLong(Duration::from_secs(600))));
    }

    #[test]
    fn pick_within_prefers_first_short_hit() {
        let hits = vec![hit("mix", Some(7200)), hit("single", Some(200))];
        let song = pick_within(hits, Duration::from_secs(600), false, "q").unwrap();
        assert_eq!(song.title(), "single");
    }

    #[test]
    fn pick_within_widen_falls_back_to_first_hit() {
        let hits = vec![hit("mix", Some(7200)), hit("mix2", Some(9000))];
        assert_eq!(
            pick_within(hits.clone(), Duration::from_secs(600), false, "q"),
            Err(QueryError::TooLong(Duration::from_secs(600)))
        );
        let song = pick_within(hits, Duration::from_secs(600), true, "q").unwrap();
        assert_eq!(song.title(), "mix");
    }

    #[test]
    fn pick_within_without_hits() {
        assert_eq!(
            pick_within(Vec::new(), Duration::MAX, true, "nada"),
            Err(QueryError::NoResults("nada".into()))
        );
    }

    #[test]
    fn errors_read_as_user_messages() {
        assert_eq!(QueryError::UnsupportedHost.to_string(), "No manejo esa página");
        assert_eq!(
            QueryError::TooLong(Duration::from_secs(180)).to_string(),
            "Ninguna canción dura menos de 3m"
        );
    }
}
