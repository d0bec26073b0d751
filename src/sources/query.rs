use url::Url;

use super::QueryError;

const YOUTUBE_HOSTS: &[&str] = &[
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "youtu.be",
];
const SPOTIFY_HOSTS: &[&str] = &["open.spotify.com", "play.spotify.com"];

/// Lo que el usuario pidió, ya clasificado
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryKind {
    Video(String),
    Playlist(String),
    SpotifyTrack(String),
    Text(String),
}

impl QueryKind {
    pub fn is_collection(&self) -> bool {
        matches!(self, QueryKind::Playlist(_))
    }
}

/// Clasifica una consulta sin tocar la red
pub fn classify(query: &str) -> Result<QueryKind, QueryError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(QueryError::NoResults(String::new()));
    }

    let Some(url) = parse_link(query) else {
        return Ok(QueryKind::Text(query.to_string()));
    };

    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    if YOUTUBE_HOSTS.contains(&host.as_str()) {
        return classify_youtube(&host, url);
    }
    if SPOTIFY_HOSTS.contains(&host.as_str()) {
        return classify_spotify(url);
    }

    Err(QueryError::UnsupportedHost)
}

/// Acepta links con esquema y también hosts conocidos escritos sin él
fn parse_link(query: &str) -> Option<Url> {
    if query.chars().any(char::is_whitespace) {
        return None;
    }

    if query.starts_with("http://") || query.starts_with("https://") {
        return Url::parse(query).ok().filter(|u| u.host_str().is_some());
    }

    let host = query.split('/').next().unwrap_or_default().to_ascii_lowercase();
    if YOUTUBE_HOSTS.contains(&host.as_str()) || SPOTIFY_HOSTS.contains(&host.as_str()) {
        return Url::parse(&format!("https://{}", query)).ok();
    }

    None
}

fn classify_youtube(host: &str, url: Url) -> Result<QueryKind, QueryError> {
    if host == "youtu.be" {
        let id = url.path().trim_matches('/');
        if id.is_empty() || id.contains('/') {
            return Err(QueryError::DefectiveLink);
        }
        return Ok(QueryKind::Video(format!("https://www.youtube.com/watch?v={}", id)));
    }

    let param = |name: &str| {
        url.query_pairs()
            .find(|(key, value)| key == name && !value.is_empty())
            .map(|(_, value)| value.into_owned())
    };

    match url.path() {
        "/watch" => match param("v") {
            Some(id) => Ok(QueryKind::Video(format!("https://www.youtube.com/watch?v={}", id))),
            None => Err(QueryError::DefectiveLink),
        },
        "/playlist" => match param("list") {
            Some(list) => Ok(QueryKind::Playlist(format!(
                "https://www.youtube.com/playlist?list={}",
                list
            ))),
            None => Err(QueryError::DefectiveLink),
        },
        _ => Err(QueryError::DefectiveLink),
    }
}

fn classify_spotify(url: Url) -> Result<QueryKind, QueryError> {
    let mut segments = url.path_segments().into_iter().flatten().filter(|s| !s.is_empty());
    // Los links localizados llevan un prefijo tipo /intl-es/
    let mut kind = segments.next().unwrap_or_default();
    if kind.starts_with("intl-") {
        kind = segments.next().unwrap_or_default();
    }

    match (kind, segments.next()) {
        ("track", Some(_)) => Ok(QueryKind::SpotifyTrack(url.to_string())),
        ("playlist" | "album" | "artist", _) => Err(QueryError::UnsupportedCollection),
        _ => Err(QueryError::DefectiveLink),
    }
}
