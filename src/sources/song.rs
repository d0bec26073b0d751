use serde::Deserialize;
use std::time::Duration;

/// Canal o usuario que publicó la canción
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    pub url: Option<String>,
}

/// Proveedor de metadata del que salió una canción
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SongOrigin {
    DirectLink,
    PlaylistItem,
    SearchResult,
    TitleOnly,
}

impl SongOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            SongOrigin::DirectLink => "link",
            SongOrigin::PlaylistItem => "playlist",
            SongOrigin::SearchResult => "search",
            SongOrigin::TitleOnly => "title",
        }
    }
}

/// Metadata de un elemento reproducible.
///
/// A song without a url only carries a title: it has to be looked up again
/// right before it is handed to the audio pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Song {
    title: String,
    url: Option<String>,
    author: Option<Author>,
    thumbnail: Option<String>,
    duration: Option<Duration>,
    origin: SongOrigin,
}

impl Song {
    pub fn new(title: impl Into<String>, url: Option<String>, origin: SongOrigin) -> Self {
        Self {
            title: title.into(),
            url,
            author: None,
            thumbnail: None,
            duration: None,
            origin,
        }
    }

    // Getters
    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }
    pub fn author(&self) -> Option<&Author> {
        self.author.as_ref()
    }
    pub fn thumbnail(&self) -> Option<&str> {
        self.thumbnail.as_deref()
    }
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }
    pub fn origin(&self) -> SongOrigin {
        self.origin
    }

    /// La canción no tiene referencia reproducible y debe buscarse por título
    pub fn needs_lookup(&self) -> bool {
        self.url.is_none()
    }

    // Setters
    pub fn with_author(mut self, author: Author) -> Self {
        self.author = Some(author);
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: String) -> Self {
        self.thumbnail = Some(thumbnail);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Completa la canción con la metadata que devuelve el stream ya abierto
    pub fn with_stream_metadata(
        mut self,
        title: Option<String>,
        channel: Option<String>,
        thumbnail: Option<String>,
        duration: Option<Duration>,
    ) -> Self {
        if let Some(title) = title.filter(|t| !t.trim().is_empty()) {
            self.title = title;
        }
        if let Some(channel) = channel {
            let author = self.author.take().map_or_else(
                || Author { name: channel.clone(), url: None },
                |a| Author { name: channel.clone(), ..a },
            );
            self.author = Some(author);
        }
        if thumbnail.is_some() {
            self.thumbnail = thumbnail;
        }
        if duration.is_some() {
            self.duration = duration;
        }
        self
    }
}

/// Información que devuelve `yt-dlp --dump-json`, tanto de videos como de
/// entradas de playlist o búsqueda (`--flat-playlist`)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoInfo {
    pub id: Option<String>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub webpage_url: Option<String>,
    pub duration: Option<f64>,
    pub uploader: Option<String>,
    pub uploader_url: Option<String>,
    pub channel: Option<String>,
    pub channel_url: Option<String>,
    pub thumbnail: Option<String>,
    pub thumbnails: Option<Vec<Thumbnail>>,
    pub ie_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Thumbnail {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl VideoInfo {
    /// Referencia reproducible: la página del video si yt-dlp la da, si no la url plana o el id
    fn reference(&self) -> Option<String> {
        if let Some(page) = self.webpage_url.as_ref().filter(|u| u.starts_with("http")) {
            return Some(page.clone());
        }
        if let Some(url) = self.url.as_ref().filter(|u| u.starts_with("http")) {
            return Some(url.clone());
        }
        self.id
            .as_ref()
            .filter(|id| !id.is_empty())
            .map(|id| format!("https://www.youtube.com/watch?v={}", id))
    }

    fn author(&self) -> Option<Author> {
        let name = self.channel.clone().or_else(|| self.uploader.clone())?;
        Some(Author {
            name,
            url: self.channel_url.clone().or_else(|| self.uploader_url.clone()),
        })
    }

    fn best_thumbnail(&self) -> Option<String> {
        if let Some(thumbnail) = &self.thumbnail {
            return Some(thumbnail.clone());
        }
        self.thumbnails
            .as_ref()?
            .iter()
            .max_by_key(|t| u64::from(t.width.unwrap_or(0)) * u64::from(t.height.unwrap_or(0)))
            .map(|t| t.url.clone())
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
            .filter(|d| d.is_finite() && *d >= 0.0)
            .map(Duration::from_secs_f64)
    }
}

/// Metadata cruda de cada proveedor antes de normalizarla a [`Song`]
#[derive(Debug, Clone)]
pub enum SongSeed {
    DirectLink(VideoInfo),
    PlaylistItem(VideoInfo),
    SearchResult(VideoInfo),
    TitleOnly(String),
}

impl From<SongSeed> for Song {
    fn from(seed: SongSeed) -> Self {
        let (info, origin) = match seed {
            SongSeed::TitleOnly(title) => return Song::new(title, None, SongOrigin::TitleOnly),
            SongSeed::DirectLink(info) => (info, SongOrigin::DirectLink),
            SongSeed::PlaylistItem(info) => (info, SongOrigin::PlaylistItem),
            SongSeed::SearchResult(info) => (info, SongOrigin::SearchResult),
        };

        let title = info
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "Desconocido".to_string());

        let mut song = Song::new(title, info.reference(), origin);
        if let Some(author) = info.author() {
            song = song.with_author(author);
        }
        if let Some(thumbnail) = info.best_thumbnail() {
            song = song.with_thumbnail(thumbnail);
        }
        if let Some(duration) = info.duration() {
            song = song.with_duration(duration);
        }
        song
    }
}
