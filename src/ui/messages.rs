//! Plain-text replies that may not fit in a single Discord message.

/// Límite de caracteres de un mensaje de Discord
pub const MESSAGE_LIMIT: usize = 2000;

/// Emoji de un servidor, copiado de la caché
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildEmoji {
    pub name: String,
    pub id: u64,
    pub animated: bool,
}

impl GuildEmoji {
    /// Forma `<a:nombre:id>` que Discord muestra como el emoji
    pub fn mention(&self) -> String {
        let prefix = if self.animated { "a" } else { "" };
        format!("<{}:{}:{}>", prefix, self.name, self.id)
    }
}

/// Opción `flag` de `/emoji`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmojiFilter {
    /// Todos, sin la lista de IDs
    Listing,
    /// Todos, con la lista de IDs
    All,
    Animated,
    Static,
}

impl EmojiFilter {
    pub fn parse(flag: Option<&str>) -> Self {
        match flag.map(str::trim) {
            Some("all") => EmojiFilter::All,
            Some("anim") => EmojiFilter::Animated,
            Some("static") => EmojiFilter::Static,
            _ => EmojiFilter::Listing,
        }
    }

    fn keeps(self, emoji: &GuildEmoji) -> bool {
        match self {
            EmojiFilter::Animated => emoji.animated,
            EmojiFilter::Static => !emoji.animated,
            EmojiFilter::Listing | EmojiFilter::All => true,
        }
    }

    fn shows_ids(self) -> bool {
        self != EmojiFilter::Listing
    }
}

/// Respuesta de `/emoji` ya partida en mensajes
#[derive(Debug, Default, PartialEq)]
pub struct EmojiListing {
    pub listing: Vec<String>,
    pub ids: Vec<String>,
}

impl EmojiListing {
    pub fn is_empty(&self) -> bool {
        self.listing.is_empty()
    }
}

pub fn emoji_listing(emojis: &[GuildEmoji], filter: EmojiFilter) -> EmojiListing {
    let kept: Vec<&GuildEmoji> = emojis.iter().filter(|emoji| filter.keeps(emoji)).collect();

    let listing = kept
        .iter()
        .map(|emoji| format!("- {} - {}", emoji.mention(), emoji.name))
        .collect::<Vec<_>>()
        .join("\n");

    let ids = if filter.shows_ids() {
        let mentions = kept.iter().map(|emoji| emoji.mention()).collect::<Vec<_>>().join("\n");
        split_message(&mentions, "```\n", "\n```")
    } else {
        Vec::new()
    };

    EmojiListing {
        listing: split_message(&listing, "", ""),
        ids,
    }
}

/// Parte `text` por líneas en mensajes de hasta [`MESSAGE_LIMIT`] caracteres,
/// cada uno envuelto en `prepend`/`append`
pub fn split_message(text: &str, prepend: &str, append: &str) -> Vec<String> {
    split_with_limit(text, MESSAGE_LIMIT, prepend, append)
}

fn split_with_limit(text: &str, limit: usize, prepend: &str, append: &str) -> Vec<String> {
    let text = text.trim_end_matches('\n');
    if text.is_empty() {
        return Vec::new();
    }

    let room = limit
        .saturating_sub(prepend.chars().count() + append.chars().count())
        .max(1);

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split('\n').flat_map(|line| hard_wrap(line, room)) {
        let line_len = line.chars().count();
        if !current.is_empty() && current_len + 1 + line_len > room {
            chunks.push(format!("{}{}{}", prepend, current, append));
            current.clear();
            current_len = 0;
        }
        if !current.is_empty() {
            current.push('\n');
            current_len += 1;
        }
        current.push_str(&line);
        current_len += line_len;
    }

    if !current.is_empty() {
        chunks.push(format!("{}{}{}", prepend, current, append));
    }
    chunks
}

// Una línea sola más larga que el mensaje se corta a la fuerza
fn hard_wrap(line: &str, room: usize) -> Vec<String> {
    if line.chars().count() <= room {
        return vec![line.to_string()];
    }
    let chars: Vec<char> = line.chars().collect();
    chars.chunks(room).map(|chunk| chunk.iter().collect()).collect()
}
