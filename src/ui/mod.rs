pub mod embeds;
pub mod emojis;
pub mod messages;

pub use emojis::PlayEmojis;
