//! Guild Player: per-guild music playback sessions for a Discord voice bot.
//!
//! - [`audio`]: playback session core (queue, state machines, registry)
//! - [`sources`]: turns user queries into songs
//! - [`bot`]: slash commands and gateway events
//! - [`ui`]: embeds and message formatting

pub mod audio;
pub mod bot;
pub mod config;
pub mod sources;
pub mod storage;
pub mod ui;
