//! # Audio Module
//!
//! Per-guild playback sessions for the bot.
//!
//! ## Architecture
//!
//! ### [`session`] - Playback Session
//! - One session per guild, created on the first successful voice join
//! - Owns the queue and both state machines
//! - Single-flight queue advancement (at most one stream opening at a time)
//! - Auto-disconnect countdown when the voice channel empties
//!
//! ### [`queue`] - Song Queue
//! - FIFO with "play next" head insertion
//! - Capacity includes the current song; oversized batches are truncated
//!
//! ### [`playback`] and [`connection`] - State Machines
//! - Pure transition functions, no I/O
//! - `playback`: `Idle -> Buffering -> Playing -> Idle`
//! - `connection`: rejoin/give-up policy for the voice link (4014 grace
//!   window, bounded rejoin backoff, signalling timeout)
//!
//! ### Capabilities
//! - [`transport::VoiceTransport`]: voice link (songbird `Call`)
//! - [`pipeline::AudioPipeline`]: yt-dlp stream played through songbird
//! - [`notify::TextSink`]: text channel messages
//! - [`crate::sources::Resolver`]: query to songs
//!
//! The session only talks to these traits, so the core runs against fakes
//! in tests.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use guild_player::audio::{SessionParts, SessionRegistry};
//! use guild_player::storage::VoiceSettings;
//! use serenity::all::GuildId;
//!
//! # async fn example(connect: impl std::future::Future<Output = anyhow::Result<SessionParts>>) -> anyhow::Result<()> {
//! let registry = SessionRegistry::new();
//! let (session, _created) = registry
//!     .get_or_try_create(GuildId::new(1), VoiceSettings::default(), || connect)
//!     .await?;
//!
//! session.skip(1).await;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod notify;
pub mod pipeline;
pub mod playback;
pub mod queue;
pub mod registry;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{ConnectionHealth, ConnectionState, DisconnectReason, HealthAction};
pub use notify::{MessageHandle, Notice, TextSink};
pub use pipeline::{AudioPipeline, PlayerEvent, SongbirdPipeline, StreamError};
pub use playback::PlaybackState;
pub use queue::{RemoveOutcome, SongQueue, SKIP_CURRENT_REPLY};
pub use registry::SessionRegistry;
pub use session::{PlaybackSession, SessionParts, SessionSnapshot};
pub use transport::{SongbirdTransport, VoiceTransport};
