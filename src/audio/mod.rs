//! # Audio Module
//!
//! Per-guild playback on top of songbird.
//!
//! ### [`queue`] - Song Queue
//! - Bounded per-guild queue, taken from the back
//! - Shuffle and clear
//!
//! ### [`player`] - Audio Player
//! - Resolves the stream URL of the next song just before playing it
//! - Advances the queue when a track ends
//! - Pause, resume, skip and stop

pub mod player;
pub mod queue;
