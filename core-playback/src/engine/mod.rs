//! # Playback Engine
//!
//! Drives one playback session over the decryption cache: load materializes
//! and probes, play spawns a render task that feeds the audio output, stop
//! unloads and invalidates the plaintext.
//!
//! ```text
//! Idle ──load──▶ Loading ──▶ Ready ──play──▶ Playing ◀──play── Paused
//!                   │                          │  └──pause──────▶ │
//!                   ▼                          ▼                  │
//!              Error(kind)               Stopped (finish/stop) ◀──┘
//! ```
//!
//! Every state change bumps an internal epoch. Tasks started under an older
//! epoch (a superseded load, a cancelled render) discard their results.

mod config;
#[allow(clippy::module_inception)]
mod engine;
mod state;

pub use config::EngineConfig;
pub use engine::PlaybackEngine;
pub use state::{PlaybackPosition, PlaybackSession, PlaybackState};
