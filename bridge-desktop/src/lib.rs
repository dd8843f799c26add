//! # Desktop Bridge Implementations
//!
//! Defaults for macOS, Windows and Linux hosts:
//!
//! - [`TokioFileSystem`]: `FileSystemAccess` over `tokio::fs`
//! - [`PacedAudioOutput`]: a headless `AudioOutput` that consumes samples at
//!   real-time pace, for hosts that render audio elsewhere and for tests
//!   that need realistic timing
//!
//! ```ignore
//! use bridge_desktop::{PacedAudioOutput, TokioFileSystem};
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .scratch_dir("/tmp/journal-scratch")
//!     .content_store(store)
//!     .file_system(Arc::new(TokioFileSystem::new()))
//!     .audio_output(Arc::new(PacedAudioOutput::new()))
//!     .build()?;
//! ```

mod audio_output;
mod filesystem;

pub use audio_output::PacedAudioOutput;
pub use filesystem::TokioFileSystem;
