//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the journal audio core:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus for vault, cache and playback notifications
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that other modules depend on.
//! It establishes the logging conventions, configuration validation and event
//! broadcasting used throughout the system.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
