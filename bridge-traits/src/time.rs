//! Clock and host log forwarding.
//!
//! The cache ages scratch files and the vault stamps grants through a
//! [`Clock`] so tests can move time by hand. Structured log records reach
//! the host through a [`LoggerSink`].

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Wall-clock source.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Seconds since the Unix epoch.
    fn unix_timestamp(&self) -> i64 {
        self.now().timestamp()
    }
}

/// [`Clock`] backed by the OS.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, time: DateTime<Utc>) {
        *self.now.lock() = time;
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Severity, ordered from most to least verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.pad(label)
    }
}

/// One log record as handed to the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub timestamp: DateTime<Utc>,
    /// Emitting module, e.g. `core_playback::cache::manager`.
    pub target: String,
    pub message: String,
    pub fields: HashMap<String, String>,
    /// Innermost span when the record was emitted, as `name#id`.
    pub span_id: Option<String>,
}

impl LogEntry {
    pub fn new(level: LogLevel, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            timestamp: Utc::now(),
            target: target.into(),
            message: message.into(),
            fields: HashMap::new(),
            span_id: None,
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_span_id(mut self, span_id: impl Into<String>) -> Self {
        self.span_id = Some(span_id.into());
        self
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:<5} {}: {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.level,
            self.target,
            self.message
        )?;

        let mut names: Vec<_> = self.fields.keys().collect();
        names.sort();
        for name in names {
            write!(f, " {}={}", name, self.fields[name])?;
        }
        Ok(())
    }
}

/// Receives log records from the core (OSLog, Logcat, a file, the console).
///
/// The core never logs key material or passphrases. Fields whose names mark
/// them as secret are redacted before they get here.
#[async_trait::async_trait]
pub trait LoggerSink: Send + Sync {
    async fn log(&self, entry: LogEntry) -> Result<()>;

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Records below this level are dropped before formatting.
    fn min_level(&self) -> LogLevel {
        LogLevel::Info
    }
}

/// Writes one line per record to stderr.
#[derive(Debug, Clone)]
pub struct ConsoleLogger {
    pub min_level: LogLevel,
}

impl Default for ConsoleLogger {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
        }
    }
}

#[async_trait::async_trait]
impl LoggerSink for ConsoleLogger {
    async fn log(&self, entry: LogEntry) -> Result<()> {
        if entry.level >= self.min_level {
            eprintln!("{}", entry);
        }
        Ok(())
    }

    fn min_level(&self) -> LogLevel {
        self.min_level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        clock.advance(chrono::Duration::seconds(90));

        assert_eq!(clock.now(), start + chrono::Duration::seconds(90));
        assert_eq!(
            clock.unix_timestamp(),
            (start + chrono::Duration::seconds(90)).timestamp()
        );

        clock.set(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn test_levels_are_ordered_by_severity() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Warn < LogLevel::Error);
        assert_eq!(format!("{:<5}|", LogLevel::Info), "INFO |");
    }

    #[test]
    fn test_entry_renders_sorted_fields() {
        let entry = LogEntry::new(LogLevel::Warn, "cache", "Sweep incomplete")
            .with_field("failures", "2")
            .with_field("content_id", "entry-9")
            .with_span_id("sweep#1");

        let line = entry.to_string();
        assert!(line.ends_with("WARN  cache: Sweep incomplete content_id=entry-9 failures=2"));
        assert_eq!(entry.span_id.as_deref(), Some("sweep#1"));
    }

    #[tokio::test]
    async fn test_console_logger_accepts_entries() {
        let logger = ConsoleLogger {
            min_level: LogLevel::Warn,
        };
        assert_eq!(logger.min_level(), LogLevel::Warn);
        logger
            .log(LogEntry::new(LogLevel::Info, "test", "filtered"))
            .await
            .unwrap();
    }
}
