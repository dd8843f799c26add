//! # Logging & Tracing Infrastructure
//!
//! Configures `tracing-subscriber` for the core and optionally mirrors every
//! event into the host's [`LoggerSink`].
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_traits::time::{ConsoleLogger, LogLevel};
//! use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
//! use std::sync::Arc;
//!
//! init_logging(
//!     LoggingConfig::default()
//!         .with_format(LogFormat::Compact)
//!         .with_level(LogLevel::Debug)
//!         .with_logger_sink(Arc::new(ConsoleLogger::default())),
//! )?;
//!
//! tracing::info!(content_id = "entry-42", "Playback started");
//! ```
//!
//! ## Secrets
//!
//! Key material never reaches a log call: `SymmetricKey` has a redacted
//! `Debug` and passphrases are skipped by `#[instrument]`. As a second line,
//! fields forwarded to the host sink whose name marks them as secret are
//! replaced with `[REDACTED]` (see [`redact_if_sensitive`]). Plaintext paths
//! should be logged through [`strip_path`].

use crate::error::{Error, Result};

use bridge_traits::time::{LogEntry, LogLevel, LoggerSink};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const REDACTED: &str = "[REDACTED]";

/// Field-name segments that mark a value as secret.
const SENSITIVE_SEGMENTS: &[&str] = &[
    "key",
    "passphrase",
    "pin",
    "password",
    "secret",
    "token",
    "plaintext",
];

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, human-readable
    Pretty,
    /// One JSON object per event
    Json,
    /// Single-line text
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

/// Logging configuration
#[derive(Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Level for this workspace's crates when no `filter` is given.
    pub level: LogLevel,
    /// Full `EnvFilter` directive, e.g. `"core_playback=debug,core_service=trace"`.
    pub filter: Option<String>,
    /// Host logger that receives a copy of every event.
    pub logger_sink: Option<Arc<dyn LoggerSink>>,
    /// Redact secret-looking fields before they reach the host sink.
    pub redact_secrets: bool,
    /// Log span open/close.
    pub span_events: bool,
    pub display_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: LogLevel::Info,
            filter: None,
            logger_sink: None,
            redact_secrets: true,
            span_events: false,
            display_target: true,
        }
    }
}

impl LoggingConfig {
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_logger_sink(mut self, sink: Arc<dyn LoggerSink>) -> Self {
        self.logger_sink = Some(sink);
        self
    }

    pub fn with_secret_redaction(mut self, redact: bool) -> Self {
        self.redact_secrets = redact;
        self
    }

    pub fn with_span_events(mut self, enable: bool) -> Self {
        self.span_events = enable;
        self
    }

    pub fn with_target(mut self, display: bool) -> Self {
        self.display_target = display;
        self
    }
}

impl fmt::Debug for LoggingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingConfig")
            .field("format", &self.format)
            .field("level", &self.level)
            .field("filter", &self.filter)
            .field("logger_sink", &self.logger_sink.as_ref().map(|_| "LoggerSink { ... }"))
            .field("redact_secrets", &self.redact_secrets)
            .finish()
    }
}

/// Install the global subscriber.
///
/// Call once at startup.
///
/// # Errors
///
/// [`Error::Config`] for an invalid filter directive or when a global
/// subscriber is already installed.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = build_filter(&config)?;

    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let pretty = (config.format == LogFormat::Pretty).then(|| {
        tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(config.display_target)
            .with_span_events(span_events.clone())
    });
    let json = (config.format == LogFormat::Json).then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_target(config.display_target)
            .with_span_events(span_events.clone())
    });
    let compact = (config.format == LogFormat::Compact).then(|| {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(config.display_target)
            .with_span_events(span_events.clone())
    });
    let host = config
        .logger_sink
        .clone()
        .map(|sink| HostSinkLayer::new(sink, config.redact_secrets));

    tracing_subscriber::registry()
        .with(filter)
        .with(pretty)
        .with(json)
        .with(compact)
        .with(host)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize logging: {}", e)))
}

fn level_directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Trace => "trace",
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let directive = match &config.filter {
        Some(custom) => custom.clone(),
        None => {
            let level = level_directive(config.level);
            format!(
                "warn,bridge_desktop={level},core_runtime={level},core_playback={level},\
                 core_service={level},symphonia=error"
            )
        }
    };

    EnvFilter::try_new(&directive)
        .map_err(|e| Error::Config(format!("Invalid log filter '{}': {}", directive, e)))
}

/// Mirrors events into a [`LoggerSink`].
struct HostSinkLayer {
    sink: Arc<dyn LoggerSink>,
    redact: bool,
}

impl HostSinkLayer {
    fn new(sink: Arc<dyn LoggerSink>, redact: bool) -> Self {
        Self { sink, redact }
    }

    fn dispatch(&self, entry: LogEntry) {
        let sink = Arc::clone(&self.sink);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = sink.log(entry).await {
                        eprintln!("LoggerSink error: {}", e);
                    }
                });
            }
            Err(_) => {
                if let Err(e) = futures::executor::block_on(sink.log(entry)) {
                    eprintln!("LoggerSink error: {}", e);
                }
            }
        }
    }
}

impl<S> Layer<S> for HostSinkLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = LogLevel::from_tracing(*metadata.level());
        if level < self.sink.min_level() {
            return;
        }

        let mut fields = FieldCollector::default();
        event.record(&mut fields);

        let message = fields
            .message
            .take()
            .unwrap_or_else(|| metadata.name().to_string());
        let mut entry = LogEntry::new(level, metadata.target(), message);

        for (name, value) in fields.values {
            let value = if self.redact {
                redact_if_sensitive(&name, &value)
            } else {
                value
            };
            entry = entry.with_field(name, value);
        }

        if let Some(span) = ctx.event_span(event) {
            entry = entry.with_span_id(format!("{}#{:x}", span.name(), span.id().into_u64()));
        }

        self.dispatch(entry);
    }
}

trait FromTracingLevel {
    fn from_tracing(level: tracing::Level) -> Self;
}

impl FromTracingLevel for LogLevel {
    fn from_tracing(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => LogLevel::Trace,
            tracing::Level::DEBUG => LogLevel::Debug,
            tracing::Level::INFO => LogLevel::Info,
            tracing::Level::WARN => LogLevel::Warn,
            tracing::Level::ERROR => LogLevel::Error,
        }
    }
}

#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    values: HashMap<String, String>,
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.record(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.record(field, format!("{:?}", value));
    }
}

impl FieldCollector {
    fn record(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = Some(value),
            name => {
                self.values.insert(name.to_string(), value);
            }
        }
    }
}

/// Return `[REDACTED]` when `field_name` marks the value as secret.
///
/// A field is secret when any of its `_`/`.`-separated segments is one of
/// `key`, `passphrase`, `pin`, `password`, `secret`, `token` or `plaintext`
/// (case-insensitive). `tag_key_hex` is secret; `content_id` and `scope` are
/// not.
///
/// ```ignore
/// use core_runtime::logging::redact_if_sensitive;
///
/// tracing::debug!(pin = %redact_if_sensitive("pin", pin), "Unlock attempt");
/// ```
pub fn redact_if_sensitive(field_name: &str, value: &str) -> String {
    let lower = field_name.to_ascii_lowercase();
    let secret = lower
        .split(|c| c == '_' || c == '.')
        .any(|segment| SENSITIVE_SEGMENTS.contains(&segment));

    if secret {
        REDACTED.to_string()
    } else {
        value.to_string()
    }
}

/// Last component of `path`, for logging scratch files without revealing
/// the user's directory layout.
pub fn strip_path(path: &str) -> &str {
    path.rsplit(&['/', '\\'][..]).next().unwrap_or(path)
}
