//! Lifecycle notifications from the key vault, the decryption cache and the
//! playback engine.
//!
//! Every component publishes into one [`EventBus`], a
//! `tokio::sync::broadcast` channel. Hosts either take raw receivers from
//! [`EventBus::subscribe`] or wrap one in an [`EventStream`] to see a single
//! component's events.
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(64);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(CoreEvent::Playback(PlaybackEvent::Playing {
//!     content_id: "entry-1".to_string(),
//!     position_ms: 0,
//! }))
//! .ok();
//!
//! assert_eq!(rx.recv().await.unwrap().description(), "Playback started");
//! # }
//! ```
//!
//! Payloads carry content ids and scope names only. Key material and
//! plaintext paths never appear in an event.
//!
//! A slow subscriber gets `RecvError::Lagged(n)` and keeps receiving newer
//! events. Publishers ignore `SendError`: no subscribers is the normal case.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Per-subscriber backlog before `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Key vault grant/revoke events
    Vault(VaultEvent),
    /// Plaintext cache lifecycle events
    Cache(CacheEvent),
    /// Playback session events
    Playback(PlaybackEvent),
}

impl CoreEvent {
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Vault(e) => e.description(),
            CoreEvent::Cache(e) => e.description(),
            CoreEvent::Playback(e) => e.description(),
        }
    }

    /// Content the event is about, if any.
    pub fn content_id(&self) -> Option<&str> {
        match self {
            CoreEvent::Vault(_) | CoreEvent::Cache(CacheEvent::GarbageCollected { .. }) => None,
            CoreEvent::Cache(CacheEvent::Materialized { content_id, .. })
            | CoreEvent::Cache(CacheEvent::Invalidated { content_id }) => Some(content_id),
            CoreEvent::Playback(PlaybackEvent::Error { content_id, .. }) => content_id.as_deref(),
            CoreEvent::Playback(
                PlaybackEvent::Loaded { content_id, .. }
                | PlaybackEvent::Playing { content_id, .. }
                | PlaybackEvent::Paused { content_id, .. }
                | PlaybackEvent::Stopped { content_id }
                | PlaybackEvent::Finished { content_id }
                | PlaybackEvent::PositionChanged { content_id, .. },
            ) => Some(content_id),
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Playback(PlaybackEvent::Error { recoverable, .. }) => {
                if *recoverable {
                    EventSeverity::Warning
                } else {
                    EventSeverity::Error
                }
            }
            CoreEvent::Vault(VaultEvent::Cleared { .. }) => EventSeverity::Info,
            CoreEvent::Playback(PlaybackEvent::Loaded { .. })
            | CoreEvent::Playback(PlaybackEvent::Finished { .. }) => EventSeverity::Info,
            CoreEvent::Cache(CacheEvent::GarbageCollected { files_removed, .. })
                if *files_removed > 0 =>
            {
                EventSeverity::Info
            }
            _ => EventSeverity::Debug,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Events emitted by the key vault. Scopes are rendered as `tag:<id>` or `base`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum VaultEvent {
    /// A key was granted (or re-granted) for a scope.
    Granted { scope: String },
    /// A key was removed from the vault.
    Revoked { scope: String },
    /// Every key was removed (app lock).
    Cleared { scopes_removed: usize },
}

impl VaultEvent {
    fn description(&self) -> &str {
        match self {
            VaultEvent::Granted { .. } => "Key granted",
            VaultEvent::Revoked { .. } => "Key revoked",
            VaultEvent::Cleared { .. } => "Key vault cleared",
        }
    }
}

/// Events emitted by the decryption cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    /// Plaintext is available for a content item.
    Materialized {
        content_id: String,
        /// `true` when an existing entry was reused.
        cache_hit: bool,
    },
    /// Plaintext for a content item was deleted.
    Invalidated { content_id: String },
    /// A garbage collection or sweep pass finished.
    GarbageCollected {
        files_removed: usize,
        entries_pruned: usize,
    },
}

impl CacheEvent {
    fn description(&self) -> &str {
        match self {
            CacheEvent::Materialized { .. } => "Plaintext materialized",
            CacheEvent::Invalidated { .. } => "Plaintext invalidated",
            CacheEvent::GarbageCollected { .. } => "Cache garbage collected",
        }
    }
}

/// Events related to audio playback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum PlaybackEvent {
    /// Content is decoded-ready and the session is `Ready`.
    Loaded {
        content_id: String,
        /// Total duration (milliseconds).
        duration_ms: u64,
    },
    /// Playback started or resumed.
    Playing {
        content_id: String,
        /// Position playback starts from (milliseconds).
        position_ms: u64,
    },
    /// Playback paused.
    Paused {
        content_id: String,
        /// Position when paused (milliseconds).
        position_ms: u64,
    },
    /// Playback stopped by the caller.
    Stopped { content_id: String },
    /// Content played to the end.
    Finished { content_id: String },
    /// Playback position changed (seek or natural progression).
    PositionChanged {
        content_id: String,
        /// New position (milliseconds).
        position_ms: u64,
        /// Content duration (milliseconds).
        duration_ms: u64,
    },
    /// Loading or playback failed.
    Error {
        /// The content ID if available.
        content_id: Option<String>,
        /// Machine-readable failure kind, e.g. `no_key_available`.
        kind: String,
        /// Human-readable error message.
        message: String,
        /// Whether the user can fix this (for example by entering a PIN).
        recoverable: bool,
    },
}

impl PlaybackEvent {
    fn description(&self) -> &str {
        match self {
            PlaybackEvent::Loaded { .. } => "Content loaded",
            PlaybackEvent::Playing { .. } => "Playback started",
            PlaybackEvent::Paused { .. } => "Playback paused",
            PlaybackEvent::Stopped { .. } => "Playback stopped",
            PlaybackEvent::Finished { .. } => "Playback finished",
            PlaybackEvent::PositionChanged { .. } => "Playback position changed",
            PlaybackEvent::Error { .. } => "Playback error",
        }
    }
}

/// Broadcast hub shared by every publisher. Clones publish into the same
/// channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// `capacity` is the backlog a subscriber may fall behind by before it
    /// sees `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to current subscribers, returning how many received it.
    ///
    /// Fails only when nobody is subscribed.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// New receiver for events emitted from now on.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// Receiver that skips events rejected by a predicate.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::default();
/// let playback = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Playback(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Keep only events for which `predicate` is true. Replaces any earlier
    /// filter.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Next accepted event.
    ///
    /// # Errors
    ///
    /// `RecvError::Lagged(n)` after falling behind; `RecvError::Closed`
    /// once every publisher is gone.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Next accepted event already queued, or `None`.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            let event = match self.receiver.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Lagged(n)) => return Some(Err(RecvError::Lagged(n))),
                Err(TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            };
            if self.accepts(&event) {
                return Some(Ok(event));
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded(id: &str) -> CoreEvent {
        CoreEvent::Playback(PlaybackEvent::Loaded {
            content_id: id.to_string(),
            duration_ms: 12_000,
        })
    }

    #[test]
    fn test_emit_without_subscribers_fails_quietly() {
        let bus = EventBus::default();
        assert_eq!(bus.subscriber_count(), 0);
        assert!(bus
            .emit(CoreEvent::Vault(VaultEvent::Revoked {
                scope: "tag:t1".to_string(),
            }))
            .is_err());

        let _rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_content_id_accessor() {
        assert_eq!(loaded("entry-4").content_id(), Some("entry-4"));
        assert_eq!(
            CoreEvent::Cache(CacheEvent::Invalidated {
                content_id: "entry-5".to_string()
            })
            .content_id(),
            Some("entry-5")
        );
        assert_eq!(
            CoreEvent::Vault(VaultEvent::Granted {
                scope: "base".to_string()
            })
            .content_id(),
            None
        );
        assert_eq!(
            CoreEvent::Playback(PlaybackEvent::Error {
                content_id: None,
                kind: "internal".to_string(),
                message: "boom".to_string(),
                recoverable: false,
            })
            .content_id(),
            None
        );
    }

    #[test]
    fn test_clones_share_one_channel() {
        let bus = EventBus::new(8);
        let publisher = bus.clone();
        let mut early = bus.subscribe();

        assert_eq!(publisher.emit(loaded("entry-1")).unwrap(), 1);
        let mut late = bus.subscribe();

        assert_eq!(early.try_recv().unwrap(), loaded("entry-1"));
        assert!(late.try_recv().is_err());
        assert_eq!(format!("{:?}", bus), "EventBus { subscriber_count: 2 }");
    }

    #[tokio::test]
    async fn test_event_stream_with_filter() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| matches!(event, CoreEvent::Playback(_)));

        bus.emit(CoreEvent::Cache(CacheEvent::Invalidated {
            content_id: "entry-1".to_string(),
        }))
        .ok();
        let playback = loaded("entry-2");
        bus.emit(playback.clone()).ok();

        let received = stream.recv().await.unwrap();
        assert_eq!(received, playback);
    }

    #[test]
    fn test_stream_reports_lag_then_recovers() {
        let bus = EventBus::new(2);
        let mut stream = EventStream::new(bus.subscribe());

        for i in 0..5 {
            bus.emit(loaded(&format!("entry-{}", i))).ok();
        }

        assert!(matches!(stream.try_recv(), Some(Err(RecvError::Lagged(3)))));
        assert_eq!(stream.try_recv().unwrap().unwrap(), loaded("entry-3"));
        assert_eq!(stream.try_recv().unwrap().unwrap(), loaded("entry-4"));
        assert!(stream.try_recv().is_none());
    }

    #[test]
    fn test_event_severity() {
        let user_error = CoreEvent::Playback(PlaybackEvent::Error {
            content_id: Some("entry-1".to_string()),
            kind: "no_key_available".to_string(),
            message: "locked".to_string(),
            recoverable: true,
        });
        assert_eq!(user_error.severity(), EventSeverity::Warning);

        let io_error = CoreEvent::Playback(PlaybackEvent::Error {
            content_id: None,
            kind: "io_failure".to_string(),
            message: "disk full".to_string(),
            recoverable: false,
        });
        assert_eq!(io_error.severity(), EventSeverity::Error);

        let gc = CoreEvent::Cache(CacheEvent::GarbageCollected {
            files_removed: 0,
            entries_pruned: 0,
        });
        assert_eq!(gc.severity(), EventSeverity::Debug);

        assert_eq!(loaded("entry-1").severity(), EventSeverity::Info);
    }

    #[test]
    fn test_event_description() {
        let event = CoreEvent::Vault(VaultEvent::Cleared { scopes_removed: 3 });
        assert_eq!(event.description(), "Key vault cleared");
        assert_eq!(loaded("x").description(), "Content loaded");
    }

    #[test]
    fn test_event_serialization() {
        let event = CoreEvent::Cache(CacheEvent::Materialized {
            content_id: "entry-123".to_string(),
            cache_hit: false,
        });

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"Cache\""));
        assert!(json.contains("\"event\":\"Materialized\""));

        let deserialized: CoreEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, event);
    }

    #[test]
    fn test_try_recv_skips_rejected_events() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| event.content_id() == Some("entry-2"));
        assert!(stream.try_recv().is_none());

        bus.emit(loaded("entry-1")).ok();
        bus.emit(CoreEvent::Playback(PlaybackEvent::Finished {
            content_id: "entry-2".to_string(),
        }))
        .ok();
        bus.emit(loaded("entry-3")).ok();

        assert!(matches!(
            stream.try_recv(),
            Some(Ok(CoreEvent::Playback(PlaybackEvent::Finished { .. })))
        ));
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_recv_reports_closed_bus() {
        let bus = EventBus::new(4);
        let mut stream = EventStream::new(bus.subscribe());
        drop(bus);

        assert!(matches!(stream.recv().await, Err(RecvError::Closed)));
    }
}
