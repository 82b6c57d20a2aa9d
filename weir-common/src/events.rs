//! Status events emitted by the audio session engine.
//!
//! Events are broadcast on an [`EventBus`] inside the engine and forwarded to
//! external consumers as newline-delimited JSON records on the transport's
//! event plane (see [`crate::protocol`]).

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Engine status events
///
/// One record per meaningful session transition, tagged with the session
/// identity. Exactly one terminal event (`finished` or `error`) is emitted
/// per session lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EngineEvent {
    /// First audio chunk released; the consumer may begin playback
    Ready {
        session_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Periodic playback progress (cumulative)
    Progress {
        session_id: String,
        /// Total bytes delivered to the transport so far
        bytes: u64,
        /// Elapsed playback time in seconds
        playback_secs: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Stream completed naturally
    Finished {
        session_id: String,
        bytes: u64,
        playback_secs: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Stream ended abnormally mid-flight
    Error {
        session_id: String,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl EngineEvent {
    pub fn ready(session_id: impl Into<String>) -> Self {
        Self::Ready {
            session_id: session_id.into(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn progress(session_id: impl Into<String>, bytes: u64, playback_secs: u64) -> Self {
        Self::Progress {
            session_id: session_id.into(),
            bytes,
            playback_secs,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn finished(session_id: impl Into<String>, bytes: u64, playback_secs: u64) -> Self {
        Self::Finished {
            session_id: session_id.into(),
            bytes,
            playback_secs,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn error(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            session_id: session_id.into(),
            message: message.into(),
            timestamp: chrono::Utc::now(),
        }
    }

    /// Identity of the session this event belongs to
    pub fn session_id(&self) -> &str {
        match self {
            Self::Ready { session_id, .. }
            | Self::Progress { session_id, .. }
            | Self::Finished { session_id, .. }
            | Self::Error { session_id, .. } => session_id,
        }
    }

    /// Wire-level type tag
    pub fn type_str(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::Progress { .. } => "progress",
            Self::Finished { .. } => "finished",
            Self::Error { .. } => "error",
        }
    }

    /// True for `finished` and `error`
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished { .. } | Self::Error { .. })
    }
}

/// One-to-many event broadcaster
///
/// Thin wrapper over `tokio::sync::broadcast`; the engine emits, the
/// transport's event plane and any in-process observers subscribe.
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event; errors if no subscriber is listening.
    pub fn emit(&self, event: EngineEvent) -> Result<usize, broadcast::error::SendError<EngineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the no-subscribers case.
    pub fn emit_lossy(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

// ========================================
// Tests
// ========================================
