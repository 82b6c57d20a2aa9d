//! Error types for weir-engine
//!
//! Module-wide error enum using thiserror. Locator and pipeline failures
//! during session start surface on the control plane; mid-stream pipeline
//! failures surface as data-plane `error` events instead (the start call
//! already returned success). Buffer overruns/underruns are advisory and
//! never appear here.

use thiserror::Error;

/// Main error type for weir-engine
#[derive(Error, Debug)]
pub enum Error {
    /// No registered source adapter claims the URL
    #[error("unsupported source: {0}")]
    UnsupportedSource(String),

    /// Source resolution tool failed or returned an empty result
    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    /// Source resolution exceeded its deadline
    #[error("extraction timed out after {0}s")]
    ExtractionTimeout(u64),

    /// The decode/encode process could not be spawned
    #[error("process start failed: {0}")]
    ProcessStartFailed(String),

    /// The decode/encode process exited with a non-zero status
    #[error("process exited non-zero: {0}")]
    ProcessExitedNonZero(String),

    /// The decode/encode process died before producing any output
    #[error("no output produced: {0}")]
    NoOutputProduced(String),

    /// Control operation on an unknown session identity
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Control operation invalid for the session's current state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Configuration loading errors
    #[error("configuration error: {0}")]
    Config(String),

    /// HTTP server errors
    #[error("http server error: {0}")]
    Http(String),

    /// Transport channel errors
    #[error("transport error: {0}")]
    Transport(String),

    /// File/socket I/O errors
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using weir-engine Error
pub type Result<T> = std::result::Result<T, Error>;
