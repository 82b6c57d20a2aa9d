//! Control-plane request/response bodies
//!
//! Shared with the orchestration collaborator so both sides agree on the
//! HTTP surface.

use serde::{Deserialize, Serialize};

/// POST /session/{id}/play request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayRequest {
    /// Source URL to resolve and stream
    pub url: String,

    /// Output profile name ("pcm", "voice", "hq")
    pub format: String,

    /// Seek into the source before decoding (resume-from-position)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset_secs: Option<f64>,
}

/// Generic control response carrying the session identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub status: String,
    pub session_id: String,
}

/// GET /session/{id}/status response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatusResponse {
    pub session_id: String,
    pub status: String,
    pub bytes_sent: u64,
    pub playback_ms: u64,
}

/// GET /sessions response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionStatusResponse>,
}

/// GET /health response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
}
