//! Engine configuration
//!
//! Resolution priority, highest first:
//! 1. Command-line argument
//! 2. Environment variable (handled by clap `env` fallbacks in main)
//! 3. TOML config file
//! 4. Compiled defaults

use crate::error::{Error, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;

/// Engine configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP control-surface port
    pub http_port: u16,

    /// Bind address for the multiplexed audio/event transport
    pub transport_addr: SocketAddr,

    /// Path to the yt-dlp binary
    pub ytdlp_path: String,

    /// Path to the ffmpeg binary
    pub ffmpeg_path: String,

    /// Stream locator deadline in seconds
    pub resolve_timeout_secs: u64,

    /// Size of each read from the pipeline's stdout
    pub chunk_size: usize,

    /// Pacing buffer pre-roll in milliseconds
    pub preroll_ms: u64,

    /// Pacing buffer backlog cap in milliseconds
    pub max_buffer_ms: u64,

    /// Interval between progress events in seconds
    pub progress_interval_secs: u64,

    /// Capacity of the bounded chunk channels
    pub channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 5850,
            transport_addr: SocketAddr::from(([127, 0, 0, 1], 5851)),
            ytdlp_path: "yt-dlp".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            resolve_timeout_secs: 30,
            chunk_size: 4096,
            preroll_ms: 1500,
            max_buffer_ms: 10_000,
            progress_interval_secs: 5,
            channel_capacity: 64,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults for
    /// any key the file omits.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("cannot parse {}: {}", path.display(), e)))
    }

    /// Load from `path` if given, otherwise defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn preroll(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.preroll_ms)
    }

    pub fn max_buffer(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.max_buffer_ms)
    }
}
