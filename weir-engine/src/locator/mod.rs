//! Stream locator
//!
//! Resolves a caller-supplied source URL to a direct, time-bounded media URL
//! plus metadata. Resolution is polymorphic over registered source adapters;
//! the first adapter that claims a URL performs the extraction. Adding a new
//! source kind means registering a new adapter, never touching callers.
//!
//! Resolution is pure request/response with no engine-side state, so a
//! failed resolve is always safe to retry. Resolved URLs expire upstream;
//! callers must not cache a `StreamInfo` beyond a single playback attempt.

mod direct;
mod ytdlp;

pub use direct::DirectUrlAdapter;
pub use ytdlp::YtDlpAdapter;

use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

/// Resolved stream metadata
///
/// Immutable once produced. The `url` field is the direct media URL the
/// pipeline will read from.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub url: String,
    pub title: String,
    /// Source duration in seconds, when the extractor reports one
    pub duration_secs: Option<f64>,
    pub thumbnail: Option<String>,
    /// Extractor/source format tag (e.g. "youtube", "direct")
    pub source: String,
}

/// One source kind the locator can resolve
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Adapter name, for logs and the `StreamInfo` source tag
    fn name(&self) -> &str;

    /// Whether this adapter claims the URL
    fn can_handle(&self, url: &str) -> bool;

    /// Resolve the URL to a direct media URL plus metadata
    async fn resolve(&self, url: &str) -> Result<StreamInfo>;
}

/// Adapter registry with a bounded resolution deadline
pub struct StreamLocator {
    adapters: Vec<Box<dyn SourceAdapter>>,
    timeout: Duration,
}

impl StreamLocator {
    /// Build a locator with the default adapter set: direct URLs first
    /// (cheap extension match), yt-dlp as the catch-all for everything else
    /// it supports.
    pub fn new(config: &Config) -> Self {
        Self::with_adapters(
            vec![
                Box::new(DirectUrlAdapter::new()),
                Box::new(YtDlpAdapter::new(config.ytdlp_path.clone())),
            ],
            Duration::from_secs(config.resolve_timeout_secs),
        )
    }

    /// Build a locator from an explicit adapter list (tests swap in doubles
    /// here).
    pub fn with_adapters(adapters: Vec<Box<dyn SourceAdapter>>, timeout: Duration) -> Self {
        Self { adapters, timeout }
    }

    /// Resolve `url` through the first claiming adapter.
    pub async fn resolve(&self, url: &str) -> Result<StreamInfo> {
        let adapter = self
            .adapters
            .iter()
            .find(|a| a.can_handle(url))
            .ok_or_else(|| Error::UnsupportedSource(url.to_string()))?;

        debug!(adapter = adapter.name(), url, "resolving source");

        let info = tokio::time::timeout(self.timeout, adapter.resolve(url))
            .await
            .map_err(|_| Error::ExtractionTimeout(self.timeout.as_secs()))??;

        info!(
            adapter = adapter.name(),
            title = %info.title,
            duration = ?info.duration_secs,
            "source resolved"
        );
        Ok(info)
    }
}

// ========================================
// Tests
// ========================================
