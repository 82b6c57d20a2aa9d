//! Decode/encode pipeline
//!
//! The decode/encode step is modeled as a capability rather than a concrete
//! process wrapper: the session manager talks to [`AudioPipeline`] and
//! builds instances through a [`PipelineFactory`], so tests substitute a
//! scripted double without spawning a real subprocess.
//!
//! The production implementation ([`FfmpegPipeline`]) wraps one external
//! ffmpeg process per session.

mod ffmpeg;

pub use ffmpeg::{FfmpegPipeline, FfmpegPipelineFactory};

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use weir_common::OutputProfile;

/// One active decode/encode pipeline
///
/// Lifecycle: `start` exactly once, then `take_output` exactly once; the
/// output channel closes when the stream ends, the process dies, or `stop`
/// cancels the pipeline. After the channel closes, `outcome` classifies the
/// ending: `Ok(())` for a clean end-of-stream, `Err` with
/// `ProcessExitedNonZero` / `NoOutputProduced` otherwise.
#[async_trait]
pub trait AudioPipeline: Send {
    /// Launch the decode/encode process against `url`, seeking
    /// `offset_secs` into the source first.
    async fn start(&mut self, url: &str, offset_secs: f64) -> Result<()>;

    /// Take the chunk output channel. Yields `None` on the second call.
    fn take_output(&mut self) -> Option<mpsc::Receiver<Bytes>>;

    /// Suspend the process and drain chunks already queued on the output
    /// channel, so no stale pre-pause audio survives a resume.
    async fn pause(&mut self) -> Result<()>;

    /// Drain defensively again, then un-suspend the process.
    async fn resume(&mut self) -> Result<()>;

    /// Cancel the pipeline, kill the process, and reap its exit status.
    async fn stop(&mut self) -> Result<()>;

    /// Classify how the pipeline ended once the output channel has closed.
    async fn outcome(&mut self) -> Result<()>;
}

/// Builds pipelines for the session manager
pub trait PipelineFactory: Send + Sync {
    fn create(&self, profile: OutputProfile) -> Box<dyn AudioPipeline>;
}
