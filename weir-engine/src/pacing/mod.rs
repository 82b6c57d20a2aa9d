//! Pacing buffer
//!
//! Converts the pipeline's bursty, scheduling-dependent chunk stream into a
//! steady delivery cadence a strict real-time consumer can take directly.
//!
//! Chunks accumulate in an ordered queue with a running buffered-duration
//! counter (each chunk's duration estimated from the profile's byte rate, or
//! a fixed interval). The buffer withholds output while **filling**; once
//! buffered duration reaches the pre-roll it switches to **streaming**:
//! release the oldest chunk, arm a timer for that chunk's estimated duration,
//! release the next when it fires. The timer is armed per release rather than
//! run as a fixed-rate ticker, so variable-sized chunks never drift in
//! aggregate.
//!
//! While the timer is armed, input keeps being accepted; if buffered duration
//! exceeds the cap, the oldest chunks are dropped (overrun) until back under.
//! An empty queue with input still open is an underrun: delivery simply
//! pauses until more input arrives — no pre-roll restart, no synthesized
//! silence. Both conditions are advisory, surfaced through [`BufferStats`]
//! and logs only.
//!
//! Profiles whose encoder already reads at native rate are paced at the
//! source; for those the buffer runs in pass-through and forwards
//! immediately instead of stacking a second delay on top.

use bytes::Bytes;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use weir_common::OutputProfile;

/// Pacing configuration for one session
#[derive(Debug, Clone)]
pub struct PacingConfig {
    /// Nominal encoded byte rate used to estimate chunk durations
    pub byte_rate: Option<u32>,

    /// Fixed per-chunk interval when no byte rate applies
    pub fixed_interval: Option<Duration>,

    /// Minimum buffered duration before the first release
    pub preroll: Duration,

    /// Backlog cap; oldest chunks drop beyond this
    pub max_buffered: Duration,

    /// Forward immediately; the source is already real-time paced
    pub passthrough: bool,
}

impl PacingConfig {
    /// Derive pacing for a profile: its byte rate drives estimation, and
    /// real-time-input profiles run in pass-through.
    pub fn for_profile(profile: OutputProfile, preroll: Duration, max_buffered: Duration) -> Self {
        Self {
            byte_rate: Some(profile.byte_rate()),
            fixed_interval: None,
            preroll,
            max_buffered,
            passthrough: profile.realtime_input(),
        }
    }

    /// Estimated playback duration of a chunk of `len` bytes.
    fn chunk_duration(&self, len: usize) -> Duration {
        if let Some(rate) = self.byte_rate {
            if rate > 0 {
                return Duration::from_secs_f64(len as f64 / rate as f64);
            }
        }
        self.fixed_interval.unwrap_or(Duration::from_millis(20))
    }
}

/// Live counters for one pacing buffer, shared via Arc
#[derive(Debug, Default)]
pub struct BufferStats {
    backlog_ms: AtomicU64,
    chunks_emitted: AtomicU64,
    underruns: AtomicU64,
    overruns: AtomicU64,
}

impl BufferStats {
    pub fn snapshot(&self) -> BufferStatsSnapshot {
        BufferStatsSnapshot {
            backlog_ms: self.backlog_ms.load(Ordering::Relaxed),
            chunks_emitted: self.chunks_emitted.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`BufferStats`]
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BufferStatsSnapshot {
    pub backlog_ms: u64,
    pub chunks_emitted: u64,
    pub underruns: u64,
    pub overruns: u64,
}

#[derive(PartialEq)]
enum Phase {
    Filling,
    Streaming,
}

/// Pacing buffer for one session
pub struct PacingBuffer {
    config: PacingConfig,
    stats: Arc<BufferStats>,
}

impl PacingBuffer {
    pub fn new(config: PacingConfig) -> Self {
        Self {
            config,
            stats: Arc::new(BufferStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<BufferStats> {
        Arc::clone(&self.stats)
    }

    /// Spawn the pacing task: consumes `input`, returns the paced output
    /// channel. The output closes when input closes and the queue drains,
    /// or when `cancel` fires.
    pub fn start(&self, cancel: CancellationToken, input: mpsc::Receiver<Bytes>) -> mpsc::Receiver<Bytes> {
        let (out_tx, out_rx) = mpsc::channel(1);
        let config = self.config.clone();
        let stats = Arc::clone(&self.stats);

        if config.passthrough {
            tokio::spawn(run_passthrough(cancel, input, out_tx, stats));
        } else {
            tokio::spawn(run_paced(cancel, input, out_tx, config, stats));
        }
        out_rx
    }
}

async fn run_passthrough(
    cancel: CancellationToken,
    mut input: mpsc::Receiver<Bytes>,
    out_tx: mpsc::Sender<Bytes>,
    stats: Arc<BufferStats>,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            maybe = input.recv() => match maybe {
                Some(chunk) => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        sent = out_tx.send(chunk) => {
                            if sent.is_err() {
                                break;
                            }
                            stats.chunks_emitted.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                None => break,
            }
        }
    }
}

async fn run_paced(
    cancel: CancellationToken,
    mut input: mpsc::Receiver<Bytes>,
    out_tx: mpsc::Sender<Bytes>,
    config: PacingConfig,
    stats: Arc<BufferStats>,
) {
    let mut queue: VecDeque<(Bytes, Duration)> = VecDeque::new();
    let mut buffered = Duration::ZERO;
    let mut phase = Phase::Filling;
    let mut input_open = true;
    let mut in_underrun = false;

    // Enqueue one arrival, enforcing the backlog cap.
    let accept = |chunk: Bytes, queue: &mut VecDeque<(Bytes, Duration)>, buffered: &mut Duration| {
        let dur = config.chunk_duration(chunk.len());
        queue.push_back((chunk, dur));
        *buffered += dur;
        while *buffered > config.max_buffered {
            match queue.pop_front() {
                Some((_, dropped_dur)) => {
                    *buffered = buffered.saturating_sub(dropped_dur);
                    stats.overruns.fetch_add(1, Ordering::Relaxed);
                    warn!("pacing overrun: dropped oldest chunk");
                }
                None => break,
            }
        }
        stats.backlog_ms.store(buffered.as_millis() as u64, Ordering::Relaxed);
    };

    'outer: loop {
        let ready_to_release = phase == Phase::Streaming && !queue.is_empty();

        if ready_to_release {
            let Some((chunk, dur)) = queue.pop_front() else {
                continue;
            };
            buffered = buffered.saturating_sub(dur);
            stats.backlog_ms.store(buffered.as_millis() as u64, Ordering::Relaxed);

            tokio::select! {
                _ = cancel.cancelled() => break 'outer,
                sent = out_tx.send(chunk) => {
                    if sent.is_err() {
                        break 'outer;
                    }
                    stats.chunks_emitted.fetch_add(1, Ordering::Relaxed);
                }
            }

            // Timer armed for this chunk's duration; input keeps flowing
            // into the queue while it runs.
            let release_timer = tokio::time::sleep(dur);
            tokio::pin!(release_timer);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break 'outer,
                    _ = &mut release_timer => break,
                    maybe = input.recv(), if input_open => match maybe {
                        Some(chunk) => {
                            in_underrun = false;
                            accept(chunk, &mut queue, &mut buffered);
                        }
                        None => input_open = false,
                    }
                }
            }
        } else {
            // Queue empty (or still pre-rolling): wait for input.
            if !input_open {
                if queue.is_empty() {
                    break 'outer; // finished
                }
                // Input ended before pre-roll completed: release the tail.
                phase = Phase::Streaming;
                continue;
            }

            if phase == Phase::Streaming && queue.is_empty() && !in_underrun {
                in_underrun = true;
                stats.underruns.fetch_add(1, Ordering::Relaxed);
                debug!("pacing underrun: waiting for input");
            }

            tokio::select! {
                _ = cancel.cancelled() => break 'outer,
                maybe = input.recv() => match maybe {
                    Some(chunk) => {
                        in_underrun = false;
                        accept(chunk, &mut queue, &mut buffered);
                        if phase == Phase::Filling && buffered >= config.preroll {
                            debug!(buffered_ms = buffered.as_millis() as u64, "pre-roll reached");
                            phase = Phase::Streaming;
                        }
                    }
                    None => input_open = false,
                }
            }
        }
    }

    stats.backlog_ms.store(0, Ordering::Relaxed);
    // out_tx drops here: consumers observe channel close.
}

// ========================================
// Tests
// ========================================
