//! ffmpeg-backed pipeline
//!
//! One ffmpeg child per started pipeline. Its stdout is read incrementally
//! into fixed-size buffers and forwarded as chunks; stderr is drained on its
//! own task into the log so diagnostics can never block the audio path.
//!
//! Pause is process suspension (SIGSTOP), not a codec operation: the child
//! keeps its handles and decode position, so resume costs nothing. On
//! platforms without process-suspend primitives the pipeline falls back to
//! buffer-stop: the pump stops pulling, the bounded channels fill, and the
//! child blocks on its stdout pipe.

use super::{AudioPipeline, PipelineFactory};
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use weir_common::OutputProfile;

/// Gate control shared with the pump task: (sequence, paused)
type GateState = (u64, bool);

pub struct FfmpegPipeline {
    binary: String,
    profile: OutputProfile,
    chunk_size: usize,
    channel_capacity: usize,

    cancel: CancellationToken,
    child: Option<Child>,
    output: Option<mpsc::Receiver<Bytes>>,
    bytes_read: Arc<AtomicU64>,

    gate_tx: Option<watch::Sender<GateState>>,
    gate_ack: Option<watch::Receiver<u64>>,
    gate_seq: u64,
}

impl FfmpegPipeline {
    pub fn new(binary: String, profile: OutputProfile, chunk_size: usize, channel_capacity: usize) -> Self {
        Self {
            binary,
            profile,
            chunk_size,
            channel_capacity,
            cancel: CancellationToken::new(),
            child: None,
            output: None,
            bytes_read: Arc::new(AtomicU64::new(0)),
            gate_tx: None,
            gate_ack: None,
            gate_seq: 0,
        }
    }

    /// Encoder arguments for the requested output profile.
    fn codec_args(profile: OutputProfile) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        match profile {
            OutputProfile::Pcm => {
                args.extend(["-f".into(), "s16le".into()]);
            }
            OutputProfile::Voice => {
                args.extend(["-c:a".into(), "libopus".into()]);
            }
            OutputProfile::Hq => {
                args.extend(["-c:a".into(), "libmp3lame".into()]);
            }
        }
        if let Some(bitrate) = profile.bitrate_bps() {
            args.extend(["-b:a".into(), format!("{}k", bitrate / 1000)]);
        }
        if let Some(frame_ms) = profile.frame_duration_ms() {
            args.extend(["-frame_duration".into(), frame_ms.to_string()]);
        }
        args.extend(["-ar".into(), profile.sample_rate().to_string()]);
        args.extend(["-ac".into(), profile.channels().to_string()]);
        match profile {
            OutputProfile::Pcm => {}
            OutputProfile::Voice => args.extend(["-f".into(), "ogg".into()]),
            OutputProfile::Hq => args.extend(["-f".into(), "mp3".into()]),
        }
        args
    }

    fn build_command(&self, url: &str, offset_secs: f64) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-hide_banner")
            .arg("-loglevel").arg("warning")
            .arg("-nostdin");

        // Encoders flagged real-time read the source at native rate; the
        // pacing buffer passes their output straight through.
        if self.profile.realtime_input() {
            cmd.arg("-re");
        }
        if offset_secs > 0.0 {
            cmd.arg("-ss").arg(format!("{:.3}", offset_secs));
        }

        // Resolved URLs are http(s); ride out short upstream stalls.
        cmd.arg("-reconnect").arg("1")
            .arg("-reconnect_streamed").arg("1")
            .arg("-reconnect_delay_max").arg("5");

        cmd.arg("-i").arg(url).arg("-vn");
        cmd.args(Self::codec_args(self.profile));
        cmd.arg("pipe:1");

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Wait until the pump has acknowledged gate sequence `seq`.
    async fn await_gate_ack(&mut self, seq: u64) {
        if let Some(ack) = self.gate_ack.as_mut() {
            // Pump gone (pipeline already finished) is fine; nothing left
            // to drain then.
            let _ = ack.wait_for(|acked| *acked >= seq).await;
        }
    }

    fn set_gate(&mut self, paused: bool) -> u64 {
        self.gate_seq += 1;
        if let Some(tx) = &self.gate_tx {
            let _ = tx.send((self.gate_seq, paused));
        }
        self.gate_seq
    }

    #[cfg(unix)]
    fn signal_child(&self, signal: libc::c_int) -> Result<()> {
        let pid = self
            .child
            .as_ref()
            .and_then(|c| c.id())
            .ok_or_else(|| Error::InvalidState("pipeline has no running process".to_string()))?;
        let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
        if rc != 0 {
            return Err(Error::Internal(format!(
                "kill({}, {}) failed: {}",
                pid,
                signal,
                std::io::Error::last_os_error()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl AudioPipeline for FfmpegPipeline {
    async fn start(&mut self, url: &str, offset_secs: f64) -> Result<()> {
        if self.child.is_some() {
            return Err(Error::InvalidState("pipeline already started".to_string()));
        }

        let mut child = self
            .build_command(url, offset_secs)
            .spawn()
            .map_err(|e| Error::ProcessStartFailed(format!("{}: {}", self.binary, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::ProcessStartFailed("no stdout handle".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::ProcessStartFailed("no stderr handle".to_string()))?;

        info!(pid = child.id(), profile = %self.profile, "ffmpeg started");

        // stderr drain task: diagnostics go to the log, never the audio path.
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "weir_engine::pipeline::ffmpeg::stderr", "{}", line);
            }
        });

        let (pump_tx, pump_rx) = mpsc::channel::<Bytes>(self.channel_capacity);
        let (out_tx, out_rx) = mpsc::channel::<Bytes>(self.channel_capacity);
        let (gate_tx, gate_rx) = watch::channel::<GateState>((0, false));
        let (ack_tx, ack_rx) = watch::channel::<u64>(0);

        // Read task: process stdout -> fixed-size chunks -> pump channel.
        let cancel = self.cancel.clone();
        let bytes_read = Arc::clone(&self.bytes_read);
        let chunk_size = self.chunk_size;
        tokio::spawn(async move {
            let mut stdout = stdout;
            let mut buf = vec![0u8; chunk_size];
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    read = stdout.read(&mut buf) => match read {
                        Ok(0) => break, // end of stream
                        Ok(n) => {
                            bytes_read.fetch_add(n as u64, Ordering::Relaxed);
                            let chunk = Bytes::copy_from_slice(&buf[..n]);
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                sent = pump_tx.send(chunk) => {
                                    if sent.is_err() {
                                        break; // pump gone
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            warn!("pipeline stdout read error: {}", e);
                            break;
                        }
                    }
                }
            }
            // pump_tx drops here; the pump observes end-of-stream.
        });

        // Pump task: enforces the pause gate between reader and consumer.
        // On unix, pausing drains queued chunks (the process is suspended,
        // so they are stale by definition); elsewhere it simply stops
        // pulling so the pipes fill and back-pressure the child.
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut pump_rx = pump_rx;
            let mut gate_rx = gate_rx;
            loop {
                let (_, paused) = *gate_rx.borrow();
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = gate_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let (seq, _) = *gate_rx.borrow_and_update();
                        if cfg!(unix) {
                            // Drain on both edges: entering pause discards
                            // stale audio, leaving pause discards anything
                            // the reader had in flight.
                            while pump_rx.try_recv().is_ok() {}
                        }
                        let _ = ack_tx.send(seq);
                    }
                    maybe = pump_rx.recv(), if !paused => match maybe {
                        Some(chunk) => {
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                sent = out_tx.send(chunk) => {
                                    if sent.is_err() {
                                        break;
                                    }
                                }
                            }
                        }
                        None => break, // reader finished
                    }
                }
            }
            // out_tx drops here; the consumer observes channel close.
        });

        self.child = Some(child);
        self.output = Some(out_rx);
        self.gate_tx = Some(gate_tx);
        self.gate_ack = Some(ack_rx);
        Ok(())
    }

    fn take_output(&mut self) -> Option<mpsc::Receiver<Bytes>> {
        self.output.take()
    }

    async fn pause(&mut self) -> Result<()> {
        #[cfg(unix)]
        self.signal_child(libc::SIGSTOP)?;

        let seq = self.set_gate(true);
        self.await_gate_ack(seq).await;
        debug!("pipeline paused");
        Ok(())
    }

    async fn resume(&mut self) -> Result<()> {
        let seq = self.set_gate(false);
        self.await_gate_ack(seq).await;

        #[cfg(unix)]
        self.signal_child(libc::SIGCONT)?;
        debug!("pipeline resumed");
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();

        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                warn!("pipeline kill failed: {}", e);
            }
            match child.wait().await {
                Ok(status) => info!(%status, "ffmpeg reaped"),
                Err(e) => warn!("ffmpeg wait failed: {}", e),
            }
        }
        Ok(())
    }

    async fn outcome(&mut self) -> Result<()> {
        let mut child = match self.child.take() {
            Some(c) => c,
            None => return Ok(()), // already stopped and reaped
        };

        let status = child.wait().await?;
        let bytes = self.bytes_read.load(Ordering::Relaxed);
        info!(%status, bytes, "ffmpeg finished");

        if bytes == 0 {
            return Err(Error::NoOutputProduced(format!(
                "process exited {} before producing audio",
                status
            )));
        }
        if !status.success() {
            return Err(Error::ProcessExitedNonZero(status.to_string()));
        }
        Ok(())
    }
}

impl Drop for FfmpegPipeline {
    fn drop(&mut self) {
        // kill_on_drop reaps the child; cancelling here unblocks any task
        // still parked on a channel.
        self.cancel.cancel();
    }
}

/// Factory wired with engine configuration
pub struct FfmpegPipelineFactory {
    binary: String,
    chunk_size: usize,
    channel_capacity: usize,
}

impl FfmpegPipelineFactory {
    pub fn new(binary: String, chunk_size: usize, channel_capacity: usize) -> Self {
        Self {
            binary,
            chunk_size,
            channel_capacity,
        }
    }
}

impl PipelineFactory for FfmpegPipelineFactory {
    fn create(&self, profile: OutputProfile) -> Box<dyn AudioPipeline> {
        Box::new(FfmpegPipeline::new(
            self.binary.clone(),
            profile,
            self.chunk_size,
            self.channel_capacity,
        ))
    }
}

// ========================================
// Tests
// ========================================
