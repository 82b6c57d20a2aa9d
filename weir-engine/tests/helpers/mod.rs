//! Shared test doubles: a scripted pipeline, a synthetic source adapter,
//! and an in-memory audio sink. No subprocess, no network.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use weir_common::{EventBus, OutputProfile};
use weir_engine::config::Config;
use weir_engine::error::{Error, Result};
use weir_engine::locator::{SourceAdapter, StreamInfo, StreamLocator};
use weir_engine::pipeline::{AudioPipeline, PipelineFactory};
use weir_engine::session::SessionManager;
use weir_engine::transport::AudioSink;

/// How a mock pipeline should report its ending
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOutcome {
    Clean,
    ExitNonZero,
    NoOutput,
}

/// Test-side controls for one created pipeline
pub struct MockPipelineHandle {
    /// Inject chunks as the external process would produce them; dropping
    /// this sender ends the stream.
    pub chunk_tx: mpsc::Sender<Bytes>,
    /// Order of lifecycle calls observed ("start", "pause", "resume", "stop")
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl MockPipelineHandle {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

pub struct MockPipeline {
    fail_start: bool,
    outcome: MockOutcome,
    calls: Arc<Mutex<Vec<String>>>,

    chunk_rx: Option<mpsc::Receiver<Bytes>>,
    output: Option<mpsc::Receiver<Bytes>>,
    out_tx: Option<mpsc::Sender<Bytes>>,
    cancel: CancellationToken,
    gate_tx: watch::Sender<(u64, bool)>,
    gate_rx: watch::Receiver<(u64, bool)>,
    ack_tx: watch::Sender<u64>,
    ack_rx: watch::Receiver<u64>,
    gate_seq: u64,
}

impl MockPipeline {
    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }

    async fn flip_gate(&mut self, paused: bool) {
        self.gate_seq += 1;
        let _ = self.gate_tx.send((self.gate_seq, paused));
        let seq = self.gate_seq;
        let _ = self.ack_rx.wait_for(|acked| *acked >= seq).await;
    }
}

#[async_trait]
impl AudioPipeline for MockPipeline {
    async fn start(&mut self, _url: &str, _offset_secs: f64) -> Result<()> {
        self.record("start");
        if self.fail_start {
            return Err(Error::ProcessStartFailed("mock start failure".to_string()));
        }

        let mut chunk_rx = self.chunk_rx.take().expect("start called twice");
        let out_tx = self.out_tx.take().expect("start called twice");
        let cancel = self.cancel.clone();
        let mut gate_rx = self.gate_rx.clone();
        let ack_tx = self.ack_tx.clone();

        // Same gate shape as the real pipeline: forward while flowing,
        // drain queued chunks on every gate flip.
        tokio::spawn(async move {
            loop {
                let (_, paused) = *gate_rx.borrow();
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = gate_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let (seq, _) = *gate_rx.borrow_and_update();
                        while chunk_rx.try_recv().is_ok() {}
                        let _ = ack_tx.send(seq);
                    }
                    maybe = chunk_rx.recv(), if !paused => match maybe {
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
                        None => break,
                    }
                }
            }
        });
        Ok(())
    }

    fn take_output(&mut self) -> Option<mpsc::Receiver<Bytes>> {
        self.output.take()
    }

    async fn pause(&mut self) -> Result<()> {
        self.record("pause");
        self.flip_gate(true).await;
        Ok(())
    }

    async fn resume(&mut self) -> Result<()> {
        self.record("resume");
        self.flip_gate(false).await;
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.record("stop");
        self.cancel.cancel();
        Ok(())
    }

    async fn outcome(&mut self) -> Result<()> {
        match self.outcome {
            MockOutcome::Clean => Ok(()),
            MockOutcome::ExitNonZero => {
                Err(Error::ProcessExitedNonZero("exit status: 1".to_string()))
            }
            MockOutcome::NoOutput => {
                Err(Error::NoOutputProduced("exited before producing audio".to_string()))
            }
        }
    }
}

/// Factory that hands each created pipeline's controls to the test
pub struct MockPipelineFactory {
    pub fail_start: bool,
    pub outcome: MockOutcome,
    handles_tx: mpsc::UnboundedSender<MockPipelineHandle>,
}

impl MockPipelineFactory {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockPipelineHandle>) {
        let (handles_tx, handles_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                fail_start: false,
                outcome: MockOutcome::Clean,
                handles_tx,
            }),
            handles_rx,
        )
    }

    pub fn with_behavior(
        fail_start: bool,
        outcome: MockOutcome,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<MockPipelineHandle>) {
        let (handles_tx, handles_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                fail_start,
                outcome,
                handles_tx,
            }),
            handles_rx,
        )
    }
}

impl PipelineFactory for MockPipelineFactory {
    fn create(&self, _profile: OutputProfile) -> Box<dyn AudioPipeline> {
        let (chunk_tx, chunk_rx) = mpsc::channel(64);
        let (out_tx, out_rx) = mpsc::channel(64);
        let (gate_tx, gate_rx) = watch::channel((0, false));
        let (ack_tx, ack_rx) = watch::channel(0);
        let calls = Arc::new(Mutex::new(Vec::new()));

        let _ = self.handles_tx.send(MockPipelineHandle {
            chunk_tx,
            calls: Arc::clone(&calls),
        });

        Box::new(MockPipeline {
            fail_start: self.fail_start,
            outcome: self.outcome,
            calls,
            chunk_rx: Some(chunk_rx),
            output: Some(out_rx),
            out_tx: Some(out_tx),
            cancel: CancellationToken::new(),
            gate_tx,
            gate_rx,
            ack_tx,
            ack_rx,
            gate_seq: 0,
        })
    }
}

/// Source adapter for `mock://` URLs; `mock://fail` refuses to resolve.
pub struct MockAdapter;

#[async_trait]
impl SourceAdapter for MockAdapter {
    fn name(&self) -> &str {
        "mock"
    }

    fn can_handle(&self, url: &str) -> bool {
        url.starts_with("mock://")
    }

    async fn resolve(&self, url: &str) -> Result<StreamInfo> {
        if url.contains("fail") {
            return Err(Error::ExtractionFailed("mock extraction failure".to_string()));
        }
        Ok(StreamInfo {
            url: format!("{}/direct", url),
            title: "mock stream".to_string(),
            duration_secs: Some(30.0),
            thumbnail: None,
            source: "mock".to_string(),
        })
    }
}

/// In-memory audio sink recording every delivered frame
#[derive(Default)]
pub struct RecordingSink {
    frames: Mutex<Vec<(String, Bytes)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn frames(&self) -> Vec<(String, Bytes)> {
        self.frames.lock().unwrap().clone()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    /// Poll until at least `count` frames arrived, or panic after 2s.
    pub async fn wait_for_frames(&self, count: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while self.frame_count() < count {
            if tokio::time::Instant::now() > deadline {
                panic!(
                    "timed out waiting for {} frames (have {})",
                    count,
                    self.frame_count()
                );
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn send_audio(&self, session_id: &str, chunk: Bytes) -> Result<()> {
        self.frames
            .lock()
            .unwrap()
            .push((session_id.to_string(), chunk));
        Ok(())
    }
}

/// Engine config tuned for fast tests: no pre-roll, tight intervals.
pub fn test_config() -> Config {
    Config {
        preroll_ms: 0,
        max_buffer_ms: 60_000,
        progress_interval_secs: 1,
        resolve_timeout_secs: 5,
        ..Config::default()
    }
}

/// Session manager wired entirely with test doubles.
pub fn build_manager(
    factory: Arc<MockPipelineFactory>,
) -> (Arc<SessionManager>, Arc<RecordingSink>, Arc<EventBus>) {
    let sink = RecordingSink::new();
    let events = Arc::new(EventBus::new(64));
    let locator = StreamLocator::with_adapters(vec![Box::new(MockAdapter)], Duration::from_secs(5));
    let manager = Arc::new(SessionManager::new(
        locator,
        factory,
        Arc::clone(&sink) as Arc<dyn AudioSink>,
        Arc::clone(&events),
        test_config(),
    ));
    (manager, sink, events)
}
