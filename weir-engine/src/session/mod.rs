//! Session manager
//!
//! One session per caller-supplied identity. The manager owns the active-set
//! map (the only state shared across sessions) and, per session, the stream
//! locator call, the pipeline, and the pacing buffer, wired together by a
//! per-session run task.
//!
//! State machine: `Idle → Extracting → Streaming ⇄ Paused → Stopped`, with
//! `Extracting → Error` on resolution/start failure and `Streaming → Stopped`
//! on natural completion. Idle is the state of a freshly created session and
//! is never re-entered.
//!
//! Invariant: at most one live session per identity. `start` under an
//! existing identity removes the old handle from the map and the new run
//! task fully tears the predecessor down before its own pipeline may produce
//! a single frame, so two pipelines can never write the same identity
//! concurrently.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::locator::StreamLocator;
use crate::pacing::{PacingBuffer, PacingConfig};
use crate::pipeline::{AudioPipeline, PipelineFactory};
use crate::transport::AudioSink;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use weir_common::{EngineEvent, EventBus, OutputProfile};

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Extracting,
    Streaming,
    Paused,
    Stopped,
    Error,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Extracting => "extracting",
            Self::Streaming => "streaming",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }
}

/// Read-only view of one session for the control plane
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub state: SessionState,
    pub bytes_sent: u64,
    pub playback_ms: u64,
}

/// Mutable per-session data shared between the run task and control ops
struct SessionShared {
    id: String,
    state: RwLock<SessionState>,
    bytes_sent: AtomicU64,
    playback_ms: AtomicU64,
    profile: OutputProfile,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl SessionShared {
    async fn set_state(&self, next: SessionState) {
        let mut state = self.state.write().await;
        debug!(session = %self.id, from = state.as_str(), to = next.as_str(), "session transition");
        *state = next;
    }

    async fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            state: *self.state.read().await,
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            playback_ms: self.playback_ms.load(Ordering::Relaxed),
        }
    }
}

/// Handle to one live session held in the active set
struct SessionHandle {
    shared: Arc<SessionShared>,
    cancel: CancellationToken,
    /// Populated by the run task once the pipeline is created
    pipeline: Arc<Mutex<Option<Box<dyn AudioPipeline>>>>,
    /// Run task join handle; taken exactly once by whoever tears down
    task: Mutex<Option<JoinHandle<()>>>,
    /// Distinguishes this handle from any successor under the same identity
    generation: u64,
}

impl SessionHandle {
    /// Cancel the run task and wait for it to finish tearing down.
    async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                warn!(session = %self.shared.id, "session task join failed: {}", e);
            }
        }
    }
}

type ActiveSet = Arc<Mutex<HashMap<String, Arc<SessionHandle>>>>;

/// Top-level session manager
pub struct SessionManager {
    active: ActiveSet,
    locator: Arc<StreamLocator>,
    factory: Arc<dyn PipelineFactory>,
    sink: Arc<dyn AudioSink>,
    events: Arc<EventBus>,
    config: Config,
    generation: AtomicU64,
}

impl SessionManager {
    pub fn new(
        locator: StreamLocator,
        factory: Arc<dyn PipelineFactory>,
        sink: Arc<dyn AudioSink>,
        events: Arc<EventBus>,
        config: Config,
    ) -> Self {
        Self {
            active: Arc::new(Mutex::new(HashMap::new())),
            locator: Arc::new(locator),
            factory,
            sink,
            events,
            config,
            generation: AtomicU64::new(0),
        }
    }

    /// Start (or restart) playback under `id`.
    ///
    /// Returns once the source is resolved and the pipeline is running, or
    /// with the failure that prevented it. Any prior session under `id` is
    /// fully stopped before the new pipeline starts.
    pub async fn start(
        &self,
        id: &str,
        url: &str,
        profile: OutputProfile,
        offset_secs: f64,
    ) -> Result<()> {
        if id.is_empty() || id.len() > weir_common::SESSION_ID_WIDTH {
            return Err(Error::InvalidState(format!(
                "session identity must be 1..={} bytes",
                weir_common::SESSION_ID_WIDTH
            )));
        }

        info!(session = id, url, %profile, "start requested");

        let shared = Arc::new(SessionShared {
            id: id.to_string(),
            state: RwLock::new(SessionState::Idle),
            bytes_sent: AtomicU64::new(0),
            playback_ms: AtomicU64::new(0),
            profile,
            created_at: chrono::Utc::now(),
        });

        let handle = Arc::new(SessionHandle {
            shared: Arc::clone(&shared),
            cancel: CancellationToken::new(),
            pipeline: Arc::new(Mutex::new(None)),
            task: Mutex::new(None),
            generation: self.generation.fetch_add(1, Ordering::Relaxed) + 1,
        });

        // Swap the new handle in atomically; the displaced predecessor (if
        // any) is handed to the run task, which tears it down before its
        // own pipeline starts.
        let predecessor = {
            let mut active = self.active.lock().await;
            active.insert(id.to_string(), Arc::clone(&handle))
        };

        let (startup_tx, startup_rx) = oneshot::channel();
        let run = SessionRun {
            shared,
            cancel: handle.cancel.clone(),
            pipeline_slot: Arc::clone(&handle.pipeline),
            generation: handle.generation,
            active: Arc::clone(&self.active),
            locator: Arc::clone(&self.locator),
            factory: Arc::clone(&self.factory),
            sink: Arc::clone(&self.sink),
            events: Arc::clone(&self.events),
            config: self.config.clone(),
            url: url.to_string(),
            offset_secs,
        };

        let task = tokio::spawn(run.run(predecessor, startup_tx));
        *handle.task.lock().await = Some(task);

        match startup_rx.await {
            Ok(result) => result,
            Err(_) => {
                // Run task died before reporting; make sure the handle is
                // not left in the active set.
                self.remove_generation(id, handle.generation).await;
                Err(Error::Internal("session task aborted during startup".to_string()))
            }
        }
    }

    /// Pause a streaming session (process suspension).
    pub async fn pause(&self, id: &str) -> Result<()> {
        let handle = self.get(id).await?;

        let state = *handle.shared.state.read().await;
        if state != SessionState::Streaming {
            return Err(Error::InvalidState(format!(
                "cannot pause session in state {}",
                state.as_str()
            )));
        }

        let mut pipeline = handle.pipeline.lock().await;
        match pipeline.as_mut() {
            Some(p) => p.pause().await?,
            None => return Err(Error::InvalidState("pipeline not running".to_string())),
        }
        handle.shared.set_state(SessionState::Paused).await;
        info!(session = id, "paused");
        Ok(())
    }

    /// Resume a paused session.
    pub async fn resume(&self, id: &str) -> Result<()> {
        let handle = self.get(id).await?;

        let state = *handle.shared.state.read().await;
        if state != SessionState::Paused {
            return Err(Error::InvalidState(format!(
                "cannot resume session in state {}",
                state.as_str()
            )));
        }

        let mut pipeline = handle.pipeline.lock().await;
        match pipeline.as_mut() {
            Some(p) => p.resume().await?,
            None => return Err(Error::InvalidState("pipeline not running".to_string())),
        }
        handle.shared.set_state(SessionState::Streaming).await;
        info!(session = id, "resumed");
        Ok(())
    }

    /// Stop a session and discard it.
    ///
    /// Once this returns, no further frame bearing `id` reaches the
    /// transport.
    pub async fn stop(&self, id: &str) -> Result<()> {
        let handle = {
            let mut active = self.active.lock().await;
            active
                .remove(id)
                .ok_or_else(|| Error::SessionNotFound(id.to_string()))?
        };

        handle.shutdown().await;
        handle.shared.set_state(SessionState::Stopped).await;
        info!(session = id, "stopped");
        Ok(())
    }

    /// Status snapshot for one session.
    pub async fn status(&self, id: &str) -> Result<SessionSnapshot> {
        let handle = self.get(id).await?;
        Ok(handle.shared.snapshot().await)
    }

    /// Snapshots of every live session.
    pub async fn list(&self) -> Vec<SessionSnapshot> {
        let handles: Vec<Arc<SessionHandle>> = {
            let active = self.active.lock().await;
            active.values().cloned().collect()
        };
        let mut snapshots = Vec::with_capacity(handles.len());
        for handle in handles {
            snapshots.push(handle.shared.snapshot().await);
        }
        snapshots
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.active.lock().await.len()
    }

    async fn get(&self, id: &str) -> Result<Arc<SessionHandle>> {
        let active = self.active.lock().await;
        active
            .get(id)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))
    }

    async fn remove_generation(&self, id: &str, generation: u64) {
        let mut active = self.active.lock().await;
        if active.get(id).is_some_and(|h| h.generation == generation) {
            active.remove(id);
        }
    }
}

/// Everything one run task needs, bundled so the spawn site stays readable
struct SessionRun {
    shared: Arc<SessionShared>,
    cancel: CancellationToken,
    pipeline_slot: Arc<Mutex<Option<Box<dyn AudioPipeline>>>>,
    generation: u64,
    active: ActiveSet,
    locator: Arc<StreamLocator>,
    factory: Arc<dyn PipelineFactory>,
    sink: Arc<dyn AudioSink>,
    events: Arc<EventBus>,
    config: Config,
    url: String,
    offset_secs: f64,
}

impl SessionRun {
    async fn run(self, predecessor: Option<Arc<SessionHandle>>, startup_tx: oneshot::Sender<Result<()>>) {
        // The prior session under this identity must be fully gone before
        // this pipeline may emit a frame.
        if let Some(old) = predecessor {
            info!(session = %self.shared.id, "stopping predecessor session");
            old.shutdown().await;
            old.shared.set_state(SessionState::Stopped).await;
        }

        match self.startup().await {
            Ok(paced) => {
                let _ = startup_tx.send(Ok(()));
                self.forward(paced).await;
            }
            Err(e) => {
                self.shared.set_state(SessionState::Error).await;
                self.remove_self().await;
                let _ = startup_tx.send(Err(e));
            }
        }
    }

    /// Extracting phase: resolve the source, launch the pipeline, wire the
    /// pacing buffer. Returns the paced output channel.
    async fn startup(&self) -> Result<mpsc::Receiver<bytes::Bytes>> {
        self.shared.set_state(SessionState::Extracting).await;

        let info = tokio::select! {
            _ = self.cancel.cancelled() => {
                return Err(Error::InvalidState("session stopped during extraction".to_string()));
            }
            resolved = self.locator.resolve(&self.url) => resolved?,
        };
        if self.cancel.is_cancelled() {
            // Stopped while the resolve branch was completing; never start a
            // pipeline for a dead session.
            return Err(Error::InvalidState("session stopped during extraction".to_string()));
        }

        let mut pipeline = self.factory.create(self.shared.profile);
        pipeline.start(&info.url, self.offset_secs).await?;
        let output = pipeline
            .take_output()
            .ok_or_else(|| Error::Internal("pipeline produced no output channel".to_string()))?;
        *self.pipeline_slot.lock().await = Some(pipeline);

        let pacing = PacingBuffer::new(PacingConfig::for_profile(
            self.shared.profile,
            self.config.preroll(),
            self.config.max_buffer(),
        ));
        let stats = pacing.stats();
        let paced = pacing.start(self.cancel.clone(), output);

        self.shared.set_state(SessionState::Streaming).await;
        info!(
            session = %self.shared.id,
            title = %info.title,
            source = %info.source,
            "streaming"
        );

        // Final stats land in the log when the session ends.
        let id = self.shared.id.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            let s = stats.snapshot();
            debug!(
                session = %id,
                chunks = s.chunks_emitted,
                underruns = s.underruns,
                overruns = s.overruns,
                "pacing stats at teardown"
            );
        });

        Ok(paced)
    }

    /// Streaming phase: pump paced chunks to the transport, account bytes
    /// and playback time, emit ready/progress and exactly one terminal
    /// event.
    async fn forward(&self, mut paced: mpsc::Receiver<bytes::Bytes>) {
        let byte_rate = self.shared.profile.byte_rate() as u64;
        let mut announced_ready = false;
        let mut progress = tokio::time::interval(std::time::Duration::from_secs(
            self.config.progress_interval_secs.max(1),
        ));
        progress.tick().await; // first tick fires immediately; skip it

        let terminal: Option<EngineEvent> = loop {
            tokio::select! {
                // Cancellation wins over a ready chunk or tick.
                biased;

                _ = self.cancel.cancelled() => break None,

                _ = progress.tick() => {
                    if *self.shared.state.read().await == SessionState::Streaming && announced_ready {
                        self.events.emit_lossy(EngineEvent::progress(
                            self.shared.id.clone(),
                            self.shared.bytes_sent.load(Ordering::Relaxed),
                            self.shared.playback_ms.load(Ordering::Relaxed) / 1000,
                        ));
                    }
                }

                maybe = paced.recv() => match maybe {
                    Some(chunk) => {
                        if !announced_ready {
                            announced_ready = true;
                            self.events.emit_lossy(EngineEvent::ready(self.shared.id.clone()));
                        }

                        let total = self
                            .shared
                            .bytes_sent
                            .fetch_add(chunk.len() as u64, Ordering::Relaxed)
                            + chunk.len() as u64;
                        self.shared
                            .playback_ms
                            .store(total * 1000 / byte_rate.max(1), Ordering::Relaxed);

                        if let Err(e) = self.sink.send_audio(&self.shared.id, chunk).await {
                            warn!(session = %self.shared.id, "transport send failed: {}", e);
                        }
                    }
                    None => {
                        if self.cancel.is_cancelled() {
                            // Channel closed because we are being torn down,
                            // not because the stream ended.
                            break None;
                        }
                        // Pipeline ended; classify it.
                        let outcome = match self.pipeline_slot.lock().await.as_mut() {
                            Some(p) => p.outcome().await,
                            None => Ok(()),
                        };
                        let bytes = self.shared.bytes_sent.load(Ordering::Relaxed);
                        let secs = self.shared.playback_ms.load(Ordering::Relaxed) / 1000;
                        match outcome {
                            Ok(()) => {
                                self.shared.set_state(SessionState::Stopped).await;
                                break Some(EngineEvent::finished(self.shared.id.clone(), bytes, secs));
                            }
                            Err(e) => {
                                error!(session = %self.shared.id, "pipeline failed: {}", e);
                                self.shared.set_state(SessionState::Error).await;
                                break Some(EngineEvent::error(self.shared.id.clone(), e.to_string()));
                            }
                        }
                    }
                }
            }
        };

        // Teardown: reap the process, leave the active set, then report.
        self.cancel.cancel();
        if let Some(pipeline) = self.pipeline_slot.lock().await.as_mut() {
            if let Err(e) = pipeline.stop().await {
                warn!(session = %self.shared.id, "pipeline stop failed: {}", e);
            }
        }
        self.remove_self().await;

        if let Some(event) = terminal {
            self.events.emit_lossy(event);
        }

        let age = chrono::Utc::now() - self.shared.created_at;
        info!(
            session = %self.shared.id,
            age_secs = age.num_seconds(),
            bytes = self.shared.bytes_sent.load(Ordering::Relaxed),
            "session ended"
        );
    }

    /// Remove this generation's entry from the active set; a successor that
    /// already replaced it is left untouched.
    async fn remove_self(&self) {
        let mut active = self.active.lock().await;
        if active
            .get(&self.shared.id)
            .is_some_and(|h| h.generation == self.generation)
        {
            active.remove(&self.shared.id);
        }
    }
}
