//! Multiplexed transport
//!
//! One TCP listener carries both planes of the engine's output. On connect,
//! a consumer sends a single subscription line — `AUDIO` or `EVENTS` — and
//! the server streams that plane for the life of the connection:
//!
//! - audio: length-prefixed binary frames tagged with the session identity
//!   (codec in [`weir_common::protocol`]), many sessions interleaved
//!   frame-by-frame but never within a frame;
//! - events: newline-delimited JSON status records fanned out from the
//!   engine's [`EventBus`].
//!
//! Every connection gets its own writer task fed by a bounded queue; a frame
//! is enqueued as one contiguous buffer and written with one call, which is
//! what makes frame writes atomic with respect to concurrently streaming
//! sessions. A consumer that stops draining loses frames (audio is only
//! useful now), never stalls the engine.

use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};
use uuid::Uuid;
use weir_common::{protocol, EventBus};

/// Which plane a consumer subscribed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plane {
    Audio,
    Events,
}

/// Consumer attach/detach notifications
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Attached { conn_id: Uuid, plane: Plane },
    Detached { conn_id: Uuid, plane: Plane },
}

/// Engine-side handle for writing audio to the transport
///
/// The session manager depends on this seam rather than the TCP server so
/// tests can record delivered frames in memory.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn send_audio(&self, session_id: &str, chunk: Bytes) -> Result<()>;
}

/// Per-connection outbound queue depth. Audio at a few chunks per second
/// never gets near this; hitting it means the consumer stopped draining.
const CONN_QUEUE_DEPTH: usize = 256;

/// Shared multiplexed transport server
pub struct TransportServer {
    audio_conns: Mutex<HashMap<Uuid, mpsc::Sender<Bytes>>>,
    event_conns: Mutex<HashMap<Uuid, mpsc::Sender<Bytes>>>,
    lifecycle_tx: broadcast::Sender<TransportEvent>,
    consumers: AtomicUsize,
}

impl TransportServer {
    pub fn new() -> Arc<Self> {
        let (lifecycle_tx, _) = broadcast::channel(32);
        Arc::new(Self {
            audio_conns: Mutex::new(HashMap::new()),
            event_conns: Mutex::new(HashMap::new()),
            lifecycle_tx,
            consumers: AtomicUsize::new(0),
        })
    }

    /// Observe consumer attach/detach.
    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<TransportEvent> {
        self.lifecycle_tx.subscribe()
    }

    /// Currently attached consumers across both planes.
    pub fn consumer_count(&self) -> usize {
        self.consumers.load(Ordering::Relaxed)
    }

    /// Accept consumers on `listener` and fan engine events out to the
    /// events plane. Runs until the process exits.
    pub fn run(self: Arc<Self>, listener: TcpListener, events: &EventBus) {
        // Event fan-out: EventBus -> every EVENTS consumer.
        let server = Arc::clone(&self);
        let mut event_stream = BroadcastStream::new(events.subscribe());
        tokio::spawn(async move {
            while let Some(result) = event_stream.next().await {
                match result {
                    Ok(event) => match protocol::encode_event_record(&event) {
                        Ok(line) => server.broadcast_events(Bytes::from(line)).await,
                        Err(e) => warn!("unencodable event record: {}", e),
                    },
                    Err(e) => {
                        // Lagged receiver: drop the backlog and carry on.
                        warn!("event fan-out lagged: {}", e);
                    }
                }
            }
        });

        let server = self;
        tokio::spawn(async move {
            info!(
                addr = %listener.local_addr().map(|a| a.to_string()).unwrap_or_default(),
                "transport listening"
            );
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!(%peer, "transport connection");
                        let server = Arc::clone(&server);
                        tokio::spawn(async move {
                            if let Err(e) = server.handle_conn(stream).await {
                                debug!("transport connection ended: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("transport accept failed: {}", e);
                    }
                }
            }
        });
    }

    async fn handle_conn(self: Arc<Self>, stream: TcpStream) -> Result<()> {
        let (read_half, write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let mut line = String::new();
        reader
            .read_line(&mut line)
            .await
            .map_err(|e| Error::Transport(format!("subscription read failed: {}", e)))?;

        let plane = match line.trim().to_ascii_uppercase().as_str() {
            "AUDIO" => Plane::Audio,
            "EVENTS" => Plane::Events,
            other => {
                return Err(Error::Transport(format!(
                    "unknown subscription {:?}",
                    other
                )));
            }
        };

        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel::<Bytes>(CONN_QUEUE_DEPTH);
        match plane {
            Plane::Audio => self.audio_conns.lock().await.insert(conn_id, tx),
            Plane::Events => self.event_conns.lock().await.insert(conn_id, tx),
        };
        self.consumers.fetch_add(1, Ordering::Relaxed);
        let _ = self.lifecycle_tx.send(TransportEvent::Attached { conn_id, plane });
        info!(%conn_id, ?plane, "consumer attached");

        Self::write_loop(reader, write_half, rx).await;

        match plane {
            Plane::Audio => self.audio_conns.lock().await.remove(&conn_id),
            Plane::Events => self.event_conns.lock().await.remove(&conn_id),
        };
        self.consumers.fetch_sub(1, Ordering::Relaxed);
        let _ = self.lifecycle_tx.send(TransportEvent::Detached { conn_id, plane });
        info!(%conn_id, ?plane, "consumer detached");
        Ok(())
    }

    /// Drain the connection's queue onto the socket, one whole buffer per
    /// write. Ends on socket error or consumer hangup.
    async fn write_loop(
        mut reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
        mut writer: OwnedWriteHalf,
        mut rx: mpsc::Receiver<Bytes>,
    ) {
        let mut drain = [0u8; 64];
        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(buf) => {
                        if let Err(e) = writer.write_all(&buf).await {
                            debug!("consumer write failed: {}", e);
                            break;
                        }
                    }
                    None => break,
                },
                // Consumers send nothing after subscribing; reads only
                // detect hangup.
                read = reader.read(&mut drain) => match read {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        }
    }

    async fn broadcast_events(&self, line: Bytes) {
        let mut stale = Vec::new();
        {
            let conns = self.event_conns.lock().await;
            for (conn_id, tx) in conns.iter() {
                match tx.try_send(line.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(%conn_id, "event consumer backlogged; record dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => stale.push(*conn_id),
                }
            }
        }
        if !stale.is_empty() {
            let mut conns = self.event_conns.lock().await;
            for conn_id in stale {
                conns.remove(&conn_id);
            }
        }
    }
}

#[async_trait]
impl AudioSink for TransportServer {
    /// Frame `chunk` with `session_id` and enqueue it to every audio
    /// consumer. Encoding happens once; each connection's writer task puts
    /// the frame on the wire in a single write.
    async fn send_audio(&self, session_id: &str, chunk: Bytes) -> Result<()> {
        let frame = protocol::encode_frame(session_id, &chunk)
            .map_err(|e| Error::Transport(e.to_string()))?;

        let mut stale = Vec::new();
        {
            let conns = self.audio_conns.lock().await;
            for (conn_id, tx) in conns.iter() {
                match tx.try_send(frame.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        // Real-time audio: dropping beats stalling every
                        // other session behind one slow consumer.
                        warn!(%conn_id, session = session_id, "audio consumer backlogged; frame dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => stale.push(*conn_id),
                }
            }
        }
        if !stale.is_empty() {
            let mut conns = self.audio_conns.lock().await;
            for conn_id in stale {
                conns.remove(&conn_id);
            }
        }
        Ok(())
    }
}

// ========================================
// Tests
// ========================================
