//! Stream viewer
//!
//! Connects to a producer, decodes packets and hands them to the
//! render/playback side through an event channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{Error, ProtocolError, Result};
use crate::media::pcm_level;
use crate::protocol::{
    Packet, PacketKind, SequenceCheck, SequenceCounters, SequenceTracker, HEADER_SIZE,
};
use crate::stats::ViewerStats;
use crate::transport::{Connection, ConnectionId};

use super::config::ClientConfig;

/// Level meter gain on the playback side
const VIEWER_LEVEL_GAIN: f32 = 1.0;

/// Events from the stream viewer
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerEvent {
    /// Human-readable status change
    Status(String),

    /// Error occurred
    Error(String),

    /// Encoded video frame received
    Frame { data: Bytes, sequence: u32 },

    /// PCM audio chunk received
    AudioChunk { data: Bytes, sequence: u32 },

    /// Level (0-100) of the last audio chunk
    AudioLevel(u8),

    /// Control message received
    Control { data: Bytes, sequence: u32 },
}

/// Stream viewer
///
/// Cheap to clone; clones share the same connection, so `disconnect` may be
/// called from whichever task handles the events.
///
/// # Example
/// ```no_run
/// use framecast::client::{ClientConfig, StreamViewer, ViewerEvent};
///
/// # async fn example() -> framecast::error::Result<()> {
/// let (viewer, mut events) = StreamViewer::new(ClientConfig::default());
/// viewer.connect("127.0.0.1", 8888).await?;
///
/// while let Some(event) = events.recv().await {
///     match event {
///         ViewerEvent::Frame { data, sequence } => println!("frame #{sequence}: {} bytes", data.len()),
///         ViewerEvent::Error(e) => {
///             eprintln!("{e}");
///             viewer.disconnect().await;
///         }
///         _ => {}
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct StreamViewer {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    /// Serializes connect attempts
    connect_lock: tokio::sync::Mutex<()>,
    session: parking_lot::Mutex<Option<Session>>,
    next_session: AtomicU64,
    /// Numbering for control packets sent upstream
    sequences: SequenceCounters,
    stats: parking_lot::Mutex<ViewerStats>,
    events: mpsc::Sender<ViewerEvent>,
}

struct Session {
    id: u64,
    connection: Arc<Connection>,
    stop: watch::Sender<bool>,
    reader: JoinHandle<()>,
}

impl StreamViewer {
    /// Create a viewer.
    ///
    /// Returns the viewer and a receiver for events.
    pub fn new(config: ClientConfig) -> (Self, mpsc::Receiver<ViewerEvent>) {
        let (tx, rx) = mpsc::channel(config.event_capacity.max(1));

        let inner = Inner {
            config,
            connect_lock: tokio::sync::Mutex::new(()),
            session: parking_lot::Mutex::new(None),
            next_session: AtomicU64::new(1),
            sequences: SequenceCounters::new(),
            stats: parking_lot::Mutex::new(ViewerStats::new()),
            events: tx,
        };

        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    /// Connect to a producer and start receiving.
    pub async fn connect(&self, host: &str, port: u16) -> Result<()> {
        let _connecting = self.inner.connect_lock.lock().await;

        if self.inner.session.lock().is_some() {
            return Err(Error::AlreadyConnected);
        }

        let id = self.inner.next_session.fetch_add(1, Ordering::Relaxed);
        let config = &self.inner.config;

        let connection = match Connection::connect(
            ConnectionId(id),
            (host, port),
            config.connect_timeout,
            config.tcp_nodelay,
            config.connection_options(),
        )
        .await
        {
            Ok(connection) => Arc::new(connection),
            Err(e) => {
                tracing::warn!(host = host, port = port, error = %e, "Failed to connect");
                self.inner
                    .emit(ViewerEvent::Error(format!("Failed to connect: {}", e)));
                return Err(e);
            }
        };

        *self.inner.stats.lock() = ViewerStats::new();
        let (stop_tx, stop_rx) = watch::channel(false);

        {
            // Held across the spawn so the reader cannot tear down a session
            // that is not stored yet
            let mut session = self.inner.session.lock();
            let reader = tokio::spawn(Arc::clone(&self.inner).read_loop(
                Arc::clone(&connection),
                stop_rx,
                id,
            ));
            *session = Some(Session {
                id,
                connection,
                stop: stop_tx,
                reader,
            });
        }

        tracing::info!(host = host, port = port, "Connected to stream");
        self.inner
            .emit(ViewerEvent::Status("Connected to stream".to_string()));
        Ok(())
    }

    /// Stop receiving and close the connection.
    ///
    /// Waits for the read loop to finish. A no-op when not connected.
    pub async fn disconnect(&self) {
        let Some(session) = self.inner.session.lock().take() else {
            return;
        };

        session.stop.send_replace(true);
        session.connection.begin_close();
        if let Err(e) = session.reader.await {
            tracing::error!(error = %e, "Read loop task failed");
        }

        self.inner.finish(&session.connection).await;
    }

    /// Send a control message to the producer
    pub async fn send_control(&self, data: impl Into<Bytes>) -> Result<()> {
        let connection = self
            .inner
            .session
            .lock()
            .as_ref()
            .map(|session| Arc::clone(&session.connection))
            .ok_or(Error::NotConnected)?;

        let packet = Packet::new(
            PacketKind::Control,
            self.inner.sequences.next(PacketKind::Control),
            data.into(),
        )?;
        connection.write_packet(&packet).await
    }

    pub fn is_connected(&self) -> bool {
        self.inner.session.lock().is_some()
    }

    pub fn stats(&self) -> ViewerStats {
        self.inner.stats.lock().clone()
    }
}

impl Inner {
    fn emit(&self, event: ViewerEvent) {
        if let Err(TrySendError::Full(event)) = self.events.try_send(event) {
            tracing::trace!(event = ?event, "Event channel full, dropping event");
        }
    }

    /// Close the transport and report the disconnect
    async fn finish(&self, connection: &Connection) {
        connection.close().await;
        tracing::info!(
            bytes_received = connection.bytes_received(),
            "Disconnected from stream"
        );
        self.emit(ViewerEvent::Status("Disconnected".to_string()));
    }

    async fn read_loop(
        self: Arc<Self>,
        connection: Arc<Connection>,
        mut stop: watch::Receiver<bool>,
        session_id: u64,
    ) {
        let mut tracker = SequenceTracker::new();

        let failure = loop {
            let packet = match connection.read_packet().await {
                Ok(packet) => packet,
                Err(Error::Protocol(ProtocolError::UnknownKind(kind))) => {
                    tracing::warn!(kind = kind, "Skipping packet of unknown kind");
                    self.stats.lock().unknown_packets += 1;
                    continue;
                }
                // Closed locally; only a disconnect request ends the loop quietly
                Err(Error::Cancelled) | Err(Error::ConnectionClosed) if *stop.borrow() => {
                    break None
                }
                Err(e) => break Some(e),
            };

            let event = self.accept_packet(&mut tracker, packet);

            // Waits for the render side, but never past a disconnect
            tokio::select! {
                biased;
                _ = stop.wait_for(|stop| *stop) => break None,
                sent = self.events.send(event) => {
                    if sent.is_err() {
                        tracing::debug!("Event receiver dropped");
                    }
                }
            }
        };

        let Some(error) = failure else {
            return;
        };

        match &error {
            Error::Protocol(ProtocolError::EndOfStream) => {
                tracing::info!("Stream ended by producer");
                self.emit(ViewerEvent::Error("Stream ended by producer".to_string()));
            }
            e => {
                tracing::warn!(error = %e, "Connection failed");
                self.emit(ViewerEvent::Error(format!("Connection lost: {}", e)));
            }
        }

        // Tear down unless a disconnect already claimed the session
        let session = {
            let mut slot = self.session.lock();
            match slot.as_ref() {
                Some(session) if session.id == session_id => slot.take(),
                _ => None,
            }
        };
        if let Some(session) = session {
            self.finish(&session.connection).await;
        }
    }

    /// Update statistics and build the event for one decoded packet
    fn accept_packet(&self, tracker: &mut SequenceTracker, packet: Packet) -> ViewerEvent {
        let Packet {
            kind,
            sequence,
            payload,
        } = packet;

        let mut stats = self.stats.lock();
        stats.bytes_received += (HEADER_SIZE + payload.len()) as u64;

        match tracker.observe(kind, sequence) {
            SequenceCheck::Gap { missing } => {
                tracing::warn!(kind = %kind, sequence = sequence, missing = missing, "Sequence gap");
                stats.missing_packets += missing as u64;
            }
            SequenceCheck::Stale => {
                tracing::warn!(kind = %kind, sequence = sequence, "Stale packet");
                stats.stale_packets += 1;
            }
            SequenceCheck::First | SequenceCheck::InOrder => {}
        }

        let event = match kind {
            PacketKind::Video => {
                stats.video_frames += 1;
                ViewerEvent::Frame {
                    data: payload,
                    sequence,
                }
            }
            PacketKind::Audio => {
                stats.audio_chunks += 1;
                drop(stats);
                self.emit(ViewerEvent::AudioLevel(pcm_level(&payload, VIEWER_LEVEL_GAIN)));
                ViewerEvent::AudioChunk {
                    data: payload,
                    sequence,
                }
            }
            PacketKind::Control => {
                stats.control_packets += 1;
                ViewerEvent::Control {
                    data: payload,
                    sequence,
                }
            }
        };

        tracing::trace!(kind = %kind, sequence = sequence, "Packet received");
        event
    }
}

impl std::fmt::Debug for StreamViewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamViewer")
            .field("connected", &self.is_connected())
            .finish()
    }
}
