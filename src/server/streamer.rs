//! Producer-side stream orchestrator
//!
//! Owns the broadcast server for one session, takes encoded frames from the
//! capture side through a bounded queue and drives the broadcast.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::bitrate::AdaptiveBitrate;
use crate::error::{Error, Result};
use crate::media::{pcm_level, silence_like, MediaFrame};
use crate::protocol::PacketKind;
use crate::stats::{ProducerStats, TransferWindow};

use super::config::ServerConfig;
use super::listener::{BroadcastServer, ServerEvent};

/// Producer lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    Idle,
    Starting,
    Streaming,
    Stopping,
}

/// Events from the stream producer
#[derive(Debug, Clone, PartialEq)]
pub enum ProducerEvent {
    /// Human-readable status change
    Status(String),

    /// Error occurred
    Error(String),

    /// Microphone level (0-100) of the last audio chunk
    AudioLevel(u8),

    /// The bitrate ladder moved
    BitrateChanged { bitrate: u32, quality: u8 },
}

/// Stream producer
///
/// Cheap to clone; clones share the same session.
///
/// # Example
/// ```no_run
/// use framecast::server::{ServerConfig, StreamProducer};
///
/// # async fn example() -> framecast::error::Result<()> {
/// let (producer, mut events) = StreamProducer::new(ServerConfig::default())?;
///
/// tokio::spawn(async move {
///     while let Some(event) = events.recv().await {
///         println!("Event: {:?}", event);
///     }
/// });
///
/// producer.start().await?;
/// producer.push_video(vec![0xFF, 0xD8, 0xFF], 1280, 720, 75)?;
/// producer.stop().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct StreamProducer {
    inner: Arc<Inner>,
}

struct Inner {
    config: ServerConfig,
    bitrate: AdaptiveBitrate,
    state: parking_lot::Mutex<ProducerState>,
    /// Serializes start and stop
    session: tokio::sync::Mutex<Option<Session>>,
    /// Capture-facing half of the running session
    active: parking_lot::Mutex<Option<Active>>,
    generation: AtomicU64,
    muted: AtomicBool,
    counters: Counters,
    window: parking_lot::Mutex<TransferWindow>,
    events: mpsc::Sender<ProducerEvent>,
}

struct Session {
    generation: u64,
    server: Arc<BroadcastServer>,
    shutdown: watch::Sender<bool>,
    pump: JoinHandle<()>,
}

#[derive(Clone)]
struct Active {
    frames: mpsc::Sender<MediaFrame>,
    server: Arc<BroadcastServer>,
}

#[derive(Default)]
struct Counters {
    video_frames: AtomicU64,
    audio_chunks: AtomicU64,
    dropped_frames: AtomicU64,
    bytes_sent: AtomicU64,
    failed_writes: AtomicU64,
}

impl StreamProducer {
    /// Create a producer.
    ///
    /// Returns the producer and a receiver for events. Fails if the bitrate
    /// ladder is invalid.
    pub fn new(config: ServerConfig) -> Result<(Self, mpsc::Receiver<ProducerEvent>)> {
        let bitrate = AdaptiveBitrate::new(&config.bitrate)?;
        let (tx, rx) = mpsc::channel(config.event_capacity.max(1));

        let inner = Inner {
            config,
            bitrate,
            state: parking_lot::Mutex::new(ProducerState::Idle),
            session: tokio::sync::Mutex::new(None),
            active: parking_lot::Mutex::new(None),
            generation: AtomicU64::new(0),
            muted: AtomicBool::new(false),
            counters: Counters::default(),
            window: parking_lot::Mutex::new(TransferWindow::new()),
            events: tx,
        };

        Ok((
            Self {
                inner: Arc::new(inner),
            },
            rx,
        ))
    }

    /// Bring up the broadcast server and start accepting frames.
    ///
    /// Returns the bound address. While already streaming this is a no-op
    /// returning the current address.
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut session = self.inner.session.lock().await;

        if let Some(running) = session.as_ref() {
            tracing::debug!("Producer already streaming");
            return running.server.local_addr().ok_or(Error::NotStreaming);
        }

        *self.inner.state.lock() = ProducerState::Starting;

        let (server, server_events) = BroadcastServer::new(self.inner.config.clone());
        let addr = match server.start().await {
            Ok(addr) => addr,
            Err(e) => {
                *self.inner.state.lock() = ProducerState::Idle;
                tracing::error!(error = %e, "Failed to start stream");
                self.inner
                    .emit(ProducerEvent::Error(format!("Failed to start server: {}", e)));
                return Err(e);
            }
        };

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let (frames_tx, frames_rx) = mpsc::channel(self.inner.config.frame_queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        self.inner.bitrate.reset();
        *self.inner.window.lock() = TransferWindow::new();

        let pump = tokio::spawn(Arc::clone(&self.inner).pump(
            Arc::clone(&server),
            frames_rx,
            shutdown_rx,
        ));
        tokio::spawn(Arc::clone(&self.inner).monitor(server_events, generation));

        *self.inner.active.lock() = Some(Active {
            frames: frames_tx,
            server: Arc::clone(&server),
        });
        *session = Some(Session {
            generation,
            server,
            shutdown: shutdown_tx,
            pump,
        });
        *self.inner.state.lock() = ProducerState::Streaming;

        tracing::info!(addr = %addr, "Stream started");
        self.inner.emit(ProducerEvent::Status(format!(
            "Streaming on port {}",
            addr.port()
        )));

        Ok(addr)
    }

    /// Stop accepting frames, close every viewer and release the listener.
    ///
    /// Waits for an in-flight broadcast. A no-op while idle.
    pub async fn stop(&self) {
        self.inner.shutdown(None).await;
    }

    /// Queue a frame for broadcast.
    ///
    /// Audio chunks are silenced while muted, and their level is reported once
    /// the chunk is queued.
    /// When the queue is full the frame is dropped and `QueueFull` returned;
    /// capture never waits on the network.
    pub fn push(&self, mut frame: MediaFrame) -> Result<()> {
        let active = self.inner.active.lock().clone().ok_or(Error::NotStreaming)?;

        let level = (frame.kind() == PacketKind::Audio).then(|| {
            if self.is_muted() {
                frame.data = Bytes::from(silence_like(&frame.data));
                0
            } else {
                pcm_level(&frame.data, self.inner.config.audio_level_gain)
            }
        });

        match active.frames.try_send(frame) {
            Ok(()) => {
                if let Some(level) = level {
                    self.inner.emit(ProducerEvent::AudioLevel(level));
                }
                Ok(())
            }
            Err(TrySendError::Full(frame)) => {
                let dropped = self.inner.counters.dropped_frames.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::debug!(kind = %frame.kind(), dropped = dropped, "Frame queue full, dropping frame");
                Err(Error::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(Error::NotStreaming),
        }
    }

    /// Queue an encoded video frame
    pub fn push_video(
        &self,
        data: impl Into<Bytes>,
        width: u32,
        height: u32,
        quality: u8,
    ) -> Result<()> {
        self.push(MediaFrame::video(data, width, height, quality))
    }

    /// Queue a PCM audio chunk
    pub fn push_audio(&self, data: impl Into<Bytes>, sample_rate: u32, channels: u16) -> Result<()> {
        self.push(MediaFrame::audio(data, sample_rate, channels))
    }

    /// Queue a control message
    pub fn push_control(&self, data: impl Into<Bytes>) -> Result<()> {
        self.push(MediaFrame::control(data))
    }

    /// Mute or unmute the microphone. Muted audio is sent as silence.
    pub fn set_muted(&self, muted: bool) {
        if self.inner.muted.swap(muted, Ordering::AcqRel) == muted {
            return;
        }

        let status = if muted {
            "Microphone muted"
        } else {
            "Microphone active"
        };
        tracing::info!(muted = muted, "Microphone toggled");
        self.inner.emit(ProducerEvent::Status(status.to_string()));
    }

    pub fn is_muted(&self) -> bool {
        self.inner.muted.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ProducerState {
        *self.inner.state.lock()
    }

    pub fn is_streaming(&self) -> bool {
        self.state() == ProducerState::Streaming
    }

    /// Listening address while streaming
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner
            .active
            .lock()
            .as_ref()
            .and_then(|active| active.server.local_addr())
    }

    /// The running broadcast server, for attaching custom transports
    pub fn server(&self) -> Option<Arc<BroadcastServer>> {
        self.inner
            .active
            .lock()
            .as_ref()
            .map(|active| Arc::clone(&active.server))
    }

    /// Suggested bitrate for the next encode (advisory)
    pub fn current_bitrate(&self) -> u32 {
        self.inner.bitrate.current_bitrate()
    }

    /// Suggested encoder quality for the next encode (advisory)
    pub fn current_quality(&self) -> u8 {
        self.inner.bitrate.current_quality()
    }

    pub fn stats(&self) -> ProducerStats {
        let counters = &self.inner.counters;
        let (average_transfer, fps) = {
            let window = self.inner.window.lock();
            (window.average(), window.frames_per_second())
        };
        ProducerStats {
            video_frames: counters.video_frames.load(Ordering::Relaxed),
            audio_chunks: counters.audio_chunks.load(Ordering::Relaxed),
            dropped_frames: counters.dropped_frames.load(Ordering::Relaxed),
            bytes_sent: counters.bytes_sent.load(Ordering::Relaxed),
            failed_writes: counters.failed_writes.load(Ordering::Relaxed),
            viewers: self
                .inner
                .active
                .lock()
                .as_ref()
                .map_or(0, |active| active.server.viewer_count()),
            bitrate: self.inner.bitrate.current_bitrate(),
            quality: self.inner.bitrate.current_quality(),
            average_transfer,
            fps,
        }
    }
}

impl Inner {
    fn emit(&self, event: ProducerEvent) {
        if let Err(TrySendError::Full(event)) = self.events.try_send(event) {
            tracing::trace!(event = ?event, "Event channel full, dropping event");
        }
    }

    /// Tear down the running session. With a generation, only that session
    /// is stopped.
    async fn shutdown(&self, generation: Option<u64>) -> bool {
        let mut slot = self.session.lock().await;

        let matches = match (slot.as_ref(), generation) {
            (None, _) => false,
            (Some(session), Some(generation)) => session.generation == generation,
            (Some(_), None) => true,
        };
        if !matches {
            return false;
        }
        let Some(session) = slot.take() else {
            return false;
        };

        *self.state.lock() = ProducerState::Stopping;
        self.active.lock().take();

        session.shutdown.send_replace(true);
        session.server.stop().await;
        if let Err(e) = session.pump.await {
            tracing::error!(error = %e, "Frame pump task failed");
        }

        *self.state.lock() = ProducerState::Idle;

        tracing::info!("Stream stopped");
        self.emit(ProducerEvent::Status("Stream stopped".to_string()));
        true
    }

    /// Drain the frame queue into the broadcast server
    async fn pump(
        self: Arc<Self>,
        server: Arc<BroadcastServer>,
        mut frames: mpsc::Receiver<MediaFrame>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let frame = tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                frame = frames.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };

            self.send_frame(&server, frame).await;
        }

        tracing::debug!("Frame pump exited");
    }

    async fn send_frame(&self, server: &BroadcastServer, frame: MediaFrame) {
        let kind = frame.kind();
        let payload_len = frame.len();
        let started = Instant::now();

        let report = match server.broadcast(kind, frame.data).await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(kind = %kind, error = %e, "Broadcast failed");
                self.emit(ProducerEvent::Error(format!("Broadcast failed: {}", e)));
                return;
            }
        };
        let elapsed = started.elapsed();

        let counters = &self.counters;
        match kind {
            PacketKind::Video => counters.video_frames.fetch_add(1, Ordering::Relaxed),
            PacketKind::Audio => counters.audio_chunks.fetch_add(1, Ordering::Relaxed),
            PacketKind::Control => 0,
        };
        counters
            .bytes_sent
            .fetch_add((report.bytes * report.delivered) as u64, Ordering::Relaxed);
        counters
            .failed_writes
            .fetch_add(report.failed as u64, Ordering::Relaxed);

        if kind != PacketKind::Video {
            return;
        }
        self.window.lock().record(elapsed);

        // Only a real transfer says anything about the network
        let millis = elapsed.as_millis() as u64;
        if report.delivered == 0 || millis == 0 {
            return;
        }

        let before = self.bitrate.current_index();
        let bitrate = self.bitrate.report_transmission(millis, payload_len);
        if self.bitrate.current_index() != before {
            let quality = self.bitrate.current_quality();
            tracing::info!(bitrate = bitrate, quality = quality, "Bitrate adjusted");
            self.emit(ProducerEvent::BitrateChanged { bitrate, quality });
        }
    }

    /// Turn server notifications into producer events
    async fn monitor(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<ServerEvent>,
        generation: u64,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                ServerEvent::Listening(_) => {}
                ServerEvent::ClientConnected { viewers, .. } => {
                    self.emit(ProducerEvent::Status(format!(
                        "New viewer connected. Total viewers: {}",
                        viewers
                    )));
                }
                ServerEvent::ClientDisconnected {
                    id,
                    viewers,
                    reason,
                } => {
                    if let Some(reason) = reason {
                        self.emit(ProducerEvent::Error(format!(
                            "Viewer {} dropped: {}",
                            id, reason
                        )));
                    }
                    self.emit(ProducerEvent::Status(format!(
                        "Viewer disconnected. Total viewers: {}",
                        viewers
                    )));
                }
                ServerEvent::ClientRejected { peer_addr } => {
                    self.emit(ProducerEvent::Error(format!(
                        "Viewer {} rejected: connection limit reached",
                        peer_addr
                    )));
                }
                ServerEvent::ListenerFailed(reason) => {
                    self.emit(ProducerEvent::Error(format!("Listener failed: {}", reason)));
                    self.shutdown(Some(generation)).await;
                }
            }
        }
    }
}

impl std::fmt::Debug for StreamProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamProducer")
            .field("state", &self.state())
            .field("local_addr", &self.local_addr())
            .field("muted", &self.is_muted())
            .finish()
    }
}
