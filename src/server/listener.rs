//! Broadcast server
//!
//! Handles the TCP accept loop, keeps the registry of connected viewers and
//! fans each packet out to all of them.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use crate::buffer::BufferPool;
use crate::error::{Error, ProtocolError, Result};
use crate::protocol::{Packet, PacketKind, SequenceCounters, HEADER_SIZE};
use crate::registry::ClientRegistry;
use crate::server::config::ServerConfig;
use crate::transport::{Connection, ConnectionId};

/// Notifications from the broadcast server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// The listener is bound
    Listening(SocketAddr),

    /// A viewer was accepted and registered
    ClientConnected {
        id: ConnectionId,
        peer_addr: Option<SocketAddr>,
        viewers: usize,
    },

    /// A viewer was removed from the registry and closed
    ClientDisconnected {
        id: ConnectionId,
        viewers: usize,
        reason: Option<String>,
    },

    /// A viewer was turned away because the connection limit was reached
    ClientRejected { peer_addr: SocketAddr },

    /// The accept loop failed; the server no longer accepts viewers
    ListenerFailed(String),
}

/// Outcome of one broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Packet kind
    pub kind: PacketKind,
    /// Sequence number assigned to the packet
    pub sequence: u32,
    /// Encoded packet size (header + payload)
    pub bytes: usize,
    /// Viewers that received the whole packet
    pub delivered: usize,
    /// Viewers whose write failed and were removed
    pub failed: usize,
}

/// Fan-out server for one streaming session
///
/// Owns its sequence counters, so independent servers never share a
/// sequence space.
pub struct BroadcastServer {
    config: ServerConfig,
    registry: Arc<ClientRegistry>,
    sequences: SequenceCounters,
    pool: BufferPool,
    next_connection_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
    broadcast_lock: tokio::sync::Mutex<()>,
    shutdown: watch::Sender<bool>,
    accept_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    local_addr: parking_lot::Mutex<Option<SocketAddr>>,
    stopped: AtomicBool,
    events: mpsc::UnboundedSender<ServerEvent>,
}

impl BroadcastServer {
    /// Create a server. Returns the server and a receiver for its events.
    pub fn new(config: ServerConfig) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);

        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        let server = Self {
            pool: BufferPool::new(config.pool_buffer_size, config.pool_capacity),
            config,
            registry: Arc::new(ClientRegistry::new()),
            sequences: SequenceCounters::new(),
            next_connection_id: AtomicU64::new(1),
            connection_semaphore,
            broadcast_lock: tokio::sync::Mutex::new(()),
            shutdown,
            accept_task: parking_lot::Mutex::new(None),
            local_addr: parking_lot::Mutex::new(None),
            stopped: AtomicBool::new(false),
            events,
        };

        (Arc::new(server), rx)
    }

    /// Bind the listener and spawn the accept loop.
    ///
    /// Returns the bound address. Calling it again while running returns the
    /// same address without binding a second listener.
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(Error::NotStreaming);
        }
        if let Some(addr) = *self.local_addr.lock() {
            return Ok(addr);
        }

        let bind_addr = self.config.bind_addr;
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|source| Error::Bind {
                addr: bind_addr,
                source,
            })?;
        let local_addr = listener.local_addr()?;

        {
            let mut slot = self.local_addr.lock();
            if let Some(addr) = *slot {
                // Lost a race with a concurrent start; drop our listener
                return Ok(addr);
            }
            *slot = Some(local_addr);
        }

        tracing::info!(addr = %local_addr, "Broadcast server listening");
        let _ = self.events.send(ServerEvent::Listening(local_addr));

        let server = Arc::clone(self);
        let handle = tokio::spawn(async move { server.accept_loop(listener).await });
        *self.accept_task.lock() = Some(handle);

        Ok(local_addr)
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer_addr)) => self.handle_connection(socket, peer_addr),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to accept connection");
                        let _ = self.events.send(ServerEvent::ListenerFailed(
                            Error::Accept(e).to_string(),
                        ));
                        break;
                    }
                },
            }
        }

        tracing::debug!("Accept loop exited");
    }

    fn handle_connection(self: &Arc<Self>, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    let _ = self.events.send(ServerEvent::ClientRejected { peer_addr });
                    return;
                }
            }
        } else {
            None
        };

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::error!(peer = %peer_addr, error = %e, "Failed to configure socket");
                return;
            }
        }

        let id = self.allocate_id();
        let connection = Connection::from_tcp(id, socket, self.config.connection_options());

        if let Err(e) = self.register(connection, permit) {
            tracing::debug!(connection_id = %id, error = %e, "Connection dropped during shutdown");
        }
    }

    /// Allocate a connection id unique to this server
    pub fn allocate_id(&self) -> ConnectionId {
        ConnectionId(self.next_connection_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register an already-established connection as a viewer.
    ///
    /// Used by the accept loop, and usable directly for transports other than
    /// TCP. The connection is opened if it is still `Connecting`.
    pub fn attach(self: &Arc<Self>, connection: Connection) -> Result<ConnectionId> {
        self.register(connection, None)
    }

    fn register(
        self: &Arc<Self>,
        connection: Connection,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Result<ConnectionId> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(Error::NotStreaming);
        }

        connection.open();
        let id = connection.id();
        let peer_addr = connection.peer_addr();
        let connection = Arc::new(connection);

        if !self.registry.insert(Arc::clone(&connection)) {
            return Err(Error::InvalidConfig(format!("duplicate connection id {}", id)));
        }

        // Stop may have drained the registry between the check and the insert
        if self.stopped.load(Ordering::Acquire) {
            self.registry.remove(id);
            return Err(Error::NotStreaming);
        }

        let viewers = self.registry.len();
        tracing::info!(connection_id = %id, peer = ?peer_addr, viewers = viewers, "Viewer connected");
        let _ = self.events.send(ServerEvent::ClientConnected {
            id,
            peer_addr,
            viewers,
        });

        let server = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = permit;
            let reason = server.watch_client(&connection).await;
            server.drop_client(&connection, reason.as_ref()).await;
        });

        Ok(id)
    }

    /// Read from a viewer until it goes away. Viewers only send control
    /// packets, which are logged and ignored; the read mainly detects close.
    async fn watch_client(&self, connection: &Connection) -> Option<Error> {
        loop {
            match connection.read_packet().await {
                Ok(packet) => {
                    tracing::trace!(
                        connection_id = %connection.id(),
                        kind = %packet.kind,
                        sequence = packet.sequence,
                        "Ignoring packet from viewer"
                    );
                }
                Err(Error::Cancelled)
                | Err(Error::ConnectionClosed)
                | Err(Error::Protocol(ProtocolError::EndOfStream)) => return None,
                Err(e) if !e.is_fatal_for_connection() => {
                    tracing::warn!(connection_id = %connection.id(), error = %e, "Skipping viewer packet");
                }
                Err(e) => return Some(e),
            }
        }
    }

    /// Remove a viewer and close it. Only the caller that removed it from the
    /// registry reports the disconnect.
    async fn drop_client(&self, connection: &Arc<Connection>, reason: Option<&Error>) {
        let removed = self.registry.remove(connection.id()).is_some();
        connection.close().await;

        if !removed {
            return;
        }

        let viewers = self.registry.len();
        match reason {
            Some(e) => tracing::warn!(
                connection_id = %connection.id(),
                error = %e,
                viewers = viewers,
                "Viewer dropped"
            ),
            None => tracing::info!(
                connection_id = %connection.id(),
                viewers = viewers,
                "Viewer disconnected"
            ),
        }

        let _ = self.events.send(ServerEvent::ClientDisconnected {
            id: connection.id(),
            viewers,
            reason: reason.map(|e| e.to_string()),
        });
    }

    /// Send one packet to every registered viewer.
    ///
    /// Assigns the next sequence number for `kind`, encodes once, and writes
    /// the same bytes to a snapshot of the registry. Writes run concurrently;
    /// a viewer whose write fails or times out is removed and closed without
    /// affecting the others. Broadcasts are serialized so every viewer sees
    /// each kind's sequence numbers in assignment order.
    pub async fn broadcast(&self, kind: PacketKind, payload: Bytes) -> Result<BroadcastReport> {
        let _guard = self.broadcast_lock.lock().await;

        if self.stopped.load(Ordering::Acquire) {
            return Err(Error::NotStreaming);
        }

        let mut packet = Packet::new(kind, 0, payload)?;
        packet.sequence = self.sequences.next(kind);

        let encoded_len = HEADER_SIZE + packet.payload.len();
        let mut buf = if encoded_len <= self.pool.buffer_size() {
            self.pool.rent()
        } else {
            Vec::with_capacity(encoded_len)
        };
        packet.encode_into(&mut buf);
        let frame = Arc::new(buf);

        let mut report = BroadcastReport {
            kind,
            sequence: packet.sequence,
            bytes: frame.len(),
            delivered: 0,
            failed: 0,
        };

        let mut writes = JoinSet::new();
        for connection in self.registry.snapshot() {
            let frame = Arc::clone(&frame);
            writes.spawn(async move {
                let result = connection.write_fully(&frame[..]).await;
                (connection, result)
            });
        }

        while let Some(joined) = writes.join_next().await {
            match joined {
                Ok((_, Ok(()))) => report.delivered += 1,
                Ok((connection, Err(e))) => {
                    report.failed += 1;
                    let reason = match e {
                        Error::Cancelled | Error::ConnectionClosed => None,
                        e => Some(e),
                    };
                    self.drop_client(&connection, reason.as_ref()).await;
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(error = %e, "Viewer write task failed");
                }
            }
        }

        if let Ok(buf) = Arc::try_unwrap(frame) {
            self.pool.release(buf);
        }

        tracing::trace!(
            kind = %kind,
            sequence = report.sequence,
            bytes = report.bytes,
            delivered = report.delivered,
            failed = report.failed,
            "Broadcast"
        );

        Ok(report)
    }

    /// Stop accepting, close every viewer and release the listener.
    ///
    /// Pending viewer writes are cancelled and an in-flight broadcast is
    /// awaited. Idempotent.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        self.shutdown.send_replace(true);

        let accept_task = self.accept_task.lock().take();
        if let Some(handle) = accept_task {
            let _ = handle.await;
        }

        // Unblock a broadcast stuck on a slow viewer before waiting for it
        for connection in self.registry.snapshot() {
            connection.begin_close();
        }
        let _guard = self.broadcast_lock.lock().await;

        let clients = self.registry.drain();
        let mut remaining = clients.len();
        for connection in clients {
            connection.close().await;
            remaining -= 1;
            let _ = self.events.send(ServerEvent::ClientDisconnected {
                id: connection.id(),
                viewers: remaining,
                reason: None,
            });
        }

        tracing::info!(addr = ?*self.local_addr.lock(), "Broadcast server stopped");
    }

    /// Whether the server has been started and not yet stopped
    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::Acquire) && self.local_addr.lock().is_some()
    }

    /// Bound address, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Number of registered viewers
    pub fn viewer_count(&self) -> usize {
        self.registry.len()
    }

    /// The viewer registry
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Last sequence number assigned for `kind`
    pub fn last_sequence(&self, kind: PacketKind) -> u32 {
        self.sequences.last(kind)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    #[cfg(test)]
    pub(crate) fn notify(&self, event: ServerEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{duplex, DuplexStream};

    use super::*;
    use crate::protocol::read_packet;
    use crate::transport::ConnectionOptions;

    fn local_config() -> ServerConfig {
        ServerConfig::with_addr("127.0.0.1:0".parse().unwrap())
    }

    fn attach_viewer(server: &Arc<BroadcastServer>) -> (ConnectionId, DuplexStream) {
        let (ours, theirs) = duplex(1024 * 1024);
        let conn = Connection::from_stream(
            server.allocate_id(),
            ours,
            None,
            ConnectionOptions::default(),
        );
        let id = server.attach(conn).unwrap();
        (id, theirs)
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_viewers() {
        let (server, _events) = BroadcastServer::new(local_config());
        let mut peers: Vec<_> = (0..3).map(|_| attach_viewer(&server)).collect();

        let report = server
            .broadcast(PacketKind::Video, Bytes::from_static(b"frame-1"))
            .await
            .unwrap();

        assert_eq!(report.sequence, 1);
        assert_eq!(report.delivered, 3);
        assert_eq!(report.failed, 0);
        assert_eq!(report.bytes, 9 + 7);

        for (_, peer) in peers.iter_mut() {
            let packet = read_packet(peer).await.unwrap();
            assert_eq!(packet.kind, PacketKind::Video);
            assert_eq!(packet.sequence, 1);
            assert_eq!(&packet.payload[..], b"frame-1");
        }
    }

    #[tokio::test]
    async fn test_failed_viewer_is_isolated() {
        let (server, mut events) = BroadcastServer::new(local_config());
        let mut peers: Vec<_> = (0..4).map(|_| attach_viewer(&server)).collect();

        let (failed_id, failed_peer) = peers.remove(2);
        drop(failed_peer);

        server
            .broadcast(PacketKind::Audio, Bytes::from_static(&[1, 2, 3, 4]))
            .await
            .unwrap();

        assert_eq!(server.viewer_count(), 3);
        assert!(!server.registry().contains(failed_id));

        for (id, peer) in peers.iter_mut() {
            assert!(server.registry().contains(*id));
            let packet = read_packet(peer).await.unwrap();
            assert_eq!(&packet.payload[..], &[1, 2, 3, 4]);
        }

        // The liveness task may be the one reporting it, so wait for the event
        let disconnected = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(ServerEvent::ClientDisconnected { id, .. }) = events.recv().await {
                    return id;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(disconnected, failed_id);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let extra = std::iter::from_fn(|| events.try_recv().ok())
            .filter(|e| matches!(e, ServerEvent::ClientDisconnected { .. }))
            .count();
        assert_eq!(extra, 0);
    }

    #[tokio::test]
    async fn test_slow_viewer_is_dropped_after_write_timeout() {
        let (server, _events) = BroadcastServer::new(local_config());
        let (healthy_id, mut healthy) = attach_viewer(&server);

        // Never read, so the write stalls once the pipe fills
        let (ours, _stalled) = duplex(16);
        let options = ConnectionOptions {
            write_timeout: Some(Duration::from_millis(100)),
            ..ConnectionOptions::default()
        };
        let slow_id = server
            .attach(Connection::from_stream(server.allocate_id(), ours, None, options))
            .unwrap();

        let payload = Bytes::from(vec![7u8; 4096]);
        let report = tokio::time::timeout(
            Duration::from_secs(5),
            server.broadcast(PacketKind::Video, payload.clone()),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert!(!server.registry().contains(slow_id));
        assert!(server.registry().contains(healthy_id));

        let packet = read_packet(&mut healthy).await.unwrap();
        assert_eq!(packet.payload, payload);
    }

    #[tokio::test]
    async fn test_large_frames_reuse_pooled_buffer() {
        let (server, _events) = BroadcastServer::new(local_config());
        let (_, mut peer) = attach_viewer(&server);

        for i in 0..5u8 {
            server
                .broadcast(PacketKind::Video, Bytes::from(vec![i; 20_000]))
                .await
                .unwrap();
            assert_eq!(server.pool.available(), 1);
            assert_eq!(read_packet(&mut peer).await.unwrap().payload.len(), 20_000);
        }
    }

    #[tokio::test]
    async fn test_oversize_frame_bypasses_pool() {
        let (server, _events) =
            BroadcastServer::new(local_config().pool_buffer_size(HEADER_SIZE + 1024));
        let (_, mut peer) = attach_viewer(&server);

        server
            .broadcast(PacketKind::Video, Bytes::from(vec![1u8; 512]))
            .await
            .unwrap();
        server
            .broadcast(PacketKind::Video, Bytes::from(vec![2u8; 4096]))
            .await
            .unwrap();

        // Only the pooled buffer comes back
        assert_eq!(server.pool.available(), 1);
        assert_eq!(read_packet(&mut peer).await.unwrap().payload.len(), 512);
        assert_eq!(read_packet(&mut peer).await.unwrap().payload.len(), 4096);
    }

    #[tokio::test]
    async fn test_sequences_are_per_kind_and_increasing() {
        let (server, _events) = BroadcastServer::new(local_config());
        let (_, mut peer) = attach_viewer(&server);

        for _ in 0..5 {
            server.broadcast(PacketKind::Video, Bytes::from_static(b"v")).await.unwrap();
        }
        server.broadcast(PacketKind::Audio, Bytes::from_static(b"a")).await.unwrap();

        let mut last_video = 0;
        for _ in 0..5 {
            let packet = read_packet(&mut peer).await.unwrap();
            assert!(packet.sequence > last_video);
            last_video = packet.sequence;
        }
        let audio = read_packet(&mut peer).await.unwrap();
        assert_eq!(audio.kind, PacketKind::Audio);
        assert_eq!(audio.sequence, 1);
        assert_eq!(server.last_sequence(PacketKind::Video), 5);
    }

    #[tokio::test]
    async fn test_empty_payload_rejected_without_consuming_sequence() {
        let (server, _events) = BroadcastServer::new(local_config());

        let result = server.broadcast(PacketKind::Video, Bytes::new()).await;
        assert!(matches!(result, Err(Error::Protocol(ProtocolError::InvalidFraming { .. }))));
        assert_eq!(server.last_sequence(PacketKind::Video), 0);
    }

    #[tokio::test]
    async fn test_peer_close_removes_viewer() {
        let (server, _events) = BroadcastServer::new(local_config());
        let (id, peer) = attach_viewer(&server);

        drop(peer);

        tokio::time::timeout(Duration::from_secs(2), async {
            while server.registry().contains(id) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (server, mut events) = BroadcastServer::new(local_config());
        server.start().await.unwrap();
        let (_, _peer) = attach_viewer(&server);

        server.stop().await;
        server.stop().await;

        assert!(!server.is_running());
        assert_eq!(server.viewer_count(), 0);

        let disconnects = std::iter::from_fn(|| events.try_recv().ok())
            .filter(|e| matches!(e, ServerEvent::ClientDisconnected { .. }))
            .count();
        assert_eq!(disconnects, 1);

        let result = server.broadcast(PacketKind::Video, Bytes::from_static(b"x")).await;
        assert!(matches!(result, Err(Error::NotStreaming)));
    }

    #[tokio::test]
    async fn test_start_twice_keeps_one_listener() {
        let (server, _events) = BroadcastServer::new(local_config());

        let first = server.start().await.unwrap();
        let second = server.start().await.unwrap();

        assert_eq!(first, second);
        assert!(server.is_running());
        server.stop().await;
    }

    #[tokio::test]
    async fn test_bind_failure() {
        let (first, _events) = BroadcastServer::new(local_config());
        let addr = first.start().await.unwrap();

        let (second, _events) = BroadcastServer::new(ServerConfig::with_addr(addr));
        let result = second.start().await;

        assert!(matches!(result, Err(Error::Bind { .. })));
        first.stop().await;
    }

    #[tokio::test]
    async fn test_accepts_tcp_viewer() {
        let (server, mut events) = BroadcastServer::new(local_config());
        let addr = server.start().await.unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();

        loop {
            match events.recv().await.unwrap() {
                ServerEvent::ClientConnected { viewers, .. } => {
                    assert_eq!(viewers, 1);
                    break;
                }
                _ => continue,
            }
        }

        server
            .broadcast(PacketKind::Control, Bytes::from_static(b"hello"))
            .await
            .unwrap();
        let packet = read_packet(&mut client).await.unwrap();
        assert_eq!(packet.kind, PacketKind::Control);

        server.stop().await;
        let eof = read_packet(&mut client).await;
        assert!(matches!(eof, Err(Error::Protocol(ProtocolError::EndOfStream))));
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let (server, mut events) = BroadcastServer::new(local_config().max_connections(1));
        let addr = server.start().await.unwrap();

        let _first = TcpStream::connect(addr).await.unwrap();
        let _second = TcpStream::connect(addr).await.unwrap();

        let mut connected = 0;
        let mut rejected = 0;
        while connected + rejected < 2 {
            match events.recv().await.unwrap() {
                ServerEvent::ClientConnected { .. } => connected += 1,
                ServerEvent::ClientRejected { .. } => rejected += 1,
                _ => {}
            }
        }

        assert_eq!((connected, rejected), (1, 1));
        assert_eq!(server.viewer_count(), 1);
        server.stop().await;
    }
}
