//! Duplex byte-stream connection
//!
//! Wraps one socket (or any `AsyncRead + AsyncWrite` pair) with whole-buffer
//! reads, whole-buffer writes and a cancellation signal. Every blocking
//! operation races against that signal; once it fires the connection is
//! `Closing` and in-flight reads discard whatever they had buffered.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{watch, Mutex};

use super::state::{ConnectionPhase, ConnectionState};
use crate::error::{Error, Result};
use crate::protocol::codec::{read_full, read_packet};
use crate::protocol::constants::DEFAULT_BUFFER_SIZE;
use crate::protocol::Packet;

/// Upper bound on flushing buffered bytes while closing
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Opaque per-connection handle, never reused within one allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Buffering and timeout settings for one connection
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Application-level read buffer size
    pub read_buffer_size: usize,

    /// Application-level write buffer size
    pub write_buffer_size: usize,

    /// Deadline for a single whole-buffer read (None = wait forever)
    pub read_timeout: Option<Duration>,

    /// Deadline for a single whole-buffer write (None = wait forever)
    pub write_timeout: Option<Duration>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_BUFFER_SIZE,
            write_buffer_size: DEFAULT_BUFFER_SIZE,
            read_timeout: None,
            write_timeout: Some(Duration::from_secs(5)),
        }
    }
}

/// One accepted or outbound connection
pub struct Connection {
    id: ConnectionId,
    state: parking_lot::Mutex<ConnectionState>,
    reader: Mutex<Option<BufReader<BoxedReader>>>,
    writer: Mutex<Option<BufWriter<BoxedWriter>>>,
    cancel: watch::Sender<bool>,
    released: AtomicBool,
    options: ConnectionOptions,
}

impl Connection {
    /// Wrap a reader/writer pair. The connection starts in `Connecting`.
    pub fn new<R, W>(
        id: ConnectionId,
        reader: R,
        writer: W,
        peer_addr: Option<SocketAddr>,
        options: ConnectionOptions,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (cancel, _) = watch::channel(false);
        let reader: BoxedReader = Box::new(reader);
        let writer: BoxedWriter = Box::new(writer);

        Self {
            id,
            state: parking_lot::Mutex::new(ConnectionState::new(peer_addr)),
            reader: Mutex::new(Some(BufReader::with_capacity(
                options.read_buffer_size,
                reader,
            ))),
            writer: Mutex::new(Some(BufWriter::with_capacity(
                options.write_buffer_size,
                writer,
            ))),
            cancel,
            released: AtomicBool::new(false),
            options,
        }
    }

    /// Wrap a single duplex stream
    pub fn from_stream<S>(
        id: ConnectionId,
        stream: S,
        peer_addr: Option<SocketAddr>,
        options: ConnectionOptions,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(id, reader, writer, peer_addr, options)
    }

    /// Wrap an accepted or connected TCP stream
    pub fn from_tcp(id: ConnectionId, stream: TcpStream, options: ConnectionOptions) -> Self {
        let peer_addr = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();
        Self::new(id, reader, writer, peer_addr, options)
    }

    /// Open an outbound TCP connection and move it to `Open`
    pub async fn connect<A: ToSocketAddrs>(
        id: ConnectionId,
        addr: A,
        connect_timeout: Duration,
        tcp_nodelay: bool,
        options: ConnectionOptions,
    ) -> Result<Self> {
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::Timeout)??;

        if tcp_nodelay {
            stream.set_nodelay(true)?;
        }

        let connection = Self::from_tcp(id, stream, options);
        connection.open();
        Ok(connection)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.state.lock().peer_addr
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.state.lock().phase
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().is_open()
    }

    pub fn bytes_sent(&self) -> u64 {
        self.state.lock().bytes_sent
    }

    pub fn bytes_received(&self) -> u64 {
        self.state.lock().bytes_received
    }

    /// Time since the connection opened
    pub fn uptime(&self) -> Duration {
        self.state.lock().uptime()
    }

    /// `Connecting → Open`
    pub fn open(&self) -> bool {
        self.state.lock().open()
    }

    /// Fill `buf` completely.
    ///
    /// Returns the number of bytes read; fewer than `buf.len()` means the peer
    /// closed, and the connection moves to `Closing`.
    pub async fn read_fully(&self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_open()?;

        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(Error::ConnectionClosed)?;

        let result = tokio::select! {
            biased;
            _ = self.cancelled() => Err(Error::Cancelled),
            res = with_deadline(self.options.read_timeout, read_full(reader, buf)) => res,
        };

        match result {
            Ok(n) => {
                if n < buf.len() {
                    self.begin_close();
                }
                self.state.lock().bytes_received += n as u64;
                Ok(n)
            }
            Err(e) => {
                self.begin_close();
                Err(e)
            }
        }
    }

    /// Read and decode one packet.
    ///
    /// Framing and transport failures move the connection to `Closing`. An
    /// unknown packet kind does not, since the stream is still aligned.
    pub async fn read_packet(&self) -> Result<Packet> {
        self.ensure_open()?;

        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(Error::ConnectionClosed)?;

        let result = tokio::select! {
            biased;
            _ = self.cancelled() => Err(Error::Cancelled),
            res = read_packet_with_deadline(self.options.read_timeout, reader) => res,
        };

        match result {
            Ok(packet) => {
                self.state.lock().on_received(packet.encoded_len());
                Ok(packet)
            }
            Err(e) => {
                if e.is_fatal_for_connection() {
                    self.begin_close();
                }
                Err(e)
            }
        }
    }

    /// Write all of `bytes` and flush.
    ///
    /// Partial writes are retried internally. Failure moves the connection to
    /// `Closing`.
    pub async fn write_fully(&self, bytes: &[u8]) -> Result<()> {
        self.ensure_open()?;

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(Error::ConnectionClosed)?;

        let result = tokio::select! {
            biased;
            _ = self.cancelled() => Err(Error::Cancelled),
            res = with_deadline(self.options.write_timeout, async {
                writer.write_all(bytes).await?;
                writer.flush().await
            }) => res,
        };

        match result {
            Ok(()) => {
                self.state.lock().on_sent(bytes.len());
                Ok(())
            }
            Err(e) => {
                self.begin_close();
                Err(e)
            }
        }
    }

    /// Encode and write one packet
    pub async fn write_packet(&self, packet: &Packet) -> Result<()> {
        self.write_fully(&packet.encode()).await
    }

    /// Move to `Closing` and fire the cancellation signal.
    ///
    /// Returns false if the connection was already closing or closed.
    pub fn begin_close(&self) -> bool {
        let began = self.state.lock().begin_close();
        if began {
            tracing::debug!(connection_id = %self.id, "Connection closing");
        }
        self.cancel.send_replace(true);
        began
    }

    /// Close the connection and release the socket.
    ///
    /// Returns true for the single call that released the socket; every other
    /// call (concurrent or repeated) is a no-op returning false.
    pub async fn close(&self) -> bool {
        self.begin_close();

        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }

        if let Some(mut writer) = self.writer.lock().await.take() {
            // Best effort: the peer may already be gone
            let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, writer.shutdown()).await;
        }
        self.reader.lock().await.take();

        let (bytes_sent, bytes_received) = {
            let mut state = self.state.lock();
            state.finish_close();
            (state.bytes_sent, state.bytes_received)
        };

        tracing::debug!(
            connection_id = %self.id,
            bytes_sent = bytes_sent,
            bytes_received = bytes_received,
            "Connection closed"
        );

        true
    }

    fn ensure_open(&self) -> Result<()> {
        match self.phase() {
            ConnectionPhase::Open => Ok(()),
            _ => Err(Error::ConnectionClosed),
        }
    }

    async fn cancelled(&self) {
        let mut rx = self.cancel.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &state.peer_addr)
            .field("phase", &state.phase)
            .finish()
    }
}

async fn with_deadline<T, F>(limit: Option<Duration>, fut: F) -> Result<T>
where
    F: std::future::Future<Output = std::io::Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(Error::from),
        None => fut.await.map_err(Error::from),
    }
}

async fn read_packet_with_deadline<R>(limit: Option<Duration>, reader: &mut R) -> Result<Packet>
where
    R: AsyncRead + Unpin + ?Sized,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, read_packet(reader))
            .await
            .map_err(|_| Error::Timeout)?,
        None => read_packet(reader).await,
    }
}
