//! Server configuration

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::bitrate::BitrateConfig;
use crate::media::PRODUCER_LEVEL_GAIN;
use crate::protocol::constants::*;
use crate::transport::ConnectionOptions;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent viewers (0 = unlimited)
    pub max_connections: usize,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Application-level read buffer size per viewer
    pub read_buffer_size: usize,

    /// Application-level write buffer size per viewer
    pub write_buffer_size: usize,

    /// Socket timeout for one packet write; a viewer that exceeds it is dropped
    pub write_timeout: Duration,

    /// Frames queued between capture and broadcast before new ones are dropped
    pub frame_queue_capacity: usize,

    /// Idle encode buffers kept for reuse
    pub pool_capacity: usize,

    /// Capacity of each pooled encode buffer. Larger packets are encoded
    /// into a one-off allocation.
    pub pool_buffer_size: usize,

    /// Capacity of the producer event channel
    pub event_capacity: usize,

    /// Multiplier applied to microphone level readings
    pub audio_level_gain: f32,

    /// Bitrate ladder
    pub bitrate: BitrateConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            max_connections: 100,
            tcp_nodelay: true, // Important for low latency
            read_buffer_size: DEFAULT_BUFFER_SIZE,
            write_buffer_size: DEFAULT_BUFFER_SIZE,
            write_timeout: Duration::from_secs(5),
            frame_queue_capacity: 8,
            pool_capacity: 100,
            pool_buffer_size: DEFAULT_POOL_BUFFER_SIZE,
            event_capacity: 256,
            audio_level_gain: PRODUCER_LEVEL_GAIN,
            bitrate: BitrateConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the listen port, keeping the host
    pub fn port(mut self, port: u16) -> Self {
        self.bind_addr.set_port(port);
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the per-viewer write timeout
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set read and write buffer sizes
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self.write_buffer_size = size;
        self
    }

    /// Set the capture queue capacity (minimum 1)
    pub fn frame_queue_capacity(mut self, capacity: usize) -> Self {
        self.frame_queue_capacity = capacity.max(1);
        self
    }

    /// Set the pooled encode buffer capacity (at least one header)
    pub fn pool_buffer_size(mut self, size: usize) -> Self {
        self.pool_buffer_size = size.max(HEADER_SIZE);
        self
    }

    /// Set the bitrate ladder
    pub fn bitrate(mut self, bitrate: BitrateConfig) -> Self {
        self.bitrate = bitrate;
        self
    }

    /// Per-connection options derived from this config
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            read_buffer_size: self.read_buffer_size,
            write_buffer_size: self.write_buffer_size,
            read_timeout: None,
            write_timeout: Some(self.write_timeout),
        }
    }
}
