//! Viewer configuration

use std::time::Duration;

use crate::protocol::constants::DEFAULT_VIEWER_BUFFER_SIZE;
use crate::transport::ConnectionOptions;

/// Viewer configuration options
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Timeout for establishing the TCP connection
    pub connect_timeout: Duration,

    /// Read timeout for one packet (None = wait for the producer indefinitely)
    pub read_timeout: Option<Duration>,

    /// Application-level read buffer size
    pub read_buffer_size: usize,

    /// Enable TCP_NODELAY
    pub tcp_nodelay: bool,

    /// Capacity of the viewer event channel
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: None,
            read_buffer_size: DEFAULT_VIEWER_BUFFER_SIZE,
            tcp_nodelay: true,
            event_capacity: 256,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the per-packet read timeout
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Set the read buffer size
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    pub(crate) fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            read_buffer_size: self.read_buffer_size,
            read_timeout: self.read_timeout,
            ..Default::default()
        }
    }
}
