//! Connection state machine
//!
//! ```text
//! Connecting ──► Open ──► Closing ──► Closed
//!      │                     ▲
//!      └─────────────────────┘
//! ```
//!
//! `Open → Closing` happens on a stop request, a write failure, a zero-byte
//! read or a decode failure. `Closing → Closed` happens once, when the socket
//! is released.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Connection lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Created, not yet usable
    Connecting,
    /// Reads and writes allowed
    Open,
    /// Shutting down; I/O is refused
    Closing,
    /// Socket released (terminal)
    Closed,
}

/// Per-connection state and counters
#[derive(Debug)]
pub struct ConnectionState {
    /// Remote peer address, if the transport has one
    pub peer_addr: Option<SocketAddr>,

    /// Current phase
    pub phase: ConnectionPhase,

    /// Creation time
    pub created_at: Instant,

    /// Time the connection became open
    pub opened_at: Option<Instant>,

    /// Bytes written
    pub bytes_sent: u64,

    /// Bytes read
    pub bytes_received: u64,

    /// Packets written
    pub packets_sent: u64,

    /// Packets read
    pub packets_received: u64,
}

impl ConnectionState {
    pub fn new(peer_addr: Option<SocketAddr>) -> Self {
        Self {
            peer_addr,
            phase: ConnectionPhase::Connecting,
            created_at: Instant::now(),
            opened_at: None,
            bytes_sent: 0,
            bytes_received: 0,
            packets_sent: 0,
            packets_received: 0,
        }
    }

    /// `Connecting → Open`. Returns false from any other phase.
    pub fn open(&mut self) -> bool {
        if self.phase == ConnectionPhase::Connecting {
            self.phase = ConnectionPhase::Open;
            self.opened_at = Some(Instant::now());
            true
        } else {
            false
        }
    }

    /// Enter `Closing` from `Connecting` or `Open`.
    ///
    /// Returns false if already closing or closed.
    pub fn begin_close(&mut self) -> bool {
        match self.phase {
            ConnectionPhase::Connecting | ConnectionPhase::Open => {
                self.phase = ConnectionPhase::Closing;
                true
            }
            ConnectionPhase::Closing | ConnectionPhase::Closed => false,
        }
    }

    /// Enter the terminal `Closed` phase
    pub fn finish_close(&mut self) {
        self.phase = ConnectionPhase::Closed;
    }

    pub fn is_open(&self) -> bool {
        self.phase == ConnectionPhase::Open
    }

    /// Time since the connection opened
    pub fn uptime(&self) -> Duration {
        self.opened_at.map(|t| t.elapsed()).unwrap_or_default()
    }

    pub fn on_sent(&mut self, bytes: usize) {
        self.bytes_sent += bytes as u64;
        self.packets_sent += 1;
    }

    pub fn on_received(&mut self, bytes: usize) {
        self.bytes_received += bytes as u64;
        self.packets_received += 1;
    }
}
