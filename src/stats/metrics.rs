//! Statistics for producer and viewer sessions

use std::collections::VecDeque;
use std::time::Duration;

/// Number of transfers kept in a [`TransferWindow`]
pub const DEFAULT_WINDOW: usize = 100;

/// Rolling window of recent transfer durations
#[derive(Debug, Clone)]
pub struct TransferWindow {
    samples: VecDeque<Duration>,
    capacity: usize,
}

impl Default for TransferWindow {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_WINDOW)
    }
}

impl TransferWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a window keeping the last `capacity` samples
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Record one transfer, evicting the oldest past capacity
    pub fn record(&mut self, elapsed: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(elapsed);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Mean transfer time (zero when empty)
    pub fn average(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        self.samples.iter().sum::<Duration>() / self.samples.len() as u32
    }

    /// Frames per second sustainable at the mean transfer time (0 when unknown)
    pub fn frames_per_second(&self) -> f64 {
        let avg = self.average().as_secs_f64();
        if avg > 0.0 {
            1.0 / avg
        } else {
            0.0
        }
    }
}

/// Producer-side statistics
#[derive(Debug, Clone, Default)]
pub struct ProducerStats {
    /// Video frames broadcast
    pub video_frames: u64,
    /// Audio chunks broadcast
    pub audio_chunks: u64,
    /// Frames dropped because the queue was full
    pub dropped_frames: u64,
    /// Encoded bytes delivered, summed over viewers
    pub bytes_sent: u64,
    /// Failed client writes
    pub failed_writes: u64,
    /// Currently connected viewers
    pub viewers: usize,
    /// Current target bitrate (bits/sec)
    pub bitrate: u32,
    /// Current encoder quality hint (0..=100)
    pub quality: u8,
    /// Mean broadcast duration over the rolling window
    pub average_transfer: Duration,
    /// Video frames per second sustainable at `average_transfer` (0 when unknown)
    pub fps: f64,
}

/// Viewer-side statistics
#[derive(Debug, Clone, Default)]
pub struct ViewerStats {
    /// Video frames received
    pub video_frames: u64,
    /// Audio chunks received
    pub audio_chunks: u64,
    /// Control packets received
    pub control_packets: u64,
    /// Total bytes received (headers included)
    pub bytes_received: u64,
    /// Packets inferred missing from sequence gaps
    pub missing_packets: u64,
    /// Duplicate or out-of-order packets
    pub stale_packets: u64,
    /// Packets skipped for an unknown kind
    pub unknown_packets: u64,
}

impl ViewerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Packets received of any known kind
    pub fn total_packets(&self) -> u64 {
        self.video_frames + self.audio_chunks + self.control_packets
    }
}
