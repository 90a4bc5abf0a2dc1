//! Bitrate ladder controller

use parking_lot::Mutex;

use super::config::BitrateConfig;
use crate::error::Result;

/// Step down when throughput falls below this fraction of the current rung
const STEP_DOWN_RATIO: f64 = 0.8;

/// Step up when throughput exceeds this fraction of the current rung
const STEP_UP_RATIO: f64 = 1.2;

/// Adaptive bitrate controller
///
/// All reads and writes of the ladder index go through one lock, each held
/// for a single read-modify-write.
#[derive(Debug)]
pub struct AdaptiveBitrate {
    ladder: Vec<u32>,
    index: Mutex<usize>,
    initial_index: usize,
}

impl AdaptiveBitrate {
    /// Create a controller from a validated config
    pub fn new(config: &BitrateConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            ladder: config.ladder.clone(),
            index: Mutex::new(config.initial_index),
            initial_index: config.initial_index,
        })
    }

    /// Feed one measured transfer and get the bitrate for the next encode.
    ///
    /// Throughput is `payload_bytes * 8 * 1000 / elapsed_millis` bits per
    /// second. `elapsed_millis` must be non-zero; callers measure the actual
    /// write and skip the report otherwise.
    pub fn report_transmission(&self, elapsed_millis: u64, payload_bytes: usize) -> u32 {
        let throughput = payload_bytes as f64 * 8.0 * 1000.0 / elapsed_millis as f64;

        let mut index = self.index.lock();
        let rung = self.ladder[*index] as f64;

        if throughput < rung * STEP_DOWN_RATIO {
            if *index > 0 {
                *index -= 1;
            }
        } else if throughput > rung * STEP_UP_RATIO && *index < self.ladder.len() - 1 {
            *index += 1;
        }

        self.ladder[*index]
    }

    /// Current target bitrate in bits per second
    pub fn current_bitrate(&self) -> u32 {
        self.ladder[*self.index.lock()]
    }

    /// Current rung
    pub fn current_index(&self) -> usize {
        *self.index.lock()
    }

    /// Linear projection of the rung onto an encoder quality in `0..=100`
    pub fn current_quality(&self) -> u8 {
        let index = *self.index.lock();
        ((index + 1) * 100 / self.ladder.len()) as u8
    }

    /// The configured ladder
    pub fn ladder(&self) -> &[u32] {
        &self.ladder
    }

    /// Return to the starting rung
    pub fn reset(&self) {
        *self.index.lock() = self.initial_index;
    }
}
