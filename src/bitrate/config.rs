//! Bitrate ladder configuration

use crate::error::{Error, Result};
use crate::protocol::constants::{DEFAULT_BITRATE_INDEX, DEFAULT_BITRATE_LADDER};

/// Ladder of candidate bitrates and the starting rung
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitrateConfig {
    /// Candidate bitrates in bits per second, strictly ascending
    pub ladder: Vec<u32>,

    /// Index of the starting rung
    pub initial_index: usize,
}

impl Default for BitrateConfig {
    fn default() -> Self {
        Self {
            ladder: DEFAULT_BITRATE_LADDER.to_vec(),
            initial_index: DEFAULT_BITRATE_INDEX,
        }
    }
}

impl BitrateConfig {
    /// Create a config starting at the middle of `ladder`
    pub fn with_ladder(ladder: Vec<u32>) -> Self {
        let initial_index = ladder.len().saturating_sub(1) / 2;
        Self {
            ladder,
            initial_index,
        }
    }

    /// Set the starting rung
    pub fn initial_index(mut self, index: usize) -> Self {
        self.initial_index = index;
        self
    }

    /// Reject empty or non-ascending ladders and out-of-range start rungs
    pub fn validate(&self) -> Result<()> {
        if self.ladder.is_empty() {
            return Err(Error::InvalidConfig("bitrate ladder is empty".into()));
        }
        if self.ladder.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::InvalidConfig(
                "bitrate ladder must be strictly ascending".into(),
            ));
        }
        if self.initial_index >= self.ladder.len() {
            return Err(Error::InvalidConfig(format!(
                "initial bitrate index {} outside ladder of {}",
                self.initial_index,
                self.ladder.len()
            )));
        }
        Ok(())
    }
}
