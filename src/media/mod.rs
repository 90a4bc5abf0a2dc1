//! Media handed to and from the capture/playback side
//!
//! This module provides:
//! - The opaque frame envelope the producer broadcasts
//! - PCM level metering for audio level notifications

pub mod audio;
pub mod frame;

pub use audio::{pcm_level, silence_like, PRODUCER_LEVEL_GAIN};
pub use frame::{FrameInfo, MediaFrame};
