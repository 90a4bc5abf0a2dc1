//! Adaptive bitrate
//!
//! A hysteresis band over an ascending ladder of bitrates. Each measured
//! transfer moves the current rung by at most one step, so a single outlier
//! cannot swing the encoder quality across the whole ladder.
//!
//! The result is advisory: the capture side reads [`AdaptiveBitrate::current_quality`]
//! and decides when to adopt it.

pub mod config;
pub mod controller;

pub use config::BitrateConfig;
pub use controller::AdaptiveBitrate;
