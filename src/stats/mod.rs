//! Statistics and rolling measurements

pub mod metrics;

pub use metrics::{ProducerStats, TransferWindow, ViewerStats};
