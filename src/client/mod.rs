//! Consumer side
//!
//! [`StreamViewer`] connects to a producer and turns the packet stream into
//! frame, audio and status events.

pub mod config;
pub mod viewer;

pub use config::ClientConfig;
pub use viewer::{StreamViewer, ViewerEvent};
