//! Producer side
//!
//! - [`BroadcastServer`]: accept loop, viewer registry and fan-out
//! - [`StreamProducer`]: session lifecycle on top of the server, fed by the
//!   capture side through a bounded frame queue

pub mod config;
pub mod listener;
pub mod streamer;

pub use config::ServerConfig;
pub use listener::{BroadcastReport, BroadcastServer, ServerEvent};
pub use streamer::{ProducerEvent, ProducerState, StreamProducer};
