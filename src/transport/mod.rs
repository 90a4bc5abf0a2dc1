//! Connection transport
//!
//! A [`Connection`] owns one duplex byte stream for its whole lifetime and
//! releases it exactly once, whichever path (local stop, remote close, write
//! failure) triggers the close.

pub mod connection;
pub mod state;

pub use connection::{Connection, ConnectionId, ConnectionOptions};
pub use state::{ConnectionPhase, ConnectionState};
