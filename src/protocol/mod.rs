//! Wire protocol
//!
//! Every packet is a fixed 9-byte header followed by an opaque payload:
//!
//! ```text
//! +------+----------------------+----------------------+-------------+
//! | kind | payload length (LE)  | sequence number (LE) | payload ... |
//! | u8   | i32                  | u32                  | length bytes|
//! +------+----------------------+----------------------+-------------+
//! ```
//!
//! There is no magic number, checksum or version field. A header declaring a
//! length outside `1..=MAX_PAYLOAD_SIZE` cannot be recovered from: the stream
//! has no resynchronization marker, so the connection must be dropped.

pub mod codec;
pub mod constants;
pub mod packet;
pub mod sequence;

pub use codec::{read_full, read_packet};
pub use constants::{HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use packet::{Packet, PacketHeader, PacketKind};
pub use sequence::{SequenceCheck, SequenceCounters, SequenceTracker};
