//! Protocol constants

/// Header size: kind (1) + payload length (4) + sequence number (4)
pub const HEADER_SIZE: usize = 9;

/// Largest payload a header may declare (10 MiB)
pub const MAX_PAYLOAD_SIZE: usize = 10 * 1024 * 1024;

/// Default listen port
pub const DEFAULT_PORT: u16 = 8888;

/// Default per-connection buffer size
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Default capacity of pooled encode buffers: a 256 KiB frame plus its header
pub const DEFAULT_POOL_BUFFER_SIZE: usize = 256 * 1024 + HEADER_SIZE;

/// Default viewer read buffer size (1 MiB)
pub const DEFAULT_VIEWER_BUFFER_SIZE: usize = 1024 * 1024;

/// Default bitrate ladder in bits per second, ascending
pub const DEFAULT_BITRATE_LADDER: [u32; 4] = [500_000, 1_000_000, 2_000_000, 4_000_000];

/// Default starting rung of the bitrate ladder
pub const DEFAULT_BITRATE_INDEX: usize = 1;
