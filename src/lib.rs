//! framecast: one-to-many media streaming over TCP
//!
//! A producer broadcasts opaque, already-encoded video frames and PCM audio
//! chunks to any number of viewers using a small length-prefixed framing
//! protocol. Each packet carries a per-kind sequence number so viewers can
//! detect drops without an acknowledgement channel, and the producer adapts a
//! suggested bitrate to the measured transfer time.
//!
//! # Layout
//!
//! - [`protocol`]: wire format, decoder and sequence numbering
//! - [`transport`]: one connection with whole-buffer reads/writes and cancellation
//! - [`registry`]: the live set of viewers
//! - [`server`]: broadcast server and producer orchestrator
//! - [`client`]: viewer orchestrator
//! - [`bitrate`]: adaptive bitrate ladder
//! - [`buffer`]: reusable encode buffers
//! - [`media`], [`stats`]: frame envelope, level metering and counters
//!
//! # Example
//!
//! ```no_run
//! use framecast::{ClientConfig, ServerConfig, StreamProducer, StreamViewer};
//!
//! # async fn example() -> framecast::Result<()> {
//! let config = ServerConfig::with_addr("127.0.0.1:8888".parse().unwrap());
//! let (producer, _producer_events) = StreamProducer::new(config)?;
//! let addr = producer.start().await?;
//!
//! let (viewer, mut viewer_events) = StreamViewer::new(ClientConfig::default());
//! viewer.connect("127.0.0.1", addr.port()).await?;
//!
//! producer.push_video(vec![0xFF, 0xD8], 1280, 720, 75)?;
//! let _event = viewer_events.recv().await;
//!
//! viewer.disconnect().await;
//! producer.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod bitrate;
pub mod buffer;
pub mod client;
pub mod error;
pub mod media;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod stats;
pub mod transport;

pub use bitrate::{AdaptiveBitrate, BitrateConfig};
pub use client::{ClientConfig, StreamViewer, ViewerEvent};
pub use error::{Error, Result};
pub use media::MediaFrame;
pub use protocol::{Packet, PacketKind};
pub use server::{BroadcastServer, ProducerEvent, ServerConfig, StreamProducer};
