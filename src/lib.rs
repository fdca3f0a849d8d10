//! Framed message connections over async duplex streams
//!
//! This crate layers reliable message boundaries, a connection validation
//! handshake, and safe queuing of concurrent send and receive requests over
//! any Tokio byte stream (TCP, TLS, Unix sockets, in-memory duplex pipes).
//!
//! ## Features
//!
//! - Length-prefixed message framing
//! - One-shot identifier handshake gating all message traffic
//! - Per-direction FIFO queues; at most one read and one write in flight
//! - Continuation and future based APIs over the same queues
//! - Error draining: a stream failure completes every queued request
//! - Teardown on drop: pending work completes with a stream error
//! - Tracing instrumentation for observability
//!
//! ## Example
//!
//! ```no_run
//! use framelink::{Connection, LinkConfig};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let listener = TcpListener::bind("127.0.0.1:5666").await?;
//!     let (socket, _) = listener.accept().await?;
//!
//!     let conn = Connection::with_config(socket, LinkConfig::new("svc42"));
//!     conn.validate().await?;
//!
//!     let (message, _) = conn.receive_message(Vec::new()).await.into_result()?;
//!     conn.send_message(message).await.into_result()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Message Framing
//!
//! Both directions use the same framing:
//!
//! ```text
//! +------------------+-------------------+
//! | Length (4 bytes) | Payload (N bytes) |
//! | (big-endian u32) |                   |
//! +------------------+-------------------+
//! ```
//!
//! ## Connection Protocol
//!
//! Right after the stream is established each peer calls `validate`, which
//! writes its identifier verbatim (unframed) and reads the same number of
//! bytes back. Both peers must be configured with the same identifier.

mod config;
mod connection;
mod error;
mod framing;
mod handshake;
mod pipeline;
mod stream;
mod transport;

// Configuration
pub use config::{LinkConfig, ENV_IDENTIFIER, ENV_MAX_FRAME_BYTES, MAX_FRAME_LEN_DEFAULT};

// Connection
pub use connection::{Connection, PendingTransfer, PendingValidation};
pub use pipeline::Completion;
pub use stream::LinkStream;

// Errors
pub use error::{ConfigError, LinkError, LinkResult};

// Framing
pub use framing::{decode_header, encode_frame, encode_header, FRAME_HEADER_LEN};

// Transport
pub use transport::MessageTransport;
