//! # enginio-stream
//!
//! Client side of an Enginio backend's change-notification stream: a small
//! RFC 6455 WebSocket engine over plain TCP.
//!
//! ## Features
//!
//! - Opening handshake with a fresh nonce per attempt and accept-key validation
//! - Incremental frame decoding that tolerates any chunking of the byte stream
//! - Reassembly of fragmented text messages into JSON objects
//! - Connection state and message events delivered to registered handlers
//! - Stream URL resolution from backend credentials (`http` feature)
//!
//! Masked server frames, 64-bit payload lengths, binary/control frames and
//! the closing handshake are refused: the connection reports a protocol error
//! and closes.
//!
//! ## Example
//!
//! ```ignore
//! use enginio_stream::{BackendConnection, ConnectionConfig, Event};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut conn = BackendConnection::new(ConnectionConfig::default());
//!     conn.add_event_handler(|evt| {
//!         if let Event::Message(msg) = evt {
//!             println!("{:?}", msg);
//!         }
//!     });
//!     conn.connect("ws://stream.example.com/v1/stream?token=...").await?;
//!     conn.run().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod frame;
pub mod handshake;
pub mod stream_url;
pub mod transport;

pub use config::ConnectionConfig;
pub use connection::BackendConnection;
pub use error::{DataError, Error, HandshakeError, ProtocolError, Result};
pub use events::{ConnectionState, Event};
pub use frame::{FrameDecoder, JsonObject};
pub use handshake::{compute_accept_key, validate_response, OpeningHandshake, StreamUrl};
pub use stream_url::{BackendCredentials, FilterEvent, MessageFilter, StreamUrlResolver};
pub use transport::{Connector, TcpConnector, Transport, TransportEvent};
