#![doc(html_root_url = "https://docs.rs/bulkframe/latest")]
//! Public API for the `bulkframe` library.
//!
//! This crate moves arbitrarily large messages over a single byte stream
//! using RFC 6455 style framing with optional `permessage-deflate`
//! compression. Memory per connection is bounded by the configured maximum
//! fragment size regardless of message size: outbound payloads are pulled
//! from a [`MessageSource`] one fragment at a time and inbound messages can
//! be delivered as a sequence of bounded chunks.
//!
//! A typical connection exchanges an extension handshake and then wraps the
//! stream in a [`Connection`]:
//!
//! ```no_run
//! use bulkframe::{
//!     Connection,
//!     ExtensionNegotiator,
//!     Role,
//!     SendOptions,
//!     TransportConfig,
//!     handshake::client_handshake,
//! };
//! use tokio::net::TcpStream;
//!
//! # async fn run() -> bulkframe::Result<()> {
//! let mut stream = TcpStream::connect("127.0.0.1:7878").await?;
//! let params = client_handshake(&mut stream, &ExtensionNegotiator::default()).await?;
//! let config = TransportConfig::new(Role::Client);
//! let mut connection = Connection::new(stream, &config, params);
//! connection.send(vec![0_u8; 1_000_000], SendOptions::binary()).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod extension;
pub mod flow;
pub mod fragment;
pub mod frame;
pub mod handshake;
pub mod metrics;

pub use config::{DEFAULT_MAX_FRAGMENT_SIZE, DeliveryMode, Role, TransportConfig};
pub use connection::{Connection, ConnectionState, active_connection_count};
pub use error::{Result, TransportError};
pub use extension::{DeflatePolicy, ExtensionNegotiator, ExtensionParams, NegotiationMismatch};
pub use fragment::{
    Delivery,
    FragmentStatus,
    Fragmenter,
    MessageChunk,
    MessageEnd,
    MessageSource,
    Reassembler,
    ReassembledMessage,
    SendOptions,
    SendOutcome,
};
pub use frame::{CloseCode, MessageKind, ProtocolViolation};
pub use metrics::{CONNECTIONS_ACTIVE, Direction, ERRORS_TOTAL, FRAGMENTS_PROCESSED, MESSAGES_PROCESSED};
