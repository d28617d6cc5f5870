//! Utilities for exercising `bulkframe` connections in tests.
//!
//! Connections are driven over `tokio::io::duplex` pipes, optionally wrapped
//! in a [`TrickleStream`] that caps every read and write so the partial I/O
//! paths are exercised. Raw frame builders produce hand-crafted wire bytes
//! for feeding malformed or adversarial input.
//!
//! ```rust
//! use bulkframe::{ExtensionParams, TransportConfig};
//! use bulkframe_testing::{connection_pair, pseudo_random_payload};
//!
//! # async fn example() {
//! let (mut client, mut server) = connection_pair(
//!     &TransportConfig::new(bulkframe::Role::Client),
//!     &TransportConfig::new(bulkframe::Role::Server),
//!     ExtensionParams::symmetric(false, 15),
//!     4096,
//! );
//! let payload = pseudo_random_payload(100_000, 7);
//! # }
//! ```

pub mod frames;
pub mod logging;
pub mod pair;
pub mod payloads;
pub mod trickle;

pub use frames::{LengthEncoding, RawFrame, close_payload};
pub use logging::{LoggerHandle, logger};
pub use pair::{connection_pair, trickle_pair};
pub use payloads::{compressible_payload, pseudo_random_payload};
pub use trickle::TrickleStream;
