//! Per-message compression extension (`permessage-deflate`).
//!
//! The negotiator turns an offer or response header into
//! [`ExtensionParams`] bounded by a local [`DeflatePolicy`]; the deflate
//! streams compress and decompress whole messages incrementally so that no
//! more than a fragment's worth of compressed data is held at once.

mod deflate;
mod error;
mod negotiate;
mod params;
mod parse;

pub use deflate::{DEFLATE_TAIL, MessageDeflater, MessageInflater};
pub use error::NegotiationMismatch;
pub use negotiate::{ExtensionNegotiator, Negotiated, PERMESSAGE_DEFLATE};
pub use params::{
    DeflatePolicy,
    ExtensionParams,
    MAX_WINDOW_BITS,
    MIN_COMPRESS_WINDOW_BITS,
    MIN_WINDOW_BITS,
};
pub use parse::{ExtensionOffer, parse_extension_list};
