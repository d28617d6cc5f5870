//! Reasons a compression negotiation can fail.

use thiserror::Error;

/// Why an extension offer or response could not be accepted.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NegotiationMismatch {
    /// The offer carried a parameter this implementation does not know.
    #[error("unknown parameter `{0}`")]
    UnknownParameter(String),
    /// A parameter appeared more than once in a single offer.
    #[error("duplicate parameter `{0}`")]
    DuplicateParameter(String),
    /// A parameter value could not be parsed.
    #[error("invalid value for `{name}`: {value:?}")]
    InvalidValue {
        /// Parameter name.
        name: String,
        /// Raw value as received.
        value: Option<String>,
    },
    /// Window bits outside the locally accepted range.
    #[error("window bits {bits} outside accepted range {min}..={max}")]
    WindowBitsOutOfBounds {
        /// Requested window bits.
        bits: u8,
        /// Smallest accepted value.
        min: u8,
        /// Largest accepted value.
        max: u8,
    },
    /// The peer did not let us bound its compression window.
    #[error("peer window cannot be limited to {max} bits")]
    UnboundedPeerWindow {
        /// Largest window this endpoint can decompress.
        max: u8,
    },
    /// The response omitted a parameter the offer required.
    #[error("response omits required parameter `{0}`")]
    MissingParameter(&'static str),
    /// The response accepted an extension that was not offered.
    #[error("unexpected extension `{0}` in response")]
    UnexpectedExtension(String),
}
