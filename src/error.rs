//! Canonical error and result types for the crate.
//!
//! [`TransportError`] is the single surface returned by the negotiator, the
//! fragmenter, the reassembler and the connection service loop. Protocol-layer
//! violations are flagged by [`TransportError::is_fatal`]; the connection
//! closes after reporting them and never tries to recover.

use std::{io, num::NonZeroUsize};

use thiserror::Error;

use crate::{
    extension::NegotiationMismatch,
    fragment::OrderViolation,
    frame::{CloseCode, ProtocolViolation},
    handshake::HandshakeError,
};

/// Top-level error type exposed by `bulkframe`.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Compression parameters could not be agreed with the peer.
    #[error("extension negotiation mismatch: {0}")]
    NegotiationMismatch(#[from] NegotiationMismatch),
    /// A fragment payload exceeded the configured maximum fragment size.
    #[error("fragment payload of {size} bytes exceeds the {max} byte limit")]
    FragmentTooLarge {
        /// Payload length announced by the fragment header.
        size: u64,
        /// Configured maximum fragment size.
        max: usize,
    },
    /// A fragment arrived that does not fit the current receive state.
    #[error("out-of-order fragment: {0}")]
    OutOfOrderFragment(OrderViolation),
    /// The connection was lost before the final fragment of a message.
    #[error("connection closed before the final fragment of a message")]
    PrematureClose,
    /// A second outbound message was started while one is still being sent.
    #[error("an outbound transfer is already in progress")]
    TransferInProgress,
    /// An assembled message would exceed the configured message cap.
    #[error("reassembled message would reach {attempted} bytes, above the {limit} byte limit")]
    MessageTooLarge {
        /// Size the message would have reached.
        attempted: usize,
        /// Configured maximum message size.
        limit: NonZeroUsize,
    },
    /// The peer broke a framing rule.
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),
    /// The outbound deflate stream failed.
    #[error("compression failed: {0}")]
    Compress(#[from] flate2::CompressError),
    /// The inbound deflate stream could not be decoded.
    #[error("decompression failed: {0}")]
    Decompress(#[from] flate2::DecompressError),
    /// Reading from a caller-supplied message producer failed.
    #[error("message source failed: {0}")]
    Source(#[source] io::Error),
    /// The extension exchange preceding the frame stream failed.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    /// The connection has already been closed.
    #[error("connection is closed")]
    ConnectionClosed,
    /// An error from the underlying byte stream, passed through unmodified.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Report whether the error desynchronises the connection.
    ///
    /// Fatal errors close the connection; they are never recovered locally.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::FragmentTooLarge { .. }
                | Self::OutOfOrderFragment(_)
                | Self::MessageTooLarge { .. }
                | Self::Protocol(_)
                | Self::Decompress(_)
        )
    }

    /// Close code announced to the peer when this error ends the connection.
    #[must_use]
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            Self::FragmentTooLarge { .. } | Self::MessageTooLarge { .. } => {
                Some(CloseCode::MESSAGE_TOO_BIG)
            }
            Self::OutOfOrderFragment(_) | Self::Protocol(_) | Self::Decompress(_) => {
                Some(CloseCode::PROTOCOL_ERROR)
            }
            _ => None,
        }
    }

    /// Short label used when recording error metrics.
    #[must_use]
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::NegotiationMismatch(_) => "negotiation_mismatch",
            Self::FragmentTooLarge { .. } => "fragment_too_large",
            Self::OutOfOrderFragment(_) => "out_of_order_fragment",
            Self::PrematureClose => "premature_close",
            Self::TransferInProgress => "transfer_in_progress",
            Self::MessageTooLarge { .. } => "message_too_large",
            Self::Protocol(_) => "protocol",
            Self::Compress(_) | Self::Decompress(_) => "compression",
            Self::Source(_) => "source",
            Self::Handshake(_) => "handshake",
            Self::ConnectionClosed => "connection_closed",
            Self::Io(_) => "io",
        }
    }

    /// Map a write-side I/O failure, treating a vanished peer as a
    /// premature close.
    pub(crate) fn from_write_error(error: io::Error) -> Self {
        if is_disconnect(&error) {
            Self::PrematureClose
        } else {
            Self::Io(error)
        }
    }
}

/// Whether an I/O error means the peer is gone.
pub(crate) fn is_disconnect(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::WriteZero
            | io::ErrorKind::UnexpectedEof
    )
}

/// Canonical result alias used by `bulkframe` public APIs.
pub type Result<T> = std::result::Result<T, TransportError>;
