//! Framing rule violations.

use thiserror::Error;

/// A frame broke one of the base framing or extension rules.
///
/// Every violation is fatal for the connection.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("reserved opcode {0:#x}")]
    ReservedOpcode(u8),
    #[error("reserved header bits set: {0:#04x}")]
    ReservedBits(u8),
    #[error("compression marker on a continuation fragment")]
    CompressionMarkerOnContinuation,
    #[error("compression marker without a negotiated extension")]
    UnnegotiatedCompression,
    #[error("control frames must not be fragmented")]
    FragmentedControlFrame,
    #[error("control frame payload of {0} bytes exceeds 125")]
    ControlFrameTooLong(u64),
    #[error("frame from client is not masked")]
    UnmaskedFrame,
    #[error("frame from server is masked")]
    MaskedFrame,
    #[error("payload length uses a non-minimal encoding")]
    NonMinimalLength,
    #[error("payload length has its most significant bit set")]
    InvalidLength,
    #[error("compressed payload is corrupt")]
    CorruptCompressedStream,
    #[error("close frame payload is malformed")]
    MalformedClose,
}
