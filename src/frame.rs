//! Frame-level types and the wire codec.
//!
//! A data fragment's header is a tagged value: the first fragment of a
//! message carries the message kind and the compression marker, while
//! continuation fragments carry only the final flag and length. Control
//! frames (close, ping, pong) travel alongside and may interleave with the
//! fragments of a message.

mod codec;
mod control;
mod error;
mod header;

use bytes::Bytes;

pub use codec::{FrameCodec, MAX_HEADER_LEN};
pub use control::{CloseCode, ControlFrame, ControlKind, MAX_CONTROL_PAYLOAD};
pub use error::ProtocolViolation;
pub use header::{ContinuationFragment, FirstFragment, FragmentHeader, MessageKind, Opcode};

/// A data fragment together with its payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FragmentFrame {
    header: FragmentHeader,
    payload: Bytes,
}

impl FragmentFrame {
    /// Pair a header with its payload.
    #[must_use]
    pub fn new(header: FragmentHeader, payload: Bytes) -> Self {
        debug_assert_eq!(
            header.length(),
            payload.len(),
            "fragment header length must match its payload"
        );
        Self { header, payload }
    }

    #[must_use]
    pub const fn header(&self) -> &FragmentHeader { &self.header }

    #[must_use]
    pub fn payload(&self) -> &[u8] { &self.payload }

    /// Consume the frame, returning its header and payload.
    #[must_use]
    pub fn into_parts(self) -> (FragmentHeader, Bytes) { (self.header, self.payload) }
}

/// Any frame that can appear on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// A fragment of a text or binary message.
    Data(FragmentFrame),
    /// A close, ping or pong frame.
    Control(ControlFrame),
}

#[cfg(test)]
mod tests;
