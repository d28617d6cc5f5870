//! Fragment header definitions.

use super::error::ProtocolViolation;

/// Frame opcodes understood by this implementation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    /// Low four bits of the first header byte.
    #[must_use]
    pub const fn bits(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }

    /// Decode an opcode nibble.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolViolation::ReservedOpcode`] for opcodes without an
    /// assigned meaning.
    pub const fn from_bits(bits: u8) -> Result<Self, ProtocolViolation> {
        match bits {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            other => Err(ProtocolViolation::ReservedOpcode(other)),
        }
    }

    /// Whether the opcode denotes a control frame.
    #[must_use]
    pub const fn is_control(self) -> bool { self.bits() & 0x8 != 0 }
}

/// Kind of an application message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Text,
    Binary,
}

impl MessageKind {
    #[must_use]
    pub const fn opcode(self) -> Opcode {
        match self {
            Self::Text => Opcode::Text,
            Self::Binary => Opcode::Binary,
        }
    }
}

/// Header of the fragment that opens a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FirstFragment {
    /// Message kind, fixed for all fragments of the message.
    pub opcode: MessageKind,
    /// Whether the message payload is deflate-compressed.
    pub compressed: bool,
    /// Whether this fragment also ends the message.
    pub fin: bool,
    /// Payload length in bytes.
    pub length: usize,
}

/// Header of a fragment that continues a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContinuationFragment {
    /// Whether this fragment ends the message.
    pub fin: bool,
    /// Payload length in bytes.
    pub length: usize,
}

/// Header of a data fragment.
///
/// Only the first fragment of a message carries the kind and the compression
/// marker; a continuation with either set cannot be represented.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FragmentHeader {
    First(FirstFragment),
    Continuation(ContinuationFragment),
}

impl FragmentHeader {
    /// Construct the header of a message's first fragment.
    #[must_use]
    pub const fn first(opcode: MessageKind, compressed: bool, fin: bool, length: usize) -> Self {
        Self::First(FirstFragment {
            opcode,
            compressed,
            fin,
            length,
        })
    }

    /// Construct the header of a continuation fragment.
    #[must_use]
    pub const fn continuation(fin: bool, length: usize) -> Self {
        Self::Continuation(ContinuationFragment { fin, length })
    }

    #[must_use]
    pub const fn fin(&self) -> bool {
        match self {
            Self::First(first) => first.fin,
            Self::Continuation(cont) => cont.fin,
        }
    }

    #[must_use]
    pub const fn length(&self) -> usize {
        match self {
            Self::First(first) => first.length,
            Self::Continuation(cont) => cont.length,
        }
    }

    #[must_use]
    pub const fn is_first(&self) -> bool { matches!(self, Self::First(_)) }

    /// Message kind, present only on a first fragment.
    #[must_use]
    pub const fn kind(&self) -> Option<MessageKind> {
        match self {
            Self::First(first) => Some(first.opcode),
            Self::Continuation(_) => None,
        }
    }

    /// Compression marker; always `false` on continuation fragments.
    #[must_use]
    pub const fn compressed(&self) -> bool {
        match self {
            Self::First(first) => first.compressed,
            Self::Continuation(_) => false,
        }
    }

    /// Opcode written to the wire for this fragment.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::First(first) => first.opcode.opcode(),
            Self::Continuation(_) => Opcode::Continuation,
        }
    }
}
