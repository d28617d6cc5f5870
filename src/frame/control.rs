//! Control frames.

use bytes::{BufMut, Bytes, BytesMut};

use super::header::Opcode;

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Status code carried by a close frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CloseCode(u16);

impl CloseCode {
    /// Normal closure.
    pub const NORMAL: Self = Self(1000);
    /// Endpoint is going away.
    pub const GOING_AWAY: Self = Self(1001);
    /// Peer broke the protocol.
    pub const PROTOCOL_ERROR: Self = Self(1002);
    /// Message or fragment exceeded a configured limit.
    pub const MESSAGE_TOO_BIG: Self = Self(1009);

    #[must_use]
    pub const fn new(code: u16) -> Self { Self(code) }

    #[must_use]
    pub const fn get(self) -> u16 { self.0 }
}

/// Kind of a control frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ControlKind {
    Close,
    Ping,
    Pong,
}

impl ControlKind {
    #[must_use]
    pub const fn opcode(self) -> Opcode {
        match self {
            Self::Close => Opcode::Close,
            Self::Ping => Opcode::Ping,
            Self::Pong => Opcode::Pong,
        }
    }
}

/// A close, ping or pong frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlFrame {
    kind: ControlKind,
    payload: Bytes,
}

impl ControlFrame {
    pub(crate) fn from_parts(kind: ControlKind, payload: Bytes) -> Self { Self { kind, payload } }

    /// Build a ping; the payload is cut to the control frame limit.
    #[must_use]
    pub fn ping(payload: impl Into<Bytes>) -> Self { Self::bounded(ControlKind::Ping, payload.into()) }

    /// Build a pong; the payload is cut to the control frame limit.
    #[must_use]
    pub fn pong(payload: impl Into<Bytes>) -> Self { Self::bounded(ControlKind::Pong, payload.into()) }

    /// Build a close frame carrying `code` and as much of `reason` as fits.
    ///
    /// The reason is truncated on a character boundary.
    #[must_use]
    pub fn close(code: CloseCode, reason: &str) -> Self {
        let mut end = reason.len().min(MAX_CONTROL_PAYLOAD - 2);
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        let mut payload = BytesMut::with_capacity(2 + end);
        payload.put_u16(code.get());
        payload.put_slice(&reason.as_bytes()[..end]);
        Self {
            kind: ControlKind::Close,
            payload: payload.freeze(),
        }
    }

    fn bounded(kind: ControlKind, mut payload: Bytes) -> Self {
        payload.truncate(MAX_CONTROL_PAYLOAD);
        Self { kind, payload }
    }

    #[must_use]
    pub const fn kind(&self) -> ControlKind { self.kind }

    #[must_use]
    pub fn payload(&self) -> &[u8] { &self.payload }

    #[must_use]
    pub fn into_payload(self) -> Bytes { self.payload }

    /// Status code of a close frame, if it carries one.
    #[must_use]
    pub fn close_code(&self) -> Option<CloseCode> {
        match (self.kind, self.payload.get(..2)) {
            (ControlKind::Close, Some(&[hi, lo])) => Some(CloseCode(u16::from_be_bytes([hi, lo]))),
            _ => None,
        }
    }
}
