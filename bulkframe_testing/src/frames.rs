//! Hand-built wire frames.
//!
//! [`RawFrame`] writes frame bytes directly, without the crate's codec, so
//! tests can produce reserved bits, bad opcodes, wrong masking or
//! non-minimal lengths that the encoder never emits.

use bytes::{BufMut, BytesMut};

/// Builder for one frame's wire bytes.
#[derive(Clone, Debug)]
pub struct RawFrame {
    first: u8,
    payload: Vec<u8>,
    mask: Option<[u8; 4]>,
    length_override: Option<LengthEncoding>,
}

/// Forces a particular payload length encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LengthEncoding {
    /// Two-byte extended length.
    Extended16,
    /// Eight-byte extended length.
    Extended64,
    /// Announce this length but send the payload as given.
    Announce(u64),
}

impl RawFrame {
    /// Frame with the given opcode and final flag.
    pub fn new(opcode: u8, fin: bool, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            first: opcode & 0x0F | if fin { 0x80 } else { 0 },
            payload: payload.into(),
            mask: None,
            length_override: None,
        }
    }

    /// First fragment of a text message.
    pub fn text(fin: bool, payload: impl Into<Vec<u8>>) -> Self { Self::new(0x1, fin, payload) }

    /// First fragment of a binary message.
    pub fn binary(fin: bool, payload: impl Into<Vec<u8>>) -> Self { Self::new(0x2, fin, payload) }

    /// Continuation fragment.
    pub fn continuation(fin: bool, payload: impl Into<Vec<u8>>) -> Self {
        Self::new(0x0, fin, payload)
    }

    /// Close frame carrying `code` and `reason`.
    pub fn close(code: u16, reason: &str) -> Self { Self::new(0x8, true, close_payload(code, reason)) }

    pub fn ping(payload: impl Into<Vec<u8>>) -> Self { Self::new(0x9, true, payload) }

    /// Set the compression marker.
    #[must_use]
    pub fn rsv1(mut self) -> Self {
        self.first |= 0x40;
        self
    }

    /// Set arbitrary reserved bits (`0x40`, `0x20`, `0x10`).
    #[must_use]
    pub fn reserved(mut self, bits: u8) -> Self {
        self.first |= bits & 0x70;
        self
    }

    /// Mask the payload with `key`, as a client must.
    #[must_use]
    pub fn masked(mut self, key: [u8; 4]) -> Self {
        self.mask = Some(key);
        self
    }

    #[must_use]
    pub fn length(mut self, encoding: LengthEncoding) -> Self {
        self.length_override = Some(encoding);
        self
    }

    /// Encode the frame.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = BytesMut::new();
        out.put_u8(self.first);
        let mask_bit = if self.mask.is_some() { 0x80 } else { 0 };
        let len = self.payload.len() as u64;
        match self.length_override {
            None if len < 126 => out.put_u8(mask_bit | len as u8),
            None if len <= u64::from(u16::MAX) => {
                out.put_u8(mask_bit | 126);
                out.put_u16(len as u16);
            }
            None => {
                out.put_u8(mask_bit | 127);
                out.put_u64(len);
            }
            Some(LengthEncoding::Extended16) => {
                out.put_u8(mask_bit | 126);
                out.put_u16(len as u16);
            }
            Some(LengthEncoding::Extended64) => {
                out.put_u8(mask_bit | 127);
                out.put_u64(len);
            }
            Some(LengthEncoding::Announce(announced)) if announced < 126 => {
                out.put_u8(mask_bit | announced as u8);
            }
            Some(LengthEncoding::Announce(announced)) if announced <= u64::from(u16::MAX) => {
                out.put_u8(mask_bit | 126);
                out.put_u16(announced as u16);
            }
            Some(LengthEncoding::Announce(announced)) => {
                out.put_u8(mask_bit | 127);
                out.put_u64(announced);
            }
        }
        match self.mask {
            Some(key) => {
                out.put_slice(&key);
                out.extend(self.payload.iter().zip(key.iter().cycle()).map(|(b, k)| b ^ k));
            }
            None => out.put_slice(&self.payload),
        }
        out.to_vec()
    }
}

/// Close frame payload: big-endian code followed by the reason.
pub fn close_payload(code: u16, reason: &str) -> Vec<u8> {
    let mut payload = code.to_be_bytes().to_vec();
    payload.extend_from_slice(reason.as_bytes());
    payload
}
