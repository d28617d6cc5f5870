//! Wire codec for base-framing frames.
//!
//! Decoding validates the header before any payload is buffered: reserved
//! bits, opcodes, control-frame rules, masking direction and the payload
//! length against the configured fragment limit. Encoding picks the minimal
//! length encoding and masks payloads when the local role requires it.

use std::num::NonZeroUsize;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{
    ControlFrame,
    ControlKind,
    Frame,
    FragmentFrame,
    FragmentHeader,
    MessageKind,
    Opcode,
    ProtocolViolation,
};
use crate::{
    config::Role,
    error::TransportError,
};

/// Largest possible frame header: two fixed bytes, an eight byte extended
/// length and a four byte masking key.
pub const MAX_HEADER_LEN: usize = 14;

const FIN_BIT: u8 = 0x80;
const RSV1_BIT: u8 = 0x40;
const RSV_MASK: u8 = 0x70;
const RESERVED_RSV: u8 = 0x30;
const OPCODE_MASK: u8 = 0x0F;
const MASK_BIT: u8 = 0x80;
const LENGTH_MASK: u8 = 0x7F;
const LENGTH_16: u8 = 126;
const LENGTH_64: u8 = 127;
const MASK_KEY_LEN: usize = 4;

/// Parsed header fields of a frame whose payload may not have arrived yet.
#[derive(Debug)]
struct RawHeader {
    fin: bool,
    rsv1: bool,
    opcode: Opcode,
    mask: Option<[u8; MASK_KEY_LEN]>,
    header_len: usize,
    payload_len: usize,
}

/// Encoder and decoder for one endpoint of a connection.
#[derive(Clone, Copy, Debug)]
pub struct FrameCodec {
    role: Role,
    max_fragment_size: NonZeroUsize,
}

impl FrameCodec {
    #[must_use]
    pub const fn new(role: Role, max_fragment_size: NonZeroUsize) -> Self {
        Self {
            role,
            max_fragment_size,
        }
    }

    #[must_use]
    pub const fn role(&self) -> Role { self.role }

    /// Bytes needed to hold one maximal data or control frame.
    #[must_use]
    pub fn buffer_capacity(&self) -> usize {
        MAX_HEADER_LEN + self.max_fragment_size.get().max(super::MAX_CONTROL_PAYLOAD)
    }

    fn parse_header(&self, src: &[u8]) -> Result<Option<RawHeader>, TransportError> {
        let Some(&[first, second]) = src.get(..2) else {
            return Ok(None);
        };
        let rsv = first & RSV_MASK;
        if rsv & RESERVED_RSV != 0 {
            return Err(ProtocolViolation::ReservedBits(rsv).into());
        }
        let opcode = Opcode::from_bits(first & OPCODE_MASK)?;
        let fin = first & FIN_BIT != 0;
        let rsv1 = first & RSV1_BIT != 0;

        let masked = second & MASK_BIT != 0;
        match (self.role.expects_masked_inbound(), masked) {
            (true, false) => return Err(ProtocolViolation::UnmaskedFrame.into()),
            (false, true) => return Err(ProtocolViolation::MaskedFrame.into()),
            _ => {}
        }

        let mut rest = &src[2..];
        let announced = match second & LENGTH_MASK {
            LENGTH_16 => {
                if rest.remaining() < 2 {
                    return Ok(None);
                }
                let len = rest.get_u16();
                if len < u16::from(LENGTH_16) {
                    return Err(ProtocolViolation::NonMinimalLength.into());
                }
                u64::from(len)
            }
            LENGTH_64 => {
                if rest.remaining() < 8 {
                    return Ok(None);
                }
                let len = rest.get_u64();
                if len >> 63 != 0 {
                    return Err(ProtocolViolation::InvalidLength.into());
                }
                if len <= u64::from(u16::MAX) {
                    return Err(ProtocolViolation::NonMinimalLength.into());
                }
                len
            }
            short => u64::from(short),
        };

        if opcode.is_control() {
            if !fin {
                return Err(ProtocolViolation::FragmentedControlFrame.into());
            }
            if rsv1 {
                return Err(ProtocolViolation::ReservedBits(rsv).into());
            }
            if announced > super::MAX_CONTROL_PAYLOAD as u64 {
                return Err(ProtocolViolation::ControlFrameTooLong(announced).into());
            }
        } else {
            let max = self.max_fragment_size.get();
            if announced > max as u64 {
                return Err(TransportError::FragmentTooLarge {
                    size: announced,
                    max,
                });
            }
            if rsv1 && opcode == Opcode::Continuation {
                return Err(ProtocolViolation::CompressionMarkerOnContinuation.into());
            }
        }

        let mask = if masked {
            if rest.remaining() < MASK_KEY_LEN {
                return Ok(None);
            }
            let mut key = [0; MASK_KEY_LEN];
            rest.copy_to_slice(&mut key);
            Some(key)
        } else {
            None
        };

        let payload_len = usize::try_from(announced).map_err(|_| TransportError::FragmentTooLarge {
            size: announced,
            max: self.max_fragment_size.get(),
        })?;
        Ok(Some(RawHeader {
            fin,
            rsv1,
            opcode,
            mask,
            header_len: src.len() - rest.len(),
            payload_len,
        }))
    }

    fn write_frame(&self, first: u8, payload: &[u8], dst: &mut BytesMut) {
        let mask_bit = if self.role.masks_outbound() { MASK_BIT } else { 0 };
        let len = payload.len();
        dst.reserve(MAX_HEADER_LEN + len);
        dst.put_u8(first);
        match (u8::try_from(len), u16::try_from(len)) {
            (Ok(short), _) if short < LENGTH_16 => dst.put_u8(mask_bit | short),
            (_, Ok(medium)) => {
                dst.put_u8(mask_bit | LENGTH_16);
                dst.put_u16(medium);
            }
            _ => {
                dst.put_u8(mask_bit | LENGTH_64);
                dst.put_u64(len as u64);
            }
        }
        if mask_bit == 0 {
            dst.put_slice(payload);
            return;
        }
        let key: [u8; MASK_KEY_LEN] = rand::random();
        dst.put_slice(&key);
        let start = dst.len();
        dst.put_slice(payload);
        apply_mask(&mut dst[start..], key);
    }
}

/// XOR `buf` with the repeating masking key. Applying it twice restores the
/// original bytes.
pub(crate) fn apply_mask(buf: &mut [u8], key: [u8; MASK_KEY_LEN]) {
    for (byte, k) in buf.iter_mut().zip(key.iter().cycle()) {
        *byte ^= k;
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(raw) = self.parse_header(src)? else {
            return Ok(None);
        };
        if src.len() < raw.header_len + raw.payload_len {
            src.reserve(raw.header_len + raw.payload_len - src.len());
            return Ok(None);
        }
        src.advance(raw.header_len);
        let mut payload = src.split_to(raw.payload_len);
        if let Some(key) = raw.mask {
            apply_mask(&mut payload, key);
        }
        let payload = payload.freeze();
        tracing::trace!(
            opcode = ?raw.opcode,
            fin = raw.fin,
            compressed = raw.rsv1,
            len = raw.payload_len,
            "decoded frame"
        );
        Ok(Some(into_frame(&raw, payload)?))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => {
                tracing::debug!(
                    bytes_received = src.len(),
                    "connection closed inside a frame"
                );
                Err(TransportError::PrematureClose)
            }
        }
    }
}

fn into_frame(raw: &RawHeader, payload: Bytes) -> Result<Frame, TransportError> {
    let len = payload.len();
    let (fin, compressed) = (raw.fin, raw.rsv1);
    let header = match raw.opcode {
        Opcode::Continuation => FragmentHeader::continuation(fin, len),
        Opcode::Text => FragmentHeader::first(MessageKind::Text, compressed, fin, len),
        Opcode::Binary => FragmentHeader::first(MessageKind::Binary, compressed, fin, len),
        Opcode::Close if len == 1 => return Err(ProtocolViolation::MalformedClose.into()),
        Opcode::Close => return Ok(control(ControlKind::Close, payload)),
        Opcode::Ping => return Ok(control(ControlKind::Ping, payload)),
        Opcode::Pong => return Ok(control(ControlKind::Pong, payload)),
    };
    Ok(Frame::Data(FragmentFrame::new(header, payload)))
}

fn control(kind: ControlKind, payload: Bytes) -> Frame {
    Frame::Control(ControlFrame::from_parts(kind, payload))
}

impl Encoder<Frame> for FrameCodec {
    type Error = TransportError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Frame::Data(fragment) => {
                let header = *fragment.header();
                let max = self.max_fragment_size.get();
                if fragment.payload().len() > max {
                    return Err(TransportError::FragmentTooLarge {
                        size: fragment.payload().len() as u64,
                        max,
                    });
                }
                let mut first = header.opcode().bits();
                if header.fin() {
                    first |= FIN_BIT;
                }
                if header.compressed() {
                    first |= RSV1_BIT;
                }
                self.write_frame(first, fragment.payload(), dst);
            }
            Frame::Control(control) => {
                let first = FIN_BIT | control.kind().opcode().bits();
                self.write_frame(first, control.payload(), dst);
            }
        }
        Ok(())
    }
}
