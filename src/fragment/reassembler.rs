//! Inbound helper that turns fragments back into application data.
//!
//! [`Reassembler`] tracks at most one open message. Fragments are fed with
//! [`Reassembler::on_fragment`], which validates ordering, and decoded data is
//! pulled with [`Reassembler::poll_delivery`]. In assembled mode a message is
//! handed over whole once its final fragment arrives; in streaming mode every
//! call yields at most one fragment's worth of decoded bytes, so a compressed
//! fragment that inflates to many times its size is drained across several
//! calls rather than buffered.
//!
//! Any error resets the reassembler to idle.

use std::num::NonZeroUsize;

use bytes::{Bytes, BytesMut};
use log::{debug, warn};

use super::{ConnectionContext, FragmentStatus, OrderViolation};
use crate::{
    config::DeliveryMode,
    error::{Result, TransportError},
    extension::DEFLATE_TAIL,
    frame::{FirstFragment, FragmentHeader, MessageKind, ProtocolViolation},
};

/// A fully reassembled message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReassembledMessage {
    kind: MessageKind,
    compressed: bool,
    payload: Bytes,
}

impl ReassembledMessage {
    #[must_use]
    pub const fn kind(&self) -> MessageKind { self.kind }

    /// Whether the message travelled compressed.
    #[must_use]
    pub const fn compressed(&self) -> bool { self.compressed }

    /// Decoded payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] { &self.payload }

    #[must_use]
    pub fn into_payload(self) -> Bytes { self.payload }
}

/// A bounded slice of a message delivered in streaming mode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageChunk {
    kind: MessageKind,
    offset: u64,
    data: Bytes,
}

impl MessageChunk {
    #[must_use]
    pub const fn kind(&self) -> MessageKind { self.kind }

    /// Position of this chunk within the decoded message.
    #[must_use]
    pub const fn offset(&self) -> u64 { self.offset }

    #[must_use]
    pub fn data(&self) -> &[u8] { &self.data }

    #[must_use]
    pub fn into_data(self) -> Bytes { self.data }
}

/// End-of-message marker delivered in streaming mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageEnd {
    kind: MessageKind,
    total_len: u64,
}

impl MessageEnd {
    #[must_use]
    pub const fn kind(&self) -> MessageKind { self.kind }

    /// Total decoded length of the message.
    #[must_use]
    pub const fn total_len(&self) -> u64 { self.total_len }
}

/// Unit of data handed to the application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// A whole message (assembled mode).
    Message(ReassembledMessage),
    /// Part of a message (streaming mode).
    Chunk(MessageChunk),
    /// The message being streamed is complete (streaming mode).
    End(MessageEnd),
}

/// Whether a message is being received.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReassemblerState {
    Idle,
    Receiving,
}

/// Fragment payload waiting to be decoded.
#[derive(Debug, Default, PartialEq, Eq)]
struct PendingInput {
    bytes: Bytes,
    tail_fed: bool,
    output_pending: bool,
}

impl PendingInput {
    fn push(&mut self, payload: Bytes) {
        if self.bytes.is_empty() {
            self.bytes = payload;
        } else {
            let mut joined = BytesMut::with_capacity(self.bytes.len() + payload.len());
            joined.extend_from_slice(&self.bytes);
            joined.extend_from_slice(&payload);
            self.bytes = joined.freeze();
        }
    }

    fn take_plain(&mut self, limit: usize) -> Bytes { self.bytes.split_to(self.bytes.len().min(limit)) }

    /// Whether every byte fed so far has been decoded and emitted.
    fn is_drained(&self, compressed: bool, awaiting_fin: bool) -> bool {
        if !compressed {
            return self.bytes.is_empty();
        }
        self.bytes.is_empty() && !self.output_pending && (awaiting_fin || self.tail_fed)
    }

    /// Run one bounded inflate step, feeding the sync-flush tail once the
    /// final fragment's payload has been consumed.
    fn inflate(
        &mut self,
        ctx: &mut ConnectionContext,
        awaiting_fin: bool,
        limit: usize,
        out: &mut BytesMut,
    ) -> Result<usize> {
        if self.bytes.is_empty() && !self.output_pending {
            if awaiting_fin || self.tail_fed {
                return Ok(0);
            }
            self.bytes = Bytes::from_static(&DEFLATE_TAIL);
            self.tail_fed = true;
        }
        let inflater = ctx
            .inflater_mut()
            .ok_or(ProtocolViolation::UnnegotiatedCompression)?;
        let before = self.bytes.len();
        let produced = inflater.inflate(&mut self.bytes, out, limit)?;
        self.output_pending = produced == limit;
        if produced == 0 && !self.bytes.is_empty() && self.bytes.len() == before {
            return Err(ProtocolViolation::CorruptCompressedStream.into());
        }
        Ok(produced)
    }
}

/// The message currently being received.
#[derive(Debug, PartialEq, Eq)]
struct InboundAccumulation {
    kind: MessageKind,
    compressed: bool,
    pending: PendingInput,
    buffer: BytesMut,
    bytes_delivered_to_app: u64,
    awaiting_fin: bool,
}

impl InboundAccumulation {
    fn new(first: FirstFragment, payload: Bytes) -> Self {
        Self {
            kind: first.opcode,
            compressed: first.compressed,
            pending: PendingInput {
                bytes: payload,
                ..PendingInput::default()
            },
            buffer: BytesMut::new(),
            bytes_delivered_to_app: 0,
            awaiting_fin: !first.fin,
        }
    }

    fn is_drained(&self) -> bool { self.pending.is_drained(self.compressed, self.awaiting_fin) }

    /// Decode everything fed so far into the message buffer.
    fn decode_all(
        &mut self,
        ctx: &mut ConnectionContext,
        limit: usize,
        max_message_size: NonZeroUsize,
    ) -> Result<()> {
        if !self.compressed {
            let chunk = self.pending.take_plain(usize::MAX);
            let attempted = self.buffer.len() + chunk.len();
            if attempted > max_message_size.get() {
                return Err(TransportError::MessageTooLarge {
                    attempted,
                    limit: max_message_size,
                });
            }
            self.buffer.extend_from_slice(&chunk);
            return Ok(());
        }
        while !self.is_drained() {
            self.pending
                .inflate(ctx, self.awaiting_fin, limit, &mut self.buffer)?;
            if self.buffer.len() > max_message_size.get() {
                return Err(TransportError::MessageTooLarge {
                    attempted: self.buffer.len(),
                    limit: max_message_size,
                });
            }
        }
        Ok(())
    }

    /// Decode at most `limit` bytes for the next streaming chunk.
    fn decode_chunk(&mut self, ctx: &mut ConnectionContext, limit: usize) -> Result<Option<Bytes>> {
        if !self.compressed {
            let data = self.pending.take_plain(limit);
            return Ok((!data.is_empty()).then_some(data));
        }
        let mut out = BytesMut::new();
        while !self.is_drained() {
            if self.pending.inflate(ctx, self.awaiting_fin, limit, &mut out)? > 0 {
                return Ok(Some(out.freeze()));
            }
        }
        Ok(None)
    }
}

/// Stateful single-message reassembler.
#[derive(Debug, PartialEq, Eq)]
pub struct Reassembler {
    mode: DeliveryMode,
    accumulation: Option<InboundAccumulation>,
}

impl Reassembler {
    #[must_use]
    pub const fn new(mode: DeliveryMode) -> Self {
        Self {
            mode,
            accumulation: None,
        }
    }

    #[must_use]
    pub const fn mode(&self) -> DeliveryMode { self.mode }

    #[must_use]
    pub const fn state(&self) -> ReassemblerState {
        match self.accumulation {
            Some(_) => ReassemblerState::Receiving,
            None => ReassemblerState::Idle,
        }
    }

    /// Bytes of the open message already handed to the application.
    #[must_use]
    pub fn bytes_delivered(&self) -> u64 {
        self.accumulation
            .as_ref()
            .map_or(0, |acc| acc.bytes_delivered_to_app)
    }

    /// Whether another fragment may be fed without first polling.
    ///
    /// False while decoded data from the last fragment, or a completed
    /// message, is still waiting for [`Reassembler::poll_delivery`].
    #[must_use]
    pub fn ready_for_fragment(&self) -> bool {
        self.accumulation.as_ref().is_none_or(|acc| {
            acc.awaiting_fin && acc.pending.bytes.is_empty() && !acc.pending.output_pending
        })
    }

    /// Validate and accept one fragment.
    ///
    /// Fragments must only be fed while [`Reassembler::ready_for_fragment`]
    /// holds.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::FragmentTooLarge`] for an oversized payload,
    /// [`TransportError::OutOfOrderFragment`] when the fragment does not fit
    /// the current state and [`TransportError::Protocol`] for a compressed
    /// message on a connection without compression. The reassembler is idle
    /// after any error.
    pub fn on_fragment(
        &mut self,
        ctx: &mut ConnectionContext,
        header: FragmentHeader,
        payload: Bytes,
    ) -> Result<FragmentStatus> {
        let max = ctx.max_fragment_size().get();
        if payload.len() > max {
            self.abort(ctx);
            return Err(TransportError::FragmentTooLarge {
                size: payload.len() as u64,
                max,
            });
        }
        match (self.accumulation.as_mut(), header) {
            (None, FragmentHeader::First(first)) => {
                if first.compressed && !ctx.compression_enabled() {
                    return Err(ProtocolViolation::UnnegotiatedCompression.into());
                }
                debug!(
                    "message started: kind={:?}, compressed={}, fin={}",
                    first.opcode, first.compressed, first.fin
                );
                self.accumulation = Some(InboundAccumulation::new(first, payload));
                Ok(FragmentStatus::from_fin(first.fin))
            }
            (None, FragmentHeader::Continuation(_)) => {
                warn!("continuation fragment received with no open message");
                Err(TransportError::OutOfOrderFragment(
                    OrderViolation::ContinuationWhileIdle,
                ))
            }
            (Some(_), FragmentHeader::First(_)) => {
                warn!("new message started before the open one finished");
                self.abort(ctx);
                Err(TransportError::OutOfOrderFragment(
                    OrderViolation::StartWhileReceiving,
                ))
            }
            (Some(acc), FragmentHeader::Continuation(cont)) => {
                if !acc.awaiting_fin {
                    self.abort(ctx);
                    return Err(TransportError::OutOfOrderFragment(
                        OrderViolation::ContinuationWhileIdle,
                    ));
                }
                acc.pending.push(payload);
                acc.awaiting_fin = !cont.fin;
                Ok(FragmentStatus::from_fin(cont.fin))
            }
        }
    }

    /// Pull the next unit of decoded data, if one is ready.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::MessageTooLarge`] when an assembled message
    /// outgrows its cap and [`TransportError::Decompress`] or
    /// [`TransportError::Protocol`] for a corrupt compressed stream. The
    /// reassembler is idle after any error.
    pub fn poll_delivery(&mut self, ctx: &mut ConnectionContext) -> Result<Option<Delivery>> {
        let Some(acc) = self.accumulation.as_mut() else {
            return Ok(None);
        };
        let limit = ctx.max_fragment_size().get();
        let decoded = match self.mode {
            DeliveryMode::Assembled { max_message_size } => {
                acc.decode_all(ctx, limit, max_message_size).map(|()| None)
            }
            DeliveryMode::Streaming => acc.decode_chunk(ctx, limit),
        };
        match decoded {
            Err(err) => {
                self.abort(ctx);
                Err(err)
            }
            Ok(Some(data)) => {
                let offset = acc.bytes_delivered_to_app;
                acc.bytes_delivered_to_app += data.len() as u64;
                Ok(Some(Delivery::Chunk(MessageChunk {
                    kind: acc.kind,
                    offset,
                    data,
                })))
            }
            Ok(None) if acc.awaiting_fin => Ok(None),
            Ok(None) => Ok(self.complete(ctx)),
        }
    }

    fn complete(&mut self, ctx: &mut ConnectionContext) -> Option<Delivery> {
        let acc = self.accumulation.take()?;
        if let (true, Some(inflater)) = (acc.compressed, ctx.inflater_mut()) {
            inflater.finish_message();
        }
        debug!("message complete: kind={:?}", acc.kind);
        Some(match self.mode {
            DeliveryMode::Assembled { .. } => Delivery::Message(ReassembledMessage {
                kind: acc.kind,
                compressed: acc.compressed,
                payload: acc.buffer.freeze(),
            }),
            DeliveryMode::Streaming => Delivery::End(MessageEnd {
                kind: acc.kind,
                total_len: acc.bytes_delivered_to_app,
            }),
        })
    }

    /// Discard the open message, if any.
    ///
    /// A compressed message leaves the inflate stream mid-message, so the
    /// stream is reset.
    pub fn abort(&mut self, ctx: &mut ConnectionContext) {
        if let Some(acc) = self.accumulation.take() {
            debug!(
                "discarding partial message after {} delivered bytes",
                acc.bytes_delivered_to_app
            );
            if let (true, Some(inflater)) = (acc.compressed, ctx.inflater_mut()) {
                inflater.reset();
            }
        }
    }
}
