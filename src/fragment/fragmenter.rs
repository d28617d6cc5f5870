//! Outbound helper that splits one message at a time into fragments.
//!
//! [`Fragmenter`] owns at most one [`OutboundTransfer`]. Each call to
//! [`Fragmenter::next_fragment`] produces exactly one fragment whose payload
//! never exceeds the connection's maximum fragment size. Producer sources are
//! read lazily and compressed messages are deflated incrementally, so the
//! memory held by a transfer stays bounded by a small multiple of the
//! fragment size regardless of the message length.
//!
//! `next_fragment` is cancel-safe: state is only updated after every await
//! point has completed, so dropping the future leaves the transfer intact.

use bytes::{BufMut, Bytes, BytesMut};
use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::{ConnectionContext, MessageSource, SendOptions};
use crate::{
    error::{Result, TransportError},
    frame::{FragmentFrame, FragmentHeader, MessageKind, ProtocolViolation},
};

/// Totals reported once a transfer has sent its final fragment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SendOutcome {
    fragments: u64,
    source_bytes: u64,
}

impl SendOutcome {
    /// Number of fragments emitted for the message.
    #[must_use]
    pub const fn fragments(&self) -> u64 { self.fragments }

    /// Number of bytes read from the source, before compression.
    #[must_use]
    pub const fn source_bytes(&self) -> u64 { self.source_bytes }
}

/// State of the message currently being sent.
#[derive(Debug)]
pub struct OutboundTransfer {
    source: MessageSource,
    total_length: Option<u64>,
    cursor: u64,
    is_first_fragment_sent: bool,
    kind: MessageKind,
    compressed: bool,
    pending: BytesMut,
    scratch: BytesMut,
    input_finished: bool,
    fragments: u64,
}

impl OutboundTransfer {
    fn new(source: MessageSource, kind: MessageKind, compressed: bool) -> Self {
        Self {
            total_length: source.total_length(),
            source,
            cursor: 0,
            is_first_fragment_sent: false,
            kind,
            compressed,
            pending: BytesMut::new(),
            scratch: BytesMut::new(),
            input_finished: false,
            fragments: 0,
        }
    }

    /// Source length, if known before the transfer started.
    #[must_use]
    pub const fn total_length(&self) -> Option<u64> { self.total_length }

    /// Bytes consumed from the source so far.
    #[must_use]
    pub const fn cursor(&self) -> u64 { self.cursor }

    #[must_use]
    pub const fn is_first_fragment_sent(&self) -> bool { self.is_first_fragment_sent }

    #[must_use]
    pub const fn kind(&self) -> MessageKind { self.kind }

    #[must_use]
    pub const fn compressed(&self) -> bool { self.compressed }

    /// Bytes held for upcoming fragments.
    #[must_use]
    pub fn buffered(&self) -> usize { self.pending.len() + self.scratch.capacity() }

    async fn next_plain(&mut self, max: usize) -> Result<(Bytes, bool)> {
        match &mut self.source {
            MessageSource::Buffer(data) => {
                let payload = data.split_to(data.len().min(max));
                self.cursor += payload.len() as u64;
                Ok((payload, data.is_empty()))
            }
            MessageSource::Producer(reader) => {
                // One byte of lookahead tells a full final fragment apart
                // from a full fragment with more to come.
                let target = max + 1;
                while !self.input_finished && self.pending.len() < target {
                    let room = target - self.pending.len();
                    let read = read_some(reader, &mut self.pending, room).await?;
                    if read == 0 {
                        self.input_finished = true;
                    }
                    self.cursor += read as u64;
                }
                Ok(self.emit(max))
            }
        }
    }

    async fn next_compressed(&mut self, ctx: &mut ConnectionContext, max: usize) -> Result<(Bytes, bool)> {
        let deflater = ctx
            .deflater_mut()
            .ok_or(ProtocolViolation::UnnegotiatedCompression)?;
        while !self.input_finished && self.pending.len() <= max {
            let consumed = match &mut self.source {
                MessageSource::Buffer(data) => {
                    let chunk = data.split_to(data.len().min(max));
                    if !chunk.is_empty() {
                        deflater.compress(&chunk, &mut self.pending)?;
                    }
                    chunk.len()
                }
                MessageSource::Producer(reader) => {
                    self.scratch.clear();
                    let read = read_some(reader, &mut self.scratch, max).await?;
                    if read > 0 {
                        deflater.compress(&self.scratch, &mut self.pending)?;
                    }
                    read
                }
            };
            if consumed == 0 {
                deflater.finish_message(&mut self.pending)?;
                self.input_finished = true;
            }
            self.cursor += consumed as u64;
        }
        Ok(self.emit(max))
    }

    fn emit(&mut self, max: usize) -> (Bytes, bool) {
        if self.input_finished && self.pending.len() <= max {
            (self.pending.split().freeze(), true)
        } else {
            (self.pending.split_to(max).freeze(), false)
        }
    }
}

async fn read_some<R>(reader: &mut R, buf: &mut BytesMut, room: usize) -> Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    buf.reserve(room);
    reader
        .read_buf(&mut buf.limit(room))
        .await
        .map_err(TransportError::Source)
}

/// Splits outbound messages into fragment-sized frames, one message at a time.
#[derive(Debug, Default)]
pub struct Fragmenter {
    transfer: Option<OutboundTransfer>,
    completed: Option<SendOutcome>,
}

impl Fragmenter {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// The transfer in progress, if any.
    #[must_use]
    pub fn transfer(&self) -> Option<&OutboundTransfer> { self.transfer.as_ref() }

    #[must_use]
    pub fn has_transfer(&self) -> bool { self.transfer.is_some() }

    /// Start sending a new message.
    ///
    /// The message is compressed when `options` asks for it and the
    /// connection negotiated the extension.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::TransferInProgress`] if a previous message
    /// has not yet produced its final fragment.
    pub fn begin(
        &mut self,
        ctx: &ConnectionContext,
        source: MessageSource,
        options: SendOptions,
    ) -> Result<()> {
        if self.transfer.is_some() {
            return Err(TransportError::TransferInProgress);
        }
        let compressed = options.compress() && ctx.compression_enabled();
        debug!(
            "starting {:?} transfer: length={:?}, compressed={compressed}",
            options.kind(),
            source.total_length()
        );
        self.transfer = Some(OutboundTransfer::new(source, options.kind(), compressed));
        self.completed = None;
        Ok(())
    }

    /// Produce the next fragment of the current transfer.
    ///
    /// Returns `Ok(None)` when no transfer is in progress. The fragment with
    /// the final flag set ends the transfer.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Source`] if the producer fails and
    /// [`TransportError::Compress`] if compression fails. The transfer is
    /// aborted in both cases.
    pub async fn next_fragment(&mut self, ctx: &mut ConnectionContext) -> Result<Option<FragmentFrame>> {
        let Some(transfer) = self.transfer.as_mut() else {
            return Ok(None);
        };
        let max = ctx.max_fragment_size().get();
        let produced = if transfer.compressed {
            transfer.next_compressed(ctx, max).await
        } else {
            transfer.next_plain(max).await
        };
        let (payload, fin) = match produced {
            Ok(fragment) => fragment,
            Err(err) => {
                self.abort(ctx);
                return Err(err);
            }
        };

        let header = if transfer.is_first_fragment_sent {
            FragmentHeader::continuation(fin, payload.len())
        } else {
            FragmentHeader::first(transfer.kind, transfer.compressed, fin, payload.len())
        };
        transfer.is_first_fragment_sent = true;
        transfer.fragments += 1;

        if fin {
            let outcome = SendOutcome {
                fragments: transfer.fragments,
                source_bytes: transfer.cursor,
            };
            debug!(
                "transfer complete: fragments={}, source_bytes={}",
                outcome.fragments, outcome.source_bytes
            );
            self.transfer = None;
            self.completed = Some(outcome);
        }
        Ok(Some(FragmentFrame::new(header, payload)))
    }

    /// Abandon the current transfer without emitting further fragments.
    ///
    /// A compressed transfer leaves the deflate stream mid-message, so the
    /// stream is reset.
    pub fn abort(&mut self, ctx: &mut ConnectionContext) {
        if let Some(transfer) = self.transfer.take() {
            debug!(
                "aborting transfer after {} source bytes",
                transfer.cursor
            );
            if let (true, Some(deflater)) = (transfer.compressed, ctx.deflater_mut()) {
                deflater.reset();
            }
        }
    }

    /// Take the totals of the most recently completed transfer.
    pub fn take_completed(&mut self) -> Option<SendOutcome> { self.completed.take() }
}
