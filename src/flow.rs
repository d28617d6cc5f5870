//! Readiness-driven I/O pacing.
//!
//! The flow controller is split into a [`WritePath`] and a [`ReadPath`] so
//! that a service loop can wait on both at once while each half borrows only
//! its own state.
//!
//! - The write path performs exactly one write attempt per writable
//!   notification. A fragment is encoded only once the previous frame has
//!   been fully written, so at most one encoded frame is held at a time.
//!   Queued control frames go out at the next frame boundary, ahead of the
//!   next data fragment.
//! - The read path buffers at most one maximal frame. Reading is only
//!   permitted once the reassembler has drained the last fragment, so a slow
//!   consumer stalls the peer instead of growing memory.

use std::collections::VecDeque;

use bytes::{Buf, BufMut, BytesMut};
use log::{debug, trace};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    error::{Result, TransportError, is_disconnect},
    fragment::{ConnectionContext, Fragmenter, Reassembler},
    frame::{ControlFrame, ControlKind, Frame, FrameCodec},
    metrics::{self, Direction},
};

/// What a single write attempt achieved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteProgress {
    /// Nothing was waiting to be written.
    Idle,
    /// Part of the current frame was written.
    Partial {
        /// Bytes accepted by the transport in this attempt.
        written: usize,
    },
    /// A data fragment finished writing.
    FragmentWritten {
        /// Whether it was the final fragment of its message.
        fin: bool,
    },
    /// A control frame finished writing.
    ControlWritten(ControlKind),
}

/// What a single read attempt achieved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadProgress {
    /// Bytes were appended to the read buffer.
    Filled(usize),
    /// The peer closed its write side.
    Eof,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum InFlight {
    Fragment { fin: bool },
    Control(ControlKind),
}

/// Outbound half of the flow controller.
#[derive(Debug)]
pub struct WritePath {
    codec: FrameCodec,
    buf: BytesMut,
    in_flight: Option<InFlight>,
    control: VecDeque<ControlFrame>,
}

impl WritePath {
    fn new(codec: FrameCodec) -> Self {
        Self {
            codec,
            buf: BytesMut::new(),
            in_flight: None,
            control: VecDeque::new(),
        }
    }

    /// Queue a control frame for the next frame boundary.
    pub fn queue_control(&mut self, frame: ControlFrame) {
        trace!("queueing {:?} frame", frame.kind());
        self.control.push_back(frame);
    }

    /// Whether no encoded frame is partially written.
    #[must_use]
    pub fn is_flushed(&self) -> bool { self.buf.is_empty() }

    /// Whether a write attempt would make progress.
    #[must_use]
    pub fn wants_write(&self, fragmenter: &Fragmenter) -> bool {
        !self.buf.is_empty() || !self.control.is_empty() || fragmenter.has_transfer()
    }

    /// Encoded bytes waiting to be written.
    #[must_use]
    pub fn buffered(&self) -> usize { self.buf.len() }

    /// Drop queued control frames. A partially written frame is kept so the
    /// byte stream stays well formed.
    pub fn discard_queued(&mut self) { self.control.clear(); }

    /// Make one write attempt.
    ///
    /// When no frame is partially written the next frame is encoded first:
    /// a queued control frame if any, otherwise the next fragment from the
    /// fragmenter. The stream is flushed once a frame is fully written.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::PrematureClose`] if the peer has gone away,
    /// fragmenter errors unchanged and other I/O errors as
    /// [`TransportError::Io`].
    pub async fn on_writable<W>(
        &mut self,
        io: &mut W,
        ctx: &mut ConnectionContext,
        fragmenter: &mut Fragmenter,
    ) -> Result<WriteProgress>
    where
        W: AsyncWrite + Unpin,
    {
        if self.buf.is_empty() && !self.load_next(ctx, fragmenter).await? {
            return Ok(WriteProgress::Idle);
        }
        let written = match io.write(&self.buf).await {
            Ok(0) => return Err(TransportError::PrematureClose),
            Ok(written) => written,
            Err(err) => return Err(TransportError::from_write_error(err)),
        };
        self.buf.advance(written);
        if !self.buf.is_empty() {
            trace!("partial write: {written} bytes, {} remaining", self.buf.len());
            return Ok(WriteProgress::Partial { written });
        }
        // The frame is complete once its last byte is accepted; account for it
        // before the flush so a cancelled flush cannot lose it.
        let progress = match self.in_flight.take() {
            Some(InFlight::Fragment { fin }) => {
                metrics::inc_fragments(Direction::Outbound);
                if fin {
                    metrics::inc_messages(Direction::Outbound);
                }
                WriteProgress::FragmentWritten { fin }
            }
            Some(InFlight::Control(kind)) => WriteProgress::ControlWritten(kind),
            None => WriteProgress::Partial { written },
        };
        io.flush().await.map_err(TransportError::from_write_error)?;
        Ok(progress)
    }

    async fn load_next(&mut self, ctx: &mut ConnectionContext, fragmenter: &mut Fragmenter) -> Result<bool> {
        if let Some(control) = self.control.pop_front() {
            let kind = control.kind();
            self.codec.encode(Frame::Control(control), &mut self.buf)?;
            self.in_flight = Some(InFlight::Control(kind));
            return Ok(true);
        }
        let Some(fragment) = fragmenter.next_fragment(ctx).await? else {
            return Ok(false);
        };
        let fin = fragment.header().fin();
        self.codec.encode(Frame::Data(fragment), &mut self.buf)?;
        self.in_flight = Some(InFlight::Fragment { fin });
        Ok(true)
    }
}

/// Inbound half of the flow controller.
#[derive(Debug)]
pub struct ReadPath {
    codec: FrameCodec,
    buf: BytesMut,
    capacity: usize,
    eof: bool,
}

impl ReadPath {
    fn new(codec: FrameCodec) -> Self {
        let capacity = codec.buffer_capacity();
        Self {
            codec,
            buf: BytesMut::with_capacity(capacity),
            capacity,
            eof: false,
        }
    }

    /// Whether the read buffer has room and the stream is still open.
    #[must_use]
    pub fn has_room(&self) -> bool { !self.eof && self.buf.len() < self.capacity }

    /// Whether bytes of an incomplete frame are buffered.
    #[must_use]
    pub fn has_partial_frame(&self) -> bool { !self.buf.is_empty() }

    #[must_use]
    pub const fn is_eof(&self) -> bool { self.eof }

    /// Encoded bytes waiting to be decoded.
    #[must_use]
    pub fn buffered(&self) -> usize { self.buf.len() }

    /// Make one read attempt, never reading past one maximal frame.
    ///
    /// A reset connection is reported as end of stream.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] for read failures other than
    /// disconnects.
    pub async fn on_readable<R>(&mut self, io: &mut R) -> Result<ReadProgress>
    where
        R: AsyncRead + Unpin,
    {
        let room = self.capacity - self.buf.len();
        self.buf.reserve(room);
        let read = match io.read_buf(&mut (&mut self.buf).limit(room)).await {
            Ok(read) => read,
            Err(err) if is_disconnect(&err) => 0,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            debug!("peer closed the stream with {} bytes buffered", self.buf.len());
            self.eof = true;
            return Ok(ReadProgress::Eof);
        }
        Ok(ReadProgress::Filled(read))
    }

    /// Decode the next complete frame from the buffer.
    ///
    /// # Errors
    ///
    /// Returns the codec's error for a malformed or oversized frame.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        let frame = self.codec.decode(&mut self.buf)?;
        if frame.is_some() {
            metrics::inc_fragments(Direction::Inbound);
        }
        Ok(frame)
    }
}

/// Paces reads and writes for one connection.
#[derive(Debug)]
pub struct FlowController {
    writer: WritePath,
    reader: ReadPath,
}

impl FlowController {
    #[must_use]
    pub fn new(ctx: &ConnectionContext) -> Self {
        let codec = FrameCodec::new(ctx.role(), ctx.max_fragment_size());
        Self {
            writer: WritePath::new(codec),
            reader: ReadPath::new(codec),
        }
    }

    #[must_use]
    pub fn writer(&self) -> &WritePath { &self.writer }

    #[must_use]
    pub fn reader(&self) -> &ReadPath { &self.reader }

    pub fn writer_mut(&mut self) -> &mut WritePath { &mut self.writer }

    pub fn reader_mut(&mut self) -> &mut ReadPath { &mut self.reader }

    /// Borrow both halves at once.
    pub fn split_mut(&mut self) -> (&mut WritePath, &mut ReadPath) { (&mut self.writer, &mut self.reader) }

    /// Whether a read may be attempted given the reassembler's progress.
    #[must_use]
    pub fn read_permitted(&self, reassembler: &Reassembler) -> bool {
        self.reader.has_room() && reassembler.ready_for_fragment()
    }

    /// Bytes held by both buffers.
    #[must_use]
    pub fn buffered(&self) -> usize { self.writer.buffered() + self.reader.buffered() }
}
