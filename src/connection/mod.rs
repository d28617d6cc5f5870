//! Connection service loop.
//!
//! [`Connection`] owns the byte stream, the [`ConnectionContext`], the
//! fragmenter, the reassembler and the flow controller. Each service step
//! waits with a `tokio::select!` for whichever of the two directions can make
//! progress: one write attempt for the outbound path, or one bounded read
//! followed by decoding of every complete frame already buffered.
//!
//! Decoded data that the application has not yet taken is parked, and
//! reading stops until it is collected with [`Connection::recv`]. Because
//! `recv` also drives the write side, applications that send and receive
//! large messages at the same time should start the send with
//! [`Connection::begin_send`] and keep calling `recv` until
//! [`Connection::is_sending`] turns false, rather than awaiting
//! [`Connection::finish_send`] alone.
//!
//! Pings are answered with pongs at the next frame boundary. A close frame
//! from the peer is echoed, and a message interrupted by the close or by a
//! lost connection is reported once as [`TransportError::PrematureClose`].
//! Protocol violations close the connection with a close frame carrying
//! 1002, or 1009 for size violations.

mod counter;

use bytes::Bytes;
use log::{debug, trace, warn};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tracing::Instrument;

pub use self::counter::active_connection_count;
use self::counter::ActiveConnection;
use crate::{
    config::TransportConfig,
    error::{Result, TransportError, is_disconnect},
    extension::ExtensionParams,
    flow::{FlowController, ReadProgress, WriteProgress},
    fragment::{
        ConnectionContext,
        Delivery,
        Fragmenter,
        MessageSource,
        Reassembler,
        ReassemblerState,
        SendOptions,
        SendOutcome,
    },
    frame::{CloseCode, ControlFrame, ControlKind, Frame},
    metrics::{self, Direction},
};

/// Lifecycle of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Frames may be sent and received.
    Open,
    /// The connection has been closed or lost.
    Closed,
}

enum Event {
    Wrote(Result<WriteProgress>),
    Read(Result<ReadProgress>),
    Stalled,
}

/// One end of a fragmenting, optionally compressing message connection.
pub struct Connection<T> {
    reader: ReadHalf<T>,
    writer: WriteHalf<T>,
    ctx: ConnectionContext,
    fragmenter: Fragmenter,
    reassembler: Reassembler,
    flow: FlowController,
    parked: Option<Delivery>,
    state: ConnectionState,
    close_sent: bool,
    span: tracing::Span,
    _active: ActiveConnection,
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite,
{
    /// Wrap an established byte stream using the negotiated `params`.
    #[must_use]
    pub fn new(io: T, config: &TransportConfig, params: ExtensionParams) -> Self {
        let (reader, writer) = tokio::io::split(io);
        let ctx = ConnectionContext::new(config, params);
        let flow = FlowController::new(&ctx);
        let span = tracing::info_span!(
            "connection",
            role = ?config.role(),
            compression = params.enabled,
            max_fragment_size = config.max_fragment_size().get()
        );
        Self {
            reader,
            writer,
            ctx,
            fragmenter: Fragmenter::new(),
            reassembler: Reassembler::new(config.delivery()),
            flow,
            parked: None,
            state: ConnectionState::Open,
            close_sent: false,
            span,
            _active: ActiveConnection::new(),
        }
    }

    #[must_use]
    pub const fn state(&self) -> ConnectionState { self.state }

    #[must_use]
    pub const fn context(&self) -> &ConnectionContext { &self.ctx }

    /// Whether an outbound message is still being written.
    #[must_use]
    pub fn is_sending(&self) -> bool {
        self.fragmenter.has_transfer() || !self.flow.writer().is_flushed()
    }

    /// Bytes currently buffered by the connection for framing, decoding and
    /// outbound compression.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.flow.buffered()
            + self
                .fragmenter
                .transfer()
                .map_or(0, crate::fragment::OutboundTransfer::buffered)
    }

    /// Start sending a message. Fragments are written as the connection is
    /// serviced by [`Connection::finish_send`] or [`Connection::recv`].
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::TransferInProgress`] while a previous
    /// message is still being sent and [`TransportError::ConnectionClosed`]
    /// once the connection has closed.
    pub fn begin_send(&mut self, source: impl Into<MessageSource>, options: SendOptions) -> Result<()> {
        self.ensure_open()?;
        self.fragmenter.begin(&self.ctx, source.into(), options)
    }

    /// Service the connection until the current message is fully written.
    ///
    /// Returns immediately with empty totals when nothing is being sent.
    /// Cancelling the returned future leaves the transfer in progress.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::PrematureClose`] if the connection is lost
    /// or closed by the peer mid-message, and any error that ends the
    /// connection while servicing it.
    pub async fn finish_send(&mut self) -> Result<SendOutcome> {
        let span = self.span.clone();
        self.drive_send().instrument(span).await
    }

    async fn drive_send(&mut self) -> Result<SendOutcome> {
        loop {
            self.ensure_open()?;
            if !self.is_sending() {
                return Ok(self.fragmenter.take_completed().unwrap_or_default());
            }
            self.service().await?;
        }
    }

    /// Send a whole message.
    ///
    /// # Errors
    ///
    /// See [`Connection::begin_send`] and [`Connection::finish_send`].
    pub async fn send(&mut self, source: impl Into<MessageSource>, options: SendOptions) -> Result<SendOutcome> {
        self.begin_send(source, options)?;
        self.finish_send().await
    }

    /// Wait for the next delivery from the peer.
    ///
    /// Returns `Ok(None)` once the connection has closed. The write side is
    /// serviced while waiting.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::PrematureClose`] once when a message is cut
    /// short, and any error that ends the connection.
    pub async fn recv(&mut self) -> Result<Option<Delivery>> {
        let span = self.span.clone();
        self.drive_recv().instrument(span).await
    }

    async fn drive_recv(&mut self) -> Result<Option<Delivery>> {
        loop {
            if let Some(delivery) = self.parked.take() {
                if !matches!(delivery, Delivery::Chunk(_)) {
                    metrics::inc_messages(Direction::Inbound);
                }
                return Ok(Some(delivery));
            }
            if self.state == ConnectionState::Closed {
                return Ok(None);
            }
            self.pump().await?;
            if self.parked.is_none() && self.state == ConnectionState::Open {
                self.service().await?;
            }
        }
    }

    /// Queue a ping for the next frame boundary.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] once the connection has
    /// closed.
    pub fn queue_ping(&mut self, payload: impl Into<Bytes>) -> Result<()> {
        self.ensure_open()?;
        self.flow.writer_mut().queue_control(ControlFrame::ping(payload));
        Ok(())
    }

    /// Close the connection.
    ///
    /// Any message in flight in either direction is abandoned. A partially
    /// written frame is completed, the close frame is sent and the write side
    /// is shut down. Closing an already closed connection does nothing.
    ///
    /// # Errors
    ///
    /// Returns I/O errors other than the peer having already gone away.
    pub async fn close(&mut self, code: CloseCode, reason: &str) -> Result<()> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }
        debug!("closing connection with code {}", code.get());
        self.abort_in_flight();
        self.parked = None;
        self.close_sent = true;
        let writer = self.flow.writer_mut();
        writer.discard_queued();
        writer.queue_control(ControlFrame::close(code, reason));
        let drained = self.drain_writes().await;
        let shutdown = self.writer.shutdown().await;
        self.state = ConnectionState::Closed;
        match drained {
            Ok(()) | Err(TransportError::PrematureClose) => {}
            Err(err) => return Err(err),
        }
        match shutdown {
            Err(err) if !is_disconnect(&err) => Err(err.into()),
            _ => Ok(()),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            ConnectionState::Open => Ok(()),
            ConnectionState::Closed => Err(TransportError::ConnectionClosed),
        }
    }

    async fn service(&mut self) -> Result<()> {
        let want_write = self.flow.writer().wants_write(&self.fragmenter);
        let want_read = self.parked.is_none() && self.flow.read_permitted(&self.reassembler);
        let (write_path, read_path) = self.flow.split_mut();

        let event = tokio::select! {
            biased;

            progress = write_path.on_writable(&mut self.writer, &mut self.ctx, &mut self.fragmenter),
                if want_write => Event::Wrote(progress),
            progress = read_path.on_readable(&mut self.reader), if want_read => Event::Read(progress),
            else => Event::Stalled,
        };

        match event {
            Event::Wrote(Ok(progress)) => {
                trace!("write progress: {progress:?}");
                Ok(())
            }
            Event::Wrote(Err(err)) | Event::Read(Err(err)) => Err(self.fail(err).await),
            Event::Read(Ok(ReadProgress::Filled(_))) => self.pump().await,
            Event::Read(Ok(ReadProgress::Eof)) => self.on_eof(),
            Event::Stalled => {
                warn!("connection has nothing to read or write");
                self.state = ConnectionState::Closed;
                Err(TransportError::ConnectionClosed)
            }
        }
    }

    /// Decode buffered frames until a delivery is parked or the buffer
    /// holds no complete frame.
    async fn pump(&mut self) -> Result<()> {
        while self.parked.is_none() && self.state == ConnectionState::Open {
            match self.reassembler.poll_delivery(&mut self.ctx) {
                Ok(Some(delivery)) => {
                    self.parked = Some(delivery);
                    break;
                }
                Ok(None) => {}
                Err(err) => return Err(self.fail(err).await),
            }
            if !self.reassembler.ready_for_fragment() {
                break;
            }
            let frame = match self.flow.reader_mut().next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(err) => return Err(self.fail(err).await),
            };
            self.handle_frame(frame).await?;
        }
        Ok(())
    }

    async fn handle_frame(&mut self, frame: Frame) -> Result<()> {
        match frame {
            Frame::Data(fragment) => {
                let (header, payload) = fragment.into_parts();
                match self.reassembler.on_fragment(&mut self.ctx, header, payload) {
                    Ok(status) => {
                        trace!("fragment accepted: {status:?}");
                        Ok(())
                    }
                    Err(err) => Err(self.fail(err).await),
                }
            }
            Frame::Control(control) => match control.kind() {
                ControlKind::Ping => {
                    self.flow
                        .writer_mut()
                        .queue_control(ControlFrame::pong(control.into_payload()));
                    Ok(())
                }
                ControlKind::Pong => {
                    trace!("pong received");
                    Ok(())
                }
                ControlKind::Close => self.on_peer_close(&control).await,
            },
        }
    }

    async fn on_peer_close(&mut self, frame: &ControlFrame) -> Result<()> {
        let code = frame.close_code();
        debug!("peer sent close with code {:?}", code.map(CloseCode::get));
        let interrupted = self.message_in_flight();
        self.abort_in_flight();
        if !self.close_sent {
            self.close_sent = true;
            let writer = self.flow.writer_mut();
            writer.discard_queued();
            writer.queue_control(ControlFrame::close(code.unwrap_or(CloseCode::NORMAL), ""));
            if let Err(err) = self.drain_writes().await {
                debug!("close echo not delivered: {err}");
            }
        }
        let _ = self.writer.shutdown().await;
        self.state = ConnectionState::Closed;
        if interrupted {
            Err(self.premature_close())
        } else {
            Ok(())
        }
    }

    fn on_eof(&mut self) -> Result<()> {
        let interrupted = self.message_in_flight() || self.flow.reader().has_partial_frame();
        self.abort_in_flight();
        self.state = ConnectionState::Closed;
        if interrupted {
            Err(self.premature_close())
        } else {
            debug!("peer closed the connection");
            Ok(())
        }
    }

    fn premature_close(&self) -> TransportError {
        let err = TransportError::PrematureClose;
        warn!("connection lost with a message in flight");
        metrics::inc_errors(err.kind_label());
        err
    }

    /// Record `err`, close the connection and hand the error back.
    async fn fail(&mut self, err: TransportError) -> TransportError {
        metrics::inc_errors(err.kind_label());
        self.abort_in_flight();
        match err.close_code() {
            Some(code) if !self.close_sent => {
                warn!("closing connection: {err}");
                self.close_sent = true;
                let writer = self.flow.writer_mut();
                writer.discard_queued();
                writer.queue_control(ControlFrame::close(code, &err.to_string()));
                if let Err(close_err) = self.drain_writes().await {
                    debug!("close frame not delivered: {close_err}");
                }
                let _ = self.writer.shutdown().await;
            }
            _ => debug!("connection failed: {err}"),
        }
        self.state = ConnectionState::Closed;
        err
    }

    fn message_in_flight(&self) -> bool {
        self.reassembler.state() == ReassemblerState::Receiving
            || matches!(self.parked, Some(Delivery::Chunk(_)))
            || self.fragmenter.has_transfer()
    }

    fn abort_in_flight(&mut self) {
        self.fragmenter.abort(&mut self.ctx);
        self.reassembler.abort(&mut self.ctx);
        if matches!(self.parked, Some(Delivery::Chunk(_))) {
            self.parked = None;
        }
    }

    /// Write out the partially written frame and any queued control frames.
    async fn drain_writes(&mut self) -> Result<()> {
        loop {
            let progress = self
                .flow
                .writer_mut()
                .on_writable(&mut self.writer, &mut self.ctx, &mut self.fragmenter)
                .await?;
            if progress == WriteProgress::Idle {
                return Ok(());
            }
        }
    }
}
