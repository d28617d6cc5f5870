//! Outbound message sources and per-message send options.

use std::{fmt, io};

use bytes::{Buf, Bytes};
use futures::Stream;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

use crate::frame::MessageKind;

/// Where an outbound message's bytes come from.
///
/// A buffer has a known length and is sliced without copying. A producer is
/// read lazily, a fragment's worth at a time, so messages of unknown or
/// unbounded size can be sent in bounded memory.
pub enum MessageSource {
    /// The whole payload is already in memory.
    Buffer(Bytes),
    /// Bytes are pulled from a reader until it reports end of input.
    Producer(Box<dyn AsyncRead + Send + Unpin>),
}

impl MessageSource {
    /// Wrap an async reader as a lazy producer.
    pub fn producer<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::Producer(Box::new(reader))
    }

    /// Wrap a stream of byte chunks as a lazy producer.
    ///
    /// Pin non-`Unpin` streams first, for example with `Box::pin`.
    pub fn from_stream<S, B>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<B>> + Send + Unpin + 'static,
        B: Buf + Send + Unpin + 'static,
    {
        Self::producer(StreamReader::new(stream))
    }

    /// Payload length when known up front.
    #[must_use]
    pub fn total_length(&self) -> Option<u64> {
        match self {
            Self::Buffer(bytes) => Some(bytes.len() as u64),
            Self::Producer(_) => None,
        }
    }
}

impl fmt::Debug for MessageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffer(bytes) => f.debug_tuple("Buffer").field(&bytes.len()).finish(),
            Self::Producer(_) => f.write_str("Producer"),
        }
    }
}

impl From<Bytes> for MessageSource {
    fn from(bytes: Bytes) -> Self { Self::Buffer(bytes) }
}

impl From<Vec<u8>> for MessageSource {
    fn from(bytes: Vec<u8>) -> Self { Self::Buffer(Bytes::from(bytes)) }
}

impl From<&'static [u8]> for MessageSource {
    fn from(bytes: &'static [u8]) -> Self { Self::Buffer(Bytes::from_static(bytes)) }
}

impl From<String> for MessageSource {
    fn from(text: String) -> Self { Self::Buffer(Bytes::from(text)) }
}

impl From<&'static str> for MessageSource {
    fn from(text: &'static str) -> Self { Self::Buffer(Bytes::from_static(text.as_bytes())) }
}

/// Options applied to a single outbound message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SendOptions {
    kind: MessageKind,
    compress: bool,
}

impl SendOptions {
    /// Binary message, compressed when the extension is negotiated.
    #[must_use]
    pub const fn binary() -> Self {
        Self {
            kind: MessageKind::Binary,
            compress: true,
        }
    }

    /// Text message, compressed when the extension is negotiated.
    #[must_use]
    pub const fn text() -> Self {
        Self {
            kind: MessageKind::Text,
            compress: true,
        }
    }

    /// Options for a message of `kind`.
    #[must_use]
    pub const fn for_kind(kind: MessageKind) -> Self {
        Self {
            kind,
            compress: true,
        }
    }

    /// Request or suppress compression for this message.
    ///
    /// Compression only applies when the extension was negotiated.
    #[must_use]
    pub const fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    #[must_use]
    pub const fn kind(&self) -> MessageKind { self.kind }

    #[must_use]
    pub const fn compress(&self) -> bool { self.compress }
}

impl Default for SendOptions {
    fn default() -> Self { Self::binary() }
}
