//! Extension exchange that precedes the frame stream.
//!
//! The client sends a [`ExtensionHandshake`] carrying its extension offer and
//! the server answers with the accepted parameters or a rejection. Records
//! are bincode-encoded and read incrementally, requesting exactly as many
//! bytes as the decoder reports missing so no frame bytes are consumed.

use bincode::{
    Decode,
    Encode,
    config,
    error::{DecodeError, EncodeError},
};
use log::debug;
use thiserror::Error;
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    error::{Result, TransportError},
    extension::{ExtensionNegotiator, ExtensionParams, NegotiationMismatch},
};

const HANDSHAKE_MAGIC: [u8; 4] = *b"BFRM";
const HANDSHAKE_VERSION: u8 = 1;
const MAX_HANDSHAKE_LEN: usize = 1024;

/// Errors raised while exchanging handshake records.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("failed to decode handshake: {0}")]
    Decode(#[from] DecodeError),
    #[error("failed to encode handshake: {0}")]
    Encode(#[from] EncodeError),
    #[error("handshake does not start with the expected magic bytes")]
    BadMagic,
    #[error("unsupported handshake version {0}")]
    UnsupportedVersion(u8),
    #[error("handshake exceeds {MAX_HANDSHAKE_LEN} bytes")]
    TooLong,
    #[error("peer rejected the extension offer: {0}")]
    Rejected(String),
}

/// Handshake record exchanged in each direction.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct ExtensionHandshake {
    magic: [u8; 4],
    version: u8,
    accepted: bool,
    extensions: String,
}

impl ExtensionHandshake {
    /// Record carrying a client's offer; `None` offers no extensions.
    #[must_use]
    pub fn offer(extensions: Option<String>) -> Self {
        Self {
            magic: HANDSHAKE_MAGIC,
            version: HANDSHAKE_VERSION,
            accepted: true,
            extensions: extensions.unwrap_or_default(),
        }
    }

    /// Record accepting the connection with the given response header.
    #[must_use]
    pub fn accept(response: Option<&str>) -> Self {
        Self::offer(response.map(str::to_owned))
    }

    /// Record refusing the connection.
    #[must_use]
    pub fn reject(reason: &NegotiationMismatch) -> Self {
        Self {
            accepted: false,
            ..Self::offer(Some(reason.to_string()))
        }
    }

    #[must_use]
    pub const fn accepted(&self) -> bool { self.accepted }

    /// Extension header value, if any.
    #[must_use]
    pub fn extension_header(&self) -> Option<&str> {
        (!self.extensions.is_empty()).then_some(self.extensions.as_str())
    }
}

fn wire_config() -> impl config::Config {
    config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
        .with_limit::<MAX_HANDSHAKE_LEN>()
}

async fn read_more<R>(reader: &mut R, buf: &mut Vec<u8>, additional: usize) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let start = buf.len();
    if start + additional > MAX_HANDSHAKE_LEN {
        return Err(HandshakeError::TooLong.into());
    }
    buf.resize(start + additional, 0);
    match reader.read_exact(&mut buf[start..]).await {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Err(TransportError::PrematureClose),
        Err(err) => Err(err.into()),
    }
}

/// Read one handshake record.
///
/// # Errors
///
/// Returns [`HandshakeError`] for malformed records and
/// [`TransportError::PrematureClose`] if the stream ends first.
pub async fn read_handshake<R>(reader: &mut R) -> Result<ExtensionHandshake>
where
    R: AsyncRead + Unpin,
{
    // Every record is longer than this, so the first read never overshoots.
    let mut buf = Vec::new();
    read_more(reader, &mut buf, 8).await?;
    let config = wire_config();
    let record = loop {
        match bincode::decode_from_slice::<ExtensionHandshake, _>(&buf, config) {
            Ok((record, _)) => break record,
            Err(DecodeError::UnexpectedEnd { additional }) => {
                read_more(reader, &mut buf, additional).await?;
            }
            Err(err) => return Err(HandshakeError::from(err).into()),
        }
    };
    if record.magic != HANDSHAKE_MAGIC {
        return Err(HandshakeError::BadMagic.into());
    }
    if record.version != HANDSHAKE_VERSION {
        return Err(HandshakeError::UnsupportedVersion(record.version).into());
    }
    Ok(record)
}

/// Write one handshake record and flush it.
///
/// # Errors
///
/// Returns [`HandshakeError::Encode`] if encoding fails and I/O errors from
/// the writer.
pub async fn write_handshake<W>(writer: &mut W, record: &ExtensionHandshake) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = bincode::encode_to_vec(record, wire_config()).map_err(HandshakeError::from)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Offer compression to a server and apply its answer.
///
/// # Errors
///
/// Returns [`HandshakeError::Rejected`] when the server refuses the offer and
/// [`TransportError::NegotiationMismatch`] when its response does not fit the
/// local policy.
pub async fn client_handshake<S>(stream: &mut S, negotiator: &ExtensionNegotiator) -> Result<ExtensionParams>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_handshake(stream, &ExtensionHandshake::offer(negotiator.offer())).await?;
    let response = read_handshake(stream).await?;
    if !response.accepted() {
        return Err(HandshakeError::Rejected(response.extensions).into());
    }
    let params = negotiator.accept_response(response.extension_header())?;
    debug!("client negotiated {params:?}");
    Ok(params)
}

/// Read a client's offer, negotiate and answer it.
///
/// # Errors
///
/// Returns [`TransportError::NegotiationMismatch`] after sending a rejection
/// when no offer fits the local policy.
pub async fn server_handshake<S>(stream: &mut S, negotiator: &ExtensionNegotiator) -> Result<ExtensionParams>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let offer = read_handshake(stream).await?;
    match negotiator.negotiate_offer(offer.extension_header()) {
        Ok(negotiated) => {
            write_handshake(stream, &ExtensionHandshake::accept(negotiated.response())).await?;
            debug!("server negotiated {:?}", negotiated.params());
            Ok(negotiated.params())
        }
        Err(mismatch) => {
            write_handshake(stream, &ExtensionHandshake::reject(&mismatch)).await?;
            Err(mismatch.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tokio::io::{AsyncWriteExt, duplex};

    use super::*;
    use crate::extension::{DeflatePolicy, ExtensionNegotiator};

    #[tokio::test]
    async fn handshake_agrees_on_parameters() {
        let (mut client, mut server) = duplex(1024);
        let negotiator = ExtensionNegotiator::default();
        let (client_params, server_params) = tokio::join!(
            client_handshake(&mut client, &negotiator),
            server_handshake(&mut server, &negotiator)
        );
        let client_params = client_params.expect("client handshake");
        let server_params = server_params.expect("server handshake");
        assert!(client_params.enabled);
        assert_eq!(client_params, server_params.mirrored());
    }

    #[tokio::test]
    async fn rejected_offer_reaches_the_client() {
        let (mut client, mut server) = duplex(1024);
        // Server only decompresses 10-bit windows and needs the client bounded,
        // so an offer without `client_max_window_bits` is unacceptable.
        let server_negotiator =
            ExtensionNegotiator::new(DeflatePolicy::default().with_window_bits(8, 10));
        let raw_offer = ExtensionHandshake::offer(Some("permessage-deflate".to_owned()));
        let (written, server_result) = tokio::join!(
            async {
                write_handshake(&mut client, &raw_offer).await?;
                read_handshake(&mut client).await
            },
            server_handshake(&mut server, &server_negotiator)
        );
        let response = written.expect("response record");
        assert!(!response.accepted());
        assert!(matches!(
            server_result,
            Err(TransportError::NegotiationMismatch(
                NegotiationMismatch::UnboundedPeerWindow { max: 10 }
            ))
        ));
    }

    #[rstest]
    #[case::bad_magic(*b"XXXX", HANDSHAKE_VERSION)]
    #[case::bad_version(HANDSHAKE_MAGIC, 9)]
    #[tokio::test]
    async fn malformed_records_are_rejected(#[case] magic: [u8; 4], #[case] version: u8) {
        let (mut client, mut server) = duplex(1024);
        let record = ExtensionHandshake {
            magic,
            version,
            accepted: true,
            extensions: String::new(),
        };
        let bytes = bincode::encode_to_vec(&record, wire_config()).expect("encode");
        client.write_all(&bytes).await.expect("write");
        let err = read_handshake(&mut server).await.expect_err("malformed record");
        assert!(matches!(
            err,
            TransportError::Handshake(HandshakeError::BadMagic | HandshakeError::UnsupportedVersion(9))
        ));
    }

    #[tokio::test]
    async fn truncated_record_is_a_premature_close() {
        let (mut client, mut server) = duplex(1024);
        client.write_all(b"BFRM").await.expect("write");
        drop(client);
        let err = read_handshake(&mut server).await.expect_err("truncated");
        assert!(matches!(err, TransportError::PrematureClose));
    }
}
