//! Connected client and server endpoints over in-memory pipes.

use bulkframe::{Connection, ExtensionParams, TransportConfig};
use tokio::io::{DuplexStream, duplex};

use crate::TrickleStream;

/// Client and server connections joined by a duplex pipe of `capacity`
/// bytes in each direction.
///
/// `client_params` are the client's negotiated parameters; the server uses
/// their mirror image.
pub fn connection_pair(
    client: &TransportConfig,
    server: &TransportConfig,
    client_params: ExtensionParams,
    capacity: usize,
) -> (Connection<DuplexStream>, Connection<DuplexStream>) {
    let (client_io, server_io) = duplex(capacity);
    (
        Connection::new(client_io, client, client_params),
        Connection::new(server_io, server, client_params.mirrored()),
    )
}

/// Like [`connection_pair`], with both ends moving at most `step` bytes per
/// read or write and stalling on alternate polls.
pub fn trickle_pair(
    client: &TransportConfig,
    server: &TransportConfig,
    client_params: ExtensionParams,
    step: usize,
) -> (
    Connection<TrickleStream<DuplexStream>>,
    Connection<TrickleStream<DuplexStream>>,
) {
    let (client_io, server_io) = duplex(step * 4);
    (
        Connection::new(
            TrickleStream::new(client_io, step).with_stalls(),
            client,
            client_params,
        ),
        Connection::new(
            TrickleStream::new(server_io, step).with_stalls(),
            server,
            client_params.mirrored(),
        ),
    )
}
