//! Shared helpers for connection-level integration tests.
#![allow(dead_code, reason = "not every test binary uses every helper")]

use std::num::NonZeroUsize;

use bulkframe::{Connection, Delivery, DeliveryMode, Role, TransportConfig};
use tokio::io::{AsyncRead, AsyncWrite};

/// Transport settings for one endpoint.
pub fn config(role: Role, max_fragment_size: usize, delivery: DeliveryMode) -> TransportConfig {
    TransportConfig::new(role)
        .with_max_fragment_size(NonZeroUsize::new(max_fragment_size).expect("non-zero"))
        .with_delivery(delivery)
}

/// Assembled delivery capped at `max_message_size` bytes.
pub fn assembled(max_message_size: usize) -> DeliveryMode {
    DeliveryMode::Assembled {
        max_message_size: NonZeroUsize::new(max_message_size).expect("non-zero"),
    }
}

/// One message as seen by the receiving application.
#[derive(Debug, Default)]
pub struct Received {
    pub payload: Vec<u8>,
    pub chunks: usize,
    pub largest_chunk: usize,
    pub peak_buffered: usize,
}

/// Receive the next whole message in either delivery mode.
///
/// Records the largest chunk and the connection's peak buffer occupancy
/// while the message was arriving.
pub async fn receive_message<T>(connection: &mut Connection<T>) -> bulkframe::Result<Received>
where
    T: AsyncRead + AsyncWrite,
{
    let mut received = Received::default();
    loop {
        let delivery = connection
            .recv()
            .await?
            .ok_or(bulkframe::TransportError::ConnectionClosed)?;
        received.peak_buffered = received.peak_buffered.max(connection.buffered());
        match delivery {
            Delivery::Chunk(chunk) => {
                assert_eq!(chunk.offset(), received.payload.len() as u64);
                received.chunks += 1;
                received.largest_chunk = received.largest_chunk.max(chunk.data().len());
                received.payload.extend_from_slice(chunk.data());
            }
            Delivery::End(end) => {
                assert_eq!(end.total_len(), received.payload.len() as u64);
                return Ok(received);
            }
            Delivery::Message(message) => {
                received.chunks = 1;
                received.largest_chunk = message.payload().len();
                received.payload = message.into_payload().to_vec();
                return Ok(received);
            }
        }
    }
}
