//! Tests for outbound fragmentation.

use std::{io, time::Duration};

use bytes::{Bytes, BytesMut};
use futures::stream;
use proptest::prelude::*;
use rstest::rstest;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{compressed, context};
use crate::{
    config::DeliveryMode,
    error::TransportError,
    extension::{DEFLATE_TAIL, ExtensionParams, MessageInflater},
    fragment::{ConnectionContext, Delivery, Fragmenter, MessageSource, Reassembler, SendOptions},
    frame::{FragmentFrame, MessageKind},
};

async fn drain(fragmenter: &mut Fragmenter, ctx: &mut ConnectionContext) -> Vec<FragmentFrame> {
    let mut fragments = Vec::new();
    while let Some(fragment) = fragmenter.next_fragment(ctx).await.expect("next fragment") {
        fragments.push(fragment);
    }
    fragments
}

fn assert_well_formed(fragments: &[FragmentFrame], max: usize) {
    let (last, init) = fragments.split_last().expect("at least one fragment");
    assert!(last.header().fin(), "final fragment must carry fin");
    assert!(init.iter().all(|f| !f.header().fin()));
    assert!(fragments[0].header().is_first());
    assert!(fragments[1..].iter().all(|f| !f.header().is_first()));
    assert!(fragments.iter().all(|f| f.payload().len() <= max));
}

#[rstest]
#[case::buffer(true)]
#[case::producer(false)]
#[tokio::test]
async fn million_byte_message_splits_into_31_fragments(#[case] buffered: bool) {
    let mut ctx = context(32_768, ExtensionParams::disabled());
    let payload = vec![0x5a_u8; 1_000_000];
    let source = if buffered {
        MessageSource::from(payload)
    } else {
        MessageSource::producer(io::Cursor::new(payload))
    };
    let mut fragmenter = Fragmenter::new();
    fragmenter
        .begin(&ctx, source, SendOptions::binary())
        .expect("begin");
    let fragments = drain(&mut fragmenter, &mut ctx).await;

    assert_eq!(fragments.len(), 31);
    assert_well_formed(&fragments, 32_768);
    assert!(fragments[..30].iter().all(|f| f.payload().len() == 32_768));
    assert_eq!(fragments[30].payload().len(), 16_960);
    assert_eq!(fragments[0].header().kind(), Some(MessageKind::Binary));
    assert!(!fragments[0].header().compressed());

    let outcome = fragmenter.take_completed().expect("completed transfer");
    assert_eq!(outcome.fragments(), 31);
    assert_eq!(outcome.source_bytes(), 1_000_000);
    assert!(!fragmenter.has_transfer());
}

#[rstest]
#[case::buffer(true)]
#[case::producer(false)]
#[tokio::test]
async fn exact_multiple_has_no_trailing_empty_fragment(#[case] buffered: bool) {
    let mut ctx = context(1024, ExtensionParams::disabled());
    let payload = vec![1_u8; 2048];
    let source = if buffered {
        MessageSource::from(payload)
    } else {
        MessageSource::producer(io::Cursor::new(payload))
    };
    let mut fragmenter = Fragmenter::new();
    fragmenter.begin(&ctx, source, SendOptions::text()).expect("begin");
    let fragments = drain(&mut fragmenter, &mut ctx).await;
    assert_eq!(fragments.len(), 2);
    assert_well_formed(&fragments, 1024);
    assert_eq!(fragments[0].header().kind(), Some(MessageKind::Text));
}

#[rstest]
#[case::buffer(MessageSource::from(Bytes::new()))]
#[case::producer(MessageSource::producer(tokio::io::empty()))]
#[tokio::test]
async fn empty_message_is_one_final_fragment(#[case] source: MessageSource) {
    let mut ctx = context(16, ExtensionParams::disabled());
    let mut fragmenter = Fragmenter::new();
    fragmenter.begin(&ctx, source, SendOptions::binary()).expect("begin");
    let fragments = drain(&mut fragmenter, &mut ctx).await;
    assert_eq!(fragments.len(), 1);
    assert!(fragments[0].payload().is_empty());
    assert!(fragments[0].header().fin());
    assert!(fragments[0].header().is_first());
}

#[tokio::test]
async fn second_message_waits_for_the_first() {
    let mut ctx = context(4, ExtensionParams::disabled());
    let mut fragmenter = Fragmenter::new();
    fragmenter
        .begin(&ctx, "abcdefgh".into(), SendOptions::binary())
        .expect("begin");
    assert!(matches!(
        fragmenter.begin(&ctx, "next".into(), SendOptions::binary()),
        Err(TransportError::TransferInProgress)
    ));
    drain(&mut fragmenter, &mut ctx).await;
    fragmenter
        .begin(&ctx, "next".into(), SendOptions::binary())
        .expect("begin after completion");
}

#[tokio::test]
async fn compressed_fragments_inflate_to_the_source() {
    let mut ctx = context(256, compressed());
    let text = b"compressible text spans many fragments; ".repeat(2_000);
    let mut fragmenter = Fragmenter::new();
    fragmenter
        .begin(
            &ctx,
            MessageSource::producer(io::Cursor::new(text.clone())),
            SendOptions::text(),
        )
        .expect("begin");
    let fragments = drain(&mut fragmenter, &mut ctx).await;
    assert_well_formed(&fragments, 256);
    assert!(fragments[0].header().compressed());

    let mut wire = BytesMut::new();
    for fragment in &fragments {
        wire.extend_from_slice(fragment.payload());
    }
    assert!(wire.len() < text.len() / 10);
    wire.extend_from_slice(&DEFLATE_TAIL);
    let mut input = wire.freeze();
    let mut inflater = MessageInflater::new(&compressed());
    let mut out = BytesMut::new();
    while !input.is_empty() {
        inflater
            .inflate(&mut input, &mut out, 1 << 20)
            .expect("inflate");
    }
    assert_eq!(&out[..], &text[..]);
}

#[rstest]
#[case::not_negotiated(ExtensionParams::disabled(), true)]
#[case::opted_out(compressed(), false)]
#[tokio::test]
async fn compression_needs_negotiation_and_request(
    #[case] params: ExtensionParams,
    #[case] requested: bool,
) {
    let mut ctx = context(64, params);
    let mut fragmenter = Fragmenter::new();
    fragmenter
        .begin(
            &ctx,
            "plain".into(),
            SendOptions::binary().with_compression(requested),
        )
        .expect("begin");
    let fragments = drain(&mut fragmenter, &mut ctx).await;
    assert!(!fragments[0].header().compressed());
    assert_eq!(fragments[0].payload(), b"plain");
}

#[tokio::test]
async fn producer_failure_aborts_the_transfer() {
    let mut ctx = context(2, ExtensionParams::disabled());
    let chunks = vec![
        Ok(Bytes::from_static(b"abc")),
        Err(io::Error::other("producer failed")),
    ];
    let mut fragmenter = Fragmenter::new();
    fragmenter
        .begin(
            &ctx,
            MessageSource::from_stream(stream::iter(chunks)),
            SendOptions::binary(),
        )
        .expect("begin");
    let first = fragmenter
        .next_fragment(&mut ctx)
        .await
        .expect("first fragment")
        .expect("fragment");
    assert_eq!(first.payload(), b"ab");
    assert!(matches!(
        fragmenter.next_fragment(&mut ctx).await,
        Err(TransportError::Source(_))
    ));
    assert!(!fragmenter.has_transfer());
    assert!(fragmenter.take_completed().is_none());
}

#[tokio::test]
async fn cancelled_fragment_leaves_the_transfer_intact() {
    let mut ctx = context(16, ExtensionParams::disabled());
    let (mut writer, reader) = tokio::io::duplex(64);
    let mut fragmenter = Fragmenter::new();
    fragmenter
        .begin(&ctx, MessageSource::producer(reader), SendOptions::binary())
        .expect("begin");

    let pending = tokio::time::timeout(
        Duration::from_millis(20),
        fragmenter.next_fragment(&mut ctx),
    )
    .await;
    assert!(pending.is_err(), "producer has no data yet");
    assert_eq!(fragmenter.transfer().map(|t| t.cursor()), Some(0));

    writer.write_all(b"hello").await.expect("write");
    drop(writer);
    let fragment = fragmenter
        .next_fragment(&mut ctx)
        .await
        .expect("fragment")
        .expect("some");
    assert_eq!(fragment.payload(), b"hello");
    assert!(fragment.header().fin());
}

#[tokio::test]
async fn abort_resets_the_deflate_stream() {
    let mut ctx = context(8, compressed());
    let mut fragmenter = Fragmenter::new();
    let noise: Vec<u8> = (0..262_144_u32).map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8).collect();
    fragmenter
        .begin(&ctx, noise.into(), SendOptions::binary())
        .expect("begin");
    fragmenter
        .next_fragment(&mut ctx)
        .await
        .expect("fragment")
        .expect("some");
    fragmenter.abort(&mut ctx);
    assert!(!fragmenter.has_transfer());

    // A fresh stream compresses an empty message to the lone stored-block byte.
    fragmenter
        .begin(&ctx, Bytes::new().into(), SendOptions::binary())
        .expect("begin");
    let fragments = drain(&mut fragmenter, &mut ctx).await;
    assert_eq!(fragments.len(), 1);
    assert_eq!(fragments[0].payload(), &[0x00]);
}

proptest! {
    #[test]
    fn fragment_counts_match_the_source_length(len in 0_usize..5_000, max in 1_usize..600) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime");
        let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let fragments = runtime.block_on(async {
            let mut ctx = context(max, ExtensionParams::disabled());
            let mut fragmenter = Fragmenter::new();
            fragmenter
                .begin(&ctx, MessageSource::producer(io::Cursor::new(payload.clone())), SendOptions::binary())
                .expect("begin");
            drain(&mut fragmenter, &mut ctx).await
        });
        prop_assert_eq!(fragments.len(), len.div_ceil(max).max(1));
        prop_assert!(fragments.iter().all(|f| f.payload().len() <= max));
        let mut joined = Vec::with_capacity(len);
        for fragment in &fragments {
            joined.extend_from_slice(fragment.payload());
        }
        prop_assert_eq!(joined, payload);
    }
}

/// Send `payload` through a fragmenter and a reassembler, returning the
/// message as the application sees it.
fn round_trip(payload: &[u8], max: usize, params: ExtensionParams, reassembler: &mut Reassembler) -> Vec<u8> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime");
    let mut sender = context(max, params);
    let mut receiver = context(max, params.mirrored());
    let fragments = runtime.block_on(async {
        let mut fragmenter = Fragmenter::new();
        fragmenter
            .begin(&sender, Bytes::copy_from_slice(payload).into(), SendOptions::binary())
            .expect("begin");
        drain(&mut fragmenter, &mut sender).await
    });

    let mut received = Vec::with_capacity(payload.len());
    for fragment in fragments {
        assert!(reassembler.ready_for_fragment());
        let (header, data) = fragment.into_parts();
        reassembler
            .on_fragment(&mut receiver, header, data)
            .expect("fragment accepted");
        while let Some(delivery) = reassembler.poll_delivery(&mut receiver).expect("poll") {
            match delivery {
                Delivery::Message(message) => received.extend_from_slice(message.payload()),
                Delivery::Chunk(chunk) => {
                    assert!(chunk.data().len() <= max);
                    received.extend_from_slice(chunk.data());
                }
                Delivery::End(_) => {}
            }
        }
    }
    received
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn messages_survive_fragmentation_and_reassembly(
        payload in proptest::collection::vec(prop_oneof![Just(b'a'), any::<u8>()], 0..4_000),
        max in 1_usize..300,
        compression in any::<bool>(),
        streaming in any::<bool>(),
    ) {
        let params = if compression { compressed() } else { ExtensionParams::disabled() };
        let mode = if streaming {
            DeliveryMode::Streaming
        } else {
            DeliveryMode::Assembled {
                max_message_size: std::num::NonZeroUsize::new(1 << 20).expect("non-zero"),
            }
        };
        let mut reassembler = Reassembler::new(mode);
        let received = round_trip(&payload, max, params, &mut reassembler);
        prop_assert_eq!(received, payload);
        prop_assert_eq!(reassembler, Reassembler::new(mode));
    }
}

#[tokio::test]
async fn sources_read_lazily() {
    // A producer that never ends must not be drained ahead of demand.
    let mut ctx = context(64, ExtensionParams::disabled());
    let endless = tokio::io::repeat(7).take(u64::MAX);
    let mut fragmenter = Fragmenter::new();
    fragmenter
        .begin(&ctx, MessageSource::producer(endless), SendOptions::binary())
        .expect("begin");
    for _ in 0..3 {
        let fragment = fragmenter
            .next_fragment(&mut ctx)
            .await
            .expect("fragment")
            .expect("some");
        assert_eq!(fragment.payload().len(), 64);
        assert!(!fragment.header().fin());
    }
    let transfer = fragmenter.transfer().expect("transfer in progress");
    assert!(transfer.cursor() <= 4 * 64 + 1);
    assert!(transfer.buffered() <= 2 * 64);
}
