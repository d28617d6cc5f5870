#![cfg(feature = "metrics")]
//! Tests for `bulkframe` metrics.
//!
//! Counters are captured with `metrics_util::debugging::DebuggingRecorder`
//! installed as the thread-local recorder, so each test sees only its own
//! updates.

mod common;

use bulkframe::{
    Connection,
    DeliveryMode,
    Direction,
    ERRORS_TOTAL,
    ExtensionParams,
    FRAGMENTS_PROCESSED,
    MESSAGES_PROCESSED,
    Role,
    SendOptions,
};
use bulkframe_testing::{RawFrame, connection_pair};
use common::{assembled, config, receive_message};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use rstest::rstest;
use tokio::io::{AsyncWriteExt, duplex};

fn debugging_recorder_setup() -> (Snapshotter, DebuggingRecorder) {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    (snapshotter, recorder)
}

/// Value of the counter `name` carrying `label_key=label_value`, if recorded.
fn counter(snapshotter: &Snapshotter, name: &str, label_key: &str, label_value: &str) -> Option<u64> {
    snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .find_map(|(key, _, _, value)| {
            let matches = key.key().name() == name
                && key
                    .key()
                    .labels()
                    .any(|l| l.key() == label_key && l.value() == label_value);
            match value {
                DebugValue::Counter(count) if matches => Some(count),
                _ => None,
            }
        })
}

#[rstest]
#[case(Direction::Inbound, "inbound")]
#[case(Direction::Outbound, "outbound")]
fn fragment_metric_is_labelled_by_direction(#[case] direction: Direction, #[case] label: &str) {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || {
        bulkframe::metrics::inc_fragments(direction);
        bulkframe::metrics::inc_fragments(direction);
    });
    assert_eq!(
        counter(&snapshotter, FRAGMENTS_PROCESSED, "direction", label),
        Some(2)
    );
}

#[tokio::test]
async fn transfers_count_fragments_and_messages() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    let _guard = metrics::set_default_local_recorder(&recorder);

    let (mut client, mut server) = connection_pair(
        &config(Role::Client, 16, DeliveryMode::default()),
        &config(Role::Server, 16, assembled(1024)),
        ExtensionParams::disabled(),
        256,
    );
    let (sent, received) = tokio::join!(
        client.send(vec![3_u8; 100], SendOptions::binary()),
        receive_message(&mut server),
    );
    assert_eq!(sent.expect("send").fragments(), 7);
    received.expect("receive");

    for (name, direction, expected) in [
        (FRAGMENTS_PROCESSED, "outbound", 7),
        (FRAGMENTS_PROCESSED, "inbound", 7),
        (MESSAGES_PROCESSED, "outbound", 1),
        (MESSAGES_PROCESSED, "inbound", 1),
    ] {
        assert_eq!(
            counter(&snapshotter, name, "direction", direction),
            Some(expected),
            "{name}{{direction={direction}}}"
        );
    }
}

#[tokio::test]
async fn fatal_errors_are_counted_by_kind() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    let _guard = metrics::set_default_local_recorder(&recorder);

    let (local, mut peer) = duplex(1024);
    let mut server = Connection::new(
        local,
        &config(Role::Server, 16, assembled(1024)),
        ExtensionParams::disabled(),
    );
    peer.write_all(&RawFrame::binary(true, "unmasked").to_bytes())
        .await
        .expect("raw write");
    server.recv().await.expect_err("unmasked frame");

    assert_eq!(counter(&snapshotter, ERRORS_TOTAL, "kind", "protocol"), Some(1));
}
