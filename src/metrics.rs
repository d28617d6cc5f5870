//! Metric helpers for `bulkframe`.
//!
//! This module defines metric names and simple helper functions
//! wrapping the [`metrics`](https://docs.rs/metrics) crate. Without the
//! `metrics` feature every helper compiles to a no-op.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the gauge tracking open connections.
pub const CONNECTIONS_ACTIVE: &str = "bulkframe_connections_active";
/// Name of the counter tracking fragments written or read.
pub const FRAGMENTS_PROCESSED: &str = "bulkframe_fragments_total";
/// Name of the counter tracking whole messages sent or delivered.
pub const MESSAGES_PROCESSED: &str = "bulkframe_messages_total";
/// Name of the counter tracking connection-ending errors.
pub const ERRORS_TOTAL: &str = "bulkframe_errors_total";

/// Direction of fragment processing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Fragments read from the peer.
    Inbound,
    /// Fragments written to the peer.
    Outbound,
}

impl Direction {
    /// Label value attached to directional metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Increment the active connections gauge.
pub fn inc_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

/// Decrement the active connections gauge.
pub fn dec_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a fragment for the given direction.
pub fn inc_fragments(direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(FRAGMENTS_PROCESSED, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record a completed message for the given direction.
pub fn inc_messages(direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(MESSAGES_PROCESSED, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record an error occurrence labelled by its kind.
pub fn inc_errors(kind: &'static str) {
    #[cfg(feature = "metrics")]
    counter!(ERRORS_TOTAL, "kind" => kind).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = kind;
}
