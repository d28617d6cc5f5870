//! Active connection counting and RAII guard.

use std::sync::atomic::{AtomicU64, Ordering};

/// Number of connections currently open in this process.
static ACTIVE_CONNECTIONS: AtomicU64 = AtomicU64::new(0);

/// Guard that counts a connection as active for as long as it lives.
#[derive(Debug)]
pub(super) struct ActiveConnection;

impl ActiveConnection {
    pub(super) fn new() -> Self {
        ACTIVE_CONNECTIONS.fetch_add(1, Ordering::Relaxed);
        crate::metrics::inc_connections();
        Self
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::Relaxed);
        crate::metrics::dec_connections();
    }
}

/// Return the current number of open connections.
#[must_use]
pub fn active_connection_count() -> u64 { ACTIVE_CONNECTIONS.load(Ordering::Relaxed) }
