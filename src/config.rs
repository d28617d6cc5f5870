//! Transport configuration.
//!
//! [`TransportConfig`] fixes the per-connection limits: the endpoint role,
//! the maximum fragment payload `F` and how inbound messages are handed to the
//! application. It is serialisable so deployments can load it from a file.

use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

/// Default maximum fragment payload in bytes (32 KiB).
pub const DEFAULT_MAX_FRAGMENT_SIZE: NonZeroUsize = NonZeroUsize::new(32 * 1024).unwrap();

/// Default cap on a fully assembled inbound message (16 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: NonZeroUsize = NonZeroUsize::new(16 * 1024 * 1024).unwrap();

/// Which end of the connection this endpoint is.
///
/// Clients mask every outbound frame and reject masked inbound frames;
/// servers do the opposite.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Initiating endpoint.
    Client,
    /// Accepting endpoint.
    Server,
}

impl Role {
    /// Whether frames written by this endpoint carry a masking key.
    #[must_use]
    pub const fn masks_outbound(self) -> bool { matches!(self, Self::Client) }

    /// Whether frames read by this endpoint must carry a masking key.
    #[must_use]
    pub const fn expects_masked_inbound(self) -> bool { matches!(self, Self::Server) }
}

/// How inbound messages are surfaced to the application.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Buffer the whole message and deliver it once the final fragment
    /// arrives. Messages larger than `max_message_size` are rejected.
    Assembled {
        /// Upper bound on the reassembled payload.
        max_message_size: NonZeroUsize,
    },
    /// Deliver each decoded chunk as it becomes available, bounded by the
    /// fragment size, followed by an end-of-message marker.
    Streaming,
}

impl Default for DeliveryMode {
    fn default() -> Self {
        Self::Assembled {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Per-connection transport limits.
///
/// # Examples
///
/// ```
/// use std::num::NonZeroUsize;
///
/// use bulkframe::{DeliveryMode, Role, TransportConfig};
///
/// let config = TransportConfig::new(Role::Server)
///     .with_max_fragment_size(NonZeroUsize::new(4096).expect("non-zero"))
///     .with_delivery(DeliveryMode::Streaming);
/// assert_eq!(config.max_fragment_size().get(), 4096);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    role: Role,
    #[serde(default = "default_fragment_size")]
    max_fragment_size: NonZeroUsize,
    #[serde(default)]
    delivery: DeliveryMode,
}

fn default_fragment_size() -> NonZeroUsize { DEFAULT_MAX_FRAGMENT_SIZE }

impl TransportConfig {
    /// Create a configuration with default limits for `role`.
    #[must_use]
    pub fn new(role: Role) -> Self {
        Self {
            role,
            max_fragment_size: DEFAULT_MAX_FRAGMENT_SIZE,
            delivery: DeliveryMode::default(),
        }
    }

    /// Override the maximum fragment payload.
    #[must_use]
    pub fn with_max_fragment_size(mut self, max_fragment_size: NonZeroUsize) -> Self {
        self.max_fragment_size = max_fragment_size;
        self
    }

    /// Override how inbound messages are delivered.
    #[must_use]
    pub fn with_delivery(mut self, delivery: DeliveryMode) -> Self {
        self.delivery = delivery;
        self
    }

    /// Return a copy configured for the opposite role.
    #[must_use]
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    #[must_use]
    pub const fn role(&self) -> Role { self.role }

    #[must_use]
    pub const fn max_fragment_size(&self) -> NonZeroUsize { self.max_fragment_size }

    #[must_use]
    pub const fn delivery(&self) -> DeliveryMode { self.delivery }
}
