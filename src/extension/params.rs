//! Negotiated parameters and local negotiation policy.

use serde::{Deserialize, Serialize};

use super::error::NegotiationMismatch;

/// Smallest LZ77 window, in bits, accepted on the wire.
pub const MIN_WINDOW_BITS: u8 = 8;
/// Largest LZ77 window, in bits, accepted on the wire.
pub const MAX_WINDOW_BITS: u8 = 15;
/// Smallest window zlib can compress with. Peers may still compress with
/// 8 bits; only the local compressor is bound by this floor.
pub const MIN_COMPRESS_WINDOW_BITS: u8 = 9;

/// Result of a successful compression negotiation.
///
/// The `no_context_takeover` and `max_window_bits` fields govern this
/// endpoint's compressor; the `peer_*` fields describe the window the peer
/// compresses with and therefore govern this endpoint's decompressor.
/// Parameters are immutable once a connection is established.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionParams {
    /// Whether `permessage-deflate` is in effect.
    pub enabled: bool,
    /// Reset the local compressor after every message.
    pub no_context_takeover: bool,
    /// Window bits used by the local compressor.
    pub max_window_bits: u8,
    /// The peer resets its compressor after every message.
    pub peer_no_context_takeover: bool,
    /// Window bits the peer compresses with.
    pub peer_max_window_bits: u8,
}

impl ExtensionParams {
    /// Parameters for a connection without compression.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            no_context_takeover: false,
            max_window_bits: MAX_WINDOW_BITS,
            peer_no_context_takeover: false,
            peer_max_window_bits: MAX_WINDOW_BITS,
        }
    }

    /// Parameters applying the same settings in both directions.
    #[must_use]
    pub const fn symmetric(no_context_takeover: bool, max_window_bits: u8) -> Self {
        Self {
            enabled: true,
            no_context_takeover,
            max_window_bits,
            peer_no_context_takeover: no_context_takeover,
            peer_max_window_bits: max_window_bits,
        }
    }

    /// Parameters as seen from the other end of the connection.
    #[must_use]
    pub const fn mirrored(self) -> Self {
        Self {
            enabled: self.enabled,
            no_context_takeover: self.peer_no_context_takeover,
            max_window_bits: self.peer_max_window_bits,
            peer_no_context_takeover: self.no_context_takeover,
            peer_max_window_bits: self.max_window_bits,
        }
    }
}

impl Default for ExtensionParams {
    fn default() -> Self { Self::disabled() }
}

/// Locally configured bounds applied while negotiating.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeflatePolicy {
    /// Offer or accept compression at all.
    pub enabled: bool,
    /// Require both compressors to reset between messages.
    pub no_context_takeover: bool,
    /// Smallest window this endpoint agrees to compress with. Never below
    /// [`MIN_COMPRESS_WINDOW_BITS`].
    pub min_window_bits: u8,
    /// Largest window this endpoint will compress or decompress with.
    pub max_window_bits: u8,
}

impl DeflatePolicy {
    /// A policy that neither offers nor accepts compression.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            no_context_takeover: false,
            min_window_bits: MIN_COMPRESS_WINDOW_BITS,
            max_window_bits: MAX_WINDOW_BITS,
        }
    }

    /// Require or waive context reset between messages.
    #[must_use]
    pub const fn with_no_context_takeover(mut self, value: bool) -> Self {
        self.no_context_takeover = value;
        self
    }

    /// Restrict the accepted window sizes.
    ///
    /// Values are clamped to the range the local compressor supports and
    /// `max` is raised to `min` if the bounds are inverted.
    #[must_use]
    pub fn with_window_bits(mut self, min: u8, max: u8) -> Self {
        let min = min.clamp(MIN_COMPRESS_WINDOW_BITS, MAX_WINDOW_BITS);
        self.min_window_bits = min;
        self.max_window_bits = max.clamp(min, MAX_WINDOW_BITS);
        self
    }

    /// Smallest window the local compressor may be assigned.
    #[must_use]
    pub const fn compress_floor(&self) -> u8 {
        if self.min_window_bits > MIN_COMPRESS_WINDOW_BITS {
            self.min_window_bits
        } else {
            MIN_COMPRESS_WINDOW_BITS
        }
    }

    /// Whether the local compressor may run with a `bits` window.
    #[must_use]
    pub const fn accepts(&self, bits: u8) -> bool {
        bits >= self.compress_floor() && bits <= self.max_window_bits
    }

    pub(super) fn out_of_bounds(&self, bits: u8) -> NegotiationMismatch {
        NegotiationMismatch::WindowBitsOutOfBounds {
            bits,
            min: self.compress_floor(),
            max: self.max_window_bits,
        }
    }
}

impl Default for DeflatePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            ..Self::disabled()
        }
    }
}
