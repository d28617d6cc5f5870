//! Command line interface for the `bulkframe` binary.

use std::{net::SocketAddr, num::NonZeroUsize};

use bulkframe::{
    DEFAULT_MAX_FRAGMENT_SIZE,
    DeflatePolicy,
    DeliveryMode,
    Role,
    TransportConfig,
    extension::MIN_COMPRESS_WINDOW_BITS,
};
use clap::{Parser, Subcommand};

/// Command line arguments for the `bulkframe` binary.
#[derive(Debug, Parser)]
#[command(
    name = "bulkframe",
    version,
    about = "Stream large messages over fragmenting, compressing connections"
)]
pub struct Cli {
    /// Maximum fragment payload in bytes.
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_FRAGMENT_SIZE)]
    pub fragment_size: NonZeroUsize,
    /// Neither offer nor accept `permessage-deflate`.
    #[arg(long, global = true)]
    pub no_compression: bool,
    /// Reset compression context after every message.
    #[arg(long, global = true)]
    pub no_context_takeover: bool,
    /// Largest deflate window, in bits.
    #[arg(
        long,
        global = true,
        default_value_t = 15,
        value_parser = clap::value_parser!(u8).range(9..=15)
    )]
    pub max_window_bits: u8,
    /// Serve Prometheus metrics on this address.
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Accept connections and reply to each message with its length and digest.
    Serve {
        #[arg(long, default_value = "127.0.0.1:7878")]
        listen: SocketAddr,
    },
    /// Stream a generated message to a server and verify its reply.
    Send {
        #[arg(long, default_value = "127.0.0.1:7878")]
        connect: SocketAddr,
        /// Message length in bytes.
        #[arg(long, default_value_t = 1_000_000)]
        size: u64,
        /// Seed of the generated byte pattern.
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

impl Cli {
    /// Compression policy derived from the global flags.
    pub fn policy(&self) -> DeflatePolicy {
        if self.no_compression {
            return DeflatePolicy::disabled();
        }
        DeflatePolicy::default()
            .with_no_context_takeover(self.no_context_takeover)
            .with_window_bits(MIN_COMPRESS_WINDOW_BITS, self.max_window_bits)
    }

    /// Transport limits for `role`.
    pub fn transport(&self, role: Role, delivery: DeliveryMode) -> TransportConfig {
        TransportConfig::new(role)
            .with_max_fragment_size(self.fragment_size)
            .with_delivery(delivery)
    }
}
