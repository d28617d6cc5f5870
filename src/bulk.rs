//! Deterministic bulk payloads for the demo binary.
//!
//! The sender streams a seeded byte pattern of arbitrary length and the
//! receiver folds every chunk into a [`Digest`]. Both ends can then compare
//! digests without either side holding the whole message.

use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::io::{AsyncRead, ReadBuf};

const LCG_MULTIPLIER: u64 = 6_364_136_223_846_793_005;
const LCG_INCREMENT: u64 = 1_442_695_040_888_963_407;
const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;

/// Seeded byte generator; the sequence does not depend on how it is chunked.
#[derive(Clone, Copy, Debug)]
pub struct Pattern {
    state: u64,
}

impl Pattern {
    pub const fn new(seed: u64) -> Self { Self { state: seed } }

    #[expect(
        clippy::cast_possible_truncation,
        reason = "the high byte of the state is the intended output"
    )]
    pub fn next_byte(&mut self) -> u8 {
        self.state = self
            .state
            .wrapping_mul(LCG_MULTIPLIER)
            .wrapping_add(LCG_INCREMENT);
        (self.state >> 56) as u8
    }

    pub fn fill(&mut self, buf: &mut [u8]) {
        for byte in buf {
            *byte = self.next_byte();
        }
    }
}

/// Reader producing `len` bytes of a [`Pattern`].
#[derive(Debug)]
pub struct PatternSource {
    pattern: Pattern,
    remaining: u64,
}

impl PatternSource {
    pub const fn new(seed: u64, len: u64) -> Self {
        Self {
            pattern: Pattern::new(seed),
            remaining: len,
        }
    }
}

impl AsyncRead for PatternSource {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let n = usize::try_from(this.remaining)
            .unwrap_or(usize::MAX)
            .min(buf.remaining());
        this.pattern.fill(buf.initialize_unfilled_to(n));
        buf.advance(n);
        this.remaining -= n as u64;
        Poll::Ready(Ok(()))
    }
}

/// Running length and FNV-1a hash of a byte sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Digest {
    len: u64,
    hash: u64,
}

impl Default for Digest {
    fn default() -> Self {
        Self {
            len: 0,
            hash: FNV_OFFSET,
        }
    }
}

impl Digest {
    pub fn update(&mut self, data: &[u8]) {
        for &byte in data {
            self.hash ^= u64::from(byte);
            self.hash = self.hash.wrapping_mul(FNV_PRIME);
        }
        self.len += data.len() as u64;
    }

    /// Digest of `len` bytes of the pattern seeded with `seed`.
    pub fn of_pattern(seed: u64, len: u64) -> Self {
        let mut pattern = Pattern::new(seed);
        let mut digest = Self::default();
        let mut block = [0_u8; 4096];
        let mut remaining = len;
        while remaining > 0 {
            let n = usize::try_from(remaining).unwrap_or(block.len()).min(block.len());
            pattern.fill(&mut block[..n]);
            digest.update(&block[..n]);
            remaining -= n as u64;
        }
        digest
    }

    /// Text form sent back by the server.
    pub fn render(&self) -> String { format!("{} {:016x}", self.len, self.hash) }
}
