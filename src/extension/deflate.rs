//! Incremental raw-deflate streams for `permessage-deflate`.
//!
//! Each message is compressed as a run of raw deflate data ended by a sync
//! flush whose empty stored block (`00 00 ff ff`) is stripped before sending
//! and re-appended before the final inflate on receipt. Streams keep their
//! LZ77 window between messages unless context takeover is disabled.

use bytes::{Buf, Bytes, BytesMut};
use flate2::{
    Compress,
    CompressError,
    Compression,
    Decompress,
    DecompressError,
    FlushCompress,
    FlushDecompress,
};
use log::trace;

use super::params::{ExtensionParams, MIN_COMPRESS_WINDOW_BITS};

/// Empty stored block produced by a sync flush.
pub const DEFLATE_TAIL: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// Output bytes reserved per compression step.
const DEFLATE_CHUNK: usize = 4096;

#[expect(
    clippy::cast_possible_truncation,
    reason = "stream counters advance by at most one output buffer per call"
)]
fn delta(before: u64, after: u64) -> usize { (after - before) as usize }

/// Outbound per-message compressor.
#[derive(Debug)]
pub struct MessageDeflater {
    stream: Compress,
    window_bits: u8,
    no_context_takeover: bool,
}

impl MessageDeflater {
    /// Build a compressor for the local side of `params`.
    #[must_use]
    pub fn new(params: &ExtensionParams) -> Self {
        // Negotiation never assigns less than the floor; hand-built params may.
        let window_bits = params.max_window_bits.max(MIN_COMPRESS_WINDOW_BITS);
        Self {
            stream: Self::fresh_stream(window_bits),
            window_bits,
            no_context_takeover: params.no_context_takeover,
        }
    }

    fn fresh_stream(window_bits: u8) -> Compress {
        Compress::new_with_window_bits(Compression::default(), false, window_bits)
    }

    /// Compress `input` as part of the current message, appending whatever
    /// output the stream releases to `out`.
    ///
    /// # Errors
    ///
    /// Returns [`CompressError`] if the underlying stream fails.
    pub fn compress(&mut self, input: &[u8], out: &mut BytesMut) -> Result<(), CompressError> {
        self.run(input, out, FlushCompress::None)
    }

    /// Flush the current message and strip the trailing empty block.
    ///
    /// Resets the stream afterwards when context takeover is disabled.
    ///
    /// # Errors
    ///
    /// Returns [`CompressError`] if the underlying stream fails.
    pub fn finish_message(&mut self, out: &mut BytesMut) -> Result<(), CompressError> {
        self.run(&[], out, FlushCompress::Sync)?;
        if out.ends_with(&DEFLATE_TAIL) {
            out.truncate(out.len() - DEFLATE_TAIL.len());
        }
        if self.no_context_takeover {
            self.reset();
        }
        Ok(())
    }

    /// Discard all compression state.
    pub fn reset(&mut self) {
        trace!("resetting deflate stream");
        self.stream = Self::fresh_stream(self.window_bits);
    }

    fn run(
        &mut self,
        mut input: &[u8],
        out: &mut BytesMut,
        flush: FlushCompress,
    ) -> Result<(), CompressError> {
        loop {
            let start = out.len();
            out.resize(start + DEFLATE_CHUNK, 0);
            let (in_before, out_before) = (self.stream.total_in(), self.stream.total_out());
            let status = self.stream.compress(input, &mut out[start..], flush);
            let consumed = delta(in_before, self.stream.total_in());
            let produced = delta(out_before, self.stream.total_out());
            out.truncate(start + produced);
            status?;
            input = &input[consumed..];
            if input.is_empty() && produced < DEFLATE_CHUNK {
                return Ok(());
            }
        }
    }
}

/// Inbound per-message decompressor.
#[derive(Debug)]
pub struct MessageInflater {
    stream: Decompress,
    window_bits: u8,
    no_context_takeover: bool,
}

impl MessageInflater {
    /// Build a decompressor for the peer side of `params`.
    #[must_use]
    pub fn new(params: &ExtensionParams) -> Self {
        // A larger inflate window reads any stream written with a smaller one.
        let window_bits = params.peer_max_window_bits.max(MIN_COMPRESS_WINDOW_BITS);
        Self {
            stream: Decompress::new_with_window_bits(false, window_bits),
            window_bits,
            no_context_takeover: params.peer_no_context_takeover,
        }
    }

    /// Inflate from the front of `input` into `out`, producing at most
    /// `limit` bytes. Consumed input is removed from `input`.
    ///
    /// Returns the number of bytes appended to `out`.
    ///
    /// # Errors
    ///
    /// Returns [`DecompressError`] if the input is not valid deflate data.
    pub fn inflate(
        &mut self,
        input: &mut Bytes,
        out: &mut BytesMut,
        limit: usize,
    ) -> Result<usize, DecompressError> {
        let start = out.len();
        out.resize(start + limit, 0);
        let (in_before, out_before) = (self.stream.total_in(), self.stream.total_out());
        let status = self
            .stream
            .decompress(input, &mut out[start..], FlushDecompress::Sync);
        let consumed = delta(in_before, self.stream.total_in());
        let produced = delta(out_before, self.stream.total_out());
        out.truncate(start + produced);
        input.advance(consumed);
        status?;
        Ok(produced)
    }

    /// Mark the end of a message, resetting the stream when the peer does not
    /// carry its window across messages.
    pub fn finish_message(&mut self) {
        if self.no_context_takeover {
            self.reset();
        }
    }

    /// Discard all decompression state.
    pub fn reset(&mut self) {
        trace!("resetting inflate stream");
        self.stream = Decompress::new_with_window_bits(false, self.window_bits);
    }
}
