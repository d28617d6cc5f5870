//! Deterministic payload generators.

use rand::{RngCore, SeedableRng, rngs::StdRng};

/// `len` bytes of seeded, effectively incompressible data.
pub fn pseudo_random_payload(len: usize, seed: u64) -> Vec<u8> {
    let mut payload = vec![0; len];
    StdRng::seed_from_u64(seed).fill_bytes(&mut payload);
    payload
}

/// `len` bytes of highly repetitive text.
pub fn compressible_payload(len: usize) -> Vec<u8> {
    const LINE: &[u8] = b"the quick brown fox jumps over the lazy dog\n";
    LINE.iter().copied().cycle().take(len).collect()
}
