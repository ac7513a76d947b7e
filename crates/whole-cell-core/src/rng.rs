use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;

use crate::constants::{RAND_MAX, RNG_DERIVATION_PRIME};

/// Create a deterministic RNG from a seed.
pub fn create_rng(seed: u64) -> ChaCha12Rng {
    ChaCha12Rng::seed_from_u64(seed)
}

/// 64-bit FNV-1a. Stable across platforms and toolchains, unlike `DefaultHasher`.
pub fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(PRIME))
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// Seed for a named sub-stream (a collection, a state path, a salt string).
pub fn named_seed(base_seed: u64, name: &str) -> u64 {
    splitmix64(fnv1a(name.as_bytes()) ^ base_seed.wrapping_mul(RNG_DERIVATION_PRIME))
}

/// Seed handed to daughter `daughter` (0 or 1) of a cell seeded with `parent_seed`.
///
/// Reproducible for a given parent, and distinct between the two daughters.
pub fn daughter_seed(parent_seed: u64, daughter: usize) -> u64 {
    let stream = (daughter as u64 + 1).wrapping_mul(RNG_DERIVATION_PRIME);
    splitmix64(parent_seed.wrapping_add(stream)) % RAND_MAX
}
