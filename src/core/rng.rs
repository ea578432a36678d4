//! Deterministic Random Number Generator
//!
//! Xorshift128+ seeded exclusively from in-state data. The generator lives
//! inside the cosmos and serializes with it, so a cloned world replays the
//! exact same sequence. Nothing in here may ever touch the host clock.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::fixed::{Fixed, FIXED_ONE};
use super::vec2::FixedVec2;

/// Deterministic PRNG using the Xorshift128+ algorithm.
///
/// Given the same seed, produces the identical sequence on every platform.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterministicRng {
    state: [u64; 2],
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DeterministicRng {
    /// Create a new RNG from a 64-bit seed.
    ///
    /// Uses SplitMix64 to initialize the internal state, ensuring
    /// good distribution even from weak seeds.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let state0 = splitmix64(&mut s);
        let state1 = splitmix64(&mut s);

        // Xorshift state must never be all zeros
        let state = if state0 == 0 && state1 == 0 {
            [1, 1]
        } else {
            [state0, state1]
        };

        Self { state }
    }

    /// Generate the next 64-bit random value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.state[1] = s1.rotate_left(37);

        result
    }

    /// Generate a random integer in range `[0, max)`.
    #[inline]
    pub fn next_int(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        (self.next_u64() % max as u64) as u32
    }

    /// Generate a random Fixed in range `[0, max)`.
    #[inline]
    pub fn next_fixed(&mut self, max: Fixed) -> Fixed {
        if max <= 0 {
            return 0;
        }
        let raw = (self.next_u64() >> 32) as u32;
        ((raw as i64 * max as i64) >> 32) as Fixed
    }

    /// Generate a random Fixed in range `[min, max)`.
    #[inline]
    pub fn next_fixed_range(&mut self, min: Fixed, max: Fixed) -> Fixed {
        if min >= max {
            return min;
        }
        let range = max.wrapping_sub(min);
        min.wrapping_add(self.next_fixed(range))
    }

    /// Generate a random offset vector with components in `[-extent, extent)`.
    pub fn next_offset(&mut self, extent: Fixed) -> FixedVec2 {
        let x = self.next_fixed_range(-extent, extent);
        let y = self.next_fixed_range(-extent, extent);
        FixedVec2::new(x, y)
    }

    /// Generate a random boolean with the given probability.
    ///
    /// `probability` is in `[0, FIXED_ONE]` where `FIXED_ONE` = 100%.
    #[inline]
    pub fn next_bool(&mut self, probability: Fixed) -> bool {
        self.next_fixed(FIXED_ONE) < probability
    }
}

/// SplitMix64 for seed initialization.
/// Produces well-distributed values from sequential seeds.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Derive a session seed from a label and a raw seed.
///
/// Hashing through SHA-256 keeps weakly chosen session seeds from producing
/// correlated Xorshift streams across sessions.
pub fn derive_session_seed(label: &[u8], raw_seed: u64) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(b"EMBERFALL_SEED_V1");
    hasher.update(label);
    hasher.update(raw_seed.to_le_bytes());

    let digest = hasher.finalize();
    u64::from_le_bytes(digest[..8].try_into().expect("digest is 32 bytes"))
}
