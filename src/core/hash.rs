//! State Digests
//!
//! Deterministic hashing of simulation state, used for:
//! - divergence diagnostics between predicted and referential worlds
//! - integrity checks when applying a full-state snapshot
//! - logging a compact fingerprint of a cosmos
//!
//! Order of updates is part of the digest contract.

use sha2::{Digest, Sha256};

use super::fixed::Fixed;
use super::vec2::FixedVec2;

/// Digest output type (256 bits / 32 bytes)
pub type StateDigest = [u8; 32];

/// Deterministic hasher for simulation state.
///
/// Wraps SHA-256 with helpers for fixed-point types.
pub struct StateHasher {
    hasher: Sha256,
}

impl StateHasher {
    /// Create a new hasher with a domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create the hasher used for whole-cosmos digests.
    pub fn for_cosmos() -> Self {
        Self::new(b"EMBERFALL_STATE_V1")
    }

    /// Update with raw bytes.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Update with a u8 value.
    #[inline]
    pub fn update_u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    /// Update with a u32 value (little-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a u64 value (little-endian).
    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with an i32 value (little-endian).
    #[inline]
    pub fn update_i32(&mut self, value: i32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a Fixed value.
    #[inline]
    pub fn update_fixed(&mut self, value: Fixed) {
        self.update_i32(value);
    }

    /// Update with a FixedVec2.
    #[inline]
    pub fn update_vec2(&mut self, value: FixedVec2) {
        self.update_fixed(value.x);
        self.update_fixed(value.y);
    }

    /// Update with a boolean.
    #[inline]
    pub fn update_bool(&mut self, value: bool) {
        self.update_u8(value as u8);
    }

    /// Finalize and return the digest.
    pub fn finalize(self) -> StateDigest {
        self.hasher.finalize().into()
    }
}

/// Hash arbitrary bytes under a domain separator.
pub fn hash_with_domain(domain: &[u8], data: &[u8]) -> StateDigest {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(data);
    hasher.finalize().into()
}
