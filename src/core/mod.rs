//! Core deterministic primitives.
//!
//! Everything in this module is designed for perfect cross-platform
//! determinism: fixed-point math, an in-state PRNG, state digests and the
//! versioned slot pool that backs every entity and component table.

pub mod fixed;
pub mod hash;
pub mod pool;
pub mod rng;
pub mod vec2;

// Re-export core types
pub use fixed::{Fixed, FIXED_HALF, FIXED_ONE, FIXED_SCALE};
pub use hash::{StateDigest, StateHasher};
pub use pool::{Pool, PoolId};
pub use rng::DeterministicRng;
pub use vec2::FixedVec2;
