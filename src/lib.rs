//! # Emberfall Lockstep Core
//!
//! Deterministic lockstep simulation core: a versioned-handle world that
//! advances only through per-tick entropy, plus the client prediction and
//! authoritative server machinery built on top of it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      EMBERFALL CORE                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── fixed.rs    - Q16.16 fixed-point arithmetic             │
//! │  ├── vec2.rs     - 2D vector with fixed-point                │
//! │  ├── rng.rs      - Deterministic Xorshift128+ PRNG           │
//! │  ├── hash.rs     - State digests for desync detection        │
//! │  └── pool.rs     - Versioned slot pool (stable handles)      │
//! │                                                              │
//! │  sim/            - Simulation (deterministic)                │
//! │  ├── components.rs - Entity metadata and payloads            │
//! │  ├── cosmos.rs   - The world: pools, clock, advance          │
//! │  ├── entropy.rs  - Per-tick, per-player input collections    │
//! │  └── solve.rs    - The rule systems of one step              │
//! │                                                              │
//! │  net/            - Networking (non-deterministic)            │
//! │  ├── protocol.rs - Wire commands                             │
//! │  ├── transport.rs- Reliable/redundant delivery classes       │
//! │  ├── jitter.rs   - Per-connection entropy smoothing          │
//! │  ├── session.rs  - Client lifecycle state machine            │
//! │  ├── client.rs   - Prediction, rollback, resync              │
//! │  └── server.rs   - Authoritative catch-up loop               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! The `core/` and `sim/` modules are **100% deterministic**:
//! - No floating-point arithmetic in simulation logic
//! - No HashMap (uses BTreeMap for sorted iteration)
//! - No system time dependencies
//! - All randomness from the in-state, seeded Xorshift128+
//!
//! Given the same serialized cosmos and the same entropy sequence, every
//! peer computes **bit-identical** successor states on any platform - the
//! property that lets clients predict ahead and roll back on confirmation
//! instead of waiting on the server.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod net;
pub mod sim;

// Re-export commonly used types
pub use crate::core::fixed::{Fixed, FIXED_HALF, FIXED_ONE, FIXED_SCALE};
pub use crate::core::pool::{Pool, PoolId};
pub use crate::core::rng::DeterministicRng;
pub use crate::core::vec2::FixedVec2;
pub use crate::net::{ClientSetup, ClientVars, ServerSetup, ServerVars};
pub use crate::sim::{Cosmos, CosmicEntropy, EntityGuid, EntityId, PlayerEntropy};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default simulation tick rate (Hz)
pub const DEFAULT_TICK_RATE: u32 = 60;
