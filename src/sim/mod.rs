//! Simulation Module
//!
//! The deterministic world and everything that may mutate it. Code in this
//! module never reads the wall clock, never touches floats and never
//! iterates an unordered container.
//!
//! ## Module Structure
//!
//! - `components`: entity metadata and component payloads
//! - `cosmos`: the simulation world - pools, clock, advance entry point
//! - `entropy`: per-tick, per-player input collections
//! - `solve`: the rule systems dispatched by one step

pub mod components;
pub mod cosmos;
pub mod entropy;
pub mod solve;

// Re-export key types
pub use components::{Character, Entity, EntityGuid, EntityKind, Item, Mobility, Transform};
pub use cosmos::{Component, Cosmos, CosmosClock, EntityId};
pub use entropy::{
    CosmicEntropy, EntropyAccumulator, InputEvent, Intent, IntentKind, ItemTransfer, Motion,
    PlayerEntropy, SpellCast, SpellKind, WieldAction,
};
pub use solve::{SimEffect, SolveSettings, StepResult};
