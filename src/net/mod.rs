//! Networking Module
//!
//! Everything non-deterministic lives here: wire commands, delivery
//! classes, per-connection jitter buffering, the client prediction engine
//! and the authoritative server loop. Nothing in this module is allowed
//! to reach into a cosmos except through `advance` and serialization.
//!
//! ## Module Structure
//!
//! - `protocol`: client and server wire commands
//! - `transport`: reliable and redundant delivery behind a trait
//! - `jitter`: sequence-ordered smoothing of arriving entropy
//! - `session`: the client connection lifecycle state machine
//! - `client`: prediction, rollback and resync
//! - `server`: the authoritative catch-up loop

pub mod client;
pub mod jitter;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;

// Re-export key types
pub use client::{ClientSetup, ClientTickReport, ClientVars};
pub use jitter::{JitterBuffer, JitterSettings, JitterState, UnpackResult};
pub use protocol::{
    ClientCommand, CompleteState, ProtocolError, ServerCommand, StepEntropy, MAX_ENTROPY_EVENTS,
};
pub use server::{CatchUpTimer, ClientId, ServerSetup, ServerVars};
pub use session::{ClientSession, DisconnectReason, SessionPhase};
pub use transport::{loopback_pair, FaultPlan, LoopbackEndpoint, Transport};
