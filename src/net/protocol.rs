//! Wire Commands
//!
//! Client-server message types for the lockstep session. The wire format
//! is bincode; JSON helpers exist for logging and debugging. Enums stay
//! externally tagged - bincode cannot encode `#[serde(tag = ...)]` enums.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sim::components::EntityGuid;
use crate::sim::entropy::CosmicEntropy;

/// Upper bound on events in a single client entropy packet. Anything
/// larger did not come from a real input device.
pub const MAX_ENTROPY_EVENTS: usize = 256;

/// Decoding and validation failures at the protocol layer.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The payload did not decode as the expected command.
    #[error("malformed command: {0}")]
    Malformed(#[from] bincode::Error),

    /// A client entropy packet exceeded the event budget.
    #[error("entropy packet with {events} events exceeds the limit of {limit}")]
    EntropyTooLarge {
        /// Events counted in the offending packet.
        events: usize,
        /// The configured ceiling.
        limit: usize,
    },
}

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientCommand {
    /// The client's inputs for one of its local ticks.
    RequestedEntropy {
        /// Client-local tick sequence, starting from the value assigned
        /// in [`CompleteState`].
        sequence: u32,
        /// Everything the client's player did that tick.
        entropy: CosmicEntropy,
    },

    /// The client detected a desync and needs the full state again.
    ResyncRequest,
}

impl ClientCommand {
    /// Reject packets no honest client would produce.
    pub fn validate(&self, max_events: usize) -> Result<(), ProtocolError> {
        if let ClientCommand::RequestedEntropy { entropy, .. } = self {
            let events = entropy.len();
            if events > max_events {
                return Err(ProtocolError::EntropyTooLarge {
                    events,
                    limit: max_events,
                });
            }
        }
        Ok(())
    }
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerCommand {
    /// The complete world, sent reliably on join and on resync.
    CompleteState(CompleteState),

    /// The merged entropy of one authoritative step.
    StepEntropy(StepEntropy),
}

/// Snapshot payload establishing or re-establishing a client's world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteState {
    /// The serialized cosmos, as produced by `Cosmos::to_bytes`.
    pub cosmos: Vec<u8>,
    /// GUID of the character this client controls.
    pub controlled: EntityGuid,
    /// The command sequence the server expects from this client next.
    pub next_sequence: u32,
    /// Sequence of the first step broadcast after this snapshot. Steps
    /// below it are already contained in the snapshot and must be
    /// skipped, not replayed.
    pub step_sequence: u32,
}

/// One authoritative step's inputs, broadcast redundantly until acked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepEntropy {
    /// Server step sequence, strictly increasing.
    pub sequence: u32,
    /// Every command of the receiving client with a sequence below this
    /// value has been merged into an authoritative step. The client
    /// retires exactly those predictions, and nothing newer - a stale
    /// confirmation arriving after a resync cannot touch fresh commands.
    pub confirmed_below: u32,
    /// The merged entropy of every participant for this step.
    pub entropy: CosmicEntropy,
}

impl ClientCommand {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Serialize to the binary wire format.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from the binary wire format.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(bincode::deserialize(data)?)
    }
}

impl ServerCommand {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Serialize to the binary wire format.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from the binary wire format.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(bincode::deserialize(data)?)
    }
}
