//! Entropy Model
//!
//! The per-tick, per-player ordered collection of inputs. Entropy is the
//! only legal input to a simulation step: identical `(state, entropy)`
//! pairs must produce bit-identical successor states, so everything here
//! preserves insertion order byte-for-byte across serialization.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::sim::components::EntityGuid;
use crate::sim::cosmos::Cosmos;

/// Discrete controls a player can press or release.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentKind {
    /// Hold to move toward +Y.
    MoveForward,
    /// Hold to move toward -Y.
    MoveBack,
    /// Hold to move toward -X.
    MoveLeft,
    /// Hold to move toward +X.
    MoveRight,
    /// Pick up the nearest ground item.
    Interact,
}

/// A single press or release of a discrete control.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    /// Which control.
    pub kind: IntentKind,
    /// True on press, false on release.
    pub pressed: bool,
}

/// A continuous aim delta, in raw device units.
///
/// Both axes are recorded so the entropy stream captures the device input
/// faithfully; the current rules steer rotation from the horizontal axis
/// only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Motion {
    /// Horizontal delta.
    pub dx: i16,
    /// Vertical delta. Recorded but not consumed by any rule yet.
    pub dy: i16,
}

/// A request to move an item between owners.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemTransfer {
    /// The item being moved.
    pub item: EntityGuid,
    /// New owning character, or `None` to drop it on the ground.
    pub to_owner: Option<EntityGuid>,
}

/// A request to change what the character holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WieldAction {
    /// Wield the given item.
    Item(EntityGuid),
    /// Holster everything.
    BareHands,
}

/// The castable spells.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpellKind {
    /// Temporary movement speed boost.
    Haste,
    /// Temporary damage barrier.
    Barrier,
    /// Short random teleport.
    Blink,
}

/// A request to cast a spell this tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpellCast {
    /// Which spell.
    pub spell: SpellKind,
}

/// Everything one player requested for one tick.
///
/// Queue order is semantically significant: it is replayed in exactly this
/// order during the step.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerEntropy {
    /// Presses and releases, in arrival order.
    pub intents: Vec<Intent>,
    /// Aim deltas, in arrival order.
    pub motions: Vec<Motion>,
    /// Inventory moves, in arrival order.
    pub transfers: Vec<ItemTransfer>,
    /// At most one pending wield request (last write wins).
    pub wield: Option<WieldAction>,
    /// At most one pending spell cast (last write wins).
    pub cast: Option<SpellCast>,
}

impl PlayerEntropy {
    /// Total number of queued events.
    pub fn len(&self) -> usize {
        self.intents.len()
            + self.motions.len()
            + self.transfers.len()
            + usize::from(self.wield.is_some())
            + usize::from(self.cast.is_some())
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Merge `other` into this record: queues concatenate in arrival
    /// order, wield and cast are overwritten when present in `other`.
    pub fn combine(&mut self, other: &PlayerEntropy) {
        self.intents.extend_from_slice(&other.intents);
        self.motions.extend_from_slice(&other.motions);
        self.transfers.extend_from_slice(&other.transfers);

        if other.wield.is_some() {
            self.wield = other.wield;
        }
        if other.cast.is_some() {
            self.cast = other.cast;
        }
    }

    /// Empty all queues in place.
    pub fn clear(&mut self) {
        self.intents.clear();
        self.motions.clear();
        self.transfers.clear();
        self.wield = None;
        self.cast = None;
    }
}

/// The complete set of inputs consumed by one deterministic tick.
///
/// Keyed by entity GUID so the same entropy means the same thing on both
/// sides of the wire. BTreeMap keeps replay order deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CosmicEntropy {
    /// Per-player records.
    pub players: BTreeMap<EntityGuid, PlayerEntropy>,
}

impl CosmicEntropy {
    /// Entropy with no players at all.
    pub fn new() -> Self {
        Self::default()
    }

    /// Entropy holding a single player's record.
    pub fn of_player(player: EntityGuid, entropy: PlayerEntropy) -> Self {
        let mut players = BTreeMap::new();
        players.insert(player, entropy);
        Self { players }
    }

    /// Total number of queued events across all players.
    pub fn len(&self) -> usize {
        self.players.values().map(PlayerEntropy::len).sum()
    }

    /// Whether no player has anything queued.
    pub fn is_empty(&self) -> bool {
        self.players.values().all(PlayerEntropy::is_empty)
    }

    /// Per-player union: queues concatenate in arrival order, wield and
    /// cast take `other`'s value when present.
    pub fn combine(&mut self, other: &CosmicEntropy) {
        for (player, record) in &other.players {
            self.players.entry(*player).or_default().combine(record);
        }
    }

    /// Owned-combining convenience for fold-style call sites.
    pub fn combined(mut self, other: &CosmicEntropy) -> Self {
        self.combine(other);
        self
    }

    /// Empty every player's queues, keeping the map entries themselves.
    ///
    /// Keeping the keys distinguishes "player sent nothing this tick" from
    /// "player no longer exists"; the latter is [`CosmicEntropy::prune_dead`]'s job.
    pub fn clear(&mut self) {
        for record in self.players.values_mut() {
            record.clear();
        }
    }

    /// Drop records of players that are dead in `cosmos`, and transfer
    /// entries whose item is dead.
    ///
    /// Entropy may sit buffered across ticks in which entities disappear;
    /// whatever remains after this pass is safe to replay.
    pub fn prune_dead(&mut self, cosmos: &Cosmos) {
        self.players.retain(|player, record| {
            if cosmos.entity_by_guid(*player).is_none() {
                return false;
            }

            record
                .transfers
                .retain(|t| cosmos.entity_by_guid(t.item).is_some());

            true
        });
    }

    /// The record for one player, if present.
    pub fn of(&self, player: EntityGuid) -> Option<&PlayerEntropy> {
        self.players.get(&player)
    }
}

/// One raw event observed from the input/windowing layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputEvent {
    /// A discrete press or release.
    Intent(Intent),
    /// A continuous aim delta.
    Motion(Motion),
    /// An inventory move request.
    Transfer(ItemTransfer),
    /// A wield request.
    Wield(WieldAction),
    /// A spell cast request.
    Cast(SpellCast),
}

/// Collects raw input events between ticks and emits one player's entropy.
///
/// Distinct categories concatenate; wield and cast are last-write-wins
/// within the tick.
#[derive(Clone, Debug, Default)]
pub struct EntropyAccumulator {
    collected: PlayerEntropy,
}

impl EntropyAccumulator {
    /// Fresh, empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one newly observed raw event.
    pub fn control(&mut self, event: InputEvent) {
        match event {
            InputEvent::Intent(i) => self.collected.intents.push(i),
            InputEvent::Motion(m) => self.collected.motions.push(m),
            InputEvent::Transfer(t) => self.collected.transfers.push(t),
            InputEvent::Wield(w) => self.collected.wield = Some(w),
            InputEvent::Cast(c) => self.collected.cast = Some(c),
        }
    }

    /// Drain everything collected since the last tick into an entropy
    /// attributed to `player`.
    pub fn extract(&mut self, player: EntityGuid) -> CosmicEntropy {
        let record = std::mem::take(&mut self.collected);
        CosmicEntropy::of_player(player, record)
    }

    /// Discard everything collected so far.
    pub fn clear(&mut self) {
        self.collected.clear();
    }

    /// Whether anything has been collected since the last extract.
    pub fn is_empty(&self) -> bool {
        self.collected.is_empty()
    }
}
