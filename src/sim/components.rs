//! Entity Metadata and Component Payloads
//!
//! Entities reference their components - and each other - exclusively
//! through `(index, version)` pool handles resolved at use time. No raw
//! indices, no shared ownership; this is what makes rollback cloning and
//! byte-level serialization safe.

use serde::{Deserialize, Serialize};

use crate::core::fixed::Fixed;
use crate::core::pool::PoolId;
use crate::core::vec2::FixedVec2;

/// Monotonic, never-reused identifier assigned at entity creation.
///
/// Pool traversal order changes under compaction, so any code that needs a
/// deterministic entity ordering sorts by this instead.
pub type EntityGuid = u64;

/// What an entity fundamentally is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    /// A player-controllable character.
    Character,
    /// A wieldable item lying in the world or held by a character.
    Item,
}

/// Per-entity metadata stored in the entity pool.
///
/// Component fields are pool handles into the respective component pools;
/// `PoolId::UNSET` means the entity lacks that component.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable identity for ordering and wire references.
    pub guid: EntityGuid,
    /// Fundamental kind, fixed at creation.
    pub kind: EntityKind,
    /// Handle into the transform pool.
    pub transform: PoolId,
    /// Handle into the mobility pool.
    pub mobility: PoolId,
    /// Handle into the character pool.
    pub character: PoolId,
    /// Handle into the item pool.
    pub item: PoolId,
}

impl Entity {
    /// Create bare metadata with no components attached.
    pub fn new(guid: EntityGuid, kind: EntityKind) -> Self {
        Self {
            guid,
            kind,
            transform: PoolId::UNSET,
            mobility: PoolId::UNSET,
            character: PoolId::UNSET,
            item: PoolId::UNSET,
        }
    }
}

/// Position and facing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transform {
    /// World position.
    pub position: FixedVec2,
    /// Facing angle, accumulated from aim motions (wrapping).
    pub rotation: Fixed,
}

impl Transform {
    /// Create at a position, facing zero.
    pub fn at(position: FixedVec2) -> Self {
        Self {
            position,
            rotation: 0,
        }
    }
}

/// Movement state driven by intents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mobility {
    /// Velocity applied last integration.
    pub velocity: FixedVec2,
    /// Held movement directions (FLAG_* bits).
    pub move_flags: u8,
    /// Base speed in units per second.
    pub move_speed: Fixed,
    /// Remaining ticks of the haste spell.
    pub haste_ticks: u32,
}

impl Mobility {
    /// Moving toward +Y.
    pub const FLAG_FORWARD: u8 = 0x01;
    /// Moving toward -Y.
    pub const FLAG_BACK: u8 = 0x02;
    /// Moving toward -X.
    pub const FLAG_LEFT: u8 = 0x04;
    /// Moving toward +X.
    pub const FLAG_RIGHT: u8 = 0x08;

    /// Create with a base speed and no held directions.
    pub fn with_speed(move_speed: Fixed) -> Self {
        Self {
            velocity: FixedVec2::ZERO,
            move_flags: 0,
            move_speed,
            haste_ticks: 0,
        }
    }

    /// Unnormalized direction from the held flags; opposite flags cancel.
    pub fn held_direction(&self) -> FixedVec2 {
        use crate::core::fixed::FIXED_ONE;

        let mut dir = FixedVec2::ZERO;

        if self.move_flags & Self::FLAG_FORWARD != 0 {
            dir.y = dir.y.wrapping_add(FIXED_ONE);
        }
        if self.move_flags & Self::FLAG_BACK != 0 {
            dir.y = dir.y.wrapping_sub(FIXED_ONE);
        }
        if self.move_flags & Self::FLAG_RIGHT != 0 {
            dir.x = dir.x.wrapping_add(FIXED_ONE);
        }
        if self.move_flags & Self::FLAG_LEFT != 0 {
            dir.x = dir.x.wrapping_sub(FIXED_ONE);
        }

        dir
    }
}

/// Character-only state: wielding and spell bookkeeping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    /// Entity handle of the wielded item, unset for bare hands.
    pub wielded_item: PoolId,
    /// First tick at which the next spell may be cast.
    pub spell_cooldown_until: u64,
    /// Remaining ticks of the barrier spell.
    pub barrier_ticks: u32,
}

/// Item-only state: ownership and remaining uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Entity handle of the owning character, unset when on the ground.
    pub owner: PoolId,
    /// Remaining charges.
    pub charges: u32,
}

impl Item {
    /// Create an unowned item.
    pub fn with_charges(charges: u32) -> Self {
        Self {
            owner: PoolId::UNSET,
            charges,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixed::FIXED_ONE;

    #[test]
    fn test_held_direction_cancels_opposites() {
        let mut m = Mobility::with_speed(FIXED_ONE);
        m.move_flags = Mobility::FLAG_FORWARD | Mobility::FLAG_BACK;
        assert_eq!(m.held_direction(), FixedVec2::ZERO);

        m.move_flags = Mobility::FLAG_RIGHT;
        assert_eq!(m.held_direction(), FixedVec2::new(FIXED_ONE, 0));

        m.move_flags = Mobility::FLAG_RIGHT | Mobility::FLAG_FORWARD;
        assert_eq!(m.held_direction(), FixedVec2::new(FIXED_ONE, FIXED_ONE));
    }

    #[test]
    fn test_new_entity_has_no_components() {
        let e = Entity::new(7, EntityKind::Character);
        assert!(!e.transform.is_set());
        assert!(!e.mobility.is_set());
        assert!(!e.character.is_set());
        assert!(!e.item.is_set());
    }
}
