//! The Simulation World
//!
//! A `Cosmos` is the complete deterministic state: entity and component
//! pools, the logical clock, and the in-state RNG. It mutates only through
//! [`Cosmos::advance`], and identical `(state, entropy, settings)` inputs
//! always yield bit-identical successors - the precondition that makes
//! prediction and rollback possible at all.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::fixed::{fixed_div, Fixed, FIXED_ONE};
use crate::core::hash::{StateDigest, StateHasher};
use crate::core::pool::{Pool, PoolId};
use crate::core::rng::DeterministicRng;
use crate::core::vec2::FixedVec2;
use crate::sim::components::{Character, Entity, EntityGuid, EntityKind, Item, Mobility, Transform};
use crate::sim::entropy::CosmicEntropy;
use crate::sim::solve::{self, SolveSettings, StepResult, BASE_MOVE_SPEED};

/// Handle to an entity's metadata in the entity pool.
pub type EntityId = PoolId;

/// The fixed-timestep logical clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CosmosClock {
    /// Steps per second, fixed for the session.
    pub tick_rate: u32,
    /// Completed steps since creation.
    pub ticks_passed: u64,
}

impl CosmosClock {
    /// Milliseconds per step, rounded down.
    pub fn delta_ms(&self) -> u32 {
        1000 / self.tick_rate
    }

    /// Step duration in fixed-point seconds.
    pub fn delta(&self) -> Fixed {
        fixed_div(FIXED_ONE, (self.tick_rate as i32).wrapping_mul(FIXED_ONE))
    }
}

/// Capability surface for one component storage kind.
///
/// Each payload type knows which cosmos pool backs it and which metadata
/// field carries its handle; the generic has/get/find/add/remove surface
/// on [`Cosmos`] is written once against this.
pub trait Component: Sized {
    /// The backing pool.
    fn pool(cosmos: &Cosmos) -> &Pool<Self>;
    /// The backing pool, mutably.
    fn pool_mut(cosmos: &mut Cosmos) -> &mut Pool<Self>;
    /// The handle field inside entity metadata.
    fn slot(entity: &Entity) -> PoolId;
    /// The handle field inside entity metadata, mutably.
    fn slot_mut(entity: &mut Entity) -> &mut PoolId;
}

macro_rules! impl_component {
    ($payload:ty, $pool_field:ident, $slot_field:ident) => {
        impl Component for $payload {
            fn pool(cosmos: &Cosmos) -> &Pool<Self> {
                &cosmos.$pool_field
            }

            fn pool_mut(cosmos: &mut Cosmos) -> &mut Pool<Self> {
                &mut cosmos.$pool_field
            }

            fn slot(entity: &Entity) -> PoolId {
                entity.$slot_field
            }

            fn slot_mut(entity: &mut Entity) -> &mut PoolId {
                &mut entity.$slot_field
            }
        }
    };
}

impl_component!(Transform, transforms, transform);
impl_component!(Mobility, mobilities, mobility);
impl_component!(Character, characters, character);
impl_component!(Item, items, item);

/// The simulation world.
///
/// Field order pins the serialized byte layout; every container is either
/// a pool (explicit array order) or a BTreeMap (sorted order), so two
/// structurally equal cosmoi serialize to identical bytes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cosmos {
    pub(crate) clock: CosmosClock,
    pub(crate) rng: DeterministicRng,
    next_guid: EntityGuid,
    guid_map: BTreeMap<EntityGuid, EntityId>,
    pub(crate) entities: Pool<Entity>,
    pub(crate) transforms: Pool<Transform>,
    pub(crate) mobilities: Pool<Mobility>,
    pub(crate) characters: Pool<Character>,
    pub(crate) items: Pool<Item>,
}

impl Cosmos {
    /// Create an empty world at the given tickrate, seeded once.
    ///
    /// The seed is the only entropy source the world will ever know; the
    /// host clock is never consulted.
    pub fn new(tick_rate: u32, seed: u64) -> Self {
        assert!(tick_rate > 0, "tick rate must be positive");

        Self {
            clock: CosmosClock {
                tick_rate,
                ticks_passed: 0,
            },
            rng: DeterministicRng::new(seed),
            next_guid: 1,
            guid_map: BTreeMap::new(),
            entities: Pool::new(),
            transforms: Pool::new(),
            mobilities: Pool::new(),
            characters: Pool::new(),
            items: Pool::new(),
        }
    }

    /// The logical clock.
    pub fn clock(&self) -> CosmosClock {
        self.clock
    }

    /// Completed steps since creation.
    pub fn ticks_passed(&self) -> u64 {
        self.clock.ticks_passed
    }

    /// Execute exactly one fixed-duration logical tick.
    ///
    /// Pure function of `(state, entropy, settings)`: advances the step
    /// counter by exactly one and never reads any ambient source of
    /// non-determinism.
    pub fn advance(&mut self, entropy: &CosmicEntropy, settings: &SolveSettings) -> StepResult {
        solve::standard_solve(self, entropy, settings)
    }

    // ---------------------------------------------------------------------
    // Entity lifecycle
    // ---------------------------------------------------------------------

    /// Spawn a character at `position` and return its handle.
    pub fn create_character(&mut self, position: FixedVec2) -> EntityId {
        let guid = self.take_guid();
        let id = self.entities.allocate(Entity::new(guid, EntityKind::Character));

        let transform = self.transforms.allocate(Transform::at(position));
        let mobility = self.mobilities.allocate(Mobility::with_speed(BASE_MOVE_SPEED));
        let character = self.characters.allocate(Character::default());

        let meta = self.entities.get_mut(id);
        meta.transform = transform;
        meta.mobility = mobility;
        meta.character = character;

        self.guid_map.insert(guid, id);
        id
    }

    /// Spawn an unowned item at `position` and return its handle.
    pub fn create_item(&mut self, position: FixedVec2, charges: u32) -> EntityId {
        let guid = self.take_guid();
        let id = self.entities.allocate(Entity::new(guid, EntityKind::Item));

        let transform = self.transforms.allocate(Transform::at(position));
        let item = self.items.allocate(Item::with_charges(charges));

        let meta = self.entities.get_mut(id);
        meta.transform = transform;
        meta.item = item;

        self.guid_map.insert(guid, id);
        id
    }

    /// Destroy an entity and its components.
    ///
    /// Returns false if the handle is already dead. References held by
    /// surviving entities (wielded item, item ownership) are unset so no
    /// stale handle is ever dereferenced later.
    pub fn free_entity(&mut self, id: EntityId) -> bool {
        let Some(meta) = self.entities.find(id) else {
            return false;
        };

        let guid = meta.guid;
        let transform = meta.transform;
        let mobility = meta.mobility;
        let character = meta.character;
        let item = meta.item;

        // Unsetting is idempotent per object, so dense-order traversal here
        // cannot introduce order-dependence.
        self.characters.for_each_id_and_object_mut(|_, c| {
            if c.wielded_item == id {
                c.wielded_item.unset();
            }
        });
        self.items.for_each_id_and_object_mut(|_, i| {
            if i.owner == id {
                i.owner.unset();
            }
        });

        self.transforms.free(transform);
        self.mobilities.free(mobility);
        self.characters.free(character);
        self.items.free(item);
        self.entities.free(id);

        self.guid_map.remove(&guid);
        true
    }

    /// Whether the handle refers to a live entity.
    pub fn alive(&self, id: EntityId) -> bool {
        self.entities.alive(id)
    }

    /// Resolve a GUID to the current entity handle.
    pub fn entity_by_guid(&self, guid: EntityGuid) -> Option<EntityId> {
        self.guid_map.get(&guid).copied()
    }

    /// The GUID of a live entity. Panics on a dead handle.
    pub fn guid_of(&self, id: EntityId) -> EntityGuid {
        self.entities.get(id).guid
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> u32 {
        self.entities.size()
    }

    /// Visit `(guid, id)` pairs in ascending GUID order - the stable
    /// iteration order all deterministic game logic must use.
    pub fn for_each_entity_sorted<F>(&self, mut f: F)
    where
        F: FnMut(EntityGuid, EntityId),
    {
        for (guid, id) in &self.guid_map {
            f(*guid, *id);
        }
    }

    /// Sorted `(guid, id)` snapshot, for callers that must mutate the
    /// cosmos while iterating.
    pub(crate) fn sorted_entities(&self) -> Vec<(EntityGuid, EntityId)> {
        self.guid_map.iter().map(|(g, i)| (*g, *i)).collect()
    }

    fn take_guid(&mut self) -> EntityGuid {
        let guid = self.next_guid;
        self.next_guid += 1;
        guid
    }

    // ---------------------------------------------------------------------
    // Component access
    // ---------------------------------------------------------------------

    /// Whether the entity carries component `C`.
    pub fn has<C: Component>(&self, id: EntityId) -> bool {
        self.entities
            .find(id)
            .map(|meta| C::pool(self).alive(C::slot(meta)))
            .unwrap_or(false)
    }

    /// Component `C` of a live entity. Panics if absent - trusted-caller
    /// contract, same as [`Pool::get`].
    pub fn get_component<C: Component>(&self, id: EntityId) -> &C {
        let meta = self.entities.get(id);
        C::pool(self).get(C::slot(meta))
    }

    /// Component `C` if the entity is alive and carries it.
    pub fn find_component<C: Component>(&self, id: EntityId) -> Option<&C> {
        let meta = self.entities.find(id)?;
        C::pool(self).find(C::slot(meta))
    }

    /// Mutable variant of [`Cosmos::find_component`].
    pub fn find_component_mut<C: Component>(&mut self, id: EntityId) -> Option<&mut C> {
        let slot = C::slot(self.entities.find(id)?);
        C::pool_mut(self).find_mut(slot)
    }

    /// Attach component `C`, replacing any existing instance.
    pub fn add_component<C: Component>(&mut self, id: EntityId, component: C) {
        let old = C::slot(self.entities.get(id));
        C::pool_mut(self).free(old);

        let slot = C::pool_mut(self).allocate(component);
        *C::slot_mut(self.entities.get_mut(id)) = slot;
    }

    /// Detach component `C`, returning the payload if it was present.
    pub fn remove_component<C: Component>(&mut self, id: EntityId) -> Option<C> {
        let slot = C::slot(self.entities.find(id)?);
        let removed = C::pool_mut(self).free(slot);
        C::slot_mut(self.entities.get_mut(id)).unset();
        removed
    }

    // ---------------------------------------------------------------------
    // Snapshotting
    // ---------------------------------------------------------------------

    /// Cheap structural-liveness comparison against another cosmos.
    ///
    /// Compares clock and all pool indirectors - enough to catch every
    /// divergence in entity identity without touching payload bytes.
    pub fn indirectors_equal(&self, other: &Cosmos) -> bool {
        self.clock == other.clock
            && self.entities.indirectors_equal(&other.entities)
            && self.transforms.indirectors_equal(&other.transforms)
            && self.mobilities.indirectors_equal(&other.mobilities)
            && self.characters.indirectors_equal(&other.characters)
            && self.items.indirectors_equal(&other.items)
    }

    /// SHA-256 fingerprint of the complete serialized state.
    pub fn state_digest(&self) -> StateDigest {
        let mut hasher = StateHasher::for_cosmos();
        hasher.update_bytes(&self.to_bytes());
        hasher.finalize()
    }

    /// Serialize the complete world.
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("cosmos serialization is infallible")
    }

    /// Restore a world serialized by [`Cosmos::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}
