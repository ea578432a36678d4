//! Versioned Slot Pool
//!
//! Dense storage with stable, reusable handles. Every entity and component
//! table in the cosmos is one of these.
//!
//! ```text
//! PoolId { indirection_index, version }
//!        |
//!        v
//! indirectors[indirection_index] -> { real_index, version }
//!        |
//!        v
//! objects[real_index]   (dense, compacted on free via swap-with-last)
//! slots[real_index]     -> { pointing_indirector }  (back-reference)
//! ```
//!
//! Freeing a slot increments the indirector's version, which invalidates
//! every outstanding handle to it without enumerating them. That version
//! bump is the correctness mechanism for the whole simulation core and is
//! never skipped.
//!
//! The serialized form writes the four backing arrays verbatim, in order
//! `[objects][slots][indirectors][free_indirectors]`, so handles stay valid
//! across a save/load round trip and allocation order is preserved.

use serde::{Deserialize, Serialize};

/// Sentinel index meaning "unset". The capacity ceiling is `u32::MAX - 1`
/// so this value can never collide with a real indirector.
const UNSET_INDEX: u32 = u32::MAX;

/// Growth policy when a full pool allocates: `capacity * 2 + 1`.
const EXPANSION_MULT: u32 = 2;
const EXPANSION_ADD: u32 = 1;

/// A stable handle into a [`Pool`].
///
/// Alive iff the indirection index is in range and the stored indirector's
/// version equals the handle's version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PoolId {
    /// Index into the indirector array, stable for the object's lifetime.
    pub indirection_index: u32,
    /// Version the indirector had when this handle was issued.
    pub version: u32,
}

impl PoolId {
    /// The unset handle. Never alive in any pool.
    pub const UNSET: PoolId = PoolId {
        indirection_index: UNSET_INDEX,
        version: 0,
    };

    /// Whether this handle points at a slot at all.
    #[inline]
    pub fn is_set(&self) -> bool {
        self.indirection_index != UNSET_INDEX
    }

    /// Reset to the unset sentinel.
    #[inline]
    pub fn unset(&mut self) {
        *self = Self::UNSET;
    }
}

impl Default for PoolId {
    fn default() -> Self {
        Self::UNSET
    }
}

/// Back-reference from a dense position to its indirector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct Slot {
    pointing_indirector: u32,
}

/// Maps a stable handle slot to the current dense position of its payload.
/// `real_index == UNSET_INDEX` means the slot is currently free.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct Indirector {
    real_index: u32,
    version: u32,
}

impl Default for Indirector {
    fn default() -> Self {
        Self {
            real_index: UNSET_INDEX,
            version: 1,
        }
    }
}

/// Dense, versioned-handle storage.
///
/// Field order matters: serde serializes in declaration order, which pins
/// the byte format to `[objects][slots][indirectors][free_indirectors]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pool<T> {
    objects: Vec<T>,
    slots: Vec<Slot>,
    indirectors: Vec<Indirector>,
    free_indirectors: Vec<u32>,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Pool<T> {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self {
            objects: Vec::new(),
            slots: Vec::new(),
            indirectors: Vec::new(),
            free_indirectors: Vec::new(),
        }
    }

    /// Create a pool with initial capacity.
    pub fn with_capacity(slot_count: u32) -> Self {
        let mut pool = Self::new();
        pool.reserve(slot_count);
        pool
    }

    /// Grow backing storage to at least `new_capacity` slots.
    ///
    /// Panics if the requested capacity would consume the sentinel index;
    /// that is a programming-contract violation, not a runtime condition.
    pub fn reserve(&mut self, new_capacity: u32) {
        assert!(
            new_capacity != UNSET_INDEX,
            "pool capacity overflow: the last index is reserved for unset handles"
        );

        let old_capacity = self.capacity();

        if new_capacity <= old_capacity {
            return;
        }

        self.slots.reserve(new_capacity as usize);
        self.objects.reserve(new_capacity as usize);

        self.indirectors
            .resize_with(new_capacity as usize, Indirector::default);
        self.free_indirectors.reserve(new_capacity as usize);

        // Pushed highest-first so that popping from the back hands out the
        // lowest new index first.
        for i in 0..(new_capacity - old_capacity) {
            self.free_indirectors.push(new_capacity - i - 1);
        }
    }

    /// Allocate a slot for `object` and return its handle.
    ///
    /// Grows geometrically (x2+1) when full. The returned handle carries the
    /// slot's current version: 1 for a fresh slot, previous + 1 for a reused
    /// one. It can never alias a live object.
    pub fn allocate(&mut self, object: T) -> PoolId {
        if self.free_indirectors.is_empty() {
            let target = self
                .capacity()
                .checked_mul(EXPANSION_MULT)
                .and_then(|c| c.checked_add(EXPANSION_ADD))
                .expect("pool capacity overflow");
            self.reserve(target);
        }

        let indirection_index = self
            .free_indirectors
            .pop()
            .expect("free list is non-empty after reserve");

        let real_index = self.objects.len() as u32;
        let indirector = &mut self.indirectors[indirection_index as usize];
        indirector.real_index = real_index;

        self.slots.push(Slot {
            pointing_indirector: indirection_index,
        });
        self.objects.push(object);

        PoolId {
            indirection_index,
            version: indirector.version,
        }
    }

    /// Free the object behind `id`.
    ///
    /// Returns `None` without side effects if the handle is already dead.
    /// Otherwise removes the payload by swapping the last dense element into
    /// the freed position, fixes up the moved object's indirector, pushes
    /// the slot onto the free list and increments the slot's version so
    /// every outstanding handle to it dies.
    pub fn free(&mut self, id: PoolId) -> Option<T> {
        if !self.alive(id) {
            return None;
        }

        let dead_real = {
            let indirector = &mut self.indirectors[id.indirection_index as usize];
            let real = indirector.real_index as usize;

            // The version bump: this is what permanently invalidates every
            // outstanding handle to this slot.
            indirector.version = indirector.version.wrapping_add(1);
            indirector.real_index = UNSET_INDEX;

            real
        };

        self.free_indirectors.push(id.indirection_index);

        let removed = self.objects.swap_remove(dead_real);
        self.slots.swap_remove(dead_real);

        if dead_real < self.objects.len() {
            let moved = self.slots[dead_real];
            self.indirectors[moved.pointing_indirector as usize].real_index = dead_real as u32;
        }

        Some(removed)
    }

    /// Whether `id` currently refers to a live object.
    #[inline]
    pub fn alive(&self, id: PoolId) -> bool {
        self.correct_range(id)
            && versions_match(&self.indirectors[id.indirection_index as usize], id)
    }

    /// Whether `id` is stale, out of range or unset.
    #[inline]
    pub fn dead(&self, id: PoolId) -> bool {
        !self.alive(id)
    }

    /// Checked access for trusted internal callers.
    ///
    /// Panics on a dead handle: a stale dereference here means the
    /// determinism contract is already broken upstream.
    pub fn get(&self, id: PoolId) -> &T {
        let indirector = &self.indirectors[id.indirection_index as usize];
        assert!(
            versions_match(indirector, id),
            "dereferenced a dead pool handle ({};{})",
            id.indirection_index,
            id.version
        );
        &self.objects[indirector.real_index as usize]
    }

    /// Mutable variant of [`Pool::get`].
    pub fn get_mut(&mut self, id: PoolId) -> &mut T {
        let indirector = &self.indirectors[id.indirection_index as usize];
        assert!(
            versions_match(indirector, id),
            "dereferenced a dead pool handle ({};{})",
            id.indirection_index,
            id.version
        );
        let real = indirector.real_index as usize;
        &mut self.objects[real]
    }

    /// O(1) lookup returning `None` for stale or out-of-range handles.
    pub fn find(&self, id: PoolId) -> Option<&T> {
        if !self.correct_range(id) {
            return None;
        }

        let indirector = &self.indirectors[id.indirection_index as usize];

        if !versions_match(indirector, id) {
            return None;
        }

        Some(&self.objects[indirector.real_index as usize])
    }

    /// Mutable variant of [`Pool::find`].
    pub fn find_mut(&mut self, id: PoolId) -> Option<&mut T> {
        if !self.correct_range(id) {
            return None;
        }

        let indirector = self.indirectors[id.indirection_index as usize];

        if !versions_match(&indirector, id) {
            return None;
        }

        Some(&mut self.objects[indirector.real_index as usize])
    }

    /// Handle of the object at dense position `i`.
    pub fn get_nth_id(&self, i: u32) -> PoolId {
        let slot = &self.slots[i as usize];
        PoolId {
            indirection_index: slot.pointing_indirector,
            version: self.indirectors[slot.pointing_indirector as usize].version,
        }
    }

    /// Traverse in dense-array order, not allocation order.
    ///
    /// Compaction reorders the dense array, so callers that need a
    /// deterministic entity order must sort by a stable secondary key
    /// (a monotonic GUID), never by this traversal order.
    pub fn for_each_id_and_object<F>(&self, mut f: F)
    where
        F: FnMut(PoolId, &T),
    {
        for i in 0..self.objects.len() {
            let slot = &self.slots[i];
            let id = PoolId {
                indirection_index: slot.pointing_indirector,
                version: self.indirectors[slot.pointing_indirector as usize].version,
            };
            f(id, &self.objects[i]);
        }
    }

    /// Mutable variant of [`Pool::for_each_id_and_object`].
    pub fn for_each_id_and_object_mut<F>(&mut self, mut f: F)
    where
        F: FnMut(PoolId, &mut T),
    {
        for i in 0..self.objects.len() {
            let slot = self.slots[i];
            let id = PoolId {
                indirection_index: slot.pointing_indirector,
                version: self.indirectors[slot.pointing_indirector as usize].version,
            };
            f(id, &mut self.objects[i]);
        }
    }

    /// Number of live objects.
    pub fn size(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Number of allocated indirector slots.
    pub fn capacity(&self) -> u32 {
        self.indirectors.len() as u32
    }

    /// Whether the pool holds no live objects.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Cheap structural comparison of liveness state.
    ///
    /// Two pools with equal indirectors have the same set of live handles
    /// and the same handle-to-dense mapping, regardless of payload content.
    pub fn indirectors_equal(&self, other: &Pool<T>) -> bool {
        self.indirectors == other.indirectors
    }

    /// Remove every object, keeping capacity. All versions advance past any
    /// outstanding handle.
    pub fn clear(&mut self) {
        let ids: Vec<PoolId> = (0..self.size()).map(|i| self.get_nth_id(i)).collect();
        for id in ids {
            self.free(id);
        }
    }

    #[inline]
    fn correct_range(&self, id: PoolId) -> bool {
        // Quickly eliminate unset ids without touching indirectors.len()
        id.indirection_index != UNSET_INDEX
            && (id.indirection_index as usize) < self.indirectors.len()
    }
}

#[inline]
fn versions_match(indirector: &Indirector, id: PoolId) -> bool {
    indirector.version == id.version && indirector.real_index != UNSET_INDEX
}
