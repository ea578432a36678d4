//! Deterministic Rule Systems
//!
//! The stepping function behind [`Cosmos::advance`]. One call runs the full
//! pipeline for exactly one tick, in a fixed phase order, iterating players
//! and entities in GUID order only. Any other iteration order here is a
//! determinism bug.

use serde::{Deserialize, Serialize};

use crate::core::fixed::{to_fixed, Fixed};
use crate::core::vec2::FixedVec2;
use crate::sim::components::{Character, EntityGuid, Item, Mobility, Transform};
use crate::sim::cosmos::{Cosmos, EntityId};
use crate::sim::entropy::{
    CosmicEntropy, IntentKind, ItemTransfer, PlayerEntropy, SpellKind, WieldAction,
};

/// Half-extent of the square playable area.
pub const WORLD_HALF_EXTENT: Fixed = to_fixed(64.0);

/// Character speed without modifiers, units per second.
pub const BASE_MOVE_SPEED: Fixed = to_fixed(5.0);

/// Maximum distance at which Interact picks up a ground item.
pub const PICKUP_RADIUS: Fixed = to_fixed(1.5);

/// Rotation change per raw aim-delta unit.
pub const MOTION_SENSITIVITY: Fixed = crate::core::fixed::FIXED_ONE / 64;

/// Ticks between casts, shared by all spells.
pub const SPELL_COOLDOWN_TICKS: u64 = 120;

/// Duration of the haste buff.
pub const HASTE_DURATION_TICKS: u32 = 180;

/// Duration of the barrier buff.
pub const BARRIER_DURATION_TICKS: u32 = 300;

/// Blink teleports by a random offset with components in this range.
pub const BLINK_RANGE: Fixed = to_fixed(4.0);

/// Knobs for one stepping call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolveSettings {
    /// Whether to collect presentation effects. Replays that only need the
    /// resulting state turn this off.
    pub post_solve_effects: bool,
}

impl Default for SolveSettings {
    fn default() -> Self {
        Self {
            post_solve_effects: true,
        }
    }
}

impl SolveSettings {
    /// Settings for replaying steps whose effects were already presented.
    pub fn silent() -> Self {
        Self {
            post_solve_effects: false,
        }
    }
}

/// A presentation-relevant event produced by one step.
///
/// Effects never feed back into state; they exist so a caller can play
/// sounds or spawn particles for the steps it presents for the first time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimEffect {
    /// A character picked an item up off the ground.
    ItemPickedUp {
        /// The acting character.
        character: EntityGuid,
        /// The picked-up item.
        item: EntityGuid,
    },
    /// An item changed owner or was dropped.
    ItemTransferred {
        /// The moved item.
        item: EntityGuid,
        /// New owner, or `None` for the ground.
        to_owner: Option<EntityGuid>,
    },
    /// A character changed what it holds.
    WieldChanged {
        /// The acting character.
        character: EntityGuid,
    },
    /// A spell went off.
    SpellCasted {
        /// The casting character.
        caster: EntityGuid,
        /// Which spell.
        spell: SpellKind,
    },
}

/// What one stepping call reports back.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StepResult {
    /// Set when an entropy entry referenced an entity that no longer
    /// exists. A predicting caller must treat its predicted timeline as
    /// invalid and rebuild it.
    pub state_inconsistent: bool,
    /// Presentation events, empty when effects are disabled.
    pub effects: Vec<SimEffect>,
}

impl StepResult {
    fn effect(&mut self, settings: &SolveSettings, effect: SimEffect) {
        if settings.post_solve_effects {
            self.effects.push(effect);
        }
    }
}

/// Run the complete pipeline for one tick.
pub fn standard_solve(
    cosmos: &mut Cosmos,
    entropy: &CosmicEntropy,
    settings: &SolveSettings,
) -> StepResult {
    let mut result = StepResult::default();

    // Phase 1: apply per-player entropy in GUID order.
    for (player, record) in &entropy.players {
        apply_player_entropy(cosmos, *player, record, settings, &mut result);
    }

    // Phase 2: integrate movement for every mobile entity.
    integrate_movement(cosmos);

    // Phase 3: tick down timed buffs.
    decay_buffs(cosmos);

    // Phase 4: the step is complete.
    cosmos.clock.ticks_passed += 1;

    result
}

fn apply_player_entropy(
    cosmos: &mut Cosmos,
    player: EntityGuid,
    record: &PlayerEntropy,
    settings: &SolveSettings,
    result: &mut StepResult,
) {
    let Some(subject) = cosmos.entity_by_guid(player) else {
        result.state_inconsistent = true;
        return;
    };

    for intent in &record.intents {
        let flag = match intent.kind {
            IntentKind::MoveForward => Mobility::FLAG_FORWARD,
            IntentKind::MoveBack => Mobility::FLAG_BACK,
            IntentKind::MoveLeft => Mobility::FLAG_LEFT,
            IntentKind::MoveRight => Mobility::FLAG_RIGHT,
            IntentKind::Interact => {
                if intent.pressed {
                    try_pickup(cosmos, player, subject, settings, result);
                }
                continue;
            }
        };

        if let Some(mobility) = cosmos.find_component_mut::<Mobility>(subject) {
            if intent.pressed {
                mobility.move_flags |= flag;
            } else {
                mobility.move_flags &= !flag;
            }
        }
    }

    // Rotation is a single angle, so only the horizontal axis steers it;
    // the vertical axis rides along in the record unused.
    for motion in &record.motions {
        if let Some(transform) = cosmos.find_component_mut::<Transform>(subject) {
            let delta = (motion.dx as Fixed).wrapping_mul(MOTION_SENSITIVITY);
            transform.rotation = transform.rotation.wrapping_add(delta);
        }
    }

    for transfer in &record.transfers {
        apply_transfer(cosmos, transfer, settings, result);
    }

    if let Some(wield) = record.wield {
        apply_wield(cosmos, player, subject, wield, settings, result);
    }

    if let Some(cast) = record.cast {
        apply_cast(cosmos, player, subject, cast.spell, settings, result);
    }
}

/// Pick up the closest unowned item within reach.
///
/// Candidates tie-break on GUID so that equidistant items resolve the same
/// way everywhere.
fn try_pickup(
    cosmos: &mut Cosmos,
    player: EntityGuid,
    subject: EntityId,
    settings: &SolveSettings,
    result: &mut StepResult,
) {
    let Some(subject_pos) = cosmos.find_component::<Transform>(subject).map(|t| t.position) else {
        return;
    };

    // Raw squared distances in i64: positions span the whole world, so a
    // Q16.16 square would overflow.
    let radius = PICKUP_RADIUS as i64;
    let max_sq = radius * radius;

    let mut best: Option<(i64, EntityGuid, EntityId)> = None;
    for (guid, id) in cosmos.sorted_entities() {
        let Some(item) = cosmos.find_component::<Item>(id) else {
            continue;
        };
        if item.owner.is_set() {
            continue;
        }
        let Some(transform) = cosmos.find_component::<Transform>(id) else {
            continue;
        };

        let d = transform.position.sub(subject_pos);
        let dist_sq = (d.x as i64) * (d.x as i64) + (d.y as i64) * (d.y as i64);
        if dist_sq > max_sq {
            continue;
        }

        match best {
            Some((best_sq, _, _)) if best_sq <= dist_sq => {}
            _ => best = Some((dist_sq, guid, id)),
        }
    }

    if let Some((_, item_guid, item_id)) = best {
        if let Some(item) = cosmos.find_component_mut::<Item>(item_id) {
            item.owner = subject;
        }
        if let Some(character) = cosmos.find_component_mut::<Character>(subject) {
            character.wielded_item = item_id;
        }
        result.effect(
            settings,
            SimEffect::ItemPickedUp {
                character: player,
                item: item_guid,
            },
        );
    }
}

fn apply_transfer(
    cosmos: &mut Cosmos,
    transfer: &ItemTransfer,
    settings: &SolveSettings,
    result: &mut StepResult,
) {
    let Some(item_id) = cosmos.entity_by_guid(transfer.item) else {
        result.state_inconsistent = true;
        return;
    };
    if !cosmos.has::<Item>(item_id) {
        result.state_inconsistent = true;
        return;
    }

    let new_owner = match transfer.to_owner {
        Some(guid) => match cosmos.entity_by_guid(guid) {
            Some(id) if cosmos.has::<Character>(id) => Some(id),
            _ => {
                result.state_inconsistent = true;
                return;
            }
        },
        None => None,
    };

    // Whoever wielded this item loses the wield along with the item.
    cosmos.characters.for_each_id_and_object_mut(|_, c| {
        if c.wielded_item == item_id {
            c.wielded_item.unset();
        }
    });

    if let Some(item) = cosmos.find_component_mut::<Item>(item_id) {
        match new_owner {
            Some(owner) => item.owner = owner,
            None => item.owner.unset(),
        }
    }

    result.effect(
        settings,
        SimEffect::ItemTransferred {
            item: transfer.item,
            to_owner: transfer.to_owner,
        },
    );
}

fn apply_wield(
    cosmos: &mut Cosmos,
    player: EntityGuid,
    subject: EntityId,
    wield: WieldAction,
    settings: &SolveSettings,
    result: &mut StepResult,
) {
    let new_wielded = match wield {
        WieldAction::BareHands => None,
        WieldAction::Item(guid) => {
            let Some(item_id) = cosmos.entity_by_guid(guid) else {
                result.state_inconsistent = true;
                return;
            };
            // Only something the character actually owns can be wielded.
            match cosmos.find_component::<Item>(item_id) {
                Some(item) if item.owner == subject => Some(item_id),
                _ => return,
            }
        }
    };

    if let Some(character) = cosmos.find_component_mut::<Character>(subject) {
        let changed = match new_wielded {
            Some(id) => character.wielded_item != id,
            None => character.wielded_item.is_set(),
        };
        match new_wielded {
            Some(id) => character.wielded_item = id,
            None => character.wielded_item.unset(),
        }
        if changed {
            result.effect(settings, SimEffect::WieldChanged { character: player });
        }
    }
}

fn apply_cast(
    cosmos: &mut Cosmos,
    player: EntityGuid,
    subject: EntityId,
    spell: SpellKind,
    settings: &SolveSettings,
    result: &mut StepResult,
) {
    let now = cosmos.clock.ticks_passed;
    match cosmos.find_component::<Character>(subject) {
        Some(character) if now >= character.spell_cooldown_until => {}
        _ => return,
    }

    match spell {
        SpellKind::Haste => {
            if let Some(mobility) = cosmos.find_component_mut::<Mobility>(subject) {
                mobility.haste_ticks = HASTE_DURATION_TICKS;
            }
        }
        SpellKind::Barrier => {
            if let Some(character) = cosmos.find_component_mut::<Character>(subject) {
                character.barrier_ticks = BARRIER_DURATION_TICKS;
            }
        }
        SpellKind::Blink => {
            let offset = cosmos.rng.next_offset(BLINK_RANGE);
            if let Some(transform) = cosmos.find_component_mut::<Transform>(subject) {
                let half = FixedVec2::new(WORLD_HALF_EXTENT, WORLD_HALF_EXTENT);
                transform.position = transform.position.add(offset).clamp_to_bounds(half);
            }
        }
    }

    if let Some(character) = cosmos.find_component_mut::<Character>(subject) {
        character.spell_cooldown_until = now + SPELL_COOLDOWN_TICKS;
    }

    result.effect(
        settings,
        SimEffect::SpellCasted {
            caster: player,
            spell,
        },
    );
}

/// Advance positions from held movement flags.
fn integrate_movement(cosmos: &mut Cosmos) {
    let dt = cosmos.clock.delta();
    let half = FixedVec2::new(WORLD_HALF_EXTENT, WORLD_HALF_EXTENT);

    // Snapshot first: mutation below must not observe pool order.
    for (_, id) in cosmos.sorted_entities() {
        let Some(mobility) = cosmos.find_component::<Mobility>(id) else {
            continue;
        };

        let mut speed = mobility.move_speed;
        if mobility.haste_ticks > 0 {
            speed = speed.wrapping_mul(2);
        }

        let velocity = mobility.held_direction().scale(speed);
        let displacement = velocity.scale(dt);

        if let Some(mobility) = cosmos.find_component_mut::<Mobility>(id) {
            mobility.velocity = velocity;
        }
        if let Some(transform) = cosmos.find_component_mut::<Transform>(id) {
            transform.position = transform.position.add(displacement).clamp_to_bounds(half);
        }
    }
}

fn decay_buffs(cosmos: &mut Cosmos) {
    cosmos.mobilities.for_each_id_and_object_mut(|_, m| {
        m.haste_ticks = m.haste_ticks.saturating_sub(1);
    });
    cosmos.characters.for_each_id_and_object_mut(|_, c| {
        c.barrier_ticks = c.barrier_ticks.saturating_sub(1);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixed::FIXED_ONE;
    use crate::sim::entropy::{Intent, SpellCast};

    fn world() -> Cosmos {
        Cosmos::new(60, 7)
    }

    fn press(kind: IntentKind) -> PlayerEntropy {
        PlayerEntropy {
            intents: vec![Intent {
                kind,
                pressed: true,
            }],
            ..Default::default()
        }
    }

    fn cast(spell: SpellKind) -> PlayerEntropy {
        PlayerEntropy {
            cast: Some(SpellCast { spell }),
            ..Default::default()
        }
    }

    #[test]
    fn test_held_flag_moves_until_released() {
        let mut cosmos = world();
        let id = cosmos.create_character(FixedVec2::ZERO);
        let guid = cosmos.guid_of(id);

        cosmos.advance(
            &CosmicEntropy::of_player(guid, press(IntentKind::MoveRight)),
            &SolveSettings::default(),
        );
        let x1 = cosmos.get_component::<Transform>(id).position.x;
        assert!(x1 > 0, "holding right must move toward +X");

        // Flags persist across empty ticks.
        cosmos.advance(&CosmicEntropy::new(), &SolveSettings::default());
        let x2 = cosmos.get_component::<Transform>(id).position.x;
        assert!(x2 > x1);

        let release = PlayerEntropy {
            intents: vec![Intent {
                kind: IntentKind::MoveRight,
                pressed: false,
            }],
            ..Default::default()
        };
        cosmos.advance(
            &CosmicEntropy::of_player(guid, release),
            &SolveSettings::default(),
        );
        let x3 = cosmos.get_component::<Transform>(id).position.x;
        assert_eq!(x3, x2, "release must stop movement the same tick");
    }

    #[test]
    fn test_position_clamps_to_world_bounds() {
        let mut cosmos = world();
        let id = cosmos.create_character(FixedVec2::new(WORLD_HALF_EXTENT, 0));
        let guid = cosmos.guid_of(id);

        cosmos.advance(
            &CosmicEntropy::of_player(guid, press(IntentKind::MoveRight)),
            &SolveSettings::default(),
        );
        for _ in 0..10 {
            cosmos.advance(&CosmicEntropy::new(), &SolveSettings::default());
        }

        assert_eq!(cosmos.get_component::<Transform>(id).position.x, WORLD_HALF_EXTENT);
    }

    #[test]
    fn test_pickup_prefers_nearest_then_lowest_guid() {
        let mut cosmos = world();
        let id = cosmos.create_character(FixedVec2::ZERO);
        let guid = cosmos.guid_of(id);

        let far = cosmos.create_item(FixedVec2::new(FIXED_ONE, 0), 1);
        let near = cosmos.create_item(FixedVec2::new(FIXED_ONE / 2, 0), 1);
        let near_guid = cosmos.guid_of(near);

        let result = cosmos.advance(
            &CosmicEntropy::of_player(guid, press(IntentKind::Interact)),
            &SolveSettings::default(),
        );

        assert_eq!(cosmos.get_component::<Item>(near).owner, id);
        assert!(!cosmos.get_component::<Item>(far).owner.is_set());
        assert_eq!(cosmos.get_component::<Character>(id).wielded_item, near);
        assert!(result.effects.contains(&SimEffect::ItemPickedUp {
            character: guid,
            item: near_guid,
        }));

        // Equidistant: the lower GUID wins.
        let mut cosmos = world();
        let id = cosmos.create_character(FixedVec2::ZERO);
        let guid = cosmos.guid_of(id);
        let a = cosmos.create_item(FixedVec2::new(FIXED_ONE, 0), 1);
        let _b = cosmos.create_item(FixedVec2::new(-FIXED_ONE, 0), 1);

        cosmos.advance(
            &CosmicEntropy::of_player(guid, press(IntentKind::Interact)),
            &SolveSettings::default(),
        );
        assert_eq!(cosmos.get_component::<Item>(a).owner, id);
    }

    #[test]
    fn test_pickup_ignores_out_of_reach_and_owned_items() {
        let mut cosmos = world();
        let id = cosmos.create_character(FixedVec2::ZERO);
        let guid = cosmos.guid_of(id);

        let far = cosmos.create_item(FixedVec2::new(FIXED_ONE * 10, 0), 1);
        let owned = cosmos.create_item(FixedVec2::ZERO, 1);
        cosmos.find_component_mut::<Item>(owned).unwrap().owner = far;

        let result = cosmos.advance(
            &CosmicEntropy::of_player(guid, press(IntentKind::Interact)),
            &SolveSettings::default(),
        );

        assert!(!cosmos.get_component::<Character>(id).wielded_item.is_set());
        assert!(result.effects.is_empty());
    }

    #[test]
    fn test_transfer_to_dead_item_flags_inconsistency() {
        let mut cosmos = world();
        let id = cosmos.create_character(FixedVec2::ZERO);
        let guid = cosmos.guid_of(id);
        let item = cosmos.create_item(FixedVec2::ZERO, 1);
        let item_guid = cosmos.guid_of(item);
        cosmos.free_entity(item);

        let entropy = CosmicEntropy::of_player(
            guid,
            PlayerEntropy {
                transfers: vec![ItemTransfer {
                    item: item_guid,
                    to_owner: Some(guid),
                }],
                ..Default::default()
            },
        );
        let result = cosmos.advance(&entropy, &SolveSettings::default());

        assert!(result.state_inconsistent);
        assert!(result.effects.is_empty());
    }

    #[test]
    fn test_drop_transfer_clears_wield() {
        let mut cosmos = world();
        let id = cosmos.create_character(FixedVec2::ZERO);
        let guid = cosmos.guid_of(id);
        let item = cosmos.create_item(FixedVec2::ZERO, 1);
        let item_guid = cosmos.guid_of(item);

        cosmos.advance(
            &CosmicEntropy::of_player(guid, press(IntentKind::Interact)),
            &SolveSettings::default(),
        );
        assert_eq!(cosmos.get_component::<Character>(id).wielded_item, item);

        let entropy = CosmicEntropy::of_player(
            guid,
            PlayerEntropy {
                transfers: vec![ItemTransfer {
                    item: item_guid,
                    to_owner: None,
                }],
                ..Default::default()
            },
        );
        let result = cosmos.advance(&entropy, &SolveSettings::default());

        assert!(!result.state_inconsistent);
        assert!(!cosmos.get_component::<Item>(item).owner.is_set());
        assert!(!cosmos.get_component::<Character>(id).wielded_item.is_set());
    }

    #[test]
    fn test_wield_requires_ownership() {
        let mut cosmos = world();
        let id = cosmos.create_character(FixedVec2::ZERO);
        let guid = cosmos.guid_of(id);
        let item = cosmos.create_item(FixedVec2::new(FIXED_ONE * 20, 0), 1);
        let item_guid = cosmos.guid_of(item);

        // Not owned: the wield request is ignored.
        let entropy = CosmicEntropy::of_player(
            guid,
            PlayerEntropy {
                wield: Some(WieldAction::Item(item_guid)),
                ..Default::default()
            },
        );
        cosmos.advance(&entropy, &SolveSettings::default());
        assert!(!cosmos.get_component::<Character>(id).wielded_item.is_set());

        // Owned: the same request succeeds.
        cosmos.find_component_mut::<Item>(item).unwrap().owner = id;
        let result = cosmos.advance(&entropy, &SolveSettings::default());
        assert_eq!(cosmos.get_component::<Character>(id).wielded_item, item);
        assert!(result
            .effects
            .contains(&SimEffect::WieldChanged { character: guid }));
    }

    #[test]
    fn test_spell_cooldown_blocks_second_cast() {
        let mut cosmos = world();
        let id = cosmos.create_character(FixedVec2::ZERO);
        let guid = cosmos.guid_of(id);

        let result = cosmos.advance(
            &CosmicEntropy::of_player(guid, cast(SpellKind::Haste)),
            &SolveSettings::default(),
        );
        assert!(result.effects.contains(&SimEffect::SpellCasted {
            caster: guid,
            spell: SpellKind::Haste,
        }));

        let result = cosmos.advance(
            &CosmicEntropy::of_player(guid, cast(SpellKind::Barrier)),
            &SolveSettings::default(),
        );
        assert!(result.effects.is_empty(), "cooldown must reject the cast");
        assert_eq!(cosmos.get_component::<Character>(id).barrier_ticks, 0);
    }

    #[test]
    fn test_haste_doubles_displacement() {
        let mut plain = world();
        let mut hasted = world();

        let p = plain.create_character(FixedVec2::ZERO);
        let h = hasted.create_character(FixedVec2::ZERO);
        let p_guid = plain.guid_of(p);
        let h_guid = hasted.guid_of(h);

        hasted.advance(
            &CosmicEntropy::of_player(h_guid, cast(SpellKind::Haste)),
            &SolveSettings::default(),
        );
        plain.advance(&CosmicEntropy::new(), &SolveSettings::default());

        plain.advance(
            &CosmicEntropy::of_player(p_guid, press(IntentKind::MoveRight)),
            &SolveSettings::default(),
        );
        hasted.advance(
            &CosmicEntropy::of_player(h_guid, press(IntentKind::MoveRight)),
            &SolveSettings::default(),
        );

        let px = plain.get_component::<Transform>(p).position.x;
        let hx = hasted.get_component::<Transform>(h).position.x;
        assert_eq!(hx, px * 2);
    }

    #[test]
    fn test_blink_is_deterministic_and_bounded() {
        let mut a = world();
        let mut b = world();
        let ia = a.create_character(FixedVec2::ZERO);
        let ib = b.create_character(FixedVec2::ZERO);
        let guid = a.guid_of(ia);

        a.advance(
            &CosmicEntropy::of_player(guid, cast(SpellKind::Blink)),
            &SolveSettings::default(),
        );
        b.advance(
            &CosmicEntropy::of_player(guid, cast(SpellKind::Blink)),
            &SolveSettings::default(),
        );

        let pa = a.get_component::<Transform>(ia).position;
        let pb = b.get_component::<Transform>(ib).position;
        assert_eq!(pa, pb);
        assert!(pa.x.abs() <= WORLD_HALF_EXTENT && pa.y.abs() <= WORLD_HALF_EXTENT);
    }

    #[test]
    fn test_buffs_decay_to_zero() {
        let mut cosmos = world();
        let id = cosmos.create_character(FixedVec2::ZERO);
        let guid = cosmos.guid_of(id);

        cosmos.advance(
            &CosmicEntropy::of_player(guid, cast(SpellKind::Barrier)),
            &SolveSettings::default(),
        );
        assert_eq!(
            cosmos.get_component::<Character>(id).barrier_ticks,
            BARRIER_DURATION_TICKS - 1
        );

        for _ in 0..BARRIER_DURATION_TICKS {
            cosmos.advance(&CosmicEntropy::new(), &SolveSettings::default());
        }
        assert_eq!(cosmos.get_component::<Character>(id).barrier_ticks, 0);
    }

    #[test]
    fn test_silent_settings_suppress_effects_not_state() {
        let mut loud = world();
        let mut quiet = world();
        let il = loud.create_character(FixedVec2::ZERO);
        quiet.create_character(FixedVec2::ZERO);
        let guid = loud.guid_of(il);

        let entropy = CosmicEntropy::of_player(guid, cast(SpellKind::Haste));
        let r1 = loud.advance(&entropy, &SolveSettings::default());
        let r2 = quiet.advance(&entropy, &SolveSettings::silent());

        assert!(!r1.effects.is_empty());
        assert!(r2.effects.is_empty());
        assert_eq!(loud, quiet);
    }

    #[test]
    fn test_dead_player_entropy_flags_inconsistency() {
        let mut cosmos = world();
        let id = cosmos.create_character(FixedVec2::ZERO);
        let guid = cosmos.guid_of(id);
        cosmos.free_entity(id);

        let result = cosmos.advance(
            &CosmicEntropy::of_player(guid, press(IntentKind::MoveRight)),
            &SolveSettings::default(),
        );
        assert!(result.state_inconsistent);
    }
}
