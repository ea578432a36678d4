//! Prediction & Rollback Engine
//!
//! The client runs two worlds. The *referential* cosmos only ever advances
//! with server-confirmed entropy and is the ground truth. The *predicted*
//! cosmos is rebuilt from the referential whenever a confirmation arrives:
//! clone, then replay every still-unconfirmed local command. Presentation
//! effects are collected only for the brand-new local step, never for
//! replays, so nothing is seen or heard twice.
//!
//! When any step reports an inconsistency the predicted timeline is no
//! longer trustworthy and a single resync request goes out; the session
//! stays in game until the fresh snapshot replaces both worlds.

use std::collections::VecDeque;

use tracing::{info, warn};

use crate::net::protocol::{ClientCommand, CompleteState, ServerCommand, StepEntropy};
use crate::net::session::{ClientSession, DisconnectReason};
use crate::net::transport::Transport;
use crate::sim::components::EntityGuid;
use crate::sim::cosmos::Cosmos;
use crate::sim::entropy::{CosmicEntropy, EntropyAccumulator, InputEvent};
use crate::sim::solve::{SimEffect, SolveSettings};

/// Client-side tuning.
#[derive(Clone, Copy, Debug)]
pub struct ClientVars {
    /// Ceiling on unconfirmed predicted commands. Exceeding it means the
    /// server is unreachable or hopelessly behind, and the session ends.
    pub max_predicted_commands: usize,
    /// Consecutive in-game ticks without any server traffic tolerated
    /// before the session ends as starved.
    pub starvation_tolerance: u32,
}

impl Default for ClientVars {
    fn default() -> Self {
        Self {
            // Three seconds of prediction at 60 Hz.
            max_predicted_commands: 180,
            // Two seconds of silence at 60 Hz.
            starvation_tolerance: 120,
        }
    }
}

/// What one [`ClientSetup::advance`] call produced for presentation.
#[derive(Clone, Debug, Default)]
pub struct ClientTickReport {
    /// Effects of the newly predicted local step.
    pub effects: Vec<SimEffect>,
    /// Whether the predicted world was rebuilt this call.
    pub repredicted: bool,
}

struct Worlds {
    referential: Cosmos,
    predicted: Cosmos,
    controlled: EntityGuid,
}

/// A predicting client endpoint.
pub struct ClientSetup<T: Transport> {
    vars: ClientVars,
    session: ClientSession,
    transport: T,
    worlds: Option<Worlds>,
    /// Local commands sent but not yet confirmed, oldest first.
    predicted_entropies: VecDeque<(u32, CosmicEntropy)>,
    next_sequence: u32,
    /// Server step sequence the referential world expects next. Steps
    /// below it are already contained in an applied snapshot.
    next_step: u32,
    ticks_starved: u32,
    accumulator: EntropyAccumulator,
}

impl<T: Transport> ClientSetup<T> {
    /// Create a client over an established transport.
    pub fn new(vars: ClientVars, transport: T) -> Self {
        let mut session = ClientSession::new();
        session.begin_connecting();

        Self {
            vars,
            session,
            transport,
            worlds: None,
            predicted_entropies: VecDeque::new(),
            next_sequence: 0,
            next_step: 0,
            ticks_starved: 0,
            accumulator: EntropyAccumulator::new(),
        }
    }

    /// Leave the session. Terminal; further `advance` calls are inert.
    pub fn disconnect(&mut self) {
        self.session.disconnect(DisconnectReason::Requested);
    }

    /// Record one raw local input event for the next tick.
    pub fn control(&mut self, event: InputEvent) {
        self.accumulator.control(event);
    }

    /// Session lifecycle state.
    pub fn session(&self) -> &ClientSession {
        &self.session
    }

    /// The world to present, one prediction ahead of the server.
    pub fn predicted(&self) -> Option<&Cosmos> {
        self.worlds.as_ref().map(|w| &w.predicted)
    }

    /// The last server-confirmed world.
    pub fn referential(&self) -> Option<&Cosmos> {
        self.worlds.as_ref().map(|w| &w.referential)
    }

    /// GUID of the locally controlled character.
    pub fn controlled(&self) -> Option<EntityGuid> {
        self.worlds.as_ref().map(|w| w.controlled)
    }

    /// Count of sent-but-unconfirmed local commands.
    pub fn pending_predictions(&self) -> usize {
        self.predicted_entropies.len()
    }

    /// Run one local tick: ingest server traffic, repredict if anything
    /// was confirmed, then predict and send the new local command.
    pub fn advance(&mut self) -> ClientTickReport {
        let mut report = ClientTickReport::default();
        if self.session.is_disconnected() {
            return report;
        }

        let mut need_resync = false;

        let payloads = self.transport.receive();
        if self.worlds.is_some() {
            if payloads.is_empty() {
                self.ticks_starved += 1;
            } else {
                self.ticks_starved = 0;
            }
        }

        for payload in payloads {
            match ServerCommand::from_bytes(&payload) {
                Ok(ServerCommand::CompleteState(snapshot)) => {
                    self.apply_complete_state(snapshot);
                }
                Ok(ServerCommand::StepEntropy(step)) => {
                    self.apply_confirmed_step(step, &mut report, &mut need_resync);
                }
                Err(err) => {
                    warn!(%err, "dropping malformed server command");
                }
            }
        }

        if self.ticks_starved > self.vars.starvation_tolerance {
            warn!(
                ticks = self.ticks_starved,
                "no server traffic for too long, disconnecting"
            );
            self.session.disconnect(DisconnectReason::Starved);
            return report;
        }

        self.predict_local_step(&mut report, &mut need_resync);

        if need_resync && self.session.begin_resync() {
            info!("predicted timeline invalid, requesting resync");
            match ClientCommand::ResyncRequest.to_bytes() {
                Ok(bytes) => self.transport.send_reliable(bytes),
                Err(err) => warn!(%err, "failed to encode resync request"),
            }
        }

        if self.predicted_entropies.len() > self.vars.max_predicted_commands {
            warn!(
                pending = self.predicted_entropies.len(),
                limit = self.vars.max_predicted_commands,
                "too many unconfirmed commands, disconnecting"
            );
            self.session.disconnect(DisconnectReason::PredictionOverflow);
        }

        self.transport.flush();
        report
    }

    /// Replace both worlds with a fresh snapshot.
    fn apply_complete_state(&mut self, snapshot: CompleteState) {
        let cosmos = match Cosmos::from_bytes(&snapshot.cosmos) {
            Ok(cosmos) => cosmos,
            Err(err) => {
                warn!(%err, "complete state failed to decode");
                self.session.disconnect(DisconnectReason::ProtocolViolation);
                return;
            }
        };

        // The assigned sequence matters only on join; a resync keeps the
        // client's own numbering.
        if self.worlds.is_none() {
            self.next_sequence = snapshot.next_sequence;
        }
        self.next_step = snapshot.step_sequence;
        self.predicted_entropies.clear();

        info!(
            controlled = snapshot.controlled,
            tick = cosmos.ticks_passed(),
            "complete state applied"
        );

        self.worlds = Some(Worlds {
            predicted: cosmos.clone(),
            referential: cosmos,
            controlled: snapshot.controlled,
        });
        self.session.on_accepted();
        self.session.on_complete_state();
    }

    /// Advance the referential world by one confirmed step and rebuild
    /// the prediction on top of it.
    fn apply_confirmed_step(
        &mut self,
        step: StepEntropy,
        report: &mut ClientTickReport,
        need_resync: &mut bool,
    ) {
        let Some(worlds) = self.worlds.as_mut() else {
            return;
        };

        // A step already contained in an applied snapshot must not run a
        // second time.
        if step.sequence < self.next_step {
            return;
        }
        self.next_step = step.sequence + 1;

        let result = worlds
            .referential
            .advance(&step.entropy, &SolveSettings::silent());
        *need_resync |= result.state_inconsistent;

        // Retire by sequence, not by count: commands sent before a resync
        // may still be confirmed afterwards, and those confirmations must
        // never touch the fresh post-snapshot predictions.
        while self
            .predicted_entropies
            .front()
            .is_some_and(|(sequence, _)| *sequence < step.confirmed_below)
        {
            self.predicted_entropies.pop_front();
        }

        worlds.predicted = worlds.referential.clone();
        for (_, entropy) in &self.predicted_entropies {
            let mut outstanding = entropy.clone();
            outstanding.prune_dead(&worlds.predicted);
            let replay = worlds
                .predicted
                .advance(&outstanding, &SolveSettings::silent());
            *need_resync |= replay.state_inconsistent;
        }
        report.repredicted = true;
    }

    /// Predict one brand-new local step and send its entropy.
    fn predict_local_step(&mut self, report: &mut ClientTickReport, need_resync: &mut bool) {
        let Some(worlds) = self.worlds.as_mut() else {
            // Inputs collected before the world exists have no subject.
            self.accumulator.clear();
            return;
        };

        let entropy = self.accumulator.extract(worlds.controlled);
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let command = ClientCommand::RequestedEntropy {
            sequence,
            entropy: entropy.clone(),
        };
        match command.to_bytes() {
            Ok(bytes) => self.transport.post_redundant(bytes),
            Err(err) => warn!(%err, "failed to encode entropy command"),
        }

        self.predicted_entropies.push_back((sequence, entropy.clone()));

        let result = worlds.predicted.advance(&entropy, &SolveSettings::default());
        *need_resync |= result.state_inconsistent;
        report.effects = result.effects;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixed::FIXED_ONE;
    use crate::core::vec2::FixedVec2;
    use crate::net::transport::{loopback_pair, LoopbackEndpoint};
    use crate::sim::components::Transform;
    use crate::sim::entropy::{Intent, IntentKind, PlayerEntropy};

    fn press(kind: IntentKind) -> InputEvent {
        InputEvent::Intent(Intent {
            kind,
            pressed: true,
        })
    }

    fn pressed_record(kind: IntentKind) -> PlayerEntropy {
        PlayerEntropy {
            intents: vec![Intent {
                kind,
                pressed: true,
            }],
            ..Default::default()
        }
    }

    fn position_of(cosmos: &Cosmos, guid: crate::sim::components::EntityGuid) -> FixedVec2 {
        let id = cosmos.entity_by_guid(guid).unwrap();
        cosmos.get_component::<Transform>(id).position
    }

    /// Build a server-side world and walk a fresh client through the
    /// handshake. Returns the client, the server's transport end, the
    /// server's mirror cosmos and the controlled guid.
    fn handshake(vars: ClientVars) -> (ClientSetup<LoopbackEndpoint>, LoopbackEndpoint, Cosmos, EntityGuid) {
        let (client_end, mut server_end) = loopback_pair();
        let mut client = ClientSetup::new(vars, client_end);

        let mut mirror = Cosmos::new(60, 1);
        let id = mirror.create_character(FixedVec2::ZERO);
        mirror.create_item(FixedVec2::new(FIXED_ONE, 0), 1);
        let guid = mirror.guid_of(id);

        let snapshot = ServerCommand::CompleteState(CompleteState {
            cosmos: mirror.to_bytes(),
            controlled: guid,
            next_sequence: 0,
            step_sequence: 0,
        });
        server_end.send_reliable(snapshot.to_bytes().unwrap());

        client.advance();
        assert!(client.session().is_in_game());

        (client, server_end, mirror, guid)
    }

    fn drain_commands(end: &mut LoopbackEndpoint) -> Vec<ClientCommand> {
        end.receive()
            .iter()
            .map(|bytes| ClientCommand::from_bytes(bytes).unwrap())
            .collect()
    }

    fn count_resyncs(commands: &[ClientCommand]) -> usize {
        commands
            .iter()
            .filter(|c| matches!(c, ClientCommand::ResyncRequest))
            .count()
    }

    #[test]
    fn test_handshake_establishes_worlds() {
        let (client, _server_end, mirror, guid) = handshake(ClientVars::default());

        assert_eq!(client.controlled(), Some(guid));
        // The prediction already ran one local step past the snapshot.
        assert_eq!(client.pending_predictions(), 1);
        assert_eq!(
            client.referential().unwrap().ticks_passed(),
            mirror.ticks_passed()
        );
        assert_eq!(
            client.predicted().unwrap().ticks_passed(),
            mirror.ticks_passed() + 1
        );
    }

    #[test]
    fn test_prediction_converges_after_confirmation() {
        let (mut client, mut server_end, mut mirror, _guid) = handshake(ClientVars::default());

        client.control(press(IntentKind::MoveRight));
        for _ in 0..5 {
            client.advance();
        }
        assert_eq!(client.pending_predictions(), 6);

        // The server confirms every received command, one step each.
        let commands = drain_commands(&mut server_end);
        let mut step_sequence = 0;
        for command in commands {
            let ClientCommand::RequestedEntropy { sequence, entropy } = command else {
                panic!("unexpected command during convergence");
            };
            mirror.advance(&entropy, &SolveSettings::silent());
            let step = ServerCommand::StepEntropy(StepEntropy {
                sequence: step_sequence,
                confirmed_below: sequence + 1,
                entropy,
            });
            server_end.post_redundant(step.to_bytes().unwrap());
            step_sequence += 1;
        }
        server_end.flush();

        let report = client.advance();
        assert!(report.repredicted);
        // Everything confirmed except the step this call itself produced.
        assert_eq!(client.pending_predictions(), 1);

        // Referential and mirror replayed identical entropy: bit-identical.
        assert_eq!(
            client.referential().unwrap().state_digest(),
            mirror.state_digest()
        );
        assert!(!client.session().resyncing());
    }

    #[test]
    fn test_inconsistent_step_requests_exactly_one_resync() {
        let (mut client, mut server_end, mirror, _guid) = handshake(ClientVars::default());

        let ghost_step = |sequence: u32| {
            ServerCommand::StepEntropy(StepEntropy {
                sequence,
                confirmed_below: 0,
                entropy: CosmicEntropy::of_player(
                    9999,
                    PlayerEntropy {
                        intents: vec![Intent {
                            kind: IntentKind::Interact,
                            pressed: true,
                        }],
                        ..Default::default()
                    },
                ),
            })
        };

        server_end.post_redundant(ghost_step(0).to_bytes().unwrap());
        server_end.flush();
        client.advance();
        let first = count_resyncs(&drain_commands(&mut server_end));
        assert_eq!(first, 1, "one desync must yield exactly one request");
        assert!(client.session().resyncing());

        // More inconsistent steps while resyncing stay silent.
        server_end.post_redundant(ghost_step(1).to_bytes().unwrap());
        server_end.flush();
        client.advance();
        assert_eq!(count_resyncs(&drain_commands(&mut server_end)), 0);

        // The snapshot clears the flag; a fresh desync may request again.
        let snapshot = ServerCommand::CompleteState(CompleteState {
            cosmos: mirror.to_bytes(),
            controlled: client.controlled().unwrap(),
            next_sequence: 0,
            step_sequence: 2,
        });
        server_end.send_reliable(snapshot.to_bytes().unwrap());
        client.advance();
        assert!(!client.session().resyncing());

        server_end.post_redundant(ghost_step(2).to_bytes().unwrap());
        server_end.flush();
        client.advance();
        assert_eq!(count_resyncs(&drain_commands(&mut server_end)), 1);
    }

    #[test]
    fn test_prediction_overflow_disconnects() {
        let (mut client, _server_end, _mirror, _guid) = handshake(ClientVars {
            max_predicted_commands: 3,
            ..Default::default()
        });

        // The server never confirms anything.
        for _ in 0..3 {
            client.advance();
        }

        assert!(client.session().is_disconnected());
        assert_eq!(
            client.session().disconnect_reason(),
            Some(DisconnectReason::PredictionOverflow)
        );

        // Terminal: further calls are inert.
        let report = client.advance();
        assert!(report.effects.is_empty());
    }

    #[test]
    fn test_complete_state_discards_predictions() {
        let (mut client, mut server_end, mut mirror, guid) = handshake(ClientVars::default());

        client.control(press(IntentKind::MoveForward));
        for _ in 0..4 {
            client.advance();
        }
        assert_eq!(client.pending_predictions(), 5);

        for _ in 0..10 {
            mirror.advance(&CosmicEntropy::new(), &SolveSettings::silent());
        }
        let snapshot = ServerCommand::CompleteState(CompleteState {
            cosmos: mirror.to_bytes(),
            controlled: guid,
            next_sequence: 0,
            step_sequence: 10,
        });
        server_end.send_reliable(snapshot.to_bytes().unwrap());
        client.advance();

        // Old predictions are gone; only the step after the snapshot is
        // outstanding.
        assert_eq!(client.pending_predictions(), 1);
        assert_eq!(
            client.referential().unwrap().state_digest(),
            mirror.state_digest()
        );
    }

    #[test]
    fn test_replayed_effects_are_not_presented_twice() {
        let (mut client, mut server_end, _mirror, guid) = handshake(ClientVars::default());

        // Walk into pickup range, then interact.
        client.control(press(IntentKind::Interact));
        let report = client.advance();
        let pickups = report
            .effects
            .iter()
            .filter(|e| matches!(e, SimEffect::ItemPickedUp { .. }))
            .count();
        assert_eq!(pickups, 1, "the new prediction presents the pickup");

        // The server confirms the steps containing the pickup; reprediction
        // replays it silently.
        let commands = drain_commands(&mut server_end);
        let mut step_sequence = 0;
        for command in commands {
            let ClientCommand::RequestedEntropy { sequence, entropy } = command else {
                continue;
            };
            let step = ServerCommand::StepEntropy(StepEntropy {
                sequence: step_sequence,
                confirmed_below: sequence + 1,
                entropy,
            });
            server_end.post_redundant(step.to_bytes().unwrap());
            step_sequence += 1;
        }
        server_end.flush();

        let report = client.advance();
        assert!(report.repredicted);
        assert!(
            !report
                .effects
                .iter()
                .any(|e| matches!(e, SimEffect::ItemPickedUp { .. })),
            "replays must not re-present effects"
        );

        // The predicted world still holds the pickup's outcome.
        let predicted = client.predicted().unwrap();
        let id = predicted.entity_by_guid(guid).unwrap();
        assert!(predicted
            .get_component::<crate::sim::components::Character>(id)
            .wielded_item
            .is_set());
    }

    #[test]
    fn test_stale_confirmation_after_resync_keeps_new_predictions() {
        let (mut client, mut server_end, mirror, guid) = handshake(ClientVars::default());

        // A resync snapshot lands while the handshake command is still in
        // flight. The snapshot wipes the old predictions.
        let snapshot = ServerCommand::CompleteState(CompleteState {
            cosmos: mirror.to_bytes(),
            controlled: guid,
            next_sequence: 0,
            step_sequence: 0,
        });
        server_end.send_reliable(snapshot.to_bytes().unwrap());

        client.control(press(IntentKind::MoveRight));
        client.advance();
        assert_eq!(client.pending_predictions(), 1, "only the post-snapshot command");

        // The server now merges the command sent before the snapshot. Its
        // confirmation covers sequences below 1 and must leave the fresh
        // press untouched.
        let stale = ServerCommand::StepEntropy(StepEntropy {
            sequence: 0,
            confirmed_below: 1,
            entropy: CosmicEntropy::of_player(guid, PlayerEntropy::default()),
        });
        server_end.post_redundant(stale.to_bytes().unwrap());
        server_end.flush();

        let report = client.advance();
        assert!(report.repredicted);
        assert_eq!(client.pending_predictions(), 2);
        assert!(
            position_of(client.predicted().unwrap(), guid).x > 0,
            "the press sent after the snapshot must survive reprediction"
        );
    }

    #[test]
    fn test_step_included_in_snapshot_is_skipped() {
        let (mut client, mut server_end, mut mirror, guid) = handshake(ClientVars::default());

        // The snapshot is taken after step 0 ran, and step 0 is still
        // broadcast alongside it. Applying both would advance the client
        // one tick past the server.
        mirror.advance(&CosmicEntropy::new(), &SolveSettings::silent());
        let snapshot = ServerCommand::CompleteState(CompleteState {
            cosmos: mirror.to_bytes(),
            controlled: guid,
            next_sequence: 0,
            step_sequence: 1,
        });
        server_end.send_reliable(snapshot.to_bytes().unwrap());
        let step = ServerCommand::StepEntropy(StepEntropy {
            sequence: 0,
            confirmed_below: 0,
            entropy: CosmicEntropy::new(),
        });
        server_end.post_redundant(step.to_bytes().unwrap());
        server_end.flush();

        client.advance();

        assert_eq!(
            client.referential().unwrap().ticks_passed(),
            mirror.ticks_passed()
        );
        assert_eq!(
            client.referential().unwrap().state_digest(),
            mirror.state_digest()
        );
    }

    #[test]
    fn test_divergent_confirmation_replays_local_entropy() {
        let (mut client, mut server_end, mirror, guid) = handshake(ClientVars::default());

        // The authoritative step 0 contains a press the client never
        // predicted, and it confirms nothing.
        let divergent = CosmicEntropy::of_player(guid, pressed_record(IntentKind::MoveForward));
        let step = ServerCommand::StepEntropy(StepEntropy {
            sequence: 0,
            confirmed_below: 0,
            entropy: divergent.clone(),
        });
        server_end.post_redundant(step.to_bytes().unwrap());
        server_end.flush();

        client.control(press(IntentKind::MoveRight));
        let report = client.advance();
        assert!(report.repredicted);
        assert_eq!(client.pending_predictions(), 2);

        // The referential world is the mirror plus the divergent step.
        let mut expected = mirror.clone();
        expected.advance(&divergent, &SolveSettings::silent());
        assert_eq!(
            client.referential().unwrap().state_digest(),
            expected.state_digest()
        );

        // The prediction is that plus both outstanding local commands, in
        // order: the empty handshake command, then the fresh press.
        expected.advance(
            &CosmicEntropy::of_player(guid, PlayerEntropy::default()),
            &SolveSettings::silent(),
        );
        expected.advance(
            &CosmicEntropy::of_player(guid, pressed_record(IntentKind::MoveRight)),
            &SolveSettings::silent(),
        );
        assert_eq!(
            client.predicted().unwrap().state_digest(),
            expected.state_digest()
        );

        // Both the server's press and the local one show in the prediction.
        let position = position_of(client.predicted().unwrap(), guid);
        assert!(position.y > 0 && position.x > 0);
    }

    #[test]
    fn test_prolonged_silence_disconnects_starved() {
        let (mut client, _server_end, _mirror, _guid) = handshake(ClientVars {
            starvation_tolerance: 3,
            ..Default::default()
        });

        for _ in 0..5 {
            client.advance();
        }

        assert!(client.session().is_disconnected());
        assert_eq!(
            client.session().disconnect_reason(),
            Some(DisconnectReason::Starved)
        );
    }

    #[test]
    fn test_requested_disconnect_is_terminal() {
        let (mut client, _server_end, _mirror, _guid) = handshake(ClientVars::default());
        assert_eq!(client.pending_predictions(), 1);

        client.disconnect();
        assert!(client.session().is_disconnected());
        assert_eq!(
            client.session().disconnect_reason(),
            Some(DisconnectReason::Requested)
        );

        client.advance();
        assert_eq!(
            client.pending_predictions(),
            1,
            "a closed session must not predict"
        );
    }
}
