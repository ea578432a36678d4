//! Authoritative Server Loop
//!
//! Owns the one true cosmos. Every tick it drains each client's transport,
//! feeds entropy packets through that client's jitter buffer, merges at
//! most one released batch per client with the admin player's local input,
//! advances the world and broadcasts the merged step redundantly until
//! every client acknowledges it. Joining clients receive the complete
//! serialized state reliably before anything else.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::core::fixed::to_fixed;
use crate::core::rng::derive_session_seed;
use crate::core::vec2::FixedVec2;
use crate::net::jitter::{JitterBuffer, JitterSettings};
use crate::net::protocol::{
    ClientCommand, CompleteState, ServerCommand, StepEntropy, MAX_ENTROPY_EVENTS,
};
use crate::net::transport::Transport;
use crate::sim::components::EntityGuid;
use crate::sim::cosmos::Cosmos;
use crate::sim::entropy::{CosmicEntropy, EntropyAccumulator, InputEvent};
use crate::sim::solve::SolveSettings;

/// Server-side tuning.
#[derive(Clone, Copy, Debug)]
pub struct ServerVars {
    /// Simulation steps per second.
    pub tick_rate: u32,
    /// Raw session seed; the cosmos seed is derived from it.
    pub seed: u64,
    /// Jitter buffering applied to every connection.
    pub jitter: JitterSettings,
    /// Per-packet event ceiling; packets above it get the sender dropped.
    pub max_entropy_events: usize,
    /// Consecutive dry ticks tolerated before a connection re-buffers.
    pub starvation_tolerance: u32,
    /// Re-buffer attempts tolerated before a connection is dropped.
    pub max_rebuffers: u32,
    /// Ceiling on catch-up steps per [`ServerSetup::run`] call.
    pub max_catchup_ticks: u32,
}

impl Default for ServerVars {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            seed: 0,
            jitter: JitterSettings::default(),
            max_entropy_events: MAX_ENTROPY_EVENTS,
            starvation_tolerance: 30,
            max_rebuffers: 3,
            max_catchup_ticks: 5,
        }
    }
}

/// Identifier for a connected client, unique per server lifetime.
pub type ClientId = u64;

struct Endpoint<T> {
    transport: T,
    controlled: EntityGuid,
    jitter: JitterBuffer,
    wants_resync: bool,
    rebuffers: u32,
}

/// Wall-clock to logical-tick conversion with bounded catch-up.
///
/// When the host stalls past the catch-up ceiling, the remaining debt is
/// forgiven rather than burst-replayed - the simulation slows down instead
/// of spiraling.
#[derive(Clone, Copy, Debug, Default)]
pub struct CatchUpTimer {
    last_ms: Option<u64>,
}

impl CatchUpTimer {
    /// Timer that starts counting at its first `due_ticks` call.
    pub fn new() -> Self {
        Self::default()
    }

    /// How many steps are due at `now_ms`, at most `cap`.
    pub fn due_ticks(&mut self, now_ms: u64, delta_ms: u64, cap: u32) -> u32 {
        let last = self.last_ms.get_or_insert(now_ms);

        let mut ticks = 0;
        while now_ms.saturating_sub(*last) >= delta_ms && ticks < cap {
            *last += delta_ms;
            ticks += 1;
        }

        if now_ms.saturating_sub(*last) >= delta_ms {
            *last = now_ms;
        }

        ticks
    }
}

/// The authoritative session host.
pub struct ServerSetup<T: Transport> {
    vars: ServerVars,
    cosmos: Cosmos,
    clients: BTreeMap<ClientId, Endpoint<T>>,
    next_client_id: ClientId,
    next_step_sequence: u32,
    admin: EntropyAccumulator,
    admin_player: EntityGuid,
    timer: CatchUpTimer,
}

impl<T: Transport> ServerSetup<T> {
    /// Start a session. The admin player's character exists from tick 0.
    pub fn new(vars: ServerVars) -> Self {
        let seed = derive_session_seed(b"server", vars.seed);
        let mut cosmos = Cosmos::new(vars.tick_rate, seed);
        let admin_id = cosmos.create_character(FixedVec2::ZERO);
        let admin_player = cosmos.guid_of(admin_id);

        Self {
            vars,
            cosmos,
            clients: BTreeMap::new(),
            next_client_id: 1,
            next_step_sequence: 0,
            admin: EntropyAccumulator::new(),
            admin_player,
            timer: CatchUpTimer::new(),
        }
    }

    /// The authoritative world.
    pub fn cosmos(&self) -> &Cosmos {
        &self.cosmos
    }

    /// Connected client count, not counting the admin player.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// GUID of the admin player's character.
    pub fn admin_player(&self) -> EntityGuid {
        self.admin_player
    }

    /// GUID of the character a client controls.
    pub fn controlled_guid(&self, client: ClientId) -> Option<EntityGuid> {
        self.clients.get(&client).map(|ep| ep.controlled)
    }

    /// Record one of the admin player's raw input events.
    pub fn control(&mut self, event: InputEvent) {
        self.admin.control(event);
    }

    /// Accept a connection: spawn its character and send the complete
    /// state reliably before any step entropy.
    pub fn connect(&mut self, mut transport: T) -> ClientId {
        let slot = self.clients.len() as i32 + 1;
        let spawn = FixedVec2::new(to_fixed(2.0).wrapping_mul(slot), 0);
        let entity = self.cosmos.create_character(spawn);
        let controlled = self.cosmos.guid_of(entity);

        let snapshot = ServerCommand::CompleteState(CompleteState {
            cosmos: self.cosmos.to_bytes(),
            controlled,
            next_sequence: 0,
            step_sequence: self.next_step_sequence,
        });
        match snapshot.to_bytes() {
            Ok(bytes) => transport.send_reliable(bytes),
            Err(err) => warn!(%err, "failed to encode complete state"),
        }
        transport.flush();

        let client = self.next_client_id;
        self.next_client_id += 1;
        self.clients.insert(
            client,
            Endpoint {
                transport,
                controlled,
                jitter: JitterBuffer::new(self.vars.jitter, self.cosmos.clock().delta_ms()),
                wants_resync: false,
                rebuffers: 0,
            },
        );

        info!(client, controlled, "client joined");
        client
    }

    /// Remove a client and free its character.
    pub fn disconnect(&mut self, client: ClientId) -> bool {
        let Some(endpoint) = self.clients.remove(&client) else {
            return false;
        };

        if let Some(entity) = self.cosmos.entity_by_guid(endpoint.controlled) {
            self.cosmos.free_entity(entity);
        }

        info!(client, controlled = endpoint.controlled, "client left");
        true
    }

    /// Step as many times as wall-clock time demands, bounded by the
    /// catch-up ceiling. Returns the number of steps taken.
    pub fn run(&mut self, now_ms: u64) -> u32 {
        let delta_ms = self.cosmos.clock().delta_ms() as u64;
        let due = self
            .timer
            .due_ticks(now_ms, delta_ms, self.vars.max_catchup_ticks);

        for _ in 0..due {
            self.advance_once();
        }
        due
    }

    /// Execute exactly one authoritative step.
    pub fn advance_once(&mut self) {
        let mut to_drop: Vec<ClientId> = Vec::new();

        // Phase 1: ingest client traffic into the jitter buffers.
        for (client, endpoint) in self.clients.iter_mut() {
            for payload in endpoint.transport.receive() {
                let command = match ClientCommand::from_bytes(&payload) {
                    Ok(command) => command,
                    Err(err) => {
                        // A garbled frame resets the stream, not the
                        // connection.
                        warn!(client, %err, "malformed client command");
                        continue;
                    }
                };

                if let Err(err) = command.validate(self.vars.max_entropy_events) {
                    warn!(client, %err, "dropping abusive client");
                    to_drop.push(*client);
                    break;
                }

                match command {
                    ClientCommand::RequestedEntropy { sequence, entropy } => {
                        // A client only ever speaks for its own character.
                        let record = entropy.of(endpoint.controlled).cloned().unwrap_or_default();
                        endpoint
                            .jitter
                            .acquire(sequence, CosmicEntropy::of_player(endpoint.controlled, record));
                    }
                    ClientCommand::ResyncRequest => {
                        endpoint.wants_resync = true;
                    }
                }
            }
        }

        // Phase 2: release at most one batch per client and merge.
        let mut total = CosmicEntropy::new();
        for (client, endpoint) in self.clients.iter_mut() {
            let released = endpoint.jitter.unpack_one();
            if released.lost {
                debug!(client, "client entropy lost in transit");
            }
            if released.merged > 1 {
                debug!(client, merged = released.merged, "squashed backlogged entropy");
            }
            if let Some(entropy) = released.entropy {
                total.combine(&entropy);
            }

            if endpoint.jitter.starved_beyond(self.vars.starvation_tolerance) {
                endpoint.rebuffers += 1;
                endpoint.jitter.rebuffer();
                if endpoint.rebuffers > self.vars.max_rebuffers {
                    warn!(client, "connection starved for too long");
                    to_drop.push(*client);
                }
            }
        }

        total.combine(&self.admin.extract(self.admin_player));
        total.prune_dead(&self.cosmos);

        // Phase 3: one authoritative step.
        let sequence = self.next_step_sequence;
        self.next_step_sequence += 1;
        self.cosmos.advance(&total, &SolveSettings::silent());

        // Phase 4: broadcast, snapshots first so a resyncing client never
        // applies a step to a stale world.
        for (client, endpoint) in self.clients.iter_mut() {
            if endpoint.wants_resync {
                endpoint.wants_resync = false;
                let snapshot = ServerCommand::CompleteState(CompleteState {
                    cosmos: self.cosmos.to_bytes(),
                    controlled: endpoint.controlled,
                    next_sequence: endpoint.jitter.next_sequence(),
                    step_sequence: self.next_step_sequence,
                });
                match snapshot.to_bytes() {
                    Ok(bytes) => endpoint.transport.send_reliable(bytes),
                    Err(err) => warn!(client, %err, "failed to encode complete state"),
                }
            }

            let step = ServerCommand::StepEntropy(StepEntropy {
                sequence,
                confirmed_below: endpoint.jitter.next_sequence(),
                entropy: total.clone(),
            });
            match step.to_bytes() {
                Ok(bytes) => endpoint.transport.post_redundant(bytes),
                Err(err) => warn!(client, %err, "failed to encode step entropy"),
            }
            endpoint.transport.flush();
        }

        to_drop.dedup();
        for client in to_drop {
            self.disconnect(client);
        }
    }
}
