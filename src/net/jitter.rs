//! Jitter Buffer
//!
//! Per-connection smoothing between an unreliable arrival stream and the
//! fixed-rate consumer. Packets are admitted out of order but leave in
//! strictly increasing sequence order, at most one merged batch per tick.
//!
//! The buffer starts `Filling`: nothing is released until enough packets
//! queue up to absorb typical jitter. Once `Steady`, a growing backlog is
//! squash-merged a few packets per tick rather than burst-replayed, and a
//! missing sequence is reported as lost rather than silently skipped.

use std::collections::VecDeque;

use crate::sim::entropy::CosmicEntropy;

/// Tuning for one jitter buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JitterSettings {
    /// Target buffering delay. Converted to ticks at construction.
    pub buffer_ms: u32,
    /// Backlog size above which catch-up merging kicks in.
    pub merge_over: u32,
    /// Upper bound on packets coalesced into a single output.
    pub max_squash: u32,
}

impl Default for JitterSettings {
    fn default() -> Self {
        Self {
            buffer_ms: 50,
            merge_over: 3,
            max_squash: 8,
        }
    }
}

/// Buffering phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JitterState {
    /// Accumulating the initial backlog; nothing is released yet.
    Filling,
    /// Releasing one batch per tick.
    Steady,
}

/// What one [`JitterBuffer::unpack_one`] call produced.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UnpackResult {
    /// The released entropy, merged from one or more packets.
    pub entropy: Option<CosmicEntropy>,
    /// How many packets were coalesced into `entropy`.
    pub merged: u32,
    /// True when a sequence gap was crossed: at least one packet this
    /// batch should have contained is considered lost.
    pub lost: bool,
}

/// Sequence-ordered packet buffer for one connection.
#[derive(Clone, Debug)]
pub struct JitterBuffer {
    settings: JitterSettings,
    lower_limit: usize,
    queue: VecDeque<(u32, CosmicEntropy)>,
    next_sequence: u32,
    state: JitterState,
    starved_for: u32,
}

impl JitterBuffer {
    /// Create a buffer for a connection stepped every `delta_ms`.
    pub fn new(settings: JitterSettings, delta_ms: u32) -> Self {
        let lower_limit = (settings.buffer_ms / delta_ms.max(1)).max(1) as usize;

        Self {
            settings,
            lower_limit,
            queue: VecDeque::new(),
            next_sequence: 0,
            state: JitterState::Filling,
            starved_for: 0,
        }
    }

    /// Admit a packet. Returns false for stale sequences and duplicates.
    pub fn acquire(&mut self, sequence: u32, entropy: CosmicEntropy) -> bool {
        if sequence < self.next_sequence {
            return false;
        }

        match self
            .queue
            .binary_search_by_key(&sequence, |(s, _)| *s)
        {
            Ok(_) => false,
            Err(pos) => {
                self.queue.insert(pos, (sequence, entropy));
                // An admitted packet proves the connection is alive.
                self.starved_for = 0;
                true
            }
        }
    }

    /// The sequence the next released packet must carry.
    pub fn next_sequence(&self) -> u32 {
        self.next_sequence
    }

    /// Release at most one batch.
    ///
    /// Emits nothing while filling or starved. When the backlog exceeds
    /// the merge threshold, coalesces up to `max_squash` packets so the
    /// consumer catches up one tick at a time.
    pub fn unpack_one(&mut self) -> UnpackResult {
        if self.state == JitterState::Filling {
            if self.queue.len() < self.lower_limit {
                self.starved_for += 1;
                return UnpackResult::default();
            }
            self.state = JitterState::Steady;
        }

        let Some((sequence, first)) = self.queue.pop_front() else {
            self.starved_for += 1;
            return UnpackResult::default();
        };

        let mut lost = sequence != self.next_sequence;
        self.next_sequence = sequence + 1;
        let mut total = first;
        let mut merged = 1;

        while self.queue.len() > self.settings.merge_over as usize
            && merged < self.settings.max_squash
        {
            let (sequence, entropy) = self.queue.pop_front().expect("backlog is non-empty");
            lost |= sequence != self.next_sequence;
            self.next_sequence = sequence + 1;
            total.combine(&entropy);
            merged += 1;
        }

        self.starved_for = 0;
        UnpackResult {
            entropy: Some(total),
            merged,
            lost,
        }
    }

    /// Whether more than `tolerance` consecutive unpack calls released
    /// nothing, with no packet arriving in between.
    pub fn starved_beyond(&self, tolerance: u32) -> bool {
        self.starved_for > tolerance
    }

    /// Return to the filling phase after prolonged starvation, so the
    /// connection re-buffers instead of oscillating on every packet.
    pub fn rebuffer(&mut self) {
        self.state = JitterState::Filling;
        self.starved_for = 0;
    }

    /// Buffered packet count.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether no packets are buffered.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Current phase.
    pub fn state(&self) -> JitterState {
        self.state
    }
}
