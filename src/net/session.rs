//! Client Session State Machine
//!
//! Tracks where a client connection is in its lifecycle. The resync flag
//! is orthogonal to the phase: a desynced client stays in game while it
//! waits for a fresh snapshot, and at most one resync request may be
//! outstanding at a time.

use std::fmt;

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The predicted-command queue exceeded its ceiling; the server is
    /// too far behind for prediction to stay meaningful.
    PredictionOverflow,
    /// The peer sent something the protocol forbids.
    ProtocolViolation,
    /// The connection delivered nothing for too long.
    Starved,
    /// The user asked to leave.
    Requested,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DisconnectReason::PredictionOverflow => "too many unconfirmed predicted commands",
            DisconnectReason::ProtocolViolation => "protocol violation",
            DisconnectReason::Starved => "connection starved",
            DisconnectReason::Requested => "disconnect requested",
        };
        f.write_str(text)
    }
}

/// Connection lifecycle phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    /// No connection attempt yet.
    Invalid,
    /// Waiting for the server to accept.
    Connecting,
    /// Accepted, waiting for the first complete state.
    Connected,
    /// Holding a world and exchanging entropy.
    InGame,
    /// Terminal. Check the reason.
    Disconnected,
}

/// One client connection's lifecycle state.
#[derive(Clone, Debug)]
pub struct ClientSession {
    phase: SessionPhase,
    resyncing: bool,
    reason: Option<DisconnectReason>,
}

impl Default for ClientSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientSession {
    /// Fresh session, no connection attempt made.
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::Invalid,
            resyncing: false,
            reason: None,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Whether a resync request is outstanding.
    pub fn resyncing(&self) -> bool {
        self.resyncing
    }

    /// Whether the session ended.
    pub fn is_disconnected(&self) -> bool {
        self.phase == SessionPhase::Disconnected
    }

    /// Whether the session holds a world.
    pub fn is_in_game(&self) -> bool {
        self.phase == SessionPhase::InGame
    }

    /// Why the session ended, if it did.
    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.reason
    }

    /// Invalid -> Connecting.
    pub fn begin_connecting(&mut self) {
        if self.phase == SessionPhase::Invalid {
            self.phase = SessionPhase::Connecting;
        }
    }

    /// Connecting -> Connected.
    pub fn on_accepted(&mut self) {
        if self.phase == SessionPhase::Connecting {
            self.phase = SessionPhase::Connected;
        }
    }

    /// A complete state applied: Connected -> InGame, and any outstanding
    /// resync is satisfied.
    pub fn on_complete_state(&mut self) {
        if matches!(self.phase, SessionPhase::Connected | SessionPhase::InGame) {
            self.phase = SessionPhase::InGame;
            self.resyncing = false;
        }
    }

    /// Mark a resync as outstanding. Returns true only for the first call
    /// since the last applied complete state, so exactly one request goes
    /// out per desync.
    pub fn begin_resync(&mut self) -> bool {
        if self.phase != SessionPhase::InGame || self.resyncing {
            return false;
        }
        self.resyncing = true;
        true
    }

    /// Terminal transition, reachable from any phase. The first reason
    /// wins; later calls are no-ops.
    pub fn disconnect(&mut self, reason: DisconnectReason) {
        if self.phase != SessionPhase::Disconnected {
            self.phase = SessionPhase::Disconnected;
            self.reason = Some(reason);
        }
    }
}
