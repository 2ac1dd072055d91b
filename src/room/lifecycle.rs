//! Room Lifecycle
//!
//! `WAITING -> COUNTDOWN -> PLAYING -> FINISHED`, with `COUNTDOWN -> WAITING`
//! on cancellation and `FINISHED -> WAITING` for a full reset. Each state
//! carries the timers it needs, so timers cannot outlive their phase.

use std::fmt;
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tokio::time::Instant;

/// Lifecycle phase without per-phase data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Lobby: joins accepted, players toggle ready.
    Waiting,
    /// All ready, counting down.
    Countdown,
    /// Match in progress.
    Playing,
    /// Match over, waiting to kick players.
    Finished,
}

impl Phase {
    /// Wire name (`room_status.gameState`).
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Waiting => "WAITING",
            Phase::Countdown => "COUNTDOWN",
            Phase::Playing => "PLAYING",
            Phase::Finished => "FINISHED",
        }
    }

    /// Transition table.
    pub fn can_transition_to(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::Waiting, Phase::Countdown)
                | (Phase::Countdown, Phase::Waiting)
                | (Phase::Countdown, Phase::Playing)
                | (Phase::Playing, Phase::Finished)
                | (Phase::Finished, Phase::Waiting)
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected lifecycle transition.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid transition {from} -> {to}")]
pub struct InvalidTransition {
    /// Current phase.
    pub from: Phase,
    /// Requested phase.
    pub to: Phase,
}

/// Timers of a running match.
#[derive(Clone, Debug)]
pub struct MatchClock {
    /// Monotonic start.
    pub started_at: Instant,
    /// Wall-clock start (epoch ms), as announced to clients.
    pub started_at_ms: i64,
    /// Last `game_state` broadcast.
    pub last_state_broadcast: Instant,
    /// Last `time_remaining` broadcast.
    pub last_time_broadcast: Instant,
    /// Hazard zone has been started.
    pub zone_started: bool,
    /// Hazard zone shrinking has been halted.
    pub zone_frozen: bool,
}

impl MatchClock {
    /// Clock for a match starting now.
    pub fn start(now: Instant, now_ms: i64) -> Self {
        Self {
            started_at: now,
            started_at_ms: now_ms,
            last_state_broadcast: now,
            last_time_broadcast: now,
            zone_started: false,
            zone_frozen: false,
        }
    }
}

/// Lifecycle state with per-phase data.
#[derive(Clone, Debug)]
pub enum Lifecycle {
    /// Lobby.
    Waiting,
    /// Countdown in progress.
    Countdown {
        /// Seconds left.
        remaining: u32,
        /// Last decrement.
        last_step: Instant,
    },
    /// Match running.
    Playing(MatchClock),
    /// Match over.
    Finished {
        /// When the match ended.
        at: Instant,
        /// When players were kicked, once they have been.
        kicked_at: Option<Instant>,
        /// Teardown already requested.
        torn_down: bool,
    },
}

impl Lifecycle {
    /// Phase of this state.
    pub fn phase(&self) -> Phase {
        match self {
            Lifecycle::Waiting => Phase::Waiting,
            Lifecycle::Countdown { .. } => Phase::Countdown,
            Lifecycle::Playing(_) => Phase::Playing,
            Lifecycle::Finished { .. } => Phase::Finished,
        }
    }

    /// Move to `next` if the transition table allows it.
    pub fn transition(&mut self, next: Lifecycle) -> Result<Phase, InvalidTransition> {
        let (from, to) = (self.phase(), next.phase());
        if !from.can_transition_to(to) {
            return Err(InvalidTransition { from, to });
        }
        *self = next;
        Ok(to)
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Lifecycle::Waiting
    }
}
