//! Rooms
//!
//! A room is one map instance: a roster, a lifecycle, the match subsystems and
//! a 60 Hz tick task, all behind a single async mutex.
//!
//! ## Module Structure
//!
//! - `registry`: Roster, ready flags, session tickets, spawn points
//! - `messaging`: Ordered non-blocking per-player delivery
//! - `lifecycle`: WAITING/COUNTDOWN/PLAYING/FINISHED state machine
//! - `state`: Orchestrator: message dispatch and the tick body
//! - `handle`: Shared room handle, tick task, shutdown
//! - `directory`: Map id to room lookup, creation and cleanup

pub mod registry;
pub mod messaging;
pub mod lifecycle;
pub mod state;
pub mod handle;
pub mod directory;

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::config::ServiceConfig;
use crate::services::{
    CoinLedger, CollaboratorError, HttpCoinLedger, HttpSkinCatalog, InMemoryLedger, SkinCatalog,
    StaticSkins,
};

pub use registry::{RoomCore, SessionTicket};
pub use messaging::{MemorySink, Messaging, PlayerSink};
pub use lifecycle::Phase;
pub use state::RoomState;
pub use handle::Room;
pub use directory::RoomDirectory;

/// Why a connect was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum JoinRejection {
    /// Room at capacity.
    #[error("room is full")]
    RoomFull,

    /// Countdown or match running; only reconnects are admitted.
    #[error("game is in progress")]
    MatchInProgress,

    /// Room is tearing down.
    #[error("room is shutting down")]
    ShuttingDown,
}

impl JoinRejection {
    /// `connection_failed.reason`.
    pub fn reason_code(self) -> &'static str {
        match self {
            JoinRejection::RoomFull => "room_full",
            JoinRejection::MatchInProgress => "game_in_progress",
            JoinRejection::ShuttingDown => "unknown",
        }
    }

    /// `connection_failed.message`.
    pub fn user_message(self, max_players: usize) -> String {
        match self {
            JoinRejection::RoomFull => format!("Room is full (max {} players)", max_players),
            JoinRejection::MatchInProgress => "Game is in progress".to_string(),
            JoinRejection::ShuttingDown => "Unable to join room".to_string(),
        }
    }
}

/// A refused connect; hands the sink back so the caller can notify the client.
pub struct Rejected {
    /// Refusal reason.
    pub reason: JoinRejection,
    /// The sink that was offered.
    pub sink: Box<dyn PlayerSink>,
}

impl fmt::Debug for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected").field("reason", &self.reason).finish_non_exhaustive()
    }
}

/// Collaborators shared by every room.
#[derive(Clone)]
pub struct RoomDeps {
    /// Skin lookup.
    pub skins: Arc<dyn SkinCatalog>,
    /// Coin rewards.
    pub ledger: Arc<dyn CoinLedger>,
}

impl RoomDeps {
    /// Default skins and an in-process ledger.
    pub fn offline() -> Self {
        Self {
            skins: Arc::new(StaticSkins::new()),
            ledger: Arc::new(InMemoryLedger::new()),
        }
    }

    /// HTTP clients for the shop and wallet services.
    pub fn http(config: &ServiceConfig) -> Result<Self, CollaboratorError> {
        Ok(Self {
            skins: Arc::new(HttpSkinCatalog::new(config.shop_url.clone(), config.request_timeout)?),
            ledger: Arc::new(HttpCoinLedger::new(config.wallet_url.clone(), config.request_timeout)?),
        })
    }
}

impl fmt::Debug for RoomDeps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomDeps").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_wire_values() {
        assert_eq!(JoinRejection::RoomFull.reason_code(), "room_full");
        assert_eq!(JoinRejection::RoomFull.user_message(4), "Room is full (max 4 players)");
        assert_eq!(JoinRejection::MatchInProgress.reason_code(), "game_in_progress");
        assert_eq!(JoinRejection::MatchInProgress.user_message(4), "Game is in progress");
        assert_eq!(JoinRejection::ShuttingDown.reason_code(), "unknown");
        assert_eq!(JoinRejection::ShuttingDown.user_message(4), "Unable to join room");
    }
}
