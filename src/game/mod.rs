//! Game Logic Module
//!
//! Entities and subsystems of an arena match. Nothing here touches the network:
//! subsystems push the events they produce into a caller-supplied buffer.
//!
//! ## Module Structure
//!
//! - `player`: Player identity and per-player state
//! - `projectile`: Projectile movement, expiry and hit test
//! - `combat`: Attacks, projectile resolution, heal/damage
//! - `npc`: NPC behaviour state machine
//! - `zone`: Shrinking hazard zone
//! - `stats`: Kill/death bookkeeping and ranking

pub mod player;
pub mod projectile;
pub mod combat;
pub mod npc;
pub mod zone;
pub mod stats;

// Re-export key types
pub use player::{PlayerId, PlayerState, PLAYER_MAX_HEALTH};
pub use combat::Combat;
pub use npc::{NpcBehavior, NpcManager};
pub use zone::{HazardZone, ZoneConfig};
pub use stats::{GameStats, Ranking, StatsSummary};
