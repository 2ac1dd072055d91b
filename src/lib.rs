//! # Arena Room Server
//!
//! Authoritative real-time room server for small multiplayer arena matches.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ARENA ROOM SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Primitives                                │
//! │  ├── vec2.rs     - 2D float vector                           │
//! │  ├── rng.rs      - Seeded Xorshift128+ PRNG                  │
//! │  └── time.rs     - Wall-clock helpers                        │
//! │                                                              │
//! │  game/           - Match subsystems (no I/O)                 │
//! │  ├── player.rs   - Player identity and health                │
//! │  ├── projectile.rs - Projectile flight and hits              │
//! │  ├── combat.rs   - Attacks, heal, damage                     │
//! │  ├── npc.rs      - NPC behaviour state machine               │
//! │  ├── zone.rs     - Shrinking hazard zone                     │
//! │  └── stats.rs    - Kills, deaths, rankings                   │
//! │                                                              │
//! │  room/           - Room runtime                              │
//! │  ├── registry.rs - Roster, ready flags, sessions             │
//! │  ├── messaging.rs- Per-player ordered delivery               │
//! │  ├── lifecycle.rs- WAITING/COUNTDOWN/PLAYING/FINISHED        │
//! │  ├── state.rs    - Orchestrator and tick body                │
//! │  ├── handle.rs   - Tick task and shutdown                    │
//! │  └── directory.rs- Map id to room                            │
//! │                                                              │
//! │  network/        - Wire and endpoint                         │
//! │  ├── protocol.rs - JSON message envelopes                    │
//! │  ├── auth.rs     - Connection identity                       │
//! │  └── server.rs   - WebSocket server                          │
//! │                                                              │
//! │  services/       - Skin lookup, coin ledger                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency
//!
//! Each room is one `tokio::sync::Mutex<RoomState>`. Inbound messages and
//! the 60 Hz tick both take that lock, so room state is never touched
//! concurrently. Outbound traffic never blocks under the lock: every player
//! has a bounded queue drained by its own task.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod room;
pub mod network;
pub mod services;
pub mod config;

// Re-export commonly used types
pub use core::vec2::Vec2;
pub use core::rng::DeterministicRng;
pub use game::player::{PlayerId, PlayerState};
pub use room::{Room, RoomDeps, RoomDirectory, RoomState, Phase};
pub use network::protocol::{ClientMessage, ServerMessage};
pub use config::{RoomConfig, ServiceConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Simulation tick rate (Hz)
pub const TICK_RATE: u32 = 60;
