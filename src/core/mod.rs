//! Core primitives.
//!
//! Geometry, seeded randomness and clock helpers shared by the game and room layers.

pub mod vec2;
pub mod rng;
pub mod time;

// Re-export core types
pub use vec2::Vec2;
pub use rng::DeterministicRng;
pub use time::epoch_millis;
