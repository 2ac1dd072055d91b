//! Player State
//!
//! Per-player entity held by the room registry: position, velocity, facing,
//! health and cosmetic skin. Health is the single source of truth for death,
//! so `is_dead()` can never disagree with it.

use std::fmt;
use serde::{Serialize, Deserialize};

use crate::core::vec2::Vec2;

/// Maximum (and starting) player health.
pub const PLAYER_MAX_HEALTH: i32 = 4;

// =============================================================================
// PLAYER ID
// =============================================================================

/// Opaque player identity (the resolved connection token).
///
/// Implements Ord so player maps iterate in a stable order.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    /// Create from any string-like identity.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identity.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PlayerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// =============================================================================
// PLAYER STATE
// =============================================================================

/// Result of a damage application that had an effect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HitOutcome {
    /// Health after the hit.
    pub health: i32,
    /// The hit was fatal.
    pub died: bool,
}

/// State of a single player in the room.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayerState {
    /// Current position on the map
    pub position: Vec2,
    /// Last reported velocity
    pub velocity: Vec2,
    /// Sprite is mirrored horizontally
    pub flip_x: bool,
    health: i32,
    skin: String,
}

impl PlayerState {
    /// Create a fresh player at a spawn point.
    pub fn new(spawn: Vec2, skin: impl Into<String>) -> Self {
        Self {
            position: spawn,
            velocity: Vec2::ZERO,
            flip_x: false,
            health: PLAYER_MAX_HEALTH,
            skin: skin.into(),
        }
    }

    /// Current health in `[0, PLAYER_MAX_HEALTH]`.
    #[inline]
    pub fn health(&self) -> i32 {
        self.health
    }

    /// Dead iff health is zero.
    #[inline]
    pub fn is_dead(&self) -> bool {
        self.health == 0
    }

    /// Inverse of `is_dead`.
    #[inline]
    pub fn is_alive(&self) -> bool {
        !self.is_dead()
    }

    /// Cosmetic skin identifier.
    pub fn skin(&self) -> &str {
        &self.skin
    }

    /// Replace the cosmetic skin (refreshed on reconnect).
    pub fn set_skin(&mut self, skin: impl Into<String>) {
        self.skin = skin.into();
    }

    /// Apply a movement report. Dead players do not move.
    pub fn apply_movement(&mut self, position: Vec2, velocity: Vec2, flip_x: bool) -> bool {
        if self.is_dead() || !position.is_finite() || !velocity.is_finite() {
            return false;
        }
        self.position = position;
        self.velocity = velocity;
        self.flip_x = flip_x;
        true
    }

    /// Take damage. Returns `None` when nothing changed (dead target or non-positive amount).
    pub fn take_damage(&mut self, amount: i32) -> Option<HitOutcome> {
        if self.is_dead() || amount <= 0 {
            return None;
        }
        self.health = (self.health - amount).max(0);
        Some(HitOutcome {
            health: self.health,
            died: self.health == 0,
        })
    }

    /// Heal up to max. Returns the new health only if it actually increased.
    pub fn heal(&mut self, amount: i32) -> Option<i32> {
        if self.is_dead() || amount <= 0 {
            return None;
        }
        let healed = (self.health.saturating_add(amount)).min(PLAYER_MAX_HEALTH);
        if healed > self.health {
            self.health = healed;
            Some(healed)
        } else {
            None
        }
    }

    /// Reset for a new match at the given spawn point.
    pub fn respawn(&mut self, spawn: Vec2) {
        self.position = spawn;
        self.velocity = Vec2::ZERO;
        self.flip_x = false;
        self.health = PLAYER_MAX_HEALTH;
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn player() -> PlayerState {
        PlayerState::new(Vec2::new(100.0, 100.0), "player_0")
    }

    #[test]
    fn test_new_player() {
        let p = player();
        assert_eq!(p.health(), PLAYER_MAX_HEALTH);
        assert!(p.is_alive());
        assert_eq!(p.skin(), "player_0");
    }

    #[test]
    fn test_damage_until_dead() {
        let mut p = player();
        assert_eq!(p.take_damage(1), Some(HitOutcome { health: 3, died: false }));
        assert_eq!(p.take_damage(10), Some(HitOutcome { health: 0, died: true }));
        assert!(p.is_dead());

        // No further effect once dead
        assert_eq!(p.take_damage(1), None);
        assert_eq!(p.heal(2), None);
        assert!(!p.apply_movement(Vec2::new(1.0, 1.0), Vec2::ZERO, true));
        assert_eq!(p.position, Vec2::new(100.0, 100.0));
    }

    #[test]
    fn test_heal_clamps_and_reports_increase() {
        let mut p = player();
        assert_eq!(p.heal(1), None);

        p.take_damage(2);
        assert_eq!(p.heal(5), Some(PLAYER_MAX_HEALTH));
        assert_eq!(p.heal(0), None);
        assert_eq!(p.heal(-3), None);
    }

    #[test]
    fn test_respawn_resets() {
        let mut p = player();
        p.take_damage(4);
        p.respawn(Vec2::new(200.0, 900.0));

        assert_eq!(p.health(), PLAYER_MAX_HEALTH);
        assert_eq!(p.position, Vec2::new(200.0, 900.0));
        assert_eq!(p.velocity, Vec2::ZERO);
    }

    #[test]
    fn test_player_id_serializes_as_string() {
        let id = PlayerId::new("alice");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"alice\"");
        assert_eq!(id.to_string(), "alice");
    }

    #[derive(Debug, Clone)]
    enum Op {
        Damage(i32),
        Heal(i32),
        Move(f32, f32),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (-3i32..8).prop_map(Op::Damage),
            (-3i32..8).prop_map(Op::Heal),
            (-500f32..2000.0, -500f32..2000.0).prop_map(|(x, y)| Op::Move(x, y)),
        ]
    }

    proptest! {
        #[test]
        fn prop_health_stays_in_range(ops in proptest::collection::vec(op(), 0..64)) {
            let mut p = player();
            let mut was_dead = false;

            for op in ops {
                let before = p.clone();
                match op {
                    Op::Damage(n) => { p.take_damage(n); }
                    Op::Heal(n) => { p.heal(n); }
                    Op::Move(x, y) => { p.apply_movement(Vec2::new(x, y), Vec2::ZERO, false); }
                }

                prop_assert!(p.health() >= 0 && p.health() <= PLAYER_MAX_HEALTH);
                prop_assert_eq!(p.is_dead(), p.health() == 0);

                if was_dead {
                    prop_assert_eq!(p.health(), 0);
                    prop_assert_eq!(p.position, before.position);
                }
                was_dead = p.is_dead();
            }
        }
    }
}
