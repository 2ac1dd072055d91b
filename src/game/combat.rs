//! Combat
//!
//! Projectile spawning, per-tick advancement and hit resolution, plus direct
//! heal/damage. Combat owns the match stats so every kill and death it causes
//! is recorded in one place.
//!
//! All methods push the events they produce onto `events`; the room
//! broadcasts them in order after the call.

use std::collections::BTreeMap;
use tokio::time::Instant;
use tracing::debug;

use crate::core::vec2::Vec2;
use crate::game::player::{PlayerId, PlayerState};
use crate::game::projectile::{Projectile, ProjectileOwner};
use crate::game::stats::GameStats;
use crate::network::protocol::ServerMessage;

/// Projectiles in flight plus match statistics.
#[derive(Debug, Default)]
pub struct Combat {
    projectiles: Vec<Projectile>,
    stats: GameStats,
}

impl Combat {
    /// Create an empty combat system.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear projectiles and stats for a new match.
    pub fn reset(&mut self, now_ms: i64) {
        self.projectiles.clear();
        self.stats.reset(now_ms);
    }

    /// Drop in-flight projectiles (match end).
    pub fn clear_projectiles(&mut self) {
        self.projectiles.clear();
    }

    /// Match statistics.
    pub fn stats(&self) -> &GameStats {
        &self.stats
    }

    /// Mutable match statistics.
    pub fn stats_mut(&mut self) -> &mut GameStats {
        &mut self.stats
    }

    /// Projectiles in flight.
    pub fn projectiles(&self) -> &[Projectile] {
        &self.projectiles
    }

    /// Fire a player projectile from the attacker's position.
    ///
    /// Callers gate this on the PLAYING phase; dead or unknown attackers are ignored.
    pub fn attack(
        &mut self,
        attacker: &PlayerId,
        players: &BTreeMap<PlayerId, PlayerState>,
        direction: Vec2,
        now: Instant,
        events: &mut Vec<ServerMessage>,
    ) -> bool {
        let origin = match players.get(attacker) {
            Some(p) if p.is_alive() => p.position,
            _ => return false,
        };
        self.spawn(ProjectileOwner::Player(attacker.clone()), origin, direction, now, events)
    }

    /// Fire an NPC projectile.
    pub fn spawn_npc_projectile(
        &mut self,
        npc_id: &str,
        origin: Vec2,
        direction: Vec2,
        now: Instant,
        events: &mut Vec<ServerMessage>,
    ) -> bool {
        self.spawn(ProjectileOwner::Npc(npc_id.to_string()), origin, direction, now, events)
    }

    fn spawn(
        &mut self,
        owner: ProjectileOwner,
        origin: Vec2,
        direction: Vec2,
        now: Instant,
        events: &mut Vec<ServerMessage>,
    ) -> bool {
        match Projectile::new(owner, origin, direction, now) {
            Some(projectile) => {
                events.push(projectile.created_message());
                self.projectiles.push(projectile);
                true
            }
            None => {
                debug!("Ignoring projectile with zero direction");
                false
            }
        }
    }

    /// Advance every projectile one tick and resolve expiry and hits.
    pub fn update_projectiles(
        &mut self,
        players: &mut BTreeMap<PlayerId, PlayerState>,
        now: Instant,
        now_ms: i64,
        events: &mut Vec<ServerMessage>,
    ) {
        let mut remaining = Vec::with_capacity(self.projectiles.len());

        for mut projectile in std::mem::take(&mut self.projectiles) {
            projectile.advance();

            if projectile.is_expired(now) {
                events.push(projectile.removed_message());
                continue;
            }

            let target = players
                .iter_mut()
                .find(|(id, p)| p.is_alive() && projectile.owner.can_hit(id) && projectile.hits(p.position));

            let Some((victim, player)) = target else {
                remaining.push(projectile);
                continue;
            };

            if let Some(hit) = player.take_damage(1) {
                events.push(ServerMessage::PlayerDamaged {
                    username: victim.clone(),
                    current_health: hit.health,
                    died: hit.died,
                    source: None,
                });
                if hit.died {
                    match &projectile.owner {
                        ProjectileOwner::Player(killer) => {
                            self.stats.record_kill(killer, victim, now_ms);
                        }
                        ProjectileOwner::Npc(_) => {
                            self.stats.record_death(victim, now_ms);
                        }
                    }
                }
            }
            events.push(projectile.removed_message());
        }

        self.projectiles = remaining;
    }

    /// Heal a player. Broadcasts only if health actually went up.
    pub fn heal(
        &mut self,
        target: &PlayerId,
        amount: i32,
        players: &mut BTreeMap<PlayerId, PlayerState>,
        events: &mut Vec<ServerMessage>,
    ) -> bool {
        let Some(player) = players.get_mut(target) else {
            return false;
        };
        match player.heal(amount) {
            Some(health) => {
                events.push(ServerMessage::PlayerHealed {
                    username: target.clone(),
                    current_health: health,
                });
                true
            }
            None => false,
        }
    }

    /// Apply self-reported damage. A resulting death is an unattributed elimination.
    pub fn damage(
        &mut self,
        target: &PlayerId,
        amount: i32,
        players: &mut BTreeMap<PlayerId, PlayerState>,
        now_ms: i64,
        events: &mut Vec<ServerMessage>,
    ) -> bool {
        let Some(player) = players.get_mut(target) else {
            return false;
        };
        let Some(hit) = player.take_damage(amount) else {
            return false;
        };

        events.push(ServerMessage::PlayerDamaged {
            username: target.clone(),
            current_health: hit.health,
            died: hit.died,
            source: None,
        });
        if hit.died {
            self.stats.record_death(target, now_ms);
        }
        true
    }
}

// =============================================================================
// TESTS
// =============================================================================
