//! NPC Behaviour
//!
//! Hostile non-player actors for hazard maps. Each NPC runs a small state
//! machine once per tick:
//!
//! ```text
//!   nearest live player within attack range, cooldown ready  -> ATTACK (fire)
//!   nearest live player within detection range              -> CHASE
//!   no behaviour change for 3 s                              -> PATROL (new random point)
//!   CHASE / PATROL and within 5 units of the target          -> IDLE
//! ```
//!
//! NPC deaths are broadcast but never touch player statistics.

use std::collections::BTreeMap;
use std::time::Duration;
use serde::{Serialize, Deserialize};
use tokio::time::Instant;

use crate::core::rng::DeterministicRng;
use crate::core::vec2::Vec2;
use crate::game::player::{PlayerId, PlayerState};
use crate::network::protocol::{NpcSnapshot, ServerMessage};

/// Maximum (and starting) NPC health.
pub const NPC_MAX_HEALTH: i32 = 4;

/// Movement speed in units per second.
pub const NPC_SPEED: f32 = 90.0;

/// Per-tick integration step for `NPC_SPEED`.
pub const NPC_TICK_DELTA: f32 = 0.016;

/// Distance at which an NPC fires.
pub const NPC_ATTACK_RANGE: f32 = 150.0;

/// Distance at which an NPC starts chasing.
pub const NPC_DETECTION_RANGE: f32 = 250.0;

/// Time between shots.
pub const NPC_ATTACK_COOLDOWN: Duration = Duration::from_millis(2000);

/// Minimum time between idle/patrol decisions.
pub const NPC_BEHAVIOR_INTERVAL: Duration = Duration::from_millis(3000);

/// Patrol targets stay this far from the map edge.
pub const NPC_BOUNDARY_MARGIN: f32 = 50.0;

/// Distance at which an NPC counts as arrived.
pub const NPC_ARRIVAL_DISTANCE: f32 = 5.0;

/// NPC behaviour states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NpcBehavior {
    /// Standing still.
    Idle,
    /// Walking to a random point.
    Patrol,
    /// Walking toward a player.
    Chase,
    /// Just fired at a player.
    Attack,
    /// Backing off. Kept only as a wire value clients understand; `update`
    /// never selects it.
    Retreat,
}

/// A shot requested by an NPC during `update`.
#[derive(Clone, Debug, PartialEq)]
pub struct NpcShot {
    /// Shooter id.
    pub npc_id: String,
    /// NPC position at fire time.
    pub origin: Vec2,
    /// Unnormalized direction toward the target.
    pub direction: Vec2,
}

/// A single NPC.
#[derive(Clone, Debug)]
pub struct Npc {
    /// Unique id, `npc_` + 8 hex chars.
    pub id: String,
    /// Current position.
    pub position: Vec2,
    /// Where the NPC is walking.
    pub target: Vec2,
    /// Current behaviour.
    pub behavior: NpcBehavior,
    /// Player being chased or attacked.
    pub target_player: Option<PlayerId>,
    /// Sprite mirrored (last horizontal move was leftward).
    pub flip_x: bool,
    health: i32,
    last_attack: Option<Instant>,
    last_behavior_change: Instant,
}

impl Npc {
    /// Create an idle NPC.
    pub fn new(position: Vec2, now: Instant) -> Self {
        let suffix = uuid::Uuid::new_v4().into_bytes();
        Self {
            id: format!("npc_{}", hex::encode(&suffix[..4])),
            position,
            target: position,
            behavior: NpcBehavior::Idle,
            target_player: None,
            flip_x: false,
            health: NPC_MAX_HEALTH,
            last_attack: None,
            last_behavior_change: now,
        }
    }

    /// Current health.
    pub fn health(&self) -> i32 {
        self.health
    }

    /// Dead iff health is zero.
    pub fn is_dead(&self) -> bool {
        self.health == 0
    }

    fn cooldown_ready(&self, now: Instant) -> bool {
        self.last_attack
            .map_or(true, |t| now.saturating_duration_since(t) >= NPC_ATTACK_COOLDOWN)
    }

    fn set_behavior(&mut self, behavior: NpcBehavior, now: Instant) {
        self.behavior = behavior;
        self.last_behavior_change = now;
    }

    fn step_toward_target(&mut self, min: Vec2, max: Vec2) {
        let delta = self.target - self.position;
        if delta.length() <= NPC_ARRIVAL_DISTANCE {
            self.behavior = NpcBehavior::Idle;
            return;
        }
        if delta.x != 0.0 {
            self.flip_x = delta.x < 0.0;
        }
        self.position = self
            .position
            .move_toward(self.target, NPC_SPEED * NPC_TICK_DELTA)
            .clamp(min, max);
    }

    /// Wire snapshot for `npc_update`.
    pub fn snapshot(&self) -> NpcSnapshot {
        NpcSnapshot {
            x: self.position.x,
            y: self.position.y,
            flip_x: self.flip_x,
            health: self.health,
            is_dead: self.is_dead(),
            behavior: self.behavior,
        }
    }

    /// `npc_spawned` event.
    pub fn spawned_message(&self) -> ServerMessage {
        ServerMessage::NpcSpawned {
            id: self.id.clone(),
            x: self.position.x,
            y: self.position.y,
            health: self.health,
            max_health: NPC_MAX_HEALTH,
        }
    }
}

/// All NPCs of one room.
#[derive(Debug)]
pub struct NpcManager {
    npcs: BTreeMap<String, Npc>,
    bounds: Vec2,
}

impl NpcManager {
    /// Create a manager for a map of the given size.
    pub fn new(bounds: Vec2) -> Self {
        Self {
            npcs: BTreeMap::new(),
            bounds,
        }
    }

    /// Remove every NPC (match start).
    pub fn reset(&mut self) {
        self.npcs.clear();
    }

    /// Remove every NPC (match end).
    pub fn clear(&mut self) {
        self.npcs.clear();
    }

    /// Number of NPCs, dead or alive.
    pub fn len(&self) -> usize {
        self.npcs.len()
    }

    /// No NPCs.
    pub fn is_empty(&self) -> bool {
        self.npcs.is_empty()
    }

    /// Look up an NPC.
    pub fn get(&self, id: &str) -> Option<&Npc> {
        self.npcs.get(id)
    }

    /// Spawn an NPC and announce it.
    pub fn spawn(&mut self, position: Vec2, now: Instant, events: &mut Vec<ServerMessage>) -> String {
        let npc = Npc::new(position, now);
        let id = npc.id.clone();
        events.push(npc.spawned_message());
        self.npcs.insert(id.clone(), npc);
        id
    }

    /// `npc_spawned` for every NPC, for late joiners.
    pub fn spawned_messages(&self) -> Vec<ServerMessage> {
        self.npcs.values().map(Npc::spawned_message).collect()
    }

    /// `npc_update` snapshot of all NPCs.
    pub fn update_message(&self) -> ServerMessage {
        ServerMessage::NpcUpdate {
            npcs: self
                .npcs
                .iter()
                .map(|(id, npc)| (id.clone(), npc.snapshot()))
                .collect(),
        }
    }

    /// Apply player damage to an NPC.
    pub fn damage(&mut self, id: &str, amount: i32, events: &mut Vec<ServerMessage>) -> bool {
        let Some(npc) = self.npcs.get_mut(id) else {
            return false;
        };
        if npc.is_dead() || amount <= 0 {
            return false;
        }
        npc.health = (npc.health - amount).max(0);
        events.push(ServerMessage::NpcDamaged {
            id: npc.id.clone(),
            health: npc.health,
            died: npc.is_dead(),
        });
        true
    }

    fn patrol_area(&self) -> (Vec2, Vec2) {
        let min = Vec2::new(NPC_BOUNDARY_MARGIN, NPC_BOUNDARY_MARGIN);
        let max = Vec2::new(
            (self.bounds.x - NPC_BOUNDARY_MARGIN).max(min.x),
            (self.bounds.y - NPC_BOUNDARY_MARGIN).max(min.y),
        );
        (min, max)
    }

    /// Run one behaviour step for every live NPC. Returns the shots fired.
    pub fn update(
        &mut self,
        players: &BTreeMap<PlayerId, PlayerState>,
        now: Instant,
        rng: &mut DeterministicRng,
    ) -> Vec<NpcShot> {
        let (min, max) = self.patrol_area();
        let mut shots = Vec::new();

        for npc in self.npcs.values_mut().filter(|n| !n.is_dead()) {
            let nearest = players
                .iter()
                .filter(|(_, p)| p.is_alive())
                .map(|(id, p)| (id, p.position, npc.position.distance(p.position)))
                .min_by(|a, b| a.2.total_cmp(&b.2));

            match nearest {
                Some((id, target, dist)) if dist <= NPC_ATTACK_RANGE && npc.cooldown_ready(now) => {
                    npc.set_behavior(NpcBehavior::Attack, now);
                    npc.target_player = Some(id.clone());
                    npc.last_attack = Some(now);
                    shots.push(NpcShot {
                        npc_id: npc.id.clone(),
                        origin: npc.position,
                        direction: target - npc.position,
                    });
                }
                Some((id, target, dist)) if dist <= NPC_DETECTION_RANGE => {
                    if npc.behavior != NpcBehavior::Chase {
                        npc.set_behavior(NpcBehavior::Chase, now);
                    }
                    npc.target_player = Some(id.clone());
                    npc.target = target;
                }
                _ => {
                    if now.saturating_duration_since(npc.last_behavior_change) >= NPC_BEHAVIOR_INTERVAL {
                        npc.set_behavior(NpcBehavior::Patrol, now);
                        npc.target_player = None;
                        npc.target = rng.point_in(min, max);
                    }
                }
            }

            if matches!(npc.behavior, NpcBehavior::Chase | NpcBehavior::Patrol) {
                npc.step_toward_target(Vec2::ZERO, self.bounds);
            }
        }

        shots
    }
}

// =============================================================================
// TESTS
// =============================================================================
