//! Projectiles
//!
//! Straight-line shots fired by players and NPCs. A projectile moves a fixed
//! distance per tick and dies on its first hit or when its lifetime runs out.

use std::time::Duration;
use tokio::time::Instant;

use crate::core::vec2::Vec2;
use crate::game::player::PlayerId;
use crate::network::protocol::ServerMessage;

/// Distance travelled per simulation tick.
pub const PROJECTILE_SPEED: f32 = 6.3;

/// Time after which an unhit projectile is removed.
pub const PROJECTILE_LIFETIME: Duration = Duration::from_millis(1000);

/// Max distance between projectile and hit point that counts as a hit.
pub const PROJECTILE_HIT_RADIUS: f32 = 12.0;

/// A player's hit point sits this far below their position.
pub const HIT_POINT_OFFSET_Y: f32 = 4.0;

/// Who fired a projectile.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProjectileOwner {
    /// A connected player; cannot hit themselves.
    Player(PlayerId),
    /// An NPC; may hit any player.
    Npc(String),
}

impl ProjectileOwner {
    /// Owner id as it appears on the wire.
    pub fn wire_id(&self) -> &str {
        match self {
            ProjectileOwner::Player(id) => id.as_str(),
            ProjectileOwner::Npc(id) => id,
        }
    }

    /// Projectiles never hit their own shooter.
    pub fn can_hit(&self, target: &PlayerId) -> bool {
        match self {
            ProjectileOwner::Player(owner) => owner != target,
            ProjectileOwner::Npc(_) => true,
        }
    }
}

/// A projectile in flight.
#[derive(Clone, Debug)]
pub struct Projectile {
    /// Unique id (UUID v4).
    pub id: String,
    /// Shooter.
    pub owner: ProjectileOwner,
    /// Current position.
    pub position: Vec2,
    /// Unit direction of travel.
    pub direction: Vec2,
    /// Spawn time.
    pub created_at: Instant,
}

impl Projectile {
    /// Spawn a projectile. The direction is normalized; `None` for a zero direction.
    pub fn new(owner: ProjectileOwner, origin: Vec2, direction: Vec2, now: Instant) -> Option<Self> {
        let direction = direction.normalize();
        if direction == Vec2::ZERO || !origin.is_finite() {
            return None;
        }
        Some(Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner,
            position: origin,
            direction,
            created_at: now,
        })
    }

    /// Advance one tick along the direction.
    #[inline]
    pub fn advance(&mut self) {
        self.position = self.position + self.direction.scale(PROJECTILE_SPEED);
    }

    /// Lifetime exhausted.
    #[inline]
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= PROJECTILE_LIFETIME
    }

    /// Whether this projectile touches a player standing at `target`.
    pub fn hits(&self, target: Vec2) -> bool {
        let hit_point = Vec2::new(target.x, target.y + HIT_POINT_OFFSET_Y);
        self.position.distance_squared(hit_point) <= PROJECTILE_HIT_RADIUS * PROJECTILE_HIT_RADIUS
    }

    /// `projectile_created` event.
    pub fn created_message(&self) -> ServerMessage {
        ServerMessage::ProjectileCreated {
            id: self.id.clone(),
            owner_id: self.owner.wire_id().to_string(),
            x: self.position.x,
            y: self.position.y,
            direction_x: self.direction.x,
            direction_y: self.direction.y,
        }
    }

    /// `projectile_removed` event.
    pub fn removed_message(&self) -> ServerMessage {
        ServerMessage::ProjectileRemoved { id: self.id.clone() }
    }
}
