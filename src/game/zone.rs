//! Hazard Zone
//!
//! A circular safe area centred on the map that shrinks linearly over time.
//! Evaluated once per second: the radius is recomputed from the elapsed time,
//! and after a grace period every live player outside the radius loses health.

use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::core::vec2::Vec2;
use crate::game::player::{PlayerId, PlayerState};
use crate::network::protocol::ServerMessage;

/// Wire value of `player_damaged.source` for zone hits.
pub const ZONE_DAMAGE_SOURCE: &str = "zone_damage";

/// Zone tuning.
#[derive(Debug, Clone)]
pub struct ZoneConfig {
    /// Starting radius as a fraction of `min(width, height)`.
    pub initial_fraction: f32,
    /// Final radius as a fraction of `min(width, height)`.
    pub final_fraction: f32,
    /// Time to shrink from initial to final radius.
    pub shrink_duration: Duration,
    /// Evaluation period.
    pub update_interval: Duration,
    /// No damage during this long after the zone starts.
    pub grace_period: Duration,
    /// Health lost per evaluation while outside.
    pub damage_per_tick: i32,
    /// Minimum radius change worth broadcasting.
    pub broadcast_threshold: f32,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            initial_fraction: 0.70,
            final_fraction: 0.15,
            shrink_duration: Duration::from_secs(270),
            update_interval: Duration::from_secs(1),
            grace_period: Duration::from_secs(10),
            damage_per_tick: 1,
            broadcast_threshold: 2.0,
        }
    }
}

/// Running zone parameters, present only while the zone is active.
#[derive(Debug, Clone)]
struct ActiveZone {
    center: Vec2,
    initial_radius: f32,
    target_radius: f32,
    radius: f32,
    started_at: Instant,
    damage_start: Instant,
    last_update: Instant,
    last_broadcast_radius: f32,
    shrinking: bool,
}

/// The shrinking hazard zone of one room.
#[derive(Debug, Clone)]
pub struct HazardZone {
    config: ZoneConfig,
    active: Option<ActiveZone>,
}

impl HazardZone {
    /// Create an inactive zone.
    pub fn new(config: ZoneConfig) -> Self {
        Self { config, active: None }
    }

    /// Deactivate without announcing (match start).
    pub fn reset(&mut self) {
        self.active = None;
    }

    /// Zone is running.
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Zone is running and still shrinking.
    pub fn is_shrinking(&self) -> bool {
        self.active.as_ref().is_some_and(|z| z.shrinking)
    }

    /// Current radius, if active.
    pub fn radius(&self) -> Option<f32> {
        self.active.as_ref().map(|z| z.radius)
    }

    /// Shrink-rate in units per second.
    pub fn shrink_rate(&self) -> Option<f32> {
        let secs = self.config.shrink_duration.as_secs_f32();
        self.active
            .as_ref()
            .filter(|_| secs > 0.0)
            .map(|z| (z.initial_radius - z.target_radius) / secs)
    }

    /// Whether a point is inside the safe area. Always true when inactive.
    pub fn is_inside(&self, point: Vec2) -> bool {
        match &self.active {
            Some(z) => point.distance(z.center) <= z.radius,
            None => true,
        }
    }

    /// Activate the zone for a map of `bounds` size.
    pub fn start(&mut self, bounds: Vec2, now: Instant, events: &mut Vec<ServerMessage>) {
        let center = bounds.scale(0.5);
        let base = bounds.x.min(bounds.y);
        let initial_radius = base * self.config.initial_fraction;
        let target_radius = base * self.config.final_fraction;

        self.active = Some(ActiveZone {
            center,
            initial_radius,
            target_radius,
            radius: initial_radius,
            started_at: now,
            damage_start: now + self.config.grace_period,
            last_update: now,
            last_broadcast_radius: initial_radius,
            shrinking: true,
        });

        events.push(ServerMessage::GrowingDamageZoneStart {
            center_x: center.x,
            center_y: center.y,
            initial_radius,
        });
    }

    /// Freeze the radius; damage continues.
    pub fn stop_shrinking(&mut self) {
        if let Some(zone) = self.active.as_mut() {
            zone.shrinking = false;
        }
    }

    /// Deactivate and announce. Damage already dealt stands.
    pub fn stop(&mut self, events: &mut Vec<ServerMessage>) {
        if self.active.take().is_some() {
            events.push(ServerMessage::GrowingDamageZoneStop);
        }
    }

    /// Run one evaluation if the update interval has passed.
    ///
    /// Returns the players killed by the zone this evaluation.
    pub fn update(
        &mut self,
        now: Instant,
        players: &mut BTreeMap<PlayerId, PlayerState>,
        events: &mut Vec<ServerMessage>,
    ) -> Vec<PlayerId> {
        let config = &self.config;
        let Some(zone) = self.active.as_mut() else {
            return Vec::new();
        };
        if now.saturating_duration_since(zone.last_update) < config.update_interval {
            return Vec::new();
        }
        zone.last_update = now;

        if zone.shrinking {
            let total = config.shrink_duration.as_secs_f32();
            let progress = if total > 0.0 {
                (now.saturating_duration_since(zone.started_at).as_secs_f32() / total).min(1.0)
            } else {
                1.0
            };
            zone.radius = zone.initial_radius - (zone.initial_radius - zone.target_radius) * progress;

            if (zone.radius - zone.last_broadcast_radius).abs() > config.broadcast_threshold {
                zone.last_broadcast_radius = zone.radius;
                events.push(ServerMessage::GrowingDamageZoneUpdate {
                    center_x: zone.center.x,
                    center_y: zone.center.y,
                    radius: zone.radius,
                    target_radius: zone.target_radius,
                });
            }
        }

        let mut killed = Vec::new();
        if now < zone.damage_start {
            return killed;
        }

        for (id, player) in players.iter_mut() {
            if player.is_dead() || player.position.distance(zone.center) <= zone.radius {
                continue;
            }
            if let Some(hit) = player.take_damage(config.damage_per_tick) {
                events.push(ServerMessage::PlayerDamaged {
                    username: id.clone(),
                    current_health: hit.health,
                    died: hit.died,
                    source: Some(ZONE_DAMAGE_SOURCE.to_string()),
                });
                if hit.died {
                    killed.push(id.clone());
                }
            }
        }

        killed
    }
}

impl Default for HazardZone {
    fn default() -> Self {
        Self::new(ZoneConfig::default())
    }
}

// =============================================================================
// TESTS
// =============================================================================
