//! Configuration
//!
//! Room tuning and collaborator endpoints. Every value has a default and can
//! be overridden from the environment; unparsable overrides fall back to the
//! default with a warning.

use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::core::vec2::Vec2;
use crate::game::zone::ZoneConfig;

/// Room tuning.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Simulation rate (Hz).
    pub tick_rate: u32,
    /// Capacity per room.
    pub max_players: usize,
    /// Players needed to start.
    pub min_players: usize,
    /// Countdown length in seconds.
    pub countdown_secs: u32,
    /// Match length.
    pub match_duration: Duration,
    /// `game_state` period.
    pub state_broadcast_interval: Duration,
    /// `time_remaining` period.
    pub time_broadcast_interval: Duration,
    /// Time between match end and kicking players.
    pub finished_kick_delay: Duration,
    /// Time between the kick and room teardown.
    pub teardown_delay: Duration,
    /// Time an empty room waits before shutting down.
    pub empty_room_grace: Duration,
    /// Bounded wait for the tick task during shutdown.
    pub shutdown_timeout: Duration,
    /// Bounded wait for drain tasks during shutdown.
    pub drain_timeout: Duration,
    /// Maps with NPCs and the hazard zone.
    pub hazard_maps: Vec<String>,
    /// Playable width.
    pub map_width: f32,
    /// Playable height.
    pub map_height: f32,
    /// Zone starts this long after match start.
    pub zone_start_delay: Duration,
    /// Zone stops shrinking this long after match start.
    pub zone_freeze_after: Duration,
    /// Zone tuning.
    pub zone: ZoneConfig,
    /// Per-player outbound queue capacity.
    pub outbox_capacity: usize,
    /// Directory sweep period for idle rooms.
    pub cleanup_interval: Duration,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            max_players: 4,
            min_players: 2,
            countdown_secs: 5,
            match_duration: Duration::from_secs(5 * 60),
            state_broadcast_interval: Duration::from_millis(100),
            time_broadcast_interval: Duration::from_secs(1),
            finished_kick_delay: Duration::from_secs(15),
            teardown_delay: Duration::from_millis(500),
            empty_room_grace: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(1),
            hazard_maps: vec!["map3".to_string()],
            map_width: 1284.0,
            map_height: 1120.0,
            zone_start_delay: Duration::from_secs(5),
            zone_freeze_after: Duration::from_secs(275),
            zone: ZoneConfig::default(),
            outbox_capacity: 512,
            cleanup_interval: Duration::from_secs(120),
        }
    }
}

impl RoomConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            tick_rate: env_or("ARENA_TICK_RATE", d.tick_rate).max(1),
            max_players: env_or("ARENA_MAX_PLAYERS", d.max_players).max(1),
            min_players: env_or("ARENA_MIN_PLAYERS", d.min_players).max(1),
            countdown_secs: env_or("ARENA_COUNTDOWN_SECS", d.countdown_secs),
            match_duration: Duration::from_secs(env_or(
                "ARENA_MATCH_DURATION_SECS",
                d.match_duration.as_secs(),
            )),
            hazard_maps: std::env::var("ARENA_HAZARD_MAPS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or(d.hazard_maps),
            outbox_capacity: env_or("ARENA_OUTBOX_CAPACITY", d.outbox_capacity).max(1),
            ..Self::default()
        }
    }

    /// Tick period derived from the tick rate.
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_rate.max(1)))
    }

    /// Map dimensions.
    pub fn bounds(&self) -> Vec2 {
        Vec2::new(self.map_width, self.map_height)
    }

    /// Map centre (NPC spawn point).
    pub fn center(&self) -> Vec2 {
        self.bounds().scale(0.5)
    }

    /// Whether NPCs and the hazard zone run on this map.
    pub fn is_hazard_map(&self, map_id: &str) -> bool {
        self.hazard_maps.iter().any(|m| m == map_id)
    }
}

/// Collaborator endpoints.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Base URL of the shop service (skin preferences).
    pub shop_url: String,
    /// Base URL of the wallet service (coin awards).
    pub wallet_url: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            shop_url: "http://localhost:8084".to_string(),
            wallet_url: "http://localhost:8083".to_string(),
            request_timeout: Duration::from_secs(3),
        }
    }
}

impl ServiceConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            shop_url: std::env::var("SHOP_SERVICE_URL").unwrap_or(d.shop_url),
            wallet_url: std::env::var("WALLET_SERVICE_URL").unwrap_or(d.wallet_url),
            request_timeout: Duration::from_millis(env_or(
                "SERVICE_TIMEOUT_MS",
                d.request_timeout.as_millis() as u64,
            )),
        }
    }
}

/// Read and parse an environment variable, falling back to `default`.
pub(crate) fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring unparsable {}={:?}", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}
