//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every message is a JSON object with a `type` discriminator; field names are camelCase.
//!
//! Inbound decoding is lenient: missing or mistyped numeric fields become 0,
//! booleans become false and strings become empty, so a sloppy client can never
//! fail a room. Unknown `type` values are reported to the caller and dropped.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::vec2::Vec2;
use crate::game::npc::NpcBehavior;
use crate::game::player::PlayerId;
use crate::game::stats::StatsSummary;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Flip this player's ready flag (lobby only).
    ReadyToggle,

    /// Movement report.
    #[serde(rename_all = "camelCase")]
    Position {
        #[serde(default, deserialize_with = "lenient::number_f32")]
        x: f32,
        #[serde(default, deserialize_with = "lenient::number_f32")]
        y: f32,
        #[serde(default, deserialize_with = "lenient::number_f32")]
        vx: f32,
        #[serde(default, deserialize_with = "lenient::number_f32")]
        vy: f32,
        #[serde(default, deserialize_with = "lenient::flag")]
        flip_x: bool,
    },

    /// Fire a projectile.
    #[serde(rename_all = "camelCase")]
    Attack {
        #[serde(default, deserialize_with = "lenient::number_f32")]
        direction_x: f32,
        #[serde(default, deserialize_with = "lenient::number_f32")]
        direction_y: f32,
    },

    /// Self-reported heal (pickups are client side).
    Heal {
        #[serde(default, deserialize_with = "lenient::number_i32")]
        amount: i32,
    },

    /// Self-reported damage (traps are client side).
    Damage {
        #[serde(default, deserialize_with = "lenient::number_i32")]
        amount: i32,
    },

    /// Chat line for the rest of the room.
    ChatMessage {
        #[serde(default, deserialize_with = "lenient::text")]
        message: String,
        #[serde(default, deserialize_with = "lenient::maybe_millis")]
        timestamp: Option<i64>,
    },

    /// A player hit an NPC.
    #[serde(rename_all = "camelCase")]
    NpcDamage {
        #[serde(default, deserialize_with = "lenient::text")]
        npc_id: String,
        #[serde(default, deserialize_with = "lenient::number_i32")]
        damage: i32,
    },

    /// Client-computed spawn points for this map.
    #[serde(rename_all = "camelCase")]
    SpawnPoints {
        #[serde(default, deserialize_with = "lenient::points")]
        spawn_points: Vec<SpawnPoint>,
    },

    /// Keep-alive.
    Heartbeat,

    /// Legacy join notice; joining happens at connect time.
    JoinGame,
}

/// Spawn point as sent by the client.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpawnPoint {
    /// X coordinate.
    pub x: f32,
    /// Y coordinate.
    pub y: f32,
}

impl From<SpawnPoint> for Vec2 {
    fn from(p: SpawnPoint) -> Self {
        Vec2::new(p.x, p.y)
    }
}

impl ClientMessage {
    /// Every `type` value this server understands.
    pub const KNOWN_TYPES: &'static [&'static str] = &[
        "ready_toggle",
        "position",
        "attack",
        "heal",
        "damage",
        "chat_message",
        "npc_damage",
        "spawn_points",
        "heartbeat",
        "join_game",
    ];

    /// Wire name of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::ReadyToggle => "ready_toggle",
            ClientMessage::Position { .. } => "position",
            ClientMessage::Attack { .. } => "attack",
            ClientMessage::Heal { .. } => "heal",
            ClientMessage::Damage { .. } => "damage",
            ClientMessage::ChatMessage { .. } => "chat_message",
            ClientMessage::NpcDamage { .. } => "npc_damage",
            ClientMessage::SpawnPoints { .. } => "spawn_points",
            ClientMessage::Heartbeat => "heartbeat",
            ClientMessage::JoinGame => "join_game",
        }
    }
}

/// Inbound decoding errors.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Not valid JSON at all.
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    /// No string `type` field.
    #[error("message has no type")]
    MissingType,

    /// `type` is not one we handle.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// Structurally unusable payload for a known type.
    #[error("invalid {kind} payload: {source}")]
    InvalidFields {
        /// Message type.
        kind: String,
        /// Underlying serde error.
        source: serde_json::Error,
    },
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Lobby snapshot: phase, head count and ready flags.
    #[serde(rename_all = "camelCase")]
    RoomStatus {
        game_state: String,
        player_count: usize,
        max_players: usize,
        ready_states: BTreeMap<PlayerId, bool>,
    },

    /// Countdown begins.
    CountdownStarted { duration: u32 },

    /// Seconds left in the countdown.
    Countdown { seconds: u32 },

    /// Countdown aborted, back to the lobby.
    CountdownCancelled,

    /// Match is live.
    #[serde(rename_all = "camelCase")]
    GameStarted { game_start_time: i64, game_duration: u64 },

    /// Once-a-second match clock.
    #[serde(rename_all = "camelCase")]
    TimeRemaining { time_remaining: u64, time_elapsed: u64 },

    /// Reduced-rate player snapshot.
    GameState { players: BTreeMap<PlayerId, PlayerSnapshot> },

    /// Match over, with final stats.
    GameEnded { reason: String, stats: StatsSummary },

    /// Someone joined.
    #[serde(rename_all = "camelCase")]
    PlayerJoined { username: PlayerId, x: f32, y: f32, flip_x: bool, skin: String },

    /// Someone left.
    PlayerLeft { username: PlayerId },

    /// Movement relay.
    #[serde(rename_all = "camelCase")]
    PlayerUpdate { username: PlayerId, x: f32, y: f32, vx: f32, vy: f32, flip_x: bool },

    /// Roster sent to a joining player.
    PlayerList { players: Vec<PlayerListEntry> },

    /// Health went down.
    #[serde(rename_all = "camelCase")]
    PlayerDamaged {
        username: PlayerId,
        current_health: i32,
        died: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
    },

    /// Health went up.
    #[serde(rename_all = "camelCase")]
    PlayerHealed { username: PlayerId, current_health: i32 },

    /// Projectile spawned.
    #[serde(rename_all = "camelCase")]
    ProjectileCreated { id: String, owner_id: String, x: f32, y: f32, direction_x: f32, direction_y: f32 },

    /// Projectile gone (hit or expired).
    ProjectileRemoved { id: String },

    /// NPC spawned.
    #[serde(rename_all = "camelCase")]
    NpcSpawned { id: String, x: f32, y: f32, health: i32, max_health: i32 },

    /// Reduced-rate NPC snapshot.
    NpcUpdate { npcs: BTreeMap<String, NpcSnapshot> },

    /// NPC took damage.
    NpcDamaged { id: String, health: i32, died: bool },

    /// Hazard zone activated.
    #[serde(rename_all = "camelCase")]
    GrowingDamageZoneStart { center_x: f32, center_y: f32, initial_radius: f32 },

    /// Hazard zone radius moved.
    #[serde(rename_all = "camelCase")]
    GrowingDamageZoneUpdate { center_x: f32, center_y: f32, radius: f32, target_radius: f32 },

    /// Hazard zone deactivated.
    GrowingDamageZoneStop,

    /// Chat relay.
    ChatMessage { username: PlayerId, message: String, timestamp: i64 },

    /// Join rejected; the connection closes right after.
    ConnectionFailed { reason: String, message: String },

    /// Room is going away.
    RoomShutdown { reason: String },
}

/// Player entry of `game_state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    /// X position
    pub x: f32,
    /// Y position
    pub y: f32,
    /// X velocity as last reported
    pub vx: f32,
    /// Y velocity as last reported
    pub vy: f32,
    /// Facing left
    pub flip_x: bool,
    /// Health (0..=4)
    pub health: i32,
    /// Eliminated this match
    pub is_dead: bool,
    /// Cosmetic skin id.
    pub skin: String,
}

/// Player entry of `player_list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerListEntry {
    /// Player id
    pub username: PlayerId,
    /// Cosmetic skin id
    pub skin: String,
}

/// NPC entry of `npc_update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NpcSnapshot {
    /// X position
    pub x: f32,
    /// Y position
    pub y: f32,
    /// Facing left
    pub flip_x: bool,
    /// Remaining health
    pub health: i32,
    /// Killed
    pub is_dead: bool,
    /// Current state-machine state.
    pub behavior: NpcBehavior,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode an inbound envelope.
    pub fn from_json(s: &str) -> Result<Self, DecodeError> {
        let value: serde_json::Value = serde_json::from_str(s)?;
        let kind = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or(DecodeError::MissingType)?
            .to_string();

        if !Self::KNOWN_TYPES.contains(&kind.as_str()) {
            return Err(DecodeError::UnknownType(kind));
        }

        serde_json::from_value(value).map_err(|source| DecodeError::InvalidFields { kind, source })
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Field decoders that fall back to defaults instead of failing.
mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    use super::SpawnPoint;

    pub fn number_f32<'de, D: Deserializer<'de>>(d: D) -> Result<f32, D::Error> {
        let v = Value::deserialize(d)?;
        let n = v.as_f64().unwrap_or(0.0) as f32;
        Ok(if n.is_finite() { n } else { 0.0 })
    }

    pub fn number_i32<'de, D: Deserializer<'de>>(d: D) -> Result<i32, D::Error> {
        let v = Value::deserialize(d)?;
        let n = v
            .as_i64()
            .or_else(|| v.as_f64().map(|f| f as i64))
            .unwrap_or(0);
        Ok(n.clamp(i32::MIN as i64, i32::MAX as i64) as i32)
    }

    pub fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        let v = Value::deserialize(d)?;
        Ok(v.as_bool().unwrap_or(false))
    }

    pub fn text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        let v = Value::deserialize(d)?;
        Ok(v.as_str().map(str::to_owned).unwrap_or_default())
    }

    pub fn maybe_millis<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        let v = Value::deserialize(d)?;
        Ok(v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
    }

    pub fn points<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<SpawnPoint>, D::Error> {
        let v = Value::deserialize(d)?;
        let points = v
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|p| {
                        let x = p.get("x")?.as_f64()? as f32;
                        let y = p.get("y")?.as_f64()? as f32;
                        (x.is_finite() && y.is_finite()).then_some(SpawnPoint { x, y })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(points)
    }
}
