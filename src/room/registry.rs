//! Room Registry
//!
//! Authoritative roster of one room: player entities, ready flags, session
//! tickets and spawn points. All mutation goes through the room lock, so this
//! type itself is plain synchronous state.

use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

use crate::core::rng::DeterministicRng;
use crate::core::vec2::Vec2;
use crate::game::player::{PlayerId, PlayerState};
use crate::room::lifecycle::Phase;
use crate::room::messaging::{Messaging, PlayerSink};
use crate::room::JoinRejection;

/// Fixed spawn points used on hazard maps.
pub const HAZARD_SPAWN_POINTS: [Vec2; 5] = [
    Vec2::new(200.0, 200.0),
    Vec2::new(1000.0, 200.0),
    Vec2::new(200.0, 900.0),
    Vec2::new(1000.0, 900.0),
    Vec2::new(600.0, 500.0),
];

/// Spawn point used when the list is empty.
pub const FALLBACK_SPAWN: Vec2 = Vec2::new(642.0, 560.0);

/// Random spawn points generated for other maps.
pub const RANDOM_SPAWN_COUNT: usize = 10;

/// Random spawn points keep this far from the map edge.
pub const RANDOM_SPAWN_MARGIN: f32 = 100.0;

/// Identifies one connection of a player.
///
/// Each accepted connect gets a fresh ticket; events carrying an older ticket
/// belong to a replaced connection and are ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionTicket(u64);

impl SessionTicket {
    /// Wrap a raw generation number.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw generation number.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Outcome of an accepted connect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Admission {
    /// Ticket of the new connection.
    pub ticket: SessionTicket,
    /// The player already had an entity in this room.
    pub reconnected: bool,
}

/// Build the initial spawn list for a map.
pub fn default_spawn_points(hazard_map: bool, bounds: Vec2, rng: &mut DeterministicRng) -> Vec<Vec2> {
    if hazard_map {
        return HAZARD_SPAWN_POINTS.to_vec();
    }
    let min = Vec2::new(RANDOM_SPAWN_MARGIN, RANDOM_SPAWN_MARGIN);
    let max = Vec2::new(
        (bounds.x - RANDOM_SPAWN_MARGIN).max(min.x),
        (bounds.y - RANDOM_SPAWN_MARGIN).max(min.y),
    );
    (0..RANDOM_SPAWN_COUNT).map(|_| rng.point_in(min, max)).collect()
}

/// Roster of one room.
#[derive(Debug)]
pub struct RoomCore {
    map_id: String,
    max_players: usize,
    players: BTreeMap<PlayerId, PlayerState>,
    ready: BTreeMap<PlayerId, bool>,
    sessions: BTreeMap<PlayerId, SessionTicket>,
    spawn_points: Vec<Vec2>,
    next_ticket: u64,
}

impl RoomCore {
    /// Create an empty roster.
    pub fn new(map_id: impl Into<String>, max_players: usize, spawn_points: Vec<Vec2>) -> Self {
        Self {
            map_id: map_id.into(),
            max_players,
            players: BTreeMap::new(),
            ready: BTreeMap::new(),
            sessions: BTreeMap::new(),
            spawn_points,
            next_ticket: 1,
        }
    }

    /// Map this room plays on.
    pub fn map_id(&self) -> &str {
        &self.map_id
    }

    /// Capacity.
    pub fn max_players(&self) -> usize {
        self.max_players
    }

    /// Check whether a connect for `player` would be accepted.
    ///
    /// Reconnects are always admitted; new players need a free slot and a lobby.
    pub fn admit(&self, player: &PlayerId, phase: Phase) -> Result<bool, JoinRejection> {
        if self.players.contains_key(player) {
            return Ok(true);
        }
        if self.players.len() >= self.max_players {
            return Err(JoinRejection::RoomFull);
        }
        if matches!(phase, Phase::Countdown | Phase::Playing) {
            return Err(JoinRejection::MatchInProgress);
        }
        Ok(false)
    }

    /// Add or re-attach a player.
    ///
    /// A reconnect keeps health and position, refreshes the skin and replaces
    /// the channel (the stale one is closed before the new one is registered).
    pub fn connect(
        &mut self,
        player: &PlayerId,
        skin: &str,
        sink: Box<dyn PlayerSink>,
        phase: Phase,
        rng: &mut DeterministicRng,
        messaging: &mut Messaging,
    ) -> Result<Admission, (JoinRejection, Box<dyn PlayerSink>)> {
        let reconnected = match self.admit(player, phase) {
            Ok(reconnected) => reconnected,
            Err(rejection) => return Err((rejection, sink)),
        };

        let ticket = SessionTicket::new(self.next_ticket);
        self.next_ticket += 1;

        if reconnected {
            if let Some(state) = self.players.get_mut(player) {
                state.set_skin(skin);
            }
            info!(map = %self.map_id, player = %player, ticket = %ticket, "Player reconnected");
        } else {
            let spawn = self.pick_spawn(rng);
            self.players.insert(player.clone(), PlayerState::new(spawn, skin));
            self.ready.insert(player.clone(), false);
            info!(map = %self.map_id, player = %player, ticket = %ticket, "Player joined");
        }

        messaging.register(player, ticket, sink);
        self.sessions.insert(player.clone(), ticket);

        Ok(Admission { ticket, reconnected })
    }

    /// Ticket belongs to the player's live connection.
    pub fn is_current(&self, player: &PlayerId, ticket: SessionTicket) -> bool {
        self.sessions.get(player) == Some(&ticket)
    }

    /// Remove a player. Ignored (returns `None`) for a stale ticket.
    pub fn disconnect(
        &mut self,
        player: &PlayerId,
        ticket: SessionTicket,
        messaging: &mut Messaging,
    ) -> Option<PlayerState> {
        if !self.is_current(player, ticket) {
            debug!(map = %self.map_id, player = %player, ticket = %ticket, "Ignoring stale disconnect");
            return None;
        }
        self.sessions.remove(player);
        self.ready.remove(player);
        messaging.close(player);
        let state = self.players.remove(player);
        info!(map = %self.map_id, player = %player, "Player left");
        state
    }

    /// Close every channel and forget every player.
    pub fn force_disconnect_all(&mut self, messaging: &mut Messaging) {
        for player in self.sessions.keys() {
            messaging.close(player);
        }
        self.sessions.clear();
        self.ready.clear();
        self.players.clear();
    }

    /// Apply a movement report (PLAYING only, live players only).
    pub fn update_position(
        &mut self,
        player: &PlayerId,
        position: Vec2,
        velocity: Vec2,
        flip_x: bool,
        phase: Phase,
    ) -> bool {
        if phase != Phase::Playing {
            return false;
        }
        self.players
            .get_mut(player)
            .is_some_and(|p| p.apply_movement(position, velocity, flip_x))
    }

    /// Flip a player's ready flag (WAITING only). Returns the new value.
    pub fn toggle_ready(&mut self, player: &PlayerId, phase: Phase) -> Option<bool> {
        if phase != Phase::Waiting {
            return None;
        }
        let flag = self.ready.get_mut(player)?;
        *flag = !*flag;
        Some(*flag)
    }

    /// Every connected player is ready (false for an empty room).
    pub fn all_ready(&self) -> bool {
        !self.ready.is_empty() && self.ready.values().all(|r| *r)
    }

    /// Ready flags by player.
    pub fn ready_states(&self) -> BTreeMap<PlayerId, bool> {
        self.ready.clone()
    }

    /// Replace the spawn list. Empty lists are ignored.
    pub fn set_spawn_points(&mut self, points: Vec<Vec2>) -> bool {
        if points.is_empty() {
            return false;
        }
        self.spawn_points = points;
        true
    }

    /// Current spawn list.
    pub fn spawn_points(&self) -> &[Vec2] {
        &self.spawn_points
    }

    /// Random spawn point, or the fallback if the list is empty.
    pub fn pick_spawn(&self, rng: &mut DeterministicRng) -> Vec2 {
        rng.choose(&self.spawn_points).copied().unwrap_or(FALLBACK_SPAWN)
    }

    /// Respawn every player for a new match.
    pub fn reset_for_match_start(&mut self, rng: &mut DeterministicRng) {
        let ids: Vec<PlayerId> = self.players.keys().cloned().collect();
        for id in ids {
            let spawn = self.pick_spawn(rng);
            if let Some(player) = self.players.get_mut(&id) {
                player.respawn(spawn);
            }
        }
    }

    /// Connected players.
    pub fn players(&self) -> &BTreeMap<PlayerId, PlayerState> {
        &self.players
    }

    /// Connected players, mutable (combat and zone damage).
    pub fn players_mut(&mut self) -> &mut BTreeMap<PlayerId, PlayerState> {
        &mut self.players
    }

    /// One player.
    pub fn player(&self, id: &PlayerId) -> Option<&PlayerState> {
        self.players.get(id)
    }

    /// Connected player count.
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Live player count.
    pub fn alive_count(&self) -> usize {
        self.players.values().filter(|p| p.is_alive()).count()
    }

    /// No players connected.
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================
