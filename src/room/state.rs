//! Room Orchestrator
//!
//! Owns every subsystem of one room and drives them from two entry points:
//! inbound client messages and the fixed-rate tick. All calls happen under the
//! room lock, so the state here is plain synchronous data.
//!
//! ## Tick Order (PLAYING)
//!
//! 1. Reap broken channels (normal disconnect path)
//! 2. Advance projectiles, resolve hits
//! 3. NPC behaviour and NPC shots (hazard maps)
//! 4. Zone schedule and zone damage (hazard maps)
//! 5. Periodic `game_state` / `npc_update` / `time_remaining`
//! 6. End-of-match check

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::RoomConfig;
use crate::core::rng::DeterministicRng;
use crate::core::time::{epoch_millis, millis};
use crate::core::vec2::Vec2;
use crate::game::combat::Combat;
use crate::game::npc::NpcManager;
use crate::game::player::PlayerId;
use crate::game::zone::HazardZone;
use crate::network::protocol::{ClientMessage, PlayerListEntry, PlayerSnapshot, ServerMessage};
use crate::room::lifecycle::{Lifecycle, MatchClock, Phase};
use crate::room::messaging::{Messaging, PlayerSink};
use crate::room::registry::{default_spawn_points, RoomCore, SessionTicket};
use crate::room::Rejected;
use crate::services::CoinLedger;

/// Match ended on the clock.
pub const REASON_TIME_LIMIT: &str = "Time limit reached";

/// Match ended because too few players are connected.
pub const REASON_NOT_ENOUGH_PLAYERS: &str = "Not enough players remaining";

/// Match ended with a single survivor.
pub const REASON_LAST_PLAYER: &str = "Only one player remaining";

/// `room_shutdown.reason` sent when players are kicked after a match.
pub const KICK_REASON: &str = "Game ended, returning to menu";

/// Coins owed to a player for their final rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinAward {
    /// Recipient.
    pub player: PlayerId,
    /// Final rank.
    pub rank: u32,
    /// Coins.
    pub amount: u32,
}

/// Side effects the room handle must carry out after releasing the lock.
#[derive(Debug, Default)]
pub struct RoomReport {
    /// Coin awards to apply.
    pub awards: Vec<CoinAward>,
    /// The last player left.
    pub empty: bool,
    /// Post-match teardown is due.
    pub teardown: bool,
}

impl RoomReport {
    /// Nothing to do.
    pub fn is_idle(&self) -> bool {
        self.awards.is_empty() && !self.empty && !self.teardown
    }
}

/// Complete state of one room.
pub struct RoomState {
    config: Arc<RoomConfig>,
    hazard_map: bool,
    core: RoomCore,
    messaging: Messaging,
    lifecycle: Lifecycle,
    combat: Combat,
    npcs: NpcManager,
    zone: HazardZone,
    rng: DeterministicRng,
    ledger: Arc<dyn CoinLedger>,
}

impl RoomState {
    /// Create an empty room in WAITING.
    pub fn new(
        map_id: impl Into<String>,
        config: Arc<RoomConfig>,
        ledger: Arc<dyn CoinLedger>,
        mut rng: DeterministicRng,
    ) -> Self {
        let map_id = map_id.into();
        let hazard_map = config.is_hazard_map(&map_id);
        let spawn_points = default_spawn_points(hazard_map, config.bounds(), &mut rng);

        Self {
            core: RoomCore::new(map_id, config.max_players, spawn_points),
            messaging: Messaging::new(config.outbox_capacity),
            lifecycle: Lifecycle::default(),
            combat: Combat::new(),
            npcs: NpcManager::new(config.bounds()),
            zone: HazardZone::new(config.zone.clone()),
            hazard_map,
            rng,
            ledger,
            config,
        }
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Map id.
    pub fn map_id(&self) -> &str {
        self.core.map_id()
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.lifecycle.phase()
    }

    /// Connected players.
    pub fn player_count(&self) -> usize {
        self.core.player_count()
    }

    /// No players connected.
    pub fn is_empty(&self) -> bool {
        self.core.is_empty()
    }

    /// NPCs and the hazard zone run here.
    pub fn is_hazard_map(&self) -> bool {
        self.hazard_map
    }

    /// Roster.
    pub fn core(&self) -> &RoomCore {
        &self.core
    }

    /// Projectiles and stats.
    pub fn combat(&self) -> &Combat {
        &self.combat
    }

    /// NPCs.
    pub fn npcs(&self) -> &NpcManager {
        &self.npcs
    }

    /// Hazard zone.
    pub fn zone(&self) -> &HazardZone {
        &self.zone
    }

    // =========================================================================
    // CONNECTIONS
    // =========================================================================

    /// Admit a player and send the join sequence.
    ///
    /// The joiner gets `player_list`, `game_state` and one `npc_spawned` per
    /// NPC; everyone else gets `player_joined`; then all get `room_status`.
    pub fn connect(
        &mut self,
        player: &PlayerId,
        skin: &str,
        sink: Box<dyn PlayerSink>,
    ) -> Result<SessionTicket, Rejected> {
        let phase = self.phase();
        let admission = match self.core.connect(player, skin, sink, phase, &mut self.rng, &mut self.messaging) {
            Ok(admission) => admission,
            Err((reason, sink)) => {
                info!(map = %self.map_id(), player = %player, reason = %reason, "Join rejected");
                return Err(Rejected { reason, sink });
            }
        };

        if let Some(state) = self.core.player(player) {
            let joined = ServerMessage::PlayerJoined {
                username: player.clone(),
                x: state.position.x,
                y: state.position.y,
                flip_x: state.flip_x,
                skin: state.skin().to_string(),
            };
            self.messaging.broadcast_except(&joined, player);
        }

        let list = self.player_list_message();
        self.messaging.send(player, &list);
        let snapshot = self.game_state_message();
        self.messaging.send(player, &snapshot);
        for spawned in self.npcs.spawned_messages() {
            self.messaging.send(player, &spawned);
        }
        self.broadcast_room_status();

        Ok(admission.ticket)
    }

    /// Remove a player. Stale tickets are ignored.
    pub fn disconnect(&mut self, player: &PlayerId, ticket: SessionTicket, now: Instant) -> RoomReport {
        let mut report = RoomReport::default();
        self.remove_player(player, ticket, now, &mut report);
        report
    }

    fn remove_player(&mut self, player: &PlayerId, ticket: SessionTicket, now: Instant, report: &mut RoomReport) {
        if !self.core.is_current(player, ticket) {
            debug!(map = %self.map_id(), player = %player, "Ignoring stale disconnect");
            return;
        }

        // Leaving a running match alive counts as an elimination
        if self.phase() == Phase::Playing && self.core.player(player).is_some_and(|p| p.is_alive()) {
            self.combat.stats_mut().record_death(player, epoch_millis());
        }

        self.core.disconnect(player, ticket, &mut self.messaging);
        self.messaging.broadcast(&ServerMessage::PlayerLeft { username: player.clone() });

        match self.phase() {
            Phase::Waiting => self.maybe_start_countdown(now),
            Phase::Countdown => {
                if !self.countdown_viable() {
                    self.cancel_countdown();
                }
            }
            Phase::Playing => self.check_end(now, report),
            Phase::Finished => {}
        }

        self.broadcast_room_status();
        if self.core.is_empty() {
            report.empty = true;
        }
    }

    /// Close every channel and forget every player. Returns the drain tasks.
    pub fn shutdown_channels(&mut self) -> Vec<JoinHandle<()>> {
        self.core.force_disconnect_all(&mut self.messaging);
        self.messaging.shutdown()
    }

    // =========================================================================
    // INBOUND MESSAGES
    // =========================================================================

    /// Dispatch one decoded client message.
    pub fn handle_message(
        &mut self,
        player: &PlayerId,
        ticket: SessionTicket,
        message: ClientMessage,
        now: Instant,
    ) -> RoomReport {
        let mut report = RoomReport::default();
        if !self.core.is_current(player, ticket) {
            debug!(map = %self.map_id(), player = %player, kind = message.kind(), "Dropping message from stale session");
            return report;
        }

        let phase = self.phase();
        let playing = phase == Phase::Playing;
        let mut events = Vec::new();

        match message {
            ClientMessage::ReadyToggle => {
                if let Some(ready) = self.core.toggle_ready(player, phase) {
                    debug!(map = %self.map_id(), player = %player, ready, "Ready toggled");
                    self.broadcast_room_status();
                    self.maybe_start_countdown(now);
                }
            }
            ClientMessage::Position { x, y, vx, vy, flip_x } => {
                let position = Vec2::new(x, y);
                let velocity = Vec2::new(vx, vy);
                if self.core.update_position(player, position, velocity, flip_x, phase) {
                    let update = ServerMessage::PlayerUpdate {
                        username: player.clone(),
                        x,
                        y,
                        vx,
                        vy,
                        flip_x,
                    };
                    self.messaging.broadcast_except(&update, player);
                }
            }
            ClientMessage::Attack { direction_x, direction_y } => {
                if playing {
                    let direction = Vec2::new(direction_x, direction_y);
                    self.combat.attack(player, self.core.players(), direction, now, &mut events);
                }
            }
            ClientMessage::Heal { amount } => {
                if playing {
                    self.combat.heal(player, amount, self.core.players_mut(), &mut events);
                }
            }
            ClientMessage::Damage { amount } => {
                if playing {
                    self.combat.damage(player, amount, self.core.players_mut(), epoch_millis(), &mut events);
                }
            }
            ClientMessage::ChatMessage { message, timestamp } => {
                if !message.trim().is_empty() {
                    let chat = ServerMessage::ChatMessage {
                        username: player.clone(),
                        message,
                        timestamp: timestamp.unwrap_or_else(epoch_millis),
                    };
                    self.messaging.broadcast_except(&chat, player);
                }
            }
            ClientMessage::NpcDamage { npc_id, damage } => {
                if playing {
                    self.npcs.damage(&npc_id, damage, &mut events);
                }
            }
            ClientMessage::SpawnPoints { spawn_points } => {
                let count = spawn_points.len();
                if self.core.set_spawn_points(spawn_points.into_iter().map(Vec2::from).collect()) {
                    debug!(map = %self.map_id(), player = %player, count, "Spawn points replaced");
                }
            }
            ClientMessage::Heartbeat | ClientMessage::JoinGame => {}
        }

        self.flush(events);
        if self.phase() == Phase::Playing {
            self.check_end(now, &mut report);
        }
        report
    }

    // =========================================================================
    // TICK
    // =========================================================================

    /// Advance the room by one tick.
    pub fn tick(&mut self, now: Instant) -> RoomReport {
        let mut report = RoomReport::default();
        self.reap_failures(now, &mut report);

        match self.phase() {
            Phase::Waiting => {}
            Phase::Countdown => self.tick_countdown(now),
            Phase::Playing => self.tick_playing(now, &mut report),
            Phase::Finished => self.tick_finished(now, &mut report),
        }
        report
    }

    fn reap_failures(&mut self, now: Instant, report: &mut RoomReport) {
        for failure in self.messaging.take_failures() {
            if self.core.is_current(&failure.player, failure.ticket) {
                warn!(map = %self.map_id(), player = %failure.player, "Channel broken, disconnecting");
                self.remove_player(&failure.player, failure.ticket, now, report);
            }
        }
    }

    fn tick_countdown(&mut self, now: Instant) {
        let Lifecycle::Countdown { remaining, last_step } = &mut self.lifecycle else {
            return;
        };
        if now.saturating_duration_since(*last_step) < Duration::from_secs(1) {
            return;
        }
        *remaining = remaining.saturating_sub(1);
        *last_step = now;
        let seconds = *remaining;

        self.messaging.broadcast(&ServerMessage::Countdown { seconds });
        if seconds == 0 {
            self.start_match(now);
        }
    }

    fn tick_playing(&mut self, now: Instant, report: &mut RoomReport) {
        let now_ms = epoch_millis();
        let mut events = Vec::new();

        self.combat.update_projectiles(self.core.players_mut(), now, now_ms, &mut events);

        if self.hazard_map {
            for shot in self.npcs.update(self.core.players(), now, &mut self.rng) {
                self.combat.spawn_npc_projectile(&shot.npc_id, shot.origin, shot.direction, now, &mut events);
            }
            self.advance_zone_schedule(now, &mut events);
            for victim in self.zone.update(now, self.core.players_mut(), &mut events) {
                self.combat.stats_mut().record_death(&victim, now_ms);
            }
        }
        self.flush(events);

        let Lifecycle::Playing(clock) = &mut self.lifecycle else {
            return;
        };
        let elapsed = now.saturating_duration_since(clock.started_at);
        let send_state = now.saturating_duration_since(clock.last_state_broadcast) >= self.config.state_broadcast_interval;
        if send_state {
            clock.last_state_broadcast = now;
        }
        let send_time = now.saturating_duration_since(clock.last_time_broadcast) >= self.config.time_broadcast_interval;
        if send_time {
            clock.last_time_broadcast = now;
        }

        if send_state {
            let snapshot = self.game_state_message();
            self.messaging.broadcast(&snapshot);
            if !self.npcs.is_empty() {
                let update = self.npcs.update_message();
                self.messaging.broadcast(&update);
            }
        }
        if send_time {
            self.messaging.broadcast(&ServerMessage::TimeRemaining {
                time_remaining: millis(self.config.match_duration.saturating_sub(elapsed)),
                time_elapsed: millis(elapsed),
            });
        }

        self.check_end(now, report);
    }

    fn advance_zone_schedule(&mut self, now: Instant, events: &mut Vec<ServerMessage>) {
        let Lifecycle::Playing(clock) = &mut self.lifecycle else {
            return;
        };
        let elapsed = now.saturating_duration_since(clock.started_at);

        if !clock.zone_started && elapsed >= self.config.zone_start_delay {
            clock.zone_started = true;
            self.zone.start(self.config.bounds(), now, events);
        }
        if clock.zone_started && !clock.zone_frozen && elapsed >= self.config.zone_freeze_after {
            clock.zone_frozen = true;
            self.zone.stop_shrinking();
        }
    }

    fn tick_finished(&mut self, now: Instant, report: &mut RoomReport) {
        let Lifecycle::Finished { at, kicked_at, torn_down } = self.lifecycle else {
            return;
        };
        if torn_down {
            return;
        }

        match kicked_at {
            None if now.saturating_duration_since(at) >= self.config.finished_kick_delay => {
                self.lifecycle = Lifecycle::Finished { at, kicked_at: Some(now), torn_down: false };
                info!(map = %self.map_id(), "Returning players to menu");
                self.messaging.broadcast(&ServerMessage::RoomShutdown { reason: KICK_REASON.to_string() });
                let players: Vec<PlayerId> = self.core.players().keys().cloned().collect();
                for player in &players {
                    self.messaging.close(player);
                }
            }
            Some(kicked) if now.saturating_duration_since(kicked) >= self.config.teardown_delay => {
                self.lifecycle = Lifecycle::Finished { at, kicked_at, torn_down: true };
                self.core.force_disconnect_all(&mut self.messaging);
                report.teardown = true;
            }
            _ => {}
        }
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    fn countdown_viable(&self) -> bool {
        self.core.player_count() >= self.config.min_players && self.core.all_ready()
    }

    fn maybe_start_countdown(&mut self, now: Instant) {
        if self.phase() != Phase::Waiting || !self.countdown_viable() {
            return;
        }
        let countdown = Lifecycle::Countdown {
            remaining: self.config.countdown_secs,
            last_step: now,
        };
        if self.lifecycle.transition(countdown).is_ok() {
            info!(map = %self.map_id(), players = self.core.player_count(), "Countdown started");
            self.messaging.broadcast(&ServerMessage::CountdownStarted { duration: self.config.countdown_secs });
            self.broadcast_room_status();
        }
    }

    fn cancel_countdown(&mut self) {
        if self.lifecycle.transition(Lifecycle::Waiting).is_ok() {
            info!(map = %self.map_id(), "Countdown cancelled");
            self.messaging.broadcast(&ServerMessage::CountdownCancelled);
        }
    }

    fn start_match(&mut self, now: Instant) {
        let now_ms = epoch_millis();
        if let Err(e) = self.lifecycle.transition(Lifecycle::Playing(MatchClock::start(now, now_ms))) {
            warn!(map = %self.map_id(), error = %e, "Cannot start match");
            return;
        }

        self.combat.reset(now_ms);
        self.zone.reset();
        self.npcs.reset();
        self.core.reset_for_match_start(&mut self.rng);
        for player in self.core.players().keys() {
            self.combat.stats_mut().register(player);
        }

        let mut events = Vec::new();
        if self.hazard_map {
            self.npcs.spawn(self.config.center(), now, &mut events);
        }

        info!(map = %self.map_id(), players = self.core.player_count(), "Match started");
        self.messaging.broadcast(&ServerMessage::GameStarted {
            game_start_time: now_ms,
            game_duration: millis(self.config.match_duration),
        });
        self.flush(events);
        let snapshot = self.game_state_message();
        self.messaging.broadcast(&snapshot);
        self.broadcast_room_status();
    }

    fn check_end(&mut self, now: Instant, report: &mut RoomReport) {
        let Lifecycle::Playing(clock) = &self.lifecycle else {
            return;
        };
        let elapsed = now.saturating_duration_since(clock.started_at);
        let connected = self.core.player_count();

        let reason = if elapsed > self.config.match_duration {
            REASON_TIME_LIMIT
        } else if connected < self.config.min_players {
            REASON_NOT_ENOUGH_PLAYERS
        } else if self.core.alive_count() <= 1 {
            REASON_LAST_PLAYER
        } else {
            return;
        };
        self.end_match(reason, now, report);
    }

    fn end_match(&mut self, reason: &str, now: Instant, report: &mut RoomReport) {
        if self.lifecycle.transition(Lifecycle::Finished { at: now, kicked_at: None, torn_down: false }).is_err() {
            return;
        }
        let now_ms = epoch_millis();

        let mut events = Vec::new();
        self.zone.stop(&mut events);
        self.npcs.clear();
        self.combat.clear_projectiles();

        let participants: Vec<(PlayerId, bool)> = self
            .core
            .players()
            .iter()
            .map(|(id, p)| (id.clone(), p.is_dead()))
            .collect();
        let stats = self.combat.stats_mut();
        stats.finalize(participants.iter().map(|(id, dead)| (id, *dead)), now_ms);

        for ranking in stats.rankings() {
            let amount = self.ledger.reward_for_rank(ranking.rank);
            if amount == 0 {
                continue;
            }
            stats.set_coins(&ranking.player_id, amount);
            report.awards.push(CoinAward {
                player: ranking.player_id,
                rank: ranking.rank,
                amount,
            });
        }
        let summary = self.combat.stats().summary(now_ms);

        info!(map = %self.map_id(), reason, duration_ms = summary.game_duration, "Match ended");
        self.flush(events);
        self.messaging.broadcast(&ServerMessage::GameEnded {
            reason: reason.to_string(),
            stats: summary,
        });
        self.broadcast_room_status();
    }

    // =========================================================================
    // OUTBOUND HELPERS
    // =========================================================================

    fn flush(&mut self, events: Vec<ServerMessage>) {
        for event in &events {
            self.messaging.broadcast(event);
        }
    }

    fn broadcast_room_status(&mut self) {
        let status = self.room_status_message();
        self.messaging.broadcast(&status);
    }

    /// `room_status` for the current roster and phase.
    pub fn room_status_message(&self) -> ServerMessage {
        ServerMessage::RoomStatus {
            game_state: self.phase().as_str().to_string(),
            player_count: self.core.player_count(),
            max_players: self.core.max_players(),
            ready_states: self.core.ready_states(),
        }
    }

    /// `game_state` snapshot of every player.
    pub fn game_state_message(&self) -> ServerMessage {
        let players = self
            .core
            .players()
            .iter()
            .map(|(id, p)| {
                let snapshot = PlayerSnapshot {
                    x: p.position.x,
                    y: p.position.y,
                    vx: p.velocity.x,
                    vy: p.velocity.y,
                    flip_x: p.flip_x,
                    health: p.health(),
                    is_dead: p.is_dead(),
                    skin: p.skin().to_string(),
                };
                (id.clone(), snapshot)
            })
            .collect();
        ServerMessage::GameState { players }
    }

    fn player_list_message(&self) -> ServerMessage {
        let players = self
            .core
            .players()
            .iter()
            .map(|(id, p)| PlayerListEntry {
                username: id.clone(),
                skin: p.skin().to_string(),
            })
            .collect();
        ServerMessage::PlayerList { players }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::stats::{RankStatus, StatsSummary};
    use crate::room::messaging::MemorySink;
    use crate::room::JoinRejection;
    use crate::services::InMemoryLedger;

    fn id(s: &str) -> PlayerId {
        PlayerId::new(s)
    }

    fn room(map: &str) -> RoomState {
        RoomState::new(
            map,
            Arc::new(RoomConfig::default()),
            Arc::new(InMemoryLedger::new()),
            DeterministicRng::new(42),
        )
    }

    fn join(state: &mut RoomState, who: &str) -> (MemorySink, SessionTicket) {
        let sink = MemorySink::new();
        let ticket = state
            .connect(&id(who), "player_0", sink.boxed())
            .map_err(|r| r.reason)
            .unwrap();
        (sink, ticket)
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    /// Join `a` and `b`, ready both and run the countdown out.
    fn start(state: &mut RoomState, t0: Instant) -> (MemorySink, SessionTicket, MemorySink, SessionTicket, Instant) {
        let (sa, ta) = join(state, "a");
        let (sb, tb) = join(state, "b");
        state.handle_message(&id("a"), ta, ClientMessage::ReadyToggle, t0);
        state.handle_message(&id("b"), tb, ClientMessage::ReadyToggle, t0);
        assert_eq!(state.phase(), Phase::Countdown);

        for s in 1..=5 {
            state.tick(t0 + secs(s));
        }
        assert_eq!(state.phase(), Phase::Playing);
        (sa, ta, sb, tb, t0 + secs(5))
    }

    #[tokio::test]
    async fn test_join_sequence() {
        let mut state = room("map1");
        let (a, _) = join(&mut state, "a");
        settle().await;
        a.clear();

        let (b, _) = join(&mut state, "b");
        settle().await;

        assert_eq!(b.types(), vec!["player_list", "game_state", "room_status"]);
        assert_eq!(a.types(), vec!["player_joined", "room_status"]);

        match b.messages().last() {
            Some(ServerMessage::RoomStatus { game_state, player_count, max_players, .. }) => {
                assert_eq!(game_state, "WAITING");
                assert_eq!(*player_count, 2);
                assert_eq!(*max_players, 4);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_countdown_runs_into_match() {
        let t0 = Instant::now();
        let mut state = room("map1");
        let (a, _, _, _, _) = start(&mut state, t0);
        settle().await;

        let types = a.types();
        let countdowns: Vec<u32> = a
            .messages()
            .into_iter()
            .filter_map(|m| match m {
                ServerMessage::Countdown { seconds } => Some(seconds),
                _ => None,
            })
            .collect();
        assert_eq!(countdowns, vec![4, 3, 2, 1, 0]);
        assert!(types.contains(&"countdown_started".to_string()));

        let started = types.iter().position(|t| t == "game_started").unwrap();
        assert_eq!(types[started..started + 3], ["game_started", "game_state", "room_status"]);
        assert!(state.core().players().values().all(|p| p.health() == 4));
    }

    #[tokio::test]
    async fn test_countdown_needs_everyone_ready() {
        let t0 = Instant::now();
        let mut state = room("map1");
        let (_, ta) = join(&mut state, "a");
        join(&mut state, "b");

        state.handle_message(&id("a"), ta, ClientMessage::ReadyToggle, t0);
        assert_eq!(state.phase(), Phase::Waiting);

        // A single ready player never starts a match
        let mut solo = room("map1");
        let (_, ts) = join(&mut solo, "solo");
        solo.handle_message(&id("solo"), ts, ClientMessage::ReadyToggle, t0);
        assert_eq!(solo.phase(), Phase::Waiting);
    }

    #[tokio::test]
    async fn test_countdown_cancelled_when_player_leaves() {
        let t0 = Instant::now();
        let mut state = room("map1");
        let (a, ta) = join(&mut state, "a");
        let (_, tb) = join(&mut state, "b");
        state.handle_message(&id("a"), ta, ClientMessage::ReadyToggle, t0);
        state.handle_message(&id("b"), tb, ClientMessage::ReadyToggle, t0);
        assert_eq!(state.phase(), Phase::Countdown);

        state.disconnect(&id("b"), tb, t0 + secs(1));
        assert_eq!(state.phase(), Phase::Waiting);
        settle().await;

        let types = a.types();
        let left = types.iter().position(|t| t == "player_left").unwrap();
        assert_eq!(types[left + 1], "countdown_cancelled");
        assert_eq!(types[left + 2], "room_status");

        // Timers from the cancelled countdown never fire
        state.tick(t0 + secs(10));
        assert_eq!(state.phase(), Phase::Waiting);
    }

    #[tokio::test]
    async fn test_joins_rejected_outside_lobby() {
        let t0 = Instant::now();
        let mut state = room("map1");
        start(&mut state, t0);

        let late = state.connect(&id("late"), "player_0", MemorySink::new().boxed());
        assert_eq!(late.map_err(|r| r.reason).unwrap_err(), JoinRejection::MatchInProgress);

        let mut full = room("map1");
        for who in ["a", "b", "c", "d"] {
            join(&mut full, who);
        }
        let fifth = full.connect(&id("e"), "player_0", MemorySink::new().boxed());
        assert_eq!(fifth.map_err(|r| r.reason).unwrap_err(), JoinRejection::RoomFull);
    }

    #[tokio::test]
    async fn test_last_survivor_ends_match_and_awards_coins() {
        let t0 = Instant::now();
        let mut state = room("map1");
        let (a, _, _, tb, started) = start(&mut state, t0);

        let report = state.handle_message(&id("b"), tb, ClientMessage::Damage { amount: 10 }, started);
        assert_eq!(state.phase(), Phase::Finished);
        assert_eq!(
            report.awards,
            vec![
                CoinAward { player: id("a"), rank: 1, amount: 100 },
                CoinAward { player: id("b"), rank: 2, amount: 75 },
            ]
        );

        settle().await;
        let ended = a.messages().into_iter().find_map(|m| match m {
            ServerMessage::GameEnded { reason, stats } => Some((reason, stats)),
            _ => None,
        });
        let (reason, stats) = ended.unwrap();
        assert_eq!(reason, REASON_LAST_PLAYER);
        assert_eq!(stats.rankings[0].status, RankStatus::Survivor);
        assert_eq!(stats.rankings[1].status, RankStatus::Eliminated);
        assert_eq!(stats.coins_awarded.get(&id("a")), Some(&100));
    }

    #[tokio::test]
    async fn test_time_limit_ends_match() {
        let t0 = Instant::now();
        let mut state = room("map1");
        let (_, _, _, _, started) = start(&mut state, t0);

        state.tick(started + secs(300));
        assert_eq!(state.phase(), Phase::Playing);
        state.tick(started + secs(300) + Duration::from_millis(20));
        assert_eq!(state.phase(), Phase::Finished);
    }

    #[tokio::test]
    async fn test_leaving_mid_match_is_a_forfeit() {
        let t0 = Instant::now();
        let mut state = room("map1");
        let (a, _, _, tb, started) = start(&mut state, t0);

        state.disconnect(&id("b"), tb, started + secs(1));
        assert_eq!(state.phase(), Phase::Finished);
        settle().await;

        let (reason, stats) = a
            .messages()
            .into_iter()
            .find_map(|m| match m {
                ServerMessage::GameEnded { reason, stats } => Some((reason, stats)),
                _ => None,
            })
            .unwrap();
        assert_eq!(reason, REASON_NOT_ENOUGH_PLAYERS);
        let b = stats.rankings.iter().find(|r| r.player_id == id("b")).unwrap();
        assert_eq!(b.status, RankStatus::Eliminated);
        assert_eq!(b.rank, 2);
    }

    #[tokio::test]
    async fn test_dead_players_are_frozen() {
        let t0 = Instant::now();
        let mut state = room("map1");
        let (_, ta) = join(&mut state, "a");
        let (_, tb) = join(&mut state, "b");
        let (_, tc) = join(&mut state, "c");
        for (who, ticket) in [("a", ta), ("b", tb), ("c", tc)] {
            state.handle_message(&id(who), ticket, ClientMessage::ReadyToggle, t0);
        }
        for s in 1..=5 {
            state.tick(t0 + secs(s));
        }
        let started = t0 + secs(5);

        state.handle_message(&id("b"), tb, ClientMessage::Damage { amount: 4 }, started);
        assert_eq!(state.phase(), Phase::Playing);
        let before = state.core().player(&id("b")).unwrap().clone();

        let moved = ClientMessage::Position { x: 1.0, y: 1.0, vx: 0.0, vy: 0.0, flip_x: true };
        state.handle_message(&id("b"), tb, moved, started);
        state.handle_message(&id("b"), tb, ClientMessage::Heal { amount: 2 }, started);
        state.handle_message(&id("b"), tb, ClientMessage::Attack { direction_x: 1.0, direction_y: 0.0 }, started);

        let after = state.core().player(&id("b")).unwrap();
        assert_eq!(after.position, before.position);
        assert_eq!(after.health(), 0);
        assert!(state.combat().projectiles().is_empty());
    }

    #[tokio::test]
    async fn test_stale_session_is_ignored() {
        let t0 = Instant::now();
        let mut state = room("map1");
        let (_, old) = join(&mut state, "a");
        let (_, new) = join(&mut state, "a");
        assert_ne!(old, new);

        state.handle_message(&id("a"), old, ClientMessage::ReadyToggle, t0);
        assert_eq!(state.core().ready_states().get(&id("a")), Some(&false));

        state.disconnect(&id("a"), old, t0);
        assert_eq!(state.player_count(), 1);
        let report = state.disconnect(&id("a"), new, t0);
        assert!(report.empty);
    }

    #[tokio::test]
    async fn test_broken_channel_is_reaped() {
        let t0 = Instant::now();
        let mut state = room("map1");
        join(&mut state, "a");
        let (b, _) = join(&mut state, "b");
        b.set_failing(true);

        state.messaging.broadcast(&ServerMessage::Countdown { seconds: 1 });
        settle().await;

        state.tick(t0);
        assert_eq!(state.player_count(), 1);
        assert!(state.core().player(&id("b")).is_none());
    }

    #[tokio::test]
    async fn test_finished_room_kicks_then_tears_down() {
        let t0 = Instant::now();
        let mut state = room("map1");
        let (a, _, _, tb, started) = start(&mut state, t0);
        state.handle_message(&id("b"), tb, ClientMessage::Damage { amount: 4 }, started);
        assert_eq!(state.phase(), Phase::Finished);

        assert!(state.tick(started + secs(14)).is_idle());
        assert!(!state.tick(started + secs(15)).teardown);
        settle().await;
        assert_eq!(a.types().last().map(String::as_str), Some("room_shutdown"));
        assert!(a.is_closed());

        let report = state.tick(started + secs(15) + Duration::from_millis(500));
        assert!(report.teardown);
        assert!(state.is_empty());

        // Teardown is requested once, not on every later tick
        assert!(state.tick(started + secs(16)).is_idle());
        assert!(state.tick(started + secs(20)).is_idle());
    }

    #[tokio::test]
    async fn test_hazard_map_runs_npc_and_zone() {
        let t0 = Instant::now();
        let mut state = room("map3");
        assert!(state.is_hazard_map());
        let (a, _, _, _, started) = start(&mut state, t0);
        assert_eq!(state.npcs().len(), 1);
        assert!(!state.zone().is_active());

        state.tick(started + secs(5));
        assert!(state.zone().is_active());
        settle().await;
        let types = a.types();
        assert!(types.contains(&"npc_spawned".to_string()));
        assert!(types.contains(&"growing_damage_zone_start".to_string()));
        assert!(types.contains(&"npc_update".to_string()));
    }

    /// Kill the map3 NPC so it cannot interfere.
    fn kill_npc(state: &mut RoomState, who: &str, ticket: SessionTicket, now: Instant) {
        let npc_id = match state.npcs().spawned_messages().pop() {
            Some(ServerMessage::NpcSpawned { id, .. }) => id,
            other => panic!("no npc: {:?}", other),
        };
        state.handle_message(&id(who), ticket, ClientMessage::NpcDamage { npc_id, damage: 4 }, now);
    }

    fn place(state: &mut RoomState, who: &str, ticket: SessionTicket, x: f32, y: f32, now: Instant) {
        let moved = ClientMessage::Position { x, y, vx: 0.0, vy: 0.0, flip_x: false };
        state.handle_message(&id(who), ticket, moved, now);
    }

    fn game_ended(sink: &MemorySink) -> (String, StatsSummary) {
        sink.messages()
            .into_iter()
            .find_map(|m| match m {
                ServerMessage::GameEnded { reason, stats } => Some((reason, stats)),
                _ => None,
            })
            .expect("game_ended")
    }

    #[tokio::test]
    async fn test_zone_death_is_unattributed_and_ends_match() {
        let t0 = Instant::now();
        let mut state = room("map3");
        let (a, ta, _, tb, started) = start(&mut state, t0);
        kill_npc(&mut state, "a", ta, started);
        place(&mut state, "a", ta, 642.0, 560.0, started);
        // Outside the initial 784-unit radius around the centre
        place(&mut state, "b", tb, 20.0, 20.0, started);

        let mut awards = Vec::new();
        let mut ended_at = None;
        for s in 1..=30 {
            let report = state.tick(started + secs(s));
            awards.extend(report.awards);
            settle().await;
            if state.phase() == Phase::Finished {
                ended_at = Some(s);
                break;
            }
        }

        // Zone starts at +5s, damage after a 10s grace, 1 hp per second
        assert_eq!(ended_at, Some(18));
        let (reason, stats) = game_ended(&a);
        assert_eq!(reason, REASON_LAST_PLAYER);

        assert_eq!(stats.death_order.len(), 1);
        assert_eq!(stats.death_order[0].player_id, id("b"));
        assert!(stats.player_kills.values().all(|k| *k == 0));
        assert!(!serde_json::to_string(&stats).unwrap().contains("killedBy"));

        let rank_of = |who: &str| stats.rankings.iter().find(|r| r.player_id == id(who)).cloned().unwrap();
        assert_eq!((rank_of("a").rank, rank_of("a").status), (1, RankStatus::Survivor));
        assert_eq!((rank_of("b").rank, rank_of("b").status), (2, RankStatus::Eliminated));

        assert!(awards.contains(&CoinAward { player: id("a"), rank: 1, amount: 100 }));
        assert!(awards.contains(&CoinAward { player: id("b"), rank: 2, amount: 75 }));
        assert_eq!(stats.coins_awarded.get(&id("a")), Some(&100));
    }

    #[tokio::test]
    async fn test_npc_kill_is_unattributed_and_ends_match() {
        let t0 = Instant::now();
        let mut state = room("map3");
        let (a, ta, _, tb, started) = start(&mut state, t0);
        place(&mut state, "a", ta, 100.0, 100.0, started);
        // 40 units below the NPC, well inside its attack range
        place(&mut state, "b", tb, 642.0, 600.0, started);
        state.handle_message(&id("b"), tb, ClientMessage::Damage { amount: 3 }, started);
        assert_eq!(state.phase(), Phase::Playing);

        let step = Duration::from_micros(16_667);
        for k in 1..=60u32 {
            state.tick(started + step * k);
            if state.phase() == Phase::Finished {
                break;
            }
        }
        settle().await;

        assert_eq!(state.phase(), Phase::Finished);
        let (reason, stats) = game_ended(&a);
        assert_eq!(reason, REASON_LAST_PLAYER);
        assert!(stats.player_kills.values().all(|k| *k == 0));
        let b = stats.rankings.iter().find(|r| r.player_id == id("b")).unwrap();
        assert_eq!((b.rank, b.status), (2, RankStatus::Eliminated));
    }

    #[tokio::test]
    async fn test_zone_stops_shrinking_at_freeze_time() {
        let t0 = Instant::now();
        let mut state = room("map3");
        let (_, ta, _, tb, started) = start(&mut state, t0);
        kill_npc(&mut state, "a", ta, started);
        // Inside even the final radius
        place(&mut state, "a", ta, 642.0, 560.0, started);
        place(&mut state, "b", tb, 650.0, 560.0, started);

        for s in 1..=274 {
            state.tick(started + secs(s));
            // Keep outboxes drained
            settle().await;
        }
        assert_eq!(state.phase(), Phase::Playing);
        assert!(state.zone().is_shrinking());

        state.tick(started + secs(275));
        assert!(state.zone().is_active());
        assert!(!state.zone().is_shrinking());
        let frozen = state.zone().radius();

        state.tick(started + secs(280));
        settle().await;
        assert_eq!(state.zone().radius(), frozen);
        assert_eq!(state.phase(), Phase::Playing);
    }

    #[tokio::test]
    async fn test_plain_map_has_no_hazards() {
        let t0 = Instant::now();
        let mut state = room("map1");
        start(&mut state, t0);
        assert!(state.npcs().is_empty());
        state.tick(t0 + secs(20));
        assert!(!state.zone().is_active());
    }

    #[tokio::test]
    async fn test_game_state_broadcast_rate() {
        let t0 = Instant::now();
        let mut state = room("map1");
        let (a, _, _, _, started) = start(&mut state, t0);
        settle().await;
        a.clear();

        let step = Duration::from_micros(16_667);
        for k in 1..=60u32 {
            state.tick(started + step * k);
        }
        settle().await;

        let snapshots = a.types().iter().filter(|t| *t == "game_state").count();
        assert!((9..=10).contains(&snapshots), "got {}", snapshots);
        let clocks = a.types().iter().filter(|t| *t == "time_remaining").count();
        assert!(clocks <= 1);
    }

    #[tokio::test]
    async fn test_chat_relayed_to_others() {
        let t0 = Instant::now();
        let mut state = room("map1");
        let (a, ta) = join(&mut state, "a");
        let (b, _) = join(&mut state, "b");
        settle().await;
        a.clear();
        b.clear();

        let chat = ClientMessage::ChatMessage { message: "hi".into(), timestamp: Some(5) };
        state.handle_message(&id("a"), ta, chat, t0);
        let blank = ClientMessage::ChatMessage { message: "   ".into(), timestamp: None };
        state.handle_message(&id("a"), ta, blank, t0);
        settle().await;

        assert!(a.types().is_empty());
        assert_eq!(
            b.messages(),
            vec![ServerMessage::ChatMessage { username: id("a"), message: "hi".into(), timestamp: 5 }]
        );
    }

    #[tokio::test]
    async fn test_slash_commands_are_plain_chat() {
        let t0 = Instant::now();
        let mut state = room("map1");
        let (_, ta) = join(&mut state, "a");
        let (b, _) = join(&mut state, "b");
        settle().await;
        b.clear();

        let chat = ClientMessage::ChatMessage { message: "/dinero 500".into(), timestamp: Some(9) };
        let report = state.handle_message(&id("a"), ta, chat, t0);
        settle().await;

        assert!(report.awards.is_empty());
        assert_eq!(
            b.messages(),
            vec![ServerMessage::ChatMessage { username: id("a"), message: "/dinero 500".into(), timestamp: 9 }]
        );
    }
}
