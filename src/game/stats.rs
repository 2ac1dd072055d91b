//! Match Statistics
//!
//! Kill counts, elimination order and the end-of-match ranking.
//!
//! Ranking rules:
//! - survivors (never eliminated) all share rank 1, listed by kills descending
//! - eliminated players follow in reverse elimination order, so the last one
//!   to fall ranks highest among them
//! - once finalized, the stats are frozen

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};

use crate::game::player::PlayerId;

/// One entry of the elimination order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeathRecord {
    /// Eliminated player.
    pub player_id: PlayerId,
    /// 1-based elimination position.
    pub death_order: usize,
    /// Wall-clock time of elimination (epoch ms).
    pub death_time: i64,
}

/// Whether a ranked player outlived the match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankStatus {
    /// Never eliminated.
    Survivor,
    /// Eliminated during the match.
    Eliminated,
}

/// Final placement of one player.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ranking {
    /// Ranked player.
    pub player_id: PlayerId,
    /// 1 = best. Survivors tie at 1.
    pub rank: u32,
    /// Kills credited during the match.
    pub kills: u32,
    /// Survivor or eliminated.
    pub status: RankStatus,
    /// Elimination position, if eliminated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub death_order: Option<usize>,
}

/// Serialized stats attached to `game_ended`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSummary {
    /// Match length in ms.
    pub game_duration: u64,
    /// Kills per player.
    pub player_kills: BTreeMap<PlayerId, u32>,
    /// Elimination order.
    pub death_order: Vec<DeathRecord>,
    /// Final rankings.
    pub rankings: Vec<Ranking>,
    /// Coins granted per player.
    pub coins_awarded: BTreeMap<PlayerId, u32>,
}

/// Kill/death bookkeeping for one match.
#[derive(Clone, Debug, Default)]
pub struct GameStats {
    kills: BTreeMap<PlayerId, u32>,
    deaths: Vec<DeathRecord>,
    coins: BTreeMap<PlayerId, u32>,
    started_at_ms: i64,
    ended_at_ms: Option<i64>,
}

impl GameStats {
    /// Create empty stats for a match starting now.
    pub fn new(started_at_ms: i64) -> Self {
        Self {
            started_at_ms,
            ..Default::default()
        }
    }

    /// Clear everything for a new match.
    pub fn reset(&mut self, started_at_ms: i64) {
        *self = Self::new(started_at_ms);
    }

    /// Stats are frozen after `finalize`.
    pub fn is_finalized(&self) -> bool {
        self.ended_at_ms.is_some()
    }

    /// Register a participant with zero kills (no-op if already present).
    pub fn register(&mut self, player: &PlayerId) {
        if self.is_finalized() {
            return;
        }
        self.kills.entry(player.clone()).or_insert(0);
    }

    /// Credit `killer` with eliminating `victim`.
    ///
    /// Returns false (and credits nothing) if the victim was already eliminated.
    pub fn record_kill(&mut self, killer: &PlayerId, victim: &PlayerId, now_ms: i64) -> bool {
        if !self.record_death(victim, now_ms) {
            return false;
        }
        if killer != victim {
            *self.kills.entry(killer.clone()).or_insert(0) += 1;
        }
        true
    }

    /// Record an unattributed elimination. Returns false if already recorded.
    pub fn record_death(&mut self, victim: &PlayerId, now_ms: i64) -> bool {
        if self.is_finalized() || self.is_eliminated(victim) {
            return false;
        }
        self.kills.entry(victim.clone()).or_insert(0);
        self.deaths.push(DeathRecord {
            player_id: victim.clone(),
            death_order: self.deaths.len() + 1,
            death_time: now_ms,
        });
        true
    }

    /// Check if a player is in the elimination list.
    pub fn is_eliminated(&self, player: &PlayerId) -> bool {
        self.deaths.iter().any(|d| &d.player_id == player)
    }

    /// Kills credited to a player.
    pub fn kills(&self, player: &PlayerId) -> u32 {
        self.kills.get(player).copied().unwrap_or(0)
    }

    /// Elimination order so far.
    pub fn deaths(&self) -> &[DeathRecord] {
        &self.deaths
    }

    /// Freeze the stats at match end.
    ///
    /// Every participant gets a kill entry, and any participant that is dead
    /// but somehow missing from the elimination list is appended.
    pub fn finalize<'a, I>(&mut self, participants: I, now_ms: i64)
    where
        I: IntoIterator<Item = (&'a PlayerId, bool)>,
    {
        if self.is_finalized() {
            return;
        }
        for (player, dead) in participants {
            self.register(player);
            if dead {
                self.record_death(player, now_ms);
            }
        }
        self.ended_at_ms = Some(now_ms);
    }

    /// Compute final rankings.
    pub fn rankings(&self) -> Vec<Ranking> {
        let mut survivors: Vec<(&PlayerId, u32)> = self
            .kills
            .iter()
            .filter(|(id, _)| !self.is_eliminated(id))
            .map(|(id, kills)| (id, *kills))
            .collect();
        survivors.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        let survivor_count = survivors.len();
        let mut rankings: Vec<Ranking> = survivors
            .into_iter()
            .map(|(id, kills)| Ranking {
                player_id: id.clone(),
                rank: 1,
                kills,
                status: RankStatus::Survivor,
                death_order: None,
            })
            .collect();

        for (i, death) in self.deaths.iter().rev().enumerate() {
            rankings.push(Ranking {
                player_id: death.player_id.clone(),
                rank: (survivor_count + i + 1) as u32,
                kills: self.kills(&death.player_id),
                status: RankStatus::Eliminated,
                death_order: Some(death.death_order),
            });
        }

        rankings
    }

    /// Attach the coin award for a player.
    pub fn set_coins(&mut self, player: &PlayerId, amount: u32) {
        self.coins.insert(player.clone(), amount);
    }

    /// Match length in ms (up to now if not finalized).
    pub fn duration_ms(&self, now_ms: i64) -> u64 {
        let end = self.ended_at_ms.unwrap_or(now_ms);
        u64::try_from(end - self.started_at_ms).unwrap_or(0)
    }

    /// Serializable summary.
    pub fn summary(&self, now_ms: i64) -> StatsSummary {
        StatsSummary {
            game_duration: self.duration_ms(now_ms),
            player_kills: self.kills.clone(),
            death_order: self.deaths.clone(),
            rankings: self.rankings(),
            coins_awarded: self.coins.clone(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
