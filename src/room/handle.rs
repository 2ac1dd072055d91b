//! Room Handle
//!
//! Shared, clonable access to one room. The state sits behind an async mutex;
//! a dedicated task ticks it at the configured rate until shutdown. Side
//! effects that must not run under the lock (coin awards, teardown) come back
//! from the state as a [`RoomReport`] and are carried out here.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::RoomConfig;
use crate::core::rng::DeterministicRng;
use crate::game::player::PlayerId;
use crate::network::protocol::ClientMessage;
use crate::room::lifecycle::Phase;
use crate::room::messaging::PlayerSink;
use crate::room::registry::SessionTicket;
use crate::room::state::{RoomReport, RoomState};
use crate::room::{JoinRejection, Rejected, RoomDeps};

/// One live room.
pub struct Room {
    map_id: String,
    config: Arc<RoomConfig>,
    deps: RoomDeps,
    state: Mutex<RoomState>,
    /// Cleared once the room stops admitting players.
    accepting: AtomicBool,
    /// Set by the first `shutdown` call.
    stopped: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    tick_task: StdMutex<Option<JoinHandle<()>>>,
}

impl Room {
    /// Create a room and start its tick task.
    pub fn spawn(map_id: impl Into<String>, config: Arc<RoomConfig>, deps: RoomDeps) -> Arc<Self> {
        let map_id = map_id.into();
        let rng = DeterministicRng::for_room(&map_id);
        let state = RoomState::new(map_id.clone(), config.clone(), deps.ledger.clone(), rng);
        let (shutdown_tx, _) = broadcast::channel(1);

        let room = Arc::new(Self {
            map_id,
            config,
            deps,
            state: Mutex::new(state),
            accepting: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            shutdown_tx,
            tick_task: StdMutex::new(None),
        });

        let shutdown_rx = room.shutdown_tx.subscribe();
        let handle = tokio::spawn(run_tick_loop(Arc::downgrade(&room), shutdown_rx, room.config.tick_period()));
        *room.tick_task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        info!(map = %room.map_id, hazard = room.config.is_hazard_map(&room.map_id), "Room created");
        room
    }

    /// Map id.
    pub fn map_id(&self) -> &str {
        &self.map_id
    }

    /// Room no longer admits players.
    pub fn is_shutting_down(&self) -> bool {
        !self.accepting.load(Ordering::SeqCst)
    }

    /// No players connected.
    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.is_empty()
    }

    /// Connected players.
    pub async fn player_count(&self) -> usize {
        self.state.lock().await.player_count()
    }

    /// Current phase.
    pub async fn phase(&self) -> Phase {
        self.state.lock().await.phase()
    }

    /// Run `f` against the locked state.
    pub async fn with_state<R>(&self, f: impl FnOnce(&mut RoomState) -> R) -> R {
        let mut state = self.state.lock().await;
        f(&mut state)
    }

    /// Admit a player. The skin is looked up before the room lock is taken.
    pub async fn connect(&self, player: &PlayerId, sink: Box<dyn PlayerSink>) -> Result<SessionTicket, Rejected> {
        if self.is_shutting_down() {
            return Err(Rejected { reason: JoinRejection::ShuttingDown, sink });
        }
        let skin = self.deps.skins.selected_skin(player).await;

        let mut state = self.state.lock().await;
        if self.is_shutting_down() {
            return Err(Rejected { reason: JoinRejection::ShuttingDown, sink });
        }
        state.connect(player, &skin, sink)
    }

    /// Remove a player's connection.
    pub async fn disconnect(self: &Arc<Self>, player: &PlayerId, ticket: SessionTicket) {
        let report = self.state.lock().await.disconnect(player, ticket, Instant::now());
        self.apply_report(report);
    }

    /// Dispatch one client message.
    pub async fn handle_message(self: &Arc<Self>, player: &PlayerId, ticket: SessionTicket, message: ClientMessage) {
        let report = self.state.lock().await.handle_message(player, ticket, message, Instant::now());
        self.apply_report(report);
    }

    /// Stop admitting players if the room is empty. Atomic with respect to
    /// `connect`, which checks the flag under the same lock.
    pub async fn retire_if_idle(&self) -> bool {
        let state = self.state.lock().await;
        if !state.is_empty() {
            return false;
        }
        self.accepting.store(false, Ordering::SeqCst);
        true
    }

    fn apply_report(self: &Arc<Self>, report: RoomReport) {
        if report.is_idle() {
            return;
        }

        let RoomReport { awards, empty, teardown } = report;
        if !awards.is_empty() {
            let ledger = self.deps.ledger.clone();
            let map = self.map_id.clone();
            tokio::spawn(async move {
                for award in awards {
                    match ledger.award(&award.player, award.amount).await {
                        Ok(total) => info!(
                            map = %map,
                            player = %award.player,
                            rank = award.rank,
                            amount = award.amount,
                            total,
                            "Coins awarded"
                        ),
                        Err(e) => warn!(map = %map, player = %award.player, error = %e, "Coin award failed"),
                    }
                }
            });
        }

        if teardown {
            let room = self.clone();
            tokio::spawn(async move { room.shutdown().await });
        } else if empty {
            let room = self.clone();
            let grace = self.config.empty_room_grace;
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                if room.retire_if_idle().await {
                    info!(map = %room.map_id, "Room empty, shutting down");
                    room.shutdown().await;
                }
            });
        }
    }

    /// Stop the tick task, close every channel and wait (bounded) for the
    /// drain tasks. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(map = %self.map_id, "Shutting down room");
        let _ = self.shutdown_tx.send(());

        let tick = self.tick_task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = tick {
            await_bounded(handle, self.config.shutdown_timeout, &self.map_id, "tick task").await;
        }

        let drains = self.state.lock().await.shutdown_channels();
        for handle in drains {
            await_bounded(handle, self.config.drain_timeout, &self.map_id, "drain task").await;
        }
        info!(map = %self.map_id, "Room shut down");
    }
}

async fn await_bounded(mut handle: JoinHandle<()>, limit: Duration, map: &str, what: &str) {
    match timeout(limit, &mut handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(map = %map, error = %e, "{} ended abnormally", what),
        Err(_) => {
            warn!(map = %map, "{} did not stop in {:?}, aborting", what, limit);
            handle.abort();
        }
    }
}

async fn run_tick_loop(room: Weak<Room>, mut shutdown_rx: broadcast::Receiver<()>, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            now = ticker.tick() => {
                let Some(room) = room.upgrade() else {
                    break;
                };
                let report = {
                    let mut state = room.state.lock().await;
                    match std::panic::catch_unwind(AssertUnwindSafe(|| state.tick(now))) {
                        Ok(report) => report,
                        Err(_) => {
                            error!(map = %room.map_id, "Tick panicked, skipping");
                            RoomReport::default()
                        }
                    }
                };
                room.apply_report(report);
            }
            _ = shutdown_rx.recv() => break,
        }
    }
    debug!("Tick loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::messaging::MemorySink;

    fn id(s: &str) -> PlayerId {
        PlayerId::new(s)
    }

    fn room(map: &str) -> Arc<Room> {
        Room::spawn(map, Arc::new(RoomConfig::default()), RoomDeps::offline())
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_loop_drives_countdown() {
        let room = room("map1");
        let ta = room.connect(&id("a"), MemorySink::new().boxed()).await.unwrap();
        let tb = room.connect(&id("b"), MemorySink::new().boxed()).await.unwrap();
        room.handle_message(&id("a"), ta, ClientMessage::ReadyToggle).await;
        room.handle_message(&id("b"), tb, ClientMessage::ReadyToggle).await;
        assert_eq!(room.phase().await, Phase::Countdown);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(room.phase().await, Phase::Playing);
        room.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_room_shuts_down_after_grace() {
        let room = room("map1");
        let ticket = room.connect(&id("a"), MemorySink::new().boxed()).await.unwrap();
        room.disconnect(&id("a"), ticket).await;
        assert!(!room.is_shutting_down());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(room.is_shutting_down());

        let late = room.connect(&id("b"), MemorySink::new().boxed()).await;
        assert_eq!(late.map_err(|r| r.reason).unwrap_err(), JoinRejection::ShuttingDown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoin_within_grace_keeps_room() {
        let room = room("map1");
        let ticket = room.connect(&id("a"), MemorySink::new().boxed()).await.unwrap();
        room.disconnect(&id("a"), ticket).await;
        room.connect(&id("a"), MemorySink::new().boxed()).await.unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!room.is_shutting_down());
        assert_eq!(room.player_count().await, 1);
        room.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_channels_and_is_idempotent() {
        let room = room("map1");
        let sink = MemorySink::new();
        room.connect(&id("a"), sink.boxed()).await.unwrap();

        tokio::join!(room.shutdown(), room.shutdown());
        room.shutdown().await;

        assert!(sink.is_closed());
        assert!(room.is_empty().await);
        assert!(room.tick_task.lock().unwrap().is_none());
    }
}
