//! Room Directory
//!
//! Map id to room. Rooms are created on first connect and replaced when the
//! previous instance is shutting down; a periodic sweep removes idle rooms.

use std::collections::BTreeMap;
use std::sync::Arc;
use futures_util::future::join_all;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info};

use crate::config::RoomConfig;
use crate::game::player::PlayerId;
use crate::room::handle::Room;
use crate::room::messaging::PlayerSink;
use crate::room::registry::SessionTicket;
use crate::room::{JoinRejection, Rejected, RoomDeps};

/// All live rooms, keyed by map id.
pub struct RoomDirectory {
    rooms: Mutex<BTreeMap<String, Arc<Room>>>,
    config: Arc<RoomConfig>,
    deps: RoomDeps,
}

impl RoomDirectory {
    /// Create an empty directory.
    pub fn new(config: Arc<RoomConfig>, deps: RoomDeps) -> Self {
        Self {
            rooms: Mutex::new(BTreeMap::new()),
            config,
            deps,
        }
    }

    /// Room for a map, creating (or replacing a retiring) one.
    ///
    /// Creation happens under the directory lock, so concurrent first
    /// connects to the same map share one room.
    async fn room_for(&self, map_id: &str) -> Arc<Room> {
        let mut rooms = self.rooms.lock().await;
        if let Some(room) = rooms.get(map_id) {
            if !room.is_shutting_down() {
                return room.clone();
            }
            debug!(map = %map_id, "Replacing retiring room");
        }
        let room = Room::spawn(map_id, self.config.clone(), self.deps.clone());
        rooms.insert(map_id.to_string(), room.clone());
        room
    }

    /// Connect a player to the room for `map_id`.
    ///
    /// A room that starts retiring between lookup and admission is replaced
    /// once and the connect retried.
    pub async fn connect(
        &self,
        map_id: &str,
        player: &PlayerId,
        sink: Box<dyn PlayerSink>,
    ) -> Result<(Arc<Room>, SessionTicket), Rejected> {
        let room = self.room_for(map_id).await;
        match room.connect(player, sink).await {
            Ok(ticket) => Ok((room, ticket)),
            Err(Rejected { reason: JoinRejection::ShuttingDown, sink }) => {
                debug!(map = %map_id, player = %player, "Room retired during connect, retrying");
                let room = self.room_for(map_id).await;
                let ticket = room.connect(player, sink).await?;
                Ok((room, ticket))
            }
            Err(rejected) => Err(rejected),
        }
    }

    /// Room tuning shared by every room.
    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    /// Live room for a map, if any.
    pub async fn room(&self, map_id: &str) -> Option<Arc<Room>> {
        self.rooms.lock().await.get(map_id).cloned()
    }

    /// Number of rooms in the directory.
    pub async fn room_count(&self) -> usize {
        self.rooms.lock().await.len()
    }

    /// Remove empty and retiring rooms. Returns how many were removed.
    pub async fn cleanup(&self) -> usize {
        let removed: Vec<Arc<Room>> = {
            let mut rooms = self.rooms.lock().await;
            let mut idle = Vec::new();
            for (map_id, room) in rooms.iter() {
                if room.is_shutting_down() || room.retire_if_idle().await {
                    idle.push(map_id.clone());
                }
            }
            idle.iter().filter_map(|map_id| rooms.remove(map_id)).collect()
        };

        let count = removed.len();
        join_all(removed.iter().map(|room| room.shutdown())).await;
        if count > 0 {
            info!(removed = count, "Cleaned up idle rooms");
        }
        count
    }

    /// Run `cleanup` every `cleanup_interval` until shutdown.
    pub fn spawn_cleanup(self: &Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let directory = self.clone();
        let period = self.config.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = interval(period);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        directory.cleanup().await;
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        })
    }

    /// Shut down every room.
    pub async fn shutdown_all(&self) {
        let rooms: Vec<Arc<Room>> = {
            let mut rooms = self.rooms.lock().await;
            std::mem::take(&mut *rooms).into_values().collect()
        };
        info!(rooms = rooms.len(), "Shutting down all rooms");
        join_all(rooms.iter().map(|room| room.shutdown())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::messaging::MemorySink;

    fn id(s: &str) -> PlayerId {
        PlayerId::new(s)
    }

    fn directory() -> RoomDirectory {
        RoomDirectory::new(Arc::new(RoomConfig::default()), RoomDeps::offline())
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_first_connects_share_room() {
        let dir = directory();
        let (pa, pb) = (id("a"), id("b"));
        let (a, b) = tokio::join!(
            dir.connect("map1", &pa, MemorySink::new().boxed()),
            dir.connect("map1", &pb, MemorySink::new().boxed()),
        );
        let (room_a, _) = a.unwrap();
        let (room_b, _) = b.unwrap();

        assert!(Arc::ptr_eq(&room_a, &room_b));
        assert_eq!(dir.room_count().await, 1);
        assert_eq!(room_a.player_count().await, 2);
        dir.shutdown_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retiring_room_is_replaced() {
        let dir = directory();
        let (first, _) = dir.connect("map1", &id("a"), MemorySink::new().boxed()).await.unwrap();
        first.shutdown().await;

        let (second, _) = dir.connect("map1", &id("b"), MemorySink::new().boxed()).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(dir.room_count().await, 1);
        dir.shutdown_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_room_rejection_passes_through() {
        let dir = directory();
        for who in ["a", "b", "c", "d"] {
            dir.connect("map1", &id(who), MemorySink::new().boxed()).await.unwrap();
        }
        let fifth = dir.connect("map1", &id("e"), MemorySink::new().boxed()).await;
        assert_eq!(fifth.map(|_| ()).map_err(|r| r.reason), Err(JoinRejection::RoomFull));
        dir.shutdown_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_removes_only_idle_rooms() {
        let dir = directory();
        let (idle, ticket) = dir.connect("map1", &id("a"), MemorySink::new().boxed()).await.unwrap();
        dir.connect("map2", &id("b"), MemorySink::new().boxed()).await.unwrap();
        idle.disconnect(&id("a"), ticket).await;

        assert_eq!(dir.cleanup().await, 1);
        assert!(dir.room("map1").await.is_none());
        assert!(dir.room("map2").await.is_some());
        assert!(idle.is_shutting_down());
        dir.shutdown_all().await;
    }
}
