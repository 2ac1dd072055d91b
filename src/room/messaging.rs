//! Per-Player Message Delivery
//!
//! Every connected player gets one bounded FIFO queue and exactly one drain
//! task that owns the player's transport sink. The simulation only ever does a
//! non-blocking `try_send`, so a slow client cannot stall the tick or anybody
//! else's delivery.
//!
//! A player whose queue is full, or whose sink reports an error, is recorded as
//! a delivery failure. The room reaps failures and runs its normal disconnect
//! path for them.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::game::player::PlayerId;
use crate::network::protocol::ServerMessage;
use crate::room::registry::SessionTicket;

// =============================================================================
// SINK ABSTRACTION
// =============================================================================

/// Outbound half of a player's connection.
///
/// Implemented by the WebSocket adapter; tests use [`MemorySink`].
pub trait PlayerSink: Send + 'static {
    /// Deliver one text frame.
    fn send_text(&mut self, text: Arc<str>) -> BoxFuture<'_, Result<(), DeliveryError>>;

    /// Close the connection.
    fn close(&mut self) -> BoxFuture<'_, Result<(), DeliveryError>>;
}

/// Delivery errors.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Connection already closed.
    #[error("channel closed")]
    Closed,

    /// Client is not draining its queue.
    #[error("outbound queue full")]
    QueueFull,

    /// Transport-level failure.
    #[error("transport error: {0}")]
    Transport(String),
}

/// A player whose channel broke, tagged with the session it broke in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    /// Affected player.
    pub player: PlayerId,
    /// Session the failure belongs to.
    pub ticket: SessionTicket,
}

#[derive(Debug, Clone)]
enum Frame {
    Text(Arc<str>),
    Close,
}

struct Outbox {
    ticket: SessionTicket,
    tx: mpsc::Sender<Frame>,
    worker: JoinHandle<()>,
}

// =============================================================================
// MESSAGING
// =============================================================================

/// Ordered, non-blocking fan-out to the players of one room.
pub struct Messaging {
    outboxes: BTreeMap<PlayerId, Outbox>,
    capacity: usize,
    failed: Vec<DeliveryFailure>,
    failures_tx: mpsc::UnboundedSender<DeliveryFailure>,
    failures_rx: mpsc::UnboundedReceiver<DeliveryFailure>,
    retired: Vec<JoinHandle<()>>,
}

impl Messaging {
    /// Create with the given per-player queue capacity.
    pub fn new(capacity: usize) -> Self {
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        Self {
            outboxes: BTreeMap::new(),
            capacity: capacity.max(1),
            failed: Vec::new(),
            failures_tx,
            failures_rx,
            retired: Vec::new(),
        }
    }

    /// Attach a player's sink and start its drain task.
    ///
    /// An existing channel for the same player is closed first, so the old
    /// and new connection never both receive.
    pub fn register(&mut self, player: &PlayerId, ticket: SessionTicket, sink: Box<dyn PlayerSink>) {
        self.close(player);

        let (tx, rx) = mpsc::channel(self.capacity);
        let worker = tokio::spawn(drain(player.clone(), ticket, sink, rx, self.failures_tx.clone()));
        self.outboxes.insert(player.clone(), Outbox { ticket, tx, worker });
    }

    /// Player currently has a live channel.
    pub fn is_registered(&self, player: &PlayerId) -> bool {
        self.outboxes.contains_key(player)
    }

    /// Number of live channels.
    pub fn len(&self) -> usize {
        self.outboxes.len()
    }

    /// No live channels.
    pub fn is_empty(&self) -> bool {
        self.outboxes.is_empty()
    }

    /// Queue a message for one player.
    pub fn send(&mut self, player: &PlayerId, message: &ServerMessage) -> bool {
        let Some(text) = encode(message) else {
            return false;
        };
        let Some(outbox) = self.outboxes.get(player) else {
            return false;
        };
        enqueue(player, outbox, Frame::Text(text), &mut self.failed)
    }

    /// Queue a message for every player.
    pub fn broadcast(&mut self, message: &ServerMessage) {
        self.fan_out(message, None);
    }

    /// Queue a message for every player but one.
    pub fn broadcast_except(&mut self, message: &ServerMessage, excluded: &PlayerId) {
        self.fan_out(message, Some(excluded));
    }

    fn fan_out(&mut self, message: &ServerMessage, excluded: Option<&PlayerId>) {
        let Some(text) = encode(message) else {
            return;
        };
        for (player, outbox) in &self.outboxes {
            if Some(player) == excluded {
                continue;
            }
            enqueue(player, outbox, Frame::Text(text.clone()), &mut self.failed);
        }
    }

    /// Close a player's channel after everything already queued for it.
    pub fn close(&mut self, player: &PlayerId) {
        if let Some(outbox) = self.outboxes.remove(player) {
            self.retire(outbox);
        }
    }

    fn retire(&mut self, outbox: Outbox) {
        // A full queue cannot take the close frame; dropping the sender ends
        // the drain loop once the backlog is flushed.
        let _ = outbox.tx.try_send(Frame::Close);
        self.retired.retain(|h| !h.is_finished());
        self.retired.push(outbox.worker);
    }

    /// Collect delivery failures recorded since the last call.
    pub fn take_failures(&mut self) -> Vec<DeliveryFailure> {
        let mut failures = std::mem::take(&mut self.failed);
        while let Ok(failure) = self.failures_rx.try_recv() {
            if !failures.contains(&failure) {
                failures.push(failure);
            }
        }
        failures
    }

    /// Ticket of a player's live channel.
    pub fn ticket(&self, player: &PlayerId) -> Option<SessionTicket> {
        self.outboxes.get(player).map(|o| o.ticket)
    }

    /// Close every channel. Returns the drain tasks so the caller can wait
    /// for them outside the room lock.
    pub fn shutdown(&mut self) -> Vec<JoinHandle<()>> {
        let players: Vec<PlayerId> = self.outboxes.keys().cloned().collect();
        for player in &players {
            self.close(player);
        }
        std::mem::take(&mut self.retired)
    }
}

fn encode(message: &ServerMessage) -> Option<Arc<str>> {
    match message.to_json() {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            error!("Failed to serialize message: {}", e);
            None
        }
    }
}

fn enqueue(player: &PlayerId, outbox: &Outbox, frame: Frame, failed: &mut Vec<DeliveryFailure>) -> bool {
    let error = match outbox.tx.try_send(frame) {
        Ok(()) => return true,
        Err(TrySendError::Full(_)) => DeliveryError::QueueFull,
        Err(TrySendError::Closed(_)) => DeliveryError::Closed,
    };

    let failure = DeliveryFailure {
        player: player.clone(),
        ticket: outbox.ticket,
    };
    if !failed.contains(&failure) {
        warn!(player = %player, error = %error, "Dropping player channel");
        failed.push(failure);
    }
    false
}

async fn drain(
    player: PlayerId,
    ticket: SessionTicket,
    mut sink: Box<dyn PlayerSink>,
    mut rx: mpsc::Receiver<Frame>,
    failures: mpsc::UnboundedSender<DeliveryFailure>,
) {
    while let Some(frame) = rx.recv().await {
        match frame {
            Frame::Text(text) => {
                #[cfg(feature = "debug-tracing")]
                debug!(player = %player, bytes = text.len(), "Delivering frame");

                if let Err(e) = sink.send_text(text).await {
                    debug!(player = %player, error = %e, "Delivery failed");
                    let _ = failures.send(DeliveryFailure { player, ticket });
                    return;
                }
            }
            Frame::Close => break,
        }
    }

    if let Err(e) = sink.close().await {
        debug!(player = %player, error = %e, "Close failed");
    }
}

// =============================================================================
// IN-MEMORY SINK
// =============================================================================

#[derive(Debug, Default)]
struct MemorySinkState {
    frames: Vec<String>,
    closed: bool,
    failing: bool,
}

/// Sink that records frames in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemorySinkState>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Boxed clone to hand to a room.
    pub fn boxed(&self) -> Box<dyn PlayerSink> {
        Box::new(self.clone())
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MemorySinkState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Raw delivered frames.
    pub fn texts(&self) -> Vec<String> {
        self.with_state(|s| s.frames.clone())
    }

    /// Delivered frames decoded as server messages.
    pub fn messages(&self) -> Vec<ServerMessage> {
        self.texts()
            .iter()
            .filter_map(|t| ServerMessage::from_json(t).ok())
            .collect()
    }

    /// The `type` field of each delivered frame.
    pub fn types(&self) -> Vec<String> {
        self.texts()
            .iter()
            .filter_map(|t| serde_json::from_str::<serde_json::Value>(t).ok())
            .filter_map(|v| v.get("type").and_then(|t| t.as_str()).map(str::to_owned))
            .collect()
    }

    /// Forget delivered frames.
    pub fn clear(&self) {
        self.with_state(|s| s.frames.clear());
    }

    /// `close` was called.
    pub fn is_closed(&self) -> bool {
        self.with_state(|s| s.closed)
    }

    /// Make every subsequent send fail.
    pub fn set_failing(&self, failing: bool) {
        self.with_state(|s| s.failing = failing);
    }
}

impl PlayerSink for MemorySink {
    fn send_text(&mut self, text: Arc<str>) -> BoxFuture<'_, Result<(), DeliveryError>> {
        let result = self.with_state(|s| {
            if s.failing {
                Err(DeliveryError::Transport("sink failing".into()))
            } else if s.closed {
                Err(DeliveryError::Closed)
            } else {
                s.frames.push(text.to_string());
                Ok(())
            }
        });
        Box::pin(async move { result })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<(), DeliveryError>> {
        self.with_state(|s| s.closed = true);
        Box::pin(async { Ok(()) })
    }
}

// =============================================================================
// TESTS
// =============================================================================
