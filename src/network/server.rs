//! WebSocket Game Server
//!
//! Accepts WebSocket upgrades on `/game?token=...&map=...`, resolves the
//! player identity and hands the connection to the room directory. Each
//! connection's outbound half becomes the player's [`PlayerSink`]; the
//! inbound half is read here and dispatched to the room.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use futures_util::future::BoxFuture;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::{debug, error, info, instrument, warn};

use crate::config::env_or;
use crate::game::player::PlayerId;
use crate::network::auth::{resolve_identity, AuthConfig};
use crate::network::protocol::{ClientMessage, DecodeError, ServerMessage};
use crate::room::messaging::{DeliveryError, PlayerSink};
use crate::room::{Rejected, Room, RoomDirectory, SessionTicket};

/// Upgrade path.
pub const GAME_PATH: &str = "/game";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            bind_addr: env_or("ARENA_BIND_ADDR", d.bind_addr),
            max_connections: env_or("ARENA_MAX_CONNECTIONS", d.max_connections),
            ..d
        }
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Connection parameters from the upgrade URI.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ConnectParams {
    /// `token` parameter.
    pub token: Option<String>,
    /// `map` parameter.
    pub map: Option<String>,
}

/// Parse `token` and `map` (percent-decoded) from a query string.
pub fn parse_query(query: &str) -> ConnectParams {
    let mut params = ConnectParams::default();
    let Ok(url) = reqwest::Url::parse(&format!("ws://localhost{}?{}", GAME_PATH, query)) else {
        return params;
    };
    for (key, value) in url.query_pairs() {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match key.as_ref() {
            "token" => params.token = Some(value.to_string()),
            "map" => params.map = Some(value.to_string()),
            _ => {}
        }
    }
    params
}

type WsStream = WebSocketStream<TcpStream>;

/// Outbound half of a WebSocket connection.
struct WsSink {
    inner: SplitSink<WsStream, Message>,
}

impl PlayerSink for WsSink {
    fn send_text(&mut self, text: Arc<str>) -> BoxFuture<'_, Result<(), DeliveryError>> {
        Box::pin(async move {
            self.inner
                .send(Message::Text(text.to_string()))
                .await
                .map_err(|e| DeliveryError::Transport(e.to_string()))
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<(), DeliveryError>> {
        Box::pin(async move {
            self.inner
                .close()
                .await
                .map_err(|e| DeliveryError::Transport(e.to_string()))
        })
    }
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Identity resolution.
    auth: Arc<AuthConfig>,
    /// Rooms.
    directory: Arc<RoomDirectory>,
    /// Open connections.
    connections: Arc<AtomicUsize>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig, auth: AuthConfig, directory: Arc<RoomDirectory>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            auth: Arc::new(auth),
            directory,
            connections: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    /// Room directory.
    pub fn directory(&self) -> &Arc<RoomDirectory> {
        &self.directory
    }

    /// Open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Sender that stops the server when signalled.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Bind and run the server until shutdown.
    #[instrument(skip(self), fields(addr = %self.config.bind_addr))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        info!("Game server v{} listening on {}", self.config.version, self.config.bind_addr);
        self.serve(listener).await
    }

    /// Run the accept loop on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        let cleanup_handle = self.directory.spawn_cleanup(self.shutdown_tx.subscribe());
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.connection_count() >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }
                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        if let Err(e) = cleanup_handle.await {
            warn!("Cleanup task ended abnormally: {}", e);
        }
        self.directory.shutdown_all().await;
        info!("Game server stopped");
        Ok(())
    }

    /// Handle a new connection on its own task.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let auth = self.auth.clone();
        let directory = self.directory.clone();
        let connections = self.connections.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();

        connections.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            if let Err(e) = serve_client(stream, addr, &auth, &directory, shutdown_rx).await {
                debug!("Connection {} ended with error: {}", addr, e);
            }
            connections.fetch_sub(1, Ordering::SeqCst);
        });
    }
}

async fn serve_client(
    stream: TcpStream,
    addr: SocketAddr,
    auth: &AuthConfig,
    directory: &RoomDirectory,
    shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), GameServerError> {
    let mut query = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        if request.uri().path() != GAME_PATH {
            let mut not_found = ErrorResponse::new(Some("not found".to_string()));
            *not_found.status_mut() = StatusCode::NOT_FOUND;
            return Err(not_found);
        }
        query = request.uri().query().map(str::to_owned);
        Ok(response)
    };
    let ws = accept_hdr_async(stream, callback).await?;
    let (ws_tx, ws_rx) = ws.split();
    let mut sink = WsSink { inner: ws_tx };

    let params = parse_query(query.as_deref().unwrap_or_default());
    let (Some(token), Some(map_id)) = (params.token, params.map) else {
        warn!("Connection {} missing token or map, closing", addr);
        let _ = sink.close().await;
        return Ok(());
    };

    let player = match resolve_identity(&token, auth) {
        Ok(player) => player,
        Err(e) => {
            warn!("Connection {} failed identity check: {}", addr, e);
            let _ = sink.close().await;
            return Ok(());
        }
    };

    let (room, ticket) = match directory.connect(&map_id, &player, Box::new(sink)).await {
        Ok(joined) => joined,
        Err(rejected) => {
            notify_rejected(rejected, directory.config().max_players, &player).await;
            return Ok(());
        }
    };

    info!(map = %map_id, player = %player, ticket = %ticket, "Connected {}", addr);
    read_loop(&room, &player, ticket, ws_rx, shutdown_rx).await;
    room.disconnect(&player, ticket).await;
    Ok(())
}

async fn notify_rejected(rejected: Rejected, max_players: usize, player: &PlayerId) {
    let Rejected { reason, mut sink } = rejected;
    info!(player = %player, reason = reason.reason_code(), "Connection rejected");

    let failed = ServerMessage::ConnectionFailed {
        reason: reason.reason_code().to_string(),
        message: reason.user_message(max_players),
    };
    match failed.to_json() {
        Ok(text) => {
            let _ = sink.send_text(Arc::from(text)).await;
        }
        Err(e) => error!("Failed to serialize message: {}", e),
    }
    let _ = sink.close().await;
}

async fn read_loop(
    room: &Arc<Room>,
    player: &PlayerId,
    ticket: SessionTicket,
    mut ws_rx: SplitStream<WsStream>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => match ClientMessage::from_json(&text) {
                        Ok(message) => room.handle_message(player, ticket, message).await,
                        Err(DecodeError::UnknownType(kind)) => {
                            warn!(player = %player, kind = %kind, "Unknown message type");
                        }
                        Err(e) => {
                            debug!(player = %player, error = %e, "Dropping malformed message");
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    // Binary frames are ignored; ping/pong is handled by tungstenite
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(player = %player, error = %e, "Read error");
                        break;
                    }
                }
            }
            _ = shutdown_rx.recv() => break,
        }
    }
}
