//! Arena Room Server
//!
//! Binds the WebSocket endpoint and serves rooms until Ctrl-C.

use std::sync::Arc;
use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use arena_room::{
    VERSION, TICK_RATE,
    config::{RoomConfig, ServiceConfig},
    network::{AuthConfig, GameServer, ServerConfig},
    room::{RoomDeps, RoomDirectory},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    let server_config = ServerConfig::from_env();
    let room_config = Arc::new(RoomConfig::from_env());
    let services = ServiceConfig::from_env();
    let auth = AuthConfig::from_env();

    info!("Arena Room Server v{}", VERSION);
    info!("Tick Rate: {} Hz (configured {})", TICK_RATE, room_config.tick_rate);
    info!("Match Duration: {} seconds", room_config.match_duration.as_secs());
    info!("Hazard maps: {:?}", room_config.hazard_maps);
    info!("Shop service: {}, wallet service: {}", services.shop_url, services.wallet_url);
    if !auth.is_configured() {
        warn!("No AUTH_SECRET or AUTH_PUBLIC_KEY_PEM set; tokens are trusted as player ids");
    }

    let deps = RoomDeps::http(&services).context("failed to build collaborator clients")?;
    let directory = Arc::new(RoomDirectory::new(room_config, deps));
    let server = GameServer::new(server_config, auth, directory);

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
            let _ = shutdown.send(());
        }
    });

    server.run().await?;
    Ok(())
}
