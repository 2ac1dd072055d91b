//! Network Layer
//!
//! Wire protocol, connection identity and the WebSocket endpoint. Rooms never
//! see sockets: the endpoint adapts each connection into a `PlayerSink` and a
//! stream of decoded `ClientMessage`s.

pub mod auth;
pub mod protocol;
pub mod server;

pub use auth::{AuthConfig, AuthError, TokenClaims, VerificationKey, resolve_identity, validate_token};
pub use protocol::{ClientMessage, ServerMessage, DecodeError, PlayerSnapshot, NpcSnapshot};
pub use server::{GameServer, ServerConfig, GameServerError};
