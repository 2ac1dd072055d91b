//! External Collaborators
//!
//! Skin lookup and coin ledger used by rooms. Both sit behind traits so rooms
//! never depend on HTTP directly; the HTTP clients degrade to defaults on any
//! failure and never block a match.

pub mod skins;
pub mod rewards;

use thiserror::Error;

pub use skins::{HttpSkinCatalog, SkinCatalog, StaticSkins, DEFAULT_SKIN};
pub use rewards::{default_reward_for_rank, CoinLedger, HttpCoinLedger, InMemoryLedger};

/// Collaborator call errors.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// Transport or body decoding failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx response.
    #[error("unexpected status {0}")]
    Status(u16),

    /// Response lacked a required field.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// Base URL cannot carry a path.
    #[error("invalid service url: {0}")]
    InvalidUrl(String),
}

/// Append path segments (percent-encoded) to a service base URL.
pub(crate) fn endpoint(base: &str, segments: &[&str]) -> Result<reqwest::Url, CollaboratorError> {
    let mut url = reqwest::Url::parse(base).map_err(|e| CollaboratorError::InvalidUrl(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| CollaboratorError::InvalidUrl(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
