//! Skin lookup.

use std::collections::BTreeMap;
use std::time::Duration;
use futures_util::future::BoxFuture;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::game::player::PlayerId;
use crate::services::{endpoint, CollaboratorError};

/// Skin used whenever no preference can be found.
pub const DEFAULT_SKIN: &str = "player_0";

/// Resolves a player's selected cosmetic skin.
///
/// Never fails: implementations fall back to [`DEFAULT_SKIN`].
pub trait SkinCatalog: Send + Sync {
    /// Selected skin for `player`.
    fn selected_skin<'a>(&'a self, player: &'a PlayerId) -> BoxFuture<'a, String>;
}

/// Fixed skin table, for tests and offline runs.
#[derive(Debug, Clone, Default)]
pub struct StaticSkins {
    skins: BTreeMap<PlayerId, String>,
}

impl StaticSkins {
    /// Everyone gets the default skin.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a skin to a player.
    pub fn with(mut self, player: impl Into<PlayerId>, skin: impl Into<String>) -> Self {
        self.skins.insert(player.into(), skin.into());
        self
    }
}

impl SkinCatalog for StaticSkins {
    fn selected_skin<'a>(&'a self, player: &'a PlayerId) -> BoxFuture<'a, String> {
        let skin = self
            .skins
            .get(player)
            .cloned()
            .unwrap_or_else(|| DEFAULT_SKIN.to_string());
        Box::pin(async move { skin })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SkinPreference {
    #[serde(default)]
    selected_skin: Option<String>,
}

/// Shop-service client: `GET {base}/api/shop/preferences/{player}`.
#[derive(Debug, Clone)]
pub struct HttpSkinCatalog {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSkinCatalog {
    /// Build a client with a per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, CollaboratorError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Fetch the preference, surfacing every failure.
    pub async fn fetch(&self, player: &PlayerId) -> Result<String, CollaboratorError> {
        let url = endpoint(&self.base_url, &["api", "shop", "preferences", player.as_str()])?;
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(CollaboratorError::Status(response.status().as_u16()));
        }
        let preference: SkinPreference = response.json().await?;
        preference
            .selected_skin
            .filter(|s| !s.is_empty())
            .ok_or(CollaboratorError::MissingField("selectedSkin"))
    }
}

impl SkinCatalog for HttpSkinCatalog {
    fn selected_skin<'a>(&'a self, player: &'a PlayerId) -> BoxFuture<'a, String> {
        Box::pin(async move {
            match self.fetch(player).await {
                Ok(skin) => {
                    debug!(player = %player, skin = %skin, "Resolved skin");
                    skin
                }
                Err(e) => {
                    warn!(player = %player, error = %e, "Skin lookup failed, using default");
                    DEFAULT_SKIN.to_string()
                }
            }
        })
    }
}
