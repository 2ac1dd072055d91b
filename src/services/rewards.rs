//! Coin rewards.
//!
//! Rank 1 to 4 earn 100, 75, 50 and 25 coins. Awards are applied once per
//! match, after the room has already announced the result.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::game::player::PlayerId;
use crate::services::{endpoint, CollaboratorError};

/// Coins for a final rank.
pub fn default_reward_for_rank(rank: u32) -> u32 {
    match rank {
        1 => 100,
        2 => 75,
        3 => 50,
        4 => 25,
        _ => 0,
    }
}

/// Rank reward lookup plus award application.
pub trait CoinLedger: Send + Sync {
    /// Coins for a final rank.
    fn reward_for_rank(&self, rank: u32) -> u32 {
        default_reward_for_rank(rank)
    }

    /// Credit `amount` coins. Returns the player's new total.
    fn award<'a>(&'a self, player: &'a PlayerId, amount: u32) -> BoxFuture<'a, Result<u64, CollaboratorError>>;
}

/// Ledger kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    balances: Mutex<BTreeMap<PlayerId, u64>>,
}

impl InMemoryLedger {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current balance.
    pub fn balance(&self, player: &PlayerId) -> u64 {
        let balances = self.balances.lock().unwrap_or_else(PoisonError::into_inner);
        balances.get(player).copied().unwrap_or(0)
    }
}

impl CoinLedger for InMemoryLedger {
    fn award<'a>(&'a self, player: &'a PlayerId, amount: u32) -> BoxFuture<'a, Result<u64, CollaboratorError>> {
        let total = {
            let mut balances = self.balances.lock().unwrap_or_else(PoisonError::into_inner);
            let balance = balances.entry(player.clone()).or_insert(0);
            *balance += u64::from(amount);
            *balance
        };
        Box::pin(async move { Ok(total) })
    }
}

#[derive(Debug, Serialize)]
struct AddCoinsRequest<'a> {
    username: &'a str,
    amount: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddCoinsResponse {
    #[serde(default)]
    total_coins: Option<u64>,
}

/// Wallet-service client: `POST {base}/api/wallet/{player}/add-coins`.
#[derive(Debug, Clone)]
pub struct HttpCoinLedger {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCoinLedger {
    /// Build a client with a per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, CollaboratorError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

impl CoinLedger for HttpCoinLedger {
    fn award<'a>(&'a self, player: &'a PlayerId, amount: u32) -> BoxFuture<'a, Result<u64, CollaboratorError>> {
        Box::pin(async move {
            let url = endpoint(&self.base_url, &["api", "wallet", player.as_str(), "add-coins"])?;
            let response = self
                .client
                .post(url)
                .json(&AddCoinsRequest { username: player.as_str(), amount })
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(CollaboratorError::Status(response.status().as_u16()));
            }
            let body: AddCoinsResponse = response.json().await?;
            body.total_coins.ok_or(CollaboratorError::MissingField("totalCoins"))
        })
    }
}
