//! Data provider ports consumed by the scorer.
//!
//! Each provider may fail; the scorer treats any error as unavailable data
//! and falls back to a neutral sub-score.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Provider timed out")]
    Timeout,

    #[error("Unknown subject: {0}")]
    NotFound(String),
}

/// Decay status as reported by the wallet profiling side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecayStatus {
    Ok,
    Flagged,
    Downgraded,
    Dormant,
}

impl Default for DecayStatus {
    fn default() -> Self {
        DecayStatus::Ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WalletQuality {
    /// Quality score in [0, 1]
    pub score: f64,
    #[serde(default)]
    pub decay_status: DecayStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenCharacteristics {
    pub liquidity_usd: f64,
    pub age_hours: f64,
    pub market_cap_usd: f64,
    /// Share of supply held by the ten largest holders, in percent
    pub top10_holder_pct: f64,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WalletQualityProvider: Send + Sync {
    async fn get(&self, wallet_id: &str) -> Result<WalletQuality, ProviderError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenCharacteristicsProvider: Send + Sync {
    async fn get(&self, token_mint: &str) -> Result<TokenCharacteristics, ProviderError>;
}

/// Number of other watchlisted wallets active on the same token
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterConfirmation: Send + Sync {
    async fn get(&self, wallet_id: &str, token_mint: &str) -> Result<u32, ProviderError>;
}

/// Cluster confirmation switched off: always zero
#[derive(Debug, Clone, Copy, Default)]
pub struct NoClusterConfirmation;

#[async_trait]
impl ClusterConfirmation for NoClusterConfirmation {
    async fn get(&self, _wallet_id: &str, _token_mint: &str) -> Result<u32, ProviderError> {
        Ok(0)
    }
}
