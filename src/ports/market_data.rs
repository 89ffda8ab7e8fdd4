use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Market data error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarketDataError {
    #[error("Subscription error: {0}")]
    SubscriptionError(String),

    #[error("No price known for {0}")]
    NoPrice(String),

    #[error("Feed closed")]
    Closed,
}

/// One observed price for a token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    pub token_mint: String,
    pub price: f64,
    pub observed_at: DateTime<Utc>,
}

/// Price feed port
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Subscribe to real-time prices for one token
    async fn subscribe(&self, token_mint: &str) -> Result<mpsc::Receiver<PriceTick>, MarketDataError>;

    /// Latest known price, used to price entries and exits at settlement
    async fn latest(&self, token_mint: &str) -> Result<f64, MarketDataError>;
}
