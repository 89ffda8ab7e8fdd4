//! In-memory port implementations
//!
//! Backing stores for replay runs and integration tests. Everything here is
//! set explicitly by the caller; nothing talks to the network.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::application::settlement::apply_slippage;
use crate::domain::order::Order;
use crate::ports::alerts::{AlertSink, OperatorAlert};
use crate::ports::execution::{ExecutionClient, ExecutionError, Fill};
use crate::ports::market_data::{MarketDataError, PriceFeed, PriceTick};
use crate::ports::providers::{
    ClusterConfirmation, ProviderError, TokenCharacteristics, TokenCharacteristicsProvider,
    WalletQuality, WalletQualityProvider,
};

const SUBSCRIBER_BUFFER: usize = 1024;

/// Wallet quality by wallet id; unknown wallets are unavailable
#[derive(Debug, Default)]
pub struct InMemoryWalletQuality {
    wallets: RwLock<HashMap<String, WalletQuality>>,
}

impl InMemoryWalletQuality {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, wallet_id: &str, quality: WalletQuality) {
        self.wallets.write().await.insert(wallet_id.to_string(), quality);
    }

    pub async fn remove(&self, wallet_id: &str) {
        self.wallets.write().await.remove(wallet_id);
    }
}

#[async_trait]
impl WalletQualityProvider for InMemoryWalletQuality {
    async fn get(&self, wallet_id: &str) -> Result<WalletQuality, ProviderError> {
        self.wallets
            .read()
            .await
            .get(wallet_id)
            .copied()
            .ok_or_else(|| ProviderError::DataUnavailable(format!("no quality for {}", wallet_id)))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTokenData {
    tokens: RwLock<HashMap<String, TokenCharacteristics>>,
}

impl InMemoryTokenData {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, token_mint: &str, data: TokenCharacteristics) {
        self.tokens.write().await.insert(token_mint.to_string(), data);
    }
}

#[async_trait]
impl TokenCharacteristicsProvider for InMemoryTokenData {
    async fn get(&self, token_mint: &str) -> Result<TokenCharacteristics, ProviderError> {
        self.tokens
            .read()
            .await
            .get(token_mint)
            .copied()
            .ok_or_else(|| ProviderError::DataUnavailable(format!("no data for {}", token_mint)))
    }
}

/// Cluster counts per token; missing tokens count zero
#[derive(Debug, Default)]
pub struct InMemoryCluster {
    counts: RwLock<HashMap<String, u32>>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, token_mint: &str, count: u32) {
        self.counts.write().await.insert(token_mint.to_string(), count);
    }
}

#[async_trait]
impl ClusterConfirmation for InMemoryCluster {
    async fn get(&self, _wallet_id: &str, token_mint: &str) -> Result<u32, ProviderError> {
        Ok(self.counts.read().await.get(token_mint).copied().unwrap_or(0))
    }
}

/// Latest prices plus fan-out to subscribers
#[derive(Debug, Default)]
pub struct BroadcastPriceFeed {
    latest: RwLock<HashMap<String, f64>>,
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<PriceTick>>>>,
}

impl BroadcastPriceFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the latest price without notifying subscribers
    pub async fn set_price(&self, token_mint: &str, price: f64) {
        self.latest.write().await.insert(token_mint.to_string(), price);
    }

    /// Record a tick and deliver it to live subscribers
    pub async fn publish(&self, tick: PriceTick) {
        self.set_price(&tick.token_mint, tick.price).await;

        let mut subscribers = self.subscribers.lock().await;
        if let Some(senders) = subscribers.get_mut(&tick.token_mint) {
            let mut live = Vec::with_capacity(senders.len());
            for sender in senders.drain(..) {
                if sender.send(tick.clone()).await.is_ok() {
                    live.push(sender);
                }
            }
            *senders = live;
        }
    }
}

#[async_trait]
impl PriceFeed for BroadcastPriceFeed {
    async fn subscribe(&self, token_mint: &str) -> Result<mpsc::Receiver<PriceTick>, MarketDataError> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.subscribers
            .lock()
            .await
            .entry(token_mint.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }

    async fn latest(&self, token_mint: &str) -> Result<f64, MarketDataError> {
        self.latest
            .read()
            .await
            .get(token_mint)
            .copied()
            .ok_or_else(|| MarketDataError::NoPrice(token_mint.to_string()))
    }
}

/// Execution client that fills at the order's target price (plus slippage)
/// unless told to fail
#[derive(Debug, Default)]
pub struct ScriptedExecution {
    slippage_bps: u32,
    failures_left: Mutex<u32>,
    submissions: Mutex<Vec<Order>>,
}

impl ScriptedExecution {
    pub fn new(slippage_bps: u32) -> Self {
        Self {
            slippage_bps,
            ..Self::default()
        }
    }

    /// Fail the next `n` submissions
    pub async fn fail_next(&self, n: u32) {
        *self.failures_left.lock().await = n;
    }

    pub async fn submissions(&self) -> Vec<Order> {
        self.submissions.lock().await.clone()
    }
}

#[async_trait]
impl ExecutionClient for ScriptedExecution {
    async fn submit(&self, order: &Order) -> Result<Fill, ExecutionError> {
        self.submissions.lock().await.push(order.clone());

        let mut failures = self.failures_left.lock().await;
        if *failures > 0 {
            *failures -= 1;
            return Err(ExecutionError::ApiError("scripted failure".to_string()));
        }

        Ok(Fill {
            price: apply_slippage(order.target_price, self.slippage_bps, order.is_buy()),
            filled_at: Utc::now(),
        })
    }
}

/// Keeps every alert for inspection
#[derive(Debug, Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<OperatorAlert>>,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn alerts(&self) -> Vec<OperatorAlert> {
        self.alerts.lock().await.clone()
    }
}

#[async_trait]
impl AlertSink for RecordingAlertSink {
    async fn alert(&self, alert: OperatorAlert) {
        self.alerts.lock().await.push(alert);
    }
}
