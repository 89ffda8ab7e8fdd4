//! Settlement
//!
//! The only mode-dependent step of the order lifecycle. Simulation fills
//! immediately at the order's target price moved against us by the slippage
//! model; live submits to the execution client with a per-attempt timeout
//! and exponential backoff between attempts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ExecutionSection;
use crate::domain::order::Order;
use crate::domain::position::ExecutionMode;
use crate::ports::execution::{ExecutionClient, ExecutionError};

#[async_trait]
pub trait Settlement: Send + Sync {
    fn mode(&self) -> ExecutionMode;

    /// Settle a pending order in place. On error the order is marked failed.
    async fn settle(&self, order: &mut Order, at: DateTime<Utc>) -> Result<(), ExecutionError>;
}

/// Adverse slippage: buys fill higher, sells fill lower
pub fn apply_slippage(price: f64, slippage_bps: u32, is_buy: bool) -> f64 {
    let factor = slippage_bps as f64 / 10_000.0;
    if is_buy {
        price * (1.0 + factor)
    } else {
        price * (1.0 - factor)
    }
}

pub struct SimulatedSettlement {
    slippage_bps: u32,
}

impl SimulatedSettlement {
    pub fn new(slippage_bps: u32) -> Self {
        Self { slippage_bps }
    }
}

#[async_trait]
impl Settlement for SimulatedSettlement {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Simulation
    }

    async fn settle(&self, order: &mut Order, at: DateTime<Utc>) -> Result<(), ExecutionError> {
        order.attempts += 1;
        if !(order.target_price.is_finite() && order.target_price > 0.0) {
            let err = ExecutionError::InvalidParameters(format!("target price {}", order.target_price));
            order.mark_failed(err.to_string(), at);
            return Err(err);
        }

        let price = apply_slippage(order.target_price, self.slippage_bps, order.is_buy());
        order.mark_filled(price, at, true);
        debug!(order_id = %order.id, reason = %order.reason, price, "Simulated fill");
        Ok(())
    }
}

/// Bounded retry for live submission
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub submit_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_section(section: &ExecutionSection) -> Self {
        Self {
            max_attempts: section.max_attempts.max(1),
            base_backoff: Duration::from_millis(section.base_backoff_ms),
            submit_timeout: Duration::from_secs(section.submit_timeout_secs),
        }
    }

    /// Wait after the given zero-based attempt: base × 2^attempt
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff.saturating_mul(2u32.saturating_pow(attempt))
    }
}

pub struct LiveSettlement {
    client: Arc<dyn ExecutionClient>,
    policy: RetryPolicy,
}

impl LiveSettlement {
    pub fn new(client: Arc<dyn ExecutionClient>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    fn is_retryable(error: &ExecutionError) -> bool {
        !matches!(error, ExecutionError::InvalidParameters(_))
    }
}

#[async_trait]
impl Settlement for LiveSettlement {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Live
    }

    async fn settle(&self, order: &mut Order, at: DateTime<Utc>) -> Result<(), ExecutionError> {
        let mut last_error = ExecutionError::ApiError("no attempt made".to_string());

        for attempt in 0..self.policy.max_attempts {
            order.attempts += 1;

            let result = match tokio::time::timeout(self.policy.submit_timeout, self.client.submit(order)).await {
                Ok(result) => result,
                Err(_) => Err(ExecutionError::Timeout(self.policy.submit_timeout.as_secs())),
            };

            match result {
                Ok(fill) => {
                    order.mark_filled(fill.price, fill.filled_at, false);
                    info!(
                        order_id = %order.id,
                        reason = %order.reason,
                        price = fill.price,
                        attempts = order.attempts,
                        "Order filled"
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        order_id = %order.id,
                        attempt = attempt + 1,
                        max_attempts = self.policy.max_attempts,
                        error = %e,
                        "Order submission failed"
                    );
                    let retryable = Self::is_retryable(&e);
                    last_error = e;
                    if !retryable {
                        break;
                    }
                    if attempt + 1 < self.policy.max_attempts {
                        tokio::time::sleep(self.policy.backoff(attempt)).await;
                    }
                }
            }
        }

        order.mark_failed(last_error.to_string(), at);
        Err(last_error)
    }
}
