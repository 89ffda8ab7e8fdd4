//! Execution port used by live settlement only.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::order::Order;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("API request failed: {0}")]
    ApiError(String),
    #[error("Order rejected: {0}")]
    Rejected(String),
    #[error("Submission timed out after {0}s")]
    Timeout(u64),
    #[error("Slippage tolerance exceeded")]
    SlippageExceeded,
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
}

/// Confirmed fill returned by the broker
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub price: f64,
    pub filled_at: DateTime<Utc>,
}

#[async_trait]
pub trait ExecutionClient: Send + Sync {
    /// Submit an order and wait for confirmation
    async fn submit(&self, order: &Order) -> Result<Fill, ExecutionError>;
}
