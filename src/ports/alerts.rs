use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

/// Something an operator must look at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertKind {
    ExecutionFailed {
        position_id: Uuid,
        order_id: Uuid,
        reason: String,
        attempts: u32,
        error: String,
    },
    InvariantViolation {
        position_id: Uuid,
        detail: String,
    },
    BreakerTripped {
        reason: String,
        drawdown_pct: f64,
        current_equity: f64,
    },
    BreakerReset {
        manual: bool,
    },
    WalletDormant {
        wallet_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorAlert {
    pub severity: AlertSeverity,
    #[serde(flatten)]
    pub kind: AlertKind,
    pub raised_at: DateTime<Utc>,
}

impl OperatorAlert {
    pub fn new(severity: AlertSeverity, kind: AlertKind) -> Self {
        Self {
            severity,
            kind,
            raised_at: Utc::now(),
        }
    }

    /// One-line human summary
    pub fn summary(&self) -> String {
        match &self.kind {
            AlertKind::ExecutionFailed { position_id, reason, attempts, error, .. } => format!(
                "Execution failed for position {} ({}) after {} attempts: {}",
                position_id, reason, attempts, error
            ),
            AlertKind::InvariantViolation { position_id, detail } => {
                format!("Position {} frozen for review: {}", position_id, detail)
            }
            AlertKind::BreakerTripped { reason, drawdown_pct, current_equity } => format!(
                "Circuit breaker OPEN ({}): drawdown {:.2}%, equity {:.4}",
                reason, drawdown_pct, current_equity
            ),
            AlertKind::BreakerReset { manual } => {
                if *manual {
                    "Circuit breaker manually reset".to_string()
                } else {
                    "Circuit breaker reset after cooldown".to_string()
                }
            }
            AlertKind::WalletDormant { wallet_id } => format!("Wallet {} is dormant", wallet_id),
        }
    }
}

/// Operator alerting surface
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn alert(&self, alert: OperatorAlert);
}
