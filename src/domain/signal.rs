use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::score::ScoreBreakdown;

/// Direction of the observed wallet activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Buy,
    Sell,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Buy => write!(f, "buy"),
            Direction::Sell => write!(f, "sell"),
        }
    }
}

/// Inbound wallet-activity event as delivered by the ingestion layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub wallet_id: String,
    pub token_mint: String,
    pub direction: Direction,
    pub amount: f64,
    pub observed_at: DateTime<Utc>,
    #[serde(default)]
    pub raw_source: Option<String>,
}

/// A single observed wallet-activity event considered for scoring.
///
/// Never mutated after creation; every signal lands in the signal log
/// whatever its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub wallet_id: String,
    pub token_mint: String,
    pub direction: Direction,
    pub amount: f64,
    pub observed_at: DateTime<Utc>,
    pub raw_source: String,
}

impl Signal {
    /// Create a signal from an inbound event, assigning a fresh id
    pub fn from_event(event: ActivityEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            wallet_id: event.wallet_id,
            token_mint: event.token_mint,
            direction: event.direction,
            amount: event.amount,
            observed_at: event.observed_at,
            raw_source: event.raw_source.unwrap_or_else(|| "unknown".to_string()),
        }
    }

    pub fn is_buy(&self) -> bool {
        self.direction == Direction::Buy
    }

    /// Basic sanity checks before the signal enters scoring
    pub fn validate(&self) -> Result<(), String> {
        if self.wallet_id.trim().is_empty() {
            return Err("wallet_id cannot be empty".to_string());
        }
        if self.token_mint.trim().is_empty() {
            return Err("token_mint cannot be empty".to_string());
        }
        if !self.amount.is_finite() || self.amount < 0.0 {
            return Err(format!("Invalid amount: {}", self.amount));
        }
        Ok(())
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Signal: wallet={} token={} {} amount={}",
            &self.wallet_id[..8.min(self.wallet_id.len())],
            &self.token_mint[..8.min(self.token_mint.len())],
            self.direction,
            self.amount,
        )
    }
}

/// What happened to a signal once the pipeline finished with it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SignalOutcome {
    Admitted { position_id: Uuid },
    Duplicate { position_id: Uuid },
    BelowThreshold,
    Paused,
    BreakerOpen,
    PositionLimitReached,
    WalletDormant,
    EntryFailed { position_id: Uuid },
    MirrorExitRouted { positions: Vec<Uuid> },
    Rejected { error: String },
}

impl SignalOutcome {
    /// Stable reason code used in logs and the signal log
    pub fn code(&self) -> &'static str {
        match self {
            SignalOutcome::Admitted { .. } => "admitted",
            SignalOutcome::Duplicate { .. } => "duplicate",
            SignalOutcome::BelowThreshold => "below_threshold",
            SignalOutcome::Paused => "paused",
            SignalOutcome::BreakerOpen => "breaker_open",
            SignalOutcome::PositionLimitReached => "position_limit_reached",
            SignalOutcome::WalletDormant => "wallet_dormant",
            SignalOutcome::EntryFailed { .. } => "entry_failed",
            SignalOutcome::MirrorExitRouted { .. } => "mirror_exit_routed",
            SignalOutcome::Rejected { .. } => "rejected",
        }
    }
}

/// One append-only line of the signal log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalLogEntry {
    pub signal: Signal,
    pub breakdown: Option<ScoreBreakdown>,
    #[serde(flatten)]
    pub outcome: SignalOutcome,
    pub logged_at: DateTime<Utc>,
}
