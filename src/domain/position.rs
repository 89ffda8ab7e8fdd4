use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::exit_strategy::ExitStrategy;
use super::order::Order;

/// Relative tolerance used when comparing exited amounts against size
pub const AMOUNT_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    PartialExit,
    Closed,
    /// Frozen after an invariant violation; needs an operator
    ReviewRequired,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "open",
            PositionStatus::PartialExit => "partial_exit",
            PositionStatus::Closed => "closed",
            PositionStatus::ReviewRequired => "review_required",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Simulation,
    Live,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Simulation
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Simulation => write!(f, "simulation"),
            ExecutionMode::Live => write!(f, "live"),
        }
    }
}

/// Mutable exit bookkeeping carried by each position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitState {
    /// Indices into `exit_strategy.take_profit_levels` that have filled
    pub fired_levels: Vec<usize>,
    pub peak_price: f64,
    pub trailing_active: bool,
    pub stagnation_anchor_price: f64,
    pub stagnation_anchor_at: DateTime<Utc>,
    pub last_price: f64,
    pub last_evaluated_at: Option<DateTime<Utc>>,
}

impl ExitState {
    pub fn new(entry_price: f64, at: DateTime<Utc>) -> Self {
        Self {
            fired_levels: Vec::new(),
            peak_price: entry_price,
            trailing_active: false,
            stagnation_anchor_price: entry_price,
            stagnation_anchor_at: at,
            last_price: entry_price,
            last_evaluated_at: None,
        }
    }

    pub fn is_level_fired(&self, index: usize) -> bool {
        self.fired_levels.contains(&index)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PositionError {
    #[error("Position {0} is already closed")]
    AlreadyClosed(Uuid),
    #[error("Position {0} is frozen for review")]
    UnderReview(Uuid),
    #[error("Position {0} has no filled entry")]
    NotFilled(Uuid),
    #[error("Invalid size: {0}")]
    InvalidSize(f64),
    #[error("Invalid entry price: {0}")]
    InvalidEntryPrice(f64),
    #[error("Invalid exit amount: {0}")]
    InvalidAmount(f64),
    #[error("Invariant violation on position {position_id}: {detail}")]
    InvariantViolation { position_id: Uuid, detail: String },
}

/// A held allocation in one token opened from one admitted signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub signal_id: Uuid,
    pub token_mint: String,
    pub source_wallet: String,
    pub entry_price: f64,
    /// Capital allocated at admission
    pub size: f64,
    /// Capital actually committed by the entry fill
    pub filled_size: f64,
    pub exited_amount: f64,
    pub realized_pnl: f64,
    pub status: PositionStatus,
    pub mode: ExecutionMode,
    pub exit_strategy: ExitStrategy,
    pub exit_state: ExitState,
    #[serde(default)]
    pub orders: Vec<Order>,
    #[serde(default)]
    pub review_reason: Option<String>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    pub fn new(
        signal_id: Uuid,
        token_mint: impl Into<String>,
        source_wallet: impl Into<String>,
        entry_price: f64,
        size: f64,
        mode: ExecutionMode,
        exit_strategy: ExitStrategy,
        opened_at: DateTime<Utc>,
    ) -> Result<Self, PositionError> {
        if !(size.is_finite() && size > 0.0) {
            return Err(PositionError::InvalidSize(size));
        }
        if !(entry_price.is_finite() && entry_price > 0.0) {
            return Err(PositionError::InvalidEntryPrice(entry_price));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            signal_id,
            token_mint: token_mint.into(),
            source_wallet: source_wallet.into(),
            entry_price,
            size,
            filled_size: 0.0,
            exited_amount: 0.0,
            realized_pnl: 0.0,
            status: PositionStatus::Open,
            mode,
            exit_strategy,
            exit_state: ExitState::new(entry_price, opened_at),
            orders: Vec::new(),
            review_reason: None,
            opened_at,
            closed_at: None,
        })
    }

    /// Amount still held
    pub fn remaining(&self) -> f64 {
        (self.filled_size - self.exited_amount).max(0.0)
    }

    pub fn is_filled(&self) -> bool {
        self.filled_size > 0.0
    }

    /// Open or partially exited, with a filled entry
    pub fn is_active(&self) -> bool {
        self.is_filled()
            && matches!(self.status, PositionStatus::Open | PositionStatus::PartialExit)
    }

    pub fn is_closed(&self) -> bool {
        self.status == PositionStatus::Closed
    }

    /// Portion of the original size reserved as the moonbag
    pub fn moonbag_amount(&self) -> f64 {
        self.filled_size * self.exit_strategy.moonbag_pct / 100.0
    }

    fn tolerance(&self) -> f64 {
        AMOUNT_EPSILON * self.size.max(1.0)
    }

    /// True when only the moonbag (or less) is left
    pub fn only_moonbag_left(&self) -> bool {
        self.remaining() <= self.moonbag_amount() + self.tolerance()
    }

    /// Record the entry fill; the fill price becomes the entry price
    pub fn record_entry_fill(&mut self, price: f64, at: DateTime<Utc>) -> Result<(), PositionError> {
        if !(price.is_finite() && price > 0.0) {
            return Err(PositionError::InvalidEntryPrice(price));
        }
        self.entry_price = price;
        self.filled_size = self.size;
        self.exit_state = ExitState::new(price, at);
        Ok(())
    }

    /// Check an exit amount against what is left, without mutating
    pub fn check_exit(&self, amount: f64) -> Result<(), PositionError> {
        match self.status {
            PositionStatus::Closed => return Err(PositionError::AlreadyClosed(self.id)),
            PositionStatus::ReviewRequired => return Err(PositionError::UnderReview(self.id)),
            _ => {}
        }
        if !self.is_filled() {
            return Err(PositionError::NotFilled(self.id));
        }
        if !(amount.is_finite() && amount > 0.0) {
            return Err(PositionError::InvalidAmount(amount));
        }
        if self.exited_amount + amount > self.filled_size + self.tolerance() {
            return Err(PositionError::InvariantViolation {
                position_id: self.id,
                detail: format!(
                    "exit of {:.9} would bring exited amount to {:.9}, above size {:.9}",
                    amount,
                    self.exited_amount + amount,
                    self.filled_size
                ),
            });
        }
        Ok(())
    }

    /// Apply a filled exit and return the realized PnL of this slice
    pub fn apply_exit_fill(
        &mut self,
        amount: f64,
        fill_price: f64,
        at: DateTime<Utc>,
    ) -> Result<f64, PositionError> {
        self.check_exit(amount)?;

        let pnl = amount * (fill_price / self.entry_price - 1.0);
        self.exited_amount += amount;
        self.realized_pnl += pnl;

        if self.filled_size - self.exited_amount <= self.tolerance() {
            // absorb float residue so closed means exited == size
            self.exited_amount = self.filled_size;
            self.status = PositionStatus::Closed;
            self.closed_at = Some(at);
        } else {
            self.status = PositionStatus::PartialExit;
        }
        Ok(pnl)
    }

    /// Freeze for operator review; no further evaluation happens
    pub fn freeze(&mut self, reason: impl Into<String>) {
        self.status = PositionStatus::ReviewRequired;
        self.review_reason = Some(reason.into());
    }

    /// Swap the whole strategy; ladder progress starts over
    pub fn replace_strategy(&mut self, strategy: ExitStrategy) {
        self.exit_strategy = strategy;
        self.exit_state.fired_levels.clear();
        self.exit_state.trailing_active = false;
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.remaining() * (price / self.entry_price - 1.0)
    }

    pub fn order(&self, order_id: Uuid) -> Option<&Order> {
        self.orders.iter().find(|o| o.id == order_id)
    }
}
