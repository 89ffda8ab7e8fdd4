use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Entry,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Filled,
    Failed,
    SimFilled,
    Cancelled,
}

impl OrderStatus {
    /// Filled for real or in simulation
    pub fn is_filled(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::SimFilled)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

/// Why an order exists; exit reasons double as trigger names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderReason {
    Entry,
    StopLoss,
    MirrorExit,
    TrailingStop,
    ScalingOut,
    MoonbagStop,
    TimeExit,
    Manual,
}

impl OrderReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderReason::Entry => "entry",
            OrderReason::StopLoss => "stop_loss",
            OrderReason::MirrorExit => "mirror_exit",
            OrderReason::TrailingStop => "trailing_stop",
            OrderReason::ScalingOut => "scaling_out",
            OrderReason::MoonbagStop => "moonbag_stop",
            OrderReason::TimeExit => "time_exit",
            OrderReason::Manual => "manual",
        }
    }
}

impl fmt::Display for OrderReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single buy or sell instruction belonging to a position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub position_id: Uuid,
    pub token_mint: String,
    pub kind: OrderKind,
    /// Capital units committed (entry) or released (exit)
    pub amount: f64,
    /// Market price when the order was created
    pub target_price: f64,
    pub fill_price: Option<f64>,
    pub status: OrderStatus,
    pub attempts: u32,
    pub reason: OrderReason,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn entry(position_id: Uuid, token_mint: &str, amount: f64, target_price: f64) -> Self {
        Self::new(position_id, token_mint, OrderKind::Entry, OrderReason::Entry, amount, target_price)
    }

    pub fn exit(
        position_id: Uuid,
        token_mint: &str,
        reason: OrderReason,
        amount: f64,
        target_price: f64,
    ) -> Self {
        Self::new(position_id, token_mint, OrderKind::Exit, reason, amount, target_price)
    }

    fn new(
        position_id: Uuid,
        token_mint: &str,
        kind: OrderKind,
        reason: OrderReason,
        amount: f64,
        target_price: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            position_id,
            token_mint: token_mint.to_string(),
            kind,
            amount,
            target_price,
            fill_price: None,
            status: OrderStatus::Pending,
            attempts: 0,
            reason,
            error: None,
            created_at: Utc::now(),
            settled_at: None,
        }
    }

    pub fn is_buy(&self) -> bool {
        self.kind == OrderKind::Entry
    }

    pub fn mark_filled(&mut self, price: f64, at: DateTime<Utc>, simulated: bool) {
        self.fill_price = Some(price);
        self.status = if simulated {
            OrderStatus::SimFilled
        } else {
            OrderStatus::Filled
        };
        self.error = None;
        self.settled_at = Some(at);
    }

    pub fn mark_failed(&mut self, error: impl Into<String>, at: DateTime<Utc>) {
        self.status = OrderStatus::Failed;
        self.error = Some(error.into());
        self.settled_at = Some(at);
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Order {} {:?} {} amount={:.4} status={:?}",
            self.id, self.kind, self.reason, self.amount, self.status
        )
    }
}
