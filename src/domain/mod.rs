//! Domain Layer - Core types and state machines for WallTrack
//!
//! Pure types and logic with no I/O beyond the state store. All external
//! interactions happen through the ports layer.
//!
//! - `signal`: inbound activity and the signal log entry
//! - `score`: weighted score breakdown
//! - `exit_strategy`: exit strategy value type and presets
//! - `position` / `order`: the position ledger
//! - `circuit_breaker`: account-level admission state machine
//! - `wallet_decay`: per-wallet outcome statistics
//! - `persistence`: JSON state store for crash recovery

pub mod signal;
pub mod score;
pub mod exit_strategy;
pub mod order;
pub mod position;
pub mod circuit_breaker;
pub mod wallet_decay;
pub mod persistence;

pub use signal::{ActivityEvent, Direction, Signal, SignalLogEntry, SignalOutcome};
pub use score::{ScoreBreakdown, ScoreFactor, ScoringWeights};
pub use exit_strategy::{
    ExitStrategy, StrategyCatalog, StrategyError, TakeProfitLevel, TimeRules, TrailingStop,
};
pub use order::{Order, OrderKind, OrderReason, OrderStatus};
pub use position::{ExecutionMode, ExitState, Position, PositionError, PositionStatus};
pub use circuit_breaker::{
    AdmissionDecision, AdmissionRefusal, BreakerStatus, CircuitBreaker, CircuitBreakerConfig,
    CircuitBreakerState, TripReason,
};
pub use wallet_decay::{WalletDecayConfig, WalletDecayTracker, WalletHealth, WalletStats};
pub use persistence::{PersistError, RecoveredState, StateStore};
