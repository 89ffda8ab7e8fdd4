//! Strategy Layer - Scoring, sizing and exit decisions
//!
//! - `scorer`: weighted signal score from wallet, token, cluster and context
//! - `sizing`: position size from score bracket and risk multiplier
//! - `exit_engine`: prioritized exit rules evaluated by a pure function

pub mod scorer;
pub mod sizing;
pub mod exit_engine;

pub use scorer::SignalScorer;
pub use sizing::PositionSizer;
pub use exit_engine::{evaluate, Evaluation, EvaluationContext, ExitDecision, ExitRule, RULE_PRIORITY};
