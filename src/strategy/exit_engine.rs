//! Exit Strategy Engine
//!
//! Pure evaluation of one position against its exit strategy. Every rule is
//! checked in a fixed priority order and the first one that fires wins, so
//! at most one exit is produced per evaluation:
//!
//! 1. stop_loss
//! 2. mirror_exit
//! 3. trailing_stop (non-moonbag portion only)
//! 4. moonbag_stop (only once the moonbag is all that is left)
//! 5. scaling_out (lowest unfired ladder level, one per evaluation)
//! 6. time_exit (max hold or stagnation)
//!
//! The function never mutates the position. It returns the decision plus
//! the projected exit state; the caller commits observations right away
//! and a fired ladder level only after the exit order fills.

use chrono::{DateTime, Duration, Utc};

use crate::domain::order::OrderReason;
use crate::domain::position::{ExitState, Position, AMOUNT_EPSILON};

/// What triggered this evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationContext {
    /// New price, if this evaluation is a price tick
    pub price: Option<f64>,
    pub now: DateTime<Utc>,
    /// The source wallet sold this token
    pub source_wallet_sold: bool,
}

impl EvaluationContext {
    pub fn tick(price: f64, now: DateTime<Utc>) -> Self {
        Self {
            price: Some(price),
            now,
            source_wallet_sold: false,
        }
    }

    pub fn source_sold(now: DateTime<Utc>) -> Self {
        Self {
            price: None,
            now,
            source_wallet_sold: true,
        }
    }

    pub fn time_check(now: DateTime<Utc>) -> Self {
        Self {
            price: None,
            now,
            source_wallet_sold: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitRule {
    StopLoss,
    MirrorExit,
    TrailingStop,
    MoonbagStop,
    ScalingOut,
    TimeExit,
}

/// Evaluation order; configuration never changes it
pub const RULE_PRIORITY: [ExitRule; 6] = [
    ExitRule::StopLoss,
    ExitRule::MirrorExit,
    ExitRule::TrailingStop,
    ExitRule::MoonbagStop,
    ExitRule::ScalingOut,
    ExitRule::TimeExit,
];

impl ExitRule {
    pub fn reason(&self) -> OrderReason {
        match self {
            ExitRule::StopLoss => OrderReason::StopLoss,
            ExitRule::MirrorExit => OrderReason::MirrorExit,
            ExitRule::TrailingStop => OrderReason::TrailingStop,
            ExitRule::MoonbagStop => OrderReason::MoonbagStop,
            ExitRule::ScalingOut => OrderReason::ScalingOut,
            ExitRule::TimeExit => OrderReason::TimeExit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitDecision {
    pub reason: OrderReason,
    pub amount: f64,
    /// Price the decision was made at
    pub price: f64,
    /// Ladder level index, for scaling_out
    pub level: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub decision: Option<ExitDecision>,
    pub observed: ExitState,
}

/// Evaluate a position; inactive positions only get their observation updated
pub fn evaluate(position: &Position, ctx: &EvaluationContext) -> Evaluation {
    let observed = observe(position, ctx);
    if !position.is_active() {
        return Evaluation {
            decision: None,
            observed,
        };
    }

    let price = observed.last_price;
    let decision = RULE_PRIORITY
        .iter()
        .find_map(|rule| check_rule(*rule, position, &observed, price, ctx));

    Evaluation { decision, observed }
}

/// Project this evaluation's market observations onto the exit state
fn observe(position: &Position, ctx: &EvaluationContext) -> ExitState {
    let mut state = position.exit_state.clone();
    state.last_evaluated_at = Some(ctx.now);

    let price = match ctx.price {
        Some(p) if p.is_finite() && p > 0.0 => p,
        _ => return state,
    };

    state.last_price = price;
    if price > state.peak_price {
        state.peak_price = price;
    }

    if let Some(trailing) = position.exit_strategy.active_trailing() {
        if state.peak_price >= position.entry_price * trailing.activation_multiple {
            state.trailing_active = true;
        }
    }

    if let Some((band_pct, _)) = position.exit_strategy.time_rules.and_then(|r| r.stagnation()) {
        let anchor = state.stagnation_anchor_price;
        let band = anchor * band_pct / 100.0;
        if (price - anchor).abs() > band {
            state.stagnation_anchor_price = price;
            state.stagnation_anchor_at = ctx.now;
        }
    }

    state
}

fn check_rule(
    rule: ExitRule,
    position: &Position,
    state: &ExitState,
    price: f64,
    ctx: &EvaluationContext,
) -> Option<ExitDecision> {
    let strategy = &position.exit_strategy;
    let remaining = position.remaining();
    let eps = AMOUNT_EPSILON * position.size.max(1.0);
    let moonbag_reserve = position.moonbag_amount().min(remaining);

    let full = |rule: ExitRule| {
        Some(ExitDecision {
            reason: rule.reason(),
            amount: remaining,
            price,
            level: None,
        })
    };

    match rule {
        ExitRule::StopLoss => {
            if price <= strategy.stop_loss_price(position.entry_price) {
                return full(rule);
            }
            None
        }

        ExitRule::MirrorExit => {
            if ctx.source_wallet_sold && strategy.mirror_exit {
                return full(rule);
            }
            None
        }

        ExitRule::TrailingStop => {
            let trailing = strategy.active_trailing()?;
            if !state.trailing_active {
                return None;
            }
            let stop = state.peak_price * (1.0 - trailing.trail_pct / 100.0);
            let amount = remaining - moonbag_reserve;
            if price <= stop && amount > eps {
                return Some(ExitDecision {
                    reason: rule.reason(),
                    amount,
                    price,
                    level: None,
                });
            }
            None
        }

        ExitRule::MoonbagStop => {
            let stop = strategy.moonbag_stop_price(position.entry_price)?;
            // whatever sold the rest, the moonbag alone arms its stop
            if position.only_moonbag_left() && remaining > eps && price <= stop {
                return full(rule);
            }
            None
        }

        ExitRule::ScalingOut => {
            for index in strategy.ladder_order() {
                if state.is_level_fired(index) {
                    continue;
                }
                let level = strategy.take_profit_levels[index];
                if price < position.entry_price * level.trigger_multiple {
                    // ascending order: nothing higher can be reached either
                    break;
                }
                let amount = (position.filled_size * level.sell_pct / 100.0).min(remaining - moonbag_reserve);
                if amount > eps {
                    return Some(ExitDecision {
                        reason: rule.reason(),
                        amount,
                        price,
                        level: Some(index),
                    });
                }
            }
            None
        }

        ExitRule::TimeExit => {
            let rules = strategy.time_rules?;
            if let Some(max_hold) = rules.max_hold_hours {
                if ctx.now - position.opened_at >= hours(max_hold) {
                    return full(rule);
                }
            }
            if let Some((_, stagnation_hours)) = rules.stagnation() {
                if ctx.now - state.stagnation_anchor_at >= hours(stagnation_hours) {
                    return full(rule);
                }
            }
            None
        }
    }
}

fn hours(h: f64) -> Duration {
    Duration::milliseconds((h * 3_600_000.0) as i64)
}
