//! Circuit Breaker
//!
//! Account-level admission control. The breaker opens on drawdown from peak
//! equity or on a collapsing rolling win rate, halves sizing during a losing
//! streak, and enforces the concurrent-position limit. This type is a plain
//! state machine; the risk gate actor owns the single live instance.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Default drawdown that opens the breaker, in percent
pub const DEFAULT_DRAWDOWN_THRESHOLD_PCT: f64 = 20.0;

/// Default losing streak that triggers size reduction
pub const DEFAULT_MAX_CONSECUTIVE_LOSSES: u32 = 3;

/// Default size multiplier during a losing streak
pub const DEFAULT_LOSS_REDUCTION_FACTOR: f64 = 0.5;

/// Default number of closed trades in the win-rate window
pub const DEFAULT_WIN_RATE_WINDOW: usize = 20;

/// Default minimum rolling win rate
pub const DEFAULT_MIN_WIN_RATE: f64 = 0.30;

/// Default concurrent position limit
pub const DEFAULT_MAX_CONCURRENT_POSITIONS: u32 = 5;

/// Default cooldown period in minutes
pub const DEFAULT_COOLDOWN_MINUTES: i64 = 60;

/// Longest cooldown accepted, one year
pub const MAX_COOLDOWN_MINUTES: i64 = 60 * 24 * 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BreakerStatus {
    Closed,
    Open,
}

impl BreakerStatus {
    pub fn description(&self) -> &'static str {
        match self {
            BreakerStatus::Closed => "Admission active",
            BreakerStatus::Open => "Circuit breaker OPEN - admissions halted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripReason {
    Drawdown,
    WinRate,
}

impl fmt::Display for TripReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TripReason::Drawdown => write!(f, "drawdown"),
            TripReason::WinRate => write!(f, "win_rate"),
        }
    }
}

/// Why an admission was refused by the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionRefusal {
    Paused,
    BreakerOpen,
    PositionLimitReached,
}

impl AdmissionRefusal {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionRefusal::Paused => "paused",
            AdmissionRefusal::BreakerOpen => "breaker_open",
            AdmissionRefusal::PositionLimitReached => "position_limit_reached",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AdmissionDecision {
    /// Slot reserved; scale the position size by `size_multiplier`
    Admitted { size_multiplier: f64 },
    Refused(AdmissionRefusal),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub drawdown_threshold_pct: f64,
    pub max_consecutive_losses: u32,
    pub loss_reduction_factor: f64,
    pub win_rate_window: usize,
    pub min_win_rate: f64,
    pub max_concurrent_positions: u32,
    pub cooldown_minutes: i64,
    pub auto_reset_after_cooldown: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            drawdown_threshold_pct: DEFAULT_DRAWDOWN_THRESHOLD_PCT,
            max_consecutive_losses: DEFAULT_MAX_CONSECUTIVE_LOSSES,
            loss_reduction_factor: DEFAULT_LOSS_REDUCTION_FACTOR,
            win_rate_window: DEFAULT_WIN_RATE_WINDOW,
            min_win_rate: DEFAULT_MIN_WIN_RATE,
            max_concurrent_positions: DEFAULT_MAX_CONCURRENT_POSITIONS,
            cooldown_minutes: DEFAULT_COOLDOWN_MINUTES,
            auto_reset_after_cooldown: false,
        }
    }
}

/// Snapshot of the breaker; this is what gets persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub status: BreakerStatus,
    pub trip_reason: Option<TripReason>,
    pub peak_equity: f64,
    pub current_equity: f64,
    pub consecutive_losses: u32,
    pub open_positions_count: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub manual_pause: bool,
    pub requires_recalibration: bool,
    /// Win flags of the most recent closed trades, oldest first
    pub recent_outcomes: VecDeque<bool>,
}

impl CircuitBreakerState {
    pub fn fresh(initial_equity: f64) -> Self {
        Self {
            status: BreakerStatus::Closed,
            trip_reason: None,
            peak_equity: initial_equity,
            current_equity: initial_equity,
            consecutive_losses: 0,
            open_positions_count: 0,
            opened_at: None,
            cooldown_until: None,
            manual_pause: false,
            requires_recalibration: false,
            recent_outcomes: VecDeque::new(),
        }
    }

    /// Fractional drawdown from peak
    pub fn drawdown(&self) -> f64 {
        if self.peak_equity <= 0.0 {
            return 0.0;
        }
        ((self.peak_equity - self.current_equity) / self.peak_equity).max(0.0)
    }

    pub fn rolling_win_rate(&self) -> Option<f64> {
        if self.recent_outcomes.is_empty() {
            return None;
        }
        let wins = self.recent_outcomes.iter().filter(|w| **w).count();
        Some(wins as f64 / self.recent_outcomes.len() as f64)
    }

    pub fn is_open(&self) -> bool {
        self.status == BreakerStatus::Open
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitBreakerState,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig, initial_equity: f64) -> Self {
        Self {
            config,
            state: CircuitBreakerState::fresh(initial_equity),
        }
    }

    /// Resume from a persisted snapshot
    pub fn restore(config: CircuitBreakerConfig, state: CircuitBreakerState) -> Self {
        let mut breaker = Self { config, state };
        breaker.trim_window();
        breaker
    }

    pub fn state(&self) -> &CircuitBreakerState {
        &self.state
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn update_config(&mut self, config: CircuitBreakerConfig) {
        self.config = config;
        self.trim_window();
    }

    /// Current sizing multiplier from the losing streak
    pub fn size_multiplier(&self) -> f64 {
        if self.state.consecutive_losses >= self.config.max_consecutive_losses {
            self.config.loss_reduction_factor
        } else {
            1.0
        }
    }

    /// Decide one admission and reserve a slot when admitted
    pub fn check_admission(&mut self, now: DateTime<Utc>) -> AdmissionDecision {
        self.try_auto_reset(now);

        if self.state.manual_pause {
            return AdmissionDecision::Refused(AdmissionRefusal::Paused);
        }
        if self.state.is_open() {
            return AdmissionDecision::Refused(AdmissionRefusal::BreakerOpen);
        }
        if self.state.open_positions_count >= self.config.max_concurrent_positions {
            return AdmissionDecision::Refused(AdmissionRefusal::PositionLimitReached);
        }

        self.state.open_positions_count += 1;
        AdmissionDecision::Admitted {
            size_multiplier: self.size_multiplier(),
        }
    }

    /// Give back a reserved slot without recording a trade
    pub fn release_slot(&mut self) {
        self.state.open_positions_count = self.state.open_positions_count.saturating_sub(1);
    }

    /// Record a closed trade: releases its slot and re-checks trip conditions
    pub fn record_outcome(&mut self, pnl: f64, now: DateTime<Utc>) -> Option<TripReason> {
        self.release_slot();

        self.state.current_equity += pnl;
        if self.state.current_equity > self.state.peak_equity {
            self.state.peak_equity = self.state.current_equity;
        }

        let win = pnl > 0.0;
        if win {
            self.state.consecutive_losses = 0;
            tracing::debug!(pnl, "Win recorded (losing streak reset)");
        } else {
            self.state.consecutive_losses += 1;
            tracing::debug!(
                pnl,
                consecutive_losses = self.state.consecutive_losses,
                "Loss recorded"
            );
            if self.state.consecutive_losses == self.config.max_consecutive_losses {
                tracing::warn!(
                    consecutive_losses = self.state.consecutive_losses,
                    factor = self.config.loss_reduction_factor,
                    "Losing streak reached, reducing position sizes"
                );
            }
        }

        self.state.recent_outcomes.push_back(win);
        self.trim_window();

        self.evaluate(now)
    }

    /// Re-check trip conditions and cooldown; returns a reason if it tripped now
    pub fn evaluate(&mut self, now: DateTime<Utc>) -> Option<TripReason> {
        if self.state.is_open() {
            self.try_auto_reset(now);
            return None;
        }

        let drawdown_pct = self.state.drawdown() * 100.0;
        if drawdown_pct >= self.config.drawdown_threshold_pct {
            tracing::error!(
                drawdown_pct,
                threshold_pct = self.config.drawdown_threshold_pct,
                peak_equity = self.state.peak_equity,
                current_equity = self.state.current_equity,
                "CIRCUIT BREAKER OPEN: drawdown threshold crossed"
            );
            self.trip(TripReason::Drawdown, now);
            return Some(TripReason::Drawdown);
        }

        if self.state.recent_outcomes.len() >= self.config.win_rate_window {
            if let Some(rate) = self.state.rolling_win_rate() {
                if rate < self.config.min_win_rate {
                    tracing::error!(
                        win_rate = rate,
                        min_win_rate = self.config.min_win_rate,
                        window = self.config.win_rate_window,
                        "CIRCUIT BREAKER OPEN: rolling win rate below minimum"
                    );
                    self.trip(TripReason::WinRate, now);
                    self.state.requires_recalibration = true;
                    return Some(TripReason::WinRate);
                }
            }
        }

        None
    }

    /// Close after cooldown when enabled; never clears a recalibration trip
    pub fn try_auto_reset(&mut self, now: DateTime<Utc>) -> bool {
        if !self.state.is_open()
            || !self.config.auto_reset_after_cooldown
            || self.state.requires_recalibration
        {
            return false;
        }
        match self.state.cooldown_until {
            Some(until) if now >= until => {
                tracing::info!("Circuit breaker cooldown complete, auto-resetting");
                self.close();
                true
            }
            _ => false,
        }
    }

    /// Operator reset. Clears recalibration and the win-rate window
    pub fn manual_reset(&mut self) {
        self.close();
        self.state.requires_recalibration = false;
        self.state.recent_outcomes.clear();
        tracing::info!(
            peak_equity = self.state.peak_equity,
            "Circuit breaker manually reset"
        );
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.state.manual_pause = paused;
    }

    /// Minutes until cooldown expiry, if open with a cooldown
    pub fn cooldown_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
        if !self.state.is_open() {
            return None;
        }
        self.state
            .cooldown_until
            .map(|until| (until - now).num_minutes().max(0))
    }

    fn trip(&mut self, reason: TripReason, now: DateTime<Utc>) {
        self.state.status = BreakerStatus::Open;
        self.state.trip_reason = Some(reason);
        self.state.opened_at = Some(now);
        let cooldown = Duration::minutes(self.config.cooldown_minutes.clamp(0, MAX_COOLDOWN_MINUTES));
        self.state.cooldown_until = Some(now + cooldown);
    }

    fn close(&mut self) {
        self.state.status = BreakerStatus::Closed;
        self.state.trip_reason = None;
        self.state.opened_at = None;
        self.state.cooldown_until = None;
        // rebase so the same drawdown does not trip again immediately
        self.state.peak_equity = self.state.current_equity;
    }

    fn trim_window(&mut self) {
        let window = self.config.win_rate_window.max(1);
        while self.state.recent_outcomes.len() > window {
            self.state.recent_outcomes.pop_front();
        }
    }
}
