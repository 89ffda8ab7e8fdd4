//! Position & Order Lifecycle Manager
//!
//! Turns admitted signals into positions with an entry order, routes every
//! order through the configured settlement and applies exit decisions to
//! the position ledger. Each position sits behind its own async mutex, so
//! one position's evaluate-settle-commit sequence never interleaves with
//! another event for the same position.
//!
//! Lock order is position mutex, then ledger. The ledger is the persisted
//! copy and the source for queries, so readers never wait on a settlement.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::decay_feedback::DecayFeedback;
use super::risk_gate::{RiskGateError, RiskGateHandle};
use super::settlement::Settlement;
use crate::config::{Config, ConfigError, ExitAssignment};
use crate::domain::circuit_breaker::{AdmissionDecision, AdmissionRefusal};
use crate::domain::exit_strategy::{ExitStrategy, StrategyCatalog, StrategyError, PRESET_BALANCED};
use crate::domain::order::{Order, OrderReason, OrderStatus};
use crate::domain::persistence::StateStore;
use crate::domain::position::{Position, PositionError, PositionStatus};
use crate::domain::score::ScoreBreakdown;
use crate::domain::signal::{Signal, SignalOutcome};
use crate::ports::alerts::{AlertKind, AlertSeverity, AlertSink, OperatorAlert};
use crate::ports::execution::ExecutionError;
use crate::ports::market_data::{MarketDataError, PriceFeed};
use crate::strategy::exit_engine::{self, EvaluationContext};
use crate::strategy::sizing::PositionSizer;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Position not found: {0}")]
    NotFound(Uuid),

    #[error("Position {0} is not active")]
    NotActive(Uuid),

    #[error("Worker for position {0} has stopped")]
    WorkerStopped(Uuid),

    #[error(transparent)]
    Position(#[from] PositionError),

    #[error(transparent)]
    Strategy(#[from] StrategyError),

    #[error(transparent)]
    RiskGate(#[from] RiskGateError),

    #[error("Market data unavailable: {0}")]
    MarketData(#[from] MarketDataError),

    #[error("Execution failed: {0}")]
    Execution(#[from] ExecutionError),
}

/// Admission parameters that follow config reloads
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub admission_threshold: f64,
    pub sizer: PositionSizer,
    pub catalog: StrategyCatalog,
    /// Sorted by ascending min_score
    pub assignment: Vec<ExitAssignment>,
}

impl LifecycleSettings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let mut assignment = config.effective_exit_assignment();
        assignment.sort_by(|a, b| a.min_score.total_cmp(&b.min_score));
        Ok(Self {
            admission_threshold: config.scoring.admission_threshold,
            sizer: PositionSizer::new(&config.sizing),
            catalog: config.strategy_catalog()?,
            assignment,
        })
    }

    /// Strategy of the highest bracket the score reaches
    pub fn strategy_for(&self, score: f64) -> Result<ExitStrategy, StrategyError> {
        let name = self
            .assignment
            .iter()
            .rev()
            .find(|a| score >= a.min_score)
            .or_else(|| self.assignment.first())
            .map(|a| a.strategy.as_str())
            .unwrap_or(PRESET_BALANCED);
        self.catalog.get(name).cloned()
    }
}

/// Result of one exit order
#[derive(Debug, Clone, PartialEq)]
pub struct ExitReport {
    pub position_id: Uuid,
    pub order_id: Uuid,
    pub reason: OrderReason,
    pub amount: f64,
    pub order_status: OrderStatus,
    pub fill_price: Option<f64>,
    /// PnL realized by this order; zero when it failed
    pub realized_pnl: f64,
    pub position_status: PositionStatus,
}

/// Admission state of one signal id
#[derive(Debug, Clone, Copy, PartialEq)]
enum AdmissionSlot {
    Vacant,
    Admitted(Uuid),
    Retired,
}

pub struct LifecycleManager {
    positions: RwLock<HashMap<Uuid, Arc<Mutex<Position>>>>,
    /// signal id -> admission slot; held only for lookup
    admissions: Mutex<HashMap<Uuid, Arc<Mutex<AdmissionSlot>>>>,
    ledger: Mutex<HashMap<Uuid, Position>>,
    settings: RwLock<LifecycleSettings>,
    gate: RiskGateHandle,
    settlement: Arc<dyn Settlement>,
    prices: Arc<dyn PriceFeed>,
    decay: Arc<DecayFeedback>,
    alerts: Arc<dyn AlertSink>,
    store: Option<StateStore>,
}

impl LifecycleManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: LifecycleSettings,
        gate: RiskGateHandle,
        settlement: Arc<dyn Settlement>,
        prices: Arc<dyn PriceFeed>,
        decay: Arc<DecayFeedback>,
        alerts: Arc<dyn AlertSink>,
        store: Option<StateStore>,
    ) -> Self {
        Self {
            positions: RwLock::new(HashMap::new()),
            admissions: Mutex::new(HashMap::new()),
            ledger: Mutex::new(HashMap::new()),
            settings: RwLock::new(settings),
            gate,
            settlement,
            prices,
            decay,
            alerts,
            store,
        }
    }

    /// Re-seat positions recovered from disk; returns the active ones
    pub async fn restore(&self, positions: Vec<Position>) -> Vec<Position> {
        let mut active = Vec::new();
        let mut map = self.positions.write().await;
        let mut admissions = self.admissions.lock().await;
        let mut ledger = self.ledger.lock().await;

        for position in positions {
            if position.is_active() {
                active.push(position.clone());
            }
            admissions.insert(
                position.signal_id,
                Arc::new(Mutex::new(AdmissionSlot::Admitted(position.id))),
            );
            ledger.insert(position.id, position.clone());
            map.insert(position.id, Arc::new(Mutex::new(position)));
        }

        info!(restored = map.len(), active = active.len(), "Positions restored");
        active
    }

    pub async fn update_settings(&self, settings: LifecycleSettings) {
        *self.settings.write().await = settings;
    }

    pub async fn settings(&self) -> LifecycleSettings {
        self.settings.read().await.clone()
    }

    /// Admit a scored signal. Refusals are outcomes, not errors.
    ///
    /// Only the signal's own admission slot is held across the gate and
    /// price-feed calls, so unrelated signals admit concurrently.
    pub async fn admit(
        &self,
        signal: &Signal,
        breakdown: &ScoreBreakdown,
        strategy_override: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<SignalOutcome, LifecycleError> {
        let (slot, mut state) = loop {
            let slot = {
                let mut admissions = self.admissions.lock().await;
                Arc::clone(
                    admissions
                        .entry(signal.id)
                        .or_insert_with(|| Arc::new(Mutex::new(AdmissionSlot::Vacant))),
                )
            };
            let state = Arc::clone(&slot).lock_owned().await;
            let current = *state;
            match current {
                AdmissionSlot::Admitted(position_id) => {
                    info!(signal_id = %signal.id, %position_id, "Duplicate signal, returning existing position");
                    return Ok(SignalOutcome::Duplicate { position_id });
                }
                // a refused attempt dropped this slot from the map
                AdmissionSlot::Retired => continue,
                AdmissionSlot::Vacant => break (slot, state),
            }
        };

        let handle = match self.decide_admission(signal, breakdown, strategy_override, now).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(refusal)) => {
                self.retire_slot(signal.id, &slot, &mut *state).await;
                return Ok(refusal);
            }
            Err(e) => {
                self.retire_slot(signal.id, &slot, &mut *state).await;
                return Err(e);
            }
        };

        let mut guard = handle.lock().await;
        let position_id = guard.id;
        self.positions.write().await.insert(position_id, Arc::clone(&handle));
        *state = AdmissionSlot::Admitted(position_id);
        drop(state);
        self.record(&guard, true).await;

        let outcome = self.settle_entry(&mut guard, now).await;
        self.record(&guard, true).await;
        Ok(outcome)
    }

    /// Threshold, gate and strategy checks, then the pending position
    async fn decide_admission(
        &self,
        signal: &Signal,
        breakdown: &ScoreBreakdown,
        strategy_override: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Result<Arc<Mutex<Position>>, SignalOutcome>, LifecycleError> {
        let settings = self.settings.read().await.clone();
        if breakdown.final_score < settings.admission_threshold {
            info!(
                signal_id = %signal.id,
                score = breakdown.final_score,
                threshold = settings.admission_threshold,
                "Signal below threshold"
            );
            return Ok(Err(SignalOutcome::BelowThreshold));
        }

        let size_multiplier = match self.gate.check_admission(now).await? {
            AdmissionDecision::Admitted { size_multiplier } => size_multiplier,
            AdmissionDecision::Refused(refusal) => {
                info!(signal_id = %signal.id, reason = refusal.as_str(), "Admission refused");
                return Ok(Err(match refusal {
                    AdmissionRefusal::Paused => SignalOutcome::Paused,
                    AdmissionRefusal::BreakerOpen => SignalOutcome::BreakerOpen,
                    AdmissionRefusal::PositionLimitReached => SignalOutcome::PositionLimitReached,
                }));
            }
        };

        // a slot is reserved from here on
        let opened = match strategy_override {
            Some(name) => settings.catalog.get(name).cloned().map_err(LifecycleError::from),
            None => settings.strategy_for(breakdown.final_score).map_err(LifecycleError::from),
        };
        let opened = match opened {
            Ok(strategy) => {
                self.open_position(signal, breakdown, strategy, size_multiplier, &settings, now)
                    .await
            }
            Err(e) => Err(e),
        };

        match opened {
            Ok(position) => Ok(Ok(Arc::new(Mutex::new(position)))),
            Err(e) => {
                warn!(signal_id = %signal.id, error = %e, "Could not open position, releasing slot");
                self.release_slot().await;
                Err(e)
            }
        }
    }

    /// Drop a slot that ended without a position so the map stays bounded
    async fn retire_slot(&self, signal_id: Uuid, slot: &Arc<Mutex<AdmissionSlot>>, state: &mut AdmissionSlot) {
        *state = AdmissionSlot::Retired;
        let mut admissions = self.admissions.lock().await;
        if admissions.get(&signal_id).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            admissions.remove(&signal_id);
        }
    }

    async fn open_position(
        &self,
        signal: &Signal,
        breakdown: &ScoreBreakdown,
        strategy: ExitStrategy,
        size_multiplier: f64,
        settings: &LifecycleSettings,
        now: DateTime<Utc>,
    ) -> Result<Position, LifecycleError> {
        let price = self.prices.latest(&signal.token_mint).await?;
        let size = settings.sizer.size(breakdown.final_score, size_multiplier);

        let mut position = Position::new(
            signal.id,
            signal.token_mint.clone(),
            signal.wallet_id.clone(),
            price,
            size,
            self.settlement.mode(),
            strategy,
            now,
        )?;
        position
            .orders
            .push(Order::entry(position.id, &position.token_mint, size, price));

        info!(
            position_id = %position.id,
            signal_id = %signal.id,
            token = %position.token_mint,
            wallet = %position.source_wallet,
            score = breakdown.final_score,
            size,
            size_multiplier,
            strategy = %position.exit_strategy.name,
            mode = %position.mode,
            "Position opened"
        );
        Ok(position)
    }

    async fn settle_entry(&self, position: &mut Position, now: DateTime<Utc>) -> SignalOutcome {
        let position_id = position.id;
        let Some(mut order) = position.orders.pop() else {
            return SignalOutcome::Rejected {
                error: format!("position {} has no entry order", position_id),
            };
        };

        let settled = self.settlement.settle(&mut order, now).await;
        let fill = order.fill_price;
        let at = order.settled_at.unwrap_or(now);
        let order_id = order.id;
        let attempts = order.attempts;
        position.orders.push(order);

        match (settled, fill) {
            (Ok(()), Some(price)) => match position.record_entry_fill(price, at) {
                Ok(()) => {
                    info!(%position_id, entry_price = price, "Entry filled");
                    SignalOutcome::Admitted { position_id }
                }
                Err(e) => {
                    self.freeze(position, e.to_string()).await;
                    SignalOutcome::EntryFailed { position_id }
                }
            },
            (result, _) => {
                let error = match result {
                    Err(e) => e.to_string(),
                    Ok(()) => "fill without price".to_string(),
                };
                error!(%position_id, %order_id, attempts, %error, "Entry order failed, releasing slot");
                self.release_slot().await;
                self.raise(
                    AlertSeverity::Critical,
                    AlertKind::ExecutionFailed {
                        position_id,
                        order_id,
                        reason: OrderReason::Entry.as_str().to_string(),
                        attempts,
                        error,
                    },
                )
                .await;
                SignalOutcome::EntryFailed { position_id }
            }
        }
    }

    /// Evaluate one position; commits observations and applies any exit
    pub async fn evaluate(
        &self,
        position_id: Uuid,
        ctx: &EvaluationContext,
    ) -> Result<Option<ExitReport>, LifecycleError> {
        let handle = self.handle(position_id).await?;
        let mut position = handle.lock().await;

        let evaluation = exit_engine::evaluate(&position, ctx);
        position.exit_state = evaluation.observed;

        let report = match evaluation.decision {
            Some(decision) => {
                debug!(
                    %position_id,
                    reason = %decision.reason,
                    amount = decision.amount,
                    price = decision.price,
                    "Exit triggered"
                );
                Some(
                    self.execute_exit(
                        &mut position,
                        decision.reason,
                        decision.amount,
                        decision.price,
                        decision.level,
                        ctx.now,
                    )
                    .await?,
                )
            }
            None => {
                self.record(&position, false).await;
                None
            }
        };
        Ok(report)
    }

    /// Apply an exit of `amount` at `price` outside the engine's rules
    pub async fn apply_exit(
        &self,
        position_id: Uuid,
        reason: OrderReason,
        amount: f64,
        price: f64,
        now: DateTime<Utc>,
    ) -> Result<ExitReport, LifecycleError> {
        let handle = self.handle(position_id).await?;
        let mut position = handle.lock().await;
        self.execute_exit(&mut position, reason, amount, price, None, now).await
    }

    /// Operator exit of everything left, at the current market price
    pub async fn manual_exit(&self, position_id: Uuid, now: DateTime<Utc>) -> Result<ExitReport, LifecycleError> {
        let handle = self.handle(position_id).await?;
        let mut position = handle.lock().await;
        if !position.is_active() {
            return Err(LifecycleError::NotActive(position_id));
        }
        let price = self.prices.latest(&position.token_mint).await?;
        let amount = position.remaining();
        info!(%position_id, amount, price, "Manual exit requested");
        self.execute_exit(&mut position, OrderReason::Manual, amount, price, None, now).await
    }

    /// Replace the exit strategy of an open position by catalog name
    pub async fn swap_strategy(&self, position_id: Uuid, name: &str) -> Result<(), LifecycleError> {
        let strategy = self.settings.read().await.catalog.get(name)?.clone();
        let handle = self.handle(position_id).await?;
        let mut position = handle.lock().await;

        match position.status {
            PositionStatus::Closed => return Err(PositionError::AlreadyClosed(position_id).into()),
            PositionStatus::ReviewRequired => return Err(PositionError::UnderReview(position_id).into()),
            _ => {}
        }

        let previous = position.exit_strategy.name.clone();
        position.replace_strategy(strategy);
        info!(%position_id, from = %previous, to = %name, "Exit strategy swapped");
        self.record(&position, true).await;
        Ok(())
    }

    async fn execute_exit(
        &self,
        position: &mut Position,
        reason: OrderReason,
        amount: f64,
        price: f64,
        level: Option<usize>,
        now: DateTime<Utc>,
    ) -> Result<ExitReport, LifecycleError> {
        if let Err(e) = position.check_exit(amount) {
            if let PositionError::InvariantViolation { detail, .. } = &e {
                self.freeze(position, detail.clone()).await;
            }
            return Err(e.into());
        }

        let mut order = Order::exit(position.id, &position.token_mint, reason, amount, price);
        let settled = self.settlement.settle(&mut order, now).await;

        let mut report = ExitReport {
            position_id: position.id,
            order_id: order.id,
            reason,
            amount,
            order_status: order.status,
            fill_price: order.fill_price,
            realized_pnl: 0.0,
            position_status: position.status,
        };
        let fill = order.fill_price;
        let at = order.settled_at.unwrap_or(now);
        let attempts = order.attempts;
        position.orders.push(order);

        match (settled, fill) {
            (Ok(()), Some(fill_price)) => {
                let pnl = match position.apply_exit_fill(amount, fill_price, at) {
                    Ok(pnl) => pnl,
                    Err(e) => {
                        if let PositionError::InvariantViolation { detail, .. } = &e {
                            self.freeze(position, detail.clone()).await;
                        }
                        return Err(e.into());
                    }
                };
                if let Some(level) = level {
                    if !position.exit_state.is_level_fired(level) {
                        position.exit_state.fired_levels.push(level);
                    }
                }
                info!(
                    position_id = %position.id,
                    reason = %reason,
                    amount,
                    fill_price,
                    pnl,
                    remaining = position.remaining(),
                    status = position.status.as_str(),
                    "Exit filled"
                );
                report.realized_pnl = pnl;
                report.position_status = position.status;

                if position.is_closed() {
                    self.on_close(position, at).await;
                }
            }
            (result, _) => {
                let error = match result {
                    Err(e) => e.to_string(),
                    Ok(()) => "fill without price".to_string(),
                };
                error!(
                    position_id = %position.id,
                    order_id = %report.order_id,
                    reason = %reason,
                    attempts,
                    %error,
                    "Exit order failed"
                );
                self.raise(
                    AlertSeverity::Critical,
                    AlertKind::ExecutionFailed {
                        position_id: position.id,
                        order_id: report.order_id,
                        reason: reason.as_str().to_string(),
                        attempts,
                        error,
                    },
                )
                .await;
            }
        }

        self.record(position, true).await;
        Ok(report)
    }

    async fn on_close(&self, position: &Position, at: DateTime<Utc>) {
        let pnl = position.realized_pnl;
        info!(
            position_id = %position.id,
            wallet = %position.source_wallet,
            realized_pnl = pnl,
            "Position closed"
        );

        if let Err(e) = self.gate.report_outcome(pnl, at).await {
            error!(position_id = %position.id, error = %e, "Could not report outcome to risk gate");
        }
        self.decay.record_outcome(&position.source_wallet, pnl > 0.0, at).await;
    }

    async fn freeze(&self, position: &mut Position, detail: String) {
        error!(position_id = %position.id, %detail, "Invariant violation, position frozen for review");
        position.freeze(detail.clone());
        self.record(position, true).await;
        self.raise(
            AlertSeverity::Critical,
            AlertKind::InvariantViolation {
                position_id: position.id,
                detail,
            },
        )
        .await;
    }

    async fn release_slot(&self) {
        if let Err(e) = self.gate.release_slot().await {
            error!(error = %e, "Could not release position slot");
        }
    }

    async fn raise(&self, severity: AlertSeverity, kind: AlertKind) {
        self.alerts.alert(OperatorAlert::new(severity, kind)).await;
    }

    async fn handle(&self, position_id: Uuid) -> Result<Arc<Mutex<Position>>, LifecycleError> {
        self.positions
            .read()
            .await
            .get(&position_id)
            .cloned()
            .ok_or(LifecycleError::NotFound(position_id))
    }

    /// Update the ledger copy; write the file when `persist` is set
    async fn record(&self, position: &Position, persist: bool) {
        let mut ledger = self.ledger.lock().await;
        ledger.insert(position.id, position.clone());
        if persist {
            self.write_ledger(&ledger);
        }
    }

    fn write_ledger(&self, ledger: &HashMap<Uuid, Position>) {
        if let Some(store) = &self.store {
            let mut positions: Vec<Position> = ledger.values().cloned().collect();
            positions.sort_by_key(|p| p.opened_at);
            if let Err(e) = store.save_positions(&positions) {
                error!(error = %e, "Failed to persist positions");
            }
        }
    }

    /// Write the whole ledger
    pub async fn persist(&self) {
        let ledger = self.ledger.lock().await;
        self.write_ledger(&ledger);
    }

    pub async fn position(&self, position_id: Uuid) -> Option<Position> {
        self.ledger.lock().await.get(&position_id).cloned()
    }

    /// All positions, oldest first
    pub async fn positions(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self.ledger.lock().await.values().cloned().collect();
        positions.sort_by_key(|p| p.opened_at);
        positions
    }

    pub async fn active_positions(&self) -> Vec<Position> {
        let mut positions = self.positions().await;
        positions.retain(|p| p.is_active());
        positions
    }

    pub async fn orders(&self, position_id: Uuid) -> Option<Vec<Order>> {
        self.position(position_id).await.map(|p| p.orders)
    }

    /// Active positions opened from this wallet's activity on this token
    pub async fn positions_for_source(&self, wallet_id: &str, token_mint: &str) -> Vec<Uuid> {
        self.active_positions()
            .await
            .into_iter()
            .filter(|p| p.source_wallet == wallet_id && p.token_mint == token_mint)
            .map(|p| p.id)
            .collect()
    }

    /// Whether the position will never be evaluated again
    pub async fn is_finished(&self, position_id: Uuid) -> bool {
        self.position(position_id)
            .await
            .map_or(true, |p| !p.is_active())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{BroadcastPriceFeed, RecordingAlertSink, ScriptedExecution};
    use crate::application::risk_gate::{RiskGate, RiskGateTasks};
    use crate::application::settlement::{LiveSettlement, RetryPolicy, SimulatedSettlement};
    use crate::config::SizingSection;
    use crate::domain::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
    use crate::domain::exit_strategy::{TakeProfitLevel, PRESET_CONSERVATIVE};
    use crate::domain::position::ExecutionMode;
    use crate::domain::score::ScoringWeights;
    use crate::domain::signal::Direction;
    use crate::domain::wallet_decay::{WalletDecayConfig, WalletDecayTracker};
    use approx::assert_relative_eq;
    use std::time::Duration;

    struct Fixture {
        lifecycle: LifecycleManager,
        gate: RiskGateHandle,
        _tasks: RiskGateTasks,
        feed: Arc<BroadcastPriceFeed>,
        alerts: Arc<RecordingAlertSink>,
        decay: Arc<DecayFeedback>,
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.sizing = SizingSection {
            capital: 100.0,
            base_size: 1.0,
            max_trade_risk_pct: 5.0,
            ..SizingSection::default()
        };
        config
    }

    async fn fixture_with(settlement: Arc<dyn Settlement>, max_positions: u32) -> Fixture {
        let (gate, tasks) = RiskGate::spawn(
            CircuitBreaker::new(
                CircuitBreakerConfig {
                    max_concurrent_positions: max_positions,
                    ..CircuitBreakerConfig::default()
                },
                100.0,
            ),
            None,
            Arc::new(RecordingAlertSink::new()),
        );
        let feed = Arc::new(BroadcastPriceFeed::new());
        feed.set_price("MintA", 1.0).await;
        let alerts = Arc::new(RecordingAlertSink::new());
        let decay = Arc::new(DecayFeedback::new(
            WalletDecayTracker::new(WalletDecayConfig::default()),
            None,
        ));
        let lifecycle = LifecycleManager::new(
            LifecycleSettings::from_config(&config()).unwrap(),
            gate.clone(),
            settlement,
            feed.clone(),
            decay.clone(),
            alerts.clone(),
            None,
        );
        Fixture {
            lifecycle,
            gate,
            _tasks: tasks,
            feed,
            alerts,
            decay,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(Arc::new(SimulatedSettlement::new(0)), 5).await
    }

    fn signal() -> Signal {
        Signal {
            id: Uuid::new_v4(),
            wallet_id: "WalletA".to_string(),
            token_mint: "MintA".to_string(),
            direction: Direction::Buy,
            amount: 5.0,
            observed_at: Utc::now(),
            raw_source: "test".to_string(),
        }
    }

    fn breakdown(score: f64) -> ScoreBreakdown {
        let mut b = ScoreBreakdown::compose(score, score, score, score, ScoringWeights::default(), vec![]);
        b.final_score = score;
        b
    }

    fn admitted_id(outcome: SignalOutcome) -> Uuid {
        match outcome {
            SignalOutcome::Admitted { position_id } => position_id,
            other => panic!("expected admitted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_high_conviction_sizing() {
        let f = fixture().await;
        let id = admitted_id(f.lifecycle.admit(&signal(), &breakdown(0.85), None, Utc::now()).await.unwrap());
        let p = f.lifecycle.position(id).await.unwrap();
        assert_relative_eq!(p.size, 1.5, epsilon = 1e-9);
        assert_eq!(p.orders.len(), 1);
        assert_eq!(p.orders[0].status, OrderStatus::SimFilled);
        assert_eq!(p.mode, ExecutionMode::Simulation);
        assert_eq!(f.gate.snapshot().await.unwrap().open_positions_count, 1);
    }

    #[tokio::test]
    async fn test_duplicate_returns_existing() {
        let f = fixture().await;
        let s = signal();
        let id = admitted_id(f.lifecycle.admit(&s, &breakdown(0.9), None, Utc::now()).await.unwrap());
        let again = f.lifecycle.admit(&s, &breakdown(0.9), None, Utc::now()).await.unwrap();
        assert_eq!(again, SignalOutcome::Duplicate { position_id: id });
        assert_eq!(f.lifecycle.positions().await.len(), 1);
        assert_eq!(f.gate.snapshot().await.unwrap().open_positions_count, 1);
    }

    #[tokio::test]
    async fn test_threshold_is_inclusive() {
        let f = fixture().await;
        let below = f.lifecycle.admit(&signal(), &breakdown(0.69), None, Utc::now()).await.unwrap();
        assert_eq!(below, SignalOutcome::BelowThreshold);
        let at = f.lifecycle.admit(&signal(), &breakdown(0.70), None, Utc::now()).await.unwrap();
        assert!(matches!(at, SignalOutcome::Admitted { .. }));
    }

    #[tokio::test]
    async fn test_position_limit_outcome() {
        let f = fixture_with(Arc::new(SimulatedSettlement::new(0)), 1).await;
        f.lifecycle.admit(&signal(), &breakdown(0.9), None, Utc::now()).await.unwrap();
        let second = f.lifecycle.admit(&signal(), &breakdown(0.9), None, Utc::now()).await.unwrap();
        assert_eq!(second, SignalOutcome::PositionLimitReached);
    }

    #[tokio::test]
    async fn test_strategy_by_score_and_override() {
        let f = fixture().await;
        let high = admitted_id(f.lifecycle.admit(&signal(), &breakdown(0.9), None, Utc::now()).await.unwrap());
        assert_eq!(f.lifecycle.position(high).await.unwrap().exit_strategy.name, "moonbag_runner");

        let mid = admitted_id(f.lifecycle.admit(&signal(), &breakdown(0.75), None, Utc::now()).await.unwrap());
        assert_eq!(f.lifecycle.position(mid).await.unwrap().exit_strategy.name, "balanced");

        let forced = admitted_id(
            f.lifecycle
                .admit(&signal(), &breakdown(0.9), Some(PRESET_CONSERVATIVE), Utc::now())
                .await
                .unwrap(),
        );
        assert_eq!(f.lifecycle.position(forced).await.unwrap().exit_strategy.name, "conservative");

        let unknown = f.lifecycle.admit(&signal(), &breakdown(0.9), Some("nope"), Utc::now()).await;
        assert!(matches!(unknown, Err(LifecycleError::Strategy(_))));
        assert_eq!(f.gate.snapshot().await.unwrap().open_positions_count, 3);
    }

    #[tokio::test]
    async fn test_unknown_override_below_threshold_is_not_an_error() {
        let f = fixture().await;
        let outcome = f
            .lifecycle
            .admit(&signal(), &breakdown(0.5), Some("nope"), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, SignalOutcome::BelowThreshold);
    }

    #[tokio::test]
    async fn test_refused_signal_leaves_no_admission_slot() {
        let f = fixture().await;
        let s = signal();
        let below = f.lifecycle.admit(&s, &breakdown(0.5), None, Utc::now()).await.unwrap();
        assert_eq!(below, SignalOutcome::BelowThreshold);
        assert!(f.lifecycle.admissions.lock().await.is_empty());

        // the same signal may be re-evaluated later
        let again = f.lifecycle.admit(&s, &breakdown(0.9), None, Utc::now()).await.unwrap();
        assert!(matches!(again, SignalOutcome::Admitted { .. }));
        assert_eq!(f.lifecycle.admissions.lock().await.len(), 1);
    }

    /// Feed whose quote for one mint takes a long time
    struct SlowFeed {
        inner: Arc<BroadcastPriceFeed>,
        slow_mint: &'static str,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl PriceFeed for SlowFeed {
        async fn subscribe(
            &self,
            token_mint: &str,
        ) -> Result<tokio::sync::mpsc::Receiver<crate::ports::market_data::PriceTick>, MarketDataError> {
            self.inner.subscribe(token_mint).await
        }

        async fn latest(&self, token_mint: &str) -> Result<f64, MarketDataError> {
            if token_mint == self.slow_mint {
                tokio::time::sleep(self.delay).await;
            }
            self.inner.latest(token_mint).await
        }
    }

    async fn slow_lifecycle(delay: Duration) -> (Arc<LifecycleManager>, RiskGateHandle, RiskGateTasks) {
        let (gate, tasks) = RiskGate::spawn(
            CircuitBreaker::new(CircuitBreakerConfig::default(), 100.0),
            None,
            Arc::new(RecordingAlertSink::new()),
        );
        let inner = Arc::new(BroadcastPriceFeed::new());
        inner.set_price("SlowMint", 1.0).await;
        inner.set_price("FastMint", 1.0).await;
        let lifecycle = LifecycleManager::new(
            LifecycleSettings::from_config(&config()).unwrap(),
            gate.clone(),
            Arc::new(SimulatedSettlement::new(0)),
            Arc::new(SlowFeed {
                inner,
                slow_mint: "SlowMint",
                delay,
            }),
            Arc::new(DecayFeedback::new(
                WalletDecayTracker::new(WalletDecayConfig::default()),
                None,
            )),
            Arc::new(RecordingAlertSink::new()),
            None,
        );
        (Arc::new(lifecycle), gate, tasks)
    }

    fn signal_for(wallet: &str, mint: &str) -> Signal {
        Signal {
            wallet_id: wallet.to_string(),
            token_mint: mint.to_string(),
            ..signal()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_price_does_not_block_other_admissions() {
        let (lifecycle, gate, _tasks) = slow_lifecycle(Duration::from_secs(30)).await;

        let slow = {
            let lifecycle = Arc::clone(&lifecycle);
            tokio::spawn(async move {
                lifecycle
                    .admit(&signal_for("WalletA", "SlowMint"), &breakdown(0.9), None, Utc::now())
                    .await
            })
        };
        // let the slow admission reach the feed
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let started = tokio::time::Instant::now();
        let fast = tokio::time::timeout(
            Duration::from_secs(1),
            lifecycle.admit(&signal_for("WalletB", "FastMint"), &breakdown(0.9), None, Utc::now()),
        )
        .await
        .expect("fast admission waited on the slow one")
        .unwrap();
        assert!(matches!(fast, SignalOutcome::Admitted { .. }));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!slow.is_finished());

        let slow = slow.await.unwrap().unwrap();
        assert!(matches!(slow, SignalOutcome::Admitted { .. }));
        assert_eq!(gate.snapshot().await.unwrap().open_positions_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_duplicate_waits_for_first_admission() {
        let (lifecycle, gate, _tasks) = slow_lifecycle(Duration::from_secs(5)).await;
        let s = signal_for("WalletA", "SlowMint");

        let b1 = breakdown(0.9);
        let b2 = breakdown(0.9);
        let (first, second) = tokio::join!(
            lifecycle.admit(&s, &b1, None, Utc::now()),
            lifecycle.admit(&s, &b2, None, Utc::now()),
        );
        let outcomes = [first.unwrap(), second.unwrap()];
        let admitted: Vec<Uuid> = outcomes
            .iter()
            .filter_map(|o| match o {
                SignalOutcome::Admitted { position_id } => Some(*position_id),
                _ => None,
            })
            .collect();
        assert_eq!(admitted.len(), 1);
        assert!(outcomes.contains(&SignalOutcome::Duplicate { position_id: admitted[0] }));
        assert_eq!(gate.snapshot().await.unwrap().open_positions_count, 1);
    }

    #[tokio::test]
    async fn test_missing_price_releases_slot() {
        let f = fixture().await;
        let mut s = signal();
        s.token_mint = "Unpriced".to_string();
        let result = f.lifecycle.admit(&s, &breakdown(0.9), None, Utc::now()).await;
        assert!(matches!(result, Err(LifecycleError::MarketData(_))));
        assert_eq!(f.gate.snapshot().await.unwrap().open_positions_count, 0);
    }

    #[tokio::test]
    async fn test_live_entry_failure_releases_slot_and_alerts() {
        let execution = Arc::new(ScriptedExecution::new(0));
        execution.fail_next(10).await;
        let policy = RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
            submit_timeout: Duration::from_secs(1),
        };
        let f = fixture_with(Arc::new(LiveSettlement::new(execution, policy)), 5).await;

        let outcome = f.lifecycle.admit(&signal(), &breakdown(0.9), None, Utc::now()).await.unwrap();
        let id = match outcome {
            SignalOutcome::EntryFailed { position_id } => position_id,
            other => panic!("expected entry failure, got {:?}", other),
        };

        let p = f.lifecycle.position(id).await.unwrap();
        assert_eq!(p.status, PositionStatus::Open);
        assert_eq!(p.filled_size, 0.0);
        assert_eq!(p.orders[0].status, OrderStatus::Failed);
        assert_eq!(p.orders[0].attempts, 3);

        let state = f.gate.snapshot().await.unwrap();
        assert_eq!(state.open_positions_count, 0);
        assert_eq!(state.consecutive_losses, 0);

        let alerts = f.alerts.alerts().await;
        assert!(matches!(alerts[0].kind, AlertKind::ExecutionFailed { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_stop_loss_closes_and_reports() {
        let f = fixture().await;
        let id = admitted_id(f.lifecycle.admit(&signal(), &breakdown(0.75), None, Utc::now()).await.unwrap());

        // balanced preset: stop at 0.5x
        let report = f
            .lifecycle
            .evaluate(id, &EvaluationContext::tick(0.5, Utc::now()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.reason, OrderReason::StopLoss);
        assert_eq!(report.position_status, PositionStatus::Closed);
        assert_relative_eq!(report.realized_pnl, -0.5, epsilon = 1e-9);

        let state = f.gate.snapshot().await.unwrap();
        assert_eq!(state.open_positions_count, 0);
        assert_eq!(state.consecutive_losses, 1);
        assert_relative_eq!(state.current_equity, 99.5, epsilon = 1e-9);

        let stats = f.decay.stats("WalletA").await.unwrap();
        assert_eq!(stats.total_trades, 1);
        assert!(f.lifecycle.is_finished(id).await);
    }

    #[tokio::test]
    async fn test_overfill_freezes_position() {
        let f = fixture().await;
        let id = admitted_id(f.lifecycle.admit(&signal(), &breakdown(0.75), None, Utc::now()).await.unwrap());

        let result = f.lifecycle.apply_exit(id, OrderReason::Manual, 5.0, 1.0, Utc::now()).await;
        assert!(matches!(
            result,
            Err(LifecycleError::Position(PositionError::InvariantViolation { .. }))
        ));

        let p = f.lifecycle.position(id).await.unwrap();
        assert_eq!(p.status, PositionStatus::ReviewRequired);
        assert_eq!(p.exited_amount, 0.0);
        assert!(f
            .alerts
            .alerts()
            .await
            .iter()
            .any(|a| matches!(a.kind, AlertKind::InvariantViolation { .. })));

        // frozen positions are not evaluated any more
        let none = f.lifecycle.evaluate(id, &EvaluationContext::tick(0.1, Utc::now())).await.unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_manual_exit_and_swap() {
        let f = fixture().await;
        let id = admitted_id(f.lifecycle.admit(&signal(), &breakdown(0.75), None, Utc::now()).await.unwrap());

        f.lifecycle.swap_strategy(id, "moonbag_runner").await.unwrap();
        assert_eq!(f.lifecycle.position(id).await.unwrap().exit_strategy.name, "moonbag_runner");

        f.feed.set_price("MintA", 1.2).await;
        let report = f.lifecycle.manual_exit(id, Utc::now()).await.unwrap();
        assert_eq!(report.reason, OrderReason::Manual);
        assert_eq!(report.position_status, PositionStatus::Closed);
        assert_relative_eq!(report.realized_pnl, 0.2, epsilon = 1e-9);

        assert!(matches!(
            f.lifecycle.swap_strategy(id, "balanced").await,
            Err(LifecycleError::Position(PositionError::AlreadyClosed(_)))
        ));
        assert!(matches!(
            f.lifecycle.manual_exit(id, Utc::now()).await,
            Err(LifecycleError::NotActive(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_exit_leaves_level_unfired() {
        let execution = Arc::new(ScriptedExecution::new(0));
        let policy = RetryPolicy {
            max_attempts: 1,
            base_backoff: Duration::from_millis(1),
            submit_timeout: Duration::from_secs(1),
        };
        let f = fixture_with(Arc::new(LiveSettlement::new(execution.clone(), policy)), 5).await;
        let id = admitted_id(f.lifecycle.admit(&signal(), &breakdown(0.75), None, Utc::now()).await.unwrap());

        let mut strategy = f.lifecycle.position(id).await.unwrap().exit_strategy;
        strategy.take_profit_levels = vec![TakeProfitLevel { trigger_multiple: 2.0, sell_pct: 50.0 }];
        strategy.trailing_stop = None;
        strategy.name = "single".to_string();
        let mut settings = f.lifecycle.settings().await;
        settings.catalog.insert(strategy).unwrap();
        f.lifecycle.update_settings(settings).await;
        f.lifecycle.swap_strategy(id, "single").await.unwrap();

        execution.fail_next(1).await;
        let failed = f
            .lifecycle
            .evaluate(id, &EvaluationContext::tick(2.1, Utc::now()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failed.order_status, OrderStatus::Failed);
        assert!(f.lifecycle.position(id).await.unwrap().exit_state.fired_levels.is_empty());

        let filled = f
            .lifecycle
            .evaluate(id, &EvaluationContext::tick(2.1, Utc::now()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(filled.order_status, OrderStatus::Filled);
        assert_eq!(filled.reason, OrderReason::ScalingOut);
        let p = f.lifecycle.position(id).await.unwrap();
        assert_eq!(p.exit_state.fired_levels, vec![0]);
        assert_eq!(p.status, PositionStatus::PartialExit);
    }
}
