//! Signal Pipeline
//!
//! Activity events in, signal-log entries out. Events are dispatched to a
//! bounded lane per wallet so one wallet's events are handled in arrival
//! order while different wallets proceed in parallel.
//!
//! Buys are checked for dormancy, scored and handed to the lifecycle
//! manager. Sells are routed as mirror exits to the positions opened from
//! that wallet on that token. Every signal is logged whatever happens.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::decay_feedback::DecayFeedback;
use super::lifecycle::{ExitReport, LifecycleManager, LifecycleSettings};
use super::position_worker::PositionWorkers;
use super::risk_gate::RiskGateHandle;
use crate::config::{Config, ExecutionSection};
use crate::domain::persistence::StateStore;
use crate::domain::score::ScoreBreakdown;
use crate::domain::signal::{ActivityEvent, Signal, SignalLogEntry, SignalOutcome};
use crate::ports::alerts::{AlertKind, AlertSeverity, AlertSink, OperatorAlert};
use crate::ports::market_data::PriceTick;
use crate::strategy::scorer::SignalScorer;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Pipeline is shutting down")]
    Closed,
    #[error("Lane for wallet {0} has stopped")]
    LaneStopped(String),
}

#[derive(Debug, Clone, Copy)]
pub struct LaneSettings {
    pub capacity: usize,
    /// An idle lane closes after this long
    pub idle_timeout: Duration,
}

impl LaneSettings {
    pub fn from_section(section: &ExecutionSection) -> Self {
        Self {
            capacity: section.lane_capacity.max(1),
            idle_timeout: Duration::from_secs(section.lane_idle_secs.max(1)),
        }
    }
}

struct Lane {
    id: u64,
    tx: mpsc::Sender<ActivityEvent>,
    /// Submits holding a sender clone; the lane only retires at zero
    inflight: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Lanes {
    open: HashMap<String, Lane>,
    next_id: u64,
    closed: bool,
}

pub struct SignalPipeline {
    scorer: Arc<SignalScorer>,
    lifecycle: Arc<LifecycleManager>,
    workers: Arc<PositionWorkers>,
    decay: Arc<DecayFeedback>,
    gate: RiskGateHandle,
    alerts: Arc<dyn AlertSink>,
    store: Option<StateStore>,
    lane_settings: LaneSettings,
    lanes: Mutex<Lanes>,
}

impl SignalPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scorer: Arc<SignalScorer>,
        lifecycle: Arc<LifecycleManager>,
        workers: Arc<PositionWorkers>,
        decay: Arc<DecayFeedback>,
        gate: RiskGateHandle,
        alerts: Arc<dyn AlertSink>,
        store: Option<StateStore>,
        lane_settings: LaneSettings,
    ) -> Self {
        Self {
            scorer,
            lifecycle,
            workers,
            decay,
            gate,
            alerts,
            store,
            lane_settings,
            lanes: Mutex::new(Lanes::default()),
        }
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    pub fn workers(&self) -> &Arc<PositionWorkers> {
        &self.workers
    }

    pub fn decay(&self) -> &Arc<DecayFeedback> {
        &self.decay
    }

    pub fn gate(&self) -> &RiskGateHandle {
        &self.gate
    }

    /// Handle one event to completion; used directly by replay
    pub async fn process_signal(&self, event: ActivityEvent, now: DateTime<Utc>) -> SignalLogEntry {
        let signal = Signal::from_event(event);

        let (breakdown, outcome) = match signal.validate() {
            Err(error) => {
                warn!(signal_id = %signal.id, %error, "Signal rejected");
                (None, SignalOutcome::Rejected { error })
            }
            Ok(()) if signal.is_buy() => self.handle_buy(&signal, now).await,
            Ok(()) => (None, self.handle_sell(&signal, now).await),
        };

        info!(
            signal_id = %signal.id,
            wallet = %signal.wallet_id,
            token = %signal.token_mint,
            direction = %signal.direction,
            score = breakdown.as_ref().map(|b| b.final_score),
            outcome = outcome.code(),
            "Signal processed"
        );

        let entry = SignalLogEntry {
            signal,
            breakdown,
            outcome,
            logged_at: now,
        };
        if let Some(store) = &self.store {
            if let Err(e) = store.append_signal(&entry) {
                error!(signal_id = %entry.signal.id, error = %e, "Failed to append signal log");
            }
        }
        entry
    }

    async fn handle_buy(
        &self,
        signal: &Signal,
        now: DateTime<Utc>,
    ) -> (Option<ScoreBreakdown>, SignalOutcome) {
        let health = self.decay.health(&signal.wallet_id, now).await;
        // the refused signal still counts as activity and wakes the wallet
        self.decay.record_activity(&signal.wallet_id, now).await;
        if health.dormant {
            return (None, SignalOutcome::WalletDormant);
        }

        let breakdown = self.scorer.score(signal, health, now).await;
        let outcome = match self.lifecycle.admit(signal, &breakdown, None, now).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(signal_id = %signal.id, error = %e, "Admission failed");
                SignalOutcome::Rejected { error: e.to_string() }
            }
        };

        if let SignalOutcome::Admitted { position_id } = &outcome {
            self.workers.spawn(*position_id, &signal.token_mint).await;
        }
        (Some(breakdown), outcome)
    }

    async fn handle_sell(&self, signal: &Signal, now: DateTime<Utc>) -> SignalOutcome {
        self.decay.record_activity(&signal.wallet_id, now).await;

        let positions = self
            .lifecycle
            .positions_for_source(&signal.wallet_id, &signal.token_mint)
            .await;
        for position_id in &positions {
            match self.workers.source_sold(*position_id, now).await {
                Ok(Some(report)) => debug!(%position_id, reason = %report.reason, "Source wallet sold"),
                Ok(None) => debug!(%position_id, "Source wallet sold, mirror exit disabled"),
                Err(e) => warn!(%position_id, error = %e, "Mirror exit routing failed"),
            }
        }
        SignalOutcome::MirrorExitRouted { positions }
    }

    /// Queue an event on its wallet's lane
    pub async fn submit(self: &Arc<Self>, event: ActivityEvent) -> Result<(), PipelineError> {
        let wallet = event.wallet_id.clone();
        let (tx, inflight) = {
            let mut lanes = self.lanes.lock().await;
            if lanes.closed {
                return Err(PipelineError::Closed);
            }
            if !lanes.open.contains_key(&wallet) {
                lanes.next_id += 1;
                let lane = self.spawn_lane(&wallet, lanes.next_id);
                lanes.open.insert(wallet.clone(), lane);
            }
            let lane = lanes
                .open
                .get(&wallet)
                .ok_or_else(|| PipelineError::LaneStopped(wallet.clone()))?;
            lane.inflight.fetch_add(1, Ordering::SeqCst);
            (lane.tx.clone(), Arc::clone(&lane.inflight))
        };
        let sent = tx.send(event).await;
        inflight.fetch_sub(1, Ordering::SeqCst);
        sent.map_err(|_| PipelineError::LaneStopped(wallet))
    }

    fn spawn_lane(self: &Arc<Self>, wallet: &str, id: u64) -> Lane {
        let (tx, mut rx) = mpsc::channel::<ActivityEvent>(self.lane_settings.capacity);
        let inflight = Arc::new(AtomicUsize::new(0));
        let idle_timeout = self.lane_settings.idle_timeout;
        let pipeline = Arc::clone(self);
        let owner = wallet.to_string();
        let pending = Arc::clone(&inflight);

        let task = tokio::spawn(async move {
            loop {
                match tokio::time::timeout(idle_timeout, rx.recv()).await {
                    Ok(Some(event)) => {
                        pipeline.process_signal(event, Utc::now()).await;
                    }
                    Ok(None) => break,
                    Err(_) => {
                        if pipeline.retire_lane(&owner, id, &pending, &rx).await {
                            break;
                        }
                    }
                }
            }
        });
        debug!(wallet = %wallet, "Signal lane opened");
        Lane { id, tx, inflight, task }
    }

    /// Drop an idle lane from the map. Refuses while a submit holds its
    /// sender or events are still queued, so nothing sent is lost.
    async fn retire_lane(
        &self,
        wallet: &str,
        id: u64,
        inflight: &AtomicUsize,
        rx: &mpsc::Receiver<ActivityEvent>,
    ) -> bool {
        let mut lanes = self.lanes.lock().await;
        if lanes.closed {
            return false;
        }
        if !lanes.open.get(wallet).map_or(false, |lane| lane.id == id) {
            // already detached from the map
            return true;
        }
        if inflight.load(Ordering::SeqCst) > 0 || !rx.is_empty() {
            return false;
        }
        lanes.open.remove(wallet);
        debug!(wallet = %wallet, "Idle signal lane closed");
        true
    }

    /// Wallets with an open lane
    pub async fn lane_count(&self) -> usize {
        self.lanes.lock().await.open.len()
    }

    /// Consume one inbound stream until it closes
    pub fn consume(self: &Arc<Self>, mut events: mpsc::Receiver<ActivityEvent>) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let Err(e) = pipeline.submit(event).await {
                    warn!(error = %e, "Dropping event");
                    if e == PipelineError::Closed {
                        break;
                    }
                }
            }
        })
    }

    /// Deliver a price tick to every position on the token and wait for them
    pub async fn on_price(&self, tick: &PriceTick) -> Vec<ExitReport> {
        self.workers
            .tick_token(&tick.token_mint, tick.price, tick.observed_at)
            .await
    }

    /// One maintenance pass: breaker re-evaluation, dormancy sweep, persistence
    pub async fn run_maintenance(&self, now: DateTime<Utc>) {
        match self.gate.reevaluate(now).await {
            Ok(Some(reason)) => warn!(%reason, "Circuit breaker tripped on re-evaluation"),
            Ok(None) => {}
            Err(e) => error!(error = %e, "Risk gate unavailable for re-evaluation"),
        }

        for wallet_id in self.decay.sweep_dormancy(now).await {
            self.alerts
                .alert(OperatorAlert::new(AlertSeverity::Info, AlertKind::WalletDormant { wallet_id }))
                .await;
        }

        self.decay.flush().await;
        self.lifecycle.persist().await;
    }

    /// Push a reloaded config into every component
    pub async fn apply_config(&self, config: &Config) {
        self.scorer.update_settings(config.scoring.clone()).await;
        self.decay.update_config(config.decay.decay_config()).await;
        if let Err(e) = self.gate.update_config(config.risk.breaker_config()).await {
            error!(error = %e, "Could not update risk configuration");
        }
        match LifecycleSettings::from_config(config) {
            Ok(settings) => self.lifecycle.update_settings(settings).await,
            Err(e) => warn!(error = %e, "Keeping previous admission settings"),
        }
        info!("Configuration applied");
    }

    /// Periodic maintenance plus config reloads until `stop` flips
    pub fn spawn_maintenance(
        self: &Arc<Self>,
        interval: Duration,
        mut config_updates: Option<watch::Receiver<Arc<Config>>>,
        mut stop: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                let event = tokio::select! {
                    _ = ticker.tick() => MaintenanceEvent::Tick,
                    changed = config_changed(&mut config_updates) => MaintenanceEvent::Config(changed),
                    _ = stop.changed() => MaintenanceEvent::Stop,
                };

                match event {
                    MaintenanceEvent::Tick => pipeline.run_maintenance(Utc::now()).await,
                    MaintenanceEvent::Config(true) => {
                        let config = config_updates
                            .as_mut()
                            .map(|rx| Arc::clone(&rx.borrow_and_update()));
                        if let Some(config) = config {
                            pipeline.apply_config(&config).await;
                        }
                    }
                    MaintenanceEvent::Config(false) => config_updates = None,
                    MaintenanceEvent::Stop => break,
                }
                if *stop.borrow() {
                    break;
                }
            }
            debug!("Maintenance ticker stopped");
        })
    }

    /// Stop accepting events and drain every lane
    pub async fn shutdown_lanes(&self) {
        let lanes: Vec<Lane> = {
            let mut lanes = self.lanes.lock().await;
            lanes.closed = true;
            lanes.open.drain().map(|(_, lane)| lane).collect()
        };
        let count = lanes.len();
        for Lane { tx, task, .. } in lanes {
            drop(tx);
            if let Err(e) = task.await {
                warn!(error = %e, "Signal lane ended abnormally");
            }
        }
        info!(count, "Signal lanes drained");
    }
}

enum MaintenanceEvent {
    Tick,
    Config(bool),
    Stop,
}

/// Resolves true on a new config, false once the watcher is gone
async fn config_changed(rx: &mut Option<watch::Receiver<Arc<Config>>>) -> bool {
    match rx.as_mut() {
        Some(rx) => rx.changed().await.is_ok(),
        None => std::future::pending().await,
    }
}
