//! Engine assembly
//!
//! Wires the risk gate, decay feedback, scorer, lifecycle manager, position
//! workers and signal pipeline from one config, restores recovered state and
//! owns the background tasks until shutdown.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::decay_feedback::DecayFeedback;
use super::lifecycle::{LifecycleManager, LifecycleSettings};
use super::pipeline::{LaneSettings, SignalPipeline};
use super::position_worker::{PositionWorkers, WorkerSettings};
use super::risk_gate::{RiskGate, RiskGateHandle, RiskGateTasks};
use super::settlement::{LiveSettlement, RetryPolicy, Settlement, SimulatedSettlement};
use crate::config::{Config, ConfigError};
use crate::domain::circuit_breaker::CircuitBreaker;
use crate::domain::persistence::{RecoveredState, StateStore};
use crate::domain::position::ExecutionMode;
use crate::domain::signal::{ActivityEvent, SignalLogEntry};
use crate::domain::wallet_decay::WalletDecayTracker;
use crate::ports::alerts::AlertSink;
use crate::ports::execution::ExecutionClient;
use crate::ports::market_data::PriceFeed;
use crate::ports::providers::{ClusterConfirmation, TokenCharacteristicsProvider, WalletQualityProvider};
use crate::strategy::scorer::SignalScorer;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Live mode requires an execution client")]
    MissingExecutionClient,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// External collaborators the engine runs against
pub struct EnginePorts {
    pub wallets: Arc<dyn WalletQualityProvider>,
    pub tokens: Arc<dyn TokenCharacteristicsProvider>,
    pub cluster: Arc<dyn ClusterConfirmation>,
    pub prices: Arc<dyn PriceFeed>,
    /// Required in live mode only
    pub execution: Option<Arc<dyn ExecutionClient>>,
    pub alerts: Arc<dyn AlertSink>,
    /// Subscribe each position worker to the price feed
    pub subscribe_prices: bool,
    /// Wall-clock maintenance ticker and per-worker time checks; off when
    /// the caller drives time itself
    pub run_timers: bool,
}

pub struct Engine {
    pipeline: Arc<SignalPipeline>,
    gate: RiskGateHandle,
    gate_tasks: RiskGateTasks,
    maintenance: Option<JoinHandle<()>>,
    stop_tx: watch::Sender<bool>,
}

impl Engine {
    /// Build and start every component
    pub async fn start(
        config: &Config,
        ports: EnginePorts,
        recovered: RecoveredState,
        store: Option<StateStore>,
        config_updates: Option<watch::Receiver<Arc<Config>>>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let settings = LifecycleSettings::from_config(config)?;

        let settlement: Arc<dyn Settlement> = match config.execution.mode {
            ExecutionMode::Simulation => Arc::new(SimulatedSettlement::new(config.execution.slippage_bps)),
            ExecutionMode::Live => {
                let client = ports.execution.clone().ok_or(EngineError::MissingExecutionClient)?;
                Arc::new(LiveSettlement::new(client, RetryPolicy::from_section(&config.execution)))
            }
        };

        let breaker_config = config.risk.breaker_config();
        let breaker = match recovered.breaker {
            Some(state) => {
                info!(status = state.status.description(), "Restoring circuit breaker state");
                CircuitBreaker::restore(breaker_config, state)
            }
            None => CircuitBreaker::new(breaker_config, config.sizing.capital),
        };
        let (gate, gate_tasks) = RiskGate::spawn(breaker, store.clone(), Arc::clone(&ports.alerts));

        let decay = Arc::new(DecayFeedback::new(
            WalletDecayTracker::restore(config.decay.decay_config(), recovered.wallet_stats),
            store.clone(),
        ));

        let scorer = Arc::new(SignalScorer::new(
            ports.wallets,
            ports.tokens,
            ports.cluster,
            config.scoring.clone(),
        ));

        let lifecycle = Arc::new(LifecycleManager::new(
            settings,
            gate.clone(),
            settlement,
            Arc::clone(&ports.prices),
            Arc::clone(&decay),
            Arc::clone(&ports.alerts),
            store.clone(),
        ));

        let worker_feed = ports.subscribe_prices.then(|| Arc::clone(&ports.prices));
        let workers = Arc::new(PositionWorkers::new(
            Arc::clone(&lifecycle),
            worker_feed,
            WorkerSettings::new(
                config.execution.worker_queue_capacity,
                if ports.run_timers { config.execution.time_check_interval_secs } else { 0 },
            ),
        ));

        for position in lifecycle.restore(recovered.positions).await {
            workers.spawn(position.id, &position.token_mint).await;
        }

        let pipeline = Arc::new(SignalPipeline::new(
            scorer,
            lifecycle,
            workers,
            decay,
            gate.clone(),
            ports.alerts,
            store,
            LaneSettings::from_section(&config.execution),
        ));

        let (stop_tx, stop_rx) = watch::channel(false);
        let maintenance = ports.run_timers.then(|| {
            pipeline.spawn_maintenance(
                Duration::from_secs(config.risk.reevaluate_interval_secs),
                config_updates,
                stop_rx,
            )
        });

        info!(
            mode = %config.execution.mode,
            max_positions = config.risk.max_concurrent_positions,
            threshold = config.scoring.admission_threshold,
            "Engine started"
        );

        Ok(Self {
            pipeline,
            gate,
            gate_tasks,
            maintenance,
            stop_tx,
        })
    }

    pub fn pipeline(&self) -> &Arc<SignalPipeline> {
        &self.pipeline
    }

    pub fn gate(&self) -> &RiskGateHandle {
        &self.gate
    }

    pub async fn process_signal(&self, event: ActivityEvent, now: DateTime<Utc>) -> SignalLogEntry {
        self.pipeline.process_signal(event, now).await
    }

    /// Stop lanes, workers and the ticker, then flush state and stop the gate
    pub async fn shutdown(self) {
        info!("Engine shutting down");
        let _ = self.stop_tx.send(true);
        if let Some(maintenance) = self.maintenance {
            if let Err(e) = maintenance.await {
                warn!(error = %e, "Maintenance task ended abnormally");
            }
        }

        self.pipeline.shutdown_lanes().await;
        self.pipeline.workers().shutdown().await;
        self.pipeline.lifecycle().persist().await;
        self.pipeline.decay().flush().await;

        self.gate.shutdown().await;
        self.gate_tasks.join().await;
        info!("Engine stopped");
    }
}
