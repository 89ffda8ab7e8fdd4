//! Position Workers
//!
//! One task per open position. Price ticks, source-wallet sells, time
//! checks and operator commands all go through the worker's queue, so
//! evaluations for one position run strictly one after another while
//! different positions run in parallel. A worker stops on its own once its
//! position is closed or frozen.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::lifecycle::{ExitReport, LifecycleError, LifecycleManager};
use crate::ports::market_data::PriceFeed;
use crate::strategy::exit_engine::EvaluationContext;

pub type EvaluationReply = oneshot::Sender<Result<Option<ExitReport>, LifecycleError>>;

pub enum WorkerCommand {
    Tick {
        price: f64,
        at: DateTime<Utc>,
        ack: Option<EvaluationReply>,
    },
    SourceWalletSold {
        at: DateTime<Utc>,
        ack: Option<EvaluationReply>,
    },
    CheckTime {
        at: DateTime<Utc>,
        ack: Option<EvaluationReply>,
    },
    ReplaceStrategy {
        name: String,
        reply: oneshot::Sender<Result<(), LifecycleError>>,
    },
    ManualExit {
        at: DateTime<Utc>,
        reply: oneshot::Sender<Result<ExitReport, LifecycleError>>,
    },
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub queue_capacity: usize,
    /// Periodic time-rule check; `None` disables the timer
    pub time_check_interval: Option<Duration>,
}

impl WorkerSettings {
    pub fn new(queue_capacity: usize, time_check_interval_secs: u64) -> Self {
        Self {
            queue_capacity: queue_capacity.max(1),
            time_check_interval: (time_check_interval_secs > 0)
                .then(|| Duration::from_secs(time_check_interval_secs)),
        }
    }
}

struct WorkerHandle {
    token_mint: String,
    tx: mpsc::Sender<WorkerCommand>,
    task: JoinHandle<()>,
}

type Registry = Arc<RwLock<HashMap<Uuid, WorkerHandle>>>;

pub struct PositionWorkers {
    lifecycle: Arc<LifecycleManager>,
    /// Live ticks are forwarded from this feed when set
    feed: Option<Arc<dyn PriceFeed>>,
    settings: WorkerSettings,
    workers: Registry,
}

impl PositionWorkers {
    pub fn new(lifecycle: Arc<LifecycleManager>, feed: Option<Arc<dyn PriceFeed>>, settings: WorkerSettings) -> Self {
        Self {
            lifecycle,
            feed,
            settings,
            workers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start the worker for an active position; no-op if one is running
    pub async fn spawn(&self, position_id: Uuid, token_mint: &str) {
        let mut workers = self.workers.write().await;
        if workers.contains_key(&position_id) {
            return;
        }

        let (tx, rx) = mpsc::channel(self.settings.queue_capacity);
        let forwarder = match &self.feed {
            Some(feed) => spawn_forwarder(feed.as_ref(), token_mint, tx.clone()).await,
            None => None,
        };

        let task = tokio::spawn(run_worker(
            Arc::clone(&self.lifecycle),
            position_id,
            rx,
            self.settings.time_check_interval,
            Arc::clone(&self.workers),
            forwarder,
        ));

        workers.insert(
            position_id,
            WorkerHandle {
                token_mint: token_mint.to_string(),
                tx,
                task,
            },
        );
        debug!(%position_id, token = %token_mint, "Position worker started");
    }

    async fn sender(&self, position_id: Uuid) -> Option<mpsc::Sender<WorkerCommand>> {
        self.workers.read().await.get(&position_id).map(|w| w.tx.clone())
    }

    async fn evaluate_via(
        &self,
        position_id: Uuid,
        build: impl FnOnce(Option<EvaluationReply>) -> WorkerCommand,
    ) -> Result<Option<ExitReport>, LifecycleError> {
        let tx = self
            .sender(position_id)
            .await
            .ok_or(LifecycleError::WorkerStopped(position_id))?;
        let (reply, rx) = oneshot::channel();
        tx.send(build(Some(reply)))
            .await
            .map_err(|_| LifecycleError::WorkerStopped(position_id))?;
        rx.await.map_err(|_| LifecycleError::WorkerStopped(position_id))?
    }

    /// Evaluate one price tick and wait for the result
    pub async fn tick(&self, position_id: Uuid, price: f64, at: DateTime<Utc>) -> Result<Option<ExitReport>, LifecycleError> {
        self.evaluate_via(position_id, |ack| WorkerCommand::Tick { price, at, ack }).await
    }

    /// Deliver a tick to every worker on this token, in turn
    pub async fn tick_token(&self, token_mint: &str, price: f64, at: DateTime<Utc>) -> Vec<ExitReport> {
        let ids: Vec<Uuid> = self
            .workers
            .read()
            .await
            .iter()
            .filter(|(_, w)| w.token_mint == token_mint)
            .map(|(id, _)| *id)
            .collect();

        let mut reports = Vec::new();
        for id in ids {
            match self.tick(id, price, at).await {
                Ok(Some(report)) => reports.push(report),
                Ok(None) | Err(LifecycleError::WorkerStopped(_)) => {}
                Err(e) => warn!(position_id = %id, error = %e, "Tick evaluation failed"),
            }
        }
        reports
    }

    pub async fn source_sold(&self, position_id: Uuid, at: DateTime<Utc>) -> Result<Option<ExitReport>, LifecycleError> {
        self.evaluate_via(position_id, |ack| WorkerCommand::SourceWalletSold { at, ack }).await
    }

    pub async fn check_time(&self, position_id: Uuid, at: DateTime<Utc>) -> Result<Option<ExitReport>, LifecycleError> {
        self.evaluate_via(position_id, |ack| WorkerCommand::CheckTime { at, ack }).await
    }

    /// Swap the strategy through the worker queue, or directly if no worker runs
    pub async fn replace_strategy(&self, position_id: Uuid, name: &str) -> Result<(), LifecycleError> {
        let Some(tx) = self.sender(position_id).await else {
            return self.lifecycle.swap_strategy(position_id, name).await;
        };
        let (reply, rx) = oneshot::channel();
        tx.send(WorkerCommand::ReplaceStrategy {
            name: name.to_string(),
            reply,
        })
        .await
        .map_err(|_| LifecycleError::WorkerStopped(position_id))?;
        rx.await.map_err(|_| LifecycleError::WorkerStopped(position_id))?
    }

    pub async fn manual_exit(&self, position_id: Uuid, at: DateTime<Utc>) -> Result<ExitReport, LifecycleError> {
        let Some(tx) = self.sender(position_id).await else {
            return self.lifecycle.manual_exit(position_id, at).await;
        };
        let (reply, rx) = oneshot::channel();
        tx.send(WorkerCommand::ManualExit { at, reply })
            .await
            .map_err(|_| LifecycleError::WorkerStopped(position_id))?;
        rx.await.map_err(|_| LifecycleError::WorkerStopped(position_id))?
    }

    pub async fn running(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.workers.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.workers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.workers.read().await.is_empty()
    }

    /// Stop every worker and wait for them to finish
    pub async fn shutdown(&self) {
        let workers: Vec<(Uuid, WorkerHandle)> = self.workers.write().await.drain().collect();
        let count = workers.len();
        for (_, worker) in &workers {
            let _ = worker.tx.send(WorkerCommand::Shutdown).await;
        }
        for (position_id, worker) in workers {
            if let Err(e) = worker.task.await {
                warn!(%position_id, error = %e, "Position worker ended abnormally");
            }
        }
        info!(count, "Position workers stopped");
    }
}

async fn spawn_forwarder(
    feed: &dyn PriceFeed,
    token_mint: &str,
    tx: mpsc::Sender<WorkerCommand>,
) -> Option<JoinHandle<()>> {
    match feed.subscribe(token_mint).await {
        Ok(mut ticks) => Some(tokio::spawn(async move {
            while let Some(tick) = ticks.recv().await {
                let command = WorkerCommand::Tick {
                    price: tick.price,
                    at: tick.observed_at,
                    ack: None,
                };
                if tx.send(command).await.is_err() {
                    break;
                }
            }
        })),
        Err(e) => {
            warn!(token = %token_mint, error = %e, "Price subscription failed, worker relies on direct ticks");
            None
        }
    }
}

async fn run_worker(
    lifecycle: Arc<LifecycleManager>,
    position_id: Uuid,
    mut rx: mpsc::Receiver<WorkerCommand>,
    time_check_interval: Option<Duration>,
    registry: Registry,
    forwarder: Option<JoinHandle<()>>,
) {
    let mut timer = time_check_interval.map(|period| {
        let mut timer = tokio::time::interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        timer
    });

    loop {
        let command = match timer.as_mut() {
            Some(timer) => tokio::select! {
                command = rx.recv() => command,
                _ = timer.tick() => Some(WorkerCommand::CheckTime { at: Utc::now(), ack: None }),
            },
            None => rx.recv().await,
        };

        let Some(command) = command else { break };
        match command {
            WorkerCommand::Tick { price, at, ack } => {
                let result = lifecycle.evaluate(position_id, &EvaluationContext::tick(price, at)).await;
                respond(position_id, result, ack);
            }
            WorkerCommand::SourceWalletSold { at, ack } => {
                let result = lifecycle.evaluate(position_id, &EvaluationContext::source_sold(at)).await;
                respond(position_id, result, ack);
            }
            WorkerCommand::CheckTime { at, ack } => {
                let result = lifecycle.evaluate(position_id, &EvaluationContext::time_check(at)).await;
                respond(position_id, result, ack);
            }
            WorkerCommand::ReplaceStrategy { name, reply } => {
                let _ = reply.send(lifecycle.swap_strategy(position_id, &name).await);
            }
            WorkerCommand::ManualExit { at, reply } => {
                let _ = reply.send(lifecycle.manual_exit(position_id, at).await);
            }
            WorkerCommand::Shutdown => break,
        }

        if lifecycle.is_finished(position_id).await {
            debug!(%position_id, "Position finished, worker exiting");
            break;
        }
    }

    if let Some(forwarder) = forwarder {
        forwarder.abort();
    }
    registry.write().await.remove(&position_id);
}

fn respond(
    position_id: Uuid,
    result: Result<Option<ExitReport>, LifecycleError>,
    ack: Option<EvaluationReply>,
) {
    match ack {
        Some(ack) => {
            let _ = ack.send(result);
        }
        None => {
            if let Err(e) = result {
                warn!(%position_id, error = %e, "Evaluation failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{BroadcastPriceFeed, RecordingAlertSink};
    use crate::application::decay_feedback::DecayFeedback;
    use crate::application::lifecycle::LifecycleSettings;
    use crate::application::risk_gate::RiskGate;
    use crate::application::settlement::SimulatedSettlement;
    use crate::config::Config;
    use crate::domain::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
    use crate::domain::order::OrderReason;
    use crate::domain::position::PositionStatus;
    use crate::domain::score::{ScoreBreakdown, ScoringWeights};
    use crate::domain::signal::{Direction, Signal, SignalOutcome};
    use crate::domain::wallet_decay::{WalletDecayConfig, WalletDecayTracker};
    use crate::ports::market_data::PriceTick;

    async fn setup(feed_ticks: bool) -> (Arc<LifecycleManager>, PositionWorkers, Arc<BroadcastPriceFeed>, Uuid) {
        let (gate, _tasks) = RiskGate::spawn(
            CircuitBreaker::new(CircuitBreakerConfig::default(), 100.0),
            None,
            Arc::new(RecordingAlertSink::new()),
        );
        let feed = Arc::new(BroadcastPriceFeed::new());
        feed.set_price("MintA", 1.0).await;
        let lifecycle = Arc::new(LifecycleManager::new(
            LifecycleSettings::from_config(&Config::default()).unwrap(),
            gate,
            Arc::new(SimulatedSettlement::new(0)),
            feed.clone(),
            Arc::new(DecayFeedback::new(WalletDecayTracker::new(WalletDecayConfig::default()), None)),
            Arc::new(RecordingAlertSink::new()),
            None,
        ));

        let signal = Signal {
            id: Uuid::new_v4(),
            wallet_id: "WalletA".to_string(),
            token_mint: "MintA".to_string(),
            direction: Direction::Buy,
            amount: 5.0,
            observed_at: Utc::now(),
            raw_source: "test".to_string(),
        };
        let mut breakdown = ScoreBreakdown::compose(0.75, 0.75, 0.75, 0.75, ScoringWeights::default(), vec![]);
        breakdown.final_score = 0.75;
        let id = match lifecycle.admit(&signal, &breakdown, None, Utc::now()).await.unwrap() {
            SignalOutcome::Admitted { position_id } => position_id,
            other => panic!("unexpected {:?}", other),
        };

        let live_feed: Option<Arc<dyn PriceFeed>> = if feed_ticks { Some(feed.clone()) } else { None };
        let workers = PositionWorkers::new(Arc::clone(&lifecycle), live_feed, WorkerSettings::new(16, 0));
        workers.spawn(id, "MintA").await;
        (lifecycle, workers, feed, id)
    }

    #[tokio::test]
    async fn test_tick_then_worker_exits_on_close() {
        let (lifecycle, workers, _feed, id) = setup(false).await;
        assert_eq!(workers.len().await, 1);

        assert!(workers.tick(id, 1.1, Utc::now()).await.unwrap().is_none());
        let report = workers.tick(id, 0.4, Utc::now()).await.unwrap().unwrap();
        assert_eq!(report.reason, OrderReason::StopLoss);

        // worker removes itself after the close
        for _ in 0..10 {
            if workers.is_empty().await {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(workers.is_empty().await);
        assert!(matches!(
            workers.tick(id, 0.4, Utc::now()).await,
            Err(LifecycleError::WorkerStopped(_))
        ));
        assert_eq!(lifecycle.position(id).await.unwrap().status, PositionStatus::Closed);
    }

    #[tokio::test]
    async fn test_source_sold_mirrors() {
        let (_lifecycle, workers, _feed, id) = setup(false).await;
        let report = workers.source_sold(id, Utc::now()).await.unwrap().unwrap();
        assert_eq!(report.reason, OrderReason::MirrorExit);
        assert_eq!(report.position_status, PositionStatus::Closed);
    }

    #[tokio::test]
    async fn test_forwarded_ticks_evaluate() {
        let (lifecycle, workers, feed, id) = setup(true).await;
        feed.publish(PriceTick {
            token_mint: "MintA".to_string(),
            price: 0.3,
            observed_at: Utc::now(),
        })
        .await;

        for _ in 0..50 {
            if lifecycle.is_finished(id).await {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(lifecycle.position(id).await.unwrap().status, PositionStatus::Closed);
        workers.shutdown().await;
    }

    #[tokio::test]
    async fn test_operator_commands_and_shutdown() {
        let (lifecycle, workers, _feed, id) = setup(false).await;
        workers.replace_strategy(id, "conservative").await.unwrap();
        assert_eq!(lifecycle.position(id).await.unwrap().exit_strategy.name, "conservative");

        workers.shutdown().await;
        assert!(workers.is_empty().await);

        // without a worker the call goes straight to the lifecycle manager
        let report = workers.manual_exit(id, Utc::now()).await.unwrap();
        assert_eq!(report.reason, OrderReason::Manual);
    }
}
