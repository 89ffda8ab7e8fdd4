//! Risk Gate Actor
//!
//! The single owner of the circuit breaker. Every admission decision, trade
//! outcome and operator command is a message to this task, so the
//! read-and-update of breaker state is serialized without a shared lock.
//! Each state change is published on a watch channel; a separate writer task
//! persists the latest snapshot.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::circuit_breaker::{
    AdmissionDecision, BreakerStatus, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState,
    TripReason,
};
use crate::domain::persistence::StateStore;
use crate::ports::alerts::{AlertKind, AlertSeverity, AlertSink, OperatorAlert};

const COMMAND_BUFFER: usize = 256;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RiskGateError {
    #[error("Risk gate is not running")]
    Closed,
}

/// Messages accepted by the risk gate
#[derive(Debug)]
pub enum RiskGateCommand {
    CheckAdmission {
        at: DateTime<Utc>,
        reply: oneshot::Sender<AdmissionDecision>,
    },
    ReportOutcome {
        pnl: f64,
        at: DateTime<Utc>,
        reply: oneshot::Sender<Option<TripReason>>,
    },
    ReleaseSlot {
        reply: oneshot::Sender<()>,
    },
    ManualReset {
        reply: oneshot::Sender<CircuitBreakerState>,
    },
    SetPaused {
        paused: bool,
        reply: oneshot::Sender<()>,
    },
    Reevaluate {
        at: DateTime<Utc>,
        reply: oneshot::Sender<Option<TripReason>>,
    },
    UpdateConfig {
        config: CircuitBreakerConfig,
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<CircuitBreakerState>,
    },
    Shutdown,
}

/// Cloneable sender side of the risk gate
#[derive(Debug, Clone)]
pub struct RiskGateHandle {
    tx: mpsc::Sender<RiskGateCommand>,
    snapshots: watch::Receiver<CircuitBreakerState>,
}

impl RiskGateHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RiskGateCommand,
    ) -> Result<T, RiskGateError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| RiskGateError::Closed)?;
        rx.await.map_err(|_| RiskGateError::Closed)
    }

    /// Decide an admission; an admitted decision has already reserved a slot
    pub async fn check_admission(&self, at: DateTime<Utc>) -> Result<AdmissionDecision, RiskGateError> {
        self.request(|reply| RiskGateCommand::CheckAdmission { at, reply }).await
    }

    /// Report a closed position's realized PnL; releases its slot
    pub async fn report_outcome(&self, pnl: f64, at: DateTime<Utc>) -> Result<Option<TripReason>, RiskGateError> {
        self.request(|reply| RiskGateCommand::ReportOutcome { pnl, at, reply }).await
    }

    /// Release a slot without recording a trade (failed live entry)
    pub async fn release_slot(&self) -> Result<(), RiskGateError> {
        self.request(|reply| RiskGateCommand::ReleaseSlot { reply }).await
    }

    pub async fn manual_reset(&self) -> Result<CircuitBreakerState, RiskGateError> {
        self.request(|reply| RiskGateCommand::ManualReset { reply }).await
    }

    pub async fn set_paused(&self, paused: bool) -> Result<(), RiskGateError> {
        self.request(|reply| RiskGateCommand::SetPaused { paused, reply }).await
    }

    pub async fn reevaluate(&self, at: DateTime<Utc>) -> Result<Option<TripReason>, RiskGateError> {
        self.request(|reply| RiskGateCommand::Reevaluate { at, reply }).await
    }

    pub async fn update_config(&self, config: CircuitBreakerConfig) -> Result<(), RiskGateError> {
        self.request(|reply| RiskGateCommand::UpdateConfig { config, reply }).await
    }

    pub async fn snapshot(&self) -> Result<CircuitBreakerState, RiskGateError> {
        self.request(|reply| RiskGateCommand::Snapshot { reply }).await
    }

    /// Latest published snapshot without a round trip
    pub fn latest(&self) -> CircuitBreakerState {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CircuitBreakerState> {
        self.snapshots.clone()
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(RiskGateCommand::Shutdown).await;
    }
}

/// Running risk gate: actor task plus optional persistence writer
pub struct RiskGate {
    breaker: CircuitBreaker,
    snapshot_tx: watch::Sender<CircuitBreakerState>,
    alerts: Arc<dyn AlertSink>,
}

pub struct RiskGateTasks {
    pub actor: JoinHandle<()>,
    pub writer: Option<JoinHandle<()>>,
}

impl RiskGateTasks {
    /// Wait for the actor and the final snapshot write
    pub async fn join(self) {
        let _ = self.actor.await;
        if let Some(writer) = self.writer {
            let _ = writer.await;
        }
    }
}

impl RiskGate {
    /// Spawn the actor; with a store, every published snapshot is persisted
    pub fn spawn(
        breaker: CircuitBreaker,
        store: Option<StateStore>,
        alerts: Arc<dyn AlertSink>,
    ) -> (RiskGateHandle, RiskGateTasks) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(breaker.state().clone());

        let writer = store.map(|store| spawn_writer(store, snapshot_rx.clone()));

        let gate = Self {
            breaker,
            snapshot_tx,
            alerts,
        };
        let actor = tokio::spawn(gate.run(rx));

        info!("Risk gate started");
        (
            RiskGateHandle {
                tx,
                snapshots: snapshot_rx,
            },
            RiskGateTasks { actor, writer },
        )
    }

    async fn run(mut self, mut rx: mpsc::Receiver<RiskGateCommand>) {
        while let Some(command) = rx.recv().await {
            let status_before = self.breaker.state().status;
            let manual = matches!(command, RiskGateCommand::ManualReset { .. });

            match command {
                RiskGateCommand::CheckAdmission { at, reply } => {
                    let decision = self.breaker.check_admission(at);
                    debug!(?decision, open_positions = self.breaker.state().open_positions_count, "Admission checked");
                    let _ = reply.send(decision);
                }
                RiskGateCommand::ReportOutcome { pnl, at, reply } => {
                    let tripped = self.breaker.record_outcome(pnl, at);
                    let _ = reply.send(tripped);
                }
                RiskGateCommand::ReleaseSlot { reply } => {
                    self.breaker.release_slot();
                    let _ = reply.send(());
                }
                RiskGateCommand::ManualReset { reply } => {
                    self.breaker.manual_reset();
                    let _ = reply.send(self.breaker.state().clone());
                }
                RiskGateCommand::SetPaused { paused, reply } => {
                    self.breaker.set_paused(paused);
                    info!(paused, "Manual pause updated");
                    let _ = reply.send(());
                }
                RiskGateCommand::Reevaluate { at, reply } => {
                    let tripped = self.breaker.evaluate(at);
                    let _ = reply.send(tripped);
                }
                RiskGateCommand::UpdateConfig { config, reply } => {
                    self.breaker.update_config(config);
                    info!("Risk configuration updated");
                    let _ = reply.send(());
                }
                RiskGateCommand::Snapshot { reply } => {
                    let _ = reply.send(self.breaker.state().clone());
                }
                RiskGateCommand::Shutdown => break,
            }

            self.after_command(status_before, manual);
        }

        info!("Risk gate stopped");
    }

    fn after_command(&self, status_before: BreakerStatus, manual: bool) {
        let state = self.breaker.state();
        match (status_before, state.status) {
            (BreakerStatus::Closed, BreakerStatus::Open) => {
                let reason = state
                    .trip_reason
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                self.raise(
                    AlertSeverity::Critical,
                    AlertKind::BreakerTripped {
                        reason,
                        drawdown_pct: state.drawdown() * 100.0,
                        current_equity: state.current_equity,
                    },
                );
            }
            (BreakerStatus::Open, BreakerStatus::Closed) => {
                self.raise(AlertSeverity::Info, AlertKind::BreakerReset { manual });
            }
            _ => {}
        }

        let state = self.breaker.state().clone();
        self.snapshot_tx.send_if_modified(|current| {
            if *current != state {
                *current = state;
                true
            } else {
                false
            }
        });
    }

    fn raise(&self, severity: AlertSeverity, kind: AlertKind) {
        let alerts = Arc::clone(&self.alerts);
        let alert = OperatorAlert::new(severity, kind);
        tokio::spawn(async move {
            alerts.alert(alert).await;
        });
    }
}

/// Persist each published snapshot; flush the last one when the gate stops
fn spawn_writer(store: StateStore, mut rx: watch::Receiver<CircuitBreakerState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let snapshot = rx.borrow_and_update().clone();
            if let Err(e) = store.save_breaker(&snapshot) {
                error!(error = %e, "Failed to persist breaker state");
            }
        }
        let last = rx.borrow().clone();
        if let Err(e) = store.save_breaker(&last) {
            warn!(error = %e, "Failed to flush breaker state on shutdown");
        }
    })
}
