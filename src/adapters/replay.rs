//! Deterministic event replay
//!
//! Reads a JSON-lines file where every line is one tagged event:
//!
//! ```text
//! {"type":"wallet_quality","wallet_id":"W1","score":0.9,"decay_status":"ok"}
//! {"type":"token_data","token_mint":"M1","liquidity_usd":50000,"age_hours":24,"market_cap_usd":500000,"top10_holder_pct":20}
//! {"type":"cluster","token_mint":"M1","count":2}
//! {"type":"price","token_mint":"M1","price":1.0,"observed_at":"2026-01-01T00:00:00Z"}
//! {"type":"signal","wallet_id":"W1","token_mint":"M1","direction":"buy","amount":1.0,"observed_at":"2026-01-01T00:00:01Z"}
//! ```
//!
//! Provider events update the in-memory ports. Signals go through the
//! pipeline one at a time and price events are delivered to every position
//! on the token before the next line is read, with the event timestamp as
//! the clock. Background timers are switched off so a replay never depends
//! on wall time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use super::memory::{
    BroadcastPriceFeed, InMemoryCluster, InMemoryTokenData, InMemoryWalletQuality,
    RecordingAlertSink,
};
use crate::application::engine::{Engine, EngineError, EnginePorts};
use crate::application::lifecycle::ExitReport;
use crate::config::Config;
use crate::domain::persistence::{RecoveredState, StateStore};
use crate::domain::position::{ExecutionMode, PositionStatus};
use crate::domain::signal::{ActivityEvent, SignalLogEntry};
use crate::ports::alerts::AlertSink;
use crate::ports::market_data::PriceTick;
use crate::ports::providers::{TokenCharacteristics, WalletQuality};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("Failed to read event file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Line {line}: {message}")]
    ParseError { line: usize, message: String },

    #[error("Replay only runs in simulation mode")]
    LiveModeUnsupported,

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// One line of a replay file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayEvent {
    Signal(ActivityEvent),
    Price(PriceTick),
    WalletQuality {
        wallet_id: String,
        #[serde(flatten)]
        quality: WalletQuality,
    },
    TokenData {
        token_mint: String,
        #[serde(flatten)]
        data: TokenCharacteristics,
    },
    Cluster {
        token_mint: String,
        count: u32,
    },
}

/// Parse replay events; blank lines and `#` comments are skipped
pub fn parse_events(content: &str) -> Result<Vec<ReplayEvent>, ReplayError> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|e| ReplayError::ParseError {
                line: index + 1,
                message: e.to_string(),
            })
        })
        .collect()
}

pub fn read_events<P: AsRef<Path>>(path: P) -> Result<Vec<ReplayEvent>, ReplayError> {
    let content = fs::read_to_string(path)?;
    parse_events(&content)
}

/// The in-memory ports a replay runs against
#[derive(Debug, Default, Clone)]
pub struct ReplayWorld {
    pub wallets: Arc<InMemoryWalletQuality>,
    pub tokens: Arc<InMemoryTokenData>,
    pub cluster: Arc<InMemoryCluster>,
    pub feed: Arc<BroadcastPriceFeed>,
    pub alerts: Arc<RecordingAlertSink>,
}

impl ReplayWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine ports backed by this world, with an extra alert sink if given
    pub fn ports(&self, forward_alerts: Option<Arc<dyn AlertSink>>) -> EnginePorts {
        let alerts: Arc<dyn AlertSink> = match forward_alerts {
            Some(sink) => Arc::new(super::alerts::FanoutAlertSink::new(vec![
                self.alerts.clone(),
                sink,
            ])),
            None => self.alerts.clone(),
        };
        EnginePorts {
            wallets: self.wallets.clone(),
            tokens: self.tokens.clone(),
            cluster: self.cluster.clone(),
            prices: self.feed.clone(),
            execution: None,
            alerts,
            subscribe_prices: false,
            run_timers: false,
        }
    }
}

/// What a single event produced
#[derive(Debug, Clone)]
pub enum ReplayStep {
    Updated,
    Signal(SignalLogEntry),
    Exits(Vec<ExitReport>),
}

/// End-of-run totals
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplaySummary {
    pub events: usize,
    pub signals: usize,
    /// Signal outcome code -> count
    pub outcomes: BTreeMap<String, usize>,
    pub exit_orders: usize,
    pub open_positions: usize,
    pub closed_positions: usize,
    pub review_positions: usize,
    pub realized_pnl: f64,
    pub equity: f64,
    pub breaker_status: String,
    pub alerts: usize,
}

pub struct Replayer {
    world: ReplayWorld,
    engine: Engine,
    summary: ReplaySummary,
    clock: Option<DateTime<Utc>>,
}

impl Replayer {
    /// Start an engine in simulation mode with timers disabled
    pub async fn start(
        config: &Config,
        world: ReplayWorld,
        recovered: RecoveredState,
        store: Option<StateStore>,
        forward_alerts: Option<Arc<dyn AlertSink>>,
    ) -> Result<Self, ReplayError> {
        if config.execution.mode != ExecutionMode::Simulation {
            return Err(ReplayError::LiveModeUnsupported);
        }

        let engine = Engine::start(config, world.ports(forward_alerts), recovered, store, None).await?;
        Ok(Self {
            world,
            engine,
            summary: ReplaySummary::default(),
            clock: None,
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn world(&self) -> &ReplayWorld {
        &self.world
    }

    /// Apply one event and wait until everything it triggered has settled
    pub async fn apply(&mut self, event: ReplayEvent) -> ReplayStep {
        self.summary.events += 1;
        match event {
            ReplayEvent::WalletQuality { wallet_id, quality } => {
                self.world.wallets.set(&wallet_id, quality).await;
                ReplayStep::Updated
            }
            ReplayEvent::TokenData { token_mint, data } => {
                self.world.tokens.set(&token_mint, data).await;
                ReplayStep::Updated
            }
            ReplayEvent::Cluster { token_mint, count } => {
                self.world.cluster.set(&token_mint, count).await;
                ReplayStep::Updated
            }
            ReplayEvent::Price(tick) => {
                self.advance(tick.observed_at);
                self.world.feed.set_price(&tick.token_mint, tick.price).await;
                let exits = self.engine.pipeline().on_price(&tick).await;
                self.summary.exit_orders += exits.len();
                ReplayStep::Exits(exits)
            }
            ReplayEvent::Signal(activity) => {
                let at = activity.observed_at;
                self.advance(at);
                let entry = self.engine.process_signal(activity, at).await;
                self.summary.signals += 1;
                *self
                    .summary
                    .outcomes
                    .entry(entry.outcome.code().to_string())
                    .or_default() += 1;
                debug!(outcome = entry.outcome.code(), "Replayed signal");
                ReplayStep::Signal(entry)
            }
        }
    }

    fn advance(&mut self, at: DateTime<Utc>) {
        self.clock = Some(self.clock.map_or(at, |clock| clock.max(at)));
    }

    pub async fn run(&mut self, events: Vec<ReplayEvent>) -> Vec<ReplayStep> {
        let mut steps = Vec::with_capacity(events.len());
        for event in events {
            steps.push(self.apply(event).await);
        }
        steps
    }

    /// Final maintenance pass at the last event time, then shut down
    pub async fn finish(mut self) -> ReplaySummary {
        let pipeline = Arc::clone(self.engine.pipeline());
        if let Some(at) = self.clock {
            pipeline.run_maintenance(at).await;
        }

        for position in pipeline.lifecycle().positions().await {
            match position.status {
                PositionStatus::Closed => self.summary.closed_positions += 1,
                PositionStatus::ReviewRequired => self.summary.review_positions += 1,
                PositionStatus::Open | PositionStatus::PartialExit => {
                    self.summary.open_positions += 1
                }
            }
            self.summary.realized_pnl += position.realized_pnl;
        }

        let breaker = self.engine.gate().latest();
        self.summary.equity = breaker.current_equity;
        self.summary.breaker_status = breaker.status.description().to_string();
        self.summary.alerts = self.world.alerts.alerts().await.len();

        self.engine.shutdown().await;
        info!(
            events = self.summary.events,
            signals = self.summary.signals,
            exits = self.summary.exit_orders,
            realized_pnl = self.summary.realized_pnl,
            "Replay finished"
        );
        self.summary
    }
}
