//! Adapters Layer - External System Implementations
//!
//! - `memory`: in-memory providers, price feed, execution and alert capture
//! - `replay`: JSON-lines event replay driving the engine
//! - `alerts`: log, webhook and fan-out alert sinks
//! - `cli`: command-line interface handlers

pub mod memory;
pub mod replay;
pub mod alerts;
pub mod cli;

pub use memory::{
    BroadcastPriceFeed, InMemoryCluster, InMemoryTokenData, InMemoryWalletQuality,
    RecordingAlertSink, ScriptedExecution,
};
pub use replay::{ReplayError, ReplayEvent, ReplayStep, ReplaySummary, ReplayWorld, Replayer};
pub use alerts::{FanoutAlertSink, LogAlertSink, WebhookAlertSink};
pub use cli::CliApp;
