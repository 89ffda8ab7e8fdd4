//! WallTrack - Signal Evaluation & Risk-Gated Exit Strategy Engine
//!
//! Scores wallet-activity signals, admits them through a circuit breaker,
//! sizes and opens positions, and manages each open position with a
//! configurable exit strategy until it is closed.
//!
//! # Modules
//!
//! - `domain`: Core business types (Signal, Position, Order, CircuitBreaker, WalletDecay)
//! - `ports`: Trait abstractions (providers, PriceFeed, ExecutionClient, AlertSink)
//! - `strategy`: Scoring, sizing and exit rule evaluation
//! - `adapters`: In-memory ports, replay, alert sinks and CLI
//! - `config`: Configuration loading, validation and hot reload
//! - `application`: Risk gate actor, lifecycle, workers, pipeline and engine

pub mod domain;
pub mod ports;
pub mod strategy;
pub mod adapters;
pub mod config;
pub mod application;
