//! Ports Layer - Trait definitions for external dependencies
//!
//! This module defines the interfaces (ports) that adapters must implement.
//! Following hexagonal architecture, these traits abstract:
//! - Wallet, token and cluster data used for scoring
//! - Order execution for live mode
//! - Price feeds
//! - Operator alerting

pub mod providers;
pub mod execution;
pub mod market_data;
pub mod alerts;

pub use providers::{
    ClusterConfirmation, DecayStatus, NoClusterConfirmation, ProviderError,
    TokenCharacteristics, TokenCharacteristicsProvider, WalletQuality, WalletQualityProvider,
};
pub use execution::{ExecutionClient, ExecutionError, Fill};
pub use market_data::{MarketDataError, PriceFeed, PriceTick};
pub use alerts::{AlertKind, AlertSeverity, AlertSink, OperatorAlert};
