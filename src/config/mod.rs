//! Configuration Module
//!
//! Loads, validates and hot-reloads configuration from TOML files.

pub mod loader;
pub mod watcher;

pub use loader::{
    load_config, parse_config, AlertsSection, Config, ConfigError, DecaySection,
    ExecutionSection, ExitAssignment, LoggingSection, PersistenceSection, RiskSection,
    ScoringSection, SizingBracket, SizingSection, DATA_DIR_ENV,
};
pub use watcher::ConfigWatcher;
