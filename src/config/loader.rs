//! Configuration Loader
//!
//! Loads and validates the engine configuration from a TOML file. Every
//! section and field has a default, so an empty file is a valid config.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::domain::circuit_breaker::{CircuitBreakerConfig, MAX_COOLDOWN_MINUTES};
use crate::domain::exit_strategy::{ExitStrategy, StrategyCatalog};
use crate::domain::position::ExecutionMode;
use crate::domain::score::ScoringWeights;
use crate::domain::wallet_decay::{WalletDecayConfig, MAX_DORMANCY_DAYS, MAX_DOWNGRADE_HOURS};

/// Environment variable that overrides `[persistence] data_dir`
pub const DATA_DIR_ENV: &str = "WALLTRACK_DATA_DIR";

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scoring: ScoringSection,
    pub sizing: SizingSection,
    pub risk: RiskSection,
    pub decay: DecaySection,
    pub execution: ExecutionSection,
    pub persistence: PersistenceSection,
    pub logging: LoggingSection,
    pub alerts: AlertsSection,
    /// Custom strategies added to (or replacing) the presets
    pub exit_strategies: Vec<ExitStrategy>,
    /// Strategy per score bracket; highest matching `min_score` wins
    pub exit_assignment: Vec<ExitAssignment>,
}

/// Signal scoring section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringSection {
    pub weights: ScoringWeights,
    /// Minimum final score for admission (inclusive)
    pub admission_threshold: f64,
    /// Sub-score used when a provider cannot answer
    pub neutral_score: f64,
    /// Multiplier applied to the wallet sub-score of a flagged wallet
    pub flagged_multiplier: f64,
    /// Subtracted from the wallet sub-score during a temporary downgrade
    pub downgrade_penalty: f64,
    /// Confirming wallets needed for a full cluster sub-score
    pub cluster_saturation: u32,
    pub liquidity_target_usd: f64,
    pub mature_age_hours: f64,
    pub min_market_cap_usd: f64,
    pub max_market_cap_usd: f64,
    /// Signal amount that earns full conviction
    pub reference_amount: f64,
    /// Signals older than this score zero freshness
    pub max_signal_age_secs: u64,
}

impl Default for ScoringSection {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            admission_threshold: 0.70,
            neutral_score: 0.5,
            flagged_multiplier: 0.5,
            downgrade_penalty: 0.15,
            cluster_saturation: 3,
            liquidity_target_usd: 50_000.0,
            mature_age_hours: 24.0,
            min_market_cap_usd: 100_000.0,
            max_market_cap_usd: 50_000_000.0,
            reference_amount: 5.0,
            max_signal_age_secs: 300,
        }
    }
}

/// One sizing bracket: scores at or above `min_score` use `multiplier`
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct SizingBracket {
    pub min_score: f64,
    pub multiplier: f64,
}

/// Position sizing section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SizingSection {
    /// Starting capital in SOL; also the breaker's initial equity
    pub capital: f64,
    /// Base position size in SOL
    pub base_size: f64,
    /// Hard cap per trade as percentage of capital
    pub max_trade_risk_pct: f64,
    pub brackets: Vec<SizingBracket>,
}

impl Default for SizingSection {
    fn default() -> Self {
        Self {
            capital: 10.0,
            base_size: 0.25,
            max_trade_risk_pct: 5.0,
            brackets: vec![
                SizingBracket { min_score: 0.70, multiplier: 1.0 },
                SizingBracket { min_score: 0.85, multiplier: 1.5 },
            ],
        }
    }
}

/// Circuit breaker section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskSection {
    pub drawdown_threshold_pct: f64,
    pub max_consecutive_losses: u32,
    pub loss_reduction_factor: f64,
    pub win_rate_window: usize,
    pub min_win_rate: f64,
    pub max_concurrent_positions: u32,
    pub cooldown_minutes: i64,
    pub auto_reset_after_cooldown: bool,
    /// Maintenance tick: breaker re-evaluation and dormancy sweep
    pub reevaluate_interval_secs: u64,
}

impl Default for RiskSection {
    fn default() -> Self {
        let breaker = CircuitBreakerConfig::default();
        Self {
            drawdown_threshold_pct: breaker.drawdown_threshold_pct,
            max_consecutive_losses: breaker.max_consecutive_losses,
            loss_reduction_factor: breaker.loss_reduction_factor,
            win_rate_window: breaker.win_rate_window,
            min_win_rate: breaker.min_win_rate,
            max_concurrent_positions: breaker.max_concurrent_positions,
            cooldown_minutes: breaker.cooldown_minutes,
            auto_reset_after_cooldown: breaker.auto_reset_after_cooldown,
            reevaluate_interval_secs: 30,
        }
    }
}

impl RiskSection {
    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            drawdown_threshold_pct: self.drawdown_threshold_pct,
            max_consecutive_losses: self.max_consecutive_losses,
            loss_reduction_factor: self.loss_reduction_factor,
            win_rate_window: self.win_rate_window,
            min_win_rate: self.min_win_rate,
            max_concurrent_positions: self.max_concurrent_positions,
            cooldown_minutes: self.cooldown_minutes,
            auto_reset_after_cooldown: self.auto_reset_after_cooldown,
        }
    }
}

/// Wallet decay section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DecaySection {
    pub window_size: usize,
    pub min_win_rate: f64,
    pub min_trades: usize,
    pub consecutive_loss_limit: u32,
    pub downgrade_hours: i64,
    pub dormancy_days: i64,
}

impl Default for DecaySection {
    fn default() -> Self {
        let decay = WalletDecayConfig::default();
        Self {
            window_size: decay.window_size,
            min_win_rate: decay.min_win_rate,
            min_trades: decay.min_trades,
            consecutive_loss_limit: decay.consecutive_loss_limit,
            downgrade_hours: decay.downgrade_hours,
            dormancy_days: decay.dormancy_days,
        }
    }
}

impl DecaySection {
    pub fn decay_config(&self) -> WalletDecayConfig {
        WalletDecayConfig {
            window_size: self.window_size,
            min_win_rate: self.min_win_rate,
            min_trades: self.min_trades,
            consecutive_loss_limit: self.consecutive_loss_limit,
            downgrade_hours: self.downgrade_hours,
            dormancy_days: self.dormancy_days,
        }
    }
}

/// Execution section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionSection {
    pub mode: ExecutionMode,
    /// Adverse slippage applied to simulated fills (50 bps = 0.5%)
    pub slippage_bps: u32,
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub submit_timeout_secs: u64,
    /// Time-rule checks per position; 0 disables the timer
    pub time_check_interval_secs: u64,
    /// Queue depth of each per-wallet signal lane
    pub lane_capacity: usize,
    /// A lane with no events for this long is closed until the wallet is seen again
    pub lane_idle_secs: u64,
    /// Queue depth of each position worker
    pub worker_queue_capacity: usize,
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Simulation,
            slippage_bps: 50,
            max_attempts: 3,
            base_backoff_ms: 500,
            submit_timeout_secs: 10,
            time_check_interval_secs: 60,
            lane_capacity: 256,
            lane_idle_secs: 300,
            worker_queue_capacity: 64,
        }
    }
}

/// Persistence section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistenceSection {
    pub data_dir: String,
}

impl Default for PersistenceSection {
    fn default() -> Self {
        Self {
            data_dir: "~/.walltrack/state".to_string(),
        }
    }
}

impl PersistenceSection {
    /// Data directory with env override and `~` expanded.
    /// Checks WALLTRACK_DATA_DIR first, falls back to the config value
    pub fn resolved_data_dir(&self) -> PathBuf {
        let raw = std::env::var(DATA_DIR_ENV).unwrap_or_else(|_| self.data_dir.clone());
        PathBuf::from(shellexpand::tilde(&raw).into_owned())
    }
}

/// Logging configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Alerts configuration section
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AlertsSection {
    /// Post alerts to a Discord-style webhook
    pub webhook_enabled: bool,
    pub webhook_url: String,
}

impl AlertsSection {
    /// Webhook URL with environment variable fallback
    pub fn get_webhook_url(&self) -> Option<String> {
        if !self.webhook_url.is_empty() {
            return Some(self.webhook_url.clone());
        }
        std::env::var("WALLTRACK_WEBHOOK_URL").ok().filter(|u| !u.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExitAssignment {
    pub min_score: f64,
    pub strategy: String,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Validation failed: {0}")]
    ValidationError(String),
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration text
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

fn fail(msg: String) -> Result<(), ConfigError> {
    Err(ConfigError::ValidationError(msg))
}

impl Config {
    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Scoring
        self.scoring
            .weights
            .validate()
            .map_err(ConfigError::ValidationError)?;

        for (name, value) in [
            ("admission_threshold", self.scoring.admission_threshold),
            ("neutral_score", self.scoring.neutral_score),
            ("flagged_multiplier", self.scoring.flagged_multiplier),
            ("downgrade_penalty", self.scoring.downgrade_penalty),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return fail(format!("{} must be 0-1, got {}", name, value));
            }
        }
        if self.scoring.cluster_saturation == 0 {
            return fail("cluster_saturation must be > 0".to_string());
        }
        if self.scoring.liquidity_target_usd <= 0.0
            || self.scoring.mature_age_hours <= 0.0
            || self.scoring.reference_amount <= 0.0
        {
            return fail("liquidity_target_usd, mature_age_hours and reference_amount must be > 0".to_string());
        }
        if self.scoring.min_market_cap_usd < 0.0
            || self.scoring.max_market_cap_usd <= self.scoring.min_market_cap_usd
        {
            return fail(format!(
                "market cap band invalid: [{}, {}]",
                self.scoring.min_market_cap_usd, self.scoring.max_market_cap_usd
            ));
        }
        if self.scoring.max_signal_age_secs == 0 {
            return fail("max_signal_age_secs must be > 0".to_string());
        }

        // Sizing
        if self.sizing.capital <= 0.0 {
            return fail(format!("capital must be > 0, got {}", self.sizing.capital));
        }
        if self.sizing.base_size <= 0.0 {
            return fail(format!("base_size must be > 0, got {}", self.sizing.base_size));
        }
        if self.sizing.max_trade_risk_pct <= 0.0 || self.sizing.max_trade_risk_pct > 100.0 {
            return fail(format!(
                "max_trade_risk_pct must be 0-100, got {}",
                self.sizing.max_trade_risk_pct
            ));
        }
        for bracket in &self.sizing.brackets {
            if !(0.0..=1.0).contains(&bracket.min_score) || bracket.multiplier <= 0.0 {
                return fail(format!("invalid sizing bracket {:?}", bracket));
            }
        }

        // Risk
        if self.risk.drawdown_threshold_pct <= 0.0 || self.risk.drawdown_threshold_pct > 100.0 {
            return fail(format!(
                "drawdown_threshold_pct must be 0-100, got {}",
                self.risk.drawdown_threshold_pct
            ));
        }
        if self.risk.max_consecutive_losses == 0 {
            return fail("max_consecutive_losses must be > 0".to_string());
        }
        if self.risk.loss_reduction_factor <= 0.0 || self.risk.loss_reduction_factor > 1.0 {
            return fail(format!(
                "loss_reduction_factor must be in (0, 1], got {}",
                self.risk.loss_reduction_factor
            ));
        }
        if self.risk.win_rate_window == 0 {
            return fail("win_rate_window must be > 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.risk.min_win_rate) {
            return fail(format!("risk.min_win_rate must be 0-1, got {}", self.risk.min_win_rate));
        }
        if self.risk.max_concurrent_positions == 0 {
            return fail("max_concurrent_positions must be > 0".to_string());
        }
        if !(0..=MAX_COOLDOWN_MINUTES).contains(&self.risk.cooldown_minutes) {
            return fail(format!(
                "cooldown_minutes must be 0-{}, got {}",
                MAX_COOLDOWN_MINUTES, self.risk.cooldown_minutes
            ));
        }
        if self.risk.reevaluate_interval_secs == 0 {
            return fail("reevaluate_interval_secs must be > 0".to_string());
        }

        // Decay
        if self.decay.window_size == 0 || self.decay.min_trades == 0 {
            return fail("decay window_size and min_trades must be > 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.decay.min_win_rate) {
            return fail(format!("decay.min_win_rate must be 0-1, got {}", self.decay.min_win_rate));
        }
        if self.decay.consecutive_loss_limit == 0
            || self.decay.downgrade_hours <= 0
            || self.decay.dormancy_days <= 0
        {
            return fail("decay limits must be > 0".to_string());
        }
        if self.decay.downgrade_hours > MAX_DOWNGRADE_HOURS || self.decay.dormancy_days > MAX_DORMANCY_DAYS {
            return fail(format!(
                "decay periods too long: downgrade_hours max {}, dormancy_days max {}",
                MAX_DOWNGRADE_HOURS, MAX_DORMANCY_DAYS
            ));
        }

        // Execution
        if self.execution.slippage_bps >= 10_000 {
            return fail(format!("slippage_bps must be < 10000, got {}", self.execution.slippage_bps));
        }
        if self.execution.max_attempts == 0 {
            return fail("max_attempts must be > 0".to_string());
        }
        if self.execution.submit_timeout_secs == 0 {
            return fail("submit_timeout_secs must be > 0".to_string());
        }
        if self.execution.lane_capacity == 0 || self.execution.worker_queue_capacity == 0 {
            return fail("queue capacities must be > 0".to_string());
        }
        if self.execution.lane_idle_secs == 0 {
            return fail("lane_idle_secs must be > 0".to_string());
        }

        if self.persistence.data_dir.is_empty() {
            return fail("data_dir cannot be empty".to_string());
        }

        if self.alerts.webhook_enabled && self.alerts.get_webhook_url().is_none() {
            return fail("webhook_enabled requires webhook_url".to_string());
        }

        // Strategies and assignment must resolve
        let catalog = self.strategy_catalog()?;
        for assignment in &self.exit_assignment {
            if !(0.0..=1.0).contains(&assignment.min_score) {
                return fail(format!("invalid exit_assignment min_score {}", assignment.min_score));
            }
            if catalog.get(&assignment.strategy).is_err() {
                return fail(format!(
                    "exit_assignment references unknown strategy '{}'",
                    assignment.strategy
                ));
            }
        }

        Ok(())
    }

    /// Presets plus the custom `[[exit_strategies]]`
    pub fn strategy_catalog(&self) -> Result<StrategyCatalog, ConfigError> {
        StrategyCatalog::build(&self.exit_strategies)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    /// Score-bracket assignment, with the built-in ladder when none is configured
    pub fn effective_exit_assignment(&self) -> Vec<ExitAssignment> {
        if !self.exit_assignment.is_empty() {
            return self.exit_assignment.clone();
        }
        vec![
            ExitAssignment { min_score: 0.0, strategy: "conservative".to_string() },
            ExitAssignment { min_score: 0.70, strategy: "balanced".to_string() },
            ExitAssignment { min_score: 0.85, strategy: "moonbag_runner".to_string() },
        ]
    }
}
