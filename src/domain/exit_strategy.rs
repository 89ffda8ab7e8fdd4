//! Exit Strategy
//!
//! Immutable description of how a position is unwound: a take-profit
//! ladder, a hard stop, an optional trailing stop, optional time rules and
//! a moonbag that the ladder never touches. Presets are plain named
//! instances of the same struct.
//!
//! All `_pct` fields are percentages in [0, 100].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Preset names shipped with the engine
pub const PRESET_CONSERVATIVE: &str = "conservative";
pub const PRESET_BALANCED: &str = "balanced";
pub const PRESET_MOONBAG_RUNNER: &str = "moonbag_runner";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StrategyError {
    #[error("Invalid exit strategy '{name}': {reason}")]
    Invalid { name: String, reason: String },

    #[error("Unknown exit strategy: {0}")]
    Unknown(String),
}

/// One rung of the scaling-out ladder
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TakeProfitLevel {
    /// Price multiple of entry that arms this level
    pub trigger_multiple: f64,
    /// Share of the original size sold when the level fires
    pub sell_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailingStop {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Peak must reach entry * activation_multiple before the trail arms
    pub activation_multiple: f64,
    /// Distance below the peak that fires the stop
    pub trail_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRules {
    #[serde(default)]
    pub max_hold_hours: Option<f64>,
    /// Band around the stagnation anchor, in percent
    #[serde(default)]
    pub stagnation_pct: Option<f64>,
    #[serde(default)]
    pub stagnation_hours: Option<f64>,
}

impl TimeRules {
    /// Stagnation is armed only when both band and duration are set
    pub fn stagnation(&self) -> Option<(f64, f64)> {
        match (self.stagnation_pct, self.stagnation_hours) {
            (Some(pct), Some(hours)) => Some((pct, hours)),
            _ => None,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitStrategy {
    pub name: String,
    #[serde(default)]
    pub take_profit_levels: Vec<TakeProfitLevel>,
    pub stop_loss_pct: f64,
    #[serde(default)]
    pub trailing_stop: Option<TrailingStop>,
    #[serde(default)]
    pub time_rules: Option<TimeRules>,
    #[serde(default)]
    pub moonbag_pct: f64,
    #[serde(default)]
    pub moonbag_stop_pct: Option<f64>,
    #[serde(default = "default_true")]
    pub mirror_exit: bool,
}

impl ExitStrategy {
    /// Price at or below which the hard stop fires
    pub fn stop_loss_price(&self, entry_price: f64) -> f64 {
        entry_price * (1.0 - self.stop_loss_pct / 100.0)
    }

    pub fn moonbag_stop_price(&self, entry_price: f64) -> Option<f64> {
        self.moonbag_stop_pct
            .map(|pct| entry_price * (1.0 - pct / 100.0))
    }

    /// Trailing stop config if present and switched on
    pub fn active_trailing(&self) -> Option<&TrailingStop> {
        self.trailing_stop.as_ref().filter(|t| t.enabled)
    }

    /// Indices of ladder levels in ascending trigger order
    pub fn ladder_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.take_profit_levels.len()).collect();
        order.sort_by(|&a, &b| {
            self.take_profit_levels[a]
                .trigger_multiple
                .total_cmp(&self.take_profit_levels[b].trigger_multiple)
        });
        order
    }

    /// Cumulative percentage of the original size the ladder may sell
    pub fn ladder_total_pct(&self) -> f64 {
        self.take_profit_levels.iter().map(|l| l.sell_pct).sum()
    }

    pub fn validate(&self) -> Result<(), StrategyError> {
        let invalid = |reason: String| StrategyError::Invalid {
            name: self.name.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name cannot be empty".to_string()));
        }
        if !(self.stop_loss_pct > 0.0 && self.stop_loss_pct <= 100.0) {
            return Err(invalid(format!(
                "stop_loss_pct must be in (0, 100], got {}",
                self.stop_loss_pct
            )));
        }
        if !(0.0..100.0).contains(&self.moonbag_pct) {
            return Err(invalid(format!(
                "moonbag_pct must be in [0, 100), got {}",
                self.moonbag_pct
            )));
        }

        for level in &self.take_profit_levels {
            if !(level.trigger_multiple.is_finite() && level.trigger_multiple > 1.0) {
                return Err(invalid(format!(
                    "take-profit trigger_multiple must be > 1.0, got {}",
                    level.trigger_multiple
                )));
            }
            if !(level.sell_pct > 0.0 && level.sell_pct <= 100.0) {
                return Err(invalid(format!(
                    "take-profit sell_pct must be in (0, 100], got {}",
                    level.sell_pct
                )));
            }
        }

        let ladder_cap = 100.0 - self.moonbag_pct;
        if self.ladder_total_pct() > ladder_cap + 1e-9 {
            return Err(invalid(format!(
                "ladder sells {}% but only {}% is outside the moonbag",
                self.ladder_total_pct(),
                ladder_cap
            )));
        }

        if let Some(trailing) = &self.trailing_stop {
            if trailing.activation_multiple < 1.0 {
                return Err(invalid(format!(
                    "trailing activation_multiple must be >= 1.0, got {}",
                    trailing.activation_multiple
                )));
            }
            if !(trailing.trail_pct > 0.0 && trailing.trail_pct < 100.0) {
                return Err(invalid(format!(
                    "trailing trail_pct must be in (0, 100), got {}",
                    trailing.trail_pct
                )));
            }
        }

        if let Some(rules) = &self.time_rules {
            if rules.max_hold_hours.map_or(false, |h| !(h.is_finite() && h > 0.0)) {
                return Err(invalid("max_hold_hours must be positive".to_string()));
            }
            if rules.stagnation_pct.map_or(false, |p| !(p.is_finite() && p > 0.0))
                || rules.stagnation_hours.map_or(false, |h| !(h.is_finite() && h > 0.0))
            {
                return Err(invalid("stagnation settings must be positive".to_string()));
            }
        }

        if let Some(pct) = self.moonbag_stop_pct {
            if !(pct > 0.0 && pct <= 100.0) {
                return Err(invalid(format!(
                    "moonbag_stop_pct must be in (0, 100], got {}",
                    pct
                )));
            }
        }

        Ok(())
    }

    /// Take profits early and keep a tight stop
    pub fn conservative() -> Self {
        Self {
            name: PRESET_CONSERVATIVE.to_string(),
            take_profit_levels: vec![
                TakeProfitLevel { trigger_multiple: 1.5, sell_pct: 50.0 },
                TakeProfitLevel { trigger_multiple: 2.0, sell_pct: 50.0 },
            ],
            stop_loss_pct: 20.0,
            trailing_stop: None,
            time_rules: Some(TimeRules {
                max_hold_hours: Some(24.0),
                stagnation_pct: Some(5.0),
                stagnation_hours: Some(6.0),
            }),
            moonbag_pct: 0.0,
            moonbag_stop_pct: None,
            mirror_exit: true,
        }
    }

    pub fn balanced() -> Self {
        Self {
            name: PRESET_BALANCED.to_string(),
            take_profit_levels: vec![
                TakeProfitLevel { trigger_multiple: 2.0, sell_pct: 50.0 },
                TakeProfitLevel { trigger_multiple: 3.0, sell_pct: 25.0 },
            ],
            stop_loss_pct: 50.0,
            trailing_stop: None,
            time_rules: Some(TimeRules {
                max_hold_hours: Some(72.0),
                stagnation_pct: None,
                stagnation_hours: None,
            }),
            moonbag_pct: 25.0,
            moonbag_stop_pct: None,
            mirror_exit: true,
        }
    }

    /// Small ladder, wide trail, large moonbag protected by its own stop
    pub fn moonbag_runner() -> Self {
        Self {
            name: PRESET_MOONBAG_RUNNER.to_string(),
            take_profit_levels: vec![
                TakeProfitLevel { trigger_multiple: 2.0, sell_pct: 30.0 },
                TakeProfitLevel { trigger_multiple: 4.0, sell_pct: 30.0 },
            ],
            stop_loss_pct: 40.0,
            trailing_stop: Some(TrailingStop {
                enabled: true,
                activation_multiple: 3.0,
                trail_pct: 25.0,
            }),
            time_rules: None,
            moonbag_pct: 40.0,
            moonbag_stop_pct: Some(20.0),
            mirror_exit: true,
        }
    }

    pub fn presets() -> Vec<Self> {
        vec![Self::conservative(), Self::balanced(), Self::moonbag_runner()]
    }
}

/// Named strategies available for assignment: presets plus custom entries.
/// A custom entry with a preset's name replaces the preset.
#[derive(Debug, Clone, Default)]
pub struct StrategyCatalog {
    strategies: Vec<ExitStrategy>,
}

impl StrategyCatalog {
    pub fn with_presets() -> Self {
        Self {
            strategies: ExitStrategy::presets(),
        }
    }

    /// Build the catalog from presets and custom definitions, validating each
    pub fn build(custom: &[ExitStrategy]) -> Result<Self, StrategyError> {
        let mut catalog = Self::with_presets();
        for strategy in custom {
            catalog.insert(strategy.clone())?;
        }
        Ok(catalog)
    }

    pub fn insert(&mut self, strategy: ExitStrategy) -> Result<(), StrategyError> {
        strategy.validate()?;
        match self.strategies.iter_mut().find(|s| s.name == strategy.name) {
            Some(existing) => *existing = strategy,
            None => self.strategies.push(strategy),
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&ExitStrategy, StrategyError> {
        self.strategies
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| StrategyError::Unknown(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExitStrategy> {
        self.strategies.iter()
    }
}
