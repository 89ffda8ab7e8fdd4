//! Wallet Decay
//!
//! Per-wallet rolling outcome statistics. A wallet whose recent trades keep
//! losing is flagged or temporarily downgraded, and a wallet that goes
//! quiet is marked dormant. The scorer reads the resulting health view.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Longest downgrade accepted, one year
pub const MAX_DOWNGRADE_HOURS: i64 = 24 * 365;

/// Longest dormancy threshold accepted, ten years
pub const MAX_DORMANCY_DAYS: i64 = 3650;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletDecayConfig {
    pub window_size: usize,
    pub min_win_rate: f64,
    pub min_trades: usize,
    pub consecutive_loss_limit: u32,
    pub downgrade_hours: i64,
    pub dormancy_days: i64,
}

impl Default for WalletDecayConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            min_win_rate: 0.40,
            min_trades: 5,
            consecutive_loss_limit: 3,
            downgrade_hours: 24,
            dormancy_days: 14,
        }
    }
}

impl WalletDecayConfig {
    pub fn downgrade_period(&self) -> Duration {
        Duration::hours(self.downgrade_hours.clamp(0, MAX_DOWNGRADE_HOURS))
    }

    pub fn dormancy_limit(&self) -> Duration {
        Duration::days(self.dormancy_days.clamp(0, MAX_DORMANCY_DAYS))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletStats {
    pub wallet_id: String,
    /// Win flags, oldest first
    pub recent_outcomes: VecDeque<bool>,
    pub consecutive_losses: u32,
    pub total_trades: u64,
    pub total_wins: u64,
    pub flagged: bool,
    pub downgraded_until: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
    pub dormant: bool,
}

impl WalletStats {
    fn new(wallet_id: &str) -> Self {
        Self {
            wallet_id: wallet_id.to_string(),
            recent_outcomes: VecDeque::new(),
            consecutive_losses: 0,
            total_trades: 0,
            total_wins: 0,
            flagged: false,
            downgraded_until: None,
            last_activity: None,
            dormant: false,
        }
    }

    pub fn rolling_win_rate(&self) -> Option<f64> {
        if self.recent_outcomes.is_empty() {
            return None;
        }
        let wins = self.recent_outcomes.iter().filter(|w| **w).count();
        Some(wins as f64 / self.recent_outcomes.len() as f64)
    }
}

/// What the scorer and pipeline need to know about a wallet right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WalletHealth {
    pub flagged: bool,
    pub downgraded: bool,
    pub dormant: bool,
}

#[derive(Debug, Clone, Default)]
pub struct WalletDecayTracker {
    config: WalletDecayConfig,
    stats: HashMap<String, WalletStats>,
}

impl WalletDecayTracker {
    pub fn new(config: WalletDecayConfig) -> Self {
        Self {
            config,
            stats: HashMap::new(),
        }
    }

    pub fn restore(config: WalletDecayConfig, stats: HashMap<String, WalletStats>) -> Self {
        let mut tracker = Self { config, stats };
        tracker.trim_all();
        tracker
    }

    pub fn update_config(&mut self, config: WalletDecayConfig) {
        self.config = config;
        self.trim_all();
    }

    /// Record one closed trade for the wallet that sourced it
    pub fn record_outcome(&mut self, wallet_id: &str, win: bool, now: DateTime<Utc>) -> WalletHealth {
        let config = self.config.clone();
        let stats = self
            .stats
            .entry(wallet_id.to_string())
            .or_insert_with(|| WalletStats::new(wallet_id));

        stats.total_trades += 1;
        stats.recent_outcomes.push_back(win);
        while stats.recent_outcomes.len() > config.window_size.max(1) {
            stats.recent_outcomes.pop_front();
        }

        if win {
            stats.total_wins += 1;
            stats.consecutive_losses = 0;
        } else {
            stats.consecutive_losses += 1;
            if stats.consecutive_losses >= config.consecutive_loss_limit {
                stats.downgraded_until = Some(now + config.downgrade_period());
                tracing::warn!(
                    wallet = %wallet_id,
                    consecutive_losses = stats.consecutive_losses,
                    hours = config.downgrade_hours,
                    "Wallet temporarily downgraded after losing streak"
                );
            }
        }

        if stats.recent_outcomes.len() >= config.min_trades {
            let rate = stats.rolling_win_rate().unwrap_or(0.0);
            let flagged = rate < config.min_win_rate;
            if flagged != stats.flagged {
                if flagged {
                    tracing::warn!(wallet = %wallet_id, win_rate = rate, "Wallet flagged for decay");
                } else {
                    tracing::info!(wallet = %wallet_id, win_rate = rate, "Wallet decay flag cleared");
                }
            }
            stats.flagged = flagged;
        }

        self.health(wallet_id, now)
    }

    /// Note wallet activity; clears dormancy
    pub fn record_activity(&mut self, wallet_id: &str, now: DateTime<Utc>) {
        let stats = self
            .stats
            .entry(wallet_id.to_string())
            .or_insert_with(|| WalletStats::new(wallet_id));
        if stats.dormant {
            tracing::info!(wallet = %wallet_id, "Dormant wallet active again");
        }
        stats.dormant = false;
        if stats.last_activity.map_or(true, |last| now > last) {
            stats.last_activity = Some(now);
        }
    }

    pub fn health(&self, wallet_id: &str, now: DateTime<Utc>) -> WalletHealth {
        match self.stats.get(wallet_id) {
            Some(stats) => WalletHealth {
                flagged: stats.flagged,
                downgraded: stats.downgraded_until.map_or(false, |until| now < until),
                dormant: stats.dormant || self.is_quiet(stats, now),
            },
            None => WalletHealth::default(),
        }
    }

    /// Mark wallets dormant that have been quiet too long; returns the new ones
    pub fn sweep_dormancy(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let limit = self.config.dormancy_limit();
        let mut newly_dormant = Vec::new();
        for stats in self.stats.values_mut() {
            let quiet = stats
                .last_activity
                .map_or(false, |last| now - last >= limit);
            if quiet && !stats.dormant {
                stats.dormant = true;
                newly_dormant.push(stats.wallet_id.clone());
            }
        }
        newly_dormant.sort();
        newly_dormant
    }

    pub fn stats(&self, wallet_id: &str) -> Option<&WalletStats> {
        self.stats.get(wallet_id)
    }

    pub fn snapshot(&self) -> HashMap<String, WalletStats> {
        self.stats.clone()
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    fn is_quiet(&self, stats: &WalletStats, now: DateTime<Utc>) -> bool {
        stats
            .last_activity
            .map_or(false, |last| now - last >= self.config.dormancy_limit())
    }

    fn trim_all(&mut self) {
        let window = self.config.window_size.max(1);
        for stats in self.stats.values_mut() {
            while stats.recent_outcomes.len() > window {
                stats.recent_outcomes.pop_front();
            }
        }
    }
}
