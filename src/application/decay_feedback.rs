//! Wallet decay feedback loop: closed-trade outcomes in, wallet health out.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::domain::persistence::StateStore;
use crate::domain::wallet_decay::{WalletDecayConfig, WalletDecayTracker, WalletHealth, WalletStats};

pub struct DecayFeedback {
    tracker: Mutex<WalletDecayTracker>,
    store: Option<StateStore>,
}

impl DecayFeedback {
    pub fn new(tracker: WalletDecayTracker, store: Option<StateStore>) -> Self {
        Self {
            tracker: Mutex::new(tracker),
            store,
        }
    }

    /// Record a closed trade and persist the statistics
    pub async fn record_outcome(&self, wallet_id: &str, win: bool, now: DateTime<Utc>) -> WalletHealth {
        let mut tracker = self.tracker.lock().await;
        let health = tracker.record_outcome(wallet_id, win, now);
        self.persist(&tracker);
        health
    }

    pub async fn record_activity(&self, wallet_id: &str, now: DateTime<Utc>) {
        self.tracker.lock().await.record_activity(wallet_id, now);
    }

    pub async fn health(&self, wallet_id: &str, now: DateTime<Utc>) -> WalletHealth {
        self.tracker.lock().await.health(wallet_id, now)
    }

    pub async fn sweep_dormancy(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut tracker = self.tracker.lock().await;
        let dormant = tracker.sweep_dormancy(now);
        if !dormant.is_empty() {
            tracing::info!(count = dormant.len(), "Wallets marked dormant");
            self.persist(&tracker);
        }
        dormant
    }

    pub async fn update_config(&self, config: WalletDecayConfig) {
        self.tracker.lock().await.update_config(config);
    }

    pub async fn stats(&self, wallet_id: &str) -> Option<WalletStats> {
        self.tracker.lock().await.stats(wallet_id).cloned()
    }

    pub async fn snapshot(&self) -> HashMap<String, WalletStats> {
        self.tracker.lock().await.snapshot()
    }

    /// Write current statistics (activity timestamps are only saved here)
    pub async fn flush(&self) {
        let tracker = self.tracker.lock().await;
        self.persist(&tracker);
    }

    fn persist(&self, tracker: &WalletDecayTracker) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_wallet_stats(&tracker.snapshot()) {
                tracing::error!(error = %e, "Failed to persist wallet statistics");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_outcomes_persist_and_restore() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let feedback = DecayFeedback::new(
            WalletDecayTracker::new(WalletDecayConfig::default()),
            Some(store.clone()),
        );

        let now = Utc::now();
        for _ in 0..3 {
            feedback.record_outcome("WalletA", false, now).await;
        }
        assert!(feedback.health("WalletA", now).await.downgraded);

        let restored = WalletDecayTracker::restore(
            WalletDecayConfig::default(),
            store.load_wallet_stats().unwrap(),
        );
        let stats = restored.stats("WalletA").unwrap();
        assert_eq!(stats.consecutive_losses, 3);
        assert_eq!(stats.total_trades, 3);
    }

    #[tokio::test]
    async fn test_sweep_then_activity_wakes() {
        let feedback = DecayFeedback::new(WalletDecayTracker::new(WalletDecayConfig::default()), None);
        let start = Utc::now();
        feedback.record_activity("WalletA", start).await;

        let later = start + Duration::days(15);
        assert_eq!(feedback.sweep_dormancy(later).await, vec!["WalletA".to_string()]);
        assert!(feedback.health("WalletA", later).await.dormant);

        feedback.record_activity("WalletA", later).await;
        assert!(!feedback.health("WalletA", later).await.dormant);
    }
}
