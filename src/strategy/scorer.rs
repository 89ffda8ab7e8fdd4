//! Signal Scorer
//!
//! Combines wallet quality, cluster confirmation, token characteristics and
//! signal context into one weighted score. A provider that cannot answer
//! degrades its factor to the neutral score; scoring itself never fails.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::ScoringSection;
use crate::domain::score::{clamp_unit, ScoreBreakdown, ScoreFactor};
use crate::domain::signal::Signal;
use crate::domain::wallet_decay::WalletHealth;
use crate::ports::providers::{
    ClusterConfirmation, DecayStatus, TokenCharacteristics, TokenCharacteristicsProvider,
    WalletQualityProvider,
};

pub struct SignalScorer {
    wallets: Arc<dyn WalletQualityProvider>,
    tokens: Arc<dyn TokenCharacteristicsProvider>,
    cluster: Arc<dyn ClusterConfirmation>,
    settings: RwLock<ScoringSection>,
}

impl SignalScorer {
    pub fn new(
        wallets: Arc<dyn WalletQualityProvider>,
        tokens: Arc<dyn TokenCharacteristicsProvider>,
        cluster: Arc<dyn ClusterConfirmation>,
        settings: ScoringSection,
    ) -> Self {
        Self {
            wallets,
            tokens,
            cluster,
            settings: RwLock::new(settings),
        }
    }

    pub async fn update_settings(&self, settings: ScoringSection) {
        *self.settings.write().await = settings;
    }

    pub async fn admission_threshold(&self) -> f64 {
        self.settings.read().await.admission_threshold
    }

    /// Score a signal against current provider data and wallet health
    pub async fn score(&self, signal: &Signal, health: WalletHealth, now: DateTime<Utc>) -> ScoreBreakdown {
        let settings = self.settings.read().await.clone();
        let mut degraded = Vec::new();

        let (wallet, token, cluster) = tokio::join!(
            self.wallets.get(&signal.wallet_id),
            self.tokens.get(&signal.token_mint),
            self.cluster.get(&signal.wallet_id, &signal.token_mint),
        );

        let wallet_score = match wallet {
            Ok(quality) => wallet_sub_score(
                quality.score,
                health.flagged || quality.decay_status == DecayStatus::Flagged,
                health.downgraded || quality.decay_status == DecayStatus::Downgraded,
                &settings,
            ),
            Err(e) => {
                tracing::warn!(wallet = %signal.wallet_id, error = %e, "Wallet quality unavailable, using neutral score");
                degraded.push(ScoreFactor::Wallet);
                wallet_sub_score(settings.neutral_score, health.flagged, health.downgraded, &settings)
            }
        };

        let token_score = match token {
            Ok(data) => token_sub_score(&data, &settings),
            Err(e) => {
                tracing::warn!(token = %signal.token_mint, error = %e, "Token data unavailable, using neutral score");
                degraded.push(ScoreFactor::Token);
                settings.neutral_score
            }
        };

        let cluster_score = match cluster {
            Ok(count) => cluster_sub_score(count, settings.cluster_saturation),
            Err(e) => {
                tracing::warn!(wallet = %signal.wallet_id, error = %e, "Cluster confirmation unavailable, using neutral score");
                degraded.push(ScoreFactor::Cluster);
                settings.neutral_score
            }
        };

        let context_score = context_sub_score(signal, now, &settings);

        let breakdown = ScoreBreakdown::compose(
            wallet_score,
            cluster_score,
            token_score,
            context_score,
            settings.weights,
            degraded,
        );

        tracing::debug!(
            signal_id = %signal.id,
            wallet = %signal.wallet_id,
            final_score = breakdown.final_score,
            degraded = breakdown.degraded_factors.len(),
            "Signal scored"
        );

        breakdown
    }
}

/// Provider score adjusted for decay flag and temporary downgrade
pub fn wallet_sub_score(score: f64, flagged: bool, downgraded: bool, settings: &ScoringSection) -> f64 {
    let mut value = clamp_unit(score);
    if flagged {
        value *= settings.flagged_multiplier;
    }
    if downgraded {
        value = (value - settings.downgrade_penalty).max(0.0);
    }
    value
}

pub fn cluster_sub_score(count: u32, saturation: u32) -> f64 {
    if saturation == 0 {
        return 0.0;
    }
    (count as f64 / saturation as f64).min(1.0)
}

/// Mean of liquidity, age, market-cap band and holder-concentration scores
pub fn token_sub_score(data: &TokenCharacteristics, settings: &ScoringSection) -> f64 {
    let liquidity = clamp_unit(data.liquidity_usd / settings.liquidity_target_usd);
    let age = clamp_unit(data.age_hours / settings.mature_age_hours);

    let market_cap = if data.market_cap_usd <= 0.0 {
        0.0
    } else if data.market_cap_usd < settings.min_market_cap_usd {
        data.market_cap_usd / settings.min_market_cap_usd
    } else if data.market_cap_usd > settings.max_market_cap_usd {
        settings.max_market_cap_usd / data.market_cap_usd
    } else {
        1.0
    };

    let holders = clamp_unit(1.0 - data.top10_holder_pct / 100.0);

    (liquidity + age + clamp_unit(market_cap) + holders) / 4.0
}

/// Mean of conviction (signal size) and freshness (signal age)
pub fn context_sub_score(signal: &Signal, now: DateTime<Utc>, settings: &ScoringSection) -> f64 {
    let conviction = clamp_unit(signal.amount / settings.reference_amount);

    let age_secs = (now - signal.observed_at).num_milliseconds().max(0) as f64 / 1000.0;
    let freshness = 1.0 - (age_secs / settings.max_signal_age_secs as f64).min(1.0);

    (conviction + freshness) / 2.0
}
