//! Score types
//!
//! The weighted breakdown produced for every signal, and the weight set
//! that produces it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tolerance for the weight-sum check
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// One of the four inputs to the final score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreFactor {
    Wallet,
    Token,
    Cluster,
    Context,
}

impl ScoreFactor {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreFactor::Wallet => "wallet",
            ScoreFactor::Token => "token",
            ScoreFactor::Cluster => "cluster",
            ScoreFactor::Context => "context",
        }
    }

    /// Allowed inclusive weight range for this factor
    pub fn weight_band(&self) -> (f64, f64) {
        match self {
            ScoreFactor::Wallet => (0.30, 0.50),
            ScoreFactor::Token => (0.25, 0.50),
            ScoreFactor::Cluster => (0.0, 0.25),
            ScoreFactor::Context => (0.0, 0.20),
        }
    }
}

impl fmt::Display for ScoreFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-factor weights; must sum to 1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    #[serde(default = "default_wallet_weight")]
    pub wallet: f64,
    #[serde(default = "default_token_weight")]
    pub token: f64,
    #[serde(default = "default_cluster_weight")]
    pub cluster: f64,
    #[serde(default = "default_context_weight")]
    pub context: f64,
}

fn default_wallet_weight() -> f64 {
    0.40
}
fn default_token_weight() -> f64 {
    0.30
}
fn default_cluster_weight() -> f64 {
    0.15
}
fn default_context_weight() -> f64 {
    0.15
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            wallet: default_wallet_weight(),
            token: default_token_weight(),
            cluster: default_cluster_weight(),
            context: default_context_weight(),
        }
    }
}

impl ScoringWeights {
    pub fn get(&self, factor: ScoreFactor) -> f64 {
        match factor {
            ScoreFactor::Wallet => self.wallet,
            ScoreFactor::Token => self.token,
            ScoreFactor::Cluster => self.cluster,
            ScoreFactor::Context => self.context,
        }
    }

    pub fn sum(&self) -> f64 {
        self.wallet + self.token + self.cluster + self.context
    }

    /// Check every weight against its band and the total against 1
    pub fn validate(&self) -> Result<(), String> {
        for factor in [
            ScoreFactor::Wallet,
            ScoreFactor::Token,
            ScoreFactor::Cluster,
            ScoreFactor::Context,
        ] {
            let weight = self.get(factor);
            let (lo, hi) = factor.weight_band();
            if !weight.is_finite() || weight < lo - WEIGHT_SUM_TOLERANCE || weight > hi + WEIGHT_SUM_TOLERANCE {
                return Err(format!(
                    "{} weight {} outside allowed range [{}, {}]",
                    factor, weight, lo, hi
                ));
            }
        }

        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(format!("weights must sum to 1.0, got {:.6}", sum));
        }
        Ok(())
    }
}

/// Immutable result of scoring one signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub wallet_score: f64,
    pub cluster_score: f64,
    pub token_score: f64,
    pub context_score: f64,
    pub weights: ScoringWeights,
    pub final_score: f64,
    #[serde(default)]
    pub degraded_factors: Vec<ScoreFactor>,
}

impl ScoreBreakdown {
    /// Combine clamped sub-scores with the weights into a clamped final score
    pub fn compose(
        wallet_score: f64,
        cluster_score: f64,
        token_score: f64,
        context_score: f64,
        weights: ScoringWeights,
        degraded_factors: Vec<ScoreFactor>,
    ) -> Self {
        let wallet_score = clamp_unit(wallet_score);
        let cluster_score = clamp_unit(cluster_score);
        let token_score = clamp_unit(token_score);
        let context_score = clamp_unit(context_score);

        let final_score = clamp_unit(
            weights.wallet * wallet_score
                + weights.token * token_score
                + weights.cluster * cluster_score
                + weights.context * context_score,
        );

        Self {
            wallet_score,
            cluster_score,
            token_score,
            context_score,
            weights,
            final_score,
            degraded_factors,
        }
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded_factors.is_empty()
    }
}

impl fmt::Display for ScoreBreakdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "score={:.3} (wallet={:.2} token={:.2} cluster={:.2} context={:.2})",
            self.final_score, self.wallet_score, self.token_score, self.cluster_score, self.context_score
        )
    }
}

/// Clamp into [0, 1]; NaN becomes 0
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
