//! Position sizing from score bracket and risk multiplier.

use crate::config::{SizingBracket, SizingSection};

#[derive(Debug, Clone)]
pub struct PositionSizer {
    capital: f64,
    base_size: f64,
    max_trade_risk_pct: f64,
    /// Sorted by ascending min_score
    brackets: Vec<SizingBracket>,
}

impl PositionSizer {
    pub fn new(section: &SizingSection) -> Self {
        let mut brackets = section.brackets.clone();
        brackets.sort_by(|a, b| a.min_score.total_cmp(&b.min_score));
        Self {
            capital: section.capital,
            base_size: section.base_size,
            max_trade_risk_pct: section.max_trade_risk_pct,
            brackets,
        }
    }

    /// Multiplier of the highest bracket the score reaches; 1.0 below all brackets
    pub fn bracket_multiplier(&self, score: f64) -> f64 {
        self.brackets
            .iter()
            .rev()
            .find(|b| score >= b.min_score)
            .map(|b| b.multiplier)
            .unwrap_or(1.0)
    }

    /// Largest size a single trade may take
    pub fn max_trade_size(&self) -> f64 {
        self.capital * self.max_trade_risk_pct / 100.0
    }

    /// base × bracket × risk, capped per trade
    pub fn size(&self, score: f64, risk_multiplier: f64) -> f64 {
        let raw = self.base_size * self.bracket_multiplier(score) * risk_multiplier;
        raw.min(self.max_trade_size())
    }
}
