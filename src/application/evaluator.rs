//! Strategy evaluator: turns a deep-dived opportunity plus the current
//! regime into an actionable trade signal, or nothing.

use crate::domain::market::regime::{MarketRegime, RegimeSnapshot};
use crate::domain::market::types::Quote;
use crate::domain::trading::opportunity::Opportunity;
use crate::domain::trading::signal::{StrategyKind, TradeSignal};
use crate::domain::trading::types::OrderSide;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// Minimum composite confidence to emit a signal.
    pub min_confidence: f64,
    /// Hard floor on reward:risk.
    pub min_reward_risk: Decimal,
    /// Target distance as a multiple of risk.
    pub reward_multiple: Decimal,
    /// Stop distance in ATRs.
    pub atr_stop_multiple: Decimal,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.65,
            min_reward_risk: dec!(1.5),
            reward_multiple: dec!(2.0),
            atr_stop_multiple: dec!(2.0),
        }
    }
}

/// Primary and fallback strategy per regime.
fn strategies_for(regime: MarketRegime) -> [StrategyKind; 2] {
    use MarketRegime::*;
    use StrategyKind::*;
    match regime {
        BullTrending => [Momentum, Breakout],
        BearTrending => [Defensive, MeanReversion],
        Volatile => [MeanReversion, Defensive],
        RangeBound => [MeanReversion, Breakout],
        LowVolatility => [Breakout, Momentum],
    }
}

pub struct StrategyEvaluator {
    config: EvaluatorConfig,
}

impl StrategyEvaluator {
    pub fn new(config: EvaluatorConfig) -> Self {
        Self { config }
    }

    /// Evaluate one opportunity. Returns an unsized signal (quantity is the
    /// risk gate's job) or `None` when no strategy fires with enough
    /// confidence.
    pub fn evaluate(
        &self,
        opportunity: &Opportunity,
        regime: &RegimeSnapshot,
        quote: &Quote,
    ) -> Option<TradeSignal> {
        let atr = opportunity.analysis.atr.filter(|a| *a > 0.0)?;

        let (strategy, side, fit) = strategies_for(regime.regime)
            .into_iter()
            .find_map(|kind| {
                self.strategy_fires(kind, opportunity)
                    .map(|(side, fit)| (kind, side, fit))
            })?;

        let entry_raw = match side {
            OrderSide::Buy => quote.ask_price,
            OrderSide::Sell => quote.bid_price,
        };
        if entry_raw <= 0.0 {
            debug!(
                "StrategyEvaluator: unusable {} quote side for {}, skipping",
                side, opportunity.symbol
            );
            return None;
        }

        let entry = Decimal::from_f64_retain(entry_raw)?.round_dp(2);
        let atr_dec = Decimal::from_f64_retain(atr)?;
        let stop_distance = (self.config.atr_stop_multiple * atr_dec).round_dp(2);
        if stop_distance <= Decimal::ZERO {
            return None;
        }

        let (stop, target) = match side {
            OrderSide::Buy => (
                entry - stop_distance,
                entry + self.config.reward_multiple * stop_distance,
            ),
            OrderSide::Sell => (
                entry + stop_distance,
                entry - self.config.reward_multiple * stop_distance,
            ),
        };

        let confidence = self.blend_confidence(opportunity.score, fit, regime.confidence);
        if confidence < self.config.min_confidence {
            debug!(
                "StrategyEvaluator: {} {} confidence {:.2} below {:.2}, dropped",
                strategy, opportunity.symbol, confidence, self.config.min_confidence
            );
            return None;
        }

        let signal = TradeSignal {
            symbol: opportunity.symbol.clone(),
            side,
            entry,
            stop,
            target,
            qty: Decimal::ZERO,
            confidence,
            strategy,
            horizon_days: horizon_for(strategy),
            rationale: format!(
                "{} under {} regime: change {:+.1}%, volume ratio {:.1}, RSI {}",
                strategy,
                regime.regime,
                opportunity.change_pct,
                opportunity.volume_ratio(),
                opportunity
                    .analysis
                    .rsi
                    .map(|r| format!("{:.0}", r))
                    .unwrap_or_else(|| "n/a".to_string()),
            ),
            created_at: Utc::now(),
        };

        if let Err(e) = signal.validate(self.config.min_reward_risk) {
            debug!("StrategyEvaluator: discarding malformed signal: {}", e);
            return None;
        }
        Some(signal)
    }

    /// Whether a strategy fires on this opportunity, and with what direction
    /// and fit.
    fn strategy_fires(
        &self,
        kind: StrategyKind,
        opportunity: &Opportunity,
    ) -> Option<(OrderSide, f64)> {
        let analysis = &opportunity.analysis;
        match kind {
            StrategyKind::Momentum => {
                let rsi = analysis.rsi?;
                let macd_confirms = analysis.macd_hist.map(|h| h > 0.0).unwrap_or(true);
                if opportunity.change_pct > 0.0 && (50.0..=75.0).contains(&rsi) && macd_confirms {
                    let fit = 0.7 + if analysis.macd_hist.is_some() { 0.1 } else { 0.0 };
                    Some((OrderSide::Buy, fit))
                } else {
                    None
                }
            }
            StrategyKind::Breakout => {
                let high = analysis.recent_high?;
                if high <= 0.0 {
                    return None;
                }
                let proximity = (high - opportunity.price) / high;
                if (0.0..=0.015).contains(&proximity) && opportunity.volume_ratio() >= 1.5 {
                    Some((OrderSide::Buy, 0.75))
                } else {
                    None
                }
            }
            StrategyKind::MeanReversion => {
                let rsi = analysis.rsi?;
                if rsi <= 30.0 {
                    Some((OrderSide::Buy, 0.6 + (30.0 - rsi) / 100.0))
                } else if rsi >= 70.0 {
                    Some((OrderSide::Sell, 0.6 + (rsi - 70.0) / 100.0))
                } else {
                    None
                }
            }
            StrategyKind::Defensive => {
                let rsi = analysis.rsi?;
                if rsi <= 25.0 && opportunity.change_pct <= -3.0 {
                    Some((OrderSide::Buy, 0.55))
                } else {
                    None
                }
            }
        }
    }

    /// Composite confidence: funnel score squashed through a sigmoid,
    /// strategy fit, and the regime (oracle-adjusted) confidence.
    fn blend_confidence(&self, funnel_score: f64, fit: f64, regime_confidence: f64) -> f64 {
        let score_part = 1.0 / (1.0 + (-funnel_score).exp());
        (0.45 * score_part + 0.35 * fit + 0.20 * regime_confidence).clamp(0.0, 1.0)
    }
}

fn horizon_for(strategy: StrategyKind) -> u32 {
    match strategy {
        StrategyKind::Momentum => 2,
        StrategyKind::MeanReversion => 3,
        StrategyKind::Breakout => 5,
        StrategyKind::Defensive => 1,
    }
}
