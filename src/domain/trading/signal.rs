use crate::domain::errors::SignalError;
use crate::domain::trading::types::OrderSide;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The playbook a signal came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Momentum,
    MeanReversion,
    Breakout,
    Defensive,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StrategyKind::Momentum => "momentum",
            StrategyKind::MeanReversion => "mean_reversion",
            StrategyKind::Breakout => "breakout",
            StrategyKind::Defensive => "defensive",
        };
        write!(f, "{}", s)
    }
}

/// An actionable decision for one symbol.
///
/// Invariants: long requires `stop < entry < target`; short requires
/// `target < entry < stop`; `risk_per_share > 0`; reward:risk at or above
/// the configured minimum. Consumed by the order lifecycle exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSignal {
    pub symbol: String,
    pub side: OrderSide,
    pub entry: Decimal,
    pub stop: Decimal,
    pub target: Decimal,
    /// Whole shares; zero until the risk gate sizes the trade.
    pub qty: Decimal,
    /// Composite confidence in [0, 1].
    pub confidence: f64,
    pub strategy: StrategyKind,
    pub horizon_days: u32,
    pub rationale: String,
    pub created_at: DateTime<Utc>,
}

impl TradeSignal {
    pub fn risk_per_share(&self) -> Decimal {
        (self.entry - self.stop).abs()
    }

    pub fn reward_per_share(&self) -> Decimal {
        (self.target - self.entry).abs()
    }

    /// Reward:risk ratio; zero when risk is degenerate.
    pub fn reward_risk(&self) -> Decimal {
        let risk = self.risk_per_share();
        if risk.is_zero() {
            return Decimal::ZERO;
        }
        self.reward_per_share() / risk
    }

    pub fn validate(&self, min_reward_risk: Decimal) -> Result<(), SignalError> {
        let ordered = match self.side {
            OrderSide::Buy => self.stop < self.entry && self.entry < self.target,
            OrderSide::Sell => self.target < self.entry && self.entry < self.stop,
        };
        if !ordered {
            return Err(SignalError::PriceOrdering {
                symbol: self.symbol.clone(),
                side: self.side.to_string(),
                entry: self.entry,
                stop: self.stop,
                target: self.target,
            });
        }
        if self.risk_per_share().is_zero() {
            return Err(SignalError::ZeroRisk {
                symbol: self.symbol.clone(),
            });
        }
        let rr = self.reward_risk();
        if rr < min_reward_risk {
            return Err(SignalError::RewardRiskTooLow {
                symbol: self.symbol.clone(),
                ratio: rr,
                min: min_reward_risk,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn long_signal(entry: Decimal, stop: Decimal, target: Decimal) -> TradeSignal {
        TradeSignal {
            symbol: "AAPL".to_string(),
            side: OrderSide::Buy,
            entry,
            stop,
            target,
            qty: dec!(0),
            confidence: 0.7,
            strategy: StrategyKind::Momentum,
            horizon_days: 2,
            rationale: "test".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_valid_long_signal() {
        let s = long_signal(dec!(180), dec!(176), dec!(188));
        assert!(s.validate(dec!(1.5)).is_ok());
        assert_eq!(s.risk_per_share(), dec!(4));
        assert_eq!(s.reward_risk(), dec!(2));
    }

    #[test]
    fn test_long_ordering_violation() {
        let s = long_signal(dec!(180), dec!(182), dec!(188));
        assert!(matches!(
            s.validate(dec!(1.5)),
            Err(SignalError::PriceOrdering { .. })
        ));
    }

    #[test]
    fn test_short_ordering() {
        let mut s = long_signal(dec!(180), dec!(184), dec!(172));
        s.side = OrderSide::Sell;
        assert!(s.validate(dec!(1.5)).is_ok());

        // Shorts with a stop below entry are malformed.
        let mut bad = long_signal(dec!(180), dec!(176), dec!(172));
        bad.side = OrderSide::Sell;
        assert!(bad.validate(dec!(1.5)).is_err());
    }

    #[test]
    fn test_reward_risk_gate() {
        // 4 of risk, 5 of reward -> 1.25 < 1.5
        let s = long_signal(dec!(180), dec!(176), dec!(185));
        assert!(matches!(
            s.validate(dec!(1.5)),
            Err(SignalError::RewardRiskTooLow { .. })
        ));
    }
}
