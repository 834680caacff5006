use crate::domain::market::types::Bar;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of market environments. The regime parameterizes strategy
/// selection and the strategic-filter score weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketRegime {
    BullTrending,
    BearTrending,
    Volatile,
    RangeBound,
    LowVolatility,
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MarketRegime::BullTrending => "bull_trending",
            MarketRegime::BearTrending => "bear_trending",
            MarketRegime::Volatile => "volatile",
            MarketRegime::RangeBound => "range_bound",
            MarketRegime::LowVolatility => "low_volatility",
        };
        write!(f, "{}", s)
    }
}

impl MarketRegime {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bull_trending" => Some(MarketRegime::BullTrending),
            "bear_trending" => Some(MarketRegime::BearTrending),
            "volatile" => Some(MarketRegime::Volatile),
            "range_bound" => Some(MarketRegime::RangeBound),
            "low_volatility" => Some(MarketRegime::LowVolatility),
            _ => None,
        }
    }

    /// Score weights for the strategic filter, per regime.
    pub fn score_weights(&self) -> RegimeWeights {
        match self {
            MarketRegime::BullTrending => RegimeWeights {
                momentum: 1.4,
                volume: 0.8,
                sector: 0.5,
                risk: 0.3,
            },
            MarketRegime::BearTrending => RegimeWeights {
                momentum: 0.6,
                volume: 0.8,
                sector: 0.7,
                risk: 0.8,
            },
            MarketRegime::Volatile => RegimeWeights {
                momentum: 0.5,
                volume: 0.9,
                sector: 0.4,
                risk: 1.3,
            },
            MarketRegime::RangeBound => RegimeWeights {
                momentum: 0.7,
                volume: 1.0,
                sector: 0.6,
                risk: 0.6,
            },
            MarketRegime::LowVolatility => RegimeWeights {
                momentum: 1.0,
                volume: 1.1,
                sector: 0.5,
                risk: 0.4,
            },
        }
    }
}

/// Weights applied to the strategic-filter score components.
#[derive(Debug, Clone, Copy)]
pub struct RegimeWeights {
    pub momentum: f64,
    pub volume: f64,
    pub sector: f64,
    pub risk: f64,
}

/// A regime label with its confidence and provenance timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeSnapshot {
    pub regime: MarketRegime,
    /// In [0, 1].
    pub confidence: f64,
    pub as_of: DateTime<Utc>,
}

impl RegimeSnapshot {
    pub fn new(regime: MarketRegime, confidence: f64, as_of: DateTime<Utc>) -> Self {
        Self {
            regime,
            confidence: confidence.clamp(0.0, 1.0),
            as_of,
        }
    }

    /// Neutral default used before the first intelligence refresh completes.
    pub fn neutral(as_of: DateTime<Utc>) -> Self {
        Self {
            regime: MarketRegime::RangeBound,
            confidence: 0.3,
            as_of,
        }
    }
}

/// Deterministic local regime detector. This is the correctness path; the
/// oracle only adjusts the label at the margin.
pub struct LocalRegimeDetector {
    /// Annualized-return slope above which the market counts as trending.
    trend_threshold: f64,
    /// Daily return standard deviation above which the market counts as
    /// volatile.
    volatility_threshold: f64,
    /// Below this, the low-volatility regime applies.
    quiet_threshold: f64,
}

impl Default for LocalRegimeDetector {
    fn default() -> Self {
        Self {
            trend_threshold: 0.0015,
            volatility_threshold: 0.018,
            quiet_threshold: 0.006,
        }
    }
}

impl LocalRegimeDetector {
    pub fn new(trend_threshold: f64, volatility_threshold: f64, quiet_threshold: f64) -> Self {
        Self {
            trend_threshold,
            volatility_threshold,
            quiet_threshold,
        }
    }

    /// Classify from daily index-proxy bars. Requires at least 10 bars;
    /// returns a neutral snapshot otherwise.
    pub fn detect(&self, bars: &[Bar], as_of: DateTime<Utc>) -> RegimeSnapshot {
        if bars.len() < 10 {
            return RegimeSnapshot::neutral(as_of);
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let returns: Vec<f64> = closes
            .windows(2)
            .filter(|w| w[0] > 0.0)
            .map(|w| (w[1] - w[0]) / w[0])
            .collect();
        if returns.is_empty() {
            return RegimeSnapshot::neutral(as_of);
        }

        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance =
            returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
        let sigma = variance.sqrt();
        let slope = Self::normalized_slope(&closes);

        let (regime, confidence) = if sigma >= self.volatility_threshold {
            (
                MarketRegime::Volatile,
                0.5 + ((sigma / self.volatility_threshold) - 1.0).min(0.4),
            )
        } else if slope >= self.trend_threshold {
            (
                MarketRegime::BullTrending,
                0.5 + ((slope / self.trend_threshold) - 1.0).clamp(0.0, 0.4),
            )
        } else if slope <= -self.trend_threshold {
            (
                MarketRegime::BearTrending,
                0.5 + ((-slope / self.trend_threshold) - 1.0).clamp(0.0, 0.4),
            )
        } else if sigma <= self.quiet_threshold {
            (MarketRegime::LowVolatility, 0.6)
        } else {
            (MarketRegime::RangeBound, 0.55)
        };

        RegimeSnapshot::new(regime, confidence, as_of)
    }

    /// Least-squares slope of the close series, normalized by the first
    /// close so it reads as a per-bar fractional drift.
    fn normalized_slope(closes: &[f64]) -> f64 {
        let n = closes.len() as f64;
        if n < 2.0 {
            return 0.0;
        }
        let x_sum: f64 = (0..closes.len()).map(|i| i as f64).sum();
        let y_sum: f64 = closes.iter().sum();
        let xy_sum: f64 = closes.iter().enumerate().map(|(i, c)| i as f64 * c).sum();
        let x2_sum: f64 = (0..closes.len()).map(|i| (i * i) as f64).sum();

        let denominator = n * x2_sum - x_sum * x_sum;
        if denominator == 0.0 {
            return 0.0;
        }
        let slope = (n * xy_sum - x_sum * y_sum) / denominator;
        let base = closes[0].max(1e-6);
        slope / base
    }
}
