use crate::domain::market::types::CapBucket;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where the funnel first saw a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverySource {
    TopMovers,
    MostActive,
    UnusualVolume,
    NewsDriven,
    SectorRotation,
}

impl fmt::Display for DiscoverySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiscoverySource::TopMovers => "top_movers",
            DiscoverySource::MostActive => "most_active",
            DiscoverySource::UnusualVolume => "unusual_volume",
            DiscoverySource::NewsDriven => "news_driven",
            DiscoverySource::SectorRotation => "sector_rotation",
        };
        write!(f, "{}", s)
    }
}

/// Deep-dive output attached to an opportunity. Indicators are optional;
/// a missing value means the bar history was too short to compute it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolAnalysis {
    pub rsi: Option<f64>,
    pub macd_line: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_hist: Option<f64>,
    pub atr: Option<f64>,
    pub spread_pct: Option<f64>,
    pub recent_high: Option<f64>,
    pub recent_low: Option<f64>,
    /// 20-session daily return standard deviation.
    pub daily_sigma: Option<f64>,
}

/// A candidate symbol that survived the funnel.
///
/// Invariants: `price > 0`, `volume_ratio >= 0`, `discovered_at` monotonic
/// within a scan cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub symbol: String,
    pub source: DiscoverySource,
    pub discovered_at: DateTime<Utc>,
    pub price: f64,
    pub change_pct: f64,
    pub volume: f64,
    pub avg_volume: f64,
    pub cap_bucket: CapBucket,
    pub sector: Option<String>,
    /// Strategic-filter score; higher is better.
    pub score: f64,
    pub analysis: SymbolAnalysis,
}

impl Opportunity {
    pub fn volume_ratio(&self) -> f64 {
        if self.avg_volume <= 0.0 {
            return 0.0;
        }
        (self.volume / self.avg_volume).max(0.0)
    }
}
