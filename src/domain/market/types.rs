use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Latest NBBO quote for a symbol. Field values default to zero when the
/// broker omits them; callers must treat zero bid/ask as unusable, not panic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub bid_price: f64,
    pub ask_price: f64,
    pub bid_size: f64,
    pub ask_size: f64,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Quote {
    pub fn mid(&self) -> f64 {
        (self.bid_price + self.ask_price) / 2.0
    }

    /// Bid-ask spread as a percentage of the mid price. Zero when the quote
    /// is unusable (missing side or crossed).
    pub fn spread_pct(&self) -> f64 {
        let mid = self.mid();
        if self.bid_price <= 0.0 || self.ask_price <= 0.0 || mid <= 0.0 {
            return 0.0;
        }
        ((self.ask_price - self.bid_price) / mid).max(0.0) * 100.0
    }

    /// Age relative to `now`. A quote with no timestamp is infinitely old.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        match self.timestamp {
            Some(ts) => now.signed_duration_since(ts),
            None => chrono::Duration::MAX,
        }
    }

    /// Freshness check, boundary-inclusive: a quote exactly at the bound is
    /// still fresh.
    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        self.age(now) <= max_age
    }
}

/// One OHLCV bar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bar {
    pub timestamp: Option<DateTime<Utc>>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Bar granularity accepted by the data endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeframe {
    FiveMinute,
    Day,
}

impl Timeframe {
    pub fn as_broker_str(&self) -> &'static str {
        match self {
            Timeframe::FiveMinute => "5Min",
            Timeframe::Day => "1Day",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_broker_str())
    }
}

/// An entry from the movers / most-active screeners.
#[derive(Debug, Clone)]
pub struct MarketMover {
    pub symbol: String,
    pub price: f64,
    pub change_pct: f64,
    pub volume: f64,
}

/// A news headline with its tagged symbols.
#[derive(Debug, Clone)]
pub struct NewsItem {
    pub headline: String,
    pub symbols: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Coarse market-capitalization bucket, derived from dollar-volume when the
/// screener payload carries no capitalization field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapBucket {
    Small,
    Mid,
    Large,
}

impl CapBucket {
    /// Dollar-volume heuristic: avg daily volume times price.
    pub fn from_dollar_volume(price: f64, avg_volume: f64) -> Self {
        let dv = price * avg_volume;
        if dv >= 1_000_000_000.0 {
            CapBucket::Large
        } else if dv >= 100_000_000.0 {
            CapBucket::Mid
        } else {
            CapBucket::Small
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn quote(bid: f64, ask: f64, age_minutes: i64) -> Quote {
        Quote {
            symbol: "AAPL".to_string(),
            bid_price: bid,
            ask_price: ask,
            bid_size: 100.0,
            ask_size: 100.0,
            timestamp: Some(Utc::now() - Duration::minutes(age_minutes)),
        }
    }

    #[test]
    fn test_spread_pct() {
        let q = quote(99.95, 100.05, 0);
        let spread = q.spread_pct();
        assert!((spread - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_spread_pct_unusable_quote() {
        let q = quote(0.0, 100.0, 0);
        assert_eq!(q.spread_pct(), 0.0);
    }

    #[test]
    fn test_freshness_boundary_inclusive() {
        let now = Utc::now();
        let bound = Duration::minutes(15);

        let at_bound = Quote {
            timestamp: Some(now - Duration::minutes(15)),
            ..quote(100.0, 100.1, 0)
        };
        assert!(at_bound.is_fresh(now, bound));

        let past_bound = Quote {
            timestamp: Some(now - Duration::minutes(15) - Duration::milliseconds(1)),
            ..quote(100.0, 100.1, 0)
        };
        assert!(!past_bound.is_fresh(now, bound));
    }

    #[test]
    fn test_missing_timestamp_is_stale() {
        let q = Quote {
            timestamp: None,
            ..quote(100.0, 100.1, 0)
        };
        assert!(!q.is_fresh(Utc::now(), Duration::minutes(15)));
    }

    #[test]
    fn test_cap_bucket_from_dollar_volume() {
        assert_eq!(
            CapBucket::from_dollar_volume(500.0, 10_000_000.0),
            CapBucket::Large
        );
        assert_eq!(
            CapBucket::from_dollar_volume(50.0, 3_000_000.0),
            CapBucket::Mid
        );
        assert_eq!(
            CapBucket::from_dollar_volume(12.0, 1_000_000.0),
            CapBucket::Small
        );
    }
}
