//! Overnight exposure guard: close-price snapshots, gap alerting at the
//! next pre-market, aging-based rotation, and the overnight position cap.

use crate::domain::trading::types::Position;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub max_overnight_days: i64,
    pub max_overnight_positions: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_overnight_days: 3,
            max_overnight_positions: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapSeverity {
    Low,
    Moderate,
    High,
    Extreme,
}

impl GapSeverity {
    pub fn from_gap_pct(gap_pct: f64) -> Self {
        let abs = gap_pct.abs();
        if abs >= 5.0 {
            GapSeverity::Extreme
        } else if abs >= 2.0 {
            GapSeverity::High
        } else if abs >= 1.0 {
            GapSeverity::Moderate
        } else {
            GapSeverity::Low
        }
    }

    pub fn alerts(&self) -> bool {
        *self >= GapSeverity::Moderate
    }
}

impl fmt::Display for GapSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GapSeverity::Low => "low",
            GapSeverity::Moderate => "moderate",
            GapSeverity::High => "high",
            GapSeverity::Extreme => "extreme",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone)]
pub struct GapAlert {
    pub symbol: String,
    pub close_price: Decimal,
    pub open_price: Decimal,
    pub gap_pct: f64,
    pub severity: GapSeverity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseMark {
    pub close_price: Decimal,
    pub qty: Decimal,
    pub marked_at: DateTime<Utc>,
}

pub struct OvernightGuard {
    config: GuardConfig,
    close_marks: HashMap<String, CloseMark>,
    opened_sessions: HashMap<String, NaiveDate>,
}

impl OvernightGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self {
            config,
            close_marks: HashMap::new(),
            opened_sessions: HashMap::new(),
        }
    }

    /// Record the session a position was first opened, for aging.
    pub fn record_open(&mut self, symbol: &str, session: NaiveDate) {
        self.opened_sessions
            .entry(symbol.to_string())
            .or_insert(session);
    }

    pub fn forget(&mut self, symbol: &str) {
        self.opened_sessions.remove(symbol);
        self.close_marks.remove(symbol);
    }

    /// Snapshot close prices for everything still held at session close.
    pub fn snapshot_close(&mut self, positions: &[Position], now: DateTime<Utc>) {
        self.close_marks.clear();
        for position in positions {
            if position.qty.is_zero() {
                continue;
            }
            self.close_marks.insert(
                position.symbol.clone(),
                CloseMark {
                    close_price: position.current_price,
                    qty: position.qty,
                    marked_at: now,
                },
            );
        }
        info!(
            "OvernightGuard: close snapshot recorded for {} position(s)",
            self.close_marks.len()
        );
    }

    /// Compare pre-market opens against the close snapshot. Alerts at
    /// moderate severity and above.
    pub fn check_gaps(&self, open_prices: &HashMap<String, Decimal>) -> Vec<GapAlert> {
        let mut alerts = Vec::new();
        for (symbol, mark) in &self.close_marks {
            let Some(open_price) = open_prices.get(symbol) else {
                continue;
            };
            if mark.close_price.is_zero() {
                continue;
            }
            let gap = (*open_price - mark.close_price) / mark.close_price;
            let gap_pct = (gap * Decimal::ONE_HUNDRED).to_f64().unwrap_or(0.0);
            let severity = GapSeverity::from_gap_pct(gap_pct);
            if severity.alerts() {
                warn!(
                    "OvernightGuard: {} gapped {:+.2}% overnight ({} -> {}), severity {}",
                    symbol, gap_pct, mark.close_price, open_price, severity
                );
                alerts.push(GapAlert {
                    symbol: symbol.clone(),
                    close_price: mark.close_price,
                    open_price: *open_price,
                    gap_pct,
                    severity,
                });
            }
        }
        alerts
    }

    /// Symbols held longer than the aging limit, due for preferential
    /// closing during the next regular session.
    pub fn rotation_candidates(&self, today: NaiveDate) -> Vec<String> {
        let mut rotation: Vec<String> = self
            .opened_sessions
            .iter()
            .filter(|(_, opened)| (today - **opened).num_days() > self.config.max_overnight_days)
            .map(|(symbol, _)| symbol.clone())
            .collect();
        rotation.sort();
        rotation
    }

    /// Positions beyond the overnight cap, largest unrealized loss first.
    /// These are liquidated before the close.
    pub fn overnight_excess<'a>(&self, positions: &'a [Position]) -> Vec<&'a Position> {
        let mut held: Vec<&Position> = positions.iter().filter(|p| !p.qty.is_zero()).collect();
        if held.len() <= self.config.max_overnight_positions {
            return Vec::new();
        }
        held.sort_by(|a, b| a.unrealized_pl.cmp(&b.unrealized_pl));
        let excess = held.len() - self.config.max_overnight_positions;
        held.truncate(excess);
        held
    }
}
