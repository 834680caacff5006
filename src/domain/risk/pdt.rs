use crate::domain::trading::types::OrderSide;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::info;

/// How many trading sessions a day trade stays on the rolling counter.
const ROLLING_SESSIONS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenRecord {
    pub session: NaiveDate,
    /// The side that opened the exposure (buy for long, sell for short).
    pub side: OrderSide,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayTradeRecord {
    pub symbol: String,
    pub session: NaiveDate,
}

/// Rolling five-session day-trade ledger plus the hard block list for
/// symbols the broker has rejected with a PDT code.
///
/// Serializable as-is; the JSON snapshot is what survives restarts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PdtLedger {
    opens: HashMap<String, OpenRecord>,
    day_trades: VecDeque<DayTradeRecord>,
    blocked: HashSet<String>,
    /// Trading sessions seen, oldest first, capped at the rolling window.
    sessions: VecDeque<NaiveDate>,
}

impl PdtLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the ledger to `session`. Day trades older than the rolling
    /// window fall off and the block list clears on rollover.
    pub fn roll_to_session(&mut self, session: NaiveDate) {
        if self.sessions.back() == Some(&session) {
            return;
        }
        self.sessions.push_back(session);
        while self.sessions.len() > ROLLING_SESSIONS {
            self.sessions.pop_front();
        }
        let window: HashSet<NaiveDate> = self.sessions.iter().copied().collect();
        self.day_trades.retain(|dt| window.contains(&dt.session));
        self.opens.retain(|_, rec| rec.session == session);
        if !self.blocked.is_empty() {
            info!(
                "PdtLedger: session rollover to {}, clearing {} blocked symbol(s)",
                session,
                self.blocked.len()
            );
            self.blocked.clear();
        }
    }

    pub fn record_open(&mut self, symbol: &str, side: OrderSide, session: NaiveDate) {
        self.opens
            .insert(symbol.to_string(), OpenRecord { session, side });
    }

    /// Record a position exit. Returns true when the exit completed a day
    /// trade (same-session open and close).
    pub fn record_close(&mut self, symbol: &str, session: NaiveDate) -> bool {
        match self.opens.remove(symbol) {
            Some(rec) if rec.session == session => {
                self.day_trades.push_back(DayTradeRecord {
                    symbol: symbol.to_string(),
                    session,
                });
                true
            }
            _ => false,
        }
    }

    /// True iff `symbol` was opened in `session` and `side` would close it.
    pub fn would_be_day_trade(&self, symbol: &str, side: OrderSide, session: NaiveDate) -> bool {
        self.opens
            .get(symbol)
            .is_some_and(|rec| rec.session == session && rec.side != side)
    }

    pub fn day_trade_count(&self) -> u32 {
        self.day_trades.len() as u32
    }

    pub fn block(&mut self, symbol: &str) {
        self.blocked.insert(symbol.to_string());
    }

    pub fn is_blocked(&self, symbol: &str) -> bool {
        self.blocked.contains(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
    }

    #[test]
    fn test_same_session_round_trip_is_day_trade() {
        let mut ledger = PdtLedger::new();
        ledger.roll_to_session(date(2));
        ledger.record_open("AAPL", OrderSide::Buy, date(2));

        assert!(ledger.would_be_day_trade("AAPL", OrderSide::Sell, date(2)));
        assert!(!ledger.would_be_day_trade("AAPL", OrderSide::Buy, date(2)));
        assert!(!ledger.would_be_day_trade("MSFT", OrderSide::Sell, date(2)));

        assert!(ledger.record_close("AAPL", date(2)));
        assert_eq!(ledger.day_trade_count(), 1);
    }

    #[test]
    fn test_overnight_close_is_not_day_trade() {
        let mut ledger = PdtLedger::new();
        ledger.roll_to_session(date(2));
        ledger.record_open("AAPL", OrderSide::Buy, date(2));

        assert!(!ledger.would_be_day_trade("AAPL", OrderSide::Sell, date(3)));
        assert!(!ledger.record_close("AAPL", date(3)));
        assert_eq!(ledger.day_trade_count(), 0);
    }

    #[test]
    fn test_short_open_closes_with_buy() {
        let mut ledger = PdtLedger::new();
        ledger.roll_to_session(date(2));
        ledger.record_open("TSLA", OrderSide::Sell, date(2));
        assert!(ledger.would_be_day_trade("TSLA", OrderSide::Buy, date(2)));
        assert!(!ledger.would_be_day_trade("TSLA", OrderSide::Sell, date(2)));
    }

    #[test]
    fn test_rolling_window_expiry() {
        let mut ledger = PdtLedger::new();
        // Three day trades on session 2.
        ledger.roll_to_session(date(2));
        for sym in ["A", "B", "C"] {
            ledger.record_open(sym, OrderSide::Buy, date(2));
            ledger.record_close(sym, date(2));
        }
        assert_eq!(ledger.day_trade_count(), 3);

        // Five more sessions roll the window past session 2.
        for d in [3, 4, 5, 6, 9] {
            ledger.roll_to_session(date(d));
        }
        // Window is now sessions {4,5,6,9,...}; but day(2) trades must be gone
        // once five newer sessions have been seen.
        ledger.roll_to_session(date(10));
        assert_eq!(ledger.day_trade_count(), 0);
    }

    #[test]
    fn test_block_list_clears_on_rollover() {
        let mut ledger = PdtLedger::new();
        ledger.roll_to_session(date(2));
        ledger.block("NVDA");
        assert!(ledger.is_blocked("NVDA"));

        ledger.roll_to_session(date(3));
        assert!(!ledger.is_blocked("NVDA"));
    }

    #[test]
    fn test_roll_same_session_is_idempotent() {
        let mut ledger = PdtLedger::new();
        ledger.roll_to_session(date(2));
        ledger.record_open("AAPL", OrderSide::Buy, date(2));
        ledger.roll_to_session(date(2));
        // Open record survives an idempotent roll.
        assert!(ledger.would_be_day_trade("AAPL", OrderSide::Sell, date(2)));
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut ledger = PdtLedger::new();
        ledger.roll_to_session(date(2));
        ledger.record_open("AAPL", OrderSide::Buy, date(2));
        ledger.record_close("AAPL", date(2));
        ledger.block("NVDA");

        let json = serde_json::to_string(&ledger).unwrap();
        let restored: PdtLedger = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.day_trade_count(), 1);
        assert!(restored.is_blocked("NVDA"));
    }
}
