use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use chrono_tz::US::Eastern;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Once;
use tracing::warn;

/// Eastern-time trading session. All session decisions in the engine go
/// through this module; no other component compares wall clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketSession {
    PreMarket,
    Regular,
    AfterHours,
    Closed,
}

impl fmt::Display for MarketSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MarketSession::PreMarket => "pre_market",
            MarketSession::Regular => "regular",
            MarketSession::AfterHours => "after_hours",
            MarketSession::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

/// Observed U.S. exchange holidays for the supported operating window.
/// Outside this window the clock degrades to weekday-only gating.
const HOLIDAYS: &[(i32, u32, u32)] = &[
    // 2024
    (2024, 1, 1),
    (2024, 1, 15),
    (2024, 2, 19),
    (2024, 3, 29),
    (2024, 5, 27),
    (2024, 6, 19),
    (2024, 7, 4),
    (2024, 9, 2),
    (2024, 11, 28),
    (2024, 12, 25),
    // 2025
    (2025, 1, 1),
    (2025, 1, 20),
    (2025, 2, 17),
    (2025, 4, 18),
    (2025, 5, 26),
    (2025, 6, 19),
    (2025, 7, 4),
    (2025, 9, 1),
    (2025, 11, 27),
    (2025, 12, 25),
    // 2026
    (2026, 1, 1),
    (2026, 1, 19),
    (2026, 2, 16),
    (2026, 4, 3),
    (2026, 5, 25),
    (2026, 6, 19),
    (2026, 7, 3),
    (2026, 9, 7),
    (2026, 11, 26),
    (2026, 12, 25),
];

const HOLIDAY_TABLE_YEARS: std::ops::RangeInclusive<i32> = 2024..=2026;

static UNKNOWN_YEAR_WARNING: Once = Once::new();

/// Session clock pinned to US Eastern time, DST included.
#[derive(Debug, Clone, Default)]
pub struct SessionClock;

impl SessionClock {
    pub fn new() -> Self {
        Self
    }

    pub fn now_eastern(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&Eastern)
    }

    pub fn today(&self) -> NaiveDate {
        self.now_eastern().date_naive()
    }

    pub fn current_session(&self) -> MarketSession {
        Self::session_at(self.now_eastern())
    }

    /// Classify an Eastern-time instant.
    pub fn session_at(instant: DateTime<Tz>) -> MarketSession {
        if !Self::is_trading_day(instant.date_naive()) {
            return MarketSession::Closed;
        }

        let t = instant.time();
        let pre_open = NaiveTime::from_hms_opt(4, 0, 0).expect("constant time");
        let open = NaiveTime::from_hms_opt(9, 30, 0).expect("constant time");
        let close = NaiveTime::from_hms_opt(16, 0, 0).expect("constant time");
        let late_close = NaiveTime::from_hms_opt(20, 0, 0).expect("constant time");

        if t >= open && t < close {
            MarketSession::Regular
        } else if t >= pre_open && t < open {
            MarketSession::PreMarket
        } else if t >= close && t < late_close {
            MarketSession::AfterHours
        } else {
            MarketSession::Closed
        }
    }

    pub fn is_trading_day(date: NaiveDate) -> bool {
        if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        if !HOLIDAY_TABLE_YEARS.contains(&date.year()) {
            UNKNOWN_YEAR_WARNING.call_once(|| {
                warn!(
                    "SessionClock: no holiday table for {}; gating on weekdays only",
                    date.year()
                );
            });
            return true;
        }
        !HOLIDAYS
            .iter()
            .any(|&(y, m, d)| y == date.year() && m == date.month() && d == date.day())
    }

    /// The next regular-session open at or after `from` (Eastern), as UTC.
    pub fn next_regular_open(from: DateTime<Tz>) -> DateTime<Utc> {
        let open = NaiveTime::from_hms_opt(9, 30, 0).expect("constant time");
        let mut date = from.date_naive();
        if !Self::is_trading_day(date) || from.time() >= open {
            date = date.succ_opt().unwrap_or(date);
            while !Self::is_trading_day(date) {
                date = match date.succ_opt() {
                    Some(d) => d,
                    None => break,
                };
            }
        }

        let naive = date.and_time(open);
        Eastern
            .from_local_datetime(&naive)
            .earliest()
            // 09:30 never falls inside a DST transition; this arm only guards
            // a tz-database surprise.
            .unwrap_or_else(|| Eastern.from_utc_datetime(&(naive + Duration::hours(5))))
            .with_timezone(&Utc)
    }

    /// Suspend until the next regular open. Returns immediately when the
    /// regular session is already live.
    pub async fn wait_until_next_open(&self) {
        loop {
            if self.current_session() == MarketSession::Regular {
                return;
            }
            let target = Self::next_regular_open(self.now_eastern());
            let remaining = target.signed_duration_since(Utc::now());
            if remaining <= Duration::zero() {
                // Open boundary just crossed; re-classify on the next pass.
                tokio::time::sleep(std::time::Duration::from_millis(250)).await;
                continue;
            }
            let chunk = remaining
                .to_std()
                .unwrap_or(std::time::Duration::from_secs(300))
                .min(std::time::Duration::from_secs(300));
            tokio::time::sleep(chunk).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eastern(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> DateTime<Tz> {
        let naive = NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(hh, mm, 0)
            .unwrap();
        Eastern.from_local_datetime(&naive).earliest().unwrap()
    }

    #[test]
    fn test_session_boundaries_regular_day() {
        // 2025-06-10 is a Tuesday with no holiday.
        assert_eq!(
            SessionClock::session_at(eastern(2025, 6, 10, 3, 59)),
            MarketSession::Closed
        );
        assert_eq!(
            SessionClock::session_at(eastern(2025, 6, 10, 4, 0)),
            MarketSession::PreMarket
        );
        assert_eq!(
            SessionClock::session_at(eastern(2025, 6, 10, 9, 29)),
            MarketSession::PreMarket
        );
        assert_eq!(
            SessionClock::session_at(eastern(2025, 6, 10, 9, 30)),
            MarketSession::Regular
        );
        assert_eq!(
            SessionClock::session_at(eastern(2025, 6, 10, 15, 59)),
            MarketSession::Regular
        );
        assert_eq!(
            SessionClock::session_at(eastern(2025, 6, 10, 16, 0)),
            MarketSession::AfterHours
        );
        assert_eq!(
            SessionClock::session_at(eastern(2025, 6, 10, 19, 59)),
            MarketSession::AfterHours
        );
        assert_eq!(
            SessionClock::session_at(eastern(2025, 6, 10, 20, 0)),
            MarketSession::Closed
        );
    }

    #[test]
    fn test_weekend_closed() {
        // 2025-06-14 is a Saturday.
        assert_eq!(
            SessionClock::session_at(eastern(2025, 6, 14, 12, 0)),
            MarketSession::Closed
        );
        assert!(!SessionClock::is_trading_day(
            NaiveDate::from_ymd_opt(2025, 6, 14).unwrap()
        ));
    }

    #[test]
    fn test_holidays_closed() {
        // Independence Day 2025 falls on a Friday.
        assert!(!SessionClock::is_trading_day(
            NaiveDate::from_ymd_opt(2025, 7, 4).unwrap()
        ));
        // Observed holiday: 2026-07-03 (July 4 is a Saturday).
        assert!(!SessionClock::is_trading_day(
            NaiveDate::from_ymd_opt(2026, 7, 3).unwrap()
        ));
        assert!(SessionClock::is_trading_day(
            NaiveDate::from_ymd_opt(2025, 7, 7).unwrap()
        ));
    }

    #[test]
    fn test_next_open_same_day_before_open() {
        let from = eastern(2025, 6, 10, 8, 0);
        let open = SessionClock::next_regular_open(from);
        let open_e = open.with_timezone(&Eastern);
        assert_eq!(open_e.date_naive(), NaiveDate::from_ymd_opt(2025, 6, 10).unwrap());
        assert_eq!(open_e.time(), NaiveTime::from_hms_opt(9, 30, 0).unwrap());
    }

    #[test]
    fn test_next_open_rolls_over_weekend() {
        // Friday after close -> Monday open.
        let from = eastern(2025, 6, 13, 17, 0);
        let open = SessionClock::next_regular_open(from).with_timezone(&Eastern);
        assert_eq!(open.date_naive(), NaiveDate::from_ymd_opt(2025, 6, 16).unwrap());
    }

    #[test]
    fn test_next_open_skips_holiday() {
        // 2025-07-03 (Thu) after close; Friday is Independence Day.
        let from = eastern(2025, 7, 3, 17, 0);
        let open = SessionClock::next_regular_open(from).with_timezone(&Eastern);
        assert_eq!(open.date_naive(), NaiveDate::from_ymd_opt(2025, 7, 7).unwrap());
    }

    #[test]
    fn test_dst_transition_day_still_opens_0930_eastern() {
        // 2025-03-10, the Monday after the spring-forward Sunday.
        let open = SessionClock::next_regular_open(eastern(2025, 3, 10, 5, 0));
        let open_e = open.with_timezone(&Eastern);
        assert_eq!(open_e.time(), NaiveTime::from_hms_opt(9, 30, 0).unwrap());
        // EDT is UTC-4, so 09:30 Eastern is 13:30 UTC.
        assert_eq!(open.time(), NaiveTime::from_hms_opt(13, 30, 0).unwrap());
    }
}
