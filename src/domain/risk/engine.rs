use crate::domain::errors::RiskViolation;
use crate::domain::market::session::MarketSession;
use crate::domain::risk::pdt::PdtLedger;
use crate::domain::trading::signal::TradeSignal;
use crate::domain::trading::types::AccountSnapshot;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use tracing::debug;

/// Position sizing mode. Volatility adjustment scales the share count down
/// by `1 / (1 + sigma)`; the per-trade equity-at-risk cap is re-enforced on
/// the scaled quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizingMode {
    Fixed,
    VolatilityAdjusted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskProfile {
    Conservative,
    Standard,
    Aggressive,
}

impl RiskProfile {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "conservative" => Some(RiskProfile::Conservative),
            "standard" => Some(RiskProfile::Standard),
            "aggressive" => Some(RiskProfile::Aggressive),
            _ => None,
        }
    }
}

/// All risk knobs, expressed as equity fractions unless noted.
#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub max_position_pct: Decimal,
    /// Tighter notional cap outside the regular session.
    pub extended_hours_position_pct: Decimal,
    pub max_trade_risk_pct: Decimal,
    pub max_portfolio_risk_pct: Decimal,
    pub max_sector_concentration_pct: Decimal,
    pub circuit_breaker_pct: Decimal,
    pub max_concurrent_positions: usize,
    pub min_price: Decimal,
    pub min_reward_risk: Decimal,
    pub sizing_mode: SizingMode,
    pub pdt_equity_threshold: Decimal,
    pub max_day_trades: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_pct: dec!(0.10),
            extended_hours_position_pct: dec!(0.03),
            max_trade_risk_pct: dec!(0.02),
            max_portfolio_risk_pct: dec!(0.12),
            max_sector_concentration_pct: dec!(0.25),
            circuit_breaker_pct: dec!(0.05),
            max_concurrent_positions: 8,
            min_price: dec!(10),
            min_reward_risk: dec!(1.5),
            sizing_mode: SizingMode::Fixed,
            pdt_equity_threshold: dec!(25000),
            max_day_trades: 3,
        }
    }
}

impl RiskConfig {
    pub fn for_profile(profile: RiskProfile) -> Self {
        let base = Self::default();
        match profile {
            RiskProfile::Conservative => Self {
                max_position_pct: dec!(0.05),
                max_concurrent_positions: 3,
                sizing_mode: SizingMode::VolatilityAdjusted,
                ..base
            },
            RiskProfile::Standard => base,
            RiskProfile::Aggressive => Self {
                max_concurrent_positions: 12,
                ..base
            },
        }
    }
}

/// Portfolio-level facts the gates need, computed by the caller from the
/// position book and the protection map.
#[derive(Debug, Clone, Default)]
pub struct PortfolioState {
    pub open_positions: usize,
    /// Sum of per-position risk (distance to protective stop x quantity).
    pub open_risk: Decimal,
    /// Notional already held in the candidate's sector.
    pub sector_notional: Decimal,
}

/// The three concentric gates plus position sizing. Stateless; daily state
/// lives in [`CircuitBreaker`], owned by the scheduler.
#[derive(Debug, Clone)]
pub struct RiskEngine {
    config: RiskConfig,
}

impl RiskEngine {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    fn position_pct(&self, session: MarketSession) -> Decimal {
        if session == MarketSession::Regular {
            self.config.max_position_pct
        } else {
            self.config.extended_hours_position_pct
        }
    }

    /// Size a trade: `qty = floor(risk_budget / risk_per_share)` where
    /// `risk_budget = min(max_trade_risk_pct x equity,
    ///                    max_position_pct x equity x stop_distance_pct)`.
    pub fn size_qty(
        &self,
        equity: Decimal,
        entry: Decimal,
        stop: Decimal,
        daily_sigma: Option<f64>,
        session: MarketSession,
    ) -> Decimal {
        let risk_per_share = (entry - stop).abs();
        if risk_per_share <= Decimal::ZERO || entry <= Decimal::ZERO || equity <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let stop_distance_pct = risk_per_share / entry;
        let risk_budget = (self.config.max_trade_risk_pct * equity)
            .min(self.position_pct(session) * equity * stop_distance_pct);
        let mut qty = (risk_budget / risk_per_share).floor();

        if self.config.sizing_mode == SizingMode::VolatilityAdjusted
            && let Some(sigma) = daily_sigma
            && sigma > 0.0
            && let Some(scale) = Decimal::from_f64_retain(1.0 / (1.0 + sigma))
        {
            qty = (qty * scale).floor();
        }

        // The per-trade cap holds post-adjustment regardless of mode.
        let max_risk = self.config.max_trade_risk_pct * equity;
        while qty > Decimal::ZERO && qty * risk_per_share > max_risk {
            qty -= Decimal::ONE;
        }

        qty.max(Decimal::ZERO)
    }

    /// Per-trade gate: price floor, volume ratio, notional and risk caps,
    /// reward:risk minimum. Expects a sized signal.
    pub fn check_trade(
        &self,
        signal: &TradeSignal,
        account: &AccountSnapshot,
        session: MarketSession,
        volume_ratio: f64,
    ) -> Result<(), RiskViolation> {
        if signal.entry < self.config.min_price {
            return Err(RiskViolation::PriceFloor {
                symbol: signal.symbol.clone(),
                price: signal.entry,
                floor: self.config.min_price,
            });
        }
        if volume_ratio < 1.0 {
            return Err(RiskViolation::ThinVolume {
                symbol: signal.symbol.clone(),
                ratio: volume_ratio,
            });
        }

        signal
            .validate(self.config.min_reward_risk)
            .map_err(|_| RiskViolation::RewardRiskTooLow {
                symbol: signal.symbol.clone(),
                ratio: signal.reward_risk(),
                min: self.config.min_reward_risk,
            })?;

        let notional = signal.qty * signal.entry;
        let notional_cap = self.position_pct(session) * account.equity;
        if notional > notional_cap {
            return Err(RiskViolation::PositionSizeLimit {
                symbol: signal.symbol.clone(),
                notional,
                cap: notional_cap,
            });
        }

        let trade_risk = signal.qty * signal.risk_per_share();
        let risk_cap = self.config.max_trade_risk_pct * account.equity;
        if trade_risk > risk_cap {
            return Err(RiskViolation::TradeRiskLimit {
                symbol: signal.symbol.clone(),
                risk: trade_risk,
                cap: risk_cap,
            });
        }

        Ok(())
    }

    /// Portfolio gate: concurrent-position cap, sum-of-risk cap, sector
    /// concentration.
    pub fn check_portfolio(
        &self,
        signal: &TradeSignal,
        account: &AccountSnapshot,
        portfolio: &PortfolioState,
    ) -> Result<(), RiskViolation> {
        if portfolio.open_positions >= self.config.max_concurrent_positions {
            return Err(RiskViolation::MaxPositions {
                open: portfolio.open_positions,
                max: self.config.max_concurrent_positions,
            });
        }

        let trade_risk = signal.qty * signal.risk_per_share();
        let projected = portfolio.open_risk + trade_risk;
        let cap = self.config.max_portfolio_risk_pct * account.equity;
        if projected > cap {
            return Err(RiskViolation::PortfolioRiskLimit { projected, cap });
        }

        if account.equity > Decimal::ZERO {
            let projected_sector = portfolio.sector_notional + signal.qty * signal.entry;
            let sector_pct = projected_sector / account.equity;
            if sector_pct > self.config.max_sector_concentration_pct {
                return Err(RiskViolation::SectorConcentration {
                    sector: "candidate".to_string(),
                    pct: (sector_pct * dec!(100)).to_f64().unwrap_or(0.0),
                    max_pct: (self.config.max_sector_concentration_pct * dec!(100))
                        .to_f64()
                        .unwrap_or(0.0),
                });
            }
        }

        Ok(())
    }

    /// PDT gate: rejects orders that would complete a day trade while the
    /// account is under the equity threshold and at the trade cap.
    pub fn check_pdt(
        &self,
        signal: &TradeSignal,
        account: &AccountSnapshot,
        ledger: &PdtLedger,
        session_date: NaiveDate,
    ) -> Result<(), RiskViolation> {
        if ledger.is_blocked(&signal.symbol) {
            return Err(RiskViolation::SymbolBlocked {
                symbol: signal.symbol.clone(),
            });
        }
        if account.equity >= self.config.pdt_equity_threshold {
            return Ok(());
        }
        let count = ledger.day_trade_count().max(account.daytrade_count);
        if count >= self.config.max_day_trades
            && ledger.would_be_day_trade(&signal.symbol, signal.side, session_date)
        {
            return Err(RiskViolation::PdtWouldViolate {
                symbol: signal.symbol.clone(),
                day_trades: count,
                equity: account.equity,
            });
        }
        Ok(())
    }

    /// Full gate sequence for a draft signal. On success returns the signal
    /// with its sized quantity filled in.
    #[allow(clippy::too_many_arguments)]
    pub fn approve(
        &self,
        draft: &TradeSignal,
        account: &AccountSnapshot,
        session: MarketSession,
        session_date: NaiveDate,
        portfolio: &PortfolioState,
        ledger: &PdtLedger,
        volume_ratio: f64,
        daily_sigma: Option<f64>,
    ) -> Result<TradeSignal, RiskViolation> {
        self.check_pdt(draft, account, ledger, session_date)?;

        let qty = self.size_qty(account.equity, draft.entry, draft.stop, daily_sigma, session);
        if qty <= Decimal::ZERO {
            return Err(RiskViolation::ZeroQuantity {
                symbol: draft.symbol.clone(),
                budget: self.config.max_trade_risk_pct * account.equity,
            });
        }

        let mut sized = draft.clone();
        sized.qty = qty;

        self.check_trade(&sized, account, session, volume_ratio)?;
        self.check_portfolio(&sized, account, portfolio)?;

        debug!(
            "RiskEngine: approved {} {} x{} (entry {}, stop {}, target {})",
            sized.side, sized.symbol, sized.qty, sized.entry, sized.stop, sized.target
        );
        Ok(sized)
    }
}

/// Daily-drawdown circuit breaker. Owned and mutated by the scheduler only.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold_pct: Decimal,
    initial_equity_today: Option<Decimal>,
    tripped: bool,
}

impl CircuitBreaker {
    pub fn new(threshold_pct: Decimal) -> Self {
        Self {
            threshold_pct,
            initial_equity_today: None,
            tripped: false,
        }
    }

    /// Capture the session-open equity baseline once per session.
    pub fn capture_session_open(&mut self, equity: Decimal) {
        if self.initial_equity_today.is_none() {
            self.initial_equity_today = Some(equity);
        }
    }

    /// Reset the baseline at a new session. Clears a previous trip.
    pub fn reset_for_session(&mut self, equity: Decimal) {
        self.initial_equity_today = Some(equity);
        self.tripped = false;
    }

    pub fn drawdown(&self, current_equity: Decimal) -> Decimal {
        match self.initial_equity_today {
            Some(initial) if initial > Decimal::ZERO => (initial - current_equity) / initial,
            _ => Decimal::ZERO,
        }
    }

    /// Returns true exactly once per trip, so the emergency protocol runs a
    /// single liquidation pass no matter how often the check fires.
    pub fn check(&mut self, current_equity: Decimal) -> bool {
        if self.tripped {
            return false;
        }
        if self.drawdown(current_equity) >= self.threshold_pct {
            self.tripped = true;
            return true;
        }
        false
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    pub fn initial_equity(&self) -> Option<Decimal> {
        self.initial_equity_today
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trading::signal::StrategyKind;
    use crate::domain::trading::types::OrderSide;
    use chrono::Utc;

    fn account(equity: Decimal) -> AccountSnapshot {
        AccountSnapshot {
            equity,
            last_equity: equity,
            cash: equity,
            buying_power: equity * dec!(2),
            daytrade_count: 0,
            pattern_day_trader: false,
        }
    }

    fn draft(symbol: &str, entry: Decimal, stop: Decimal, target: Decimal) -> TradeSignal {
        TradeSignal {
            symbol: symbol.to_string(),
            side: OrderSide::Buy,
            entry,
            stop,
            target,
            qty: Decimal::ZERO,
            confidence: 0.8,
            strategy: StrategyKind::Momentum,
            horizon_days: 2,
            rationale: "test".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_sizing_matches_reference_scenario() {
        // equity 10_000, entry 180, stop 176:
        // risk_budget = min(200, 10_000 * 0.10 * 4/180) = 22.2 -> qty 5
        let engine = RiskEngine::new(RiskConfig::default());
        let qty = engine.size_qty(
            dec!(10000),
            dec!(180),
            dec!(176),
            None,
            MarketSession::Regular,
        );
        assert_eq!(qty, dec!(5));
    }

    #[test]
    fn test_sizing_extended_hours_tighter() {
        let engine = RiskEngine::new(RiskConfig::default());
        let regular = engine.size_qty(
            dec!(10000),
            dec!(180),
            dec!(176),
            None,
            MarketSession::Regular,
        );
        let after = engine.size_qty(
            dec!(10000),
            dec!(180),
            dec!(176),
            None,
            MarketSession::AfterHours,
        );
        assert!(after < regular);
    }

    #[test]
    fn test_volatility_adjustment_shrinks_qty() {
        let engine = RiskEngine::new(RiskConfig {
            sizing_mode: SizingMode::VolatilityAdjusted,
            ..RiskConfig::default()
        });
        let fixed = engine.size_qty(
            dec!(100000),
            dec!(50),
            dec!(49),
            None,
            MarketSession::Regular,
        );
        let adjusted = engine.size_qty(
            dec!(100000),
            dec!(50),
            dec!(49),
            Some(0.5),
            MarketSession::Regular,
        );
        assert!(adjusted < fixed);
        // Risk cap still holds post-adjustment.
        assert!(adjusted * Decimal::ONE <= dec!(0.02) * dec!(100000));
    }

    #[test]
    fn test_full_approval_happy_path() {
        let engine = RiskEngine::new(RiskConfig::default());
        let ledger = PdtLedger::new();
        let approved = engine
            .approve(
                &draft("AAPL", dec!(180), dec!(176), dec!(188)),
                &account(dec!(10000)),
                MarketSession::Regular,
                NaiveDate::from_ymd_opt(2025, 6, 10).unwrap(),
                &PortfolioState::default(),
                &ledger,
                2.1,
                None,
            )
            .unwrap();
        assert_eq!(approved.qty, dec!(5));
    }

    #[test]
    fn test_price_floor_rejection() {
        let engine = RiskEngine::new(RiskConfig::default());
        let mut signal = draft("PENNY", dec!(8), dec!(7.8), dec!(8.5));
        signal.qty = dec!(10);
        let result = engine.check_trade(
            &signal,
            &account(dec!(10000)),
            MarketSession::Regular,
            2.0,
        );
        assert!(matches!(result, Err(RiskViolation::PriceFloor { .. })));
    }

    #[test]
    fn test_volume_ratio_boundary() {
        let engine = RiskEngine::new(RiskConfig::default());
        let mut signal = draft("AAPL", dec!(180), dec!(176), dec!(188));
        signal.qty = dec!(1);

        // Exactly 1.0 passes.
        assert!(
            engine
                .check_trade(&signal, &account(dec!(10000)), MarketSession::Regular, 1.0)
                .is_ok()
        );
        // Just under fails.
        assert!(matches!(
            engine.check_trade(&signal, &account(dec!(10000)), MarketSession::Regular, 0.99),
            Err(RiskViolation::ThinVolume { .. })
        ));
    }

    #[test]
    fn test_portfolio_risk_cap() {
        let engine = RiskEngine::new(RiskConfig::default());
        let mut signal = draft("AAPL", dec!(180), dec!(176), dec!(188));
        signal.qty = dec!(5);

        let portfolio = PortfolioState {
            open_positions: 2,
            open_risk: dec!(1190),
            sector_notional: Decimal::ZERO,
        };
        // 1190 + 20 > 1200 cap on 10k equity.
        assert!(matches!(
            engine.check_portfolio(&signal, &account(dec!(10000)), &portfolio),
            Err(RiskViolation::PortfolioRiskLimit { .. })
        ));
    }

    #[test]
    fn test_max_positions_cap() {
        let engine = RiskEngine::new(RiskConfig::default());
        let mut signal = draft("AAPL", dec!(180), dec!(176), dec!(188));
        signal.qty = dec!(1);
        let portfolio = PortfolioState {
            open_positions: 8,
            ..PortfolioState::default()
        };
        assert!(matches!(
            engine.check_portfolio(&signal, &account(dec!(10000)), &portfolio),
            Err(RiskViolation::MaxPositions { .. })
        ));
    }

    #[test]
    fn test_pdt_gate_blocks_same_session_close() {
        let engine = RiskEngine::new(RiskConfig::default());
        let session = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
        let mut ledger = PdtLedger::new();
        ledger.roll_to_session(session);
        ledger.record_open("SYMY", OrderSide::Buy, session);
        for sym in ["A", "B", "C"] {
            ledger.record_open(sym, OrderSide::Buy, session);
            ledger.record_close(sym, session);
        }

        let mut sell = draft("SYMY", dec!(50), dec!(52), dec!(45));
        sell.side = OrderSide::Sell;
        let result = engine.check_pdt(&sell, &account(dec!(8000)), &ledger, session);
        assert!(matches!(result, Err(RiskViolation::PdtWouldViolate { .. })));

        // Above the equity threshold the same order is fine.
        assert!(
            engine
                .check_pdt(&sell, &account(dec!(30000)), &ledger, session)
                .is_ok()
        );
    }

    #[test]
    fn test_blocked_symbol_rejected() {
        let engine = RiskEngine::new(RiskConfig::default());
        let session = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
        let mut ledger = PdtLedger::new();
        ledger.block("NVDA");
        let signal = draft("NVDA", dec!(100), dec!(98), dec!(105));
        assert!(matches!(
            engine.check_pdt(&signal, &account(dec!(50000)), &ledger, session),
            Err(RiskViolation::SymbolBlocked { .. })
        ));
    }

    #[test]
    fn test_circuit_breaker_trips_once() {
        let mut breaker = CircuitBreaker::new(dec!(0.05));
        breaker.capture_session_open(dec!(10000));

        assert!(!breaker.check(dec!(9600)));
        assert!(breaker.check(dec!(9490)));
        assert!(breaker.is_tripped());
        // Second invocation must not trigger a second pass.
        assert!(!breaker.check(dec!(9000)));
    }

    #[test]
    fn test_circuit_breaker_session_reset() {
        let mut breaker = CircuitBreaker::new(dec!(0.05));
        breaker.capture_session_open(dec!(10000));
        assert!(breaker.check(dec!(9400)));

        breaker.reset_for_session(dec!(9400));
        assert!(!breaker.is_tripped());
        assert!(!breaker.check(dec!(9300)));
    }
}
