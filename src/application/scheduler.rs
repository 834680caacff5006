//! Top-level cooperative loop. The scheduler is the only authority that
//! issues trading decisions; workers (funnel cycles, emergency liquidation)
//! run as detached tasks and report back over completion channels. The PDT
//! ledger, circuit breaker, and protection map live here and are mutated
//! only from this context.

use crate::application::evaluator::StrategyEvaluator;
use crate::application::funnel::OpportunityFunnel;
use crate::application::guard::OvernightGuard;
use crate::application::intelligence::MarketIntelligence;
use crate::application::lifecycle::emergency::{EmergencyStop, ShutdownReport};
use crate::application::lifecycle::orders::{FillEvent, OrderLifecycle};
use crate::application::lifecycle::protection::ProtectionReconciler;
use crate::config::Config;
use crate::domain::errors::{ErrorKind, RiskViolation};
use crate::domain::market::session::{MarketSession, SessionClock};
use crate::domain::risk::engine::{CircuitBreaker, PortfolioState, RiskEngine};
use crate::domain::risk::pdt::PdtLedger;
use crate::domain::trading::opportunity::Opportunity;
use crate::domain::trading::types::{AccountSnapshot, OrderSpec, Position};
use crate::infrastructure::broker::gateway::BrokerGateway;
use crate::infrastructure::broker::rate_limiter::TokenClass;
use crate::infrastructure::persistence::state_store::StateStore;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, interval};
use tracing::{debug, error, info, warn};

const ACCOUNT_CACHE_TTL: Duration = Duration::from_secs(5);
const MONITOR_TICK: Duration = Duration::from_secs(10);
const AUDIT_TICK: Duration = Duration::from_secs(60);
const INTELLIGENCE_TICK: Duration = Duration::from_secs(30 * 60);
/// Eastern time after which excess overnight positions are trimmed.
const OVERNIGHT_TRIM_AFTER: (u32, u32) = (15, 45);
const HEARTBEAT_EVERY_TICKS: u64 = 30;

/// Account snapshot cache with a short validity window; every risk gate
/// refreshes through this rather than hitting the broker directly.
struct AccountCache {
    last: Option<(Instant, AccountSnapshot)>,
}

impl AccountCache {
    fn new() -> Self {
        Self { last: None }
    }

    async fn get(&mut self, gateway: &BrokerGateway) -> Option<AccountSnapshot> {
        if let Some((at, snapshot)) = &self.last
            && at.elapsed() < ACCOUNT_CACHE_TTL
        {
            return Some(snapshot.clone());
        }
        let resp = gateway.get_account().await;
        match resp.data {
            Some(snapshot) if resp.success => {
                self.last = Some((Instant::now(), snapshot.clone()));
                Some(snapshot)
            }
            _ => {
                warn!("Scheduler: account refresh failed: {:?}", resp.error_message);
                self.last.as_ref().map(|(_, s)| s.clone())
            }
        }
    }
}

pub struct Scheduler {
    clock: SessionClock,
    gateway: Arc<BrokerGateway>,
    funnel: Arc<OpportunityFunnel>,
    evaluator: StrategyEvaluator,
    risk: RiskEngine,
    lifecycle: OrderLifecycle,
    reconciler: ProtectionReconciler,
    emergency: Arc<EmergencyStop>,
    guard: OvernightGuard,
    intelligence: MarketIntelligence,
    ledger: PdtLedger,
    breaker: CircuitBreaker,
    store: StateStore,
    config: Config,

    account_cache: AccountCache,
    shutdown_rx: watch::Receiver<bool>,
    halted: bool,
    funnel_in_flight: bool,
    emergency_in_flight: bool,
    session_date: Option<NaiveDate>,
    known_positions: HashSet<String>,
    gap_checked: bool,
    close_snapshot_taken: bool,
    monitor_ticks: u64,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: Arc<BrokerGateway>,
        funnel: Arc<OpportunityFunnel>,
        evaluator: StrategyEvaluator,
        risk: RiskEngine,
        lifecycle: OrderLifecycle,
        reconciler: ProtectionReconciler,
        emergency: Arc<EmergencyStop>,
        guard: OvernightGuard,
        intelligence: MarketIntelligence,
        ledger: PdtLedger,
        store: StateStore,
        config: Config,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let breaker = CircuitBreaker::new(config.risk.circuit_breaker_pct);
        Self {
            clock: SessionClock::new(),
            gateway,
            funnel,
            evaluator,
            risk,
            lifecycle,
            reconciler,
            emergency,
            guard,
            intelligence,
            ledger,
            breaker,
            store,
            config,
            account_cache: AccountCache::new(),
            shutdown_rx,
            halted: false,
            funnel_in_flight: false,
            emergency_in_flight: false,
            session_date: None,
            known_positions: HashSet::new(),
            gap_checked: false,
            close_snapshot_taken: false,
            monitor_ticks: 0,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        self.startup().await?;

        let mut shutdown_rx = self.shutdown_rx.clone();
        let (funnel_tx, mut funnel_rx) = mpsc::channel::<Vec<Opportunity>>(1);
        let (emergency_tx, mut emergency_rx) = mpsc::channel::<ShutdownReport>(1);

        let mut intel_interval = interval(INTELLIGENCE_TICK);
        // The scan timer ticks every minute; the per-session cadence
        // (regular vs extended hours) is enforced against last_scan.
        let mut scan_interval = interval(Duration::from_secs(60));
        let mut audit_interval = interval(AUDIT_TICK);
        let mut monitor_interval = interval(MONITOR_TICK);
        let mut last_scan: Option<Instant> = None;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let session = self.clock.current_session();
            if session == MarketSession::Closed && !self.emergency_in_flight {
                self.on_session_closed().await;
                info!("Scheduler: market closed, suspending until next open");
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = self.clock.wait_until_next_open() => {
                        info!("Scheduler: market open, resuming");
                        continue;
                    }
                }
            }

            self.roll_session_if_needed().await;

            tokio::select! {
                _ = shutdown_rx.changed() => break,

                Some(report) = emergency_rx.recv() => {
                    self.finish_emergency(report);
                }

                Some(opportunities) = funnel_rx.recv() => {
                    self.funnel_in_flight = false;
                    if !self.halted {
                        self.process_opportunities(opportunities, session).await;
                    }
                }

                _ = intel_interval.tick() => {
                    if !self.halted {
                        self.intelligence.refresh().await;
                    }
                }

                _ = scan_interval.tick() => {
                    if self.scanning_allowed(session)
                        && last_scan.is_none_or(|at| at.elapsed() >= self.scan_cadence(session))
                    {
                        last_scan = Some(Instant::now());
                        self.spawn_funnel_cycle(&funnel_tx);
                    }
                }

                _ = audit_interval.tick() => {
                    self.audit_tick(session).await;
                }

                _ = monitor_interval.tick() => {
                    self.monitor_tick(session).await;
                }
            }

            self.check_circuit_breaker(&emergency_tx).await;
        }

        self.shutdown().await
    }

    async fn startup(&mut self) -> Result<()> {
        info!(
            "Scheduler: starting ({} profile, paper={}, scan every {}m)",
            format!("{:?}", self.config.risk_profile).to_lowercase(),
            self.config.broker.paper_trading,
            self.config.scan_interval_minutes
        );

        let account = self
            .account_cache
            .get(&self.gateway)
            .await
            .context("broker account unreachable at startup")?;
        info!(
            "Scheduler: account equity ${}, buying power ${}, day trades {}",
            account.equity, account.buying_power, account.daytrade_count
        );

        let today = self.clock.today();
        self.session_date = Some(today);
        self.ledger.roll_to_session(today);
        self.breaker.capture_session_open(account.equity);

        let positions = self.fetch_positions().await;
        self.known_positions = positions.iter().map(|p| p.symbol.clone()).collect();
        for position in &positions {
            self.guard.record_open(&position.symbol, today);
        }

        let report = self
            .reconciler
            .reconcile_startup(&positions, self.lifecycle.intents())
            .await;
        if report.remediated > 0 || report.consolidated > 0 {
            warn!(
                "Scheduler: startup reconciliation remediated {} and consolidated {} position(s)",
                report.remediated, report.consolidated
            );
        }

        self.intelligence.refresh().await;
        Ok(())
    }

    /// Funnel cadence: the configured interval during the regular session,
    /// five minutes in extended hours.
    fn scan_cadence(&self, session: MarketSession) -> Duration {
        match session {
            MarketSession::Regular => Duration::from_secs(self.config.scan_interval_minutes * 60),
            _ => Duration::from_secs(5 * 60),
        }
    }

    fn scanning_allowed(&self, session: MarketSession) -> bool {
        if self.halted || self.funnel_in_flight {
            return false;
        }
        match session {
            MarketSession::Regular => true,
            MarketSession::PreMarket | MarketSession::AfterHours => {
                self.config.enable_extended_hours
            }
            MarketSession::Closed => false,
        }
    }

    fn spawn_funnel_cycle(&mut self, funnel_tx: &mpsc::Sender<Vec<Opportunity>>) {
        self.funnel_in_flight = true;
        let funnel = self.funnel.clone();
        let regime = self.intelligence.current().clone();
        let tx = funnel_tx.clone();
        tokio::spawn(async move {
            let opportunities = funnel.run(&regime).await;
            // Receiver gone means the loop is shutting down.
            let _ = tx.send(opportunities).await;
        });
    }

    async fn process_opportunities(
        &mut self,
        opportunities: Vec<Opportunity>,
        session: MarketSession,
    ) {
        if opportunities.is_empty() {
            return;
        }
        let Some(account) = self.account_cache.get(&self.gateway).await else {
            warn!("Scheduler: no account snapshot, skipping signal processing");
            return;
        };
        let positions = self.fetch_positions().await;
        let today = self.clock.today();
        let portfolio = self.portfolio_state(&positions);
        let regime = self.intelligence.current().clone();

        for opportunity in opportunities {
            let symbol = opportunity.symbol.as_str();
            if self.lifecycle.has_pending_entry(symbol) {
                debug!("Scheduler: {} has a working entry, skipping", symbol);
                continue;
            }
            if positions.iter().any(|p| p.symbol == symbol) {
                debug!("Scheduler: already positioned in {}, skipping", symbol);
                continue;
            }
            if self.ledger.is_blocked(symbol) {
                info!("Scheduler: {} is PDT-blocked, skipping", symbol);
                continue;
            }

            let quote_resp = self.gateway.get_latest_quote(symbol).await;
            if quote_resp.kind_is(ErrorKind::StaleData) {
                warn!("Scheduler: stale quote for {}, signal discarded", symbol);
                continue;
            }
            let quote_ok = quote_resp.success;
            let Some(quote) = quote_resp.data.filter(|_| quote_ok) else {
                warn!(
                    "Scheduler: quote unavailable for {}: {:?}",
                    symbol, quote_resp.error_message
                );
                continue;
            };

            let Some(draft) = self.evaluator.evaluate(&opportunity, &regime, &quote) else {
                continue;
            };

            let approved = match self.risk.approve(
                &draft,
                &account,
                session,
                today,
                &portfolio,
                &self.ledger,
                opportunity.volume_ratio(),
                opportunity.analysis.daily_sigma,
            ) {
                Ok(signal) => signal,
                Err(violation @ RiskViolation::PdtWouldViolate { .. }) => {
                    // Expected under PDT rules; not an error.
                    info!("Scheduler: {}", violation);
                    continue;
                }
                Err(violation) => {
                    warn!("Scheduler: signal rejected: {}", violation);
                    continue;
                }
            };

            let resp = self.lifecycle.submit_bracket(&approved).await;
            if resp.kind_is(ErrorKind::PdtViolation) {
                warn!(
                    "Scheduler: broker PDT rejection for {}, blocking symbol for this window",
                    approved.symbol
                );
                self.ledger.block(&approved.symbol);
                continue;
            }
            if !resp.success {
                warn!(
                    "Scheduler: bracket submission failed for {}: {:?}",
                    approved.symbol, resp.error_message
                );
            }
        }
    }

    /// Portfolio facts for the gates, from the position book and the
    /// recorded protection intents.
    fn portfolio_state(&self, positions: &[Position]) -> PortfolioState {
        let mut open_risk = Decimal::ZERO;
        for position in positions {
            let risk = match self.lifecycle.intents().get(&position.symbol) {
                Some(intent) => (position.avg_entry_price - intent.stop).abs() * position.abs_qty(),
                // Unknown stop: assume the per-trade cap is fully used.
                None => {
                    position.notional() * self.risk.config().max_trade_risk_pct
                }
            };
            open_risk += risk;
        }
        PortfolioState {
            open_positions: positions.iter().filter(|p| !p.qty.is_zero()).count(),
            open_risk,
            sector_notional: Decimal::ZERO,
        }
    }

    async fn monitor_tick(&mut self, _session: MarketSession) {
        self.monitor_ticks += 1;

        let events = self.lifecycle.monitor().await;
        let today = self.clock.today();
        for event in events {
            match event {
                FillEvent::EntryFilled { symbol, side, qty } => {
                    info!("Scheduler: entry fill {} {} x{}", side, symbol, qty);
                    self.ledger.record_open(&symbol, side, today);
                    self.guard.record_open(&symbol, today);
                }
                FillEvent::EntryTerminal { symbol, status } => {
                    debug!("Scheduler: entry for {} terminal ({})", symbol, status);
                }
            }
        }

        let positions = self.fetch_positions().await;
        let current: HashSet<String> = positions.iter().map(|p| p.symbol.clone()).collect();
        let closed: Vec<String> = self
            .known_positions
            .difference(&current)
            .cloned()
            .collect();
        for symbol in closed {
            let was_day_trade = self.ledger.record_close(&symbol, today);
            if was_day_trade {
                info!(
                    "Scheduler: {} closed same-session (day trade #{} in window)",
                    symbol,
                    self.ledger.day_trade_count()
                );
            } else {
                info!("Scheduler: position {} closed", symbol);
            }
            self.guard.forget(&symbol);
            self.lifecycle.drop_intent(&symbol);
        }
        self.known_positions = current;

        if self.monitor_ticks % HEARTBEAT_EVERY_TICKS == 0 {
            info!(
                "Scheduler: heartbeat - {} position(s), {} day trade(s) in window, halted={}",
                self.known_positions.len(),
                self.ledger.day_trade_count(),
                self.halted
            );
        }
    }

    async fn audit_tick(&mut self, session: MarketSession) {
        let positions = self.fetch_positions().await;

        let report = self
            .reconciler
            .audit(&positions, self.lifecycle.intents(), false)
            .await;
        if report.remediated > 0 || report.consolidated > 0 || report.failed > 0 {
            warn!(
                "Scheduler: protection audit remediated={} consolidated={} failed={}",
                report.remediated, report.consolidated, report.failed
            );
        }

        if self.halted {
            return;
        }

        let today = self.clock.today();

        if session == MarketSession::PreMarket && !self.gap_checked {
            self.premarket_gap_check(&positions).await;
            self.gap_checked = true;
        }

        if session == MarketSession::Regular {
            for symbol in self.guard.rotation_candidates(today) {
                if positions.iter().any(|p| p.symbol == symbol) {
                    info!("Scheduler: rotating aged position {}", symbol);
                    self.close_position(&symbol, &positions, "overnight rotation")
                        .await;
                }
            }

            let now_eastern = self.clock.now_eastern();
            let past_trim = now_eastern.time()
                >= chrono::NaiveTime::from_hms_opt(OVERNIGHT_TRIM_AFTER.0, OVERNIGHT_TRIM_AFTER.1, 0)
                    .expect("constant time");
            if past_trim {
                let excess: Vec<String> = self
                    .guard
                    .overnight_excess(&positions)
                    .iter()
                    .map(|p| p.symbol.clone())
                    .collect();
                for symbol in excess {
                    info!("Scheduler: trimming {} ahead of the overnight cap", symbol);
                    self.close_position(&symbol, &positions, "overnight cap").await;
                }
            }
        }

        if session == MarketSession::AfterHours && !self.close_snapshot_taken {
            self.guard.snapshot_close(&positions, chrono::Utc::now());
            self.close_snapshot_taken = true;
        }
    }

    /// Deliberate close of one position, PDT-gated. Cancels protections
    /// first so the close cannot bounce on held quantity.
    async fn close_position(&mut self, symbol: &str, positions: &[Position], reason: &str) {
        let Some(position) = positions.iter().find(|p| p.symbol == symbol) else {
            return;
        };
        let today = self.clock.today();

        if let Some(account) = self.account_cache.get(&self.gateway).await
            && account.equity < self.risk.config().pdt_equity_threshold
        {
            let count = self.ledger.day_trade_count().max(account.daytrade_count);
            if count >= self.risk.config().max_day_trades
                && self
                    .ledger
                    .would_be_day_trade(symbol, position.closing_side(), today)
            {
                info!(
                    "Scheduler: deferring {} close ({}): would be day trade #{}",
                    symbol, reason, count
                );
                return;
            }
        }

        let canceled = self.gateway.cancel_all_for(symbol).await;
        if !canceled.success {
            warn!(
                "Scheduler: could not clear orders before closing {}: {:?}",
                symbol, canceled.error_message
            );
            return;
        }

        let spec = OrderSpec::market(symbol, position.closing_side(), position.abs_qty());
        let resp = self.gateway.submit_order(&spec, TokenClass::Normal).await;
        if resp.success {
            info!("Scheduler: close submitted for {} ({})", symbol, reason);
        } else {
            warn!(
                "Scheduler: close failed for {} ({}): {:?}",
                symbol, reason, resp.error_message
            );
        }
    }

    async fn premarket_gap_check(&mut self, positions: &[Position]) {
        let mut open_prices = HashMap::new();
        for position in positions {
            let resp = self.gateway.get_latest_quote(&position.symbol).await;
            if let Some(quote) = resp.data.filter(|q| q.mid() > 0.0) {
                if let Some(mid) = Decimal::from_f64_retain(quote.mid()) {
                    open_prices.insert(position.symbol.clone(), mid);
                }
            }
        }
        let alerts = self.guard.check_gaps(&open_prices);
        if !alerts.is_empty() {
            warn!(
                "Scheduler: {} overnight gap alert(s) this pre-market",
                alerts.len()
            );
        }
    }

    async fn check_circuit_breaker(&mut self, emergency_tx: &mpsc::Sender<ShutdownReport>) {
        if self.emergency_in_flight {
            return;
        }
        let Some(account) = self.account_cache.get(&self.gateway).await else {
            return;
        };
        self.breaker.capture_session_open(account.equity);

        if self.breaker.check(account.equity) {
            let drawdown = self.breaker.drawdown(account.equity);
            error!(
                "Scheduler: CIRCUIT BREAKER - drawdown {:.2}% >= {:.2}%, halting",
                drawdown * Decimal::ONE_HUNDRED,
                self.config.risk.circuit_breaker_pct * Decimal::ONE_HUNDRED
            );
            self.halted = true;
            self.emergency_in_flight = true;

            let emergency = self.emergency.clone();
            let tx = emergency_tx.clone();
            tokio::spawn(async move {
                let report = emergency.execute("daily drawdown circuit breaker").await;
                let _ = tx.send(report).await;
            });
        }
    }

    fn finish_emergency(&mut self, report: ShutdownReport) {
        self.emergency_in_flight = false;
        match self.store.save_shutdown_report(report.triggered_at, &report) {
            Ok(path) => info!("Scheduler: shutdown report persisted to {}", path.display()),
            Err(e) => error!("Scheduler: failed to persist shutdown report: {:#}", e),
        }
        if let Err(e) = self.store.save_pdt_ledger(&self.ledger) {
            error!("Scheduler: failed to persist PDT ledger: {:#}", e);
        }
        error!(
            "Scheduler: emergency stop complete - {} flattened, residual ${}; system stays halted",
            report.positions_flattened, report.residual_exposure
        );
    }

    async fn roll_session_if_needed(&mut self) {
        let today = self.clock.today();
        if self.session_date == Some(today) {
            return;
        }
        info!("Scheduler: new trading session {}", today);
        self.session_date = Some(today);
        self.ledger.roll_to_session(today);
        self.gap_checked = false;
        self.close_snapshot_taken = false;
        if let Some(account) = self.account_cache.get(&self.gateway).await {
            self.breaker.reset_for_session(account.equity);
            self.halted = false;
        }
        if let Err(e) = self.store.save_pdt_ledger(&self.ledger) {
            error!("Scheduler: failed to persist PDT ledger: {:#}", e);
        }
    }

    async fn on_session_closed(&mut self) {
        if !self.close_snapshot_taken {
            let positions = self.fetch_positions().await;
            self.guard.snapshot_close(&positions, chrono::Utc::now());
            self.close_snapshot_taken = true;
        }
        if let Err(e) = self.store.save_pdt_ledger(&self.ledger) {
            error!("Scheduler: failed to persist PDT ledger: {:#}", e);
        }
    }

    async fn fetch_positions(&self) -> Vec<Position> {
        let resp = self.gateway.get_positions().await;
        if !resp.success {
            warn!("Scheduler: position fetch failed: {:?}", resp.error_message);
        }
        resp.data.unwrap_or_default()
    }

    async fn shutdown(mut self) -> Result<()> {
        info!("Scheduler: shutdown requested");
        if self.config.liquidate_on_shutdown && !self.halted {
            let report = self.emergency.execute("operator shutdown").await;
            self.finish_emergency(report);
        }
        if let Err(e) = self.store.save_pdt_ledger(&self.ledger) {
            error!("Scheduler: failed to persist PDT ledger on exit: {:#}", e);
        }
        info!("Scheduler: state persisted, exiting");
        Ok(())
    }
}
