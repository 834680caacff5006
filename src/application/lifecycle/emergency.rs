use crate::domain::errors::ErrorKind;
use crate::domain::trading::types::{OrderSpec, Position};
use crate::infrastructure::broker::gateway::BrokerGateway;
use crate::infrastructure::broker::rate_limiter::TokenClass;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct EmergencyConfig {
    /// Cancel-then-flatten rounds per symbol before giving up.
    pub max_rounds: u32,
    /// Backoff base between rounds; doubles each round.
    pub round_backoff: Duration,
    /// Symbols liquidated concurrently.
    pub parallelism: usize,
    /// Cancellation-acknowledgement polling.
    pub ack_poll_interval: Duration,
    pub ack_poll_attempts: u32,
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            round_backoff: Duration::from_secs(2),
            parallelism: 4,
            ack_poll_interval: Duration::from_millis(500),
            ack_poll_attempts: 20,
        }
    }
}

/// Per-symbol outcome of the liquidation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionOutcome {
    pub symbol: String,
    pub qty_before: Decimal,
    pub orders_canceled: usize,
    pub flattened: bool,
    pub rounds: u32,
    pub residual_qty: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Structured record of one emergency stop. JSON round-trippable with
/// ISO-8601 timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownReport {
    pub reason: String,
    pub triggered_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub positions_attempted: usize,
    pub positions_flattened: usize,
    pub residual_exposure: Decimal,
    pub outcomes: Vec<PositionOutcome>,
}

/// The cancel-then-liquidate protocol. Per symbol the sequence is strictly
/// cancel -> confirm terminal -> market flatten, with bounded parallelism
/// across symbols; a `qty_held` rejection restarts the sequence.
pub struct EmergencyStop {
    gateway: Arc<BrokerGateway>,
    config: EmergencyConfig,
}

impl EmergencyStop {
    pub fn new(gateway: Arc<BrokerGateway>, config: EmergencyConfig) -> Self {
        Self { gateway, config }
    }

    pub async fn execute(&self, reason: &str) -> ShutdownReport {
        let triggered_at = Utc::now();
        let started = tokio::time::Instant::now();
        error!("EmergencyStop: LIQUIDATION TRIGGERED - {}", reason);

        let positions_resp = self.gateway.get_positions().await;
        let positions: Vec<Position> = positions_resp
            .data
            .unwrap_or_default()
            .into_iter()
            .filter(|p| !p.qty.is_zero())
            .collect();
        if !positions_resp.success {
            error!(
                "EmergencyStop: position enumeration failed: {:?}",
                positions_resp.error_message
            );
        }

        let mut pending_flattens = Vec::with_capacity(positions.len());
        for position in positions.iter() {
            pending_flattens.push(self.flatten_symbol(position));
        }
        let outcomes: Vec<PositionOutcome> = stream::iter(pending_flattens)
            .buffer_unordered(self.config.parallelism.max(1))
            .collect()
            .await;

        let completed_at = Utc::now();
        let residual_exposure: Decimal = outcomes
            .iter()
            .map(|outcome| {
                let price = positions
                    .iter()
                    .find(|p| p.symbol == outcome.symbol)
                    .map(|p| p.current_price)
                    .unwrap_or(Decimal::ZERO);
                outcome.residual_qty.abs() * price
            })
            .sum();
        let flattened = outcomes.iter().filter(|o| o.flattened).count();

        let report = ShutdownReport {
            reason: reason.to_string(),
            triggered_at,
            completed_at,
            elapsed_ms: started.elapsed().as_millis() as u64,
            positions_attempted: outcomes.len(),
            positions_flattened: flattened,
            residual_exposure,
            outcomes,
        };

        if report.residual_exposure.is_zero() {
            info!(
                "EmergencyStop: complete, {} position(s) flattened in {}ms",
                report.positions_flattened, report.elapsed_ms
            );
        } else {
            error!(
                "EmergencyStop: residual exposure ${} remains after {} round(s); manual intervention required",
                report.residual_exposure, self.config.max_rounds
            );
        }
        report
    }

    /// One symbol, strictly sequential: cancel everything, await terminal
    /// acks, then flatten at market. `qty_held` restarts the round with
    /// exponential backoff.
    async fn flatten_symbol(&self, position: &Position) -> PositionOutcome {
        let symbol = position.symbol.clone();
        let mut outcome = PositionOutcome {
            symbol: symbol.clone(),
            qty_before: position.qty,
            orders_canceled: 0,
            flattened: false,
            rounds: 0,
            residual_qty: position.qty,
            error: None,
        };

        for round in 0..self.config.max_rounds {
            outcome.rounds = round + 1;

            let canceled = self.gateway.cancel_all_for(&symbol).await;
            if let Some(orders) = &canceled.data {
                outcome.orders_canceled += orders.len();
            }
            if !canceled.success {
                outcome.error = canceled.error_message.clone();
                warn!(
                    "EmergencyStop: order enumeration failed for {} (round {}): {:?}",
                    symbol, round, outcome.error
                );
            }

            if !self.await_no_open_orders(&symbol).await {
                warn!(
                    "EmergencyStop: {} still reports open orders after ack polling (round {})",
                    symbol, round
                );
            }

            let spec = OrderSpec::market(
                symbol.clone(),
                position.closing_side(),
                position.abs_qty(),
            );
            let resp = self.gateway.submit_order(&spec, TokenClass::Emergency).await;
            if resp.success {
                outcome.flattened = true;
                outcome.residual_qty = Decimal::ZERO;
                outcome.error = None;
                info!(
                    "EmergencyStop: {} flattened (qty {}) on round {}",
                    symbol,
                    position.abs_qty(),
                    round + 1
                );
                return outcome;
            }

            if resp.kind_is(ErrorKind::QtyHeld) {
                let delay = self.config.round_backoff * 2u32.saturating_pow(round);
                warn!(
                    "EmergencyStop: {} flatten rejected with qty_held, re-cancelling in {:?}",
                    symbol, delay
                );
                outcome.error = resp.error_message.clone();
                tokio::time::sleep(delay).await;
                continue;
            }

            outcome.error = resp.error_message.clone();
            let delay = self.config.round_backoff * 2u32.saturating_pow(round);
            warn!(
                "EmergencyStop: {} flatten failed ({:?}), retrying in {:?}",
                symbol, outcome.error, delay
            );
            tokio::time::sleep(delay).await;
        }

        error!(
            "EmergencyStop: FATAL - {} could not be flattened after {} rounds (residual {})",
            symbol, self.config.max_rounds, outcome.residual_qty
        );
        outcome
    }

    /// Poll until the symbol has no open orders (terminal acknowledgement
    /// of the cancellations). Returns false when polling gives out first.
    async fn await_no_open_orders(&self, symbol: &str) -> bool {
        for _ in 0..self.config.ack_poll_attempts {
            let open = self
                .gateway
                .get_open_orders_for(symbol, TokenClass::Emergency)
                .await;
            match &open.data {
                Some(orders) if orders.is_empty() => return true,
                Some(_) => {}
                None => {}
            }
            tokio::time::sleep(self.config.ack_poll_interval).await;
        }
        false
    }
}
