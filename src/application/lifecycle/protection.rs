use crate::application::lifecycle::orders::ProtectionIntent;
use crate::domain::trading::types::{Order, OrderSpec, OrderType, Position};
use crate::infrastructure::broker::gateway::BrokerGateway;
use crate::infrastructure::broker::rate_limiter::TokenClass;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What the reconciler did for one position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionAction {
    AlreadyProtected,
    Remediated,
    Consolidated,
    Failed,
}

#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub checked: usize,
    pub remediated: usize,
    pub consolidated: usize,
    pub failed: usize,
}

/// Audits that every open position carries a protective opposite-side
/// order, and repairs the book when it does not. Runs at startup and on the
/// one-minute audit tick.
pub struct ProtectionReconciler {
    gateway: Arc<BrokerGateway>,
    /// Stop distance applied when a naked position has no recorded intent.
    emergency_stop_pct: Decimal,
}

impl ProtectionReconciler {
    pub fn new(gateway: Arc<BrokerGateway>, emergency_stop_pct: Decimal) -> Self {
        Self {
            gateway,
            emergency_stop_pct,
        }
    }

    /// Startup pass: escalates naked positions loudly, then behaves like a
    /// routine audit. Running it twice in a row must leave the open-order
    /// set unchanged.
    pub async fn reconcile_startup(
        &self,
        positions: &[Position],
        intents: &HashMap<String, ProtectionIntent>,
    ) -> ReconcileReport {
        info!(
            "ProtectionReconciler: startup reconciliation over {} position(s)",
            positions.len()
        );
        self.audit(positions, intents, true).await
    }

    /// Audit every position. `escalate` controls the log level used for
    /// naked-position remediation.
    pub async fn audit(
        &self,
        positions: &[Position],
        intents: &HashMap<String, ProtectionIntent>,
        escalate: bool,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for position in positions {
            if position.qty.is_zero() {
                continue;
            }
            report.checked += 1;
            match self
                .ensure_protected(position, intents.get(&position.symbol), escalate)
                .await
            {
                ProtectionAction::AlreadyProtected => {}
                ProtectionAction::Remediated => report.remediated += 1,
                ProtectionAction::Consolidated => report.consolidated += 1,
                ProtectionAction::Failed => report.failed += 1,
            }
        }
        report
    }

    async fn ensure_protected(
        &self,
        position: &Position,
        intent: Option<&ProtectionIntent>,
        escalate: bool,
    ) -> ProtectionAction {
        let symbol = position.symbol.as_str();
        let open = self
            .gateway
            .get_open_orders_for(symbol, TokenClass::Normal)
            .await;
        let Some(orders) = open.data else {
            warn!(
                "ProtectionReconciler: could not enumerate orders for {}: {:?}",
                symbol, open.error_message
            );
            return ProtectionAction::Failed;
        };

        let entry_side = if position.is_long() {
            crate::domain::trading::types::OrderSide::Buy
        } else {
            crate::domain::trading::types::OrderSide::Sell
        };
        let stops: Vec<&Order> = orders
            .iter()
            .flat_map(|o| std::iter::once(o).chain(o.legs.iter()))
            .filter(|o| {
                o.is_protective_for(entry_side)
                    && matches!(o.order_type, OrderType::Stop | OrderType::StopLimit)
            })
            .collect();

        match stops.len() {
            0 => {
                let stop_price = self.emergency_stop_price(position, intent);
                self.submit_emergency_stop(position, stop_price, escalate)
                    .await
            }
            1 => {
                let stop = stops[0];
                if stop.remaining_qty() >= position.abs_qty() {
                    // Skip rule: an equivalent protection already exists.
                    debug!(
                        "ProtectionReconciler: {} already protected by order {} (qty {})",
                        symbol,
                        stop.id,
                        stop.remaining_qty()
                    );
                    ProtectionAction::AlreadyProtected
                } else {
                    // Partial-fill drift: replace with a full-size stop.
                    info!(
                        "ProtectionReconciler: {} stop covers {} of {}, resizing",
                        symbol,
                        stop.remaining_qty(),
                        position.abs_qty()
                    );
                    let stop_price = stop
                        .stop_price
                        .unwrap_or_else(|| self.emergency_stop_price(position, intent));
                    let ack = self.gateway.cancel_order(&stop.id).await;
                    if !ack.success {
                        return ProtectionAction::Failed;
                    }
                    self.submit_emergency_stop_at(position, stop_price).await
                }
            }
            _ => {
                // Conflicting protections: collapse to a single correct one.
                warn!(
                    "ProtectionReconciler: {} carries {} conflicting stops, consolidating",
                    symbol,
                    stops.len()
                );
                let keep_price = stops
                    .iter()
                    .filter_map(|o| o.stop_price)
                    .next()
                    .unwrap_or_else(|| self.emergency_stop_price(position, intent));
                for stop in &stops {
                    let ack = self.gateway.cancel_order(&stop.id).await;
                    if !ack.success {
                        warn!(
                            "ProtectionReconciler: failed to cancel duplicate stop {} for {}",
                            stop.id, symbol
                        );
                    }
                }
                match self.submit_emergency_stop_at(position, keep_price).await {
                    ProtectionAction::Remediated => ProtectionAction::Consolidated,
                    other => other,
                }
            }
        }
    }

    /// Stop price for a naked position: the recorded intent when one
    /// exists, otherwise current price shifted by the emergency percentage.
    fn emergency_stop_price(
        &self,
        position: &Position,
        intent: Option<&ProtectionIntent>,
    ) -> Decimal {
        if let Some(intent) = intent {
            return intent.stop;
        }
        if position.is_long() {
            position.current_price * (Decimal::ONE - self.emergency_stop_pct)
        } else {
            position.current_price * (Decimal::ONE + self.emergency_stop_pct)
        }
    }

    async fn submit_emergency_stop(
        &self,
        position: &Position,
        stop_price: Decimal,
        escalate: bool,
    ) -> ProtectionAction {
        if escalate {
            error!(
                "ProtectionReconciler: unprotected_position_remediated symbol={} qty={} stop={}",
                position.symbol,
                position.qty,
                stop_price.round_dp(2)
            );
        } else {
            warn!(
                "ProtectionReconciler: {} naked (qty {}), submitting stop at {}",
                position.symbol,
                position.qty,
                stop_price.round_dp(2)
            );
        }
        self.submit_emergency_stop_at(position, stop_price).await
    }

    async fn submit_emergency_stop_at(
        &self,
        position: &Position,
        stop_price: Decimal,
    ) -> ProtectionAction {
        let spec = OrderSpec::stop(
            position.symbol.clone(),
            position.closing_side(),
            position.abs_qty(),
            stop_price.round_dp(2),
        );
        let resp = self.gateway.submit_order(&spec, TokenClass::Normal).await;
        if resp.success {
            ProtectionAction::Remediated
        } else {
            error!(
                "ProtectionReconciler: emergency stop submission failed for {}: {:?}",
                position.symbol, resp.error_message
            );
            ProtectionAction::Failed
        }
    }
}
