use crate::domain::errors::ErrorKind;
use crate::domain::trading::signal::TradeSignal;
use crate::domain::trading::types::{
    BracketProtection, Order, OrderSide, OrderSpec, OrderStatus,
};
use crate::infrastructure::broker::envelope::ApiResponse;
use crate::infrastructure::broker::gateway::BrokerGateway;
use crate::infrastructure::broker::rate_limiter::TokenClass;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Unfilled entries older than this are canceled; the signal that produced
/// them is spent.
const ENTRY_VALIDITY_MINUTES: i64 = 15;

/// What protection a symbol is supposed to carry, recorded at submission
/// time and consulted by the reconciler and the emulation path.
#[derive(Debug, Clone)]
pub struct ProtectionIntent {
    pub entry_side: OrderSide,
    pub qty: Decimal,
    pub stop: Decimal,
    pub target: Decimal,
}

/// Fill activity observed by the monitor, consumed by the scheduler to
/// update the PDT ledger and the overnight guard.
#[derive(Debug, Clone)]
pub enum FillEvent {
    EntryFilled {
        symbol: String,
        side: OrderSide,
        qty: Decimal,
    },
    EntryTerminal {
        symbol: String,
        status: OrderStatus,
    },
}

/// Bracket submission and order-state tracking. Owned by the scheduler and
/// mutated only from its context.
pub struct OrderLifecycle {
    gateway: Arc<BrokerGateway>,
    intents: HashMap<String, ProtectionIntent>,
    /// Symbol -> broker id of the working entry order. A new entry for a
    /// symbol is refused while one is here.
    pending_entries: HashMap<String, String>,
    /// Entry fills already announced, keyed by broker id, so partial fills
    /// emit deltas rather than repeats.
    announced_fills: HashMap<String, Decimal>,
}

impl OrderLifecycle {
    pub fn new(gateway: Arc<BrokerGateway>) -> Self {
        Self {
            gateway,
            intents: HashMap::new(),
            pending_entries: HashMap::new(),
            announced_fills: HashMap::new(),
        }
    }

    pub fn intents(&self) -> &HashMap<String, ProtectionIntent> {
        &self.intents
    }

    pub fn has_pending_entry(&self, symbol: &str) -> bool {
        self.pending_entries.contains_key(symbol)
    }

    pub fn record_intent(&mut self, symbol: &str, intent: ProtectionIntent) {
        self.intents.insert(symbol.to_string(), intent);
    }

    pub fn drop_intent(&mut self, symbol: &str) {
        self.intents.remove(symbol);
    }

    /// Submit a sized signal as a native bracket: entry limit parent plus
    /// gtc OCO stop-loss and take-profit children.
    pub async fn submit_bracket(&mut self, signal: &TradeSignal) -> ApiResponse<Order> {
        if self.has_pending_entry(&signal.symbol) {
            return ApiResponse::err(
                0,
                ErrorKind::InvalidOrder,
                format!("entry already working for {}", signal.symbol),
                false,
            );
        }

        let spec = OrderSpec::bracket_entry(
            signal.symbol.clone(),
            signal.side,
            signal.qty,
            signal.entry,
            BracketProtection {
                take_profit: signal.target,
                stop_loss: signal.stop,
            },
        );

        let resp = self.gateway.submit_order(&spec, TokenClass::Normal).await;
        if resp.success
            && let Some(order) = &resp.data
        {
            info!(
                "OrderLifecycle: bracket submitted for {} {} x{} (entry {}, stop {}, target {})",
                signal.side, signal.symbol, signal.qty, signal.entry, signal.stop, signal.target
            );
            self.pending_entries
                .insert(signal.symbol.clone(), order.id.clone());
            self.intents.insert(
                signal.symbol.clone(),
                ProtectionIntent {
                    entry_side: signal.side,
                    qty: signal.qty,
                    stop: signal.stop,
                    target: signal.target,
                },
            );
        }
        resp
    }

    /// Poll order state for pending entries. Emits fill events and, when a
    /// parent reports fills without live children (the emulation path for
    /// brokers that decompose brackets), attaches protective children for
    /// the actually-filled quantity.
    pub async fn monitor(&mut self) -> Vec<FillEvent> {
        let mut events = Vec::new();
        if self.pending_entries.is_empty() {
            return events;
        }

        let resp = self.gateway.get_orders("all").await;
        let Some(orders) = resp.data else {
            warn!(
                "OrderLifecycle: order poll failed: {:?}",
                resp.error_message
            );
            return events;
        };
        let by_id: HashMap<&str, &Order> = orders.iter().map(|o| (o.id.as_str(), o)).collect();

        let tracked: Vec<(String, String)> = self
            .pending_entries
            .iter()
            .map(|(s, id)| (s.clone(), id.clone()))
            .collect();

        for (symbol, order_id) in tracked {
            let Some(&order) = by_id.get(order_id.as_str()) else {
                continue;
            };

            let announced = self
                .announced_fills
                .get(order_id.as_str())
                .copied()
                .unwrap_or(Decimal::ZERO);
            if order.filled_qty > announced {
                let delta = order.filled_qty - announced;
                self.announced_fills
                    .insert(order_id.clone(), order.filled_qty);
                events.push(FillEvent::EntryFilled {
                    symbol: symbol.clone(),
                    side: order.side,
                    qty: delta,
                });
                self.attach_children_if_missing(&symbol, order).await;
            }

            if order.status.is_open()
                && let Some(submitted) = order.submitted_at
                && Utc::now().signed_duration_since(submitted)
                    > chrono::Duration::minutes(ENTRY_VALIDITY_MINUTES)
            {
                info!(
                    "OrderLifecycle: entry for {} unfilled past its validity window, cancelling",
                    symbol
                );
                let ack = self.gateway.cancel_order(&order.id).await;
                if !ack.success {
                    warn!(
                        "OrderLifecycle: stale-entry cancel failed for {}: {:?}",
                        symbol, ack.error_message
                    );
                }
            }

            if order.status.is_terminal() {
                self.pending_entries.remove(&symbol);
                self.announced_fills.remove(order_id.as_str());
                if order.status != OrderStatus::Filled {
                    // Entry died unfilled; nothing left to protect.
                    if order.filled_qty.is_zero() {
                        self.intents.remove(&symbol);
                    }
                    events.push(FillEvent::EntryTerminal {
                        symbol: symbol.clone(),
                        status: order.status,
                    });
                } else {
                    events.push(FillEvent::EntryTerminal {
                        symbol: symbol.clone(),
                        status: OrderStatus::Filled,
                    });
                }
            }
        }

        events
    }

    /// Emulation path: when the broker reports a filled/partially-filled
    /// parent with no working children, submit stop and target legs sized
    /// to the filled quantity. Children adjust on subsequent fills via
    /// cancel-and-resubmit by the reconciler.
    async fn attach_children_if_missing(&mut self, symbol: &str, parent: &Order) {
        let has_live_children = parent.legs.iter().any(|leg| leg.status.is_open());
        if has_live_children {
            return;
        }
        let Some(intent) = self.intents.get(symbol) else {
            return;
        };
        if parent.filled_qty.is_zero() {
            return;
        }

        let child_side = intent.entry_side.opposite();
        let stop_spec = OrderSpec::stop(symbol, child_side, parent.filled_qty, intent.stop);
        let stop_resp = self.gateway.submit_order(&stop_spec, TokenClass::Normal).await;
        if !stop_resp.success {
            warn!(
                "OrderLifecycle: failed to attach stop child for {}: {:?}",
                symbol, stop_resp.error_message
            );
        }

        let target_spec = OrderSpec::limit(symbol, child_side, parent.filled_qty, intent.target);
        let target_resp = self
            .gateway
            .submit_order(&target_spec, TokenClass::Normal)
            .await;
        if !target_resp.success {
            warn!(
                "OrderLifecycle: failed to attach target child for {}: {:?}",
                symbol, target_resp.error_message
            );
        }

        info!(
            "OrderLifecycle: attached protective children for {} (qty {})",
            symbol, parent.filled_qty
        );
    }
}
