use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    pub fn as_broker_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

impl OrderType {
    pub fn as_broker_str(&self) -> &'static str {
        match self {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
            OrderType::Stop => "stop",
            OrderType::StopLimit => "stop_limit",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_broker_str().to_uppercase())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    Day,
    Gtc,
}

impl TimeInForce {
    pub fn as_broker_str(&self) -> &'static str {
        match self {
            TimeInForce::Day => "day",
            TimeInForce::Gtc => "gtc",
        }
    }
}

/// Broker order status. Terminal statuses are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    Accepted,
    PartiallyFilled,
    Filled,
    PendingCancel,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }

    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }

    /// Lenient mapping from broker status strings. Unknown working states
    /// map to `Accepted` rather than failing the whole payload.
    pub fn from_broker_str(s: &str) -> Self {
        match s {
            "new" => OrderStatus::New,
            "partially_filled" => OrderStatus::PartiallyFilled,
            "filled" => OrderStatus::Filled,
            "pending_cancel" => OrderStatus::PendingCancel,
            "canceled" | "done_for_day" => OrderStatus::Canceled,
            "rejected" => OrderStatus::Rejected,
            "expired" => OrderStatus::Expired,
            _ => OrderStatus::Accepted,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Protective child prices attached to a bracket entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BracketProtection {
    pub take_profit: Decimal,
    pub stop_loss: Decimal,
}

/// An order as the engine wants it submitted.
#[derive(Debug, Clone)]
pub struct OrderSpec {
    pub client_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub qty: Decimal,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub time_in_force: TimeInForce,
    pub bracket: Option<BracketProtection>,
}

impl OrderSpec {
    pub fn market(symbol: impl Into<String>, side: OrderSide, qty: Decimal) -> Self {
        Self {
            client_id: Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            qty,
            limit_price: None,
            stop_price: None,
            time_in_force: TimeInForce::Day,
            bracket: None,
        }
    }

    pub fn stop(symbol: impl Into<String>, side: OrderSide, qty: Decimal, stop: Decimal) -> Self {
        Self {
            client_id: Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            side,
            order_type: OrderType::Stop,
            qty,
            limit_price: None,
            stop_price: Some(stop),
            time_in_force: TimeInForce::Gtc,
            bracket: None,
        }
    }

    pub fn limit(symbol: impl Into<String>, side: OrderSide, qty: Decimal, limit: Decimal) -> Self {
        Self {
            client_id: Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            qty,
            limit_price: Some(limit),
            stop_price: None,
            time_in_force: TimeInForce::Gtc,
            bracket: None,
        }
    }

    /// Bracket entry: a limit parent with gtc OCO children.
    pub fn bracket_entry(
        symbol: impl Into<String>,
        side: OrderSide,
        qty: Decimal,
        entry_limit: Decimal,
        protection: BracketProtection,
    ) -> Self {
        Self {
            client_id: Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            qty,
            limit_price: Some(entry_limit),
            stop_price: None,
            time_in_force: TimeInForce::Gtc,
            bracket: Some(protection),
        }
    }
}

/// A broker order record as reported back to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Broker-assigned id.
    pub id: String,
    pub client_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub qty: Decimal,
    pub filled_qty: Decimal,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub time_in_force: TimeInForce,
    pub status: OrderStatus,
    pub avg_fill_price: Option<Decimal>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub terminal_at: Option<DateTime<Utc>>,
    /// Child protective orders for brackets.
    pub legs: Vec<Order>,
}

impl Order {
    pub fn remaining_qty(&self) -> Decimal {
        (self.qty - self.filled_qty).max(Decimal::ZERO)
    }

    /// True when this order protects `position_side` exposure: an open
    /// opposite-side stop or limit.
    pub fn is_protective_for(&self, position_side: OrderSide) -> bool {
        self.status.is_open()
            && self.side == position_side.opposite()
            && matches!(
                self.order_type,
                OrderType::Stop | OrderType::StopLimit | OrderType::Limit
            )
    }
}

/// An open position, signed: long > 0, short < 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub qty: Decimal,
    pub avg_entry_price: Decimal,
    pub current_price: Decimal,
    pub market_value: Decimal,
    pub unrealized_pl: Decimal,
    pub unrealized_plpc: Decimal,
}

impl Position {
    pub fn is_long(&self) -> bool {
        self.qty > Decimal::ZERO
    }

    pub fn abs_qty(&self) -> Decimal {
        self.qty.abs()
    }

    pub fn notional(&self) -> Decimal {
        self.abs_qty() * self.current_price
    }

    /// Side of the order that would flatten this position.
    pub fn closing_side(&self) -> OrderSide {
        if self.is_long() {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        }
    }
}

/// Account state consulted at every risk gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub equity: Decimal,
    pub last_equity: Decimal,
    pub cash: Decimal,
    pub buying_power: Decimal,
    pub daytrade_count: u32,
    pub pattern_day_trader: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order(side: OrderSide, order_type: OrderType, status: OrderStatus) -> Order {
        Order {
            id: "o1".to_string(),
            client_id: "c1".to_string(),
            symbol: "AAPL".to_string(),
            side,
            order_type,
            qty: dec!(10),
            filled_qty: dec!(0),
            limit_price: None,
            stop_price: None,
            time_in_force: TimeInForce::Gtc,
            status,
            avg_fill_price: None,
            submitted_at: None,
            terminal_at: None,
            legs: vec![],
        }
    }

    #[test]
    fn test_terminal_statuses_absorbing() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Canceled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(OrderStatus::Expired.is_terminal());
        assert!(OrderStatus::New.is_open());
        assert!(OrderStatus::PartiallyFilled.is_open());
        assert!(OrderStatus::PendingCancel.is_open());
    }

    #[test]
    fn test_status_from_broker_str_lenient() {
        assert_eq!(OrderStatus::from_broker_str("filled"), OrderStatus::Filled);
        assert_eq!(
            OrderStatus::from_broker_str("partially_filled"),
            OrderStatus::PartiallyFilled
        );
        // Unknown working state stays open.
        assert_eq!(
            OrderStatus::from_broker_str("pending_new"),
            OrderStatus::Accepted
        );
    }

    #[test]
    fn test_protective_order_detection() {
        let stop_sell = order(OrderSide::Sell, OrderType::Stop, OrderStatus::Accepted);
        assert!(stop_sell.is_protective_for(OrderSide::Buy));
        assert!(!stop_sell.is_protective_for(OrderSide::Sell));

        let filled = order(OrderSide::Sell, OrderType::Stop, OrderStatus::Filled);
        assert!(!filled.is_protective_for(OrderSide::Buy));

        let market_sell = order(OrderSide::Sell, OrderType::Market, OrderStatus::New);
        assert!(!market_sell.is_protective_for(OrderSide::Buy));
    }

    #[test]
    fn test_position_closing_side() {
        let long = Position {
            symbol: "AAPL".to_string(),
            qty: dec!(10),
            avg_entry_price: dec!(100),
            current_price: dec!(105),
            market_value: dec!(1050),
            unrealized_pl: dec!(50),
            unrealized_plpc: dec!(0.05),
        };
        assert_eq!(long.closing_side(), OrderSide::Sell);
        assert_eq!(long.notional(), dec!(1050));

        let short = Position {
            qty: dec!(-10),
            ..long.clone()
        };
        assert_eq!(short.closing_side(), OrderSide::Buy);
        assert_eq!(short.abs_qty(), dec!(10));
    }

    #[test]
    fn test_remaining_qty() {
        let mut o = order(OrderSide::Buy, OrderType::Limit, OrderStatus::PartiallyFilled);
        o.filled_qty = dec!(4);
        assert_eq!(o.remaining_qty(), dec!(6));
    }
}
