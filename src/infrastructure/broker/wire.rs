//! Raw broker payload shapes.
//!
//! Every field is defaulted: a missing quote or bar field deserializes to
//! zero/None instead of failing the payload. Money fields arrive as strings
//! and parse to zero on garbage, matching the engine's defensive-lookup
//! policy for market data.

use crate::domain::market::types::{Bar, MarketMover, NewsItem, Quote};
use crate::domain::trading::types::{
    AccountSnapshot, Order, OrderSide, OrderSpec, OrderStatus, OrderType, TimeInForce,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

fn parse_decimal(s: &str) -> Decimal {
    s.parse::<Decimal>().unwrap_or(Decimal::ZERO)
}

fn parse_opt_decimal(s: &Option<String>) -> Option<Decimal> {
    s.as_ref().and_then(|v| v.parse::<Decimal>().ok())
}

// ===== Account =====

#[derive(Debug, Deserialize)]
pub struct RawAccount {
    #[serde(default)]
    pub equity: String,
    #[serde(default)]
    pub last_equity: String,
    #[serde(default)]
    pub cash: String,
    #[serde(default)]
    pub buying_power: String,
    #[serde(default)]
    pub daytrade_count: i64,
    #[serde(default)]
    pub pattern_day_trader: bool,
}

impl RawAccount {
    pub fn into_domain(self) -> AccountSnapshot {
        AccountSnapshot {
            equity: parse_decimal(&self.equity),
            last_equity: parse_decimal(&self.last_equity),
            cash: parse_decimal(&self.cash),
            buying_power: parse_decimal(&self.buying_power),
            daytrade_count: self.daytrade_count.max(0) as u32,
            pattern_day_trader: self.pattern_day_trader,
        }
    }
}

// ===== Positions =====

#[derive(Debug, Deserialize)]
pub struct RawPosition {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub qty: String,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub avg_entry_price: String,
    #[serde(default)]
    pub current_price: String,
    #[serde(default)]
    pub market_value: String,
    #[serde(default)]
    pub unrealized_pl: String,
    #[serde(default)]
    pub unrealized_plpc: String,
}

impl RawPosition {
    pub fn into_domain(self) -> crate::domain::trading::types::Position {
        let mut qty = parse_decimal(&self.qty);
        // Some payloads report positive qty plus a side tag for shorts.
        if self.side.as_deref() == Some("short") && qty > Decimal::ZERO {
            qty = -qty;
        }
        crate::domain::trading::types::Position {
            symbol: self.symbol,
            qty,
            avg_entry_price: parse_decimal(&self.avg_entry_price),
            current_price: parse_decimal(&self.current_price),
            market_value: parse_decimal(&self.market_value),
            unrealized_pl: parse_decimal(&self.unrealized_pl),
            unrealized_plpc: parse_decimal(&self.unrealized_plpc),
        }
    }
}

// ===== Orders =====

#[derive(Debug, Deserialize)]
pub struct RawOrder {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub client_order_id: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub side: String,
    #[serde(rename = "type", default)]
    pub order_type: String,
    #[serde(default)]
    pub qty: String,
    #[serde(default)]
    pub filled_qty: String,
    #[serde(default)]
    pub limit_price: Option<String>,
    #[serde(default)]
    pub stop_price: Option<String>,
    #[serde(default)]
    pub time_in_force: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub filled_avg_price: Option<String>,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub filled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub canceled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expired_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub legs: Option<Vec<RawOrder>>,
}

impl RawOrder {
    pub fn into_domain(self) -> Order {
        let side = match self.side.as_str() {
            "sell" => OrderSide::Sell,
            _ => OrderSide::Buy,
        };
        let order_type = match self.order_type.as_str() {
            "limit" => OrderType::Limit,
            "stop" => OrderType::Stop,
            "stop_limit" => OrderType::StopLimit,
            _ => OrderType::Market,
        };
        let time_in_force = match self.time_in_force.as_str() {
            "day" => TimeInForce::Day,
            _ => TimeInForce::Gtc,
        };
        let terminal_at = self.filled_at.or(self.canceled_at).or(self.expired_at);

        Order {
            id: self.id,
            client_id: self.client_order_id,
            symbol: self.symbol,
            side,
            order_type,
            qty: parse_decimal(&self.qty),
            filled_qty: parse_decimal(&self.filled_qty),
            limit_price: parse_opt_decimal(&self.limit_price),
            stop_price: parse_opt_decimal(&self.stop_price),
            time_in_force,
            status: OrderStatus::from_broker_str(&self.status),
            avg_fill_price: parse_opt_decimal(&self.filled_avg_price),
            submitted_at: self.submitted_at,
            terminal_at,
            legs: self
                .legs
                .unwrap_or_default()
                .into_iter()
                .map(RawOrder::into_domain)
                .collect(),
        }
    }
}

// ===== Quotes and bars =====

#[derive(Debug, Default, Deserialize)]
pub struct RawQuote {
    #[serde(rename = "bp", default)]
    pub bid_price: f64,
    #[serde(rename = "ap", default)]
    pub ask_price: f64,
    #[serde(rename = "bs", default)]
    pub bid_size: f64,
    #[serde(rename = "as", default)]
    pub ask_size: f64,
    #[serde(rename = "t", default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct RawQuoteEnvelope {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub quote: RawQuote,
}

impl RawQuoteEnvelope {
    pub fn into_domain(self) -> Quote {
        Quote {
            symbol: self.symbol,
            bid_price: self.quote.bid_price,
            ask_price: self.quote.ask_price,
            bid_size: self.quote.bid_size,
            ask_size: self.quote.ask_size,
            timestamp: self.quote.timestamp,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RawBar {
    #[serde(rename = "t", default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "o", default)]
    pub open: f64,
    #[serde(rename = "h", default)]
    pub high: f64,
    #[serde(rename = "l", default)]
    pub low: f64,
    #[serde(rename = "c", default)]
    pub close: f64,
    #[serde(rename = "v", default)]
    pub volume: f64,
}

impl RawBar {
    pub fn into_domain(self) -> Bar {
        Bar {
            timestamp: self.timestamp,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RawBarsEnvelope {
    #[serde(default)]
    pub bars: Option<Vec<RawBar>>,
}

impl RawBarsEnvelope {
    pub fn into_domain(self) -> Vec<Bar> {
        self.bars
            .unwrap_or_default()
            .into_iter()
            .map(RawBar::into_domain)
            .collect()
    }
}

// ===== Screeners and news =====

#[derive(Debug, Deserialize)]
pub struct RawMover {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub percent_change: f64,
    #[serde(default)]
    pub volume: f64,
}

impl RawMover {
    pub fn into_domain(self) -> MarketMover {
        MarketMover {
            symbol: self.symbol,
            price: self.price,
            change_pct: self.percent_change,
            volume: self.volume,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RawMoversEnvelope {
    #[serde(default)]
    pub gainers: Vec<RawMover>,
    #[serde(default)]
    pub losers: Vec<RawMover>,
}

#[derive(Debug, Deserialize)]
pub struct RawMostActive {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub trade_count: f64,
}

#[derive(Debug, Deserialize)]
pub struct RawMostActivesEnvelope {
    #[serde(default)]
    pub most_actives: Vec<RawMostActive>,
}

#[derive(Debug, Deserialize)]
pub struct RawNewsItem {
    #[serde(default)]
    pub headline: String,
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl RawNewsItem {
    pub fn into_domain(self) -> NewsItem {
        NewsItem {
            headline: self.headline,
            symbols: self.symbols,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RawNewsEnvelope {
    #[serde(default)]
    pub news: Vec<RawNewsItem>,
}

// ===== Order submission body =====

#[derive(Debug, Serialize)]
pub struct TakeProfitBody {
    pub limit_price: String,
}

#[derive(Debug, Serialize)]
pub struct StopLossBody {
    pub stop_price: String,
}

#[derive(Debug, Serialize)]
pub struct OrderRequestBody {
    pub symbol: String,
    pub qty: String,
    pub side: &'static str,
    #[serde(rename = "type")]
    pub order_type: &'static str,
    pub time_in_force: &'static str,
    pub client_order_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_class: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<TakeProfitBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<StopLossBody>,
}

/// Equity prices go over the wire with exactly two decimals.
fn format_price(price: Decimal) -> String {
    format!("{:.2}", price)
}

impl OrderRequestBody {
    pub fn from_spec(spec: &OrderSpec) -> Self {
        Self {
            symbol: spec.symbol.clone(),
            qty: spec.qty.to_string(),
            side: spec.side.as_broker_str(),
            order_type: spec.order_type.as_broker_str(),
            time_in_force: spec.time_in_force.as_broker_str(),
            client_order_id: spec.client_id.clone(),
            limit_price: spec.limit_price.map(format_price),
            stop_price: spec.stop_price.map(format_price),
            order_class: spec.bracket.as_ref().map(|_| "bracket"),
            take_profit: spec.bracket.as_ref().map(|b| TakeProfitBody {
                limit_price: format_price(b.take_profit),
            }),
            stop_loss: spec.bracket.as_ref().map(|b| StopLossBody {
                stop_price: format_price(b.stop_loss),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trading::types::BracketProtection;
    use rust_decimal_macros::dec;

    #[test]
    fn test_quote_missing_fields_default_to_zero() {
        let env: RawQuoteEnvelope =
            serde_json::from_str(r#"{"symbol":"AAPL","quote":{"bp":179.9,"t":"2025-06-10T14:30:00Z"}}"#)
                .unwrap();
        let q = env.into_domain();
        assert_eq!(q.bid_price, 179.9);
        assert_eq!(q.ask_price, 0.0);
        assert!(q.timestamp.is_some());
    }

    #[test]
    fn test_quote_entirely_missing_is_zeroed() {
        let env: RawQuoteEnvelope = serde_json::from_str(r#"{"symbol":"AAPL"}"#).unwrap();
        let q = env.into_domain();
        assert_eq!(q.ask_price, 0.0);
        assert!(q.timestamp.is_none());
    }

    #[test]
    fn test_account_string_money_fields() {
        let raw: RawAccount = serde_json::from_str(
            r#"{"equity":"10000.50","last_equity":"9900","cash":"5000","buying_power":"20000","daytrade_count":2,"pattern_day_trader":false}"#,
        )
        .unwrap();
        let snap = raw.into_domain();
        assert_eq!(snap.equity, dec!(10000.50));
        assert_eq!(snap.daytrade_count, 2);
    }

    #[test]
    fn test_account_garbage_money_parses_to_zero() {
        let raw: RawAccount = serde_json::from_str(r#"{"equity":"n/a"}"#).unwrap();
        assert_eq!(raw.into_domain().equity, Decimal::ZERO);
    }

    #[test]
    fn test_order_with_legs() {
        let raw: RawOrder = serde_json::from_str(
            r#"{
                "id":"p1","client_order_id":"c1","symbol":"AAPL","side":"buy","type":"limit",
                "qty":"5","filled_qty":"5","limit_price":"180","time_in_force":"gtc",
                "status":"filled","filled_at":"2025-06-10T14:31:00Z",
                "legs":[
                    {"id":"l1","symbol":"AAPL","side":"sell","type":"limit","qty":"5","limit_price":"188","status":"new","time_in_force":"gtc"},
                    {"id":"l2","symbol":"AAPL","side":"sell","type":"stop","qty":"5","stop_price":"176","status":"held","time_in_force":"gtc"}
                ]
            }"#,
        )
        .unwrap();
        let order = raw.into_domain();
        assert_eq!(order.status, OrderStatus::Filled);
        assert!(order.terminal_at.is_some());
        assert_eq!(order.legs.len(), 2);
        assert_eq!(order.legs[1].stop_price, Some(dec!(176)));
        // Unknown working status "held" stays open.
        assert!(order.legs[1].status.is_open());
    }

    #[test]
    fn test_short_position_sign_normalization() {
        let raw: RawPosition = serde_json::from_str(
            r#"{"symbol":"TSLA","qty":"10","side":"short","avg_entry_price":"200","current_price":"195","market_value":"-1950","unrealized_pl":"50","unrealized_plpc":"0.025"}"#,
        )
        .unwrap();
        let pos = raw.into_domain();
        assert_eq!(pos.qty, dec!(-10));
        assert!(!pos.is_long());
    }

    #[test]
    fn test_bracket_request_body_shape() {
        let spec = OrderSpec::bracket_entry(
            "AAPL",
            OrderSide::Buy,
            dec!(5),
            dec!(180),
            BracketProtection {
                take_profit: dec!(188),
                stop_loss: dec!(176),
            },
        );
        let body = OrderRequestBody::from_spec(&spec);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["order_class"], "bracket");
        assert_eq!(json["take_profit"]["limit_price"], "188.00");
        assert_eq!(json["stop_loss"]["stop_price"], "176.00");
        assert_eq!(json["time_in_force"], "gtc");
        assert_eq!(json["type"], "limit");
    }

    #[test]
    fn test_plain_market_body_omits_bracket_fields() {
        let spec = OrderSpec::market("AAPL", OrderSide::Sell, dec!(10));
        let json = serde_json::to_value(OrderRequestBody::from_spec(&spec)).unwrap();
        assert!(json.get("order_class").is_none());
        assert!(json.get("take_profit").is_none());
        assert!(json.get("limit_price").is_none());
    }
}
