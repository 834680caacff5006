//! Cancel-then-liquidate protocol against a scripted broker, including the
//! held-quantity retry path.

mod common;

use common::RouteMock;
use diptrader::application::lifecycle::emergency::{EmergencyConfig, EmergencyStop};
use diptrader::infrastructure::broker::gateway::{BrokerGateway, GatewayConfig, HttpMethod};
use rust_decimal_macros::dec;
use std::sync::Arc;

fn position_json(symbol: &str, qty: &str, price: &str) -> String {
    format!(
        r#"{{"symbol":"{}","qty":"{}","avg_entry_price":"{}","current_price":"{}","market_value":"0","unrealized_pl":"0","unrealized_plpc":"0"}}"#,
        symbol, qty, price, price
    )
}

fn open_order_json(id: &str, symbol: &str, order_type: &str) -> String {
    format!(
        r#"{{"id":"{}","symbol":"{}","side":"sell","type":"{}","qty":"5","status":"new","time_in_force":"gtc"}}"#,
        id, symbol, order_type
    )
}

fn filled_market_json(id: &str, symbol: &str) -> String {
    format!(
        r#"{{"id":"{}","symbol":"{}","side":"sell","type":"market","qty":"5","filled_qty":"5","status":"filled","time_in_force":"day"}}"#,
        id, symbol
    )
}

#[tokio::test(start_paused = true)]
async fn emergency_stop_flattens_all_positions_through_qty_held() {
    let mock = Arc::new(RouteMock::new());

    mock.on(
        HttpMethod::Get,
        "/v2/positions",
        200,
        &format!(
            "[{},{}]",
            position_json("SYMX", "5", "100"),
            position_json("SYMA", "3", "40")
        ),
    );

    // SYMX carries a live take-profit that must be canceled first; after the
    // cancel, enumeration reports no open orders.
    mock.on_seq(
        HttpMethod::Get,
        "symbols=SYMX",
        vec![
            (200, format!("[{}]", open_order_json("tp1", "SYMX", "limit"))),
            (200, "[]".to_string()),
        ],
    );
    mock.on(HttpMethod::Get, "symbols=SYMA", 200, "[]");
    mock.on(HttpMethod::Delete, "/v2/orders/tp1", 204, "");

    // First SYMX flatten bounces with held quantity, the retry round fills.
    mock.on_body(
        HttpMethod::Post,
        "/v2/orders",
        "SYMX",
        vec![
            (
                422,
                r#"{"code":42210000,"message":"insufficient qty available for order"}"#.to_string(),
            ),
            (201, filled_market_json("mx1", "SYMX")),
        ],
    );
    mock.on_body(
        HttpMethod::Post,
        "/v2/orders",
        "SYMA",
        vec![(201, filled_market_json("ma1", "SYMA"))],
    );

    let gateway = Arc::new(BrokerGateway::new(mock.clone(), GatewayConfig::default()));
    let emergency = EmergencyStop::new(gateway, EmergencyConfig::default());

    let report = emergency.execute("test drawdown halt").await;

    assert_eq!(report.positions_attempted, 2);
    assert_eq!(report.positions_flattened, 2);
    assert_eq!(report.residual_exposure, dec!(0));

    let symx = report
        .outcomes
        .iter()
        .find(|o| o.symbol == "SYMX")
        .expect("SYMX outcome");
    assert!(symx.flattened);
    assert_eq!(symx.rounds, 2);
    assert_eq!(symx.residual_qty, dec!(0));
    assert!(symx.orders_canceled >= 1);

    // Cancellation preceded the flatten: the take-profit delete happened.
    assert_eq!(mock.calls("/v2/orders/tp1"), 1);

    // The report serializes with ISO-8601 timestamps and round-trips.
    let json = serde_json::to_string(&report).unwrap();
    let parsed: diptrader::application::lifecycle::emergency::ShutdownReport =
        serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.positions_flattened, 2);
}

#[tokio::test(start_paused = true)]
async fn emergency_stop_reports_residual_after_exhausted_rounds() {
    let mock = Arc::new(RouteMock::new());
    mock.on(
        HttpMethod::Get,
        "/v2/positions",
        200,
        &format!("[{}]", position_json("STUCK", "10", "25")),
    );
    mock.on(HttpMethod::Get, "symbols=STUCK", 200, "[]");
    // Every flatten attempt bounces.
    mock.on(
        HttpMethod::Post,
        "/v2/orders",
        422,
        r#"{"code":42210000,"message":"insufficient qty available for order"}"#,
    );

    let gateway = Arc::new(BrokerGateway::new(mock.clone(), GatewayConfig::default()));
    let emergency = EmergencyStop::new(gateway, EmergencyConfig::default());

    let report = emergency.execute("test stuck symbol").await;

    let stuck = &report.outcomes[0];
    assert!(!stuck.flattened);
    assert_eq!(stuck.rounds, 3);
    assert_eq!(stuck.residual_qty, dec!(10));
    // 10 shares at $25 still exposed.
    assert_eq!(report.residual_exposure, dec!(250));
    assert!(stuck.error.is_some());
    // Three rounds, one flatten attempt each.
    assert_eq!(mock.bodies("/v2/orders").len(), 3);
}

#[tokio::test(start_paused = true)]
async fn emergency_stop_with_no_positions_is_clean() {
    let mock = Arc::new(RouteMock::new());
    mock.on(HttpMethod::Get, "/v2/positions", 200, "[]");

    let gateway = Arc::new(BrokerGateway::new(mock, GatewayConfig::default()));
    let emergency = EmergencyStop::new(gateway, EmergencyConfig::default());

    let report = emergency.execute("nothing to do").await;
    assert_eq!(report.positions_attempted, 0);
    assert_eq!(report.residual_exposure, dec!(0));
}
