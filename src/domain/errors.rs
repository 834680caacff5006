use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure categories surfaced by the broker gateway and propagated through
/// the engine. Every `ApiResponse` carries at most one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    RateLimited,
    Auth,
    PdtViolation,
    PdtWouldViolate,
    QtyHeld,
    StaleData,
    InvalidOrder,
    CircuitBreaker,
    OracleUnavailable,
    ConfigInvalid,
    Other,
}

impl ErrorKind {
    /// Kinds the gateway is allowed to retry internally. `QtyHeld` is
    /// retryable by the *caller* (after cancelling competing orders), never
    /// by the gateway itself.
    pub fn gateway_retryable(&self) -> bool {
        matches!(self, ErrorKind::Network | ErrorKind::RateLimited)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Network => "network",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Auth => "auth",
            ErrorKind::PdtViolation => "pdt_violation",
            ErrorKind::PdtWouldViolate => "pdt_would_violate",
            ErrorKind::QtyHeld => "qty_held",
            ErrorKind::StaleData => "stale_data",
            ErrorKind::InvalidOrder => "invalid_order",
            ErrorKind::CircuitBreaker => "circuit_breaker",
            ErrorKind::OracleUnavailable => "oracle_unavailable",
            ErrorKind::ConfigInvalid => "config_invalid",
            ErrorKind::Other => "other",
        };
        write!(f, "{}", s)
    }
}

/// Errors raised by the risk gates before an order ever reaches the broker
#[derive(Debug, Error)]
pub enum RiskViolation {
    #[error("Position notional for {symbol} exceeds cap: ${notional} > ${cap}")]
    PositionSizeLimit {
        symbol: String,
        notional: Decimal,
        cap: Decimal,
    },

    #[error("Trade risk for {symbol} exceeds cap: ${risk} > ${cap}")]
    TradeRiskLimit {
        symbol: String,
        risk: Decimal,
        cap: Decimal,
    },

    #[error("Price ${price} below minimum ${floor} for {symbol}")]
    PriceFloor {
        symbol: String,
        price: Decimal,
        floor: Decimal,
    },

    #[error("Volume ratio {ratio:.2} below 1.0 for {symbol}")]
    ThinVolume { symbol: String, ratio: f64 },

    #[error("Portfolio risk would exceed cap: ${projected} > ${cap}")]
    PortfolioRiskLimit { projected: Decimal, cap: Decimal },

    #[error("Concurrent position cap reached: {open} >= {max}")]
    MaxPositions { open: usize, max: usize },

    #[error("Sector concentration for {sector}: {pct:.1}% > {max_pct:.1}%")]
    SectorConcentration {
        sector: String,
        pct: f64,
        max_pct: f64,
    },

    #[error("Reward:risk {ratio} below minimum {min} for {symbol}")]
    RewardRiskTooLow {
        symbol: String,
        ratio: Decimal,
        min: Decimal,
    },

    #[error("Sized quantity is zero for {symbol} (risk budget ${budget})")]
    ZeroQuantity { symbol: String, budget: Decimal },

    #[error("PDT: closing {symbol} would be day trade #{day_trades} with equity ${equity} < $25,000")]
    PdtWouldViolate {
        symbol: String,
        day_trades: u32,
        equity: Decimal,
    },

    #[error("Symbol {symbol} is blocked after a broker PDT rejection")]
    SymbolBlocked { symbol: String },

    #[error("Circuit breaker tripped: drawdown {drawdown_pct:.2}% >= {limit_pct:.2}%")]
    CircuitBreaker { drawdown_pct: f64, limit_pct: f64 },

    #[error("System halted; new entries suspended")]
    Halted,
}

impl RiskViolation {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RiskViolation::PdtWouldViolate { .. } | RiskViolation::SymbolBlocked { .. } => {
                ErrorKind::PdtWouldViolate
            }
            RiskViolation::CircuitBreaker { .. } | RiskViolation::Halted => {
                ErrorKind::CircuitBreaker
            }
            _ => ErrorKind::InvalidOrder,
        }
    }
}

/// Errors raised while constructing or validating a trade signal
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("Invalid price ordering for {side} {symbol}: stop {stop}, entry {entry}, target {target}")]
    PriceOrdering {
        symbol: String,
        side: String,
        entry: Decimal,
        stop: Decimal,
        target: Decimal,
    },

    #[error("Zero risk per share for {symbol} (entry == stop)")]
    ZeroRisk { symbol: String },

    #[error("Reward:risk {ratio} below minimum {min} for {symbol}")]
    RewardRiskTooLow {
        symbol: String,
        ratio: Decimal,
        min: Decimal,
    },
}

/// Fatal startup configuration problems
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for {key}: {value} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_gateway_retryable_kinds() {
        assert!(ErrorKind::Network.gateway_retryable());
        assert!(ErrorKind::RateLimited.gateway_retryable());
        assert!(!ErrorKind::QtyHeld.gateway_retryable());
        assert!(!ErrorKind::PdtViolation.gateway_retryable());
        assert!(!ErrorKind::StaleData.gateway_retryable());
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::PdtWouldViolate).unwrap();
        assert_eq!(json, "\"pdt_would_violate\"");
        let back: ErrorKind = serde_json::from_str("\"qty_held\"").unwrap();
        assert_eq!(back, ErrorKind::QtyHeld);
    }

    #[test]
    fn test_risk_violation_formatting() {
        let violation = RiskViolation::TradeRiskLimit {
            symbol: "AAPL".to_string(),
            risk: dec!(250),
            cap: dec!(200),
        };
        let msg = violation.to_string();
        assert!(msg.contains("AAPL"));
        assert!(msg.contains("250"));
        assert!(msg.contains("200"));
    }

    #[test]
    fn test_violation_kind_mapping() {
        let v = RiskViolation::PdtWouldViolate {
            symbol: "TSLA".to_string(),
            day_trades: 3,
            equity: dec!(8000),
        };
        assert_eq!(v.kind(), ErrorKind::PdtWouldViolate);

        let v = RiskViolation::Halted;
        assert_eq!(v.kind(), ErrorKind::CircuitBreaker);
    }
}
