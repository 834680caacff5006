//! Engine configuration from environment variables.
//!
//! Broker credentials are mandatory; the process refuses to start without
//! them. Every tuning knob has a documented default and a fatal parse error
//! when set to garbage.

use crate::domain::errors::ConfigError;
use crate::domain::risk::engine::{RiskConfig, RiskProfile, SizingMode};
use rust_decimal::Decimal;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

const PAPER_TRADING_URL: &str = "https://paper-api.alpaca.markets";
const LIVE_TRADING_URL: &str = "https://api.alpaca.markets";
const DATA_URL: &str = "https://data.alpaca.markets";

/// Broker connectivity and credentials.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub key_id: String,
    pub secret_key: String,
    pub trading_url: String,
    pub data_url: String,
    pub paper_trading: bool,
}

impl BrokerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let key_id =
            env::var("APCA_API_KEY_ID").map_err(|_| ConfigError::MissingEnv("APCA_API_KEY_ID"))?;
        let secret_key = env::var("APCA_API_SECRET_KEY")
            .map_err(|_| ConfigError::MissingEnv("APCA_API_SECRET_KEY"))?;
        if key_id.trim().is_empty() {
            return Err(ConfigError::MissingEnv("APCA_API_KEY_ID"));
        }
        if secret_key.trim().is_empty() {
            return Err(ConfigError::MissingEnv("APCA_API_SECRET_KEY"));
        }

        let paper_trading = parse_env("PAPER_TRADING", true)?;
        let trading_url = env::var("APCA_API_BASE_URL").unwrap_or_else(|_| {
            if paper_trading {
                PAPER_TRADING_URL.to_string()
            } else {
                LIVE_TRADING_URL.to_string()
            }
        });
        let data_url = env::var("APCA_DATA_URL").unwrap_or_else(|_| DATA_URL.to_string());

        Ok(Self {
            key_id,
            secret_key,
            trading_url,
            data_url,
            paper_trading,
        })
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub broker: BrokerConfig,
    pub risk: RiskConfig,
    pub risk_profile: RiskProfile,

    pub scan_interval_minutes: u64,
    pub rate_limit_per_minute: u32,
    pub rate_limit_utilization: f64,
    pub stale_quote_max_minutes: i64,
    pub enable_extended_hours: bool,
    pub ai_confidence_threshold: f64,

    pub max_overnight_positions: usize,
    pub max_overnight_days: i64,

    /// Stop distance for emergency protection of naked positions.
    pub emergency_stop_pct: Decimal,
    pub liquidate_on_shutdown: bool,

    pub oracle_url: Option<String>,
    pub state_dir: PathBuf,

    /// Symbols always scanned as sector-rotation candidates.
    pub sector_watchlist: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let broker = BrokerConfig::from_env()?;

        let risk_profile = match env::var("RISK_PROFILE") {
            Ok(raw) => RiskProfile::parse(&raw).ok_or_else(|| ConfigError::InvalidValue {
                key: "RISK_PROFILE",
                value: raw,
                reason: "expected conservative|standard|aggressive".to_string(),
            })?,
            Err(_) => RiskProfile::Standard,
        };

        let mut risk = RiskConfig::for_profile(risk_profile);
        risk.max_position_pct = parse_pct_env("MAX_POSITION_PCT", risk.max_position_pct)?;
        risk.max_trade_risk_pct = parse_pct_env("MAX_TRADE_RISK_PCT", risk.max_trade_risk_pct)?;
        risk.max_portfolio_risk_pct =
            parse_pct_env("MAX_PORTFOLIO_RISK_PCT", risk.max_portfolio_risk_pct)?;
        risk.circuit_breaker_pct = parse_pct_env("CIRCUIT_BREAKER_PCT", risk.circuit_breaker_pct)?;
        risk.max_concurrent_positions =
            parse_env("MAX_CONCURRENT_POSITIONS", risk.max_concurrent_positions)?;
        if let Ok(raw) = env::var("POSITION_SIZING") {
            risk.sizing_mode = match raw.as_str() {
                "fixed" => SizingMode::Fixed,
                "volatility_adjusted" => SizingMode::VolatilityAdjusted,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "POSITION_SIZING",
                        value: raw,
                        reason: "expected fixed|volatility_adjusted".to_string(),
                    });
                }
            };
        }

        let config = Self {
            broker,
            risk,
            risk_profile,
            scan_interval_minutes: parse_env("SCAN_INTERVAL_MINUTES", 15u64)?,
            rate_limit_per_minute: parse_env("RATE_LIMIT_PER_MINUTE", 200u32)?,
            rate_limit_utilization: parse_env("RATE_LIMIT_UTILIZATION", 0.8f64)?,
            stale_quote_max_minutes: parse_env("STALE_QUOTE_MAX_MINUTES", 15i64)?,
            enable_extended_hours: parse_env("ENABLE_EXTENDED_HOURS", false)?,
            ai_confidence_threshold: parse_env("AI_CONFIDENCE_THRESHOLD", 0.65f64)?,
            max_overnight_positions: parse_env("MAX_OVERNIGHT_POSITIONS", 3usize)?,
            max_overnight_days: parse_env("MAX_OVERNIGHT_DAYS", 3i64)?,
            emergency_stop_pct: parse_pct_env("EMERGENCY_STOP_PCT", Decimal::new(3, 2))?,
            liquidate_on_shutdown: parse_env("LIQUIDATE_ON_SHUTDOWN", false)?,
            oracle_url: env::var("ORACLE_URL").ok().filter(|s| !s.trim().is_empty()),
            state_dir: env::var("STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("state")),
            sector_watchlist: env::var("SECTOR_WATCHLIST")
                .map(|raw| {
                    raw.split(',')
                        .map(|s| s.trim().to_ascii_uppercase())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit_utilization <= 0.0 || self.rate_limit_utilization > 1.0 {
            return Err(ConfigError::InvalidValue {
                key: "RATE_LIMIT_UTILIZATION",
                value: self.rate_limit_utilization.to_string(),
                reason: "must be in (0, 1]".to_string(),
            });
        }
        if self.rate_limit_per_minute == 0 {
            return Err(ConfigError::InvalidValue {
                key: "RATE_LIMIT_PER_MINUTE",
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.scan_interval_minutes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SCAN_INTERVAL_MINUTES",
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.stale_quote_max_minutes <= 0 {
            return Err(ConfigError::InvalidValue {
                key: "STALE_QUOTE_MAX_MINUTES",
                value: self.stale_quote_max_minutes.to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.ai_confidence_threshold) {
            return Err(ConfigError::InvalidValue {
                key: "AI_CONFIDENCE_THRESHOLD",
                value: self.ai_confidence_threshold.to_string(),
                reason: "must be in [0, 1]".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_env<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
{
    match env::var(key) {
        Ok(raw) => raw.parse::<T>().map_err(|_| ConfigError::InvalidValue {
            key,
            value: raw,
            reason: format!("expected {}", std::any::type_name::<T>()),
        }),
        Err(_) => Ok(default),
    }
}

fn parse_pct_env(key: &'static str, default: Decimal) -> Result<Decimal, ConfigError> {
    let value: Decimal = parse_env(key, default)?;
    if value <= Decimal::ZERO || value >= Decimal::ONE {
        return Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
            reason: "expected a fraction in (0, 1)".to_string(),
        });
    }
    Ok(value)
}
