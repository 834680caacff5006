//! Market intelligence refresh: a deterministic local regime read from
//! index-proxy bars, advisorily adjusted by the oracle when it answers in
//! time. Oracle failure is not an error; the local read governs.

use crate::application::market_data::indicators::daily_return_sigma;
use crate::domain::market::regime::{LocalRegimeDetector, RegimeSnapshot};
use crate::domain::market::types::Timeframe;
use crate::infrastructure::broker::gateway::BrokerGateway;
use crate::infrastructure::oracle::{IntelligenceOracle, MarketSummary};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

const INDEX_PROXY: &str = "SPY";
const REGIME_BAR_LOOKBACK: u32 = 30;

pub struct MarketIntelligence {
    gateway: Arc<BrokerGateway>,
    oracle: Arc<dyn IntelligenceOracle>,
    detector: LocalRegimeDetector,
    current: RegimeSnapshot,
}

impl MarketIntelligence {
    pub fn new(gateway: Arc<BrokerGateway>, oracle: Arc<dyn IntelligenceOracle>) -> Self {
        Self {
            gateway,
            oracle,
            detector: LocalRegimeDetector::default(),
            current: RegimeSnapshot::neutral(Utc::now()),
        }
    }

    pub fn current(&self) -> &RegimeSnapshot {
        &self.current
    }

    /// Refresh the regime. Local detection always runs; the oracle only
    /// overrides when it answers with higher confidence.
    pub async fn refresh(&mut self) -> &RegimeSnapshot {
        let bars_resp = self
            .gateway
            .get_bars(INDEX_PROXY, Timeframe::Day, REGIME_BAR_LOOKBACK)
            .await;
        let Some(bars) = bars_resp.data.filter(|b| !b.is_empty()) else {
            warn!(
                "MarketIntelligence: index bars unavailable, keeping {} regime: {:?}",
                self.current.regime, bars_resp.error_message
            );
            return &self.current;
        };

        let local = self.detector.detect(&bars, Utc::now());

        let index_change_pct = if bars.len() >= 2 {
            let prev = bars[bars.len() - 2].close;
            let last = bars[bars.len() - 1].close;
            if prev > 0.0 { (last - prev) / prev * 100.0 } else { 0.0 }
        } else {
            0.0
        };
        let summary = MarketSummary {
            as_of: local.as_of,
            local_regime: local.regime,
            local_confidence: local.confidence,
            index_change_pct,
            realized_volatility: daily_return_sigma(&bars).unwrap_or(0.0),
        };

        self.current = match self.oracle.classify_regime(&summary).await {
            Ok(oracle_snapshot) if oracle_snapshot.confidence > local.confidence => {
                info!(
                    "MarketIntelligence: oracle regime {} ({:.2}) over local {} ({:.2})",
                    oracle_snapshot.regime,
                    oracle_snapshot.confidence,
                    local.regime,
                    local.confidence
                );
                oracle_snapshot
            }
            Ok(oracle_snapshot) => {
                debug!(
                    "MarketIntelligence: keeping local {} ({:.2}) over oracle {} ({:.2})",
                    local.regime, local.confidence, oracle_snapshot.regime, oracle_snapshot.confidence
                );
                local
            }
            Err(e) => {
                debug!("MarketIntelligence: oracle unavailable ({}), local scoring governs", e);
                local
            }
        };

        info!(
            "MarketIntelligence: regime {} (confidence {:.2})",
            self.current.regime, self.current.confidence
        );
        &self.current
    }
}
