use crate::application::funnel::strategic_filter::ScoredCandidate;
use crate::application::market_data::indicators::{analyze_daily_bars, average_volume};
use crate::domain::errors::ErrorKind;
use crate::domain::market::regime::RegimeSnapshot;
use crate::domain::market::types::{CapBucket, Timeframe};
use crate::domain::trading::opportunity::Opportunity;
use crate::infrastructure::broker::gateway::BrokerGateway;
use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Broker calls each deep-dived symbol costs: daily bars, intraday bars,
/// and the latest quote.
pub const CALLS_PER_SYMBOL: u32 = 3;

const DAILY_BAR_LIMIT: u32 = 30;
const INTRADAY_BAR_LIMIT: u32 = 30;

/// Strict per-cycle broker-call budget for stage 3.
#[derive(Debug)]
pub struct ApiBudget {
    remaining: u32,
}

impl ApiBudget {
    pub fn new(total: u32) -> Self {
        Self { remaining: total }
    }

    pub fn try_take(&mut self, calls: u32) -> bool {
        if self.remaining >= calls {
            self.remaining -= calls;
            true
        } else {
            false
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}

#[derive(Debug, Clone)]
pub struct DeepDiveConfig {
    pub call_budget: u32,
    pub max_opportunities: usize,
    pub max_spread_pct: f64,
}

impl Default for DeepDiveConfig {
    fn default() -> Self {
        Self {
            call_budget: 20,
            max_opportunities: 10,
            max_spread_pct: 1.0,
        }
    }
}

/// Stage 3: fetch bars and the latest quote for each shortlisted symbol,
/// compute indicators, and emit scored opportunities. Hard-bounded by both
/// the call budget and the cycle deadline; overruns keep the partial top-N.
pub async fn deep_dive(
    gateway: &BrokerGateway,
    shortlist: Vec<ScoredCandidate>,
    regime: &RegimeSnapshot,
    config: &DeepDiveConfig,
    deadline: Instant,
) -> Vec<Opportunity> {
    let mut budget = ApiBudget::new(config.call_budget);
    let weights = regime.regime.score_weights();
    let mut opportunities: Vec<Opportunity> = Vec::new();

    for scored in shortlist {
        if opportunities.len() >= config.max_opportunities {
            break;
        }
        if Instant::now() >= deadline {
            info!(
                "DeepDive: cycle budget exhausted, proceeding with {} opportunit(ies)",
                opportunities.len()
            );
            break;
        }
        if !budget.try_take(CALLS_PER_SYMBOL) {
            info!(
                "DeepDive: call budget exhausted ({} remaining), stopping",
                budget.remaining()
            );
            break;
        }

        let symbol = scored.candidate.symbol.clone();

        let daily = gateway.get_bars(&symbol, Timeframe::Day, DAILY_BAR_LIMIT).await;
        let daily_ok = daily.success;
        let Some(daily_bars) = daily.data.filter(|_| daily_ok) else {
            warn!(
                "DeepDive: daily bars unavailable for {}: {:?}",
                symbol, daily.error_message
            );
            continue;
        };
        if daily_bars.is_empty() {
            debug!("DeepDive: no daily history for {}, skipping", symbol);
            continue;
        }

        let intraday = gateway
            .get_bars(&symbol, Timeframe::FiveMinute, INTRADAY_BAR_LIMIT)
            .await;
        let intraday_bars = intraday.data.unwrap_or_default();

        let quote_resp = gateway.get_latest_quote(&symbol).await;
        if quote_resp.kind_is(ErrorKind::StaleData) {
            warn!(
                "DeepDive: stale quote for {}, dropping from cycle: {:?}",
                symbol, quote_resp.error_message
            );
            continue;
        }
        let quote_ok = quote_resp.success;
        let Some(quote) = quote_resp.data.filter(|_| quote_ok) else {
            warn!(
                "DeepDive: quote unavailable for {}: {:?}",
                symbol, quote_resp.error_message
            );
            continue;
        };

        let spread_pct = quote.spread_pct();
        if spread_pct > config.max_spread_pct {
            debug!(
                "DeepDive: spread {:.2}% over limit for {}, skipping",
                spread_pct, symbol
            );
            continue;
        }

        let mut analysis = analyze_daily_bars(&daily_bars);
        analysis.spread_pct = Some(spread_pct);

        let avg_volume = average_volume(&daily_bars).unwrap_or(0.0);
        let today_volume = if scored.candidate.volume > 0.0 {
            scored.candidate.volume
        } else if !intraday_bars.is_empty() {
            intraday_bars.iter().map(|b| b.volume).sum()
        } else {
            daily_bars.last().map(|b| b.volume).unwrap_or(0.0)
        };

        let price = if quote.mid() > 0.0 {
            quote.mid()
        } else {
            scored.candidate.price
        };
        let change_pct = if scored.candidate.price > 0.0 {
            scored.candidate.change_pct
        } else {
            daily_change_pct(&daily_bars)
        };

        // Refine the stage-2 score with the true volume ratio.
        let volume_ratio = if avg_volume > 0.0 {
            today_volume / avg_volume
        } else {
            0.0
        };
        let score = scored.score + weights.volume * volume_ratio.max(0.05).ln();

        opportunities.push(Opportunity {
            symbol,
            source: scored.candidate.source,
            discovered_at: Utc::now(),
            price,
            change_pct,
            volume: today_volume,
            avg_volume,
            cap_bucket: CapBucket::from_dollar_volume(price, avg_volume),
            sector: None,
            score,
            analysis,
        });
    }

    opportunities.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    opportunities.truncate(config.max_opportunities);

    info!("DeepDive: emitted {} opportunit(ies)", opportunities.len());
    opportunities
}

fn daily_change_pct(bars: &[crate::domain::market::types::Bar]) -> f64 {
    if bars.len() < 2 {
        return 0.0;
    }
    let prev = bars[bars.len() - 2].close;
    let last = bars[bars.len() - 1].close;
    if prev <= 0.0 {
        return 0.0;
    }
    (last - prev) / prev * 100.0
}
