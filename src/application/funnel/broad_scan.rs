use crate::domain::trading::opportunity::DiscoverySource;
use crate::infrastructure::broker::gateway::BrokerGateway;
use std::collections::HashMap;
use tracing::{info, warn};

/// A stage-1 candidate. Screener payloads are uneven; zeroed fields mean
/// "unknown until the deep dive fills them in".
#[derive(Debug, Clone)]
pub struct Candidate {
    pub symbol: String,
    pub source: DiscoverySource,
    pub price: f64,
    pub change_pct: f64,
    pub volume: f64,
}

#[derive(Debug, Clone)]
pub struct ScanFilters {
    pub min_price: f64,
    pub max_price: f64,
    pub min_volume: f64,
    pub min_abs_change_pct: f64,
    /// Most-active entries at or above this volume count as unusual volume.
    pub unusual_volume_floor: f64,
    pub max_candidates: usize,
}

impl Default for ScanFilters {
    fn default() -> Self {
        Self {
            min_price: 10.0,
            max_price: 500.0,
            min_volume: 1_000_000.0,
            min_abs_change_pct: 2.0,
            unusual_volume_floor: 5_000_000.0,
            max_candidates: 100,
        }
    }
}

impl ScanFilters {
    /// Hard filters, applied only to fields the screener actually reported.
    fn passes(&self, candidate: &Candidate) -> bool {
        if candidate.price > 0.0
            && (candidate.price < self.min_price || candidate.price > self.max_price)
        {
            return false;
        }
        if candidate.volume > 0.0 && candidate.volume < self.min_volume {
            return false;
        }
        if candidate.price > 0.0 && candidate.change_pct.abs() < self.min_abs_change_pct {
            return false;
        }
        true
    }
}

/// Stage 1: merge the movers, most-active, news, and sector-watchlist
/// sources into a deduplicated candidate set (2-5 broker calls).
pub async fn broad_scan(
    gateway: &BrokerGateway,
    filters: &ScanFilters,
    movers_top: u32,
    most_active_top: u32,
    news_limit: u32,
    sector_watchlist: &[String],
) -> Vec<Candidate> {
    let mut merged: HashMap<String, Candidate> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    let mut absorb = |candidate: Candidate| {
        match merged.get_mut(&candidate.symbol) {
            Some(existing) => {
                // First source wins; later entries only fill gaps.
                if existing.price <= 0.0 {
                    existing.price = candidate.price;
                    existing.change_pct = candidate.change_pct;
                }
                if existing.volume <= 0.0 {
                    existing.volume = candidate.volume;
                }
            }
            None => {
                order.push(candidate.symbol.clone());
                merged.insert(candidate.symbol.clone(), candidate);
            }
        }
    };

    let movers = gateway.get_market_movers(movers_top).await;
    match (movers.success, movers.data) {
        (true, Some(list)) => {
            for m in list {
                if m.symbol.is_empty() {
                    continue;
                }
                absorb(Candidate {
                    symbol: m.symbol,
                    source: DiscoverySource::TopMovers,
                    price: m.price,
                    change_pct: m.change_pct,
                    volume: m.volume,
                });
            }
        }
        _ => warn!(
            "BroadScan: movers endpoint failed: {:?}",
            movers.error_message
        ),
    }

    let actives = gateway.get_most_active(most_active_top).await;
    match (actives.success, actives.data) {
        (true, Some(list)) => {
            for a in list {
                if a.symbol.is_empty() {
                    continue;
                }
                let source = if a.volume >= filters.unusual_volume_floor {
                    DiscoverySource::UnusualVolume
                } else {
                    DiscoverySource::MostActive
                };
                absorb(Candidate {
                    symbol: a.symbol,
                    source,
                    price: a.price,
                    change_pct: a.change_pct,
                    volume: a.volume,
                });
            }
        }
        _ => warn!(
            "BroadScan: most-active endpoint failed: {:?}",
            actives.error_message
        ),
    }

    let news = gateway.get_news(news_limit).await;
    match (news.success, news.data) {
        (true, Some(items)) => {
            for item in items {
                for symbol in item.symbols {
                    if symbol.is_empty() {
                        continue;
                    }
                    absorb(Candidate {
                        symbol,
                        source: DiscoverySource::NewsDriven,
                        price: 0.0,
                        change_pct: 0.0,
                        volume: 0.0,
                    });
                }
            }
        }
        _ => warn!("BroadScan: news endpoint failed: {:?}", news.error_message),
    }

    for symbol in sector_watchlist {
        absorb(Candidate {
            symbol: symbol.clone(),
            source: DiscoverySource::SectorRotation,
            price: 0.0,
            change_pct: 0.0,
            volume: 0.0,
        });
    }

    let mut candidates: Vec<Candidate> = order
        .into_iter()
        .filter_map(|symbol| merged.remove(&symbol))
        .filter(|c| filters.passes(c))
        .collect();
    candidates.truncate(filters.max_candidates);

    info!("BroadScan: {} candidate(s) after hard filters", candidates.len());
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(price: f64, change_pct: f64, volume: f64) -> Candidate {
        Candidate {
            symbol: "TEST".to_string(),
            source: DiscoverySource::TopMovers,
            price,
            change_pct,
            volume,
        }
    }

    #[test]
    fn test_price_band_filter() {
        let filters = ScanFilters::default();
        assert!(filters.passes(&candidate(180.0, 3.0, 2_000_000.0)));
        assert!(!filters.passes(&candidate(8.0, 3.0, 2_000_000.0)));
        assert!(!filters.passes(&candidate(600.0, 3.0, 2_000_000.0)));
        // Boundary prices stay in.
        assert!(filters.passes(&candidate(10.0, 3.0, 2_000_000.0)));
        assert!(filters.passes(&candidate(500.0, 3.0, 2_000_000.0)));
    }

    #[test]
    fn test_change_filter_absolute() {
        let filters = ScanFilters::default();
        assert!(filters.passes(&candidate(100.0, -2.5, 2_000_000.0)));
        assert!(!filters.passes(&candidate(100.0, 1.5, 2_000_000.0)));
    }

    #[test]
    fn test_volume_filter_only_when_reported() {
        let filters = ScanFilters::default();
        assert!(!filters.passes(&candidate(100.0, 3.0, 500_000.0)));
        // Unreported volume defers to the deep dive.
        assert!(filters.passes(&candidate(100.0, 3.0, 0.0)));
    }

    #[test]
    fn test_unpriced_candidate_passes() {
        let filters = ScanFilters::default();
        assert!(filters.passes(&candidate(0.0, 0.0, 0.0)));
    }
}
