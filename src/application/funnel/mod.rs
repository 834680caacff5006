//! The three-stage opportunity funnel: broad scan, strategic filter,
//! deep dive. Reduces the broad universe to a bounded opportunity list
//! under strict per-cycle API and wall-clock budgets.

pub mod broad_scan;
pub mod deep_dive;
pub mod strategic_filter;

use crate::domain::market::regime::RegimeSnapshot;
use crate::domain::trading::opportunity::Opportunity;
use crate::infrastructure::broker::gateway::BrokerGateway;
use crate::infrastructure::oracle::{IntelligenceOracle, RankedCandidate};
use broad_scan::ScanFilters;
use deep_dive::DeepDiveConfig;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct FunnelConfig {
    pub filters: ScanFilters,
    pub movers_top: u32,
    pub most_active_top: u32,
    pub news_limit: u32,
    pub shortlist_size: usize,
    pub deep_dive: DeepDiveConfig,
    /// Wall-clock budget for one full cycle.
    pub cycle_budget: Duration,
    /// Symbols scanned as sector-rotation candidates.
    pub sector_watchlist: Vec<String>,
}

impl Default for FunnelConfig {
    fn default() -> Self {
        Self {
            filters: ScanFilters::default(),
            movers_top: 25,
            most_active_top: 25,
            news_limit: 20,
            shortlist_size: 30,
            deep_dive: DeepDiveConfig::default(),
            cycle_budget: Duration::from_secs(60),
            sector_watchlist: Vec::new(),
        }
    }
}

pub struct OpportunityFunnel {
    gateway: Arc<BrokerGateway>,
    oracle: Arc<dyn IntelligenceOracle>,
    config: FunnelConfig,
}

impl OpportunityFunnel {
    pub fn new(
        gateway: Arc<BrokerGateway>,
        oracle: Arc<dyn IntelligenceOracle>,
        config: FunnelConfig,
    ) -> Self {
        Self {
            gateway,
            oracle,
            config,
        }
    }

    /// Run one full cycle under the current regime.
    pub async fn run(&self, regime: &RegimeSnapshot) -> Vec<Opportunity> {
        let started = Instant::now();
        let deadline = started + self.config.cycle_budget;

        let candidates = broad_scan::broad_scan(
            &self.gateway,
            &self.config.filters,
            self.config.movers_top,
            self.config.most_active_top,
            self.config.news_limit,
            &self.config.sector_watchlist,
        )
        .await;
        if candidates.is_empty() {
            info!("OpportunityFunnel: broad scan produced no candidates");
            return Vec::new();
        }

        let mut shortlist =
            strategic_filter::shortlist(candidates, regime, self.config.shortlist_size);

        // Advisory re-rank; local order stands on any failure.
        shortlist = self.oracle_rerank(shortlist, regime).await;

        let opportunities = deep_dive::deep_dive(
            &self.gateway,
            shortlist,
            regime,
            &self.config.deep_dive,
            deadline,
        )
        .await;

        info!(
            "OpportunityFunnel: cycle finished in {:?} with {} opportunit(ies)",
            started.elapsed(),
            opportunities.len()
        );
        opportunities
    }

    async fn oracle_rerank(
        &self,
        shortlist: Vec<strategic_filter::ScoredCandidate>,
        regime: &RegimeSnapshot,
    ) -> Vec<strategic_filter::ScoredCandidate> {
        if shortlist.len() < 2 {
            return shortlist;
        }
        let ranked: Vec<RankedCandidate> = shortlist
            .iter()
            .map(|s| RankedCandidate {
                symbol: s.candidate.symbol.clone(),
                score: s.score,
                change_pct: s.candidate.change_pct,
                volume_ratio: 1.0,
            })
            .collect();

        match self.oracle.rank_candidates(regime, &ranked).await {
            Ok(preferred) => {
                debug!("OpportunityFunnel: oracle re-ranked {} symbols", preferred.len());
                reorder_by_preference(shortlist, &preferred)
            }
            Err(e) => {
                debug!("OpportunityFunnel: oracle unavailable, keeping local order: {}", e);
                shortlist
            }
        }
    }
}

/// Stable reorder: symbols named by the oracle come first in its order;
/// everything else keeps the local ranking behind them.
fn reorder_by_preference(
    shortlist: Vec<strategic_filter::ScoredCandidate>,
    preferred: &[String],
) -> Vec<strategic_filter::ScoredCandidate> {
    let rank: HashMap<&str, usize> = preferred
        .iter()
        .enumerate()
        .map(|(i, s)| (s.as_str(), i))
        .collect();
    let mut indexed: Vec<(usize, usize, strategic_filter::ScoredCandidate)> = shortlist
        .into_iter()
        .enumerate()
        .map(|(local_idx, sc)| {
            let oracle_idx = rank
                .get(sc.candidate.symbol.as_str())
                .copied()
                .unwrap_or(usize::MAX);
            (oracle_idx, local_idx, sc)
        })
        .collect();
    indexed.sort_by_key(|(oracle_idx, local_idx, _)| (*oracle_idx, *local_idx));
    indexed.into_iter().map(|(_, _, sc)| sc).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::funnel::broad_scan::Candidate;
    use crate::application::funnel::strategic_filter::ScoredCandidate;
    use crate::domain::trading::opportunity::DiscoverySource;

    fn scored(symbol: &str, score: f64) -> ScoredCandidate {
        ScoredCandidate {
            candidate: Candidate {
                symbol: symbol.to_string(),
                source: DiscoverySource::TopMovers,
                price: 100.0,
                change_pct: 2.5,
                volume: 2_000_000.0,
            },
            score,
        }
    }

    #[test]
    fn test_reorder_by_preference() {
        let shortlist = vec![scored("A", 3.0), scored("B", 2.0), scored("C", 1.0)];
        let reordered = reorder_by_preference(shortlist, &["C".to_string(), "A".to_string()]);
        let symbols: Vec<&str> = reordered
            .iter()
            .map(|s| s.candidate.symbol.as_str())
            .collect();
        assert_eq!(symbols, vec!["C", "A", "B"]);
    }

    #[test]
    fn test_reorder_with_unknown_oracle_symbols() {
        let shortlist = vec![scored("A", 3.0), scored("B", 2.0)];
        let reordered =
            reorder_by_preference(shortlist, &["ZZZ".to_string(), "B".to_string()]);
        let symbols: Vec<&str> = reordered
            .iter()
            .map(|s| s.candidate.symbol.as_str())
            .collect();
        // Unknown oracle picks are ignored; named ones lead.
        assert_eq!(symbols, vec!["B", "A"]);
    }
}
