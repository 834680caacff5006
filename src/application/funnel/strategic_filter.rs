use crate::application::funnel::broad_scan::Candidate;
use crate::domain::market::regime::{RegimeSnapshot, RegimeWeights};
use crate::domain::trading::opportunity::DiscoverySource;
use statrs::statistics::{Data, Distribution};
use tracing::debug;

/// A candidate with its regime-weighted local score.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub score: f64,
}

/// Sector-fit weight of a discovery source under the current regime.
/// Sector-rotation picks only carry weight in trending markets.
fn sector_fit(source: DiscoverySource, regime: &RegimeSnapshot) -> f64 {
    use crate::domain::market::regime::MarketRegime::*;
    match source {
        DiscoverySource::SectorRotation => match regime.regime {
            BullTrending | BearTrending => 1.0,
            _ => 0.4,
        },
        DiscoverySource::NewsDriven => 0.6,
        DiscoverySource::UnusualVolume => 0.7,
        _ => 0.5,
    }
}

/// Regime-weighted local score. The volume term is neutral at stage 2 (the
/// true volume ratio arrives with the deep dive) and the dispersion term
/// penalizes change outliers.
pub fn score_candidate(
    change_z: f64,
    volume_ratio: f64,
    fit: f64,
    weights: &RegimeWeights,
) -> f64 {
    let volume_term = volume_ratio.max(0.05).ln();
    weights.momentum * change_z + weights.volume * volume_term + weights.sector * fit
        - weights.risk * change_z.abs()
}

/// Stage 2: rank candidates with the local score and keep the top N.
/// Zero broker calls.
pub fn shortlist(
    candidates: Vec<Candidate>,
    regime: &RegimeSnapshot,
    max: usize,
) -> Vec<ScoredCandidate> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let weights = regime.regime.score_weights();

    let changes: Vec<f64> = candidates
        .iter()
        .filter(|c| c.price > 0.0)
        .map(|c| c.change_pct)
        .collect();
    let (mean, std_dev) = if changes.len() >= 2 {
        let data = Data::new(changes);
        (
            data.mean().unwrap_or(0.0),
            data.std_dev().unwrap_or(0.0),
        )
    } else {
        (0.0, 0.0)
    };

    let mut scored: Vec<ScoredCandidate> = candidates
        .into_iter()
        .map(|candidate| {
            let change_z = if candidate.price > 0.0 && std_dev > f64::EPSILON {
                (candidate.change_pct - mean) / std_dev
            } else {
                0.0
            };
            let fit = sector_fit(candidate.source, regime);
            let score = score_candidate(change_z, 1.0, fit, &weights);
            ScoredCandidate { candidate, score }
        })
        .collect();

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(max);

    debug!(
        "StrategicFilter: shortlisted {} candidate(s) under {} regime",
        scored.len(),
        regime.regime
    );
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::regime::MarketRegime;
    use chrono::Utc;

    fn candidate(symbol: &str, change_pct: f64) -> Candidate {
        Candidate {
            symbol: symbol.to_string(),
            source: DiscoverySource::TopMovers,
            price: 100.0,
            change_pct,
            volume: 2_000_000.0,
        }
    }

    fn snapshot(regime: MarketRegime) -> RegimeSnapshot {
        RegimeSnapshot::new(regime, 0.8, Utc::now())
    }

    #[test]
    fn test_shortlist_truncates_and_sorts() {
        let candidates: Vec<Candidate> = (0..50)
            .map(|i| candidate(&format!("S{}", i), i as f64 * 0.2))
            .collect();
        let shortlisted = shortlist(candidates, &snapshot(MarketRegime::BullTrending), 30);
        assert_eq!(shortlisted.len(), 30);
        assert!(shortlisted[0].score >= shortlisted[29].score);
    }

    #[test]
    fn test_bull_regime_prefers_momentum() {
        let candidates = vec![candidate("HOT", 6.0), candidate("FLAT", 0.5)];
        let shortlisted = shortlist(candidates, &snapshot(MarketRegime::BullTrending), 10);
        assert_eq!(shortlisted[0].candidate.symbol, "HOT");
    }

    #[test]
    fn test_volatile_regime_penalizes_outliers() {
        // Under a volatile regime the risk weight exceeds the momentum
        // weight, so the extreme mover loses to the candidate nearest the
        // pack.
        let candidates = vec![
            candidate("WILD", 12.0),
            candidate("MILD", 4.0),
            candidate("MID", 5.0),
        ];
        let shortlisted = shortlist(candidates, &snapshot(MarketRegime::Volatile), 10);
        assert_eq!(shortlisted[0].candidate.symbol, "MID");
        assert_ne!(shortlisted[0].candidate.symbol, "WILD");
    }

    #[test]
    fn test_sector_rotation_boost_in_trend() {
        let mut rotation = candidate("XLE", 2.0);
        rotation.source = DiscoverySource::SectorRotation;
        let plain = candidate("PLN", 2.0);

        let shortlisted = shortlist(
            vec![plain, rotation],
            &snapshot(MarketRegime::BullTrending),
            10,
        );
        assert_eq!(shortlisted[0].candidate.symbol, "XLE");
    }

    #[test]
    fn test_empty_input() {
        assert!(shortlist(Vec::new(), &snapshot(MarketRegime::RangeBound), 10).is_empty());
    }

    #[test]
    fn test_volume_term_neutral_at_ratio_one() {
        let weights = MarketRegime::RangeBound.score_weights();
        let base = score_candidate(0.0, 1.0, 0.5, &weights);
        let boosted = score_candidate(0.0, 3.0, 0.5, &weights);
        assert!(boosted > base);
        assert!((base - weights.sector * 0.5).abs() < 1e-9);
    }
}
