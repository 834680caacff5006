//! Advisory intelligence oracle.
//!
//! The oracle labels the market regime and may re-rank funnel candidates.
//! It is never load-bearing: every caller degrades to the local detector or
//! local scores when it errors or times out.

use crate::domain::market::regime::{MarketRegime, RegimeSnapshot};
use crate::infrastructure::core::http_client_factory::HttpClientFactory;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const ORACLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Facts handed to the oracle alongside the local regime read.
#[derive(Debug, Clone, Serialize)]
pub struct MarketSummary {
    pub as_of: DateTime<Utc>,
    pub local_regime: MarketRegime,
    pub local_confidence: f64,
    pub index_change_pct: f64,
    pub realized_volatility: f64,
}

/// A shortlist entry offered for re-ranking.
#[derive(Debug, Clone, Serialize)]
pub struct RankedCandidate {
    pub symbol: String,
    pub score: f64,
    pub change_pct: f64,
    pub volume_ratio: f64,
}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle unavailable: {0}")]
    Unavailable(String),

    #[error("oracle timed out after {0:?}")]
    Timeout(Duration),

    #[error("oracle returned an unusable payload: {0}")]
    BadResponse(String),
}

#[async_trait]
pub trait IntelligenceOracle: Send + Sync {
    async fn classify_regime(&self, summary: &MarketSummary)
    -> Result<RegimeSnapshot, OracleError>;

    /// Return the shortlist symbols in preferred order. May drop symbols;
    /// callers keep their local order for anything omitted.
    async fn rank_candidates(
        &self,
        regime: &RegimeSnapshot,
        candidates: &[RankedCandidate],
    ) -> Result<Vec<String>, OracleError>;
}

/// Null oracle used when no endpoint is configured.
pub struct DisabledOracle;

#[async_trait]
impl IntelligenceOracle for DisabledOracle {
    async fn classify_regime(
        &self,
        _summary: &MarketSummary,
    ) -> Result<RegimeSnapshot, OracleError> {
        Err(OracleError::Unavailable("oracle disabled".to_string()))
    }

    async fn rank_candidates(
        &self,
        _regime: &RegimeSnapshot,
        _candidates: &[RankedCandidate],
    ) -> Result<Vec<String>, OracleError> {
        Err(OracleError::Unavailable("oracle disabled".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct RegimeResponse {
    regime: String,
    #[serde(default)]
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct RankResponse {
    #[serde(default)]
    symbols: Vec<String>,
}

#[derive(Debug, Serialize)]
struct RankRequest<'a> {
    regime: MarketRegime,
    confidence: f64,
    candidates: &'a [RankedCandidate],
}

/// HTTP oracle client with a hard 5-second deadline per call.
pub struct HttpOracle {
    client: ClientWithMiddleware,
    base_url: String,
}

impl HttpOracle {
    pub fn new(base_url: String) -> Self {
        Self {
            client: HttpClientFactory::create_advisory_client(ORACLE_TIMEOUT),
            base_url,
        }
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, OracleError>
    where
        B: Serialize + Sync,
        R: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{}", self.base_url, path);
        let send = async {
            let response = self
                .client
                .post(&url)
                .json(body)
                .send()
                .await
                .map_err(|e| OracleError::Unavailable(e.to_string()))?;
            if !response.status().is_success() {
                return Err(OracleError::Unavailable(format!(
                    "oracle returned {}",
                    response.status()
                )));
            }
            response
                .json::<R>()
                .await
                .map_err(|e| OracleError::BadResponse(e.to_string()))
        };

        tokio::time::timeout(ORACLE_TIMEOUT, send)
            .await
            .map_err(|_| OracleError::Timeout(ORACLE_TIMEOUT))?
    }
}

#[async_trait]
impl IntelligenceOracle for HttpOracle {
    async fn classify_regime(
        &self,
        summary: &MarketSummary,
    ) -> Result<RegimeSnapshot, OracleError> {
        let response: RegimeResponse = self.post_json("/v1/regime", summary).await?;
        let regime = MarketRegime::parse(&response.regime).ok_or_else(|| {
            OracleError::BadResponse(format!("unknown regime label '{}'", response.regime))
        })?;
        debug!(
            "HttpOracle: regime {} (confidence {:.2})",
            regime, response.confidence
        );
        Ok(RegimeSnapshot::new(regime, response.confidence, Utc::now()))
    }

    async fn rank_candidates(
        &self,
        regime: &RegimeSnapshot,
        candidates: &[RankedCandidate],
    ) -> Result<Vec<String>, OracleError> {
        let request = RankRequest {
            regime: regime.regime,
            confidence: regime.confidence,
            candidates,
        };
        let response: RankResponse = self.post_json("/v1/rank", &request).await?;
        if response.symbols.is_empty() {
            return Err(OracleError::BadResponse("empty ranking".to_string()));
        }
        Ok(response.symbols)
    }
}
