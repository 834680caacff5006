use crate::config::BrokerConfig;
use crate::domain::errors::ErrorKind;
use crate::domain::market::types::{Bar, MarketMover, NewsItem, Quote, Timeframe};
use crate::domain::trading::types::{AccountSnapshot, Order, OrderSpec, Position};
use crate::infrastructure::broker::envelope::{ApiResponse, Classification, classify};
use crate::infrastructure::broker::rate_limiter::{RateLimiter, TokenClass};
use crate::infrastructure::broker::wire::{
    OrderRequestBody, RawAccount, RawBarsEnvelope, RawMostActivesEnvelope, RawMoversEnvelope,
    RawNewsEnvelope, RawOrder, RawPosition, RawQuoteEnvelope,
};
use crate::infrastructure::core::http_client_factory::HttpClientFactory;
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Which broker host a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Host {
    Trading,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Delete,
}

/// One outbound broker call, host-relative. Query parameters stay
/// structured; the transport serializes them via `RequestBuilder::query`.
#[derive(Debug, Clone)]
pub struct BrokerRequest {
    pub method: HttpMethod,
    pub host: Host,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl BrokerRequest {
    pub fn get(host: Host, path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            host,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: HttpMethod::Post,
            host: Host::Trading,
            path: path.into(),
            query: Vec::new(),
            body: Some(body),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Delete,
            host: Host::Trading,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request deadline exceeded")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),
}

/// The wire seam. Production uses [`HttpTransport`]; tests script responses.
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    async fn send(&self, request: &BrokerRequest) -> Result<RawResponse, TransportError>;
}

/// Authenticated reqwest transport.
pub struct HttpTransport {
    client: reqwest::Client,
    trading_url: String,
    data_url: String,
    key_id: String,
    secret_key: String,
}

impl HttpTransport {
    pub fn new(config: &BrokerConfig, request_timeout: Duration) -> Self {
        Self {
            client: HttpClientFactory::create_broker_client(request_timeout),
            trading_url: config.trading_url.clone(),
            data_url: config.data_url.clone(),
            key_id: config.key_id.clone(),
            secret_key: config.secret_key.clone(),
        }
    }

    fn url_for(&self, request: &BrokerRequest) -> String {
        let base = match request.host {
            Host::Trading => &self.trading_url,
            Host::Data => &self.data_url,
        };
        format!("{}{}", base, request.path)
    }
}

#[async_trait]
impl BrokerTransport for HttpTransport {
    async fn send(&self, request: &BrokerRequest) -> Result<RawResponse, TransportError> {
        let url = self.url_for(request);
        let builder = match request.method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
            HttpMethod::Delete => self.client.delete(&url),
        };
        let mut builder = builder
            .header("APCA-API-KEY-ID", &self.key_id)
            .header("APCA-API-SECRET-KEY", &self.secret_key);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(RawResponse { status, body })
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub stale_quote_max: chrono::Duration,
    pub rate_limit_per_minute: u32,
    pub rate_limit_utilization: f64,
    pub emergency_reserve: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
            stale_quote_max: chrono::Duration::minutes(15),
            rate_limit_per_minute: 200,
            rate_limit_utilization: 0.8,
            emergency_reserve: 10,
        }
    }
}

/// Rate-limited, retry-aware request layer with uniform response
/// classification. Constructed once at startup and shared by reference;
/// there are no process-wide singletons.
pub struct BrokerGateway {
    transport: Arc<dyn BrokerTransport>,
    limiter: RateLimiter,
    config: GatewayConfig,
}

impl BrokerGateway {
    pub fn new(transport: Arc<dyn BrokerTransport>, config: GatewayConfig) -> Self {
        let limiter = RateLimiter::new(
            config.rate_limit_per_minute,
            config.rate_limit_utilization,
            config.emergency_reserve,
        );
        Self {
            transport,
            limiter,
            config,
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self.config.backoff_base * 2u32.saturating_pow(attempt);
        let jitter = rand::rng().random_range(0.75..=1.25);
        exp.mul_f64(jitter)
    }

    /// Acquire a token, send, classify, and retry transient failures with
    /// exponential backoff. Returns the raw JSON payload.
    async fn execute(
        &self,
        request: BrokerRequest,
        class: TokenClass,
    ) -> ApiResponse<serde_json::Value> {
        let mut attempt = 0u32;
        loop {
            self.limiter.acquire(class).await;

            match self.transport.send(&request).await {
                Err(e) => {
                    if attempt < self.config.max_retries {
                        let delay = self.backoff_delay(attempt);
                        debug!(
                            "BrokerGateway: {} attempt {} failed ({}), retrying in {:?}",
                            request.path, attempt, e, delay
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return ApiResponse::err(0, ErrorKind::Network, e.to_string(), true);
                }
                Ok(raw) => match classify(raw.status, &raw.body) {
                    Classification::Success => {
                        let value = if raw.body.trim().is_empty() {
                            serde_json::Value::Null
                        } else {
                            serde_json::from_str(&raw.body).unwrap_or(serde_json::Value::Null)
                        };
                        return ApiResponse::ok(raw.status, value);
                    }
                    Classification::Failure { kind, retryable } => {
                        if kind.gateway_retryable() && attempt < self.config.max_retries {
                            let delay = self.backoff_delay(attempt);
                            debug!(
                                "BrokerGateway: {} returned {} ({}), retrying in {:?}",
                                request.path, raw.status, kind, delay
                            );
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                            continue;
                        }
                        return ApiResponse::err(
                            raw.status,
                            kind,
                            truncate_body(&raw.body),
                            retryable,
                        );
                    }
                },
            }
        }
    }

    fn decode<R, T>(
        response: ApiResponse<serde_json::Value>,
        convert: impl FnOnce(R) -> T,
    ) -> ApiResponse<T>
    where
        R: DeserializeOwned,
    {
        if !response.success {
            return response.cast_err();
        }
        let status = response.status_code;
        match response.data {
            Some(value) => match serde_json::from_value::<R>(value) {
                Ok(raw) => ApiResponse::ok(status, convert(raw)),
                Err(e) => ApiResponse::err(
                    status,
                    ErrorKind::Other,
                    format!("failed to decode broker payload: {}", e),
                    false,
                ),
            },
            None => ApiResponse::err(status, ErrorKind::Other, "empty broker payload", false),
        }
    }

    // ===== Account and portfolio =====

    pub async fn get_account(&self) -> ApiResponse<AccountSnapshot> {
        let resp = self
            .execute(
                BrokerRequest::get(Host::Trading, "/v2/account"),
                TokenClass::Normal,
            )
            .await;
        Self::decode(resp, RawAccount::into_domain)
    }

    pub async fn get_positions(&self) -> ApiResponse<Vec<Position>> {
        let resp = self
            .execute(
                BrokerRequest::get(Host::Trading, "/v2/positions"),
                TokenClass::Normal,
            )
            .await;
        Self::decode(resp, |raw: Vec<RawPosition>| {
            raw.into_iter().map(RawPosition::into_domain).collect()
        })
    }

    pub async fn get_orders(&self, status: &str) -> ApiResponse<Vec<Order>> {
        let request = BrokerRequest::get(Host::Trading, "/v2/orders")
            .query("status", status)
            .query("nested", "true")
            .query("limit", "500");
        let resp = self.execute(request, TokenClass::Normal).await;
        Self::decode(resp, |raw: Vec<RawOrder>| {
            raw.into_iter().map(RawOrder::into_domain).collect()
        })
    }

    /// Open orders for one symbol. The cancel-then-liquidate path calls
    /// this with an emergency token so scans cannot starve it.
    pub async fn get_open_orders_for(&self, symbol: &str, class: TokenClass) -> ApiResponse<Vec<Order>> {
        let request = BrokerRequest::get(Host::Trading, "/v2/orders")
            .query("status", "open")
            .query("symbols", symbol)
            .query("nested", "true");
        let resp = self.execute(request, class).await;
        Self::decode(resp, |raw: Vec<RawOrder>| {
            raw.into_iter().map(RawOrder::into_domain).collect()
        })
    }

    // ===== Orders =====

    pub async fn submit_order(&self, spec: &OrderSpec, class: TokenClass) -> ApiResponse<Order> {
        let body = match serde_json::to_value(OrderRequestBody::from_spec(spec)) {
            Ok(v) => v,
            Err(e) => {
                return ApiResponse::err(
                    0,
                    ErrorKind::InvalidOrder,
                    format!("failed to serialize order request: {}", e),
                    false,
                );
            }
        };
        let resp = self
            .execute(BrokerRequest::post("/v2/orders", body), class)
            .await;
        Self::decode(resp, RawOrder::into_domain)
    }

    /// Cancel one order. The broker acknowledges with 204 and an empty
    /// body; that is a success, not an error.
    pub async fn cancel_order(&self, broker_id: &str) -> ApiResponse<()> {
        let resp = self
            .execute(
                BrokerRequest::delete(format!("/v2/orders/{}", broker_id)),
                TokenClass::Emergency,
            )
            .await;
        if resp.success {
            ApiResponse::ok(resp.status_code, ())
        } else if resp.status_code == 404 {
            // Already terminal on the broker side; treat as done.
            debug!(
                "BrokerGateway: cancel of {} returned 404 (already closed)",
                broker_id
            );
            ApiResponse::ok(resp.status_code, ())
        } else {
            resp.cast_err()
        }
    }

    /// Cancel every open order on a symbol. Returns the orders that were
    /// subject to cancellation.
    pub async fn cancel_all_for(&self, symbol: &str) -> ApiResponse<Vec<Order>> {
        let open = self
            .get_open_orders_for(symbol, TokenClass::Emergency)
            .await;
        if !open.success {
            return open;
        }
        let orders = open.data.unwrap_or_default();
        for order in &orders {
            let ack = self.cancel_order(&order.id).await;
            if !ack.success {
                warn!(
                    "BrokerGateway: cancel failed for {} order {}: {:?}",
                    symbol, order.id, ack.error_message
                );
            }
        }
        ApiResponse::ok(200, orders)
    }

    // ===== Market data =====

    /// Latest quote with freshness enforcement. Quotes older than the bound
    /// come back as `stale_data`; the bound itself is still fresh.
    pub async fn get_latest_quote(&self, symbol: &str) -> ApiResponse<Quote> {
        let resp = self
            .execute(
                BrokerRequest::get(
                    Host::Data,
                    format!("/v2/stocks/{}/quotes/latest", symbol),
                ),
                TokenClass::Normal,
            )
            .await;
        let decoded = Self::decode(resp, RawQuoteEnvelope::into_domain);
        if !decoded.success {
            return decoded;
        }
        let now = Utc::now();
        match decoded.data.as_ref() {
            Some(quote) if quote.is_fresh(now, self.config.stale_quote_max) => {}
            Some(quote) => {
                let age_minutes = quote.age(now).num_minutes();
                return ApiResponse::err(
                    decoded.status_code,
                    ErrorKind::StaleData,
                    format!("quote for {} is {} minutes old", symbol, age_minutes),
                    false,
                );
            }
            None => {
                return ApiResponse::err(
                    decoded.status_code,
                    ErrorKind::StaleData,
                    format!("quote for {} carried no payload", symbol),
                    false,
                );
            }
        }
        decoded
    }

    pub async fn get_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
    ) -> ApiResponse<Vec<Bar>> {
        let request = BrokerRequest::get(Host::Data, format!("/v2/stocks/{}/bars", symbol))
            .query("timeframe", timeframe.as_broker_str())
            .query("limit", limit.to_string());
        let resp = self.execute(request, TokenClass::Normal).await;
        Self::decode(resp, RawBarsEnvelope::into_domain)
    }

    // ===== Broad-scan primitives =====

    pub async fn get_market_movers(&self, top: u32) -> ApiResponse<Vec<MarketMover>> {
        let request = BrokerRequest::get(Host::Data, "/v1beta1/screener/stocks/movers")
            .query("top", top.to_string());
        let resp = self.execute(request, TokenClass::Normal).await;
        Self::decode(resp, |raw: RawMoversEnvelope| {
            raw.gainers
                .into_iter()
                .chain(raw.losers)
                .map(|m| m.into_domain())
                .collect::<Vec<MarketMover>>()
        })
    }

    pub async fn get_most_active(&self, top: u32) -> ApiResponse<Vec<MarketMover>> {
        let request = BrokerRequest::get(Host::Data, "/v1beta1/screener/stocks/most-actives")
            .query("by", "volume")
            .query("top", top.to_string());
        let resp = self.execute(request, TokenClass::Normal).await;
        Self::decode(resp, |raw: RawMostActivesEnvelope| {
            raw.most_actives
                .into_iter()
                .map(|a| MarketMover {
                    symbol: a.symbol,
                    price: 0.0,
                    change_pct: 0.0,
                    volume: a.volume,
                })
                .collect::<Vec<MarketMover>>()
        })
    }

    pub async fn get_news(&self, limit: u32) -> ApiResponse<Vec<NewsItem>> {
        let request =
            BrokerRequest::get(Host::Data, "/v1beta1/news").query("limit", limit.to_string());
        let resp = self.execute(request, TokenClass::Normal).await;
        Self::decode(resp, |raw: RawNewsEnvelope| {
            raw.news
                .into_iter()
                .map(|n| n.into_domain())
                .collect::<Vec<NewsItem>>()
        })
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 512;
    if body.len() <= MAX {
        body.to_string()
    } else {
        format!("{}...", &body[..MAX])
    }
}
