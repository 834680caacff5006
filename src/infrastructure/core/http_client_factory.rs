use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use std::time::Duration;

pub struct HttpClientFactory;

impl HttpClientFactory {
    /// Plain pooled client with request deadlines. The broker gateway owns
    /// its own retry policy (retry counts are a rate-limit accounting
    /// concern there), so no retry middleware here.
    pub fn create_broker_client(request_timeout: Duration) -> Client {
        Client::builder()
            .pool_max_idle_per_host(5)
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new())
    }

    /// Client with transient-retry middleware for advisory calls (the
    /// intelligence oracle), where automatic retries are harmless.
    pub fn create_advisory_client(request_timeout: Duration) -> ClientWithMiddleware {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);

        let client = Client::builder()
            .pool_max_idle_per_host(2)
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| Client::new());

        ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build()
    }
}
