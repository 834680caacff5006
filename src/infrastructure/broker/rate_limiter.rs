use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Priority of a rate-limit token request. The emergency reserve is usable
/// only by cancellation and liquidation calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenClass {
    Normal,
    Emergency,
}

/// Sliding one-minute window limiter.
///
/// Normal calls see `floor(per_minute x utilization)` tokens; emergency
/// calls see that budget plus the reserve. A caller over budget sleeps until
/// the oldest relevant timestamp rolls out of the window.
pub struct RateLimiter {
    window: Duration,
    usable: usize,
    reserve: usize,
    stamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(per_minute: u32, utilization: f64, reserve: usize) -> Self {
        let usable = ((per_minute as f64) * utilization).floor().max(1.0) as usize;
        Self {
            window: Duration::from_secs(60),
            usable,
            reserve,
            stamps: Mutex::new(VecDeque::with_capacity(usable + reserve)),
        }
    }

    pub fn usable(&self) -> usize {
        self.usable
    }

    fn budget(&self, class: TokenClass) -> usize {
        match class {
            TokenClass::Normal => self.usable,
            TokenClass::Emergency => self.usable + self.reserve,
        }
    }

    /// Take one token, sleeping until the window rolls when over budget.
    pub async fn acquire(&self, class: TokenClass) {
        loop {
            let wait = {
                let mut stamps = self.stamps.lock().await;
                let now = Instant::now();
                loop {
                    match stamps.front() {
                        Some(front) if now.duration_since(*front) >= self.window => {
                            stamps.pop_front();
                        }
                        _ => break,
                    }
                }

                let budget = self.budget(class);
                if stamps.len() < budget {
                    stamps.push_back(now);
                    return;
                }

                // The stamp whose expiry brings the count back under budget.
                let idx = stamps.len() - budget;
                let expiry = stamps[idx] + self.window;
                expiry.saturating_duration_since(now)
            };

            debug!(
                "RateLimiter: window saturated ({:?} token), sleeping {:?}",
                class, wait
            );
            tokio::time::sleep(wait.max(Duration::from_millis(10))).await;
        }
    }

    /// Calls currently inside the sliding window.
    pub async fn window_len(&self) -> usize {
        let mut stamps = self.stamps.lock().await;
        let now = Instant::now();
        loop {
            match stamps.front() {
                Some(front) if now.duration_since(*front) >= self.window => {
                    stamps.pop_front();
                }
                _ => break,
            }
        }
        stamps.len()
    }
}
