//! Shared test plumbing: a scripted route-based broker transport.

use async_trait::async_trait;
use diptrader::infrastructure::broker::gateway::{
    BrokerRequest, BrokerTransport, HttpMethod, RawResponse, TransportError,
};
use std::collections::VecDeque;
use std::sync::Mutex;

struct Route {
    method: HttpMethod,
    path_needle: String,
    body_needle: Option<String>,
    /// Responses served in order; the last one repeats.
    queue: VecDeque<(u16, String)>,
}

/// Routes requests by method + path substring (and optionally a body
/// substring), serving scripted responses. Unmatched requests get a 404 so
/// a missing script shows up as a loud test failure, not a hang.
#[derive(Default)]
pub struct RouteMock {
    routes: Mutex<Vec<Route>>,
    log: Mutex<Vec<(HttpMethod, String, String)>>,
}

impl RouteMock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, method: HttpMethod, path_needle: &str, status: u16, body: &str) {
        self.on_seq(method, path_needle, vec![(status, body.to_string())]);
    }

    pub fn on_seq(&self, method: HttpMethod, path_needle: &str, responses: Vec<(u16, String)>) {
        self.routes.lock().unwrap().push(Route {
            method,
            path_needle: path_needle.to_string(),
            body_needle: None,
            queue: responses.into(),
        });
    }

    pub fn on_body(
        &self,
        method: HttpMethod,
        path_needle: &str,
        body_needle: &str,
        responses: Vec<(u16, String)>,
    ) {
        self.routes.lock().unwrap().push(Route {
            method,
            path_needle: path_needle.to_string(),
            body_needle: Some(body_needle.to_string()),
            queue: responses.into(),
        });
    }

    /// Requests whose path contained `needle`.
    pub fn calls(&self, needle: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, path, _)| path.contains(needle))
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    /// Bodies of POST requests whose path contained `needle`.
    pub fn bodies(&self, needle: &str) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(method, path, _)| *method == HttpMethod::Post && path.contains(needle))
            .map(|(_, _, body)| body.clone())
            .collect()
    }
}

/// Path with the query rendered back in, so route needles can target
/// parameters the same way they target path segments.
fn rendered_path(request: &BrokerRequest) -> String {
    if request.query.is_empty() {
        return request.path.clone();
    }
    let query_string = request
        .query
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}?{}", request.path, query_string)
}

#[async_trait]
impl BrokerTransport for RouteMock {
    async fn send(&self, request: &BrokerRequest) -> Result<RawResponse, TransportError> {
        let path = rendered_path(request);
        let body = request
            .body
            .as_ref()
            .map(|b| b.to_string())
            .unwrap_or_default();
        self.log
            .lock()
            .unwrap()
            .push((request.method, path.clone(), body.clone()));

        let mut routes = self.routes.lock().unwrap();
        for route in routes.iter_mut() {
            if route.method != request.method || !path.contains(&route.path_needle) {
                continue;
            }
            if let Some(needle) = &route.body_needle
                && !body.contains(needle.as_str())
            {
                continue;
            }
            let response = if route.queue.len() > 1 {
                route.queue.pop_front()
            } else {
                route.queue.front().cloned()
            };
            if let Some((status, payload)) = response {
                return Ok(RawResponse {
                    status,
                    body: payload,
                });
            }
        }

        Ok(RawResponse {
            status: 404,
            body: format!("no scripted route for {} {:?}", path, request.method),
        })
    }
}

/// A 30-bar daily history ending near `last_close`, as a broker payload.
pub fn daily_bars_json(last_close: f64) -> String {
    let mut bars = Vec::new();
    for i in 0..30 {
        let close = last_close - (29 - i) as f64 * 0.3;
        bars.push(format!(
            r#"{{"t":"2025-06-{:02}T20:00:00Z","o":{:.2},"h":{:.2},"l":{:.2},"c":{:.2},"v":1500000}}"#,
            (i % 28) + 1,
            close - 0.2,
            close + 0.8,
            close - 0.9,
            close
        ));
    }
    format!(r#"{{"bars":[{}]}}"#, bars.join(","))
}

/// A fresh two-sided quote payload.
pub fn quote_json(bid: f64, ask: f64, timestamp: chrono::DateTime<chrono::Utc>) -> String {
    format!(
        r#"{{"symbol":"X","quote":{{"bp":{:.2},"ap":{:.2},"bs":4,"as":2,"t":"{}"}}}}"#,
        bid,
        ask,
        timestamp.to_rfc3339()
    )
}
