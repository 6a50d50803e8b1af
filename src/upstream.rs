use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::{Credentials, UpstreamConfig};

/// The four sequences the upstream provider serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumberKind {
    Primes,
    Fibonacci,
    Even,
    Random,
}

impl NumberKind {
    pub const ALL: [NumberKind; 4] = [
        NumberKind::Primes,
        NumberKind::Fibonacci,
        NumberKind::Even,
        NumberKind::Random,
    ];

    /// Parse the short code used in `/numbers/{id}`
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "p" => Some(NumberKind::Primes),
            "f" => Some(NumberKind::Fibonacci),
            "e" => Some(NumberKind::Even),
            "r" => Some(NumberKind::Random),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            NumberKind::Primes => "primes",
            NumberKind::Fibonacci => "fibonacci",
            NumberKind::Even => "even",
            NumberKind::Random => "random",
        }
    }

    fn index(&self) -> usize {
        match self {
            NumberKind::Primes => 0,
            NumberKind::Fibonacci => 1,
            NumberKind::Even => 2,
            NumberKind::Random => 3,
        }
    }
}

impl fmt::Display for NumberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("upstream did not respond within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("upstream returned {status}: {body}")]
    Upstream { status: StatusCode, body: String },

    #[error("{0}")]
    Transport(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::Transport(e.to_string())
    }
}

impl FetchError {
    pub fn outcome(&self) -> &'static str {
        match self {
            FetchError::Timeout { .. } => "timeout",
            FetchError::Upstream { .. } => "upstream_error",
            FetchError::Transport(_) => "transport_error",
        }
    }
}

/// Expected upstream reply. A missing `numbers` field means nothing was returned.
#[derive(Debug, Deserialize)]
struct NumbersReply {
    #[serde(default)]
    numbers: Vec<i64>,
}

/// Endpoint Selector - kind ごとの upstream URL (起動時に固定)
#[derive(Debug, Clone)]
pub struct EndpointSelector {
    urls: [String; 4],
}

impl EndpointSelector {
    pub fn new(config: &UpstreamConfig) -> Self {
        let base = config.base_url.trim_end_matches('/');
        let join = |path: &str| format!("{}/{}", base, path.trim_start_matches('/'));
        Self {
            urls: [
                join(&config.primes),
                join(&config.fibonacci),
                join(&config.even),
                join(&config.random),
            ],
        }
    }

    pub fn url(&self, kind: NumberKind) -> &str {
        &self.urls[kind.index()]
    }
}

/// Per-kind statistics
struct KindStats {
    total_requests: AtomicU64,
    total_failures: AtomicU64,
    total_timeouts: AtomicU64,
    latency_history: RwLock<Vec<Duration>>, // Recent latencies
}

impl KindStats {
    fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_timeouts: AtomicU64::new(0),
            latency_history: RwLock::new(Vec::new()),
        }
    }
}

pub struct UpstreamFetcher {
    client: Client,
    endpoints: EndpointSelector,
    headers: HeaderMap,
    timeout: Duration,
    stats: [KindStats; 4],
}

impl UpstreamFetcher {
    pub fn new(config: &UpstreamConfig, credentials: &Credentials) -> anyhow::Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;

        let endpoints = EndpointSelector::new(config);
        for kind in NumberKind::ALL {
            debug!("Upstream {} -> {}", kind, endpoints.url(kind));
        }
        info!(
            "Upstream fetcher initialized ({}, timeout {}ms)",
            config.base_url, config.timeout_ms
        );

        Ok(Self {
            client,
            endpoints,
            headers: build_headers(credentials)?,
            timeout: Duration::from_millis(config.timeout_ms),
            stats: [KindStats::new(), KindStats::new(), KindStats::new(), KindStats::new()],
        })
    }

    /// Fetch one batch of numbers. Exactly one attempt, no retry.
    pub async fn fetch(&self, kind: NumberKind) -> Result<Vec<i64>, FetchError> {
        let start = Instant::now();
        let stats = &self.stats[kind.index()];
        stats.total_requests.fetch_add(1, Ordering::Relaxed);

        let result = self.fetch_inner(kind).await;
        let latency = start.elapsed();

        match result {
            Ok(numbers) => {
                self.record_latency(kind, latency);
                debug!("{} returned {} numbers in {:?}", kind, numbers.len(), latency);
                Ok(numbers)
            }
            Err(e) => {
                stats.total_failures.fetch_add(1, Ordering::Relaxed);
                if matches!(e, FetchError::Timeout { .. }) {
                    stats.total_timeouts.fetch_add(1, Ordering::Relaxed);
                }
                debug!("{} failed after {:?}: {} ({})", kind, latency, e, e.outcome());
                Err(e)
            }
        }
    }

    async fn fetch_inner(&self, kind: NumberKind) -> Result<Vec<i64>, FetchError> {
        let request = self.client
            .get(self.endpoints.url(kind))
            .headers(self.headers.clone())
            .send();

        // Deadline covers the wait for the response head only. On expiry the
        // request future is dropped, which aborts the connection.
        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| FetchError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            })??;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            warn!("Upstream {} error ({}): {}", kind, status.as_u16(), body);
            return Err(FetchError::Upstream { status, body });
        }

        let reply: NumbersReply = response.json().await?;
        Ok(reply.numbers)
    }

    fn record_latency(&self, kind: NumberKind, latency: Duration) {
        let mut history = self.stats[kind.index()].latency_history.write();
        history.push(latency);
        // Keep last 100 entries
        if history.len() > 100 {
            let drain_to = history.len() - 100;
            history.drain(..drain_to);
        }
    }

    /// Get upstream stats for the stats API
    pub fn get_stats(&self) -> serde_json::Value {
        let kinds: Vec<serde_json::Value> = NumberKind::ALL.iter().map(|&kind| {
            let s = &self.stats[kind.index()];
            let history = s.latency_history.read();
            let avg_latency = if history.is_empty() {
                0.0
            } else {
                history.iter().map(|d| d.as_millis() as f64).sum::<f64>() / history.len() as f64
            };

            serde_json::json!({
                "kind": kind.name(),
                "url": self.endpoints.url(kind),
                "total_requests": s.total_requests.load(Ordering::Relaxed),
                "total_failures": s.total_failures.load(Ordering::Relaxed),
                "total_timeouts": s.total_timeouts.load(Ordering::Relaxed),
                "avg_latency_ms": avg_latency,
            })
        }).collect();

        serde_json::json!(kinds)
    }
}

fn build_headers(credentials: &Credentials) -> anyhow::Result<HeaderMap> {
    let value = |v: &str| {
        HeaderValue::from_str(v)
            .map_err(|e| anyhow::anyhow!("Invalid credential header value: {}", e))
    };

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(AUTHORIZATION, value(&format!("Bearer {}", credentials.access_token))?);
    // Header names are case-insensitive; `http` only accepts lowercase statics
    headers.insert("clientid", value(&credentials.client_id)?);
    headers.insert("clientsecret", value(&credentials.client_secret)?);
    Ok(headers)
}
