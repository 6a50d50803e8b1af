use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::Config;
use crate::journal::Journal;
use crate::metrics::MetricsCounters;
use crate::upstream::{FetchError, NumberKind, UpstreamFetcher};
use crate::window::WindowStore;

/// Body of a successful `/numbers/{id}` response
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NumbersResponse {
    pub window_prev_state: Vec<i64>,
    pub window_curr_state: Vec<i64>,
    pub numbers: Vec<i64>,
    pub avg: f64,
}

/// Everything a `/numbers/{id}` request can fail with.
/// The message is what ends up in the `{ "error": ... }` body.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid number ID. Use p, f, e, or r.")]
    InvalidIdentifier,

    #[error("Request to third-party API timed out")]
    UpstreamTimeout,

    #[error("API Error: {body}")]
    UpstreamStatus { status: StatusCode, body: String },

    #[error("Error fetching numbers: {0}")]
    Transport(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidIdentifier => StatusCode::BAD_REQUEST,
            ApiError::UpstreamTimeout => StatusCode::REQUEST_TIMEOUT,
            ApiError::UpstreamStatus { status, .. } => *status,
            ApiError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<FetchError> for ApiError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Timeout { .. } => ApiError::UpstreamTimeout,
            FetchError::Upstream { status, body } => ApiError::UpstreamStatus { status, body },
            FetchError::Transport(msg) => ApiError::Transport(msg),
        }
    }
}

/// Core engine - owns the shared window and the upstream fetcher
pub struct NumberEngine {
    pub config: Arc<Config>,
    pub window: Arc<WindowStore>,
    pub upstream: Arc<UpstreamFetcher>,
    pub journal: Arc<Journal>,
    pub metrics: Arc<MetricsCounters>,
}

impl NumberEngine {
    pub fn new(config: Arc<Config>) -> anyhow::Result<Self> {
        let window = Arc::new(WindowStore::new(&config.window));
        let upstream = Arc::new(UpstreamFetcher::new(&config.upstream, &config.credentials)?);
        let journal = Arc::new(Journal::new(&config.journal));
        let metrics = Arc::new(MetricsCounters::new());

        info!("Window initialized (capacity {})", config.window.size);

        Ok(Self {
            config,
            window,
            upstream,
            journal,
            metrics,
        })
    }

    /// Resolve id -> fetch -> merge. The window is only touched after a
    /// successful fetch.
    pub async fn handle_numbers(&self, id: &str) -> Result<NumbersResponse, ApiError> {
        self.metrics.requests_total.fetch_add(1, Ordering::Relaxed);

        let kind = match NumberKind::from_id(id) {
            Some(kind) => kind,
            None => {
                debug!("Rejected number id {:?}", id);
                self.metrics.invalid_id_total.fetch_add(1, Ordering::Relaxed);
                return Err(ApiError::InvalidIdentifier);
            }
        };

        let start = Instant::now();
        let fetched = self.upstream.fetch(kind).await;
        let latency = start.elapsed();

        let numbers = match fetched {
            Ok(numbers) => {
                self.journal.record_fetch(kind, "ok", numbers.len(), latency);
                self.metrics.inc_ok();
                numbers
            }
            Err(e) => {
                self.journal.record_fetch(kind, e.outcome(), 0, latency);
                self.metrics.inc_failure(&e);
                return Err(e.into());
            }
        };

        let outcome = self.window.merge_and_snapshot(&numbers);

        Ok(NumbersResponse {
            window_prev_state: outcome.prev,
            window_curr_state: outcome.curr,
            numbers,
            avg: outcome.average,
        })
    }

    pub fn get_stats(&self) -> serde_json::Value {
        let c = &self.metrics;
        serde_json::json!({
            "uptime_secs": c.start_time.elapsed().as_secs(),
            "requests_total": c.requests_total.load(Ordering::Relaxed),
            "invalid_id_total": c.invalid_id_total.load(Ordering::Relaxed),
            "window": self.window.get_stats(),
            "upstreams": self.upstream.get_stats(),
            "journal": self.journal.get_stats(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::tests::{mock_config, spawn_mock_upstream};

    async fn engine_with_mock() -> (NumberEngine, Arc<std::sync::atomic::AtomicUsize>) {
        let (base, hits) = spawn_mock_upstream().await;
        let config = Config {
            upstream: mock_config(&base),
            ..Config::default()
        };
        (NumberEngine::new(Arc::new(config)).unwrap(), hits)
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(ApiError::InvalidIdentifier.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::UpstreamTimeout.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(ApiError::Transport("x".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
        let e = ApiError::UpstreamStatus {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: "down".into(),
        };
        assert_eq!(e.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(e.to_string(), "API Error: down");
    }

    #[tokio::test]
    async fn test_invalid_id_makes_no_upstream_call() {
        let (engine, hits) = engine_with_mock().await;
        let err = engine.handle_numbers("x").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidIdentifier));
        assert_eq!(err.to_string(), "Invalid number ID. Use p, f, e, or r.");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(engine.window.current().0.is_empty());
    }

    #[tokio::test]
    async fn test_success_merges_into_window() {
        let (engine, _) = engine_with_mock().await;

        let first = engine.handle_numbers("p").await.unwrap();
        assert!(first.window_prev_state.is_empty());
        assert_eq!(first.window_curr_state, vec![2, 3, 5, 7, 11]);
        assert_eq!(first.numbers, vec![2, 3, 5, 7, 11]);
        assert_eq!(first.avg, 5.6);

        // Raw numbers are returned unfiltered, window stays deduplicated
        let second = engine.handle_numbers("f").await.unwrap();
        assert_eq!(second.numbers, vec![1, 1, 2, 3, 5, 8]);
        assert_eq!(second.window_prev_state, vec![2, 3, 5, 7, 11]);
        assert_eq!(second.window_curr_state, vec![2, 3, 5, 7, 11, 1, 8]);
        assert_eq!(second.avg, 5.29);
    }

    #[tokio::test]
    async fn test_timeout_leaves_window_unchanged() {
        let (engine, _) = engine_with_mock().await;
        engine.handle_numbers("p").await.unwrap();

        let err = engine.handle_numbers("r").await.unwrap_err();
        assert!(matches!(err, ApiError::UpstreamTimeout));
        assert_eq!(engine.window.current().0, vec![2, 3, 5, 7, 11]);

        let journal = engine.journal.search(Some("random"), 10);
        assert_eq!(journal[0].outcome, "timeout");
    }

    #[tokio::test]
    async fn test_upstream_error_forwarded() {
        let (engine, _) = engine_with_mock().await;
        let err = engine.handle_numbers("e").await.unwrap_err();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.to_string(), "API Error: provider down");
        assert!(engine.window.current().0.is_empty());
    }

    #[tokio::test]
    async fn test_transport_error_leaves_window_unchanged() {
        let (base, _) = spawn_mock_upstream().await;
        let mut upstream = mock_config(&base);
        upstream.primes = "float".to_string();
        let engine = NumberEngine::new(Arc::new(Config { upstream, ..Config::default() })).unwrap();

        let err = engine.handle_numbers("p").await.unwrap_err();
        assert!(matches!(err, ApiError::Transport(_)));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.to_string().starts_with("Error fetching numbers: "));
        assert!(engine.window.current().0.is_empty());
        assert_eq!(engine.metrics.transport_error_total.load(Ordering::Relaxed), 1);
        assert_eq!(engine.metrics.ok_total.load(Ordering::Relaxed), 0);
    }
}
