use std::sync::Arc;
use axum::{
    Router,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::engine::{ApiError, NumberEngine};
use crate::metrics;

/// HTTP front - `/numbers/{id}` と運用向けの stats API
pub struct WebServer {
    engine: Arc<NumberEngine>,
}

#[derive(Clone)]
struct AppState {
    engine: Arc<NumberEngine>,
}

#[derive(Deserialize)]
struct JournalQuery {
    kind: Option<String>,
    limit: Option<usize>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

impl WebServer {
    pub fn new(engine: Arc<NumberEngine>) -> Self {
        Self { engine }
    }

    pub fn router(&self) -> Router {
        let state = AppState {
            engine: self.engine.clone(),
        };

        Router::new()
            .route("/numbers/:id", get(numbers))
            .route("/api/window", get(api_window))
            .route("/api/stats", get(api_stats))
            .route("/api/journal", get(api_journal))
            .route("/metrics", get(prometheus_metrics))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let listen = &self.engine.config.listen;
        let addr = format!("{}:{}", listen.address, listen.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", addr, e))?;
        info!("🔢 Listening on http://{}", addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}

/// Fetch, merge, report
async fn numbers(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let body = state.engine.handle_numbers(&id).await?;
    Ok(Json(body).into_response())
}

/// Current window without fetching anything
async fn api_window(State(state): State<AppState>) -> Json<serde_json::Value> {
    let (window, avg) = state.engine.window.current();
    Json(serde_json::json!({
        "window": window,
        "avg": avg,
    }))
}

async fn api_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.engine.get_stats())
}

async fn api_journal(
    State(state): State<AppState>,
    Query(params): Query<JournalQuery>,
) -> Json<serde_json::Value> {
    let limit = params.limit.unwrap_or(100);
    let entries = state.engine.journal.search(params.kind.as_deref(), limit);
    Json(serde_json::json!({
        "entries": entries,
        "stats": state.engine.journal.get_stats(),
    }))
}

async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render_metrics(&state.engine),
    )
}
