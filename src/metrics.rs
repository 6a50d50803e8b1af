//! Prometheus-compatible metrics exporter for number-window
//!
//! Endpoint: GET /metrics (on the listen port, default 9876)

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::engine::NumberEngine;
use crate::upstream::FetchError;

/// Counters updated from request handling
pub struct MetricsCounters {
    /// Total `/numbers/{id}` requests received
    pub requests_total: AtomicU64,
    /// Requests rejected for an unknown id
    pub invalid_id_total: AtomicU64,
    /// Responses by outcome
    pub ok_total: AtomicU64,
    pub timeout_total: AtomicU64,
    pub upstream_error_total: AtomicU64,
    pub transport_error_total: AtomicU64,
    /// Server start time
    pub start_time: Instant,
}

impl MetricsCounters {
    pub fn new() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            invalid_id_total: AtomicU64::new(0),
            ok_total: AtomicU64::new(0),
            timeout_total: AtomicU64::new(0),
            upstream_error_total: AtomicU64::new(0),
            transport_error_total: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    #[inline]
    pub fn inc_ok(&self) {
        self.ok_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_failure(&self, error: &FetchError) {
        let counter = match error {
            FetchError::Timeout { .. } => &self.timeout_total,
            FetchError::Upstream { .. } => &self.upstream_error_total,
            FetchError::Transport(_) => &self.transport_error_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Generate Prometheus-format metrics text
pub fn render_metrics(engine: &NumberEngine) -> String {
    let mut out = String::with_capacity(4096);
    let c = &engine.metrics;

    // ──────────────────────────────────────────────
    // Server info
    // ──────────────────────────────────────────────
    write_help_type(&mut out, "numwin_up", "Whether the service is up.", "gauge");
    writeln!(out, "numwin_up 1").ok();

    let uptime = c.start_time.elapsed().as_secs_f64();
    write_help_type(&mut out, "numwin_time_up_seconds_total", "Uptime since start in seconds.", "counter");
    writeln!(out, "numwin_time_up_seconds_total {:.3}", uptime).ok();

    // ──────────────────────────────────────────────
    // Requests
    // ──────────────────────────────────────────────
    write_help_type(&mut out, "numwin_requests_total", "Total number of /numbers requests received.", "counter");
    writeln!(out, "numwin_requests_total {}", c.requests_total.load(Ordering::Relaxed)).ok();

    write_help_type(&mut out, "numwin_invalid_id_total", "Requests rejected for an unknown number id.", "counter");
    writeln!(out, "numwin_invalid_id_total {}", c.invalid_id_total.load(Ordering::Relaxed)).ok();

    write_help_type(&mut out, "numwin_fetch_outcomes_total", "Upstream fetches by outcome.", "counter");
    writeln!(out, "numwin_fetch_outcomes_total{{outcome=\"ok\"}} {}", c.ok_total.load(Ordering::Relaxed)).ok();
    writeln!(out, "numwin_fetch_outcomes_total{{outcome=\"timeout\"}} {}", c.timeout_total.load(Ordering::Relaxed)).ok();
    writeln!(out, "numwin_fetch_outcomes_total{{outcome=\"upstream_error\"}} {}", c.upstream_error_total.load(Ordering::Relaxed)).ok();
    writeln!(out, "numwin_fetch_outcomes_total{{outcome=\"transport_error\"}} {}", c.transport_error_total.load(Ordering::Relaxed)).ok();

    // ──────────────────────────────────────────────
    // Per-kind upstream stats
    // ──────────────────────────────────────────────
    write_help_type(&mut out, "numwin_upstream_requests", "Total requests per number kind.", "counter");
    write_help_type(&mut out, "numwin_upstream_failures", "Total failures per number kind.", "counter");
    write_help_type(&mut out, "numwin_upstream_avg_latency_ms", "Average successful latency in ms per number kind.", "gauge");

    let upstream_stats = engine.upstream.get_stats();
    if let Some(arr) = upstream_stats.as_array() {
        for u in arr {
            let kind = u["kind"].as_str().unwrap_or("unknown");
            let tr = u["total_requests"].as_u64().unwrap_or(0);
            let tf = u["total_failures"].as_u64().unwrap_or(0);
            let lat = u["avg_latency_ms"].as_f64().unwrap_or(0.0);
            writeln!(out, "numwin_upstream_requests{{kind=\"{}\"}} {}", kind, tr).ok();
            writeln!(out, "numwin_upstream_failures{{kind=\"{}\"}} {}", kind, tf).ok();
            writeln!(out, "numwin_upstream_avg_latency_ms{{kind=\"{}\"}} {:.1}", kind, lat).ok();
        }
    }

    // ──────────────────────────────────────────────
    // Window
    // ──────────────────────────────────────────────
    let window_stats = engine.window.get_stats();
    let (_, avg) = engine.window.current();

    write_help_type(&mut out, "numwin_window_size", "Numbers currently held in the window.", "gauge");
    writeln!(out, "numwin_window_size {}", window_stats["size"].as_u64().unwrap_or(0)).ok();

    write_help_type(&mut out, "numwin_window_capacity", "Maximum window size.", "gauge");
    writeln!(out, "numwin_window_capacity {}", window_stats["capacity"].as_u64().unwrap_or(0)).ok();

    write_help_type(&mut out, "numwin_window_average", "Current window average.", "gauge");
    writeln!(out, "numwin_window_average {:.2}", avg).ok();

    write_help_type(&mut out, "numwin_window_evictions_total", "Numbers evicted from the window.", "counter");
    writeln!(out, "numwin_window_evictions_total {}", window_stats["evictions"].as_u64().unwrap_or(0)).ok();

    write_help_type(&mut out, "numwin_window_duplicates_total", "Incoming numbers skipped as duplicates.", "counter");
    writeln!(out, "numwin_window_duplicates_total {}", window_stats["duplicates_skipped"].as_u64().unwrap_or(0)).ok();

    write_help_type(&mut out, "numwin_build_info", "number-window build information.", "gauge");
    writeln!(out, "numwin_build_info{{version=\"{}\"}} 1", env!("CARGO_PKG_VERSION")).ok();

    out
}

// ── helpers ─────────────────────────────────────────

fn write_help_type(out: &mut String, name: &str, help: &str, metric_type: &str) {
    writeln!(out, "# HELP {} {}", name, help).ok();
    writeln!(out, "# TYPE {} {}", name, metric_type).ok();
}
