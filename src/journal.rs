use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use chrono::Utc;
use parking_lot::RwLock;

use crate::config::JournalConfig;
use crate::upstream::NumberKind;

/// Fetch Journal - upstream 呼び出しを全部記録するリングバッファ
///
/// 「さっきの timeout はどの kind だった？」が引ける。
#[derive(Debug, Clone, serde::Serialize)]
pub struct JournalEntry {
    pub timestamp: String,
    pub kind: String,
    pub outcome: String,
    pub numbers_received: usize,
    pub latency_us: u64,
}

pub struct Journal {
    config: JournalConfig,
    entries: RwLock<Vec<JournalEntry>>,
    total_recorded: AtomicU64,
}

impl Journal {
    pub fn new(config: &JournalConfig) -> Self {
        Self {
            config: config.clone(),
            entries: RwLock::new(Vec::new()),
            total_recorded: AtomicU64::new(0),
        }
    }

    /// Record one upstream call
    pub fn record_fetch(
        &self,
        kind: NumberKind,
        outcome: &str,
        numbers_received: usize,
        latency: Duration,
    ) {
        if !self.config.enabled {
            return;
        }

        let entry = JournalEntry {
            timestamp: Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            kind: kind.name().to_string(),
            outcome: outcome.to_string(),
            numbers_received,
            latency_us: latency.as_micros() as u64,
        };

        let mut entries = self.entries.write();
        entries.push(entry);
        self.total_recorded.fetch_add(1, Ordering::Relaxed);

        // Rotation: keep within max_entries
        if entries.len() > self.config.max_entries {
            let drain_count = entries.len() - self.config.max_entries;
            entries.drain(..drain_count);
        }
    }

    /// Most recent first, optionally filtered by kind name
    pub fn search(&self, kind: Option<&str>, limit: usize) -> Vec<JournalEntry> {
        let entries = self.entries.read();
        entries.iter()
            .rev()
            .filter(|e| kind.map_or(true, |k| e.kind == k))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn get_stats(&self) -> serde_json::Value {
        let entries = self.entries.read();
        serde_json::json!({
            "enabled": self.config.enabled,
            "current_entries": entries.len(),
            "max_entries": self.config.max_entries,
            "total_recorded": self.total_recorded.load(Ordering::Relaxed),
        })
    }
}
