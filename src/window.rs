use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::config::WindowConfig;

/// Sliding Window - 重複なし・固定長の FIFO
///
/// 新しい値は末尾に追加され、満杯なら一番古い値 (先頭) が追い出される。
/// 既に含まれている値はスキップ (並び替えもしない)。
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    order: VecDeque<i64>,
    members: HashSet<i64>,
    capacity: usize,
}

/// Per-merge tally, used for stats
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeTally {
    pub accepted: u64,
    pub duplicates: u64,
    pub evicted: u64,
}

impl SlidingWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: i64, tally: &mut MergeTally) {
        if self.members.contains(&value) {
            tally.duplicates += 1;
            return;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
                tally.evicted += 1;
            }
        }
        self.order.push_back(value);
        self.members.insert(value);
        tally.accepted += 1;
    }

    pub fn snapshot(&self) -> Vec<i64> {
        self.order.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Mean rounded to 2 decimals; an empty window averages to 0.0
    pub fn average(&self) -> f64 {
        if self.order.is_empty() {
            return 0.0;
        }
        let sum: i128 = self.order.iter().map(|&n| n as i128).sum();
        round2(sum as f64 / self.order.len() as f64)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Result of one merge: window before, window after, and the new average
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub prev: Vec<i64>,
    pub curr: Vec<i64>,
    pub average: f64,
}

/// Process-wide window shared by all requests.
/// Merge runs entirely under one lock so concurrent requests never interleave.
pub struct WindowStore {
    window: Mutex<SlidingWindow>,
    merges: AtomicU64,
    accepted: AtomicU64,
    duplicates: AtomicU64,
    evictions: AtomicU64,
    last_merge_at: RwLock<Option<DateTime<Utc>>>,
}

impl WindowStore {
    pub fn new(config: &WindowConfig) -> Self {
        Self {
            window: Mutex::new(SlidingWindow::new(config.size)),
            merges: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            last_merge_at: RwLock::new(None),
        }
    }

    pub fn merge_and_snapshot(&self, numbers: &[i64]) -> MergeOutcome {
        let mut tally = MergeTally::default();
        let outcome = {
            let mut window = self.window.lock();
            let prev = window.snapshot();
            for &n in numbers {
                window.push(n, &mut tally);
            }
            MergeOutcome {
                prev,
                curr: window.snapshot(),
                average: window.average(),
            }
        };

        self.merges.fetch_add(1, Ordering::Relaxed);
        self.accepted.fetch_add(tally.accepted, Ordering::Relaxed);
        self.duplicates.fetch_add(tally.duplicates, Ordering::Relaxed);
        self.evictions.fetch_add(tally.evicted, Ordering::Relaxed);
        *self.last_merge_at.write() = Some(Utc::now());

        debug!(
            "Merged {} numbers: +{} accepted, {} duplicate, {} evicted",
            numbers.len(), tally.accepted, tally.duplicates, tally.evicted
        );
        outcome
    }

    /// Read-only view of the current window and its average
    pub fn current(&self) -> (Vec<i64>, f64) {
        let window = self.window.lock();
        (window.snapshot(), window.average())
    }

    pub fn get_stats(&self) -> serde_json::Value {
        let (size, capacity) = {
            let window = self.window.lock();
            (window.len(), window.capacity())
        };
        let last_merge = self.last_merge_at.read()
            .map(|t| t.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string());

        serde_json::json!({
            "size": size,
            "capacity": capacity,
            "merges": self.merges.load(Ordering::Relaxed),
            "accepted": self.accepted.load(Ordering::Relaxed),
            "duplicates_skipped": self.duplicates.load(Ordering::Relaxed),
            "evictions": self.evictions.load(Ordering::Relaxed),
            "last_merge_at": last_merge,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn store(size: usize) -> WindowStore {
        WindowStore::new(&WindowConfig { size })
    }

    #[test]
    fn test_fill_empty_window() {
        let store = store(10);
        let out = store.merge_and_snapshot(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        assert!(out.prev.is_empty());
        assert_eq!(out.curr, (1..=10).collect::<Vec<_>>());
        assert_eq!(out.average, 5.5);
    }

    #[test]
    fn test_full_window_evicts_oldest() {
        let store = store(10);
        store.merge_and_snapshot(&(1..=10).collect::<Vec<_>>());
        let out = store.merge_and_snapshot(&[11]);
        assert_eq!(out.prev, (1..=10).collect::<Vec<_>>());
        assert_eq!(out.curr, (2..=11).collect::<Vec<_>>());
        assert_eq!(out.average, 6.5);
    }

    #[test]
    fn test_duplicates_skipped() {
        let store = store(10);
        store.merge_and_snapshot(&[1, 2, 3]);
        let out = store.merge_and_snapshot(&[2, 2, 4]);
        assert_eq!(out.prev, vec![1, 2, 3]);
        assert_eq!(out.curr, vec![1, 2, 3, 4]);
        assert_eq!(out.average, 2.5);
    }

    #[test]
    fn test_repeated_value_in_one_batch() {
        let store = store(10);
        let out = store.merge_and_snapshot(&[5, 5, 5]);
        assert_eq!(out.curr, vec![5]);
        assert_eq!(out.average, 5.0);
    }

    #[test]
    fn test_existing_value_not_reordered() {
        let store = store(3);
        store.merge_and_snapshot(&[1, 2, 3]);
        // 1 is already present, so it stays oldest and is the one evicted
        let out = store.merge_and_snapshot(&[1, 4]);
        assert_eq!(out.curr, vec![2, 3, 4]);
    }

    #[test]
    fn test_batch_larger_than_capacity() {
        let store = store(3);
        let out = store.merge_and_snapshot(&[1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(out.curr, vec![5, 6, 7]);
        assert_eq!(out.average, 6.0);
    }

    #[test]
    fn test_empty_window_average_is_zero() {
        let store = store(10);
        let out = store.merge_and_snapshot(&[]);
        assert!(out.curr.is_empty());
        assert_eq!(out.average, 0.0);
    }

    #[test]
    fn test_average_rounding() {
        let store = store(10);
        let out = store.merge_and_snapshot(&[1, 2, 2, 4]);
        // (1 + 2 + 4) / 3 = 2.333...
        assert_eq!(out.average, 2.33);
    }

    #[test]
    fn test_negative_numbers() {
        let store = store(10);
        let out = store.merge_and_snapshot(&[-3, 0, 4]);
        assert_eq!(out.average, 0.33);
    }

    #[test]
    fn test_invariants_over_many_merges() {
        let store = store(10);
        let mut prev_curr: Vec<i64> = Vec::new();
        for round in 0..50i64 {
            let batch: Vec<i64> = (0..7).map(|i| (round * 3 + i * 5) % 23).collect();
            let out = store.merge_and_snapshot(&batch);

            assert_eq!(out.prev, prev_curr, "prev must equal last curr");
            assert!(out.curr.len() <= 10);
            let unique: HashSet<_> = out.curr.iter().collect();
            assert_eq!(unique.len(), out.curr.len(), "no duplicates");

            // Survivors from prev keep their relative order
            let survivors: Vec<i64> = out.prev.iter().copied()
                .filter(|n| out.curr.contains(n))
                .collect();
            assert_eq!(&out.curr[..survivors.len()], &survivors[..]);

            let mean = out.curr.iter().sum::<i64>() as f64 / out.curr.len() as f64;
            assert_eq!(out.average, (mean * 100.0).round() / 100.0);
            prev_curr = out.curr;
        }
    }

    #[test]
    fn test_stats_track_merges() {
        let store = store(2);
        store.merge_and_snapshot(&[1, 1, 2, 3]);
        let stats = store.get_stats();
        assert_eq!(stats["size"], 2);
        assert_eq!(stats["capacity"], 2);
        assert_eq!(stats["merges"], 1);
        assert_eq!(stats["accepted"], 3);
        assert_eq!(stats["duplicates_skipped"], 1);
        assert_eq!(stats["evictions"], 1);
        assert!(stats["last_merge_at"].is_string());
    }

    #[test]
    fn test_concurrent_merges_do_not_tear() {
        let store = Arc::new(store(10));
        let handles: Vec<_> = (0..8i64)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..100i64 {
                        let out = store.merge_and_snapshot(&[t * 1000 + i, t * 1000 + i + 1]);
                        assert!(out.curr.len() <= 10);
                        assert!(out.curr.ends_with(&[t * 1000 + i + 1]));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let (window, _) = store.current();
        assert_eq!(window.len(), 10);
    }
}
