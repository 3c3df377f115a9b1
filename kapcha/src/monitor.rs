//! Per-operation timing instrumentation.
//!
//! The engine records every operation it performs (preprocessing, inference
//! per type, whole recognitions) with its duration and outcome. Stats are
//! aggregated over a bounded window of recent samples plus lifetime counters
//! and surface through the stats endpoint.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

struct OpMetrics {
    count: u64,
    failures: u64,
    min: Duration,
    max: Duration,
    recent: VecDeque<Duration>,
}

impl OpMetrics {
    fn new() -> Self {
        Self {
            count: 0,
            failures: 0,
            min: Duration::MAX,
            max: Duration::ZERO,
            recent: VecDeque::new(),
        }
    }
}

/// Aggregated view of one operation. Field names serialize as camelCase on
/// the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpStats {
    pub name: String,
    pub count: u64,
    pub failures: u64,
    /// Mean over the recent window, milliseconds.
    pub avg_ms: f64,
    /// 95th percentile over the recent window, milliseconds.
    pub p95_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

/// Thread-safe operation timing collector with a bounded sample window per
/// operation.
pub struct PerformanceMonitor {
    window: usize,
    ops: Mutex<HashMap<String, OpMetrics>>,
}

impl PerformanceMonitor {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            ops: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(&self, operation: &str, elapsed: Duration, success: bool) {
        let mut ops = self.ops.lock().unwrap();
        let metrics = ops
            .entry(operation.to_string())
            .or_insert_with(OpMetrics::new);

        metrics.count += 1;
        if !success {
            metrics.failures += 1;
        }
        metrics.min = metrics.min.min(elapsed);
        metrics.max = metrics.max.max(elapsed);
        metrics.recent.push_back(elapsed);
        while metrics.recent.len() > self.window {
            metrics.recent.pop_front();
        }
    }

    /// Point-in-time stats for every recorded operation, sorted by name.
    pub fn snapshot(&self) -> Vec<OpStats> {
        let ops = self.ops.lock().unwrap();
        let mut stats: Vec<OpStats> = ops
            .iter()
            .map(|(name, metrics)| {
                let mut window: Vec<Duration> = metrics.recent.iter().copied().collect();
                window.sort_unstable();

                let avg = if window.is_empty() {
                    Duration::ZERO
                } else {
                    window.iter().sum::<Duration>() / window.len() as u32
                };
                let p95 = percentile(&window, 0.95);

                OpStats {
                    name: name.clone(),
                    count: metrics.count,
                    failures: metrics.failures,
                    avg_ms: to_ms(avg),
                    p95_ms: to_ms(p95),
                    min_ms: to_ms(if metrics.min == Duration::MAX {
                        Duration::ZERO
                    } else {
                        metrics.min
                    }),
                    max_ms: to_ms(metrics.max),
                }
            })
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }
}

/// Nearest-rank percentile over an ascending-sorted slice.
fn percentile(sorted: &[Duration], q: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let rank = ((sorted.len() as f64) * q).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

fn to_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
