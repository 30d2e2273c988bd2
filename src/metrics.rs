//! Dispatch observability: per-stage latency windows and event counters.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

/// Samples kept per stage; older ones fall out of the percentiles.
const WINDOW: usize = 1024;

/// Times one dispatch stage. The elapsed time is recorded when the timer is
/// dropped, on success and error paths alike.
#[must_use = "the stage is recorded when the timer drops"]
pub struct StageTimer {
    stage: &'static str,
    started: Instant,
    registry: Arc<MetricsRegistry>,
}

impl StageTimer {
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        self.registry.record(self.stage, self.started.elapsed());
    }
}

/// Latest latency samples of one stage, in microseconds.
#[derive(Default)]
struct LatencyWindow {
    samples: VecDeque<u64>,
}

impl LatencyWindow {
    fn push(&mut self, micros: u64) {
        if self.samples.len() == WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(micros);
    }

    fn summarize(&self) -> MetricSummary {
        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        let rank = |q: f64| match sorted.len() {
            0 => 0.0,
            n => sorted[((q * (n - 1) as f64).round() as usize).min(n - 1)] as f64,
        };
        MetricSummary {
            p50_us: rank(0.50),
            p95_us: rank(0.95),
            p99_us: rank(0.99),
            count: sorted.len(),
        }
    }
}

#[derive(Default)]
struct Tallies {
    latencies: HashMap<&'static str, LatencyWindow>,
    counters: HashMap<&'static str, u64>,
}

#[derive(Default)]
pub struct MetricsRegistry {
    tallies: Mutex<Tallies>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, stage: &'static str, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.tallies
            .lock()
            .latencies
            .entry(stage)
            .or_default()
            .push(micros);
        tracing::trace!(stage, micros, "stage timed");
    }

    pub fn increment(&self, name: &'static str) {
        *self.tallies.lock().counters.entry(name).or_default() += 1;
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.tallies.lock().counters.get(name).copied().unwrap_or(0)
    }

    /// Start timing `stage`; see [`StageTimer`].
    pub fn time(self: &Arc<Self>, stage: &'static str) -> StageTimer {
        StageTimer {
            stage,
            started: Instant::now(),
            registry: Arc::clone(self),
        }
    }

    /// p50/p95/p99 per timed stage.
    pub fn summary(&self) -> HashMap<String, MetricSummary> {
        self.tallies
            .lock()
            .latencies
            .iter()
            .map(|(stage, window)| (stage.to_string(), window.summarize()))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricSummary {
    pub p50_us: f64,
    pub p95_us: f64,
    pub p99_us: f64,
    pub count: usize,
}

pub mod metric_names {
    pub const CACHE_HIT: &str = "completion_cache_hit";
    pub const CACHE_MISS: &str = "completion_cache_miss";
    pub const CACHE_READ_ERROR: &str = "completion_cache_read_error";
    pub const CACHE_WRITE_ERROR: &str = "completion_cache_write_error";
    pub const UPSTREAM_ERROR: &str = "completion_upstream_error";
    pub const T_CACHE_LOOKUP: &str = "t_cache_lookup";
    pub const T_UPSTREAM: &str = "t_upstream";
    pub const T_COMPLETE: &str = "t_complete";
}
