//! Metrics collection utilities.
//!
//! Aggregates global and per-source attempt statistics with latency
//! percentiles for the end-of-run summary.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::scheduler::AttemptStatus;

/// Aggregated metrics across all sources.
#[derive(Debug, Clone)]
pub struct GlobalStats {
    pub started_at: DateTime<Utc>,
    pub total_attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub average_latency: Option<Duration>,
    pub p95_latency: Option<Duration>,
}

impl Default for GlobalStats {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            total_attempts: 0,
            successes: 0,
            failures: 0,
            average_latency: None,
            p95_latency: None,
        }
    }
}

/// Source-scoped metrics snapshot.
#[derive(Debug, Clone)]
pub struct SourceStats {
    pub source: String,
    pub attempts: u64,
    pub successes: u64,
    pub blocked: u64,
    pub timeouts: u64,
    pub errors: u64,
    pub average_latency: Option<Duration>,
    pub p95_latency: Option<Duration>,
    pub consecutive_failures: u32,
    pub last_http_status: Option<u16>,
}

impl SourceStats {
    fn from_accumulator(source: &str, acc: &SourceAccumulator) -> Self {
        let (avg, p95) = acc.latency_stats();
        Self {
            source: source.to_string(),
            attempts: acc.attempts,
            successes: acc.successes,
            blocked: acc.blocked,
            timeouts: acc.timeouts,
            errors: acc.errors,
            average_latency: avg,
            p95_latency: p95,
            consecutive_failures: acc.consecutive_failures,
            last_http_status: acc.last_http_status,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub global: GlobalStats,
    pub sources: Vec<SourceStats>,
}

#[derive(Debug)]
struct SourceAccumulator {
    attempts: u64,
    successes: u64,
    blocked: u64,
    timeouts: u64,
    errors: u64,
    latencies: VecDeque<Duration>,
    max_window: usize,
    consecutive_failures: u32,
    last_http_status: Option<u16>,
}

impl SourceAccumulator {
    fn new(max_window: usize) -> Self {
        Self {
            attempts: 0,
            successes: 0,
            blocked: 0,
            timeouts: 0,
            errors: 0,
            latencies: VecDeque::with_capacity(max_window),
            max_window,
            consecutive_failures: 0,
            last_http_status: None,
        }
    }

    fn record(&mut self, status: AttemptStatus, http_status: Option<u16>, latency: Duration) {
        self.attempts += 1;
        if http_status.is_some() {
            self.last_http_status = http_status;
        }

        match status {
            AttemptStatus::Success => {
                self.successes += 1;
                self.consecutive_failures = 0;
            }
            AttemptStatus::Blocked => self.blocked += 1,
            AttemptStatus::Timeout => self.timeouts += 1,
            AttemptStatus::Error => self.errors += 1,
        }
        if status != AttemptStatus::Success {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        }

        if self.latencies.len() == self.max_window {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency);
    }

    fn latency_stats(&self) -> (Option<Duration>, Option<Duration>) {
        if self.latencies.is_empty() {
            return (None, None);
        }
        let mut samples: Vec<_> = self.latencies.iter().cloned().collect();
        samples.sort_unstable();
        let avg = samples.iter().map(|d| d.as_secs_f64()).sum::<f64>() / samples.len() as f64;
        let p95_index = ((samples.len() as f64 * 0.95).ceil() as usize).saturating_sub(1);
        (Some(Duration::from_secs_f64(avg)), Some(samples[p95_index]))
    }
}

#[derive(Debug)]
struct MetricsState {
    global: GlobalStats,
    max_window: usize,
    sources: BTreeMap<String, SourceAccumulator>,
}

impl MetricsState {
    fn new(max_window: usize) -> Self {
        Self {
            global: GlobalStats::default(),
            max_window,
            sources: BTreeMap::new(),
        }
    }

    fn accumulator_mut(&mut self, source: &str) -> &mut SourceAccumulator {
        let window = self.max_window;
        self.sources
            .entry(source.to_string())
            .or_insert_with(|| SourceAccumulator::new(window))
    }
}

/// Thread-safe metrics collector shared by the scheduler's workers.
#[derive(Clone, Debug)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsState::new(128))),
        }
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsState::new(window.max(16)))),
        }
    }

    pub fn record_attempt(
        &self,
        source: &str,
        status: AttemptStatus,
        http_status: Option<u16>,
        latency: Duration,
    ) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        guard.global.total_attempts += 1;
        if status == AttemptStatus::Success {
            guard.global.successes += 1;
        } else {
            guard.global.failures += 1;
        }

        if let Some(avg) = guard.global.average_latency {
            let blended = (avg.as_secs_f64() * 0.9) + (latency.as_secs_f64() * 0.1);
            guard.global.average_latency = Some(Duration::from_secs_f64(blended));
        } else {
            guard.global.average_latency = Some(latency);
        }

        guard.accumulator_mut(source).record(status, http_status, latency);

        let mut percentile_samples: Vec<_> = guard
            .sources
            .values()
            .flat_map(|acc| acc.latencies.iter())
            .cloned()
            .collect();
        percentile_samples.sort_unstable();
        if !percentile_samples.is_empty() {
            let idx = ((percentile_samples.len() as f64 * 0.95).ceil() as usize).saturating_sub(1);
            guard.global.p95_latency = Some(percentile_samples[idx]);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let guard = self.inner.lock().expect("metrics lock poisoned");
        let sources = guard
            .sources
            .iter()
            .map(|(source, acc)| SourceStats::from_accumulator(source, acc))
            .collect();
        MetricsSnapshot {
            global: guard.global.clone(),
            sources,
        }
    }

    /// One log line per source, suitable for the end-of-run summary.
    pub fn summary_lines(&self) -> Vec<String> {
        let snapshot = self.snapshot();
        let mut lines = vec![format!(
            "attempts={} ok={} failed={} avg={} p95={}",
            snapshot.global.total_attempts,
            snapshot.global.successes,
            snapshot.global.failures,
            format_latency(snapshot.global.average_latency),
            format_latency(snapshot.global.p95_latency),
        )];
        for stats in snapshot.sources {
            lines.push(format!(
                "{}: attempts={} ok={} blocked={} timeout={} error={} avg={} p95={}",
                stats.source,
                stats.attempts,
                stats.successes,
                stats.blocked,
                stats.timeouts,
                stats.errors,
                format_latency(stats.average_latency),
                format_latency(stats.p95_latency),
            ));
        }
        lines
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn format_latency(latency: Option<Duration>) -> String {
    latency
        .map(|value| format!("{:.2}s", value.as_secs_f64()))
        .unwrap_or_else(|| "-".to_string())
}
