//! In-process metrics for the reconciler
//!
//! Counters, gauges and histograms keyed by dotted names, exported as
//! Prometheus text. Series are created on first use.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Histogram sums are kept in microseconds
const SUM_SCALE: f64 = 1_000_000.0;

type Series<T> = RwLock<BTreeMap<String, Arc<T>>>;

/// Metrics registry shared by the reconciler and the HTTP surface
pub struct MetricsRegistry {
    counters: Series<AtomicU64>,
    gauges: Series<AtomicU64>,
    histograms: Series<Histogram>,
    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(BTreeMap::new()),
            gauges: RwLock::new(BTreeMap::new()),
            histograms: RwLock::new(BTreeMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Increment a counter
    pub async fn inc_counter(&self, name: &str) {
        self.add_counter(name, 1).await;
    }

    /// Add to a counter
    pub async fn add_counter(&self, name: &str, value: u64) {
        series_entry(&self.counters, name, || AtomicU64::new(0))
            .await
            .fetch_add(value, Ordering::Relaxed);
    }

    /// Set a gauge value
    pub async fn set_gauge(&self, name: &str, value: u64) {
        series_entry(&self.gauges, name, || AtomicU64::new(0))
            .await
            .store(value, Ordering::Relaxed);
    }

    pub async fn get_counter(&self, name: &str) -> u64 {
        load(&self.counters, name).await
    }

    pub async fn get_gauge(&self, name: &str) -> u64 {
        load(&self.gauges, name).await
    }

    /// Record a histogram observation
    pub async fn observe_histogram(&self, name: &str, value: f64) {
        series_entry(&self.histograms, name, Histogram::default)
            .await
            .observe(value);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Export metrics in Prometheus text format
    pub async fn to_prometheus(&self) -> String {
        let mut output = String::new();

        write_sample(
            &mut output,
            "reconciler_uptime_seconds",
            "gauge",
            Some("Time since service start"),
            self.uptime_seconds(),
        );

        for (name, value) in snapshot(&self.counters).await {
            write_sample(&mut output, &prometheus_name(&name), "counter", metric_names::help(&name), value);
        }

        for (name, value) in snapshot(&self.gauges).await {
            write_sample(&mut output, &prometheus_name(&name), "gauge", metric_names::help(&name), value);
        }

        for (name, histogram) in self.histograms.read().await.iter() {
            histogram.write_prometheus(&mut output, &prometheus_name(name), metric_names::help(name));
        }

        output
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

async fn series_entry<T>(series: &Series<T>, name: &str, init: impl FnOnce() -> T) -> Arc<T> {
    if let Some(existing) = series.read().await.get(name) {
        return existing.clone();
    }

    series
        .write()
        .await
        .entry(name.to_string())
        .or_insert_with(|| Arc::new(init()))
        .clone()
}

async fn load(series: &Series<AtomicU64>, name: &str) -> u64 {
    series
        .read()
        .await
        .get(name)
        .map(|v| v.load(Ordering::Relaxed))
        .unwrap_or(0)
}

async fn snapshot(series: &Series<AtomicU64>) -> BTreeMap<String, u64> {
    series
        .read()
        .await
        .iter()
        .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
        .collect()
}

fn prometheus_name(name: &str) -> String {
    name.replace(['.', '-'], "_")
}

fn write_sample(out: &mut String, name: &str, kind: &str, help: Option<&str>, value: u64) {
    if let Some(help) = help {
        let _ = writeln!(out, "# HELP {name} {help}");
    }
    let _ = writeln!(out, "# TYPE {name} {kind}");
    let _ = writeln!(out, "{name} {value}");
}

/// Fixed-bucket histogram; each observation lands in the first bucket that holds it
pub struct Histogram {
    bounds: Vec<f64>,
    counts: Vec<AtomicU64>,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new(bounds: Vec<f64>) -> Self {
        let counts = bounds.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            bounds,
            counts,
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: f64) {
        self.sum_micros
            .fetch_add((value.max(0.0) * SUM_SCALE) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        if let Some(slot) = self.bounds.iter().position(|bound| value <= *bound) {
            self.counts[slot].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> f64 {
        self.sum_micros.load(Ordering::Relaxed) as f64 / SUM_SCALE
    }

    /// Cumulative count per upper bound, as Prometheus reports buckets
    fn cumulative(&self) -> Vec<u64> {
        self.counts
            .iter()
            .scan(0u64, |running, c| {
                *running += c.load(Ordering::Relaxed);
                Some(*running)
            })
            .collect()
    }

    fn write_prometheus(&self, out: &mut String, name: &str, help: Option<&str>) {
        if let Some(help) = help {
            let _ = writeln!(out, "# HELP {name} {help}");
        }
        let _ = writeln!(out, "# TYPE {name} histogram");

        for (bound, cumulative) in self.bounds.iter().zip(self.cumulative()) {
            let _ = writeln!(out, "{name}_bucket{{le=\"{bound}\"}} {cumulative}");
        }
        let _ = writeln!(out, "{name}_bucket{{le=\"+Inf\"}} {}", self.count());
        let _ = writeln!(out, "{name}_sum {}", self.sum());
        let _ = writeln!(out, "{name}_count {}", self.count());
    }
}

impl Default for Histogram {
    fn default() -> Self {
        // Passes span several network round trips and retry sleeps
        Self::new(vec![
            0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0,
        ])
    }
}

/// Predefined metric names
pub mod metric_names {
    // Passes
    pub const PASSES_STARTED: &str = "reconciler.passes.started";
    pub const PASSES_ABORTED: &str = "reconciler.passes.aborted";
    pub const PASSES_REJECTED: &str = "reconciler.passes.rejected";
    pub const PASS_DURATION: &str = "reconciler.pass.duration_seconds";
    pub const LAST_PASS_SIZE: &str = "reconciler.pass.last_size";

    // Items
    pub const POSITIONS_CLOSED: &str = "reconciler.positions.closed";
    pub const POSITIONS_FAILED: &str = "reconciler.positions.failed";
    pub const POSITIONS_SKIPPED: &str = "reconciler.positions.skipped";

    // Ledger writes
    pub const SUBMISSION_ATTEMPTS: &str = "reconciler.submissions.attempts";
    pub const SUBMISSION_RETRIES: &str = "reconciler.submissions.retries";

    // Proofs
    pub const PROOFS_REJECTED: &str = "reconciler.proofs.rejected";

    /// HELP text for a known metric
    pub fn help(name: &str) -> Option<&'static str> {
        Some(match name {
            PASSES_STARTED => "Reconciliation passes started",
            PASSES_ABORTED => "Passes that ended without per-item results",
            PASSES_REJECTED => "Triggers refused while a pass was running",
            PASS_DURATION => "Wall time of a reconciliation pass",
            LAST_PASS_SIZE => "Close requests discovered by the latest pass",
            POSITIONS_CLOSED => "Positions confirmed closed",
            POSITIONS_FAILED => "Positions that ended a pass failed",
            POSITIONS_SKIPPED => "Close requests skipped without a position id",
            SUBMISSION_ATTEMPTS => "Close confirmation transactions attempted",
            SUBMISSION_RETRIES => "Close confirmation attempts after the first",
            PROOFS_REJECTED => "Fetched proofs that failed validation",
            _ => return None,
        })
    }
}
