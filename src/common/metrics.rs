//! Coordinator metrics
//!
//! Prometheus-compatible counters, gauges and latency histograms for the
//! event dispatcher and the RPC layer.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Histogram bucket boundaries for latency measurements (in milliseconds)
const LATENCY_BUCKETS: [f64; 10] = [0.5, 1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 1000.0, 5000.0];

/// A simple histogram implementation for latency tracking
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: Vec<f64>,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new() -> Self {
        Self::with_buckets(&LATENCY_BUCKETS)
    }

    pub fn with_buckets(boundaries: &[f64]) -> Self {
        Self {
            buckets: (0..=boundaries.len()).map(|_| AtomicU64::new(0)).collect(),
            boundaries: boundaries.to_vec(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a value in milliseconds
    pub fn observe(&self, value_ms: f64) {
        let idx = self
            .boundaries
            .iter()
            .position(|&b| value_ms <= b)
            .unwrap_or(self.boundaries.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((value_ms * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative `(le, count)` pairs, ending with `+Inf`.
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0u64;
        let mut result = Vec::with_capacity(self.buckets.len());
        for (i, &boundary) in self.boundaries.iter().enumerate() {
            cumulative += self.buckets[i].load(Ordering::Relaxed);
            result.push((boundary, cumulative));
        }
        cumulative += self.buckets[self.boundaries.len()].load(Ordering::Relaxed);
        result.push((f64::INFINITY, cumulative));
        result
    }

    pub fn sum(&self) -> f64 {
        self.sum_micros.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        // Saturating: a failed enqueue may race with the worker draining the queue.
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Per event type metrics
#[derive(Debug, Default)]
pub struct EventTypeMetrics {
    pub processed: Counter,
    pub failed: Counter,
    pub latency: Histogram,
}

/// Metrics of the coordinator event dispatcher
#[derive(Debug)]
pub struct CoordinatorMetrics {
    events: Mutex<BTreeMap<&'static str, Arc<EventTypeMetrics>>>,
    pub queue_size: Gauge,
    pub stale_epoch_rejections: Counter,
    pub handler_panics: Counter,
    start_time: Instant,
}

impl CoordinatorMetrics {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(BTreeMap::new()),
            queue_size: Gauge::default(),
            stale_epoch_rejections: Counter::default(),
            handler_panics: Counter::default(),
            start_time: Instant::now(),
        }
    }

    pub fn event(&self, name: &'static str) -> Arc<EventTypeMetrics> {
        self.events
            .lock()
            .entry(name)
            .or_insert_with(|| Arc::new(EventTypeMetrics::default()))
            .clone()
    }

    pub fn record_event(&self, name: &'static str, duration: Duration, success: bool) {
        let metrics = self.event(name);
        metrics.processed.inc();
        metrics.latency.observe(duration.as_secs_f64() * 1000.0);
        if !success {
            metrics.failed.inc();
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-compatible metrics output
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        out.push_str("# HELP tablecoord_event_queue_size Events waiting in the coordinator queue\n");
        out.push_str("# TYPE tablecoord_event_queue_size gauge\n");
        let _ = writeln!(out, "tablecoord_event_queue_size {}", self.queue_size.get());

        out.push_str("# HELP tablecoord_stale_epoch_rejections_total Requests rejected by epoch fencing\n");
        out.push_str("# TYPE tablecoord_stale_epoch_rejections_total counter\n");
        let _ = writeln!(
            out,
            "tablecoord_stale_epoch_rejections_total {}",
            self.stale_epoch_rejections.get()
        );

        out.push_str("# HELP tablecoord_handler_panics_total Event handlers that panicked\n");
        out.push_str("# TYPE tablecoord_handler_panics_total counter\n");
        let _ = writeln!(out, "tablecoord_handler_panics_total {}", self.handler_panics.get());

        out.push_str("# HELP tablecoord_uptime_seconds Coordinator uptime in seconds\n");
        out.push_str("# TYPE tablecoord_uptime_seconds gauge\n");
        let _ = writeln!(out, "tablecoord_uptime_seconds {}", self.uptime_seconds());

        let events = self.events.lock();

        out.push_str("# HELP tablecoord_events_total Events processed per type\n");
        out.push_str("# TYPE tablecoord_events_total counter\n");
        for (name, m) in events.iter() {
            let _ = writeln!(out, "tablecoord_events_total{{event=\"{}\"}} {}", name, m.processed.get());
        }

        out.push_str("# HELP tablecoord_events_failed_total Events resolved with a failure per type\n");
        out.push_str("# TYPE tablecoord_events_failed_total counter\n");
        for (name, m) in events.iter() {
            let _ = writeln!(
                out,
                "tablecoord_events_failed_total{{event=\"{}\"}} {}",
                name,
                m.failed.get()
            );
        }

        out.push_str("# HELP tablecoord_event_duration_ms Event processing time in milliseconds\n");
        out.push_str("# TYPE tablecoord_event_duration_ms histogram\n");
        for (name, m) in events.iter() {
            for (le, count) in m.latency.get_buckets() {
                let le = if le.is_infinite() {
                    "+Inf".to_string()
                } else {
                    le.to_string()
                };
                let _ = writeln!(
                    out,
                    "tablecoord_event_duration_ms_bucket{{event=\"{}\",le=\"{}\"}} {}",
                    name, le, count
                );
            }
            let _ = writeln!(
                out,
                "tablecoord_event_duration_ms_sum{{event=\"{}\"}} {}",
                name,
                m.latency.sum()
            );
            let _ = writeln!(
                out,
                "tablecoord_event_duration_ms_count{{event=\"{}\"}} {}",
                name,
                m.latency.count()
            );
        }

        out
    }
}

impl Default for CoordinatorMetrics {
    fn default() -> Self {
        Self::new()
    }
}
