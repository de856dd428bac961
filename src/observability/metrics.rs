// Submission metrics
//
// Counters, gauges and histograms for:
// - Submission outcomes (correct, incorrect, error, blocked)
// - Execution failures by engine category
// - Pool contention (exhaustion, acquire wait, active executions)
// - Session hygiene (resets, discards) and truncation
// - Audit queue drops and rate limiting
//
// All values are lock-free atomics.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::exec::backend::FailureKind;
use crate::verdict::verdict::SubmissionStatus;

/// Monotonically increasing counter
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, delta: u64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Value that moves both ways; saturates at zero
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Cumulative-bucket latency histogram (bounds in seconds)
#[derive(Debug)]
pub struct Histogram {
    bounds: Vec<f64>,
    buckets: Vec<AtomicU64>,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn with_bounds(bounds: &[f64]) -> Self {
        Self {
            bounds: bounds.to_vec(),
            buckets: bounds.iter().map(|_| AtomicU64::new(0)).collect(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Buckets sized for sub-second queries up to the statement timeout range
    pub fn new_latency() -> Self {
        Self::with_bounds(&[0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0])
    }

    pub fn observe(&self, value: Duration) {
        let seconds = value.as_secs_f64();
        self.sum_micros
            .fetch_add(value.as_micros() as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        for (bound, bucket) in self.bounds.iter().zip(&self.buckets) {
            if seconds <= *bound {
                bucket.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum_micros(&self) -> u64 {
        self.sum_micros.load(Ordering::Relaxed)
    }

    pub fn bucket_count(&self, le: f64) -> u64 {
        self.bounds
            .iter()
            .position(|b| (b - le).abs() < 1e-9)
            .map(|i| self.buckets[i].load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn write_prometheus(&self, out: &mut String, name: &str, help: &str) {
        let _ = writeln!(out, "# HELP {} {}", name, help);
        let _ = writeln!(out, "# TYPE {} histogram", name);
        for (bound, bucket) in self.bounds.iter().zip(&self.buckets) {
            let _ = writeln!(
                out,
                "{}_bucket{{le=\"{}\"}} {}",
                name,
                bound,
                bucket.load(Ordering::Relaxed)
            );
        }
        let _ = writeln!(out, "{}_bucket{{le=\"+Inf\"}} {}", name, self.count());
        let _ = writeln!(out, "{}_sum {}", name, self.sum_micros() as f64 / 1_000_000.0);
        let _ = writeln!(out, "{}_count {}", name, self.count());
    }
}

/// Process-wide submission metrics
#[derive(Debug)]
pub struct MetricsRegistry {
    // Outcomes
    pub submissions_total: Counter,
    pub submissions_correct: Counter,
    pub submissions_incorrect: Counter,
    pub submissions_error: Counter,
    pub submissions_blocked: Counter,

    // Execution failures by category
    pub failures_timeout: Counter,
    pub failures_syntax: Counter,
    pub failures_permission_denied: Counter,
    pub failures_read_only: Counter,
    pub failures_resource_limit: Counter,
    pub failures_runtime: Counter,
    pub failures_internal: Counter,

    // Contention
    pub pool_exhausted: Counter,
    pub rate_limited: Counter,
    pub active_executions: Gauge,

    // Session hygiene
    pub sessions_reset: Counter,
    pub sessions_discarded: Counter,
    pub truncated_results: Counter,

    // Audit
    pub records_dropped: Counter,

    // Latency
    pub execution_duration: Histogram,
    pub acquire_wait: Histogram,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            submissions_total: Counter::new(),
            submissions_correct: Counter::new(),
            submissions_incorrect: Counter::new(),
            submissions_error: Counter::new(),
            submissions_blocked: Counter::new(),

            failures_timeout: Counter::new(),
            failures_syntax: Counter::new(),
            failures_permission_denied: Counter::new(),
            failures_read_only: Counter::new(),
            failures_resource_limit: Counter::new(),
            failures_runtime: Counter::new(),
            failures_internal: Counter::new(),

            pool_exhausted: Counter::new(),
            rate_limited: Counter::new(),
            active_executions: Gauge::new(),

            sessions_reset: Counter::new(),
            sessions_discarded: Counter::new(),
            truncated_results: Counter::new(),

            records_dropped: Counter::new(),

            execution_duration: Histogram::new_latency(),
            acquire_wait: Histogram::new_latency(),
        }
    }

    /// Record the final status of one submission
    pub fn record_outcome(&self, status: SubmissionStatus) {
        self.submissions_total.inc();
        match status {
            SubmissionStatus::Correct => self.submissions_correct.inc(),
            SubmissionStatus::Incorrect => self.submissions_incorrect.inc(),
            SubmissionStatus::Error => self.submissions_error.inc(),
            SubmissionStatus::Blocked => self.submissions_blocked.inc(),
        }
    }

    pub fn record_failure(&self, kind: FailureKind) {
        match kind {
            FailureKind::Timeout => self.failures_timeout.inc(),
            FailureKind::Syntax => self.failures_syntax.inc(),
            FailureKind::PermissionDenied => self.failures_permission_denied.inc(),
            FailureKind::ReadOnlyViolation => self.failures_read_only.inc(),
            FailureKind::ResourceLimit => self.failures_resource_limit.inc(),
            FailureKind::Runtime => self.failures_runtime.inc(),
        }
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let mut out = String::new();

        counter_line(&mut out, "querybox_submissions_total", "Submissions processed", &self.submissions_total);

        let _ = writeln!(out, "# HELP querybox_submissions_by_status Submissions by final status");
        let _ = writeln!(out, "# TYPE querybox_submissions_by_status counter");
        for (status, counter) in [
            ("correct", &self.submissions_correct),
            ("incorrect", &self.submissions_incorrect),
            ("error", &self.submissions_error),
            ("blocked", &self.submissions_blocked),
        ] {
            let _ = writeln!(
                out,
                "querybox_submissions_by_status{{status=\"{}\"}} {}",
                status,
                counter.get()
            );
        }

        let _ = writeln!(out, "# HELP querybox_execution_failures Execution failures by category");
        let _ = writeln!(out, "# TYPE querybox_execution_failures counter");
        for (kind, counter) in [
            ("timeout", &self.failures_timeout),
            ("syntax", &self.failures_syntax),
            ("permission_denied", &self.failures_permission_denied),
            ("read_only_violation", &self.failures_read_only),
            ("resource_limit", &self.failures_resource_limit),
            ("runtime", &self.failures_runtime),
            ("internal", &self.failures_internal),
        ] {
            let _ = writeln!(
                out,
                "querybox_execution_failures{{kind=\"{}\"}} {}",
                kind,
                counter.get()
            );
        }

        counter_line(&mut out, "querybox_pool_exhausted_total", "Acquire timeouts", &self.pool_exhausted);
        counter_line(&mut out, "querybox_rate_limited_total", "Requests over the per-user limit", &self.rate_limited);
        counter_line(&mut out, "querybox_sessions_reset_total", "Sessions reset and returned to the pool", &self.sessions_reset);
        counter_line(&mut out, "querybox_sessions_discarded_total", "Sessions closed instead of reused", &self.sessions_discarded);
        counter_line(&mut out, "querybox_truncated_results_total", "Results cut at the row limit", &self.truncated_results);
        counter_line(&mut out, "querybox_audit_records_dropped_total", "Audit records dropped on a full queue", &self.records_dropped);

        let _ = writeln!(out, "# HELP querybox_active_executions Executions holding a connection");
        let _ = writeln!(out, "# TYPE querybox_active_executions gauge");
        let _ = writeln!(out, "querybox_active_executions {}", self.active_executions.get());

        self.execution_duration.write_prometheus(
            &mut out,
            "querybox_execution_duration_seconds",
            "Wall-clock time inside the sandbox",
        );
        self.acquire_wait.write_prometheus(
            &mut out,
            "querybox_acquire_wait_seconds",
            "Time spent waiting for a pooled connection",
        );

        out
    }
}

fn counter_line(out: &mut String, name: &str, help: &str, counter: &Counter) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} counter", name);
    let _ = writeln!(out, "{} {}", name, counter.get());
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics instance
static METRICS: once_cell::sync::Lazy<Arc<MetricsRegistry>> =
    once_cell::sync::Lazy::new(|| Arc::new(MetricsRegistry::new()));

/// Get global metrics registry
pub fn get_metrics() -> Arc<MetricsRegistry> {
    Arc::clone(&METRICS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_and_gauge() {
        let counter = Counter::new();
        counter.inc();
        counter.add(4);
        assert_eq!(counter.get(), 5);

        let gauge = Gauge::new();
        gauge.inc();
        gauge.inc();
        gauge.dec();
        assert_eq!(gauge.get(), 1);
        gauge.dec();
        gauge.dec();
        assert_eq!(gauge.get(), 0);
    }

    #[test]
    fn test_histogram_buckets_are_cumulative() {
        let histogram = Histogram::new_latency();
        histogram.observe(Duration::from_millis(40));
        histogram.observe(Duration::from_millis(200));
        histogram.observe(Duration::from_millis(4_000));

        assert_eq!(histogram.count(), 3);
        assert_eq!(histogram.bucket_count(0.05), 1);
        assert_eq!(histogram.bucket_count(0.25), 2);
        assert_eq!(histogram.bucket_count(5.0), 3);
        assert_eq!(histogram.bucket_count(0.3), 0);
    }

    #[test]
    fn test_record_outcome() {
        let metrics = MetricsRegistry::new();
        metrics.record_outcome(SubmissionStatus::Correct);
        metrics.record_outcome(SubmissionStatus::Blocked);
        metrics.record_outcome(SubmissionStatus::Blocked);

        assert_eq!(metrics.submissions_total.get(), 3);
        assert_eq!(metrics.submissions_correct.get(), 1);
        assert_eq!(metrics.submissions_blocked.get(), 2);
    }

    #[test]
    fn test_record_failure() {
        let metrics = MetricsRegistry::new();
        metrics.record_failure(FailureKind::Timeout);
        metrics.record_failure(FailureKind::Syntax);
        metrics.record_failure(FailureKind::Timeout);

        assert_eq!(metrics.failures_timeout.get(), 2);
        assert_eq!(metrics.failures_syntax.get(), 1);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = MetricsRegistry::new();
        metrics.record_outcome(SubmissionStatus::Incorrect);
        metrics.pool_exhausted.inc();
        metrics.execution_duration.observe(Duration::from_millis(3));

        let output = metrics.export_prometheus();
        assert!(output.contains("querybox_submissions_total 1"));
        assert!(output.contains("querybox_submissions_by_status{status=\"incorrect\"} 1"));
        assert!(output.contains("querybox_pool_exhausted_total 1"));
        assert!(output.contains("querybox_execution_duration_seconds_count 1"));
        assert!(output.contains("querybox_execution_duration_seconds_bucket{le=\"+Inf\"} 1"));
    }

    #[test]
    fn test_global_metrics() {
        let a = get_metrics();
        let b = get_metrics();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
