//! Engine metrics for stage attempts, loop traversals and workflow outcomes.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Kind of metric being tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// Stage attempt started
    StageAttempt,
    /// Stage attempt retried after a transient failure
    StageRetry,
    /// Stage attempt exceeded its timeout
    StageTimeout,
    /// Loop-back edge traversed
    LoopTraversal,
    /// Loop-back edge reached its bound
    LoopExceeded,
    /// Optimistic concurrency conflict in the state store
    StoreConflict,
    /// Workflow finished Succeeded
    WorkflowSucceeded,
    /// Workflow finished Failed
    WorkflowFailed,
    /// Workflow finished Cancelled
    WorkflowCancelled,
}

const METRIC_KINDS: usize = 9;

/// Engine metrics collector.
///
/// Lock-free counters shared by every workflow of one coordinator.
#[derive(Clone, Debug)]
pub struct EngineMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    /// Counts by kind
    counts: [AtomicU64; METRIC_KINDS],
    /// Total stage execution time (nanoseconds)
    stage_time_ns: AtomicU64,
}

impl EngineMetrics {
    /// Creates a new metrics collector.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                counts: std::array::from_fn(|_| AtomicU64::new(0)),
                stage_time_ns: AtomicU64::new(0),
            }),
        }
    }

    /// Records a metric occurrence.
    pub fn record(&self, kind: MetricKind) {
        self.inner.counts[kind as usize].fetch_add(1, Ordering::Relaxed);
    }

    /// Records a stage attempt and its wall-clock duration.
    pub fn record_attempt(&self, duration: Duration) {
        self.record(MetricKind::StageAttempt);
        self.inner
            .stage_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    /// Gets the count for a specific metric.
    pub fn count(&self, kind: MetricKind) -> u64 {
        self.inner.counts[kind as usize].load(Ordering::Relaxed)
    }

    /// Gets the accumulated stage execution time.
    pub fn stage_time(&self) -> Duration {
        Duration::from_nanos(self.inner.stage_time_ns.load(Ordering::Relaxed))
    }

    /// Gets all metrics as a summary.
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            stage_attempts: self.count(MetricKind::StageAttempt),
            stage_retries: self.count(MetricKind::StageRetry),
            stage_timeouts: self.count(MetricKind::StageTimeout),
            loop_traversals: self.count(MetricKind::LoopTraversal),
            loops_exceeded: self.count(MetricKind::LoopExceeded),
            store_conflicts: self.count(MetricKind::StoreConflict),
            workflows_succeeded: self.count(MetricKind::WorkflowSucceeded),
            workflows_failed: self.count(MetricKind::WorkflowFailed),
            workflows_cancelled: self.count(MetricKind::WorkflowCancelled),
            stage_time: self.stage_time(),
        }
    }

    /// Resets all metrics to zero.
    pub fn reset(&self) {
        for count in &self.inner.counts {
            count.store(0, Ordering::Relaxed);
        }
        self.inner.stage_time_ns.store(0, Ordering::Relaxed);
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary of engine metrics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSummary {
    /// Stage attempts started
    pub stage_attempts: u64,
    /// Retries scheduled
    pub stage_retries: u64,
    /// Attempts that timed out
    pub stage_timeouts: u64,
    /// Loop-back traversals
    pub loop_traversals: u64,
    /// Loop bounds reached
    pub loops_exceeded: u64,
    /// State store conflicts observed
    pub store_conflicts: u64,
    /// Workflows that succeeded
    pub workflows_succeeded: u64,
    /// Workflows that failed
    pub workflows_failed: u64,
    /// Workflows that were cancelled
    pub workflows_cancelled: u64,
    /// Total stage execution time
    pub stage_time: Duration,
}
