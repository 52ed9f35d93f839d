use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Counters for transitions, chain steps and notifications
#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub transitions_committed: AtomicU64,
    pub transitions_rejected: AtomicU64,
    pub steps_executed: AtomicU64,
    pub steps_failed: AtomicU64,
    pub steps_skipped: AtomicU64,
    pub notifications_sent: AtomicU64,
    pub notifications_failed: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_transition_committed(&self) {
        self.transitions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transition_rejected(&self) {
        self.transitions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_step_executed(&self) {
        self.steps_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_step_failed(&self) {
        self.steps_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_step_skipped(&self) {
        self.steps_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_sent(&self) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_failed(&self) {
        self.notifications_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> EngineStats {
        EngineStats {
            transitions_committed: self.transitions_committed.load(Ordering::Relaxed),
            transitions_rejected: self.transitions_rejected.load(Ordering::Relaxed),
            steps_executed: self.steps_executed.load(Ordering::Relaxed),
            steps_failed: self.steps_failed.load(Ordering::Relaxed),
            steps_skipped: self.steps_skipped.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            "Engine metrics: transitions={}/{} rejected, steps={} failed={} skipped={}, notifications={} failed={}",
            stats.transitions_committed,
            stats.transitions_rejected,
            stats.steps_executed,
            stats.steps_failed,
            stats.steps_skipped,
            stats.notifications_sent,
            stats.notifications_failed
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    pub transitions_committed: u64,
    pub transitions_rejected: u64,
    pub steps_executed: u64,
    pub steps_failed: u64,
    pub steps_skipped: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
}

/// Global metrics instance
static ENGINE_METRICS: std::sync::LazyLock<EngineMetrics> =
    std::sync::LazyLock::new(EngineMetrics::new);

pub fn engine_metrics() -> &'static EngineMetrics {
    &ENGINE_METRICS
}

/// Time an operation and log its duration when finished
pub struct OperationTimer {
    operation: String,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    pub fn finish(self) {
        let duration = self.start.elapsed();
        info!(
            operation = %self.operation,
            duration_ms = duration.as_millis() as u64,
            "Operation completed"
        );
    }
}
