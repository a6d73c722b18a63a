//! Metrics and observability for soma_gst

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use serde::{Deserialize, Serialize};

/// Global metrics collector
#[derive(Default)]
pub struct Metrics {
    pub total_requests: AtomicU64,
    pub successful_requests: AtomicU64,
    pub failed_requests: AtomicU64,
    pub total_latency_ms: AtomicU64,

    // Per-group counters
    pub caps_count: AtomicU64,
    pub link_count: AtomicU64,
    pub validate_count: AtomicU64,
    pub run_count: AtomicU64,
    pub control_count: AtomicU64,
    pub graph_count: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn group_counter(&self, op: &str) -> Option<&AtomicU64> {
        match op {
            "caps.parse" | "caps.compatible" => Some(&self.caps_count),
            "elements.can_link" | "elements.suggest_converter" => Some(&self.link_count),
            "pipeline.validate" => Some(&self.validate_count),
            "pipeline.run" => Some(&self.run_count),
            "pipeline.status" | "pipeline.stop" | "pipeline.list" => Some(&self.control_count),
            "pipeline.graph" => Some(&self.graph_count),
            _ => None,
        }
    }

    pub fn record_request(&self, op: &str, success: bool, latency_ms: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }

        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);

        if let Some(counter) = self.group_counter(op) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total_requests.load(Ordering::Relaxed);
        let successful = self.successful_requests.load(Ordering::Relaxed);
        let failed = self.failed_requests.load(Ordering::Relaxed);
        let total_latency = self.total_latency_ms.load(Ordering::Relaxed);

        MetricsSnapshot {
            total_requests: total,
            successful_requests: successful,
            failed_requests: failed,
            error_rate: if total > 0 { failed as f64 / total as f64 } else { 0.0 },
            avg_latency_ms: if total > 0 { total_latency / total } else { 0 },
            operations: OperationMetrics {
                caps: self.caps_count.load(Ordering::Relaxed),
                link: self.link_count.load(Ordering::Relaxed),
                validate: self.validate_count.load(Ordering::Relaxed),
                run: self.run_count.load(Ordering::Relaxed),
                control: self.control_count.load(Ordering::Relaxed),
                graph: self.graph_count.load(Ordering::Relaxed),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub error_rate: f64,
    pub avg_latency_ms: u64,
    pub operations: OperationMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationMetrics {
    pub caps: u64,
    pub link: u64,
    pub validate: u64,
    pub run: u64,
    pub control: u64,
    pub graph: u64,
}

/// Timer for tracking operation latency
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_groups_operations() {
        let metrics = Metrics::new();
        metrics.record_request("caps.parse", true, 2);
        metrics.record_request("caps.compatible", true, 4);
        metrics.record_request("pipeline.stop", false, 0);
        metrics.record_request("bogus.op", false, 0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 4);
        assert_eq!(snapshot.failed_requests, 2);
        assert_eq!(snapshot.error_rate, 0.5);
        assert_eq!(snapshot.avg_latency_ms, 1);
        assert_eq!(snapshot.operations.caps, 2);
        assert_eq!(snapshot.operations.control, 1);
        assert_eq!(snapshot.operations.run, 0);
    }
}
