//! Bridge metrics for monitoring and observability.
//!
//! Counts foreign calls per operation, host reentries per entry point, and
//! isolated callback failures, and exports them in Prometheus text format.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of one environment's registries
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStats {
    /// Timers still waiting for the host
    pub pending_timers: usize,

    /// Timer tokens ever minted
    pub timers_minted: u64,

    /// Animation-frame handlers queued for the next frame
    pub queued_frames: usize,

    /// XHRs registered and not yet loaded
    pub open_requests: usize,

    /// XHR tokens ever minted
    pub requests_minted: u64,

    /// Nodes with at least one listener bucket
    pub node_listener_targets: usize,

    /// Windows with at least one listener bucket
    pub window_listener_targets: usize,

    /// Foreign calls issued
    pub host_calls: u32,
}

/// Metrics collector shared by the channel and the reentry points
pub struct BridgeMetrics {
    total_host_calls: AtomicU64,
    total_reentries: AtomicU64,
    callback_failures: AtomicU64,
    duplicate_reentries: AtomicU64,
    host_calls: parking_lot::Mutex<HashMap<String, u64>>,
    reentries: parking_lot::Mutex<HashMap<String, u64>>,
    error_counts: parking_lot::Mutex<HashMap<String, u64>>,
}

impl BridgeMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            total_host_calls: AtomicU64::new(0),
            total_reentries: AtomicU64::new(0),
            callback_failures: AtomicU64::new(0),
            duplicate_reentries: AtomicU64::new(0),
            host_calls: parking_lot::Mutex::new(HashMap::new()),
            reentries: parking_lot::Mutex::new(HashMap::new()),
            error_counts: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Record a foreign call
    pub fn record_host_call(&self, operation: &str) {
        self.total_host_calls.fetch_add(1, Ordering::Relaxed);
        *self
            .host_calls
            .lock()
            .entry(operation.to_string())
            .or_insert(0) += 1;
    }

    /// Record a host-initiated reentry
    pub fn record_reentry(&self, entry_point: &str) {
        self.total_reentries.fetch_add(1, Ordering::Relaxed);
        *self
            .reentries
            .lock()
            .entry(entry_point.to_string())
            .or_insert(0) += 1;
    }

    /// Record a reentry for a token that already fired
    pub fn record_duplicate_reentry(&self) {
        self.duplicate_reentries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a script callback failure
    pub fn record_callback_failure(&self) {
        self.callback_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an error
    pub fn record_error(&self, error_code: &str) {
        let mut counts = self.error_counts.lock();
        *counts.entry(error_code.to_string()).or_insert(0) += 1;
    }

    /// Get total foreign calls
    pub fn total_host_calls(&self) -> u64 {
        self.total_host_calls.load(Ordering::Relaxed)
    }

    /// Get total reentries
    pub fn total_reentries(&self) -> u64 {
        self.total_reentries.load(Ordering::Relaxed)
    }

    /// Get callback failures
    pub fn callback_failures(&self) -> u64 {
        self.callback_failures.load(Ordering::Relaxed)
    }

    /// Get duplicate reentries
    pub fn duplicate_reentries(&self) -> u64 {
        self.duplicate_reentries.load(Ordering::Relaxed)
    }

    /// Get host call counts
    pub fn host_calls(&self) -> HashMap<String, u64> {
        self.host_calls.lock().clone()
    }

    /// Get reentry counts
    pub fn reentries(&self) -> HashMap<String, u64> {
        self.reentries.lock().clone()
    }

    /// Get error counts
    pub fn error_counts(&self) -> HashMap<String, u64> {
        self.error_counts.lock().clone()
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.total_host_calls.store(0, Ordering::Relaxed);
        self.total_reentries.store(0, Ordering::Relaxed);
        self.callback_failures.store(0, Ordering::Relaxed);
        self.duplicate_reentries.store(0, Ordering::Relaxed);
        self.host_calls.lock().clear();
        self.reentries.lock().clear();
        self.error_counts.lock().clear();
    }

    /// Export Prometheus-format metrics under `prefix`
    pub fn to_prometheus(&self, prefix: &str) -> String {
        let mut output = String::new();

        output.push_str(&format!("# HELP {prefix}_host_calls_total Foreign calls by operation\n"));
        output.push_str(&format!("# TYPE {prefix}_host_calls_total counter\n"));
        for (name, count) in sorted(self.host_calls()) {
            output.push_str(&format!(
                "{prefix}_host_calls_total{{operation=\"{}\"}} {}\n",
                name, count
            ));
        }

        output.push_str(&format!("\n# HELP {prefix}_reentries_total Host reentries by entry point\n"));
        output.push_str(&format!("# TYPE {prefix}_reentries_total counter\n"));
        for (name, count) in sorted(self.reentries()) {
            output.push_str(&format!(
                "{prefix}_reentries_total{{entry=\"{}\"}} {}\n",
                name, count
            ));
        }

        output.push_str(&format!(
            "\n# HELP {prefix}_duplicate_reentries_total Reentries for tokens that already fired\n"
        ));
        output.push_str(&format!("# TYPE {prefix}_duplicate_reentries_total counter\n"));
        output.push_str(&format!(
            "{prefix}_duplicate_reentries_total {}\n",
            self.duplicate_reentries()
        ));

        output.push_str(&format!(
            "\n# HELP {prefix}_callback_failures_total Script callbacks that returned an error\n"
        ));
        output.push_str(&format!("# TYPE {prefix}_callback_failures_total counter\n"));
        output.push_str(&format!(
            "{prefix}_callback_failures_total {}\n",
            self.callback_failures()
        ));

        output.push_str(&format!("\n# HELP {prefix}_errors_total Error counts by code\n"));
        output.push_str(&format!("# TYPE {prefix}_errors_total counter\n"));
        for (code, count) in sorted(self.error_counts()) {
            output.push_str(&format!("{prefix}_errors_total{{code=\"{}\"}} {}\n", code, count));
        }

        output
    }
}

impl Default for BridgeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted(map: HashMap<String, u64>) -> Vec<(String, u64)> {
    let mut entries: Vec<_> = map.into_iter().collect();
    entries.sort();
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector() {
        let metrics = BridgeMetrics::new();

        metrics.record_host_call("now");
        metrics.record_host_call("now");
        metrics.record_host_call("log");
        metrics.record_reentry("runSetTimeout");

        assert_eq!(metrics.total_host_calls(), 3);
        assert_eq!(metrics.host_calls().get("now"), Some(&2));
        assert_eq!(metrics.total_reentries(), 1);
    }

    #[test]
    fn test_reset() {
        let metrics = BridgeMetrics::new();
        metrics.record_callback_failure();
        metrics.record_error("HOST_CALL_FAILED");
        metrics.reset();

        assert_eq!(metrics.callback_failures(), 0);
        assert!(metrics.error_counts().is_empty());
    }

    #[test]
    fn test_prometheus_output() {
        let metrics = BridgeMetrics::new();
        metrics.record_host_call("setTimeout");
        metrics.record_reentry("runRAFHandlers");
        metrics.record_duplicate_reentry();

        let output = metrics.to_prometheus("nexus_bridge");
        assert!(output.contains("nexus_bridge_host_calls_total{operation=\"setTimeout\"} 1"));
        assert!(output.contains("nexus_bridge_reentries_total{entry=\"runRAFHandlers\"} 1"));
        assert!(output.contains("nexus_bridge_duplicate_reentries_total 1"));
    }

    #[test]
    fn test_stats_serialization() {
        let stats = BridgeStats {
            pending_timers: 2,
            ..Default::default()
        };
        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"pendingTimers\":2"));
    }
}
