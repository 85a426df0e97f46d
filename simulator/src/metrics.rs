//! Simulation metrics.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use fxwallet_ledger::IntegrityReport;
use serde::Serialize;

/// Simulation metrics.
#[derive(Debug, Clone)]
pub struct SimulationMetrics {
    /// Total operations attempted.
    pub total_operations: u64,
    /// Operations that committed or replayed.
    pub successful_operations: u64,
    /// Operations the engine rejected.
    pub rejected_operations: u64,
    /// Attempts per operation kind.
    pub operations_by_kind: BTreeMap<String, u64>,
    /// Rejections per error code.
    pub rejections: BTreeMap<String, u64>,
    /// Latency samples (us).
    latency_samples: VecDeque<u64>,
    /// Maximum samples to keep.
    max_samples: usize,
}

impl SimulationMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            total_operations: 0,
            successful_operations: 0,
            rejected_operations: 0,
            operations_by_kind: BTreeMap::new(),
            rejections: BTreeMap::new(),
            latency_samples: VecDeque::with_capacity(10000),
            max_samples: 10000,
        }
    }

    /// Record a successful operation.
    pub fn record_success(&mut self, kind: &str, latency_us: u64) {
        self.record_attempt(kind, latency_us);
        self.successful_operations += 1;
    }

    /// Record a rejected operation.
    pub fn record_rejection(&mut self, kind: &str, error_code: &str, latency_us: u64) {
        self.record_attempt(kind, latency_us);
        self.rejected_operations += 1;
        *self.rejections.entry(error_code.to_string()).or_insert(0) += 1;
    }

    fn record_attempt(&mut self, kind: &str, latency_us: u64) {
        self.total_operations += 1;
        *self.operations_by_kind.entry(kind.to_string()).or_insert(0) += 1;

        if self.latency_samples.len() >= self.max_samples {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency_us);
    }

    /// Get average latency in us.
    pub fn average_latency_us(&self) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let sum: u64 = self.latency_samples.iter().sum();
        sum / self.latency_samples.len() as u64
    }

    /// Get p50 latency.
    pub fn p50_latency_us(&self) -> u64 {
        self.percentile_latency(50)
    }

    /// Get p99 latency.
    pub fn p99_latency_us(&self) -> u64 {
        self.percentile_latency(99)
    }

    fn percentile_latency(&self, percentile: usize) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let mut sorted: Vec<_> = self.latency_samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (sorted.len() * percentile / 100).min(sorted.len() - 1);
        sorted[idx]
    }

    /// Get success rate.
    pub fn success_rate(&self) -> f64 {
        if self.total_operations == 0 {
            return 0.0;
        }

        self.successful_operations as f64 / self.total_operations as f64
    }

    /// Get throughput (operations per second).
    pub fn throughput(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }

        self.total_operations as f64 / secs
    }

    /// Serializable snapshot.
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_operations: self.total_operations,
            successful_operations: self.successful_operations,
            rejected_operations: self.rejected_operations,
            operations_by_kind: self.operations_by_kind.clone(),
            rejections: self.rejections.clone(),
            success_rate: self.success_rate(),
            average_latency_us: self.average_latency_us(),
            p50_latency_us: self.p50_latency_us(),
            p99_latency_us: self.p99_latency_us(),
        }
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub total_operations: u64,
    pub successful_operations: u64,
    pub rejected_operations: u64,
    pub operations_by_kind: BTreeMap<String, u64>,
    pub rejections: BTreeMap<String, u64>,
    pub success_rate: f64,
    pub average_latency_us: u64,
    pub p50_latency_us: u64,
    pub p99_latency_us: u64,
}

/// Everything a run produced, printed with `--json`.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub scenario: String,
    pub users: usize,
    pub concurrency: usize,
    pub elapsed_ms: u128,
    pub throughput: f64,
    pub metrics: MetricsSummary,
    pub failed_assertions: Vec<String>,
    pub audit: IntegrityReport,
}

impl SimulationReport {
    pub fn passed(&self) -> bool {
        self.audit.is_ok() && self.failed_assertions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        let mut metrics = SimulationMetrics::new();

        metrics.record_success("fund", 100);
        metrics.record_success("trade", 200);
        metrics.record_success("replay", 150);
        metrics.record_rejection("trade", "INSUFFICIENT_FUNDS", 50);

        assert_eq!(metrics.total_operations, 4);
        assert_eq!(metrics.successful_operations, 3);
        assert_eq!(metrics.rejected_operations, 1);
        assert_eq!(metrics.operations_by_kind["trade"], 2);
        assert_eq!(metrics.rejections["INSUFFICIENT_FUNDS"], 1);
        assert_eq!(metrics.average_latency_us(), 125);
        assert_eq!(metrics.success_rate(), 0.75);
    }

    #[test]
    fn test_percentiles() {
        let mut metrics = SimulationMetrics::new();
        for latency in 1..=100 {
            metrics.record_success("fund", latency);
        }

        assert_eq!(metrics.p50_latency_us(), 51);
        assert_eq!(metrics.p99_latency_us(), 100);
    }

    #[test]
    fn test_empty_metrics() {
        let metrics = SimulationMetrics::default();

        assert_eq!(metrics.average_latency_us(), 0);
        assert_eq!(metrics.p99_latency_us(), 0);
        assert_eq!(metrics.throughput(Duration::ZERO), 0.0);
    }
}
