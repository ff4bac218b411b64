//! Metrics for the discovery pipeline
//!
//! Everything goes through the `metrics` facade. Without an installed
//! recorder these calls are no-ops; an embedding process can install a
//! Prometheus or statsd recorder to export them. [`EngineCounters`] keeps
//! in-process totals for status output.

use metrics::{counter, gauge, histogram};
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use crate::{core::JobStatus, resources::ResourceSnapshot};

/// Probe outcome for one address
pub fn record_probe(successful: bool, duration: Duration) {
    counter!("asset_probes_total", 1, "outcome" => if successful { "success" } else { "failure" });
    histogram!("asset_probe_duration_seconds", duration.as_secs_f64());
}

/// Open/closed state of one probed port
pub fn record_port_state(service: &str, open: bool) {
    counter!(
        "asset_ports_probed_total",
        1,
        "service" => service.to_string(),
        "state" => if open { "open" } else { "closed" }
    );
}

pub fn record_batch(size: usize, duration: Duration) {
    counter!("scan_batches_total", 1);
    gauge!("scan_last_batch_size", size as f64);
    histogram!("scan_batch_duration_seconds", duration.as_secs_f64());
}

/// Probes run on the scheduling task because the pool was saturated
pub fn record_inline_probe() {
    counter!("scan_inline_probes_total", 1);
}

pub fn record_job_finished(status: JobStatus, duration: Duration) {
    counter!("scan_jobs_finished_total", 1, "status" => status.as_str());
    histogram!("scan_job_duration_seconds", duration.as_secs_f64());
}

/// Which introspection strategy produced data, if any
pub fn record_cascade_outcome(strategy: Option<&'static str>) {
    counter!("introspection_runs_total", 1, "strategy" => strategy.unwrap_or("none"));
}

pub fn record_resource_snapshot(snapshot: &ResourceSnapshot) {
    gauge!("resource_thread_count", snapshot.thread_count as f64);
    gauge!("resource_batch_size", snapshot.batch_size as f64);
    gauge!("resource_cpu_load", snapshot.cpu_load);
    gauge!("resource_memory_load", snapshot.memory_load);
}

/// In-process totals, independent of any recorder
#[derive(Debug, Default)]
pub struct EngineCounters {
    probes_succeeded: AtomicU64,
    probes_failed: AtomicU64,
    assets_created: AtomicU64,
    assets_updated: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct EngineStats {
    pub probes_succeeded: u64,
    pub probes_failed: u64,
    pub assets_created: u64,
    pub assets_updated: u64,
}

impl EngineCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn probe(&self, successful: bool) {
        if successful {
            self.probes_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.probes_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn asset(&self, created: bool) {
        if created {
            self.assets_created.fetch_add(1, Ordering::Relaxed);
        } else {
            self.assets_updated.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            probes_succeeded: self.probes_succeeded.load(Ordering::Relaxed),
            probes_failed: self.probes_failed.load(Ordering::Relaxed),
            assets_created: self.assets_created.load(Ordering::Relaxed),
            assets_updated: self.assets_updated.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let counters = EngineCounters::new();
        counters.probe(true);
        counters.probe(true);
        counters.probe(false);
        counters.asset(true);
        counters.asset(false);
        counters.asset(false);

        let stats = counters.stats();
        assert_eq!(stats.probes_succeeded, 2);
        assert_eq!(stats.probes_failed, 1);
        assert_eq!(stats.assets_created, 1);
        assert_eq!(stats.assets_updated, 2);
    }

    #[test]
    fn test_facade_calls_without_recorder() {
        record_probe(true, Duration::from_millis(12));
        record_port_state("SSH", true);
        record_batch(20, Duration::from_secs(1));
        record_job_finished(JobStatus::Completed, Duration::from_secs(3));
        record_cascade_outcome(None);
    }
}
