//! Resource-aware tuning of probe concurrency
//!
//! The controller samples CPU and memory load on a fixed interval and
//! publishes an immutable [`ResourceSnapshot`]. Readers always see a
//! thread count and batch size that were computed together.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc, time::Duration};
use sysinfo::{CpuExt, System, SystemExt};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    config::ResourcesConfig,
    error::{Result, ScannerError},
    metrics,
};

/// Tunables currently in force
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub thread_count: usize,
    pub batch_size: usize,
    pub cpu_load: f64,
    pub memory_load: f64,
    pub sampled_at: DateTime<Utc>,
}

impl fmt::Display for ResourceSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "threads={} batch={} cpu={:.0}% mem={:.0}% at {}",
            self.thread_count,
            self.batch_size,
            self.cpu_load * 100.0,
            self.memory_load * 100.0,
            self.sampled_at.to_rfc3339()
        )
    }
}

/// One load reading, as ratios in `0.0..=1.0`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadSample {
    /// `None` when the platform cannot report CPU load
    pub cpu: Option<f64>,
    pub memory: f64,
}

/// Source of system load readings
pub trait LoadSampler: Send {
    fn core_count(&self) -> usize;
    fn available_memory_mb(&mut self) -> u64;
    fn sample(&mut self) -> Result<LoadSample>;
}

/// Samples the local machine through `sysinfo`
pub struct SysinfoSampler {
    system: System,
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        Self { system }
    }
}

impl LoadSampler for SysinfoSampler {
    fn core_count(&self) -> usize {
        match self.system.cpus().len() {
            0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            n => n,
        }
    }

    fn available_memory_mb(&mut self) -> u64 {
        self.system.refresh_memory();
        self.system.available_memory() / (1024 * 1024)
    }

    fn sample(&mut self) -> Result<LoadSample> {
        self.system.refresh_cpu();
        self.system.refresh_memory();

        let total = self.system.total_memory();
        if total == 0 {
            return Err(ScannerError::internal("resource sampling", "total memory reported as zero"));
        }
        let memory = self.system.used_memory() as f64 / total as f64;

        // Load average per core, else instantaneous usage
        let cores = self.core_count() as f64;
        let load = self.system.load_average().one;
        let cpu = if load > 0.0 {
            Some((load / cores).min(1.0))
        } else {
            let usage = self.system.global_cpu_info().cpu_usage() as f64;
            (usage.is_finite() && usage > 0.0).then(|| (usage / 100.0).min(1.0))
        };

        Ok(LoadSample { cpu, memory })
    }
}

/// Compute the next snapshot from the current one and a new sample.
///
/// Thread count never drops below `min_threads` nor grows past the core
/// count (or `min_threads`, on machines with fewer cores). Batch size stays
/// within `min_batch_size..=max_batch_size`.
pub fn adjust(
    current: &ResourceSnapshot,
    sample: LoadSample,
    policy: &ResourcesConfig,
    core_count: usize,
) -> ResourceSnapshot {
    let cpu = sample.cpu.unwrap_or(policy.cpu_fallback).clamp(0.0, 1.0);
    let memory = sample.memory.clamp(0.0, 1.0);
    let thread_cap = core_count.max(policy.min_threads);

    let mut threads = current.thread_count;
    let mut batch = current.batch_size;

    if cpu > policy.cpu_high {
        threads = threads.saturating_sub(1).max(policy.min_threads);
        batch = (batch / 2).max(policy.min_batch_size);
    } else if cpu < policy.cpu_low && memory < policy.memory_ok {
        threads = (threads + 1).min(thread_cap);
        batch = (batch + policy.batch_step).min(policy.max_batch_size);
    }

    if memory > policy.memory_high {
        batch = (batch / 2).max(policy.min_batch_size);
    }

    ResourceSnapshot {
        thread_count: threads,
        batch_size: batch,
        cpu_load: cpu,
        memory_load: memory,
        sampled_at: Utc::now(),
    }
}

/// Publishes the current thread count and batch size
pub struct ResourceController {
    policy: ResourcesConfig,
    core_count: usize,
    current: RwLock<Arc<ResourceSnapshot>>,
}

impl ResourceController {
    /// Initial values from the machine's core count and free memory
    pub fn calibrate(policy: &ResourcesConfig, sampler: &mut dyn LoadSampler) -> Self {
        let core_count = sampler.core_count().max(1);
        let memory_mb = sampler.available_memory_mb() as usize;

        let threads = ((core_count as f64 * policy.initial_thread_factor) as usize).max(policy.min_threads);
        let batch = (memory_mb / 4)
            .min(policy.initial_batch_cap)
            .clamp(policy.min_batch_size, policy.max_batch_size);

        info!(
            cores = core_count,
            memory_mb,
            threads,
            batch,
            "Resource controller calibrated"
        );

        Self::with_values(policy.clone(), core_count, threads, batch)
    }

    /// Fixed starting point, for embedding and tests
    pub fn with_values(policy: ResourcesConfig, core_count: usize, thread_count: usize, batch_size: usize) -> Self {
        let snapshot = ResourceSnapshot {
            thread_count,
            batch_size,
            cpu_load: 0.0,
            memory_load: 0.0,
            sampled_at: Utc::now(),
        };
        Self {
            policy,
            core_count: core_count.max(1),
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    pub fn snapshot(&self) -> Arc<ResourceSnapshot> {
        self.current.read().clone()
    }

    pub fn thread_count(&self) -> usize {
        self.current.read().thread_count
    }

    pub fn batch_size(&self) -> usize {
        self.current.read().batch_size
    }

    pub fn core_count(&self) -> usize {
        self.core_count
    }

    /// Fold one sample into the published snapshot
    pub fn apply(&self, sample: LoadSample) -> Arc<ResourceSnapshot> {
        let mut current = self.current.write();
        let next = Arc::new(adjust(&current, sample, &self.policy, self.core_count));

        if next.thread_count != current.thread_count || next.batch_size != current.batch_size {
            info!(
                threads = next.thread_count,
                batch = next.batch_size,
                cpu = next.cpu_load,
                memory = next.memory_load,
                "Adjusted scan resources"
            );
        }

        metrics::record_resource_snapshot(&next);
        *current = next.clone();
        next
    }

    /// Take one sample and apply it. Sampling errors keep the prior values.
    pub fn refresh(&self, sampler: &mut dyn LoadSampler) {
        match sampler.sample() {
            Ok(sample) => {
                self.apply(sample);
            }
            Err(e) => {
                warn!(error = %e, "Resource sampling failed, keeping previous values");
            }
        }
    }

    /// Periodic sampling on a background task, stopped when the handle drops
    pub fn spawn_monitor(self: &Arc<Self>, sampler: Box<dyn LoadSampler>, period: Duration) -> MonitorHandle {
        let controller = Arc::clone(self);

        let handle = tokio::spawn(async move {
            let mut sampler = sampler;
            let mut interval = tokio::time::interval(period);
            // First tick completes immediately; calibration already covered it
            interval.tick().await;

            loop {
                interval.tick().await;

                let task_controller = Arc::clone(&controller);
                let sampled = tokio::task::spawn_blocking(move || {
                    task_controller.refresh(sampler.as_mut());
                    sampler
                })
                .await;

                match sampled {
                    Ok(returned) => sampler = returned,
                    Err(e) => {
                        warn!(error = %e, "Resource sampler panicked, monitoring stopped");
                        break;
                    }
                }
            }
        });

        debug!("Resource monitor started with period {:?}", period);
        MonitorHandle { handle }
    }
}

/// Aborts the monitor task on drop
pub struct MonitorHandle {
    handle: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use std::collections::VecDeque;

    fn policy() -> ResourcesConfig {
        AppConfig::default().resources
    }

    fn snapshot(threads: usize, batch: usize) -> ResourceSnapshot {
        ResourceSnapshot {
            thread_count: threads,
            batch_size: batch,
            cpu_load: 0.0,
            memory_load: 0.0,
            sampled_at: Utc::now(),
        }
    }

    fn sample(cpu: f64, memory: f64) -> LoadSample {
        LoadSample { cpu: Some(cpu), memory }
    }

    struct ScriptedSampler {
        cores: usize,
        memory_mb: u64,
        samples: VecDeque<Result<LoadSample>>,
    }

    impl LoadSampler for ScriptedSampler {
        fn core_count(&self) -> usize {
            self.cores
        }

        fn available_memory_mb(&mut self) -> u64 {
            self.memory_mb
        }

        fn sample(&mut self) -> Result<LoadSample> {
            self.samples
                .pop_front()
                .unwrap_or_else(|| Err(ScannerError::internal("test", "exhausted")))
        }
    }

    #[test]
    fn test_calibration() {
        let mut sampler = ScriptedSampler {
            cores: 8,
            memory_mb: 16_000,
            samples: VecDeque::new(),
        };
        let controller = ResourceController::calibrate(&policy(), &mut sampler);
        assert_eq!(controller.thread_count(), 6);
        assert_eq!(controller.batch_size(), 500);

        let mut small = ScriptedSampler {
            cores: 1,
            memory_mb: 40,
            samples: VecDeque::new(),
        };
        let controller = ResourceController::calibrate(&policy(), &mut small);
        assert_eq!(controller.thread_count(), 2);
        assert_eq!(controller.batch_size(), 20);
    }

    #[test]
    fn test_high_cpu_backs_off_to_floors() {
        let policy = policy();
        let mut current = snapshot(6, 500);
        for _ in 0..20 {
            current = adjust(&current, sample(0.95, 0.5), &policy, 8);
        }
        assert_eq!(current.thread_count, 2);
        assert_eq!(current.batch_size, 20);
    }

    #[test]
    fn test_low_load_grows_monotonically_to_caps() {
        let policy = policy();
        let mut current = snapshot(2, 20);
        let mut previous = current.clone();
        for _ in 0..100 {
            current = adjust(&current, sample(0.1, 0.2), &policy, 8);
            assert!(current.thread_count >= previous.thread_count);
            assert!(current.batch_size >= previous.batch_size);
            previous = current.clone();
        }
        assert_eq!(current.thread_count, 8);
        assert_eq!(current.batch_size, 1000);
    }

    #[test]
    fn test_memory_pressure_halves_batch_only() {
        let policy = policy();
        let current = snapshot(4, 400);
        let next = adjust(&current, sample(0.5, 0.9), &policy, 8);
        assert_eq!(next.thread_count, 4);
        assert_eq!(next.batch_size, 200);
    }

    #[test]
    fn test_low_cpu_with_busy_memory_does_not_grow() {
        let policy = policy();
        let current = snapshot(4, 400);
        let next = adjust(&current, sample(0.1, 0.75), &policy, 8);
        assert_eq!(next.thread_count, 4);
        assert_eq!(next.batch_size, 400);
    }

    #[test]
    fn test_missing_cpu_sample_assumes_midpoint() {
        let policy = policy();
        let current = snapshot(4, 400);
        let next = adjust(&current, LoadSample { cpu: None, memory: 0.1 }, &policy, 8);
        assert_eq!(next.cpu_load, 0.5);
        assert_eq!(next.thread_count, 4);
        assert_eq!(next.batch_size, 400);
    }

    #[test]
    fn test_bounds_hold_for_arbitrary_samples() {
        let policy = policy();
        let cores = 4;
        let mut current = snapshot(3, 300);
        let mut seed: u64 = 0x9e37_79b9_7f4a_7c15;
        for _ in 0..5_000 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let cpu = ((seed >> 33) % 1000) as f64 / 1000.0;
            let memory = ((seed >> 13) % 1000) as f64 / 1000.0;
            let cpu = if seed % 7 == 0 { None } else { Some(cpu) };
            current = adjust(&current, LoadSample { cpu, memory }, &policy, cores);
            assert!(current.thread_count >= 2);
            assert!(current.thread_count <= cores);
            assert!(current.batch_size >= 20);
            assert!(current.batch_size <= 1000);
        }
    }

    #[test]
    fn test_refresh_keeps_values_on_sampling_error() {
        let controller = ResourceController::with_values(policy(), 8, 4, 100);
        let mut sampler = ScriptedSampler {
            cores: 8,
            memory_mb: 1000,
            samples: VecDeque::from(vec![
                Err(ScannerError::internal("test", "sensor offline")),
                Ok(sample(0.1, 0.1)),
            ]),
        };

        controller.refresh(&mut sampler);
        assert_eq!(controller.thread_count(), 4);
        assert_eq!(controller.batch_size(), 100);

        controller.refresh(&mut sampler);
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.thread_count, 5);
        assert_eq!(snapshot.batch_size, 120);
    }

    #[tokio::test]
    async fn test_monitor_applies_samples_periodically() {
        let controller = Arc::new(ResourceController::with_values(policy(), 8, 4, 100));
        let sampler = ScriptedSampler {
            cores: 8,
            memory_mb: 1000,
            samples: VecDeque::from(vec![Ok(sample(0.95, 0.1)), Ok(sample(0.95, 0.1))]),
        };

        let monitor = controller.spawn_monitor(Box::new(sampler), Duration::from_millis(10));
        assert!(monitor.is_running());

        for _ in 0..300 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if controller.thread_count() == 2 {
                break;
            }
        }
        assert_eq!(controller.thread_count(), 2);
        assert_eq!(controller.batch_size(), 25);
        drop(monitor);
    }
}
