//! Batch scheduler driving a scan job to completion
//!
//! A run expands the job's targets once, then repeatedly asks the resource
//! controller for a batch size, probes that slice on a bounded pool and
//! persists progress. Cancellation is checked between batches only: a
//! progress write never replaces a CANCELLED job, and seeing one ends the run.
//!
//! Pool shape per batch: `thread_count` workers, `max(2 * threads, min_pool)
//! + queue_capacity` admission slots. When every slot is taken the scheduler
//! probes the address itself.

use chrono::Utc;
use std::{
    sync::Arc,
    time::Instant,
};
use tokio::{sync::Semaphore, task::JoinHandle};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    core::{EventBus, JobStatus, ScanEvent, ScanJob, ScanResult, TargetProber},
    error::{Result, ScannerError},
    log_batch_complete, log_error_with_context, log_job_start,
    logging::JobLogger,
    metrics,
    persistence::{JobStore, ResultStore},
    resources::ResourceController,
    targets::expand_targets,
};

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub queue_capacity: usize,
    pub min_pool_size: usize,
    /// Offset for `next_run_at` after a recurring job completes
    pub recurrence_interval: chrono::Duration,
}

impl SchedulerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            queue_capacity: config.resources.queue_capacity,
            min_pool_size: config.resources.min_pool_size,
            recurrence_interval: config.recurrence_interval(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct BatchTally {
    succeeded: usize,
    failed: usize,
}

impl BatchTally {
    fn add(&mut self, successful: bool) {
        if successful {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }
}

pub struct BatchScheduler {
    jobs: Arc<dyn JobStore>,
    results: Arc<dyn ResultStore>,
    prober: Arc<dyn TargetProber>,
    resources: Arc<ResourceController>,
    settings: SchedulerSettings,
    event_bus: Arc<EventBus>,
}

impl BatchScheduler {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        results: Arc<dyn ResultStore>,
        prober: Arc<dyn TargetProber>,
        resources: Arc<ResourceController>,
        settings: SchedulerSettings,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            jobs,
            results,
            prober,
            resources,
            settings,
            event_bus,
        }
    }

    /// Run the job on a background task
    pub fn start(self: &Arc<Self>, job_id: Uuid) -> JoinHandle<Result<ScanJob>> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move { scheduler.run_job(job_id).await })
    }

    /// Run the job to a terminal state. Only a missing job is an error;
    /// anything that goes wrong mid-run leaves the job FAILED instead.
    pub async fn run_job(&self, job_id: Uuid) -> Result<ScanJob> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| ScannerError::job_not_found(job_id))?;

        match job.status {
            JobStatus::Cancelled => {
                info!(job_id = %job_id, "Job was cancelled before it started");
                return Ok(job);
            }
            JobStatus::Running => {
                warn!(job_id = %job_id, "Job is already running");
                return Ok(job);
            }
            _ => {}
        }

        let started = Instant::now();
        let logger = JobLogger::new(job.id, job.name.clone());
        logger.log_phase_start("discovery");

        let finished = match self.execute(job.clone(), &logger).await {
            Ok(finished) => finished,
            Err(e) => {
                log_error_with_context!(e, "batch scheduler");
                self.mark_failed(job).await
            }
        };

        logger.log_phase_complete("discovery", started.elapsed());
        metrics::record_job_finished(finished.status, started.elapsed());
        self.event_bus
            .publish(ScanEvent::JobFinished {
                job_id,
                status: finished.status,
            })
            .await;

        Ok(finished)
    }

    async fn execute(&self, mut job: ScanJob, logger: &JobLogger) -> Result<ScanJob> {
        let targets = expand_targets(&job.ip_addresses, &job.ip_segments);

        job.status = JobStatus::Running;
        job.last_run_at = Some(Utc::now());
        job.total_targets = targets.len();
        job.completed_targets = 0;
        job.successful_targets = 0;
        job.failed_targets = 0;
        self.jobs.save(&job).await?;

        log_job_start!(job.id, job.name, job.total_targets);
        self.event_bus
            .publish(ScanEvent::JobStarted {
                job_id: job.id,
                total: job.total_targets,
            })
            .await;

        while job.completed_targets < job.total_targets {
            let batch_size = self.resources.batch_size().max(1);
            let offset = job.completed_targets;
            let end = (offset + batch_size).min(targets.len());
            let batch = &targets[offset..end];

            let batch_started = Instant::now();
            let tally = self.run_batch(job.id, batch).await;

            job.completed_targets += batch.len();
            job.successful_targets += tally.succeeded;
            job.failed_targets += tally.failed;

            let elapsed = batch_started.elapsed();
            metrics::record_batch(batch.len(), elapsed);
            log_batch_complete!(job.id, batch.len(), job.completed_targets, job.total_targets, elapsed);
            logger.log_progress(job.completed_targets, job.total_targets);

            if self.persist_unless_cancelled(&mut job).await? {
                info!(
                    job_id = %job.id,
                    completed = job.completed_targets,
                    total = job.total_targets,
                    "Job cancelled, remaining targets skipped"
                );
                return Ok(job);
            }

            self.event_bus
                .publish(ScanEvent::BatchCompleted {
                    job_id: job.id,
                    completed: job.completed_targets,
                    total: job.total_targets,
                })
                .await;
        }

        job.status = JobStatus::Completed;
        if job.recurring {
            job.next_run_at = Some(Utc::now() + self.settings.recurrence_interval);
        }
        if self.persist_unless_cancelled(&mut job).await? {
            info!(job_id = %job.id, "Job cancelled during its last batch");
            return Ok(job);
        }

        info!(
            job_id = %job.id,
            successful = job.successful_targets,
            failed = job.failed_targets,
            "Job completed"
        );
        Ok(job)
    }

    /// Store `job` unless a cancel was stored meanwhile. When one was, `job`
    /// becomes CANCELLED with its current counters and `true` is returned.
    async fn persist_unless_cancelled(&self, job: &mut ScanJob) -> Result<bool> {
        let stored = self.jobs.save_unless_cancelled(job).await.map_err(|e| match e {
            ScannerError::JobNotFound { .. } => ScannerError::scheduler(job.id, "job deleted while running"),
            other => other,
        })?;
        if stored != JobStatus::Cancelled {
            return Ok(false);
        }

        job.status = JobStatus::Cancelled;
        job.next_run_at = None;
        self.jobs.save(job).await?;
        Ok(true)
    }

    /// Probe one slice on the worker pool and wait for all of it
    async fn run_batch(&self, job_id: Uuid, batch: &[String]) -> BatchTally {
        let threads = self.resources.thread_count().max(1);
        let workers = Arc::new(Semaphore::new(threads));
        let slots = Arc::new(Semaphore::new(
            (threads * 2).max(self.settings.min_pool_size) + self.settings.queue_capacity,
        ));

        let mut tally = BatchTally::default();
        let mut tasks = Vec::with_capacity(batch.len());

        for address in batch {
            match Arc::clone(&slots).try_acquire_owned() {
                Ok(slot) => {
                    let prober = Arc::clone(&self.prober);
                    let workers = Arc::clone(&workers);
                    let target = address.clone();
                    let handle = tokio::spawn(async move {
                        let _slot = slot;
                        let _worker = workers.acquire_owned().await;
                        prober.probe(job_id, &target).await
                    });
                    tasks.push((address, handle));
                }
                Err(_) => {
                    metrics::record_inline_probe();
                    let result = self.prober.probe(job_id, address).await;
                    self.record(&mut tally, &result).await;
                }
            }
        }

        let (addresses, handles): (Vec<&String>, Vec<_>) = tasks.into_iter().unzip();
        for (address, joined) in addresses.into_iter().zip(futures::future::join_all(handles).await) {
            match joined {
                Ok(result) => self.record(&mut tally, &result).await,
                Err(e) => {
                    warn!(job_id = %job_id, address = %address, error = %e, "Probe task failed");
                    let error = ScannerError::internal("probe task", format!("aborted: {}", e));
                    let result = ScanResult::failure(job_id, address, &error);
                    if let Err(e) = self.results.append(&result).await {
                        warn!(job_id = %job_id, address = %address, error = %e, "Failed to store scan result");
                    }
                    self.record(&mut tally, &result).await;
                }
            }
        }

        tally
    }

    async fn record(&self, tally: &mut BatchTally, result: &ScanResult) {
        tally.add(result.successful);
        self.event_bus
            .publish(ScanEvent::TargetProbed {
                job_id: result.job_id,
                address: result.address.clone(),
                successful: result.successful,
            })
            .await;
    }

    async fn mark_failed(&self, fallback: ScanJob) -> ScanJob {
        let mut job = match self.jobs.get(fallback.id).await {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                // Deleted mid-run; saving would bring it back
                let mut job = fallback;
                job.status = JobStatus::Failed;
                return job;
            }
            Err(_) => fallback,
        };
        job.status = JobStatus::Failed;

        if let Err(e) = self.jobs.save(&job).await {
            log_error_with_context!(e, "marking job failed");
        }
        job
    }
}
