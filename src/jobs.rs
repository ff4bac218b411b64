//! Job lifecycle operations for callers
//!
//! Ownership is enforced here: only the owner of a job may cancel or delete
//! it. Every ownership decision is written to the audit log.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{
    core::{JobRequest, JobStatus, ScanJob, ScanResult},
    error::{Result, ScannerError},
    logging::{log_audit_event, TimingLogger},
    persistence::{JobStore, ResultStore},
    scheduler::BatchScheduler,
    targets::estimate_target_count,
};

pub struct JobService {
    jobs: Arc<dyn JobStore>,
    results: Arc<dyn ResultStore>,
    scheduler: Arc<BatchScheduler>,
}

fn clean(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

impl JobService {
    pub fn new(jobs: Arc<dyn JobStore>, results: Arc<dyn ResultStore>, scheduler: Arc<BatchScheduler>) -> Self {
        Self {
            jobs,
            results,
            scheduler,
        }
    }

    /// Store a new job in the CREATED state
    pub async fn create_job(&self, owner_id: &str, mut request: JobRequest) -> Result<ScanJob> {
        if owner_id.trim().is_empty() {
            return Err(ScannerError::validation("owner", "Owner must not be blank"));
        }
        request.name = request.name.trim().to_string();
        if request.name.is_empty() {
            return Err(ScannerError::validation("name", "Job name must not be blank"));
        }

        request.ip_addresses = clean(request.ip_addresses);
        request.ip_segments = clean(request.ip_segments);
        if request.ip_addresses.is_empty() && request.ip_segments.is_empty() {
            return Err(ScannerError::validation(
                "targets",
                "At least one address or segment is required",
            ));
        }

        let estimate = estimate_target_count(&request.ip_addresses, &request.ip_segments);
        let job = ScanJob::new(owner_id, request, estimate);
        self.jobs.save(&job).await?;

        log_audit_event(owner_id, "create_job", &job.id.to_string(), "success");
        tracing::info!(job_id = %job.id, name = %job.name, estimate, "Scan job created");
        Ok(job)
    }

    /// Fire the scan on a background task and return immediately
    pub fn start(&self, job_id: Uuid) -> JoinHandle<Result<ScanJob>> {
        self.scheduler.start(job_id)
    }

    pub async fn run_to_completion(&self, job_id: Uuid) -> Result<ScanJob> {
        let _timer = TimingLogger::start(format!("job {}", job_id));
        self.scheduler.run_job(job_id).await
    }

    pub async fn job(&self, job_id: Uuid) -> Result<ScanJob> {
        self.jobs
            .get(job_id)
            .await?
            .ok_or_else(|| ScannerError::job_not_found(job_id))
    }

    async fn owned_job(&self, job_id: Uuid, owner_id: &str, action: &str) -> Result<ScanJob> {
        let job = self.job(job_id).await?;
        if !job.is_owned_by(owner_id) {
            log_audit_event(owner_id, action, &job_id.to_string(), "denied");
            return Err(ScannerError::permission_denied(
                action,
                format!("job {} belongs to another owner", job_id),
            ));
        }
        Ok(job)
    }

    /// Mark a CREATED or RUNNING job as CANCELLED. A running job stops at the
    /// next batch boundary. Finished jobs are returned unchanged.
    pub async fn cancel(&self, job_id: Uuid, owner_id: &str) -> Result<ScanJob> {
        let mut job = self.owned_job(job_id, owner_id, "cancel_job").await?;

        if job.status.is_terminal() {
            tracing::info!(job_id = %job_id, status = job.status.as_str(), "Job already finished");
            log_audit_event(owner_id, "cancel_job", &job_id.to_string(), "no-op");
            return Ok(job);
        }

        job.status = JobStatus::Cancelled;
        self.jobs.save(&job).await?;
        log_audit_event(owner_id, "cancel_job", &job_id.to_string(), "success");
        Ok(job)
    }

    pub async fn delete(&self, job_id: Uuid, owner_id: &str) -> Result<()> {
        let job = self.owned_job(job_id, owner_id, "delete_job").await?;
        if job.status == JobStatus::Running {
            return Err(ScannerError::validation(
                "status",
                "Cancel the running job before deleting it",
            ));
        }

        self.jobs.delete(job_id).await?;
        log_audit_event(owner_id, "delete_job", &job_id.to_string(), "success");
        Ok(())
    }

    pub async fn jobs_for_owner(&self, owner_id: &str) -> Result<Vec<ScanJob>> {
        self.jobs.list_by_owner(owner_id).await
    }

    pub async fn results(&self, job_id: Uuid) -> Result<Vec<ScanResult>> {
        self.results.list_by_job(job_id).await
    }

    /// Recurring jobs whose next run time has passed
    pub async fn due_recurring_jobs(&self, now: DateTime<Utc>) -> Result<Vec<ScanJob>> {
        self.jobs.due_recurring(now).await
    }
}
