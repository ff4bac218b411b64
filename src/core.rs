//! Core application framework and data model
//!
//! `Application` wires the stores, resource controller, probe engine and
//! scheduler together and dispatches CLI commands. The records shared by
//! every component (jobs, results, assets) live here as well.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
    time::Duration,
};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::{
    cli::{Cli, Command, OutputFormat, ScanArgs},
    config::AppConfig,
    error::{Result, ScannerError},
    introspection::create_introspection_cascade,
    jobs::JobService,
    network::create_network_probe,
    persistence::{create_data_store, DataStores},
    reconcile::AssetReconciler,
    resources::{MonitorHandle, ResourceController, SysinfoSampler},
    scanner::{ProbeEngine, ProbeSettings},
    scheduler::{BatchScheduler, SchedulerSettings},
};

/// Free-form facts gathered about a host
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Open/closed state per probed TCP port
pub type PortStates = BTreeMap<u16, bool>;

/// Placeholder stored when a value could not be determined
pub const UNKNOWN: &str = "Unknown";

/// Probes a single address on behalf of a job and records the outcome
#[async_trait]
pub trait TargetProber: Send + Sync {
    /// Never fails: problems are captured in the returned result
    async fn probe(&self, job_id: Uuid, address: &str) -> ScanResult;
}

/// Main application orchestrator
pub struct Application {
    config: AppConfig,
    stores: DataStores,
    resources: Arc<ResourceController>,
    jobs: JobService,
    event_bus: Arc<EventBus>,
    _monitor: MonitorHandle,
}

impl Application {
    /// Create a new application instance with default implementations
    pub async fn new(config: AppConfig) -> Result<Self> {
        let event_bus = Arc::new(EventBus::new());
        let stores = create_data_store(&config).await?;

        let mut sampler = SysinfoSampler::new();
        let resources = Arc::new(ResourceController::calibrate(&config.resources, &mut sampler));
        let monitor = resources.spawn_monitor(Box::new(sampler), config.monitor_interval());

        let network = create_network_probe(&config);
        let cascade = Arc::new(create_introspection_cascade(&config, network.clone()));
        tracing::info!(strategies = ?cascade.strategy_names(), "Introspection cascade ready");
        let reconciler = Arc::new(AssetReconciler::new(stores.assets.clone()));
        let prober: Arc<dyn TargetProber> = Arc::new(ProbeEngine::new(
            ProbeSettings::from_config(&config),
            network,
            cascade,
            reconciler,
            stores.results.clone(),
        ));

        let scheduler = Arc::new(BatchScheduler::new(
            stores.jobs.clone(),
            stores.results.clone(),
            prober,
            resources.clone(),
            SchedulerSettings::from_config(&config),
            event_bus.clone(),
        ));
        let jobs = JobService::new(stores.jobs.clone(), stores.results.clone(), scheduler);

        Ok(Self {
            config,
            stores,
            resources,
            jobs,
            event_bus,
            _monitor: monitor,
        })
    }

    pub fn jobs(&self) -> &JobService {
        &self.jobs
    }

    /// Run the application with CLI arguments
    pub async fn run(&mut self, cli: Cli) -> Result<()> {
        let format = cli.format;
        match cli.command {
            Command::Scan(ScanArgs {
                addresses,
                segments,
                name,
                description,
                owner,
                recurring,
                schedule,
                create_only,
            }) => {
                let request = JobRequest {
                    name: name.unwrap_or_else(|| format!("scan-{}", Utc::now().format("%Y%m%d-%H%M%S"))),
                    description,
                    ip_addresses: addresses,
                    ip_segments: segments,
                    recurring,
                    schedule,
                };
                let job = self.jobs.create_job(&owner, request).await?;

                if create_only {
                    print_records(format, &[job])?;
                    return Ok(());
                }

                let finished = self.run_with_events(job.id).await?;
                print_records(format, &[finished])?;
            }
            Command::Run { job_id } => {
                let finished = self.run_with_events(job_id).await?;
                print_records(format, &[finished])?;
            }
            Command::RunDue => {
                let due = self.jobs.due_recurring_jobs(Utc::now()).await?;
                tracing::info!("{} recurring jobs due", due.len());
                let mut finished = Vec::with_capacity(due.len());
                for job in due {
                    finished.push(self.run_with_events(job.id).await?);
                }
                print_records(format, &finished)?;
            }
            Command::Jobs { owner } => {
                let jobs = self.jobs.jobs_for_owner(&owner).await?;
                print_records(format, &jobs)?;
            }
            Command::Results { job_id } => {
                let results = self.jobs.results(job_id).await?;
                print_records(format, &results)?;
            }
            Command::Cancel { job_id, owner } => {
                let job = self.jobs.cancel(job_id, &owner).await?;
                print_records(format, &[job])?;
            }
            Command::Delete { job_id, owner } => {
                self.jobs.delete(job_id, &owner).await?;
                println!("Deleted job {}", job_id);
            }
            Command::Assets { asset_type, online } => {
                let assets = match (asset_type, online) {
                    (Some(kind), _) => {
                        let kind = AssetType::from_str(&kind)?;
                        let mut assets = self.stores.assets.list_by_type(kind).await?;
                        if let Some(online) = online {
                            assets.retain(|asset| asset.online == online);
                        }
                        assets
                    }
                    (None, Some(online)) => self.stores.assets.list_by_online(online).await?,
                    (None, None) => self.stores.assets.list().await?,
                };
                print_records(format, &assets)?;
            }
            Command::Asset { asset_id } => {
                let asset = self
                    .stores
                    .assets
                    .get(asset_id)
                    .await?
                    .ok_or_else(|| ScannerError::asset_not_found(asset_id))?;
                print_records(format, &[asset])?;
            }
            Command::Resources => {
                let snapshot = self.resources.snapshot();
                print_records(format, &[snapshot.as_ref().clone()])?;
            }
            Command::ValidateConfig => {
                self.config.validate()?;
                println!("Configuration is valid");
            }
        }
        Ok(())
    }

    /// Runs a job in the foreground while logging its progress events
    async fn run_with_events(&self, job_id: Uuid) -> Result<ScanJob> {
        let receiver = self.event_bus.subscribe().await?;
        let mut progress = tokio::spawn(handle_events(receiver, job_id));
        let job = self.jobs.run_to_completion(job_id).await;

        // A job that never started publishes no JobFinished event
        if tokio::time::timeout(Duration::from_millis(250), &mut progress).await.is_err() {
            progress.abort();
        }
        job
    }
}

async fn handle_events(mut receiver: mpsc::Receiver<ScanEvent>, job_id: Uuid) {
    while let Some(event) = receiver.recv().await {
        match event {
            ScanEvent::JobStarted { job_id: id, total } if id == job_id => {
                tracing::info!(job_id = %id, total, "Job started");
            }
            ScanEvent::TargetProbed { job_id: id, address, successful } if id == job_id => {
                tracing::debug!(job_id = %id, address = %address, successful, "Target probed");
            }
            ScanEvent::BatchCompleted { job_id: id, completed, total } if id == job_id => {
                tracing::info!(job_id = %id, "Progress {}/{}", completed, total);
            }
            ScanEvent::JobFinished { job_id: id, status } if id == job_id => {
                tracing::info!(job_id = %id, status = status.as_str(), "Job finished");
                break;
            }
            _ => {}
        }
    }
}

fn print_records<T: Serialize + fmt::Display>(format: OutputFormat, records: &[T]) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(records)?),
        OutputFormat::Human => {
            if records.is_empty() {
                println!("(none)");
            }
            for record in records {
                println!("{}", record);
            }
        }
    }
    Ok(())
}

/// Event bus for progress notifications
pub struct EventBus {
    subscribers: RwLock<Vec<mpsc::Sender<ScanEvent>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    pub async fn subscribe(&self) -> Result<mpsc::Receiver<ScanEvent>> {
        let (tx, rx) = mpsc::channel(1000);
        self.subscribers.write().await.push(tx);
        Ok(rx)
    }

    /// Never blocks the publisher; full or closed subscribers miss the event
    pub async fn publish(&self, event: ScanEvent) {
        let mut subscribers = self.subscribers.write().await;
        subscribers.retain(|sender| !sender.is_closed());
        for sender in subscribers.iter() {
            if sender.try_send(event.clone()).is_err() {
                tracing::debug!("Event subscriber lagging, event dropped");
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum ScanEvent {
    JobStarted {
        job_id: Uuid,
        total: usize,
    },
    TargetProbed {
        job_id: Uuid,
        address: String,
        successful: bool,
    },
    BatchCompleted {
        job_id: Uuid,
        completed: usize,
        total: usize,
    },
    JobFinished {
        job_id: Uuid,
        status: JobStatus,
    },
}

/// What a caller submits to create a job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobRequest {
    pub name: String,
    pub description: Option<String>,
    pub ip_addresses: Vec<String>,
    pub ip_segments: Vec<String>,
    pub recurring: bool,
    /// Stored for reference only
    pub schedule: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanJob {
    pub id: Uuid,
    pub owner_id: String,
    pub name: String,
    pub description: Option<String>,
    pub ip_addresses: Vec<String>,
    pub ip_segments: Vec<String>,
    pub recurring: bool,
    pub schedule: Option<String>,
    pub status: JobStatus,
    pub total_targets: usize,
    pub completed_targets: usize,
    pub successful_targets: usize,
    pub failed_targets: usize,
    pub created_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
}

impl ScanJob {
    pub fn new<S: Into<String>>(owner_id: S, request: JobRequest, estimated_total: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            name: request.name,
            description: request.description,
            ip_addresses: request.ip_addresses,
            ip_segments: request.ip_segments,
            recurring: request.recurring,
            schedule: request.schedule,
            status: JobStatus::Created,
            total_targets: estimated_total,
            completed_targets: 0,
            successful_targets: 0,
            failed_targets: 0,
            created_at: Utc::now(),
            last_run_at: None,
            next_run_at: None,
        }
    }

    pub fn progress_percent(&self) -> f64 {
        if self.total_targets == 0 {
            return 100.0;
        }
        (self.completed_targets as f64 / self.total_targets as f64) * 100.0
    }

    pub fn is_owned_by(&self, owner_id: &str) -> bool {
        self.owner_id == owner_id
    }
}

impl fmt::Display for ScanJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:<24} {:<10} {}/{} {:.0}% ({} ok, {} failed)",
            self.id,
            self.name,
            self.status.as_str(),
            self.completed_targets,
            self.total_targets,
            self.progress_percent(),
            self.successful_targets,
            self.failed_targets
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Created,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "created" => Ok(Self::Created),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            _ => Err(ScannerError::validation("status", format!("Unknown job status: {}", s))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Outcome of probing one address during one run. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub id: Uuid,
    pub job_id: Uuid,
    pub asset_id: Option<Uuid>,
    pub address: String,
    pub hostname: Option<String>,
    pub successful: bool,
    pub error_message: Option<String>,
    pub scanned_at: DateTime<Utc>,
    pub collected: Attributes,
}

impl ScanResult {
    pub fn success(job_id: Uuid, address: &str, hostname: &str, asset_id: Uuid, collected: Attributes) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            asset_id: Some(asset_id),
            address: address.to_string(),
            hostname: Some(hostname.to_string()),
            successful: true,
            error_message: None,
            scanned_at: Utc::now(),
            collected,
        }
    }

    pub fn failure(job_id: Uuid, address: &str, error: &ScannerError) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            asset_id: None,
            address: address.to_string(),
            hostname: None,
            successful: false,
            error_message: Some(error.to_string()),
            scanned_at: Utc::now(),
            collected: Attributes::new(),
        }
    }
}

impl fmt::Display for ScanResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.error_message, self.successful) {
            (_, true) => write!(
                f,
                "{:<16} {:<32} ok",
                self.address,
                self.hostname.as_deref().unwrap_or("-")
            ),
            (Some(error), false) => write!(f, "{:<16} {:<32} failed: {}", self.address, "-", error),
            (None, false) => write!(f, "{:<16} {:<32} failed", self.address, "-"),
        }
    }
}

/// Canonical per-address inventory record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: Uuid,
    pub address: String,
    pub hostname: String,
    pub asset_type: AssetType,
    pub operating_system: String,
    pub os_version: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub mac_address: Option<String>,
    pub cpu_model: Option<String>,
    pub cpu_cores: Option<u32>,
    pub ram_size: Option<String>,
    pub gpu_name: Option<String>,
    pub last_logged_user: Option<String>,
    pub online: bool,
    pub first_discovered: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub last_scan_id: Option<Uuid>,
    pub attributes: Attributes,
}

impl Asset {
    pub fn new<S: Into<String>>(address: S) -> Self {
        let address = address.into();
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            hostname: address.clone(),
            address,
            asset_type: AssetType::Unknown,
            operating_system: UNKNOWN.to_string(),
            os_version: None,
            manufacturer: None,
            model: None,
            mac_address: None,
            cpu_model: None,
            cpu_cores: None,
            ram_size: None,
            gpu_name: None,
            last_logged_user: None,
            online: false,
            first_discovered: now,
            last_seen: now,
            last_scan_id: None,
            attributes: Attributes::new(),
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<16} {:<32} {:<15} {:<20} {}",
            self.address,
            self.hostname,
            self.asset_type.as_str(),
            self.operating_system,
            if self.online { "online" } else { "offline" }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetType {
    Windows,
    Linux,
    Mac,
    NetworkDevice,
    Unknown,
}

impl AssetType {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "windows" => Ok(Self::Windows),
            "linux" => Ok(Self::Linux),
            "mac" | "macos" => Ok(Self::Mac),
            "network_device" | "network" => Ok(Self::NetworkDevice),
            "unknown" => Ok(Self::Unknown),
            _ => Err(ScannerError::validation("asset_type", format!("Unknown asset type: {}", s))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Windows => "WINDOWS",
            Self::Linux => "LINUX",
            Self::Mac => "MAC",
            Self::NetworkDevice => "NETWORK_DEVICE",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }
}

/// Open ports as a sorted set, for attribute output
pub fn open_ports(states: &PortStates) -> BTreeSet<u16> {
    states
        .iter()
        .filter_map(|(port, open)| open.then_some(*port))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_round_trip_names() {
        for status in [
            JobStatus::Created,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(JobStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn test_asset_type_parsing() {
        assert_eq!(AssetType::from_str("network-device").unwrap(), AssetType::NetworkDevice);
        assert_eq!(AssetType::from_str("WINDOWS").unwrap(), AssetType::Windows);
        assert!(AssetType::from_str("toaster").is_err());
        assert_eq!(
            serde_json::to_string(&AssetType::NetworkDevice).unwrap(),
            "\"NETWORK_DEVICE\""
        );
    }

    #[test]
    fn test_new_job_defaults() {
        let request = JobRequest {
            name: "office".to_string(),
            ip_addresses: vec!["10.0.0.5".to_string()],
            ..Default::default()
        };
        let job = ScanJob::new("alice", request, 1);
        assert_eq!(job.status, JobStatus::Created);
        assert_eq!(job.total_targets, 1);
        assert!(job.is_owned_by("alice"));
        assert_eq!(job.progress_percent(), 0.0);
        assert!(job.to_string().contains("CREATED"));
        assert!(job.to_string().contains("0/1 0%"));
    }

    #[test]
    fn test_failure_result_carries_error() {
        let error = ScannerError::unreachable("10.9.9.9", "no route");
        let result = ScanResult::failure(Uuid::new_v4(), "10.9.9.9", &error);
        assert!(!result.successful);
        assert!(result.asset_id.is_none());
        assert!(result.error_message.unwrap().contains("no route"));
    }

    #[test]
    fn test_open_ports() {
        let mut states = PortStates::new();
        states.insert(22, true);
        states.insert(23, false);
        states.insert(3389, true);
        assert_eq!(open_ports(&states).into_iter().collect::<Vec<_>>(), vec![22, 3389]);
    }

    #[tokio::test]
    async fn test_event_bus_delivers_to_subscribers() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe().await.unwrap();
        let job_id = Uuid::new_v4();
        bus.publish(ScanEvent::JobStarted { job_id, total: 3 }).await;
        match rx.recv().await {
            Some(ScanEvent::JobStarted { total, .. }) => assert_eq!(total, 3),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
