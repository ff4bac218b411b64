//! Job, result and asset storage
//!
//! The engine only sees the [`JobStore`], [`ResultStore`] and [`AssetStore`]
//! traits. Two backends implement all three:
//! - [`InMemoryDataStore`] for tests and throwaway runs
//! - [`FileBasedDataStore`] keeping one JSON document per record under
//!   `data_dir/{jobs,results,assets}`
//!
//! Updates are plain read-modify-write; the last writer wins.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs,
    io::AsyncWriteExt,
    sync::{Mutex, RwLock},
};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    core::{Asset, AssetType, JobStatus, ScanJob, ScanResult},
    error::{Result, ScannerError},
};

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<ScanJob>>;

    /// Insert or replace
    async fn save(&self, job: &ScanJob) -> Result<()>;

    /// Replace the stored job unless it has been cancelled, as one step.
    /// Returns the status stored afterwards; `JobNotFound` when the job is gone.
    async fn save_unless_cancelled(&self, job: &ScanJob) -> Result<JobStatus>;

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<ScanJob>>;

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<ScanJob>>;

    /// Recurring jobs whose next run is at or before `now`
    async fn due_recurring(&self, now: DateTime<Utc>) -> Result<Vec<ScanJob>>;

    /// Returns whether a job was removed
    async fn delete(&self, id: Uuid) -> Result<bool>;
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn append(&self, result: &ScanResult) -> Result<()>;

    /// Results for one job in scan order
    async fn list_by_job(&self, job_id: Uuid) -> Result<Vec<ScanResult>>;
}

#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn find_by_address(&self, address: &str) -> Result<Option<Asset>>;

    async fn get(&self, id: Uuid) -> Result<Option<Asset>>;

    async fn upsert(&self, asset: &Asset) -> Result<()>;

    async fn list(&self) -> Result<Vec<Asset>>;

    async fn list_by_type(&self, asset_type: AssetType) -> Result<Vec<Asset>>;

    async fn list_by_online(&self, online: bool) -> Result<Vec<Asset>>;

    async fn delete(&self, id: Uuid) -> Result<bool>;
}

/// The three stores an application runs against
#[derive(Clone)]
pub struct DataStores {
    pub jobs: Arc<dyn JobStore>,
    pub results: Arc<dyn ResultStore>,
    pub assets: Arc<dyn AssetStore>,
}

impl DataStores {
    pub fn in_memory() -> Self {
        Self::from_backend(Arc::new(InMemoryDataStore::new()))
    }

    fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: JobStore + ResultStore + AssetStore + 'static,
    {
        Self {
            jobs: backend.clone(),
            results: backend.clone(),
            assets: backend,
        }
    }
}

fn is_due(job: &ScanJob, now: DateTime<Utc>) -> bool {
    job.recurring && job.next_run_at.map(|next| next <= now).unwrap_or(false)
}

fn sort_jobs(jobs: &mut [ScanJob]) {
    jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

fn sort_assets(assets: &mut [Asset]) {
    assets.sort_by(|a, b| a.address.cmp(&b.address));
}

/// Process-local store
#[derive(Default)]
pub struct InMemoryDataStore {
    jobs: RwLock<HashMap<Uuid, ScanJob>>,
    results: RwLock<Vec<ScanResult>>,
    assets: RwLock<HashMap<Uuid, Asset>>,
}

impl InMemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn assets_where<F: Fn(&Asset) -> bool + Send>(&self, keep: F) -> Vec<Asset> {
        let mut assets: Vec<Asset> = self.assets.read().await.values().filter(|a| keep(a)).cloned().collect();
        sort_assets(&mut assets);
        assets
    }

    async fn jobs_where<F: Fn(&ScanJob) -> bool + Send>(&self, keep: F) -> Vec<ScanJob> {
        let mut jobs: Vec<ScanJob> = self.jobs.read().await.values().filter(|j| keep(j)).cloned().collect();
        sort_jobs(&mut jobs);
        jobs
    }
}

#[async_trait]
impl JobStore for InMemoryDataStore {
    async fn get(&self, id: Uuid) -> Result<Option<ScanJob>> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn save(&self, job: &ScanJob) -> Result<()> {
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn save_unless_cancelled(&self, job: &ScanJob) -> Result<JobStatus> {
        let mut jobs = self.jobs.write().await;
        match jobs.get(&job.id) {
            None => Err(ScannerError::job_not_found(job.id)),
            Some(stored) if stored.status == JobStatus::Cancelled => Ok(JobStatus::Cancelled),
            Some(_) => {
                jobs.insert(job.id, job.clone());
                Ok(job.status)
            }
        }
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<ScanJob>> {
        Ok(self.jobs_where(|job| job.is_owned_by(owner_id)).await)
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<ScanJob>> {
        Ok(self.jobs_where(|job| job.status == status).await)
    }

    async fn due_recurring(&self, now: DateTime<Utc>) -> Result<Vec<ScanJob>> {
        Ok(self.jobs_where(|job| is_due(job, now)).await)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.jobs.write().await.remove(&id).is_some())
    }
}

#[async_trait]
impl ResultStore for InMemoryDataStore {
    async fn append(&self, result: &ScanResult) -> Result<()> {
        self.results.write().await.push(result.clone());
        Ok(())
    }

    async fn list_by_job(&self, job_id: Uuid) -> Result<Vec<ScanResult>> {
        Ok(self
            .results
            .read()
            .await
            .iter()
            .filter(|result| result.job_id == job_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AssetStore for InMemoryDataStore {
    async fn find_by_address(&self, address: &str) -> Result<Option<Asset>> {
        Ok(self
            .assets
            .read()
            .await
            .values()
            .find(|asset| asset.address == address)
            .cloned())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Asset>> {
        Ok(self.assets.read().await.get(&id).cloned())
    }

    async fn upsert(&self, asset: &Asset) -> Result<()> {
        self.assets.write().await.insert(asset.id, asset.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Asset>> {
        Ok(self.assets_where(|_| true).await)
    }

    async fn list_by_type(&self, asset_type: AssetType) -> Result<Vec<Asset>> {
        Ok(self.assets_where(|asset| asset.asset_type == asset_type).await)
    }

    async fn list_by_online(&self, online: bool) -> Result<Vec<Asset>> {
        Ok(self.assets_where(|asset| asset.online == online).await)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.assets.write().await.remove(&id).is_some())
    }
}

const JOBS: &str = "jobs";
const RESULTS: &str = "results";
const ASSETS: &str = "assets";

/// One pretty-printed JSON file per record
pub struct FileBasedDataStore {
    base_dir: PathBuf,
    /// Serializes job writes within this process
    job_writes: Mutex<()>,
}

impl FileBasedDataStore {
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            job_writes: Mutex::new(()),
        }
    }

    pub async fn init(&self) -> Result<()> {
        for collection in [JOBS, RESULTS, ASSETS] {
            fs::create_dir_all(self.base_dir.join(collection))
                .await
                .map_err(|e| ScannerError::storage(collection, e.to_string()))?;
        }

        tracing::info!("File-based data store initialized at: {}", self.base_dir.display());
        Ok(())
    }

    fn record_path(&self, collection: &str, id: Uuid) -> PathBuf {
        self.base_dir.join(collection).join(format!("{}.json", id))
    }

    async fn write_record<T: Serialize + Sync>(&self, collection: &str, id: Uuid, record: &T) -> Result<()> {
        let path = self.record_path(collection, id);
        let json_data = serde_json::to_string_pretty(record)?;

        // Write beside the target then rename so readers never see half a file
        let staging = path.with_extension("json.tmp");
        let mut file = fs::File::create(&staging)
            .await
            .map_err(|e| ScannerError::storage(collection, e.to_string()))?;
        file.write_all(json_data.as_bytes())
            .await
            .map_err(|e| ScannerError::storage(collection, e.to_string()))?;
        file.flush().await?;
        drop(file);
        fs::rename(&staging, &path)
            .await
            .map_err(|e| ScannerError::storage(collection, e.to_string()))?;

        tracing::debug!("Stored {} record {}", collection, id);
        Ok(())
    }

    async fn read_record<T: DeserializeOwned>(&self, collection: &str, id: Uuid) -> Result<Option<T>> {
        let path = self.record_path(collection, id);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        read_json(collection, &path).await.map(Some)
    }

    async fn read_all<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>> {
        let dir = self.base_dir.join(collection);
        let mut records = Vec::new();

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(ScannerError::storage(collection, e.to_string())),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|ext| ext == "json").unwrap_or(false) {
                match read_json(collection, &path).await {
                    Ok(record) => records.push(record),
                    Err(e) => tracing::warn!("Skipping unreadable record {}: {}", path.display(), e),
                }
            }
        }
        Ok(records)
    }

    async fn remove_record(&self, collection: &str, id: Uuid) -> Result<bool> {
        match fs::remove_file(self.record_path(collection, id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ScannerError::storage(collection, e.to_string())),
        }
    }

    async fn jobs_where<F: Fn(&ScanJob) -> bool + Send>(&self, keep: F) -> Result<Vec<ScanJob>> {
        let mut jobs: Vec<ScanJob> = self.read_all::<ScanJob>(JOBS).await?.into_iter().filter(|j| keep(j)).collect();
        sort_jobs(&mut jobs);
        Ok(jobs)
    }

    async fn assets_where<F: Fn(&Asset) -> bool + Send>(&self, keep: F) -> Result<Vec<Asset>> {
        let mut assets: Vec<Asset> = self.read_all::<Asset>(ASSETS).await?.into_iter().filter(|a| keep(a)).collect();
        sort_assets(&mut assets);
        Ok(assets)
    }
}

async fn read_json<T: DeserializeOwned>(collection: &str, path: &Path) -> Result<T> {
    let json_data = fs::read_to_string(path)
        .await
        .map_err(|e| ScannerError::storage(collection, e.to_string()))?;
    serde_json::from_str(&json_data).map_err(|e| ScannerError::storage(collection, e.to_string()))
}

#[async_trait]
impl JobStore for FileBasedDataStore {
    async fn get(&self, id: Uuid) -> Result<Option<ScanJob>> {
        self.read_record(JOBS, id).await
    }

    async fn save(&self, job: &ScanJob) -> Result<()> {
        let _guard = self.job_writes.lock().await;
        self.write_record(JOBS, job.id, job).await
    }

    async fn save_unless_cancelled(&self, job: &ScanJob) -> Result<JobStatus> {
        let _guard = self.job_writes.lock().await;
        match self.read_record::<ScanJob>(JOBS, job.id).await? {
            None => Err(ScannerError::job_not_found(job.id)),
            Some(stored) if stored.status == JobStatus::Cancelled => Ok(JobStatus::Cancelled),
            Some(_) => {
                self.write_record(JOBS, job.id, job).await?;
                Ok(job.status)
            }
        }
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<ScanJob>> {
        self.jobs_where(|job| job.is_owned_by(owner_id)).await
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<ScanJob>> {
        self.jobs_where(|job| job.status == status).await
    }

    async fn due_recurring(&self, now: DateTime<Utc>) -> Result<Vec<ScanJob>> {
        self.jobs_where(|job| is_due(job, now)).await
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let _guard = self.job_writes.lock().await;
        self.remove_record(JOBS, id).await
    }
}

#[async_trait]
impl ResultStore for FileBasedDataStore {
    async fn append(&self, result: &ScanResult) -> Result<()> {
        self.write_record(RESULTS, result.id, result).await
    }

    async fn list_by_job(&self, job_id: Uuid) -> Result<Vec<ScanResult>> {
        let mut results: Vec<ScanResult> = self
            .read_all::<ScanResult>(RESULTS)
            .await?
            .into_iter()
            .filter(|result| result.job_id == job_id)
            .collect();
        results.sort_by(|a, b| a.scanned_at.cmp(&b.scanned_at));
        Ok(results)
    }
}

#[async_trait]
impl AssetStore for FileBasedDataStore {
    async fn find_by_address(&self, address: &str) -> Result<Option<Asset>> {
        Ok(self
            .read_all::<Asset>(ASSETS)
            .await?
            .into_iter()
            .find(|asset| asset.address == address))
    }

    async fn get(&self, id: Uuid) -> Result<Option<Asset>> {
        self.read_record(ASSETS, id).await
    }

    async fn upsert(&self, asset: &Asset) -> Result<()> {
        self.write_record(ASSETS, asset.id, asset).await
    }

    async fn list(&self) -> Result<Vec<Asset>> {
        self.assets_where(|_| true).await
    }

    async fn list_by_type(&self, asset_type: AssetType) -> Result<Vec<Asset>> {
        self.assets_where(|asset| asset.asset_type == asset_type).await
    }

    async fn list_by_online(&self, online: bool) -> Result<Vec<Asset>> {
        self.assets_where(|asset| asset.online == online).await
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        self.remove_record(ASSETS, id).await
    }
}

/// Factory function for creating the configured stores
pub async fn create_data_store(config: &AppConfig) -> Result<DataStores> {
    match config.persistence.store.to_lowercase().as_str() {
        "memory" => Ok(DataStores::in_memory()),
        "file" => {
            let store = FileBasedDataStore::new(config.persistence.data_dir.clone());
            store.init().await?;
            Ok(DataStores::from_backend(Arc::new(store)))
        }
        other => Err(ScannerError::config(format!("Unknown store backend: {}", other))),
    }
}
