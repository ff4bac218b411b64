//! End-to-end discovery runs against in-memory stores and a scripted network

use async_trait::async_trait;
use asset_scanner::{
    config::AppConfig,
    core::{Attributes, EventBus, ScanEvent, TargetProber},
    error::{Result, ScannerError},
    introspection::{IntrospectionCascade, IntrospectionStrategy},
    network::NetworkProbe,
    persistence::DataStores,
    reconcile::AssetReconciler,
    resources::ResourceController,
    scanner::{ProbeEngine, ProbeSettings},
    scheduler::{BatchScheduler, SchedulerSettings},
    AssetType, JobRequest, JobService, JobStatus,
};
use serde_json::Value;
use std::{
    collections::HashMap,
    net::IpAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

struct Host {
    hostname: &'static str,
    open: Vec<u16>,
    ssh_latency: Option<Duration>,
}

fn host(hostname: &'static str, open: &[u16], ssh_latency: Option<Duration>) -> Host {
    Host {
        hostname,
        open: open.to_vec(),
        ssh_latency,
    }
}

/// Hosts missing from the map do not answer
struct ScriptedNetwork {
    hosts: HashMap<IpAddr, Host>,
    delay: Duration,
}

impl ScriptedNetwork {
    fn office() -> Self {
        let hosts = [
            ("10.20.0.1", host("10.20.0.1", &[445, 3389], None)),
            ("10.20.0.2", host("ubuntu-web", &[22, 80], None)),
            ("10.20.0.3", host("reception-imac", &[22], Some(Duration::from_millis(25)))),
            ("10.20.0.50", host("core-switch-1", &[22, 443], None)),
        ]
        .into_iter()
        .map(|(ip, host)| (ip.parse().unwrap(), host))
        .collect();

        Self {
            hosts,
            delay: Duration::ZERO,
        }
    }

    fn slow_everywhere(delay: Duration) -> Self {
        Self {
            hosts: HashMap::new(),
            delay,
        }
    }
}

#[async_trait]
impl NetworkProbe for ScriptedNetwork {
    async fn resolve_ip(&self, address: &str) -> Result<IpAddr> {
        address
            .parse()
            .map_err(|_| ScannerError::resolution(address, "not an address"))
    }

    async fn reverse_lookup(&self, ip: IpAddr) -> Option<String> {
        self.hosts
            .get(&ip)
            .map(|h| h.hostname.to_string())
            .filter(|name| *name != ip.to_string())
    }

    async fn is_reachable(&self, ip: IpAddr, _limit: Duration) -> Result<bool> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.hosts.contains_key(&ip))
    }

    async fn is_port_open(&self, ip: IpAddr, port: u16, _limit: Duration) -> bool {
        self.hosts.get(&ip).map(|h| h.open.contains(&port)).unwrap_or(false)
    }

    async fn connect_latency(&self, ip: IpAddr, _port: u16, _limit: Duration) -> Option<Duration> {
        self.hosts.get(&ip).and_then(|h| h.ssh_latency)
    }
}

/// Reports hardware details on the first call only
struct FirstCallDetails {
    calls: AtomicUsize,
}

#[async_trait]
impl IntrospectionStrategy for FirstCallDetails {
    fn name(&self) -> &'static str {
        "wmi"
    }

    async fn probe(&self, _address: &str) -> Result<Attributes> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let mut attributes = Attributes::new();
        attributes.insert("osName".to_string(), Value::from("Microsoft Windows 11 Pro"));
        if call == 0 {
            attributes.insert("manufacturer".to_string(), Value::from("Dell Inc."));
            attributes.insert("cpuCores".to_string(), Value::from(8));
        }
        Ok(attributes)
    }
}

/// Never consulted when the first strategy answers
struct Unreachable {
    calls: AtomicUsize,
}

#[async_trait]
impl IntrospectionStrategy for Unreachable {
    fn name(&self) -> &'static str {
        "port-signature"
    }

    async fn probe(&self, _address: &str) -> Result<Attributes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Attributes::new())
    }
}

struct Harness {
    jobs: JobService,
    stores: DataStores,
    events: Arc<EventBus>,
    fallback: Arc<Unreachable>,
}

fn harness(network: ScriptedNetwork, threads: usize) -> Harness {
    let config = AppConfig::default();
    let stores = DataStores::in_memory();
    let events = Arc::new(EventBus::new());

    let primary = Arc::new(FirstCallDetails {
        calls: AtomicUsize::new(0),
    });
    let fallback = Arc::new(Unreachable {
        calls: AtomicUsize::new(0),
    });
    let cascade = IntrospectionCascade::new(vec![primary, fallback.clone()]);

    let prober: Arc<dyn TargetProber> = Arc::new(ProbeEngine::new(
        ProbeSettings::from_config(&config),
        Arc::new(network),
        Arc::new(cascade),
        Arc::new(AssetReconciler::new(stores.assets.clone())),
        stores.results.clone(),
    ));
    let resources = Arc::new(ResourceController::with_values(config.resources.clone(), 8, threads, 20));
    let scheduler = Arc::new(BatchScheduler::new(
        stores.jobs.clone(),
        stores.results.clone(),
        prober,
        resources,
        SchedulerSettings::from_config(&config),
        events.clone(),
    ));

    Harness {
        jobs: JobService::new(stores.jobs.clone(), stores.results.clone(), scheduler),
        stores,
        events,
        fallback,
    }
}

fn office_request() -> JobRequest {
    JobRequest {
        name: "office".to_string(),
        ip_addresses: vec!["10.20.0.50".to_string()],
        ip_segments: vec!["10.20.0.1-10".to_string()],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_full_job_builds_inventory() {
    let _ = asset_scanner::logging::init_logging();
    let h = harness(ScriptedNetwork::office(), 4);
    let mut events = h.events.subscribe().await.unwrap();

    let job = h.jobs.create_job("alice", office_request()).await.unwrap();
    let finished = h.jobs.run_to_completion(job.id).await.unwrap();

    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.total_targets, 11);
    assert_eq!(finished.completed_targets, finished.total_targets);
    assert_eq!(finished.successful_targets, 4);
    assert_eq!(finished.failed_targets, 7);

    let results = h.jobs.results(job.id).await.unwrap();
    assert_eq!(results.len(), 11);
    let down = results.iter().find(|r| r.address == "10.20.0.7").unwrap();
    assert!(!down.successful);
    assert!(!down.error_message.as_deref().unwrap_or_default().is_empty());

    let assets = h.stores.assets.list().await.unwrap();
    assert_eq!(assets.len(), 4);
    assert!(h.stores.assets.find_by_address("10.20.0.7").await.unwrap().is_none());

    let windows = h.stores.assets.find_by_address("10.20.0.1").await.unwrap().unwrap();
    assert_eq!(windows.asset_type, AssetType::Windows);
    assert_eq!(windows.operating_system, "Microsoft Windows 11 Pro");
    assert_eq!(windows.attributes["introspectionMethod"], Value::from("wmi"));
    assert_eq!(h.fallback.calls.load(Ordering::SeqCst), 0);

    let linux = h.stores.assets.find_by_address("10.20.0.2").await.unwrap().unwrap();
    assert_eq!(linux.operating_system, "Ubuntu Linux");

    let mac = h.stores.assets.find_by_address("10.20.0.3").await.unwrap().unwrap();
    assert_eq!(mac.asset_type, AssetType::Mac);
    assert_eq!(mac.attributes["osVersionEstimate"], Value::from("macOS 13 (Ventura) - Estimated"));
    assert!(mac.os_version.is_none());

    let switch = h.stores.assets.find_by_address("10.20.0.50").await.unwrap().unwrap();
    assert_eq!(switch.asset_type, AssetType::NetworkDevice);

    let mut saw_finish = false;
    while let Ok(event) = events.try_recv() {
        if let ScanEvent::JobFinished { status, .. } = event {
            assert_eq!(status, JobStatus::Completed);
            saw_finish = true;
        }
    }
    assert!(saw_finish);
}

#[tokio::test]
async fn test_rescan_keeps_earlier_details() {
    let h = harness(ScriptedNetwork::office(), 2);
    let job = h.jobs.create_job("alice", office_request()).await.unwrap();

    h.jobs.run_to_completion(job.id).await.unwrap();
    let first = h.stores.assets.find_by_address("10.20.0.1").await.unwrap().unwrap();
    assert_eq!(first.manufacturer.as_deref(), Some("Dell Inc."));

    let rerun = h.jobs.run_to_completion(job.id).await.unwrap();
    assert_eq!(rerun.status, JobStatus::Completed);
    assert_eq!(rerun.completed_targets, 11);

    let second = h.stores.assets.find_by_address("10.20.0.1").await.unwrap().unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(second.manufacturer.as_deref(), Some("Dell Inc."));
    assert_eq!(second.cpu_cores, Some(8));
    assert!(second.last_seen >= first.last_seen);
    assert_eq!(h.stores.assets.list().await.unwrap().len(), 4);
    assert_eq!(h.jobs.results(job.id).await.unwrap().len(), 22);
}

#[tokio::test]
async fn test_cancel_running_job() {
    let h = harness(ScriptedNetwork::slow_everywhere(Duration::from_millis(20)), 4);
    let job = h
        .jobs
        .create_job(
            "alice",
            JobRequest {
                name: "big sweep".to_string(),
                ip_segments: vec!["10.30.0.0/24".to_string()],
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let handle = h.jobs.start(job.id);

    // Wait for the first batch to be persisted
    loop {
        let current = h.jobs.job(job.id).await.unwrap();
        if current.completed_targets >= 20 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(h.jobs.cancel(job.id, "mallory").await.unwrap_err().is_permission_error());
    h.jobs.cancel(job.id, "alice").await.unwrap();

    let finished = handle.await.unwrap().unwrap();
    assert_eq!(finished.status, JobStatus::Cancelled);
    assert!(finished.completed_targets < finished.total_targets);

    let results = h.jobs.results(job.id).await.unwrap();
    assert_eq!(results.len(), finished.completed_targets);
    assert_eq!(h.jobs.job(job.id).await.unwrap().status, JobStatus::Cancelled);
}
