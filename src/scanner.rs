//! Per-address probe engine
//!
//! For each address the engine:
//! - resolves it and checks reachability
//! - probes the configured service ports concurrently
//! - classifies platform and OS from hostname tokens and port signals
//! - enriches Mac hosts and runs the introspection cascade on Windows-like ones
//! - reconciles the asset record and appends a scan result
//!
//! A target never fails the job: every problem ends up in its [`ScanResult`].

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::{
    net::IpAddr,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    config::{AppConfig, ServicePort},
    core::{open_ports, AssetType, Attributes, PortStates, ScanResult, TargetProber, UNKNOWN},
    error::{ErrorContext, Result, ScannerError},
    introspection::IntrospectionCascade,
    log_probe_result,
    metrics::{self, EngineCounters},
    network::{NetworkProbe, ResolvedHost},
    os_detection::{
        classify_asset_type, classify_os, estimate_macos_version, looks_like_windows, mac_model_guess,
        PORT_SSH,
    },
    persistence::ResultStore,
    reconcile::{AssetReconciler, HostObservation},
};

const APPLE: &str = "Apple Inc.";
const MACOS: &str = "macOS";

#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub reachability_timeout: Duration,
    pub port_timeout: Duration,
    pub probe_ports: Vec<ServicePort>,
    pub mac_extra_ports: Vec<ServicePort>,
    pub introspection_enabled: bool,
}

impl ProbeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            reachability_timeout: config.reachability_timeout(),
            port_timeout: config.port_timeout(),
            probe_ports: config.scanning.probe_ports.clone(),
            mac_extra_ports: config.scanning.mac_extra_ports.clone(),
            introspection_enabled: config.introspection.enabled,
        }
    }
}

/// Service states gathered for one host
#[derive(Debug, Default)]
struct ServiceScan {
    ports: PortStates,
    by_name: Map<String, Value>,
}

impl ServiceScan {
    fn record(&mut self, service: &ServicePort, open: bool) {
        metrics::record_port_state(&service.name, open);
        self.ports.insert(service.port, open);
        self.by_name.insert(service.name.clone(), Value::Bool(open));
    }

    fn is_open(&self, port: u16) -> bool {
        self.ports.get(&port).copied().unwrap_or(false)
    }
}

pub struct ProbeEngine {
    settings: ProbeSettings,
    network: Arc<dyn NetworkProbe>,
    cascade: Arc<IntrospectionCascade>,
    reconciler: Arc<AssetReconciler>,
    results: Arc<dyn ResultStore>,
    counters: Arc<EngineCounters>,
}

impl ProbeEngine {
    pub fn new(
        settings: ProbeSettings,
        network: Arc<dyn NetworkProbe>,
        cascade: Arc<IntrospectionCascade>,
        reconciler: Arc<AssetReconciler>,
        results: Arc<dyn ResultStore>,
    ) -> Self {
        Self {
            settings,
            network,
            cascade,
            reconciler,
            results,
            counters: Arc::new(EngineCounters::new()),
        }
    }

    pub fn counters(&self) -> Arc<EngineCounters> {
        self.counters.clone()
    }

    async fn probe_services(&self, ip: IpAddr, services: &[ServicePort], scan: &mut ServiceScan) {
        let checks = services.iter().map(|service| async move {
            let open = self
                .network
                .is_port_open(ip, service.port, self.settings.port_timeout)
                .await;
            (service, open)
        });

        for (service, open) in futures::future::join_all(checks).await {
            scan.record(service, open);
        }
    }

    /// Confirm the host answers at all, then name it. DNS beyond a forward
    /// lookup only happens for hosts that answered.
    async fn locate(&self, address: &str) -> Result<ResolvedHost> {
        let ip = self.network.resolve_ip(address).await?;
        let reachable = self
            .network
            .is_reachable(ip, self.settings.reachability_timeout)
            .await
            .with_target_context(address)?;

        if !reachable {
            return Err(ScannerError::unreachable(
                address,
                format!("no answer within {:?}", self.settings.reachability_timeout),
            ));
        }

        let reverse = self.network.reverse_lookup(ip).await;
        Ok(ResolvedHost::new(address, ip, reverse))
    }

    async fn enrich_mac(&self, host: &ResolvedHost, scan: &mut ServiceScan, collected: &mut Attributes) {
        collected.insert("osFamily".to_string(), Value::from(MACOS));
        collected.insert("manufacturer".to_string(), Value::from(APPLE));

        self.probe_services(host.ip, &self.settings.mac_extra_ports, scan).await;

        let model = mac_model_guess(&host.hostname);
        collected.insert("macType".to_string(), Value::from(model));
        collected.insert("model".to_string(), Value::from(model));

        if !scan.is_open(PORT_SSH) {
            return;
        }
        if let Some(latency) = self
            .network
            .connect_latency(host.ip, PORT_SSH, self.settings.port_timeout)
            .await
        {
            let estimate = estimate_macos_version(latency);
            collected.insert("sshLatencyMs".to_string(), Value::from(latency.as_millis() as u64));
            collected.insert("osVersionEstimate".to_string(), Value::from(estimate.estimate));
            collected.insert("osVersionGuess".to_string(), Value::from(estimate.guess));
        }
    }

    async fn inspect(&self, job_id: Uuid, address: &str) -> Result<ScanResult> {
        let host = self.locate(address).await?;

        let mut scan = ServiceScan::default();
        self.probe_services(host.ip, &self.settings.probe_ports, &mut scan).await;

        let mut collected = Attributes::new();
        collected.insert("pingable".to_string(), Value::Bool(true));
        collected.insert("hostname".to_string(), Value::from(host.hostname.clone()));
        collected.insert(
            "canonicalHostname".to_string(),
            Value::from(host.canonical_hostname.clone()),
        );

        let mut asset_type = classify_asset_type(&host.hostname, &scan.ports);
        let mut operating_system = classify_os(&host.hostname, &scan.ports);
        let mut os_version = None;

        if asset_type == AssetType::Mac {
            operating_system = MACOS.to_string();
            self.enrich_mac(&host, &mut scan, &mut collected).await;
        }

        if self.settings.introspection_enabled && looks_like_windows(asset_type, &scan.ports) {
            let outcome = self.cascade.run(address).await;
            let known = |key: &str| {
                outcome
                    .attributes
                    .get(key)
                    .and_then(Value::as_str)
                    .filter(|value| !value.is_empty() && *value != UNKNOWN)
                    .map(str::to_string)
            };

            if let Some(name) = known("osName") {
                operating_system = name;
            }
            os_version = known("osVersion");
            if asset_type.is_unknown() && known("assetType").as_deref() == Some(AssetType::Windows.as_str()) {
                asset_type = AssetType::Windows;
            }
            if let Some(strategy) = outcome.strategy {
                collected.insert("introspectionMethod".to_string(), Value::from(strategy));
            }
            collected.extend(outcome.attributes);
        }

        log_probe_result!(address, true, open_ports(&scan.ports).len());
        collected.insert("openPorts".to_string(), Value::Object(scan.by_name));

        let observation = HostObservation {
            address: address.to_string(),
            hostname: host.hostname.clone(),
            asset_type,
            operating_system,
            os_version,
            attributes: collected.clone(),
        };
        let (asset, created) = self.reconciler.reconcile(&observation, job_id).await?;
        self.counters.asset(created);

        Ok(ScanResult::success(job_id, address, &host.hostname, asset.id, collected))
    }
}

#[async_trait]
impl TargetProber for ProbeEngine {
    async fn probe(&self, job_id: Uuid, address: &str) -> ScanResult {
        let started = Instant::now();

        let result = match self.inspect(job_id, address).await {
            Ok(result) => result,
            Err(e) => {
                debug!(address, error = %e, "Probe failed");
                log_probe_result!(address, false, 0usize);
                ScanResult::failure(job_id, address, &e)
            }
        };

        if let Err(e) = self.results.append(&result).await {
            warn!(address, error = %e, "Failed to store scan result");
        }

        self.counters.probe(result.successful);
        metrics::record_probe(result.successful, started.elapsed());
        result
    }
}
