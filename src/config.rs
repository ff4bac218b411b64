//! Configuration management
//!
//! Settings are layered from built-in defaults, an optional TOML file and
//! `ASSET_SCANNER__*` environment variables (`__` separates nested keys,
//! e.g. `ASSET_SCANNER__RESOURCES__QUEUE_CAPACITY=500`).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, info};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Reachability and port probing
    pub scanning: ScanningConfig,
    /// Adaptive thread count and batch size tuning
    pub resources: ResourcesConfig,
    /// Deep Windows introspection
    pub introspection: IntrospectionConfig,
    /// Recurring job handling
    pub scheduling: SchedulingConfig,
    pub logging: LoggingConfig,
    pub persistence: PersistenceConfig,
}

/// A named TCP service port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    pub name: String,
    pub port: u16,
}

impl ServicePort {
    pub fn new<S: Into<String>>(name: S, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanningConfig {
    /// Overall budget for the reachability check in milliseconds
    pub reachability_timeout_ms: u64,
    /// Ports tried concurrently to decide whether a host is up
    pub reachability_ports: Vec<u16>,
    /// Per-port connect timeout in milliseconds
    pub port_timeout_ms: u64,
    /// Budget for one forward or reverse DNS lookup in milliseconds
    pub dns_timeout_ms: u64,
    /// Lookups allowed on the blocking pool at once
    pub max_concurrent_dns: usize,
    /// Well-known services probed on every reachable host
    pub probe_ports: Vec<ServicePort>,
    /// Extra services probed on hosts classified as Mac
    pub mac_extra_ports: Vec<ServicePort>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesConfig {
    /// Seconds between load samples
    pub monitor_interval_secs: u64,
    pub min_threads: usize,
    /// Fraction of cores used for the initial thread count
    pub initial_thread_factor: f64,
    pub min_batch_size: usize,
    pub max_batch_size: usize,
    /// Upper bound on the batch size chosen at startup
    pub initial_batch_cap: usize,
    /// Batch size growth step under low load
    pub batch_step: usize,
    pub cpu_high: f64,
    pub cpu_low: f64,
    /// Memory ratio under which growth is allowed
    pub memory_ok: f64,
    pub memory_high: f64,
    /// CPU ratio assumed when the sample is unavailable
    pub cpu_fallback: f64,
    /// Lower bound on the worker pool's maximum size
    pub min_pool_size: usize,
    /// Pending probe slots beyond the pool before callers run probes inline
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntrospectionConfig {
    pub enabled: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub domain: Option<String>,
    pub wmi_timeout_secs: u64,
    pub smb_timeout_secs: u64,
    pub powershell_timeout_secs: u64,
    pub net_view_timeout_secs: u64,
    pub systeminfo_timeout_secs: u64,
    /// Ports whose openness hints at a Windows host
    pub signature_ports: Vec<ServicePort>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// Offset applied to `next_run_at` after a recurring job completes
    pub recurrence_interval_hours: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
    /// Daily rolling log file; stderr only when unset
    pub file_path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Base directory for the file store
    pub data_dir: PathBuf,
    /// Store backend (file, memory)
    pub store: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scanning: ScanningConfig {
                reachability_timeout_ms: 5000,
                reachability_ports: vec![80, 443, 22, 445, 139, 3389],
                port_timeout_ms: 1000,
                dns_timeout_ms: 2000,
                max_concurrent_dns: 10,
                probe_ports: vec![
                    ServicePort::new("FTP", 21),
                    ServicePort::new("SSH", 22),
                    ServicePort::new("Telnet", 23),
                    ServicePort::new("SMTP", 25),
                    ServicePort::new("DNS", 53),
                    ServicePort::new("HTTP", 80),
                    ServicePort::new("HTTPS", 443),
                    ServicePort::new("SMB", 445),
                    ServicePort::new("RDP", 3389),
                ],
                mac_extra_ports: vec![
                    ServicePort::new("AirPlay", 7000),
                    ServicePort::new("Bonjour", 5353),
                ],
            },
            resources: ResourcesConfig {
                monitor_interval_secs: 5,
                min_threads: 2,
                initial_thread_factor: 0.75,
                min_batch_size: 20,
                max_batch_size: 1000,
                initial_batch_cap: 500,
                batch_step: 20,
                cpu_high: 0.8,
                cpu_low: 0.3,
                memory_ok: 0.7,
                memory_high: 0.8,
                cpu_fallback: 0.5,
                min_pool_size: 10,
                queue_capacity: 250,
            },
            introspection: IntrospectionConfig {
                enabled: true,
                username: None,
                password: None,
                domain: None,
                wmi_timeout_secs: 15,
                smb_timeout_secs: 10,
                powershell_timeout_secs: 30,
                net_view_timeout_secs: 5,
                systeminfo_timeout_secs: 10,
                signature_ports: vec![
                    ServicePort::new("RDP", 3389),
                    ServicePort::new("SMB", 445),
                    ServicePort::new("NetBIOS", 139),
                ],
            },
            scheduling: SchedulingConfig {
                recurrence_interval_hours: 24,
            },
            logging: LoggingConfig::default(),
            persistence: PersistenceConfig {
                data_dir: PathBuf::from("./data"),
                store: "file".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from file with environment variable overrides
    pub async fn load<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref();

        info!("Loading configuration from: {}", config_path.display());

        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?);

        if config_path.exists() {
            debug!("Found configuration file, loading settings");
            settings = settings.add_source(config::File::from(config_path));
        } else {
            info!("No configuration file found, using defaults");
            Self::create_default_config(config_path).await?;
        }

        settings = settings.add_source(
            config::Environment::with_prefix("ASSET_SCANNER")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = settings
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        info!("Configuration loaded successfully");
        Ok(config)
    }

    async fn create_default_config<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        let config_content = toml::to_string_pretty(&Self::default())
            .context("Failed to serialize default configuration")?;

        tokio::fs::write(path, config_content)
            .await
            .context("Failed to write default configuration file")?;

        info!("Created default configuration file: {}", path.display());
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => return Err(anyhow::anyhow!("Invalid logging level: {}", self.logging.level)),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" => {}
            _ => return Err(anyhow::anyhow!("Invalid logging format: {}", self.logging.format)),
        }

        match self.persistence.store.to_lowercase().as_str() {
            "file" | "memory" => {}
            _ => return Err(anyhow::anyhow!("Invalid store kind: {}", self.persistence.store)),
        }

        let scanning = &self.scanning;
        if scanning.reachability_timeout_ms == 0 || scanning.port_timeout_ms == 0 || scanning.dns_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Probe timeouts must be greater than 0"));
        }
        if scanning.max_concurrent_dns == 0 {
            return Err(anyhow::anyhow!("max_concurrent_dns must be greater than 0"));
        }
        if scanning.reachability_ports.is_empty() {
            return Err(anyhow::anyhow!("At least one reachability port is required"));
        }

        let resources = &self.resources;
        if resources.monitor_interval_secs == 0 {
            return Err(anyhow::anyhow!("monitor_interval_secs must be greater than 0"));
        }
        if resources.min_threads == 0 {
            return Err(anyhow::anyhow!("min_threads must be greater than 0"));
        }
        if resources.min_batch_size == 0 || resources.min_batch_size > resources.max_batch_size {
            return Err(anyhow::anyhow!(
                "Batch bounds invalid: min {} max {}",
                resources.min_batch_size,
                resources.max_batch_size
            ));
        }
        if resources.cpu_low >= resources.cpu_high {
            return Err(anyhow::anyhow!("cpu_low must be below cpu_high"));
        }
        if resources.memory_ok > resources.memory_high {
            return Err(anyhow::anyhow!("memory_ok must not exceed memory_high"));
        }

        if self.scheduling.recurrence_interval_hours <= 0 {
            return Err(anyhow::anyhow!("recurrence_interval_hours must be positive"));
        }

        debug!("Configuration validation passed");
        Ok(())
    }

    pub fn reachability_timeout(&self) -> Duration {
        Duration::from_millis(self.scanning.reachability_timeout_ms)
    }

    pub fn port_timeout(&self) -> Duration {
        Duration::from_millis(self.scanning.port_timeout_ms)
    }

    pub fn dns_timeout(&self) -> Duration {
        Duration::from_millis(self.scanning.dns_timeout_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.resources.monitor_interval_secs)
    }

    pub fn recurrence_interval(&self) -> chrono::Duration {
        chrono::Duration::hours(self.scheduling.recurrence_interval_hours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scanning.probe_ports.len(), 9);
        assert_eq!(config.port_timeout(), Duration::from_secs(1));
        assert_eq!(config.reachability_timeout(), Duration::from_secs(5));
        assert_eq!(config.dns_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.resources.min_batch_size = 2000;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.resources.cpu_low = 0.9;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.scanning.port_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.scanning.max_concurrent_dns = 0;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_writes_default_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("conf").join("scanner.toml");

        let config = AppConfig::load(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(config.resources.queue_capacity, 250);

        // Second load reads the file that was just written
        let reloaded = AppConfig::load(&path).await.unwrap();
        assert_eq!(reloaded.scanning.probe_ports, config.scanning.probe_ports);
    }
}
