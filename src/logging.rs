//! Logging and observability
//!
//! Structured `tracing` output to stderr (pretty or JSON), an optional
//! daily rolling log file, and event macros shared by the scan pipeline.

use anyhow::{Context, Result};
use std::{io, path::Path, sync::OnceLock};
use tracing::{info, Level};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};
use uuid::Uuid;

use crate::{config::LoggingConfig, error::ScannerError};

/// Keeps the non-blocking file writer flushing for the life of the process
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize logging with default settings
pub fn init_logging() -> Result<()> {
    init_logging_with_config(&LoggingConfig::default())
}

/// Initialize logging with specific configuration
pub fn init_logging_with_config(config: &LoggingConfig) -> Result<()> {
    let env_filter = create_env_filter(&config.level)?;

    let file_layer = match &config.file_path {
        Some(path) => {
            let (directory, file_name) = split_log_path(path);
            let appender = rolling::daily(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            keep_file_guard(guard)?;
            Some(fmt::layer().json().with_writer(writer).with_ansi(false))
        }
        None => None,
    };

    let registry = Registry::default().with(env_filter).with(file_layer);

    match config.format.as_str() {
        "json" => {
            let console_layer = fmt::layer()
                .json()
                .with_writer(io::stderr)
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true);

            registry
                .with(console_layer)
                .try_init()
                .context("Failed to install JSON subscriber")?;
        }
        _ => {
            let console_layer = fmt::layer()
                .pretty()
                .with_writer(io::stderr)
                .with_target(false);

            registry
                .with(console_layer)
                .try_init()
                .context("Failed to install subscriber")?;
        }
    }

    info!("Logging system initialized with level: {}", config.level);
    Ok(())
}

/// Stores the file writer guard. A second guard would be dropped on the spot
/// and its writer would stop flushing, so that case is an error.
fn keep_file_guard(guard: WorkerGuard) -> Result<()> {
    FILE_GUARD.set(guard).map_err(|_| {
        anyhow::Error::from(ScannerError::config(
            "File logging is already initialized for this process",
        ))
    })
}

fn split_log_path(path: &Path) -> (&Path, &std::ffi::OsStr) {
    let directory = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .unwrap_or_else(|| std::ffi::OsStr::new("asset_scanner.log"));
    (directory, file_name)
}

/// Create environment filter from log level string
fn create_env_filter(level: &str) -> Result<EnvFilter> {
    let base_level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => return Err(ScannerError::config(format!("Invalid log level: {}", level)).into()),
    };

    let filter = EnvFilter::builder()
        .with_default_directive(base_level.into())
        .from_env()
        .context("Failed to create environment filter")?
        .add_directive("tokio=warn".parse()?)
        .add_directive("runtime=warn".parse()?);

    Ok(filter)
}

#[macro_export]
macro_rules! log_job_start {
    ($job_id:expr, $name:expr, $total:expr) => {
        tracing::info!(
            job_id = %$job_id,
            job_name = %$name,
            total_targets = $total,
            event = "job_start",
            "Starting scan job '{}' ({}) over {} targets",
            $name,
            $job_id,
            $total
        );
    };
}

#[macro_export]
macro_rules! log_batch_complete {
    ($job_id:expr, $batch_len:expr, $completed:expr, $total:expr, $duration:expr) => {
        tracing::info!(
            job_id = %$job_id,
            batch_len = $batch_len,
            completed = $completed,
            total = $total,
            duration_ms = $duration.as_millis() as u64,
            event = "batch_complete",
            "Batch of {} finished in {}ms ({}/{})",
            $batch_len,
            $duration.as_millis(),
            $completed,
            $total
        );
    };
}

#[macro_export]
macro_rules! log_probe_result {
    ($address:expr, $successful:expr, $open_ports:expr) => {
        tracing::debug!(
            address = %$address,
            successful = $successful,
            open_ports = $open_ports,
            event = "probe_result",
            "Probed {}: success={} open_ports={}",
            $address,
            $successful,
            $open_ports
        );
    };
}

#[macro_export]
macro_rules! log_error_with_context {
    ($error:expr, $context:expr) => {
        tracing::error!(
            error = %$error,
            context = $context,
            severity = %$error.severity(),
            recoverable = $error.is_recoverable(),
            event = "error",
            "Error in {}: {}",
            $context,
            $error
        );
    };
}

/// Phase and progress events for one job run
pub struct JobLogger {
    job_id: Uuid,
    job_name: String,
}

impl JobLogger {
    pub fn new<S: Into<String>>(job_id: Uuid, job_name: S) -> Self {
        Self {
            job_id,
            job_name: job_name.into(),
        }
    }

    pub fn log_phase_start(&self, phase: &str) {
        tracing::info!(
            job_id = %self.job_id,
            job_name = %self.job_name,
            phase = phase,
            event = "phase_start",
            "Starting {} phase for job '{}'",
            phase,
            self.job_name
        );
    }

    pub fn log_phase_complete(&self, phase: &str, duration: std::time::Duration) {
        tracing::info!(
            job_id = %self.job_id,
            phase = phase,
            duration_ms = duration.as_millis() as u64,
            event = "phase_complete",
            "Completed {} phase in {}ms",
            phase,
            duration.as_millis()
        );
    }

    pub fn log_progress(&self, completed: usize, total: usize) {
        let percentage = if total == 0 {
            100.0
        } else {
            (completed as f64 / total as f64) * 100.0
        };
        tracing::debug!(
            job_id = %self.job_id,
            completed = completed,
            total = total,
            percentage = format!("{:.1}%", percentage),
            event = "progress",
            "Progress: {}/{} ({:.1}%)",
            completed,
            total,
            percentage
        );
    }
}

/// Logs elapsed time for an operation when dropped
pub struct TimingLogger {
    name: String,
    start_time: std::time::Instant,
}

impl TimingLogger {
    pub fn start<S: Into<String>>(name: S) -> Self {
        let name = name.into();
        tracing::trace!(operation = %name, event = "timing_start", "Starting timing for: {}", name);

        Self {
            name,
            start_time: std::time::Instant::now(),
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }
}

impl Drop for TimingLogger {
    fn drop(&mut self) {
        let elapsed = self.start_time.elapsed();
        tracing::debug!(
            operation = %self.name,
            duration_ms = elapsed.as_millis() as u64,
            event = "timing_complete",
            "Completed '{}' in {}ms",
            self.name,
            elapsed.as_millis()
        );
    }
}

/// Audit trail for job ownership operations
pub fn log_audit_event(owner: &str, action: &str, resource: &str, result: &str) {
    tracing::info!(
        owner = owner,
        action = action,
        resource = resource,
        result = result,
        timestamp = chrono::Utc::now().to_rfc3339(),
        event = "audit",
        "Audit: {} performed {} on {} with result: {}",
        owner,
        action,
        resource,
        result
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{path::PathBuf, time::Duration};

    #[test]
    fn test_env_filter_creation() {
        assert!(create_env_filter("info").is_ok());
        assert!(create_env_filter("DEBUG").is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        assert!(create_env_filter("invalid").is_err());
    }

    #[test]
    fn test_split_log_path() {
        let path = PathBuf::from("/var/log/scanner/engine.log");
        let (dir, name) = split_log_path(&path);
        assert_eq!(dir, Path::new("/var/log/scanner"));
        assert_eq!(name, "engine.log");

        let bare = PathBuf::from("engine.log");
        let (dir, _) = split_log_path(&bare);
        assert_eq!(dir, Path::new("."));
    }

    #[test]
    fn test_second_file_guard_is_rejected() {
        let (_, first) = tracing_appender::non_blocking(io::sink());
        let (_, second) = tracing_appender::non_blocking(io::sink());
        // No other test in this binary installs a file guard.
        assert!(keep_file_guard(first).is_ok());
        let err = keep_file_guard(second).unwrap_err();
        assert!(err.to_string().contains("already initialized"));
    }

    #[test]
    fn test_job_logger() {
        let logger = JobLogger::new(Uuid::new_v4(), "nightly sweep");
        logger.log_phase_start("expansion");
        logger.log_progress(50, 100);
        logger.log_progress(0, 0);
        logger.log_phase_complete("expansion", Duration::from_millis(5));
    }
}
