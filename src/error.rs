//! Error handling for the discovery engine
//!
//! Errors fall into three groups:
//! - Per-target errors (resolution, reachability, port timeouts), isolated to one result
//! - Per-strategy introspection errors, swallowed by the cascade
//! - Job-level errors (missing jobs, ownership, scheduler failures)

use std::{fmt, io, net::AddrParseError};
use thiserror::Error;
use uuid::Uuid;

/// Main result type used throughout the crate
pub type Result<T> = std::result::Result<T, ScannerError>;

#[derive(Error, Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum ScannerError {
    /// Address could not be parsed or resolved
    #[error("Resolution failure: {target} - {reason}")]
    Resolution { target: String, reason: String },

    /// Host did not answer the reachability check
    #[error("Host unreachable: {target} - {reason}")]
    Unreachable { target: String, reason: String },

    /// A single port connect attempt timed out. Recorded as closed.
    #[error("Port probe timeout: {target}:{port} after {timeout_ms}ms")]
    PortProbeTimeout {
        target: String,
        port: u16,
        timeout_ms: u64,
    },

    /// One introspection strategy failed
    #[error("Introspection error: {strategy} on {target} - {message}")]
    Introspection {
        strategy: String,
        target: String,
        message: String,
    },

    /// External command could not be run or exited badly
    #[error("Command error: {command} - {message}")]
    Command { command: String, message: String },

    #[error("Scan job not found: {id}")]
    JobNotFound { id: Uuid },

    #[error("Asset not found: {id}")]
    AssetNotFound { id: Uuid },

    #[error("Permission denied: {operation} - {reason}")]
    PermissionDenied { operation: String, reason: String },

    /// Anything that aborts a job run
    #[error("Scheduler error: job {job_id} - {message}")]
    Scheduler { job_id: Uuid, message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("IO error: {operation} - {message}")]
    Io { operation: String, message: String },

    #[error("Storage error: {collection} - {message}")]
    Storage { collection: String, message: String },

    #[error("Internal error: {context} - {message}")]
    Internal { context: String, message: String },
}

impl ScannerError {
    pub fn resolution<T: Into<String>, R: Into<String>>(target: T, reason: R) -> Self {
        Self::Resolution {
            target: target.into(),
            reason: reason.into(),
        }
    }

    pub fn unreachable<T: Into<String>, R: Into<String>>(target: T, reason: R) -> Self {
        Self::Unreachable {
            target: target.into(),
            reason: reason.into(),
        }
    }

    pub fn port_timeout<T: Into<String>>(target: T, port: u16, timeout_ms: u64) -> Self {
        Self::PortProbeTimeout {
            target: target.into(),
            port,
            timeout_ms,
        }
    }

    /// Create an introspection error for one strategy
    pub fn introspection<S: Into<String>, T: Into<String>, M: Into<String>>(
        strategy: S,
        target: T,
        message: M,
    ) -> Self {
        Self::Introspection {
            strategy: strategy.into(),
            target: target.into(),
            message: message.into(),
        }
    }

    pub fn command<C: Into<String>, M: Into<String>>(command: C, message: M) -> Self {
        Self::Command {
            command: command.into(),
            message: message.into(),
        }
    }

    pub fn job_not_found(id: Uuid) -> Self {
        Self::JobNotFound { id }
    }

    pub fn asset_not_found(id: Uuid) -> Self {
        Self::AssetNotFound { id }
    }

    pub fn permission_denied<O: Into<String>, R: Into<String>>(operation: O, reason: R) -> Self {
        Self::PermissionDenied {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn scheduler<M: Into<String>>(job_id: Uuid, message: M) -> Self {
        Self::Scheduler {
            job_id,
            message: message.into(),
        }
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn validation<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn io<O: Into<String>, M: Into<String>>(operation: O, message: M) -> Self {
        Self::Io {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn storage<C: Into<String>, M: Into<String>>(collection: C, message: M) -> Self {
        Self::Storage {
            collection: collection.into(),
            message: message.into(),
        }
    }

    pub fn internal<C: Into<String>, M: Into<String>>(context: C, message: M) -> Self {
        Self::Internal {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Per-target failures that a later run may well get past
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Resolution { .. }
                | Self::Unreachable { .. }
                | Self::PortProbeTimeout { .. }
                | Self::Introspection { .. }
                | Self::Command { .. }
        )
    }

    pub fn is_permission_error(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. })
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Internal { .. } | Self::Scheduler { .. } => ErrorSeverity::Critical,
            Self::PermissionDenied { .. } => ErrorSeverity::High,
            Self::Configuration { .. } | Self::Validation { .. } => ErrorSeverity::High,
            Self::Io { .. } | Self::Storage { .. } => ErrorSeverity::Medium,
            Self::JobNotFound { .. } | Self::AssetNotFound { .. } => ErrorSeverity::Medium,
            Self::Resolution { .. } | Self::Unreachable { .. } => ErrorSeverity::Low,
            Self::PortProbeTimeout { .. } | Self::Introspection { .. } | Self::Command { .. } => {
                ErrorSeverity::Low
            }
        }
    }
}

/// Error severity levels for logging and monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl From<io::Error> for ScannerError {
    fn from(error: io::Error) -> Self {
        Self::io("IO operation", error.to_string())
    }
}

impl From<AddrParseError> for ScannerError {
    fn from(error: AddrParseError) -> Self {
        Self::resolution("IP address", error.to_string())
    }
}

impl From<serde_json::Error> for ScannerError {
    fn from(error: serde_json::Error) -> Self {
        Self::storage("json", error.to_string())
    }
}

impl From<config::ConfigError> for ScannerError {
    fn from(error: config::ConfigError) -> Self {
        Self::config(error.to_string())
    }
}

impl From<anyhow::Error> for ScannerError {
    fn from(error: anyhow::Error) -> Self {
        Self::internal("anyhow", error.to_string())
    }
}

impl From<tokio::task::JoinError> for ScannerError {
    fn from(error: tokio::task::JoinError) -> Self {
        Self::internal("task", error.to_string())
    }
}

/// Attach target or strategy context to lower-level errors
pub trait ErrorContext<T> {
    fn with_target_context(self, target: &str) -> Result<T>;
    fn with_strategy_context(self, strategy: &str, target: &str) -> Result<T>;
}

impl<T, E: Into<ScannerError>> ErrorContext<T> for std::result::Result<T, E> {
    fn with_target_context(self, target: &str) -> Result<T> {
        self.map_err(|e| match e.into() {
            ScannerError::Io { message, .. } => ScannerError::unreachable(target, message),
            other => other,
        })
    }

    fn with_strategy_context(self, strategy: &str, target: &str) -> Result<T> {
        self.map_err(|e| match e.into() {
            introspection @ ScannerError::Introspection { .. } => introspection,
            other => ScannerError::introspection(strategy, target, other.to_string()),
        })
    }
}
