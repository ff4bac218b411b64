//! # Asset Scanner - Adaptive Network Asset Discovery
//!
//! Probes address ranges, classifies what it finds and keeps a per-address
//! asset inventory current.
//!
//! ## Features
//!
//! - **Target Expansion**: /24 and bounded /16 segments, last-octet ranges
//! - **Adaptive Concurrency**: thread count and batch size follow CPU and memory load
//! - **Host Probing**: reachability, well-known service ports, heuristic OS classification
//! - **Windows Introspection**: WMI, admin share, PowerShell, local commands, port signature
//! - **Inventory Reconciliation**: rescans never erase what an earlier scan learned
//! - **Job Management**: ownership checks, cancellation between batches, recurring jobs
//!
//! ## Architecture
//!
//! - [`targets`] expands job targets into addresses
//! - [`resources`] samples system load and publishes tunables
//! - [`scanner`] probes one address using [`network`] and [`os_detection`]
//! - [`introspection`] runs the Windows fallback cascade
//! - [`reconcile`] merges probe output into [`core::Asset`] records
//! - [`scheduler`] drives a job through batches; [`jobs`] exposes it to callers
//! - [`persistence`] holds the job, result and asset store traits and backends

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod persistence;

// Discovery pipeline
pub mod introspection;
pub mod network;
pub mod os_detection;
pub mod reconcile;
pub mod resources;
pub mod scanner;
pub mod scheduler;
pub mod targets;

// Job lifecycle
pub mod jobs;

// Re-exports for convenience
pub use crate::{
    config::AppConfig,
    core::{Application, Asset, AssetType, JobRequest, JobStatus, ScanJob, ScanResult},
    error::{Result, ScannerError},
    jobs::JobService,
};
