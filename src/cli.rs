//! Command-line interface definition
//!
//! Subcommands cover the job lifecycle (create and run scans, list, cancel,
//! delete), inventory queries and a few operational checks.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use uuid::Uuid;

use crate::core::AssetType;

#[derive(Parser, Debug)]
#[command(
    name = "asset_scanner",
    about = "Adaptive network asset discovery",
    long_about = "Discovers hosts on a network, classifies their platform and keeps an asset inventory up to date"
)]
pub struct Cli {
    #[arg(short = 'c', long, help = "Configuration file path", value_name = "FILE", default_value = "config/asset_scanner.toml", global = true)]
    pub config_path: PathBuf,

    #[arg(short = 'v', long, help = "Increase verbosity level", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long, help = "Quiet mode (errors only)", global = true)]
    pub quiet: bool,

    #[arg(long, help = "Output format", value_enum, value_name = "FORMAT", default_value_t = OutputFormat::Human, global = true)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a scan job and run it in the foreground
    Scan(ScanArgs),

    /// Run an existing job
    Run {
        #[arg(help = "Job id")]
        job_id: Uuid,
    },

    /// Run every recurring job whose next run time has passed
    RunDue,

    /// List jobs for an owner
    Jobs {
        #[arg(long, default_value = "local")]
        owner: String,
    },

    /// Show the per-address results of a job
    Results {
        #[arg(help = "Job id")]
        job_id: Uuid,
    },

    /// Cancel a created or running job
    Cancel {
        job_id: Uuid,
        #[arg(long, default_value = "local")]
        owner: String,
    },

    /// Delete a job that is not running
    Delete {
        job_id: Uuid,
        #[arg(long, default_value = "local")]
        owner: String,
    },

    /// List inventory assets
    Assets {
        #[arg(long = "type", value_name = "TYPE", help = "windows, linux, mac, network-device or unknown")]
        asset_type: Option<String>,
        #[arg(long, help = "Only online (true) or offline (false) assets")]
        online: Option<bool>,
    },

    /// Show one asset
    Asset { asset_id: Uuid },

    /// Print the calibrated thread count and batch size
    Resources,

    /// Validate configuration and exit
    ValidateConfig,
}

#[derive(Args, Debug)]
pub struct ScanArgs {
    #[arg(short = 'a', long = "address", value_name = "ADDRESS", help = "Address or hostname to scan (repeatable)")]
    pub addresses: Vec<String>,

    #[arg(short = 's', long = "segment", value_name = "SEGMENT", help = "Segment such as 10.0.0.0/24 or 10.0.0.10-20 (repeatable)")]
    pub segments: Vec<String>,

    #[arg(short = 'n', long, help = "Job name (defaults to a timestamped name)")]
    pub name: Option<String>,

    #[arg(long)]
    pub description: Option<String>,

    #[arg(long, default_value = "local", help = "Owner recorded on the job")]
    pub owner: String,

    #[arg(long, help = "Schedule the job again after each run")]
    pub recurring: bool,

    #[arg(long, value_name = "EXPR", help = "Schedule expression stored with the job")]
    pub schedule: Option<String>,

    #[arg(long, help = "Store the job without running it")]
    pub create_only: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Human => write!(f, "human"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl Cli {
    /// Validate CLI arguments and resolve conflicts
    pub fn validate(&self) -> Result<(), String> {
        if self.quiet && self.verbose > 0 {
            return Err("Cannot use both quiet and verbose modes".to_string());
        }

        match &self.command {
            Command::Scan(scan) => {
                let has_target = scan
                    .addresses
                    .iter()
                    .chain(&scan.segments)
                    .any(|target| !target.trim().is_empty());
                if !has_target {
                    return Err("scan needs at least one --address or --segment".to_string());
                }
                if scan.owner.trim().is_empty() {
                    return Err("Owner must not be blank".to_string());
                }
            }
            Command::Assets {
                asset_type: Some(kind),
                ..
            } => {
                AssetType::from_str(kind).map_err(|e| e.to_string())?;
            }
            _ => {}
        }

        Ok(())
    }

    /// Log level forced by -q / -v, if any
    pub fn log_level_override(&self) -> Option<&'static str> {
        match (self.quiet, self.verbose) {
            (true, _) => Some("error"),
            (false, 0) => None,
            (false, 1) => Some("debug"),
            (false, _) => Some("trace"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_arguments() {
        let cli = Cli::parse_from([
            "asset_scanner",
            "scan",
            "-a",
            "10.0.0.5",
            "--segment",
            "10.0.1.0/24",
            "-s",
            "10.0.2.10-20",
            "--recurring",
        ]);
        assert!(cli.validate().is_ok());
        match cli.command {
            Command::Scan(scan) => {
                assert_eq!(scan.addresses, vec!["10.0.0.5"]);
                assert_eq!(scan.segments.len(), 2);
                assert!(scan.recurring);
                assert_eq!(scan.owner, "local");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_scan_requires_targets() {
        let cli = Cli::parse_from(["asset_scanner", "scan", "--name", "empty"]);
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_conflicting_options() {
        let cli = Cli::parse_from(["asset_scanner", "-q", "-v", "resources"]);
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_asset_type_filter_validation() {
        let cli = Cli::parse_from(["asset_scanner", "assets", "--type", "toaster"]);
        assert!(cli.validate().is_err());

        let cli = Cli::parse_from(["asset_scanner", "assets", "--type", "network-device", "--online", "true"]);
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["asset_scanner", "jobs", "--owner", "alice", "--format", "json", "-vv"]);
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.log_level_override(), Some("trace"));
        assert!(matches!(cli.command, Command::Jobs { ref owner } if owner == "alice"));
    }

    #[test]
    fn test_job_id_parsing() {
        assert!(Cli::try_parse_from(["asset_scanner", "results", "not-a-uuid"]).is_err());
        let id = Uuid::new_v4().to_string();
        assert!(Cli::try_parse_from(["asset_scanner", "cancel", id.as_str()]).is_ok());
    }
}
