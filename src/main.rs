//! asset_scanner - Adaptive Network Asset Discovery
//!
//! Main entry point for the asset scanner.
//! Loads configuration, initializes logging and runs the CLI command.
//!
//! Copyright (c) 2025 Deepskilling Inc
//! Licensed under the MIT License (https://opensource.org/licenses/MIT)

use anyhow::{anyhow, Result};
use asset_scanner::{cli::Cli, config::AppConfig, core::Application, logging};
use clap::Parser;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();
    cli.validate().map_err(|e| anyhow!(e))?;

    // Load configuration before logging so the file/format settings apply
    let mut config = AppConfig::load(&cli.config_path).await?;
    if let Some(level) = cli.log_level_override() {
        config.logging.level = level.to_string();
    }
    logging::init_logging_with_config(&config.logging)?;

    info!("Starting asset_scanner");

    // Create and run application
    let mut app = Application::new(config).await?;
    app.run(cli).await?;

    info!("Command completed successfully");
    Ok(())
}
