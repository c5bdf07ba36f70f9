use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::warn;

use nfsdig::NfsDigEngine;
use nfsdig::settings::Settings;
use nfsdig::telemetry;

#[derive(Debug, Parser)]
struct Opt {
    /// Verbose output
    #[clap(short, long)]
    verbose: bool,

    /// YAML configuration file, overridden by NFSDIG_* variables
    #[clap(short, long, env = "NFSDIG_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(
        if opt.verbose { "info" } else { "warn" },
    ))
    .init();

    let settings = Settings::new(opt.config.as_deref()).context("Failed to load settings")?;
    let config = settings
        .to_configuration()
        .context("Invalid configuration")?;

    if let Err(e) = telemetry::init_metrics() {
        warn!("Failed to initialize metrics export: {:#}", e);
    }

    let result = match NfsDigEngine::new(config) {
        Ok(engine) => engine.run().await,
        Err(e) => Err(e),
    };

    telemetry::shutdown_metrics();
    result
}
