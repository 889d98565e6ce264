//! storecheck: runs the CRUD verification protocol against every configured
//! data store and reports the outcome.
//!
//! The configuration is read from `config.yaml` in the working directory, or
//! from the file named by `STORECHECK_CONFIG`. Log verbosity follows
//! `RUST_LOG` (default `info`).
//!
//! Exit status:
//!
//! - `0`: every step passed
//! - `1`: at least one step failed
//! - `2`: the configuration could not be loaded

use anyhow::{bail, Context};
use clap::Parser;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use storecheck_backends::ConnectionEstablisher;
use storecheck_core::config::CONFIG_PATH_ENV;
use storecheck_core::{CheckConfig, Coordinator, VerificationReport};

const EXIT_OK: u8 = 0;
const EXIT_FAILURES: u8 = 1;
const EXIT_CONFIG: u8 = 2;

/// Verifies CRUD behavior of ClickHouse, TiDB, TiKV and Elasticsearch instances.
#[derive(Parser, Debug)]
#[command(name = "storecheck", version, about)]
#[command(after_help = "Reads config.yaml from the working directory unless STORECHECK_CONFIG is set.")]
struct Cli {}

#[tokio::main]
async fn main() -> ExitCode {
    let _cli = Cli::parse();
    init_tracing();

    let path = CheckConfig::default_path();
    let config = match load_config(&path).await {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("storecheck: {:#} (set {} to use another file)", e, CONFIG_PATH_ENV);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    for backend in &config.backends {
        tracing::debug!(config = ?backend, "configured backend");
    }

    let coordinator = Coordinator::new(Arc::new(ConnectionEstablisher::new()), &config.settings);
    let report = coordinator.run_config(&config).await;
    println!("{}", report);

    let mut status = exit_status(&report);
    if let Some(report_path) = &config.settings.report_path {
        if let Err(e) = report.write_json(report_path).await {
            tracing::error!(path = %report_path.display(), "failed to write report: {}", e);
            status = EXIT_FAILURES;
        }
    }
    ExitCode::from(status)
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Loads the configuration and rejects files that configure nothing.
async fn load_config(path: &Path) -> anyhow::Result<CheckConfig> {
    let config = CheckConfig::load(path)
        .await
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    if config.backends.is_empty() {
        bail!("{} configures no backends", path.display());
    }
    Ok(config)
}

fn exit_status(report: &VerificationReport) -> u8 {
    if report.has_failures() {
        EXIT_FAILURES
    } else {
        EXIT_OK
    }
}
