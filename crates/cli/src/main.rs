//! Docket CLI: open the stores in a data directory, report on them, and
//! migrate them when asked.
//!
//! ```text
//! docket [--data-dir DIR] [--migrate] [--log-level L] [--json] <status|migrate>
//! ```
//!
//! Exits 1 when a store needs migration (`re-run with --migrate`), holds
//! data newer than this build (`upgrade the server`), or fails otherwise.

mod commands;
mod format;

use std::path::{Path, PathBuf};
use std::process;

use anyhow::Context;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use docket::{
    AgentStore, CustomerStore, DocketConfig, GuidelineStore, ServiceRegistry, Stores,
    CONFIG_FILE_NAME,
};

use commands::{build_cli, DEFAULT_DATA_DIR};
use format::{format_error, format_report, OutputMode, StoreReport};

fn main() {
    let matches = build_cli().get_matches();

    let output_mode = if matches.get_flag("json") {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    let data_dir = PathBuf::from(
        matches
            .get_one::<String>("data-dir")
            .map(String::as_str)
            .unwrap_or(DEFAULT_DATA_DIR),
    );

    let config = match load_config(&data_dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", format_error(&e, output_mode));
            process::exit(1);
        }
    };

    let log_level = matches
        .get_one::<String>("log-level")
        .cloned()
        .unwrap_or_else(|| config.log_level.clone());
    init_logging(&log_level);

    let allow_migration = match matches.subcommand_name() {
        Some("migrate") => true,
        _ => matches.get_flag("migrate") || config.migrate,
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            process::exit(1);
        }
    };

    match runtime.block_on(run(&data_dir, &config, allow_migration)) {
        Ok(report) => println!("{}", format_report(&report, output_mode)),
        Err(e) => {
            eprintln!("{}", format_error(&e, output_mode));
            process::exit(1);
        }
    }
}

fn load_config(data_dir: &Path) -> anyhow::Result<DocketConfig> {
    let path = data_dir.join(CONFIG_FILE_NAME);
    DocketConfig::write_default_if_missing(&path)?;
    Ok(DocketConfig::from_file(&path)?)
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(
    data_dir: &Path,
    config: &DocketConfig,
    allow_migration: bool,
) -> anyhow::Result<StoreReport> {
    debug!(data_dir = %data_dir.display(), allow_migration, "opening stores");
    let stores = Stores::open(data_dir, config, allow_migration).await?;

    let report = StoreReport {
        data_dir: data_dir.display().to_string(),
        backend: config.backend.clone(),
        agents: stores.agents.list_agents(None).await?.len(),
        guidelines: stores.guidelines.list_guidelines(None).await?.len(),
        customers: stores.customers.list_customers(None).await?.len(),
        tool_services: stores.services.list_tool_services().await?.len(),
    };

    stores
        .close()
        .await
        .with_context(|| format!("closing stores in {}", data_dir.display()))?;
    Ok(report)
}
