use clap::Parser;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;

mod cli;
mod commands;

use cli::{Cli, Commands, OutputFormat};
use pagewatch::config::{Config, LogLevel};

fn setup_logging(log_level: &LogLevel) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pagewatch")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("pagewatch.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    // RUST_LOG env var takes precedence, otherwise use config log_level
    let mut builder = env_logger::Builder::new();

    if std::env::var("RUST_LOG").is_ok() {
        builder.parse_default_env();
    } else {
        builder.filter_level(log_level.as_filter());
    }

    builder.target(env_logger::Target::Pipe(target)).init();

    info!("Logging initialized, writing to: {}", log_file.display());
    info!(
        "Log level: {} (from {})",
        log_level.as_filter(),
        if std::env::var("RUST_LOG").is_ok() { "RUST_LOG env" } else { "config" }
    );
    Ok(())
}

fn run(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Commands::Fixture {
            target,
            collector,
            format,
        } => commands::fixture::run(&target, collector, OutputFormat::resolve(format), &config),
        Commands::Config { format } => commands::config::run(format.unwrap_or(OutputFormat::Yaml), &config),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration before logging, so Config::load stays silent
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    setup_logging(&config.log_level).context("Failed to setup logging")?;

    info!("Starting pagewatch with config from: {:?}", cli.config);

    run(cli, config).context("Command failed")?;

    Ok(())
}
