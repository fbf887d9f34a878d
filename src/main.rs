use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use simplelog::{ColorChoice, CombinedLogger, Config, SharedLogger, TermLogger, TerminalMode, WriteLogger};

use rust_artifact_report::artifacts::builtin_registry;
use rust_artifact_report::cli::{Args, Commands, ListOpts, RunOpts};
use rust_artifact_report::config::{load_config, RunConfig};
use rust_artifact_report::constants::RUN_LOG_FILE_NAME;
use rust_artifact_report::models::parse_utc_offset;
use rust_artifact_report::orchestrator::{Orchestrator, RunRequest, Selection};
use rust_artifact_report::registry::ArtifactFilter;
use rust_artifact_report::utils::manifest::RunManifest;

fn main() -> Result<()> {
    // Parse arguments
    let args = Args::parse();

    match args.command {
        Commands::List(opts) => {
            initialize_logging(false, None)?;
            list_artifacts(&opts)
        }
        Commands::Run(opts) => run_report(&opts),
        Commands::InitConfig { path } => {
            initialize_logging(false, None)?;
            info!("Creating default configuration file at {}", path.display());
            RunConfig::create_default_config_file(&path)?;
            info!("Configuration file created successfully");
            Ok(())
        }
    }
}

/// Terminal logging, plus a copy into `log_file` when given.
fn initialize_logging(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let log_level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];
    if let Some(path) = log_file {
        let file = File::create(path)
            .with_context(|| format!("Failed to create log file {}", path.display()))?;
        loggers.push(WriteLogger::new(log_level, Config::default(), file));
    }

    CombinedLogger::init(loggers).context("Failed to initialize logger")?;
    Ok(())
}

fn list_artifacts(opts: &ListOpts) -> Result<()> {
    let registry = builtin_registry()?;
    let mut filter = ArtifactFilter::categories(&opts.categories);
    filter.output_kind = opts.output_kind;
    let descriptors = registry.list(&filter);

    if opts.json {
        let json = serde_json::to_string_pretty(&descriptors).context("Failed to serialize artifact list")?;
        println!("{}", json);
        return Ok(());
    }

    println!("{:<28} {:<16} {}", "KEY", "CATEGORY", "NAME");
    for descriptor in &descriptors {
        println!("{:<28} {:<16} {}", descriptor.key, descriptor.category, descriptor.name);
    }
    println!("\n{} artifact(s)", descriptors.len());
    Ok(())
}

fn selection(opts: &RunOpts) -> Selection {
    if opts.all {
        Selection::All
    } else if !opts.artifacts.is_empty() {
        Selection::Keys(opts.artifacts.clone())
    } else {
        Selection::Categories(opts.categories.clone())
    }
}

fn run_report(opts: &RunOpts) -> Result<()> {
    fs::create_dir_all(&opts.output)
        .with_context(|| format!("Failed to create output directory {}", opts.output.display()))?;
    initialize_logging(opts.verbose, Some(&opts.output.join(RUN_LOG_FILE_NAME)))?;

    info!("Starting artifact report");
    let config = load_config(opts.config.as_deref())?;
    let timezone = parse_utc_offset(&opts.timezone)?;
    let registry = Arc::new(builtin_registry()?);

    let request = RunRequest {
        evidence_root: opts.evidence.clone(),
        output_dir: opts.output.clone(),
        selection: selection(opts),
        timezone,
        wrap_text: opts.wrap_text,
        concurrency: opts.concurrency,
        timeout: opts.timeout.map(Duration::from_secs),
        cancel_on_interrupt: true,
    };

    let mut orchestrator = Orchestrator::new(registry, config);
    let manifest = match orchestrator.run_blocking(request) {
        Ok(manifest) => manifest,
        Err(fault) => {
            error!("Run aborted: {}", fault);
            return Err(fault.into());
        }
    };

    summarize(&manifest, &opts.output)
}

/// Log per-artifact failures and a cancellation notice for a finished run.
///
/// A run that reached Finalizing is a success for the exit code, even when
/// cancelled; `manifest.json` records which artifacts never started.
fn summarize(manifest: &RunManifest, output: &Path) -> Result<()> {
    for err in manifest.artifacts.iter().filter_map(|e| e.error.as_ref()) {
        warn!("{}", err);
    }
    if manifest.cancelled {
        warn!(
            "Run cancelled: {} artifact(s) were not started",
            manifest.counts.cancelled
        );
    }
    info!("Report written to {}", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_artifact_report::dispatch::ArtifactStatus;
    use rust_artifact_report::utils::manifest::ArtifactEntry;

    #[test]
    fn test_cancelled_run_still_exits_cleanly() {
        let mut manifest = RunManifest::new("run-1", "host", Path::new("/ev"), Path::new("/out"), "+00:00");
        manifest.record(ArtifactEntry::new("adId", "Advertiser Identifier", "Identifiers", ArtifactStatus::Succeeded));
        manifest.record(ArtifactEntry::new("routined", "Routined", "Locations", ArtifactStatus::Cancelled));
        manifest.finish(true);

        assert!(summarize(&manifest, Path::new("/out")).is_ok());
    }
}
