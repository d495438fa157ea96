//! skyshard - Spatially Sharded Astronomical Catalog Ingest
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use skyshard::config::{CliArgs, Command, IngestArgs, IngestConfig, LocateArgs, StatusArgs};
use skyshard::error::{ConfigError, IngestError};
use skyshard::index::Coordinate;
use skyshard::ingest::{discover_inputs, open_ledger, InputFilter, IngestCoordinator};
use skyshard::progress::{format_number, print_header, print_summary, ProgressReporter};
use skyshard::registry::Registry;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Exit code for configuration errors
const EXIT_CONFIG: u8 = 2;

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            if is_config_error(&e) {
                ExitCode::from(EXIT_CONFIG)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn run() -> Result<ExitCode> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Setup logging
    setup_logging(args.verbose)?;

    let registry = Registry::default();

    match args.command {
        Command::Ingest(ingest) => run_ingest(ingest, args.verbose, &registry),
        Command::Locate(locate) => run_locate(locate, &registry),
        Command::Status(status) => run_status(status),
    }
}

/// Ingest every input file into the catalog
fn run_ingest(args: IngestArgs, verbose: bool, registry: &Registry) -> Result<ExitCode> {
    // Validate and create config
    let config = IngestConfig::from_args(args, verbose).context("Invalid configuration")?;

    let extensions = if config.extensions.is_empty() {
        registry.extensions().iter().map(|e| e.to_string()).collect()
    } else {
        config.extensions.clone()
    };
    let filter = InputFilter::new(extensions, config.exclude_patterns.clone());
    let inputs = discover_inputs(&config.inputs, &filter).context("Failed to find input files")?;

    info!(files = inputs.len(), "Discovered input files");

    let show_progress = config.show_progress;
    let report_path = config.report_path.clone();

    // Print header
    if show_progress {
        print_header(
            inputs.len(),
            config.worker_count,
            &config.output_root.display().to_string(),
            &config.indexer,
            config.depth,
        );
    }

    // Create coordinator
    let mut coordinator =
        IngestCoordinator::new(config, registry).context("Failed to open catalog")?;

    // Setup signal handler for graceful shutdown
    let shutdown_flag = coordinator.shutdown_flag();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, finishing in-flight shard writes...");
        shutdown_flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    if show_progress {
        let progress = ProgressReporter::new();
        progress.set_status("Starting workers...");
        coordinator = coordinator.with_progress(progress);
    }

    // Run the ingest
    let report = coordinator.run(inputs).context("Ingest failed")?;

    if let Some(path) = &report_path {
        report
            .write_json(path)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!(path = %path.display(), "Run report written");
    }

    if show_progress {
        print_summary(&report);
    }

    if report.cancelled {
        warn!("Ingest was cancelled before completion");
    }

    if report.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        info!(
            failed = report.files_failed,
            needs_attention = report.needs_attention.len(),
            "Ingest completed with errors"
        );
        Ok(ExitCode::FAILURE)
    }
}

/// Print the shard holding a position
fn run_locate(args: LocateArgs, registry: &Registry) -> Result<ExitCode> {
    let indexer = registry
        .indexer(&args.indexer, args.depth)
        .context("Invalid configuration")?;
    let coord = Coordinate::new(args.ra, args.dec).context("Invalid position")?;

    let shard = indexer.locate(&coord);
    let center = indexer.center(shard)?;

    println!("{}", shard);
    if args.neighbors {
        let neighbors = indexer
            .neighbors(shard)?
            .into_iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        println!("{} {}", style("neighbors:").dim(), neighbors);
    }
    println!(
        "{} ra={:.6} dec={:.6} ({} depth {})",
        style("center:").dim(),
        center.ra(),
        center.dec(),
        indexer.name(),
        indexer.depth()
    );

    Ok(ExitCode::SUCCESS)
}

/// List ledger entries of a catalog
fn run_status(args: StatusArgs) -> Result<ExitCode> {
    let ledger = open_ledger(&args.output).context("Failed to open ledger")?;
    let entries = ledger.entries(!args.all)?;

    if entries.is_empty() {
        if args.all {
            println!("No files recorded");
        } else {
            println!("No files need attention");
        }
        return Ok(ExitCode::SUCCESS);
    }

    for entry in &entries {
        let status = if entry.needs_attention() {
            style(entry.status.as_str()).yellow().bold()
        } else {
            style(entry.status.as_str()).green()
        };
        println!(
            "{:<10} {:>12} rows {:>6} shards  {}",
            status,
            format_number(entry.rows_written),
            entry.shards_written,
            entry.path
        );
        if let Some(error) = &entry.error {
            println!("{:<10} {}", "", style(error).dim());
        }
    }

    if entries.iter().any(|e| e.needs_attention()) {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn is_config_error(e: &anyhow::Error) -> bool {
    matches!(e.downcast_ref::<IngestError>(), Some(IngestError::Config(_)))
        || e.downcast_ref::<ConfigError>().is_some()
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) if verbose => EnvFilter::new("skyshard=debug,warn"),
        Err(_) => EnvFilter::new("skyshard=info,warn"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
