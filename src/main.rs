//! rdu - Parallel Disk Usage Analyzer
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use rdu::config::{CliArgs, ScanConfig};
use rdu::report::{print_timing, write_total, write_usage, ProgressReporter};
use rdu::tree;
use rdu::walker::{Coordinator, RootUsage};
use std::io::{self, BufWriter, Write};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every root could be measured
fn run() -> Result<bool> {
    // Parse CLI arguments (usage errors exit with status 2 here)
    let args = CliArgs::parse();

    // Setup logging
    setup_logging(args.verbose)?;

    // Validate and create config
    let config = ScanConfig::from_args(args).context("Invalid configuration")?;

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    if let Some(cache) = &config.load_cache {
        let tree = tree::load(cache)
            .with_context(|| format!("Failed to load cache '{}'", cache.display()))?;
        let usage = RootUsage::from_tree(tree);
        write_usage(&mut out, &usage, &config)?;
        if config.show_total {
            write_total(&mut out, usage.total_bytes, &config)?;
        }
        out.flush()?;
        return Ok(true);
    }

    run_scan(&config, &mut out)
}

fn run_scan<W: Write>(config: &ScanConfig, out: &mut W) -> Result<bool> {
    let coordinator = Coordinator::new(config);

    // Create progress reporter
    let progress = config.show_progress.then(ProgressReporter::new);

    let mut grand_total = 0u64;
    let mut all_ok = true;

    for path in &config.paths {
        let result = coordinator.scan_root(path, |stats| {
            if let Some(p) = &progress {
                p.update(path, stats);
            }
        });

        let usage = match result {
            Ok(usage) => usage,
            Err(e) => {
                error!(path = %path.display(), "{}", e);
                all_ok = false;
                continue;
            }
        };

        if usage.errors > 0 {
            info!(path = %path.display(), errors = usage.errors, "Scan completed with errors");
        }

        if let (Some(cache), Some(tree)) = (&config.save_cache, &usage.tree) {
            tree::save(tree, cache)
                .with_context(|| format!("Failed to save cache '{}'", cache.display()))?;
            info!(path = %cache.display(), nodes = tree.len(), "Cache written");
        }

        grand_total += usage.total_bytes;
        write_usage(out, &usage, config)?;

        if config.track_time {
            out.flush()?;
            print_timing(&usage);
        }
    }

    if let Some(p) = &progress {
        p.finish_and_clear();
    }

    if config.show_total {
        write_total(out, grand_total, config)?;
    }
    out.flush()?;

    Ok(all_ok)
}

fn setup_logging(verbose: bool) -> Result<()> {
    let default_filter = if verbose { "rdu=debug,warn" } else { "rdu=warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
