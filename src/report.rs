//! Output for rdu
//!
//! Usage lines go to stdout, the progress spinner and the timing report to
//! stderr.

use crate::config::{DisplayMode, ScanConfig};
use crate::walker::{RootUsage, ScanStats};
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

/// How sizes are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeFormat {
    /// Divisor for plain output
    pub block_size: u64,
    /// Use binary units instead
    pub human: bool,
}

impl SizeFormat {
    pub fn from_config(config: &ScanConfig) -> Self {
        Self {
            block_size: config.block_size.max(1),
            human: config.human_readable,
        }
    }

    /// Render a byte count
    pub fn format(&self, bytes: u64) -> String {
        if self.human {
            format_size(bytes, BINARY)
        } else {
            (bytes / self.block_size).to_string()
        }
    }
}

/// Write the lines for one root.
///
/// Without a tree (or in summary mode) that is just the root. Otherwise every
/// listed entry follows in post-order, so a directory comes after its
/// contents. Depth and threshold filters never hide the root line.
pub fn write_usage<W: Write>(out: &mut W, usage: &RootUsage, config: &ScanConfig) -> io::Result<()> {
    let format = SizeFormat::from_config(config);

    let tree = match &usage.tree {
        Some(tree) if config.display != DisplayMode::Summary => tree,
        _ => return write_line(out, &format, usage.total_bytes, &usage.path),
    };
    let Some(root) = tree.root() else {
        return Ok(());
    };

    let threshold = config
        .min_size
        .map_or(0, |min| min.to_bytes(tree.node(root).total_size));

    for id in tree.post_order(root) {
        let node = tree.node(id);
        if id != root {
            if !node.is_dir && config.display != DisplayMode::All {
                continue;
            }
            if config.max_depth.is_some_and(|max| node.depth as usize > max) {
                continue;
            }
            if node.total_size < threshold {
                continue;
            }
        }
        write_line(out, &format, node.total_size, &tree.path_of(id))?;
    }
    Ok(())
}

/// Write the grand total line
pub fn write_total<W: Write>(out: &mut W, bytes: u64, config: &ScanConfig) -> io::Result<()> {
    let format = SizeFormat::from_config(config);
    writeln!(out, "{}\ttotal", format.format(bytes))
}

fn write_line<W: Write>(out: &mut W, format: &SizeFormat, bytes: u64, path: &Path) -> io::Result<()> {
    writeln!(out, "{}\t{}", format.format(bytes), path.display())
}

/// Spinner with live scan counters
pub struct ProgressReporter {
    /// Progress bar
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
        bar.set_style(spinner_style);
        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Update the progress display
    pub fn update(&self, root: &Path, stats: &ScanStats) {
        let msg = format!(
            "{} | Dirs: {} | Entries: {} | Size: {} | Errors: {}",
            root.display(),
            format_number(stats.dirs()),
            format_number(stats.entries()),
            format_size(stats.bytes(), BINARY),
            format_number(stats.error_count()),
        );
        self.bar.set_message(msg);
    }

    /// Finish and clear the progress display
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| {
            chunk
                .iter()
                .rev()
                .map(|&b| b as char)
                .collect::<String>()
        })
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Print per-worker timing for one root to stderr
pub fn print_timing(usage: &RootUsage) {
    eprintln!();
    eprintln!(
        "{} {}",
        style("Timing").cyan().bold(),
        usage.path.display()
    );
    eprintln!("{}", style("─".repeat(50)).dim());
    for worker in &usage.workers {
        let busy = worker.busy.as_secs_f64();
        let lifetime = worker.lifetime.as_secs_f64();
        let share = if lifetime > 0.0 { busy / lifetime * 100.0 } else { 0.0 };
        eprintln!(
            "  {} busy {:.3}s of {:.3}s ({:.0}%) | dirs {} | {}",
            style(format!("worker {:>3}", worker.id)).bold(),
            busy,
            lifetime,
            share,
            format_number(worker.tally.dirs),
            format_size(worker.bytes, BINARY),
        );
    }
    eprintln!(
        "  {} {:.3}s",
        style("Wall time:").bold(),
        usage.duration.as_secs_f64()
    );
    if usage.errors > 0 {
        eprintln!(
            "  {} {}",
            style("Errors:").yellow().bold(),
            format_number(usage.errors)
        );
    }
}
