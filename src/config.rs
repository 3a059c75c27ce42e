//! Configuration types for rdu
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - The validated, immutable runtime configuration shared by the
//!   coordinator, the scheduler and the scanner

use crate::error::ConfigError;
use crate::size::MinSize;
use clap::{ArgAction, Parser};
use std::path::PathBuf;

/// Maximum reasonable worker count
const MAX_THREADS: usize = 512;

/// Default output block size (the unit of `st_blocks`)
pub const DEFAULT_BLOCK_SIZE: u64 = 512;

/// Parallel disk usage analyzer
#[derive(Parser, Debug, Clone)]
#[command(
    name = "rdu",
    version,
    about = "Parallel disk usage analyzer with a persistent tree cache",
    long_about = "Summarizes the disk usage (allocated blocks, not apparent size) of each PATH.\n\n\
                  Directories are scanned by a pool of worker threads sharing one task stack.\n\
                  The scanned tree can be saved to a cache file and listed again later\n\
                  without touching the filesystem.",
    after_help = "EXAMPLES:\n    \
        rdu /usr -j 8\n    \
        rdu -h -d 1 ~/src\n    \
        rdu -a -t 10MiB /var/log\n    \
        rdu --save-cache home.rdu ~\n    \
        rdu --load-cache home.rdu -d 2 -t 5%",
    disable_help_flag = true
)]
pub struct CliArgs {
    /// Files or directories to measure (default: current directory)
    #[arg(value_name = "PATH")]
    pub paths: Vec<PathBuf>,

    /// Number of worker threads
    #[arg(short = 'j', long, default_value_t = default_threads(), value_name = "NUM")]
    pub threads: usize,

    /// Divide sizes by this block size when printing
    #[arg(short = 'B', long, default_value_t = DEFAULT_BLOCK_SIZE, value_name = "BYTES")]
    pub block_size: u64,

    /// Print sizes in human-readable form (e.g. 1.5 MiB)
    #[arg(short = 'h', long)]
    pub human_readable: bool,

    /// Display only a total for each argument
    #[arg(short = 's', long, conflicts_with = "all")]
    pub summarize: bool,

    /// List every file, not just directories
    #[arg(short = 'a', long)]
    pub all: bool,

    /// List entries only down to this depth below each argument
    #[arg(short = 'd', long, value_name = "NUM")]
    pub max_depth: Option<usize>,

    /// Produce a grand total
    #[arg(short = 'c', long)]
    pub total: bool,

    /// Report per-worker scan timing on stderr
    #[arg(long)]
    pub time: bool,

    /// Follow all symbolic links
    #[arg(short = 'L', long)]
    pub dereference: bool,

    /// Follow only symbolic links given on the command line
    #[arg(short = 'D', long, conflicts_with = "dereference")]
    pub dereference_args: bool,

    /// Hide listed entries smaller than SIZE (e.g. 100, 1.5M, 10KiB, 5%)
    #[arg(short = 't', long, value_name = "SIZE", value_parser = MinSize::parse)]
    pub threshold: Option<MinSize>,

    /// List a previously saved tree instead of scanning
    #[arg(long, value_name = "FILE")]
    pub load_cache: Option<PathBuf>,

    /// Save the scanned tree to FILE
    #[arg(long, value_name = "FILE")]
    pub save_cache: Option<PathBuf>,

    /// Show a progress spinner on stderr
    #[arg(short = 'p', long)]
    pub progress: bool,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Print help
    #[arg(long, action = ArgAction::Help)]
    pub help: Option<bool>,
}

fn default_threads() -> usize {
    num_cpus::get().clamp(1, MAX_THREADS)
}

/// Symlink dereference policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DerefMode {
    /// Never follow; a link costs its own blocks
    #[default]
    None,
    /// Follow every link encountered
    All,
    /// Follow links named on the command line only
    Args,
}

impl DerefMode {
    /// Whether a root argument is stat'ed through its link
    pub fn follow_root(self) -> bool {
        matches!(self, DerefMode::All | DerefMode::Args)
    }

    /// Whether entries found while scanning are stat'ed through their link
    pub fn follow_entries(self) -> bool {
        self == DerefMode::All
    }
}

/// What gets printed for each root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayMode {
    /// One line per root
    #[default]
    Summary,
    /// Directories down to the depth limit
    Directories,
    /// Files and directories down to the depth limit
    All,
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Roots to measure, in command-line order
    pub paths: Vec<PathBuf>,

    /// Number of worker threads
    pub thread_count: usize,

    /// Output divisor
    pub block_size: u64,

    /// Human-readable sizes
    pub human_readable: bool,

    /// Listing mode
    pub display: DisplayMode,

    /// Deepest listed entry (root = 0)
    pub max_depth: Option<usize>,

    /// Print a grand total line
    pub show_total: bool,

    /// Report worker timing
    pub track_time: bool,

    /// Symlink policy
    pub deref: DerefMode,

    /// Hide listed entries below this size
    pub min_size: Option<MinSize>,

    /// Read the tree from this cache instead of scanning
    pub load_cache: Option<PathBuf>,

    /// Write the scanned tree here
    pub save_cache: Option<PathBuf>,

    /// Show progress spinner
    pub show_progress: bool,

    /// Verbose logging
    pub verbose: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            paths: vec![PathBuf::from(".")],
            thread_count: default_threads(),
            block_size: DEFAULT_BLOCK_SIZE,
            human_readable: false,
            display: DisplayMode::Summary,
            max_depth: None,
            show_total: false,
            track_time: false,
            deref: DerefMode::None,
            min_size: None,
            load_cache: None,
            save_cache: None,
            show_progress: false,
            verbose: false,
        }
    }
}

impl ScanConfig {
    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        // Validate worker count
        if args.threads == 0 || args.threads > MAX_THREADS {
            return Err(ConfigError::InvalidThreadCount {
                count: args.threads,
                max: MAX_THREADS,
            });
        }

        // Validate block size
        if args.block_size == 0 {
            return Err(ConfigError::InvalidBlockSize {
                size: args.block_size,
            });
        }

        // -s is the same as -d 0
        if args.summarize {
            if let Some(depth) = args.max_depth.filter(|&d| d > 0) {
                return Err(ConfigError::SummarizeWithDepth { depth });
            }
        }

        let display = if args.all {
            DisplayMode::All
        } else if args.max_depth.is_some() && !args.summarize {
            DisplayMode::Directories
        } else {
            DisplayMode::Summary
        };

        let deref = if args.dereference {
            DerefMode::All
        } else if args.dereference_args {
            DerefMode::Args
        } else {
            DerefMode::None
        };

        // Cache option combinations
        if let Some(load) = &args.load_cache {
            if !args.paths.is_empty() {
                return Err(ConfigError::CacheConflict {
                    reason: format!(
                        "paths cannot be given together with --load-cache '{}'",
                        load.display()
                    ),
                });
            }
            if args.save_cache.is_some() {
                return Err(ConfigError::CacheConflict {
                    reason: "--load-cache and --save-cache are mutually exclusive".into(),
                });
            }
        }

        if let Some(save) = &args.save_cache {
            if args.paths.len() > 1 {
                return Err(ConfigError::CacheConflict {
                    reason: format!(
                        "--save-cache holds a single tree, but {} paths were given",
                        args.paths.len()
                    ),
                });
            }
            if let Some(parent) = save.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    return Err(ConfigError::InvalidCachePath {
                        path: save.clone(),
                        reason: format!("Parent directory '{}' does not exist", parent.display()),
                    });
                }
            }
        }

        let paths = if args.paths.is_empty() {
            vec![PathBuf::from(".")]
        } else {
            args.paths
        };

        Ok(Self {
            paths,
            thread_count: args.threads,
            block_size: args.block_size,
            human_readable: args.human_readable,
            display,
            max_depth: if args.summarize { Some(0) } else { args.max_depth },
            show_total: args.total,
            track_time: args.time,
            deref,
            min_size: args.threshold,
            load_cache: args.load_cache,
            save_cache: args.save_cache,
            show_progress: args.progress,
            verbose: args.verbose,
        })
    }

    /// Whether scans must record every entry so a tree can be built
    pub fn needs_tree(&self) -> bool {
        self.display != DisplayMode::Summary || self.save_cache.is_some()
    }
}
