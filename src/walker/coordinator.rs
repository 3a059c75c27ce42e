//! Scan coordinator - measures one root at a time
//!
//! The coordinator is responsible for:
//! - Stat'ing the root argument (following links when asked to)
//! - Choosing between the single-threaded recursive scan and the worker pool
//! - Adding the root's own blocks to the workers' totals
//! - Assembling the file tree from the recorded listings when one is needed

use crate::config::ScanConfig;
use crate::error::{Result, ScanError};
use crate::tree::{build_tree, FileTree};
use crate::walker::dirent::stat_path;
use crate::walker::queue::Task;
use crate::walker::scanner::{ScanContext, ScanStats, Scanner, VisitedDirs};
use crate::walker::scheduler::{Scheduler, WorkerOutput};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Disk usage of one root
#[derive(Debug)]
pub struct RootUsage {
    /// Root as given on the command line (or stored in a cache)
    pub path: PathBuf,

    /// Root's own blocks plus everything below it, in bytes
    pub total_bytes: u64,

    /// Full tree, when listing or saving was requested
    pub tree: Option<FileTree>,

    /// Per-worker results, listings already consumed
    pub workers: Vec<WorkerOutput>,

    /// Entries that could not be read
    pub errors: u64,

    /// Wall time of the scan
    pub duration: Duration,
}

impl RootUsage {
    /// Wrap a tree loaded from a cache
    pub fn from_tree(tree: FileTree) -> Self {
        let (path, total_bytes) = match tree.root() {
            Some(root) => (tree.path_of(root), tree.node(root).total_size),
            None => (PathBuf::new(), 0),
        };
        Self {
            path,
            total_bytes,
            tree: Some(tree),
            workers: Vec::new(),
            errors: 0,
            duration: Duration::ZERO,
        }
    }

    /// Directories read across all workers
    pub fn dirs_scanned(&self) -> u64 {
        self.workers.iter().map(|w| w.tally.dirs).sum()
    }
}

/// Runs scans with one immutable configuration
pub struct Coordinator<'c> {
    config: &'c ScanConfig,
}

impl<'c> Coordinator<'c> {
    /// Create a coordinator
    pub fn new(config: &'c ScanConfig) -> Self {
        Self { config }
    }

    /// Measure `path`.
    ///
    /// Only a root that cannot be stat'ed is an error; unreadable entries
    /// below it are logged and counted in `RootUsage::errors`. `on_tick`
    /// receives the live counters while the worker pool runs.
    pub fn scan_root<F>(&self, path: &Path, mut on_tick: F) -> Result<RootUsage>
    where
        F: FnMut(&ScanStats),
    {
        let started = Instant::now();
        let config = self.config;
        let record = config.needs_tree();

        let root = stat_path(path, config.deref.follow_root()).map_err(|source| ScanError::Stat {
            path: path.to_path_buf(),
            source,
        })?;

        info!(
            path = %path.display(),
            threads = config.thread_count,
            record = record,
            "Scanning root"
        );

        let stats = ScanStats::default();
        let visited = VisitedDirs::default();
        visited.insert(root.dev, root.ino);
        let ctx = ScanContext::new(config.deref, record, &visited, &stats);

        let mut workers = if !root.is_dir() {
            Vec::new()
        } else if config.thread_count == 1 && !record && !config.show_progress {
            vec![self.scan_single_threaded(path, ctx)]
        } else {
            let scheduler = Scheduler::new(config.thread_count, Task::root(path));
            scheduler.run(ctx, config.track_time, || on_tick(&stats))?
        };
        on_tick(&stats);

        let below: u64 = workers.iter().map(|w| w.bytes).sum();
        let total_bytes = root.disk_usage() + below;
        let errors: u64 = workers.iter().map(|w| w.tally.errors).sum();

        let tree = record.then(|| {
            let listings = workers
                .iter_mut()
                .flat_map(|w| std::mem::take(&mut w.listings))
                .collect();
            build_tree(path, &root, listings)
        });

        debug!(
            path = %path.display(),
            bytes = total_bytes,
            dirs = stats.dirs(),
            entries = stats.entries(),
            errors = errors,
            "Root finished"
        );

        Ok(RootUsage {
            path: path.to_path_buf(),
            total_bytes,
            tree,
            workers,
            errors,
            duration: started.elapsed(),
        })
    }

    /// Recursive scan on the calling thread
    fn scan_single_threaded(&self, path: &Path, ctx: ScanContext<'_>) -> WorkerOutput {
        let started = Instant::now();
        let mut scanner = Scanner::new(ctx);

        let bytes = scanner.scan_tree(path);

        let lifetime = started.elapsed();
        WorkerOutput {
            id: 0,
            bytes,
            tally: scanner.tally(),
            busy: if self.config.track_time {
                lifetime
            } else {
                Duration::ZERO
            },
            lifetime,
            listings: scanner.into_listings(),
        }
    }
}
