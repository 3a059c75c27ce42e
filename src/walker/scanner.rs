//! Directory scanner
//!
//! Reads one directory, sums the disk usage of everything directly inside it
//! and reports every subdirectory, either as a new task for the shared pool
//! (`scan_task`) or by descending into it right away (`scan_recursive`, the
//! single-threaded variant).
//!
//! Unreadable entries are logged to stderr, counted and contribute zero.

use crate::config::DerefMode;
use crate::error::ScanError;
use crate::walker::dirent::{DirHandle, DirentBuffer, DirentKind, EntryStat, RawDirent};
use crate::walker::queue::{Task, TaskQueue};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::ffi::{CStr, CString, OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{trace, warn};

/// Live counters shared by every worker of a scan
#[derive(Debug, Default)]
pub struct ScanStats {
    /// Directories read
    pub dirs_scanned: AtomicU64,

    /// Entries seen (excluding . and ..)
    pub entries_seen: AtomicU64,

    /// Bytes of disk usage found so far
    pub bytes_found: AtomicU64,

    /// Entries that could not be read
    pub errors: AtomicU64,
}

impl ScanStats {
    fn record_dir(&self, entries: u64, bytes: u64) {
        self.dirs_scanned.fetch_add(1, Ordering::Relaxed);
        self.entries_seen.fetch_add(entries, Ordering::Relaxed);
        self.bytes_found.fetch_add(bytes, Ordering::Relaxed);
    }

    fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Directories read so far
    pub fn dirs(&self) -> u64 {
        self.dirs_scanned.load(Ordering::Relaxed)
    }

    /// Entries seen so far
    pub fn entries(&self) -> u64 {
        self.entries_seen.load(Ordering::Relaxed)
    }

    /// Bytes found so far
    pub fn bytes(&self) -> u64 {
        self.bytes_found.load(Ordering::Relaxed)
    }

    /// Errors so far
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

/// Directories already entered, by (device, inode).
///
/// Only consulted when every symlink is followed; without it a link pointing
/// at one of its own ancestors would never terminate.
#[derive(Debug, Default)]
pub struct VisitedDirs {
    seen: Mutex<HashSet<(u64, u64)>>,
}

impl VisitedDirs {
    /// Record a directory; false if it was already seen
    pub fn insert(&self, dev: u64, ino: u64) -> bool {
        self.seen.lock().insert((dev, ino))
    }

    /// Number of directories recorded
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    /// Whether nothing was recorded yet
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}

/// One entry of a scanned directory, kept when a tree is requested
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRecord {
    /// Name within the directory
    pub name: OsString,
    /// Inode number
    pub ino: u64,
    /// Own disk usage in bytes
    pub size: u64,
    /// Modification time
    pub mtime: i64,
    /// Whether the entry was classified as a directory
    pub is_dir: bool,
}

/// Everything one scan saw in one directory
#[derive(Debug, Clone)]
pub struct DirListing {
    /// Path of the directory
    pub path: PathBuf,
    /// Depth below the root
    pub depth: u32,
    /// Entries in enumeration order
    pub entries: Vec<EntryRecord>,
}

/// Settings and shared state a scanner runs with
#[derive(Debug, Clone, Copy)]
pub struct ScanContext<'a> {
    /// Stat entries through symlinks
    pub follow_links: bool,
    /// Keep a `DirListing` per directory
    pub record: bool,
    /// Cycle guard, present when following links
    pub visited: Option<&'a VisitedDirs>,
    /// Live counters
    pub stats: &'a ScanStats,
}

impl<'a> ScanContext<'a> {
    /// Build a context for the given symlink policy
    pub fn new(
        deref: DerefMode,
        record: bool,
        visited: &'a VisitedDirs,
        stats: &'a ScanStats,
    ) -> Self {
        let follow_links = deref.follow_entries();
        Self {
            follow_links,
            record,
            visited: follow_links.then_some(visited),
            stats,
        }
    }

    fn report(&self, tally: &mut ScanTally, error: ScanError) -> u64 {
        warn!(
            path = %error.path().display(),
            permission_denied = error.is_permission_denied(),
            "{}",
            error
        );
        self.stats.record_error();
        tally.errors += 1;
        0
    }

    /// Directory classification, without a stat when `d_type` already says
    fn is_dir(&self, kind: DirentKind, stat: &EntryStat) -> bool {
        match kind {
            DirentKind::Dir => true,
            DirentKind::Other => false,
            DirentKind::Symlink if !self.follow_links => false,
            DirentKind::Symlink | DirentKind::Unknown => stat.is_dir(),
        }
    }

    fn first_visit(&self, stat: &EntryStat) -> bool {
        match self.visited {
            Some(visited) => visited.insert(stat.dev, stat.ino),
            None => true,
        }
    }
}

/// Counts kept by one scanner
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanTally {
    /// Directories read
    pub dirs: u64,
    /// Entries seen
    pub entries: u64,
    /// Failures logged
    pub errors: u64,
}

/// Per-worker directory scanner with its own `getdents64` buffer
pub struct Scanner<'a> {
    ctx: ScanContext<'a>,
    buf: DirentBuffer,
    tally: ScanTally,
    listings: Vec<DirListing>,
}

impl<'a> Scanner<'a> {
    /// Create a scanner
    pub fn new(ctx: ScanContext<'a>) -> Self {
        Self {
            ctx,
            buf: DirentBuffer::new(),
            tally: ScanTally::default(),
            listings: Vec::new(),
        }
    }

    /// Counts so far
    pub fn tally(&self) -> ScanTally {
        self.tally
    }

    /// Listings recorded so far
    pub fn into_listings(self) -> Vec<DirListing> {
        self.listings
    }

    /// Scan the directory of `task`, pushing one task per subdirectory onto
    /// `new_tasks`. Returns the disk usage of the directory's entries (the
    /// directory's own blocks are counted by whoever found it).
    ///
    /// The path buffer of `task` is moved into the last subdirectory found,
    /// or dropped when there is none.
    pub fn scan_task(&mut self, task: Task, new_tasks: &mut TaskQueue) -> u64 {
        let Task { mut path, depth } = task;

        let dir = match DirHandle::open(&path) {
            Ok(dir) => dir,
            Err(source) => {
                return self
                    .ctx
                    .report(&mut self.tally, ScanError::OpenDir { path, source })
            }
        };

        let mut pending: Option<OsString> = None;
        let usage = self.scan_entries(&dir, &path, depth, |name| {
            let name = OsStr::from_bytes(name.to_bytes());
            if let Some(previous) = pending.replace(name.to_os_string()) {
                new_tasks.push(Task::new(path.join(previous), depth + 1));
            }
        });
        drop(dir);

        if let Some(last) = pending {
            path.push(last);
            new_tasks.push(Task::new(path, depth + 1));
        }
        usage
    }

    /// Open `path` and scan everything below it on the current thread
    pub fn scan_tree(&mut self, path: &Path) -> u64 {
        match DirHandle::open(path) {
            Ok(dir) => {
                let mut path = path.to_path_buf();
                self.scan_recursive(&dir, &mut path, 0)
            }
            Err(source) => {
                let error = ScanError::OpenDir {
                    path: path.to_path_buf(),
                    source,
                };
                self.ctx.report(&mut self.tally, error)
            }
        }
    }

    /// Scan `path` (already opened as `dir`) and everything below it on the
    /// current thread
    pub fn scan_recursive(&mut self, dir: &DirHandle, path: &mut PathBuf, depth: u32) -> u64 {
        let mut subdirs: Vec<CString> = Vec::new();
        let mut usage = self.scan_entries(dir, path, depth, |name| subdirs.push(name.to_owned()));

        for name in subdirs {
            path.push(OsStr::from_bytes(name.to_bytes()));
            match dir.open_child(&name) {
                Ok(child) => usage += self.scan_recursive(&child, path, depth + 1),
                Err(source) => {
                    let error = ScanError::OpenDir {
                        path: path.clone(),
                        source,
                    };
                    self.ctx.report(&mut self.tally, error);
                }
            }
            path.pop();
        }
        usage
    }

    /// Enumerate `dir`, stat each entry, record it, and hand every
    /// subdirectory name to `on_subdir` in enumeration order
    fn scan_entries<F>(&mut self, dir: &DirHandle, path: &Path, depth: u32, mut on_subdir: F) -> u64
    where
        F: FnMut(&CStr),
    {
        let Self {
            ctx,
            buf,
            tally,
            listings,
        } = self;
        let mut usage = 0u64;
        let mut seen = 0u64;
        let mut entries = Vec::new();

        loop {
            let batch = match dir.read_batch(buf) {
                Ok(batch) => batch,
                Err(source) => {
                    let error = ScanError::ReadDir {
                        path: path.to_path_buf(),
                        source,
                    };
                    ctx.report(tally, error);
                    break;
                }
            };
            if batch.is_empty() {
                break;
            }

            for entry in batch {
                if entry.is_dot_dir() {
                    continue;
                }
                seen += 1;

                let (stat, is_dir) = match stat_entry(ctx, dir, path, &entry) {
                    Ok(found) => found,
                    Err(error) => {
                        ctx.report(tally, error);
                        continue;
                    }
                };
                if is_dir && !ctx.first_visit(&stat) {
                    trace!(path = %path.display(), name = ?entry.name, "Directory already visited");
                    continue;
                }

                usage += stat.disk_usage();
                if ctx.record {
                    entries.push(EntryRecord {
                        name: OsStr::from_bytes(entry.name.to_bytes()).to_os_string(),
                        ino: stat.ino,
                        size: stat.disk_usage(),
                        mtime: stat.mtime,
                        is_dir,
                    });
                }
                if is_dir {
                    on_subdir(entry.name);
                }
            }
        }

        tally.dirs += 1;
        tally.entries += seen;
        ctx.stats.record_dir(seen, usage);
        if ctx.record {
            listings.push(DirListing {
                path: path.to_path_buf(),
                depth,
                entries,
            });
        }
        usage
    }
}

fn stat_entry(
    ctx: &ScanContext<'_>,
    dir: &DirHandle,
    path: &Path,
    entry: &RawDirent<'_>,
) -> Result<(EntryStat, bool), ScanError> {
    let stat = dir
        .stat_at(entry.name, ctx.follow_links)
        .map_err(|source| ScanError::Stat {
            path: path.join(OsStr::from_bytes(entry.name.to_bytes())),
            source,
        })?;
    Ok((stat, ctx.is_dir(entry.kind, &stat)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::MetadataExt;

    fn usage_of(path: &Path) -> u64 {
        fs::symlink_metadata(path).unwrap().blocks() * 512
    }

    /// root/{a.txt, sub1/{b.txt, deep/{c.txt}}, sub2/}
    fn fixture() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::write(root.join("a.txt"), vec![1u8; 5000]).unwrap();
        fs::create_dir_all(root.join("sub1/deep")).unwrap();
        fs::write(root.join("sub1/b.txt"), vec![2u8; 9000]).unwrap();
        fs::write(root.join("sub1/deep/c.txt"), vec![3u8; 100]).unwrap();
        fs::create_dir(root.join("sub2")).unwrap();
        tmp
    }

    fn expected_below(root: &Path) -> u64 {
        ["a.txt", "sub1", "sub1/b.txt", "sub1/deep", "sub1/deep/c.txt", "sub2"]
            .iter()
            .map(|p| usage_of(&root.join(p)))
            .sum()
    }

    #[test]
    fn test_scan_task_emits_subdirectories() {
        let tmp = fixture();
        let stats = ScanStats::default();
        let visited = VisitedDirs::default();
        let ctx = ScanContext::new(DerefMode::None, false, &visited, &stats);
        let mut scanner = Scanner::new(ctx);
        let mut tasks = TaskQueue::new(4);

        let usage = scanner.scan_task(Task::root(tmp.path()), &mut tasks);
        let expected: u64 = ["a.txt", "sub1", "sub2"]
            .iter()
            .map(|p| usage_of(&tmp.path().join(p)))
            .sum();
        assert_eq!(usage, expected);

        let mut found = Vec::new();
        while let Some(task) = tasks.pop() {
            assert_eq!(task.depth, 1);
            found.push(task.path);
        }
        found.sort();
        assert_eq!(found, vec![tmp.path().join("sub1"), tmp.path().join("sub2")]);
        assert_eq!(stats.dirs(), 1);
        assert_eq!(stats.entries(), 3);
    }

    #[test]
    fn test_scan_task_exhausted_branch() {
        let tmp = fixture();
        let stats = ScanStats::default();
        let visited = VisitedDirs::default();
        let mut scanner = Scanner::new(ScanContext::new(DerefMode::None, false, &visited, &stats));
        let mut tasks = TaskQueue::new(4);

        let leaf = tmp.path().join("sub1/deep");
        let usage = scanner.scan_task(Task::new(&leaf, 2), &mut tasks);
        assert_eq!(usage, usage_of(&leaf.join("c.txt")));
        assert!(tasks.is_empty());
    }

    #[test]
    fn test_recursive_matches_task_variant() {
        let tmp = fixture();
        let stats = ScanStats::default();
        let visited = VisitedDirs::default();
        let mut scanner = Scanner::new(ScanContext::new(DerefMode::None, false, &visited, &stats));

        let dir = DirHandle::open(tmp.path()).unwrap();
        let mut path = tmp.path().to_path_buf();
        let recursive = scanner.scan_recursive(&dir, &mut path, 0);
        assert_eq!(path, tmp.path());
        assert_eq!(recursive, expected_below(tmp.path()));

        let mut tasks = TaskQueue::new(1);
        tasks.push(Task::root(tmp.path()));
        let mut iterative = 0;
        while let Some(task) = tasks.pop() {
            iterative += scanner.scan_task(task, &mut tasks);
        }
        assert_eq!(iterative, recursive);
    }

    #[test]
    fn test_missing_directory_contributes_zero() {
        let tmp = fixture();
        let stats = ScanStats::default();
        let visited = VisitedDirs::default();
        let mut scanner = Scanner::new(ScanContext::new(DerefMode::None, false, &visited, &stats));
        let mut tasks = TaskQueue::new(1);

        let usage = scanner.scan_task(Task::root(tmp.path().join("nope")), &mut tasks);
        assert_eq!(usage, 0);
        assert!(tasks.is_empty());
        assert_eq!(stats.error_count(), 1);
        assert_eq!(scanner.tally().errors, 1);
        assert_eq!(scanner.tally().dirs, 0);
    }

    #[test]
    fn test_symlinks_not_followed_by_default() {
        let tmp = fixture();
        std::os::unix::fs::symlink(tmp.path().join("sub1"), tmp.path().join("link")).unwrap();
        let stats = ScanStats::default();
        let visited = VisitedDirs::default();
        let mut scanner = Scanner::new(ScanContext::new(DerefMode::None, false, &visited, &stats));
        let mut tasks = TaskQueue::new(1);

        let usage = scanner.scan_task(Task::root(tmp.path()), &mut tasks);
        let expected: u64 = ["a.txt", "sub1", "sub2", "link"]
            .iter()
            .map(|p| usage_of(&tmp.path().join(p)))
            .sum();
        assert_eq!(usage, expected);
        assert_eq!(tasks.len(), 2);
    }

    #[test]
    fn test_follow_links_guards_cycles() {
        let tmp = fixture();
        // sub1/deep/up -> root
        std::os::unix::fs::symlink(tmp.path(), tmp.path().join("sub1/deep/up")).unwrap();
        let stats = ScanStats::default();
        let visited = VisitedDirs::default();
        let root_meta = fs::metadata(tmp.path()).unwrap();
        assert!(visited.insert(root_meta.dev(), root_meta.ino()));
        let mut scanner = Scanner::new(ScanContext::new(DerefMode::All, false, &visited, &stats));

        let dir = DirHandle::open(tmp.path()).unwrap();
        let mut path = tmp.path().to_path_buf();
        let usage = scanner.scan_recursive(&dir, &mut path, 0);
        // The link resolves to the root, which was already visited
        assert_eq!(usage, expected_below(tmp.path()));
        assert_eq!(visited.len(), 4);
    }

    #[test]
    fn test_recording_listings() {
        let tmp = fixture();
        let stats = ScanStats::default();
        let visited = VisitedDirs::default();
        let mut scanner = Scanner::new(ScanContext::new(DerefMode::None, true, &visited, &stats));
        let dir = DirHandle::open(tmp.path()).unwrap();
        let mut path = tmp.path().to_path_buf();
        scanner.scan_recursive(&dir, &mut path, 0);

        let listings = scanner.into_listings();
        assert_eq!(listings.len(), 4);

        let root = listings.iter().find(|l| l.depth == 0).unwrap();
        assert_eq!(root.path, tmp.path());
        let mut names: Vec<_> = root.entries.iter().map(|e| e.name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["a.txt", "sub1", "sub2"]);
        let sub1 = root.entries.iter().find(|e| e.name == "sub1").unwrap();
        assert!(sub1.is_dir);
        assert_eq!(sub1.ino, fs::metadata(tmp.path().join("sub1")).unwrap().ino());

        let deep = listings.iter().find(|l| l.depth == 2).unwrap();
        assert_eq!(deep.path, tmp.path().join("sub1/deep"));
        assert_eq!(deep.entries.len(), 1);
    }
}
