//! Worker scheduler
//!
//! A fixed pool of worker threads shares one `TaskQueue` behind a mutex.
//! Workers that find the queue empty park on a counting semaphore; the worker
//! that would become the last idle one instead declares the scan complete and
//! releases everybody. The semaphore is only posted while the lock is held, and
//! every post is matched by a decrement of the idle count, so a wakeup can never
//! be lost or counted twice.
//!
//! ```text
//!   lock ─┬─ complete? ──────────────────────────────────────────► exit
//!         ├─ queue empty, idle == N-1 ─► complete, post idle×, idle = 0 ─► exit
//!         ├─ queue empty ─► idle += 1, unlock, wait, relock ─► loop
//!         └─ pop task ─► unlock, scan into local queue (while it holds
//!                        exactly one task keep going), relock, append,
//!                        post min(new-1, idle)×, idle -= posts ─► loop
//! ```

use crate::error::WorkerError;
use crate::walker::queue::{Task, TaskQueue};
use crate::walker::scanner::{DirListing, ScanContext, ScanTally, Scanner};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, MutexGuard};
use std::thread::{self, ScopedJoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace};

/// Interval between progress callbacks while workers run
const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Initial capacity of the shared queue
const SHARED_QUEUE_CAPACITY: usize = 1024;

/// Initial capacity of each worker's private queue
const LOCAL_QUEUE_CAPACITY: usize = 64;

/// State protected by the scheduler lock
#[derive(Debug)]
struct SchedulerState {
    queue: TaskQueue,
    idle: usize,
    complete: bool,
}

/// What one worker produced
#[derive(Debug, Default)]
pub struct WorkerOutput {
    /// Worker number
    pub id: usize,

    /// Disk usage found below the root
    pub bytes: u64,

    /// Directories, entries and errors
    pub tally: ScanTally,

    /// Time spent inside scans (zero unless timing was requested)
    pub busy: Duration,

    /// Time from start to exit
    pub lifetime: Duration,

    /// Recorded listings (empty unless recording)
    pub listings: Vec<DirListing>,
}

/// Shared queue, idle counter and semaphore for one root
pub struct Scheduler {
    state: Mutex<SchedulerState>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
    thread_count: usize,
}

impl Scheduler {
    /// Create a scheduler for `thread_count` workers, seeded with `root`
    pub fn new(thread_count: usize, root: Task) -> Self {
        let mut queue = TaskQueue::new(SHARED_QUEUE_CAPACITY);
        queue.push(root);
        let (wake_tx, wake_rx) = unbounded();
        Self {
            state: Mutex::new(SchedulerState {
                queue,
                idle: 0,
                complete: false,
            }),
            wake_tx,
            wake_rx,
            thread_count: thread_count.max(1),
        }
    }

    /// Number of workers
    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Run the workers to completion.
    ///
    /// `on_tick` is called on this thread roughly every 100ms while they run,
    /// and at least once. Returns as soon as the last worker exits.
    /// Outputs are returned in worker order.
    pub fn run<F>(
        &self,
        ctx: ScanContext<'_>,
        track_time: bool,
        mut on_tick: F,
    ) -> Result<Vec<WorkerOutput>, WorkerError>
    where
        F: FnMut(),
    {
        thread::scope(|scope| {
            let mut handles: Vec<ScopedJoinHandle<'_, WorkerOutput>> =
                Vec::with_capacity(self.thread_count);
            // Never sent on: disconnects once every worker's guard is dropped
            let (done_tx, done_rx) = bounded::<()>(0);

            for id in 0..self.thread_count {
                let done = done_tx.clone();
                let spawned = thread::Builder::new()
                    .name(format!("rdu-worker-{}", id))
                    .spawn_scoped(scope, move || self.worker_loop(id, ctx, track_time, done));

                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        error!(worker = id, error = %e, "Failed to spawn worker");
                        // The pool can never go quiescent with a worker missing
                        self.abort();
                        for handle in handles {
                            let _ = handle.join();
                        }
                        return Err(WorkerError::SpawnFailed {
                            id,
                            reason: e.to_string(),
                        });
                    }
                }
            }

            drop(done_tx);

            on_tick();
            while let Err(RecvTimeoutError::Timeout) = done_rx.recv_timeout(TICK_INTERVAL) {
                on_tick();
            }

            let mut outputs = Vec::with_capacity(handles.len());
            let mut failure = None;
            for (id, handle) in handles.into_iter().enumerate() {
                match handle.join() {
                    Ok(output) => outputs.push(output),
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        error!(worker = id, message = %message, "Worker panicked");
                        failure.get_or_insert(WorkerError::Panicked { id, message });
                    }
                }
            }

            match failure {
                Some(e) => Err(e),
                None => Ok(outputs),
            }
        })
    }

    fn worker_loop(
        &self,
        id: usize,
        ctx: ScanContext<'_>,
        track_time: bool,
        done: Sender<()>,
    ) -> WorkerOutput {
        let _exit = ExitGuard {
            scheduler: self,
            _done: done,
        };
        let started = Instant::now();
        let mut scanner = Scanner::new(ctx);
        let mut local = TaskQueue::new(LOCAL_QUEUE_CAPACITY);
        let mut bytes = 0u64;
        let mut busy = Duration::ZERO;

        debug!(worker = id, "Worker starting");

        let mut state = self.state.lock();
        loop {
            if state.complete {
                break;
            }

            let Some(task) = state.queue.pop() else {
                if state.idle + 1 == self.thread_count {
                    trace!(worker = id, idle = state.idle, "Queue drained, scan complete");
                    state.complete = true;
                    for _ in 0..state.idle {
                        self.post();
                    }
                    state.idle = 0;
                    break;
                }
                state.idle += 1;
                MutexGuard::unlocked(&mut state, || self.wait());
                continue;
            };

            MutexGuard::unlocked(&mut state, || {
                let scan_start = track_time.then(Instant::now);
                let mut next = Some(task);
                while let Some(task) = next.take() {
                    bytes += scanner.scan_task(task, &mut local);
                    if local.len() == 1 {
                        next = local.pop();
                    }
                }
                if let Some(scan_start) = scan_start {
                    busy += scan_start.elapsed();
                }
            });

            let new_tasks = local.len();
            state.queue.append(&mut local);
            let wakes = new_tasks.saturating_sub(1).min(state.idle);
            for _ in 0..wakes {
                self.post();
            }
            state.idle -= wakes;
        }
        drop(state);

        let tally = scanner.tally();
        debug!(
            worker = id,
            bytes = bytes,
            dirs = tally.dirs,
            errors = tally.errors,
            "Worker finished"
        );

        WorkerOutput {
            id,
            bytes,
            tally,
            busy,
            lifetime: started.elapsed(),
            listings: scanner.into_listings(),
        }
    }

    /// Release one parked worker. Callers hold the state lock.
    fn post(&self) {
        // The receiver lives in `self`, so the channel cannot be disconnected
        let _ = self.wake_tx.send(());
    }

    fn wait(&self) {
        let _ = self.wake_rx.recv();
    }

    /// Mark the scan complete and release every worker, parked or not
    fn abort(&self) {
        let mut state = self.state.lock();
        state.complete = true;
        state.queue.clear();
        for _ in 0..self.thread_count {
            self.post();
        }
        state.idle = 0;
    }
}

/// Releases the other workers if this one unwinds, and tells the
/// progress loop this worker is gone when dropped
struct ExitGuard<'s> {
    scheduler: &'s Scheduler,
    _done: Sender<()>,
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.scheduler.abort();
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Worker thread panicked".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DerefMode;
    use crate::walker::scanner::{ScanStats, VisitedDirs};
    use std::fs;
    use std::os::unix::fs::MetadataExt;
    use std::path::Path;

    /// Wide and deep enough that several workers get something to do
    fn fixture() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        for a in 0..6 {
            for b in 0..5 {
                let dir = tmp.path().join(format!("a{a}/b{b}/c"));
                fs::create_dir_all(&dir).unwrap();
                fs::write(dir.join("f"), vec![0u8; 100 * (a + b + 1)]).unwrap();
                fs::write(tmp.path().join(format!("a{a}/b{b}/g")), vec![1u8; 5000]).unwrap();
            }
        }
        tmp
    }

    fn walk_usage(root: &Path) -> u64 {
        let mut total = 0;
        for entry in fs::read_dir(root).unwrap() {
            let entry = entry.unwrap();
            let meta = entry.metadata().unwrap();
            total += meta.blocks() * 512;
            if meta.is_dir() {
                total += walk_usage(&entry.path());
            }
        }
        total
    }

    fn run(threads: usize, root: &Path, record: bool) -> Vec<WorkerOutput> {
        let stats = ScanStats::default();
        let visited = VisitedDirs::default();
        let ctx = ScanContext::new(DerefMode::None, record, &visited, &stats);
        let scheduler = Scheduler::new(threads, Task::root(root));
        let outputs = scheduler.run(ctx, true, || {}).unwrap();
        assert_eq!(stats.bytes(), outputs.iter().map(|o| o.bytes).sum::<u64>());
        outputs
    }

    #[test]
    fn test_totals_independent_of_thread_count() {
        let tmp = fixture();
        let expected = walk_usage(tmp.path());
        for threads in [1, 2, 3, 8] {
            let outputs = run(threads, tmp.path(), false);
            assert_eq!(outputs.len(), threads);
            let total: u64 = outputs.iter().map(|o| o.bytes).sum();
            assert_eq!(total, expected, "threads = {threads}");
            let dirs: u64 = outputs.iter().map(|o| o.tally.dirs).sum();
            // root + 6 a's + 30 b's + 30 c's
            assert_eq!(dirs, 67, "threads = {threads}");
        }
    }

    #[test]
    fn test_every_directory_listed_once() {
        let tmp = fixture();
        let outputs = run(4, tmp.path(), true);
        let mut paths: Vec<_> = outputs
            .into_iter()
            .flat_map(|o| o.listings)
            .map(|l| l.path)
            .collect();
        let count = paths.len();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), count);
        assert_eq!(count, 67);
    }

    #[test]
    fn test_empty_root_terminates() {
        let tmp = tempfile::tempdir().unwrap();
        let outputs = run(8, tmp.path(), false);
        assert_eq!(outputs.iter().map(|o| o.bytes).sum::<u64>(), 0);
        assert_eq!(outputs.iter().map(|o| o.tally.dirs).sum::<u64>(), 1);
    }

    #[test]
    fn test_unreadable_root_terminates() {
        let tmp = tempfile::tempdir().unwrap();
        let outputs = run(3, &tmp.path().join("missing"), false);
        assert_eq!(outputs.iter().map(|o| o.bytes).sum::<u64>(), 0);
        assert_eq!(outputs.iter().map(|o| o.tally.errors).sum::<u64>(), 1);
    }

    #[test]
    fn test_ticks_while_running() {
        let tmp = fixture();
        let stats = ScanStats::default();
        let visited = VisitedDirs::default();
        let ctx = ScanContext::new(DerefMode::None, false, &visited, &stats);
        let scheduler = Scheduler::new(2, Task::root(tmp.path()));
        let mut ticks = 0;
        scheduler.run(ctx, false, || ticks += 1).unwrap();
        assert!(ticks >= 1);
        let state = scheduler.state.lock();
        assert!(state.complete);
        assert!(state.queue.is_empty());
        assert_eq!(state.idle, 0);
    }

    #[test]
    fn test_small_scans_do_not_wait_for_a_tick() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("only"), b"x").unwrap();

        let started = Instant::now();
        for _ in 0..20 {
            run(4, tmp.path(), false);
        }
        // A full tick per scan would add up to two seconds
        assert!(started.elapsed() < Duration::from_secs(1), "{:?}", started.elapsed());
    }
}
