//! rdu - Parallel Disk Usage Analyzer
//!
//! Sums the storage actually allocated below one or more roots, like `du`,
//! using a pool of worker threads that share a single stack of directories.
//! The scanned tree can be written to a cache file and listed again later
//! without touching the filesystem.
//!
//! # Features
//!
//! - **Raw Directory Reads**: entries come straight out of `getdents64`
//!   batches and are stat'ed with `fstatat` relative to the open directory.
//!
//! - **Dynamic Load Balancing**: idle workers park on a semaphore and are
//!   woken as soon as another worker publishes new subdirectories. The last
//!   worker to go idle detects quiescence and releases everybody.
//!
//! - **Tree Cache**: the tree is linearized into fixed-size records linked by
//!   1-based indices and saved behind a versioned header.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Worker Threads                              │
//! │  ┌─────────┐  ┌─────────┐  ┌─────────┐         ┌─────────┐     │
//! │  │Worker 1 │  │Worker 2 │  │Worker 3 │  ...    │Worker N │     │
//! │  │ Scanner │  │ Scanner │  │ Scanner │         │ Scanner │     │
//! │  └────┬────┘  └────┬────┘  └────┬────┘         └────┬────┘     │
//! │       │            │            │                    │          │
//! │       └────────────┼────────────┼────────────────────┘          │
//! │                    ▼            ▼                               │
//! │            ┌──────────────────────────┐                         │
//! │            │  Mutex<TaskQueue> (LIFO) │                         │
//! │            │  idle count + semaphore  │                         │
//! │            └──────────────────────────┘                         │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │ listings (when a tree is needed)
//!                               ▼
//!                    ┌──────────────────┐        ┌──────────────────┐
//!                    │    FileTree      │ ─────► │   cache file     │
//!                    │  (index arena)   │ ◄───── │  (NodeRecord[])  │
//!                    └──────────────────┘        └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Total for the current directory with 8 workers
//! rdu -j 8
//!
//! # Directories two levels deep, human readable
//! rdu -h -d 2 /var
//!
//! # Save once, list later
//! rdu --save-cache home.rdu ~
//! rdu --load-cache home.rdu -a -t 5%
//! ```

pub mod config;
pub mod error;
pub mod report;
pub mod size;
pub mod tree;
pub mod walker;

pub use config::{CliArgs, DerefMode, DisplayMode, ScanConfig};
pub use error::{Result, RduError};
pub use size::MinSize;
pub use tree::{FileNode, FileTree, NodeId};
pub use walker::{Coordinator, RootUsage};
