//! Parallel disk usage walker
//!
//! This module implements a directory walker that sums allocated blocks
//! below a root using a fixed pool of worker threads sharing one task stack.
//!
//! # Architecture
//!
//! ```text
//!                     ┌─────────────────────────┐
//!                     │      Coordinator        │
//!                     │  - stat root            │
//!                     │  - pick variant         │
//!                     │  - build tree           │
//!                     └───────────┬─────────────┘
//!                                 │
//!                     ┌───────────▼─────────────┐
//!                     │  Scheduler              │
//!                     │  Mutex<TaskQueue>       │
//!                     │  idle count + semaphore │
//!                     └───────────┬─────────────┘
//!       ┌─────────────────────────┼─────────────────────────┐
//!       │                         │                         │
//! ┌─────▼─────┐             ┌─────▼─────┐             ┌─────▼─────┐
//! │  Worker 1 │             │  Worker 2 │             │  Worker N │
//! │  Scanner  │             │  Scanner  │             │  Scanner  │
//! │getdents64 │             │getdents64 │             │getdents64 │
//! └───────────┘             └───────────┘             └───────────┘
//! ```

pub mod coordinator;
pub mod dirent;
pub mod queue;
pub mod scanner;
pub mod scheduler;

pub use coordinator::{Coordinator, RootUsage};
pub use queue::{Task, TaskQueue};
pub use scanner::{ScanStats, Scanner};
pub use scheduler::{Scheduler, WorkerOutput};
