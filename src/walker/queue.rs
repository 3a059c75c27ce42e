//! Task stack for directory scans
//!
//! The same type serves as the shared pool all workers pull from and as each
//! worker's private buffer of freshly discovered subdirectories. It is used
//! LIFO so that a worker tends to continue depth-first into the directory it
//! just read, which keeps its inode and dentry caches warm.
//!
//! There is no locking in here; the scheduler serializes access to the shared
//! instance.

use std::path::PathBuf;

/// A directory waiting to be scanned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Path of the directory
    pub path: PathBuf,

    /// Depth below the scan root (root = 0)
    pub depth: u32,
}

impl Task {
    /// Create a new task
    pub fn new(path: impl Into<PathBuf>, depth: u32) -> Self {
        Self {
            path: path.into(),
            depth,
        }
    }

    /// Create the root task
    pub fn root(path: impl Into<PathBuf>) -> Self {
        Self::new(path, 0)
    }
}

/// Growable LIFO of tasks whose capacity doubles on overflow
#[derive(Debug)]
pub struct TaskQueue {
    tasks: Vec<Task>,
}

impl TaskQueue {
    /// Create a queue with room for `initial_capacity` tasks
    pub fn new(initial_capacity: usize) -> Self {
        Self {
            tasks: Vec::with_capacity(initial_capacity.max(1)),
        }
    }

    /// Is the queue empty? (has no tasks)
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Number of queued tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Current capacity of the backing buffer
    pub fn capacity(&self) -> usize {
        self.tasks.capacity()
    }

    /// Push a task on top
    pub fn push(&mut self, task: Task) {
        if self.tasks.len() == self.tasks.capacity() {
            self.grow_to(self.tasks.capacity() * 2);
        }
        self.tasks.push(task);
    }

    /// Pop the most recently pushed task
    pub fn pop(&mut self) -> Option<Task> {
        self.tasks.pop()
    }

    /// Move every task of `other` on top of this queue, keeping the order of
    /// both, and leave `other` empty
    pub fn append(&mut self, other: &mut TaskQueue) {
        if other.is_empty() {
            return;
        }
        let needed = self.tasks.len() + other.tasks.len();
        if needed > self.tasks.capacity() {
            self.grow_to(needed * 2);
        }
        self.tasks.append(&mut other.tasks);
    }

    /// Drop every queued task
    pub fn clear(&mut self) {
        self.tasks.clear();
    }

    fn grow_to(&mut self, new_capacity: usize) {
        self.tasks
            .reserve_exact(new_capacity.saturating_sub(self.tasks.len()));
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &str) -> Task {
        Task::new(name, 1)
    }

    fn drain(queue: &mut TaskQueue) -> Vec<String> {
        let mut names = Vec::new();
        while let Some(t) = queue.pop() {
            names.push(t.path.to_string_lossy().into_owned());
        }
        names
    }

    #[test]
    fn test_push_pop() {
        let mut queue = TaskQueue::new(2);
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
        assert!(queue.capacity() >= 2);

        queue.push(task("hello world"));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().unwrap().path, PathBuf::from("hello world"));

        queue.push(task("test1"));
        queue.push(task("test2"));
        let before = queue.capacity();
        queue.push(task("test3"));
        assert_eq!(queue.len(), 3);
        assert!(queue.capacity() >= before * 2);

        assert_eq!(drain(&mut queue), vec!["test3", "test2", "test1"]);
        assert!(queue.is_empty());
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_lifo_order_many() {
        let mut queue = TaskQueue::new(1);
        for i in 0..1000 {
            queue.push(task(&i.to_string()));
        }
        for i in (0..1000).rev() {
            assert_eq!(queue.pop().unwrap().path, PathBuf::from(i.to_string()));
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_append() {
        let mut first = TaskQueue::new(2);
        let mut second = TaskQueue::new(2);

        for name in ["test1", "test2", "test3"] {
            first.push(task(name));
        }
        for name in ["test4", "test5", "test6", "test7"] {
            second.push(task(name));
        }

        first.append(&mut second);
        assert_eq!(first.len(), 7);
        assert!(second.is_empty());
        assert!(first.capacity() >= 7);

        assert_eq!(
            drain(&mut first),
            vec!["test7", "test6", "test5", "test4", "test3", "test2", "test1"]
        );
    }

    #[test]
    fn test_append_empty_cases() {
        let mut first = TaskQueue::new(2);
        let mut empty = TaskQueue::new(2);

        first.append(&mut empty);
        assert!(first.is_empty());

        first.push(task("test1"));
        first.append(&mut empty);
        assert_eq!(first.len(), 1);

        let mut target = TaskQueue::new(1);
        target.append(&mut first);
        assert!(first.is_empty());
        assert_eq!(drain(&mut target), vec!["test1"]);
    }

    #[test]
    fn test_append_larger_into_smaller() {
        let mut small = TaskQueue::new(1);
        small.push(task("a"));
        let mut big = TaskQueue::new(1);
        for i in 0..50 {
            big.push(task(&format!("b{i}")));
        }

        small.append(&mut big);
        assert_eq!(small.len(), 51);

        let drained = drain(&mut small);
        let mut expected: Vec<String> = (0..50).rev().map(|i| format!("b{i}")).collect();
        expected.push("a".into());
        assert_eq!(drained, expected);
    }
}
