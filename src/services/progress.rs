//! Thread-safe run progress accounting.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Counts terminated tasks (success, skip or failure) against the total.
///
/// Shared across the per-level worker threads; formatted as `[c/t]`.
#[derive(Debug)]
pub struct Progress {
    completed: AtomicUsize,
    total: usize,
}

impl Progress {
    /// Creates a tracker for `total` tasks.
    pub fn new(total: usize) -> Self {
        Self {
            completed: AtomicUsize::new(0),
            total,
        }
    }

    /// Records one terminated task and returns the new completed count.
    pub fn complete_one(&self) -> usize {
        self.completed.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Completed count so far.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Total task count.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Formats the current state as `[c/t]`.
    pub fn display(&self) -> String {
        format!("[{}/{}]", self.completed(), self.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_counts_up() {
        let p = Progress::new(3);
        assert_eq!(p.display(), "[0/3]");
        assert_eq!(p.complete_one(), 1);
        assert_eq!(p.complete_one(), 2);
        assert_eq!(p.display(), "[2/3]");
    }

    #[test]
    fn test_concurrent_increments() {
        let p = Arc::new(Progress::new(100));
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let p = Arc::clone(&p);
                thread::spawn(move || {
                    for _ in 0..10 {
                        p.complete_one();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(p.completed(), 100);
    }
}
