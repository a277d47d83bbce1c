//! Shared queue of files awaiting validation

use crossbeam_queue::SegQueue;
use std::path::PathBuf;

/// Concurrent multi-consumer queue of file paths
///
/// Filled once before the workers start. Any number of threads may pop
/// concurrently and every item is handed out to exactly one of them.
/// Ordering across consumers is not guaranteed.
#[derive(Debug, Default)]
pub struct WorkQueue {
    items: SegQueue<PathBuf>,
    total: usize,
}

impl WorkQueue {
    pub fn new<I>(paths: I) -> Self
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let items = SegQueue::new();
        let mut total = 0;
        for path in paths {
            items.push(path);
            total += 1;
        }
        Self { items, total }
    }

    /// Take the next file, `None` once the queue is drained
    pub fn pop(&self) -> Option<PathBuf> {
        self.items.pop()
    }

    /// Items still waiting
    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items ever enqueued
    pub fn total(&self) -> usize {
        self.total
    }
}
