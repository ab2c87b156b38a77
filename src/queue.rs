//! Bounded FIFO shared by the worker threads.
//!
//! A full queue rejects instead of blocking; this is the only backpressure
//! the server applies. `take` blocks until a job arrives or the queue is
//! closed and drained.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("job queue is full (capacity {capacity})")]
    Full { capacity: usize },
    #[error("job queue is closed")]
    Closed,
}

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

pub struct JobQueue<T> {
    capacity: usize,
    state: Mutex<State<T>>,
    ready: Condvar,
}

impl<T> JobQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.lock().items.len()
    }

    /// Appends `item` if there is room. On failure the item is handed back
    /// alongside the error so the caller can resolve it.
    pub fn submit(&self, item: T) -> Result<(), (QueueError, T)> {
        {
            let mut st = self.lock();
            if st.closed {
                return Err((QueueError::Closed, item));
            }
            if st.items.len() >= self.capacity {
                return Err((
                    QueueError::Full {
                        capacity: self.capacity,
                    },
                    item,
                ));
            }
            st.items.push_back(item);
        }
        self.ready.notify_one();
        Ok(())
    }

    /// Blocks until an item is available. Returns `None` once the queue is
    /// closed and empty.
    pub fn take(&self) -> Option<T> {
        let mut st = self.lock();
        loop {
            if let Some(item) = st.items.pop_front() {
                return Some(item);
            }
            if st.closed {
                return None;
            }
            st = self
                .ready
                .wait(st)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Closes the queue. Queued items are still handed out by `take`.
    pub fn shutdown(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    // Every critical section leaves `State` consistent, so a panic elsewhere
    // while holding the lock does not invalidate it.
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capacity_is_clamped() {
        let q: JobQueue<u32> = JobQueue::new(0);
        assert_eq!(q.capacity(), 1);
        assert!(q.submit(1).is_ok());
        assert!(matches!(q.submit(2), Err((QueueError::Full { capacity: 1 }, 2))));
    }

    #[test]
    fn closed_queue_drains_then_ends() {
        let q = JobQueue::new(4);
        q.submit("a").unwrap();
        q.submit("b").unwrap();
        q.shutdown();
        assert!(matches!(q.submit("c"), Err((QueueError::Closed, "c"))));
        assert_eq!(q.take(), Some("a"));
        assert_eq!(q.take(), Some("b"));
        assert_eq!(q.take(), None);
    }

    #[test]
    fn queued_counts_items_not_yet_taken() {
        let q = JobQueue::new(3);
        assert_eq!(q.queued(), 0);
        q.submit(1).unwrap();
        q.submit(2).unwrap();
        assert_eq!(q.queued(), 2);
        assert_eq!(q.take(), Some(1));
        assert_eq!(q.queued(), 1);
    }
}
