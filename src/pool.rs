//! Fixed-size OCR worker pool.
//!
//! `num_workers` OS threads pull jobs from one bounded [`JobQueue`]. Each
//! thread owns its own [`EngineBinding`], so engine instances are never
//! shared. Every job gets exactly one [`Outcome`], written by the worker that
//! claimed it; item-level failures never take a worker down.

use crate::engine::{BindingSpec, CancelFlag, EngineBinding};
use crate::queue::{JobQueue, QueueError};
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub type JobId = i64;

/// Final result of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Success {
        text: String,
        elapsed: Duration,
        decode_elapsed: Duration,
    },
    Failure {
        reason: String,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("server overloaded: job queue is full (capacity {capacity})")]
    Overloaded { capacity: usize },
    #[error("worker pool is shut down")]
    ShutDown,
}

/// One unit of work. Owned by the queue until a worker claims it.
struct Job {
    id: JobId,
    payload: Vec<u8>,
    cancel: CancelFlag,
    result_tx: SyncSender<Outcome>,
}

/// Receiving side of a job's one-shot result slot.
pub struct PendingOutcome {
    id: JobId,
    cancel: CancelFlag,
    rx: Receiver<Outcome>,
    resolved: Option<Outcome>,
}

/// What a bounded wait on a [`PendingOutcome`] produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitResult {
    Ready(Outcome),
    TimedOut,
}

impl PendingOutcome {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Waits up to `timeout` for the outcome. Timing out leaves the job
    /// running; the handle can be waited on again.
    pub fn wait_timeout(&mut self, timeout: Duration) -> WaitResult {
        if let Some(outcome) = &self.resolved {
            return WaitResult::Ready(outcome.clone());
        }
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => self.resolve(outcome),
            Err(RecvTimeoutError::Timeout) => WaitResult::TimedOut,
            Err(RecvTimeoutError::Disconnected) => self.resolve(dropped_outcome()),
        }
    }

    /// Non-blocking poll.
    pub fn try_outcome(&mut self) -> Option<Outcome> {
        if let Some(outcome) = &self.resolved {
            return Some(outcome.clone());
        }
        match self.rx.try_recv() {
            Ok(outcome) => self.resolve(outcome).into_ready(),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => self.resolve(dropped_outcome()).into_ready(),
        }
    }

    /// Blocks until the worker writes the outcome.
    pub fn wait(mut self) -> Outcome {
        if let Some(outcome) = self.resolved.take() {
            return outcome;
        }
        self.rx.recv().unwrap_or_else(|_| dropped_outcome())
    }

    /// Ask the worker to skip this job if it has not started yet.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    fn resolve(&mut self, outcome: Outcome) -> WaitResult {
        self.resolved = Some(outcome.clone());
        WaitResult::Ready(outcome)
    }
}

impl WaitResult {
    fn into_ready(self) -> Option<Outcome> {
        match self {
            WaitResult::Ready(o) => Some(o),
            WaitResult::TimedOut => None,
        }
    }
}

// Only reachable if a worker thread dies without writing the outcome.
fn dropped_outcome() -> Outcome {
    Outcome::Failure {
        reason: "worker exited without producing a result".into(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub workers: usize,
    pub queue_capacity: usize,
    pub queued: usize,
    pub busy: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Default)]
struct Counters {
    busy: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

pub struct WorkerPool {
    queue: Arc<JobQueue<Job>>,
    counters: Arc<Counters>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    num_workers: usize,
}

type WorkerMain = Box<dyn FnOnce() + Send + 'static>;

impl WorkerPool {
    /// Starts `num_workers` threads (at least 1) over a queue of
    /// `max_queue_size` slots (0 falls back to 100).
    ///
    /// Fails if any worker thread cannot be spawned; threads started before
    /// the failure are shut down and joined first.
    pub fn new(num_workers: usize, max_queue_size: usize, spec: BindingSpec) -> io::Result<Self> {
        Self::start(num_workers, max_queue_size, spec, |name, main| {
            thread::Builder::new().name(name).spawn(main)
        })
    }

    fn start<S>(
        num_workers: usize,
        max_queue_size: usize,
        spec: BindingSpec,
        mut spawn: S,
    ) -> io::Result<Self>
    where
        S: FnMut(String, WorkerMain) -> io::Result<JoinHandle<()>>,
    {
        let num_workers = num_workers.max(1);
        let max_queue_size = if max_queue_size == 0 {
            crate::config::DEFAULT_MAX_QUEUE_SIZE
        } else {
            max_queue_size
        };

        let queue = Arc::new(JobQueue::new(max_queue_size));
        let counters = Arc::new(Counters::default());
        let mut workers = Vec::with_capacity(num_workers);

        for index in 0..num_workers {
            let worker_queue = Arc::clone(&queue);
            let worker_counters = Arc::clone(&counters);
            let binding = spec.bind();
            let main: WorkerMain =
                Box::new(move || worker_loop(index, worker_queue, worker_counters, binding));
            match spawn(format!("ocr-worker-{index}"), main) {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    warn!("failed to spawn worker {index} of {num_workers}: {err}");
                    queue.shutdown();
                    join_all(workers);
                    return Err(io::Error::new(
                        err.kind(),
                        format!("spawning worker {index} of {num_workers}: {err}"),
                    ));
                }
            }
        }

        info!(
            "worker pool started: workers={} max_queue_size={}",
            num_workers, max_queue_size
        );

        Ok(Self {
            queue,
            counters,
            num_workers,
            workers: Mutex::new(workers),
        })
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Admits one job. Fails synchronously with `Overloaded` when the queue
    /// is full; never blocks.
    pub fn enqueue(&self, id: JobId, payload: Vec<u8>) -> Result<PendingOutcome, PoolError> {
        let (result_tx, rx) = mpsc::sync_channel(1);
        let cancel = CancelFlag::new();
        let job = Job {
            id,
            payload,
            cancel: cancel.clone(),
            result_tx,
        };

        match self.queue.submit(job) {
            Ok(()) => Ok(PendingOutcome {
                id,
                cancel,
                rx,
                resolved: None,
            }),
            Err((QueueError::Full { capacity }, _)) => {
                warn!("rejecting job id={id}: queue full (capacity {capacity})");
                Err(PoolError::Overloaded { capacity })
            }
            Err((QueueError::Closed, _)) => Err(PoolError::ShutDown),
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.num_workers,
            queue_capacity: self.queue.capacity(),
            queued: self.queue.queued(),
            busy: self.counters.busy.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
        }
    }

    /// Closes the queue and joins every worker once queued jobs have drained.
    /// Safe to call more than once and from several threads; every caller
    /// returns only after all workers have exited.
    pub fn shutdown(&self) {
        self.queue.shutdown();
        // Held across the joins so a concurrent caller waits for them too.
        let mut guard = self
            .workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.is_empty() {
            return;
        }
        join_all(guard.drain(..));
        info!("worker pool stopped");
    }
}

fn join_all(handles: impl IntoIterator<Item = JoinHandle<()>>) {
    for handle in handles {
        if handle.join().is_err() {
            warn!("worker thread panicked during shutdown");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    index: usize,
    queue: Arc<JobQueue<Job>>,
    counters: Arc<Counters>,
    mut binding: EngineBinding,
) {
    while let Some(job) = queue.take() {
        counters.busy.fetch_add(1, Ordering::SeqCst);
        debug!(
            "[worker {index}] processing id={} ({} bytes)",
            job.id,
            job.payload.len()
        );

        let outcome = match binding.run(&job.payload, &job.cancel) {
            Ok(extraction) => Outcome::Success {
                text: extraction.text,
                elapsed: extraction.elapsed,
                decode_elapsed: extraction.decode_elapsed,
            },
            Err(err) => {
                warn!("[worker {index}] id={} failed: {err}", job.id);
                Outcome::Failure {
                    reason: err.to_string(),
                }
            }
        };

        if outcome.is_success() {
            counters.completed.fetch_add(1, Ordering::SeqCst);
        } else {
            counters.failed.fetch_add(1, Ordering::SeqCst);
        }
        counters.busy.fetch_sub(1, Ordering::SeqCst);

        if job.result_tx.send(outcome).is_err() {
            debug!(
                "[worker {index}] id={} finished after its caller stopped waiting; result discarded",
                job.id
            );
        }
    }
    debug!("[worker {index}] exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, EngineError, EngineFactory, ImageDecoder};

    fn unused_spec() -> BindingSpec {
        let factory = || -> Result<Box<dyn Engine>, EngineError> {
            Err(EngineError::Init("not used".into()))
        };
        let factory: Arc<dyn EngineFactory> = Arc::new(factory);
        BindingSpec::new(factory, Arc::new(ImageDecoder::default()))
    }

    #[test]
    fn spawn_failure_stops_started_workers_and_errors() {
        let exited = Arc::new(AtomicUsize::new(0));
        let mut attempts = 0;
        let result = WorkerPool::start(3, 4, unused_spec(), |name, main| {
            attempts += 1;
            if attempts == 2 {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "no threads left"));
            }
            let exited = Arc::clone(&exited);
            thread::Builder::new().name(name).spawn(move || {
                main();
                exited.fetch_add(1, Ordering::SeqCst);
            })
        });

        let err = result.err().expect("start must fail");
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert!(err.to_string().contains("worker 1 of 3"), "{err}");
        assert_eq!(attempts, 2);
        // The first worker was released from `take` and joined before returning.
        assert_eq!(exited.load(Ordering::SeqCst), 1);
    }
}
