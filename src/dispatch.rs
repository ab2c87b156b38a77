//! Batch admission and ordered result assembly.
//!
//! A batch is admitted all-or-nothing: if any item is rejected by the pool,
//! the jobs already admitted for that batch are flagged for cancellation and
//! the call fails with `Overloaded`. Once admitted, the batch always yields
//! one entry per item, in request order.

use crate::config;
use crate::pool::{JobId, Outcome, PendingOutcome, PoolError, WaitResult, WorkerPool};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("invalid batch: no items")]
    InvalidBatch,
    #[error("server overloaded: batch item {rejected_index} of {batch_len} was rejected")]
    Overloaded {
        rejected_index: usize,
        batch_len: usize,
    },
    #[error("worker pool is shut down")]
    ShutDown,
}

/// Per-item deadline selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadlinePolicy {
    pub default_timeout: Duration,
    pub extended_timeout: Duration,
    pub large_payload_threshold_bytes: usize,
}

impl DeadlinePolicy {
    pub fn from_config(cfg: &config::Dispatch) -> Self {
        Self {
            default_timeout: Duration::from_millis(cfg.default_timeout_ms),
            extended_timeout: Duration::from_millis(cfg.extended_timeout_ms),
            large_payload_threshold_bytes: cfg.large_payload_threshold_bytes,
        }
    }

    pub fn deadline_for(&self, payload_len: usize) -> Duration {
        if payload_len > self.large_payload_threshold_bytes {
            self.extended_timeout
        } else {
            self.default_timeout
        }
    }
}

impl Default for DeadlinePolicy {
    fn default() -> Self {
        Self::from_config(&config::Dispatch::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    pub id: JobId,
    pub payload: Vec<u8>,
}

impl BatchItem {
    pub fn new(id: JobId, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }
}

/// What the batch reports at one position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
    /// The worker produced a verdict, success or failure.
    Done { outcome: Outcome },
    /// No verdict within `deadline`. The job keeps running unobserved.
    Timeout { deadline: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResult {
    pub id: JobId,
    pub outcome: ItemOutcome,
}

pub struct Dispatcher {
    pool: Arc<WorkerPool>,
    policy: DeadlinePolicy,
}

impl Dispatcher {
    pub fn new(pool: Arc<WorkerPool>, policy: DeadlinePolicy) -> Self {
        Self { pool, policy }
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn policy(&self) -> &DeadlinePolicy {
        &self.policy
    }

    pub fn process_batch(&self, items: Vec<BatchItem>) -> Result<Vec<ItemResult>, DispatchError> {
        if items.is_empty() {
            return Err(DispatchError::InvalidBatch);
        }

        let started = Instant::now();
        let batch_len = items.len();
        let mut pending: Vec<(PendingOutcome, Duration)> = Vec::with_capacity(batch_len);

        for (index, item) in items.into_iter().enumerate() {
            let deadline = self.policy.deadline_for(item.payload.len());
            match self.pool.enqueue(item.id, item.payload) {
                Ok(handle) => pending.push((handle, deadline)),
                Err(err) => {
                    for (handle, _) in &pending {
                        handle.cancel();
                    }
                    warn!(
                        "batch of {batch_len} not admitted at item {index} ({err}); cancelled {} queued job(s)",
                        pending.len()
                    );
                    return Err(match err {
                        PoolError::Overloaded { .. } => DispatchError::Overloaded {
                            rejected_index: index,
                            batch_len,
                        },
                        PoolError::ShutDown => DispatchError::ShutDown,
                    });
                }
            }
        }

        // Waits are sequential in request order; item k+1 is only waited on
        // after item k resolved or timed out.
        let mut results = Vec::with_capacity(batch_len);
        let mut timeouts = 0usize;
        for (mut handle, deadline) in pending {
            let outcome = match handle.wait_timeout(deadline) {
                WaitResult::Ready(outcome) => ItemOutcome::Done { outcome },
                WaitResult::TimedOut => {
                    timeouts += 1;
                    warn!(
                        "id={} produced no result within {:?}; leaving it to finish in the background",
                        handle.id(),
                        deadline
                    );
                    ItemOutcome::Timeout { deadline }
                }
            };
            debug!("id={} resolved", handle.id());
            results.push(ItemResult {
                id: handle.id(),
                outcome,
            });
        }

        info!(
            "batch done: items={} timeouts={} elapsed={:?}",
            batch_len,
            timeouts,
            started.elapsed()
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_exclusive() {
        let policy = DeadlinePolicy {
            default_timeout: Duration::from_millis(10),
            extended_timeout: Duration::from_millis(40),
            large_payload_threshold_bytes: 100,
        };
        assert_eq!(policy.deadline_for(0), Duration::from_millis(10));
        assert_eq!(policy.deadline_for(100), Duration::from_millis(10));
        assert_eq!(policy.deadline_for(101), Duration::from_millis(40));
    }
}
