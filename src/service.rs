//! Transport-neutral call surface: one image or one batch in, plain
//! serializable responses out. A wire layer only has to map
//! [`ServiceError::status_code`] onto its own status convention.

use crate::config::Config;
use crate::dispatch::{BatchItem, DeadlinePolicy, DispatchError, Dispatcher, ItemOutcome};
use crate::engine::tesseract::TesseractFactory;
use crate::engine::{BindingSpec, EngineDiag, EngineFactory, ImageDecoder};
use crate::pool::{JobId, Outcome, PoolError, PoolStats, WaitResult, WorkerPool};
use crate::postprocess::TextCleaner;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("{0}")]
    Overloaded(String),
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("ocr failed: {0}")]
    Internal(String),
    #[error("no result within {0:?}")]
    DeadlineExceeded(Duration),
}

impl ServiceError {
    pub fn status_code(&self) -> &'static str {
        match self {
            ServiceError::Overloaded(_) => "RESOURCE_EXHAUSTED",
            ServiceError::InvalidArgument(_) => "INVALID_ARGUMENT",
            ServiceError::Unavailable(_) => "UNAVAILABLE",
            ServiceError::Internal(_) => "INTERNAL",
            ServiceError::DeadlineExceeded(_) => "DEADLINE_EXCEEDED",
        }
    }
}

impl From<DispatchError> for ServiceError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::InvalidBatch => ServiceError::InvalidArgument(err.to_string()),
            DispatchError::Overloaded { .. } => ServiceError::Overloaded(err.to_string()),
            DispatchError::ShutDown => ServiceError::Unavailable(err.to_string()),
        }
    }
}

impl From<PoolError> for ServiceError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Overloaded { .. } => ServiceError::Overloaded(err.to_string()),
            PoolError::ShutDown => ServiceError::Unavailable(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageResponse {
    pub id: JobId,
    pub text: String,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Ok,
    Error,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub id: JobId,
    pub status: ItemStatus,
    pub text: String,
    #[serde(default)]
    pub error: Option<String>,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub results: Vec<BatchEntry>,
}

impl BatchEntry {
    fn from_outcome(id: JobId, outcome: ItemOutcome) -> Self {
        match outcome {
            ItemOutcome::Done {
                outcome: Outcome::Success { text, elapsed, .. },
            } => BatchEntry {
                id,
                status: ItemStatus::Ok,
                text,
                error: None,
                processing_time_ms: millis(elapsed),
            },
            ItemOutcome::Done {
                outcome: Outcome::Failure { reason },
            } => BatchEntry {
                id,
                status: ItemStatus::Error,
                text: String::new(),
                error: Some(reason),
                processing_time_ms: 0,
            },
            ItemOutcome::Timeout { deadline } => BatchEntry {
                id,
                status: ItemStatus::Timeout,
                text: String::new(),
                error: Some(format!("no result within {deadline:?}")),
                processing_time_ms: 0,
            },
        }
    }
}

pub struct OcrService {
    dispatcher: Dispatcher,
}

impl OcrService {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Builds the pool and dispatcher described by `cfg` around the
    /// configured engine.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let factory = engine_factory(cfg)?;
        let cleaner = TextCleaner::new(&cfg.postprocess)?;
        let spec = BindingSpec::new(factory, Arc::new(ImageDecoder::from_config(&cfg.engine)))
            .with_cleaner(cleaner);
        let pool = WorkerPool::new(cfg.resolved_workers(), cfg.resolved_queue_size(), spec)
            .context("starting worker pool")?;
        let pool = Arc::new(pool);
        let policy = DeadlinePolicy::from_config(&cfg.dispatch);
        info!(
            "ocr service ready: engine={} default_timeout={:?} extended_timeout={:?} large_payload_threshold={}B",
            cfg.engine.kind,
            policy.default_timeout,
            policy.extended_timeout,
            policy.large_payload_threshold_bytes
        );
        Ok(Self::new(Dispatcher::new(pool, policy)))
    }

    pub fn stats(&self) -> PoolStats {
        self.dispatcher.pool().stats()
    }

    /// Single-image call. Uses the same pool and deadline policy as batches;
    /// an empty payload fails in the decoder like any other unreadable image.
    pub fn process_image(&self, id: JobId, payload: Vec<u8>) -> Result<ImageResponse, ServiceError> {
        let deadline = self.dispatcher.policy().deadline_for(payload.len());
        let mut pending = self.dispatcher.pool().enqueue(id, payload)?;
        match pending.wait_timeout(deadline) {
            WaitResult::Ready(Outcome::Success { text, elapsed, .. }) => Ok(ImageResponse {
                id,
                text,
                processing_time_ms: millis(elapsed),
            }),
            WaitResult::Ready(Outcome::Failure { reason }) => Err(ServiceError::Internal(reason)),
            WaitResult::TimedOut => Err(ServiceError::DeadlineExceeded(deadline)),
        }
    }

    pub fn process_batch(&self, items: Vec<(JobId, Vec<u8>)>) -> Result<BatchResponse, ServiceError> {
        let items = items
            .into_iter()
            .map(|(id, payload)| BatchItem::new(id, payload))
            .collect();
        let results = self.dispatcher.process_batch(items)?;
        Ok(BatchResponse {
            results: results
                .into_iter()
                .map(|r| BatchEntry::from_outcome(r.id, r.outcome))
                .collect(),
        })
    }

    pub fn shutdown(&self) {
        self.dispatcher.pool().shutdown();
    }
}

pub fn engine_factory(cfg: &Config) -> Result<Arc<dyn EngineFactory>> {
    match cfg.engine.kind.as_str() {
        "tesseract" => Ok(Arc::new(TesseractFactory::from_config(&cfg.engine))),
        other => Err(anyhow!("unknown engine.kind: {other}")),
    }
}

pub fn doctor(cfg: &Config) -> Result<EngineDiag> {
    Ok(engine_factory(cfg)?.doctor())
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
