use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Per-item failures. These never escape a worker; they become
/// `Outcome::Failure` with the rendered message as the reason.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("engine init failed: {0}")]
    Init(String),
    #[error("extraction failed: {0}")]
    Extract(String),
    #[error("engine panicked: {0}")]
    Panicked(String),
    #[error("cancelled before start")]
    Cancelled,
}

/// Shared flag a job's owner can raise to ask the engine to skip work.
///
/// Engines may ignore it; nothing interrupts a recognition call that is
/// already running.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of one pass through a binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub text: String,
    /// Time spent inside the recognition call only.
    pub elapsed: Duration,
    pub decode_elapsed: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineDiag {
    pub engine: String,
    pub version: Option<String>,
    pub language: String,
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}
