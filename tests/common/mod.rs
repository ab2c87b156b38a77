//! Scripted decoder and engine shared by the integration tests.
//!
//! The decoder turns a payload into a 1-pixel-high image holding the payload
//! bytes; payloads starting with `BAD` fail to decode. The engine reads the
//! pixels back as a script:
//!
//! - `sleep<ms>|rest` sleeps, then interprets `rest`
//! - `fail` returns an extraction error
//! - `panic` panics
//! - anything else is returned as the recognized text (trailing spaces trimmed)
#![allow(dead_code)]

use image::GrayImage;
use ocr_dispatch::dispatch::{DeadlinePolicy, Dispatcher};
use ocr_dispatch::engine::{BindingSpec, CancelFlag, Decoder, Engine, EngineError, EngineFactory};
use ocr_dispatch::pool::WorkerPool;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

pub struct RawDecoder;

impl Decoder for RawDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<GrayImage, EngineError> {
        if bytes.starts_with(b"BAD") {
            return Err(EngineError::Decode("unrecognized image format".into()));
        }
        GrayImage::from_raw(bytes.len() as u32, 1, bytes.to_vec())
            .filter(|img| img.width() > 0)
            .ok_or_else(|| EngineError::Decode("empty payload".into()))
    }
}

#[derive(Default)]
pub struct ScriptFactory {
    pub inits: AtomicUsize,
    pub failing_inits: AtomicUsize,
}

impl ScriptFactory {
    pub fn failing_first(n: usize) -> Self {
        Self {
            inits: AtomicUsize::new(0),
            failing_inits: AtomicUsize::new(n),
        }
    }

    pub fn inits(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }
}

impl EngineFactory for ScriptFactory {
    fn create(&self) -> Result<Box<dyn Engine>, EngineError> {
        let remaining = self.failing_inits.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_inits.store(remaining - 1, Ordering::SeqCst);
            return Err(EngineError::Init("model file not mounted".into()));
        }
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptEngine))
    }
}

pub struct ScriptEngine;

impl Engine for ScriptEngine {
    fn name(&self) -> &str {
        "script"
    }

    fn recognize(&mut self, image: &GrayImage, _cancel: &CancelFlag) -> Result<String, EngineError> {
        let script = String::from_utf8_lossy(image.as_raw()).into_owned();
        let mut rest = script.as_str();
        if let Some(after) = rest.strip_prefix("sleep") {
            if let Some((ms, tail)) = after.split_once('|') {
                let ms: u64 = ms.parse().map_err(|_| EngineError::Extract("bad sleep".into()))?;
                thread::sleep(Duration::from_millis(ms));
                rest = tail;
            }
        }
        match rest.trim_end() {
            "fail" => Err(EngineError::Extract("recognizer returned no result".into())),
            "panic" => panic!("recognizer crashed"),
            text => Ok(text.to_string()),
        }
    }
}

pub fn spec(factory: &Arc<ScriptFactory>) -> BindingSpec {
    let factory: Arc<dyn EngineFactory> = factory.clone();
    BindingSpec::new(factory, Arc::new(RawDecoder))
}

pub fn pool(workers: usize, queue: usize) -> (Arc<WorkerPool>, Arc<ScriptFactory>) {
    let factory = Arc::new(ScriptFactory::default());
    let pool = Arc::new(WorkerPool::new(workers, queue, spec(&factory)).unwrap());
    (pool, factory)
}

pub fn policy(default_ms: u64, extended_ms: u64, threshold: usize) -> DeadlinePolicy {
    DeadlinePolicy {
        default_timeout: Duration::from_millis(default_ms),
        extended_timeout: Duration::from_millis(extended_ms),
        large_payload_threshold_bytes: threshold,
    }
}

pub fn dispatcher(workers: usize, queue: usize, policy: DeadlinePolicy) -> Dispatcher {
    let (pool, _) = pool(workers, queue);
    Dispatcher::new(pool, policy)
}

/// Polls `cond` every few milliseconds until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Blocks until `n` workers have claimed a job.
pub fn wait_busy(pool: &WorkerPool, n: usize) {
    assert!(
        wait_until(Duration::from_secs(5), || pool.stats().busy >= n),
        "workers never picked up their jobs"
    );
}
