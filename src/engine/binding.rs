//! Per-worker engine binding.
//!
//! Each worker owns one `EngineBinding`. The engine instance inside it is
//! created on the first job and reused afterwards; a failed or panicked
//! initialization leaves the slot empty so the next job retries.

use super::{CancelFlag, Decoder, Engine, EngineError, EngineFactory, Extraction};
use crate::postprocess::TextCleaner;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Everything a worker needs to build its own binding.
#[derive(Clone)]
pub struct BindingSpec {
    factory: Arc<dyn EngineFactory>,
    decoder: Arc<dyn Decoder>,
    cleaner: Option<Arc<TextCleaner>>,
}

impl BindingSpec {
    pub fn new(factory: Arc<dyn EngineFactory>, decoder: Arc<dyn Decoder>) -> Self {
        Self {
            factory,
            decoder,
            cleaner: None,
        }
    }

    pub fn with_cleaner(mut self, cleaner: TextCleaner) -> Self {
        self.cleaner = Some(Arc::new(cleaner));
        self
    }

    pub fn bind(&self) -> EngineBinding {
        EngineBinding {
            spec: self.clone(),
            engine: None,
            inits: 0,
        }
    }
}

pub struct EngineBinding {
    spec: BindingSpec,
    engine: Option<Box<dyn Engine>>,
    inits: u32,
}

impl EngineBinding {
    pub fn is_initialized(&self) -> bool {
        self.engine.is_some()
    }

    /// Number of successful engine initializations on this binding.
    pub fn init_count(&self) -> u32 {
        self.inits
    }

    /// Decode `payload` and run recognition on it.
    ///
    /// `Extraction::elapsed` covers the recognition call only; decode time is
    /// reported separately.
    pub fn run(&mut self, payload: &[u8], cancel: &CancelFlag) -> Result<Extraction, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let decode_started = Instant::now();
        let decoder = Arc::clone(&self.spec.decoder);
        let image = guarded(|| decoder.decode(payload))?;
        let decode_elapsed = decode_started.elapsed();

        let engine = self.ensure_engine()?;

        let started = Instant::now();
        let recognized = guarded(|| engine.recognize(&image, cancel));
        let elapsed = started.elapsed();

        let text = match recognized {
            Ok(text) => text,
            Err(err) => {
                if matches!(err, EngineError::Panicked(_)) {
                    // Internal state is unknown after a panic; rebuild on next use.
                    warn!("dropping engine instance after panic");
                    self.engine = None;
                }
                return Err(err);
            }
        };

        let text = match &self.spec.cleaner {
            Some(cleaner) => cleaner.clean(&text),
            None => text,
        };

        Ok(Extraction {
            text,
            elapsed,
            decode_elapsed,
        })
    }

    fn ensure_engine(&mut self) -> Result<&mut Box<dyn Engine>, EngineError> {
        if self.engine.is_none() {
            let factory = Arc::clone(&self.spec.factory);
            let started = Instant::now();
            let engine = guarded(|| factory.create()).map_err(|err| match err {
                EngineError::Init(_) => err,
                other => EngineError::Init(other.to_string()),
            })?;
            self.inits += 1;
            debug!(
                "engine {} initialized in {:?} (init #{})",
                engine.name(),
                started.elapsed(),
                self.inits
            );
            self.engine = Some(engine);
        }
        self.engine
            .as_mut()
            .ok_or_else(|| EngineError::Init("engine slot empty after init".into()))
    }
}

fn guarded<R>(f: impl FnOnce() -> Result<R, EngineError>) -> Result<R, EngineError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(res) => res,
        Err(payload) => Err(EngineError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_reads_str_and_string() {
        let a: Box<dyn Any + Send> = Box::new("boom");
        let b: Box<dyn Any + Send> = Box::new(String::from("bang"));
        let c: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(a.as_ref()), "boom");
        assert_eq!(panic_message(b.as_ref()), "bang");
        assert_eq!(panic_message(c.as_ref()), "unknown panic payload");
    }
}
