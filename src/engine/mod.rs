pub mod binding;
pub mod decode;
pub mod tesseract;
pub mod types;

use image::GrayImage;

pub use binding::{BindingSpec, EngineBinding};
pub use decode::ImageDecoder;
pub use types::{CancelFlag, EngineDiag, EngineError, Extraction};

/// A single recognizer instance. Instances are owned by exactly one worker
/// thread and are never shared, so `Sync` is not required.
pub trait Engine: Send {
    fn name(&self) -> &str;
    fn recognize(&mut self, image: &GrayImage, cancel: &CancelFlag) -> Result<String, EngineError>;
}

/// Builds engine instances. Called lazily from each worker thread.
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn Engine>, EngineError>;

    fn doctor(&self) -> EngineDiag {
        match self.create() {
            Ok(engine) => EngineDiag {
                engine: engine.name().to_string(),
                version: None,
                language: String::new(),
                ok: true,
                error: None,
            },
            Err(err) => EngineDiag {
                engine: "unknown".into(),
                version: None,
                language: String::new(),
                ok: false,
                error: Some(err.to_string()),
            },
        }
    }
}

impl<F> EngineFactory for F
where
    F: Fn() -> Result<Box<dyn Engine>, EngineError> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn Engine>, EngineError> {
        self()
    }
}

/// Turns raw payload bytes into something an engine can read.
pub trait Decoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<GrayImage, EngineError>;
}
