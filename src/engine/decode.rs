use super::{Decoder, EngineError};
use crate::config;
use image::{GrayImage, ImageReader};
use std::io::Cursor;

/// Decodes any format the `image` crate was built with and converts to 8-bit
/// grayscale, which is what the recognizer consumes.
#[derive(Debug, Clone)]
pub struct ImageDecoder {
    max_pixels: u64,
}

impl ImageDecoder {
    pub fn new(max_pixels: u64) -> Self {
        Self { max_pixels }
    }

    pub fn from_config(cfg: &config::Engine) -> Self {
        Self::new(cfg.max_image_pixels)
    }
}

impl Default for ImageDecoder {
    fn default() -> Self {
        Self::new(config::Engine::default().max_image_pixels)
    }
}

impl Decoder for ImageDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<GrayImage, EngineError> {
        if bytes.is_empty() {
            return Err(EngineError::Decode("empty payload".into()));
        }
        // Header-only read; the pixel limit applies before any buffer is allocated.
        let (width, height) = reader(bytes)?
            .into_dimensions()
            .map_err(|e| EngineError::Decode(e.to_string()))?;

        let pixels = u64::from(width) * u64::from(height);
        if pixels == 0 {
            return Err(EngineError::Decode("image has no pixels".into()));
        }
        if self.max_pixels > 0 && pixels > self.max_pixels {
            return Err(EngineError::Decode(format!(
                "image too large: {width}x{height} exceeds max_image_pixels={}",
                self.max_pixels
            )));
        }

        let img = reader(bytes)?
            .decode()
            .map_err(|e| EngineError::Decode(e.to_string()))?;
        Ok(img.to_luma8())
    }
}

fn reader(bytes: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>, EngineError> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| EngineError::Decode(e.to_string()))
}
