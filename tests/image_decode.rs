use image::{GrayImage, ImageFormat, Luma, RgbImage};
use ocr_dispatch::engine::{
    BindingSpec, CancelFlag, Decoder, Engine, EngineError, EngineFactory, ImageDecoder,
};
use std::io::Cursor;
use std::sync::Arc;

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, image::Rgb([200, 10, 10]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

struct SizeEngine;

impl Engine for SizeEngine {
    fn name(&self) -> &str {
        "size"
    }

    fn recognize(&mut self, image: &GrayImage, _cancel: &CancelFlag) -> Result<String, EngineError> {
        let Luma([v]) = *image.get_pixel(0, 0);
        Ok(format!("{}x{} luma={v}", image.width(), image.height()))
    }
}

#[test]
fn png_decodes_to_grayscale() {
    let img = ImageDecoder::default().decode(&png_bytes(12, 5)).unwrap();
    assert_eq!(img.dimensions(), (12, 5));
}

#[test]
fn garbage_bytes_are_a_decode_error() {
    let err = ImageDecoder::default().decode(b"definitely not an image").unwrap_err();
    assert!(matches!(err, EngineError::Decode(_)));
    assert!(err.to_string().starts_with("decode failed"));

    let err = ImageDecoder::default().decode(&[]).unwrap_err();
    assert!(matches!(err, EngineError::Decode(_)));
}

#[test]
fn oversized_images_are_refused() {
    let err = ImageDecoder::new(100).decode(&png_bytes(20, 20)).unwrap_err();
    assert!(err.to_string().contains("too large"));
}

// File and info headers only; the pixel array the header promises is absent.
fn bmp_header(width: i32, height: i32) -> Vec<u8> {
    let mut out = Vec::with_capacity(54);
    out.extend_from_slice(b"BM");
    out.extend_from_slice(&54u32.to_le_bytes());
    out.extend_from_slice(&[0; 4]);
    out.extend_from_slice(&54u32.to_le_bytes());
    out.extend_from_slice(&40u32.to_le_bytes());
    out.extend_from_slice(&width.to_le_bytes());
    out.extend_from_slice(&height.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&24u16.to_le_bytes());
    out.extend_from_slice(&[0; 24]);
    out
}

#[test]
fn pixel_limit_is_checked_from_the_header() {
    let err = ImageDecoder::default()
        .decode(&bmp_header(60_000, 60_000))
        .unwrap_err();
    assert!(err.to_string().contains("too large"), "{err}");
    assert!(err.to_string().contains("60000x60000"), "{err}");
}

#[test]
fn binding_runs_decoder_then_engine() {
    let factory = || -> Result<Box<dyn Engine>, EngineError> { Ok(Box::new(SizeEngine)) };
    let factory: Arc<dyn EngineFactory> = Arc::new(factory);
    let spec = BindingSpec::new(factory, Arc::new(ImageDecoder::default()));
    let mut binding = spec.bind();
    assert!(!binding.is_initialized());

    let out = binding.run(&png_bytes(3, 2), &CancelFlag::new()).unwrap();
    assert!(out.text.starts_with("3x2 luma="));
    assert!(binding.is_initialized());
    assert_eq!(binding.init_count(), 1);

    // A decode failure neither initializes nor drops the engine.
    let err = binding.run(b"nope", &CancelFlag::new()).unwrap_err();
    assert!(matches!(err, EngineError::Decode(_)));
    assert!(binding.is_initialized());
}

#[test]
fn cancelled_flag_short_circuits() {
    let factory = || -> Result<Box<dyn Engine>, EngineError> { Ok(Box::new(SizeEngine)) };
    let spec = BindingSpec::new(Arc::new(factory), Arc::new(ImageDecoder::default()));
    let mut binding = spec.bind();
    let cancel = CancelFlag::new();
    cancel.cancel();
    assert_eq!(binding.run(&png_bytes(3, 2), &cancel), Err(EngineError::Cancelled));
    assert!(!binding.is_initialized());
}
