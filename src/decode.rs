//! Turning cached bytes into displayable images.

use image::codecs::{gif::GifDecoder, jpeg::JpegDecoder, png::PngDecoder, webp::WebPDecoder};
use image::{DynamicImage, ImageDecoder, ImageFormat};
use std::io::Cursor;

use crate::error::DecodeError;

/// Decodes raw bytes into the object a `Renderer` displays.
///
/// Decoding runs on the worker pool, so implementations may block.
pub trait Decoder: Send + Sync + 'static {
  type Image: Send + 'static;

  fn decode(&self, bytes: &[u8]) -> Result<Self::Image, DecodeError>;
}

/// Decoder for common raster formats (PNG, JPEG, GIF, WebP).
#[derive(Debug, Clone, Default)]
pub struct RasterDecoder {
  max_pixels: Option<u64>,
}

impl RasterDecoder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Reject images with more than `max` pixels.
  pub fn with_max_pixels(mut self, max: u64) -> Self {
    self.max_pixels = Some(max);
    self
  }
}

impl Decoder for RasterDecoder {
  type Image = DynamicImage;

  fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, DecodeError> {
    if bytes.is_empty() {
      return Err(DecodeError::new("empty input"));
    }

    let format = image::guess_format(bytes).map_err(|e| DecodeError::new(e.to_string()))?;

    // Reject oversized images from the header, before allocating pixels
    if let Some((width, height)) = header_dimensions(bytes, format) {
      self.check_pixels(width, height)?;
    }

    image::load_from_memory_with_format(bytes, format)
      .map_err(|e| DecodeError::new(e.to_string()))
  }
}

impl RasterDecoder {
  fn check_pixels(&self, width: u32, height: u32) -> Result<(), DecodeError> {
    let Some(max) = self.max_pixels else {
      return Ok(());
    };

    let pixels = u64::from(width) * u64::from(height);
    if pixels > max {
      return Err(DecodeError::new(format!(
        "image is {}x{} ({} pixels), limit is {}",
        width, height, pixels, max
      )));
    }
    Ok(())
  }
}

fn header_dimensions(bytes: &[u8], format: ImageFormat) -> Option<(u32, u32)> {
  match format {
    ImageFormat::Png => PngDecoder::new(Cursor::new(bytes)).ok().map(|d| d.dimensions()),
    ImageFormat::Jpeg => JpegDecoder::new(Cursor::new(bytes)).ok().map(|d| d.dimensions()),
    ImageFormat::Gif => GifDecoder::new(Cursor::new(bytes)).ok().map(|d| d.dimensions()),
    ImageFormat::WebP => WebPDecoder::new(Cursor::new(bytes)).ok().map(|d| d.dimensions()),
    _ => None,
  }
}
