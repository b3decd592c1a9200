//! Console stand-in for a display surface.

use image::{DynamicImage, GenericImageView};
use std::sync::Mutex;
use std::time::Duration;

use image_magic::Renderer;

/// A named slot that "shows" one image at a time.
pub struct Viewport {
  name: String,
  shown: Mutex<Option<(u32, u32)>>,
}

impl Viewport {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      shown: Mutex::new(None),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Dimensions of the image currently shown.
  pub fn shown(&self) -> Option<(u32, u32)> {
    *self.shown.lock().unwrap_or_else(|e| e.into_inner())
  }
}

/// Prints each render instead of drawing it.
pub struct ConsoleRenderer;

impl Renderer for ConsoleRenderer {
  type Target = Viewport;
  type Image = DynamicImage;

  fn render(&self, target: &Viewport, image: DynamicImage, transition: Duration) {
    let (width, height) = image.dimensions();
    let mut shown = target.shown.lock().unwrap_or_else(|e| e.into_inner());

    match (*shown, transition.is_zero()) {
      (Some((w, h)), false) => println!(
        "{}: {}x{} -> {}x{} (cross-fade {} ms)",
        target.name,
        w,
        h,
        width,
        height,
        transition.as_millis()
      ),
      _ => println!("{}: {}x{}", target.name, width, height),
    }

    *shown = Some((width, height));
  }
}
