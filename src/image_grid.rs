//! Pixel grids: the decoded source image and the canvas it is revealed on.
//!
//! Both are tightly packed RGB8, row-major, `height × width × 3` bytes.

use std::ops::Range;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::RgbImage;
use log::info;

/// Bytes per pixel (RGB).
pub const CHANNELS: usize = 3;

/// The source image, decoded and resized once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageGrid {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

impl ImageGrid {
    /// Wrap an existing RGB8 buffer.
    pub fn from_rgb(width: usize, height: usize, pixels: Vec<u8>) -> Result<Self> {
        let expected = width * height * CHANNELS;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB buffer is {} bytes, expected {expected} for {width}x{height}",
                pixels.len()
            ));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Decode encoded image bytes (PNG / JPEG) to RGB and scale it down so
    /// that `height <= max_height`, keeping the aspect ratio.  Images that
    /// already fit are left at their native size.
    pub fn decode(bytes: &[u8], max_height: u32) -> Result<Self> {
        let img = image::load_from_memory(bytes).context("decoding image")?;
        Ok(Self::from_image(img.to_rgb8(), max_height))
    }

    /// Read and decode an image file.  See [`ImageGrid::decode`].
    pub fn open(path: &Path, max_height: u32) -> Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("reading image {}", path.display()))?;
        let grid = Self::decode(&bytes, max_height)
            .with_context(|| format!("loading image {}", path.display()))?;
        info!(
            "Loaded {} as {}x{} RGB",
            path.display(),
            grid.width,
            grid.height
        );
        Ok(grid)
    }

    fn from_image(rgb: RgbImage, max_height: u32) -> Self {
        let (w, h) = rgb.dimensions();
        let (new_w, new_h) = fit_height(w, h, max_height);
        let rgb = if (new_w, new_h) == (w, h) {
            rgb
        } else {
            image::imageops::resize(&rgb, new_w, new_h, FilterType::Triangle)
        };
        let (w, h) = rgb.dimensions();
        Self {
            width: w as usize,
            height: h as usize,
            pixels: rgb.into_raw(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// The `[r, g, b]` value at column `x`, row `y`.
    pub fn pixel(&self, x: usize, y: usize) -> [u8; 3] {
        let i = (y * self.width + x) * CHANNELS;
        [self.pixels[i], self.pixels[i + 1], self.pixels[i + 2]]
    }

    fn row_bytes(&self, rows: Range<usize>) -> Range<usize> {
        let stride = self.width * CHANNELS;
        rows.start * stride..rows.end * stride
    }
}

/// Target size for an image of `w × h` capped at `max_height` rows.
///
/// The width is truncated, and each side is clamped to at least one pixel.
fn fit_height(w: u32, h: u32, max_height: u32) -> (u32, u32) {
    if h <= max_height {
        return (w, h);
    }
    let new_w = (w as u64 * max_height as u64 / h as u64) as u32;
    (new_w.max(1), max_height.max(1))
}

/// The canvas an animation paints into.
///
/// Starts blank (all zero) and only ever gains rows copied from the source
/// grid until [`RevealCanvas::reset`] is called for the next run.
#[derive(Debug, Clone)]
pub struct RevealCanvas {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
    /// Exclusive end of the highest row copied so far.
    rows_filled: usize,
}

impl RevealCanvas {
    /// A blank canvas with the same shape as `grid`.
    pub fn for_grid(grid: &ImageGrid) -> Self {
        Self {
            width: grid.width,
            height: grid.height,
            pixels: vec![0; grid.pixels.len()],
            rows_filled: 0,
        }
    }

    pub fn reset(&mut self) {
        self.pixels.fill(0);
        self.rows_filled = 0;
    }

    /// Copy `rows` (clamped to the grid height) from `src` into the same
    /// coordinates on the canvas.
    ///
    /// # Panics
    /// Panics if `src` does not have the canvas's shape.
    pub fn copy_rows(&mut self, src: &ImageGrid, rows: Range<usize>) {
        assert_eq!(
            (src.width, src.height),
            (self.width, self.height),
            "canvas / image shape mismatch"
        );
        let end = rows.end.min(self.height);
        let start = rows.start.min(end);
        let bytes = src.row_bytes(start..end);
        self.pixels[bytes.clone()].copy_from_slice(&src.pixels[bytes]);
        self.rows_filled = self.rows_filled.max(end);
    }

    /// Overwrite the whole canvas with `src`.
    pub fn copy_all(&mut self, src: &ImageGrid) {
        self.copy_rows(src, 0..src.height);
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel(&self, x: usize, y: usize) -> [u8; 3] {
        let i = (y * self.width + x) * CHANNELS;
        [self.pixels[i], self.pixels[i + 1], self.pixels[i + 2]]
    }

    pub fn rows_filled(&self) -> usize {
        self.rows_filled
    }

    /// `true` when every byte equals the corresponding byte of `grid`.
    pub fn matches(&self, grid: &ImageGrid) -> bool {
        self.width == grid.width && self.height == grid.height && self.pixels == grid.pixels
    }
}
