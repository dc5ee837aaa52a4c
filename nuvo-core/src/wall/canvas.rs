//! Composited RGB raster for the whole wall.

use serde::{Deserialize, Serialize};

use crate::error::NuvoError;
use crate::layout::Rect;

/// An RGB triple.
pub type Rgb = [u8; 3];

// ── PixelOrder ───────────────────────────────────────────────────

/// Byte order of 3-byte pixels on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelOrder {
    Rgb,
    #[default]
    Bgr,
}

impl PixelOrder {
    /// Convert one wire pixel to RGB (the conversion is its own inverse).
    #[inline]
    pub fn swizzle(self, px: &[u8]) -> Rgb {
        match self {
            PixelOrder::Rgb => [px[0], px[1], px[2]],
            PixelOrder::Bgr => [px[2], px[1], px[0]],
        }
    }
}

// ── Canvas ───────────────────────────────────────────────────────

/// Row-major RGB888 raster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canvas {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Canvas {
    /// A black canvas.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 3],
        }
    }

    /// A canvas filled with one color.
    pub fn filled(width: u32, height: u32, color: Rgb) -> Self {
        let mut canvas = Self::new(width, height);
        for px in canvas.pixels.chunks_exact_mut(3) {
            px.copy_from_slice(&color);
        }
        canvas
    }

    /// Wrap an RGB buffer; its length must match the dimensions.
    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, NuvoError> {
        let expected = width as usize * height as usize * 3;
        if pixels.len() != expected {
            return Err(NuvoError::SizeMismatch {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Interpret a contiguous wire-order buffer of exactly
    /// `width × height × 3` bytes.
    pub fn from_wire(
        width: u32,
        height: u32,
        data: &[u8],
        order: PixelOrder,
    ) -> Result<Self, NuvoError> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(NuvoError::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        let pixels = match order {
            PixelOrder::Rgb => data.to_vec(),
            PixelOrder::Bgr => data
                .chunks_exact(3)
                .flat_map(|px| order.swizzle(px))
                .collect(),
        };
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.pixels
    }

    /// Pixel at `(x, y)`, or `None` outside the canvas.
    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgb> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = self.offset(x, y);
        Some([self.pixels[i], self.pixels[i + 1], self.pixels[i + 2]])
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, color: Rgb) {
        if x < self.width && y < self.height {
            let i = self.offset(x, y);
            self.pixels[i..i + 3].copy_from_slice(&color);
        }
    }

    /// Fill a rectangle, clipped to the canvas.
    pub fn fill_rect(&mut self, rect: Rect, color: Rgb) {
        let Some(clip) = self.clip(rect) else { return };
        for y in clip.y..clip.y + clip.height {
            let start = self.offset(clip.x, y);
            let end = start + clip.width as usize * 3;
            for px in self.pixels[start..end].chunks_exact_mut(3) {
                px.copy_from_slice(&color);
            }
        }
    }

    /// Copy a `src_width`-wide block of wire-order pixels to `(x, y)`,
    /// clipped to the canvas.
    pub fn blit_wire(&mut self, x: u32, y: u32, src: &[u8], src_width: u32, order: PixelOrder) {
        if src_width == 0 {
            return;
        }
        let stride = src_width as usize * 3;
        let rows = (src.len() / stride) as u32;
        let Some(clip) = self.clip(Rect {
            x,
            y,
            width: src_width,
            height: rows,
        }) else {
            return;
        };
        for row in 0..clip.height {
            let src_row = &src[row as usize * stride..][..clip.width as usize * 3];
            let dst = self.offset(clip.x, clip.y + row);
            let dst_row = &mut self.pixels[dst..dst + clip.width as usize * 3];
            match order {
                PixelOrder::Rgb => dst_row.copy_from_slice(src_row),
                PixelOrder::Bgr => {
                    for (d, s) in dst_row.chunks_exact_mut(3).zip(src_row.chunks_exact(3)) {
                        d.copy_from_slice(&order.swizzle(s));
                    }
                }
            }
        }
    }

    /// Copy another canvas to `(x, y)`, clipped.
    pub fn paste(&mut self, x: u32, y: u32, other: &Canvas) {
        self.blit_wire(x, y, &other.pixels, other.width, PixelOrder::Rgb);
    }

    /// Run every byte of a rectangle through `lut`.
    pub fn map_rect(&mut self, rect: Rect, lut: &[u8; 256]) {
        let Some(clip) = self.clip(rect) else { return };
        for y in clip.y..clip.y + clip.height {
            let start = self.offset(clip.x, y);
            for b in &mut self.pixels[start..start + clip.width as usize * 3] {
                *b = lut[*b as usize];
            }
        }
    }

    /// Serialize to a flat wire-order buffer.
    pub fn to_wire(&self, order: PixelOrder) -> Vec<u8> {
        match order {
            PixelOrder::Rgb => self.pixels.clone(),
            PixelOrder::Bgr => self
                .pixels
                .chunks_exact(3)
                .flat_map(|px| order.swizzle(px))
                .collect(),
        }
    }

    /// Rectangle covering the whole canvas.
    pub fn bounds(&self) -> Rect {
        Rect {
            x: 0,
            y: 0,
            width: self.width,
            height: self.height,
        }
    }

    #[inline]
    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 3
    }

    fn clip(&self, rect: Rect) -> Option<Rect> {
        if rect.x >= self.width || rect.y >= self.height {
            return None;
        }
        let width = rect.width.min(self.width - rect.x);
        let height = rect.height.min(self.height - rect.y);
        if width == 0 || height == 0 {
            return None;
        }
        Some(Rect {
            x: rect.x,
            y: rect.y,
            width,
            height,
        })
    }
}
