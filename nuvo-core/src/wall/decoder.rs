//! Assembled byte stream → canvas.
//!
//! | Format  | Path                                                        |
//! |---------|-------------------------------------------------------------|
//! | RAW888  | full-frame if the length is exactly `w × h × 3`, else block deinterleave |
//! | JPEG    | embedded image; lenient mode falls back to deinterleave when markers are missing |
//! | RGB565  | unsupported, the frame is dropped                           |
//!
//! Lenient mode assumes a JPEG-labelled stream without markers is a
//! mislabelled raw stream. A corrupt JPEG therefore shows up as a
//! garbled canvas rather than a refusal.

use tracing::debug;

use crate::error::NuvoError;
use crate::layout::LayoutResolver;
use crate::registry::ModuleRegistry;
use crate::wall::canvas::{Canvas, PixelOrder};
use crate::wire::FormatType;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Lenient marker check: starts with SOI and contains an EOI.
pub fn has_image_markers(raw: &[u8]) -> bool {
    raw.len() >= 4 && raw.starts_with(&SOI) && find_last_eoi(raw).is_some()
}

/// Strict marker check: starts with SOI and ends with EOI.
pub fn has_exact_image_markers(raw: &[u8]) -> bool {
    raw.len() >= 4 && raw.starts_with(&SOI) && raw.ends_with(&EOI)
}

/// Drop anything after the last EOI marker.
pub fn strip_trailing_padding(raw: &[u8]) -> &[u8] {
    match find_last_eoi(raw) {
        Some(pos) => &raw[..pos + 2],
        None => raw,
    }
}

fn find_last_eoi(raw: &[u8]) -> Option<usize> {
    raw.windows(2).rposition(|w| w == EOI)
}

// ── FrameDecoder ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder {
    strict: bool,
    pixel_order: PixelOrder,
}

impl FrameDecoder {
    pub fn new(strict: bool, pixel_order: PixelOrder) -> Self {
        Self {
            strict,
            pixel_order,
        }
    }

    /// Decode an assembled stream into a canvas of the layout's size.
    pub fn decode(
        &self,
        format: u8,
        raw: &[u8],
        layout: &LayoutResolver,
        registry: &ModuleRegistry,
    ) -> Result<Canvas, NuvoError> {
        match FormatType::try_from(format) {
            Ok(FormatType::Raw888) => self.decode_raw(raw, layout, registry),
            Ok(FormatType::Jpeg) => self.decode_jpeg(raw, layout, registry),
            Ok(FormatType::Rgb565) | Err(_) => Err(NuvoError::UnsupportedFormat(format)),
        }
    }

    fn decode_raw(
        &self,
        raw: &[u8],
        layout: &LayoutResolver,
        registry: &ModuleRegistry,
    ) -> Result<Canvas, NuvoError> {
        let (w, h) = layout.canvas_size();
        if raw.len() == w as usize * h as usize * 3 {
            return self.decode_full_frame(raw, w, h);
        }
        if self.strict {
            let expected = layout.expected_raw_len().ok_or(NuvoError::IrregularLayout)?;
            if raw.len() != expected {
                return Err(NuvoError::SizeMismatch {
                    expected,
                    actual: raw.len(),
                });
            }
        }
        Ok(self.deinterleave(raw, layout, registry))
    }

    fn decode_jpeg(
        &self,
        raw: &[u8],
        layout: &LayoutResolver,
        registry: &ModuleRegistry,
    ) -> Result<Canvas, NuvoError> {
        let (w, h) = layout.canvas_size();
        if self.strict {
            if !has_exact_image_markers(raw) {
                return Err(NuvoError::BadImageMarkers);
            }
            return Ok(fit(&decode_embedded(raw)?, w, h));
        }
        if has_image_markers(raw) {
            let image = decode_embedded(strip_trailing_padding(raw))?;
            return Ok(fit(&image, w, h));
        }
        debug!(len = raw.len(), "JPEG frame without markers, treating as raw blocks");
        Ok(self.deinterleave(raw, layout, registry))
    }

    /// Contiguous row-major raster of exactly `w × h × 3` bytes.
    pub fn decode_full_frame(&self, raw: &[u8], w: u32, h: u32) -> Result<Canvas, NuvoError> {
        Canvas::from_wire(w, h, raw, self.pixel_order)
    }

    /// Walk the stream block by block in walk order.
    ///
    /// Every step consumes one block, owned or not; only owned entries
    /// are drawn. Stops quietly when the stream runs out.
    pub fn deinterleave(
        &self,
        raw: &[u8],
        layout: &LayoutResolver,
        registry: &ModuleRegistry,
    ) -> Canvas {
        let (w, h) = layout.canvas_size();
        let mut canvas = Canvas::new(w, h);
        let bh = layout.block_height();
        let walk = layout.walk(registry);

        let mut offset = 0usize;
        for &(i, row) in &walk.steps {
            let entry = &walk.entries[i];
            let len = layout.block_len(entry);
            let Some(block) = raw.get(offset..offset + len) else {
                break;
            };
            offset += len;
            if !entry.owned {
                continue;
            }
            let (x, y) = layout
                .placement(entry.addr16)
                .unwrap_or((entry.offset_x, entry.offset_y));
            let width = (len / (bh as usize * 3)) as u32;
            canvas.blit_wire(x, y + row * bh, block, width, self.pixel_order);
        }
        canvas
    }
}

/// Decode a JPEG stream to an RGB canvas of the image's own size.
pub fn decode_embedded(raw: &[u8]) -> Result<Canvas, NuvoError> {
    let mut decoder = jpeg_decoder::Decoder::new(raw);
    let pixels = decoder.decode()?;
    let info = decoder
        .info()
        .ok_or_else(|| NuvoError::ImageDecode("missing image header".into()))?;
    let rgb = match info.pixel_format {
        jpeg_decoder::PixelFormat::RGB24 => pixels,
        jpeg_decoder::PixelFormat::L8 => pixels.iter().flat_map(|&l| [l, l, l]).collect(),
        other => {
            return Err(NuvoError::ImageDecode(format!(
                "unsupported pixel format {other:?}"
            )));
        }
    };
    Canvas::from_rgb(info.width as u32, info.height as u32, rgb)
}

/// Place `image` at the origin of a black `w × h` canvas, cropping.
fn fit(image: &Canvas, w: u32, h: u32) -> Canvas {
    if image.width() == w && image.height() == h {
        return image.clone();
    }
    let mut canvas = Canvas::new(w, h);
    canvas.paste(0, 0, image);
    canvas
}

// ── Tests ────────────────────────────────────────────────────────
