//! Raster → FRAME fragments, plus layout declaration packets.
//!
//! Every fragment but the last carries exactly 1440 bytes with size
//! code 45. The last one carries its real length in 32-byte units and
//! is zero-padded up to that unit boundary. There is no retransmission:
//! a lost fragment is superseded by the next frame, and a lost commit
//! is covered by the redundant SYNCs of the chosen [`SyncProfile`].

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::NuvoError;
use crate::layout::{ConfigDeclaration, ConfigEntry};
use crate::wall::canvas::{Canvas, PixelOrder};
use crate::wall::gamma::{GammaLut, encode_gamma_broadcast};
use crate::wire::{
    FRAME_CHUNK, FormatType, FragmentHeader, MAX_SIZE_CODE, encode_fragment, encode_frame_finish,
    encode_state, encode_sync, len_to_size_code, roundup32,
};

// ── SyncProfile ──────────────────────────────────────────────────

/// Commit redundancy and pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncProfile {
    /// Slow and safe, for stills.
    Still,
    /// Three SYNCs with almost no gap, for video.
    Video3Fast,
    /// One SYNC, no delays.
    #[default]
    Video1,
}

/// Delays and frame-id offsets of a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTiming {
    /// Sleep before the first SYNC.
    pub pre: Duration,
    /// Sleep between consecutive SYNCs.
    pub between: Duration,
    /// Frame-id offsets, one SYNC each.
    pub offsets: &'static [i8],
}

impl SyncProfile {
    /// Look a profile up by name; unknown names fall back to `video1`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "still" => SyncProfile::Still,
            "video3fast" => SyncProfile::Video3Fast,
            _ => SyncProfile::Video1,
        }
    }

    pub fn timing(self) -> SyncTiming {
        match self {
            SyncProfile::Still => SyncTiming {
                pre: Duration::from_millis(1),
                between: Duration::from_millis(40),
                offsets: &[-1, 0, 1],
            },
            SyncProfile::Video3Fast => SyncTiming {
                pre: Duration::from_millis(10),
                between: Duration::from_micros(200),
                offsets: &[-1, 0, 1],
            },
            SyncProfile::Video1 => SyncTiming {
                pre: Duration::ZERO,
                between: Duration::ZERO,
                offsets: &[0],
            },
        }
    }
}

/// SYNC datagrams for `frame_id` under `profile`, in send order.
pub fn sync_packets(frame_id: u8, profile: SyncProfile) -> Vec<[u8; 4]> {
    profile
        .timing()
        .offsets
        .iter()
        .map(|&off| encode_sync(frame_id.wrapping_add_signed(off)))
        .collect()
}

// ── Layout plan ──────────────────────────────────────────────────

/// Whether the stream is the whole canvas or tile-by-tile blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    #[default]
    FullFrame,
    /// Tile by tile, one block-height strip at a time.
    ///
    /// When the tiles exactly cover the declared screen, the stream is
    /// `w × h × 3` bytes and looks like a full frame on the wire.
    /// Receivers take the full-frame path for it, so use `Blocks` only
    /// for layouts with gaps.
    Blocks,
}

/// One module rectangle in a layout, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    pub addr16: u16,
    pub width: u32,
    pub height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
}

/// Input to `set_layout`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutPlan {
    pub grid_cols: u32,
    pub grid_rows: u32,
    pub panel_width: u32,
    pub panel_height: u32,
    pub tiles: Vec<Tile>,
}

impl LayoutPlan {
    /// A plain `cols × rows` grid with sequential addresses from `addr_start`.
    pub fn grid(cols: u32, rows: u32, panel_width: u32, panel_height: u32, addr_start: u16) -> Self {
        let mut tiles = Vec::with_capacity((cols * rows) as usize);
        for row in 0..rows {
            for col in 0..cols {
                tiles.push(Tile {
                    addr16: addr_start.wrapping_add(tiles.len() as u16),
                    width: panel_width,
                    height: panel_height,
                    offset_x: col * panel_width,
                    offset_y: row * panel_height,
                });
            }
        }
        Self {
            grid_cols: cols,
            grid_rows: rows,
            panel_width,
            panel_height,
            tiles,
        }
    }
}

// ── TransmitterOptions ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmitterOptions {
    pub pixel_order: PixelOrder,
    pub transfer: TransferMode,
    /// Rows per block in [`TransferMode::Blocks`].
    pub block_height: u32,
    /// Send FRAME_FINISH after the last fragment.
    pub send_finish: bool,
}

impl Default for TransmitterOptions {
    fn default() -> Self {
        Self {
            pixel_order: PixelOrder::Bgr,
            transfer: TransferMode::FullFrame,
            block_height: 32,
            send_finish: true,
        }
    }
}

// ── EncodedFrame ─────────────────────────────────────────────────

/// All datagrams of one frame except the SYNCs.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub frame_id: u8,
    pub fragments: Vec<Bytes>,
    pub finish: Option<Bytes>,
    /// Serialized raster length before padding.
    pub stream_len: usize,
}

// ── FrameTransmitter ─────────────────────────────────────────────

/// Encoder state: frame id counter, screen size and declared tiles.
#[derive(Debug, Clone)]
pub struct FrameTransmitter {
    options: TransmitterOptions,
    frame_id: u8,
    screen_width: u32,
    screen_height: u32,
    tiles: Vec<Tile>,
}

impl FrameTransmitter {
    pub fn new(options: TransmitterOptions, screen_width: u32, screen_height: u32) -> Self {
        Self {
            options: TransmitterOptions {
                block_height: options.block_height.max(1),
                ..options
            },
            frame_id: 0,
            screen_width,
            screen_height,
            tiles: Vec::new(),
        }
    }

    pub fn options(&self) -> &TransmitterOptions {
        &self.options
    }

    pub fn screen_size(&self) -> (u32, u32) {
        (self.screen_width, self.screen_height)
    }

    /// Tiles in declaration order (sorted by offset y, then x).
    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    /// Adopt a layout and build the packets that declare it: CONFIG under
    /// both sequence tags, an identity gamma table and STATE(on, 100).
    pub fn set_layout(&mut self, plan: &LayoutPlan) -> Result<Vec<Bytes>, NuvoError> {
        if plan.tiles.is_empty() {
            return Err(NuvoError::NoLayout);
        }
        if plan.tiles.len() > ConfigDeclaration::MAX_ENTRIES {
            return Err(NuvoError::ProtocolViolation("more than 255 tiles in one layout"));
        }
        let mut tiles = plan.tiles.clone();
        tiles.sort_by_key(|t| (t.offset_y, t.offset_x));

        let total_width = plan.grid_cols * plan.panel_width;
        let total_height = plan.grid_rows * plan.panel_height;
        let entries: Vec<ConfigEntry> = tiles
            .iter()
            .enumerate()
            .map(|(i, t)| ConfigEntry {
                addr16: t.addr16,
                block_index: (i + 1) as u8,
                width: t.width,
                height: t.height,
                offset_x: t.offset_x,
                offset_y: t.offset_y,
                owned: false,
            })
            .collect();

        let mut packets: Vec<Bytes> = ConfigDeclaration::SEQUENCE_TAGS
            .iter()
            .map(|&tag| {
                ConfigDeclaration {
                    color_type: ConfigDeclaration::COLOR_TYPE,
                    sequence_tag: tag,
                    total_width,
                    total_height,
                    entries: entries.clone(),
                }
                .encode()
            })
            .collect::<Result<_, _>>()?;
        packets.push(encode_gamma_broadcast(&GammaLut::identity()));
        packets.push(Bytes::copy_from_slice(&encode_state(true, 100)));

        self.screen_width = total_width;
        self.screen_height = total_height;
        self.tiles = tiles;
        Ok(packets)
    }

    /// Advance the 8-bit frame id counter.
    pub fn next_frame_id(&mut self) -> u8 {
        self.frame_id = self.frame_id.wrapping_add(1);
        self.frame_id
    }

    /// Flatten a raster into the wire stream for the configured
    /// transfer mode.
    pub fn serialize_raster(&self, raster: &Canvas) -> Result<Vec<u8>, NuvoError> {
        if (raster.width(), raster.height()) != self.screen_size() {
            return Err(NuvoError::SizeMismatch {
                expected: self.screen_width as usize * self.screen_height as usize * 3,
                actual: raster.as_bytes().len(),
            });
        }
        match self.options.transfer {
            TransferMode::FullFrame => Ok(raster.to_wire(self.options.pixel_order)),
            TransferMode::Blocks => {
                if self.tiles.is_empty() {
                    return Err(NuvoError::NoLayout);
                }
                Ok(self.serialize_blocks(raster))
            }
        }
    }

    /// Tile by tile, block strip by block strip, rows clipped to the raster.
    fn serialize_blocks(&self, raster: &Canvas) -> Vec<u8> {
        let order = self.options.pixel_order;
        let bh = self.options.block_height;
        let mut out = Vec::new();
        for t in &self.tiles {
            let x1 = (t.offset_x + t.width).min(raster.width());
            let y1 = (t.offset_y + t.height).min(raster.height());
            for by in (t.offset_y..y1).step_by(bh as usize) {
                for y in by..(by + bh).min(y1) {
                    for x in t.offset_x..x1 {
                        if let Some(px) = raster.pixel(x, y) {
                            out.extend_from_slice(&order.swizzle(&px));
                        }
                    }
                }
            }
        }
        out
    }

    /// Split a stream into FRAME datagrams.
    pub fn fragment(&self, frame_id: u8, format: FormatType, stream: &[u8]) -> Result<Vec<Bytes>, NuvoError> {
        if stream.is_empty() {
            return Err(NuvoError::ProtocolViolation("empty frame"));
        }
        let total = stream.len().div_ceil(FRAME_CHUNK);
        if total > u16::MAX as usize {
            return Err(NuvoError::PayloadTooLarge {
                size: stream.len(),
                max: u16::MAX as usize * FRAME_CHUNK,
            });
        }
        let total = total as u16;
        let mut packets = Vec::with_capacity(total as usize);
        for (idx, part) in stream.chunks(FRAME_CHUNK).enumerate() {
            let last = idx + 1 == total as usize;
            let size_code = if last { len_to_size_code(part.len()) } else { MAX_SIZE_CODE };
            let header = FragmentHeader {
                frame_id,
                format: format as u8,
                index: idx as u16,
                total,
                size_code,
            };
            if last && part.len() < FRAME_CHUNK {
                let mut padded = BytesMut::zeroed(roundup32(part.len()));
                padded[..part.len()].copy_from_slice(part);
                packets.push(encode_fragment(&header, &padded));
            } else {
                packets.push(encode_fragment(&header, part));
            }
        }
        Ok(packets)
    }

    /// Allocate a frame id and encode `raster` into datagrams.
    pub fn encode_raster(&mut self, raster: &Canvas) -> Result<EncodedFrame, NuvoError> {
        let stream = self.serialize_raster(raster)?;
        let frame_id = self.next_frame_id();
        let fragments = self.fragment(frame_id, FormatType::Raw888, &stream)?;
        debug!(
            fid = frame_id,
            fragments = fragments.len(),
            bytes = stream.len(),
            "frame encoded"
        );
        Ok(EncodedFrame {
            frame_id,
            fragments,
            finish: self
                .options
                .send_finish
                .then(|| Bytes::copy_from_slice(&encode_frame_finish(frame_id))),
            stream_len: stream.len(),
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────
