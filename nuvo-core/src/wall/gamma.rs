//! Intensity lookup tables applied after decode.
//!
//! A GAMMA body is either a broadcast (`0xFF` followed by a 256-byte
//! table) or a targeted command naming one module with a status code
//! and an optional inline table. Senders disagree on the targeted byte
//! layout, so each known shape is a parse attempt in
//! [`TARGETED_ATTEMPTS`], tried in order. The first one that names an
//! owned module wins.

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::layout::Rect;
use crate::wall::canvas::Canvas;
use crate::wire::{Opcode, PacketHeader};

/// Tag byte preceding a full table.
pub const LUT_TAG: u8 = 0xFF;

// ── GammaLut ─────────────────────────────────────────────────────

/// 256-entry intensity remap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GammaLut(pub [u8; 256]);

impl GammaLut {
    pub fn identity() -> Self {
        let mut table = [0u8; 256];
        for (i, v) in table.iter_mut().enumerate() {
            *v = i as u8;
        }
        Self(table)
    }

    /// Read a table from the first 256 bytes of `data`.
    pub fn from_slice(data: &[u8]) -> Option<Self> {
        let table: [u8; 256] = data.get(..256)?.try_into().ok()?;
        Some(Self(table))
    }

    pub fn is_identity(&self) -> bool {
        self.0.iter().enumerate().all(|(i, &v)| v == i as u8)
    }

    pub fn as_bytes(&self) -> &[u8; 256] {
        &self.0
    }
}

impl Default for GammaLut {
    fn default() -> Self {
        Self::identity()
    }
}

/// Broadcast GAMMA datagram carrying `lut` for every module.
pub fn encode_gamma_broadcast(lut: &GammaLut) -> Bytes {
    let mut buf = BytesMut::with_capacity(PacketHeader::SIZE + 1 + 256);
    buf.put_slice(&PacketHeader::new(Opcode::Gamma).encode());
    buf.put_u8(LUT_TAG);
    buf.put_slice(lut.as_bytes());
    buf.freeze()
}

// ── GammaCommand ─────────────────────────────────────────────────

/// A decoded GAMMA body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GammaCommand {
    /// Replace the global table.
    Broadcast(GammaLut),
    /// Status code for one module, optionally with its own table.
    Targeted {
        addr16: u16,
        code: u8,
        lut: Option<GammaLut>,
    },
}

/// Inline table tagged at `at`: `0xFF` then 256 bytes.
fn inline_lut(body: &[u8], at: usize) -> Option<GammaLut> {
    if body.len() >= at + 1 + 256 && body[at] == LUT_TAG {
        GammaLut::from_slice(&body[at + 1..])
    } else {
        None
    }
}

/// One candidate interpretation of a targeted body.
type ParseAttempt = fn(&[u8]) -> Option<(u16, u8, Option<GammaLut>)>;

/// `addr16 BE · code [· 0xFF · LUT]`
fn addr16_code(body: &[u8]) -> Option<(u16, u8, Option<GammaLut>)> {
    let b = body.get(..3)?;
    Some((u16::from_be_bytes([b[0], b[1]]), b[2], inline_lut(body, 3)))
}

/// `addr32 BE · code [· 0xFF · LUT]`, low 16 bits address the module.
fn addr32_code(body: &[u8]) -> Option<(u16, u8, Option<GammaLut>)> {
    let b = body.get(..5)?;
    let addr32 = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
    Some((addr32 as u16, b[4], inline_lut(body, 5)))
}

/// `code · addr16 BE [· 0xFF · LUT]`
fn code_addr16(body: &[u8]) -> Option<(u16, u8, Option<GammaLut>)> {
    let b = body.get(..3)?;
    Some((u16::from_be_bytes([b[1], b[2]]), b[0], inline_lut(body, 3)))
}

/// Targeted shapes in priority order.
pub const TARGETED_ATTEMPTS: &[(&str, ParseAttempt)] = &[
    ("addr16-code", addr16_code),
    ("addr32-code", addr32_code),
    ("code-addr16", code_addr16),
];

/// Interpret a GAMMA body. `is_known` decides whether an address names
/// an owned module.
pub fn parse_gamma(body: &[u8], is_known: impl Fn(u16) -> bool) -> Option<GammaCommand> {
    if body.len() > 256 && body[0] == LUT_TAG {
        return GammaLut::from_slice(&body[1..]).map(GammaCommand::Broadcast);
    }
    TARGETED_ATTEMPTS.iter().find_map(|(name, attempt)| {
        let (addr16, code, lut) = attempt(body)?;
        if !is_known(addr16) {
            return None;
        }
        debug!(shape = name, addr16, code, "GAMMA targeted command");
        Some(GammaCommand::Targeted { addr16, code, lut })
    })
}

// ── GammaStore ───────────────────────────────────────────────────

/// Global table plus per-module overrides.
#[derive(Debug, Clone, Default)]
pub struct GammaStore {
    global: GammaLut,
    overrides: HashMap<u16, GammaLut>,
}

impl GammaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to identity everywhere.
    pub fn set_identity(&mut self) {
        self.global = GammaLut::identity();
        self.overrides.clear();
    }

    pub fn global(&self) -> &GammaLut {
        &self.global
    }

    pub fn override_for(&self, addr16: u16) -> Option<&GammaLut> {
        self.overrides.get(&addr16)
    }

    /// Parse and apply a GAMMA body. Returns the command when it was
    /// understood; the installed table, if any, is reported for dumps.
    pub fn handle_command(
        &mut self,
        body: &[u8],
        is_known: impl Fn(u16) -> bool,
    ) -> Option<GammaCommand> {
        let Some(cmd) = parse_gamma(body, is_known) else {
            debug!(
                len = body.len(),
                head = ?&body[..body.len().min(16)],
                "GAMMA payload not recognised"
            );
            return None;
        };
        match &cmd {
            GammaCommand::Broadcast(lut) if lut.is_identity() => self.set_identity(),
            GammaCommand::Broadcast(lut) => {
                self.global = lut.clone();
                self.overrides.clear();
            }
            GammaCommand::Targeted {
                addr16,
                lut: Some(lut),
                ..
            } => {
                self.overrides.insert(*addr16, lut.clone());
            }
            GammaCommand::Targeted { .. } => {}
        }
        Some(cmd)
    }

    /// Remap a decoded canvas. Module rectangles with an override use
    /// their own table; everything else uses the global one.
    pub fn apply(&self, canvas: &mut Canvas, rects: &[(u16, Rect)]) {
        let overridden: Vec<(Rect, &GammaLut)> = rects
            .iter()
            .filter_map(|(addr, rect)| self.overrides.get(addr).map(|lut| (*rect, lut)))
            .collect();

        if overridden.is_empty() {
            if !self.global.is_identity() {
                canvas.map_rect(canvas.bounds(), &self.global.0);
            }
            return;
        }

        let original = canvas.clone();
        if !self.global.is_identity() {
            canvas.map_rect(canvas.bounds(), &self.global.0);
        }
        for (rect, lut) in overridden {
            let mut patch = original.clone();
            patch.map_rect(rect, &lut.0);
            copy_rect(canvas, &patch, rect);
        }
    }
}

fn copy_rect(dst: &mut Canvas, src: &Canvas, rect: Rect) {
    for y in rect.y..rect.y.saturating_add(rect.height).min(dst.height()) {
        for x in rect.x..rect.x.saturating_add(rect.width).min(dst.width()) {
            if let Some(px) = src.pixel(x, y) {
                dst.set_pixel(x, y, px);
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::body;

    fn inverted() -> GammaLut {
        let mut t = [0u8; 256];
        for (i, v) in t.iter_mut().enumerate() {
            *v = 255 - i as u8;
        }
        GammaLut(t)
    }

    fn known(addr: u16) -> bool {
        addr == 0x0001 || addr == 0x0002
    }

    #[test]
    fn broadcast_replaces_global() {
        let mut body = vec![LUT_TAG];
        body.extend_from_slice(inverted().as_bytes());
        let mut store = GammaStore::new();
        let cmd = store.handle_command(&body, known).unwrap();
        assert!(matches!(cmd, GammaCommand::Broadcast(_)));
        assert_eq!(store.global(), &inverted());
    }

    #[test]
    fn identity_packet_parses_back() {
        let pkt = encode_gamma_broadcast(&GammaLut::identity());
        assert_eq!(pkt.len(), 260);
        assert_eq!(&pkt[..4], &[0x24, 0x24, 127, 0xFF]);
        assert_eq!(
            parse_gamma(body(&pkt), known),
            Some(GammaCommand::Broadcast(GammaLut::identity()))
        );
    }

    #[test]
    fn identity_broadcast_resets_everything() {
        let mut store = GammaStore::new();
        let mut body = vec![0x00, 0x01, 0x01, LUT_TAG];
        body.extend_from_slice(inverted().as_bytes());
        store.handle_command(&body, known).unwrap();
        let mut bcast = vec![LUT_TAG];
        bcast.extend_from_slice(inverted().as_bytes());
        store.handle_command(&bcast, known).unwrap();
        store.handle_command(&body, known).unwrap();
        assert_eq!(store.global(), &inverted());
        assert!(store.override_for(1).is_some());

        // what the transmitter sends during layout setup
        let pkt = encode_gamma_broadcast(&GammaLut::identity());
        store.handle_command(crate::wire::body(&pkt), known).unwrap();
        assert!(store.global().is_identity());
        assert_eq!(store.override_for(1), None);
    }

    #[test]
    fn short_broadcast_is_not_a_table() {
        let body = vec![LUT_TAG; 200];
        assert_eq!(parse_gamma(&body, known), None);
    }

    #[test]
    fn targeted_shapes_in_priority_order() {
        // addr16 · code
        assert_eq!(
            parse_gamma(&[0x00, 0x01, 0x10], known),
            Some(GammaCommand::Targeted {
                addr16: 1,
                code: 0x10,
                lut: None
            })
        );
        // addr32 · code: first three bytes do not name a module
        assert_eq!(
            parse_gamma(&[0x10, 0xB0, 0x00, 0x02, 0x21], known),
            Some(GammaCommand::Targeted {
                addr16: 2,
                code: 0x21,
                lut: None
            })
        );
        // code · addr16
        assert_eq!(
            parse_gamma(&[0x55, 0x00, 0x02], known),
            Some(GammaCommand::Targeted {
                addr16: 2,
                code: 0x55,
                lut: None
            })
        );
        assert_eq!(parse_gamma(&[0x55, 0x66, 0x77], known), None);
    }

    #[test]
    fn targeted_inline_lut_overrides_one_module() {
        let mut body = vec![0x00, 0x02, 0x01, LUT_TAG];
        body.extend_from_slice(inverted().as_bytes());
        let mut store = GammaStore::new();
        store.handle_command(&body, known).unwrap();
        assert_eq!(store.override_for(2), Some(&inverted()));
        assert!(store.global().is_identity());

        let mut canvas = Canvas::filled(4, 1, [10, 10, 10]);
        let rects = [
            (1, Rect { x: 0, y: 0, width: 2, height: 1 }),
            (2, Rect { x: 2, y: 0, width: 2, height: 1 }),
        ];
        store.apply(&mut canvas, &rects);
        assert_eq!(canvas.pixel(0, 0), Some([10, 10, 10]));
        assert_eq!(canvas.pixel(3, 0), Some([245, 245, 245]));

        // a broadcast drops overrides
        let mut bcast = vec![LUT_TAG];
        bcast.extend_from_slice(GammaLut::identity().as_bytes());
        store.handle_command(&bcast, known).unwrap();
        assert_eq!(store.override_for(2), None);
    }

    #[test]
    fn unknown_target_changes_nothing() {
        let mut store = GammaStore::new();
        assert!(store.handle_command(&[0x09, 0x09, 0x09], known).is_none());
        assert!(store.handle_command(&[], known).is_none());
        assert!(store.global().is_identity());
    }
}
