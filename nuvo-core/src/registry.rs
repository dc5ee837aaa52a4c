//! Owned panel modules and REGISTER announcements.
//!
//! A node owns a `grid_cols × grid_rows` block of identical panels.
//! Panel `i` (row-major) gets the 16-bit address `addr_start + i`; the
//! 32-bit address keeps the high half of `addr_base` and carries the
//! 16-bit address in its low half.
//!
//! ## REGISTER packet (13 bytes)
//!
//! ```text
//! header:   [u8; 3]  0x24 0x24 15
//! addr32:   u32 BE
//! hw_tag:   [u8; 4]  ASCII, NUL padded
//! width:    u8       pixels / 16
//! height:   u8       pixels / 16
//! ```

use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::NuvoError;
use crate::wire::{Opcode, PacketHeader};

// ── WallGeometry ─────────────────────────────────────────────────

/// Physical arrangement of the modules a node owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WallGeometry {
    pub grid_cols: u32,
    pub grid_rows: u32,
    pub panel_width: u32,
    pub panel_height: u32,
    /// Only the high 16 bits are used.
    pub addr_base: u32,
    /// 16-bit address of the first (top-left) panel.
    pub addr_start: u16,
    /// Hardware tag announced in REGISTER (at most 4 ASCII bytes).
    pub hw_tag: String,
}

impl Default for WallGeometry {
    fn default() -> Self {
        Self {
            grid_cols: 1,
            grid_rows: 1,
            panel_width: 128,
            panel_height: 128,
            addr_base: 0x10B0_0000,
            addr_start: 0x0001,
            hw_tag: "P4T".into(),
        }
    }
}

impl WallGeometry {
    /// Width of the owned grid in pixels.
    pub fn grid_width(&self) -> u32 {
        self.grid_cols * self.panel_width
    }

    /// Height of the owned grid in pixels.
    pub fn grid_height(&self) -> u32 {
        self.grid_rows * self.panel_height
    }

    pub fn module_count(&self) -> usize {
        (self.grid_cols * self.grid_rows) as usize
    }
}

// ── ModuleDescriptor ─────────────────────────────────────────────

/// One physical panel, owned or discovered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub addr32: u32,
    pub addr16: u16,
    pub hw_tag: String,
    pub width: u32,
    pub height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
    /// Block index from the last CONFIG naming this module.
    pub block_index: u8,
    /// How many CONFIG declarations have named this module.
    pub config_seen: u32,
}

impl ModuleDescriptor {
    /// Serialize a REGISTER announcement for this module.
    pub fn encode_register(&self) -> [u8; 13] {
        let mut buf = [0u8; 13];
        buf[..3].copy_from_slice(&PacketHeader::new(Opcode::Register).encode());
        buf[3..7].copy_from_slice(&self.addr32.to_be_bytes());
        for (dst, src) in buf[7..11].iter_mut().zip(self.hw_tag.bytes().filter(u8::is_ascii)) {
            *dst = src;
        }
        buf[11] = (self.width / 16) as u8;
        buf[12] = (self.height / 16) as u8;
        buf
    }
}

/// Parse a REGISTER announcement.
///
/// Only the address is mandatory; the tag and size are filled in when
/// the datagram is long enough to carry them.
pub fn decode_register(data: &[u8]) -> Result<ModuleDescriptor, NuvoError> {
    let header = PacketHeader::decode(data)?;
    if header.opcode != Opcode::Register as u8 {
        return Err(NuvoError::ProtocolViolation("not a REGISTER packet"));
    }
    if data.len() < 7 {
        return Err(NuvoError::truncated(7, data.len()));
    }
    let addr32 = u32::from_be_bytes([data[3], data[4], data[5], data[6]]);
    let hw_tag = data
        .get(7..11)
        .map(|tag| {
            tag.iter()
                .take_while(|&&b| b != 0)
                .filter(|b| b.is_ascii())
                .map(|&b| b as char)
                .collect()
        })
        .unwrap_or_default();
    let (width, height) = match data.get(11..13) {
        Some(size) => (size[0] as u32 * 16, size[1] as u32 * 16),
        None => (0, 0),
    };
    Ok(ModuleDescriptor {
        addr32,
        addr16: addr32 as u16,
        hw_tag,
        width,
        height,
        offset_x: 0,
        offset_y: 0,
        block_index: 0,
        config_seen: 0,
    })
}

// ── ModuleRegistry ───────────────────────────────────────────────

/// The modules this node owns, with lookup by 16-bit address.
#[derive(Debug, Clone)]
pub struct ModuleRegistry {
    modules: Vec<ModuleDescriptor>,
    by_addr16: HashMap<u16, usize>,
}

impl ModuleRegistry {
    /// Create one module per grid cell, row-major.
    pub fn from_geometry(geometry: &WallGeometry) -> Self {
        let high = geometry.addr_base & 0xFFFF_0000;
        let mut modules = Vec::with_capacity(geometry.module_count());
        for row in 0..geometry.grid_rows {
            for col in 0..geometry.grid_cols {
                let idx = modules.len();
                let addr16 = geometry.addr_start.wrapping_add(idx as u16);
                modules.push(ModuleDescriptor {
                    addr32: high | addr16 as u32,
                    addr16,
                    hw_tag: geometry.hw_tag.chars().take(4).collect(),
                    width: geometry.panel_width,
                    height: geometry.panel_height,
                    offset_x: col * geometry.panel_width,
                    offset_y: row * geometry.panel_height,
                    block_index: idx as u8,
                    config_seen: 0,
                });
            }
        }
        let by_addr16 = modules
            .iter()
            .enumerate()
            .map(|(i, m)| (m.addr16, i))
            .collect();
        Self { modules, by_addr16 }
    }

    pub fn get(&self, addr16: u16) -> Option<&ModuleDescriptor> {
        self.by_addr16.get(&addr16).map(|&i| &self.modules[i])
    }

    pub fn get_mut(&mut self, addr16: u16) -> Option<&mut ModuleDescriptor> {
        self.by_addr16
            .get(&addr16)
            .copied()
            .map(move |i| &mut self.modules[i])
    }

    pub fn contains(&self, addr16: u16) -> bool {
        self.by_addr16.contains_key(&addr16)
    }

    /// Owned modules in grid order.
    pub fn modules(&self) -> &[ModuleDescriptor] {
        &self.modules
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// One REGISTER datagram per owned module.
    pub fn register_burst(&self) -> Vec<Bytes> {
        self.modules
            .iter()
            .map(|m| Bytes::copy_from_slice(&m.encode_register()))
            .collect()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry_2x2() -> WallGeometry {
        WallGeometry {
            grid_cols: 2,
            grid_rows: 2,
            ..WallGeometry::default()
        }
    }

    #[test]
    fn addresses_are_sequential_row_major() {
        let reg = ModuleRegistry::from_geometry(&geometry_2x2());
        let addrs: Vec<u16> = reg.modules().iter().map(|m| m.addr16).collect();
        assert_eq!(addrs, vec![1, 2, 3, 4]);
        assert_eq!(reg.modules()[3].addr32, 0x10B0_0004);
        assert_eq!((reg.modules()[1].offset_x, reg.modules()[1].offset_y), (128, 0));
        assert_eq!((reg.modules()[2].offset_x, reg.modules()[2].offset_y), (0, 128));
    }

    #[test]
    fn base_low_half_is_ignored() {
        let geo = WallGeometry {
            addr_base: 0x1234_ABCD,
            addr_start: 0x0100,
            ..WallGeometry::default()
        };
        let reg = ModuleRegistry::from_geometry(&geo);
        assert_eq!(reg.modules()[0].addr32, 0x1234_0100);
        assert!(reg.contains(0x0100));
        assert!(!reg.contains(0x0101));
    }

    #[test]
    fn register_roundtrip() {
        let reg = ModuleRegistry::from_geometry(&geometry_2x2());
        let burst = reg.register_burst();
        assert_eq!(burst.len(), 4);
        assert_eq!(burst[0].len(), 13);
        assert_eq!(&burst[0][..3], &[0x24, 0x24, 15]);
        assert_eq!(&burst[0][7..11], b"P4T\0");

        let parsed = decode_register(&burst[2]).unwrap();
        assert_eq!(parsed.addr32, 0x10B0_0003);
        assert_eq!(parsed.addr16, 3);
        assert_eq!(parsed.hw_tag, "P4T");
        assert_eq!((parsed.width, parsed.height), (128, 128));
    }

    #[test]
    fn short_register_keeps_address() {
        let pkt = [0x24, 0x24, 15, 0x10, 0xB0, 0x00, 0x07];
        let parsed = decode_register(&pkt).unwrap();
        assert_eq!(parsed.addr16, 7);
        assert!(parsed.hw_tag.is_empty());
        assert_eq!(parsed.width, 0);

        assert!(decode_register(&[0x24, 0x24, 15, 0x10]).is_err());
        assert!(decode_register(&[0x24, 0x24, 20, 0, 0, 0, 1]).is_err());
    }

    #[test]
    fn descriptor_serializes_to_json() {
        let reg = ModuleRegistry::from_geometry(&WallGeometry::default());
        let json = serde_json::to_string(&reg.modules()[0]).unwrap();
        assert!(json.contains("\"addr16\":1"));
    }
}
