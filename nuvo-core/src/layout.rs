//! CONFIG declarations, walk ordering and canvas placement.
//!
//! A CONFIG lists every module on the shared bus, not only the ones
//! this node owns. The full declaration is kept as the block walk so
//! that byte consumption during deinterleave stays aligned with the
//! sender; placement coordinates are produced only for owned modules.
//!
//! ## CONFIG packet (8 byte header + 7 bytes per entry)
//!
//! ```text
//! header:       [u8; 3]  0x24 0x24 120
//! color_type:   u8       always 2
//! sequence_tag: u8       0 or 32, the same table is sent under both
//! total_w:      u8       pixels / 16
//! total_h:      u8       pixels / 16
//! count:        u8
//! entry:        addr16 BE (2) · block# (1) · w/16 · h/16 · offx/16 · offy/16
//! ```

use std::collections::{HashMap, HashSet};

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::NuvoError;
use crate::registry::{ModuleDescriptor, ModuleRegistry, WallGeometry};
use crate::wire::{Opcode, PacketHeader};

// ── Modes ────────────────────────────────────────────────────────

/// Sequence in which entries are visited by the block walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderMode {
    /// Ascending 16-bit address.
    Mac16,
    /// Ascending declared block index.
    NBlock,
    /// Ascending (offset y, offset x).
    Grid,
    /// Declaration order.
    #[default]
    Config,
}

/// Rule for an owned module's destination on the local canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacementMode {
    /// Declared offsets, verbatim.
    #[default]
    Layout,
    /// Local row-major tiling over the node's own grid.
    Id,
}

/// How block rows of consecutive entries are interleaved in the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interleave {
    /// Every block row of entry 0, then entry 1, ...
    #[default]
    Panel,
    /// Block row 0 of every entry, then block row 1, ...
    Row,
}

// ── ConfigEntry ──────────────────────────────────────────────────

/// One row of a CONFIG declaration, sizes in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub addr16: u16,
    pub block_index: u8,
    pub width: u32,
    pub height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
    /// Set when the address belongs to this node.
    pub owned: bool,
}

impl From<&ModuleDescriptor> for ConfigEntry {
    fn from(m: &ModuleDescriptor) -> Self {
        Self {
            addr16: m.addr16,
            block_index: m.block_index,
            width: m.width,
            height: m.height,
            offset_x: m.offset_x,
            offset_y: m.offset_y,
            owned: true,
        }
    }
}

// ── ConfigDeclaration ────────────────────────────────────────────

/// A decoded CONFIG packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDeclaration {
    pub color_type: u8,
    pub sequence_tag: u8,
    /// Declared wall width in pixels; 0 when undeclared.
    pub total_width: u32,
    /// Declared wall height in pixels; 0 when undeclared.
    pub total_height: u32,
    pub entries: Vec<ConfigEntry>,
}

impl ConfigDeclaration {
    pub const HEADER_SIZE: usize = 8;
    pub const ENTRY_SIZE: usize = 7;
    pub const COLOR_TYPE: u8 = 2;
    /// Tags under which the same table is sent twice.
    pub const SEQUENCE_TAGS: [u8; 2] = [0, 32];
    /// The count field is one byte.
    pub const MAX_ENTRIES: usize = 255;

    /// Parse a CONFIG datagram.
    ///
    /// Parsing stops at the first entry that does not fit entirely.
    /// A repeated address keeps its first occurrence.
    pub fn decode(data: &[u8]) -> Result<Self, NuvoError> {
        if data.len() < Self::HEADER_SIZE {
            return Err(NuvoError::truncated(Self::HEADER_SIZE, data.len()));
        }
        let count = data[7] as usize;
        let mut entries = Vec::with_capacity(count);
        let mut seen = HashSet::with_capacity(count);
        for raw in data[Self::HEADER_SIZE..]
            .chunks_exact(Self::ENTRY_SIZE)
            .take(count)
        {
            let addr16 = u16::from_be_bytes([raw[0], raw[1]]);
            if !seen.insert(addr16) {
                debug!(addr16, "CONFIG repeats address, keeping first entry");
                continue;
            }
            entries.push(ConfigEntry {
                addr16,
                block_index: raw[2],
                width: raw[3] as u32 * 16,
                height: raw[4] as u32 * 16,
                offset_x: raw[5] as u32 * 16,
                offset_y: raw[6] as u32 * 16,
                owned: false,
            });
        }
        Ok(Self {
            color_type: data[3],
            sequence_tag: data[4],
            total_width: data[5] as u32 * 16,
            total_height: data[6] as u32 * 16,
            entries,
        })
    }

    /// Serialize to a CONFIG datagram. Fails when the entries do not
    /// fit the one-byte count.
    pub fn encode(&self) -> Result<Bytes, NuvoError> {
        if self.entries.len() > Self::MAX_ENTRIES {
            return Err(NuvoError::ProtocolViolation("more than 255 CONFIG entries"));
        }
        let mut buf =
            BytesMut::with_capacity(Self::HEADER_SIZE + self.entries.len() * Self::ENTRY_SIZE);
        buf.put_slice(&PacketHeader::new(Opcode::Config).encode());
        buf.put_u8(self.color_type);
        buf.put_u8(self.sequence_tag);
        buf.put_u8((self.total_width / 16) as u8);
        buf.put_u8((self.total_height / 16) as u8);
        buf.put_u8(self.entries.len() as u8);
        for e in &self.entries {
            buf.put_u16(e.addr16);
            buf.put_u8(e.block_index);
            buf.put_u8((e.width / 16) as u8);
            buf.put_u8((e.height / 16) as u8);
            buf.put_u8((e.offset_x / 16) as u8);
            buf.put_u8((e.offset_y / 16) as u8);
        }
        Ok(buf.freeze())
    }

    /// Digest of a CONFIG datagram with the sequence tag masked out,
    /// so both copies of one declaration hash equal.
    pub fn digest(data: &[u8]) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&data[..data.len().min(4)]);
        if data.len() > 5 {
            hasher.update(&data[5..]);
        }
        hasher.finalize()
    }
}

// ── CrossCheck ───────────────────────────────────────────────────

/// Tracks the two redundant copies of a declaration. Once both copies
/// have matched, the check stays satisfied.
#[derive(Debug, Clone, Default)]
struct CrossCheck {
    primary: Option<blake3::Hash>,
    secondary: Option<blake3::Hash>,
    confirmed: bool,
}

impl CrossCheck {
    fn record(&mut self, tag: u8, digest: blake3::Hash) -> bool {
        match tag {
            0 => self.primary = Some(digest),
            32 => self.secondary = Some(digest),
            _ => return self.confirmed,
        }
        if let (Some(a), Some(b)) = (self.primary, self.secondary) {
            if a == b && !self.confirmed {
                info!("CONFIG cross-check confirmed");
                self.confirmed = true;
            }
        }
        self.confirmed
    }
}

// ── Rect / BlockWalk ─────────────────────────────────────────────

/// Axis-aligned rectangle on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Entries in walk order plus the `(entry index, block row)` sequence
/// the raw stream is consumed in.
#[derive(Debug, Clone)]
pub struct BlockWalk {
    pub entries: Vec<ConfigEntry>,
    pub steps: Vec<(usize, u32)>,
}

// ── LayoutOptions ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutOptions {
    pub order: OrderMode,
    pub placement: PlacementMode,
    pub interleave: Interleave,
    /// Rows per block in the raw stream.
    pub block_height: u32,
    /// Owned modules adopt declared offsets.
    pub respect_config_offsets: bool,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            order: OrderMode::Config,
            placement: PlacementMode::Layout,
            interleave: Interleave::Panel,
            block_height: 32,
            respect_config_offsets: false,
        }
    }
}

// ── LayoutResolver ───────────────────────────────────────────────

/// Resolves CONFIG declarations into a block walk and a placement map.
#[derive(Debug, Clone)]
pub struct LayoutResolver {
    options: LayoutOptions,
    grid_cols: u32,
    panel_width: u32,
    panel_height: u32,
    grid_width: u32,
    grid_height: u32,
    declared_width: u32,
    declared_height: u32,
    entries: Vec<ConfigEntry>,
    placement: HashMap<u16, (u32, u32)>,
    expected_raw_len: Option<usize>,
    cross_check: CrossCheck,
}

impl LayoutResolver {
    /// A resolver that has seen no CONFIG yet. Placement falls back to
    /// the owned grid.
    pub fn new(geometry: &WallGeometry, registry: &ModuleRegistry, options: LayoutOptions) -> Self {
        let mut resolver = Self {
            options: LayoutOptions {
                block_height: options.block_height.max(1),
                ..options
            },
            grid_cols: geometry.grid_cols.max(1),
            panel_width: geometry.panel_width,
            panel_height: geometry.panel_height,
            grid_width: geometry.grid_width(),
            grid_height: geometry.grid_height(),
            declared_width: 0,
            declared_height: 0,
            entries: Vec::new(),
            placement: HashMap::new(),
            expected_raw_len: None,
            cross_check: CrossCheck::default(),
        };
        resolver.recompute_placement(registry);
        resolver
    }

    pub fn options(&self) -> &LayoutOptions {
        &self.options
    }

    /// Decode a CONFIG datagram, feed the cross-check and apply it.
    pub fn apply_datagram(
        &mut self,
        data: &[u8],
        registry: &mut ModuleRegistry,
    ) -> Result<(), NuvoError> {
        let decl = ConfigDeclaration::decode(data)?;
        self.cross_check
            .record(decl.sequence_tag, ConfigDeclaration::digest(data));
        self.apply(decl, registry);
        Ok(())
    }

    /// Replace the current declaration.
    ///
    /// Owned modules get their declared size and block index updated
    /// (and offsets, when configured to respect them).
    pub fn apply(&mut self, decl: ConfigDeclaration, registry: &mut ModuleRegistry) {
        let respect_offsets = self.options.respect_config_offsets;
        let mut entries = decl.entries;
        for e in &mut entries {
            if let Some(m) = registry.get_mut(e.addr16) {
                e.owned = true;
                m.width = e.width;
                m.height = e.height;
                if respect_offsets {
                    m.offset_x = e.offset_x;
                    m.offset_y = e.offset_y;
                }
                m.block_index = e.block_index;
                m.config_seen += 1;
            }
        }

        self.declared_width = decl.total_width;
        self.declared_height = decl.total_height;
        self.entries = entries;

        let owned = self.entries.iter().filter(|e| e.owned).count();
        info!(
            tag = decl.sequence_tag,
            width = self.declared_width,
            height = self.declared_height,
            all = self.entries.len(),
            owned,
            order = ?self.options.order,
            placement = ?self.options.placement,
            "CONFIG applied"
        );
        for e in &self.entries {
            debug!(
                addr16 = format_args!("{:#06x}", e.addr16),
                block = e.block_index,
                x = e.offset_x,
                y = e.offset_y,
                w = e.width,
                h = e.height,
                owned = e.owned,
                "CONFIG entry"
            );
        }

        self.recompute_placement(registry);
        self.expected_raw_len = self.compute_expected_raw_len();
    }

    /// Change the ordering mode and recompute placement.
    pub fn set_order(&mut self, order: OrderMode, registry: &ModuleRegistry) {
        self.options.order = order;
        self.recompute_placement(registry);
    }

    /// Change the placement mode and recompute placement.
    pub fn set_placement(&mut self, placement: PlacementMode, registry: &ModuleRegistry) {
        self.options.placement = placement;
        self.recompute_placement(registry);
    }

    /// Whether both redundant CONFIG copies have matched at least once.
    pub fn cross_check_confirmed(&self) -> bool {
        self.cross_check.confirmed
    }

    /// Entries of the last declaration, in declaration order.
    pub fn entries(&self) -> &[ConfigEntry] {
        &self.entries
    }

    /// Canvas size: the declared total, or the owned grid.
    pub fn canvas_size(&self) -> (u32, u32) {
        let w = if self.declared_width > 0 {
            self.declared_width
        } else {
            self.grid_width
        };
        let h = if self.declared_height > 0 {
            self.declared_height
        } else {
            self.grid_height
        };
        (w, h)
    }

    /// Destination of an owned module.
    pub fn placement(&self, addr16: u16) -> Option<(u32, u32)> {
        self.placement.get(&addr16).copied()
    }

    /// Placed rectangle of every owned module.
    pub fn module_rects(&self, registry: &ModuleRegistry) -> Vec<(u16, Rect)> {
        registry
            .modules()
            .iter()
            .filter_map(|m| {
                let (x, y) = self.placement(m.addr16)?;
                Some((
                    m.addr16,
                    Rect {
                        x,
                        y,
                        width: if m.width > 0 { m.width } else { self.panel_width },
                        height: if m.height > 0 { m.height } else { self.panel_height },
                    },
                ))
            })
            .collect()
    }

    /// Raw byte count a regular layout needs; `None` when irregular or
    /// no CONFIG has been applied.
    pub fn expected_raw_len(&self) -> Option<usize> {
        self.expected_raw_len
    }

    pub fn is_irregular(&self) -> bool {
        !self.entries.is_empty() && self.expected_raw_len.is_none()
    }

    /// Entries in walk order. Without a CONFIG the owned modules stand in.
    pub fn ordered_walk_entries(&self, registry: &ModuleRegistry) -> Vec<ConfigEntry> {
        let mut entries: Vec<ConfigEntry> = if self.entries.is_empty() {
            registry.modules().iter().map(ConfigEntry::from).collect()
        } else {
            self.entries.clone()
        };
        match self.options.order {
            OrderMode::Mac16 => entries.sort_by_key(|e| e.addr16),
            OrderMode::NBlock => entries.sort_by_key(|e| e.block_index),
            OrderMode::Grid => entries.sort_by_key(|e| (e.offset_y, e.offset_x)),
            OrderMode::Config => {}
        }
        entries
    }

    /// Blocks an entry contributes to the walk, at least one.
    pub fn blocks_for(&self, entry: &ConfigEntry) -> u32 {
        (self.entry_height(entry) / self.options.block_height).max(1)
    }

    /// Bytes of one block of `entry`.
    pub fn block_len(&self, entry: &ConfigEntry) -> usize {
        self.entry_width(entry) as usize * self.options.block_height as usize * 3
    }

    /// Full `(entry, block row)` sequence, foreign entries included.
    pub fn walk(&self, registry: &ModuleRegistry) -> BlockWalk {
        let entries = self.ordered_walk_entries(registry);
        let blocks: Vec<u32> = entries.iter().map(|e| self.blocks_for(e)).collect();
        let mut steps = Vec::with_capacity(blocks.iter().sum::<u32>() as usize);
        match self.options.interleave {
            Interleave::Panel => {
                for (i, &n) in blocks.iter().enumerate() {
                    steps.extend((0..n).map(|row| (i, row)));
                }
            }
            Interleave::Row => {
                let max_blocks = blocks.iter().copied().max().unwrap_or(0);
                for row in 0..max_blocks {
                    for (i, &n) in blocks.iter().enumerate() {
                        if row < n {
                            steps.push((i, row));
                        }
                    }
                }
            }
        }
        BlockWalk { entries, steps }
    }

    pub fn block_height(&self) -> u32 {
        self.options.block_height
    }

    pub fn panel_size(&self) -> (u32, u32) {
        (self.panel_width, self.panel_height)
    }

    // ── internals ────────────────────────────────────────────────

    fn entry_width(&self, entry: &ConfigEntry) -> u32 {
        if entry.width > 0 {
            entry.width
        } else {
            self.panel_width
        }
    }

    fn entry_height(&self, entry: &ConfigEntry) -> u32 {
        if entry.height > 0 {
            entry.height
        } else {
            self.panel_height
        }
    }

    fn recompute_placement(&mut self, registry: &ModuleRegistry) {
        self.placement.clear();
        if !self.entries.is_empty() {
            match self.options.placement {
                PlacementMode::Layout => {
                    for e in self.entries.iter().filter(|e| e.owned) {
                        self.placement.insert(e.addr16, (e.offset_x, e.offset_y));
                    }
                }
                PlacementMode::Id => {
                    let owned = self
                        .ordered_walk_entries(registry)
                        .into_iter()
                        .filter(|e| e.owned);
                    for (i, e) in owned.enumerate() {
                        let i = i as u32;
                        let x = (i % self.grid_cols) * self.panel_width;
                        let y = (i / self.grid_cols) * self.panel_height;
                        self.placement.insert(e.addr16, (x, y));
                    }
                }
            }
        }
        // Owned modules the declaration did not mention keep their grid slot.
        for m in registry.modules() {
            self.placement
                .entry(m.addr16)
                .or_insert((m.offset_x, m.offset_y));
        }
    }

    fn compute_expected_raw_len(&self) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }
        let bh = self.options.block_height;
        let mut blocks = 0usize;
        for e in &self.entries {
            let h = self.entry_height(e);
            if self.entry_width(e) != self.panel_width || h % bh != 0 {
                debug!(addr16 = e.addr16, w = e.width, h, "irregular layout entry");
                return None;
            }
            blocks += (h / bh) as usize;
        }
        Some(blocks * self.panel_width as usize * bh as usize * 3)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(addr16: u16, block_index: u8, x: u32, y: u32) -> ConfigEntry {
        ConfigEntry {
            addr16,
            block_index,
            width: 128,
            height: 128,
            offset_x: x,
            offset_y: y,
            owned: false,
        }
    }

    fn decl(tag: u8, entries: Vec<ConfigEntry>) -> ConfigDeclaration {
        ConfigDeclaration {
            color_type: ConfigDeclaration::COLOR_TYPE,
            sequence_tag: tag,
            total_width: 256,
            total_height: 128,
            entries,
        }
    }

    fn two_panel_setup() -> (ModuleRegistry, LayoutResolver) {
        let geo = WallGeometry {
            grid_cols: 2,
            ..WallGeometry::default()
        };
        let reg = ModuleRegistry::from_geometry(&geo);
        let resolver = LayoutResolver::new(&geo, &reg, LayoutOptions::default());
        (reg, resolver)
    }

    #[test]
    fn declaration_roundtrip() {
        let d = decl(32, vec![entry(1, 1, 0, 0), entry(0x0A0B, 2, 128, 0)]);
        let bytes = d.encode().unwrap();
        assert_eq!(bytes.len(), 8 + 14);
        assert_eq!(&bytes[..8], &[0x24, 0x24, 120, 2, 32, 16, 8, 2]);
        assert_eq!(&bytes[15..17], &[0x0A, 0x0B]);
        assert_eq!(ConfigDeclaration::decode(&bytes).unwrap(), d);
    }

    #[test]
    fn encode_refuses_count_overflow() {
        let full: Vec<ConfigEntry> = (1..=255).map(|a| entry(a, 1, 0, 0)).collect();
        let bytes = decl(0, full.clone()).encode().unwrap();
        assert_eq!(bytes[7], 255);

        let mut over = full;
        over.push(entry(256, 1, 0, 0));
        assert!(matches!(
            decl(0, over).encode(),
            Err(NuvoError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn decode_stops_at_partial_entry() {
        let d = decl(0, vec![entry(1, 1, 0, 0), entry(2, 2, 128, 0)]);
        let bytes = d.encode().unwrap();
        let parsed = ConfigDeclaration::decode(&bytes[..bytes.len() - 1]).unwrap();
        assert_eq!(parsed.entries.len(), 1);
        assert!(ConfigDeclaration::decode(&bytes[..7]).is_err());
    }

    #[test]
    fn decode_keeps_first_of_repeated_address() {
        let d = decl(0, vec![entry(5, 1, 0, 0), entry(5, 2, 128, 0)]);
        let parsed = ConfigDeclaration::decode(&d.encode().unwrap()).unwrap();
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.entries[0].block_index, 1);
    }

    #[test]
    fn digest_ignores_sequence_tag() {
        let a = decl(0, vec![entry(1, 1, 0, 0)]).encode().unwrap();
        let b = decl(32, vec![entry(1, 1, 0, 0)]).encode().unwrap();
        let c = decl(32, vec![entry(1, 1, 16, 0)]).encode().unwrap();
        assert_eq!(ConfigDeclaration::digest(&a), ConfigDeclaration::digest(&b));
        assert_ne!(ConfigDeclaration::digest(&a), ConfigDeclaration::digest(&c));
    }

    #[test]
    fn cross_check_is_sticky() {
        let (mut reg, mut res) = two_panel_setup();
        let a = decl(0, vec![entry(1, 1, 0, 0)]).encode().unwrap();
        let b = decl(32, vec![entry(1, 1, 0, 0)]).encode().unwrap();
        let other = decl(32, vec![entry(2, 1, 0, 0)]).encode().unwrap();

        res.apply_datagram(&a, &mut reg).unwrap();
        assert!(!res.cross_check_confirmed());
        res.apply_datagram(&b, &mut reg).unwrap();
        assert!(res.cross_check_confirmed());
        res.apply_datagram(&other, &mut reg).unwrap();
        assert!(res.cross_check_confirmed());
    }

    #[test]
    fn apply_marks_owned_and_updates_registry() {
        let (mut reg, mut res) = two_panel_setup();
        let mut foreign = entry(99, 3, 256, 0);
        foreign.width = 64;
        res.apply(
            decl(0, vec![entry(2, 1, 0, 0), foreign, entry(1, 2, 128, 0)]),
            &mut reg,
        );
        let owned: Vec<bool> = res.entries().iter().map(|e| e.owned).collect();
        assert_eq!(owned, vec![true, false, true]);
        assert_eq!(reg.get(2).unwrap().block_index, 1);
        assert_eq!(reg.get(2).unwrap().config_seen, 1);
        // offsets not respected by default
        assert_eq!(reg.get(2).unwrap().offset_x, 128);
        assert_eq!(res.placement(2), Some((0, 0)));
        assert_eq!(res.placement(1), Some((128, 0)));
        assert_eq!(res.placement(99), None);
    }

    #[test]
    fn respect_offsets_moves_modules() {
        let geo = WallGeometry::default();
        let mut reg = ModuleRegistry::from_geometry(&geo);
        let opts = LayoutOptions {
            respect_config_offsets: true,
            ..LayoutOptions::default()
        };
        let mut res = LayoutResolver::new(&geo, &reg, opts);
        res.apply(decl(0, vec![entry(1, 1, 64, 32)]), &mut reg);
        assert_eq!((reg.get(1).unwrap().offset_x, reg.get(1).unwrap().offset_y), (64, 32));
    }

    #[test]
    fn placement_covers_unlisted_owned_modules() {
        let (mut reg, mut res) = two_panel_setup();
        res.apply(decl(0, vec![entry(7, 1, 0, 0), entry(2, 2, 0, 0)]), &mut reg);
        assert_eq!(res.placement(2), Some((0, 0)));
        assert_eq!(res.placement(1), Some((0, 0)));
        assert_eq!(res.module_rects(&reg).len(), 2);
    }

    #[test]
    fn ordering_modes() {
        let (mut reg, mut res) = two_panel_setup();
        res.apply(
            decl(
                0,
                vec![entry(3, 2, 128, 128), entry(1, 3, 0, 128), entry(2, 1, 128, 0)],
            ),
            &mut reg,
        );
        let addrs = |r: &LayoutResolver| -> Vec<u16> {
            r.ordered_walk_entries(&reg).iter().map(|e| e.addr16).collect()
        };
        assert_eq!(addrs(&res), vec![3, 1, 2]);
        res.set_order(OrderMode::Mac16, &reg);
        assert_eq!(addrs(&res), vec![1, 2, 3]);
        res.set_order(OrderMode::NBlock, &reg);
        assert_eq!(addrs(&res), vec![2, 3, 1]);
        res.set_order(OrderMode::Grid, &reg);
        assert_eq!(addrs(&res), vec![2, 1, 3]);
    }

    #[test]
    fn id_placement_tiles_owned_in_order() {
        let (mut reg, mut res) = two_panel_setup();
        res.apply(
            decl(0, vec![entry(2, 1, 512, 512), entry(50, 2, 0, 0), entry(1, 3, 640, 0)]),
            &mut reg,
        );
        res.set_placement(PlacementMode::Id, &reg);
        assert_eq!(res.placement(2), Some((0, 0)));
        assert_eq!(res.placement(1), Some((128, 0)));
        res.set_order(OrderMode::Mac16, &reg);
        assert_eq!(res.placement(1), Some((0, 0)));
        assert_eq!(res.placement(2), Some((128, 0)));
    }

    #[test]
    fn walk_panel_and_row_interleave() {
        let (mut reg, mut res) = two_panel_setup();
        let mut short = entry(2, 2, 128, 0);
        short.height = 64;
        res.apply(decl(0, vec![entry(1, 1, 0, 0), short]), &mut reg);

        let walk = res.walk(&reg);
        assert_eq!(
            walk.steps,
            vec![(0, 0), (0, 1), (0, 2), (0, 3), (1, 0), (1, 1)]
        );

        let opts = LayoutOptions {
            interleave: Interleave::Row,
            ..LayoutOptions::default()
        };
        let geo = WallGeometry {
            grid_cols: 2,
            ..WallGeometry::default()
        };
        let mut res = LayoutResolver::new(&geo, &reg, opts);
        res.apply(decl(0, vec![entry(1, 1, 0, 0), short]), &mut reg);
        assert_eq!(
            res.walk(&reg).steps,
            vec![(0, 0), (1, 0), (0, 1), (1, 1), (0, 2), (0, 3)]
        );
    }

    #[test]
    fn walk_without_config_uses_owned_grid() {
        let (reg, res) = two_panel_setup();
        let walk = res.walk(&reg);
        assert_eq!(walk.entries.len(), 2);
        assert!(walk.entries.iter().all(|e| e.owned));
        assert_eq!(walk.steps.len(), 8);
        assert_eq!(res.canvas_size(), (256, 128));
        assert_eq!(res.expected_raw_len(), None);
        assert!(!res.is_irregular());
    }

    #[test]
    fn expected_len_for_regular_layout() {
        let (mut reg, mut res) = two_panel_setup();
        res.apply(decl(0, vec![entry(1, 1, 0, 0), entry(2, 2, 128, 0)]), &mut reg);
        assert_eq!(res.expected_raw_len(), Some(256 * 128 * 3));
        assert!(!res.is_irregular());
    }

    #[test]
    fn irregular_layout_detected() {
        let (mut reg, mut res) = two_panel_setup();
        let mut wide = entry(2, 2, 128, 0);
        wide.width = 256;
        res.apply(decl(0, vec![entry(1, 1, 0, 0), wide]), &mut reg);
        assert!(res.is_irregular());

        let mut odd = entry(2, 2, 128, 0);
        odd.height = 48;
        res.apply(decl(0, vec![entry(1, 1, 0, 0), odd]), &mut reg);
        assert!(res.is_irregular());
    }

    #[test]
    fn declared_size_drives_canvas() {
        let (mut reg, mut res) = two_panel_setup();
        let mut d = decl(0, vec![entry(1, 1, 0, 0)]);
        d.total_width = 512;
        d.total_height = 0;
        res.apply(d, &mut reg);
        assert_eq!(res.canvas_size(), (512, 128));
    }
}
