//! # nuvo-core
//!
//! Wire protocol library for tiled LED video walls.
//!
//! This crate contains:
//! - **Wire format**: `PacketHeader`, `FragmentHeader`, `Opcode`, size codes
//! - **Registry**: `ModuleRegistry`, the panels a node owns and announces
//! - **Layout**: `LayoutResolver`, CONFIG decoding, walk order and placement
//! - **Wall**: transmitter, assembler, decoder, gamma, markers, and the
//!   `WallNode` / `LedBroadcaster` pair that run them over UDP
//! - **Error**: `NuvoError`, a `thiserror`-based error enum

pub mod error;
pub mod layout;
pub mod registry;
pub mod wall;
pub mod wire;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use error::NuvoError;
pub use layout::{
    ConfigDeclaration, ConfigEntry, Interleave, LayoutOptions, LayoutResolver, OrderMode,
    PlacementMode, Rect,
};
pub use registry::{ModuleDescriptor, ModuleRegistry, WallGeometry};
pub use wall::{
    Canvas, CommitOutcome, DatagramLink, FrameAssembler, FrameDecoder, FrameTransmitter,
    GammaStore, LayoutPlan, LedBroadcaster, MarkerState, MemoryLink, PixelOrder,
    ReceiverOptions, SyncProfile, TransmitterOptions, UdpLink, WallNode, WallObserver,
    WallReceiver,
};
pub use wire::{FormatType, FragmentHeader, Opcode, PacketHeader};
