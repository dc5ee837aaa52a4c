//! Both halves of the wall protocol and their shared pieces.
//!
//! | Module        | Purpose                                              |
//! |---------------|------------------------------------------------------|
//! | `canvas`      | RGB raster, wire byte order, clipped blits           |
//! | `transmitter` | raster → FRAME fragments, CONFIG plans, SYNC profiles |
//! | `assembler`   | per-frame-id fragment store with strict validation   |
//! | `decoder`     | assembled stream → canvas (full frame, blocks, JPEG) |
//! | `gamma`       | global and per-module lookup tables                  |
//! | `marker`      | transient per-module highlights                      |
//! | `link`        | datagram transport (UDP or in-memory)                |
//! | `node`        | receiver state machine and socket loop               |
//! | `broadcaster` | async producer API over a link                       |

pub mod assembler;
pub mod broadcaster;
pub mod canvas;
pub mod decoder;
pub mod gamma;
pub mod link;
pub mod marker;
pub mod node;
pub mod transmitter;

pub use assembler::{FragmentOutcome, FrameAssembler, FrameAssembly};
pub use broadcaster::LedBroadcaster;
pub use canvas::{Canvas, PixelOrder, Rgb};
pub use decoder::FrameDecoder;
pub use gamma::{GammaCommand, GammaLut, GammaStore};
pub use link::{DatagramLink, MemoryLink, UdpLink};
pub use marker::{MarkerEntry, MarkerState};
pub use node::{CommitOutcome, FrameStats, ReceiverOptions, WallNode, WallObserver, WallReceiver};
pub use transmitter::{
    EncodedFrame, FrameTransmitter, LayoutPlan, SyncProfile, Tile, TransferMode,
    TransmitterOptions,
};
