//! Producer-facing sender: layout declaration, frames, discovery.

use std::collections::HashSet;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::NuvoError;
use crate::registry::{ModuleDescriptor, decode_register};
use crate::wall::canvas::{Canvas, Rgb};
use crate::wall::gamma::{GammaLut, encode_gamma_broadcast};
use crate::wall::link::DatagramLink;
use crate::wall::transmitter::{FrameTransmitter, LayoutPlan, SyncProfile, sync_packets};
use crate::wire::{MAX_DATAGRAM, encode_reg_request};

/// Longest single wait while collecting REGISTER replies.
const DISCOVER_POLL: Duration = Duration::from_millis(200);

/// Sends frames and control packets over one link.
pub struct LedBroadcaster<L: DatagramLink> {
    link: L,
    transmitter: FrameTransmitter,
    modules: Vec<ModuleDescriptor>,
}

impl<L: DatagramLink> LedBroadcaster<L> {
    pub fn new(link: L, transmitter: FrameTransmitter) -> Self {
        Self {
            link,
            transmitter,
            modules: Vec::new(),
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn transmitter(&self) -> &FrameTransmitter {
        &self.transmitter
    }

    /// Modules found by the last [`discover`](Self::discover).
    pub fn known_modules(&self) -> &[ModuleDescriptor] {
        &self.modules
    }

    async fn send_all(&self, packets: &[Bytes]) -> Result<(), NuvoError> {
        for pkt in packets {
            self.link.send(pkt).await?;
        }
        Ok(())
    }

    /// Ask every module on the bus to announce itself.
    pub async fn registry_request(&self) -> Result<(), NuvoError> {
        self.link.send(&encode_reg_request()).await
    }

    /// Collect REGISTER announcements for `window`, one entry per
    /// 32-bit address.
    pub async fn discover(&mut self, window: Duration) -> Result<Vec<ModuleDescriptor>, NuvoError> {
        self.modules.clear();
        let mut seen = HashSet::new();
        let deadline = Instant::now() + window;
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let Some((n, peer)) = self.link.recv(&mut buf, remaining.min(DISCOVER_POLL)).await? else {
                continue;
            };
            let Ok(module) = decode_register(&buf[..n]) else {
                continue;
            };
            if seen.insert(module.addr32) {
                debug!(addr32 = format_args!("{:#010x}", module.addr32), %peer, "module discovered");
                self.modules.push(module);
            }
        }
        info!(count = self.modules.len(), "discovery finished");
        Ok(self.modules.clone())
    }

    /// Declare a layout: CONFIG twice, identity gamma, STATE on.
    pub async fn set_layout(&mut self, plan: &LayoutPlan) -> Result<(), NuvoError> {
        let packets = self.transmitter.set_layout(plan)?;
        self.send_all(&packets).await?;
        let (w, h) = self.transmitter.screen_size();
        info!(tiles = plan.tiles.len(), width = w, height = h, "layout declared");
        Ok(())
    }

    pub async fn set_gamma_identity(&self) -> Result<(), NuvoError> {
        self.link
            .send(&encode_gamma_broadcast(&GammaLut::identity()))
            .await
    }

    /// Send one raster and commit it. Returns the frame id used.
    pub async fn send_raster(&mut self, raster: &Canvas, profile: SyncProfile) -> Result<u8, NuvoError> {
        let frame = match self.transmitter.encode_raster(raster) {
            Ok(f) => f,
            Err(e) => {
                warn!("raster rejected: {e}");
                return Err(e);
            }
        };
        self.send_all(&frame.fragments).await?;
        if let Some(finish) = &frame.finish {
            self.link.send(finish).await?;
        }
        self.send_sync(frame.frame_id, profile).await?;
        debug!(fid = frame.frame_id, ?profile, bytes = frame.stream_len, "frame sent");
        Ok(frame.frame_id)
    }

    /// Fill the whole wall with one color.
    pub async fn clear(&mut self, color: Rgb, profile: SyncProfile) -> Result<u8, NuvoError> {
        let (w, h) = self.transmitter.screen_size();
        self.send_raster(&Canvas::filled(w, h, color), profile).await
    }

    async fn send_sync(&self, frame_id: u8, profile: SyncProfile) -> Result<(), NuvoError> {
        let timing = profile.timing();
        if !timing.pre.is_zero() {
            tokio::time::sleep(timing.pre).await;
        }
        let packets = sync_packets(frame_id, profile);
        for (i, pkt) in packets.iter().enumerate() {
            self.link.send(pkt).await?;
            if i + 1 < packets.len() && !timing.between.is_zero() {
                tokio::time::sleep(timing.between).await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ModuleRegistry, WallGeometry};
    use crate::wall::link::MemoryLink;
    use crate::wall::transmitter::TransmitterOptions;
    use crate::wire::{Opcode, PacketHeader};

    fn opcodes(sent: &[Bytes]) -> Vec<u8> {
        sent.iter()
            .map(|p| PacketHeader::decode(p).unwrap().opcode)
            .collect()
    }

    #[test]
    fn layout_then_clear() {
        tokio_test::block_on(async {
            let tx = FrameTransmitter::new(TransmitterOptions::default(), 0, 0);
            let mut b = LedBroadcaster::new(MemoryLink::new(), tx);
            b.set_layout(&LayoutPlan::grid(1, 1, 16, 16, 1)).await.unwrap();
            let fid = b.clear([255, 0, 0], SyncProfile::Video1).await.unwrap();
            assert_eq!(fid, 1);

            let sent = b.link().sent();
            assert_eq!(
                opcodes(&sent),
                vec![
                    Opcode::Config as u8,
                    Opcode::Config as u8,
                    Opcode::Gamma as u8,
                    Opcode::State as u8,
                    Opcode::Frame as u8,
                    Opcode::FrameFinish as u8,
                    Opcode::Sync as u8,
                ]
            );
            // BGR on the wire
            assert_eq!(&sent[4][10..13], &[0, 0, 255]);
        });
    }

    #[tokio::test]
    async fn still_profile_sends_three_syncs() {
        let tx = FrameTransmitter::new(TransmitterOptions::default(), 16, 16);
        let mut b = LedBroadcaster::new(MemoryLink::new(), tx);
        b.send_raster(&Canvas::new(16, 16), SyncProfile::Still).await.unwrap();
        let sent = b.link().sent();
        let syncs: Vec<u8> = sent
            .iter()
            .filter(|p| p[2] == Opcode::Sync as u8)
            .map(|p| p[3])
            .collect();
        assert_eq!(syncs, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn wrong_raster_size_sends_nothing() {
        let tx = FrameTransmitter::new(TransmitterOptions::default(), 16, 16);
        let mut b = LedBroadcaster::new(MemoryLink::new(), tx);
        assert!(b.send_raster(&Canvas::new(32, 16), SyncProfile::Video1).await.is_err());
        assert!(b.link().sent().is_empty());
    }

    #[tokio::test]
    async fn discover_dedupes_by_address() {
        let link = MemoryLink::new();
        let reg = ModuleRegistry::from_geometry(&WallGeometry {
            grid_cols: 2,
            ..WallGeometry::default()
        });
        for pkt in reg.register_burst() {
            link.push_inbound(pkt.clone());
            link.push_inbound(pkt);
        }
        link.push_inbound(vec![0x24, 0x24, 140, 1, 100]);

        let tx = FrameTransmitter::new(TransmitterOptions::default(), 0, 0);
        let mut b = LedBroadcaster::new(link, tx);
        b.registry_request().await.unwrap();
        let found = b.discover(Duration::from_millis(50)).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[1].addr16, 2);
        assert_eq!(b.known_modules().len(), 2);
        assert_eq!(b.link().sent()[0][2], Opcode::RegRequest as u8);
    }
}
