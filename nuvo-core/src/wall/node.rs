//! Receiving side of the wall: dispatch, commit and the socket loop.
//!
//! [`WallReceiver`] is the synchronous state machine. Every inbound
//! datagram goes through [`WallReceiver::handle_datagram`], which may
//! return replies (the REGISTER burst). [`WallNode`] drives a receiver
//! from a [`DatagramLink`] with periodic announcements.
//!
//! ```text
//!   FRAME ─────► FrameAssembler
//!   FRAME_FINISH ─┘      │ SYNC
//!                        ▼
//!               assemble ─► FrameDecoder ─► GammaStore ─► canvas swap
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::NuvoError;
use crate::layout::{Interleave, LayoutOptions, LayoutResolver, OrderMode, PlacementMode};
use crate::registry::{ModuleDescriptor, ModuleRegistry, WallGeometry};
use crate::wall::assembler::{FragmentOutcome, FrameAssembler};
use crate::wall::canvas::{Canvas, PixelOrder, Rgb};
use crate::wall::decoder::FrameDecoder;
use crate::wall::gamma::{GammaCommand, GammaStore};
use crate::wall::link::DatagramLink;
use crate::wall::marker::{MarkerEntry, MarkerState};
use crate::wire::{MAX_DATAGRAM, Opcode, PacketHeader, body, decode_frame_ref};

// ── ReceiverOptions ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ReceiverOptions {
    pub geometry: WallGeometry,
    /// Reject anything that violates protocol invariants.
    pub strict: bool,
    pub layout: LayoutOptions,
    pub pixel_order: PixelOrder,
    /// Run decoded frames through the gamma tables.
    pub apply_gamma: bool,
    /// Where failed frames, unknown packets and LUTs are written.
    pub dump_dir: Option<PathBuf>,
    /// Period of the unsolicited REGISTER burst.
    pub announce_interval: Duration,
    /// Upper bound on one socket wait, so the loop sees `stop`.
    pub recv_timeout: Duration,
}

impl Default for ReceiverOptions {
    fn default() -> Self {
        Self {
            geometry: WallGeometry::default(),
            strict: false,
            layout: LayoutOptions::default(),
            pixel_order: PixelOrder::Bgr,
            apply_gamma: true,
            dump_dir: None,
            announce_interval: Duration::from_secs(1),
            recv_timeout: Duration::from_millis(200),
        }
    }
}

impl ReceiverOptions {
    /// Turn on strict mode and pin the stream interpretation it
    /// assumes: BGR, 32-row blocks, panel interleave, declaration
    /// order, declared offsets.
    pub fn with_strict_defaults(mut self) -> Self {
        self.strict = true;
        self.pixel_order = PixelOrder::Bgr;
        self.layout.block_height = 32;
        self.layout.interleave = Interleave::Panel;
        self.layout.order = OrderMode::Config;
        self.layout.placement = PlacementMode::Layout;
        info!("strict mode: BGR, block height 32, panel interleave, config order, layout placement");
        self
    }
}

// ── WallObserver ─────────────────────────────────────────────────

/// Consumer hooks, called from the dispatch loop. Keep them short.
pub trait WallObserver: Send {
    fn on_canvas_ready(&mut self, _canvas: &Canvas) {}

    fn on_marker_changed(&mut self, _addr16: u16, _color: Rgb, _expires_at: Instant) {}
}

// ── FrameStats ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct FrameStats {
    pub frames_committed: u64,
    pub frames_dropped: u64,
    pub last_frame_id: Option<u8>,
    pub last_format: Option<u8>,
    /// Assembled stream length of the last committed frame.
    pub last_bytes: usize,
    pub last_commit: Option<Instant>,
}

/// Result of a SYNC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Displayed,
    Dropped(&'static str),
    /// Nothing in flight for that id, e.g. a repeated SYNC.
    NoAssembly,
}

// ── WallReceiver ─────────────────────────────────────────────────

pub struct WallReceiver {
    options: ReceiverOptions,
    registry: ModuleRegistry,
    layout: LayoutResolver,
    assembler: FrameAssembler,
    decoder: FrameDecoder,
    gamma: GammaStore,
    markers: MarkerState,
    display_enabled: bool,
    brightness: u8,
    stats: FrameStats,
    canvas: Arc<Mutex<Canvas>>,
    observer: Option<Box<dyn WallObserver>>,
}

impl WallReceiver {
    pub fn new(options: ReceiverOptions) -> Self {
        let registry = ModuleRegistry::from_geometry(&options.geometry);
        let layout = LayoutResolver::new(&options.geometry, &registry, options.layout);
        let (w, h) = layout.canvas_size();
        info!(
            modules = registry.len(),
            width = w,
            height = h,
            strict = options.strict,
            "wall receiver ready"
        );
        Self {
            assembler: FrameAssembler::new(options.strict),
            decoder: FrameDecoder::new(options.strict, options.pixel_order),
            gamma: GammaStore::new(),
            markers: MarkerState::new(),
            display_enabled: true,
            brightness: 100,
            stats: FrameStats::default(),
            canvas: Arc::new(Mutex::new(Canvas::new(w, h))),
            observer: None,
            registry,
            layout,
            options,
        }
    }

    pub fn set_observer(&mut self, observer: Box<dyn WallObserver>) {
        self.observer = Some(observer);
    }

    pub fn options(&self) -> &ReceiverOptions {
        &self.options
    }

    /// Dispatch one datagram. Returns datagrams to send back.
    pub fn handle_datagram(&mut self, data: &[u8], now: Instant) -> Vec<Bytes> {
        let header = match PacketHeader::decode(data) {
            Ok(h) => h,
            Err(_) => return Vec::new(),
        };
        let opcode = match header.kind() {
            Ok(op) => op,
            Err(_) => {
                debug!(opcode = header.opcode, len = data.len(), "unknown opcode");
                self.dump(&format!("nuvo_unknown_{}_{}.bin", header.opcode, timestamp()), data);
                return Vec::new();
            }
        };

        match opcode {
            Opcode::Config => self.on_config(data),
            Opcode::Frame => {
                if let FragmentOutcome::Rejected(reason) = self.assembler.on_fragment(data) {
                    debug!(reason, "FRAME dropped");
                }
            }
            Opcode::FrameFinish => match decode_frame_ref(data) {
                Ok(fid) => {
                    if !self.assembler.on_finish(fid) {
                        debug!(fid, "FRAME_FINISH without assembly");
                    }
                }
                Err(e) => debug!("FRAME_FINISH: {e}"),
            },
            Opcode::Sync => match decode_frame_ref(data) {
                Ok(fid) => {
                    self.commit(fid);
                }
                Err(e) => debug!("SYNC: {e}"),
            },
            Opcode::Gamma => self.on_gamma(body(data)),
            Opcode::Marker => self.on_marker(body(data), now),
            Opcode::State => self.on_state(body(data)),
            Opcode::RegRequest => {
                debug!(modules = self.registry.len(), "REG_REQUEST, announcing");
                return self.registry.register_burst();
            }
            // Other nodes announcing themselves.
            Opcode::Register => {}
        }
        Vec::new()
    }

    fn on_config(&mut self, data: &[u8]) {
        if let Err(e) = self.layout.apply_datagram(data, &mut self.registry) {
            debug!("CONFIG dropped: {e}");
            return;
        }
        let (w, h) = self.layout.canvas_size();
        let mut canvas = self.canvas.lock().unwrap_or_else(PoisonError::into_inner);
        if canvas.width() != w || canvas.height() != h {
            info!(width = w, height = h, "canvas resized");
            *canvas = Canvas::new(w, h);
        }
    }

    fn on_gamma(&mut self, body: &[u8]) {
        let registry = &self.registry;
        let Some(cmd) = self.gamma.handle_command(body, |a| registry.contains(a)) else {
            return;
        };
        let lut = match &cmd {
            GammaCommand::Broadcast(lut) => Some(lut),
            GammaCommand::Targeted { lut, .. } => lut.as_ref(),
        };
        if let Some(lut) = lut {
            self.dump(&format!("nuvo_lut_{}.bin", timestamp()), lut.as_bytes());
        }
    }

    fn on_marker(&mut self, body: &[u8], now: Instant) {
        let registry = &self.registry;
        let Some(entry) = self
            .markers
            .handle_command(body, |a| registry.contains(a), now)
        else {
            return;
        };
        debug!(addr16 = entry.addr16, color = ?entry.color, "marker armed");
        if let Some(obs) = self.observer.as_mut() {
            obs.on_marker_changed(entry.addr16, entry.color, entry.expires_at);
        }
    }

    fn on_state(&mut self, body: &[u8]) {
        let [enabled, brightness, ..] = body else {
            debug!(len = body.len(), "STATE too short");
            return;
        };
        self.display_enabled = *enabled != 0;
        self.brightness = *brightness;
        debug!(enabled = self.display_enabled, brightness = self.brightness, "STATE");
    }

    /// Commit the assembly for `frame_id`. It is discarded whatever
    /// the outcome.
    pub fn commit(&mut self, frame_id: u8) -> CommitOutcome {
        let Some(asm) = self.assembler.take_for_commit(frame_id) else {
            return CommitOutcome::NoAssembly;
        };
        let strict = self.options.strict;

        if strict {
            let refusal = if !self.display_enabled {
                Some("display disabled")
            } else if !self.layout.cross_check_confirmed() {
                Some("CONFIG cross-check not confirmed")
            } else if !asm.is_complete() {
                Some("incomplete frame")
            } else if !asm.finish_seen() {
                Some("FRAME_FINISH not seen")
            } else {
                None
            };
            if let Some(reason) = refusal {
                return self.drop_frame(frame_id, reason);
            }
        }

        let raw = match asm.assemble(strict) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(fid = frame_id, "assemble failed: {e}");
                return self.drop_frame(frame_id, "assemble failed");
            }
        };

        let mut canvas = match self
            .decoder
            .decode(asm.format, &raw, &self.layout, &self.registry)
        {
            Ok(c) => c,
            Err(e) => {
                debug!(fid = frame_id, format = asm.format, len = raw.len(), "decode failed: {e}");
                if !strict {
                    self.dump(&format!("nuvo_frame_{frame_id}_dump.bin"), &raw);
                }
                return self.drop_frame(frame_id, "decode failed");
            }
        };

        if self.options.apply_gamma {
            let rects = self.layout.module_rects(&self.registry);
            self.gamma.apply(&mut canvas, &rects);
        }

        self.stats.frames_committed += 1;
        self.stats.last_frame_id = Some(frame_id);
        self.stats.last_format = Some(asm.format);
        self.stats.last_bytes = raw.len();
        self.stats.last_commit = Some(Instant::now());
        debug!(
            fid = frame_id,
            format = asm.format,
            bytes = raw.len(),
            parts = asm.received(),
            total = asm.total,
            "frame committed"
        );

        if let Some(obs) = self.observer.as_mut() {
            obs.on_canvas_ready(&canvas);
        }
        *self.canvas.lock().unwrap_or_else(PoisonError::into_inner) = canvas;
        CommitOutcome::Displayed
    }

    fn drop_frame(&mut self, frame_id: u8, reason: &'static str) -> CommitOutcome {
        debug!(fid = frame_id, reason, "frame dropped");
        self.stats.frames_dropped += 1;
        CommitOutcome::Dropped(reason)
    }

    fn dump(&self, name: &str, data: &[u8]) {
        let Some(dir) = &self.options.dump_dir else {
            return;
        };
        let path = dir.join(name);
        match std::fs::write(&path, data) {
            Ok(()) => debug!(path = %path.display(), len = data.len(), "dumped"),
            Err(e) => warn!(path = %path.display(), "dump failed: {e}"),
        }
    }

    // ── Consumer side ────────────────────────────────────────────

    pub fn list_known_modules(&self) -> Vec<ModuleDescriptor> {
        self.registry.modules().to_vec()
    }

    pub fn active_markers(&mut self, now: Instant) -> Vec<MarkerEntry> {
        self.markers.active(now)
    }

    /// Copy of the current canvas.
    pub fn snapshot(&self) -> Canvas {
        self.canvas
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Shared handle for a renderer. Hold the lock briefly.
    pub fn canvas_handle(&self) -> Arc<Mutex<Canvas>> {
        Arc::clone(&self.canvas)
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn layout(&self) -> &LayoutResolver {
        &self.layout
    }

    pub fn display_enabled(&self) -> bool {
        self.display_enabled
    }

    pub fn brightness(&self) -> u8 {
        self.brightness
    }

    pub fn set_order_mode(&mut self, order: OrderMode) {
        self.layout.set_order(order, &self.registry);
    }

    pub fn set_placement_mode(&mut self, placement: PlacementMode) {
        self.layout.set_placement(placement, &self.registry);
    }

    /// REGISTER datagram per owned module.
    pub fn announce_burst(&self) -> Vec<Bytes> {
        self.registry.register_burst()
    }
}

fn timestamp() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

// ── WallNode ─────────────────────────────────────────────────────

enum LoopEvent {
    Announce,
    Received(Result<Option<(usize, std::net::SocketAddr)>, NuvoError>),
}

/// A [`WallReceiver`] bound to a link.
///
/// # Lifetime
///
/// The running flag starts set. [`run`](Self::run) loops until
/// [`stop`](Self::stop) is called or the stop handle is cleared, and
/// never sets the flag itself, so a stop issued before `run` makes it
/// return at once. Each wait is bounded by `recv_timeout`.
pub struct WallNode<L: DatagramLink> {
    link: L,
    receiver: WallReceiver,
    running: Arc<AtomicBool>,
}

impl<L: DatagramLink> WallNode<L> {
    pub fn new(link: L, options: ReceiverOptions) -> Self {
        Self::with_running_flag(link, options, Arc::new(AtomicBool::new(true)))
    }

    /// Build a node that shares an existing running flag.
    pub fn with_running_flag(link: L, options: ReceiverOptions, running: Arc<AtomicBool>) -> Self {
        Self {
            link,
            receiver: WallReceiver::new(options),
            running,
        }
    }

    /// Handle to stop the loop from another task.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn receiver(&self) -> &WallReceiver {
        &self.receiver
    }

    pub fn receiver_mut(&mut self) -> &mut WallReceiver {
        &mut self.receiver
    }

    pub fn canvas_handle(&self) -> Arc<Mutex<Canvas>> {
        self.receiver.canvas_handle()
    }

    /// Receive and dispatch until stopped.
    pub async fn run(&mut self) -> Result<(), NuvoError> {
        let opts = self.receiver.options();
        let wait = opts.recv_timeout.max(Duration::from_millis(1));
        let mut announce = tokio::time::interval(opts.announce_interval.max(Duration::from_millis(10)));
        announce.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut buf = vec![0u8; MAX_DATAGRAM];
        info!("wall node running");

        while self.running.load(Ordering::SeqCst) {
            let event = tokio::select! {
                _ = announce.tick() => LoopEvent::Announce,
                r = self.link.recv(&mut buf, wait) => LoopEvent::Received(r),
            };
            let replies = match event {
                LoopEvent::Announce => self.receiver.announce_burst(),
                LoopEvent::Received(Ok(Some((n, _)))) => {
                    self.receiver.handle_datagram(&buf[..n], Instant::now())
                }
                LoopEvent::Received(Ok(None)) => continue,
                LoopEvent::Received(Err(e)) => {
                    debug!("receive error: {e}");
                    continue;
                }
            };
            for pkt in replies {
                if let Err(e) = self.link.send(&pkt).await {
                    debug!("send failed: {e}");
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("wall node stopped");
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
