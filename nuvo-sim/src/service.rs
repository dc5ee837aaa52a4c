//! Simulator service: one wall node on the broadcast socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tracing::{debug, info};

use nuvo_core::wall::{Canvas, Rgb, UdpLink, WallNode, WallObserver};

use crate::config::SimConfig;

// ── LogObserver ──────────────────────────────────────────────────

/// Stands in for a renderer: logs what would be shown.
#[derive(Debug, Default)]
pub struct LogObserver {
    frames: u64,
}

impl LogObserver {
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl WallObserver for LogObserver {
    fn on_canvas_ready(&mut self, canvas: &Canvas) {
        self.frames += 1;
        debug!(
            frame = self.frames,
            width = canvas.width(),
            height = canvas.height(),
            "canvas ready"
        );
    }

    fn on_marker_changed(&mut self, addr16: u16, color: Rgb, expires_at: Instant) {
        let ms = expires_at.saturating_duration_since(Instant::now()).as_millis();
        info!(addr16 = format_args!("{addr16:#06x}"), ?color, ms, "marker");
    }
}

// ── SimService ───────────────────────────────────────────────────

/// The top-level simulator service.
pub struct SimService {
    config: SimConfig,
    running: Arc<AtomicBool>,
}

impl SimService {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Handle to stop the service from another task.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Run until stopped.
    ///
    /// 1. Binds the protocol port with broadcast enabled.
    /// 2. Builds a wall node sharing our running flag.
    /// 3. Dispatches datagrams until `running` becomes `false`.
    ///
    /// A stop requested before or during the bind is honoured.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let link = match self.bind().await {
            Ok(link) => link,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let options = self.config.to_receiver_options();
        let mut node = WallNode::with_running_flag(link, options, Arc::clone(&self.running));
        node.receiver_mut().set_observer(Box::new(LogObserver::default()));

        let modules = node.receiver().list_known_modules();
        info!("owned modules: {}", serde_json::to_string(&modules)?);

        let result = node.run().await;

        let stats = node.receiver().stats();
        info!(
            committed = stats.frames_committed,
            dropped = stats.frames_dropped,
            "simulator stopped"
        );
        self.running.store(false, Ordering::SeqCst);
        result?;
        Ok(())
    }

    /// Signal the service to stop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Whether the service is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn bind(&self) -> Result<UdpLink, Box<dyn std::error::Error>> {
        Ok(UdpLink::bind_broadcast(self.config.bind_ip()?).await?)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_starts_armed() {
        let svc = SimService::new(SimConfig::default());
        assert!(svc.is_running());
    }

    #[test]
    fn stop_handle_works() {
        let svc = SimService::new(SimConfig::default());
        let handle = svc.stop_handle();
        handle.store(false, Ordering::SeqCst);
        assert!(!svc.is_running());
    }

    #[tokio::test]
    async fn stop_before_run_returns_after_bind() {
        let mut cfg = SimConfig::default();
        cfg.network.bind_ip = "127.0.0.1".into();
        let svc = SimService::new(cfg);
        svc.stop();
        // the protocol port may be taken on the test host; either way run returns
        let _ = tokio::time::timeout(std::time::Duration::from_secs(2), svc.run())
            .await
            .expect("run ignored an earlier stop");
        assert!(!svc.is_running());
    }

    #[test]
    fn observer_counts_frames() {
        let mut obs = LogObserver::default();
        obs.on_canvas_ready(&Canvas::new(16, 16));
        obs.on_canvas_ready(&Canvas::new(16, 16));
        assert_eq!(obs.frames(), 2);
    }

    #[tokio::test]
    async fn bad_bind_ip_fails_fast() {
        let mut cfg = SimConfig::default();
        cfg.network.bind_ip = "nonsense".into();
        let svc = SimService::new(cfg);
        assert!(svc.run().await.is_err());
        assert!(!svc.is_running());
    }
}
