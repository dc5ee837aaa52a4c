//! Configuration for the wall simulator.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use nuvo_core::layout::{Interleave, LayoutOptions, OrderMode, PlacementMode};
use nuvo_core::wall::PixelOrder;
use nuvo_core::{NuvoError, ReceiverOptions, WallGeometry};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Socket and timing settings.
    pub network: NetworkConfig,
    /// The modules this simulator owns.
    pub wall: WallConfig,
    /// How frames are validated and interpreted.
    pub decode: DecodeConfig,
    /// Offline inspection of failed frames.
    pub dump: DumpConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Local address to bind; the port is always the protocol port.
    pub bind_ip: String,
    /// REGISTER burst period in milliseconds.
    pub announce_interval_ms: u64,
    /// Longest single socket wait in milliseconds.
    pub recv_timeout_ms: u64,
}

/// Owned module grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WallConfig {
    pub grid_cols: u32,
    pub grid_rows: u32,
    /// Panel width in pixels, a multiple of 16.
    pub panel_width: u32,
    /// Panel height in pixels, a multiple of 16.
    pub panel_height: u32,
    /// High 16 bits of every module's 32-bit address.
    pub addr_base: u32,
    /// Address of the top-left module.
    pub addr_start: u16,
    /// Hardware tag announced in REGISTER.
    pub hw_tag: String,
}

/// Decode behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    pub strict: bool,
    pub order: OrderMode,
    pub placement: PlacementMode,
    pub interleave: Interleave,
    /// Rows per block in the raw stream.
    pub block_height: u32,
    pub pixel_order: PixelOrder,
    /// Adopt declared module offsets from CONFIG.
    pub respect_config_offsets: bool,
    pub apply_gamma: bool,
}

/// Dump settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpConfig {
    pub enabled: bool,
    /// Directory for dump files. Empty means the working directory.
    pub dir: String,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_ip: "0.0.0.0".into(),
            announce_interval_ms: 1000,
            recv_timeout_ms: 200,
        }
    }
}

impl Default for WallConfig {
    fn default() -> Self {
        let geo = WallGeometry::default();
        Self {
            grid_cols: geo.grid_cols,
            grid_rows: geo.grid_rows,
            panel_width: geo.panel_width,
            panel_height: geo.panel_height,
            addr_base: geo.addr_base,
            addr_start: geo.addr_start,
            hw_tag: geo.hw_tag,
        }
    }
}

impl Default for DecodeConfig {
    fn default() -> Self {
        let layout = LayoutOptions::default();
        Self {
            strict: false,
            order: layout.order,
            placement: layout.placement,
            interleave: layout.interleave,
            block_height: layout.block_height,
            pixel_order: PixelOrder::default(),
            respect_config_offsets: layout.respect_config_offsets,
            apply_gamma: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl SimConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// Address to bind the protocol socket on.
    pub fn bind_ip(&self) -> Result<IpAddr, NuvoError> {
        self.network
            .bind_ip
            .parse()
            .map_err(|e| NuvoError::InvalidConfig(format!("bind_ip {:?}: {e}", self.network.bind_ip)))
    }

    /// Convert to receiver options, clamping out-of-range values.
    pub fn to_receiver_options(&self) -> ReceiverOptions {
        let w = &self.wall;
        let geometry = WallGeometry {
            grid_cols: w.grid_cols.clamp(1, 64),
            grid_rows: w.grid_rows.clamp(1, 64),
            panel_width: round16(w.panel_width),
            panel_height: round16(w.panel_height),
            addr_base: w.addr_base,
            addr_start: w.addr_start,
            hw_tag: w.hw_tag.clone(),
        };
        let d = &self.decode;
        let options = ReceiverOptions {
            geometry,
            strict: false,
            layout: LayoutOptions {
                order: d.order,
                placement: d.placement,
                interleave: d.interleave,
                block_height: d.block_height.clamp(1, 256),
                respect_config_offsets: d.respect_config_offsets,
            },
            pixel_order: d.pixel_order,
            apply_gamma: d.apply_gamma,
            dump_dir: self.dump.enabled.then(|| {
                if self.dump.dir.is_empty() {
                    PathBuf::from(".")
                } else {
                    PathBuf::from(&self.dump.dir)
                }
            }),
            announce_interval: Duration::from_millis(self.network.announce_interval_ms.max(10)),
            recv_timeout: Duration::from_millis(self.network.recv_timeout_ms.clamp(1, 5000)),
        };
        if d.strict {
            options.with_strict_defaults()
        } else {
            options
        }
    }
}

/// Nearest positive multiple of 16 not above 4080 (one size byte).
fn round16(px: u32) -> u32 {
    (px.div_ceil(16) * 16).clamp(16, 255 * 16)
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let cfg = SimConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(text.contains("announce_interval_ms"));
        assert!(text.contains("block_height"));
        assert!(text.contains("order = \"config\""));
    }

    #[test]
    fn roundtrip_config() {
        let mut cfg = SimConfig::default();
        cfg.decode.order = OrderMode::Mac16;
        cfg.decode.interleave = Interleave::Row;
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: SimConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.decode.order, OrderMode::Mac16);
        assert_eq!(parsed.decode.interleave, Interleave::Row);
        assert_eq!(parsed.network.recv_timeout_ms, 200);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let parsed: SimConfig = toml::from_str("[wall]\ngrid_cols = 4\n").unwrap();
        assert_eq!(parsed.wall.grid_cols, 4);
        assert_eq!(parsed.wall.panel_width, 128);
        assert_eq!(parsed.logging.level, "info");
    }

    #[test]
    fn to_receiver_options_clamps() {
        let mut cfg = SimConfig::default();
        cfg.wall.grid_cols = 0;
        cfg.wall.panel_width = 100;
        cfg.decode.block_height = 0;
        cfg.network.announce_interval_ms = 0;
        let opts = cfg.to_receiver_options();
        assert_eq!(opts.geometry.grid_cols, 1);
        assert_eq!(opts.geometry.panel_width, 112);
        assert_eq!(opts.layout.block_height, 1);
        assert_eq!(opts.announce_interval, Duration::from_millis(10));
        assert!(opts.dump_dir.is_none());
    }

    #[test]
    fn strict_forces_stream_defaults() {
        let mut cfg = SimConfig::default();
        cfg.decode.strict = true;
        cfg.decode.pixel_order = PixelOrder::Rgb;
        cfg.decode.interleave = Interleave::Row;
        cfg.decode.placement = PlacementMode::Id;
        let opts = cfg.to_receiver_options();
        assert!(opts.strict);
        assert_eq!(opts.pixel_order, PixelOrder::Bgr);
        assert_eq!(opts.layout.interleave, Interleave::Panel);
        assert_eq!(opts.layout.placement, PlacementMode::Layout);
    }

    #[test]
    fn bad_bind_ip_is_reported() {
        let mut cfg = SimConfig::default();
        assert!(cfg.bind_ip().is_ok());
        cfg.network.bind_ip = "not-an-ip".into();
        assert!(matches!(cfg.bind_ip(), Err(NuvoError::InvalidConfig(_))));
    }
}
