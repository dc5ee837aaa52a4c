//! Error types for the NuvoLED wall protocol.
//!
//! All fallible operations return `Result<T, NuvoError>`. The receive
//! path never propagates these out of its dispatch loop: a failing
//! packet or frame is logged and dropped.

use thiserror::Error;

/// The canonical error type for the wall protocol.
#[derive(Debug, Error)]
pub enum NuvoError {
    // ── Protocol Errors ──────────────────────────────────────────
    /// Datagram does not start with the `0x24 0x24` marker.
    #[error("invalid packet marker")]
    InvalidMarker,

    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    /// A packet violated protocol rules (strict-mode checks).
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    // ── Packet Errors ────────────────────────────────────────────
    /// The datagram is shorter than its fixed layout requires.
    #[error("truncated packet: need {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// The payload exceeds what one field can describe.
    #[error("payload too large: {size} (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    // ── Layout Errors ────────────────────────────────────────────
    /// Raw block decode was requested against an irregular layout.
    #[error("irregular layout: mixed panel widths or unaligned heights")]
    IrregularLayout,

    /// A raster or byte stream did not have the size the layout demands.
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// An operation needed a layout that has not been set.
    #[error("no layout declared")]
    NoLayout,

    // ── Decode Errors ────────────────────────────────────────────
    /// Embedded image lacks the start/end markers.
    #[error("embedded image markers missing")]
    BadImageMarkers,

    /// Frame format type that the decoder refuses (e.g. RGB565).
    #[error("unsupported frame format: {0}")]
    UnsupportedFormat(u8),

    /// The embedded image decoder failed.
    #[error("image decode failed: {0}")]
    ImageDecode(String),

    // ── Transport Errors ─────────────────────────────────────────
    /// The UDP/IO layer reported an error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // ── Configuration Errors ─────────────────────────────────────
    /// An option value could not be interpreted.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for NuvoError {
    fn from(s: String) -> Self {
        NuvoError::Other(s)
    }
}

impl From<&str> for NuvoError {
    fn from(s: &str) -> Self {
        NuvoError::Other(s.to_string())
    }
}

impl From<jpeg_decoder::Error> for NuvoError {
    fn from(e: jpeg_decoder::Error) -> Self {
        NuvoError::ImageDecode(e.to_string())
    }
}

impl NuvoError {
    /// Shorthand for a length check failure.
    pub(crate) fn truncated(expected: usize, actual: usize) -> Self {
        NuvoError::Truncated { expected, actual }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = NuvoError::InvalidMarker;
        assert!(e.to_string().contains("marker"));

        let e = NuvoError::SizeMismatch {
            expected: 98304,
            actual: 1000,
        };
        assert!(e.to_string().contains("98304"));
        assert!(e.to_string().contains("1000"));
    }

    #[test]
    fn from_string() {
        let e: NuvoError = "something broke".into();
        assert!(matches!(e, NuvoError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "port busy");
        let e: NuvoError = io_err.into();
        assert!(matches!(e, NuvoError::Io(_)));
    }
}
