//! Transient per-module highlights driven by the MARKER opcode.
//!
//! Address zero repeats the last explicitly addressed module. Entries
//! expire lazily: every query prunes what has run out.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::wall::canvas::Rgb;

pub const GREEN: Rgb = [60, 210, 60];
pub const YELLOW: Rgb = [240, 200, 30];
pub const RED: Rgb = [220, 60, 60];

/// Color and display duration for a status code.
pub fn classify(code: u8) -> (Rgb, Duration) {
    match code {
        0x00 | 0x10 | 0x20 | 0xB1 => (GREEN, Duration::from_millis(2000)),
        0x01 | 0x11 | 0x21 | 0xB0 => (YELLOW, Duration::from_millis(900)),
        _ => (RED, Duration::from_millis(2000)),
    }
}

/// An active highlight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerEntry {
    pub addr16: u16,
    pub color: Rgb,
    pub expires_at: Instant,
}

type ParseAttempt = fn(&[u8]) -> Option<(u16, u8)>;

/// `addr16 BE · code`
fn addr16_code(body: &[u8]) -> Option<(u16, u8)> {
    let b = body.get(..3)?;
    Some((u16::from_be_bytes([b[0], b[1]]), b[2]))
}

/// `addr32 BE · code`
fn addr32_code(body: &[u8]) -> Option<(u16, u8)> {
    let b = body.get(..5)?;
    Some((u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as u16, b[4]))
}

/// Body shapes in priority order.
const ATTEMPTS: &[ParseAttempt] = &[addr16_code, addr32_code];

/// Resolve a MARKER body to `(address, code)`. An owned address wins
/// in priority order; failing that, the widest shape carrying address
/// zero selects the sticky target.
pub fn parse_marker(body: &[u8], is_known: impl Fn(u16) -> bool) -> Option<(u16, u8)> {
    let parsed: Vec<(u16, u8)> = ATTEMPTS.iter().filter_map(|a| a(body)).collect();
    parsed
        .iter()
        .copied()
        .find(|&(addr, _)| addr != 0 && is_known(addr))
        .or_else(|| parsed.iter().rev().copied().find(|&(addr, _)| addr == 0))
}

// ── MarkerState ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct MarkerState {
    entries: HashMap<u16, MarkerEntry>,
    last_target: Option<u16>,
}

impl MarkerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a MARKER body and arm a highlight.
    pub fn handle_command(
        &mut self,
        body: &[u8],
        is_known: impl Fn(u16) -> bool,
        now: Instant,
    ) -> Option<MarkerEntry> {
        let Some((addr16, code)) = parse_marker(body, &is_known) else {
            debug!(len = body.len(), head = ?&body[..body.len().min(16)], "MARKER payload not recognised");
            return None;
        };
        let addr16 = if addr16 == 0 {
            match self.last_target.filter(|&t| is_known(t)) {
                Some(t) => t,
                None => {
                    debug!(code, "MARKER for last target ignored, no target yet");
                    return None;
                }
            }
        } else {
            addr16
        };
        self.last_target = Some(addr16);

        let (color, duration) = classify(code);
        let entry = MarkerEntry {
            addr16,
            color,
            expires_at: now + duration,
        };
        self.entries.insert(addr16, entry);
        Some(entry)
    }

    /// Unexpired highlights, pruning the rest.
    pub fn active(&mut self, now: Instant) -> Vec<MarkerEntry> {
        self.entries.retain(|_, e| e.expires_at > now);
        let mut out: Vec<MarkerEntry> = self.entries.values().copied().collect();
        out.sort_by_key(|e| e.addr16);
        out
    }

    pub fn last_target(&self) -> Option<u16> {
        self.last_target
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn known(addr: u16) -> bool {
        (1..=4).contains(&addr)
    }

    #[test]
    fn code_classes() {
        assert_eq!(classify(0x10).0, GREEN);
        assert_eq!(classify(0xB0), (YELLOW, Duration::from_millis(900)));
        assert_eq!(classify(0x42).0, RED);
    }

    #[test]
    fn sixteen_bit_form_wins_when_known() {
        assert_eq!(parse_marker(&[0x00, 0x03, 0x01], known), Some((3, 1)));
        assert_eq!(parse_marker(&[0x10, 0xB0, 0x00, 0x02, 0x20], known), Some((2, 0x20)));
        assert_eq!(parse_marker(&[0x00, 0x09, 0x01], known), None);
        assert_eq!(parse_marker(&[0x00], known), None);
    }

    #[test]
    fn zero_address_uses_last_target() {
        let now = Instant::now();
        let mut state = MarkerState::new();
        assert!(state.handle_command(&[0, 0, 0x10], known, now).is_none());

        let first = state.handle_command(&[0, 2, 0x10], known, now).unwrap();
        assert_eq!(first.color, GREEN);

        let again = state.handle_command(&[0, 0, 0x42], known, now).unwrap();
        assert_eq!(again.addr16, 2);
        assert_eq!(again.color, RED);
        assert_eq!(state.last_target(), Some(2));
    }

    #[test]
    fn entries_expire_lazily() {
        let now = Instant::now();
        let mut state = MarkerState::new();
        state.handle_command(&[0, 1, 0x01], known, now).unwrap();
        state.handle_command(&[0, 2, 0x00], known, now).unwrap();
        assert_eq!(state.active(now).len(), 2);

        let later = now + Duration::from_millis(1000);
        let active = state.active(later);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].addr16, 2);
        assert!(state.active(now + Duration::from_secs(3)).is_empty());
    }
}
