//! Per-frame-id fragment store.
//!
//! Fragments may arrive in any order. Each assembly keeps a slot per
//! declared fragment plus a received count, so completeness is O(1).
//! An assembly lives until the receiver takes it for a commit attempt;
//! whatever the outcome, it is gone afterwards.

use bytes::Bytes;
use tracing::debug;

use crate::error::NuvoError;
use crate::wire::{FRAME_CHUNK, FormatType, FragmentHeader, MAX_FRAGMENTS, MAX_SIZE_CODE};

// ── FrameAssembly ────────────────────────────────────────────────

/// One in-flight frame.
#[derive(Debug, Clone)]
pub struct FrameAssembly {
    pub frame_id: u8,
    pub format: u8,
    pub total: u16,
    parts: Vec<Option<Bytes>>,
    declared: Vec<Option<usize>>,
    received: usize,
    default_len: Option<usize>,
    finish_seen: bool,
}

impl FrameAssembly {
    fn new(frame_id: u8, format: u8, total: u16) -> Self {
        Self {
            frame_id,
            format,
            total,
            parts: vec![None; total as usize],
            declared: vec![None; total as usize],
            received: 0,
            default_len: None,
            finish_seen: false,
        }
    }

    pub fn received(&self) -> usize {
        self.received
    }

    pub fn is_complete(&self) -> bool {
        self.received == self.total as usize
    }

    pub fn finish_seen(&self) -> bool {
        self.finish_seen
    }

    /// Concatenate fragments in index order.
    ///
    /// Strict: every fragment must be present with its declared length.
    /// Lenient: a missing fragment becomes zeros, sized by its declared
    /// length, else the first-seen length, else a full chunk.
    pub fn assemble(&self, strict: bool) -> Result<Vec<u8>, NuvoError> {
        let mut out = Vec::with_capacity(self.total as usize * FRAME_CHUNK);
        for (part, declared) in self.parts.iter().zip(&self.declared) {
            match part {
                Some(bytes) => {
                    if strict && declared.is_some_and(|d| d != bytes.len()) {
                        return Err(NuvoError::ProtocolViolation("fragment length mismatch"));
                    }
                    out.extend_from_slice(bytes);
                }
                None if strict => {
                    return Err(NuvoError::ProtocolViolation("missing fragment"));
                }
                None => {
                    let pad = declared.or(self.default_len).unwrap_or(FRAME_CHUNK);
                    out.resize(out.len() + pad, 0);
                }
            }
        }
        Ok(out)
    }
}

// ── FragmentOutcome ──────────────────────────────────────────────

/// What happened to one FRAME datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentOutcome {
    Stored,
    /// Index already held; the first payload stays.
    Duplicate,
    /// A stale assembly with a different shape was dropped for this one.
    Replaced,
    Rejected(&'static str),
}

// ── FrameAssembler ───────────────────────────────────────────────

/// Fixed table of 256 assemblies indexed by frame id.
#[derive(Debug, Clone)]
pub struct FrameAssembler {
    strict: bool,
    slots: Vec<Option<FrameAssembly>>,
}

impl FrameAssembler {
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            slots: vec![None; 256],
        }
    }

    /// Store one FRAME datagram.
    pub fn on_fragment(&mut self, data: &[u8]) -> FragmentOutcome {
        let header = match FragmentHeader::decode(data) {
            Ok(h) => h,
            Err(_) => return FragmentOutcome::Rejected("short fragment"),
        };
        let avail = data.len() - FragmentHeader::SIZE;
        let claimed = header.claimed_len();

        if let Err(reason) = self.validate(&header, avail) {
            debug!(fid = header.frame_id, idx = header.index, reason, "fragment rejected");
            return FragmentOutcome::Rejected(reason);
        }

        let take = claimed.min(avail);
        let payload = Bytes::copy_from_slice(&data[FragmentHeader::SIZE..][..take]);

        let slot = &mut self.slots[header.frame_id as usize];
        let stale = slot
            .as_ref()
            .is_some_and(|asm| asm.format != header.format || asm.total != header.total);
        let mut outcome = FragmentOutcome::Stored;
        if stale {
            if self.strict {
                return FragmentOutcome::Rejected("shape differs from assembly");
            }
            debug!(fid = header.frame_id, "replacing stale assembly");
            *slot = None;
            outcome = FragmentOutcome::Replaced;
        }
        let asm = slot
            .get_or_insert_with(|| FrameAssembly::new(header.frame_id, header.format, header.total));

        let idx = header.index as usize;
        if asm.parts[idx].is_some() {
            return FragmentOutcome::Duplicate;
        }
        asm.parts[idx] = Some(payload);
        asm.declared[idx] = Some(claimed);
        asm.received += 1;
        asm.default_len.get_or_insert(claimed);
        outcome
    }

    /// Record FRAME_FINISH for `frame_id`. Returns whether an assembly
    /// was waiting.
    pub fn on_finish(&mut self, frame_id: u8) -> bool {
        match self.slots[frame_id as usize].as_mut() {
            Some(asm) => {
                asm.finish_seen = true;
                true
            }
            None => false,
        }
    }

    /// Remove the assembly for `frame_id` for a commit attempt.
    pub fn take_for_commit(&mut self, frame_id: u8) -> Option<FrameAssembly> {
        self.slots[frame_id as usize].take()
    }

    pub fn get(&self, frame_id: u8) -> Option<&FrameAssembly> {
        self.slots[frame_id as usize].as_ref()
    }

    /// Number of in-flight assemblies.
    pub fn pending(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    fn validate(&self, h: &FragmentHeader, avail: usize) -> Result<(), &'static str> {
        if h.total == 0 {
            return Err("zero fragment count");
        }
        if h.index >= h.total {
            return Err("fragment index out of range");
        }
        if !self.strict {
            return Ok(());
        }
        if h.format != FormatType::Raw888 as u8 && h.format != FormatType::Jpeg as u8 {
            return Err("format type");
        }
        if h.total > MAX_FRAGMENTS {
            return Err("too many fragments");
        }
        if h.size_code == 0 || h.size_code > MAX_SIZE_CODE {
            return Err("size code out of range");
        }
        if !h.is_last() && h.claimed_len() != FRAME_CHUNK {
            return Err("short non-final fragment");
        }
        if avail < h.claimed_len() {
            return Err("payload shorter than size code");
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
