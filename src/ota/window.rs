//! Receive window: which chunks ahead of the contiguous prefix have
//! already arrived.
//!
//! A fixed ring of bits with one slot per window position. Chunk `i`
//! lives in slot `i mod size`; only indices in `(base, base + size]` are
//! ever stored, so no two live chunks share a slot.

use crate::error::{Error, Result};

/// Largest window, in chunks, the bitmap can track.
pub const MAX_WINDOW_CHUNKS: usize = 128;

const WORDS: usize = MAX_WINDOW_CHUNKS / 32;

#[derive(Debug, Clone)]
pub struct ReceiveWindow {
    bits: [u32; WORDS],
    /// Number of chunks received contiguously from the start.
    base: u32,
    size: u32,
    /// Chunks buffered ahead of `base`.
    pending: u32,
}

impl ReceiveWindow {
    /// Window of `size` chunks (clamped to `1..=MAX_WINDOW_CHUNKS`) whose
    /// first `base` chunks are already complete.
    pub fn new(base: u32, size: usize) -> Self {
        Self {
            bits: [0; WORDS],
            base,
            size: size.clamp(1, MAX_WINDOW_CHUNKS) as u32,
            pending: 0,
        }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn pending(&self) -> u32 {
        self.pending
    }

    pub fn has_gaps(&self) -> bool {
        self.pending > 0
    }

    /// `index` is ahead of the prefix and within the window.
    pub fn in_range(&self, index: u32) -> bool {
        index > self.base && index - self.base <= self.size
    }

    /// `index` was received, either as part of the prefix or buffered.
    pub fn is_received(&self, index: u32) -> bool {
        index <= self.base || (self.in_range(index) && self.test(index))
    }

    /// Record an out-of-order chunk. Returns `false` if `index` lies
    /// outside the window.
    pub fn mark(&mut self, index: u32) -> bool {
        if !self.in_range(index) {
            return false;
        }
        if !self.test(index) {
            self.set(index, true);
            self.pending += 1;
        }
        true
    }

    /// Length of the run of buffered chunks that starts right after
    /// `index`.
    pub fn run_after(&self, index: u32) -> u32 {
        let mut n = 0;
        let mut next = index + 1;
        while self.in_range(next) && self.test(next) {
            n += 1;
            next += 1;
        }
        n
    }

    /// Accept chunk `base + 1` and absorb any buffered chunks that now
    /// follow the prefix. Returns the new base.
    pub fn advance(&mut self) -> u32 {
        let next = self.base + 1;
        if self.test(next) {
            self.set(next, false);
            self.pending -= 1;
        }
        self.base = next;
        loop {
            let next = self.base + 1;
            if !self.test(next) {
                break;
            }
            self.set(next, false);
            self.pending -= 1;
            self.base = next;
        }
        self.base
    }

    /// Bytes needed for the selective ack bitmap; 0 without gaps.
    pub fn sack_len(&self) -> usize {
        match self.highest_offset() {
            Some(rel) => (rel as usize / 32 + 1) * 4,
            None => 0,
        }
    }

    /// Write the selective ack bitmap: little-endian 32-bit words where
    /// bit `k` of word `w` stands for chunk `base + 32 * w + k + 1`.
    pub fn write_sack(&self, out: &mut [u8]) -> Result<usize> {
        let len = self.sack_len();
        let out = out.get_mut(..len).ok_or(Error::NoMemory)?;
        let mut words = [0u32; WORDS];
        for rel in 0..self.size {
            if self.test(self.base + 1 + rel) {
                words[(rel / 32) as usize] |= 1 << (rel % 32);
            }
        }
        for (dst, word) in out.chunks_exact_mut(4).zip(words) {
            dst.copy_from_slice(&word.to_le_bytes());
        }
        Ok(len)
    }

    // ── Bit ring ─────────────────────────────────────────────

    fn highest_offset(&self) -> Option<u32> {
        if self.pending == 0 {
            return None;
        }
        (0..self.size)
            .rev()
            .find(|&rel| self.test(self.base + 1 + rel))
    }

    fn slot(&self, index: u32) -> (usize, u32) {
        let slot = index % self.size;
        ((slot / 32) as usize, 1 << (slot % 32))
    }

    fn test(&self, index: u32) -> bool {
        let (word, mask) = self.slot(index);
        self.bits[word] & mask != 0
    }

    fn set(&mut self, index: u32, on: bool) {
        let (word, mask) = self.slot(index);
        if on {
            self.bits[word] |= mask;
        } else {
            self.bits[word] &= !mask;
        }
    }
}
