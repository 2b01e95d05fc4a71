//! Port traits: the boundary between the transfer engine and the platform.
//!
//! ```text
//!   FirmwareUpdate ──▶ FirmwareStore (flash / RAM)
//!                  ──▶ Clock         (monotonic ms)
//! ```
//!
//! Both are injected at construction; the engine never reaches for
//! globals.

use core::ops::{BitOr, BitOrAssign};

use crate::error::HostError;

use super::SHA256_SIZE;

// ───────────────────────────────────────────────────────────────
// Update flags
// ───────────────────────────────────────────────────────────────

/// Flags passed to [`FirmwareStore`] callbacks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct UpdateFlags(u8);

impl UpdateFlags {
    /// No hash was supplied; previously received data cannot be reused.
    pub const NON_RESUMABLE: Self = Self(0x01);
    /// Drop any data kept for resumption.
    pub const DISCARD_DATA: Self = Self(0x02);
    /// Abort the update.
    pub const CANCEL: Self = Self(0x04);
    /// Validate the received image without applying it.
    pub const VALIDATE_ONLY: Self = Self(0x08);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0x0f)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for UpdateFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for UpdateFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

// ───────────────────────────────────────────────────────────────
// Firmware store (driven adapter: engine → flash)
// ───────────────────────────────────────────────────────────────

/// Receives the firmware image.
pub trait FirmwareStore {
    /// Prepare for an image of `file_size` bytes.
    ///
    /// Returns the number of bytes already stored from a previous attempt
    /// with the same `file_hash`; 0 when nothing can be reused. The
    /// transfer resumes at the last chunk boundary at or below this count.
    fn start_update(
        &mut self,
        file_size: usize,
        file_hash: Option<&[u8; SHA256_SIZE]>,
        flags: UpdateFlags,
    ) -> Result<usize, HostError>;

    /// Store `data` at `offset`. `partial_size` is the contiguous length
    /// received from offset 0 once this chunk is accounted for.
    fn save_chunk(
        &mut self,
        data: &[u8],
        offset: usize,
        partial_size: usize,
    ) -> Result<(), HostError>;

    /// `CANCEL` aborts, `VALIDATE_ONLY` checks the image, no flags applies it.
    fn finish_update(&mut self, flags: UpdateFlags) -> Result<(), HostError>;
}

impl<T: FirmwareStore + ?Sized> FirmwareStore for &mut T {
    fn start_update(
        &mut self,
        file_size: usize,
        file_hash: Option<&[u8; SHA256_SIZE]>,
        flags: UpdateFlags,
    ) -> Result<usize, HostError> {
        (**self).start_update(file_size, file_hash, flags)
    }

    fn save_chunk(
        &mut self,
        data: &[u8],
        offset: usize,
        partial_size: usize,
    ) -> Result<(), HostError> {
        (**self).save_chunk(data, offset, partial_size)
    }

    fn finish_update(&mut self, flags: UpdateFlags) -> Result<(), HostError> {
        (**self).finish_update(flags)
    }
}

impl<T: FirmwareStore + ?Sized> FirmwareStore for Box<T> {
    fn start_update(
        &mut self,
        file_size: usize,
        file_hash: Option<&[u8; SHA256_SIZE]>,
        flags: UpdateFlags,
    ) -> Result<usize, HostError> {
        (**self).start_update(file_size, file_hash, flags)
    }

    fn save_chunk(
        &mut self,
        data: &[u8],
        offset: usize,
        partial_size: usize,
    ) -> Result<(), HostError> {
        (**self).save_chunk(data, offset, partial_size)
    }

    fn finish_update(&mut self, flags: UpdateFlags) -> Result<(), HostError> {
        (**self).finish_update(flags)
    }
}

// ───────────────────────────────────────────────────────────────
// Clock (driven adapter: engine → timer)
// ───────────────────────────────────────────────────────────────

/// Monotonic millisecond clock.
pub trait Clock {
    fn millis(&self) -> u64;
}

impl<T: Clock + ?Sized> Clock for &T {
    fn millis(&self) -> u64 {
        (**self).millis()
    }
}

impl<T: Clock + ?Sized> Clock for std::rc::Rc<T> {
    fn millis(&self) -> u64 {
        (**self).millis()
    }
}
