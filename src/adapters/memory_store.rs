//! In-memory firmware store.
//!
//! Implements [`FirmwareStore`] by keeping the image in RAM. Used by the
//! simulator and by host-side tests; a device build provides a flash-backed
//! store with the same contract.
//!
//! - Resumption: a cancelled transfer keeps its data unless asked to
//!   discard it, and a later start with the same size and SHA-256 picks up
//!   where it left off.
//! - Validation: `VALIDATE_ONLY` checks the image against its SHA-256 when
//!   one was supplied.

use log::{debug, info};

use crate::error::{Error, HostError};
use crate::ota::ports::{FirmwareStore, UpdateFlags};
use crate::ota::SHA256_SIZE;

/// Default image size limit (4 MB).
pub const DEFAULT_MAX_FILE_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug)]
pub struct MemoryStore {
    max_file_size: usize,
    image: Vec<u8>,
    file_hash: Option<[u8; SHA256_SIZE]>,
    partial_size: usize,
    updating: bool,
    validated: bool,
    applied: Option<Vec<u8>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FILE_SIZE)
    }
}

impl MemoryStore {
    pub fn new(max_file_size: usize) -> Self {
        Self {
            max_file_size,
            image: Vec::new(),
            file_hash: None,
            partial_size: 0,
            updating: false,
            validated: false,
            applied: None,
        }
    }

    /// The last image that was applied.
    pub fn applied(&self) -> Option<&[u8]> {
        self.applied.as_deref()
    }

    /// Contiguous bytes received for the current (or suspended) image.
    pub fn partial_size(&self) -> usize {
        self.partial_size
    }

    pub fn is_updating(&self) -> bool {
        self.updating
    }

    fn reset(&mut self, file_size: usize) {
        self.image.clear();
        self.image.resize(file_size, 0);
        self.partial_size = 0;
        self.validated = false;
    }
}

fn host_error(e: Error, message: &str) -> HostError {
    HostError::with_message(e.code(), message)
}

impl FirmwareStore for MemoryStore {
    fn start_update(
        &mut self,
        file_size: usize,
        file_hash: Option<&[u8; SHA256_SIZE]>,
        flags: UpdateFlags,
    ) -> Result<usize, HostError> {
        if file_size > self.max_file_size {
            return Err(host_error(Error::NotAllowed, "Firmware image is too large"));
        }
        let resumable = !flags.contains(UpdateFlags::NON_RESUMABLE)
            && !flags.contains(UpdateFlags::DISCARD_DATA)
            && file_hash.is_some()
            && self.file_hash.as_ref() == file_hash
            && self.image.len() == file_size;
        if !resumable {
            self.reset(file_size);
        }
        self.file_hash = file_hash.copied();
        self.updating = true;
        self.validated = false;
        info!(
            "MEMSTORE: begin ({} bytes, {} already stored)",
            file_size, self.partial_size
        );
        Ok(self.partial_size)
    }

    fn save_chunk(
        &mut self,
        data: &[u8],
        offset: usize,
        partial_size: usize,
    ) -> Result<(), HostError> {
        if !self.updating {
            return Err(host_error(Error::InvalidState, "No update in progress"));
        }
        let dst = self
            .image
            .get_mut(offset..offset + data.len())
            .ok_or_else(|| host_error(Error::InvalidArgument, "Chunk exceeds image size"))?;
        dst.copy_from_slice(data);
        self.partial_size = partial_size.min(self.image.len());
        debug!("MEMSTORE: {} bytes at {}", data.len(), offset);
        Ok(())
    }

    fn finish_update(&mut self, flags: UpdateFlags) -> Result<(), HostError> {
        if flags.contains(UpdateFlags::CANCEL) {
            self.updating = false;
            self.validated = false;
            if flags.contains(UpdateFlags::DISCARD_DATA) || self.file_hash.is_none() {
                self.reset(0);
                self.file_hash = None;
            }
            info!("MEMSTORE: cancelled ({} bytes kept)", self.partial_size);
            return Ok(());
        }
        if !self.updating {
            return Err(host_error(Error::InvalidState, "No update in progress"));
        }
        if flags.contains(UpdateFlags::VALIDATE_ONLY) {
            if self.partial_size < self.image.len() {
                return Err(host_error(Error::InvalidState, "Firmware image is incomplete"));
            }
            if let Some(expected) = self.file_hash {
                if hmac_sha256::Hash::hash(&self.image) != expected {
                    return Err(host_error(Error::BadData, "Invalid firmware hash"));
                }
            }
            self.validated = true;
            return Ok(());
        }
        if !self.validated {
            return Err(host_error(Error::InvalidState, "Firmware image is not validated"));
        }
        self.applied = Some(core::mem::take(&mut self.image));
        self.updating = false;
        self.validated = false;
        self.partial_size = 0;
        self.file_hash = None;
        info!("MEMSTORE: image applied");
        Ok(())
    }
}
