//! OTA transfer configuration parameters
//!
//! Tunables for the firmware update engine. The host may persist them
//! (JSON or postcard) and hand them back on boot; they are validated once
//! when the engine is constructed.

use serde::{Deserialize, Serialize};

use crate::ota::window::MAX_WINDOW_CHUNKS;

/// Firmware transfer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OtaConfig {
    /// Bytes the device accepts ahead of the contiguous partial size
    pub receive_window_size: usize,
    /// Smallest chunk size a server may request
    pub min_chunk_size: usize,
    /// Largest chunk size a server may request
    pub max_chunk_size: usize,
    /// Delay before acknowledging a lone in-order chunk (milliseconds)
    pub chunk_ack_delay_ms: u64,
    /// Inactivity period after which a transfer is cancelled (milliseconds)
    pub transfer_timeout_ms: u64,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            receive_window_size: 32 * 1024,
            min_chunk_size: 256,
            max_chunk_size: 1024,
            chunk_ack_delay_ms: 300,
            transfer_timeout_ms: 60_000,
        }
    }
}

impl OtaConfig {
    /// Reject values the engine cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.receive_window_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "receive_window_size must be non-zero",
            ));
        }
        if self.min_chunk_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "min_chunk_size must be non-zero",
            ));
        }
        if self.min_chunk_size > self.max_chunk_size {
            return Err(ConfigError::ValidationFailed(
                "min_chunk_size exceeds max_chunk_size",
            ));
        }
        if self.receive_window_size < self.max_chunk_size {
            return Err(ConfigError::ValidationFailed(
                "receive_window_size is smaller than one chunk",
            ));
        }
        if self.receive_window_size / self.min_chunk_size > MAX_WINDOW_CHUNKS {
            return Err(ConfigError::ValidationFailed(
                "receive_window_size exceeds window bitmap capacity",
            ));
        }
        if self.transfer_timeout_ms <= self.chunk_ack_delay_ms {
            return Err(ConfigError::ValidationFailed(
                "transfer_timeout_ms must exceed chunk_ack_delay_ms",
            ));
        }
        Ok(())
    }

    /// Number of chunks the receive window holds at the given chunk size.
    pub fn window_chunks(&self, chunk_size: usize) -> usize {
        (self.receive_window_size / chunk_size.max(1)).clamp(1, MAX_WINDOW_CHUNKS)
    }
}

/// Configuration rejected by [`OtaConfig::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// A field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for crate::error::Error {
    fn from(_: ConfigError) -> Self {
        Self::InvalidArgument
    }
}
