//! Resumable, windowed firmware transfer over CoAP.
//!
//! Flow: UpdateStart → N × UpdateChunk (acked by UpdateAck) → UpdateFinish
//!       → peer ACKs the Finish response → image applied
//!
//! ```text
//!   server                                device
//!     │── CON POST /S  (size, chunk, sha) ──▶│  start_update()
//!     │◀─ ACK ───────────────────────────────│
//!     │◀─ CON 2.01 (window, partial) ────────│
//!     │── NON POST /C  (index, data) ───────▶│  save_chunk()
//!     │◀─ NON POST /A  (index, sack) ────────│
//!     │── CON POST /F ──────────────────────▶│  finish_update(VALIDATE_ONLY)
//!     │◀─ ACK, CON 2.04 ─────────────────────│
//!     │── ACK ──────────────────────────────▶│  finish_update(0)
//! ```

pub mod diagnostic;
pub mod engine;
pub mod ports;
pub mod request;
pub mod window;

pub use engine::{FirmwareUpdate, TransferStats, UpdateState};
pub use ports::{Clock, FirmwareStore, UpdateFlags};
pub use request::MessageKind;

/// Vendor option numbers carried by OTA messages.
pub mod option {
    pub const CHUNK_INDEX: u32 = 2049;
    pub const WINDOW_SIZE: u32 = 2053;
    pub const FILE_SIZE: u32 = 2057;
    pub const FILE_SHA256: u32 = 2061;
    pub const CHUNK_SIZE: u32 = 2065;
    pub const DISCARD_DATA: u32 = 2069;
    pub const CANCEL_UPDATE: u32 = 2073;
}

/// Single-segment URI paths of the OTA resources.
pub mod path {
    pub const START: &str = "S";
    pub const CHUNK: &str = "C";
    pub const FINISH: &str = "F";
    pub const ACK: &str = "A";
}

/// Length of a SHA-256 digest.
pub const SHA256_SIZE: usize = 32;
