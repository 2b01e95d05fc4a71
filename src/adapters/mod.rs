//! Adapters — concrete implementations of the OTA port traits.
//!
//! | Adapter        | Implements     | Connects to              |
//! |----------------|----------------|--------------------------|
//! | `memory_store` | FirmwareStore  | RAM image (host / sim)   |
//! | `time`         | Clock          | `std::time::Instant`     |
//! |                |                | manual (deterministic)   |

pub mod memory_store;
pub mod time;
