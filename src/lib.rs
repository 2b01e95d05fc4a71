//! Device cloud link library.
//!
//! A CoAP (RFC 7252) message codec and a resumable, windowed firmware
//! transfer engine built on it. The engine is single-threaded and
//! non-blocking; platform concerns enter through the traits in
//! [`ota::ports`] and [`channel`].

#![deny(unused_must_use)]

pub mod adapters;
pub mod channel;
pub mod coap;
pub mod config;
pub mod error;
pub mod ota;

pub use error::{Error, HostError, Result};
