//! Unified error types for the device cloud link.
//!
//! A single `Error` enum that the codec, the channel and the OTA engine all
//! return. Every variant is `Copy` so errors pass through the request
//! handlers without allocation, and each maps to a stable negative system
//! error code that is reported to the server in diagnostic payloads.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Wire data is malformed.
    BadData,
    /// Wire data ends before a field is complete.
    NotEnoughData,
    /// A caller-supplied argument is out of range.
    InvalidArgument,
    /// Operation is not valid in the current state.
    InvalidState,
    /// A buffer could not be obtained or is too small.
    NoMemory,
    /// The transfer saw no activity within the configured timeout.
    Timeout,
    /// The host refused the operation.
    NotAllowed,
    /// The peer violated the OTA protocol.
    Protocol,
    /// The message channel failed to deliver a message.
    Channel,
    /// A host callback failed with its own error code.
    Host(i32),
}

impl Error {
    /// Numeric system error code for this error.
    pub const fn code(self) -> i32 {
        match self {
            Self::NotAllowed => -130,
            Self::Timeout => -160,
            Self::NotEnoughData => -191,
            Self::InvalidState => -210,
            Self::Channel => -230,
            Self::NoMemory => -260,
            Self::Protocol => -270,
            Self::InvalidArgument => -290,
            Self::BadData => -300,
            Self::Host(code) => code,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadData => write!(f, "invalid data format"),
            Self::NotEnoughData => write!(f, "not enough data"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::InvalidState => write!(f, "invalid state"),
            Self::NoMemory => write!(f, "memory allocation error"),
            Self::Timeout => write!(f, "operation timed out"),
            Self::NotAllowed => write!(f, "operation not allowed"),
            Self::Protocol => write!(f, "protocol error"),
            Self::Channel => write!(f, "message channel error"),
            Self::Host(code) => write!(f, "host error {code}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Host callback errors
// ---------------------------------------------------------------------------

/// Capacity of the human-readable message attached to a host error.
pub const HOST_MESSAGE_CAPACITY: usize = 96;

/// Error returned by a [`FirmwareStore`](crate::ota::ports::FirmwareStore)
/// callback. The message, if any, is forwarded verbatim to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostError {
    pub code: i32,
    pub message: Option<heapless::String<HOST_MESSAGE_CAPACITY>>,
}

impl HostError {
    pub fn new(code: i32) -> Self {
        Self {
            code,
            message: None,
        }
    }

    /// Attach a message, truncated to [`HOST_MESSAGE_CAPACITY`] on a char
    /// boundary.
    pub fn with_message(code: i32, message: &str) -> Self {
        let mut end = message.len().min(HOST_MESSAGE_CAPACITY);
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        let mut m = heapless::String::new();
        let _ = m.push_str(&message[..end]);
        Self {
            code,
            message: Some(m),
        }
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl From<Error> for HostError {
    fn from(e: Error) -> Self {
        Self::new(e.code())
    }
}

impl From<HostError> for Error {
    fn from(e: HostError) -> Self {
        Self::Host(e.code)
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(msg) => write!(f, "{msg} ({})", self.code),
            None => write!(f, "host error {}", self.code),
        }
    }
}

impl std::error::Error for HostError {}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
