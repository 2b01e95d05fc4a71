//! CoAP (RFC 7252) message codec.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! ┌───┬───┬───────┬───────────────┬───────────────────────────────┐
//! │Ver│ T │  TKL  │     Code      │          Message ID           │
//! ├───┴───┴───────┴───────────────┴───────────────────────────────┤
//! │   Token (0-8 bytes) ...                                       │
//! ├───────────────────────────────────────────────────────────────┤
//! │   Options (delta/length nibbles, 13/14 extended forms) ...    │
//! ├───────────────┬───────────────────────────────────────────────┤
//! │1 1 1 1 1 1 1 1│   Payload ...                                 │
//! └───────────────┴───────────────────────────────────────────────┘
//! ```
//!
//! The decoder borrows the source buffer; the encoder writes into a
//! caller-supplied buffer and only ever reports the length it needed.

pub mod decoder;
pub mod encoder;
pub mod message;

pub use decoder::{CoapMessageDecoder, CoapOption, CoapOptionIterator};
pub use encoder::CoapMessageEncoder;
pub use message::Message;

/// Protocol version carried in every header.
pub const COAP_VERSION: u8 = 1;

/// Fixed header size.
pub const HEADER_SIZE: usize = 4;

/// Maximum token length.
pub const MAX_TOKEN_SIZE: usize = 8;

/// Byte separating the options from the payload.
pub const PAYLOAD_MARKER: u8 = 0xff;

/// Largest value representable with the 2-byte extended nibble form
/// (14 + 0xFFFF + 269 - 14).
pub const MAX_OPTION_DELTA: u32 = 65804;

/// Largest option value length representable on the wire.
pub const MAX_OPTION_SIZE: usize = 65804;

// ── Message type ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CoapType {
    Con = 0,
    Non = 1,
    Ack = 2,
    Rst = 3,
}

impl CoapType {
    /// Map the 2-bit header field. Every pattern is valid.
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Self::Con,
            1 => Self::Non,
            2 => Self::Ack,
            _ => Self::Rst,
        }
    }

    pub const fn bits(self) -> u8 {
        self as u8
    }
}

// ── Message code ──────────────────────────────────────────────

/// Method or response code, `class.detail` packed into one byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoapCode(u8);

impl CoapCode {
    pub const EMPTY: Self = Self::new(0, 0);
    pub const GET: Self = Self::new(0, 1);
    pub const POST: Self = Self::new(0, 2);
    pub const PUT: Self = Self::new(0, 3);
    pub const DELETE: Self = Self::new(0, 4);
    pub const CREATED: Self = Self::new(2, 1);
    pub const DELETED: Self = Self::new(2, 2);
    pub const VALID: Self = Self::new(2, 3);
    pub const CHANGED: Self = Self::new(2, 4);
    pub const CONTENT: Self = Self::new(2, 5);
    pub const BAD_REQUEST: Self = Self::new(4, 0);
    pub const UNAUTHORIZED: Self = Self::new(4, 1);
    pub const BAD_OPTION: Self = Self::new(4, 2);
    pub const FORBIDDEN: Self = Self::new(4, 3);
    pub const NOT_FOUND: Self = Self::new(4, 4);
    pub const METHOD_NOT_ALLOWED: Self = Self::new(4, 5);
    pub const NOT_ACCEPTABLE: Self = Self::new(4, 6);
    pub const PRECONDITION_FAILED: Self = Self::new(4, 12);
    pub const REQUEST_ENTITY_TOO_LARGE: Self = Self::new(4, 13);
    pub const UNSUPPORTED_CONTENT_FORMAT: Self = Self::new(4, 15);
    pub const INTERNAL_SERVER_ERROR: Self = Self::new(5, 0);
    pub const NOT_IMPLEMENTED: Self = Self::new(5, 1);
    pub const BAD_GATEWAY: Self = Self::new(5, 2);
    pub const SERVICE_UNAVAILABLE: Self = Self::new(5, 3);
    pub const GATEWAY_TIMEOUT: Self = Self::new(5, 4);
    pub const PROXYING_NOT_SUPPORTED: Self = Self::new(5, 5);

    pub const fn new(class: u8, detail: u8) -> Self {
        Self(((class & 0x07) << 5) | (detail & 0x1f))
    }

    pub const fn from_u8(raw: u8) -> Self {
        Self(raw)
    }

    pub const fn as_u8(self) -> u8 {
        self.0
    }

    pub const fn class(self) -> u8 {
        self.0 >> 5
    }

    pub const fn detail(self) -> u8 {
        self.0 & 0x1f
    }

    /// Only classes 0 (method), 2 (success), 4 (client error) and 5
    /// (server error) are accepted on the wire.
    pub const fn is_valid(self) -> bool {
        matches!(self.class(), 0 | 2 | 4 | 5)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn is_request(self) -> bool {
        self.class() == 0 && self.detail() != 0
    }

    pub const fn is_response(self) -> bool {
        matches!(self.class(), 2 | 4 | 5)
    }

    pub const fn is_success(self) -> bool {
        self.class() == 2
    }
}

impl core::fmt::Display for CoapCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{:02}", self.class(), self.detail())
    }
}

/// Whether a message of this type and code is a request.
pub const fn is_request(ty: CoapType, code: CoapCode) -> bool {
    matches!(ty, CoapType::Con | CoapType::Non) && code.is_request()
}

// ── Standard option numbers ───────────────────────────────────

/// Option numbers from the RFC 7252 registry used by this stack.
pub mod option {
    pub const IF_MATCH: u32 = 1;
    pub const URI_HOST: u32 = 3;
    pub const ETAG: u32 = 4;
    pub const IF_NONE_MATCH: u32 = 5;
    pub const URI_PORT: u32 = 7;
    pub const LOCATION_PATH: u32 = 8;
    pub const URI_PATH: u32 = 11;
    pub const CONTENT_FORMAT: u32 = 12;
    pub const MAX_AGE: u32 = 14;
    pub const URI_QUERY: u32 = 15;
    pub const ACCEPT: u32 = 17;
    pub const LOCATION_QUERY: u32 = 20;
    pub const PROXY_URI: u32 = 35;
    pub const PROXY_SCHEME: u32 = 39;
    pub const SIZE1: u32 = 60;
}

/// Content formats used in diagnostic payloads.
pub mod content_format {
    pub const TEXT_PLAIN: u32 = 0;
    pub const OCTET_STREAM: u32 = 42;
    pub const JSON: u32 = 50;
    pub const CBOR: u32 = 60;
}
