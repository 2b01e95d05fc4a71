//! CoAP message encoder.
//!
//! Fields must be written in wire order: type, code, id, token, options
//! (non-decreasing numbers), payload. The first misuse is latched and
//! every later call becomes a no-op, so a chain of calls needs a single
//! check at [`CoapMessageEncoder::encode`].
//!
//! The destination may be smaller than the message (even empty). Bytes
//! that do not fit are dropped, but the full length is still counted and
//! returned so the caller can detect truncation or size a second buffer.

use super::{
    CoapCode, CoapType, COAP_VERSION, HEADER_SIZE, MAX_OPTION_DELTA, MAX_OPTION_SIZE,
    MAX_TOKEN_SIZE, PAYLOAD_MARKER,
};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Stage {
    Start,
    Type,
    Code,
    Id,
    Token,
    Options,
    Payload,
}

pub struct CoapMessageEncoder<'a> {
    buf: &'a mut [u8],
    len: usize,
    stage: Stage,
    prev_option: u32,
    error: Option<Error>,
}

impl<'a> CoapMessageEncoder<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            len: 0,
            stage: Stage::Start,
            prev_option: 0,
            error: None,
        }
    }

    /// Message type. Must be the first call; writes the fixed header with
    /// a zero code, id and token length.
    pub fn message_type(&mut self, ty: CoapType) -> &mut Self {
        if self.advance(Stage::Type) {
            self.write(&[(COAP_VERSION << 6) | (ty.bits() << 4), 0, 0, 0]);
        }
        self
    }

    pub fn code(&mut self, code: CoapCode) -> &mut Self {
        if self.advance(Stage::Code) {
            self.write_at(1, code.as_u8());
        }
        self
    }

    pub fn id(&mut self, id: u16) -> &mut Self {
        if self.advance(Stage::Id) {
            let [hi, lo] = id.to_be_bytes();
            self.write_at(2, hi);
            self.write_at(3, lo);
        }
        self
    }

    /// Token of up to 8 bytes. An empty token is allowed.
    pub fn token(&mut self, token: &[u8]) -> &mut Self {
        if token.len() > MAX_TOKEN_SIZE {
            self.fail(Error::InvalidArgument);
            return self;
        }
        if self.advance(Stage::Token) {
            if let Some(b0) = self.buf.first_mut() {
                *b0 = (*b0 & 0xf0) | token.len() as u8;
            }
            self.write(token);
        }
        self
    }

    /// Opaque option value. Repeated numbers are allowed; decreasing
    /// numbers are not.
    pub fn option(&mut self, number: u32, data: &[u8]) -> &mut Self {
        if self.error.is_some() {
            return self;
        }
        if self.stage < Stage::Type || self.stage > Stage::Options {
            self.fail(Error::InvalidState);
            return self;
        }
        if number < self.prev_option {
            self.fail(Error::InvalidState);
            return self;
        }
        let delta = number - self.prev_option;
        if delta > MAX_OPTION_DELTA || data.len() > MAX_OPTION_SIZE {
            self.fail(Error::InvalidArgument);
            return self;
        }

        let (delta_nibble, delta_ext, delta_ext_len) = extended(delta);
        let (len_nibble, len_ext, len_ext_len) = extended(data.len() as u32);
        self.write(&[(delta_nibble << 4) | len_nibble]);
        self.write(&delta_ext[..delta_ext_len]);
        self.write(&len_ext[..len_ext_len]);
        self.write(data);

        self.stage = Stage::Options;
        self.prev_option = number;
        self
    }

    pub fn option_empty(&mut self, number: u32) -> &mut Self {
        self.option(number, &[])
    }

    pub fn option_str(&mut self, number: u32, value: &str) -> &mut Self {
        self.option(number, value.as_bytes())
    }

    /// Unsigned option value in its shortest form: 0, 1, 2 or 4 bytes.
    pub fn option_uint(&mut self, number: u32, value: u32) -> &mut Self {
        let bytes = value.to_be_bytes();
        let len = match value {
            0 => 0,
            1..=0xff => 1,
            0x100..=0xffff => 2,
            _ => 4,
        };
        self.option(number, &bytes[4 - len..])
    }

    /// Copy `data` in as the payload. An empty payload emits no marker.
    pub fn payload(&mut self, data: &[u8]) -> &mut Self {
        if self.advance(Stage::Payload) && !data.is_empty() {
            self.write(&[PAYLOAD_MARKER]);
            self.write(data);
        }
        self
    }

    /// Bytes available for an in-place payload after the marker.
    pub fn max_payload_size(&self) -> usize {
        self.buf.len().saturating_sub(self.len + 1)
    }

    /// Destination for an in-place payload; empty when nothing fits.
    /// Commit what was written with [`payload_size`](Self::payload_size).
    pub fn payload_data(&mut self) -> &mut [u8] {
        let start = (self.len + 1).min(self.buf.len());
        &mut self.buf[start..]
    }

    /// Commit `size` payload bytes already placed via
    /// [`payload_data`](Self::payload_data).
    pub fn payload_size(&mut self, size: usize) -> &mut Self {
        if self.advance(Stage::Payload) && size > 0 {
            self.write(&[PAYLOAD_MARKER]);
            self.len += size;
        }
        self
    }

    /// Total message length, or the first error recorded.
    ///
    /// The length may exceed the destination buffer; nothing past its end
    /// was written in that case.
    pub fn encode(&self) -> Result<usize> {
        if let Some(e) = self.error {
            return Err(e);
        }
        if self.stage < Stage::Type {
            return Err(Error::InvalidState);
        }
        debug_assert!(self.len >= HEADER_SIZE);
        Ok(self.len)
    }

    // ── Internals ────────────────────────────────────────────

    /// Move to `next` if it is strictly after the current stage.
    fn advance(&mut self, next: Stage) -> bool {
        if self.error.is_some() {
            return false;
        }
        let ordered = if next == Stage::Type {
            self.stage == Stage::Start
        } else {
            self.stage >= Stage::Type && self.stage < next
        };
        if !ordered {
            self.fail(Error::InvalidState);
            return false;
        }
        self.stage = next;
        true
    }

    fn fail(&mut self, e: Error) {
        if self.error.is_none() {
            self.error = Some(e);
        }
    }

    fn write(&mut self, bytes: &[u8]) {
        if self.len < self.buf.len() {
            let n = bytes.len().min(self.buf.len() - self.len);
            self.buf[self.len..self.len + n].copy_from_slice(&bytes[..n]);
        }
        self.len += bytes.len();
    }

    fn write_at(&mut self, pos: usize, b: u8) {
        if let Some(slot) = self.buf.get_mut(pos) {
            *slot = b;
        }
    }
}

/// Nibble plus extended bytes for an option delta or length.
fn extended(value: u32) -> (u8, [u8; 2], usize) {
    match value {
        0..=12 => (value as u8, [0; 2], 0),
        13..=268 => (13, [(value - 13) as u8, 0], 1),
        _ => (14, ((value - 269) as u16).to_be_bytes(), 2),
    }
}
