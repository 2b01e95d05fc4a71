//! Zero-copy CoAP message decoder.
//!
//! `decode` validates the whole message up front, so iterating options
//! afterwards cannot fail. Header fields and the token are copied out;
//! options and payload stay borrowed from the source buffer and cannot
//! outlive it.

use core::iter::FusedIterator;

use super::{CoapCode, CoapType, COAP_VERSION, HEADER_SIZE, MAX_TOKEN_SIZE, PAYLOAD_MARKER};
use crate::error::{Error, Result};

/// A decoded CoAP message.
#[derive(Debug, Clone)]
pub struct CoapMessageDecoder<'a> {
    ty: CoapType,
    code: CoapCode,
    id: u16,
    token: heapless::Vec<u8, MAX_TOKEN_SIZE>,
    options: &'a [u8],
    payload: Option<&'a [u8]>,
    size: usize,
}

impl<'a> CoapMessageDecoder<'a> {
    /// Parse `data` as a single CoAP message.
    pub fn decode(data: &'a [u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::NotEnoughData);
        }
        let b0 = data[0];
        if b0 >> 6 != COAP_VERSION {
            return Err(Error::BadData);
        }
        let ty = CoapType::from_bits(b0 >> 4);
        let token_len = (b0 & 0x0f) as usize;
        if token_len > MAX_TOKEN_SIZE {
            return Err(Error::BadData);
        }
        let code = CoapCode::from_u8(data[1]);
        if !code.is_valid() {
            return Err(Error::BadData);
        }
        let id = u16::from_be_bytes([data[2], data[3]]);

        let mut pos = HEADER_SIZE;
        let token_bytes = data
            .get(pos..pos + token_len)
            .ok_or(Error::NotEnoughData)?;
        let mut token = heapless::Vec::new();
        token
            .extend_from_slice(token_bytes)
            .map_err(|_| Error::BadData)?;
        pos += token_len;

        let options_start = pos;
        let mut number = 0u32;
        while pos < data.len() && data[pos] != PAYLOAD_MARKER {
            let raw = parse_option(&data[pos..])?;
            number = number.checked_add(raw.delta).ok_or(Error::BadData)?;
            pos += raw.size;
        }
        let options = &data[options_start..pos];

        let mut payload = None;
        if pos < data.len() {
            pos += 1; // marker
            if pos < data.len() {
                payload = Some(&data[pos..]);
            }
        }

        Ok(Self {
            ty,
            code,
            id,
            token,
            options,
            payload,
            size: data.len(),
        })
    }

    /// Number of bytes consumed from the source buffer.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn message_type(&self) -> CoapType {
        self.ty
    }

    pub fn code(&self) -> CoapCode {
        self.code
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn has_token(&self) -> bool {
        !self.token.is_empty()
    }

    pub fn token(&self) -> &[u8] {
        &self.token
    }

    pub fn has_options(&self) -> bool {
        !self.options.is_empty()
    }

    /// A fresh iterator over all options, in wire order.
    pub fn options(&self) -> CoapOptionIterator<'a> {
        CoapOptionIterator::new(self.options)
    }

    /// First option with the given number.
    pub fn find_option(&self, number: u32) -> Option<CoapOption<'a>> {
        self.options()
            .take_while(|opt| opt.number <= number)
            .find(|opt| opt.number == number)
    }

    pub fn has_option(&self, number: u32) -> bool {
        self.find_option(number).is_some()
    }

    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }

    /// Payload bytes; empty when the message carries no payload.
    pub fn payload(&self) -> &'a [u8] {
        self.payload.unwrap_or(&[])
    }
}

// ── Options ───────────────────────────────────────────────────

/// One option: its absolute number and a view of its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoapOption<'a> {
    pub number: u32,
    pub data: &'a [u8],
}

impl<'a> CoapOption<'a> {
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Big-endian unsigned value of up to 4 bytes. Longer values yield 0.
    pub fn to_uint(&self) -> u32 {
        if self.data.len() > 4 {
            return 0;
        }
        self.data
            .iter()
            .fold(0u32, |acc, &b| (acc << 8) | u32::from(b))
    }

    /// Value as UTF-8, if it is valid.
    pub fn as_str(&self) -> Option<&'a str> {
        core::str::from_utf8(self.data).ok()
    }
}

/// Forward-only iterator over the options of a decoded message.
///
/// Once exhausted it keeps returning `None`; call
/// [`CoapMessageDecoder::options`] again to start over.
#[derive(Debug, Clone, Default)]
pub struct CoapOptionIterator<'a> {
    data: &'a [u8],
    number: u32,
}

impl<'a> CoapOptionIterator<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, number: 0 }
    }
}

impl<'a> Iterator for CoapOptionIterator<'a> {
    type Item = CoapOption<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() || self.data[0] == PAYLOAD_MARKER {
            return None;
        }
        // The region was validated by `decode`; a failure here means the
        // iterator was built over foreign bytes, so stop rather than panic.
        let Ok(raw) = parse_option(self.data) else {
            self.data = &[];
            return None;
        };
        self.number = self.number.saturating_add(raw.delta);
        let value = &self.data[raw.value_offset..raw.size];
        self.data = &self.data[raw.size..];
        Some(CoapOption {
            number: self.number,
            data: value,
        })
    }
}

impl FusedIterator for CoapOptionIterator<'_> {}

// ── Wire parsing ──────────────────────────────────────────────

struct RawOption {
    delta: u32,
    value_offset: usize,
    size: usize,
}

fn parse_option(data: &[u8]) -> Result<RawOption> {
    let first = *data.first().ok_or(Error::NotEnoughData)?;
    let mut pos = 1;
    let delta = read_extended(first >> 4, data, &mut pos)?;
    let len = read_extended(first & 0x0f, data, &mut pos)? as usize;
    if data.len() - pos < len {
        return Err(Error::NotEnoughData);
    }
    Ok(RawOption {
        delta,
        value_offset: pos,
        size: pos + len,
    })
}

fn read_extended(nibble: u8, data: &[u8], pos: &mut usize) -> Result<u32> {
    match nibble {
        0..=12 => Ok(u32::from(nibble)),
        13 => {
            let b = *data.get(*pos).ok_or(Error::NotEnoughData)?;
            *pos += 1;
            Ok(u32::from(b) + 13)
        }
        14 => {
            let b = data.get(*pos..*pos + 2).ok_or(Error::NotEnoughData)?;
            *pos += 2;
            Ok(u32::from(u16::from_be_bytes([b[0], b[1]])) + 269)
        }
        _ => Err(Error::BadData),
    }
}
