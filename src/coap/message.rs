//! Fixed-capacity message buffer handed between the engine and a channel.

use super::{CoapMessageDecoder, CoapType, HEADER_SIZE};
use crate::error::{Error, Result};

/// Largest datagram a [`Message`] can hold.
pub const MAX_MESSAGE_SIZE: usize = 1280;

#[derive(Clone)]
pub struct Message {
    buf: [u8; MAX_MESSAGE_SIZE],
    len: usize,
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

impl Message {
    pub const fn new() -> Self {
        Self {
            buf: [0; MAX_MESSAGE_SIZE],
            len: 0,
        }
    }

    /// Copy a received datagram.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut msg = Self::new();
        msg.buf
            .get_mut(..data.len())
            .ok_or(Error::NoMemory)?
            .copy_from_slice(data);
        msg.len = data.len();
        Ok(msg)
    }

    pub const fn capacity(&self) -> usize {
        MAX_MESSAGE_SIZE
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// The whole backing buffer, for encoding in place.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    pub fn set_len(&mut self, len: usize) -> Result<()> {
        if len > MAX_MESSAGE_SIZE {
            return Err(Error::NoMemory);
        }
        self.len = len;
        Ok(())
    }

    pub fn message_type(&self) -> Option<CoapType> {
        (self.len >= HEADER_SIZE).then(|| CoapType::from_bits(self.buf[0] >> 4))
    }

    pub fn id(&self) -> Option<u16> {
        (self.len >= HEADER_SIZE).then(|| u16::from_be_bytes([self.buf[2], self.buf[3]]))
    }

    /// Patch the id of an already encoded message.
    pub fn set_id(&mut self, id: u16) -> Result<()> {
        if self.len < HEADER_SIZE {
            return Err(Error::InvalidState);
        }
        self.buf[2..4].copy_from_slice(&id.to_be_bytes());
        Ok(())
    }

    pub fn decode(&self) -> Result<CoapMessageDecoder<'_>> {
        CoapMessageDecoder::decode(self.as_bytes())
    }
}

impl core::fmt::Debug for Message {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Message")
            .field("len", &self.len)
            .field("bytes", &self.as_bytes())
            .finish()
    }
}
