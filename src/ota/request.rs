//! Classification and option parsing of incoming OTA messages.

use core::fmt;

use super::{option, path, SHA256_SIZE};
use crate::coap::{self, CoapCode, CoapMessageDecoder, CoapType};
use crate::config::OtaConfig;
use crate::error::Error;

/// What an incoming message means to the update engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    UpdateStart,
    UpdateChunk,
    UpdateFinish,
    /// Empty ACK, possibly confirming one of our CON responses.
    EmptyAck,
    /// Peer reset of one of our messages.
    Reset,
    /// Anything the engine does not handle.
    Other,
}

impl MessageKind {
    pub fn classify(msg: &CoapMessageDecoder<'_>) -> Self {
        match msg.message_type() {
            CoapType::Ack if msg.code().is_empty() => return Self::EmptyAck,
            CoapType::Rst => return Self::Reset,
            _ => {}
        }
        if !coap::is_request(msg.message_type(), msg.code()) || msg.code() != CoapCode::POST {
            return Self::Other;
        }
        let mut segments = msg
            .options()
            .filter(|opt| opt.number == coap::option::URI_PATH);
        let (Some(segment), None) = (segments.next(), segments.next()) else {
            return Self::Other;
        };
        match segment.as_str() {
            Some(path::START) => Self::UpdateStart,
            Some(path::CHUNK) => Self::UpdateChunk,
            Some(path::FINISH) => Self::UpdateFinish,
            _ => Self::Other,
        }
    }
}

// ── Parse errors ──────────────────────────────────────────────

/// A request that failed validation, with the text reported to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestError {
    pub error: Error,
    pub message: &'static str,
}

impl RequestError {
    const fn invalid(message: &'static str) -> Self {
        Self {
            error: Error::InvalidArgument,
            message,
        }
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.error)
    }
}

fn uint_option(value: &[u8]) -> Result<u32, RequestError> {
    if value.len() > 4 {
        return Err(RequestError::invalid("Invalid option value"));
    }
    Ok(value.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b)))
}

fn flag_option(value: &[u8]) -> Result<bool, RequestError> {
    if value.is_empty() {
        Ok(true)
    } else {
        Err(RequestError::invalid("Invalid option value"))
    }
}

// ── UpdateStart ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartRequest<'a> {
    pub file_size: usize,
    pub chunk_size: usize,
    pub file_hash: Option<&'a [u8; SHA256_SIZE]>,
    pub discard_data: bool,
}

impl<'a> StartRequest<'a> {
    pub fn parse(msg: &CoapMessageDecoder<'a>, config: &OtaConfig) -> Result<Self, RequestError> {
        let mut file_size = None;
        let mut chunk_size = None;
        let mut file_hash = None;
        let mut discard_data = false;
        for opt in msg.options() {
            match opt.number {
                option::FILE_SIZE => file_size = Some(uint_option(opt.data)? as usize),
                option::CHUNK_SIZE => chunk_size = Some(uint_option(opt.data)? as usize),
                option::FILE_SHA256 => {
                    let hash = <&[u8; SHA256_SIZE]>::try_from(opt.data)
                        .map_err(|_| RequestError::invalid("Invalid file hash"))?;
                    file_hash = Some(hash);
                }
                option::DISCARD_DATA => discard_data = flag_option(opt.data)?,
                _ => {}
            }
        }
        let file_size = match file_size {
            Some(n) if n > 0 => n,
            _ => return Err(RequestError::invalid("Invalid file size")),
        };
        let chunk_size = match chunk_size {
            Some(n) if (config.min_chunk_size..=config.max_chunk_size).contains(&n) => n,
            _ => return Err(RequestError::invalid("Invalid chunk size")),
        };
        Ok(Self {
            file_size,
            chunk_size,
            file_hash,
            discard_data,
        })
    }
}

// ── UpdateChunk ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRequest<'a> {
    /// 1-based chunk index.
    pub index: u32,
    pub data: &'a [u8],
}

impl<'a> ChunkRequest<'a> {
    pub fn parse(msg: &CoapMessageDecoder<'a>) -> Result<Self, RequestError> {
        let opt = msg
            .find_option(option::CHUNK_INDEX)
            .ok_or(RequestError::invalid("Missing chunk index"))?;
        Ok(Self {
            index: uint_option(opt.data)?,
            data: msg.payload(),
        })
    }
}

// ── UpdateFinish ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FinishRequest {
    pub cancel: bool,
    pub discard_data: bool,
}

impl FinishRequest {
    pub fn parse(msg: &CoapMessageDecoder<'_>) -> Result<Self, RequestError> {
        let mut req = Self::default();
        for opt in msg.options() {
            match opt.number {
                option::CANCEL_UPDATE => req.cancel = flag_option(opt.data)?,
                option::DISCARD_DATA => req.discard_data = flag_option(opt.data)?,
                _ => {}
            }
        }
        Ok(req)
    }
}
