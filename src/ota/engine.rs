//! Firmware update engine.
//!
//! Owns one transfer session at a time:
//!
//! ```text
//!   Idle ──UpdateStart──▶ Running ──chunks──▶ Running (complete)
//!     ▲                      │                      │ UpdateFinish
//!     │   cancel / timeout   │                      ▼ VALIDATE_ONLY
//!     └──────────────────────┴──── peer ACK ◀── awaiting confirmation
//!                                  (apply)
//! ```
//!
//! The engine is driven from a single loop: every received datagram goes
//! through [`FirmwareUpdate::handle_message`], and
//! [`FirmwareUpdate::process`] runs on each loop tick for delayed acks and
//! the inactivity timeout. The message channel is borrowed per call.

use log::{debug, info, trace, warn};
use serde::Serialize;

use super::diagnostic::Diagnostic;
use super::ports::{Clock, FirmwareStore, UpdateFlags};
use super::request::{ChunkRequest, FinishRequest, MessageKind, RequestError, StartRequest};
use super::window::ReceiveWindow;
use super::{option, path};
use crate::channel::MessageChannel;
use crate::coap::{self, content_format, CoapCode, CoapMessageDecoder, CoapMessageEncoder, CoapType, Message};
use crate::config::OtaConfig;
use crate::error::{Error, HostError, Result};

// ── Public state ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    Idle,
    Running,
}

/// Counters for the current (or last) transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransferStats {
    pub received_chunks: u32,
    pub duplicate_chunks: u32,
    pub out_of_order_chunks: u32,
    pub sent_acks: u32,
}

// ── Session ───────────────────────────────────────────────────

#[derive(Debug)]
struct Transfer {
    file_size: usize,
    chunk_size: usize,
    chunk_count: u32,
    window: ReceiveWindow,
    last_activity: u64,
    ack_deadline: Option<u64>,
    /// In-order chunks received since the last ack.
    unacked: u32,
    /// Id of the Finish success response awaiting the peer's ACK.
    finish_id: Option<u16>,
}

impl Transfer {
    fn partial_size(&self, chunks: u32) -> usize {
        (chunks as usize * self.chunk_size).min(self.file_size)
    }

    fn chunk_len(&self, index: u32) -> usize {
        if index == self.chunk_count {
            self.file_size - (index as usize - 1) * self.chunk_size
        } else {
            self.chunk_size
        }
    }

    fn is_complete(&self) -> bool {
        self.window.base() == self.chunk_count
    }
}

/// How a response is correlated with the request it answers.
#[derive(Debug, Clone, Copy)]
enum Reply<'t> {
    /// Piggybacked on the ACK of a CON request.
    Ack { id: u16, token: &'t [u8] },
    /// Separate CON response following an empty ACK.
    Con { token: &'t [u8] },
    /// NON response.
    Non { token: &'t [u8] },
}

// ── Engine ────────────────────────────────────────────────────

pub struct FirmwareUpdate<S: FirmwareStore, K: Clock> {
    store: S,
    clock: K,
    config: OtaConfig,
    transfer: Option<Transfer>,
    stats: TransferStats,
}

impl<S: FirmwareStore, K: Clock> FirmwareUpdate<S, K> {
    pub fn new(store: S, clock: K, config: OtaConfig) -> Result<Self> {
        if let Err(e) = config.validate() {
            warn!("OTA: rejecting configuration: {}", e);
            return Err(e.into());
        }
        Ok(Self {
            store,
            clock,
            config,
            transfer: None,
            stats: TransferStats::default(),
        })
    }

    pub fn with_defaults(store: S, clock: K) -> Self {
        Self {
            store,
            clock,
            config: OtaConfig::default(),
            transfer: None,
            stats: TransferStats::default(),
        }
    }

    pub fn state(&self) -> UpdateState {
        if self.transfer.is_some() {
            UpdateState::Running
        } else {
            UpdateState::Idle
        }
    }

    pub fn is_running(&self) -> bool {
        self.transfer.is_some()
    }

    pub fn stats(&self) -> TransferStats {
        self.stats
    }

    pub fn config(&self) -> &OtaConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn clock(&self) -> &K {
        &self.clock
    }

    /// Bytes received contiguously from offset 0, while running.
    pub fn partial_size(&self) -> Option<usize> {
        self.transfer
            .as_ref()
            .map(|t| t.partial_size(t.window.base()))
    }

    /// Abort the running transfer, if any. A failure of the store's
    /// cancel is returned; the session is idle either way.
    pub fn cancel(&mut self) -> core::result::Result<(), HostError> {
        if self.transfer.is_none() {
            return Ok(());
        }
        self.abort(UpdateFlags::empty())
    }

    /// Dispatch one received datagram. Returns how it was classified;
    /// [`MessageKind::Other`] messages are left untouched for the caller.
    pub fn handle_message<C: MessageChannel>(
        &mut self,
        channel: &mut C,
        data: &[u8],
    ) -> Result<MessageKind> {
        let msg = CoapMessageDecoder::decode(data)?;
        let kind = MessageKind::classify(&msg);
        match kind {
            MessageKind::UpdateStart => self.start_request(channel, &msg)?,
            MessageKind::UpdateChunk => self.chunk_request(channel, &msg)?,
            MessageKind::UpdateFinish => self.finish_request(channel, &msg)?,
            MessageKind::EmptyAck => self.response_ack(&msg)?,
            MessageKind::Reset => self.reset_received(&msg),
            MessageKind::Other => trace!("OTA: ignoring message {}", msg.id()),
        }
        Ok(kind)
    }

    /// Periodic tick: enforce the inactivity timeout, then flush a due
    /// delayed ack.
    pub fn process<C: MessageChannel>(&mut self, channel: &mut C) -> Result<()> {
        let now = self.clock.millis();
        let Some(t) = self.transfer.as_mut() else {
            return Ok(());
        };
        if now.saturating_sub(t.last_activity) >= self.config.transfer_timeout_ms {
            warn!(
                "OTA: transfer timed out ({} of {} bytes)",
                t.partial_size(t.window.base()),
                t.file_size
            );
            let _ = self.abort(UpdateFlags::empty());
            return Err(Error::Timeout);
        }
        if t.ack_deadline.is_some_and(|deadline| now >= deadline) {
            send_ack(channel, t, &mut self.stats)?;
        }
        Ok(())
    }

    // ── UpdateStart ──────────────────────────────────────────

    pub fn start_request<C: MessageChannel>(
        &mut self,
        channel: &mut C,
        msg: &CoapMessageDecoder<'_>,
    ) -> Result<()> {
        let token = msg.token();
        match msg.message_type() {
            CoapType::Con => {}
            CoapType::Non => {
                return reject(channel, Reply::Non { token }, UNEXPECTED_TYPE);
            }
            _ => return Ok(()),
        }
        if !msg.has_token() {
            return reject(channel, Reply::Ack { id: msg.id(), token }, MISSING_TOKEN);
        }
        let req = match StartRequest::parse(msg, &self.config) {
            Ok(req) => req,
            Err(e) => return reject(channel, Reply::Ack { id: msg.id(), token }, e),
        };
        if self.transfer.is_some() {
            warn!("OTA: restarting, current transfer cancelled");
            let _ = self.abort(UpdateFlags::empty());
        }
        send_empty(channel, CoapType::Ack, msg.id())?;

        let mut flags = UpdateFlags::empty();
        if req.file_hash.is_none() {
            flags |= UpdateFlags::NON_RESUMABLE;
        }
        if req.discard_data {
            flags |= UpdateFlags::DISCARD_DATA;
        }
        let stored = match self.store.start_update(req.file_size, req.file_hash, flags) {
            Ok(n) => n,
            Err(e) => {
                warn!("OTA: start rejected: {}", e);
                let diag = Diagnostic::from_host(&e, "Failed to start update");
                return send_diagnostic(channel, Reply::Con { token }, host_response_code(&e), &diag);
            }
        };

        let resumable = req.file_hash.is_some();
        let stored = if resumable { stored.min(req.file_size) } else { 0 };
        let chunk_count = req.file_size.div_ceil(req.chunk_size) as u32;
        // Resume on a chunk boundary; a trailing partial chunk is resent.
        let base = if stored == req.file_size {
            chunk_count
        } else {
            (stored / req.chunk_size) as u32
        };
        let window_chunks = self.config.window_chunks(req.chunk_size);

        self.stats = TransferStats::default();
        let transfer = self.transfer.insert(Transfer {
            file_size: req.file_size,
            chunk_size: req.chunk_size,
            chunk_count,
            window: ReceiveWindow::new(base, window_chunks),
            last_activity: self.clock.millis(),
            ack_deadline: None,
            unacked: 0,
            finish_id: None,
        });
        let partial = transfer.partial_size(base);
        info!(
            "OTA: start ({} bytes in {} chunks of {}, resuming at {})",
            req.file_size, chunk_count, req.chunk_size, partial
        );
        if !channel.is_unreliable() {
            debug!("OTA: channel is reliable");
        }

        send(channel, |e| {
            e.message_type(CoapType::Con)
                .code(CoapCode::CREATED)
                .id(0)
                .token(token)
                .option_uint(option::WINDOW_SIZE, window_chunks as u32);
            if resumable && partial > 0 {
                e.option_uint(option::FILE_SIZE, partial as u32);
            }
            Ok(())
        })?;
        Ok(())
    }

    // ── UpdateChunk ──────────────────────────────────────────

    pub fn chunk_request<C: MessageChannel>(
        &mut self,
        channel: &mut C,
        msg: &CoapMessageDecoder<'_>,
    ) -> Result<()> {
        match msg.message_type() {
            CoapType::Non => {}
            CoapType::Con => {
                return reject(channel, Reply::Ack { id: msg.id(), token: &[] }, UNEXPECTED_TYPE);
            }
            _ => return Ok(()),
        }
        if msg.has_token() {
            return reject(channel, Reply::Non { token: msg.token() }, UNEXPECTED_TOKEN);
        }
        let Some(t) = self.transfer.as_mut() else {
            debug!("OTA: chunk {} without a running update", msg.id());
            return send_empty(channel, CoapType::Rst, msg.id());
        };
        let req = match ChunkRequest::parse(msg) {
            Ok(req) => req,
            Err(e) => {
                warn!("OTA: dropping chunk: {}", e);
                return send_empty(channel, CoapType::Rst, msg.id());
            }
        };
        if req.index == 0 || req.index > t.chunk_count || req.data.len() != t.chunk_len(req.index) {
            warn!(
                "OTA: invalid chunk {} ({} bytes) of {}",
                req.index,
                req.data.len(),
                t.chunk_count
            );
            return send_empty(channel, CoapType::Rst, msg.id());
        }

        let now = self.clock.millis();
        t.last_activity = now;

        if t.window.is_received(req.index) {
            self.stats.duplicate_chunks += 1;
            trace!("OTA: duplicate chunk {}", req.index);
            return send_ack(channel, t, &mut self.stats);
        }
        if !t.window.in_range(req.index) {
            warn!(
                "OTA: chunk {} beyond window ({} + {})",
                req.index,
                t.window.base(),
                t.window.size()
            );
            return send_empty(channel, CoapType::Rst, msg.id());
        }

        let base = t.window.base();
        let in_order = req.index == base + 1;
        let had_gaps = t.window.has_gaps();
        let partial = if in_order {
            t.partial_size(req.index + t.window.run_after(req.index))
        } else {
            t.partial_size(base)
        };
        let offset = (req.index as usize - 1) * t.chunk_size;
        if let Err(e) = self.store.save_chunk(req.data, offset, partial) {
            warn!("OTA: failed to save chunk {}: {}", req.index, e);
            let _ = self.abort(UpdateFlags::empty());
            return send_empty(channel, CoapType::Rst, msg.id());
        }

        if in_order {
            t.window.advance();
        } else {
            t.window.mark(req.index);
            self.stats.out_of_order_chunks += 1;
        }
        self.stats.received_chunks += 1;
        t.unacked += 1;
        trace!(
            "OTA: chunk {} saved at {}, partial {}",
            req.index,
            offset,
            t.partial_size(t.window.base())
        );

        let immediate = had_gaps
            || t.window.has_gaps()
            || t.is_complete()
            || req.index == t.chunk_count
            || t.unacked >= 2;
        if immediate {
            send_ack(channel, t, &mut self.stats)
        } else {
            t.ack_deadline
                .get_or_insert(now + self.config.chunk_ack_delay_ms);
            Ok(())
        }
    }

    // ── UpdateFinish ─────────────────────────────────────────

    pub fn finish_request<C: MessageChannel>(
        &mut self,
        channel: &mut C,
        msg: &CoapMessageDecoder<'_>,
    ) -> Result<()> {
        let token = msg.token();
        match msg.message_type() {
            CoapType::Con => {}
            CoapType::Non => {
                return reject(channel, Reply::Non { token }, UNEXPECTED_TYPE);
            }
            _ => return Ok(()),
        }
        if !msg.has_token() {
            return reject(channel, Reply::Ack { id: msg.id(), token }, MISSING_TOKEN);
        }
        let req = match FinishRequest::parse(msg) {
            Ok(req) => req,
            Err(e) => return reject(channel, Reply::Ack { id: msg.id(), token }, e),
        };
        send_empty(channel, CoapType::Ack, msg.id())?;
        let reply = Reply::Con { token };

        let complete = self.transfer.as_ref().is_some_and(Transfer::is_complete);
        if req.cancel || !complete {
            let was_running = self.transfer.is_some();
            let mut flags = UpdateFlags::empty();
            if req.discard_data {
                flags |= UpdateFlags::DISCARD_DATA;
            }
            let result = self.abort(flags);
            if !req.cancel {
                let message = if was_running {
                    "Transfer is incomplete"
                } else {
                    "No update in progress"
                };
                warn!("OTA: finish rejected: {}", message);
                let diag = Diagnostic::new(Error::InvalidState.code(), message);
                return send_diagnostic(channel, reply, CoapCode::PRECONDITION_FAILED, &diag);
            }
            info!("OTA: cancelled by peer");
            return match result {
                Ok(()) => send_success(channel, reply),
                Err(e) => {
                    let diag = Diagnostic::from_host(&e, "Failed to cancel update");
                    send_diagnostic(channel, reply, host_response_code(&e), &diag)
                }
            };
        }

        let validated = self
            .transfer
            .as_ref()
            .is_some_and(|t| t.finish_id.is_some());
        if !validated {
            if let Err(e) = self.store.finish_update(UpdateFlags::VALIDATE_ONLY) {
                warn!("OTA: validation failed: {}", e);
                let _ = self.abort(UpdateFlags::empty());
                let diag = Diagnostic::from_host(&e, "Failed to validate update");
                return send_diagnostic(channel, reply, host_response_code(&e), &diag);
            }
        }

        let resp = send(channel, |e| {
            header(e, reply, CoapCode::CHANGED);
            Ok(())
        })?;
        if let Some(t) = self.transfer.as_mut() {
            t.finish_id = resp.id();
            t.last_activity = self.clock.millis();
            t.ack_deadline = None;
        }
        info!("OTA: image validated, waiting for confirmation");
        Ok(())
    }

    // ── Peer confirmations ───────────────────────────────────

    /// Empty ACK from the peer. Confirming the Finish response applies
    /// the update.
    pub fn response_ack(&mut self, msg: &CoapMessageDecoder<'_>) -> Result<()> {
        let pending = self.transfer.as_ref().and_then(|t| t.finish_id);
        if pending != Some(msg.id()) {
            return Ok(());
        }
        self.transfer = None;
        match self.store.finish_update(UpdateFlags::empty()) {
            Ok(()) => {
                info!("OTA: update applied");
                Ok(())
            }
            Err(e) => {
                warn!("OTA: failed to apply update: {}", e);
                Err(e.into())
            }
        }
    }

    fn reset_received(&mut self, msg: &CoapMessageDecoder<'_>) {
        let pending = self.transfer.as_ref().and_then(|t| t.finish_id);
        if pending == Some(msg.id()) {
            warn!("OTA: peer reset the finish response");
            let _ = self.abort(UpdateFlags::empty());
        }
    }

    /// Drop the session and tell the store to cancel.
    fn abort(&mut self, flags: UpdateFlags) -> core::result::Result<(), HostError> {
        if self.transfer.take().is_some() {
            info!("OTA: transfer cancelled");
        }
        self.store
            .finish_update(UpdateFlags::CANCEL | flags)
            .inspect_err(|e| warn!("OTA: cancel failed: {}", e))
    }
}

// ── Outgoing messages ─────────────────────────────────────────

const UNEXPECTED_TYPE: RequestError = RequestError {
    error: Error::Protocol,
    message: "Unexpected message type",
};

const MISSING_TOKEN: RequestError = RequestError {
    error: Error::Protocol,
    message: "Missing token",
};

const UNEXPECTED_TOKEN: RequestError = RequestError {
    error: Error::Protocol,
    message: "Unexpected token",
};

fn host_response_code(e: &HostError) -> CoapCode {
    match e.code {
        c if c == Error::NotAllowed.code() => CoapCode::FORBIDDEN,
        c if c == Error::InvalidArgument.code() || c == Error::BadData.code() => {
            CoapCode::BAD_REQUEST
        }
        c if c == Error::NoMemory.code() => CoapCode::REQUEST_ENTITY_TOO_LARGE,
        _ => CoapCode::INTERNAL_SERVER_ERROR,
    }
}

/// Encode into a fresh channel buffer and send. Returns the sent message
/// with its assigned id.
fn send<C: MessageChannel>(
    channel: &mut C,
    build: impl FnOnce(&mut CoapMessageEncoder<'_>) -> Result<()>,
) -> Result<Message> {
    let mut msg = channel.create()?;
    let len = {
        let mut e = CoapMessageEncoder::new(msg.buffer_mut());
        build(&mut e)?;
        e.encode()?
    };
    msg.set_len(len)?;
    channel.send(&mut msg)?;
    Ok(msg)
}

fn header(e: &mut CoapMessageEncoder<'_>, reply: Reply<'_>, code: CoapCode) {
    let (ty, id, token) = match reply {
        Reply::Ack { id, token } => (CoapType::Ack, id, token),
        Reply::Con { token } => (CoapType::Con, 0, token),
        Reply::Non { token } => (CoapType::Non, 0, token),
    };
    e.message_type(ty).code(code).id(id).token(token);
}

fn send_empty<C: MessageChannel>(channel: &mut C, ty: CoapType, id: u16) -> Result<()> {
    send(channel, |e| {
        e.message_type(ty).code(CoapCode::EMPTY).id(id);
        Ok(())
    })?;
    Ok(())
}

fn send_success<C: MessageChannel>(channel: &mut C, reply: Reply<'_>) -> Result<()> {
    send(channel, |e| {
        header(e, reply, CoapCode::CHANGED);
        Ok(())
    })?;
    Ok(())
}

fn send_diagnostic<C: MessageChannel>(
    channel: &mut C,
    reply: Reply<'_>,
    code: CoapCode,
    diag: &Diagnostic<'_>,
) -> Result<()> {
    send(channel, |e| {
        header(e, reply, code);
        e.option_uint(coap::option::CONTENT_FORMAT, content_format::JSON);
        let n = diag.write_json(e.payload_data())?;
        e.payload_size(n);
        Ok(())
    })?;
    Ok(())
}

fn reject<C: MessageChannel>(channel: &mut C, reply: Reply<'_>, e: RequestError) -> Result<()> {
    warn!("OTA: request rejected: {}", e);
    let diag = Diagnostic::new(e.error.code(), e.message);
    send_diagnostic(channel, reply, CoapCode::BAD_REQUEST, &diag)
}

/// UpdateAck: contiguous chunk count plus, while gaps exist, the
/// selective ack bitmap.
fn send_ack<C: MessageChannel>(
    channel: &mut C,
    t: &mut Transfer,
    stats: &mut TransferStats,
) -> Result<()> {
    let window = &t.window;
    send(channel, |e| {
        e.message_type(CoapType::Non)
            .code(CoapCode::POST)
            .id(0)
            .option_str(coap::option::URI_PATH, path::ACK)
            .option_uint(option::CHUNK_INDEX, window.base());
        if window.has_gaps() {
            let n = window.write_sack(e.payload_data())?;
            e.payload_size(n);
        }
        Ok(())
    })?;
    debug!(
        "OTA: ack {} ({} buffered)",
        t.window.base(),
        t.window.pending()
    );
    t.unacked = 0;
    t.ack_deadline = None;
    stats.sent_acks += 1;
    Ok(())
}
