//! Message channel abstraction: a datagram path to the cloud peer.
//!
//! Concrete implementations:
//! - DTLS session of the cloud connection (on device)
//! - [`QueueChannel`] for simulation and tests
//!
//! The OTA engine is borrowed a channel per call, so swapping the
//! transport requires zero changes to the engine.

use std::collections::VecDeque;

use crate::coap::{CoapType, Message};
use crate::error::{Error, Result};

/// Datagram channel to the peer.
pub trait MessageChannel {
    /// Obtain an empty outgoing message buffer.
    fn create(&mut self) -> Result<Message>;

    /// Send an encoded message.
    ///
    /// CON and NON messages are assigned a fresh id, which is written into
    /// `msg` before returning. ACK and RST keep the id set by the caller.
    fn send(&mut self, msg: &mut Message) -> Result<()>;

    /// Whether the underlying transport may drop or reorder datagrams.
    fn is_unreliable(&self) -> bool;
}

impl<T: MessageChannel + ?Sized> MessageChannel for &mut T {
    fn create(&mut self) -> Result<Message> {
        (**self).create()
    }

    fn send(&mut self, msg: &mut Message) -> Result<()> {
        (**self).send(msg)
    }

    fn is_unreliable(&self) -> bool {
        (**self).is_unreliable()
    }
}

/// A null channel that discards every message.
/// Useful as a default when no cloud session is established.
pub struct NullChannel;

impl MessageChannel for NullChannel {
    fn create(&mut self) -> Result<Message> {
        Ok(Message::new())
    }

    fn send(&mut self, _msg: &mut Message) -> Result<()> {
        Ok(())
    }

    fn is_unreliable(&self) -> bool {
        true
    }
}

/// In-memory channel that queues everything sent through it.
#[derive(Debug)]
pub struct QueueChannel {
    sent: VecDeque<Message>,
    next_id: u16,
    unreliable: bool,
    fail_sends: bool,
}

impl Default for QueueChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueChannel {
    pub fn new() -> Self {
        Self::with_first_id(1)
    }

    /// Channel whose first assigned id is `id`.
    pub fn with_first_id(id: u16) -> Self {
        Self {
            sent: VecDeque::new(),
            next_id: id,
            unreliable: true,
            fail_sends: false,
        }
    }

    pub fn set_unreliable(&mut self, unreliable: bool) {
        self.unreliable = unreliable;
    }

    /// Make every following `send` fail with [`Error::Channel`].
    pub fn set_fail_sends(&mut self, fail: bool) {
        self.fail_sends = fail;
    }

    /// Oldest queued message.
    pub fn pop(&mut self) -> Option<Message> {
        self.sent.pop_front()
    }

    pub fn has_messages(&self) -> bool {
        !self.sent.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.is_empty()
    }

    pub fn clear(&mut self) {
        self.sent.clear();
    }
}

impl MessageChannel for QueueChannel {
    fn create(&mut self) -> Result<Message> {
        Ok(Message::new())
    }

    fn send(&mut self, msg: &mut Message) -> Result<()> {
        if self.fail_sends {
            return Err(Error::Channel);
        }
        match msg.message_type() {
            Some(CoapType::Con | CoapType::Non) => {
                msg.set_id(self.next_id)?;
                self.next_id = self.next_id.wrapping_add(1);
            }
            Some(CoapType::Ack | CoapType::Rst) => {}
            None => return Err(Error::InvalidArgument),
        }
        self.sent.push_back(msg.clone());
        Ok(())
    }

    fn is_unreliable(&self) -> bool {
        self.unreliable
    }
}
