//! Transport seam for the mirror link.
//!
//! The transport and codec live outside this crate; what the target
//! needs from them is narrow: the remote mirror's identity, the credit
//! window, settle-mode negotiation at link setup, a way to settle a
//! delivery as accepted, and `flow()`, an idempotent request to top
//! the remote's credit back up to the window. Credit *computation* is
//! the transport's business; this crate only decides when replenishment
//! may happen (after settle, or when a duplicate is dropped).

use crate::error::Result;
use crate::message::Message;
use bytes::{Bytes, BytesMut};

/// Sender settle mode negotiated on the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderSettleMode {
    Unsettled,
    Settled,
    Mixed,
}

/// Receiver settle mode negotiated on the link.
///
/// Only `First` is supported by the target; `initialize()` forces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverSettleMode {
    First,
    Second,
}

/// Handle to one in-flight delivery.
///
/// Carries just enough to settle the delivery upstream and to pick the
/// right message reader for its format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryHandle {
    delivery_id: u64,
    message_format: u32,
}

impl DeliveryHandle {
    pub fn new(delivery_id: u64, message_format: u32) -> Self {
        Self {
            delivery_id,
            message_format,
        }
    }

    pub fn delivery_id(&self) -> u64 {
        self.delivery_id
    }

    pub fn message_format(&self) -> u32 {
        self.message_format
    }
}

/// What the mirror target needs from its receiving link.
pub trait MirrorLink: Send + Sync {
    /// Identity of the broker on the far end of the link. Substituted
    /// as the origin for events that carry no `broker_id` annotation.
    fn remote_mirror_id(&self) -> String;

    /// The link's credit window. Sizes the duplicate-id caches and the
    /// settle-token pool.
    fn credit_window(&self) -> usize;

    fn remote_sender_settle_mode(&self) -> SenderSettleMode;

    fn set_sender_settle_mode(&self, mode: SenderSettleMode);

    fn set_receiver_settle_mode(&self, mode: ReceiverSettleMode);

    /// Ask the transport to top credit back up to the window.
    ///
    /// Idempotent: the transport computes how much (if any) credit to
    /// issue from its own settled/unsettled accounting.
    fn flow(&self);

    /// Dispose the delivery with the accepted outcome and settle it.
    fn settle_accepted(&self, delivery: &DeliveryHandle);
}

/// Decoder seam for the payload of one delivery.
///
/// Most deliveries use the link's default reader, owned by the
/// transport. The tunneled-core formats are the exception: those bodies
/// are native broker encodings that bypass the standard codec, so the
/// target keeps dedicated readers for them.
pub trait MessageReader: Send {
    /// Feed one transfer frame's payload. Returns the decoded message
    /// once the delivery is complete, `None` while more frames are
    /// expected.
    fn read(&mut self, chunk: Bytes, complete: bool) -> Result<Option<Message>>;

    /// Drop any partially accumulated state.
    fn close(&mut self);
}

/// Reader for `TUNNELED_CORE_MESSAGE_FORMAT`: the whole core message
/// arrives in a single transfer.
#[derive(Debug, Default)]
pub struct TunneledCoreReader;

impl TunneledCoreReader {
    pub fn new() -> Self {
        Self
    }
}

impl MessageReader for TunneledCoreReader {
    fn read(&mut self, chunk: Bytes, complete: bool) -> Result<Option<Message>> {
        if !complete {
            return Ok(None);
        }
        // Tunneled payloads are opaque to the mirror: the address is
        // restored from delivery annotations during replay.
        Ok(Some(Message::new("", chunk)))
    }

    fn close(&mut self) {}
}

/// Reader for `TUNNELED_CORE_LARGE_MESSAGE_FORMAT`: the message body
/// spans multiple transfers and is accumulated until the delivery is
/// complete.
#[derive(Debug, Default)]
pub struct TunneledCoreLargeReader {
    buffer: BytesMut,
}

impl TunneledCoreLargeReader {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageReader for TunneledCoreLargeReader {
    fn read(&mut self, chunk: Bytes, complete: bool) -> Result<Option<Message>> {
        self.buffer.extend_from_slice(&chunk);
        if !complete {
            return Ok(None);
        }
        let payload = std::mem::take(&mut self.buffer).freeze();
        Ok(Some(Message::new("", payload)))
    }

    fn close(&mut self) {
        self.buffer.clear();
    }
}
