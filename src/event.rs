// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Inbound event model for the mirror link.
//!
//! A single ordered link carries three kinds of traffic multiplexed
//! together: administrative events, acknowledgement notifications, and
//! the replicated data messages themselves. Control events are
//! distinguished by *annotations* rather than by anything in the body,
//! so regular data messages never need their bodies parsed. The body of
//! a control event may still carry data: administrative descriptors
//! travel as JSON strings, post-ack events carry the acked internal id
//! as a 64-bit integer.
//!
//! # Recognized Annotations
//!
//! | Key | Where | Meaning |
//! |-----|-------|---------|
//! | `x-mirror-event-type` | message | control event kind; absent = data |
//! | `x-mirror-broker-id` | both | origin broker id |
//! | `x-mirror-internal-id` | delivery | origin-assigned message id |
//! | `x-mirror-internal-destination` | delivery | address rewrite target |
//! | `x-mirror-target-queues` | delivery | origin's fan-out choice |
//! | `x-mirror-queue` | message | queue name for admin/ack events |
//! | `x-mirror-address` | message | address name for admin events |
//! | `x-mirror-ack-reason` | message | why the source removed the message |

use crate::link::DeliveryHandle;
use crate::message::Message;
use std::collections::HashMap;

/// Message annotation key carrying the control event kind.
pub const EVENT_TYPE: &str = "x-mirror-event-type";
/// Annotation key carrying the origin broker id.
pub const BROKER_ID: &str = "x-mirror-broker-id";
/// Delivery annotation key carrying the origin-assigned internal id.
pub const INTERNAL_ID: &str = "x-mirror-internal-id";
/// Delivery annotation key carrying an address rewrite target.
pub const INTERNAL_DESTINATION: &str = "x-mirror-internal-destination";
/// Delivery annotation key carrying the origin's fan-out queue list.
pub const TARGET_QUEUES: &str = "x-mirror-target-queues";
/// Message annotation key carrying a queue name.
pub const QUEUE: &str = "x-mirror-queue";
/// Message annotation key carrying an address name.
pub const ADDRESS: &str = "x-mirror-address";
/// Message annotation key carrying the ack reason.
pub const ACK_REASON: &str = "x-mirror-ack-reason";

/// Message format for core messages tunneled through the mirror link
/// in their native broker encoding.
pub const TUNNELED_CORE_MESSAGE_FORMAT: u32 = 0x4D52_0001;
/// Message format for tunneled core large messages, delivered in
/// multiple chunks.
pub const TUNNELED_CORE_LARGE_MESSAGE_FORMAT: u32 = 0x4D52_0002;
/// The default message format.
pub const DEFAULT_MESSAGE_FORMAT: u32 = 0;

/// A single decoded annotation value.
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationValue {
    Str(String),
    Long(i64),
    StrList(Vec<String>),
}

/// String-keyed annotation map with typed getters.
///
/// Ill-typed values are treated the same as absent ones; the caller
/// decides whether absence is an error for its event kind.
#[derive(Debug, Clone, Default)]
pub struct Annotations(HashMap<String, AnnotationValue>);

impl Annotations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: AnnotationValue) {
        self.0.insert(key.into(), value);
    }

    /// Builder-style insert of a string value.
    pub fn with_str(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, AnnotationValue::Str(value.into()));
        self
    }

    /// Builder-style insert of an integer value.
    pub fn with_long(mut self, key: impl Into<String>, value: i64) -> Self {
        self.insert(key, AnnotationValue::Long(value));
        self
    }

    /// Builder-style insert of a string-list value.
    pub fn with_list<I, S>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(
            key,
            AnnotationValue::StrList(values.into_iter().map(Into::into).collect()),
        );
        self
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(AnnotationValue::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn get_long(&self, key: &str) -> Option<i64> {
        match self.0.get(key) {
            Some(AnnotationValue::Long(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_str_list(&self, key: &str) -> Option<&[String]> {
        match self.0.get(key) {
            Some(AnnotationValue::StrList(v)) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The kind of an inbound event.
///
/// Resolved from the `x-mirror-event-type` message annotation; a
/// missing annotation means the event is a replicated data message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    AddAddress,
    DeleteAddress,
    CreateQueue,
    DeleteQueue,
    PostAck,
    DataMessage,
}

impl EventKind {
    /// Resolve the kind from the event-type annotation value.
    ///
    /// Returns `None` for an unrecognized control event. The demux
    /// logs and settles those without applying anything, so a newer
    /// source can introduce event kinds without stalling older targets.
    pub fn resolve(event_type: Option<&str>) -> Option<Self> {
        match event_type {
            None => Some(Self::DataMessage),
            Some("addAddress") => Some(Self::AddAddress),
            Some("deleteAddress") => Some(Self::DeleteAddress),
            Some("createQueue") => Some(Self::CreateQueue),
            Some("deleteQueue") => Some(Self::DeleteQueue),
            Some("postAck") => Some(Self::PostAck),
            Some(_) => None,
        }
    }

    /// Stable label for logging and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddAddress => "add_address",
            Self::DeleteAddress => "delete_address",
            Self::CreateQueue => "create_queue",
            Self::DeleteQueue => "delete_queue",
            Self::PostAck => "post_ack",
            Self::DataMessage => "data_message",
        }
    }
}

/// Why the source removed a message from its queue.
///
/// Advisory: an unknown wire value degrades to `Normal` rather than
/// rejecting the ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckReason {
    Normal,
    Killed,
    Expired,
    Replaced,
    Removed,
}

impl AckReason {
    /// Decode from the wire byte.
    pub fn from_wire(value: i64) -> Self {
        match value {
            1 => Self::Killed,
            2 => Self::Expired,
            3 => Self::Replaced,
            4 => Self::Removed,
            _ => Self::Normal,
        }
    }

    pub fn as_wire(&self) -> i64 {
        match self {
            Self::Normal => 0,
            Self::Killed => 1,
            Self::Expired => 2,
            Self::Replaced => 3,
            Self::Removed => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Killed => "killed",
            Self::Expired => "expired",
            Self::Replaced => "replaced",
            Self::Removed => "removed",
        }
    }
}

/// Decoded body of an inbound event.
#[derive(Debug, Clone)]
pub enum EventBody {
    /// No body (delete-queue events carry everything in annotations).
    Empty,
    /// A JSON descriptor string (admin events).
    Text(String),
    /// A 64-bit integer (post-ack events: the acked internal id).
    Long(i64),
    /// A full data message to replay.
    Data(Message),
}

impl EventBody {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }
}

/// A decoded unit from the mirror link, ready for dispatch.
#[derive(Debug)]
pub struct InboundEvent {
    /// Message annotations (control metadata).
    pub annotations: Annotations,
    /// Delivery annotations (per-delivery identity and routing hints).
    pub delivery_annotations: Annotations,
    /// Decoded body.
    pub body: EventBody,
    /// Handle used to settle the delivery and return credit.
    pub delivery: DeliveryHandle,
}

impl InboundEvent {
    /// The control event kind, if recognized.
    pub fn kind(&self) -> Option<EventKind> {
        EventKind::resolve(self.annotations.get_str(EVENT_TYPE))
    }
}
