//! Broker-side message model and replicated-identity plumbing.
//!
//! A replayed message keeps two identities: the local message id
//! assigned by this broker's id generator, and the origin identity
//! `(origin broker id, internal id)` assigned by whichever broker first
//! produced it. The origin identity is what duplicate suppression and
//! ack matching key on, so it is attached to the message as broker
//! properties and survives further mirror hops.

use crate::event::AnnotationValue;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;

/// Broker property carrying the origin-assigned internal id.
pub const INTERNAL_ID_PROPERTY: &str = "x-mirror-prop-internal-id";
/// Broker property carrying the origin broker id.
pub const INTERNAL_BROKER_ID_PROPERTY: &str = "x-mirror-prop-internal-broker-id";

/// A message held by the local post office.
#[derive(Debug, Clone)]
pub struct Message {
    message_id: u64,
    address: String,
    durable: bool,
    payload: Bytes,
    properties: HashMap<String, AnnotationValue>,
}

impl Message {
    pub fn new(address: impl Into<String>, payload: Bytes) -> Self {
        Self {
            message_id: 0,
            address: address.into(),
            durable: true,
            payload,
            properties: HashMap::new(),
        }
    }

    /// The local message id; zero means not yet assigned.
    pub fn message_id(&self) -> u64 {
        self.message_id
    }

    pub fn set_message_id(&mut self, id: u64) {
        self.message_id = id;
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn set_address(&mut self, address: impl Into<String>) {
        self.address = address.into();
    }

    pub fn durable(&self) -> bool {
        self.durable
    }

    pub fn set_durable(&mut self, durable: bool) {
        self.durable = durable;
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: AnnotationValue) {
        self.properties.insert(key.into(), value);
    }

    pub fn property_str(&self, key: &str) -> Option<&str> {
        match self.properties.get(key) {
            Some(AnnotationValue::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn property_long(&self, key: &str) -> Option<i64> {
        match self.properties.get(key) {
            Some(AnnotationValue::Long(v)) => Some(*v),
            _ => None,
        }
    }

    /// Attach the replicated identity as broker properties so a
    /// downstream mirror can propagate it.
    pub fn set_replicated_identity(&mut self, origin: &str, internal_id: u64) {
        self.set_property(
            INTERNAL_ID_PROPERTY,
            AnnotationValue::Long(internal_id as i64),
        );
        self.set_property(
            INTERNAL_BROKER_ID_PROPERTY,
            AnnotationValue::Str(origin.to_string()),
        );
    }
}

/// A reference to a message sitting on some queue.
///
/// References are cheap to clone; the underlying message is shared.
#[derive(Debug, Clone)]
pub struct MessageReference {
    message: Arc<Message>,
}

impl MessageReference {
    pub fn new(message: Arc<Message>) -> Self {
        Self { message }
    }

    pub fn message(&self) -> &Arc<Message> {
        &self.message
    }
}

/// Reads the replicated identity off a message reference.
///
/// A reference produced by a local (non-replayed) send carries no
/// origin property; those are attributed to the local node so a remote
/// ack for locally-produced data still matches.
#[derive(Debug, Clone)]
pub struct ReferenceIdSupplier {
    local_node_id: String,
}

impl ReferenceIdSupplier {
    pub fn new(local_node_id: impl Into<String>) -> Self {
        Self {
            local_node_id: local_node_id.into(),
        }
    }

    pub fn local_node_id(&self) -> &str {
        &self.local_node_id
    }

    /// The origin broker id of a reference, substituting the local
    /// node id when the reference carries none.
    pub fn origin_of<'a>(&'a self, reference: &'a MessageReference) -> &'a str {
        reference
            .message()
            .property_str(INTERNAL_BROKER_ID_PROPERTY)
            .unwrap_or(&self.local_node_id)
    }

    /// The origin-assigned internal id of a reference, if any.
    pub fn internal_id_of(&self, reference: &MessageReference) -> Option<u64> {
        reference
            .message()
            .property_long(INTERNAL_ID_PROPERTY)
            .map(|v| v as u64)
    }

    /// Whether a reference carries exactly the given replicated identity.
    pub fn matches(&self, reference: &MessageReference, origin: &str, internal_id: u64) -> bool {
        self.origin_of(reference) == origin && self.internal_id_of(reference) == Some(internal_id)
    }
}
