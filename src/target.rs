// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The mirror target endpoint: event demultiplexer and link lifecycle.
//!
//! One `MirrorTarget` serves one receiving link. The transport decodes
//! each delivery and hands it over as an [`InboundEvent`]; `deliver()`
//! resolves the event kind from its annotations and dispatches to the
//! admin applier, the ack reconciler, or the replay engine.
//!
//! # Settlement Ownership
//!
//! Every event borrows one settle token. A subsystem that reports
//! success-with-deferred-settle takes the token with it (the replay
//! transaction or the reconciler settles later); on every other path
//! (duplicates, malformed events, admin events, failures) the demux
//! keeps the token and hands it to the storage layer's after-I/O hook,
//! so settlement still fires once in-flight persistence drains. A
//! token is never dropped: credit must keep flowing no matter what an
//! individual event did.
//!
//! Dispatch runs inside [`ControllerScope`], so post-office callbacks
//! can tell mirror-induced mutations from local ones and skip
//! re-mirroring them.

use crate::admin::AdminApplier;
use crate::ack::{AckOutcome, AckReconciler, PendingAck};
use crate::config::MirrorConfig;
use crate::error::{MirrorError, Result};
use crate::event::{
    AckReason, EventBody, EventKind, InboundEvent, ACK_REASON, ADDRESS, BROKER_ID, EVENT_TYPE,
    QUEUE, TUNNELED_CORE_LARGE_MESSAGE_FORMAT, TUNNELED_CORE_MESSAGE_FORMAT,
};
use crate::link::{
    DeliveryHandle, MessageReader, MirrorLink, ReceiverSettleMode, TunneledCoreLargeReader,
    TunneledCoreReader,
};
use crate::message::ReferenceIdSupplier;
use crate::metrics;
use crate::post_office::{AddressInfo, PostOffice, QueueConfig, Storage};
use crate::replay::{ReplayEngine, ReplayOutcome};
use crate::scope::ControllerScope;
use crate::settle::{SettlePool, SettleToken};
use std::sync::Arc;
use tracing::warn;

/// The receiving endpoint of one mirror link.
pub struct MirrorTarget {
    link: Arc<dyn MirrorLink>,
    storage: Arc<dyn Storage>,
    pool: SettlePool,
    admin: AdminApplier,
    replay: ReplayEngine,
    ack: AckReconciler,
    core_reader: Option<TunneledCoreReader>,
    core_large_reader: Option<TunneledCoreLargeReader>,
}

impl MirrorTarget {
    pub fn new(
        link: Arc<dyn MirrorLink>,
        post_office: Arc<dyn PostOffice>,
        storage: Arc<dyn Storage>,
        config: MirrorConfig,
    ) -> Self {
        let supplier = Arc::new(ReferenceIdSupplier::new(config.local_node_id.clone()));
        Self {
            pool: SettlePool::new(Arc::clone(&link)),
            admin: AdminApplier::new(Arc::clone(&post_office)),
            replay: ReplayEngine::new(
                Arc::clone(&post_office),
                Arc::clone(&storage),
                Arc::clone(&link),
                &config,
            ),
            ack: AckReconciler::new(post_office, Arc::clone(&storage), supplier, &config),
            link,
            storage,
            core_reader: None,
            core_large_reader: None,
        }
    }

    /// Identity of the broker on the far end of the link.
    pub fn remote_mirror_id(&self) -> String {
        self.link.remote_mirror_id()
    }

    /// Negotiate link modes and issue the initial credit window.
    ///
    /// The sender settle mode is matched to the remote's; second-settle
    /// is unsupported, so the receiver settle mode is forced to First.
    pub fn initialize(&self) {
        self.link
            .set_sender_settle_mode(self.link.remote_sender_settle_mode());
        self.link.set_receiver_settle_mode(ReceiverSettleMode::First);
        self.link.flow();
    }

    /// Pick the reader for a delivery's message format.
    ///
    /// The two tunneled-core formats carry native broker encodings and
    /// get dedicated, lazily created readers; `None` means the link's
    /// default reader applies.
    pub fn select_reader(&mut self, delivery: &DeliveryHandle) -> Option<&mut dyn MessageReader> {
        match delivery.message_format() {
            TUNNELED_CORE_MESSAGE_FORMAT => Some(
                self.core_reader.get_or_insert_with(TunneledCoreReader::new)
                    as &mut dyn MessageReader,
            ),
            TUNNELED_CORE_LARGE_MESSAGE_FORMAT => Some(
                self.core_large_reader
                    .get_or_insert_with(TunneledCoreLargeReader::new)
                    as &mut dyn MessageReader,
            ),
            _ => None,
        }
    }

    /// Handle one decoded inbound event.
    pub async fn deliver(&mut self, event: InboundEvent) {
        let token = self.pool.borrow(event.delivery.clone());
        let leftover = ControllerScope::enter(self.dispatch(event, token)).await;
        if let Some(token) = leftover {
            self.storage
                .execute_on_completion(token.into_completion().into_op());
        }
    }

    /// Dispatch by event kind. Returns the token when the demux still
    /// owns settlement.
    async fn dispatch(&mut self, event: InboundEvent, token: SettleToken) -> Option<SettleToken> {
        let kind = match event.kind() {
            Some(kind) => kind,
            None => {
                warn!(
                    event_type = event.annotations.get_str(EVENT_TYPE),
                    "unrecognized control event, settling without applying"
                );
                metrics::record_unknown_event();
                return Some(token);
            }
        };
        metrics::record_event(kind.as_str());

        match kind {
            EventKind::AddAddress => {
                match parse_address(&event) {
                    Ok(info) => self.admin.add_address(info).await,
                    Err(e) => malformed(kind, e),
                }
                Some(token)
            }
            EventKind::DeleteAddress => {
                match parse_address(&event) {
                    Ok(info) => self.admin.delete_address(info).await,
                    Err(e) => malformed(kind, e),
                }
                Some(token)
            }
            EventKind::CreateQueue => {
                match parse_queue(&event) {
                    Ok(config) => self.admin.create_queue(config).await,
                    Err(e) => malformed(kind, e),
                }
                Some(token)
            }
            EventKind::DeleteQueue => {
                let address = event.annotations.get_str(ADDRESS);
                let queue = event.annotations.get_str(QUEUE);
                match (address, queue) {
                    (Some(address), Some(queue)) => self.admin.delete_queue(address, queue).await,
                    _ => malformed(kind, MirrorError::MissingAnnotation(QUEUE)),
                }
                Some(token)
            }
            EventKind::PostAck => {
                let Some(queue) = event.annotations.get_str(QUEUE) else {
                    malformed(kind, MirrorError::MissingAnnotation(QUEUE));
                    return Some(token);
                };
                let Some(internal_id) = event.body.as_long() else {
                    malformed(kind, MirrorError::BadBody { expected: "i64 internal id" });
                    return Some(token);
                };
                // Not sending the broker id means the ack was produced
                // on the remote broker itself.
                let origin = event
                    .annotations
                    .get_str(BROKER_ID)
                    .map(str::to_owned)
                    .unwrap_or_else(|| self.link.remote_mirror_id());
                let reason = AckReason::from_wire(
                    event.annotations.get_long(ACK_REASON).unwrap_or_default(),
                );
                let ack = PendingAck {
                    origin,
                    internal_id: internal_id as u64,
                    queue: queue.to_string(),
                    reason,
                };
                match self.ack.post_acknowledge(ack, token).await {
                    AckOutcome::Handled => None,
                    AckOutcome::NotApplied(token) => Some(token),
                }
            }
            EventKind::DataMessage => {
                let EventBody::Data(message) = event.body else {
                    malformed(kind, MirrorError::BadBody { expected: "data message" });
                    return Some(token);
                };
                match self
                    .replay
                    .replay(message, &event.delivery_annotations, token)
                    .await
                {
                    ReplayOutcome::Committed => None,
                    ReplayOutcome::Duplicate(token) => Some(token),
                    ReplayOutcome::Failed { error, token } => {
                        warn!(error = %error, "failed to replay message");
                        token
                    }
                }
            }
        }
    }
}

fn parse_address(event: &InboundEvent) -> Result<AddressInfo> {
    let body = event.body.as_text().ok_or(MirrorError::BadBody {
        expected: "JSON address descriptor",
    })?;
    AddressInfo::from_json(body)
}

fn parse_queue(event: &InboundEvent) -> Result<QueueConfig> {
    let body = event.body.as_text().ok_or(MirrorError::BadBody {
        expected: "JSON queue descriptor",
    })?;
    QueueConfig::from_json(body)
}

fn malformed(kind: EventKind, error: MirrorError) {
    warn!(kind = kind.as_str(), error = %error, "malformed event, settling without applying");
    metrics::record_malformed_event(kind.as_str());
}
