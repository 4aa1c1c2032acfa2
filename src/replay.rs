//! Message replay into the local post office.
//!
//! Replays one data message exactly once per `(origin, internal id)`,
//! preserving the fan-out the origin chose when it is known. The
//! sequence per message:
//!
//! 1. Assign a local message id if the message has none (the origin
//!    identity is carried independently as broker properties).
//! 2. Resolve the origin from the delivery annotations, defaulting to
//!    the link's remote mirror id.
//! 3. Consult the per-origin duplicate-id cache; a hit replenishes
//!    credit and hands the token back for the normal settle path.
//! 4. Open a replay transaction carrying the settle token and a staged
//!    duplicate-id insert, then route: either directly through the
//!    named target-queue bindings, or through normal address routing.
//! 5. Commit. The durable commit record is the linearization point;
//!    queue additions and settlement run strictly after it.
//!
//! Routing always runs with broker-side duplicate detection off (the
//! cache above is authoritative) and load balancing forced to
//! local-only, since the source already made the cluster-level decision.

use crate::config::MirrorConfig;
use crate::dedup::{DuplicateIdCache, OriginCacheRegistry};
use crate::error::{MirrorError, Result};
use crate::event::{Annotations, BROKER_ID, INTERNAL_DESTINATION, INTERNAL_ID, TARGET_QUEUES};
use crate::link::MirrorLink;
use crate::message::Message;
use crate::metrics;
use crate::post_office::{PostOffice, RoutingContext, Storage};
use crate::settle::SettleToken;
use crate::transaction::MirrorTransaction;
use std::sync::Arc;
use std::time::Instant;
use tracing::{trace, warn};

/// Result of replaying one data message.
pub enum ReplayOutcome {
    /// Routed and committed; the transaction owns settlement.
    Committed,
    /// Retransmission of an already-replayed message. Credit was
    /// replenished; the caller settles through the normal path.
    Duplicate(SettleToken),
    /// The replay failed. When the token had already been bound to the
    /// transaction its settlement was re-routed to the after-I/O hook
    /// and `token` is `None`; otherwise the caller still owns it.
    Failed {
        error: MirrorError,
        token: Option<SettleToken>,
    },
}

/// Deduplicates and routes replicated messages.
pub struct ReplayEngine {
    post_office: Arc<dyn PostOffice>,
    storage: Arc<dyn Storage>,
    link: Arc<dyn MirrorLink>,
    registry: OriginCacheRegistry,
    routing_context: RoutingContext,
}

impl ReplayEngine {
    pub fn new(
        post_office: Arc<dyn PostOffice>,
        storage: Arc<dyn Storage>,
        link: Arc<dyn MirrorLink>,
        config: &MirrorConfig,
    ) -> Self {
        let capacity = config.dedup_capacity(link.credit_window());
        let registry = OriginCacheRegistry::new(
            Arc::clone(&post_office),
            config.cache_namespace.clone(),
            capacity,
        );
        Self {
            post_office,
            storage,
            link,
            registry,
            routing_context: RoutingContext::new(),
        }
    }

    /// Replay one data message.
    pub async fn replay(
        &mut self,
        mut message: Message,
        delivery_annotations: &Annotations,
        token: SettleToken,
    ) -> ReplayOutcome {
        if message.message_id() == 0 {
            message.set_message_id(self.storage.generate_id());
        }

        // Not passing the id means the data was produced on the remote
        // broker itself.
        let origin = delivery_annotations
            .get_str(BROKER_ID)
            .map(str::to_owned)
            .unwrap_or_else(|| self.link.remote_mirror_id());

        let internal_id = match delivery_annotations.get_long(INTERNAL_ID) {
            Some(id) => id as u64,
            None => {
                return ReplayOutcome::Failed {
                    error: MirrorError::MissingAnnotation(INTERNAL_ID),
                    token: Some(token),
                }
            }
        };

        trace!(
            origin = %origin,
            internal_id,
            address = %message.address(),
            "replaying message"
        );

        let cache = self.registry.get(&origin).await;
        if cache.contains(internal_id) {
            metrics::record_replay_duplicate(&origin);
            self.link.flow();
            return ReplayOutcome::Duplicate(token);
        }

        message.set_replicated_identity(&origin, internal_id);

        if let Some(destination) = delivery_annotations.get_str(INTERNAL_DESTINATION) {
            message.set_address(destination.to_string());
        }

        let mut tx = MirrorTransaction::new(Arc::clone(&self.storage));
        tx.add_settle_op(token.into_tx_op().into_op());
        tx.stage_duplicate(DuplicateIdCache::stage(&cache, internal_id));

        self.routing_context.clear_for_replay();

        let started = Instant::now();
        let routed = match delivery_annotations.get_str_list(TARGET_QUEUES) {
            Some(targets) => self.route_target_queues(message, targets, &mut tx).await,
            None => {
                self.post_office
                    .route(message, &self.routing_context, &mut tx)
                    .await
            }
        };

        if let Err(error) = routed {
            metrics::record_replay_failed(&origin);
            // Dropping the transaction reverts the staged duplicate id
            // and re-routes settlement through the after-I/O hook.
            drop(tx);
            return ReplayOutcome::Failed { error, token: None };
        }

        if let Err(error) = tx.commit().await {
            metrics::record_replay_failed(&origin);
            return ReplayOutcome::Failed { error, token: None };
        }

        metrics::record_replay_applied(&origin);
        metrics::record_replay_duration(started.elapsed());
        self.link.flow();
        ReplayOutcome::Committed
    }

    /// Route through the bindings the origin named, so the fan-out on
    /// this side matches the routing decision already taken there.
    async fn route_target_queues(
        &self,
        message: Message,
        targets: &[String],
        tx: &mut MirrorTransaction,
    ) -> Result<()> {
        match self.post_office.bindings_for_address(message.address()).await {
            Some(bindings) => {
                for name in targets {
                    match bindings.binding(name) {
                        Some(binding) => {
                            if let Err(e) = binding.route(&message, &self.routing_context, tx) {
                                warn!(queue = %name, error = %e, "routing to target queue failed");
                            }
                        }
                        None => {
                            warn!(
                                queue = %name,
                                address = %message.address(),
                                "target queue binding missing, skipping"
                            );
                        }
                    }
                }
            }
            None => {
                warn!(address = %message.address(), "no bindings for address, fan-out skipped");
            }
        }
        self.post_office
            .process_route(message, &self.routing_context, tx)
            .await
    }
}
