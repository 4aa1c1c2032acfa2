//! # Mirror Target
//!
//! The receiving endpoint of a unidirectional broker-to-broker mirror
//! link.
//!
//! ## Architecture
//!
//! A source broker multiplexes administrative events, routed message
//! deliveries, and acknowledgement notifications onto a single ordered
//! link. The target replays them into the local post office so its
//! state converges with the source's:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                            mirror-target                             │
//! │                                                                      │
//! │  transport ──▶ MirrorTarget (demux) ──┬──▶ AdminApplier ─▶ addresses │
//! │                 │ ControllerScope     │                    & queues  │
//! │                 │                     ├──▶ ReplayEngine ─▶ route +   │
//! │                 ▼                     │     │ dedup cache   commit   │
//! │              SettlePool               │     ▼                        │
//! │            (per-delivery              └──▶ AckReconciler            │
//! │             settle tokens)                  Direct → AfterFlush →    │
//! │                                             Paged                    │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Replay is exactly-once per `(origin, internal id)` via per-origin
//! duplicate-id caches bound transactionally to each replay. Ack
//! reconciliation walks three storage tiers (in-memory queue,
//! intermediate additions, paged storage) to find the local reference
//! of a remotely-acked message even when the ack races its own
//! message's replay.
//!
//! All per-event failures are localized: logged, and the delivery is
//! still settled so credit keeps flowing. The stream never stalls on a
//! single bad event.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mirror_target::{MirrorConfig, MirrorTarget};
//!
//! let mut target = MirrorTarget::new(link, post_office, storage,
//!     MirrorConfig::for_testing("local-node"));
//! target.initialize();
//!
//! // For each decoded delivery from the transport:
//! target.deliver(event).await;
//! ```

pub mod ack;
pub mod admin;
pub mod config;
pub mod dedup;
pub mod error;
pub mod event;
pub mod link;
pub mod message;
pub mod metrics;
pub mod post_office;
pub mod replay;
pub mod scope;
pub mod settle;
pub mod target;
pub mod transaction;

// Re-exports for convenience
pub use ack::{AckOutcome, AckReconciler, PendingAck, RetryStage};
pub use admin::AdminApplier;
pub use config::MirrorConfig;
pub use dedup::{DuplicateIdCache, OriginCacheRegistry, StagedId};
pub use error::{MirrorError, Result};
pub use event::{AckReason, AnnotationValue, Annotations, EventBody, EventKind, InboundEvent};
pub use link::{DeliveryHandle, MessageReader, MirrorLink, ReceiverSettleMode, SenderSettleMode};
pub use message::{Message, MessageReference, ReferenceIdSupplier};
pub use post_office::{
    AddressInfo, Binding, Bindings, DeleteQueueSpec, LoadBalancing, PageSubscription, PostOffice,
    Queue, QueueConfig, RoutingContext, RoutingType, Storage,
};
pub use replay::{ReplayEngine, ReplayOutcome};
pub use scope::ControllerScope;
pub use settle::{SettlePool, SettleToken};
pub use target::MirrorTarget;
pub use transaction::MirrorTransaction;
