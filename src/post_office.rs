// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Broker integration traits.
//!
//! Defines the interface the mirror target needs from the surrounding
//! broker: the post office (addresses, queues, bindings, routing, the
//! durable duplicate-id cache registry) and the storage layer (id
//! generation, transaction records, the after-I/O completion hook).
//!
//! These traits allow testing with mocks and decouple the replication
//! core from broker internals. Futures are hand-boxed rather than
//! using an async-trait macro so the seams stay explicit.
//!
//! # Example
//!
//! ```rust,ignore
//! struct MyBroker { /* ... */ }
//!
//! impl PostOffice for MyBroker {
//!     fn locate_queue<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Option<Arc<dyn Queue>>> {
//!         Box::pin(async move { self.queues.get(name).cloned() })
//!     }
//!     // ...
//! }
//! ```

use crate::dedup::DuplicateIdCache;
use crate::error::Result;
use crate::event::AckReason;
use crate::message::{Message, MessageReference, ReferenceIdSupplier};
use crate::transaction::MirrorTransaction;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A deferred operation handed to the storage layer's completion hook.
pub type CompletionFn = Box<dyn FnOnce() + Send + 'static>;

/// How an address routes messages to its queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingType {
    Multicast,
    Anycast,
}

impl Default for RoutingType {
    fn default() -> Self {
        Self::Multicast
    }
}

/// Descriptor of an address, as carried in admin event bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressInfo {
    pub name: String,
    #[serde(default)]
    pub routing_types: Vec<RoutingType>,
    #[serde(default)]
    pub auto_created: bool,
}

impl AddressInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            routing_types: vec![RoutingType::Multicast],
            auto_created: false,
        }
    }

    pub fn from_json(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("address descriptor serializes")
    }
}

/// Descriptor of a queue, as carried in create-queue event bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub routing_type: RoutingType,
    #[serde(default = "default_durable")]
    pub durable: bool,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub auto_created: bool,
}

fn default_durable() -> bool {
    true
}

impl QueueConfig {
    pub fn of(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            routing_type: RoutingType::default(),
            durable: true,
            filter: None,
            auto_created: false,
        }
    }

    pub fn from_json(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("queue descriptor serializes")
    }
}

/// Options for destroying a queue on behalf of the source.
///
/// The source owns the queue lifecycle, so a mirrored destroy is
/// forced and skips the guards a local operator delete would apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteQueueSpec {
    pub remove_consumers: bool,
    pub force: bool,
    pub auto_delete_address: bool,
    pub check_consumer_count: bool,
}

impl DeleteQueueSpec {
    /// The fixed options used for every mirrored queue delete.
    pub fn mirrored() -> Self {
        Self {
            remove_consumers: false,
            force: true,
            auto_delete_address: false,
            check_consumer_count: false,
        }
    }
}

/// Message load-balancing policy for a routing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadBalancing {
    Off,
    OnDemand,
    /// Never route off this node. Every replay uses this: the source
    /// already made the cluster-level decision.
    LocalOnly,
}

/// Scratch state for one routing operation, reused across replays.
#[derive(Debug, Clone)]
pub struct RoutingContext {
    /// Broker-side duplicate detection. Off during replay; the mirror
    /// runs its own per-origin cache.
    pub duplicate_detection: bool,
    /// Marks the route as mirror-induced so post-office callbacks can
    /// tell replayed traffic from local sends.
    pub mirror_replay: bool,
    pub load_balancing: LoadBalancing,
}

impl Default for RoutingContext {
    fn default() -> Self {
        Self {
            duplicate_detection: true,
            mirror_replay: false,
            load_balancing: LoadBalancing::OnDemand,
        }
    }
}

impl RoutingContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset for one replayed message.
    pub fn clear_for_replay(&mut self) {
        self.duplicate_detection = false;
        self.mirror_replay = true;
        self.load_balancing = LoadBalancing::LocalOnly;
    }
}

/// One queue binding on an address.
pub trait Binding: Send + Sync {
    fn queue_name(&self) -> &str;

    /// Stage the message onto this binding's queue inside the given
    /// transaction, bypassing load-balancing decisions.
    fn route(
        &self,
        message: &Message,
        context: &RoutingContext,
        tx: &mut MirrorTransaction,
    ) -> Result<()>;
}

/// The bindings of one address.
pub trait Bindings: Send + Sync {
    fn binding(&self, queue_name: &str) -> Option<Arc<dyn Binding>>;
}

/// Identity comparator used for paged scans.
pub type RefCompare<'a> = &'a (dyn Fn(&MessageReference) -> Ordering + Send + Sync);

/// The paging subscription of one queue.
pub trait PageSubscription: Send + Sync {
    /// Scan paged references with a 3-way comparator; returns the
    /// index of the matching entry, if any.
    fn scan<'a>(&'a self, compare: RefCompare<'a>) -> BoxFuture<'a, Option<u64>>;

    /// Acknowledge the paged reference at the given index.
    fn ack_at(&self, index: u64) -> BoxFuture<'_, Result<()>>;
}

/// One queue held by the local post office.
pub trait Queue: Send + Sync {
    fn name(&self) -> &str;

    fn consumer_count(&self) -> usize;

    /// Remove and return the reference carrying the given replicated
    /// identity, using the supplier to read identities off references.
    fn remove_with_supplied_id<'a>(
        &'a self,
        origin: &'a str,
        internal_id: u64,
        supplier: &'a ReferenceIdSupplier,
    ) -> BoxFuture<'a, Option<MessageReference>>;

    /// Flush not-yet-visible (intermediate) additions into the queue.
    fn flush_intermediate(&self) -> BoxFuture<'_, ()>;

    /// Acknowledge a removed reference with no consumer attached.
    fn acknowledge(
        &self,
        reference: MessageReference,
        reason: AckReason,
    ) -> BoxFuture<'_, Result<()>>;

    /// Expire a removed reference with no consumer attached.
    fn expire(&self, reference: MessageReference) -> BoxFuture<'_, Result<()>>;

    fn page_subscription(&self) -> Option<Arc<dyn PageSubscription>>;
}

/// What the mirror target needs from the local post office.
pub trait PostOffice: Send + Sync {
    fn add_address(&self, info: AddressInfo) -> BoxFuture<'_, Result<()>>;

    fn remove_address<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<()>>;

    fn create_queue(&self, config: QueueConfig) -> BoxFuture<'_, Result<()>>;

    fn delete_queue<'a>(
        &'a self,
        address: &'a str,
        queue: &'a str,
        spec: DeleteQueueSpec,
    ) -> BoxFuture<'a, Result<()>>;

    fn locate_queue<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Option<Arc<dyn Queue>>>;

    fn bindings_for_address<'a>(
        &'a self,
        address: &'a str,
    ) -> BoxFuture<'a, Option<Arc<dyn Bindings>>>;

    /// Route a message through normal address routing, staging queue
    /// additions into the transaction.
    fn route<'a>(
        &'a self,
        message: Message,
        context: &'a RoutingContext,
        tx: &'a mut MirrorTransaction,
    ) -> BoxFuture<'a, Result<()>>;

    /// Finalize a routing operation whose bindings were invoked
    /// directly (target-queue fan-out).
    fn process_route<'a>(
        &'a self,
        message: Message,
        context: &'a RoutingContext,
        tx: &'a mut MirrorTransaction,
    ) -> BoxFuture<'a, Result<()>>;

    /// The durable duplicate-id cache registered under the given key,
    /// created with the given capacity on first use.
    fn duplicate_id_cache<'a>(
        &'a self,
        key: &'a str,
        capacity: usize,
    ) -> BoxFuture<'a, Arc<DuplicateIdCache>>;
}

/// What the mirror target needs from the storage layer.
pub trait Storage: Send + Sync {
    /// Assign a local message id.
    fn generate_id(&self) -> u64;

    /// Durably record a transaction commit.
    fn commit_record(&self) -> BoxFuture<'_, Result<()>>;

    /// Run an operation after all currently queued I/O completes.
    fn execute_on_completion(&self, op: CompletionFn);

    /// Future form of [`execute_on_completion`](Self::execute_on_completion):
    /// resolves once all I/O queued before this call has drained.
    fn drained(&self) -> BoxFuture<'static, ()> {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        self.execute_on_completion(Box::new(move || {
            let _ = tx.send(());
        }));
        Box::pin(async move {
            let _ = rx.await;
        })
    }
}
