//! Mock broker collaborators for integration testing.
//!
//! `MockPostOffice` keeps addresses, queues, and bindings in memory.
//! Each `MockQueue` models the three storage tiers the reconciler
//! walks: `visible` (the in-memory queue), `intermediate` (additions
//! not yet flushed in), and `paged` (spilled to paged storage, reached
//! only through the page subscription).
//!
//! `MockStorage` can hold completions in a pending queue to simulate
//! in-flight I/O; `drain()` releases them, which is how tests stage
//! the ack-races-replay scenarios.
//!
//! `MockLink` records settles and models credit the way a transport
//! would: `flow()` tops available credit back up to the window based
//! on how many deliveries are outstanding.

use mirror_target::dedup::DuplicateIdCache;
use mirror_target::error::{MirrorError, Result};
use mirror_target::event::AckReason;
use mirror_target::link::{DeliveryHandle, MirrorLink, ReceiverSettleMode, SenderSettleMode};
use mirror_target::message::{Message, MessageReference, ReferenceIdSupplier};
use mirror_target::post_office::{
    AddressInfo, Binding, Bindings, BoxFuture, CompletionFn, DeleteQueueSpec, PageSubscription,
    PostOffice, Queue, QueueConfig, RefCompare, RoutingContext, Storage,
};
use mirror_target::transaction::MirrorTransaction;
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Shared ordered log of durable effects and settles, for
/// settle-after-persist assertions.
pub type SeqLog = Arc<Mutex<Vec<String>>>;

pub fn new_seq_log() -> SeqLog {
    Arc::new(Mutex::new(Vec::new()))
}

// =============================================================================
// MockLink
// =============================================================================

/// Records settlement and models the credit window.
pub struct MockLink {
    remote_id: String,
    window: usize,
    next_delivery_id: AtomicU64,
    delivered: AtomicUsize,
    settled: Mutex<Vec<u64>>,
    available_credit: AtomicIsize,
    sender_mode: Mutex<Option<SenderSettleMode>>,
    receiver_mode: Mutex<Option<ReceiverSettleMode>>,
    log: SeqLog,
}

impl MockLink {
    pub fn new(remote_id: &str, window: usize, log: SeqLog) -> Self {
        Self {
            remote_id: remote_id.to_string(),
            window,
            next_delivery_id: AtomicU64::new(1),
            delivered: AtomicUsize::new(0),
            settled: Mutex::new(Vec::new()),
            available_credit: AtomicIsize::new(0),
            sender_mode: Mutex::new(None),
            receiver_mode: Mutex::new(None),
            log,
        }
    }

    /// Start one delivery: assigns an id and consumes one credit.
    pub fn begin_delivery(&self, message_format: u32) -> DeliveryHandle {
        self.delivered.fetch_add(1, Ordering::SeqCst);
        self.available_credit.fetch_sub(1, Ordering::SeqCst);
        DeliveryHandle::new(
            self.next_delivery_id.fetch_add(1, Ordering::SeqCst),
            message_format,
        )
    }

    pub fn settled_count(&self) -> usize {
        self.settled.lock().unwrap().len()
    }

    pub fn settled_ids(&self) -> Vec<u64> {
        self.settled.lock().unwrap().clone()
    }

    pub fn available_credit(&self) -> isize {
        self.available_credit.load(Ordering::SeqCst)
    }

    pub fn sender_mode(&self) -> Option<SenderSettleMode> {
        *self.sender_mode.lock().unwrap()
    }

    pub fn receiver_mode(&self) -> Option<ReceiverSettleMode> {
        *self.receiver_mode.lock().unwrap()
    }
}

impl MirrorLink for MockLink {
    fn remote_mirror_id(&self) -> String {
        self.remote_id.clone()
    }

    fn credit_window(&self) -> usize {
        self.window
    }

    fn remote_sender_settle_mode(&self) -> SenderSettleMode {
        SenderSettleMode::Unsettled
    }

    fn set_sender_settle_mode(&self, mode: SenderSettleMode) {
        *self.sender_mode.lock().unwrap() = Some(mode);
    }

    fn set_receiver_settle_mode(&self, mode: ReceiverSettleMode) {
        *self.receiver_mode.lock().unwrap() = Some(mode);
    }

    fn flow(&self) {
        let outstanding =
            self.delivered.load(Ordering::SeqCst) as isize - self.settled_count() as isize;
        self.available_credit
            .store(self.window as isize - outstanding, Ordering::SeqCst);
    }

    fn settle_accepted(&self, delivery: &DeliveryHandle) {
        self.log
            .lock()
            .unwrap()
            .push(format!("settle:{}", delivery.delivery_id()));
        self.settled.lock().unwrap().push(delivery.delivery_id());
    }
}

// =============================================================================
// MockStorage
// =============================================================================

/// Storage with a controllable pending-I/O queue.
pub struct MockStorage {
    next_id: AtomicU64,
    hold: AtomicBool,
    pending: Mutex<Vec<CompletionFn>>,
    fail_commits: AtomicBool,
    commits: AtomicUsize,
    log: SeqLog,
}

impl MockStorage {
    pub fn new(log: SeqLog) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            hold: AtomicBool::new(false),
            pending: Mutex::new(Vec::new()),
            fail_commits: AtomicBool::new(false),
            commits: AtomicUsize::new(0),
            log,
        }
    }

    /// Queue completions instead of running them inline, simulating
    /// in-flight I/O.
    pub fn hold_io(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }

    /// Release all held completions in order and stop holding.
    pub fn drain(&self) {
        self.hold.store(false, Ordering::SeqCst);
        let ops: Vec<CompletionFn> = std::mem::take(&mut *self.pending.lock().unwrap());
        for op in ops {
            op();
        }
    }

    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Completions currently held in the pending queue.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

impl Storage for MockStorage {
    fn generate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn commit_record(&self) -> BoxFuture<'_, Result<()>> {
        let fail = self.fail_commits.load(Ordering::SeqCst);
        Box::pin(async move {
            if fail {
                return Err(MirrorError::Storage("journal unavailable".into()));
            }
            let n = self.commits.fetch_add(1, Ordering::SeqCst) + 1;
            self.log.lock().unwrap().push(format!("commit:{n}"));
            Ok(())
        })
    }

    fn execute_on_completion(&self, op: CompletionFn) {
        if self.hold.load(Ordering::SeqCst) {
            self.pending.lock().unwrap().push(op);
        } else {
            op();
        }
    }
}

// =============================================================================
// MockQueue and paging
// =============================================================================

#[derive(Default)]
struct PageState {
    entries: Mutex<Vec<MessageReference>>,
    acked_indices: Mutex<Vec<u64>>,
}

/// Page subscription over a queue's paged tier.
pub struct MockPageSubscription {
    state: Arc<PageState>,
}

impl PageSubscription for MockPageSubscription {
    fn scan<'a>(&'a self, compare: RefCompare<'a>) -> BoxFuture<'a, Option<u64>> {
        Box::pin(async move {
            let entries = self.state.entries.lock().unwrap();
            entries.iter().enumerate().find_map(|(i, reference)| {
                (compare(reference) == CmpOrdering::Equal).then_some(i as u64)
            })
        })
    }

    fn ack_at(&self, index: u64) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut entries = self.state.entries.lock().unwrap();
            if (index as usize) < entries.len() {
                entries.remove(index as usize);
                self.state.acked_indices.lock().unwrap().push(index);
                Ok(())
            } else {
                Err(MirrorError::PostOffice(format!(
                    "paged index {index} out of range"
                )))
            }
        })
    }
}

/// A queue with visible, intermediate, and paged tiers.
pub struct MockQueue {
    name: String,
    visible: Mutex<Vec<MessageReference>>,
    intermediate: Mutex<Vec<MessageReference>>,
    page: Arc<PageState>,
    acked: Mutex<Vec<(MessageReference, AckReason)>>,
    expired: Mutex<Vec<MessageReference>>,
    consumers: AtomicUsize,
    fail_acks: AtomicBool,
}

impl MockQueue {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            visible: Mutex::new(Vec::new()),
            intermediate: Mutex::new(Vec::new()),
            page: Arc::new(PageState::default()),
            acked: Mutex::new(Vec::new()),
            expired: Mutex::new(Vec::new()),
            consumers: AtomicUsize::new(0),
            fail_acks: AtomicBool::new(false),
        })
    }

    pub fn push_visible(&self, reference: MessageReference) {
        self.visible.lock().unwrap().push(reference);
    }

    pub fn push_intermediate(&self, reference: MessageReference) {
        self.intermediate.lock().unwrap().push(reference);
    }

    pub fn push_paged(&self, reference: MessageReference) {
        self.page.entries.lock().unwrap().push(reference);
    }

    pub fn visible_len(&self) -> usize {
        self.visible.lock().unwrap().len()
    }

    pub fn intermediate_len(&self) -> usize {
        self.intermediate.lock().unwrap().len()
    }

    pub fn paged_len(&self) -> usize {
        self.page.entries.lock().unwrap().len()
    }

    pub fn acked_len(&self) -> usize {
        self.acked.lock().unwrap().len()
    }

    pub fn expired_len(&self) -> usize {
        self.expired.lock().unwrap().len()
    }

    pub fn paged_acks(&self) -> Vec<u64> {
        self.page.acked_indices.lock().unwrap().clone()
    }

    pub fn set_consumers(&self, count: usize) {
        self.consumers.store(count, Ordering::SeqCst);
    }

    pub fn fail_acks(&self, fail: bool) {
        self.fail_acks.store(fail, Ordering::SeqCst);
    }

    /// Whether any visible reference carries the given identity.
    pub fn holds_identity(&self, origin: &str, internal_id: u64) -> bool {
        let supplier = ReferenceIdSupplier::new("__none__");
        self.visible
            .lock()
            .unwrap()
            .iter()
            .any(|r| supplier.matches(r, origin, internal_id))
    }
}

impl Queue for MockQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn consumer_count(&self) -> usize {
        self.consumers.load(Ordering::SeqCst)
    }

    fn remove_with_supplied_id<'a>(
        &'a self,
        origin: &'a str,
        internal_id: u64,
        supplier: &'a ReferenceIdSupplier,
    ) -> BoxFuture<'a, Option<MessageReference>> {
        Box::pin(async move {
            let mut visible = self.visible.lock().unwrap();
            visible
                .iter()
                .position(|r| supplier.matches(r, origin, internal_id))
                .map(|i| visible.remove(i))
        })
    }

    fn flush_intermediate(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let mut intermediate = self.intermediate.lock().unwrap();
            let mut visible = self.visible.lock().unwrap();
            visible.append(&mut intermediate);
        })
    }

    fn acknowledge(
        &self,
        reference: MessageReference,
        reason: AckReason,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.fail_acks.load(Ordering::SeqCst) {
                return Err(MirrorError::PostOffice("ack rejected".into()));
            }
            self.acked.lock().unwrap().push((reference, reason));
            Ok(())
        })
    }

    fn expire(&self, reference: MessageReference) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.expired.lock().unwrap().push(reference);
            Ok(())
        })
    }

    fn page_subscription(&self) -> Option<Arc<dyn PageSubscription>> {
        Some(Arc::new(MockPageSubscription {
            state: Arc::clone(&self.page),
        }))
    }
}

// =============================================================================
// MockPostOffice
// =============================================================================

struct MockBinding {
    queue: Arc<MockQueue>,
}

impl Binding for MockBinding {
    fn queue_name(&self) -> &str {
        self.queue.name()
    }

    fn route(
        &self,
        message: &Message,
        _context: &RoutingContext,
        tx: &mut MirrorTransaction,
    ) -> Result<()> {
        let queue = Arc::clone(&self.queue);
        let shared = Arc::new(message.clone());
        tx.add_commit_op(Box::new(move || {
            queue.push_visible(MessageReference::new(shared));
        }));
        Ok(())
    }
}

struct MockBindings {
    bindings: Vec<Arc<MockBinding>>,
}

impl Bindings for MockBindings {
    fn binding(&self, queue_name: &str) -> Option<Arc<dyn Binding>> {
        self.bindings
            .iter()
            .find(|b| b.queue.name() == queue_name)
            .map(|b| Arc::clone(b) as Arc<dyn Binding>)
    }
}

/// In-memory post office with address/queue registries and the durable
/// duplicate-id cache store.
pub struct MockPostOffice {
    addresses: Mutex<HashMap<String, AddressInfo>>,
    queues: Mutex<HashMap<String, Arc<MockQueue>>>,
    bindings: Mutex<HashMap<String, Vec<String>>>,
    caches: Mutex<HashMap<String, Arc<DuplicateIdCache>>>,
    last_delete_spec: Mutex<Option<DeleteQueueSpec>>,
    routed_contexts: Mutex<Vec<RoutingContext>>,
    scope_observations: Mutex<Vec<bool>>,
}

impl MockPostOffice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            addresses: Mutex::new(HashMap::new()),
            queues: Mutex::new(HashMap::new()),
            bindings: Mutex::new(HashMap::new()),
            caches: Mutex::new(HashMap::new()),
            last_delete_spec: Mutex::new(None),
            routed_contexts: Mutex::new(Vec::new()),
            scope_observations: Mutex::new(Vec::new()),
        })
    }

    /// Register an address with a bound queue, bypassing admin events.
    pub fn seed_queue(&self, address: &str, queue_name: &str) -> Arc<MockQueue> {
        self.addresses
            .lock()
            .unwrap()
            .entry(address.to_string())
            .or_insert_with(|| AddressInfo::new(address));
        let queue = MockQueue::new(queue_name);
        self.queues
            .lock()
            .unwrap()
            .insert(queue_name.to_string(), Arc::clone(&queue));
        self.bindings
            .lock()
            .unwrap()
            .entry(address.to_string())
            .or_default()
            .push(queue_name.to_string());
        queue
    }

    pub fn queue(&self, name: &str) -> Option<Arc<MockQueue>> {
        self.queues.lock().unwrap().get(name).cloned()
    }

    pub fn address_exists(&self, name: &str) -> bool {
        self.addresses.lock().unwrap().contains_key(name)
    }

    pub fn queue_exists(&self, name: &str) -> bool {
        self.queues.lock().unwrap().contains_key(name)
    }

    pub fn queue_bound(&self, address: &str, queue: &str) -> bool {
        self.bindings
            .lock()
            .unwrap()
            .get(address)
            .is_some_and(|names| names.iter().any(|n| n == queue))
    }

    /// The persisted duplicate-id cache under a registry key, if any.
    pub fn cache_for(&self, key: &str) -> Option<Arc<DuplicateIdCache>> {
        self.caches.lock().unwrap().get(key).cloned()
    }

    pub fn last_delete_spec(&self) -> Option<DeleteQueueSpec> {
        *self.last_delete_spec.lock().unwrap()
    }

    /// Routing contexts observed by route/process_route calls.
    pub fn routed_contexts(&self) -> Vec<RoutingContext> {
        self.routed_contexts.lock().unwrap().clone()
    }

    /// ControllerScope observations taken during routing.
    pub fn scope_observations(&self) -> Vec<bool> {
        self.scope_observations.lock().unwrap().clone()
    }

    fn observe_route(&self, context: &RoutingContext) {
        self.routed_contexts.lock().unwrap().push(context.clone());
        self.scope_observations
            .lock()
            .unwrap()
            .push(mirror_target::ControllerScope::is_active());
    }
}

impl PostOffice for MockPostOffice {
    fn add_address(&self, info: AddressInfo) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut addresses = self.addresses.lock().unwrap();
            if addresses.contains_key(&info.name) {
                return Err(MirrorError::AddressExists(info.name));
            }
            addresses.insert(info.name.clone(), info);
            Ok(())
        })
    }

    fn remove_address<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if self.addresses.lock().unwrap().remove(name).is_none() {
                return Err(MirrorError::AddressNotFound(name.to_string()));
            }
            self.bindings.lock().unwrap().remove(name);
            Ok(())
        })
    }

    fn create_queue(&self, config: QueueConfig) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut queues = self.queues.lock().unwrap();
            if queues.contains_key(&config.name) {
                return Err(MirrorError::QueueExists(config.name));
            }
            queues.insert(config.name.clone(), MockQueue::new(&config.name));
            self.addresses
                .lock()
                .unwrap()
                .entry(config.address.clone())
                .or_insert_with(|| AddressInfo::new(&config.address));
            self.bindings
                .lock()
                .unwrap()
                .entry(config.address)
                .or_default()
                .push(config.name);
            Ok(())
        })
    }

    fn delete_queue<'a>(
        &'a self,
        address: &'a str,
        queue: &'a str,
        spec: DeleteQueueSpec,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            *self.last_delete_spec.lock().unwrap() = Some(spec);
            if self.queues.lock().unwrap().remove(queue).is_none() {
                return Err(MirrorError::QueueNotFound(queue.to_string()));
            }
            if let Some(names) = self.bindings.lock().unwrap().get_mut(address) {
                names.retain(|n| n != queue);
            }
            Ok(())
        })
    }

    fn locate_queue<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Option<Arc<dyn Queue>>> {
        Box::pin(async move {
            self.queues
                .lock()
                .unwrap()
                .get(name)
                .cloned()
                .map(|q| q as Arc<dyn Queue>)
        })
    }

    fn bindings_for_address<'a>(
        &'a self,
        address: &'a str,
    ) -> BoxFuture<'a, Option<Arc<dyn Bindings>>> {
        Box::pin(async move {
            let names = self.bindings.lock().unwrap().get(address).cloned()?;
            let queues = self.queues.lock().unwrap();
            let bindings = names
                .iter()
                .filter_map(|n| queues.get(n))
                .map(|q| {
                    Arc::new(MockBinding {
                        queue: Arc::clone(q),
                    })
                })
                .collect();
            Some(Arc::new(MockBindings { bindings }) as Arc<dyn Bindings>)
        })
    }

    fn route<'a>(
        &'a self,
        message: Message,
        context: &'a RoutingContext,
        tx: &'a mut MirrorTransaction,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.observe_route(context);
            let names = self
                .bindings
                .lock()
                .unwrap()
                .get(message.address())
                .cloned()
                .unwrap_or_default();
            let shared = Arc::new(message);
            let queues = self.queues.lock().unwrap();
            for name in names {
                if let Some(queue) = queues.get(&name) {
                    let queue = Arc::clone(queue);
                    let reference = MessageReference::new(Arc::clone(&shared));
                    tx.add_commit_op(Box::new(move || {
                        queue.push_visible(reference);
                    }));
                }
            }
            Ok(())
        })
    }

    fn process_route<'a>(
        &'a self,
        _message: Message,
        context: &'a RoutingContext,
        _tx: &'a mut MirrorTransaction,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.observe_route(context);
            Ok(())
        })
    }

    fn duplicate_id_cache<'a>(
        &'a self,
        key: &'a str,
        capacity: usize,
    ) -> BoxFuture<'a, Arc<DuplicateIdCache>> {
        Box::pin(async move {
            Arc::clone(
                self.caches
                    .lock()
                    .unwrap()
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(DuplicateIdCache::new(capacity))),
            )
        })
    }
}
