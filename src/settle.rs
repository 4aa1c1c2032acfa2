//! Settlement tokens and their pool.
//!
//! Every inbound event borrows one token bound to its delivery. The
//! token is armed with exactly one of two faces:
//!
//! - a **completion face** ([`SettleToken::into_completion`]) handed to
//!   the storage layer's after-I/O hook, used by the admin and ack
//!   paths, and by the demux for every failure path;
//! - a **transaction face** ([`SettleToken::into_tx_op`]) registered on
//!   the replay transaction, firing the completion behavior after
//!   commit.
//!
//! Both faces consume the token, so arming the same token twice is
//! unrepresentable. Settling disposes the delivery as accepted, asks
//! the link to top credit back up, and recycles the token.
//!
//! The pool is multi-producer single-consumer: tokens are recycled
//! from whatever thread ran the completion, and borrowed only by the
//! link's handler task. It is sized to the credit window, which bounds
//! how many tokens can be outstanding at once.

use crate::link::{DeliveryHandle, MirrorLink};
use crate::metrics;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{trace, warn};

#[derive(Debug, Default)]
struct TokenCore {
    delivery: Option<DeliveryHandle>,
}

struct PoolShared {
    link: Arc<dyn MirrorLink>,
    recycle_tx: mpsc::Sender<TokenCore>,
}

/// Pool of settlement tokens for one link.
pub struct SettlePool {
    shared: Arc<PoolShared>,
    recycled: Mutex<mpsc::Receiver<TokenCore>>,
}

impl SettlePool {
    /// Create a pool sized to the link's credit window.
    pub fn new(link: Arc<dyn MirrorLink>) -> Self {
        let capacity = link.credit_window().max(1);
        let (recycle_tx, recycled) = mpsc::channel(capacity);
        Self {
            shared: Arc::new(PoolShared { link, recycle_tx }),
            recycled: Mutex::new(recycled),
        }
    }

    /// Borrow a token bound to the given delivery.
    ///
    /// Reuses a recycled token when one is available; allocates
    /// otherwise (only possible transiently, since the pool and the
    /// credit window share a bound).
    pub fn borrow(&self, delivery: DeliveryHandle) -> SettleToken {
        let mut core = self
            .recycled
            .lock()
            .expect("settle pool lock")
            .try_recv()
            .unwrap_or_default();
        core.delivery = Some(delivery);
        SettleToken {
            core,
            shared: Arc::clone(&self.shared),
        }
    }
}

/// A settlement token bound to one delivery.
pub struct SettleToken {
    core: TokenCore,
    shared: Arc<PoolShared>,
}

impl SettleToken {
    pub fn delivery(&self) -> &DeliveryHandle {
        self.core
            .delivery
            .as_ref()
            .expect("borrowed token carries a delivery")
    }

    /// Arm the persistence-completion face.
    pub fn into_completion(self) -> CompletionFace {
        CompletionFace { token: self }
    }

    /// Arm the transaction after-commit face.
    pub fn into_tx_op(self) -> TxFace {
        TxFace { token: self }
    }

    fn settle(mut self) {
        if let Some(delivery) = self.core.delivery.take() {
            trace!(delivery_id = delivery.delivery_id(), "settling delivery");
            self.shared.link.settle_accepted(&delivery);
            self.shared.link.flow();
            metrics::record_settle();
        }
        // Zeroed token back to the pool; dropped if the pool is full.
        let _ = self.shared.recycle_tx.try_send(self.core);
    }
}

/// Persistence-completion face of a token.
///
/// `done()` is the success path: settle, replenish, recycle. `failed()`
/// logs and abandons settlement: the delivery stays unsettled and the
/// connection layer deals with the link.
pub struct CompletionFace {
    token: SettleToken,
}

impl CompletionFace {
    pub fn done(self) {
        self.token.settle();
    }

    pub fn failed(self, error_code: i32, message: &str) {
        warn!(
            error_code,
            message,
            delivery_id = self.token.delivery().delivery_id(),
            "persistence failed under a settlement token"
        );
    }

    /// Box the success path for the storage layer's after-I/O hook.
    pub fn into_op(self) -> Box<dyn FnOnce() + Send + 'static> {
        Box::new(move || self.done())
    }
}

/// Transaction after-commit face of a token: firing it triggers the
/// completion behavior.
pub struct TxFace {
    token: SettleToken,
}

impl TxFace {
    pub fn fire(self) {
        self.token.settle();
    }

    /// Box for registration on a [`MirrorTransaction`](crate::transaction::MirrorTransaction).
    pub fn into_op(self) -> Box<dyn FnOnce() + Send + 'static> {
        Box::new(move || self.fire())
    }
}
