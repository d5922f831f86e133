//! Subscription types for collection callbacks.

use crate::error::RemoteError;
use crate::types::{CollectionKey, QueryOptions, Snapshot};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// What a callback receives: a snapshot, or the collection's watch error.
pub type Delivery = Result<Arc<Snapshot>, RemoteError>;

/// A consumer callback.
pub type Callback = Arc<dyn Fn(Delivery) + Send + Sync>;

/// Unique identifier for a registered callback.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(pub u64);

impl fmt::Debug for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallbackId({})", self.0)
    }
}

/// A callback with its liveness flag.
///
/// The flag is cleared synchronously by unsubscribe; the dispatcher checks it
/// before every invocation, so a removed callback is never called again.
#[derive(Clone)]
pub(crate) struct Registration {
    pub id: CallbackId,
    pub callback: Callback,
    live: Arc<AtomicBool>,
}

impl Registration {
    pub fn new(id: CallbackId, callback: Callback) -> Self {
        Self {
            id,
            callback,
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub fn retire(&self) {
        self.live.store(false, Ordering::Release);
    }

    /// Invoke the callback if still registered.
    pub fn deliver(&self, delivery: Delivery) {
        if self.is_live() {
            (self.callback)(delivery);
        }
    }
}

/// One entry for `subscribe_to_multiple`.
#[derive(Clone)]
pub struct SubscriptionSpec {
    pub callback: Callback,
    pub options: QueryOptions,
}

impl SubscriptionSpec {
    pub fn new(callback: impl Fn(Delivery) + Send + Sync + 'static) -> Self {
        Self {
            callback: Arc::new(callback),
            options: QueryOptions::default(),
        }
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }
}

impl From<Callback> for SubscriptionSpec {
    fn from(callback: Callback) -> Self {
        Self {
            callback,
            options: QueryOptions::default(),
        }
    }
}

/// Read-only diagnostic view of the multiplexer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuxStatus {
    pub initialized: bool,
    pub active_listener_count: usize,
    /// Collections with a live remote watch, sorted.
    pub collections: Vec<CollectionKey>,
    /// Collections waiting on the authentication gate, sorted.
    pub pending_collections: Vec<CollectionKey>,
}
