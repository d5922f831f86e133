//! Remote store boundary.
//!
//! The multiplexer orchestrates subscriptions against a document store it
//! does not own. Adapters for a concrete SDK implement [`RemoteStore`];
//! [`MemoryStore`] is an in-process implementation for tests and demos.

mod memory;

pub use memory::{CallStats, MemoryStore};

use crate::error::RemoteError;
use crate::types::{CollectionKey, Document, QueryOptions, Unsubscribe};
use async_trait::async_trait;
use std::sync::Arc;

/// One event from a live watch: a full result set, or a failure.
pub type WatchEvent = Result<Vec<Document>, RemoteError>;

/// Receives watch events. May be called from any thread, including
/// synchronously from inside [`RemoteStore::watch`].
pub type WatchHandler = Arc<dyn Fn(WatchEvent) + Send + Sync>;

/// Called once the store is able to accept watches.
pub type ReadyHandler = Box<dyn Fn() + Send + Sync>;

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Open a live watch. The returned handle tears it down and is idempotent.
    fn watch(
        &self,
        collection: &CollectionKey,
        query: &QueryOptions,
        handler: WatchHandler,
    ) -> Unsubscribe;

    /// Read a collection once.
    async fn fetch_once(
        &self,
        collection: &CollectionKey,
        query: &QueryOptions,
    ) -> Result<Vec<Document>, RemoteError>;

    fn is_ready(&self) -> bool;

    /// Register for the ready signal. Implementations may skip calling the
    /// handler when already ready; waiters re-check [`is_ready`](Self::is_ready).
    fn on_ready(&self, handler: ReadyHandler) -> Unsubscribe;
}
