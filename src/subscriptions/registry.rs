//! Subscription registry: one live remote watch per collection.

use super::dispatch::{Dispatcher, DispatcherHandle};
use super::types::{Callback, CallbackId, MuxStatus, Registration};
use crate::auth::{AuthGate, Clearance, GateError, PendingAuth};
use crate::cache::SnapshotCache;
use crate::remote::RemoteStore;
use crate::types::{CollectionKey, QueryOptions, Snapshot, Unsubscribe};
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A collection with an open remote watch. Exists only while it has callbacks.
struct ListenerState {
    collection: CollectionKey,
    /// Insertion order is delivery order.
    callbacks: Vec<Registration>,
    /// Invoked once, when the last callback leaves or on cleanup.
    teardown: Unsubscribe,
    query: QueryOptions,
    cache: Arc<SnapshotCache>,
    dispatcher: DispatcherHandle,
}

impl ListenerState {
    fn shutdown(self) {
        for registration in &self.callbacks {
            registration.retire();
        }
        self.dispatcher.close();
        self.teardown.unsubscribe();
        debug!(collection = %self.collection, "remote watch closed");
    }
}

#[derive(Default)]
struct RegistryState {
    listeners: HashMap<CollectionKey, ListenerState>,
    pending: HashMap<CollectionKey, PendingAuth>,
}

/// Maps collections to their listener or pending-auth state.
///
/// Every check-then-mutate sequence runs under one lock, so two subscribers
/// racing on the same collection can never open two watches.
pub(crate) struct Registry {
    remote: Arc<dyn RemoteStore>,
    gate: AuthGate,
    runtime: Handle,
    /// Parent of every pending gate wait.
    root: CancellationToken,
    state: Mutex<RegistryState>,
    next_id: AtomicU64,
}

impl Registry {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        gate: AuthGate,
        runtime: Handle,
        root: CancellationToken,
    ) -> Self {
        Self {
            remote,
            gate,
            runtime,
            root,
            state: Mutex::new(RegistryState::default()),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn subscribe(
        self: &Arc<Self>,
        collection: CollectionKey,
        callback: Callback,
        options: QueryOptions,
    ) -> Unsubscribe {
        let registration = Registration::new(CallbackId(self.next_id()), callback);
        let handle = self.unsubscribe_handle(collection.clone(), &registration);
        let mut state = self.state.lock();

        if let Some(listener) = state.listeners.get_mut(&collection) {
            if listener.query != options {
                debug!(
                    collection = %collection,
                    "late joiner shares the existing listener's query"
                );
            }
            listener.dispatcher.join(registration.clone(), true);
            listener.callbacks.push(registration);
            return handle;
        }

        if let Some(pending) = state.pending.get_mut(&collection) {
            pending.waiters.push(registration);
            return handle;
        }

        match self.gate.clearance(&collection) {
            Clearance::Immediate => {
                let listener = self.open_listener(collection.clone(), options, vec![registration]);
                state.listeners.insert(collection, listener);
            }
            Clearance::Deferred => self.defer(&mut state, collection, options, registration),
        }
        handle
    }

    fn unsubscribe_handle(
        self: &Arc<Self>,
        collection: CollectionKey,
        registration: &Registration,
    ) -> Unsubscribe {
        let registry: Weak<Self> = Arc::downgrade(self);
        let registration = registration.clone();
        Unsubscribe::new(move || {
            registration.retire();
            if let Some(registry) = registry.upgrade() {
                registry.remove(&collection, registration.id);
            }
        })
    }

    fn open_listener(
        &self,
        collection: CollectionKey,
        query: QueryOptions,
        callbacks: Vec<Registration>,
    ) -> ListenerState {
        let cache = Arc::new(SnapshotCache::new());
        let (dispatcher, handle) = Dispatcher::new(
            collection.clone(),
            query.clone(),
            Arc::clone(&cache),
            Arc::clone(&self.remote),
        );
        // Joins are queued ahead of anything the watch emits.
        for registration in &callbacks {
            handle.join(registration.clone(), false);
        }
        self.runtime.spawn(dispatcher.run());

        let teardown = self.remote.watch(&collection, &query, handle.watch_handler());
        debug!(collection = %collection, callbacks = callbacks.len(), "remote watch opened");

        ListenerState {
            collection,
            callbacks,
            teardown,
            query,
            cache,
            dispatcher: handle,
        }
    }

    fn defer(
        self: &Arc<Self>,
        state: &mut RegistryState,
        collection: CollectionKey,
        query: QueryOptions,
        registration: Registration,
    ) {
        let pending_id = self.next_id();
        let cancel = self.root.child_token();
        debug!(
            collection = %collection,
            restricted = self.gate.is_restricted(&collection),
            "subscription deferred by auth gate"
        );
        state.pending.insert(
            collection.clone(),
            PendingAuth {
                id: pending_id,
                query,
                waiters: vec![registration],
                cancel: cancel.clone(),
            },
        );

        let registry = Arc::clone(self);
        self.runtime.spawn(async move {
            registry.resolve_pending(collection, pending_id, cancel).await;
        });
    }

    async fn resolve_pending(
        self: Arc<Self>,
        collection: CollectionKey,
        pending_id: u64,
        cancel: CancellationToken,
    ) {
        match self.gate.clear(&collection, &cancel).await {
            Ok(identity) => {
                debug!(collection = %collection, uid = %identity.uid, "auth gate cleared");
                self.activate_pending(&collection, pending_id);
            }
            Err(GateError::Cancelled) => {
                debug!(collection = %collection, "deferred subscription cancelled");
            }
            Err(GateError::Denied) => {
                warn!(collection = %collection, "authorization denied; subscription dropped");
                self.discard_pending(&collection, pending_id);
            }
            Err(GateError::Check(err)) => {
                warn!(
                    collection = %collection,
                    error = %err,
                    "authorization check failed; subscription dropped"
                );
                self.discard_pending(&collection, pending_id);
            }
        }
    }

    fn activate_pending(&self, collection: &CollectionKey, pending_id: u64) {
        let mut state = self.state.lock();
        let pending = match state.pending.entry(collection.clone()) {
            Entry::Occupied(entry) if entry.get().id == pending_id => entry.remove(),
            _ => return,
        };

        let waiters: Vec<Registration> = pending
            .waiters
            .into_iter()
            .filter(Registration::is_live)
            .collect();
        if waiters.is_empty() {
            return;
        }

        let listener = self.open_listener(collection.clone(), pending.query, waiters);
        state.listeners.insert(collection.clone(), listener);
    }

    fn discard_pending(&self, collection: &CollectionKey, pending_id: u64) {
        let mut state = self.state.lock();
        if let Entry::Occupied(entry) = state.pending.entry(collection.clone()) {
            if entry.get().id == pending_id {
                entry.remove().cancel();
            }
        }
    }

    fn remove(&self, collection: &CollectionKey, id: CallbackId) {
        let mut state = self.state.lock();

        let emptied = match state.listeners.get_mut(collection) {
            Some(listener) => match listener.callbacks.iter().position(|r| r.id == id) {
                Some(pos) => {
                    listener.callbacks.remove(pos);
                    listener.dispatcher.leave(id);
                    Some(listener.callbacks.is_empty())
                }
                None => None,
            },
            None => None,
        };

        match emptied {
            Some(true) => {
                let listener = state.listeners.remove(collection);
                drop(state);
                if let Some(listener) = listener {
                    listener.shutdown();
                }
            }
            Some(false) => {}
            None => {
                if let Entry::Occupied(mut entry) = state.pending.entry(collection.clone()) {
                    entry.get_mut().waiters.retain(|w| w.id != id);
                    if entry.get().waiters.is_empty() {
                        entry.remove().cancel();
                        debug!(
                            collection = %collection,
                            "deferred subscription abandoned before auth resolved"
                        );
                    }
                }
            }
        }
    }

    /// Tear down every listener. Pending gate waits are left alone.
    pub fn cleanup(&self) -> usize {
        let listeners = std::mem::take(&mut self.state.lock().listeners);
        let count = listeners.len();
        for listener in listeners.into_values() {
            listener.shutdown();
        }
        count
    }

    pub fn status(&self) -> MuxStatus {
        let state = self.state.lock();
        let mut collections: Vec<CollectionKey> = state.listeners.keys().cloned().collect();
        collections.sort();
        let mut pending_collections: Vec<CollectionKey> = state.pending.keys().cloned().collect();
        pending_collections.sort();
        MuxStatus {
            initialized: true,
            active_listener_count: collections.len(),
            collections,
            pending_collections,
        }
    }

    pub fn cached_snapshot(&self, collection: &CollectionKey) -> Option<Arc<Snapshot>> {
        self.state
            .lock()
            .listeners
            .get(collection)
            .and_then(|l| l.cache.latest())
    }

    pub fn callback_count(&self, collection: &CollectionKey) -> usize {
        let state = self.state.lock();
        match state.listeners.get(collection) {
            Some(listener) => listener.callbacks.len(),
            None => state
                .pending
                .get(collection)
                .map(|p| p.waiters.len())
                .unwrap_or(0),
        }
    }
}
