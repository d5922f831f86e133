//! Multiplexer facade and lifecycle.

use crate::auth::{AuthGate, AuthProvider};
use crate::config::MuxConfig;
use crate::error::{MuxError, Result};
use crate::remote::RemoteStore;
use crate::subscriptions::{Delivery, MuxStatus, Registry, SubscriptionSpec};
use crate::types::{CollectionKey, Document, QueryOptions, Snapshot, Unsubscribe};
use crate::wait::{wait_until_ready, WaitError, WaitPolicy};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

enum Lifecycle {
    Uninitialized,
    Initializing,
    Ready(Arc<Registry>),
}

/// Real-time subscription multiplexer.
///
/// Turns per-consumer collection subscriptions into one remote watch per
/// collection, replays cached state to late joiners, and defers first
/// subscriptions until the authentication provider has an identity.
///
/// Construct with injected collaborators, then [`init`](Self::init) from
/// inside a tokio runtime before subscribing.
pub struct Multiplexer {
    config: MuxConfig,
    remote: Arc<dyn RemoteStore>,
    auth: Arc<dyn AuthProvider>,
    lifecycle: Mutex<Lifecycle>,
    shutdown: CancellationToken,
}

impl Multiplexer {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        auth: Arc<dyn AuthProvider>,
        config: MuxConfig,
    ) -> Self {
        Self {
            config,
            remote,
            auth,
            lifecycle: Mutex::new(Lifecycle::Uninitialized),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &MuxConfig {
        &self.config
    }

    // --- Lifecycle ---

    /// Wait for the remote store to become ready, then start accepting
    /// subscriptions. Calling again once initialized only logs a warning.
    ///
    /// An invalid configuration is rejected before anything waits.
    pub async fn init(&self) -> Result<()> {
        if let Err(err) = self.config.validate() {
            error!(error = %err, "invalid multiplexer configuration");
            return Err(err);
        }

        {
            let mut lifecycle = self.lifecycle.lock();
            match *lifecycle {
                Lifecycle::Ready(_) => {
                    warn!("init called on an initialized multiplexer");
                    return Ok(());
                }
                Lifecycle::Initializing => {
                    warn!("init already in progress");
                    return Ok(());
                }
                Lifecycle::Uninitialized => *lifecycle = Lifecycle::Initializing,
            }
        }

        let _guard = InitGuard {
            lifecycle: &self.lifecycle,
        };
        let outcome = self.await_store_ready().await;

        match outcome {
            Ok(()) => {
                let gate = AuthGate::new(
                    Arc::clone(&self.auth),
                    self.config.restricted_collections.clone(),
                    self.config.identity_poll_interval,
                );
                let registry = Registry::new(
                    Arc::clone(&self.remote),
                    gate,
                    Handle::current(),
                    self.shutdown.child_token(),
                );
                *self.lifecycle.lock() = Lifecycle::Ready(Arc::new(registry));
                info!("subscription multiplexer initialized");
                Ok(())
            }
            Err(WaitError::TimedOut(after)) => {
                error!(
                    timeout_ms = after.as_millis() as u64,
                    "remote store not ready; multiplexer left uninitialized"
                );
                Err(MuxError::ReadinessTimeout(after))
            }
            Err(WaitError::Cancelled) => Err(MuxError::Cancelled),
        }
    }

    async fn await_store_ready(&self) -> std::result::Result<(), WaitError> {
        let wake = Arc::new(Notify::new());
        let hook = {
            let wake = Arc::clone(&wake);
            self.remote.on_ready(Box::new(move || wake.notify_one()))
        };

        let outcome = wait_until_ready(
            || self.remote.is_ready().then_some(()),
            &wake,
            WaitPolicy {
                poll_interval: Some(self.config.ready_poll_interval),
                timeout: Some(self.config.ready_timeout),
            },
            &self.shutdown,
        )
        .await;
        hook.unsubscribe();
        outcome
    }

    /// Tear down every active listener. Deferred subscriptions keep waiting.
    pub fn cleanup(&self) {
        if let Some(registry) = self.registry() {
            let closed = registry.cleanup();
            info!(listeners = closed, "subscription cleanup complete");
        }
    }

    pub fn is_initialized(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Ready(_))
    }

    fn registry(&self) -> Option<Arc<Registry>> {
        match &*self.lifecycle.lock() {
            Lifecycle::Ready(registry) => Some(Arc::clone(registry)),
            _ => None,
        }
    }

    // --- Subscriptions ---

    /// Subscribe `callback` to `collection`.
    ///
    /// Late joiners of an active collection share its listener (and its query
    /// options). Before `init` completes, or for an invalid key, this logs a
    /// warning and returns a no-op handle.
    pub fn subscribe<K, F>(&self, collection: K, callback: F, options: QueryOptions) -> Unsubscribe
    where
        K: Into<CollectionKey>,
        F: Fn(Delivery) + Send + Sync + 'static,
    {
        self.subscribe_spec(
            collection.into(),
            SubscriptionSpec::new(callback).with_options(options),
        )
    }

    /// Subscribe several collections; the returned handle unsubscribes all.
    pub fn subscribe_to_multiple<I, K>(&self, entries: I) -> Unsubscribe
    where
        I: IntoIterator<Item = (K, SubscriptionSpec)>,
        K: Into<CollectionKey>,
    {
        let handles: Vec<Unsubscribe> = entries
            .into_iter()
            .map(|(collection, spec)| self.subscribe_spec(collection.into(), spec))
            .collect();
        Unsubscribe::combine(handles)
    }

    fn subscribe_spec(&self, collection: CollectionKey, spec: SubscriptionSpec) -> Unsubscribe {
        if !collection.is_valid() {
            warn!(collection = ?collection, "ignoring subscription to an invalid collection key");
            return Unsubscribe::noop();
        }
        match self.registry() {
            Some(registry) => registry.subscribe(collection, spec.callback, spec.options),
            None => {
                warn!(collection = %collection, "subscribe called before init; ignoring");
                Unsubscribe::noop()
            }
        }
    }

    // --- Reads ---

    /// Fetch a collection once, bypassing the registry.
    pub async fn get_current_data(
        &self,
        collection: impl Into<CollectionKey>,
    ) -> Result<Vec<Document>> {
        self.get_current_data_with(collection, &QueryOptions::default()).await
    }

    pub async fn get_current_data_with(
        &self,
        collection: impl Into<CollectionKey>,
        query: &QueryOptions,
    ) -> Result<Vec<Document>> {
        let collection = collection.into();
        if !collection.is_valid() {
            return Err(MuxError::InvalidCollection(collection.as_str().to_string()));
        }
        if !self.is_initialized() {
            return Err(MuxError::NotInitialized);
        }

        match self.remote.fetch_once(&collection, query).await {
            Ok(documents) => Ok(documents),
            Err(source) => {
                error!(collection = %collection, error = %source, "one-shot fetch failed");
                Err(MuxError::Fetch { collection, source })
            }
        }
    }

    /// Last snapshot delivered by the collection's live watch.
    pub fn cached_snapshot(&self, collection: impl Into<CollectionKey>) -> Option<Arc<Snapshot>> {
        self.registry()?.cached_snapshot(&collection.into())
    }

    /// Callbacks registered for `collection`, including ones awaiting auth.
    pub fn callback_count(&self, collection: impl Into<CollectionKey>) -> usize {
        self.registry()
            .map(|r| r.callback_count(&collection.into()))
            .unwrap_or(0)
    }

    pub fn status(&self) -> MuxStatus {
        match self.registry() {
            Some(registry) => registry.status(),
            None => MuxStatus::default(),
        }
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(registry) = self.registry() {
            registry.cleanup();
        }
    }
}

/// Reverts `Initializing` when `init` fails or its future is dropped mid-wait.
struct InitGuard<'a> {
    lifecycle: &'a Mutex<Lifecycle>,
}

impl Drop for InitGuard<'_> {
    fn drop(&mut self) {
        let mut lifecycle = self.lifecycle.lock();
        if matches!(*lifecycle, Lifecycle::Initializing) {
            *lifecycle = Lifecycle::Uninitialized;
        }
    }
}
