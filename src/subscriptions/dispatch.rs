//! Per-collection fan-out.
//!
//! Each live listener runs one dispatcher task. Joins, leaves, watch events
//! and late-join fetch results all arrive on one ordered channel, and the
//! task is the only place callbacks are invoked. That gives registration-order
//! delivery, and a joiner's replay always precedes its first live delivery.

use super::types::{CallbackId, Registration};
use crate::cache::SnapshotCache;
use crate::error::RemoteError;
use crate::remote::{RemoteStore, WatchEvent, WatchHandler};
use crate::types::{CollectionKey, Document, QueryOptions, Snapshot};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, warn};

pub(crate) enum DispatchMsg {
    /// `late` joiners get a replay; initial subscribers wait for the first event.
    Join {
        registration: Registration,
        late: bool,
    },
    Live(WatchEvent),
    Fetched {
        id: CallbackId,
        result: Result<Vec<Document>, RemoteError>,
    },
    Leave(CallbackId),
    Close,
}

/// Sending side owned by the registry's listener state.
#[derive(Clone)]
pub(crate) struct DispatcherHandle {
    tx: UnboundedSender<DispatchMsg>,
}

impl DispatcherHandle {
    pub fn join(&self, registration: Registration, late: bool) {
        let _ = self.tx.send(DispatchMsg::Join { registration, late });
    }

    pub fn leave(&self, id: CallbackId) {
        let _ = self.tx.send(DispatchMsg::Leave(id));
    }

    pub fn close(&self) {
        let _ = self.tx.send(DispatchMsg::Close);
    }

    /// Handler passed to the remote watch.
    pub fn watch_handler(&self) -> WatchHandler {
        let tx = self.tx.clone();
        Arc::new(move |event| {
            // Closed after teardown; late events are dropped.
            let _ = tx.send(DispatchMsg::Live(event));
        })
    }
}

struct Entry {
    registration: Registration,
    awaiting_replay: bool,
}

pub(crate) struct Dispatcher {
    collection: CollectionKey,
    query: QueryOptions,
    cache: Arc<SnapshotCache>,
    remote: Arc<dyn RemoteStore>,
    tx: UnboundedSender<DispatchMsg>,
    rx: UnboundedReceiver<DispatchMsg>,
    entries: Vec<Entry>,
    sequence: u64,
}

impl Dispatcher {
    pub fn new(
        collection: CollectionKey,
        query: QueryOptions,
        cache: Arc<SnapshotCache>,
        remote: Arc<dyn RemoteStore>,
    ) -> (Self, DispatcherHandle) {
        let (tx, rx) = unbounded_channel();
        let handle = DispatcherHandle { tx: tx.clone() };
        let dispatcher = Self {
            collection,
            query,
            cache,
            remote,
            tx,
            rx,
            entries: Vec::new(),
            sequence: 0,
        };
        (dispatcher, handle)
    }

    pub async fn run(mut self) {
        while let Some(msg) = self.rx.recv().await {
            match msg {
                DispatchMsg::Join { registration, late } => self.join(registration, late),
                DispatchMsg::Live(Ok(documents)) => self.deliver_snapshot(documents),
                DispatchMsg::Live(Err(err)) => self.deliver_error(err),
                DispatchMsg::Fetched { id, result } => self.deliver_fetched(id, result),
                DispatchMsg::Leave(id) => self.entries.retain(|e| e.registration.id != id),
                DispatchMsg::Close => break,
            }
        }
        debug!(collection = %self.collection, "dispatcher stopped");
    }

    fn join(&mut self, registration: Registration, late: bool) {
        if !late {
            self.entries.push(Entry {
                registration,
                awaiting_replay: false,
            });
            return;
        }

        if let Some(cached) = self.cache.latest() {
            registration.deliver(Ok(cached));
            self.entries.push(Entry {
                registration,
                awaiting_replay: false,
            });
            return;
        }

        let id = registration.id;
        self.entries.push(Entry {
            registration,
            awaiting_replay: true,
        });

        let remote = Arc::clone(&self.remote);
        let collection = self.collection.clone();
        let query = self.query.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = remote.fetch_once(&collection, &query).await;
            let _ = tx.send(DispatchMsg::Fetched { id, result });
        });
    }

    fn deliver_snapshot(&mut self, documents: Vec<Document>) {
        self.sequence += 1;
        let snapshot = Arc::new(Snapshot::live(
            self.collection.clone(),
            documents,
            self.sequence,
        ));
        // Cache first so a joiner arriving during fan-out replays this snapshot.
        self.cache.replace(Arc::clone(&snapshot));

        for entry in &mut self.entries {
            entry.registration.deliver(Ok(Arc::clone(&snapshot)));
            entry.awaiting_replay = false;
        }
        debug!(
            collection = %self.collection,
            sequence = self.sequence,
            callbacks = self.entries.len(),
            "snapshot dispatched"
        );
    }

    fn deliver_error(&mut self, err: RemoteError) {
        if err.is_permission_denied() {
            warn!(collection = %self.collection, error = %err, "watch permission denied");
        } else {
            error!(collection = %self.collection, error = %err, "watch failed");
        }
        for entry in &self.entries {
            entry.registration.deliver(Err(err.clone()));
        }
    }

    fn deliver_fetched(&mut self, id: CallbackId, result: Result<Vec<Document>, RemoteError>) {
        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.registration.id == id && e.awaiting_replay)
        else {
            debug!(collection = %self.collection, ?id, "discarding superseded replay fetch");
            return;
        };

        match result {
            Ok(documents) => {
                let snapshot = Snapshot::fetched(self.collection.clone(), documents);
                entry.registration.deliver(Ok(Arc::new(snapshot)));
                entry.awaiting_replay = false;
            }
            Err(err) => {
                error!(collection = %self.collection, ?id, error = %err, "replay fetch failed");
            }
        }
    }
}
