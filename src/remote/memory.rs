//! In-memory remote store.

use super::{ReadyHandler, RemoteStore, WatchHandler};
use crate::error::RemoteError;
use crate::types::{CollectionKey, Direction, Document, QueryOptions, Unsubscribe};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Per-collection call counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallStats {
    pub watch_calls: usize,
    pub teardown_calls: usize,
    pub fetch_calls: usize,
}

struct ActiveWatch {
    collection: CollectionKey,
    query: QueryOptions,
    handler: WatchHandler,
}

#[derive(Default)]
struct MemoryState {
    collections: HashMap<CollectionKey, Vec<Document>>,
    watches: HashMap<u64, ActiveWatch>,
    stats: HashMap<CollectionKey, CallStats>,
    fetch_failures: HashMap<CollectionKey, RemoteError>,
    ready_hooks: HashMap<u64, ReadyHandler>,
}

/// A document store held in process memory.
///
/// Watches receive the full (query-shaped) result set on every change.
/// Seeded collections emit an initial snapshot from inside `watch` unless
/// built with [`without_initial_snapshot`](Self::without_initial_snapshot).
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    ready: AtomicBool,
    next_id: AtomicU64,
    initial_snapshot: bool,
    fetch_delay: Option<Duration>,
}

impl MemoryStore {
    /// A store that is not yet ready.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            ready: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            initial_snapshot: true,
            fetch_delay: None,
        }
    }

    /// A store that is ready from the start.
    pub fn ready() -> Self {
        let store = Self::new();
        store.ready.store(true, Ordering::SeqCst);
        store
    }

    /// Do not emit seeded data when a watch opens; wait for the first change.
    pub fn without_initial_snapshot(mut self) -> Self {
        self.initial_snapshot = false;
        self
    }

    /// Delay every one-shot fetch by `delay`.
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    /// Signal readiness and notify registered handlers.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
        let state = self.state.lock();
        for hook in state.ready_hooks.values() {
            hook();
        }
    }

    /// Seed a collection without notifying watches.
    pub fn seed(&self, collection: impl Into<CollectionKey>, documents: Vec<Document>) {
        self.state.lock().collections.insert(collection.into(), documents);
    }

    /// Replace a collection's contents and push to its watches.
    pub fn set_documents(&self, collection: impl Into<CollectionKey>, documents: Vec<Document>) {
        let collection = collection.into();
        self.state
            .lock()
            .collections
            .insert(collection.clone(), documents);
        self.emit(&collection);
    }

    /// Insert or replace one document and push to watches.
    pub fn upsert(&self, collection: impl Into<CollectionKey>, document: Document) {
        let collection = collection.into();
        {
            let mut state = self.state.lock();
            let docs = state.collections.entry(collection.clone()).or_default();
            match docs.iter_mut().find(|d| d.id == document.id) {
                Some(existing) => *existing = document,
                None => docs.push(document),
            }
        }
        self.emit(&collection);
    }

    /// Deliver `error` on the error channel of every watch on `collection`.
    pub fn fail_watches(&self, collection: impl Into<CollectionKey>, error: RemoteError) {
        let collection = collection.into();
        let handlers: Vec<WatchHandler> = {
            let state = self.state.lock();
            state
                .watches
                .values()
                .filter(|w| w.collection == collection)
                .map(|w| Arc::clone(&w.handler))
                .collect()
        };
        for handler in handlers {
            handler(Err(error.clone()));
        }
    }

    /// Make the next `fetch_once` for `collection` fail.
    pub fn fail_next_fetch(&self, collection: impl Into<CollectionKey>, error: RemoteError) {
        self.state
            .lock()
            .fetch_failures
            .insert(collection.into(), error);
    }

    pub fn stats(&self, collection: &str) -> CallStats {
        self.state
            .lock()
            .stats
            .get(collection)
            .copied()
            .unwrap_or_default()
    }

    pub fn watch_calls(&self, collection: &str) -> usize {
        self.stats(collection).watch_calls
    }

    pub fn teardown_calls(&self, collection: &str) -> usize {
        self.stats(collection).teardown_calls
    }

    pub fn fetch_calls(&self, collection: &str) -> usize {
        self.stats(collection).fetch_calls
    }

    /// Number of currently open watches on `collection`.
    pub fn active_watches(&self, collection: &str) -> usize {
        self.state
            .lock()
            .watches
            .values()
            .filter(|w| w.collection.as_str() == collection)
            .count()
    }

    pub fn ready_hook_count(&self) -> usize {
        self.state.lock().ready_hooks.len()
    }

    fn emit(&self, collection: &CollectionKey) {
        let deliveries: Vec<(WatchHandler, Vec<Document>)> = {
            let state = self.state.lock();
            let docs = state.collections.get(collection).cloned().unwrap_or_default();
            state
                .watches
                .values()
                .filter(|w| &w.collection == collection)
                .map(|w| (Arc::clone(&w.handler), apply_query(&docs, &w.query)))
                .collect()
        };
        for (handler, docs) in deliveries {
            handler(Ok(docs));
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    fn watch(
        &self,
        collection: &CollectionKey,
        query: &QueryOptions,
        handler: WatchHandler,
    ) -> Unsubscribe {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let initial = {
            let mut state = self.state.lock();
            state.stats.entry(collection.clone()).or_default().watch_calls += 1;
            state.watches.insert(
                id,
                ActiveWatch {
                    collection: collection.clone(),
                    query: query.clone(),
                    handler: Arc::clone(&handler),
                },
            );
            if self.initial_snapshot {
                state
                    .collections
                    .get(collection)
                    .map(|docs| apply_query(docs, query))
            } else {
                None
            }
        };

        if let Some(docs) = initial {
            handler(Ok(docs));
        }

        let state = Arc::clone(&self.state);
        Unsubscribe::new(move || {
            let mut state = state.lock();
            if let Some(watch) = state.watches.remove(&id) {
                state.stats.entry(watch.collection).or_default().teardown_calls += 1;
            }
        })
    }

    async fn fetch_once(
        &self,
        collection: &CollectionKey,
        query: &QueryOptions,
    ) -> Result<Vec<Document>, RemoteError> {
        self.state
            .lock()
            .stats
            .entry(collection.clone())
            .or_default()
            .fetch_calls += 1;

        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if let Some(error) = state.fetch_failures.remove(collection) {
            return Err(error);
        }
        let docs = state.collections.get(collection).cloned().unwrap_or_default();
        Ok(apply_query(&docs, query))
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn on_ready(&self, handler: ReadyHandler) -> Unsubscribe {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.state.lock().ready_hooks.insert(id, handler);

        let state = Arc::clone(&self.state);
        Unsubscribe::new(move || {
            state.lock().ready_hooks.remove(&id);
        })
    }
}

/// Shape a result set by `order_by` and `limit`.
fn apply_query(docs: &[Document], query: &QueryOptions) -> Vec<Document> {
    let mut out = docs.to_vec();
    if let Some(order) = &query.order_by {
        out.sort_by(|a, b| {
            // Documents without the field sort last in either direction.
            match (a.get(&order.field), b.get(&order.field)) {
                (Some(x), Some(y)) => {
                    let ord = compare_values(x, y);
                    match order.direction {
                        Direction::Ascending => ord,
                        Direction::Descending => ord.reverse(),
                    }
                }
                (Some(_), None) => CmpOrdering::Less,
                (None, Some(_)) => CmpOrdering::Greater,
                (None, None) => CmpOrdering::Equal,
            }
        });
    }
    if let Some(limit) = query.limit {
        out.truncate(limit.get() as usize);
    }
    out
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn compare_values(a: &Value, b: &Value) -> CmpOrdering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(CmpOrdering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn product(id: &str, price: i64) -> Document {
        Document::new(id, json!({ "price": price }))
    }

    fn collector() -> (WatchHandler, Arc<Mutex<Vec<Vec<String>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: WatchHandler = Arc::new(move |event| {
            if let Ok(docs) = event {
                sink.lock().push(docs.into_iter().map(|d| d.id).collect());
            }
        });
        (handler, seen)
    }

    #[test]
    fn test_order_and_limit() {
        let docs = vec![
            product("b", 20),
            Document::new("nofield", json!({})),
            product("a", 5),
            product("c", 30),
        ];
        let query = QueryOptions::new().order_by_desc("price").limit(2);
        let ids: Vec<_> = apply_query(&docs, &query).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["c", "b"]);

        let query = QueryOptions::new().order_by("price");
        let ids: Vec<_> = apply_query(&docs, &query).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["a", "b", "c", "nofield"]);
    }

    #[test]
    fn test_watch_emits_initial_and_updates() {
        let store = MemoryStore::ready();
        store.seed("products", vec![product("a", 1)]);

        let (handler, seen) = collector();
        let teardown = store.watch(&"products".into(), &QueryOptions::new(), handler);
        store.upsert("products", product("b", 2));

        assert_eq!(
            *seen.lock(),
            vec![vec!["a".to_string()], vec!["a".to_string(), "b".to_string()]]
        );

        teardown.unsubscribe();
        teardown.unsubscribe();
        store.upsert("products", product("c", 3));
        assert_eq!(seen.lock().len(), 2);
        assert_eq!(store.teardown_calls("products"), 1);
        assert_eq!(store.active_watches("products"), 0);
    }

    #[test]
    fn test_without_initial_snapshot() {
        let store = MemoryStore::ready().without_initial_snapshot();
        store.seed("products", vec![product("a", 1)]);

        let (handler, seen) = collector();
        let _teardown = store.watch(&"products".into(), &QueryOptions::new(), handler);
        assert!(seen.lock().is_empty());
        assert_eq!(store.watch_calls("products"), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_one_shot() {
        let store = MemoryStore::ready();
        store.seed("orders", vec![product("o1", 10)]);
        store.fail_next_fetch("orders", RemoteError::unavailable("offline"));

        let key = CollectionKey::from("orders");
        assert!(store.fetch_once(&key, &QueryOptions::new()).await.is_err());
        let docs = store.fetch_once(&key, &QueryOptions::new()).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(store.fetch_calls("orders"), 2);
    }

    #[test]
    fn test_ready_hooks() {
        let store = MemoryStore::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let hook = store.on_ready(Box::new(move || flag.store(true, Ordering::SeqCst)));
        assert!(!store.is_ready());

        store.mark_ready();
        assert!(store.is_ready());
        assert!(fired.load(Ordering::SeqCst));

        hook.unsubscribe();
        assert_eq!(store.ready_hook_count(), 0);
    }
}
