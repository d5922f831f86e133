//! Core types for collection subscriptions.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::num::NonZeroU32;
use std::time::{SystemTime, UNIX_EPOCH};

/// Name of a remote collection.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionKey(String);

impl CollectionKey {
    pub fn new(name: impl Into<String>) -> Self {
        CollectionKey(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Keys must contain at least one non-whitespace character.
    pub fn is_valid(&self) -> bool {
        !self.0.trim().is_empty()
    }
}

impl fmt::Debug for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Collection({})", self.0)
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CollectionKey {
    fn from(s: &str) -> Self {
        CollectionKey(s.to_string())
    }
}

impl From<String> for CollectionKey {
    fn from(s: String) -> Self {
        CollectionKey(s)
    }
}

impl From<&CollectionKey> for CollectionKey {
    fn from(key: &CollectionKey) -> Self {
        key.clone()
    }
}

impl Borrow<str> for CollectionKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or_default();
        Timestamp(micros)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// A remote document. Fields are opaque to the multiplexer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl Document {
    /// Build a document from a JSON object. Non-object values yield no fields.
    pub fn new(id: impl Into<String>, fields: serde_json::Value) -> Self {
        let fields = match fields {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Self {
            id: id.into(),
            fields,
        }
    }

    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.fields.get(field)
    }
}

/// Where a snapshot came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotSource {
    /// Pushed by the collection's live watch.
    Live,
    /// One-shot fetch issued for a late joiner.
    Fetch,
}

/// An immutable, ordered batch of documents delivered atomically.
///
/// Handed to callbacks behind an `Arc`; never mutated after construction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub collection: CollectionKey,
    pub documents: Vec<Document>,
    /// Per-listener delivery counter. Zero for fetched snapshots.
    pub sequence: u64,
    pub source: SnapshotSource,
    pub received_at: Timestamp,
}

impl Snapshot {
    pub fn live(collection: CollectionKey, documents: Vec<Document>, sequence: u64) -> Self {
        Self {
            collection,
            documents,
            sequence,
            source: SnapshotSource::Live,
            received_at: Timestamp::now(),
        }
    }

    pub fn fetched(collection: CollectionKey, documents: Vec<Document>) -> Self {
        Self {
            collection,
            documents,
            sequence: 0,
            source: SnapshotSource::Fetch,
            received_at: Timestamp::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.documents.iter().map(|d| d.id.as_str())
    }

    pub fn get(&self, id: &str) -> Option<&Document> {
        self.documents.iter().find(|d| d.id == id)
    }
}

/// Sort direction for `order_by`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

/// Field ordering requested from the remote store.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub direction: Direction,
}

/// Query parameters forwarded to the remote store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryOptions {
    pub order_by: Option<OrderBy>,
    pub limit: Option<NonZeroU32>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Order ascending by `field`.
    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction: Direction::Ascending,
        });
        self
    }

    /// Order descending by `field`.
    pub fn order_by_desc(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction: Direction::Descending,
        });
        self
    }

    /// Cap the result size. Zero means unlimited.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = NonZeroU32::new(limit);
        self
    }
}

/// Handle that tears something down at most once.
///
/// Returned by `subscribe`, by remote watches, and by identity listeners.
/// Calling [`unsubscribe`](Self::unsubscribe) again is a no-op. Dropping the
/// handle does not unsubscribe.
pub struct Unsubscribe {
    action: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Unsubscribe {
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            action: Mutex::new(Some(Box::new(action))),
        }
    }

    /// A handle with nothing to tear down.
    pub fn noop() -> Self {
        Self {
            action: Mutex::new(None),
        }
    }

    /// Bundle several handles; every member runs regardless of the others.
    pub fn combine(handles: impl IntoIterator<Item = Unsubscribe>) -> Self {
        let handles: Vec<Unsubscribe> = handles.into_iter().collect();
        Self::new(move || {
            for handle in &handles {
                handle.unsubscribe();
            }
        })
    }

    pub fn unsubscribe(&self) {
        // Take under the lock, run outside it: the action may re-enter.
        let action = self.action.lock().take();
        if let Some(action) = action {
            action();
        }
    }

    /// True once the teardown has run (or if there was never one).
    pub fn is_spent(&self) -> bool {
        self.action.lock().is_none()
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("spent", &self.is_spent())
            .finish()
    }
}
