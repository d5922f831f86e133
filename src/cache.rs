//! Last-delivered snapshot per listener, used for late-join replay.

use crate::types::Snapshot;
use parking_lot::RwLock;
use std::sync::Arc;

/// Holds at most one snapshot. Replacement swaps the whole `Arc`, so a
/// reader sees either the previous snapshot or the new one, never a mix.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    latest: RwLock<Option<Arc<Snapshot>>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached snapshot, returning the previous one.
    pub fn replace(&self, snapshot: Arc<Snapshot>) -> Option<Arc<Snapshot>> {
        self.latest.write().replace(snapshot)
    }

    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.latest.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CollectionKey, Document};
    use serde_json::json;

    fn snapshot(sequence: u64, ids: &[&str]) -> Arc<Snapshot> {
        let docs = ids.iter().map(|id| Document::new(*id, json!({}))).collect();
        Arc::new(Snapshot::live(CollectionKey::from("orders"), docs, sequence))
    }

    #[test]
    fn test_replace_is_whole_value() {
        let cache = SnapshotCache::new();
        assert!(cache.latest().is_none());

        let first = snapshot(1, &["a", "b"]);
        assert!(cache.replace(Arc::clone(&first)).is_none());

        // A reader holding the old Arc keeps an unchanged view.
        let held = cache.latest().unwrap();
        let previous = cache.replace(snapshot(2, &["c"])).unwrap();
        assert!(Arc::ptr_eq(&previous, &first));
        assert_eq!(held.ids().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(cache.latest().map(|s| s.sequence), Some(2));
    }
}
