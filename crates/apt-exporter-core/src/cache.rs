//! Last-known-good snapshot per listing kind.
//!
//! There is no expiry: a snapshot stays authoritative until the next
//! successful refresh of the same kind replaces it.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::model::{ListingKind, Snapshot};

/// Shared snapshot store. Cloning yields another handle to the same store.
///
/// Writers move a finished snapshot in; readers get an `Arc` to whatever was
/// stored last. The lock is held only for the map access itself, so a reader
/// never waits on a listing command and never observes a half-written snapshot.
#[derive(Debug, Clone, Default)]
pub struct SnapshotCache {
    inner: Arc<RwLock<HashMap<ListingKind, Arc<Snapshot>>>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the snapshot stored for `snapshot.kind`.
    pub fn set(&self, snapshot: Snapshot) {
        let snapshot = Arc::new(snapshot);
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(snapshot.kind, snapshot);
    }

    /// Returns the most recently stored snapshot, or `None` if no refresh of
    /// this kind has ever succeeded.
    pub fn get(&self, kind: ListingKind) -> Option<Arc<Snapshot>> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.get(&kind).cloned()
    }
}
