//! Storage collaborator boundary
//!
//! The collection never performs I/O on its own. Callers hand it a
//! [`DocumentStore`] when they want a document loaded or persisted; async
//! backends wrap themselves behind this synchronous seam.

use crate::{document::Document, types::DocumentId};
use dashmap::DashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// Persistence for whole documents
pub trait DocumentStore: Send + Sync {
    /// Load a document, `None` if it was never saved
    fn load(&self, id: &DocumentId) -> anyhow::Result<Option<Document>>;

    /// Save a document, replacing any previous copy
    fn save(&self, document: &Document) -> anyhow::Result<()>;

    /// Delete a document. Deleting a missing id is not an error.
    fn delete(&self, id: &DocumentId) -> anyhow::Result<()>;
}

/// Store statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub loads: u64,
    pub saves: u64,
    pub deletes: u64,
    pub documents: usize,
}

#[derive(Debug, Default)]
struct Counters {
    loads: AtomicU64,
    saves: AtomicU64,
    deletes: AtomicU64,
}

/// In-memory store for tests and single-process use
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    documents: Arc<DashMap<DocumentId, Document>>,
    counters: Arc<Counters>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            loads: self.counters.loads.load(Ordering::Relaxed),
            saves: self.counters.saves.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
            documents: self.documents.len(),
        }
    }
}

impl DocumentStore for MemoryStore {
    fn load(&self, id: &DocumentId) -> anyhow::Result<Option<Document>> {
        self.counters.loads.fetch_add(1, Ordering::Relaxed);
        Ok(self.documents.get(id).map(|entry| entry.value().clone()))
    }

    fn save(&self, document: &Document) -> anyhow::Result<()> {
        self.counters.saves.fetch_add(1, Ordering::Relaxed);
        self.documents
            .insert(document.id().clone(), document.clone());
        Ok(())
    }

    fn delete(&self, id: &DocumentId) -> anyhow::Result<()> {
        self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        self.documents.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        let id = DocumentId::from("doc");
        assert!(store.load(&id).unwrap().is_none());

        store.save(&Document::new("doc")).unwrap();
        assert_eq!(store.load(&id).unwrap().unwrap().id(), &id);

        store.delete(&id).unwrap();
        store.delete(&id).unwrap();
        assert!(store.is_empty());

        let stats = store.stats();
        assert_eq!((stats.loads, stats.saves, stats.deletes), (2, 1, 2));
    }

    #[test]
    fn test_clones_share_state() {
        let store = MemoryStore::new();
        let handle = store.clone();
        handle.save(&Document::new("a")).unwrap();
        assert_eq!(store.len(), 1);
    }
}
