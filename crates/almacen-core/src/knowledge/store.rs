//! Sled-backed document store.
//!
//! Two populations live here:
//!
//! | Set    | Held in                         | Removable | Source                               |
//! |--------|---------------------------------|-----------|--------------------------------------|
//! | system | memory + `system_cache` tree    | no        | remote sources, cache or built-ins  |
//! | local  | `local_documents` tree          | yes       | user uploads                         |
//!
//! `snapshot()` is what a chat turn hands to the selector: system documents first, then local
//! documents newest first.

use super::document::KnowledgeDocument;
use crate::csv_table::csv_to_markdown_table;
use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use sled::Db;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

const LOCAL_TREE: &str = "local_documents";
const SYSTEM_CACHE_TREE: &str = "system_cache";

/// Counts reported by the status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStatus {
    pub system_documents: usize,
    pub local_documents: usize,
    pub cached_system_documents: usize,
    pub total_estimated_tokens: usize,
}

pub struct DocumentStore {
    db: Db,
    system: RwLock<Vec<KnowledgeDocument>>,
}

impl DocumentStore {
    /// Opens or creates the store at the given path. The system set starts empty; see
    /// [`initialize_system_documents`](super::initialize_system_documents).
    pub fn open_path<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Ok(Self {
            db,
            system: RwLock::new(Vec::new()),
        })
    }

    /// Current system-owned documents.
    ///
    /// The set is replaced whole under the write lock, so a poisoned lock still holds a
    /// consistent value and is read through.
    pub fn system_documents(&self) -> Vec<KnowledgeDocument> {
        self.system.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replaces the in-memory system set without touching the cache.
    pub fn set_system_documents(&self, docs: Vec<KnowledgeDocument>) {
        let docs: Vec<KnowledgeDocument> = docs
            .into_iter()
            .map(|mut d| {
                d.is_system_owned = true;
                d
            })
            .collect();
        *self.system.write().unwrap_or_else(PoisonError::into_inner) = docs;
    }

    /// Installs a freshly loaded system set and records it as the last-known-good cache.
    pub fn replace_system_documents(&self, docs: Vec<KnowledgeDocument>) -> StoreResult<()> {
        self.set_system_documents(docs);
        let docs = self.system_documents();

        let tree = self.db.open_tree(SYSTEM_CACHE_TREE)?;
        // old and new entries swap in one batch so a failed write keeps the previous cache
        let mut batch = sled::Batch::default();
        for key in tree.iter().keys() {
            batch.remove(key?);
        }
        for (i, doc) in docs.iter().enumerate() {
            // zero-padded position keeps the cached order on iteration
            batch.insert(format!("{:06}", i).as_bytes(), serde_json::to_vec(doc)?);
        }
        tree.apply_batch(batch)?;
        tree.flush()?;

        tracing::info!(
            target: "almacen::knowledge",
            documents = docs.len(),
            action = "REPLACE_SYSTEM",
            "System set replaced ({} documents cached)",
            docs.len()
        );
        Ok(())
    }

    /// The last system set that was installed with [`replace_system_documents`](Self::replace_system_documents).
    pub fn cached_system_documents(&self) -> StoreResult<Vec<KnowledgeDocument>> {
        let tree = self.db.open_tree(SYSTEM_CACHE_TREE)?;
        let mut out = Vec::new();
        for item in tree.iter() {
            let (_, v) = item?;
            if let Some(doc) = KnowledgeDocument::from_bytes(&v) {
                out.push(doc);
            }
        }
        Ok(out)
    }

    /// User documents, newest first.
    pub fn local_documents(&self) -> StoreResult<Vec<KnowledgeDocument>> {
        let tree = self.db.open_tree(LOCAL_TREE)?;
        let mut out = Vec::new();
        for item in tree.iter() {
            let (_, v) = item?;
            if let Some(doc) = KnowledgeDocument::from_bytes(&v) {
                out.push(doc);
            }
        }
        out.sort_by(|a, b| b.added_at_ms.cmp(&a.added_at_ms));
        Ok(out)
    }

    /// System documents followed by local documents. This is the selector's input.
    pub fn snapshot(&self) -> StoreResult<Vec<KnowledgeDocument>> {
        let mut docs = self.system_documents();
        docs.extend(self.local_documents()?);
        Ok(docs)
    }

    /// Looks up a document by id in either set.
    pub fn get(&self, id: &str) -> StoreResult<Option<KnowledgeDocument>> {
        if let Some(doc) = self.system_documents().into_iter().find(|d| d.id == id) {
            return Ok(Some(doc));
        }
        let tree = self.db.open_tree(LOCAL_TREE)?;
        Ok(tree.get(id.as_bytes())?.and_then(|v| KnowledgeDocument::from_bytes(&v)))
    }

    /// Stores a new user document with a fresh id and timestamp.
    pub fn add_document(
        &self,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> StoreResult<KnowledgeDocument> {
        let doc = KnowledgeDocument::local(title, content);
        self.insert_local(&doc)?;
        Ok(doc)
    }

    /// Stores a CSV upload as a markdown table.
    pub fn add_csv_document(&self, title: impl Into<String>, csv: &str) -> StoreResult<KnowledgeDocument> {
        self.add_document(title, csv_to_markdown_table(csv))
    }

    fn insert_local(&self, doc: &KnowledgeDocument) -> StoreResult<()> {
        let tree = self.db.open_tree(LOCAL_TREE)?;
        let bytes = serde_json::to_vec(doc)?;
        tree.insert(doc.id.as_bytes(), bytes.as_slice())?;
        tracing::info!(
            target: "almacen::knowledge",
            id = %doc.id,
            title = %doc.title,
            tokens = doc.estimated_tokens,
            action = "INSERT",
            "Local document '{}' added ({} tokens)",
            doc.title,
            doc.estimated_tokens
        );
        Ok(())
    }

    /// Removes a user document. System-owned documents are rejected.
    pub fn remove_document(&self, id: &str) -> StoreResult<KnowledgeDocument> {
        if self.system_documents().iter().any(|d| d.id == id) {
            tracing::warn!(
                target: "almacen::knowledge",
                id = %id,
                "Refused to remove system-owned document"
            );
            return Err(StoreError::SystemOwned(id.to_string()));
        }
        let tree = self.db.open_tree(LOCAL_TREE)?;
        let prev = tree
            .remove(id.as_bytes())?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let doc = serde_json::from_slice::<KnowledgeDocument>(&prev)?;
        tracing::info!(
            target: "almacen::knowledge",
            id = %id,
            action = "REMOVE",
            "Local document '{}' removed",
            doc.title
        );
        Ok(doc)
    }

    /// Deletes every user document. Returns how many were removed.
    pub fn clear_local_documents(&self) -> StoreResult<usize> {
        let tree = self.db.open_tree(LOCAL_TREE)?;
        let n = tree.len();
        tree.clear()?;
        tracing::info!(target: "almacen::knowledge", removed = n, action = "CLEAR", "Local documents cleared");
        Ok(n)
    }

    pub fn status(&self) -> StoreResult<StoreStatus> {
        let system = self.system_documents();
        let local = self.local_documents()?;
        let cached = self.db.open_tree(SYSTEM_CACHE_TREE)?.len();
        let total_estimated_tokens = system
            .iter()
            .chain(local.iter())
            .map(|d| d.estimated_tokens)
            .sum();
        Ok(StoreStatus {
            system_documents: system.len(),
            local_documents: local.len(),
            cached_system_documents: cached,
            total_estimated_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> (tempfile::TempDir, DocumentStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::open_path(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn snapshot_lists_system_then_local_newest_first() {
        let (_dir, store) = open();
        store.set_system_documents(vec![KnowledgeDocument::new("sys", "S", "s", 1, true)]);
        store.insert_local(&KnowledgeDocument::new("old", "O", "o", 10, false)).unwrap();
        store.insert_local(&KnowledgeDocument::new("new", "N", "n", 20, false)).unwrap();

        let ids: Vec<String> = store.snapshot().unwrap().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["sys", "new", "old"]);
    }

    #[test]
    fn add_and_remove_local_document() {
        let (_dir, store) = open();
        let doc = store.add_document("notas.txt", "Pedidos hasta las 18hs").unwrap();
        assert!(!doc.is_system_owned);
        assert_eq!(store.get(&doc.id).unwrap(), Some(doc.clone()));

        let removed = store.remove_document(&doc.id).unwrap();
        assert_eq!(removed.id, doc.id);
        assert!(store.local_documents().unwrap().is_empty());
        assert!(matches!(
            store.remove_document(&doc.id),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn system_documents_cannot_be_removed() {
        let (_dir, store) = open();
        store.set_system_documents(vec![KnowledgeDocument::system("sys-1", "Precios", "x")]);
        assert!(matches!(
            store.remove_document("sys-1"),
            Err(StoreError::SystemOwned(id)) if id == "sys-1"
        ));
        assert_eq!(store.system_documents().len(), 1);
    }

    #[test]
    fn set_system_forces_ownership_flag() {
        let (_dir, store) = open();
        store.set_system_documents(vec![KnowledgeDocument::new("x", "X", "x", 0, false)]);
        assert!(store.system_documents()[0].is_system_owned);
    }

    #[test]
    fn csv_upload_is_stored_as_markdown() {
        let (_dir, store) = open();
        let doc = store.add_csv_document("precios.csv", "A,B\n1,2").unwrap();
        assert_eq!(doc.content, "| A | B |\n| --- | --- |\n| 1 | 2 |");
    }

    #[test]
    fn replace_system_persists_cache_in_order() {
        let (_dir, store) = open();
        store
            .replace_system_documents(vec![
                KnowledgeDocument::system("b", "B", "b"),
                KnowledgeDocument::system("a", "A", "a"),
            ])
            .unwrap();
        store.set_system_documents(Vec::new());
        assert!(store.system_documents().is_empty());

        let ids: Vec<String> = store
            .cached_system_documents()
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn replacing_with_fewer_documents_drops_stale_cache_entries() {
        let (_dir, store) = open();
        store
            .replace_system_documents(vec![
                KnowledgeDocument::system("a", "A", "a"),
                KnowledgeDocument::system("b", "B", "b"),
                KnowledgeDocument::system("c", "C", "c"),
            ])
            .unwrap();
        store
            .replace_system_documents(vec![KnowledgeDocument::system("z", "Z", "z")])
            .unwrap();

        let ids: Vec<String> = store
            .cached_system_documents()
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["z"]);
        assert_eq!(store.status().unwrap().cached_system_documents, 1);
    }

    #[test]
    fn system_set_survives_a_panicked_writer() {
        let (_dir, store) = open();
        store.set_system_documents(vec![KnowledgeDocument::system("sys-1", "Precios", "x")]);

        let poisoned = std::thread::scope(|scope| {
            scope
                .spawn(|| {
                    let _guard = store.system.write().unwrap();
                    panic!("writer panicked while holding the lock");
                })
                .join()
        });
        assert!(poisoned.is_err());
        assert!(store.system.is_poisoned());

        assert_eq!(store.system_documents()[0].id, "sys-1");
        store.set_system_documents(vec![KnowledgeDocument::system("sys-2", "Horarios", "y")]);
        assert_eq!(store.system_documents()[0].id, "sys-2");
        assert!(matches!(
            store.remove_document("sys-2"),
            Err(StoreError::SystemOwned(_))
        ));
    }

    #[test]
    fn clear_and_status() {
        let (_dir, store) = open();
        store.set_system_documents(vec![KnowledgeDocument::system("s", "S", "abcdefgh")]);
        store.add_document("a", "abcd").unwrap();
        store.add_document("b", "abcd").unwrap();

        let status = store.status().unwrap();
        assert_eq!(status.system_documents, 1);
        assert_eq!(status.local_documents, 2);
        assert_eq!(status.total_estimated_tokens, 4);

        assert_eq!(store.clear_local_documents().unwrap(), 2);
        assert_eq!(store.status().unwrap().local_documents, 0);
    }
}
