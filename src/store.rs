//! Document store abstraction.
//!
//! The engine only ever reads and writes documents by primary id. Anything
//! that can answer [`DocumentStore::fetch_by_id`] and apply a whole-field
//! [`DocumentStore::update_fields`] can back an entity type.

use std::collections::HashMap;
use std::sync::RwLock;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Field holding a document's primary id.
pub const ID_FIELD: &str = "_id";

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("document store lock poisoned: {context}")]
    #[diagnostic(code(canopy::store::lock_poisoned))]
    LockPoisoned { context: String },

    #[error("no document with _id `{0}` to update")]
    #[diagnostic(
        code(canopy::store::missing_document),
        help("The document was removed between the read and the write; retry the operation")
    )]
    MissingDocument(String),

    #[error("store backend error: {0}")]
    #[diagnostic(code(canopy::store::backend))]
    Backend(String),
}

/// An opaque record from a store. Only the id, the users list, the owner
/// field and the role-permissions field carry meaning for authorization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    fields: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert(ID_FIELD.to_string(), Value::String(id.into()));
        Self { fields }
    }

    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn id(&self) -> Option<&str> {
        self.fields.get(ID_FIELD).and_then(Value::as_str)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    /// Builder-style [`Document::set`].
    pub fn with(mut self, field: impl Into<String>, value: Value) -> Self {
        self.set(field, value);
        self
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

/// Fetch/update-by-id access to one collection of documents.
///
/// Implementations must be `Send + Sync`; the registry shares them across
/// threads.
pub trait DocumentStore: Send + Sync + std::fmt::Debug {
    /// Returns `Ok(None)` when no document has this id.
    fn fetch_by_id(&self, id: &str) -> Result<Option<Document>, StoreError>;

    /// Replaces each given top-level field of the document wholesale.
    fn update_fields(&self, id: &str, fields: Map<String, Value>) -> Result<(), StoreError>;
}

/// A thread-safe, in-memory document collection.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<String, Document>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Documents without an `_id` are skipped.
    pub fn from_documents(documents: impl IntoIterator<Item = Document>) -> Self {
        let store = Self::new();
        for doc in documents {
            // A fresh lock cannot be poisoned.
            let _ = store.insert(doc);
        }
        store
    }

    /// Inserts or replaces a document, keyed by its `_id`. Returns `false`
    /// when the document has no id.
    pub fn insert(&self, doc: Document) -> Result<bool, StoreError> {
        let Some(id) = doc.id().map(str::to_string) else {
            tracing::warn!("ignoring document without an `{ID_FIELD}` field");
            return Ok(false);
        };
        let mut docs = self.documents.write().map_err(|e| StoreError::LockPoisoned {
            context: e.to_string(),
        })?;
        docs.insert(id, doc);
        Ok(true)
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        self.documents
            .read()
            .map(|d| d.len())
            .map_err(|e| StoreError::LockPoisoned {
                context: e.to_string(),
            })
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// All documents, ordered by id.
    pub fn snapshot(&self) -> Result<Vec<Document>, StoreError> {
        let docs = self.documents.read().map_err(|e| StoreError::LockPoisoned {
            context: e.to_string(),
        })?;
        let mut out: Vec<(String, Document)> =
            docs.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out.into_iter().map(|(_, d)| d).collect())
    }
}

impl DocumentStore for MemoryStore {
    fn fetch_by_id(&self, id: &str) -> Result<Option<Document>, StoreError> {
        let docs = self.documents.read().map_err(|e| StoreError::LockPoisoned {
            context: e.to_string(),
        })?;
        Ok(docs.get(id).cloned())
    }

    fn update_fields(&self, id: &str, fields: Map<String, Value>) -> Result<(), StoreError> {
        let mut docs = self.documents.write().map_err(|e| StoreError::LockPoisoned {
            context: e.to_string(),
        })?;
        let doc = docs
            .get_mut(id)
            .ok_or_else(|| StoreError::MissingDocument(id.to_string()))?;
        for (key, value) in fields {
            doc.set(key, value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fetch_missing_is_none() {
        let store = MemoryStore::new();
        assert!(store.fetch_by_id("nope").unwrap().is_none());
    }

    #[test]
    fn test_update_replaces_whole_field() {
        let store = MemoryStore::from_documents([Document::new("p1")
            .with("title", json!("hello"))
            .with("users", json!([{ "userId": "u1", "role": "author" }]))]);

        let mut fields = Map::new();
        fields.insert("users".into(), json!([]));
        store.update_fields("p1", fields).unwrap();

        let doc = store.fetch_by_id("p1").unwrap().unwrap();
        assert_eq!(doc.get("users"), Some(&json!([])));
        assert_eq!(doc.get("title"), Some(&json!("hello")));
    }

    #[test]
    fn test_update_missing_document() {
        let store = MemoryStore::new();
        let err = store.update_fields("ghost", Map::new()).unwrap_err();
        assert!(matches!(err, StoreError::MissingDocument(id) if id == "ghost"));
    }

    #[test]
    fn test_documents_without_id_are_skipped() {
        let store = MemoryStore::from_documents([
            Document::from_fields(Map::new()),
            Document::new("a"),
        ]);
        assert_eq!(store.len().unwrap(), 1);
        assert!(!store.is_empty().unwrap());
    }

    #[test]
    fn test_poisoned_lock_is_reported() {
        let store = MemoryStore::from_documents([Document::new("a")]);
        std::thread::scope(|s| {
            let _ = s
                .spawn(|| {
                    let _guard = store.documents.write().unwrap();
                    panic!("writer died holding the lock");
                })
                .join();
        });
        assert!(matches!(store.len(), Err(StoreError::LockPoisoned { .. })));
        assert!(store.is_empty().is_err());
        assert!(store.fetch_by_id("a").is_err());
    }

    #[test]
    fn test_snapshot_is_sorted_by_id() {
        let store = MemoryStore::from_documents([Document::new("b"), Document::new("a")]);
        let ids: Vec<String> = store
            .snapshot()
            .unwrap()
            .iter()
            .map(|d| d.id().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
