//! Hierarchical document store holding asset metadata records.
//!
//! Paths are slash separated (`users/u1/motorcycles/m1`). A document belongs
//! to the collection named by its parent path, so `users/u1/motorcycles` is
//! the collection of the document above. Every call is atomic on its own;
//! there are no cross-call transactions.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::config::DocumentStoreConfig;

pub use memory::InMemoryDocumentStore;
pub use sqlite::SqliteDocumentStore;

/// Field values of one document.
pub type Fields = Map<String, Value>;

/// Field updates keyed by dotted path (`image.thumbnailUrl`).
pub type FieldUpdates = BTreeMap<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum DocumentStoreError {
    #[error("Document not found: {0}")]
    NotFound(String),
    #[error("Invalid document path '{0}'")]
    InvalidPath(String),
    #[error("Document store backend error: {0}")]
    Backend(#[from] sqlx::Error),
    #[error("Failed to (de)serialize document fields: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DocumentStoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DocumentStoreError::NotFound(_))
    }
}

fn validate(path: &str) -> Result<(), DocumentStoreError> {
    if path.is_empty() || path.split('/').any(str::is_empty) {
        return Err(DocumentStoreError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Path of a single document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentPath(String);

impl DocumentPath {
    pub fn parse(path: impl Into<String>) -> Result<Self, DocumentStoreError> {
        let path = path.into();
        validate(&path)?;
        Ok(Self(path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Document id, the last path segment.
    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Collection the document lives in; the empty string for top-level documents.
    pub fn collection(&self) -> &str {
        self.0.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Path of a collection of documents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn parse(path: impl Into<String>) -> Result<Self, DocumentStoreError> {
        let path = path.into();
        validate(&path)?;
        Ok(Self(path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn doc(&self, id: &str) -> Result<DocumentPath, DocumentStoreError> {
        DocumentPath::parse(format!("{}/{id}", self.0))
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to a document returned by a collection query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    pub path: DocumentPath,
}

/// Hierarchical document store consumed by the derivative and cascade engines.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Fields>, DocumentStoreError>;

    /// Create or replace a document.
    async fn set(&self, path: &DocumentPath, fields: Fields) -> Result<(), DocumentStoreError>;

    /// Fetch at most `limit` documents of a collection, in path order.
    async fn query(
        &self,
        collection: &CollectionPath,
        limit: usize,
    ) -> Result<Vec<DocumentRef>, DocumentStoreError>;

    /// Delete all referenced documents in one atomic write, returning how many existed.
    async fn batch_delete(&self, refs: &[DocumentRef]) -> Result<usize, DocumentStoreError>;

    /// Merge dotted field updates into an existing document.
    ///
    /// Fails with [`DocumentStoreError::NotFound`] when the document does not exist.
    async fn update(
        &self,
        path: &DocumentPath,
        updates: &FieldUpdates,
    ) -> Result<(), DocumentStoreError>;

    /// Delete a single document; deleting a missing document is not an error.
    async fn delete(&self, path: &DocumentPath) -> Result<(), DocumentStoreError>;
}

/// Apply dotted field updates, creating intermediate objects as needed.
pub fn apply_updates(fields: &mut Fields, updates: &FieldUpdates) {
    for (key, value) in updates {
        let mut segments = key.split('.').peekable();
        let mut target = &mut *fields;
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                target.insert(segment.to_string(), value.clone());
                break;
            }
            let entry = target
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            target = match entry {
                Value::Object(map) => map,
                _ => unreachable!("entry was just replaced by an object"),
            };
        }
    }
}

/// Create a document store from its DSN (`memory://` or `sqlite:`).
pub async fn create_document_store(
    config: &DocumentStoreConfig,
) -> anyhow::Result<Arc<dyn DocumentStore>> {
    if config.dsn.starts_with("memory:") {
        return Ok(Arc::new(InMemoryDocumentStore::new()));
    }
    if config.dsn.starts_with("sqlite:") {
        return Ok(Arc::new(SqliteDocumentStore::connect(&config.dsn).await?));
    }
    anyhow::bail!(
        "Unsupported documents DSN: {}. Supported: memory://, sqlite:",
        config.dsn
    )
}
