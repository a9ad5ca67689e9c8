use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::{
    CollectionPath, DocumentPath, DocumentRef, DocumentStore, DocumentStoreError, FieldUpdates,
    Fields, apply_updates,
};

/// Document store kept in process memory, ordered by path.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<BTreeMap<DocumentPath, Fields>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents directly inside a collection.
    pub async fn count(&self, collection: &CollectionPath) -> usize {
        self.documents
            .read()
            .await
            .keys()
            .filter(|path| path.collection() == collection.as_str())
            .count()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Fields>, DocumentStoreError> {
        Ok(self.documents.read().await.get(path).cloned())
    }

    async fn set(&self, path: &DocumentPath, fields: Fields) -> Result<(), DocumentStoreError> {
        self.documents.write().await.insert(path.clone(), fields);
        Ok(())
    }

    async fn query(
        &self,
        collection: &CollectionPath,
        limit: usize,
    ) -> Result<Vec<DocumentRef>, DocumentStoreError> {
        Ok(self
            .documents
            .read()
            .await
            .keys()
            .filter(|path| path.collection() == collection.as_str())
            .take(limit)
            .map(|path| DocumentRef { path: path.clone() })
            .collect())
    }

    async fn batch_delete(&self, refs: &[DocumentRef]) -> Result<usize, DocumentStoreError> {
        let mut documents = self.documents.write().await;
        Ok(refs
            .iter()
            .filter(|doc| documents.remove(&doc.path).is_some())
            .count())
    }

    async fn update(
        &self,
        path: &DocumentPath,
        updates: &FieldUpdates,
    ) -> Result<(), DocumentStoreError> {
        let mut documents = self.documents.write().await;
        let fields = documents
            .get_mut(path)
            .ok_or_else(|| DocumentStoreError::NotFound(path.to_string()))?;
        apply_updates(fields, updates);
        Ok(())
    }

    async fn delete(&self, path: &DocumentPath) -> Result<(), DocumentStoreError> {
        self.documents.write().await.remove(path);
        Ok(())
    }
}
