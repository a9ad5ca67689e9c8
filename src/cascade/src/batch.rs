use common::document::{CollectionPath, DocumentStore, DocumentStoreError};
use std::sync::Arc;

/// Result of one fetch/delete cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub fetched: usize,
    pub deleted: usize,
}

impl Page {
    pub fn is_empty(&self) -> bool {
        self.fetched == 0
    }
}

/// Deletes one bounded page of a collection in a single atomic write.
#[derive(Clone)]
pub struct BatchDeleter {
    documents: Arc<dyn DocumentStore>,
    batch_size: usize,
}

impl BatchDeleter {
    pub fn new(documents: Arc<dyn DocumentStore>, batch_size: usize) -> Self {
        Self {
            documents,
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub async fn delete_page(&self, collection: &CollectionPath) -> Result<Page, DocumentStoreError> {
        let refs = self.documents.query(collection, self.batch_size).await?;
        if refs.is_empty() {
            return Ok(Page {
                fetched: 0,
                deleted: 0,
            });
        }

        let deleted = self.documents.batch_delete(&refs).await?;
        tracing::debug!(
            collection = %collection,
            fetched = refs.len(),
            deleted,
            "Committed delete batch"
        );
        Ok(Page {
            fetched: refs.len(),
            deleted,
        })
    }
}
