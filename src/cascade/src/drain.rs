use common::document::CollectionPath;

use crate::batch::BatchDeleter;
use crate::error::DrainError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Non-empty pages fetched and deleted.
    pub cycles: usize,
    pub deleted: usize,
}

/// Empties a collection page by page until a fetch comes back empty.
///
/// Cycles run strictly one after another; the next fetch starts only after
/// the previous batch committed. Each cycle is a fresh iteration that yields
/// back to the scheduler, so stack depth does not grow with collection size.
/// A store error ends the drain; the batch is not retried.
#[derive(Clone)]
pub struct CollectionDrain {
    deleter: BatchDeleter,
}

impl CollectionDrain {
    pub fn new(deleter: BatchDeleter) -> Self {
        Self { deleter }
    }

    pub async fn drain(&self, collection: &CollectionPath) -> Result<DrainReport, DrainError> {
        let mut report = DrainReport::default();
        loop {
            let page = match self.deleter.delete_page(collection).await {
                Ok(page) => page,
                Err(source) => {
                    return Err(DrainError {
                        collection: collection.to_string(),
                        cycles: report.cycles,
                        deleted: report.deleted,
                        source,
                    });
                }
            };
            if page.is_empty() {
                break;
            }

            report.cycles += 1;
            report.deleted += page.deleted;
            tokio::task::yield_now().await;
        }

        tracing::info!(
            collection = %collection,
            cycles = report.cycles,
            deleted = report.deleted,
            batch_size = self.deleter.batch_size(),
            "Collection drained"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::document::{
        DocumentRef, DocumentStore, DocumentStoreError, InMemoryDocumentStore, MockDocumentStore,
    };
    use serde_json::Map;
    use std::sync::Arc;

    async fn seeded(collection: &CollectionPath, n: usize) -> Arc<InMemoryDocumentStore> {
        let documents = Arc::new(InMemoryDocumentStore::new());
        for i in 0..n {
            documents
                .set(&collection.doc(&format!("doc{i:05}")).unwrap(), Map::new())
                .await
                .unwrap();
        }
        documents
    }

    #[tokio::test]
    async fn test_cycles_are_ceil_of_n_over_b() {
        let collection = CollectionPath::parse("users/u1/work_orders/m1/forms").unwrap();
        for (n, b, cycles) in [(45, 20, 3), (40, 20, 2), (1, 20, 1), (0, 20, 0)] {
            let documents = seeded(&collection, n).await;
            let drain = CollectionDrain::new(BatchDeleter::new(documents.clone(), b));

            let report = drain.drain(&collection).await.unwrap();

            assert_eq!(report.cycles, cycles, "n={n} b={b}");
            assert_eq!(report.deleted, n);
            assert!(documents.is_empty().await);
        }
    }

    #[tokio::test]
    async fn test_large_collection_drains_iteratively() {
        let collection = CollectionPath::parse("users/u1/costs").unwrap();
        let documents = seeded(&collection, 3000).await;
        let drain = CollectionDrain::new(BatchDeleter::new(documents.clone(), 1));

        let report = drain.drain(&collection).await.unwrap();

        assert_eq!(report.cycles, 3000);
        assert!(documents.is_empty().await);
    }

    #[tokio::test]
    async fn test_commit_failure_stops_the_drain() {
        let collection = CollectionPath::parse("users/u1/costs").unwrap();
        let mut documents = MockDocumentStore::new();
        documents.expect_query().times(2).returning(|collection, _| {
            Ok(vec![DocumentRef {
                path: collection.doc("c1").unwrap(),
            }])
        });
        let mut commits = 0;
        documents.expect_batch_delete().times(2).returning(move |refs| {
            commits += 1;
            if commits == 1 {
                Ok(refs.len())
            } else {
                Err(DocumentStoreError::NotFound("users/u1/costs/c1".to_string()))
            }
        });

        let drain = CollectionDrain::new(BatchDeleter::new(Arc::new(documents), 20));
        let err = drain.drain(&collection).await.unwrap_err();

        assert_eq!(err.collection, "users/u1/costs");
        assert_eq!(err.cycles, 1);
        assert_eq!(err.deleted, 1);
    }
}
