use common::StorageError;
use common::document::DocumentStoreError;

/// A collection could not be drained completely.
#[derive(Debug, thiserror::Error)]
#[error("Failed to drain {collection} after {cycles} cycles ({deleted} deleted): {source}")]
pub struct DrainError {
    pub collection: String,
    /// Pages committed before the failure.
    pub cycles: usize,
    pub deleted: usize,
    #[source]
    pub source: DocumentStoreError,
}

/// One entry of a deletion plan failed.
#[derive(Debug, thiserror::Error)]
pub enum EntryError {
    #[error(transparent)]
    Drain(#[from] DrainError),
    #[error("Failed to delete document {path}: {source}")]
    Document {
        path: String,
        #[source]
        source: DocumentStoreError,
    },
    #[error("Failed to delete objects under {bucket}/{prefix}: {source}")]
    Blobs {
        bucket: String,
        prefix: String,
        #[source]
        source: object_store::Error,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, thiserror::Error)]
pub enum CascadeError {
    /// The first failed plan entry. Sibling entries ran to completion and
    /// stay committed.
    #[error("Cascade of {root} failed at '{entry}' ({completed} entries completed, {failed} failed): {source}")]
    Subtask {
        root: String,
        entry: String,
        #[source]
        source: EntryError,
        completed: usize,
        failed: usize,
    },
    #[error(transparent)]
    InvalidPath(#[from] DocumentStoreError),
}
