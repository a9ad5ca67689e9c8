use common::StorageError;
use common::document::DocumentStoreError;
use std::fmt;

use crate::rollback::RollbackReport;

/// Why an event needs no derivative work. Not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The object is not an image.
    NotAnImage { content_type: Option<String> },
    /// The object name already carries the derivative prefix.
    AlreadyDerivative,
    /// The owning record already holds a derivative access descriptor.
    AlreadyLinked,
    /// The record carries no asset payload.
    NoAssetPayload,
    /// The object sits at the bucket root, so no record owns it.
    NoOwningRecord,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotAnImage { content_type } => write!(
                f,
                "not an image ({})",
                content_type.as_deref().unwrap_or("no content type")
            ),
            SkipReason::AlreadyDerivative => write!(f, "already a derivative"),
            SkipReason::AlreadyLinked => write!(f, "derivative already linked"),
            SkipReason::NoAssetPayload => write!(f, "no asset payload"),
            SkipReason::NoOwningRecord => write!(f, "no owning metadata record"),
        }
    }
}

/// Reading or transforming the source failed; nothing was written.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("Source object {key} is not readable: {source}")]
    SourceUnreadable {
        key: String,
        #[source]
        source: object_store::Error,
    },
    #[error("Source object {key} exceeds {limit} bytes")]
    SourceTooLarge { key: String, limit: usize },
    #[error("Unsupported image content type: {0}")]
    UnsupportedFormat(String),
    #[error("Invalid image data: {0}")]
    InvalidImage(#[from] image::ImageError),
    #[error("Transform worker failed: {0}")]
    Worker(String),
    #[error("Destination stream closed before the transform finished")]
    SinkClosed,
}

/// The destination object could not be written; nothing was committed.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("Failed to write destination object {key}: {source}")]
    Destination {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Destination object {key} was not completed")]
    Incomplete { key: String },
}

/// Failure kinds of [`crate::DerivativeWriter`].
#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Write(#[from] WriteError),
    /// The derivative was written but no access descriptor could be produced.
    #[error("Failed to obtain access descriptor: {0}")]
    Access(#[from] StorageError),
}

impl WriterError {
    /// Whether blobs were committed that a rollback has to remove.
    pub fn needs_rollback(&self) -> bool {
        matches!(self, WriterError::Access(_))
    }
}

/// The metadata record could not be updated within the attempt bound.
#[derive(Debug, thiserror::Error)]
#[error("Failed to link {record} after {attempts} attempts: {last}")]
pub struct LinkError {
    pub record: String,
    pub attempts: u32,
    #[source]
    pub last: DocumentStoreError,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Permanent transform failure for {key}: {source}")]
    Transform {
        key: String,
        #[source]
        source: TransformError,
    },
    #[error("Permanent write failure for {key}: {source}")]
    Write {
        key: String,
        #[source]
        source: WriteError,
    },
    #[error("Access descriptors unavailable for {key}: {source}")]
    Access {
        key: String,
        #[source]
        source: StorageError,
        rollback: RollbackReport,
    },
    #[error("Permanent link failure: {source}")]
    Link {
        #[source]
        source: LinkError,
        rollback: RollbackReport,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Document(#[from] DocumentStoreError),
}

impl PipelineError {
    /// Rollback performed before the failure surfaced, if any.
    pub fn rollback(&self) -> Option<&RollbackReport> {
        match self {
            PipelineError::Access { rollback, .. } | PipelineError::Link { rollback, .. } => {
                Some(rollback)
            }
            _ => None,
        }
    }
}
