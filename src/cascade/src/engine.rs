use common::BucketRegistry;
use common::config::CascadeConfig;
use common::document::{DocumentPath, DocumentStore};
use common::event::DocumentDeleted;
use futures::future::join_all;
use std::sync::Arc;

use crate::batch::BatchDeleter;
use crate::drain::{CollectionDrain, DrainReport};
use crate::error::{CascadeError, EntryError};
use crate::plan::{DeletionPlan, PlanEntry, RootKind};
use crate::prefix::BlobPrefixDeleter;

/// What one completed plan entry removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    Drained(DrainReport),
    DocumentDeleted,
    ObjectsDeleted(usize),
    /// A blob entry with neither a recorded nor a default bucket.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CascadeOutcome {
    /// The deleted record is not the root of any plan.
    NotApplicable,
    Completed {
        kind: RootKind,
        entries: Vec<(PlanEntry, EntryOutcome)>,
    },
}

/// Deletes everything a root record owns, running all plan entries
/// concurrently.
///
/// Entries touch disjoint collections and prefixes, so they have no ordering
/// between them. A failed entry does not stop its siblings; completed entries
/// stay committed and the first failure is reported with the root and entry
/// identity for re-drive.
#[derive(Clone)]
pub struct CascadeDeletionEngine {
    buckets: Arc<BucketRegistry>,
    documents: Arc<dyn DocumentStore>,
    drain: CollectionDrain,
    blobs: BlobPrefixDeleter,
}

impl CascadeDeletionEngine {
    pub fn new(
        buckets: Arc<BucketRegistry>,
        documents: Arc<dyn DocumentStore>,
        config: &CascadeConfig,
    ) -> Self {
        let drain = CollectionDrain::new(BatchDeleter::new(documents.clone(), config.batch_size));
        Self {
            buckets,
            documents,
            drain,
            blobs: BlobPrefixDeleter::new(),
        }
    }

    pub async fn on_document_deleted(
        &self,
        event: &DocumentDeleted,
    ) -> Result<CascadeOutcome, CascadeError> {
        let root = DocumentPath::parse(event.document_path.as_str())?;
        match DeletionPlan::for_root(&root, event.prior_field_values.as_ref())? {
            Some(plan) => self.execute(plan).await,
            None => {
                tracing::debug!(root = %root, "No deletion plan for record");
                Ok(CascadeOutcome::NotApplicable)
            }
        }
    }

    pub async fn execute(&self, plan: DeletionPlan) -> Result<CascadeOutcome, CascadeError> {
        tracing::info!(
            root = %plan.root,
            kind = %plan.kind,
            entries = plan.entries.len(),
            "Starting cascade deletion"
        );

        let results = join_all(plan.entries.iter().map(|entry| self.run_entry(entry))).await;

        let mut completed = Vec::new();
        let mut failures = Vec::new();
        for (entry, result) in plan.entries.into_iter().zip(results) {
            match result {
                Ok(outcome) => completed.push((entry, outcome)),
                Err(e) => {
                    tracing::error!(
                        root = %plan.root,
                        entry = %entry,
                        error = %e,
                        "Cascade entry failed"
                    );
                    failures.push((entry, e));
                }
            }
        }

        let failed = failures.len();
        if let Some((entry, source)) = failures.into_iter().next() {
            tracing::warn!(
                root = %plan.root,
                completed = completed.len(),
                failed,
                "Cascade partially completed"
            );
            return Err(CascadeError::Subtask {
                root: plan.root.to_string(),
                entry: entry.to_string(),
                source,
                completed: completed.len(),
                failed,
            });
        }

        tracing::info!(
            root = %plan.root,
            kind = %plan.kind,
            completed = completed.len(),
            "Cascade deletion completed"
        );
        Ok(CascadeOutcome::Completed {
            kind: plan.kind,
            entries: completed,
        })
    }

    async fn run_entry(&self, entry: &PlanEntry) -> Result<EntryOutcome, EntryError> {
        match entry {
            PlanEntry::Drain(collection) => {
                Ok(EntryOutcome::Drained(self.drain.drain(collection).await?))
            }
            PlanEntry::DeleteDocument(path) => {
                self.documents
                    .delete(path)
                    .await
                    .map_err(|source| EntryError::Document {
                        path: path.to_string(),
                        source,
                    })?;
                tracing::info!(path = %path, "Deleted document");
                Ok(EntryOutcome::DocumentDeleted)
            }
            PlanEntry::DeletePrefix { bucket, prefix } => {
                let Some(bucket) = self.bucket(bucket.as_deref(), entry)? else {
                    return Ok(EntryOutcome::Skipped);
                };
                let deleted = self.blobs.delete_prefix(bucket, prefix).await?;
                Ok(EntryOutcome::ObjectsDeleted(deleted))
            }
            PlanEntry::DeleteObjects { bucket, keys } => {
                let Some(bucket) = self.bucket(bucket.as_deref(), entry)? else {
                    return Ok(EntryOutcome::Skipped);
                };
                let deleted = self.blobs.delete_objects(bucket, keys).await?;
                Ok(EntryOutcome::ObjectsDeleted(deleted))
            }
        }
    }

    fn bucket(
        &self,
        name: Option<&str>,
        entry: &PlanEntry,
    ) -> Result<Option<&common::Bucket>, EntryError> {
        match self.buckets.resolve(name) {
            Ok(bucket) => Ok(Some(bucket)),
            Err(common::StorageError::NoDefaultBucket) => {
                tracing::warn!(entry = %entry, "No bucket recorded or configured, skipping blobs");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}
