//! Wires the derivative pipeline and the cascade engine to trigger events.

pub mod dispatcher;

use anyhow::{Context, Result};
use cascade::CascadeDeletionEngine;
use common::BucketRegistry;
use common::config::Configuration;
use common::document::{DocumentStore, create_document_store};
use derivative::DerivativePipeline;
use std::sync::Arc;

pub use dispatcher::{DispatchError, DispatchOutcome, DispatchSummary, Dispatcher};

/// Shared collaborators of every event run.
pub struct Runtime {
    buckets: Arc<BucketRegistry>,
    documents: Arc<dyn DocumentStore>,
    pipeline: DerivativePipeline,
    cascade: CascadeDeletionEngine,
}

impl Runtime {
    pub fn new(
        buckets: BucketRegistry,
        documents: Arc<dyn DocumentStore>,
        config: &Configuration,
    ) -> Self {
        let buckets = Arc::new(buckets);
        let pipeline = DerivativePipeline::new(
            buckets.clone(),
            documents.clone(),
            config.derivative.clone(),
            config.linker.clone(),
        );
        let cascade = CascadeDeletionEngine::new(buckets.clone(), documents.clone(), &config.cascade);
        Self {
            buckets,
            documents,
            pipeline,
            cascade,
        }
    }

    /// Open the configured buckets and document store.
    pub async fn from_config(config: &Configuration) -> Result<Self> {
        let buckets =
            BucketRegistry::from_config(&config.storage).context("Failed to open blob buckets")?;
        let documents = create_document_store(&config.documents)
            .await
            .context("Failed to open document store")?;

        tracing::info!(
            buckets = ?buckets.names().collect::<Vec<_>>(),
            documents = %config.documents.dsn,
            "Runtime initialized"
        );
        Ok(Self::new(buckets, documents, config))
    }

    pub fn buckets(&self) -> &BucketRegistry {
        &self.buckets
    }

    pub fn documents(&self) -> &Arc<dyn DocumentStore> {
        &self.documents
    }

    pub fn pipeline(&self) -> &DerivativePipeline {
        &self.pipeline
    }

    pub fn cascade(&self) -> &CascadeDeletionEngine {
        &self.cascade
    }
}
