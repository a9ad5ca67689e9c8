use common::config::LinkerConfig;
use common::document::{DocumentPath, DocumentStore, FieldUpdates};
use std::sync::Arc;

use crate::error::LinkError;

/// Writes derivative locations back onto the owning metadata record.
///
/// The record may not be visible yet when the object-finalized event arrives,
/// so updates are retried up to `max_attempts` times with backoff between
/// attempts. Every failure kind is retried; `NotFound` is the expected
/// transient one.
#[derive(Clone)]
pub struct MetadataLinker {
    documents: Arc<dyn DocumentStore>,
    config: LinkerConfig,
}

impl MetadataLinker {
    pub fn new(documents: Arc<dyn DocumentStore>, config: LinkerConfig) -> Self {
        Self { documents, config }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Apply `updates` to `record`. `on_attempt` is invoked before every attempt.
    pub async fn link(
        &self,
        record: &DocumentPath,
        updates: &FieldUpdates,
        mut on_attempt: impl FnMut(u32),
    ) -> Result<u32, LinkError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            on_attempt(attempt);
            tracing::debug!(record = %record, attempt, max_attempts, "Linking derivative");

            let err = match self.documents.update(record, updates).await {
                Ok(()) => {
                    if attempt > 1 {
                        tracing::info!(record = %record, attempt, "Linked after retry");
                    }
                    return Ok(attempt);
                }
                Err(e) => e,
            };

            if attempt >= max_attempts {
                tracing::error!(
                    record = %record,
                    attempts = attempt,
                    error = %err,
                    "Link attempts exhausted"
                );
                return Err(LinkError {
                    record: record.to_string(),
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = self.config.delay_after(attempt);
            if err.is_not_found() {
                tracing::debug!(
                    record = %record,
                    attempt,
                    ?delay,
                    "Record not visible yet, retrying"
                );
            } else {
                tracing::warn!(
                    record = %record,
                    attempt,
                    ?delay,
                    error = %err,
                    "Link attempt failed, retrying"
                );
            }
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
