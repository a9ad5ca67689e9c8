use common::asset::{Asset, dirname};
use common::config::{DerivativeConfig, LinkerConfig};
use common::document::{DocumentPath, DocumentStore};
use common::event::{DocumentWritten, ObjectFinalized};
use common::{Bucket, BucketRegistry};
use std::fmt;
use std::sync::Arc;

use crate::error::{PipelineError, SkipReason, WriterError};
use crate::linker::MetadataLinker;
use crate::rollback::{RollbackCompensator, RollbackReport, remove_objects};
use crate::transformer::StreamTransformer;
use crate::writer::DerivativeWriter;

/// States of one pipeline run.
///
/// `Pending -> Transforming -> Writing -> Linking(1..=n) -> Committed`, with
/// `Failed { rollback: false }` for transform and write failures and
/// `Failed { rollback: true } -> RolledBack` once blobs were committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Pending,
    Transforming,
    Writing,
    Linking { attempt: u32 },
    Committed,
    Failed { rollback: bool },
    RolledBack,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Pending => write!(f, "pending"),
            PipelineState::Transforming => write!(f, "transforming"),
            PipelineState::Writing => write!(f, "writing"),
            PipelineState::Linking { attempt } => write!(f, "linking({attempt})"),
            PipelineState::Committed => write!(f, "committed"),
            PipelineState::Failed { rollback: true } => write!(f, "failed(rollback)"),
            PipelineState::Failed { rollback: false } => write!(f, "failed(no rollback needed)"),
            PipelineState::RolledBack => write!(f, "rolled-back"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    NotApplicable(SkipReason),
    Committed(Asset),
}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub outcome: PipelineOutcome,
    /// States entered by the run, in order; empty when not applicable.
    pub states: Vec<PipelineState>,
    /// Cleanup of the blobs of a replaced asset, when one was replaced.
    pub replaced: Option<RollbackReport>,
}

impl PipelineReport {
    fn not_applicable(reason: SkipReason) -> Self {
        Self {
            outcome: PipelineOutcome::NotApplicable(reason),
            states: Vec::new(),
            replaced: None,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self.outcome, PipelineOutcome::Committed(_))
    }

    /// Whether the run changed nothing: no derivative and no replaced asset removed.
    pub fn is_noop(&self) -> bool {
        matches!(self.outcome, PipelineOutcome::NotApplicable(_)) && self.replaced.is_none()
    }
}

/// Records and logs the state transitions of one run.
struct Transitions<'a> {
    record: &'a DocumentPath,
    primary: &'a str,
    states: Vec<PipelineState>,
}

impl<'a> Transitions<'a> {
    fn new(record: &'a DocumentPath, primary: &'a str) -> Self {
        let mut transitions = Self {
            record,
            primary,
            states: Vec::new(),
        };
        transitions.enter(PipelineState::Pending);
        transitions
    }

    fn enter(&mut self, state: PipelineState) {
        tracing::debug!(
            record = %self.record,
            primary = self.primary,
            state = %state,
            "Pipeline state transition"
        );
        self.states.push(state);
    }
}

/// Generates a derivative for a primary object and links both onto the
/// owning metadata record, rolling back committed blobs when linking fails
/// for good.
#[derive(Clone)]
pub struct DerivativePipeline {
    buckets: Arc<BucketRegistry>,
    documents: Arc<dyn DocumentStore>,
    writer: DerivativeWriter,
    linker: MetadataLinker,
    compensator: RollbackCompensator,
}

impl DerivativePipeline {
    pub fn new(
        buckets: Arc<BucketRegistry>,
        documents: Arc<dyn DocumentStore>,
        derivative: DerivativeConfig,
        linker: LinkerConfig,
    ) -> Self {
        let compensator = RollbackCompensator::new(derivative.rollback);
        Self {
            writer: DerivativeWriter::new(StreamTransformer::new(derivative)),
            linker: MetadataLinker::new(documents.clone(), linker),
            buckets,
            documents,
            compensator,
        }
    }

    /// Handle a newly finalized object. The owning record is the document at
    /// the object's directory path.
    pub async fn on_object_finalized(
        &self,
        event: &ObjectFinalized,
    ) -> Result<PipelineReport, PipelineError> {
        let primary = event.object_name.as_str();
        if let Err(reason) = self
            .writer
            .transformer()
            .check_applicable(primary, event.content_type.as_deref())
        {
            return Ok(self.skip(primary, reason));
        }
        let Some(record) = dirname(primary) else {
            return Ok(self.skip(primary, SkipReason::NoOwningRecord));
        };
        let record = DocumentPath::parse(record)?;
        let bucket = self.buckets.get(&event.bucket)?;

        if let Some(fields) = self.documents.get(&record).await? {
            if let Some(asset) = Asset::from_fields(&fields) {
                if asset.is_linked() && asset.primary == primary {
                    return Ok(self.skip(primary, SkipReason::AlreadyLinked));
                }
            }
        }

        // applicability checked above, so the content type is present
        let content_type = event.content_type.as_deref().unwrap_or_default();
        self.run(bucket, &record, primary, content_type).await
    }

    /// Handle a created or updated metadata record whose asset is not linked
    /// yet. Also the re-drive path for runs that never reached `Committed`.
    ///
    /// When the update replaced a linked asset with a different primary, the
    /// prior primary and derivative are deleted once the new asset is
    /// committed. That includes the write made by linking the new asset.
    pub async fn on_document_written(
        &self,
        event: &DocumentWritten,
    ) -> Result<PipelineReport, PipelineError> {
        let Some(asset) = Asset::from_fields(&event.field_values) else {
            return Ok(self.skip(&event.document_path, SkipReason::NoAssetPayload));
        };
        let replaced = event
            .prior_field_values
            .as_ref()
            .and_then(Asset::from_fields)
            .filter(|prior| prior.derivative.is_some() && prior.primary != asset.primary);

        if asset.is_linked() {
            let mut report = self.skip(&asset.primary, SkipReason::AlreadyLinked);
            if let Some(prior) = replaced {
                let record = DocumentPath::parse(event.document_path.as_str())?;
                report.replaced = Some(self.remove_replaced(&record, &prior).await?);
            }
            return Ok(report);
        }
        if let Err(reason) = self
            .writer
            .transformer()
            .check_applicable(&asset.primary, asset.content_type.as_deref())
        {
            return Ok(self.skip(&asset.primary, reason));
        }

        let record = DocumentPath::parse(event.document_path.as_str())?;
        let bucket = self.buckets.resolve(asset.bucket.as_deref())?;
        let content_type = asset.content_type.as_deref().unwrap_or_default();
        let mut report = self.run(bucket, &record, &asset.primary, content_type).await?;
        if let Some(prior) = replaced {
            report.replaced = Some(self.remove_replaced(&record, &prior).await?);
        }
        Ok(report)
    }

    fn skip(&self, subject: &str, reason: SkipReason) -> PipelineReport {
        tracing::debug!(subject, %reason, "Derivative not applicable");
        PipelineReport::not_applicable(reason)
    }

    async fn run(
        &self,
        bucket: &Bucket,
        record: &DocumentPath,
        primary: &str,
        content_type: &str,
    ) -> Result<PipelineReport, PipelineError> {
        let mut transitions = Transitions::new(record, primary);

        transitions.enter(PipelineState::Transforming);
        let mut pending = self.writer.start(bucket, primary, content_type);
        let derivative_key = pending.derivative_key().to_string();

        if pending.transformed().await {
            transitions.enter(PipelineState::Writing);
        }
        let written = match pending.finish().await {
            Ok(written) => written,
            Err(WriterError::Transform(source)) => {
                transitions.enter(PipelineState::Failed { rollback: false });
                tracing::error!(bucket = bucket.name(), primary, error = %source, "Transform failed");
                return Err(PipelineError::Transform {
                    key: primary.to_string(),
                    source,
                });
            }
            Err(WriterError::Write(source)) => {
                transitions.enter(PipelineState::Failed { rollback: false });
                tracing::error!(bucket = bucket.name(), derivative = %derivative_key, error = %source, "Derivative write failed");
                return Err(PipelineError::Write {
                    key: derivative_key,
                    source,
                });
            }
            Err(WriterError::Access(source)) => {
                transitions.enter(PipelineState::Failed { rollback: true });
                tracing::error!(bucket = bucket.name(), primary, error = %source, "Access descriptors unavailable");
                let rollback = self.compensator.compensate(bucket, primary, &derivative_key).await;
                transitions.enter(PipelineState::RolledBack);
                return Err(PipelineError::Access {
                    key: primary.to_string(),
                    source,
                    rollback,
                });
            }
        };

        let asset = Asset {
            primary: primary.to_string(),
            primary_access: Some(written.primary_access.to_string()),
            derivative: Some(written.derivative_key.clone()),
            derivative_access: Some(written.derivative_access.to_string()),
            bucket: Some(bucket.name().to_string()),
            content_type: Some(content_type.to_string()),
        };

        let linked = self
            .linker
            .link(record, &asset.to_updates(), |attempt| {
                transitions.enter(PipelineState::Linking { attempt })
            })
            .await;
        if let Err(source) = linked {
            transitions.enter(PipelineState::Failed { rollback: true });
            let rollback = self
                .compensator
                .compensate(bucket, primary, &written.derivative_key)
                .await;
            transitions.enter(PipelineState::RolledBack);
            return Err(PipelineError::Link { source, rollback });
        }

        transitions.enter(PipelineState::Committed);
        tracing::info!(
            bucket = bucket.name(),
            record = %record,
            primary,
            derivative = %written.derivative_key,
            width = written.stats.width,
            height = written.stats.height,
            "Derivative linked"
        );

        Ok(PipelineReport {
            outcome: PipelineOutcome::Committed(asset),
            states: transitions.states,
            replaced: None,
        })
    }

    async fn remove_replaced(
        &self,
        record: &DocumentPath,
        prior: &Asset,
    ) -> Result<RollbackReport, PipelineError> {
        let bucket = self.buckets.resolve(prior.bucket.as_deref())?;
        let mut keys = vec![prior.primary.as_str()];
        keys.extend(prior.derivative.as_deref());

        let report = remove_objects(bucket, &keys).await;
        tracing::info!(
            bucket = bucket.name(),
            record = %record,
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "Removed replaced asset"
        );
        Ok(report)
    }
}
