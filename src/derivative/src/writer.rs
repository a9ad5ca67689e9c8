use common::Bucket;
use common::asset::derivative_key;
use object_store::path::Path;
use std::time::Duration;
use url::Url;

use crate::error::WriterError;
use crate::transformer::{StreamTransformer, TransformHandle, TransformRequest, TransformStats};

/// A derivative that is durably stored, with access descriptors for both objects.
#[derive(Debug, Clone)]
pub struct WrittenDerivative {
    pub derivative_key: String,
    pub primary_access: Url,
    pub derivative_access: Url,
    pub stats: TransformStats,
}

/// Writes the derivative of a primary object next to it and produces the
/// access descriptors the metadata record will carry.
#[derive(Debug, Clone)]
pub struct DerivativeWriter {
    transformer: StreamTransformer,
}

impl DerivativeWriter {
    pub fn new(transformer: StreamTransformer) -> Self {
        Self { transformer }
    }

    pub fn transformer(&self) -> &StreamTransformer {
        &self.transformer
    }

    pub fn derivative_key(&self, primary: &str) -> String {
        derivative_key(primary, &self.transformer.config().name_prefix)
    }

    /// Start the transform of `primary` into its derivative key.
    pub fn start(&self, bucket: &Bucket, primary: &str, content_type: &str) -> PendingDerivative {
        let derivative_key = self.derivative_key(primary);
        let source = Path::from(primary);
        let destination = Path::from(derivative_key.as_str());

        let handle = self.transformer.spawn(TransformRequest {
            store: bucket.store().clone(),
            source: source.clone(),
            destination: destination.clone(),
            content_type: content_type.to_string(),
            with_attributes: bucket.supports_attributes(),
        });

        PendingDerivative {
            bucket: bucket.clone(),
            source,
            destination,
            derivative_key,
            access_ttl: self.transformer.config().access_ttl,
            handle,
        }
    }

    /// Transform, write and sign in one go.
    pub async fn write(
        &self,
        bucket: &Bucket,
        primary: &str,
        content_type: &str,
    ) -> Result<WrittenDerivative, WriterError> {
        self.start(bucket, primary, content_type).finish().await
    }
}

/// A derivative whose transform is running.
#[derive(Debug)]
pub struct PendingDerivative {
    bucket: Bucket,
    source: Path,
    destination: Path,
    derivative_key: String,
    access_ttl: Duration,
    handle: TransformHandle,
}

impl PendingDerivative {
    pub fn derivative_key(&self) -> &str {
        &self.derivative_key
    }

    /// Wait until the source is resized and the write has begun. `false` when
    /// the transform failed; [`Self::finish`] reports why.
    pub async fn transformed(&mut self) -> bool {
        self.handle.resized().await
    }

    /// Wait for the destination write to complete, then request access
    /// descriptors for both objects.
    ///
    /// Descriptors are only requested once the destination object exists; a
    /// failure at that point leaves the derivative in place and is reported
    /// as [`WriterError::Access`].
    pub async fn finish(self) -> Result<WrittenDerivative, WriterError> {
        let stats = self.handle.finished().await?;

        tracing::debug!(
            bucket = self.bucket.name(),
            derivative = %self.destination,
            output_bytes = stats.output_bytes,
            "Derivative written"
        );

        let primary_access = self.bucket.access_url(&self.source, self.access_ttl).await?;
        let derivative_access = self
            .bucket
            .access_url(&self.destination, self.access_ttl)
            .await?;

        Ok(WrittenDerivative {
            derivative_key: self.derivative_key,
            primary_access,
            derivative_access,
            stats,
        })
    }
}
