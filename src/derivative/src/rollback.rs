use common::Bucket;
use common::config::RollbackPolicy;
use object_store::path::Path;

/// Outcome of a compensating delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackReport {
    pub deleted: Vec<String>,
    /// Keys that could not be removed, with the reason.
    pub failed: Vec<(String, String)>,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Removes the blobs of a pipeline run that could not be linked.
///
/// Best effort: every key is attempted once, failures are logged and
/// reported but never retried.
#[derive(Debug, Clone, Copy)]
pub struct RollbackCompensator {
    policy: RollbackPolicy,
}

impl RollbackCompensator {
    pub fn new(policy: RollbackPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> RollbackPolicy {
        self.policy
    }

    pub async fn compensate(&self, bucket: &Bucket, primary: &str, derivative: &str) -> RollbackReport {
        let keys = match self.policy {
            RollbackPolicy::PrimaryAndDerivative => vec![primary, derivative],
            RollbackPolicy::DerivativeOnly => vec![derivative],
        };

        let report = remove_objects(bucket, &keys).await;
        tracing::warn!(
            bucket = bucket.name(),
            policy = ?self.policy,
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "Rolled back derivative pipeline"
        );
        report
    }
}

/// Delete each key once; a missing object counts as deleted.
pub async fn remove_objects(bucket: &Bucket, keys: &[&str]) -> RollbackReport {
    let mut report = RollbackReport::default();
    for key in keys {
        match bucket.store().delete(&Path::from(*key)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => {
                report.deleted.push(key.to_string());
            }
            Err(e) => {
                tracing::error!(
                    bucket = bucket.name(),
                    key = %key,
                    error = %e,
                    "Failed to delete object"
                );
                report.failed.push((key.to_string(), e.to_string()));
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    async fn seeded() -> Bucket {
        let bucket = Bucket::in_memory("photos");
        for key in ["images/bike1.jpg", "images/thumb_bike1.jpg"] {
            bucket
                .store()
                .put(&Path::from(key), Bytes::from_static(b"x").into())
                .await
                .unwrap();
        }
        bucket
    }

    #[tokio::test]
    async fn test_removes_primary_and_derivative() {
        let bucket = seeded().await;
        let report = RollbackCompensator::new(RollbackPolicy::PrimaryAndDerivative)
            .compensate(&bucket, "images/bike1.jpg", "images/thumb_bike1.jpg")
            .await;

        assert!(report.is_clean());
        assert_eq!(report.deleted, vec!["images/bike1.jpg", "images/thumb_bike1.jpg"]);
        assert!(bucket.store().head(&Path::from("images/bike1.jpg")).await.is_err());
        assert!(bucket.store().head(&Path::from("images/thumb_bike1.jpg")).await.is_err());
    }

    #[tokio::test]
    async fn test_derivative_only_keeps_primary() {
        let bucket = seeded().await;
        let report = RollbackCompensator::new(RollbackPolicy::DerivativeOnly)
            .compensate(&bucket, "images/bike1.jpg", "images/thumb_bike1.jpg")
            .await;

        assert_eq!(report.deleted, vec!["images/thumb_bike1.jpg"]);
        assert!(bucket.store().head(&Path::from("images/bike1.jpg")).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_objects_count_as_removed() {
        let bucket = Bucket::in_memory("photos");
        let report = RollbackCompensator::new(RollbackPolicy::PrimaryAndDerivative)
            .compensate(&bucket, "images/bike1.jpg", "images/thumb_bike1.jpg")
            .await;

        assert!(report.is_clean());
        assert_eq!(report.deleted.len(), 2);
    }
}
