use common::Bucket;
use futures::{StreamExt, TryStreamExt};
use object_store::path::Path;

use crate::error::EntryError;

/// Bulk deletion of blobs in one bucket.
///
/// Prefixes match whole path segments: `users/u1/motorcycles/m1` covers
/// `users/u1/motorcycles/m1/bike.jpg` but not `users/u1/motorcycles/m10/..`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlobPrefixDeleter;

impl BlobPrefixDeleter {
    pub fn new() -> Self {
        Self
    }

    /// Delete every object under `prefix`, returning how many were removed.
    pub async fn delete_prefix(&self, bucket: &Bucket, prefix: &str) -> Result<usize, EntryError> {
        let store = bucket.store();
        let location = Path::from(prefix);
        let locations = store
            .list(Some(&location))
            .map_ok(|meta| meta.location)
            .boxed();

        let deleted = store
            .delete_stream(locations)
            .try_fold(0usize, |count, _| async move { Ok(count + 1) })
            .await
            .map_err(|source| EntryError::Blobs {
                bucket: bucket.name().to_string(),
                prefix: prefix.to_string(),
                source,
            })?;

        tracing::info!(bucket = bucket.name(), prefix, deleted, "Deleted objects under prefix");
        Ok(deleted)
    }

    /// Delete the given keys; keys that no longer exist are skipped.
    pub async fn delete_objects(&self, bucket: &Bucket, keys: &[String]) -> Result<usize, EntryError> {
        let store = bucket.store();
        let locations = futures::stream::iter(
            keys.iter()
                .map(|key| Ok::<_, object_store::Error>(Path::from(key.as_str()))),
        )
        .boxed();

        let mut results = store.delete_stream(locations);
        let mut deleted = 0;
        while let Some(result) = results.next().await {
            match result {
                Ok(_) => deleted += 1,
                Err(object_store::Error::NotFound { path, .. }) => {
                    tracing::debug!(bucket = bucket.name(), key = %path, "Object already gone");
                }
                Err(source) => {
                    return Err(EntryError::Blobs {
                        bucket: bucket.name().to_string(),
                        prefix: keys.join(","),
                        source,
                    });
                }
            }
        }

        tracing::info!(bucket = bucket.name(), deleted, "Deleted objects");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    async fn bucket_with(keys: &[&str]) -> Bucket {
        let bucket = Bucket::in_memory("photos");
        for key in keys {
            bucket
                .store()
                .put(&Path::from(*key), Bytes::from_static(b"x").into())
                .await
                .unwrap();
        }
        bucket
    }

    async fn remaining(bucket: &Bucket) -> Vec<String> {
        let mut keys: Vec<String> = bucket
            .store()
            .list(None)
            .map_ok(|meta| meta.location.to_string())
            .try_collect()
            .await
            .unwrap();
        keys.sort();
        keys
    }

    #[tokio::test]
    async fn test_delete_prefix_matches_whole_segments() {
        let bucket = bucket_with(&[
            "users/u1/motorcycles/m1/bike.jpg",
            "users/u1/motorcycles/m1/thumb_bike.jpg",
            "users/u1/motorcycles/m10/bike.jpg",
        ])
        .await;

        let deleted = BlobPrefixDeleter::new()
            .delete_prefix(&bucket, "users/u1/motorcycles/m1")
            .await
            .unwrap();

        assert_eq!(deleted, 2);
        assert_eq!(remaining(&bucket).await, vec!["users/u1/motorcycles/m10/bike.jpg"]);
    }

    #[tokio::test]
    async fn test_delete_empty_prefix_is_a_noop() {
        let bucket = bucket_with(&["images/bike1.jpg"]).await;
        let deleted = BlobPrefixDeleter::new()
            .delete_prefix(&bucket, "users/u9")
            .await
            .unwrap();
        assert_eq!(deleted, 0);
        assert_eq!(remaining(&bucket).await.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_objects() {
        let bucket = bucket_with(&["images/bike1.jpg", "images/thumb_bike1.jpg", "images/bike2.jpg"]).await;
        BlobPrefixDeleter::new()
            .delete_objects(
                &bucket,
                &["images/bike1.jpg".to_string(), "images/thumb_bike1.jpg".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(remaining(&bucket).await, vec!["images/bike2.jpg"]);
    }
}
