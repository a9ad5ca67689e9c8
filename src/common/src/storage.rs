use async_trait::async_trait;
use chrono::Utc;
use object_store::aws::AmazonS3Builder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::ObjectStore;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::config::{BucketConfig, StorageConfig};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Unknown bucket: {0}")]
    UnknownBucket(String),
    #[error("No bucket named and no default bucket configured")]
    NoDefaultBucket,
    #[error("Invalid storage DSN '{dsn}': {reason}")]
    InvalidDsn { dsn: String, reason: String },
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
    #[error("Failed to build access descriptor for {path}: {reason}")]
    Access { path: String, reason: String },
}

/// Produces externally resolvable, time-bounded references to stored objects.
#[async_trait]
pub trait AccessSigner: Send + Sync + fmt::Debug {
    async fn access_url(&self, location: &Path, expires_in: Duration) -> Result<Url, StorageError>;
}

/// Signs GET URLs with the credentials of a cloud object store.
#[derive(Debug)]
pub struct StoreSigner {
    signer: Arc<dyn Signer>,
}

impl StoreSigner {
    pub fn new(signer: Arc<dyn Signer>) -> Self {
        Self { signer }
    }
}

#[async_trait]
impl AccessSigner for StoreSigner {
    async fn access_url(&self, location: &Path, expires_in: Duration) -> Result<Url, StorageError> {
        Ok(self
            .signer
            .signed_url(http::Method::GET, location, expires_in)
            .await?)
    }
}

/// Access descriptor for stores without signing support: a public base URL
/// joined with the object key and an `expires` unix timestamp.
#[derive(Debug, Clone)]
pub struct PublicUrlSigner {
    base: String,
}

impl PublicUrlSigner {
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl AccessSigner for PublicUrlSigner {
    async fn access_url(&self, location: &Path, expires_in: Duration) -> Result<Url, StorageError> {
        let expires_in = chrono::Duration::from_std(expires_in).map_err(|e| StorageError::Access {
            path: location.to_string(),
            reason: e.to_string(),
        })?;
        let expires = (Utc::now() + expires_in).timestamp();
        let raw = format!("{}/{}?expires={expires}", self.base, location);
        Url::parse(&raw).map_err(|e| StorageError::Access {
            path: location.to_string(),
            reason: e.to_string(),
        })
    }
}

/// A named blob bucket: where its objects live and how they are shared.
#[derive(Debug, Clone)]
pub struct Bucket {
    name: String,
    store: Arc<dyn ObjectStore>,
    signer: Arc<dyn AccessSigner>,
    supports_attributes: bool,
}

impl Bucket {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn ObjectStore>,
        signer: Arc<dyn AccessSigner>,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            signer,
            supports_attributes: true,
        }
    }

    /// Mark the store as unable to persist object attributes such as the
    /// content type (the local filesystem store rejects them).
    pub fn without_attributes(mut self) -> Self {
        self.supports_attributes = false;
        self
    }

    pub fn supports_attributes(&self) -> bool {
        self.supports_attributes
    }

    /// In-memory bucket handing out `memory://<name>/<key>` descriptors.
    pub fn in_memory(name: impl Into<String>) -> Self {
        let name = name.into();
        let signer = PublicUrlSigner::new(format!("memory://{name}"));
        Self::new(name, Arc::new(InMemory::new()), Arc::new(signer))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub async fn access_url(&self, location: &Path, expires_in: Duration) -> Result<Url, StorageError> {
        self.signer.access_url(location, expires_in).await
    }
}

/// Maps bucket names from trigger events onto configured object stores.
#[derive(Debug, Clone, Default)]
pub struct BucketRegistry {
    buckets: HashMap<String, Bucket>,
    default_bucket: Option<String>,
}

impl BucketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        let mut registry = Self::new();
        for (name, bucket_config) in &config.buckets {
            registry.insert(create_bucket(name, bucket_config)?);
        }
        registry.default_bucket = config.default_bucket.clone();
        Ok(registry)
    }

    /// Bucket used when a record does not name one.
    pub fn with_default(mut self, name: impl Into<String>) -> Self {
        self.default_bucket = Some(name.into());
        self
    }

    pub fn insert(&mut self, bucket: Bucket) {
        self.buckets.insert(bucket.name.clone(), bucket);
    }

    pub fn with_bucket(mut self, bucket: Bucket) -> Self {
        self.insert(bucket);
        self
    }

    pub fn get(&self, name: &str) -> Result<&Bucket, StorageError> {
        self.buckets
            .get(name)
            .ok_or_else(|| StorageError::UnknownBucket(name.to_string()))
    }

    /// The named bucket, or the default one when `name` is `None`.
    pub fn resolve(&self, name: Option<&str>) -> Result<&Bucket, StorageError> {
        match name.or(self.default_bucket.as_deref()) {
            Some(name) => self.get(name),
            None => Err(StorageError::NoDefaultBucket),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.buckets.keys().map(String::as_str)
    }
}

/// Create a bucket from its configuration.
///
/// Cloud stores sign their own access descriptors; memory and file stores use
/// `public_url`, falling back to the DSN itself.
pub fn create_bucket(name: &str, config: &BucketConfig) -> Result<Bucket, StorageError> {
    let url = parse_dsn(&config.dsn)?;

    let (store, signer): (Arc<dyn ObjectStore>, Arc<dyn AccessSigner>) = match url.scheme() {
        "s3" => {
            let s3 = Arc::new(
                create_s3_builder_from_dsn(&url)?
                    .build()
                    .map_err(StorageError::ObjectStore)?,
            );
            let signer: Arc<dyn AccessSigner> = Arc::new(StoreSigner::new(s3.clone()));
            (s3 as Arc<dyn ObjectStore>, signer)
        }
        "gs" => {
            let bucket = url.host_str().ok_or_else(|| StorageError::InvalidDsn {
                dsn: config.dsn.clone(),
                reason: "GCS DSN must specify a bucket: gs://bucket".to_string(),
            })?;
            let gcs = Arc::new(
                GoogleCloudStorageBuilder::from_env()
                    .with_bucket_name(bucket)
                    .build()
                    .map_err(StorageError::ObjectStore)?,
            );
            let signer: Arc<dyn AccessSigner> = Arc::new(StoreSigner::new(gcs.clone()));
            (gcs as Arc<dyn ObjectStore>, signer)
        }
        _ => {
            let store = create_object_store_from_dsn(&config.dsn)?;
            let base = match &config.public_url {
                Some(public_url) => public_url.clone(),
                None if url.scheme() == "memory" => format!("memory://{name}"),
                None => config.dsn.clone(),
            };
            let signer: Arc<dyn AccessSigner> = Arc::new(PublicUrlSigner::new(base));
            (store, signer)
        }
    };

    let bucket = Bucket::new(name, store, signer);
    if url.scheme() == "file" {
        return Ok(bucket.without_attributes());
    }
    Ok(bucket)
}

fn parse_dsn(dsn: &str) -> Result<Url, StorageError> {
    Url::parse(dsn).map_err(|e| StorageError::InvalidDsn {
        dsn: dsn.to_string(),
        reason: e.to_string(),
    })
}

/// Create an object store from a DSN string
pub fn create_object_store_from_dsn(dsn: &str) -> Result<Arc<dyn ObjectStore>, StorageError> {
    let url = parse_dsn(dsn)?;

    match url.scheme() {
        "file" => {
            let path = url.path();
            if path.is_empty() || path == "/" {
                return Err(StorageError::InvalidDsn {
                    dsn: dsn.to_string(),
                    reason: "File DSN must specify a path: file:///path/to/storage".to_string(),
                });
            }
            Ok(Arc::new(LocalFileSystem::new_with_prefix(path)?))
        }
        "memory" => Ok(Arc::new(InMemory::new())),
        "s3" => {
            let builder = create_s3_builder_from_dsn(&url)?;
            Ok(Arc::new(builder.build()?))
        }
        scheme => Err(StorageError::InvalidDsn {
            dsn: dsn.to_string(),
            reason: format!("Unsupported storage scheme: {scheme}. Supported: file, memory, s3"),
        }),
    }
}

/// Create an S3 builder from a DSN
/// DSN format: s3://[access_key:secret_key@]host[:port]/bucket
pub fn create_s3_builder_from_dsn(dsn: &Url) -> Result<AmazonS3Builder, StorageError> {
    let invalid = |reason: &str| StorageError::InvalidDsn {
        dsn: dsn.to_string(),
        reason: reason.to_string(),
    };

    let host = dsn.host_str().ok_or_else(|| invalid("Missing S3 host in DSN"))?;
    let port = dsn.port();
    let bucket = dsn.path().trim_start_matches('/');

    if bucket.is_empty() {
        return Err(invalid("S3 DSN must specify a bucket: s3://host/bucket"));
    }

    let mut builder = AmazonS3Builder::new()
        .with_bucket_name(bucket)
        .with_region("us-east-1");

    let access_key = dsn.username();
    let secret_key = dsn.password().unwrap_or("");

    if !access_key.is_empty() {
        builder = builder
            .with_access_key_id(access_key)
            .with_secret_access_key(secret_key);
    }

    // S3-compatible stores (MinIO etc.) need a custom endpoint and path-style URLs
    if !host.contains("amazonaws.com") {
        let scheme = if port == Some(443) { "https" } else { "http" };
        let endpoint = match port {
            Some(p) => format!("{scheme}://{host}:{p}"),
            None => format!("{scheme}://{host}"),
        };
        builder = builder
            .with_endpoint(endpoint)
            .with_allow_http(true)
            .with_virtual_hosted_style_request(false);
    }

    if access_key.is_empty() {
        if let Ok(env_key) = std::env::var("AWS_ACCESS_KEY_ID") {
            builder = builder.with_access_key_id(env_key);
        }
        if let Ok(env_secret) = std::env::var("AWS_SECRET_ACCESS_KEY") {
            builder = builder.with_secret_access_key(env_secret);
        }
        if let Ok(env_region) = std::env::var("AWS_DEFAULT_REGION") {
            builder = builder.with_region(env_region);
        }
    }

    Ok(builder)
}
