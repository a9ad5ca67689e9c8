use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

const SUPPORTED_BUCKET_SCHEMES: &[&str] = &["memory", "file", "s3", "gs"];

/// Blob storage configuration: the named buckets the service may touch.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// Bucket used when a deleted record does not name one.
    ///
    /// Env: ASSETKEEPER__STORAGE__DEFAULT_BUCKET
    #[serde(default)]
    pub default_bucket: Option<String>,
    #[serde(default)]
    pub buckets: HashMap<String, BucketConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct BucketConfig {
    /// Object store DSN, e.g. `memory://`, `file:///srv/blobs`,
    /// `s3://key:secret@localhost:9000/photos` or `gs://photos`.
    pub dsn: String,
    /// Base URL handed out as access descriptor by stores that cannot sign.
    #[serde(default)]
    pub public_url: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DocumentStoreConfig {
    /// `memory://` or a `sqlite:` DSN.
    pub dsn: String,
}

impl Default for DocumentStoreConfig {
    fn default() -> Self {
        Self {
            dsn: String::from("sqlite://.data/assetkeeper.db"),
        }
    }
}

impl DocumentStoreConfig {
    pub fn in_memory() -> Self {
        Self {
            dsn: String::from("memory://"),
        }
    }
}

/// What the rollback compensator removes when linking fails for good.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RollbackPolicy {
    /// Remove the uploaded primary object together with its derivative.
    #[default]
    PrimaryAndDerivative,
    /// Remove only the generated derivative.
    DerivativeOnly,
}

/// Derivative (thumbnail) generation settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DerivativeConfig {
    /// Fit-inside bound width in pixels.
    ///
    /// Env: ASSETKEEPER__DERIVATIVE__MAX_WIDTH
    #[serde(default = "default_max_width")]
    pub max_width: u32,

    /// Fit-inside bound height in pixels.
    ///
    /// Env: ASSETKEEPER__DERIVATIVE__MAX_HEIGHT
    #[serde(default = "default_max_height")]
    pub max_height: u32,

    /// File name prefix marking an object as a derivative.
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,

    /// Upper bound on bytes read from a source object before it is rejected.
    #[serde(default = "default_max_source_bytes")]
    pub max_source_bytes: usize,

    /// Size of the chunks handed from the transform to the destination writer.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Number of in-flight chunks between the transform and the writer.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Lifetime of generated access descriptors.
    #[serde(with = "humantime_serde", default = "default_access_ttl")]
    pub access_ttl: Duration,

    #[serde(default)]
    pub rollback: RollbackPolicy,
}

fn default_max_width() -> u32 {
    250
}

fn default_max_height() -> u32 {
    250
}

fn default_name_prefix() -> String {
    "thumb_".to_string()
}

fn default_max_source_bytes() -> usize {
    64 * 1024 * 1024 // 64MB
}

fn default_chunk_size() -> usize {
    256 * 1024 // 256KB
}

fn default_channel_capacity() -> usize {
    4
}

fn default_access_ttl() -> Duration {
    Duration::from_secs(7 * 24 * 3600) // 7 days, the longest a V4 signature may live
}

impl Default for DerivativeConfig {
    fn default() -> Self {
        Self {
            max_width: default_max_width(),
            max_height: default_max_height(),
            name_prefix: default_name_prefix(),
            max_source_bytes: default_max_source_bytes(),
            chunk_size: default_chunk_size(),
            channel_capacity: default_channel_capacity(),
            access_ttl: default_access_ttl(),
            rollback: RollbackPolicy::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    Fixed,
    #[default]
    Exponential,
}

/// Retry policy for writing derivative locations back onto a metadata record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkerConfig {
    /// Total number of update attempts, including the first one.
    ///
    /// Env: ASSETKEEPER__LINKER__MAX_ATTEMPTS
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(with = "humantime_serde", default = "default_initial_delay")]
    pub initial_delay: Duration,

    #[serde(with = "humantime_serde", default = "default_max_delay")]
    pub max_delay: Duration,

    #[serde(default)]
    pub backoff: Backoff,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(8)
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff: Backoff::default(),
        }
    }
}

impl LinkerConfig {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let delay = match self.backoff {
            Backoff::Fixed => self.initial_delay,
            Backoff::Exponential => {
                let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
                self.initial_delay.saturating_mul(factor)
            }
        };
        delay.min(self.max_delay)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CascadeConfig {
    /// Documents fetched and deleted per batch commit.
    ///
    /// Env: ASSETKEEPER__CASCADE__BATCH_SIZE
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    20
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Configuration {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub documents: DocumentStoreConfig,
    #[serde(default)]
    pub derivative: DerivativeConfig,
    #[serde(default)]
    pub linker: LinkerConfig,
    #[serde(default)]
    pub cascade: CascadeConfig,
}

impl Configuration {
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file("assetkeeper.toml"))
            .merge(Env::prefixed("ASSETKEEPER__").split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("ASSETKEEPER__").split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Checks:
    /// - Thumbnail bound, prefix, chunking and source limit are positive
    /// - Linker performs at least one attempt
    /// - Cascade batch size is positive
    /// - Default bucket, when set, is a configured bucket
    pub fn validate(&self) -> anyhow::Result<()> {
        let derivative = &self.derivative;
        if derivative.max_width == 0 || derivative.max_height == 0 {
            anyhow::bail!(
                "derivative bound must be positive, got {}x{}",
                derivative.max_width,
                derivative.max_height
            );
        }
        if derivative.name_prefix.is_empty() {
            anyhow::bail!("derivative name_prefix cannot be empty");
        }
        if derivative.name_prefix.contains('/') {
            anyhow::bail!(
                "derivative name_prefix must not contain '/', got {}",
                derivative.name_prefix
            );
        }
        if derivative.max_source_bytes == 0 {
            anyhow::bail!("derivative max_source_bytes must be positive");
        }
        if derivative.chunk_size == 0 || derivative.channel_capacity == 0 {
            anyhow::bail!("derivative chunk_size and channel_capacity must be positive");
        }

        if self.linker.max_attempts == 0 {
            anyhow::bail!("linker max_attempts must be positive");
        }

        if self.cascade.batch_size == 0 {
            anyhow::bail!("cascade batch_size must be positive");
        }

        if let Some(default_bucket) = &self.storage.default_bucket {
            if !self.storage.buckets.contains_key(default_bucket) {
                anyhow::bail!("default bucket '{default_bucket}' is not configured");
            }
        }

        for (name, bucket) in &self.storage.buckets {
            if bucket.dsn.is_empty() {
                anyhow::bail!("bucket '{name}' has an empty DSN");
            }
            let url = url::Url::parse(&bucket.dsn)
                .map_err(|e| anyhow::anyhow!("bucket '{name}' has an invalid DSN: {e}"))?;
            if !SUPPORTED_BUCKET_SCHEMES.contains(&url.scheme()) {
                anyhow::bail!(
                    "bucket '{name}' uses unsupported scheme '{}', supported: {}",
                    url.scheme(),
                    SUPPORTED_BUCKET_SCHEMES.join(", ")
                );
            }
        }

        if self.documents.dsn.is_empty() {
            anyhow::bail!("documents DSN cannot be empty");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configless_operation() {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .extract::<Configuration>()
            .unwrap();

        assert_eq!(config.documents.dsn, "sqlite://.data/assetkeeper.db");
        assert_eq!(config.derivative.max_width, 250);
        assert_eq!(config.derivative.max_height, 250);
        assert_eq!(config.derivative.name_prefix, "thumb_");
        assert_eq!(config.linker.max_attempts, 5);
        assert_eq!(config.cascade.batch_size, 20);
        assert_eq!(config.derivative.rollback, RollbackPolicy::PrimaryAndDerivative);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_and_env_override() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "assetkeeper.toml",
                r#"
                [storage]
                default_bucket = "photos"

                [storage.buckets.photos]
                dsn = "memory://"
                public_url = "https://cdn.example.com/photos"

                [derivative]
                max_width = 320
                access_ttl = "1h"
                rollback = "derivative_only"

                [linker]
                initial_delay = "250ms"
                backoff = "fixed"
                "#,
            )?;
            jail.set_env("ASSETKEEPER__DERIVATIVE__MAX_HEIGHT", "180");
            jail.set_env("ASSETKEEPER__CASCADE__BATCH_SIZE", "50");

            let config = Configuration::load().expect("configuration loads");

            assert_eq!(config.storage.default_bucket.as_deref(), Some("photos"));
            let photos = config.storage.buckets.get("photos").unwrap();
            assert_eq!(photos.dsn, "memory://");
            assert_eq!(config.derivative.max_width, 320);
            assert_eq!(config.derivative.max_height, 180);
            assert_eq!(config.derivative.access_ttl, Duration::from_secs(3600));
            assert_eq!(config.derivative.rollback, RollbackPolicy::DerivativeOnly);
            assert_eq!(config.linker.initial_delay, Duration::from_millis(250));
            assert_eq!(config.linker.backoff, Backoff::Fixed);
            assert_eq!(config.cascade.batch_size, 50);
            Ok(())
        });
    }

    #[test]
    fn test_zero_bound_is_invalid() {
        let mut config = Configuration::default();
        config.derivative.max_height = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_batch_size_is_invalid() {
        let mut config = Configuration::default();
        config.cascade.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_default_bucket_is_invalid() {
        let mut config = Configuration::default();
        config.storage.default_bucket = Some("missing".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }

    #[test]
    fn test_bucket_dsn_scheme_is_checked() {
        let mut config = Configuration::default();
        config.storage.buckets.insert(
            "photos".to_string(),
            BucketConfig {
                dsn: "ftp://host/photos".to_string(),
                public_url: None,
            },
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unsupported scheme 'ftp'"));

        config.storage.buckets.insert(
            "photos".to_string(),
            BucketConfig {
                dsn: "not a url".to_string(),
                public_url: None,
            },
        );
        assert!(config.validate().unwrap_err().to_string().contains("invalid DSN"));

        for dsn in ["memory://", "file:///tmp/photos", "s3://localhost:9000/photos", "gs://photos"] {
            config.storage.buckets.insert(
                "photos".to_string(),
                BucketConfig {
                    dsn: dsn.to_string(),
                    public_url: None,
                },
            );
            assert!(config.validate().is_ok(), "{dsn} should be accepted");
        }
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let linker = LinkerConfig {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
            ..Default::default()
        };

        assert_eq!(linker.delay_after(1), Duration::from_millis(500));
        assert_eq!(linker.delay_after(2), Duration::from_secs(1));
        assert_eq!(linker.delay_after(3), Duration::from_secs(2));
        assert_eq!(linker.delay_after(4), Duration::from_secs(3));
    }

    #[test]
    fn test_fixed_backoff() {
        let linker = LinkerConfig {
            backoff: Backoff::Fixed,
            initial_delay: Duration::from_millis(100),
            ..Default::default()
        };

        assert_eq!(linker.delay_after(1), Duration::from_millis(100));
        assert_eq!(linker.delay_after(4), Duration::from_millis(100));
    }
}
