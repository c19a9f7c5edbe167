use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::services::retry::RetryConfig;
use crate::services::storage::BackendKind;
use crate::utils::hash::ChecksumAlgorithm;
use crate::utils::validation::MAX_UPLOAD_SIZE;

/// Expiry policy for uploads
#[derive(Debug, Clone, PartialEq)]
pub struct ExpirationConfig {
    /// Lifetime of an upload (default: 1 day)
    pub max_age: Duration,

    /// How often the purge worker runs (default: 1 hour)
    pub purge_interval: Duration,

    /// Measure age from the last write instead of creation (default: false)
    pub rolling: bool,
}

impl Default for ExpirationConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(24 * 3600),
            purge_interval: Duration::from_secs(3600),
            rolling: false,
        }
    }
}

/// Connection settings for an S3-compatible object store
#[derive(Debug, Clone, PartialEq)]
pub struct S3Settings {
    pub endpoint: Option<String>,
    pub bucket: String,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub force_path_style: bool,
}

impl Default for S3Settings {
    fn default() -> Self {
        Self {
            endpoint: None,
            bucket: "uploads".to_string(),
            region: "us-east-1".to_string(),
            access_key: None,
            secret_key: None,
            force_path_style: true,
        }
    }
}

/// Storage engine configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Payload backend (default: disk)
    pub backend: BackendKind,

    /// Upload directory for payloads and sidecars (default: "./upload")
    pub directory: PathBuf,

    /// Sidecar name prefix (default: "")
    pub meta_prefix: String,

    /// Sidecar name suffix (default: ".META")
    pub meta_suffix: String,

    /// Maximum upload size in bytes (default: 5 GB)
    pub max_upload_size: u64,

    /// Algorithms accepted for per-chunk checksums
    pub checksum_algorithms: Vec<ChecksumAlgorithm>,

    /// Whole-file digest computed on disk when the client declares none (default: sha256)
    pub digest_algorithm: ChecksumAlgorithm,

    /// Upload expiry; `None` disables it
    pub expiration: Option<ExpirationConfig>,

    /// Responses above this many bytes are streamed (default: 1 MB)
    pub stream_threshold: u64,

    /// Completed records kept in memory (default: 1000)
    pub cache_capacity: usize,

    /// Deleted ids remembered to answer `Gone` (default: 10000)
    pub tombstone_capacity: usize,

    /// Reject executables and script payloads on completion (default: true)
    pub block_executables: bool,

    /// Backoff for remote calls
    pub retry: RetryConfig,

    pub s3: S3Settings,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Disk,
            directory: PathBuf::from("./upload"),
            meta_prefix: String::new(),
            meta_suffix: ".META".to_string(),
            max_upload_size: MAX_UPLOAD_SIZE,
            checksum_algorithms: vec![
                ChecksumAlgorithm::Md5,
                ChecksumAlgorithm::Sha1,
                ChecksumAlgorithm::Sha256,
                ChecksumAlgorithm::Crc32,
            ],
            digest_algorithm: ChecksumAlgorithm::Sha256,
            expiration: None,
            stream_threshold: 1024 * 1024, // 1 MB
            cache_capacity: 1000,
            tombstone_capacity: 10_000,
            block_executables: true,
            retry: RetryConfig::default(),
            s3: S3Settings::default(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn parse_flag(key: &str) -> Option<bool> {
    env::var(key)
        .ok()
        .map(|v| v.to_lowercase() != "false" && v != "0")
}

impl StorageConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        let expiration = parse_env::<u64>("EXPIRATION_MAX_AGE_SECS")
            .filter(|secs| *secs > 0)
            .map(|secs| {
                let fallback = ExpirationConfig::default();
                ExpirationConfig {
                    max_age: Duration::from_secs(secs),
                    purge_interval: parse_env::<u64>("PURGE_INTERVAL_SECS")
                        .map(Duration::from_secs)
                        .unwrap_or(fallback.purge_interval),
                    rolling: parse_flag("EXPIRATION_ROLLING").unwrap_or(fallback.rolling),
                }
            });

        let retry = RetryConfig {
            max_retries: parse_env("RETRY_MAX_RETRIES").unwrap_or(default.retry.max_retries),
            initial_delay: parse_env::<u64>("RETRY_INITIAL_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(default.retry.initial_delay),
            max_delay: parse_env::<u64>("RETRY_MAX_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(default.retry.max_delay),
            multiplier: parse_env("RETRY_MULTIPLIER").unwrap_or(default.retry.multiplier),
            retryable_status_codes: env::var("RETRY_STATUS_CODES")
                .ok()
                .map(|v| v.split(',').filter_map(|c| c.trim().parse().ok()).collect())
                .unwrap_or(default.retry.retryable_status_codes),
        };

        let s3 = S3Settings {
            endpoint: env::var("S3_ENDPOINT").ok().or(default.s3.endpoint),
            bucket: env::var("S3_BUCKET").unwrap_or(default.s3.bucket),
            region: env::var("S3_REGION").unwrap_or(default.s3.region),
            access_key: env::var("S3_ACCESS_KEY").ok().or(default.s3.access_key),
            secret_key: env::var("S3_SECRET_KEY").ok().or(default.s3.secret_key),
            force_path_style: parse_flag("S3_FORCE_PATH_STYLE")
                .unwrap_or(default.s3.force_path_style),
        };

        Self {
            backend: parse_env("STORAGE_BACKEND").unwrap_or(default.backend),

            directory: env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.directory),

            meta_prefix: env::var("META_PREFIX").unwrap_or(default.meta_prefix),

            meta_suffix: env::var("META_SUFFIX").unwrap_or(default.meta_suffix),

            max_upload_size: parse_env("MAX_UPLOAD_SIZE").unwrap_or(default.max_upload_size),

            checksum_algorithms: env::var("CHECKSUM_ALGORITHMS")
                .ok()
                .map(|v| v.split(',').filter_map(|a| a.parse().ok()).collect())
                .unwrap_or(default.checksum_algorithms),

            digest_algorithm: parse_env("DIGEST_ALGORITHM").unwrap_or(default.digest_algorithm),

            expiration,

            stream_threshold: parse_env("STREAM_THRESHOLD").unwrap_or(default.stream_threshold),

            cache_capacity: parse_env("CACHE_CAPACITY").unwrap_or(default.cache_capacity),

            tombstone_capacity: parse_env("TOMBSTONE_CAPACITY")
                .unwrap_or(default.tombstone_capacity),

            block_executables: parse_flag("BLOCK_EXECUTABLES")
                .unwrap_or(default.block_executables),

            retry,
            s3,
        }
    }

    /// Create config for development (local disk, no content blocking, short expiry)
    pub fn development() -> Self {
        Self {
            directory: PathBuf::from("./upload-dev"),
            block_executables: false,
            expiration: Some(ExpirationConfig {
                max_age: Duration::from_secs(3600),
                purge_interval: Duration::from_secs(300),
                rolling: true,
            }),
            cache_capacity: 100,
            ..Self::default()
        }
    }

    /// Disk layout rooted at `directory`, everything else default
    pub fn with_directory(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }

    pub fn accepts_checksum(&self, algorithm: ChecksumAlgorithm) -> bool {
        self.checksum_algorithms.contains(&algorithm)
    }
}
