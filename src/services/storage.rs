use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::api::error::UploadError;
use crate::api::range::ByteRange;
use crate::models::{ByteStream, File};
use crate::utils::hash::ChecksumAlgorithm;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Disk,
    S3,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Disk => "disk",
            BackendKind::S3 => "s3",
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = UploadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "disk" | "local" => Ok(BackendKind::Disk),
            "s3" | "minio" => Ok(BackendKind::S3),
            other => Err(UploadError::FileError(format!(
                "Unknown storage backend: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    /// An aborted chunk may keep the bytes it delivered
    pub partial_writes: bool,
    /// Physical names map to paths on a local filesystem
    pub local_filesystem: bool,
    /// `move_object` is a rename rather than copy + delete
    pub native_rename: bool,
}

/// Client-declared checksum for one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    pub algorithm: ChecksumAlgorithm,
    pub value: String,
}

/// One chunk handed to a backend. The engine has already checked that
/// `start` matches the record.
pub struct ChunkWrite {
    pub start: u64,
    pub body: ByteStream,
    pub content_length: Option<u64>,
    pub checksum: Option<Checksum>,
    pub cancel: Option<CancellationToken>,
    /// Ceiling applied when neither content length nor size bound the chunk
    pub max_size: u64,
}

impl ChunkWrite {
    /// Most bytes this chunk may carry.
    pub fn limit(&self, size: Option<u64>) -> u64 {
        match (self.content_length, size) {
            (Some(length), _) => length,
            (None, Some(size)) => size.saturating_sub(self.start),
            (None, None) => self.max_size.saturating_sub(self.start),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOutcome {
    /// Total bytes stored for the upload after this chunk
    pub bytes_written: u64,
    pub aborted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHead {
    pub name: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    pub objects: Vec<ObjectHead>,
    pub next_token: Option<String>,
}

/// Physical payload I/O. Backends never touch metadata; the engine owns it.
#[async_trait]
pub trait PayloadBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn capabilities(&self) -> BackendCapabilities;

    /// True when `name` collides with an object the backend keeps for itself.
    fn is_reserved_name(&self, _name: &str) -> bool {
        false
    }

    /// Prepares storage for `file.name`. Returns the bytes already stored,
    /// which is non-zero when an interrupted upload is resumed.
    async fn create(&self, file: &mut File) -> Result<u64, UploadError>;

    async fn write_chunk(
        &self,
        file: &mut File,
        chunk: ChunkWrite,
    ) -> Result<ChunkOutcome, UploadError>;

    /// Seals a completed upload. Sets `file.hash` when the backend computed one.
    async fn finalize(&self, file: &mut File) -> Result<(), UploadError>;

    /// Discards any in-progress session for an incomplete upload.
    async fn abort(&self, file: &mut File) -> Result<(), UploadError>;

    async fn read(&self, name: &str, range: Option<ByteRange>) -> Result<Bytes, UploadError>;

    async fn read_stream(
        &self,
        name: &str,
        range: Option<ByteRange>,
    ) -> Result<ByteStream, UploadError>;

    /// Returns false when there was nothing to delete.
    async fn delete_object(&self, name: &str) -> Result<bool, UploadError>;

    async fn copy_object(&self, source: &str, destination: &str) -> Result<(), UploadError>;

    async fn move_object(&self, source: &str, destination: &str) -> Result<(), UploadError> {
        self.copy_object(source, destination).await?;
        self.delete_object(source).await?;
        Ok(())
    }

    async fn list_page(
        &self,
        prefix: Option<&str>,
        token: Option<String>,
    ) -> Result<ObjectPage, UploadError>;

    async fn head_object(&self, name: &str) -> Result<Option<ObjectHead>, UploadError>;
}
