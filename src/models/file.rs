use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::api::error::UploadError;
use crate::api::range::ByteRange;
use crate::utils::hash::{ChecksumAlgorithm, digest_matches_hex};

/// Inbound payload of a chunk, or outbound content of a read.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Created,
    Part,
    Completed,
    Deleted,
}

impl UploadStatus {
    /// Status is derived, never stored independently of progress.
    pub fn derive(size: Option<u64>, bytes_written: u64) -> Self {
        match size {
            Some(size) if bytes_written == size => UploadStatus::Completed,
            _ if bytes_written > 0 => UploadStatus::Part,
            _ => UploadStatus::Created,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHash {
    pub algorithm: ChecksumAlgorithm,
    pub value: String,
}

impl FileHash {
    /// `self` is the caller's expectation (hex or base64), `actual` a computed hex digest.
    pub fn matches(&self, actual: &FileHash) -> bool {
        self.algorithm == actual.algorithm && digest_matches_hex(&self.value, &actual.value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartInfo {
    pub part_number: i32,
    pub etag: String,
    pub size: u64,
}

/// Multipart bookkeeping for remote backends. Dropped once the upload is finalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSession {
    pub upload_id: String,
    #[serde(default)]
    pub parts: Vec<PartInfo>,
    /// Bytes parked in a side object until they fill a part
    #[serde(default)]
    pub pending_bytes: u64,
}

impl RemoteSession {
    pub fn new(upload_id: impl Into<String>) -> Self {
        Self {
            upload_id: upload_id.into(),
            parts: Vec::new(),
            pending_bytes: 0,
        }
    }

    /// Bytes stored so far, parked bytes included.
    pub fn stored_bytes(&self) -> u64 {
        self.parts.iter().map(|part| part.size).sum::<u64>() + self.pending_bytes
    }
}

/// One logical upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct File {
    pub id: String,
    /// Physical storage key
    pub name: String,
    pub original_name: String,
    pub content_type: String,
    pub size: Option<u64>,
    pub bytes_written: u64,
    pub status: UploadStatus,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<DateTime<Utc>>,
    /// Digest computed by the backend over the whole payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<FileHash>,
    /// Digest declared by the client at creation, verified on completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_hash: Option<FileHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<RemoteSession>,
}

impl File {
    pub fn new(id: String, init: &FileInit, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: String::new(),
            original_name: init.original_name.clone(),
            content_type: init
                .content_type
                .clone()
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            size: init.size,
            bytes_written: 0,
            status: UploadStatus::Created,
            metadata: init.metadata.clone(),
            user_id: init.user_id.clone(),
            created_at: now,
            modified_at: now,
            expired_at: None,
            hash: None,
            expected_hash: init.hash.clone(),
            uri: None,
            session: None,
        }
    }

    pub fn refresh_status(&mut self) -> UploadStatus {
        self.status = UploadStatus::derive(self.size, self.bytes_written);
        self.status
    }

    pub fn is_completed(&self) -> bool {
        self.status == UploadStatus::Completed
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expired_at.is_some_and(|expires| expires <= now)
    }

    /// Fixes a deferred size. A known size can only be "re-declared" with the same value.
    pub fn fix_size(&mut self, size: u64) -> Result<bool, UploadError> {
        match self.size {
            Some(current) if current == size => Ok(false),
            Some(current) => Err(UploadError::FileConflict(format!(
                "Upload {} already has size {}, cannot change it to {}",
                self.id, current, size
            ))),
            None if size < self.bytes_written => Err(UploadError::FileConflict(format!(
                "Declared size {} is smaller than the {} bytes already written",
                size, self.bytes_written
            ))),
            None => {
                self.size = Some(size);
                Ok(true)
            }
        }
    }
}

/// A creation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileInit {
    /// Explicit id; derived from the request when absent
    pub id: Option<String>,
    pub original_name: String,
    pub content_type: Option<String>,
    pub size: Option<u64>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub user_id: Option<String>,
    /// Expected whole-file digest
    pub hash: Option<FileHash>,
    /// Per-upload expiry override, in seconds
    pub expires_in: Option<u64>,
}

impl FileInit {
    pub fn new(original_name: impl Into<String>) -> Self {
        Self {
            original_name: original_name.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_hash(mut self, algorithm: ChecksumAlgorithm, value: impl Into<String>) -> Self {
        self.hash = Some(FileHash {
            algorithm,
            value: value.into(),
        });
        self
    }
}

/// A single write request against an upload.
pub struct FilePart {
    pub id: String,
    pub start: u64,
    pub body: Option<ByteStream>,
    pub content_length: Option<u64>,
    pub checksum: Option<String>,
    pub checksum_algorithm: Option<String>,
    /// Late-bound total length for deferred-size uploads
    pub size: Option<u64>,
    pub cancel: Option<CancellationToken>,
}

impl FilePart {
    pub fn new(id: impl Into<String>, start: u64) -> Self {
        Self {
            id: id.into(),
            start,
            body: None,
            content_length: None,
            checksum: None,
            checksum_algorithm: None,
            size: None,
            cancel: None,
        }
    }

    pub fn with_body(mut self, body: ByteStream) -> Self {
        self.body = Some(body);
        self
    }

    /// Single in-memory chunk; also declares its content length.
    pub fn with_bytes(mut self, data: impl Into<Bytes>) -> Self {
        let data: Bytes = data.into();
        self.content_length = Some(data.len() as u64);
        self.body = Some(Box::pin(futures::stream::once(async move { Ok(data) })));
        self
    }

    pub fn with_checksum(mut self, algorithm: impl Into<String>, checksum: impl Into<String>) -> Self {
        self.checksum_algorithm = Some(algorithm.into());
        self.checksum = Some(checksum.into());
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

impl std::fmt::Debug for FilePart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilePart")
            .field("id", &self.id)
            .field("start", &self.start)
            .field("has_body", &self.body.is_some())
            .field("content_length", &self.content_length)
            .field("checksum_algorithm", &self.checksum_algorithm)
            .field("size", &self.size)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileQuery {
    pub id: String,
}

impl FileQuery {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl From<&str> for FileQuery {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for FileQuery {
    fn from(id: String) -> Self {
        Self { id }
    }
}

/// Input of `write`: a part to apply, or a full record the caller already holds.
#[derive(Debug)]
pub enum WriteRequest {
    Part(FilePart),
    File(File),
}

impl From<FilePart> for WriteRequest {
    fn from(part: FilePart) -> Self {
        WriteRequest::Part(part)
    }
}

impl From<File> for WriteRequest {
    fn from(file: File) -> Self {
        WriteRequest::File(file)
    }
}

#[derive(Debug, Clone)]
pub struct FileWithContent {
    pub file: File,
    pub content: Bytes,
}

/// Streaming read result. `size` is the length of the served slice, `total`
/// the length of the whole payload.
pub struct FileStream {
    pub file: File,
    pub stream: ByteStream,
    pub size: u64,
    pub total: u64,
    pub range: Option<ByteRange>,
}

impl FileStream {
    /// Response headers describing this stream.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("content-type", self.file.content_type.clone()),
            ("content-length", self.size.to_string()),
            ("accept-ranges", "bytes".to_string()),
            ("last-modified", self.file.modified_at.to_rfc2822()),
        ];
        if let Some(range) = &self.range {
            headers.push(("content-range", range.content_range(self.total)));
        }
        if let Some(hash) = &self.file.hash {
            headers.push(("etag", format!("\"{}\"", hash.value)));
        }
        headers
    }
}

impl std::fmt::Debug for FileStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStream")
            .field("id", &self.file.id)
            .field("size", &self.size)
            .field("total", &self.total)
            .field("range", &self.range)
            .finish()
    }
}
