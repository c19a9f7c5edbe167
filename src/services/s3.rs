use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream as S3ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use tokio_util::io::ReaderStream;

use crate::api::error::UploadError;
use crate::api::range::ByteRange;
use crate::models::{ByteStream, File, PartInfo, RemoteSession};
use crate::services::pipeline::{BufferSink, ChecksumVerifier, ChunkPipeline, LengthLimit};
use crate::services::retry::{RetryConfig, RetryHint, RetryPolicy, Retryable};
use crate::services::storage::{
    BackendCapabilities, BackendKind, ChunkOutcome, ChunkWrite, ObjectHead, ObjectPage,
    PayloadBackend,
};

/// Smallest part S3 accepts for anything but the last part of an upload.
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Suffix of the side object holding bytes that do not yet fill a part.
const PENDING_SUFFIX: &str = ".part";

/// Characters escaped in `x-amz-copy-source`; path separators stay literal.
const COPY_SOURCE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

const SERVER_FAULT_CODES: [&str; 4] = [
    "InternalError",
    "ServiceUnavailable",
    "SlowDown",
    "RequestTimeout",
];

/// A failed S3 call with what the retry engine needs to classify it.
#[derive(Debug)]
pub struct S3Failure {
    pub message: String,
    pub hint: RetryHint,
    pub not_found: bool,
}

impl std::fmt::Display for S3Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl Retryable for S3Failure {
    fn retry_hint(&self) -> RetryHint {
        self.hint.clone()
    }
}

impl From<S3Failure> for UploadError {
    fn from(failure: S3Failure) -> Self {
        if failure.not_found {
            UploadError::FileNotFound(failure.message)
        } else {
            UploadError::FileError(failure.message)
        }
    }
}

fn sdk_failure<E>(operation: &str, err: SdkError<E, HttpResponse>) -> S3Failure
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let mut hint = RetryHint::default();
    match &err {
        SdkError::TimeoutError(_) => hint.class_name = Some("TimeoutError".to_string()),
        SdkError::DispatchFailure(failure) if failure.is_timeout() => {
            hint.class_name = Some("TimeoutError".to_string())
        }
        SdkError::DispatchFailure(failure) if failure.is_io() => {
            hint.class_name = Some("NetworkError".to_string())
        }
        SdkError::ResponseError(_) => hint.class_name = Some("NetworkError".to_string()),
        _ => {}
    }
    hint.status = err.raw_response().map(|r| r.status().as_u16());
    hint.code = err.code().map(str::to_string);
    hint.server_fault = hint
        .code
        .as_deref()
        .is_some_and(|code| SERVER_FAULT_CODES.contains(&code));

    let not_found = hint.status == Some(404)
        || matches!(hint.code.as_deref(), Some("NoSuchKey" | "NotFound"));

    S3Failure {
        message: format!("S3 {} failed: {}", operation, DisplayErrorContext(&err)),
        hint,
        not_found,
    }
}

fn to_chrono(time: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(time.secs(), time.subsec_nanos())
}

/// How a completed upload is sealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FinalizeStep {
    /// Nothing was stored; write an empty object
    EmptyObject,
    /// Already stored by a single put
    Stored,
    /// No part was uploaded; the parked bytes become the object
    PromoteParked,
    /// Parked bytes go up as the last part before completion
    FlushParked,
    Complete,
}

fn plan_finalize(session: Option<&RemoteSession>, bytes_written: u64) -> FinalizeStep {
    match session {
        None if bytes_written == 0 => FinalizeStep::EmptyObject,
        None => FinalizeStep::Stored,
        Some(session) if session.parts.is_empty() => FinalizeStep::PromoteParked,
        Some(session) if session.pending_bytes > 0 => FinalizeStep::FlushParked,
        Some(_) => FinalizeStep::Complete,
    }
}

fn pending_key(name: &str) -> String {
    format!("{}{}", name, PENDING_SUFFIX)
}

fn range_header(range: ByteRange) -> String {
    format!("bytes={}-{}", range.start, range.end)
}

/// Payloads as objects in an S3-compatible bucket.
pub struct S3Backend {
    client: Client,
    bucket: String,
    retry: RetryPolicy<S3Failure>,
}

impl S3Backend {
    pub fn new(client: Client, bucket: String, retry: RetryConfig) -> Self {
        Self {
            client,
            bucket,
            retry: RetryPolicy::new(retry),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<(), S3Failure> {
        self.retry
            .run(|_| {
                let data = data.clone();
                async move {
                    self.client
                        .put_object()
                        .bucket(&self.bucket)
                        .key(key)
                        .body(S3ByteStream::from(data))
                        .send()
                        .await
                        .map_err(|e| sdk_failure("put_object", e))
                }
            })
            .await?;
        Ok(())
    }

    async fn fetch(&self, key: &str, range: Option<ByteRange>) -> Result<Bytes, UploadError> {
        let output = self
            .retry
            .run(|_| async move {
                self.client
                    .get_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .set_range(range.map(range_header))
                    .send()
                    .await
                    .map_err(|e| sdk_failure("get_object", e))
            })
            .await?;
        let data = output
            .body
            .collect()
            .await
            .map_err(|e| UploadError::FileError(format!("S3 body read failed: {}", e)))?;
        Ok(data.into_bytes())
    }

    async fn remove(&self, key: &str) -> Result<(), S3Failure> {
        self.retry
            .run(|_| async move {
                self.client
                    .delete_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .send()
                    .await
                    .map_err(|e| sdk_failure("delete_object", e))
            })
            .await?;
        Ok(())
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectHead>, S3Failure> {
        let result = self
            .retry
            .run(|_| async move {
                self.client
                    .head_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .send()
                    .await
                    .map_err(|e| sdk_failure("head_object", e))
            })
            .await;
        match result {
            Ok(output) => Ok(Some(ObjectHead {
                name: key.to_string(),
                size: output.content_length.unwrap_or(0).max(0) as u64,
                last_modified: output.last_modified.as_ref().and_then(to_chrono),
            })),
            Err(failure) if failure.not_found => Ok(None),
            Err(failure) => Err(failure),
        }
    }

    async fn open_session(&self, name: &str) -> Result<RemoteSession, S3Failure> {
        let output = self
            .retry
            .run(|_| async move {
                self.client
                    .create_multipart_upload()
                    .bucket(&self.bucket)
                    .key(name)
                    .send()
                    .await
                    .map_err(|e| sdk_failure("create_multipart_upload", e))
            })
            .await?;
        let upload_id = output.upload_id().ok_or_else(|| S3Failure {
            message: format!("S3 returned no upload id for {}", name),
            hint: RetryHint::default(),
            not_found: false,
        })?;
        tracing::debug!(name = %name, upload_id = %upload_id, "Multipart upload started");
        Ok(RemoteSession::new(upload_id))
    }

    async fn upload_part(
        &self,
        name: &str,
        session: &RemoteSession,
        data: Bytes,
    ) -> Result<PartInfo, S3Failure> {
        let part_number = session.parts.len() as i32 + 1;
        let size = data.len() as u64;
        let upload_id = session.upload_id.as_str();
        let output = self
            .retry
            .run(|_| {
                let data = data.clone();
                async move {
                    self.client
                        .upload_part()
                        .bucket(&self.bucket)
                        .key(name)
                        .upload_id(upload_id)
                        .part_number(part_number)
                        .body(S3ByteStream::from(data))
                        .send()
                        .await
                        .map_err(|e| sdk_failure("upload_part", e))
                }
            })
            .await?;
        Ok(PartInfo {
            part_number,
            etag: output.e_tag().unwrap_or_default().to_string(),
            size,
        })
    }

    async fn complete(&self, name: &str, session: &RemoteSession) -> Result<(), S3Failure> {
        let parts: Vec<CompletedPart> = session
            .parts
            .iter()
            .map(|part| {
                CompletedPart::builder()
                    .e_tag(&part.etag)
                    .part_number(part.part_number)
                    .build()
            })
            .collect();
        let upload_id = session.upload_id.as_str();
        self.retry
            .run(|_| {
                let completed = CompletedMultipartUpload::builder()
                    .set_parts(Some(parts.clone()))
                    .build();
                async move {
                    self.client
                        .complete_multipart_upload()
                        .bucket(&self.bucket)
                        .key(name)
                        .upload_id(upload_id)
                        .multipart_upload(completed)
                        .send()
                        .await
                        .map_err(|e| sdk_failure("complete_multipart_upload", e))
                }
            })
            .await?;
        Ok(())
    }

    /// Stores the parked tail and closes the multipart session.
    async fn seal(
        &self,
        name: &str,
        session: &mut RemoteSession,
        step: FinalizeStep,
    ) -> Result<(), UploadError> {
        let parked = if session.pending_bytes > 0 {
            self.fetch(&pending_key(name), None).await?
        } else {
            Bytes::new()
        };

        match step {
            FinalizeStep::PromoteParked => {
                self.put(name, parked).await?;
                self.abort_session(name, session).await?;
            }
            FinalizeStep::FlushParked => {
                let part = self.upload_part(name, session, parked).await?;
                session.parts.push(part);
                self.complete(name, session).await?;
            }
            FinalizeStep::Complete => self.complete(name, session).await?,
            FinalizeStep::EmptyObject | FinalizeStep::Stored => {}
        }

        if session.pending_bytes > 0 {
            self.remove(&pending_key(name)).await?;
            session.pending_bytes = 0;
        }
        Ok(())
    }

    /// A session S3 no longer knows about counts as aborted.
    async fn abort_session(&self, name: &str, session: &RemoteSession) -> Result<(), S3Failure> {
        let upload_id = session.upload_id.as_str();
        let aborted = self
            .retry
            .run(|_| async move {
                self.client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(name)
                    .upload_id(upload_id)
                    .send()
                    .await
                    .map_err(|e| sdk_failure("abort_multipart_upload", e))
            })
            .await;
        match aborted {
            Err(failure) if !failure.not_found => Err(failure),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl PayloadBackend for S3Backend {
    fn kind(&self) -> BackendKind {
        BackendKind::S3
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            partial_writes: false,
            local_filesystem: false,
            native_rename: false,
        }
    }

    fn is_reserved_name(&self, name: &str) -> bool {
        name.ends_with(PENDING_SUFFIX)
    }

    async fn create(&self, file: &mut File) -> Result<u64, UploadError> {
        file.uri = Some(format!("s3://{}/{}", self.bucket, file.name));
        // Sessions are opened on the first part that needs one
        Ok(file
            .session
            .as_ref()
            .map(RemoteSession::stored_bytes)
            .unwrap_or(file.bytes_written))
    }

    async fn write_chunk(
        &self,
        file: &mut File,
        chunk: ChunkWrite,
    ) -> Result<ChunkOutcome, UploadError> {
        let start = chunk.start;
        let limit = chunk.limit(file.size);
        let mut sink = BufferSink::with_capacity(limit.min(MIN_PART_SIZE) as usize);

        let mut pipeline = ChunkPipeline::new(false).stage(LengthLimit::new(limit));
        if let Some(checksum) = &chunk.checksum {
            pipeline = pipeline.stage(ChecksumVerifier::new(
                checksum.algorithm,
                checksum.value.clone(),
            ));
        }
        let outcome = pipeline
            .run(chunk.body, &mut sink, chunk.cancel.as_ref())
            .await?;
        let data = Bytes::from(sink.into_inner());
        let bytes_written = start + outcome.written;
        let is_last = file.size == Some(bytes_written);

        if data.is_empty() {
            return Ok(ChunkOutcome {
                bytes_written,
                aborted: false,
            });
        }

        // Whole upload in one request
        if start == 0 && is_last && file.session.is_none() {
            self.put(&file.name, data).await?;
            tracing::debug!(id = %file.id, bytes = bytes_written, "Uploaded in a single put");
            return Ok(ChunkOutcome {
                bytes_written,
                aborted: false,
            });
        }

        let mut session = match file.session.take() {
            Some(session) => session,
            None => self.open_session(&file.name).await?,
        };

        let result = async {
            let payload = if session.pending_bytes > 0 {
                let parked = self.fetch(&pending_key(&file.name), None).await?;
                let mut joined = BytesMut::with_capacity(parked.len() + data.len());
                joined.extend_from_slice(&parked);
                joined.extend_from_slice(&data);
                joined.freeze()
            } else {
                data
            };

            if payload.len() as u64 >= MIN_PART_SIZE || is_last {
                let part = self.upload_part(&file.name, &session, payload).await?;
                session.parts.push(part);
                if session.pending_bytes > 0 {
                    self.remove(&pending_key(&file.name)).await?;
                    session.pending_bytes = 0;
                }
            } else {
                let parked = payload.len() as u64;
                self.put(&pending_key(&file.name), payload).await?;
                session.pending_bytes = parked;
            }
            Ok::<(), UploadError>(())
        }
        .await;

        file.session = Some(session);
        result?;

        Ok(ChunkOutcome {
            bytes_written,
            aborted: false,
        })
    }

    async fn finalize(&self, file: &mut File) -> Result<(), UploadError> {
        let step = plan_finalize(file.session.as_ref(), file.bytes_written);
        let Some(mut session) = file.session.take() else {
            if step == FinalizeStep::EmptyObject {
                self.put(&file.name, Bytes::new()).await?;
            }
            return Ok(());
        };

        if let Err(e) = self.seal(&file.name, &mut session, step).await {
            file.session = Some(session);
            return Err(e);
        }
        tracing::info!(
            id = %file.id,
            parts = session.parts.len(),
            step = ?step,
            "Multipart upload completed"
        );
        Ok(())
    }

    async fn abort(&self, file: &mut File) -> Result<(), UploadError> {
        let Some(session) = file.session.take() else {
            return Ok(());
        };
        if let Err(failure) = self.abort_session(&file.name, &session).await {
            file.session = Some(session);
            return Err(failure.into());
        }
        if session.pending_bytes > 0 {
            self.remove(&pending_key(&file.name)).await?;
        }
        tracing::info!(id = %file.id, "Multipart upload aborted");
        Ok(())
    }

    async fn read(&self, name: &str, range: Option<ByteRange>) -> Result<Bytes, UploadError> {
        self.fetch(name, range).await
    }

    async fn read_stream(
        &self,
        name: &str,
        range: Option<ByteRange>,
    ) -> Result<ByteStream, UploadError> {
        let output = self
            .retry
            .run(|_| async move {
                self.client
                    .get_object()
                    .bucket(&self.bucket)
                    .key(name)
                    .set_range(range.map(range_header))
                    .send()
                    .await
                    .map_err(|e| sdk_failure("get_object", e))
            })
            .await?;
        Ok(Box::pin(ReaderStream::new(output.body.into_async_read())))
    }

    async fn delete_object(&self, name: &str) -> Result<bool, UploadError> {
        // S3 deletes succeed for missing keys, so existence is checked first
        if self.head(name).await?.is_none() {
            return Ok(false);
        }
        self.remove(name).await?;
        Ok(true)
    }

    async fn copy_object(&self, source: &str, destination: &str) -> Result<(), UploadError> {
        let copy_source = format!(
            "{}/{}",
            self.bucket,
            utf8_percent_encode(source, COPY_SOURCE)
        );
        let copy_source = copy_source.as_str();
        let result = self
            .retry
            .run(|_| async move {
                self.client
                    .copy_object()
                    .bucket(&self.bucket)
                    .copy_source(copy_source)
                    .key(destination)
                    .send()
                    .await
                    .map_err(|e| sdk_failure("copy_object", e))
            })
            .await;

        if let Err(failure) = result {
            tracing::error!(
                "S3 copy_object failed: source={}/{}, dest={}, error={}",
                self.bucket,
                source,
                destination,
                failure
            );
            return Err(failure.into());
        }
        Ok(())
    }

    async fn list_page(
        &self,
        prefix: Option<&str>,
        token: Option<String>,
    ) -> Result<ObjectPage, UploadError> {
        let output = self
            .retry
            .run(|_| {
                let token = token.clone();
                async move {
                    self.client
                        .list_objects_v2()
                        .bucket(&self.bucket)
                        .set_prefix(prefix.map(str::to_string))
                        .set_continuation_token(token)
                        .send()
                        .await
                        .map_err(|e| sdk_failure("list_objects_v2", e))
                }
            })
            .await?;

        let objects = output
            .contents
            .unwrap_or_default()
            .into_iter()
            .filter_map(|object| {
                let name = object.key?;
                if name.ends_with(PENDING_SUFFIX) {
                    return None;
                }
                Some(ObjectHead {
                    name,
                    size: object.size.unwrap_or(0).max(0) as u64,
                    last_modified: object.last_modified.as_ref().and_then(to_chrono),
                })
            })
            .collect();

        let next_token = if output.is_truncated.unwrap_or(false) {
            output.next_continuation_token
        } else {
            None
        };
        Ok(ObjectPage {
            objects,
            next_token,
        })
    }

    async fn head_object(&self, name: &str) -> Result<Option<ObjectHead>, UploadError> {
        Ok(self.head(name).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::ErrorCode;

    #[test]
    fn test_failure_translation() {
        let missing = S3Failure {
            message: "gone".to_string(),
            hint: RetryHint {
                status: Some(404),
                ..Default::default()
            },
            not_found: true,
        };
        assert_eq!(UploadError::from(missing).code(), ErrorCode::FileNotFound);

        let throttled = S3Failure {
            message: "slow down".to_string(),
            hint: RetryHint {
                status: Some(503),
                code: Some("SlowDown".to_string()),
                server_fault: true,
                ..Default::default()
            },
            not_found: false,
        };
        assert!(RetryConfig::default().is_transient(&throttled.retry_hint()));
        assert_eq!(UploadError::from(throttled).code(), ErrorCode::FileError);
    }

    #[test]
    fn test_copy_source_encoding() {
        let encoded = utf8_percent_encode("user 1/report #2.pdf", COPY_SOURCE).to_string();
        assert_eq!(encoded, "user%201/report%20%232.pdf");
    }

    #[test]
    fn test_finalize_plan() {
        assert_eq!(plan_finalize(None, 0), FinalizeStep::EmptyObject);
        assert_eq!(plan_finalize(None, 42), FinalizeStep::Stored);

        let mut session = RemoteSession::new("upload-1");
        session.pending_bytes = 1024;
        assert_eq!(plan_finalize(Some(&session), 1024), FinalizeStep::PromoteParked);

        session.parts.push(PartInfo {
            part_number: 1,
            etag: "\"etag-1\"".to_string(),
            size: MIN_PART_SIZE,
        });
        assert_eq!(
            plan_finalize(Some(&session), MIN_PART_SIZE + 1024),
            FinalizeStep::FlushParked
        );

        session.pending_bytes = 0;
        assert_eq!(plan_finalize(Some(&session), MIN_PART_SIZE), FinalizeStep::Complete);
    }

    #[test]
    fn test_range_header() {
        assert_eq!(range_header(ByteRange { start: 0, end: 99 }), "bytes=0-99");
    }
}
