use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use std::time::Instant;

use crate::api::error::UploadError;
use crate::api::range::ByteRange;
use crate::models::{ByteStream, File, FileHash, FileInit, FilePart, WriteRequest};
use crate::services::scanner::INSPECTION_WINDOW;
use crate::services::storage::{Checksum, ChunkWrite};
use crate::utils::hash::ChecksumAlgorithm;
use crate::utils::validation::{
    is_generic_content_type, sniff_content_type, validate_file_size, validate_id,
    validate_original_name,
};

use super::{UploadEngine, log_hook};

impl UploadEngine {
    /// Registers an upload, or resumes the one already registered under the same id.
    pub async fn create(&self, init: FileInit) -> Result<File, UploadError> {
        let started = Instant::now();
        let result = self.create_upload(init).await;
        self.observe("create", started, &result);
        result
    }

    async fn create_upload(&self, init: FileInit) -> Result<File, UploadError> {
        validate_original_name(&init.original_name)?;
        if let Some(size) = init.size {
            validate_file_size(size, self.config.max_upload_size)?;
        }
        if let Some(hash) = &init.hash
            && !self.config.accepts_checksum(hash.algorithm)
        {
            return Err(UploadError::UnsupportedChecksumAlgorithm(
                hash.algorithm.to_string(),
            ));
        }

        let id = match &init.id {
            Some(id) => id.clone(),
            None => (self.id_fn)(&init),
        };
        validate_id(&id)?;

        let _guard = self.lock(&id)?;
        let now = Utc::now();

        let (mut file, resumed) = match self.meta.get(&id).await {
            Ok(existing) if !existing.is_expired(now) => {
                if existing.is_completed() {
                    tracing::info!(id = %id, "Upload already completed, returning stored record");
                    return Ok(existing);
                }
                let mut existing = existing;
                if let Some(size) = init.size {
                    existing.fix_size(size)?;
                }
                (existing, true)
            }
            Ok(mut expired) => {
                tracing::info!(id = %id, "Replacing expired upload");
                self.discard(&mut expired).await?;
                (File::new(id.clone(), &init, now), false)
            }
            Err(err) if err.is_not_found() => (File::new(id.clone(), &init, now), false),
            Err(err) => return Err(err),
        };

        if file.name.is_empty() {
            file.name = (self.naming)(&file);
        }
        self.check_name(&file.name)?;
        if !resumed {
            self.apply_expiry(&mut file, init.expires_in);
        }

        let stored = self.backend.create(&mut file).await?;
        if !resumed && stored > 0 {
            tracing::info!(id = %id, bytes = stored, "Resuming payload found in storage");
            file.bytes_written = stored;
        }
        file.refresh_status();

        if file.is_completed() {
            self.finish_upload(&mut file).await?;
        }
        self.persist(&file).await?;
        self.tombstones.remove(&id);

        log_hook("on_create", &id, self.hooks.on_create(&file).await);
        if file.is_completed() {
            log_hook("on_complete", &id, self.hooks.on_complete(&file).await);
        }
        tracing::info!(
            id = %file.id,
            name = %file.name,
            size = ?file.size,
            bytes = file.bytes_written,
            resumed,
            "📁 Upload created"
        );
        Ok(file)
    }

    /// Applies a chunk, or a metadata update carried by a full record.
    pub async fn write(&self, request: impl Into<WriteRequest>) -> Result<File, UploadError> {
        let started = Instant::now();
        let (id, result) = match request.into() {
            WriteRequest::Part(part) => {
                let id = part.id.clone();
                (id, self.write_part(part).await)
            }
            WriteRequest::File(file) => {
                let id = file.id.clone();
                (id, self.update_record(file).await)
            }
        };
        if let Err(err) = &result {
            self.report_error(&id, err).await;
        }
        self.observe("write", started, &result);
        result
    }

    fn parse_checksum(&self, part: &FilePart) -> Result<Option<Checksum>, UploadError> {
        let algorithm = match part.checksum_algorithm.as_deref() {
            Some(name) => {
                let algorithm: ChecksumAlgorithm = name.parse()?;
                if !self.config.accepts_checksum(algorithm) {
                    return Err(UploadError::UnsupportedChecksumAlgorithm(name.to_string()));
                }
                Some(algorithm)
            }
            None => None,
        };
        match (algorithm, &part.checksum) {
            (Some(algorithm), Some(value)) => Ok(Some(Checksum {
                algorithm,
                value: value.clone(),
            })),
            (None, Some(_)) => Err(UploadError::UnsupportedChecksumAlgorithm(
                "checksum supplied without an algorithm".to_string(),
            )),
            _ => Ok(None),
        }
    }

    async fn write_part(&self, part: FilePart) -> Result<File, UploadError> {
        let checksum = self.parse_checksum(&part)?;

        let _guard = self.lock(&part.id)?;
        let mut file = self.load_live(&part.id).await?;
        if file.is_completed() {
            return Ok(file);
        }

        if let Some(size) = part.size
            && file.fix_size(size)?
        {
            validate_file_size(size, self.config.max_upload_size)?;
        }

        if part.start != file.bytes_written {
            return Err(UploadError::FileConflict(format!(
                "Offset {} does not match {} bytes already written to {}",
                part.start, file.bytes_written, file.id
            )));
        }
        if let (Some(size), Some(length)) = (file.size, part.content_length)
            && part.start + length > size
        {
            return Err(UploadError::FileConflict(format!(
                "Chunk of {} bytes at offset {} exceeds declared size {}",
                length, part.start, size
            )));
        }

        let Some(mut body) = part.body else {
            // Size-only update
            file.modified_at = Utc::now();
            return self.commit_progress(file).await;
        };

        if file.bytes_written == 0 && is_generic_content_type(&file.content_type) {
            body = self.sniff(&mut file, body).await;
        }

        let chunk = ChunkWrite {
            start: part.start,
            body,
            content_length: part.content_length,
            checksum,
            cancel: part.cancel,
            max_size: self.config.max_upload_size,
        };

        let outcome = match self.backend.write_chunk(&mut file, chunk).await {
            Ok(outcome) => outcome,
            Err(err) => {
                // Keep session bookkeeping the backend may have updated
                if let Err(e) = self.meta.save(&file).await {
                    tracing::warn!(id = %file.id, "Failed to save record after rejected chunk: {}", e);
                }
                return Err(err);
            }
        };

        if outcome.aborted {
            tracing::warn!(
                id = %file.id,
                bytes = outcome.bytes_written - part.start,
                "Chunk aborted, keeping partial bytes"
            );
        }
        file.bytes_written = outcome.bytes_written;
        file.modified_at = Utc::now();
        self.commit_progress(file).await
    }

    /// Recomputes status, finishes the upload on completion and persists.
    async fn commit_progress(&self, mut file: File) -> Result<File, UploadError> {
        if self.config.expiration.as_ref().is_some_and(|e| e.rolling) {
            self.apply_expiry(&mut file, None);
        }
        file.refresh_status();
        let completed = file.is_completed();
        if completed {
            self.finish_upload(&mut file).await?;
        }
        self.persist(&file).await?;

        log_hook("on_update", &file.id, self.hooks.on_update(&file).await);
        if completed {
            log_hook("on_complete", &file.id, self.hooks.on_complete(&file).await);
        }
        self.metrics.gauge(
            "upload.bytes_written",
            file.bytes_written as f64,
            &[("backend", self.backend.kind().as_str())],
        );
        Ok(file)
    }

    async fn update_record(&self, inbound: File) -> Result<File, UploadError> {
        validate_original_name(&inbound.original_name)?;
        let _guard = self.lock(&inbound.id)?;
        let mut file = self.load_live(&inbound.id).await?;

        file.original_name = inbound.original_name;
        file.content_type = inbound.content_type;
        file.metadata = inbound.metadata;
        if inbound.expired_at.is_some() {
            file.expired_at = inbound.expired_at;
        }
        if file.is_completed() {
            self.persist(&file).await?;
            log_hook("on_update", &file.id, self.hooks.on_update(&file).await);
            return Ok(file);
        }
        if let Some(size) = inbound.size
            && file.fix_size(size)?
        {
            validate_file_size(size, self.config.max_upload_size)?;
        }
        file.modified_at = Utc::now();
        self.commit_progress(file).await
    }

    /// Peeks at the first chunk to detect a content type, then hands back
    /// an equivalent body.
    async fn sniff(&self, file: &mut File, mut body: ByteStream) -> ByteStream {
        let first = body.next().await;
        if let Some(Ok(chunk)) = &first
            && let Some(mime) = sniff_content_type(chunk)
        {
            tracing::debug!(id = %file.id, content_type = mime, "Detected content type");
            file.content_type = mime.to_string();
        }
        Box::pin(futures::stream::iter(first).chain(body))
    }

    /// Seals a completed upload and runs the completion checks. Any failure
    /// removes the upload before the error is returned.
    pub(super) async fn finish_upload(&self, file: &mut File) -> Result<(), UploadError> {
        let checked = async {
            self.backend.finalize(file).await?;
            self.verify_integrity(file).await?;
            if !self.validators.is_empty() {
                let head = self.read_head(file).await?;
                for validator in &self.validators {
                    validator.validate(file, &head).await.inspect_err(|e| {
                        tracing::warn!(
                            id = %file.id,
                            validator = validator.name(),
                            "Completion check failed: {}",
                            e
                        );
                    })?;
                }
            }
            Ok::<(), UploadError>(())
        }
        .await;

        if let Err(err) = checked {
            tracing::warn!(id = %file.id, "Rolling back upload: {}", err);
            self.rollback(file).await;
            return Err(err);
        }

        tracing::info!(
            id = %file.id,
            name = %file.name,
            bytes = file.bytes_written,
            "✅ Upload completed"
        );
        Ok(())
    }

    async fn verify_integrity(&self, file: &mut File) -> Result<(), UploadError> {
        let Some(expected) = file.expected_hash.clone() else {
            return Ok(());
        };

        let actual = match &file.hash {
            Some(hash) if hash.algorithm == expected.algorithm => hash.clone(),
            _ => self.recompute_hash(file, expected.algorithm).await?,
        };

        if !expected.matches(&actual) {
            return Err(UploadError::ChecksumMismatch {
                expected: expected.value,
                actual: actual.value,
            });
        }
        if file.hash.is_none() {
            file.hash = Some(actual);
        }
        Ok(())
    }

    async fn recompute_hash(
        &self,
        file: &File,
        algorithm: ChecksumAlgorithm,
    ) -> Result<FileHash, UploadError> {
        let mut hasher = algorithm.hasher();
        if file.bytes_written > 0 {
            let mut stream = self.backend.read_stream(&file.name, None).await?;
            while let Some(chunk) = stream.next().await {
                hasher.update(&chunk?);
            }
        }
        Ok(FileHash {
            algorithm,
            value: hasher.finalize_hex(),
        })
    }

    async fn read_head(&self, file: &File) -> Result<Bytes, UploadError> {
        let len = file.bytes_written.min(INSPECTION_WINDOW as u64);
        if len == 0 {
            return Ok(Bytes::new());
        }
        self.backend
            .read(&file.name, Some(ByteRange { start: 0, end: len - 1 }))
            .await
    }

    /// Best-effort removal of payload, session and record.
    async fn rollback(&self, file: &mut File) {
        if let Err(e) = self.backend.abort(file).await {
            tracing::warn!(id = %file.id, "Failed to abort session during rollback: {}", e);
        }
        if let Err(e) = self.backend.delete_object(&file.name).await {
            tracing::warn!(id = %file.id, "Failed to delete payload during rollback: {}", e);
        }
        if let Err(e) = self.meta.delete(&file.id).await {
            tracing::warn!(id = %file.id, "Failed to delete metadata during rollback: {}", e);
        }
        self.cache.remove(&file.id);
    }
}
