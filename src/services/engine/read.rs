use bytes::Bytes;
use std::time::Instant;

use crate::api::error::UploadError;
use crate::api::range::{ByteRange, parse_range};
use crate::models::{File, FileQuery, FileStream, FileWithContent};

use super::UploadEngine;

impl UploadEngine {
    /// Buffers the stored bytes of an upload. Incomplete uploads return
    /// what has been written so far.
    pub async fn get(&self, query: &FileQuery) -> Result<FileWithContent, UploadError> {
        let started = Instant::now();
        let result: Result<FileWithContent, UploadError> = async {
            let file = self.resolve(&query.id).await?;
            let content = if file.bytes_written == 0 {
                Bytes::new()
            } else {
                let range = ByteRange {
                    start: 0,
                    end: file.bytes_written - 1,
                };
                self.backend.read(&file.name, Some(range)).await?
            };
            Ok(FileWithContent { file, content })
        }
        .await;
        self.observe("get", started, &result);
        result
    }

    /// Opens a byte stream over an upload, honouring an optional `Range`
    /// header. Unsatisfiable or malformed ranges yield the full payload.
    pub async fn get_stream(
        &self,
        query: &FileQuery,
        range_header: Option<&str>,
    ) -> Result<FileStream, UploadError> {
        let started = Instant::now();
        let result: Result<FileStream, UploadError> = async {
            let file = self.resolve(&query.id).await?;
            let total = file.bytes_written;
            let range = range_header.and_then(|header| parse_range(header, total));

            let (read_range, size) = match range {
                Some(range) => (Some(range), range.len()),
                None if total == 0 => {
                    return Ok(FileStream {
                        file,
                        stream: Box::pin(futures::stream::empty()),
                        size: 0,
                        total: 0,
                        range: None,
                    });
                }
                None => (
                    Some(ByteRange {
                        start: 0,
                        end: total - 1,
                    }),
                    total,
                ),
            };

            let stream = self.backend.read_stream(&file.name, read_range).await?;
            tracing::debug!(id = %file.id, bytes = size, ranged = range.is_some(), "Streaming upload");
            Ok(FileStream {
                file,
                stream,
                size,
                total,
                range,
            })
        }
        .await;
        self.observe("get_stream", started, &result);
        result
    }

    /// True when a live record exists for the id.
    pub async fn exists(&self, query: &FileQuery) -> Result<bool, UploadError> {
        match self.resolve(&query.id).await {
            Ok(_) => Ok(true),
            Err(UploadError::FileNotFound(_)) | Err(UploadError::Gone(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Current record for an upload, bypassing the cache.
    pub async fn info(&self, query: &FileQuery) -> Result<File, UploadError> {
        self.load_live(&query.id).await
    }
}
