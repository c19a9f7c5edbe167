use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

use crate::api::error::UploadError;
use crate::api::range::{ByteRange, parse_range};
use crate::models::{File, FileQuery};
use crate::services::engine::UploadEngine;

/// Turns stored uploads into HTTP responses, streaming large payloads and
/// buffering small ones.
#[derive(Debug, Clone, Copy)]
pub struct StreamResponder {
    /// Payloads at or below this many bytes are buffered
    pub threshold: u64,
}

impl StreamResponder {
    pub fn new(threshold: u64) -> Self {
        Self { threshold }
    }

    pub async fn respond(
        &self,
        engine: &UploadEngine,
        query: &FileQuery,
        range_header: Option<&str>,
    ) -> Result<Response, UploadError> {
        let total = engine.info(query).await?.bytes_written;
        let range = range_header.and_then(|header| parse_range(header, total));
        let size = range.map(|r| r.len()).unwrap_or(total);

        if size > self.threshold {
            match engine.get_stream(query, range_header).await {
                Ok(stream) => {
                    let body = Body::from_stream(stream.stream);
                    return Ok(build_response(
                        &stream.file,
                        body,
                        stream.size,
                        stream.range,
                        stream.total,
                    ));
                }
                Err(e) => {
                    tracing::warn!(id = %query.id, "Streaming unavailable, falling back to buffered read: {}", e);
                }
            }
        }

        let buffered = engine.get(query).await?;
        let total = buffered.content.len() as u64;
        let range = range_header.and_then(|header| parse_range(header, total));
        let content = match range {
            Some(r) => buffered.content.slice(r.start as usize..=r.end as usize),
            None => buffered.content,
        };
        let length = content.len() as u64;
        Ok(build_response(
            &buffered.file,
            Body::from(content),
            length,
            range,
            total,
        ))
    }
}

impl Default for StreamResponder {
    fn default() -> Self {
        Self::new(1024 * 1024)
    }
}

fn build_response(
    file: &File,
    body: Body,
    length: u64,
    range: Option<ByteRange>,
    total: u64,
) -> Response {
    let mut response = (
        [
            (header::CONTENT_TYPE, file.content_type.clone()),
            (header::ACCEPT_RANGES, "bytes".to_string()),
            (header::CONTENT_DISPOSITION, content_disposition(file)),
        ],
        body,
    )
        .into_response();

    let headers = response.headers_mut();
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    if let Some(range) = range
        && let Ok(value) = range.content_range(total).parse()
    {
        headers.insert(header::CONTENT_RANGE, value);
    }
    if let Some(hash) = &file.hash
        && let Ok(value) = format!("\"{}\"", hash.value).parse()
    {
        headers.insert(header::ETAG, value);
    }
    let rfc1123 = file
        .modified_at
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    if let Ok(value) = rfc1123.parse() {
        headers.insert(header::LAST_MODIFIED, value);
    }

    if range.is_some() {
        *response.status_mut() = StatusCode::PARTIAL_CONTENT;
    }
    response
}

fn content_disposition(file: &File) -> String {
    let ascii_name = file
        .original_name
        .chars()
        .filter(|c| c.is_ascii() && !c.is_control() && *c != '"' && *c != '\\' && *c != ';')
        .take(64)
        .collect::<String>();
    let fallback = if ascii_name.is_empty() {
        "file"
    } else {
        &ascii_name
    };
    let encoded = utf8_percent_encode(&file.original_name, NON_ALPHANUMERIC).to_string();

    let content_type = file.content_type.as_str();
    let disposition = if content_type.starts_with("video/")
        || content_type.starts_with("audio/")
        || content_type.starts_with("image/")
        || content_type == "application/pdf"
        || content_type.starts_with("text/")
    {
        "inline"
    } else {
        "attachment"
    };

    format!(
        "{}; filename=\"{}\"; filename*=UTF-8''{}",
        disposition, fallback, encoded
    )
}
