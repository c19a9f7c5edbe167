use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// Stable identifier for every failure the engine reports. Serializes as a plain string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    FileNotFound,
    Gone,
    FileConflict,
    FileLocked,
    ChecksumMismatch,
    RequestAborted,
    UnsupportedChecksumAlgorithm,
    RequestEntityTooLarge,
    InvalidFileName,
    ContentRejected,
    FileError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::FileNotFound => "FileNotFound",
            ErrorCode::Gone => "Gone",
            ErrorCode::FileConflict => "FileConflict",
            ErrorCode::FileLocked => "FileLocked",
            ErrorCode::ChecksumMismatch => "ChecksumMismatch",
            ErrorCode::RequestAborted => "RequestAborted",
            ErrorCode::UnsupportedChecksumAlgorithm => "UnsupportedChecksumAlgorithm",
            ErrorCode::RequestEntityTooLarge => "RequestEntityTooLarge",
            ErrorCode::InvalidFileName => "InvalidFileName",
            ErrorCode::ContentRejected => "ContentRejected",
            ErrorCode::FileError => "FileError",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::FileNotFound => StatusCode::NOT_FOUND,
            ErrorCode::Gone => StatusCode::GONE,
            ErrorCode::FileConflict => StatusCode::CONFLICT,
            ErrorCode::FileLocked => StatusCode::LOCKED,
            // 460 is the de-facto status for checksum failures in resumable upload protocols
            ErrorCode::ChecksumMismatch => {
                StatusCode::from_u16(460).unwrap_or(StatusCode::BAD_REQUEST)
            }
            ErrorCode::RequestAborted => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST)
            }
            ErrorCode::UnsupportedChecksumAlgorithm => StatusCode::BAD_REQUEST,
            ErrorCode::RequestEntityTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorCode::InvalidFileName => StatusCode::BAD_REQUEST,
            ErrorCode::ContentRejected => StatusCode::FORBIDDEN,
            ErrorCode::FileError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File is gone: {0}")]
    Gone(String),

    #[error("File conflict: {0}")]
    FileConflict(String),

    #[error("File locked: {0}")]
    FileLocked(String),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Request aborted: {0}")]
    RequestAborted(String),

    #[error("Unsupported checksum algorithm: {0}")]
    UnsupportedChecksumAlgorithm(String),

    #[error("Request entity too large: {0}")]
    RequestEntityTooLarge(String),

    #[error("Invalid file name: {0}")]
    InvalidFileName(String),

    #[error("Content rejected: {0}")]
    ContentRejected(String),

    #[error("File error: {0}")]
    FileError(String),
}

impl UploadError {
    pub fn code(&self) -> ErrorCode {
        match self {
            UploadError::FileNotFound(_) => ErrorCode::FileNotFound,
            UploadError::Gone(_) => ErrorCode::Gone,
            UploadError::FileConflict(_) => ErrorCode::FileConflict,
            UploadError::FileLocked(_) => ErrorCode::FileLocked,
            UploadError::ChecksumMismatch { .. } => ErrorCode::ChecksumMismatch,
            UploadError::RequestAborted(_) => ErrorCode::RequestAborted,
            UploadError::UnsupportedChecksumAlgorithm(_) => ErrorCode::UnsupportedChecksumAlgorithm,
            UploadError::RequestEntityTooLarge(_) => ErrorCode::RequestEntityTooLarge,
            UploadError::InvalidFileName(_) => ErrorCode::InvalidFileName,
            UploadError::ContentRejected(_) => ErrorCode::ContentRejected,
            UploadError::FileError(_) => ErrorCode::FileError,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, UploadError::FileNotFound(_))
    }
}

impl From<std::io::Error> for UploadError {
    fn from(err: std::io::Error) -> Self {
        UploadError::FileError(err.to_string())
    }
}

impl From<serde_json::Error> for UploadError {
    fn from(err: serde_json::Error) -> Self {
        UploadError::FileError(format!("Metadata encoding error: {}", err))
    }
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let code = self.code();
        if code == ErrorCode::FileError {
            tracing::error!("Storage error: {}", self);
        }

        let body = Json(json!({
            "code": code.as_str(),
            "message": self.to_string(),
        }));

        (code.status(), body).into_response()
    }
}
