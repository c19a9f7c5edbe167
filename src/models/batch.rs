use serde::{Deserialize, Serialize};

use super::file::File;
use crate::api::error::{ErrorCode, UploadError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchError {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&UploadError> for BatchError {
    fn from(err: &UploadError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// Outcome of one item inside a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOperationResult {
    pub id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<File>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<BatchError>,
}

impl BatchOperationResult {
    pub fn from_outcome(id: String, outcome: Result<File, UploadError>) -> Self {
        match outcome {
            Ok(file) => Self {
                id,
                success: true,
                file: Some(file),
                error: None,
            },
            Err(err) => Self {
                id,
                success: false,
                file: None,
                error: Some(BatchError::from(&err)),
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOperationResponse {
    pub successful: Vec<BatchOperationResult>,
    pub failed: Vec<BatchOperationResult>,
    pub successful_count: usize,
    pub failed_count: usize,
}

impl BatchOperationResponse {
    /// Partitions results, keeping input order within each side.
    pub fn from_results(results: Vec<BatchOperationResult>) -> Self {
        let (successful, failed): (Vec<_>, Vec<_>) =
            results.into_iter().partition(|result| result.success);
        Self {
            successful_count: successful.len(),
            failed_count: failed.len(),
            successful,
            failed,
        }
    }

    pub fn total(&self) -> usize {
        self.successful_count + self.failed_count
    }
}

/// Source and destination of a batch copy or move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferItem {
    pub source: String,
    pub destination: String,
}

impl TransferItem {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PurgeResult {
    pub items: Vec<File>,
    pub max_age_ms: u64,
    /// Records examined, including unreadable ones
    pub attempted: usize,
    /// Records left alone because an operation held their lock
    pub skipped: usize,
    /// Payload objects reclaimed because no metadata referenced them
    #[serde(default)]
    pub orphans: Vec<String>,
}
