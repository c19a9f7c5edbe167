use async_trait::async_trait;
use std::sync::Arc;

use crate::api::error::UploadError;
use crate::config::StorageConfig;
use crate::models::File;
use crate::utils::validation::{inspect_content_security, is_executable_content};

/// Bytes from the start of a completed payload handed to validators
pub const INSPECTION_WINDOW: usize = 2048;

/// Content check run once an upload completes. A failure rolls the
/// upload back before the error reaches the caller.
#[async_trait]
pub trait CompletionValidator: Send + Sync {
    fn name(&self) -> &'static str;

    /// `head` holds up to [`INSPECTION_WINDOW`] leading bytes of the payload.
    async fn validate(&self, file: &File, head: &[u8]) -> Result<(), UploadError>;
}

/// Rejects executables and script payloads based on magic numbers and markup patterns
pub struct ContentInspector;

#[async_trait]
impl CompletionValidator for ContentInspector {
    fn name(&self) -> &'static str {
        "content-inspector"
    }

    async fn validate(&self, file: &File, head: &[u8]) -> Result<(), UploadError> {
        if is_executable_content(head) {
            tracing::warn!(id = %file.id, "🛡️ Executable content rejected");
            return Err(UploadError::ContentRejected(format!(
                "Executable content is not allowed: {}",
                file.original_name
            )));
        }
        inspect_content_security(head, &file.content_type)
    }
}

/// Factory for the validators a configuration asks for
pub fn create_validators(config: &StorageConfig) -> Vec<Arc<dyn CompletionValidator>> {
    let mut validators: Vec<Arc<dyn CompletionValidator>> = Vec::new();
    if config.block_executables {
        validators.push(Arc::new(ContentInspector));
    }
    validators
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileInit;
    use chrono::Utc;

    fn upload(content_type: &str) -> File {
        File::new(
            "id".to_string(),
            &FileInit::new("payload").with_content_type(content_type),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_inspector_rejects_executables() {
        let inspector = ContentInspector;
        let elf = [0x7F, 0x45, 0x4C, 0x46, 0x02, 0x01];
        let err = inspector
            .validate(&upload("application/octet-stream"), &elf)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::ContentRejected(_)));

        let script = b"<svg onload=alert(1)>";
        assert!(inspector.validate(&upload("image/svg+xml"), script).await.is_err());
    }

    #[tokio::test]
    async fn test_inspector_accepts_plain_content() {
        let inspector = ContentInspector;
        assert!(
            inspector
                .validate(&upload("text/plain"), b"quarterly numbers")
                .await
                .is_ok()
        );
    }

    #[test]
    fn test_create_validators() {
        assert_eq!(create_validators(&StorageConfig::default()).len(), 1);
        assert!(create_validators(&StorageConfig::development()).is_empty());
    }
}
