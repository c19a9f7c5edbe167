use async_trait::async_trait;

use crate::api::error::UploadError;
use crate::models::File;

/// Lifecycle callbacks. Every method defaults to a no-op, so implementors
/// only override what they care about. Hook failures are logged, never
/// surfaced to the caller.
#[async_trait]
pub trait UploadHooks: Send + Sync {
    async fn on_create(&self, _file: &File) -> Result<(), UploadError> {
        Ok(())
    }

    async fn on_update(&self, _file: &File) -> Result<(), UploadError> {
        Ok(())
    }

    async fn on_complete(&self, _file: &File) -> Result<(), UploadError> {
        Ok(())
    }

    async fn on_delete(&self, _file: &File) -> Result<(), UploadError> {
        Ok(())
    }

    async fn on_error(&self, _id: &str, _error: &UploadError) {}
}

pub struct NoopHooks;

impl UploadHooks for NoopHooks {}
