use futures::future::join_all;

use crate::models::{BatchOperationResponse, BatchOperationResult, FileQuery, TransferItem};

use super::{TransferMode, UploadEngine};

impl UploadEngine {
    /// Deletes every id concurrently. Failures are collected per item.
    pub async fn delete_batch(&self, ids: Vec<String>) -> BatchOperationResponse {
        if ids.is_empty() {
            return BatchOperationResponse::default();
        }
        let results = join_all(ids.into_iter().map(|id| async move {
            let outcome = self.delete(&FileQuery::new(id.clone())).await;
            BatchOperationResult::from_outcome(id, outcome)
        }))
        .await;

        let response = BatchOperationResponse::from_results(results);
        tracing::info!(
            total = response.total(),
            successful = response.successful_count,
            failed = response.failed_count,
            "Batch delete finished"
        );
        response
    }

    pub async fn copy_batch(&self, items: Vec<TransferItem>) -> BatchOperationResponse {
        self.transfer_batch(items, TransferMode::Copy).await
    }

    pub async fn move_batch(&self, items: Vec<TransferItem>) -> BatchOperationResponse {
        self.transfer_batch(items, TransferMode::Move).await
    }

    async fn transfer_batch(
        &self,
        items: Vec<TransferItem>,
        mode: TransferMode,
    ) -> BatchOperationResponse {
        if items.is_empty() {
            return BatchOperationResponse::default();
        }
        let results = join_all(items.into_iter().map(|item| async move {
            let outcome = self.transfer(&item.source, &item.destination, mode).await;
            BatchOperationResult::from_outcome(item.source, outcome)
        }))
        .await;

        let response = BatchOperationResponse::from_results(results);
        tracing::info!(
            mode = mode.as_str(),
            total = response.total(),
            successful = response.successful_count,
            failed = response.failed_count,
            "Batch transfer finished"
        );
        response
    }
}
