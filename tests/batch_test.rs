use rust_upload_engine::config::StorageConfig;
use rust_upload_engine::models::{FileInit, FilePart, FileQuery, TransferItem, UploadStatus};
use rust_upload_engine::services::disk::DiskBackend;
use rust_upload_engine::services::meta_store::MemoryMetaStore;
use rust_upload_engine::{ErrorCode, UploadEngine};
use std::sync::Arc;
use tempfile::{TempDir, tempdir};

fn setup() -> (TempDir, UploadEngine) {
    let dir = tempdir().unwrap();
    let config = StorageConfig::with_directory(dir.path());
    let engine = UploadEngine::new(
        Arc::new(DiskBackend::new(&config)),
        Arc::new(MemoryMetaStore::new()),
        config,
    );
    (dir, engine)
}

async fn completed(engine: &UploadEngine, id: &str) {
    engine
        .create(
            FileInit::new(format!("{}.txt", id))
                .with_id(id)
                .with_size(4)
                .with_content_type("text/plain"),
        )
        .await
        .unwrap();
    engine
        .write(FilePart::new(id, 0).with_bytes("data"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_delete_batch_partitions_results() {
    let (_dir, engine) = setup();
    completed(&engine, "valid").await;

    let response = engine
        .delete_batch(vec!["valid".to_string(), "nonexistent".to_string()])
        .await;
    assert_eq!(response.total(), 2);
    assert_eq!(response.successful_count, 1);
    assert_eq!(response.failed_count, 1);

    assert_eq!(response.successful[0].id, "valid");
    assert_eq!(
        response.successful[0].file.as_ref().unwrap().status,
        UploadStatus::Deleted
    );
    let failure = &response.failed[0];
    assert_eq!(failure.id, "nonexistent");
    assert!(!failure.success);
    assert_eq!(failure.error.as_ref().unwrap().code, ErrorCode::FileNotFound);
}

#[tokio::test]
async fn test_empty_batches() {
    let (_dir, engine) = setup();

    for response in [
        engine.delete_batch(Vec::new()).await,
        engine.copy_batch(Vec::new()).await,
        engine.move_batch(Vec::new()).await,
    ] {
        assert_eq!(response.successful_count, 0);
        assert_eq!(response.failed_count, 0);
        assert!(response.successful.is_empty());
        assert!(response.failed.is_empty());
    }
}

#[tokio::test]
async fn test_copy_and_move_batches() {
    let (_dir, engine) = setup();
    completed(&engine, "a").await;
    completed(&engine, "b").await;

    let response = engine
        .copy_batch(vec![
            TransferItem::new("a", "a-copy"),
            TransferItem::new("b", "b-copy"),
            TransferItem::new("missing", "missing-copy"),
        ])
        .await;
    assert_eq!(response.successful_count, 2);
    assert_eq!(response.failed_count, 1);
    assert_eq!(
        response.failed[0].error.as_ref().unwrap().code,
        ErrorCode::FileNotFound
    );
    assert!(engine.exists(&FileQuery::new("a-copy")).await.unwrap());
    assert!(engine.exists(&FileQuery::new("b-copy")).await.unwrap());

    let response = engine
        .move_batch(vec![
            TransferItem::new("a", "a-moved"),
            TransferItem::new("b", "a-copy"),
        ])
        .await;
    assert_eq!(response.successful_count, 1);
    assert_eq!(response.failed_count, 1);
    assert_eq!(response.successful[0].id, "a");
    assert_eq!(
        response.failed[0].error.as_ref().unwrap().code,
        ErrorCode::FileConflict
    );
    assert!(!engine.exists(&FileQuery::new("a")).await.unwrap());
    assert!(engine.exists(&FileQuery::new("b")).await.unwrap());
}

#[tokio::test]
async fn test_batch_response_serializes() {
    let (_dir, engine) = setup();
    let response = engine.delete_batch(vec!["ghost".to_string()]).await;

    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["failed_count"], 1);
    assert_eq!(json["failed"][0]["error"]["code"], "FileNotFound");
}
