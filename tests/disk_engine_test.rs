use bytes::Bytes;
use futures::StreamExt;
use futures::channel::mpsc;
use rust_upload_engine::config::StorageConfig;
use rust_upload_engine::models::{ByteStream, FileInit, FilePart, FileQuery, UploadStatus};
use rust_upload_engine::services::disk::DiskBackend;
use rust_upload_engine::services::meta_store::{DiskMetaStore, MemoryMetaStore};
use rust_upload_engine::utils::hash::{ChecksumAlgorithm, calculate_hash};
use rust_upload_engine::{UploadEngine, UploadError};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{TempDir, tempdir};
use tokio_util::sync::CancellationToken;

fn engine_with(config: StorageConfig) -> UploadEngine {
    let meta = DiskMetaStore::new(
        config.directory.clone(),
        config.meta_prefix.clone(),
        config.meta_suffix.clone(),
    );
    UploadEngine::new(
        Arc::new(DiskBackend::new(&config)),
        Arc::new(meta),
        config,
    )
}

fn setup() -> (TempDir, UploadEngine) {
    let dir = tempdir().unwrap();
    let engine = engine_with(StorageConfig::with_directory(dir.path()));
    (dir, engine)
}

/// Body fed through a channel so tests control when chunks arrive.
fn channel_body() -> (mpsc::UnboundedSender<io::Result<Bytes>>, ByteStream) {
    let (tx, rx) = mpsc::unbounded();
    (tx, Box::pin(rx))
}

fn broken_body(data: &'static [u8]) -> ByteStream {
    Box::pin(futures::stream::iter(vec![
        Ok(Bytes::from_static(data)),
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away")),
    ]))
}

async fn completed_upload(engine: &UploadEngine, id: &str, data: &'static [u8]) {
    engine
        .create(
            FileInit::new(format!("{}.txt", id))
                .with_id(id)
                .with_size(data.len() as u64)
                .with_content_type("text/plain"),
        )
        .await
        .unwrap();
    let file = engine
        .write(FilePart::new(id, 0).with_bytes(data))
        .await
        .unwrap();
    assert_eq!(file.status, UploadStatus::Completed);
}

#[tokio::test]
async fn test_chunked_upload_completes() {
    let (_dir, engine) = setup();
    let file = engine
        .create(
            FileInit::new("greeting.txt")
                .with_size(11)
                .with_content_type("text/plain"),
        )
        .await
        .unwrap();
    assert_eq!(file.status, UploadStatus::Created);
    assert_eq!(file.name, file.id);

    let file = engine
        .write(FilePart::new(&file.id, 0).with_bytes("hello "))
        .await
        .unwrap();
    assert_eq!(file.status, UploadStatus::Part);
    assert_eq!(file.bytes_written, 6);

    let file = engine
        .write(FilePart::new(&file.id, 6).with_bytes("world"))
        .await
        .unwrap();
    assert_eq!(file.status, UploadStatus::Completed);
    assert_eq!(file.bytes_written, 11);
    let hash = file.hash.clone().unwrap();
    assert_eq!(hash.algorithm, ChecksumAlgorithm::Sha256);
    assert_eq!(
        hash.value,
        calculate_hash(ChecksumAlgorithm::Sha256, b"hello world")
    );

    let stored = engine.get(&FileQuery::new(&file.id)).await.unwrap();
    assert_eq!(stored.content, Bytes::from_static(b"hello world"));
}

#[tokio::test]
async fn test_offset_mismatch_is_conflict() {
    let (_dir, engine) = setup();
    let file = engine
        .create(FileInit::new("a.bin").with_size(10))
        .await
        .unwrap();

    let err = engine
        .write(FilePart::new(&file.id, 3).with_bytes("abc"))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::FileConflict(_)));

    let err = engine
        .write(FilePart::new(&file.id, 0).with_bytes("this is far too long"))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::FileConflict(_)));
    assert_eq!(
        engine.info(&FileQuery::new(&file.id)).await.unwrap().bytes_written,
        0
    );
}

#[tokio::test]
async fn test_create_after_completion_returns_same_record() {
    let (_dir, engine) = setup();
    let init = FileInit::new("report.txt")
        .with_size(4)
        .with_content_type("text/plain");
    let file = engine.create(init.clone()).await.unwrap();
    let done = engine
        .write(FilePart::new(&file.id, 0).with_bytes("data"))
        .await
        .unwrap();

    let again = engine.create(init).await.unwrap();
    assert_eq!(again.id, done.id);
    assert_eq!(again.status, UploadStatus::Completed);
    assert_eq!(again.bytes_written, done.bytes_written);
    assert_eq!(again.created_at, done.created_at);
    assert_eq!(again.hash, done.hash);
}

#[tokio::test]
async fn test_checksum_failure_rolls_back_chunk() {
    let (dir, engine) = setup();
    let file = engine
        .create(FileInit::new("a.txt").with_size(6).with_content_type("text/plain"))
        .await
        .unwrap();

    let err = engine
        .write(FilePart::new(&file.id, 0).with_bytes("abc").with_checksum("sha256", "00ff"))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::ChecksumMismatch { .. }));
    assert_eq!(
        engine.info(&FileQuery::new(&file.id)).await.unwrap().bytes_written,
        0
    );
    assert_eq!(std::fs::metadata(dir.path().join(&file.name)).unwrap().len(), 0);

    let checksum = calculate_hash(ChecksumAlgorithm::Sha1, b"abc");
    let file = engine
        .write(FilePart::new(&file.id, 0).with_bytes("abc").with_checksum("sha1", checksum))
        .await
        .unwrap();
    assert_eq!(file.bytes_written, 3);
}

#[tokio::test]
async fn test_unsupported_checksum_rejected_before_io() {
    let (_dir, engine) = setup();
    let file = engine
        .create(FileInit::new("a.txt").with_size(3))
        .await
        .unwrap();

    let err = engine
        .write(FilePart::new(&file.id, 0).with_bytes("abc").with_checksum("whirlpool", "00"))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::UnsupportedChecksumAlgorithm(_)));
    assert_eq!(
        engine.info(&FileQuery::new(&file.id)).await.unwrap().bytes_written,
        0
    );
}

#[tokio::test]
async fn test_aborted_body_keeps_partial_bytes() {
    let (_dir, engine) = setup();
    let file = engine
        .create(FileInit::new("a.txt").with_size(10).with_content_type("text/plain"))
        .await
        .unwrap();

    let file = engine
        .write(FilePart::new(&file.id, 0).with_body(broken_body(b"abc")))
        .await
        .unwrap();
    assert_eq!(file.bytes_written, 3);
    assert_eq!(file.status, UploadStatus::Part);

    let checksum = calculate_hash(ChecksumAlgorithm::Md5, b"defghij");
    let err = engine
        .write(
            FilePart::new(&file.id, 3)
                .with_body(broken_body(b"def"))
                .with_checksum("md5", checksum),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::RequestAborted(_)));
    assert_eq!(
        engine.info(&FileQuery::new(&file.id)).await.unwrap().bytes_written,
        3
    );

    let file = engine
        .write(FilePart::new(&file.id, 3).with_bytes("defghij"))
        .await
        .unwrap();
    assert_eq!(file.status, UploadStatus::Completed);
    let stored = engine.get(&FileQuery::new(&file.id)).await.unwrap();
    assert_eq!(stored.content, Bytes::from_static(b"abcdefghij"));
    assert_eq!(
        file.hash.unwrap().value,
        calculate_hash(ChecksumAlgorithm::Sha256, b"abcdefghij")
    );
}

#[tokio::test]
async fn test_concurrent_write_fails_fast() {
    let (_dir, engine) = setup();
    let engine = Arc::new(engine);
    let file = engine
        .create(FileInit::new("a.txt").with_size(6).with_content_type("text/plain"))
        .await
        .unwrap();

    let (tx, body) = channel_body();
    let first = {
        let engine = engine.clone();
        let id = file.id.clone();
        tokio::spawn(async move { engine.write(FilePart::new(id, 0).with_body(body)).await })
    };
    tx.unbounded_send(Ok(Bytes::from_static(b"abc"))).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = engine
        .write(FilePart::new(&file.id, 0).with_bytes("xyz"))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::FileLocked(_)));

    tx.unbounded_send(Ok(Bytes::from_static(b"def"))).unwrap();
    drop(tx);
    let file = first.await.unwrap().unwrap();
    assert_eq!(file.status, UploadStatus::Completed);

    let stored = engine.get(&FileQuery::new(&file.id)).await.unwrap();
    assert_eq!(stored.content, Bytes::from_static(b"abcdef"));
}

#[tokio::test]
async fn test_cancellation_keeps_written_bytes() {
    let (_dir, engine) = setup();
    let engine = Arc::new(engine);
    let file = engine
        .create(FileInit::new("a.txt").with_size(6).with_content_type("text/plain"))
        .await
        .unwrap();

    let token = CancellationToken::new();
    let (tx, body) = channel_body();
    let task = {
        let engine = engine.clone();
        let id = file.id.clone();
        let token = token.clone();
        tokio::spawn(async move {
            engine
                .write(FilePart::new(id, 0).with_body(body).with_cancel(token))
                .await
        })
    };
    tx.unbounded_send(Ok(Bytes::from_static(b"abc"))).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();

    let file = task.await.unwrap().unwrap();
    assert_eq!(file.bytes_written, 3);
    assert_eq!(file.status, UploadStatus::Part);

    // Lock released after cancellation
    let file = engine
        .write(FilePart::new(&file.id, 3).with_bytes("def"))
        .await
        .unwrap();
    assert_eq!(file.status, UploadStatus::Completed);
}

#[tokio::test]
async fn test_get_and_get_stream_agree() {
    let (_dir, engine) = setup();
    completed_upload(&engine, "doc", b"hello world").await;
    let query = FileQuery::new("doc");

    let buffered = engine.get(&query).await.unwrap();
    let streamed = engine.get_stream(&query, None).await.unwrap();
    assert_eq!(streamed.size, buffered.content.len() as u64);
    assert_eq!(streamed.file.content_type, buffered.file.content_type);
    assert!(streamed.range.is_none());

    let mut collected = Vec::new();
    let mut stream = streamed.stream;
    while let Some(chunk) = stream.next().await {
        collected.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(collected, buffered.content.to_vec());

    let ranged = engine.get_stream(&query, Some("bytes=6-")).await.unwrap();
    assert_eq!(ranged.size, 5);
    assert_eq!(ranged.total, 11);
    let headers = ranged.headers();
    assert!(headers.contains(&("content-range", "bytes 6-10/11".to_string())));
    let body: Vec<Bytes> = ranged.stream.map(|c| c.unwrap()).collect().await;
    assert_eq!(body.concat(), b"world".to_vec());

    let invalid = engine.get_stream(&query, Some("bytes=0-1,4-5")).await.unwrap();
    assert!(invalid.range.is_none());
    assert_eq!(invalid.size, 11);
}

#[tokio::test]
async fn test_delete_then_gone() {
    let (dir, engine) = setup();
    completed_upload(&engine, "doc", b"content").await;

    let deleted = engine.delete(&FileQuery::new("doc")).await.unwrap();
    assert_eq!(deleted.status, UploadStatus::Deleted);
    assert!(!dir.path().join("doc").exists());
    assert!(!dir.path().join("doc.META").exists());

    let err = engine.get(&FileQuery::new("doc")).await.unwrap_err();
    assert!(matches!(err, UploadError::Gone(_)));
    let err = engine
        .write(FilePart::new("doc", 0).with_bytes("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Gone(_)));
    assert!(!engine.exists(&FileQuery::new("doc")).await.unwrap());

    let err = engine.delete(&FileQuery::new("never-existed")).await.unwrap_err();
    assert!(matches!(err, UploadError::FileNotFound(_)));
}

#[tokio::test]
async fn test_delete_tolerates_missing_payload() {
    let (dir, engine) = setup();
    completed_upload(&engine, "doc", b"content").await;
    std::fs::remove_file(dir.path().join("doc")).unwrap();

    let deleted = engine.delete(&FileQuery::new("doc")).await.unwrap();
    assert_eq!(deleted.status, UploadStatus::Deleted);
}

#[tokio::test]
async fn test_list_returns_records_only() {
    let (_dir, engine) = setup();
    completed_upload(&engine, "first", b"one").await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    engine
        .create(FileInit::new("second.bin").with_id("second").with_size(100))
        .await
        .unwrap();

    let files = engine.list(10).await.unwrap();
    let ids: Vec<_> = files.iter().map(|f| f.id.as_str()).collect();
    assert_eq!(ids, vec!["first", "second"]);

    let files = engine.list(1).await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].id, "first");
}

#[tokio::test]
async fn test_purge_removes_idle_uploads_and_orphans() {
    let (dir, engine) = setup();
    completed_upload(&engine, "old", b"stale").await;
    std::fs::write(dir.path().join("stray.bin"), b"nobody owns me").unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let result = engine.purge(Some(Duration::ZERO)).await.unwrap();
    assert_eq!(result.attempted, 1);
    assert_eq!(result.items.len(), 1);
    assert_eq!(result.items[0].status, UploadStatus::Deleted);
    assert_eq!(result.orphans, vec!["stray.bin".to_string()]);
    assert!(!dir.path().join("stray.bin").exists());

    let err = engine.get(&FileQuery::new("old")).await.unwrap_err();
    assert!(matches!(err, UploadError::Gone(_)));
}

#[tokio::test]
async fn test_purge_skips_corrupt_records() {
    let (dir, engine) = setup();
    completed_upload(&engine, "keep", b"fresh").await;
    std::fs::write(dir.path().join("broken.META"), b"{not json").unwrap();
    std::fs::write(dir.path().join("stray.bin"), b"orphan").unwrap();

    let result = engine.purge(Some(Duration::from_secs(3600))).await.unwrap();
    assert_eq!(result.attempted, 2);
    assert!(result.items.is_empty());
    assert!(result.orphans.is_empty());
    assert!(dir.path().join("stray.bin").exists());
    assert!(engine.exists(&FileQuery::new("keep")).await.unwrap());
}

#[tokio::test]
async fn test_purge_keeps_payload_of_busy_upload() {
    let (dir, engine) = setup();
    let engine = Arc::new(engine);
    engine
        .create(
            FileInit::new("busy.txt")
                .with_id("busy")
                .with_size(6)
                .with_content_type("text/plain"),
        )
        .await
        .unwrap();

    let (tx, body) = channel_body();
    let writer = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.write(FilePart::new("busy", 0).with_body(body)).await })
    };
    tx.unbounded_send(Ok(Bytes::from_static(b"abc"))).unwrap();
    std::fs::write(dir.path().join("stray.bin"), b"orphan").unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let result = engine.purge(Some(Duration::ZERO)).await.unwrap();
    assert_eq!(result.skipped, 1);
    assert!(result.items.is_empty());
    assert_eq!(result.orphans, vec!["stray.bin".to_string()]);
    assert!(dir.path().join("busy").exists());

    tx.unbounded_send(Ok(Bytes::from_static(b"def"))).unwrap();
    drop(tx);
    let file = writer.await.unwrap().unwrap();
    assert_eq!(file.status, UploadStatus::Completed);
    let stored = engine.get(&FileQuery::new("busy")).await.unwrap();
    assert_eq!(stored.content, Bytes::from_static(b"abcdef"));
}

#[tokio::test]
async fn test_copy_and_move() {
    let (_dir, engine) = setup();
    completed_upload(&engine, "source", b"payload").await;

    let copy = engine.copy("source", "copy").await.unwrap();
    assert_eq!(copy.id, "copy");
    assert_eq!(copy.status, UploadStatus::Completed);
    assert_eq!(
        engine.get(&FileQuery::new("copy")).await.unwrap().content,
        Bytes::from_static(b"payload")
    );
    assert!(engine.exists(&FileQuery::new("source")).await.unwrap());

    let err = engine.copy("source", "copy").await.unwrap_err();
    assert!(matches!(err, UploadError::FileConflict(_)));

    let moved = engine.move_("source", "moved").await.unwrap();
    assert_eq!(moved.id, "moved");
    assert_eq!(
        engine.get(&FileQuery::new("moved")).await.unwrap().content,
        Bytes::from_static(b"payload")
    );
    let err = engine.get(&FileQuery::new("source")).await.unwrap_err();
    assert!(matches!(err, UploadError::Gone(_)));
}

#[tokio::test]
async fn test_transfer_requires_completed_tracked_source() {
    let (_dir, engine) = setup();
    engine
        .create(FileInit::new("partial.bin").with_id("partial").with_size(10))
        .await
        .unwrap();

    let err = engine.copy("partial", "elsewhere").await.unwrap_err();
    assert!(matches!(err, UploadError::FileConflict(_)));

    let err = engine.move_("ghost", "elsewhere").await.unwrap_err();
    assert!(matches!(err, UploadError::FileNotFound(_)));

    let err = engine.copy("partial", "partial").await.unwrap_err();
    assert!(matches!(err, UploadError::FileConflict(_)));
}

#[tokio::test]
async fn test_content_type_sniffed_from_first_chunk() {
    let (_dir, engine) = setup();
    let png: &'static [u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D,
    ];
    let file = engine
        .create(FileInit::new("picture").with_size(png.len() as u64))
        .await
        .unwrap();
    assert_eq!(file.content_type, "application/octet-stream");

    let file = engine
        .write(FilePart::new(&file.id, 0).with_bytes(png))
        .await
        .unwrap();
    assert_eq!(file.content_type, "image/png");
    assert_eq!(file.bytes_written, png.len() as u64);
}

#[tokio::test]
async fn test_zero_length_upload_completes_on_create() {
    let (_dir, engine) = setup();
    let file = engine
        .create(FileInit::new("empty.txt").with_size(0))
        .await
        .unwrap();
    assert_eq!(file.status, UploadStatus::Completed);

    let stored = engine.get(&FileQuery::new(&file.id)).await.unwrap();
    assert!(stored.content.is_empty());
}

#[tokio::test]
async fn test_deferred_size_is_fixed_once() {
    let (_dir, engine) = setup();
    let file = engine.create(FileInit::new("stream.log")).await.unwrap();
    assert!(file.size.is_none());

    let file = engine
        .write(FilePart::new(&file.id, 0).with_bytes("abc").with_size(6))
        .await
        .unwrap();
    assert_eq!(file.size, Some(6));
    assert_eq!(file.status, UploadStatus::Part);

    let err = engine
        .write(FilePart::new(&file.id, 3).with_bytes("def").with_size(7))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::FileConflict(_)));
}

#[tokio::test]
async fn test_declared_size_over_limit() {
    let dir = tempdir().unwrap();
    let mut config = StorageConfig::with_directory(dir.path());
    config.max_upload_size = 10;
    let engine = engine_with(config);

    let err = engine
        .create(FileInit::new("big.bin").with_size(11))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::RequestEntityTooLarge(_)));
}

#[tokio::test]
async fn test_unsafe_names_rejected() {
    let (_dir, engine) = setup();
    let engine = engine.with_naming(|_| "../escape".to_string());
    let err = engine
        .create(FileInit::new("a.txt").with_size(1))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::InvalidFileName(_)));
}

#[tokio::test]
async fn test_ids_cannot_reach_metadata_sidecars() {
    let (dir, engine) = setup();
    completed_upload(&engine, "victim", b"precious").await;
    let sidecar = std::fs::read(dir.path().join("victim.META")).unwrap();

    let err = engine
        .create(
            FileInit::new("evil.bin")
                .with_id("victim.META")
                .with_size(10_000),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::InvalidFileName(_)));

    let err = engine.copy("victim", "victim.META").await.unwrap_err();
    assert!(matches!(err, UploadError::InvalidFileName(_)));

    let err = engine
        .delete(&FileQuery::new("victim.META"))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::FileNotFound(_)));

    assert_eq!(std::fs::read(dir.path().join("victim.META")).unwrap(), sidecar);
    let reopened = engine_with(StorageConfig::with_directory(dir.path()));
    let stored = reopened.get(&FileQuery::new("victim")).await.unwrap();
    assert_eq!(stored.content, Bytes::from_static(b"precious"));
}

#[tokio::test]
async fn test_expired_upload_is_gone() {
    let (_dir, engine) = setup();
    let mut init = FileInit::new("short-lived.txt").with_size(3);
    init.expires_in = Some(0);
    let file = engine.create(init).await.unwrap();

    let err = engine
        .write(FilePart::new(&file.id, 0).with_bytes("abc"))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Gone(_)));
    assert!(!engine.exists(&FileQuery::new(&file.id)).await.unwrap());
}

#[tokio::test]
async fn test_out_of_range_expiry_never_expires() {
    let (dir, engine) = setup();
    for (id, secs) in [("max", u64::MAX), ("huge", 10_000_000_000_000_000)] {
        let mut init = FileInit::new("forever.txt").with_id(id).with_size(3);
        init.expires_in = Some(secs);
        let file = engine.create(init).await.unwrap();
        assert!(file.expired_at.is_none());

        let file = engine
            .write(FilePart::new(id, 0).with_bytes("abc"))
            .await
            .unwrap();
        assert_eq!(file.status, UploadStatus::Completed);
    }

    let reopened = engine_with(StorageConfig::with_directory(dir.path()));
    assert!(reopened.exists(&FileQuery::new("max")).await.unwrap());
    assert!(reopened.exists(&FileQuery::new("huge")).await.unwrap());
}

#[tokio::test]
async fn test_executable_rolled_back_on_completion() {
    let (dir, engine) = setup();
    let elf: &'static [u8] = &[0x7F, 0x45, 0x4C, 0x46, 0x02, 0x01, 0x01, 0x00];
    let file = engine
        .create(FileInit::new("tool").with_id("tool").with_size(elf.len() as u64))
        .await
        .unwrap();

    let err = engine
        .write(FilePart::new(&file.id, 0).with_bytes(elf))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::ContentRejected(_)));
    assert!(!dir.path().join("tool").exists());

    let err = engine.info(&FileQuery::new("tool")).await.unwrap_err();
    assert!(matches!(err, UploadError::FileNotFound(_)));
}

#[tokio::test]
async fn test_declared_hash_verified_on_completion() {
    let (_dir, engine) = setup();
    let file = engine
        .create(
            FileInit::new("a.txt")
                .with_size(5)
                .with_content_type("text/plain")
                .with_hash(ChecksumAlgorithm::Md5, "00112233445566778899aabbccddeeff"),
        )
        .await
        .unwrap();
    let err = engine
        .write(FilePart::new(&file.id, 0).with_bytes("hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::ChecksumMismatch { .. }));
    assert!(!engine.exists(&FileQuery::new(&file.id)).await.unwrap());

    let md5 = calculate_hash(ChecksumAlgorithm::Md5, b"hello");
    let file = engine
        .create(
            FileInit::new("b.txt")
                .with_size(5)
                .with_content_type("text/plain")
                .with_hash(ChecksumAlgorithm::Md5, md5.clone()),
        )
        .await
        .unwrap();
    let file = engine
        .write(FilePart::new(&file.id, 0).with_bytes("hello"))
        .await
        .unwrap();
    assert_eq!(file.hash.unwrap().value, md5);
}

#[tokio::test]
async fn test_resume_adopts_bytes_on_disk() {
    let dir = tempdir().unwrap();
    let config = StorageConfig::with_directory(dir.path());
    let init = FileInit::new("resume.txt")
        .with_size(6)
        .with_content_type("text/plain");

    let first = UploadEngine::new(
        Arc::new(DiskBackend::new(&config)),
        Arc::new(MemoryMetaStore::new()),
        config.clone(),
    );
    let file = first.create(init.clone()).await.unwrap();
    first
        .write(FilePart::new(&file.id, 0).with_bytes("abc"))
        .await
        .unwrap();

    let second = UploadEngine::new(
        Arc::new(DiskBackend::new(&config)),
        Arc::new(MemoryMetaStore::new()),
        config,
    );
    let resumed = second.create(init).await.unwrap();
    assert_eq!(resumed.id, file.id);
    assert_eq!(resumed.bytes_written, 3);
    assert_eq!(resumed.status, UploadStatus::Part);

    let done = second
        .write(FilePart::new(&file.id, 3).with_bytes("def"))
        .await
        .unwrap();
    assert_eq!(
        done.hash.unwrap().value,
        calculate_hash(ChecksumAlgorithm::Sha256, b"abcdef")
    );
}
