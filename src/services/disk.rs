use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::io::{self, ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use walkdir::WalkDir;

use crate::api::error::UploadError;
use crate::api::range::ByteRange;
use crate::config::StorageConfig;
use crate::models::{ByteStream, File, FileHash};
use crate::services::pipeline::{
    ChecksumVerifier, ChunkPipeline, DigestStage, FileSink, LengthLimit,
};
use crate::services::storage::{
    BackendCapabilities, BackendKind, ChunkOutcome, ChunkWrite, ObjectHead, ObjectPage,
    PayloadBackend,
};
use crate::utils::hash::{ChecksumAlgorithm, Hasher, hash_reader};

const LIST_PAGE_SIZE: usize = 1000;

/// Running whole-file digest of an in-progress upload.
#[derive(Debug)]
struct DigestState {
    algorithm: ChecksumAlgorithm,
    hasher: Hasher,
    /// Bytes fed into `hasher` so far
    offset: u64,
}

/// Directory layout shared by payloads and metadata sidecars.
#[derive(Debug, Clone)]
struct Layout {
    root: PathBuf,
    meta_prefix: String,
    meta_suffix: String,
}

/// Payloads as plain files under one root directory.
pub struct DiskBackend {
    layout: Layout,
    digest_algorithm: ChecksumAlgorithm,
    digests: DashMap<String, DigestState>,
}

impl DiskBackend {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            layout: Layout {
                root: config.directory.clone(),
                meta_prefix: config.meta_prefix.clone(),
                meta_suffix: config.meta_suffix.clone(),
            },
            digest_algorithm: config.digest_algorithm,
            digests: DashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.layout.root
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.layout.root.join(name)
    }

    fn digest_algorithm_for(&self, file: &File) -> ChecksumAlgorithm {
        file.expected_hash
            .as_ref()
            .map(|hash| hash.algorithm)
            .unwrap_or(self.digest_algorithm)
    }

    /// Takes the cached digest for `name` if it covers exactly `offset` bytes,
    /// otherwise rebuilds it from what is on disk.
    async fn take_digest(
        &self,
        name: &str,
        algorithm: ChecksumAlgorithm,
        offset: u64,
    ) -> Result<Hasher, UploadError> {
        if let Some((_, state)) = self.digests.remove(name)
            && state.algorithm == algorithm
            && state.offset == offset
        {
            return Ok(state.hasher);
        }

        if offset == 0 {
            return Ok(algorithm.hasher());
        }

        tracing::debug!(name = %name, bytes = offset, "Rebuilding digest from disk");
        let handle = tokio::fs::File::open(self.path_for(name)).await?;
        let (hasher, read) = hash_reader(algorithm, handle.take(offset)).await?;
        if read != offset {
            return Err(UploadError::FileConflict(format!(
                "Payload {} holds {} bytes, expected {}",
                name, read, offset
            )));
        }
        Ok(hasher)
    }

    async fn prune_empty_parents(&self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.layout.root || !dir.starts_with(&self.layout.root) {
                break;
            }
            if tokio::fs::remove_dir(dir).await.is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

impl Layout {
    fn is_internal_file(&self, relative: &Path) -> bool {
        let Some(file_name) = relative.file_name().and_then(|n| n.to_str()) else {
            return true;
        };
        if file_name.starts_with('.') && file_name.ends_with(".tmp") {
            return true;
        }
        relative.parent() == Some(Path::new(""))
            && file_name.starts_with(&self.meta_prefix)
            && file_name.ends_with(&self.meta_suffix)
    }

    fn scan(&self, prefix: Option<&str>) -> Vec<ObjectHead> {
        if !self.root.exists() {
            return Vec::new();
        }

        let mut objects = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            if self.is_internal_file(relative) {
                continue;
            }
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if let Some(prefix) = prefix
                && !name.starts_with(prefix)
            {
                continue;
            }
            let metadata = entry.metadata().ok();
            objects.push(ObjectHead {
                name,
                size: metadata.as_ref().map(|m| m.len()).unwrap_or(0),
                last_modified: metadata
                    .and_then(|m| m.modified().ok())
                    .map(DateTime::<Utc>::from),
            });
        }
        objects.sort_by(|a, b| a.name.cmp(&b.name));
        objects
    }
}

fn not_found(name: &str) -> impl FnOnce(io::Error) -> UploadError + '_ {
    move |e| {
        if e.kind() == ErrorKind::NotFound {
            UploadError::FileNotFound(name.to_string())
        } else {
            UploadError::from(e)
        }
    }
}

fn is_cross_device(e: &io::Error) -> bool {
    e.kind() == ErrorKind::CrossesDevices || e.raw_os_error() == Some(18)
}

async fn ensure_parent(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

#[async_trait]
impl PayloadBackend for DiskBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Disk
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            partial_writes: true,
            local_filesystem: true,
            native_rename: true,
        }
    }

    fn is_reserved_name(&self, name: &str) -> bool {
        self.layout.is_internal_file(Path::new(name))
    }

    async fn create(&self, file: &mut File) -> Result<u64, UploadError> {
        let path = self.path_for(&file.name);
        ensure_parent(&path).await?;

        // Opened for update: an existing payload is resumed, never truncated
        let handle = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .await?;
        let mut existing = handle.metadata().await?.len();

        if let Some(size) = file.size
            && existing > size
        {
            tracing::warn!(
                name = %file.name,
                bytes = existing,
                "Payload longer than declared size, starting over"
            );
            handle.set_len(0).await?;
            existing = 0;
        }

        if existing == 0 {
            self.digests.remove(&file.name);
        }
        file.uri = Some(path.to_string_lossy().into_owned());
        Ok(existing)
    }

    async fn write_chunk(
        &self,
        file: &mut File,
        chunk: ChunkWrite,
    ) -> Result<ChunkOutcome, UploadError> {
        let path = self.path_for(&file.name);
        ensure_parent(&path).await?;
        let start = chunk.start;

        let handle = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .await?;
        let on_disk = handle.metadata().await?.len();
        if on_disk < start {
            return Err(UploadError::FileConflict(format!(
                "Payload {} holds {} bytes, cannot write at offset {}",
                file.name, on_disk, start
            )));
        }
        if on_disk > start {
            tracing::debug!(name = %file.name, bytes = on_disk - start, "Dropping unconfirmed tail");
            handle.set_len(start).await?;
        }

        let algorithm = self.digest_algorithm_for(file);
        let mut hasher = self.take_digest(&file.name, algorithm, start).await?;
        let limit = chunk.limit(file.size);
        let partial_allowed = chunk.checksum.is_none();
        let mut sink = FileSink::open(handle, start).await?;

        let result = {
            let mut pipeline = ChunkPipeline::new(partial_allowed).stage(LengthLimit::new(limit));
            if let Some(checksum) = &chunk.checksum {
                pipeline = pipeline.stage(ChecksumVerifier::new(
                    checksum.algorithm,
                    checksum.value.clone(),
                ));
            }
            pipeline = pipeline.stage(DigestStage::new(&mut hasher));
            pipeline
                .run(chunk.body, &mut sink, chunk.cancel.as_ref())
                .await
        };
        drop(sink);

        match result {
            Ok(outcome) => {
                let bytes_written = start + outcome.written;
                self.digests.insert(
                    file.name.clone(),
                    DigestState {
                        algorithm,
                        hasher,
                        offset: bytes_written,
                    },
                );
                tracing::debug!(
                    id = %file.id,
                    bytes = outcome.written,
                    aborted = outcome.aborted,
                    "Chunk written to disk"
                );
                Ok(ChunkOutcome {
                    bytes_written,
                    aborted: outcome.aborted,
                })
            }
            Err(err) => {
                // The file is back at `start` and the hasher at its pre-chunk state
                self.digests.insert(
                    file.name.clone(),
                    DigestState {
                        algorithm,
                        hasher,
                        offset: start,
                    },
                );
                tracing::warn!(id = %file.id, "Chunk rejected, payload rolled back: {}", err);
                Err(err)
            }
        }
    }

    async fn finalize(&self, file: &mut File) -> Result<(), UploadError> {
        let algorithm = self.digest_algorithm_for(file);
        let hasher = self
            .take_digest(&file.name, algorithm, file.bytes_written)
            .await?;
        file.hash = Some(FileHash {
            algorithm,
            value: hasher.finalize_hex(),
        });
        Ok(())
    }

    async fn abort(&self, file: &mut File) -> Result<(), UploadError> {
        self.digests.remove(&file.name);
        Ok(())
    }

    async fn read(&self, name: &str, range: Option<ByteRange>) -> Result<Bytes, UploadError> {
        let path = self.path_for(name);
        match range {
            None => Ok(Bytes::from(
                tokio::fs::read(&path).await.map_err(not_found(name))?,
            )),
            Some(range) => {
                let mut handle = tokio::fs::File::open(&path).await.map_err(not_found(name))?;
                handle.seek(SeekFrom::Start(range.start)).await?;
                let mut buffer = vec![0u8; range.len() as usize];
                handle.read_exact(&mut buffer).await?;
                Ok(Bytes::from(buffer))
            }
        }
    }

    async fn read_stream(
        &self,
        name: &str,
        range: Option<ByteRange>,
    ) -> Result<ByteStream, UploadError> {
        let mut handle = tokio::fs::File::open(self.path_for(name))
            .await
            .map_err(not_found(name))?;
        match range {
            None => Ok(Box::pin(ReaderStream::new(handle))),
            Some(range) => {
                handle.seek(SeekFrom::Start(range.start)).await?;
                Ok(Box::pin(ReaderStream::new(handle.take(range.len()))))
            }
        }
    }

    async fn delete_object(&self, name: &str) -> Result<bool, UploadError> {
        self.digests.remove(name);
        let path = self.path_for(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                self.prune_empty_parents(&path).await;
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn copy_object(&self, source: &str, destination: &str) -> Result<(), UploadError> {
        let target = self.path_for(destination);
        ensure_parent(&target).await?;
        tokio::fs::copy(self.path_for(source), &target)
            .await
            .map_err(not_found(source))?;
        Ok(())
    }

    async fn move_object(&self, source: &str, destination: &str) -> Result<(), UploadError> {
        let from = self.path_for(source);
        let to = self.path_for(destination);
        ensure_parent(&to).await?;

        match tokio::fs::rename(&from, &to).await {
            Ok(()) => {}
            Err(e) if is_cross_device(&e) => {
                tracing::warn!(
                    source = %source,
                    destination = %destination,
                    "Rename crosses devices, falling back to copy"
                );
                tokio::fs::copy(&from, &to).await.map_err(not_found(source))?;
                tokio::fs::remove_file(&from).await?;
            }
            Err(e) => return Err(not_found(source)(e)),
        }

        if let Some((_, state)) = self.digests.remove(source) {
            self.digests.insert(destination.to_string(), state);
        }
        self.prune_empty_parents(&from).await;
        Ok(())
    }

    async fn list_page(
        &self,
        prefix: Option<&str>,
        token: Option<String>,
    ) -> Result<ObjectPage, UploadError> {
        let layout = self.layout.clone();
        let prefix = prefix.map(str::to_string);
        let objects = tokio::task::spawn_blocking(move || layout.scan(prefix.as_deref()))
            .await
            .map_err(|e| UploadError::FileError(format!("Payload scan failed: {}", e)))?;

        let mut page: Vec<ObjectHead> = objects
            .into_iter()
            .filter(|o| token.as_ref().is_none_or(|t| o.name.as_str() > t.as_str()))
            .take(LIST_PAGE_SIZE + 1)
            .collect();
        let next_token = if page.len() > LIST_PAGE_SIZE {
            page.truncate(LIST_PAGE_SIZE);
            page.last().map(|o| o.name.clone())
        } else {
            None
        };
        Ok(ObjectPage {
            objects: page,
            next_token,
        })
    }

    async fn head_object(&self, name: &str) -> Result<Option<ObjectHead>, UploadError> {
        match tokio::fs::metadata(self.path_for(name)).await {
            Ok(metadata) if metadata.is_file() => Ok(Some(ObjectHead {
                name: name.to_string(),
                size: metadata.len(),
                last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
