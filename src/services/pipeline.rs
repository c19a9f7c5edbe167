use async_trait::async_trait;
use futures::StreamExt;
use std::io;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::api::error::UploadError;
use crate::models::ByteStream;
use crate::utils::hash::{ChecksumAlgorithm, Hasher, digest_matches};

/// One step of the chunk-write pipeline. Stages see every chunk before it
/// reaches the sink, in the order they were added.
pub trait ChunkStage: Send {
    fn name(&self) -> &'static str;

    fn on_chunk(&mut self, chunk: &[u8]) -> Result<(), UploadError>;

    /// Called once the body is exhausted, before the sink is flushed.
    fn on_end(&mut self) -> Result<(), UploadError> {
        Ok(())
    }

    /// Restores the stage to its pre-chunk state after a rollback.
    fn reset(&mut self) {}
}

/// Rejects a body that carries more bytes than allowed.
pub struct LengthLimit {
    limit: u64,
    seen: u64,
}

impl LengthLimit {
    pub fn new(limit: u64) -> Self {
        Self { limit, seen: 0 }
    }
}

impl ChunkStage for LengthLimit {
    fn name(&self) -> &'static str {
        "length"
    }

    fn on_chunk(&mut self, chunk: &[u8]) -> Result<(), UploadError> {
        self.seen += chunk.len() as u64;
        if self.seen > self.limit {
            return Err(UploadError::FileConflict(format!(
                "Chunk exceeds the allowed length of {} bytes",
                self.limit
            )));
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.seen = 0;
    }
}

/// Hashes the chunk and compares against the client-declared checksum at the end.
pub struct ChecksumVerifier {
    algorithm: ChecksumAlgorithm,
    expected: String,
    hasher: Hasher,
}

impl ChecksumVerifier {
    pub fn new(algorithm: ChecksumAlgorithm, expected: impl Into<String>) -> Self {
        Self {
            algorithm,
            expected: expected.into(),
            hasher: algorithm.hasher(),
        }
    }
}

impl ChunkStage for ChecksumVerifier {
    fn name(&self) -> &'static str {
        "checksum"
    }

    fn on_chunk(&mut self, chunk: &[u8]) -> Result<(), UploadError> {
        self.hasher.update(chunk);
        Ok(())
    }

    fn on_end(&mut self) -> Result<(), UploadError> {
        let hasher = std::mem::replace(&mut self.hasher, self.algorithm.hasher());
        let actual = hasher.finalize();
        if digest_matches(&self.expected, &actual) {
            Ok(())
        } else {
            Err(UploadError::ChecksumMismatch {
                expected: self.expected.clone(),
                actual: hex::encode(actual),
            })
        }
    }

    fn reset(&mut self) {
        self.hasher = self.algorithm.hasher();
    }
}

/// Feeds the running whole-file digest. On reset the digest goes back to
/// where it stood before this chunk.
pub struct DigestStage<'a> {
    hasher: &'a mut Hasher,
    snapshot: Hasher,
}

impl<'a> DigestStage<'a> {
    pub fn new(hasher: &'a mut Hasher) -> Self {
        let snapshot = hasher.clone();
        Self { hasher, snapshot }
    }
}

impl ChunkStage for DigestStage<'_> {
    fn name(&self) -> &'static str {
        "digest"
    }

    fn on_chunk(&mut self, chunk: &[u8]) -> Result<(), UploadError> {
        self.hasher.update(chunk);
        Ok(())
    }

    fn reset(&mut self) {
        *self.hasher = self.snapshot.clone();
    }
}

/// Destination of the pipeline.
#[async_trait]
pub trait ChunkSink: Send {
    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()>;

    async fn flush(&mut self) -> io::Result<()>;

    /// Drops everything written by this pipeline run.
    async fn rollback(&mut self) -> io::Result<()>;
}

/// Positional writer over a file opened for update.
pub struct FileSink {
    file: tokio::fs::File,
    start: u64,
}

impl FileSink {
    pub async fn open(mut file: tokio::fs::File, start: u64) -> io::Result<Self> {
        file.seek(io::SeekFrom::Start(start)).await?;
        Ok(Self { file, start })
    }
}

#[async_trait]
impl ChunkSink for FileSink {
    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.file.write_all(chunk).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.file.flush().await?;
        self.file.sync_data().await
    }

    async fn rollback(&mut self) -> io::Result<()> {
        self.file.flush().await?;
        self.file.set_len(self.start).await?;
        self.file.seek(io::SeekFrom::Start(self.start)).await?;
        Ok(())
    }
}

/// In-memory sink, used where the payload goes out as a single request.
#[derive(Debug, Default)]
pub struct BufferSink {
    buffer: Vec<u8>,
}

impl BufferSink {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[async_trait]
impl ChunkSink for BufferSink {
    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }

    async fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    async fn rollback(&mut self) -> io::Result<()> {
        self.buffer.clear();
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOutcome {
    /// Bytes committed to the sink
    pub written: u64,
    /// Body ended early and the partial bytes were kept
    pub aborted: bool,
}

enum Next {
    Item(Option<io::Result<bytes::Bytes>>),
    Cancelled,
}

/// Ordered stages in front of a sink.
pub struct ChunkPipeline<'a> {
    stages: Vec<Box<dyn ChunkStage + 'a>>,
    partial_allowed: bool,
}

impl<'a> ChunkPipeline<'a> {
    /// `partial_allowed` decides what an aborted body means: keep what was
    /// written, or roll back and fail with `RequestAborted`.
    pub fn new(partial_allowed: bool) -> Self {
        Self {
            stages: Vec::new(),
            partial_allowed,
        }
    }

    pub fn stage(mut self, stage: impl ChunkStage + 'a) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub async fn run<S>(
        &mut self,
        mut body: ByteStream,
        sink: &mut S,
        cancel: Option<&CancellationToken>,
    ) -> Result<PipelineOutcome, UploadError>
    where
        S: ChunkSink + ?Sized,
    {
        let mut written = 0u64;
        tracing::trace!(stages = ?self.stage_names(), "Running chunk pipeline");

        loop {
            let next = match cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => Next::Cancelled,
                    item = body.next() => Next::Item(item),
                },
                None => Next::Item(body.next().await),
            };

            let chunk = match next {
                Next::Item(Some(Ok(chunk))) => chunk,
                Next::Item(None) => break,
                Next::Item(Some(Err(e))) => {
                    tracing::debug!(bytes = written, "Request body aborted: {}", e);
                    return self.abort(sink, written).await;
                }
                Next::Cancelled => {
                    tracing::debug!(bytes = written, "Chunk write cancelled");
                    return self.abort(sink, written).await;
                }
            };

            if chunk.is_empty() {
                continue;
            }

            if let Err(err) = self.apply_stages(&chunk) {
                return Err(self.fail(sink, err).await);
            }

            if let Err(e) = sink.write_chunk(&chunk).await {
                return Err(self.fail(sink, UploadError::from(e)).await);
            }
            written += chunk.len() as u64;
        }

        let ended = self.stages.iter_mut().try_for_each(|stage| stage.on_end());
        if let Err(err) = ended {
            tracing::debug!(bytes = written, "Chunk rejected at end of body: {}", err);
            return Err(self.fail(sink, err).await);
        }

        if let Err(e) = sink.flush().await {
            return Err(self.fail(sink, UploadError::from(e)).await);
        }

        Ok(PipelineOutcome {
            written,
            aborted: false,
        })
    }

    fn apply_stages(&mut self, chunk: &[u8]) -> Result<(), UploadError> {
        for stage in self.stages.iter_mut() {
            stage.on_chunk(chunk)?;
        }
        Ok(())
    }

    async fn abort<S>(&mut self, sink: &mut S, written: u64) -> Result<PipelineOutcome, UploadError>
    where
        S: ChunkSink + ?Sized,
    {
        if self.partial_allowed {
            sink.flush().await?;
            return Ok(PipelineOutcome {
                written,
                aborted: true,
            });
        }
        Err(self
            .fail(
                sink,
                UploadError::RequestAborted("Request body ended before the chunk completed".into()),
            )
            .await)
    }

    async fn fail<S>(&mut self, sink: &mut S, err: UploadError) -> UploadError
    where
        S: ChunkSink + ?Sized,
    {
        if let Err(e) = sink.rollback().await {
            tracing::warn!("Failed to roll back partial chunk: {}", e);
        }
        for stage in self.stages.iter_mut() {
            stage.reset();
        }
        err
    }
}
