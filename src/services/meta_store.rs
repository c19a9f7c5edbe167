use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::api::error::UploadError;
use crate::models::File;

/// A record as seen by a listing, before it is parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaEntry {
    pub id: String,
    pub modified_at: DateTime<Utc>,
}

/// Durable id → record mapping, independent of where the payload lives.
#[async_trait]
pub trait MetaStore: Send + Sync {
    async fn save(&self, file: &File) -> Result<(), UploadError>;

    /// Fails with `FileNotFound` when no record exists.
    async fn get(&self, id: &str) -> Result<File, UploadError>;

    /// Deleting a missing record is not an error.
    async fn delete(&self, id: &str) -> Result<(), UploadError>;

    /// Bumps `modified_at` without touching anything else.
    async fn touch(&self, id: &str) -> Result<(), UploadError> {
        let mut file = self.get(id).await?;
        file.modified_at = Utc::now();
        self.save(&file).await
    }

    async fn list(&self) -> Result<Vec<MetaEntry>, UploadError>;
}

/// JSON sidecars named `<prefix><id><suffix>` in the upload directory.
#[derive(Debug, Clone)]
pub struct DiskMetaStore {
    directory: PathBuf,
    prefix: String,
    suffix: String,
}

impl DiskMetaStore {
    pub fn new(
        directory: impl Into<PathBuf>,
        prefix: impl Into<String>,
        suffix: impl Into<String>,
    ) -> Self {
        Self {
            directory: directory.into(),
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.directory
            .join(format!("{}{}{}", self.prefix, id, self.suffix))
    }

    /// Inverse of [`Self::path_for`] on a bare file name.
    pub fn id_from_file_name(&self, file_name: &str) -> Option<String> {
        let id = file_name
            .strip_prefix(&self.prefix)?
            .strip_suffix(&self.suffix)?;
        (!id.is_empty()).then(|| id.to_string())
    }
}

#[async_trait]
impl MetaStore for DiskMetaStore {
    async fn save(&self, file: &File) -> Result<(), UploadError> {
        let target = self.path_for(&file.id);
        let temp = self.directory.join(format!(
            ".{}{}{}.{}.tmp",
            self.prefix,
            file.id,
            self.suffix,
            Uuid::new_v4().simple()
        ));
        let json = serde_json::to_vec_pretty(file)?;

        tokio::fs::create_dir_all(&self.directory).await?;
        let write = async {
            let mut handle = tokio::fs::File::create(&temp).await?;
            handle.write_all(&json).await?;
            handle.sync_all().await?;
            tokio::fs::rename(&temp, &target).await
        };
        if let Err(e) = write.await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<File, UploadError> {
        let path = self.path_for(id);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(UploadError::FileNotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&data).map_err(|e| {
            UploadError::FileError(format!("Corrupt metadata for {}: {}", id, e))
        })
    }

    async fn delete(&self, id: &str) -> Result<(), UploadError> {
        match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<MetaEntry>, UploadError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.scan())
            .await
            .map_err(|e| UploadError::FileError(format!("Metadata scan failed: {}", e)))?
    }
}

impl DiskMetaStore {
    fn scan(&self) -> Result<Vec<MetaEntry>, UploadError> {
        if !self.directory.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in WalkDir::new(&self.directory).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Skipping unreadable directory entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| self.id_from_file_name(name))
            else {
                continue;
            };
            let modified_at = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(Utc::now);
            entries.push(MetaEntry { id, modified_at });
        }
        Ok(entries)
    }
}

/// Process-local store for tests and deployments without a shared disk.
#[derive(Debug, Default)]
pub struct MemoryMetaStore {
    records: DashMap<String, File>,
}

impl MemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl MetaStore for MemoryMetaStore {
    async fn save(&self, file: &File) -> Result<(), UploadError> {
        self.records.insert(file.id.clone(), file.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<File, UploadError> {
        self.records
            .get(id)
            .map(|record| record.value().clone())
            .ok_or_else(|| UploadError::FileNotFound(id.to_string()))
    }

    async fn delete(&self, id: &str) -> Result<(), UploadError> {
        self.records.remove(id);
        Ok(())
    }

    async fn touch(&self, id: &str) -> Result<(), UploadError> {
        let mut record = self
            .records
            .get_mut(id)
            .ok_or_else(|| UploadError::FileNotFound(id.to_string()))?;
        record.modified_at = Utc::now();
        Ok(())
    }

    async fn list(&self) -> Result<Vec<MetaEntry>, UploadError> {
        Ok(self
            .records
            .iter()
            .map(|record| MetaEntry {
                id: record.key().clone(),
                modified_at: record.modified_at,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileInit;

    fn sample(id: &str) -> File {
        File::new(id.to_string(), &FileInit::new("a.txt").with_size(3), Utc::now())
    }

    #[tokio::test]
    async fn test_disk_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskMetaStore::new(dir.path(), "", ".META");
        let file = sample("abc");

        store.save(&file).await.unwrap();
        assert!(dir.path().join("abc.META").exists());
        assert_eq!(store.get("abc").await.unwrap(), file);

        store.delete("abc").await.unwrap();
        store.delete("abc").await.unwrap();
        assert!(store.get("abc").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_disk_list_only_sees_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskMetaStore::new(dir.path(), "meta-", ".META");
        store.save(&sample("one")).await.unwrap();
        store.save(&sample("two")).await.unwrap();
        // Payload and stray files are ignored
        tokio::fs::write(dir.path().join("one"), b"abc").await.unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), b"x").await.unwrap();

        let mut ids: Vec<_> = store.list().await.unwrap().into_iter().map(|e| e.id).collect();
        ids.sort();
        assert_eq!(ids, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_disk_corrupt_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskMetaStore::new(dir.path(), "", ".META");
        tokio::fs::write(store.path_for("bad"), b"{not json").await.unwrap();
        let err = store.get("bad").await.unwrap_err();
        assert!(matches!(err, UploadError::FileError(_)));
    }

    #[tokio::test]
    async fn test_memory_touch() {
        let store = MemoryMetaStore::new();
        let mut file = sample("m");
        file.modified_at = Utc::now() - chrono::Duration::hours(1);
        store.save(&file).await.unwrap();
        store.touch("m").await.unwrap();
        assert!(store.get("m").await.unwrap().modified_at > file.modified_at);
        assert!(store.touch("nope").await.unwrap_err().is_not_found());
    }
}
