use chrono::{DateTime, Datelike, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OwnedMutexGuard;

use crate::api::error::UploadError;
use crate::config::StorageConfig;
use crate::models::{File, FileInit};
use crate::services::hooks::{NoopHooks, UploadHooks};
use crate::services::meta_store::MetaStore;
use crate::services::metrics::{Metrics, NoopMetrics};
use crate::services::scanner::{CompletionValidator, create_validators};
use crate::services::storage::PayloadBackend;
use crate::utils::cache::LruCache;
use crate::utils::keyed_mutex::KeyedMutex;
use crate::utils::naming::{default_name, default_upload_id};
use crate::utils::validation::validate_file_name;

pub mod bulk;
pub mod manage;
pub mod read;
pub mod types;
pub mod upload;

pub use types::{IdFn, NamingFn, TransferMode};

/// Last year a four-digit RFC 3339 timestamp can carry.
const MAX_EXPIRY_YEAR: i32 = 9999;

/// Orchestrates uploads over a payload backend and a metadata store.
pub struct UploadEngine {
    backend: Arc<dyn PayloadBackend>,
    meta: Arc<dyn MetaStore>,
    config: StorageConfig,
    naming: NamingFn,
    id_fn: IdFn,
    hooks: Arc<dyn UploadHooks>,
    metrics: Arc<dyn Metrics>,
    validators: Vec<Arc<dyn CompletionValidator>>,
    cache: Arc<LruCache<String, File>>,
    tombstones: Arc<LruCache<String, DateTime<Utc>>>,
    locks: KeyedMutex,
}

impl UploadEngine {
    pub fn new(
        backend: Arc<dyn PayloadBackend>,
        meta: Arc<dyn MetaStore>,
        config: StorageConfig,
    ) -> Self {
        Self {
            naming: Arc::new(default_name),
            id_fn: Arc::new(|init: &FileInit| {
                default_upload_id(
                    init.user_id.as_deref(),
                    &init.original_name,
                    init.size,
                    &init.metadata,
                )
            }),
            hooks: Arc::new(NoopHooks),
            metrics: Arc::new(NoopMetrics),
            validators: create_validators(&config),
            cache: Arc::new(LruCache::new(config.cache_capacity)),
            tombstones: Arc::new(LruCache::new(config.tombstone_capacity)),
            locks: KeyedMutex::new(),
            backend,
            meta,
            config,
        }
    }

    pub fn with_naming(mut self, naming: impl Fn(&File) -> String + Send + Sync + 'static) -> Self {
        self.naming = Arc::new(naming);
        self
    }

    pub fn with_id_generator(
        mut self,
        id_fn: impl Fn(&FileInit) -> String + Send + Sync + 'static,
    ) -> Self {
        self.id_fn = Arc::new(id_fn);
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn UploadHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn CompletionValidator>) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn with_validators(mut self, validators: Vec<Arc<dyn CompletionValidator>>) -> Self {
        self.validators = validators;
        self
    }

    pub fn with_cache(mut self, cache: Arc<LruCache<String, File>>) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn PayloadBackend> {
        &self.backend
    }

    pub fn meta_store(&self) -> &Arc<dyn MetaStore> {
        &self.meta
    }

    pub fn cache(&self) -> &Arc<LruCache<String, File>> {
        &self.cache
    }

    /// Drops lock slots nobody holds.
    pub fn cleanup_locks(&self) {
        self.locks.cleanup();
        tracing::debug!(slots = self.locks.len(), "Lock slots cleaned up");
    }

    fn lock(&self, id: &str) -> Result<OwnedMutexGuard<()>, UploadError> {
        self.locks.try_lock(id).ok_or_else(|| {
            tracing::debug!(id = %id, "🔒 Upload is locked by another operation");
            UploadError::FileLocked(id.to_string())
        })
    }

    fn is_tombstoned(&self, id: &str) -> bool {
        self.tombstones.contains(&id.to_string())
    }

    fn tombstone(&self, id: &str) {
        self.tombstones.put(id.to_string(), Utc::now());
    }

    /// Reads the stored record, answering `Gone` for ids deleted earlier.
    async fn load(&self, id: &str) -> Result<File, UploadError> {
        match self.meta.get(id).await {
            Err(err) if err.is_not_found() && self.is_tombstoned(id) => {
                Err(UploadError::Gone(id.to_string()))
            }
            other => other,
        }
    }

    /// Like [`Self::load`], but expired uploads are `Gone` as well.
    async fn load_live(&self, id: &str) -> Result<File, UploadError> {
        let file = self.load(id).await?;
        if file.is_expired(Utc::now()) {
            return Err(UploadError::Gone(format!("{} has expired", id)));
        }
        Ok(file)
    }

    /// Read-through lookup. Only completed records are served from cache.
    async fn resolve(&self, id: &str) -> Result<File, UploadError> {
        let key = id.to_string();
        if let Some(file) = self.cache.get(&key) {
            if !file.is_expired(Utc::now()) {
                return Ok(file);
            }
            self.cache.remove(&key);
        }
        let file = self.load_live(id).await?;
        if file.is_completed() {
            self.cache.put(key, file.clone());
        }
        Ok(file)
    }

    /// Validates a physical name against path rules and backend-internal objects.
    fn check_name(&self, name: &str) -> Result<(), UploadError> {
        validate_file_name(name, self.backend.capabilities().local_filesystem)?;
        if self.backend.is_reserved_name(name) {
            tracing::warn!(name = %name, "Reserved storage name rejected");
            return Err(UploadError::InvalidFileName(format!(
                "Name is reserved for internal use: {}",
                name
            )));
        }
        Ok(())
    }

    async fn persist(&self, file: &File) -> Result<(), UploadError> {
        self.meta.save(file).await?;
        if file.is_completed() {
            self.cache.put(file.id.clone(), file.clone());
        } else {
            self.cache.remove(&file.id);
        }
        Ok(())
    }

    /// Sets `expired_at` from the per-upload override or the configured policy.
    fn apply_expiry(&self, file: &mut File, expires_in: Option<u64>) {
        if let Some(secs) = expires_in {
            file.expired_at = expiry_after(file.created_at, Duration::from_secs(secs));
            if file.expired_at.is_none() {
                tracing::warn!(id = %file.id, expires_in = secs, "Expiry out of range, upload never expires");
            }
            return;
        }
        let Some(expiration) = &self.config.expiration else {
            return;
        };
        if expiration.rolling {
            file.expired_at = expiry_after(file.modified_at, expiration.max_age);
        } else if file.expired_at.is_none() {
            file.expired_at = expiry_after(file.created_at, expiration.max_age);
        }
    }

    fn observe<T>(&self, op: &'static str, started: Instant, result: &Result<T, UploadError>) {
        let outcome = match result {
            Ok(_) => "ok",
            Err(err) => err.code().as_str(),
        };
        let backend = self.backend.kind().as_str();
        self.metrics.increment(
            "upload.operations",
            1,
            &[("op", op), ("outcome", outcome), ("backend", backend)],
        );
        self.metrics
            .timing("upload.duration", started.elapsed(), &[("op", op), ("backend", backend)]);
    }

    async fn report_error(&self, id: &str, err: &UploadError) {
        self.hooks.on_error(id, err).await;
    }
}

/// `from + after`, or `None` when the instant cannot be stored as an RFC 3339 timestamp.
fn expiry_after(from: DateTime<Utc>, after: Duration) -> Option<DateTime<Utc>> {
    let delta = chrono::Duration::from_std(after).ok()?;
    from.checked_add_signed(delta)
        .filter(|at| at.year() <= MAX_EXPIRY_YEAR)
}

fn log_hook(hook: &'static str, id: &str, result: Result<(), UploadError>) {
    if let Err(e) = result {
        tracing::warn!(id = %id, hook, "Upload hook failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_after_rejects_overflow() {
        let now = Utc::now();
        let after = |secs| expiry_after(now, Duration::from_secs(secs));
        assert_eq!(after(60), Some(now + chrono::Duration::seconds(60)));
        assert_eq!(after(u64::MAX), None);
        assert_eq!(after(10_000_000_000_000_000), None);
        assert_eq!(after(i64::MAX as u64), None);
    }
}
