use chrono::Utc;
use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::api::error::UploadError;
use crate::models::{File, FileQuery, PurgeResult, UploadStatus};
use crate::utils::validation::validate_id;

use super::{TransferMode, UploadEngine, log_hook};

impl UploadEngine {
    /// Removes an upload's payload and record. The returned record always
    /// carries the `Deleted` status and later lookups of the id report `Gone`.
    pub async fn delete(&self, query: &FileQuery) -> Result<File, UploadError> {
        let started = Instant::now();
        let result: Result<File, UploadError> = async {
            let _guard = self.lock(&query.id)?;
            let mut file = self.load(&query.id).await?;
            self.discard(&mut file).await?;
            self.tombstone(&file.id);
            file.status = UploadStatus::Deleted;

            log_hook("on_delete", &file.id, self.hooks.on_delete(&file).await);
            tracing::info!(id = %file.id, name = %file.name, "🗑️ Upload deleted");
            Ok(file)
        }
        .await;
        if let Err(err) = &result {
            self.report_error(&query.id, err).await;
        }
        self.observe("delete", started, &result);
        result
    }

    pub async fn copy(&self, source: &str, destination: &str) -> Result<File, UploadError> {
        self.transfer(source, destination, TransferMode::Copy).await
    }

    /// Moves a completed upload to a new id. Named with a trailing
    /// underscore since `move` is a keyword.
    pub async fn move_(&self, source: &str, destination: &str) -> Result<File, UploadError> {
        self.transfer(source, destination, TransferMode::Move).await
    }

    pub(super) async fn transfer(
        &self,
        source: &str,
        destination: &str,
        mode: TransferMode,
    ) -> Result<File, UploadError> {
        let started = Instant::now();
        let result = self.transfer_upload(source, destination, mode).await;
        if let Err(err) = &result {
            self.report_error(source, err).await;
        }
        self.observe(mode.as_str(), started, &result);
        result
    }

    async fn transfer_upload(
        &self,
        source: &str,
        destination: &str,
        mode: TransferMode,
    ) -> Result<File, UploadError> {
        if source == destination {
            return Err(UploadError::FileConflict(format!(
                "Source and destination are the same: {}",
                source
            )));
        }
        validate_id(destination)?;

        let _source_guard = self.lock(source)?;
        let _destination_guard = self.lock(destination)?;

        let origin = self.load_live(source).await?;
        if !origin.is_completed() {
            return Err(UploadError::FileConflict(format!(
                "Upload {} is not completed",
                source
            )));
        }

        match self.meta.get(destination).await {
            Ok(mut existing) if existing.is_expired(Utc::now()) => {
                self.discard(&mut existing).await?;
            }
            Ok(_) => {
                return Err(UploadError::FileConflict(format!(
                    "Destination {} already exists",
                    destination
                )));
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }

        let now = Utc::now();
        let mut target = origin.clone();
        target.id = destination.to_string();
        target.name = String::new();
        target.name = (self.naming)(&target);
        target.created_at = now;
        target.modified_at = now;
        target.expired_at = None;
        target.session = None;
        target.uri = origin
            .uri
            .as_deref()
            .and_then(|uri| uri.strip_suffix(origin.name.as_str()))
            .map(|base| format!("{}{}", base, target.name));
        self.check_name(&target.name)?;
        self.apply_expiry(&mut target, None);

        if self.backend.head_object(&target.name).await?.is_some() {
            return Err(UploadError::FileConflict(format!(
                "Payload {} already exists",
                target.name
            )));
        }

        match mode {
            TransferMode::Copy => self.backend.copy_object(&origin.name, &target.name).await?,
            TransferMode::Move => self.backend.move_object(&origin.name, &target.name).await?,
        }

        if let Err(err) = self.persist(&target).await {
            // Undo the payload side so no orphan is left behind
            let undo = match mode {
                TransferMode::Copy => self.backend.delete_object(&target.name).await.map(|_| ()),
                TransferMode::Move => self.backend.move_object(&target.name, &origin.name).await,
            };
            if let Err(e) = undo {
                tracing::warn!(id = %destination, "Failed to undo {}: {}", mode.as_str(), e);
            }
            return Err(err);
        }
        self.tombstones.remove(&target.id);

        if mode == TransferMode::Move {
            self.meta.delete(source).await?;
            self.cache.remove(&origin.id);
            self.tombstone(source);
            let mut moved = origin;
            moved.status = UploadStatus::Deleted;
            log_hook("on_delete", source, self.hooks.on_delete(&moved).await);
        }
        log_hook("on_create", destination, self.hooks.on_create(&target).await);

        tracing::info!(
            source = %source,
            destination = %destination,
            name = %target.name,
            mode = mode.as_str(),
            "✅ Upload transferred"
        );
        Ok(target)
    }

    /// Live uploads ordered by creation time, at most `limit` of them.
    /// Expired records found along the way are reclaimed.
    pub async fn list(&self, limit: usize) -> Result<Vec<File>, UploadError> {
        let started = Instant::now();
        let result: Result<Vec<File>, UploadError> = async {
            let now = Utc::now();
            let mut files = Vec::new();
            for entry in self.meta.list().await? {
                let mut file = match self.meta.get(&entry.id).await {
                    Ok(file) => file,
                    Err(err) if err.is_not_found() => continue,
                    Err(err) => {
                        tracing::warn!(id = %entry.id, "Skipping unreadable record: {}", err);
                        continue;
                    }
                };
                if file.is_expired(now) {
                    if let Some(_guard) = self.locks.try_lock(&file.id) {
                        self.reclaim(&mut file).await;
                    }
                    continue;
                }
                files.push(file);
            }
            files.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
            files.truncate(limit);
            Ok(files)
        }
        .await;
        self.observe("list", started, &result);
        result
    }

    /// Deletes expired uploads and those idle for longer than `max_age`
    /// (the configured expiry when `None`), then reclaims payload objects
    /// no record refers to.
    pub async fn purge(&self, max_age: Option<Duration>) -> Result<PurgeResult, UploadError> {
        let started = Instant::now();
        let result = self.purge_uploads(max_age).await;
        self.observe("purge", started, &result);
        result
    }

    async fn purge_uploads(&self, max_age: Option<Duration>) -> Result<PurgeResult, UploadError> {
        let threshold = max_age.or_else(|| self.config.expiration.as_ref().map(|e| e.max_age));
        let idle_limit = threshold.and_then(|t| chrono::Duration::from_std(t).ok());
        let now = Utc::now();

        let mut result = PurgeResult {
            max_age_ms: threshold.map(|t| t.as_millis() as u64).unwrap_or(0),
            ..Default::default()
        };
        let mut known_names = HashSet::new();
        let mut unresolved = 0usize;

        for entry in self.meta.list().await? {
            result.attempted += 1;
            let Some(_guard) = self.locks.try_lock(&entry.id) else {
                result.skipped += 1;
                // Busy uploads still own their payload
                match self.meta.get(&entry.id).await {
                    Ok(file) => {
                        known_names.insert(file.name);
                    }
                    Err(err) if err.is_not_found() => {}
                    Err(err) => {
                        unresolved += 1;
                        tracing::warn!(id = %entry.id, "Unreadable locked record during purge: {}", err);
                    }
                }
                continue;
            };
            let mut file = match self.meta.get(&entry.id).await {
                Ok(file) => file,
                Err(err) if err.is_not_found() => continue,
                Err(err) => {
                    unresolved += 1;
                    tracing::warn!(id = %entry.id, "Skipping unreadable record during purge: {}", err);
                    continue;
                }
            };
            known_names.insert(file.name.clone());

            let idle = idle_limit.is_some_and(|limit| now - file.modified_at > limit);
            if !idle && !file.is_expired(now) {
                continue;
            }
            if self.reclaim(&mut file).await {
                result.items.push(file);
            }
        }

        if unresolved > 0 {
            tracing::warn!(unresolved, "Unreadable records found, skipping orphan reclamation");
        } else if let Some(limit) = idle_limit {
            result.orphans = self.reclaim_orphans(&known_names, limit).await?;
        }

        tracing::info!(
            purged = result.items.len(),
            orphans = result.orphans.len(),
            attempted = result.attempted,
            skipped = result.skipped,
            "🧹 Purge complete"
        );
        Ok(result)
    }

    async fn reclaim_orphans(
        &self,
        known_names: &HashSet<String>,
        limit: chrono::Duration,
    ) -> Result<Vec<String>, UploadError> {
        let now = Utc::now();
        let mut orphans = Vec::new();
        let mut token = None;
        loop {
            let page = self.backend.list_page(None, token).await?;
            for object in page.objects {
                if known_names.contains(&object.name) {
                    continue;
                }
                let stale = object
                    .last_modified
                    .is_some_and(|modified| now - modified > limit);
                if !stale {
                    continue;
                }
                match self.backend.delete_object(&object.name).await {
                    Ok(_) => {
                        tracing::info!(name = %object.name, "🧹 Orphaned payload removed");
                        orphans.push(object.name);
                    }
                    Err(e) => tracing::warn!(name = %object.name, "Failed to remove orphan: {}", e),
                }
            }
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(orphans)
    }

    /// Discards an upload found stale in the background and tombstones it.
    /// Failures are logged; returns whether the upload was removed.
    async fn reclaim(&self, file: &mut File) -> bool {
        match self.discard(file).await {
            Ok(()) => {
                self.tombstone(&file.id);
                file.status = UploadStatus::Deleted;
                log_hook("on_delete", &file.id, self.hooks.on_delete(file).await);
                tracing::debug!(id = %file.id, "Stale upload reclaimed");
                true
            }
            Err(e) => {
                tracing::error!(id = %file.id, "Failed to reclaim upload: {}", e);
                false
            }
        }
    }

    /// Removes session, payload and record. Missing pieces are not an error.
    pub(super) async fn discard(&self, file: &mut File) -> Result<(), UploadError> {
        if !file.is_completed() {
            self.backend.abort(file).await?;
        }
        self.backend.delete_object(&file.name).await?;
        self.meta.delete(&file.id).await?;
        self.cache.remove(&file.id);
        Ok(())
    }
}
