use crate::error::{ErrorKind, Result};
use crate::retention::{self, RetentionPolicy};
use crate::scheduler::{ScheduleTiming, Scheduler};
use exn::{OptionExt, ResultExt};
use gymvault_compress::{Compression, TempFile};
use gymvault_config::BackupConfig;
use gymvault_store::error::ErrorKind as StoreErrorKind;
use gymvault_store::integrity::{self, Verification};
use gymvault_store::{Artifact, SnapshotRecord, SnapshotStore, SourceHandle};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use time::{OffsetDateTime, UtcOffset};
use tokio::sync::Mutex;
use tracing::instrument;

const SCHEDULED_DESCRIPTION: &str = "Automatic backup";
const DAILY_DESCRIPTION: &str = "Daily backup";

/// A backup that was just written and catalogued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupCreated {
    pub filename: String,
    pub path: PathBuf,
    pub record: SnapshotRecord,
}

/// A completed restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Restored {
    /// The backup that is now the live database.
    pub filename: String,
    /// The backup of the live database taken just before it was replaced.
    pub safety_backup: String,
}

/// Creates, lists, verifies, restores and prunes backups of the live
/// database, and optionally takes them on a timer.
///
/// Every operation reports failure through [`Result`]; nothing here panics on
/// I/O errors. Catalog writes are serialised by the store, so foreground
/// calls and the scheduler can run at the same time.
pub struct BackupCoordinator {
    source: SourceHandle,
    store: SnapshotStore,
    config: BackupConfig,
    scheduler: Scheduler,
    /// Held by a retention pass, and by a restore from looking up its backup
    /// until the swap, so retention never removes or compresses a backup
    /// being restored.
    retention_lock: Mutex<()>,
    /// Offset that decides which calendar day a backup belongs to.
    local_offset: UtcOffset,
}

impl BackupCoordinator {
    /// Open the backup directory named in `config` for `source`.
    pub fn new(source: SourceHandle, config: BackupConfig) -> Result<Self> {
        let store = SnapshotStore::open(&config.directory, config.prefix.clone()).or_raise(|| ErrorKind::Io)?;
        let timing = ScheduleTiming::from(&config);
        // Unavailable on some platforms once other threads exist; days then follow UTC.
        let local_offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
        Ok(Self {
            source,
            store,
            config,
            scheduler: Scheduler::new(timing),
            retention_lock: Mutex::new(()),
            local_offset,
        })
    }

    /// Override the offset used to tell calendar days apart.
    pub fn with_local_offset(mut self, offset: UtcOffset) -> Self {
        self.local_offset = offset;
        self
    }

    /// Replace the scheduler timing. Intended for tests and embedding
    /// applications that want sub-hour intervals.
    pub fn with_schedule_timing(mut self, timing: ScheduleTiming) -> Self {
        self.scheduler = Scheduler::new(timing);
        self
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Snapshot the live database, catalogue it, then run a retention pass.
    ///
    /// Retention problems are logged and do not fail the backup.
    #[instrument(skip(self))]
    pub async fn create_backup(&self, description: &str) -> Result<BackupCreated> {
        let created = self.snapshot(description).await?;
        self.run_retention().await;
        Ok(created)
    }

    /// Snapshot and catalogue, without retention.
    async fn snapshot(&self, description: &str) -> Result<BackupCreated> {
        let created_at = OffsetDateTime::now_utc();
        let path = self.store.write_snapshot(self.source.as_ref()).await.or_raise(|| ErrorKind::Snapshot)?;
        match self.catalogue(&path, created_at, description).await {
            Ok(created) => Ok(created),
            Err(e) => {
                // No catalog entry points at it; don't leave an orphan file.
                _ = tokio::fs::remove_file(&path).await;
                Err(e)
            },
        }
    }

    async fn catalogue(&self, path: &Path, created_at: OffsetDateTime, description: &str) -> Result<BackupCreated> {
        let filename = path.file_name().and_then(|n| n.to_str()).ok_or_raise(|| ErrorKind::Io)?.to_string();
        let hashed = path.to_path_buf();
        let (size, hash) = tokio::task::spawn_blocking(move || -> Result<(u64, String)> {
            let size = std::fs::metadata(&hashed).or_raise(|| ErrorKind::Io)?.len();
            let hash = integrity::hash_file(&hashed).or_raise(|| ErrorKind::Io)?;
            Ok((size, hash))
        })
        .await
        .or_raise(|| ErrorKind::Io)??;

        let record = SnapshotRecord::new(&filename, created_at, description, size, hash);
        let entry = record.clone();
        self.store
            .update_catalog(|catalog| catalog.insert(entry.filename.clone(), entry))
            .await
            .or_raise(|| ErrorKind::Catalog)?;
        tracing::info!(filename = %filename, size, "Backup created");
        Ok(BackupCreated { filename, path: path.to_path_buf(), record })
    }

    /// Every catalogued backup whose file still exists, newest first.
    ///
    /// Catalog entries without a file are skipped with a warning; see
    /// [`repair_catalog`](Self::repair_catalog) to drop them for good.
    pub async fn list_backups(&self) -> Vec<SnapshotRecord> {
        let catalog = self.store.read_catalog().await;
        let mut records = Vec::with_capacity(catalog.len());
        for (filename, record) in catalog {
            match self.store.locate(&filename).await {
                Ok(Some(_)) => records.push(record),
                Ok(None) => tracing::warn!(filename = %filename, "Catalogued backup has no file; skipping"),
                Err(e) => tracing::warn!(filename = %filename, error = ?e, "Catalogued backup cannot be located; skipping"),
            }
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.filename.cmp(&a.filename)));
        records
    }

    /// The catalog entry for `filename`, if its file still exists.
    pub async fn get_backup(&self, filename: &str) -> Result<Option<SnapshotRecord>> {
        let filename = self.validate(filename)?;
        if self.locate(filename).await?.is_none() {
            return Ok(None);
        }
        Ok(self.store.read_catalog().await.remove(filename))
    }

    /// Delete a backup: its file(s) first, then its catalog entry.
    ///
    /// If the catalog cannot be updated the file is still gone; the stale
    /// entry is logged, hidden by [`list_backups`](Self::list_backups) and
    /// cleared by [`repair_catalog`](Self::repair_catalog).
    #[instrument(skip(self))]
    pub async fn delete_backup(&self, filename: &str) -> Result<()> {
        let filename = self.validate(filename)?;
        let removed = self.store.delete_artifact(filename).await.or_raise(|| ErrorKind::Io)?;
        let known = match self.store.update_catalog(|catalog| catalog.remove(filename).is_some()).await {
            Ok(known) => known,
            Err(e) => {
                tracing::warn!(filename, error = ?e, "Backup file deleted but catalog entry remains");
                true
            },
        };
        if !removed && !known {
            exn::bail!(ErrorKind::NotFound(filename.to_string()));
        }
        tracing::info!(filename, "Backup deleted");
        Ok(())
    }

    /// Check a backup against the digest recorded when it was made.
    ///
    /// Returns `false` for a missing catalog entry, a missing file, or a
    /// digest mismatch. Always `true` when integrity checking is disabled.
    #[instrument(skip(self))]
    pub async fn verify_backup(&self, filename: &str) -> Result<bool> {
        let filename = self.validate(filename)?;
        if !self.config.verify_integrity {
            return Ok(true);
        }
        let verification = self.verification(filename).await?;
        if !verification.is_valid() {
            tracing::warn!(filename, result = ?verification, "Backup failed verification");
        }
        Ok(verification.is_valid())
    }

    async fn verification(&self, filename: &str) -> Result<Verification> {
        let record = self.store.read_catalog().await.remove(filename);
        let artifact = self.locate(filename).await?;
        tokio::task::spawn_blocking(move || integrity::verify(record.as_ref(), artifact.as_ref()))
            .await
            .or_raise(|| ErrorKind::Io)?
            .or_raise(|| ErrorKind::Io)
    }

    /// Replace the live database with a backup.
    ///
    /// A backup of the current live database is always taken first; if that
    /// fails nothing is touched. Once it exists, any failure is reported as
    /// [`ErrorKind::Restore`] naming it.
    ///
    /// Retention is held off from the lookup of the backup until the live
    /// database has been replaced, then run once for the safety backup.
    #[instrument(skip(self))]
    pub async fn restore_backup(&self, filename: &str) -> Result<Restored> {
        let filename = self.validate(filename)?;
        let outcome = {
            let _retention = self.retention_lock.lock().await;
            self.restore_locked(filename).await
        };
        let (safety, restored) = outcome?;
        self.run_retention().await;

        match restored {
            Ok(()) => {
                tracing::info!(filename, safety_backup = %safety.filename, "Backup restored");
                Ok(Restored { filename: filename.to_string(), safety_backup: safety.filename })
            },
            Err(e) => Err(e.raise(ErrorKind::Restore { safety_backup: safety.filename })),
        }
    }

    /// Everything a restore does while retention is locked out. The outer
    /// error means nothing was touched; the inner one comes after the safety
    /// backup exists.
    async fn restore_locked(&self, filename: &str) -> Result<(BackupCreated, Result<()>)> {
        let artifact = self.locate(filename).await?.ok_or_raise(|| ErrorKind::NotFound(filename.to_string()))?;
        if self.config.verify_integrity && !self.verify_backup(filename).await? {
            exn::bail!(ErrorKind::Corrupt(filename.to_string()));
        }
        let description = format!("Safety backup before restoring {filename}");
        let safety = self.snapshot(&description).await.or_raise(|| ErrorKind::SafetyBackup)?;
        let restored = self.replace_live(filename, &artifact).await;
        Ok((safety, restored))
    }

    async fn replace_live(&self, filename: &str, artifact: &Artifact) -> Result<()> {
        if !artifact.is_compressed() {
            return self.source.restore_from(&artifact.path).await.or_raise(|| ErrorKind::Snapshot);
        }

        let expected = match self.config.verify_integrity {
            true => self.store.read_catalog().await.remove(filename).map(|record| record.content_hash),
            false => None,
        };
        // Dropping `decompressed` deletes the file, whatever the outcome.
        let decompressed = self.decompress(filename, artifact, expected).await?;
        self.source.restore_from(decompressed.path()).await.or_raise(|| ErrorKind::Snapshot)
    }

    /// Decompress into a temporary file in the backup directory, checking
    /// the result against `expected` when given.
    async fn decompress(&self, filename: &str, artifact: &Artifact, expected: Option<String>) -> Result<TempFile> {
        let filename = filename.to_string();
        let artifact = artifact.clone();
        let dir = self.store.root().to_path_buf();
        tokio::task::spawn_blocking(move || -> Result<TempFile> {
            let temp = artifact.compression.decompress_file(&artifact.path, &dir).or_raise(|| ErrorKind::Compression)?;
            if let Some(expected) = expected {
                let actual = integrity::hash_file(temp.path()).or_raise(|| ErrorKind::Io)?;
                if actual != expected {
                    tracing::warn!(filename = %filename, %expected, %actual, "Decompressed backup does not match its digest");
                    exn::bail!(ErrorKind::Corrupt(filename));
                }
            }
            Ok(temp)
        })
        .await
        .or_raise(|| ErrorKind::Io)?
    }

    /// Take a "Daily backup" unless one already exists for today, in local
    /// time.
    pub async fn ensure_daily_backup(&self) -> Result<Option<BackupCreated>> {
        let offset = self.local_offset;
        let today = OffsetDateTime::now_utc().to_offset(offset).date();
        let exists = self.list_backups().await.iter().any(|record| record.created_at.to_offset(offset).date() == today);
        if exists {
            tracing::debug!(%today, "Backup for today already exists");
            return Ok(None);
        }
        self.create_backup(DAILY_DESCRIPTION).await.map(Some)
    }

    /// Drop catalog entries whose file no longer exists.
    ///
    /// Returns how many entries were removed.
    #[instrument(skip(self))]
    pub async fn repair_catalog(&self) -> Result<usize> {
        let mut stale = Vec::new();
        for filename in self.store.read_catalog().await.into_keys() {
            if !matches!(self.store.locate(&filename).await, Ok(Some(_))) {
                stale.push(filename);
            }
        }
        if stale.is_empty() {
            return Ok(0);
        }
        let removed = self
            .store
            .update_catalog(|catalog| stale.iter().filter(|filename| catalog.remove(*filename).is_some()).count())
            .await
            .or_raise(|| ErrorKind::Catalog)?;
        tracing::info!(removed, "Removed stale catalog entries");
        Ok(removed)
    }

    /// Start taking a backup every configured interval.
    ///
    /// Does nothing if the scheduler is already running. Must be called from
    /// within a tokio runtime.
    pub fn start_scheduled_backups(self: &Arc<Self>) -> bool {
        let coordinator: Weak<Self> = Arc::downgrade(self);
        self.scheduler.start(move || {
            let coordinator = coordinator.clone();
            async move {
                // Gone means dropped; dropping the coordinator also cancels this task.
                let Some(coordinator) = coordinator.upgrade() else {
                    return Ok(());
                };
                coordinator.create_backup(SCHEDULED_DESCRIPTION).await.map(drop)
            }
        })
    }

    /// Stop the scheduler, waiting a bounded time for an in-flight backup.
    pub async fn stop_scheduled_backups(&self) -> bool {
        self.scheduler.stop().await
    }

    pub fn is_scheduler_running(&self) -> bool {
        self.scheduler.is_running()
    }

    async fn run_retention(&self) {
        if let Err(e) = self.apply_retention().await {
            tracing::warn!(error = ?e, "Retention pass failed");
        }
    }

    /// Delete backups beyond `max_backups` and compress aged ones.
    ///
    /// Each step is attempted on its own; one failing backup does not stop
    /// the rest.
    async fn apply_retention(&self) -> Result<()> {
        let _guard = self.retention_lock.lock().await;
        let records = self.list_backups().await;
        let plan = retention::plan(&records, &RetentionPolicy::from(&self.config), OffsetDateTime::now_utc());
        if plan.is_empty() {
            return Ok(());
        }
        tracing::debug!(compress = plan.compress.len(), delete = plan.delete.len(), "Applying retention");

        for filename in &plan.delete {
            if let Err(e) = self.delete_backup(filename).await {
                tracing::warn!(filename, error = ?e, "Could not delete old backup");
            }
        }
        for filename in &plan.compress {
            if let Err(e) = self.compress_backup(filename, self.config.compression).await {
                tracing::warn!(filename, error = ?e, "Could not compress old backup");
            }
        }
        Ok(())
    }

    /// Compress a backup in place and record the compressed digest.
    ///
    /// If a compressed file is already present (a previous pass was
    /// interrupted before the catalog update), only the catalog is updated.
    #[instrument(skip(self))]
    async fn compress_backup(&self, filename: &str, format: Compression) -> Result<()> {
        let artifact = self.locate(filename).await?.ok_or_raise(|| ErrorKind::NotFound(filename.to_string()))?;
        let (compression, size, hash) = tokio::task::spawn_blocking(move || -> Result<(Compression, u64, String)> {
            let (path, compression) = match artifact.is_compressed() {
                true => (artifact.path, artifact.compression),
                false => (format.compress_file(&artifact.path).or_raise(|| ErrorKind::Compression)?, format),
            };
            let size = std::fs::metadata(&path).or_raise(|| ErrorKind::Io)?.len();
            let hash = integrity::hash_file(&path).or_raise(|| ErrorKind::Io)?;
            Ok((compression, size, hash))
        })
        .await
        .or_raise(|| ErrorKind::Io)??;

        self.store
            .update_catalog(|catalog| {
                if let Some(record) = catalog.get_mut(filename) {
                    record.mark_compressed(compression, size, hash);
                }
            })
            .await
            .or_raise(|| ErrorKind::Catalog)?;
        tracing::info!(filename, %compression, size, "Backup compressed");
        Ok(())
    }

    fn validate<'a>(&self, filename: &'a str) -> Result<&'a str> {
        self.store.path_of(filename).or_raise(|| ErrorKind::InvalidFilename(filename.to_string()))?;
        Ok(filename)
    }

    async fn locate(&self, filename: &str) -> Result<Option<Artifact>> {
        self.store.locate(filename).await.map_err(|e| {
            let invalid = matches!(&*e, StoreErrorKind::InvalidFilename(_));
            match invalid {
                true => e.raise(ErrorKind::InvalidFilename(filename.to_string())),
                false => e.raise(ErrorKind::Io),
            }
        })
    }
}
