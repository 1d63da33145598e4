//! Snapshot directory and its catalog.

use crate::error::{ErrorKind, Result};
use crate::models::{Artifact, Catalog};
use crate::naming::{snapshot_filename, validate_filename};
use crate::source::SnapshotSource;
use exn::ResultExt;
use gymvault_compress::Compression;
use std::io::Write;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::instrument;

/// Name of the catalog document inside the store directory.
pub const CATALOG_FILE: &str = "backup_catalog.json";
/// Same-second snapshots get `_1`, `_2`, ... up to this many attempts.
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// A directory of snapshot artifacts plus the catalog that describes them.
///
/// All catalog mutations go through [`update_catalog`](Self::update_catalog),
/// which serialises writers with an async mutex and replaces the document
/// atomically. Readers never take the lock; they always see either the old or
/// the new document.
pub struct SnapshotStore {
    root: PathBuf,
    prefix: String,
    catalog_lock: Mutex<()>,
}

impl SnapshotStore {
    /// Open (creating if needed) the store directory.
    pub fn open(root: impl AsRef<Path>, prefix: impl Into<String>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(root));
            }
        } else {
            // Only happens once at startup; not worth making the constructor async.
            std::fs::create_dir_all(&root).map_err(|e| ErrorKind::from_io(e, &root))?;
        }
        Ok(Self { root, prefix: prefix.into(), catalog_lock: Mutex::new(()) })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.root.join(CATALOG_FILE)
    }

    /// Absolute path of a snapshot name, after validating it.
    ///
    /// The catalog document itself is not a snapshot and is refused.
    pub fn path_of(&self, filename: &str) -> Result<PathBuf> {
        let filename = validate_filename(filename)?;
        if filename == CATALOG_FILE {
            exn::bail!(ErrorKind::InvalidFilename(filename.to_string()));
        }
        Ok(self.root.join(filename))
    }

    /// Write a new snapshot of `source` under a fresh, unique name.
    ///
    /// Returns the path of the new snapshot. On failure nothing is left
    /// behind.
    #[instrument(skip_all, fields(root = %self.root.display()))]
    pub async fn write_snapshot(&self, source: &dyn SnapshotSource) -> Result<PathBuf> {
        let path = self.reserve(OffsetDateTime::now_utc(), source.extension()).await?;
        if let Err(e) = source.snapshot_into(&path).await {
            _ = fs::remove_file(&path).await;
            return Err(e);
        }
        tracing::debug!(path = %path.display(), "Snapshot written");
        Ok(path)
    }

    /// Claim an unused snapshot name for `at` by creating an empty file.
    ///
    /// Creation uses `create_new`, so two writers racing for the same second
    /// cannot both win the same name.
    async fn reserve(&self, at: OffsetDateTime, extension: &str) -> Result<PathBuf> {
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = snapshot_filename(&self.prefix, at, extension, attempt);
            if self.locate(&name).await?.is_some() {
                continue;
            }
            let path = self.root.join(&name);
            match fs::OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(_) => return Ok(path),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => exn::bail!(ErrorKind::from_io(e, &path)),
            }
        }
        exn::bail!(ErrorKind::AlreadyExists(self.root.join(snapshot_filename(&self.prefix, at, extension, 0))))
    }

    /// Find the artifact holding `filename`, preferring a compressed one.
    pub async fn locate(&self, filename: &str) -> Result<Option<Artifact>> {
        let path = self.path_of(filename)?;
        for compression in Compression::COMPRESSED {
            let compressed = self.root.join(compression.append_extension(filename));
            if fs::try_exists(&compressed).await.map_err(|e| ErrorKind::from_io(e, &compressed))? {
                return Ok(Some(Artifact { path: compressed, compression }));
            }
        }
        match fs::try_exists(&path).await.map_err(|e| ErrorKind::from_io(e, &path))? {
            true => Ok(Some(Artifact { path, compression: Compression::None })),
            false => Ok(None),
        }
    }

    /// Remove every artifact (raw and compressed) stored under `filename`.
    ///
    /// Returns whether anything was removed.
    #[instrument(skip(self))]
    pub async fn delete_artifact(&self, filename: &str) -> Result<bool> {
        let raw = self.path_of(filename)?;
        let candidates = std::iter::once(raw).chain(
            Compression::COMPRESSED.into_iter().map(|c| self.root.join(c.append_extension(filename))),
        );
        let mut removed = false;
        for path in candidates {
            match fs::remove_file(&path).await {
                Ok(()) => removed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                Err(e) => exn::bail!(ErrorKind::from_io(e, &path)),
            }
        }
        Ok(removed)
    }

    /// Read the catalog.
    ///
    /// A missing catalog is an empty one. An unreadable or unparseable
    /// catalog is logged and also treated as empty: losing the history is
    /// better than refusing to take new backups.
    pub async fn read_catalog(&self) -> Catalog {
        let path = self.catalog_path();
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Catalog::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Backup catalog unreadable; treating as empty");
                return Catalog::new();
            },
        };
        match serde_json::from_slice(&bytes) {
            Ok(catalog) => catalog,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Backup catalog corrupt; treating as empty");
                Catalog::new()
            },
        }
    }

    /// Replace the whole catalog document.
    pub async fn write_catalog(&self, catalog: &Catalog) -> Result<()> {
        let _guard = self.catalog_lock.lock().await;
        self.persist_catalog(catalog).await
    }

    /// Read, modify and write back the catalog as a single step.
    ///
    /// No other catalog writer runs while `f` is applied. The value returned
    /// by `f` is handed back to the caller.
    pub async fn update_catalog<T>(&self, f: impl FnOnce(&mut Catalog) -> T) -> Result<T> {
        let _guard = self.catalog_lock.lock().await;
        let mut catalog = self.read_catalog().await;
        let output = f(&mut catalog);
        self.persist_catalog(&catalog).await?;
        Ok(output)
    }

    async fn persist_catalog(&self, catalog: &Catalog) -> Result<()> {
        let json = serde_json::to_vec_pretty(catalog).or_raise(|| ErrorKind::Catalog)?;
        let root = self.root.clone();
        let target = self.catalog_path();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut temp = tempfile::Builder::new().prefix(".catalog-").suffix(".tmp").tempfile_in(&root)?;
            temp.write_all(&json)?;
            temp.as_file().sync_all()?;
            temp.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .or_raise(|| ErrorKind::Catalog)?
        .or_raise(|| ErrorKind::Catalog)
    }
}
