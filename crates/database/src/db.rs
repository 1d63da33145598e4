//! Database connection and pool management.

use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use sqlx::pool::PoolConnectionMetadata;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Connection, SqliteConnection};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::instrument;

const MAX_CONNECTIONS: u32 = 5;
/// Files SQLite keeps next to a database in WAL mode.
const SIDECAR_SUFFIXES: [&str; 2] = ["-wal", "-shm"];

/// Handle to the live gym database.
///
/// The pool sits behind a lock because a restore swaps the database file out
/// from under it: the old pool is closed, the file replaced, and a fresh pool
/// opened on the new contents. Callers should fetch [`pool`](Self::pool) per
/// unit of work rather than hold on to it.
#[derive(Debug)]
pub struct Database {
    path: PathBuf,
    pool: RwLock<SqlitePool>,
}

impl Database {
    /// Connect to the database at the given path, creating it if missing.
    #[instrument(fields(path = %path.as_ref().display()), skip(path))]
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let pool = Self::open_pool(&path).await?;
        Ok(Self { path, pool: RwLock::new(pool) })
    }

    async fn open_pool(path: &Path) -> Result<SqlitePool> {
        SqlitePoolOptions::new()
            // Apply the query-based PRAGMAs to EVERY pooled connection, not
            // only the first one.
            .after_connect(|conn, meta| Box::pin(async move { Self::apply_pragmas(conn, meta).await }))
            .max_connections(MAX_CONNECTIONS)
            .connect_with(Self::base_options().filename(path).create_if_missing(true))
            .await
            .or_raise(|| ErrorKind::Database)
    }

    fn base_options() -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true)
            .synchronous(SqliteSynchronous::Normal)
            // The scheduler may snapshot while the app is writing; give the
            // single WAL writer room before SQLITE_BUSY.
            .busy_timeout(std::time::Duration::from_millis(1500))
    }

    /// Apply additional PRAGMA settings that aren't exposed via SqliteConnectOptions.
    async fn apply_pragmas(conn: &mut SqliteConnection, _meta: PoolConnectionMetadata) -> sqlx::Result<()> {
        sqlx::query(
            r#"
                PRAGMA wal_autocheckpoint = 800;
                PRAGMA cache_size = -8192;
                PRAGMA temp_store = MEMORY;
            "#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The current connection pool.
    ///
    /// Pools are reference counted; the clone is cheap. A pool fetched before
    /// a restore is closed by it.
    pub fn pool(&self) -> SqlitePool {
        self.pool.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        let pool = self.pool();
        // Let SQLite update query planner statistics
        _ = sqlx::query("PRAGMA optimize").execute(&pool).await;
        pool.close().await;
    }

    /// Write a consistent copy of the live database to `destination`.
    ///
    /// Uses `VACUUM INTO`, which reads inside a transaction and so never sees
    /// a half-applied write. The destination must not exist or be empty.
    #[instrument(skip_all, fields(destination = %destination.display()))]
    pub async fn vacuum_into(&self, destination: &Path) -> Result<()> {
        let target = destination.to_str().ok_or_raise(|| ErrorKind::InvalidPath(destination.to_path_buf()))?;
        sqlx::query("VACUUM INTO ?").bind(target).execute(&self.pool()).await.or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Replace the live database with the SQLite file at `snapshot`.
    ///
    /// The snapshot is copied next to the live file and checked with
    /// `PRAGMA quick_check` before anything live is touched. Then the pool is
    /// closed, stale WAL sidecars are removed, the copy is renamed over the
    /// live file and a new pool is opened. If the swap fails, the pool is
    /// reopened on whatever is in place so the application keeps working.
    #[instrument(skip_all, fields(path = %self.path.display(), snapshot = %snapshot.display()))]
    pub async fn replace_with(&self, snapshot: &Path) -> Result<()> {
        let staged = self.stage(snapshot).await?;
        Self::quick_check(staged.path()).await?;

        self.pool().close().await;
        let swapped = self.swap_in(staged).await;
        match Self::open_pool(&self.path).await {
            Ok(pool) => *self.pool.write().unwrap_or_else(PoisonError::into_inner) = pool,
            Err(e) if swapped.is_ok() => return Err(e),
            Err(e) => tracing::error!(error = ?e, "Could not reopen database after failed restore"),
        }
        swapped?;
        tracing::info!("Live database replaced");
        Ok(())
    }

    /// Copy `snapshot` into a temporary file beside the live database, so the
    /// final rename stays on one filesystem.
    async fn stage(&self, snapshot: &Path) -> Result<tempfile::NamedTempFile> {
        let snapshot = snapshot.to_path_buf();
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        tokio::task::spawn_blocking(move || -> std::io::Result<tempfile::NamedTempFile> {
            let mut staged = tempfile::Builder::new().prefix(".restore-").tempfile_in(&dir)?;
            let mut input = std::fs::File::open(&snapshot)?;
            std::io::copy(&mut input, staged.as_file_mut())?;
            staged.as_file_mut().flush()?;
            staged.as_file().sync_all()?;
            Ok(staged)
        })
        .await
        .or_raise(|| ErrorKind::Io)?
        .or_raise(|| ErrorKind::Io)
    }

    async fn quick_check(path: &Path) -> Result<()> {
        let corrupt = || ErrorKind::Corrupt(path.to_path_buf());
        let mut conn = SqliteConnection::connect_with(&SqliteConnectOptions::new().filename(path))
            .await
            .or_raise(corrupt)?;
        let result: String = sqlx::query_scalar("PRAGMA quick_check").fetch_one(&mut conn).await.or_raise(corrupt)?;
        _ = conn.close().await;
        if result != "ok" {
            tracing::warn!(path = %path.display(), result = %result, "Snapshot failed quick_check");
            exn::bail!(corrupt());
        }
        Ok(())
    }

    async fn swap_in(&self, staged: tempfile::NamedTempFile) -> Result<()> {
        for suffix in SIDECAR_SUFFIXES {
            let mut sidecar = self.path.clone().into_os_string();
            sidecar.push(suffix);
            match tokio::fs::remove_file(&sidecar).await {
                Ok(()) => tracing::debug!(sidecar = ?sidecar, "Removed stale sidecar"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                Err(e) => return Err(e).or_raise(|| ErrorKind::Io),
            }
        }
        let target = self.path.clone();
        tokio::task::spawn_blocking(move || staged.persist(target).map(drop).map_err(|e| e.error))
            .await
            .or_raise(|| ErrorKind::Io)?
            .or_raise(|| ErrorKind::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn members(db: &Database) -> Vec<String> {
        sqlx::query_scalar("SELECT name FROM members ORDER BY id").fetch_all(&db.pool()).await.unwrap()
    }

    async fn seeded(dir: &Path) -> Database {
        let db = Database::connect(dir.join("gym.db")).await.unwrap();
        sqlx::query("CREATE TABLE members (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
            .execute(&db.pool())
            .await
            .unwrap();
        sqlx::query("INSERT INTO members (name) VALUES ('Ada'), ('Grace')").execute(&db.pool()).await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_connect_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect(dir.path().join("gym.db")).await.unwrap();
        assert!(dir.path().join("gym.db").exists());
        assert!(!db.pool().is_closed());
        db.close().await;
        assert!(db.pool().is_closed());
    }

    #[tokio::test]
    async fn test_vacuum_into_reserved_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded(dir.path()).await;
        let copy = dir.path().join("copy.db");
        std::fs::File::create(&copy).unwrap();

        db.vacuum_into(&copy).await.unwrap();
        let snapshot = Database::connect(&copy).await.unwrap();
        assert_eq!(members(&snapshot).await, ["Ada", "Grace"]);
    }

    #[tokio::test]
    async fn test_replace_with_restores_contents() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded(dir.path()).await;
        let copy = dir.path().join("copy.db");
        db.vacuum_into(&copy).await.unwrap();

        sqlx::query("DELETE FROM members WHERE name = 'Ada'").execute(&db.pool()).await.unwrap();
        assert_eq!(members(&db).await, ["Grace"]);

        db.replace_with(&copy).await.unwrap();
        assert_eq!(members(&db).await, ["Ada", "Grace"]);
        // The snapshot itself is left alone.
        assert!(copy.exists());
    }

    #[tokio::test]
    async fn test_replace_with_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded(dir.path()).await;
        let garbage = dir.path().join("garbage.db");
        std::fs::write(&garbage, b"this is not a database, just bytes".repeat(200)).unwrap();

        let err = db.replace_with(&garbage).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Corrupt(_)));
        // Live database untouched and still usable.
        assert_eq!(members(&db).await, ["Ada", "Grace"]);
    }

    #[tokio::test]
    async fn test_replace_with_missing_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded(dir.path()).await;
        let err = db.replace_with(&dir.path().join("missing.db")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Io));
        assert_eq!(members(&db).await, ["Ada", "Grace"]);
    }
}
