//! Plain-file snapshot source for testing.

use crate::SnapshotSource;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// A [`SnapshotSource`] backed by an ordinary file.
///
/// Snapshots are byte copies and restores overwrite the file, which is all
/// the coordinator needs to be exercised without SQLite. Failures can be
/// switched on to drive error paths, and snapshots slowed down to hold an
/// operation open.
///
/// ```
/// use gymvault_store::{MockSource, SnapshotSource};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let dir = tempfile::tempdir()?;
/// let source = MockSource::with_contents(dir.path().join("gym.db"), b"members")?;
/// source.snapshot_into(&dir.path().join("copy.db")).await?;
/// assert_eq!(std::fs::read(dir.path().join("copy.db"))?, b"members");
/// # Ok(())
/// # }
/// ```
pub struct MockSource {
    path: PathBuf,
    fail_snapshots: AtomicBool,
    fail_restores: AtomicBool,
    snapshot_delay_ms: AtomicU64,
    snapshots: AtomicUsize,
    restores: AtomicUsize,
}

impl MockSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fail_snapshots: AtomicBool::new(false),
            fail_restores: AtomicBool::new(false),
            snapshot_delay_ms: AtomicU64::new(0),
            snapshots: AtomicUsize::new(0),
            restores: AtomicUsize::new(0),
        }
    }

    /// Create the backing file with `contents` first.
    pub fn with_contents(path: impl Into<PathBuf>, contents: impl AsRef<[u8]>) -> std::io::Result<Self> {
        let source = Self::new(path);
        std::fs::write(&source.path, contents)?;
        Ok(source)
    }

    pub fn fail_snapshots(&self, fail: bool) {
        self.fail_snapshots.store(fail, Ordering::SeqCst);
    }

    pub fn fail_restores(&self, fail: bool) {
        self.fail_restores.store(fail, Ordering::SeqCst);
    }

    /// Pause for `delay` after writing each snapshot, before reporting it
    /// done. Read when a snapshot starts.
    pub fn delay_snapshots(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.snapshot_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Number of snapshots successfully written.
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.load(Ordering::SeqCst)
    }

    /// Number of restores successfully applied.
    pub fn restore_count(&self) -> usize {
        self.restores.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotSource for MockSource {
    fn path(&self) -> &Path {
        &self.path
    }

    async fn snapshot_into(&self, destination: &Path) -> Result<()> {
        if self.fail_snapshots.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::Source);
        }
        let delay = Duration::from_millis(self.snapshot_delay_ms.load(Ordering::SeqCst));
        tokio::fs::copy(&self.path, destination).await.or_raise(|| ErrorKind::Source)?;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.snapshots.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn restore_from(&self, snapshot: &Path) -> Result<()> {
        if self.fail_restores.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::Source);
        }
        tokio::fs::copy(snapshot, &self.path).await.or_raise(|| ErrorKind::Source)?;
        self.restores.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
