//! The live database, as seen by the snapshot store.

use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// Something that can be copied into a snapshot file and replaced from one.
///
/// The store only decides *where* snapshots live; producing a consistent copy
/// of the live data and swapping it back in is the implementor's business.
///
/// ```
/// use gymvault_store::{SnapshotSource, error::Result};
/// use std::path::Path;
///
/// async fn copy_twice(source: &dyn SnapshotSource, a: &Path, b: &Path) -> Result<()> {
///     source.snapshot_into(a).await?;
///     source.snapshot_into(b).await
/// }
/// ```
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Location of the live data file.
    fn path(&self) -> &Path;

    /// File extension snapshots of this source should carry.
    fn extension(&self) -> &str {
        self.path().extension().and_then(|e| e.to_str()).unwrap_or("db")
    }

    /// Write a consistent copy of the live data to `destination`.
    ///
    /// `destination` already exists as an empty file reserved by the store.
    async fn snapshot_into(&self, destination: &Path) -> Result<()>;

    /// Replace the live data with the snapshot at `snapshot`.
    ///
    /// The snapshot file is owned by the caller and must not be moved.
    async fn restore_from(&self, snapshot: &Path) -> Result<()>;
}
