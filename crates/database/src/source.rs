use crate::Database;
use async_trait::async_trait;
use exn::ResultExt;
use gymvault_store::SnapshotSource;
use gymvault_store::error::{ErrorKind as StoreErrorKind, Result as StoreResult};
use std::path::Path;

#[async_trait]
impl SnapshotSource for Database {
    fn path(&self) -> &Path {
        Database::path(self)
    }

    async fn snapshot_into(&self, destination: &Path) -> StoreResult<()> {
        self.vacuum_into(destination).await.or_raise(|| StoreErrorKind::Source)
    }

    async fn restore_from(&self, snapshot: &Path) -> StoreResult<()> {
        self.replace_with(snapshot).await.or_raise(|| StoreErrorKind::Source)
    }
}
