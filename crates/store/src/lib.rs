//! Snapshot storage for gymvault.
//!
//! A [`SnapshotStore`] owns one directory: the snapshot artifacts (raw or
//! compressed) and `backup_catalog.json`, the document describing them. What
//! gets snapshotted is abstracted behind [`SnapshotSource`] so the store never
//! needs to know it is dealing with SQLite.

pub mod error;
pub mod integrity;
#[cfg(feature = "mock")]
mod mock;
mod models;
mod naming;
mod source;
mod store;

#[cfg(feature = "mock")]
pub use crate::mock::MockSource;
pub use crate::models::{Artifact, Catalog, SnapshotRecord};
pub use crate::naming::{snapshot_filename, validate_filename};
pub use crate::source::SnapshotSource;
pub use crate::store::{CATALOG_FILE, SnapshotStore};
use std::sync::Arc;

pub type SourceHandle = Arc<dyn SnapshotSource + Send + Sync>;
