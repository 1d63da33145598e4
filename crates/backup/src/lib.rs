//! Backups of the live gym database.
//!
//! [`BackupCoordinator`] is the entry point. It snapshots the live database
//! into a [`SnapshotStore`](gymvault_store::SnapshotStore), keeps the catalog
//! describing those snapshots, verifies them, restores them, and keeps the
//! directory within its retention limits.
//!
//! ```no_run
//! use gymvault_backup::{BackupCoordinator, error::Result};
//! use gymvault_config::Config;
//! use gymvault_database::Database;
//! use std::sync::Arc;
//!
//! # async fn example(db: Arc<Database>, config: Config) -> Result<()> {
//! let backups = Arc::new(BackupCoordinator::new(db, config.backup)?);
//!
//! let created = backups.create_backup("Before price change").await?;
//! backups.restore_backup(&created.filename).await?;
//! backups.start_scheduled_backups();
//! # Ok(())
//! # }
//! ```

mod coordinator;
pub mod error;
pub mod retention;
pub mod scheduler;

pub use crate::coordinator::{BackupCoordinator, BackupCreated, Restored};
pub use crate::scheduler::ScheduleTiming;
