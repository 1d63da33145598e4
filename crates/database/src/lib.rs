//! The live gym database.
//!
//! [`Database`] owns the SQLite connection pool the application queries
//! through, and implements [`SnapshotSource`](gymvault_store::SnapshotSource)
//! so the backup coordinator can copy it out and swap snapshots back in.

mod db;
pub mod error;
mod source;

pub use crate::db::Database;
