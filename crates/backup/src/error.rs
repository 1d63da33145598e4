//! Backup Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Lower layers (store, compression,
//! the live database) are raised into one of these kinds, so the full cause
//! stays available in the error tree.

use derive_more::{Display, Error};

/// A backup error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for backup operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
///
/// ### Request Errors
/// - [`ErrorKind::NotFound`]
/// - [`ErrorKind::InvalidFilename`]
/// - [`ErrorKind::Corrupt`]
///
/// ### Dependency Errors
/// - [`ErrorKind::Snapshot`]
/// - [`ErrorKind::Catalog`]
/// - [`ErrorKind::Compression`]
/// - [`ErrorKind::Io`]
///
/// ### Restore Errors
/// - [`ErrorKind::SafetyBackup`] - nothing was changed.
/// - [`ErrorKind::Restore`] - the live database may have changed; the
///   pre-restore state is in the named backup.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// No backup file exists under this name.
    #[display("backup not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// The backup failed its integrity check. The live database is untouched.
    #[display("backup is corrupt: {_0}")]
    Corrupt(#[error(not(source))] String),
    /// The name is not a plain file name inside the backup directory.
    #[display("invalid backup name: {_0}")]
    InvalidFilename(#[error(not(source))] String),
    /// The live database could not be copied out or replaced.
    #[display("database snapshot failed")]
    Snapshot,
    /// The backup catalog could not be updated.
    #[display("backup catalog update failed")]
    Catalog,
    #[display("compression failed")]
    Compression,
    #[display("I/O error")]
    Io,
    /// The backup taken before every restore could not be made; the restore
    /// was not attempted.
    #[display("could not back up the current database before restoring")]
    SafetyBackup,
    /// The restore failed after the safety backup was taken.
    #[display("restore failed; the database as it was before is saved as {safety_backup}")]
    Restore {
        #[error(not(source))]
        safety_backup: String,
    },
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Snapshot | Self::Catalog | Self::Io | Self::SafetyBackup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restore_error_names_safety_backup() {
        let err = ErrorKind::Restore { safety_backup: "gym_backup_20240101_000000.db".to_string() };
        assert!(err.to_string().ends_with("gym_backup_20240101_000000.db"));
        assert!(!err.is_retryable());
    }
}
