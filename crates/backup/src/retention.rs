//! Retention planning.
//!
//! Deciding what to compress and what to delete is kept apart from doing it,
//! so the rules can be tested without touching a filesystem.

use gymvault_compress::Compression;
use gymvault_config::BackupConfig;
use gymvault_store::SnapshotRecord;
use time::{Duration, OffsetDateTime};

/// The knobs retention works with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_backups: usize,
    pub compress_after: Duration,
    pub compression: Compression,
}
impl From<&BackupConfig> for RetentionPolicy {
    fn from(config: &BackupConfig) -> Self {
        Self {
            max_backups: config.max_backups,
            compress_after: Duration::try_from(config.compress_after()).unwrap_or(Duration::MAX),
            compression: config.compression,
        }
    }
}

/// What one retention pass will do, by file name.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetentionPlan {
    /// Aged backups to compress, newest first.
    pub compress: Vec<String>,
    /// Excess backups to delete, oldest first.
    pub delete: Vec<String>,
}
impl RetentionPlan {
    pub fn is_empty(&self) -> bool {
        self.compress.is_empty() && self.delete.is_empty()
    }
}

/// Plan a retention pass over `records`, which must be sorted newest first.
///
/// Everything beyond the first `max_backups` records is deleted. Of the
/// records that stay, the uncompressed ones older than `compress_after` are
/// compressed, unless the policy's format is [`Compression::None`]. A backup
/// that is about to be deleted is never compressed first.
pub fn plan(records: &[SnapshotRecord], policy: &RetentionPolicy, now: OffsetDateTime) -> RetentionPlan {
    let keep = records.len().min(policy.max_backups);
    let (kept, excess) = records.split_at(keep);

    let compress = match policy.compression.is_compressed() {
        true => kept
            .iter()
            .filter(|record| !record.compressed && record.age(now) > policy.compress_after)
            .map(|record| record.filename.clone())
            .collect(),
        false => Vec::new(),
    };
    let delete = excess.iter().rev().map(|record| record.filename.clone()).collect();

    RetentionPlan { compress, delete }
}
