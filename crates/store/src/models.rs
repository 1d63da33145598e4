//! Catalog models.
//!
//! The catalog is a JSON document keyed by snapshot file name. Each entry
//! describes the snapshot as it was taken (uncompressed size and digest) and,
//! once it has aged, the compressed artifact that replaced it.

use gymvault_compress::Compression;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use time::OffsetDateTime;

/// Every known snapshot, keyed by its uncompressed file name.
pub type Catalog = BTreeMap<String, SnapshotRecord>;

/// Metadata kept for each snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// Uncompressed file name, identical to the catalog key.
    pub filename: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub description: String,
    /// Size of the uncompressed snapshot.
    pub file_size_bytes: u64,
    /// BLAKE3 of the uncompressed snapshot.
    pub content_hash: String,
    #[serde(default)]
    pub compressed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<Compression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compressed_size_bytes: Option<u64>,
    /// BLAKE3 of the compressed artifact, as found on disk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compressed_hash: Option<String>,
}
impl SnapshotRecord {
    pub fn new(
        filename: impl Into<String>,
        created_at: OffsetDateTime,
        description: impl Into<String>,
        file_size_bytes: u64,
        content_hash: impl Into<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            created_at,
            description: description.into(),
            file_size_bytes,
            content_hash: content_hash.into(),
            compressed: false,
            compression: None,
            compressed_size_bytes: None,
            compressed_hash: None,
        }
    }

    /// Record that the snapshot now lives in a compressed artifact.
    pub fn mark_compressed(&mut self, compression: Compression, size: u64, hash: impl Into<String>) {
        self.compressed = true;
        self.compression = Some(compression);
        self.compressed_size_bytes = Some(size);
        self.compressed_hash = Some(hash.into());
    }

    /// Time elapsed since the snapshot was taken.
    pub fn age(&self, now: OffsetDateTime) -> time::Duration {
        now - self.created_at
    }
}

/// A snapshot file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    /// Format the file is stored in; [`Compression::None`] for a raw snapshot.
    pub compression: Compression,
}
impl Artifact {
    pub fn is_compressed(&self) -> bool {
        self.compression.is_compressed()
    }
}
