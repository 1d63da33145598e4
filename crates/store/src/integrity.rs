//! Snapshot digests.
//!
//! Digests are BLAKE3, streamed in fixed-size chunks so that memory stays
//! flat no matter how large the database grows, and rendered as lowercase
//! hex. Everything here is blocking; async callers go through
//! `spawn_blocking`.

use crate::error::{ErrorKind, Result};
use crate::models::{Artifact, SnapshotRecord};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::instrument;

const CHUNK_SIZE: usize = 64 * 1024;

/// Outcome of checking an artifact against its catalog record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Valid,
    /// The artifact exists but its digest disagrees with the record.
    Mismatch { expected: String, actual: String },
    /// The artifact exists but the catalog has no entry for it.
    MissingRecord,
    /// Neither a raw nor a compressed artifact exists.
    MissingArtifact,
}
impl Verification {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// Digest everything `reader` yields.
pub fn hash_reader(mut reader: impl Read) -> std::io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0; CHUNK_SIZE];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                hasher.update(&buffer[..n]);
            },
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Digest a file's bytes as stored on disk.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub fn hash_file(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|e| ErrorKind::from_io(e, path))?;
    Ok(hash_reader(file).map_err(ErrorKind::Io)?)
}

/// Check an artifact against its catalog record.
///
/// Compressed artifacts are compared against `compressed_hash` when the
/// record has one. Records written before compressed digests existed are
/// checked by decompressing on the fly and comparing with `content_hash`;
/// undecodable data counts as a mismatch.
#[instrument(level = "debug", skip_all, fields(artifact = ?artifact.map(|a| &a.path)))]
pub fn verify(record: Option<&SnapshotRecord>, artifact: Option<&Artifact>) -> Result<Verification> {
    let Some(artifact) = artifact else {
        return Ok(Verification::MissingArtifact);
    };
    let Some(record) = record else {
        return Ok(Verification::MissingRecord);
    };

    let (expected, actual) = match (artifact.is_compressed(), &record.compressed_hash) {
        (false, _) => (record.content_hash.clone(), hash_file(&artifact.path)?),
        (true, Some(compressed_hash)) => (compressed_hash.clone(), hash_file(&artifact.path)?),
        (true, None) => {
            let file = File::open(&artifact.path).map_err(|e| ErrorKind::from_io(e, &artifact.path))?;
            let decoded = artifact.compression.wrap_reader(BufReader::new(file));
            let actual = hash_reader(decoded).unwrap_or_else(|e| {
                tracing::debug!(error = %e, "Compressed artifact could not be decoded");
                String::from("<undecodable>")
            });
            (record.content_hash.clone(), actual)
        },
    };

    if expected == actual {
        Ok(Verification::Valid)
    } else {
        Ok(Verification::Mismatch { expected, actual })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gymvault_compress::Compression;
    use std::fs;
    use time::OffsetDateTime;

    fn record_for(bytes: &[u8]) -> SnapshotRecord {
        SnapshotRecord::new("a.db", OffsetDateTime::UNIX_EPOCH, "", bytes.len() as u64, blake3::hash(bytes).to_hex().to_string())
    }

    #[test]
    fn test_hash_is_stable_and_streamed() {
        // Larger than a single chunk, so the streaming path matches a one-shot hash.
        let data = b"0123456789abcdef".repeat(10_000);
        let expected = blake3::hash(&data).to_hex().to_string();
        assert_eq!(hash_reader(&data[..]).unwrap(), expected);
        assert_eq!(hash_reader(&data[..]).unwrap(), expected);
        assert_eq!(expected.len(), 64);
    }

    #[test]
    fn test_hash_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = hash_file(&dir.path().join("nope.db")).unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[test]
    fn test_verify_raw() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.db");
        fs::write(&path, b"snapshot").unwrap();
        let record = record_for(b"snapshot");
        let artifact = Artifact { path: path.clone(), compression: Compression::None };

        assert_eq!(verify(Some(&record), Some(&artifact)).unwrap(), Verification::Valid);
        fs::write(&path, b"tampered").unwrap();
        assert!(matches!(verify(Some(&record), Some(&artifact)).unwrap(), Verification::Mismatch { .. }));
        assert_eq!(verify(None, Some(&artifact)).unwrap(), Verification::MissingRecord);
        assert_eq!(verify(Some(&record), None).unwrap(), Verification::MissingArtifact);
    }

    #[test]
    fn test_verify_compressed_against_compressed_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.db");
        fs::write(&path, b"snapshot".repeat(50)).unwrap();
        let mut record = record_for(&b"snapshot".repeat(50));
        let compressed = Compression::Gzip.compress_file(&path).unwrap();
        record.mark_compressed(Compression::Gzip, 0, hash_file(&compressed).unwrap());
        let artifact = Artifact { path: compressed, compression: Compression::Gzip };

        assert!(verify(Some(&record), Some(&artifact)).unwrap().is_valid());
        record.compressed_hash = Some("0".repeat(64));
        assert!(!verify(Some(&record), Some(&artifact)).unwrap().is_valid());
    }

    #[test]
    fn test_verify_compressed_falls_back_to_content_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.db");
        fs::write(&path, b"snapshot".repeat(50)).unwrap();
        let record = record_for(&b"snapshot".repeat(50));
        let compressed = Compression::Bzip2.compress_file(&path).unwrap();
        let artifact = Artifact { path: compressed.clone(), compression: Compression::Bzip2 };
        assert!(verify(Some(&record), Some(&artifact)).unwrap().is_valid());

        fs::write(&compressed, b"not bzip2 at all").unwrap();
        assert!(matches!(verify(Some(&record), Some(&artifact)).unwrap(), Verification::Mismatch { .. }));
    }
}
