//! Compression and decompression of database snapshots.
//!
//! This crate wraps the compression libraries behind a unified
//! [`Compression`] enum, providing:
//!
//! - **Names and extensions** used by the configuration and the catalog, and
//!   format detection from magic bytes ([`Compression::from_magic_bytes`])
//! - **In-memory** compression/decompression ([`Compression::compress`],
//!   [`Compression::decompress`])
//! - **Streaming** via [`Compression::compress_stream`] and
//!   [`Compression::decompress_stream`]
//! - **Whole files** via [`Compression::compress_file`], which never removes
//!   the original before the compressed sibling is complete, and
//!   [`Compression::decompress_file`], which hands back a [`TempFile`] that
//!   cleans up after itself.
//!
//! All compression uses the highest available level for each format,
//! prioritizing storage space over speed. Snapshots are compressed once and
//! kept for weeks.

pub mod error;
mod file;
mod format;
mod ops;
#[cfg(feature = "serde")]
mod serialize;

/// Temporary file that is deleted when dropped.
pub type TempFile = tempfile::NamedTempFile;

/// A supported compression format.
///
/// Defaults to [`None`](Self::None) (uncompressed).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Uncompressed
    #[default]
    None,
    /// Bzip2 compression (.bz2)
    Bzip2,
    /// Gzip compression (.gz)
    Gzip,
}

impl Compression {
    /// Every format that produces a compressed artifact, in the order a
    /// snapshot store should look for them.
    pub const COMPRESSED: [Compression; 2] = [Compression::Gzip, Compression::Bzip2];

    /// Returns `true` for any format other than [`None`](Self::None).
    #[inline]
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        !matches!(self, Compression::None)
    }
}
