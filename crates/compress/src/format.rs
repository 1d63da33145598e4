//! Names, extensions and signatures of the supported formats.

use crate::Compression;
use crate::error::{Error, ErrorKind};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

const BZIP2_MAGIC: &[u8] = b"BZh";
const GZIP_MAGIC: &[u8] = &[0x1F, 0x8B];

/// Longest signature we look for.
pub(crate) const MAGIC_LEN: usize = 3;

impl Compression {
    /// Name used in configuration files and the backup catalog.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Bzip2 => "bzip2",
            Compression::Gzip => "gzip",
        }
    }

    /// Suffix a compressed artifact carries after the snapshot's own name,
    /// including the leading dot. Empty for [`None`](Self::None).
    #[inline]
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::None => "",
            Compression::Bzip2 => ".bz2",
            Compression::Gzip => ".gz",
        }
    }

    /// Append this format's extension to a file name.
    ///
    /// ```
    /// use gymvault_compress::Compression;
    ///
    /// assert_eq!(Compression::Gzip.append_extension("backup.db"), "backup.db.gz");
    /// assert_eq!(Compression::None.append_extension("backup.db"), "backup.db");
    /// ```
    #[must_use]
    pub fn append_extension(&self, name: &str) -> String {
        format!("{name}{}", self.extension())
    }

    /// Identify a format from the first bytes of a file.
    ///
    /// Anything without a gzip or bzip2 signature (an SQLite database starts
    /// with `SQLite format 3\0`) is [`None`](Self::None).
    #[must_use]
    pub fn from_magic_bytes(bytes: &[u8]) -> Self {
        if bytes.starts_with(GZIP_MAGIC) {
            Compression::Gzip
        } else if bytes.starts_with(BZIP2_MAGIC) {
            Compression::Bzip2
        } else {
            Compression::None
        }
    }
}

impl Display for Compression {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for Compression {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Compression::None),
            "gzip" | "gz" => Ok(Compression::Gzip),
            "bzip2" | "bz2" => Ok(Compression::Bzip2),
            _ => exn::bail!(ErrorKind::UnsupportedFormat(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::Compression;
    use rstest::rstest;

    #[rstest]
    #[case("none", Compression::None)]
    #[case("", Compression::None)]
    #[case("gzip", Compression::Gzip)]
    #[case("GZ", Compression::Gzip)]
    #[case("bzip2", Compression::Bzip2)]
    #[case(" bz2 ", Compression::Bzip2)]
    fn test_from_str(#[case] name: &str, #[case] expected: Compression) {
        assert_eq!(name.parse::<Compression>().unwrap(), expected);
    }

    #[rstest]
    #[case("zstd")]
    #[case("xz")]
    #[case("gzip2")]
    fn test_from_str_unsupported(#[case] name: &str) {
        assert!(name.parse::<Compression>().is_err());
    }

    #[test]
    fn test_display_matches_parse() {
        for format in [Compression::None, Compression::Bzip2, Compression::Gzip] {
            assert_eq!(format.to_string().parse::<Compression>().unwrap(), format);
        }
    }

    #[rstest]
    #[case(Compression::None, "")]
    #[case(Compression::Bzip2, ".bz2")]
    #[case(Compression::Gzip, ".gz")]
    fn test_extension(#[case] format: Compression, #[case] expected: &str) {
        assert_eq!(format.extension(), expected);
    }

    #[rstest]
    #[case(b"SQLite format 3\0", Compression::None)]
    #[case(b"", Compression::None)]
    #[case(b"B", Compression::None)]
    #[case(b"BZh9", Compression::Bzip2)]
    #[case(&[0x1F, 0x8B, 0x08, 0x00], Compression::Gzip)]
    fn test_from_magic_bytes(#[case] bytes: &[u8], #[case] expected: Compression) {
        assert_eq!(Compression::from_magic_bytes(bytes), expected);
    }

    #[rstest]
    #[case(Compression::Gzip)]
    #[case(Compression::Bzip2)]
    fn test_compressed_output_is_recognised(#[case] format: Compression) {
        let compressed = format.compress(b"payload").unwrap();
        assert_eq!(Compression::from_magic_bytes(&compressed), format);
    }
}
