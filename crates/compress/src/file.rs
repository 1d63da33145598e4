//! Whole-file compression for snapshot artifacts.

use crate::error::{ErrorKind, Result};
use crate::format::MAGIC_LEN;
use crate::{Compression, TempFile};
use exn::{OptionExt, ResultExt};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek};
use std::path::{Path, PathBuf};
use tracing::instrument;

impl Compression {
    /// Compress a file into a sibling named `<file><extension>`, then delete
    /// the original.
    ///
    /// The compressed output goes to a hidden temporary file in the same
    /// directory and is only renamed into place once the encoder has finished
    /// and the data is synced. The original is removed last. If removing the
    /// original fails, the new sibling is removed again so that exactly one
    /// copy of the data remains.
    ///
    /// Returns the path of the compressed file.
    #[instrument(skip_all, fields(format = %self, source = %source.as_ref().display()))]
    pub fn compress_file(&self, source: impl AsRef<Path>) -> Result<PathBuf> {
        let source = source.as_ref();
        if !self.is_compressed() {
            exn::bail!(ErrorKind::NotCompressed);
        }
        let name = source.file_name().and_then(|n| n.to_str()).ok_or_raise(|| ErrorKind::Io)?;
        let target = source.with_file_name(self.append_extension(name));
        if target.exists() {
            exn::bail!(ErrorKind::AlreadyExists);
        }

        let input = BufReader::new(File::open(source).or_raise(|| ErrorKind::Io)?);
        let partial = tempfile::Builder::new()
            .prefix(".")
            .suffix(".partial")
            .tempfile_in(parent_dir(source))
            .or_raise(|| ErrorKind::Io)?;
        let (_, writer) = self.compress_stream(input, BufWriter::new(partial))?;
        let partial = writer.into_inner().map_err(io::IntoInnerError::into_error).or_raise(|| ErrorKind::Io)?;
        partial.as_file().sync_all().or_raise(|| ErrorKind::Io)?;
        partial.persist_noclobber(&target).map_err(|e| e.error).or_raise(|| ErrorKind::Io)?;

        if let Err(e) = fs::remove_file(source) {
            // Both copies exist now; drop the new one rather than leave two artifacts.
            _ = fs::remove_file(&target);
            return Err(e).or_raise(|| ErrorKind::Io);
        }
        tracing::debug!(target = %target.display(), "Compressed file written; original removed");
        Ok(target)
    }

    /// Decompress a file into a new temporary file inside `dir`.
    ///
    /// The returned [`TempFile`] deletes itself when dropped, so the caller
    /// only has to let it go out of scope, whether it succeeded or not. On
    /// error nothing is left behind. A file whose signature does not match
    /// the format is rejected as [`ErrorKind::InvalidData`] before anything
    /// is written.
    #[instrument(skip_all, fields(format = %self, source = %source.as_ref().display()))]
    pub fn decompress_file(&self, source: impl AsRef<Path>, dir: impl AsRef<Path>) -> Result<TempFile> {
        let mut file = File::open(source.as_ref()).or_raise(|| ErrorKind::Io)?;
        if self.is_compressed() {
            let mut magic = Vec::with_capacity(MAGIC_LEN);
            (&mut file).take(MAGIC_LEN as u64).read_to_end(&mut magic).or_raise(|| ErrorKind::Io)?;
            let detected = Self::from_magic_bytes(&magic);
            if detected != *self {
                tracing::warn!(detected = %detected, "File signature does not match its format");
                exn::bail!(ErrorKind::InvalidData);
            }
            file.rewind().or_raise(|| ErrorKind::Io)?;
        }
        let input = BufReader::new(file);
        let mut output = tempfile::Builder::new()
            .prefix(".decompressed-")
            .tempfile_in(dir.as_ref())
            .or_raise(|| ErrorKind::Io)?;
        self.decompress_stream(input, BufWriter::new(output.as_file_mut()))?;
        output.as_file().sync_all().or_raise(|| ErrorKind::Io)?;
        Ok(output)
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}
