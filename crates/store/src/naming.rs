//! Snapshot file names.
//!
//! Every snapshot is called `<prefix>_<YYYYMMDD_HHMMSS>.<ext>`, with an
//! optional `_<n>` counter before the extension when two snapshots land in
//! the same second. Compressed artifacts append the format's extension
//! (`.gz`, `.bz2`) to that name.

use crate::error::{ErrorKind, Result};
use std::path::{Component, Path};
use time::OffsetDateTime;

/// Build the file name of a snapshot taken at `at`.
///
/// `attempt` 0 yields the plain name; anything higher appends `_<attempt>`.
pub fn snapshot_filename(prefix: &str, at: OffsetDateTime, extension: &str, attempt: u32) -> String {
    let stamp = format!(
        "{:04}{:02}{:02}_{:02}{:02}{:02}",
        at.year(),
        u8::from(at.month()),
        at.day(),
        at.hour(),
        at.minute(),
        at.second()
    );
    match attempt {
        0 => format!("{prefix}_{stamp}.{extension}"),
        n => format!("{prefix}_{stamp}_{n}.{extension}"),
    }
}

/// Check that a caller-supplied snapshot name is a single plain file name.
///
/// Snapshot names come from users (CLI, API) and are joined onto the store
/// directory, so anything that could resolve elsewhere is refused: separators,
/// `..`, absolute paths and NUL bytes.
///
/// ```
/// use gymvault_store::validate_filename;
/// assert!(validate_filename("gym_backup_20240101_120000.db").is_ok());
/// assert!(validate_filename("../gym.db").is_err());
/// assert!(validate_filename("nested/gym.db").is_err());
/// assert!(validate_filename("").is_err());
/// ```
pub fn validate_filename(filename: &str) -> Result<&str> {
    if filename.is_empty() || filename.contains('\0') || filename.contains(['/', '\\']) {
        exn::bail!(ErrorKind::InvalidFilename(filename.to_string()));
    }
    let mut components = Path::new(filename).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) if name == filename => Ok(filename),
        _ => exn::bail!(ErrorKind::InvalidFilename(filename.to_string())),
    }
}
