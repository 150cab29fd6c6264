//! Filesystem utilities.

use std::io::ErrorKind;
use std::path::Path;

use crate::error::Result;

/// Create `path` and its parents if missing.
pub fn ensure_dir(path: impl AsRef<Path>) -> Result<()> {
    std::fs::create_dir_all(path.as_ref())?;
    Ok(())
}

/// Read a file to string; `None` if it does not exist.
pub fn read_optional(path: impl AsRef<Path>) -> Result<Option<String>> {
    match std::fs::read_to_string(path.as_ref()) {
        Ok(raw) => Ok(Some(raw)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}
