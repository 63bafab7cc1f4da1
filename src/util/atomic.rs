//! Atomic file replacement via tempfile + rename.
//!
//! The new content goes to a [`tempfile::NamedTempFile`] in the target's
//! directory and is then persisted over the target, so a reader sees either
//! the old file or the new one and a failed write leaves the old file intact.

use std::io::Write;
use std::path::Path;

use crate::error::{WorkspaceError, WorkspaceResult};

/// Atomically replace `path` with `content`.
///
/// Permissions of an existing file are carried over to the replacement.
/// The parent directory must already exist.
pub fn atomic_write(path: &Path, content: &[u8]) -> WorkspaceResult<()> {
    let parent = path.parent().ok_or_else(|| {
        WorkspaceError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "no parent directory"),
        )
    })?;

    let mut tmp =
        tempfile::NamedTempFile::new_in(parent).map_err(|e| WorkspaceError::io(parent, e))?;

    tmp.write_all(content)
        .and_then(|()| tmp.flush())
        .map_err(|e| WorkspaceError::io(path, e))?;

    if let Ok(metadata) = std::fs::metadata(path) {
        tmp.as_file()
            .set_permissions(metadata.permissions())
            .map_err(|e| WorkspaceError::io(path, e))?;
    }

    tmp.persist(path)
        .map_err(|e| WorkspaceError::io(path, e.error))?;

    Ok(())
}
