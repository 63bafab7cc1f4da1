//! File actions — read, write, and glob listing inside a workspace root.
//!
//! Every path goes through [`guard::resolve`] first. Callers hold the
//! workspace lock; nothing here synchronizes on its own.

use std::io::Read as _;
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::error::{WorkspaceError, WorkspaceResult};
use crate::guard;

/// Max bytes to check for binary content detection.
const BINARY_CHECK_BYTES: usize = 8192;

/// Maximum recursion depth for the listing walker.
const MAX_WALK_DEPTH: usize = 50;

/// Content of a file read from the workspace.
#[derive(Debug, Clone, Serialize)]
pub struct FileContent {
    pub path: String,
    pub content: String,
}

/// Outcome of a write.
#[derive(Debug, Clone, Serialize)]
pub struct WriteOutcome {
    pub path: String,
    pub bytes: usize,
    pub created: bool,
}

/// Files matched by a listing, relative to the workspace root.
#[derive(Debug, Clone, Serialize)]
pub struct FileListing {
    pub files: Vec<String>,
    pub truncated: bool,
}

/// Read a UTF-8 text file.
pub fn read_file(root: &Path, file_path: &str) -> WorkspaceResult<FileContent> {
    let path = guard::resolve(root, file_path)?;
    if !path.is_file() {
        return Err(WorkspaceError::FileNotFound {
            path: file_path.into(),
        });
    }

    let mut bytes = Vec::new();
    std::fs::File::open(&path)
        .and_then(|mut f| f.read_to_end(&mut bytes))
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => WorkspaceError::FileNotFound {
                path: file_path.into(),
            },
            _ => WorkspaceError::io(&path, e),
        })?;

    let head = &bytes[..bytes.len().min(BINARY_CHECK_BYTES)];
    if head.contains(&0) {
        return Err(WorkspaceError::BinaryFile {
            path: file_path.into(),
        });
    }
    let content = String::from_utf8(bytes).map_err(|_| WorkspaceError::BinaryFile {
        path: file_path.into(),
    })?;

    Ok(FileContent {
        path: guard::display_relative(root, &path),
        content,
    })
}

/// Replace (or create) a file, creating parent directories as needed.
pub fn write_file(root: &Path, file_path: &str, content: &str) -> WorkspaceResult<WriteOutcome> {
    if file_path.trim().is_empty() {
        return Err(WorkspaceError::InvalidParameters {
            action: "write_file".to_owned(),
            reason: "file_path must not be empty".to_owned(),
        });
    }
    let path = guard::resolve(root, file_path)?;
    if path.is_dir() {
        return Err(WorkspaceError::io(
            &path,
            std::io::Error::new(std::io::ErrorKind::IsADirectory, "target is a directory"),
        ));
    }

    let created = !path.exists();
    with_parents(&path, || {
        crate::util::atomic::atomic_write(&path, content.as_bytes())
    })?;
    debug!(path = %path.display(), bytes = content.len(), created, "wrote file");

    Ok(WriteOutcome {
        path: guard::display_relative(root, &path),
        bytes: content.len(),
        created,
    })
}

/// Create the missing parents of `path`, run `write`, and remove the
/// directories created here again if it fails.
fn with_parents<T>(path: &Path, write: impl FnOnce() -> WorkspaceResult<T>) -> WorkspaceResult<T> {
    let Some(parent) = path.parent() else {
        return write();
    };
    // Deepest first.
    let missing: Vec<&Path> = parent
        .ancestors()
        .take_while(|dir| std::fs::symlink_metadata(dir).is_err())
        .collect();

    let result = std::fs::create_dir_all(parent)
        .map_err(|e| WorkspaceError::io(parent, e))
        .and_then(|()| write());
    if result.is_err() {
        for dir in &missing {
            // Only empty directories go; anything else is left alone.
            if std::fs::remove_dir(dir).is_err() {
                break;
            }
        }
    }
    result
}

/// List files under `subdir` whose path relative to `subdir` matches `pattern`.
///
/// `*` and `?` never cross `/`; `**` spans directories. Results are relative
/// to the workspace root and sorted; `max_results` keeps the first entries of
/// that order. Symlinks are skipped and `.git` is never descended into.
pub fn list_files(
    root: &Path,
    subdir: &str,
    pattern: &str,
    max_results: usize,
) -> WorkspaceResult<FileListing> {
    let invalid = |reason: String| WorkspaceError::InvalidParameters {
        action: "list_files".to_owned(),
        reason,
    };

    let search_dir = guard::resolve(root, subdir)?;
    if !search_dir.is_dir() {
        return Err(WorkspaceError::FileNotFound {
            path: subdir.into(),
        });
    }

    let glob = globset::GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|e| invalid(format!("invalid glob pattern {pattern}: {e}")))?
        .compile_matcher();

    // Without `**`, matches can be at most as deep as the pattern has segments.
    let max_depth = if pattern.contains("**") {
        MAX_WALK_DEPTH
    } else {
        pattern.matches('/').count()
    };

    let canonical_root = root.canonicalize().map_err(|e| WorkspaceError::io(root, e))?;
    let mut walk = Walk {
        root: &canonical_root,
        base: &search_dir,
        glob: &glob,
        max_depth,
        files: Vec::new(),
    };
    walk.visit(&search_dir, 0)?;

    let mut files = walk.files;
    files.sort();
    let truncated = files.len() > max_results;
    files.truncate(max_results);
    debug!(subdir, pattern, matched = files.len(), truncated, "listed files");

    Ok(FileListing { files, truncated })
}

struct Walk<'a> {
    root: &'a Path,
    base: &'a Path,
    glob: &'a globset::GlobMatcher,
    max_depth: usize,
    files: Vec<String>,
}

impl Walk<'_> {
    fn visit(&mut self, dir: &Path, depth: usize) -> WorkspaceResult<()> {
        let entries = std::fs::read_dir(dir).map_err(|e| WorkspaceError::io(dir, e))?;

        for entry in entries {
            let entry = entry.map_err(|e| WorkspaceError::io(dir, e))?;
            let path = entry.path();

            if entry.file_name() == ".git" {
                continue;
            }

            // Does not follow symlinks.
            let Ok(ft) = entry.file_type() else {
                continue;
            };

            if ft.is_dir() {
                if depth < self.max_depth {
                    self.visit(&path, depth + 1)?;
                }
            } else if ft.is_file() {
                let Ok(relative) = path.strip_prefix(self.base) else {
                    continue;
                };
                if self.glob.is_match(relative) {
                    self.files.push(guard::display_relative(self.root, &path));
                }
            }
        }

        Ok(())
    }
}
