//! Path guard — confines path arguments to the workspace root.
//!
//! Resolution follows symlinks for every component that exists on disk and
//! applies the remaining (not yet created) components lexically. The check
//! reflects the filesystem at the time of the call; a concurrent rename can
//! still race it.

use std::path::{Component, Path, PathBuf};

use crate::error::{WorkspaceError, WorkspaceResult};

/// Resolve `relative` against `root`, ensuring it stays within `root`.
///
/// Rejects null bytes, absolute paths, `..` traversal that leaves the root,
/// and symlinks (including dangling ones) that point outside. An empty path
/// resolves to the canonical root.
pub fn resolve(root: &Path, relative: &str) -> WorkspaceResult<PathBuf> {
    let escape = || WorkspaceError::PathEscape {
        path: relative.to_owned(),
    };

    // Null bytes can bypass C-based path APIs.
    if relative.contains('\0') {
        return Err(escape());
    }

    let relative_path = Path::new(relative);
    if relative_path
        .components()
        .any(|c| matches!(c, Component::Prefix(_) | Component::RootDir))
    {
        return Err(escape());
    }

    let canonical_root = root
        .canonicalize()
        .map_err(|e| WorkspaceError::io(root, e))?;

    // Walk up to the deepest entry that exists. `symlink_metadata` does not
    // follow links, so a dangling symlink counts as existing and then fails
    // canonicalization below instead of being treated as a fresh name.
    let mut existing = canonical_root.join(relative_path);
    let mut pending = Vec::new();
    while std::fs::symlink_metadata(&existing).is_err() {
        match existing.components().next_back() {
            Some(last) => pending.push(last.as_os_str().to_os_string()),
            None => return Err(escape()),
        }
        if !existing.pop() {
            return Err(escape());
        }
    }

    let mut resolved = existing.canonicalize().map_err(|_| escape())?;
    for part in pending.iter().rev() {
        if part == ".." {
            resolved.pop();
        } else if part != "." {
            resolved.push(part);
        }
    }

    if !resolved.starts_with(&canonical_root) {
        return Err(escape());
    }

    Ok(resolved)
}

/// Render `path` relative to `root` with `/` separators, for results.
pub fn display_relative(root: &Path, path: &Path) -> String {
    let canonical_root;
    let relative = match path.strip_prefix(root) {
        Ok(r) => r,
        Err(_) => {
            canonical_root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
            path.strip_prefix(&canonical_root).unwrap_or(path)
        }
    };
    let joined = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    if joined.is_empty() {
        ".".to_owned()
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("src/nested")).expect("mkdir");
        std::fs::write(dir.path().join("src/main.rs"), "fn main() {}").expect("write");
        dir
    }

    #[test]
    fn test_inside_paths_resolve_under_root() {
        let dir = workspace();
        let root = dir.path().canonicalize().expect("canon");

        for p in ["src/main.rs", "src/nested", "src/../src/main.rs", "new/file.txt", "", "."] {
            let resolved = resolve(dir.path(), p).expect(p);
            assert!(resolved.starts_with(&root), "{p} -> {}", resolved.display());
        }
        assert_eq!(resolve(dir.path(), "").expect("root"), root);
    }

    #[test]
    fn test_parent_traversal_rejected() {
        let dir = workspace();
        for p in ["..", "../x", "src/../../x", "src/nested/../../../etc", "missing/../../x"] {
            let err = resolve(dir.path(), p).expect_err(p);
            assert_eq!(err.kind(), "PathEscapeError", "{p}");
        }
    }

    #[test]
    fn test_nonexistent_suffix_with_parent_stays_inside() {
        let dir = workspace();
        let root = dir.path().canonicalize().expect("canon");
        let resolved = resolve(dir.path(), "missing/../inside.txt").expect("resolve");
        assert_eq!(resolved, root.join("inside.txt"));
    }

    #[test]
    fn test_absolute_path_rejected() {
        let dir = workspace();
        let absolute = dir.path().join("src/main.rs");
        let err = resolve(dir.path(), absolute.to_str().expect("utf8")).expect_err("absolute");
        assert_eq!(err.kind(), "PathEscapeError");
    }

    #[test]
    fn test_null_byte_rejected() {
        let dir = workspace();
        assert!(resolve(dir.path(), "src/\0main.rs").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_rejected() {
        let dir = workspace();
        let outside = tempfile::tempdir().expect("outside");
        std::fs::write(outside.path().join("secret.txt"), "secret").expect("write");
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).expect("symlink");

        let err = resolve(dir.path(), "link/secret.txt").expect_err("escape");
        assert_eq!(err.kind(), "PathEscapeError");
        let err = resolve(dir.path(), "link/new.txt").expect_err("escape via new file");
        assert_eq!(err.kind(), "PathEscapeError");
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_rejected() {
        let dir = workspace();
        std::os::unix::fs::symlink("/nonexistent/codemcp/target", dir.path().join("dangling"))
            .expect("symlink");
        assert!(resolve(dir.path(), "dangling").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_inside_root_allowed() {
        let dir = workspace();
        std::os::unix::fs::symlink(dir.path().join("src"), dir.path().join("alias")).expect("symlink");
        let root = dir.path().canonicalize().expect("canon");
        let resolved = resolve(dir.path(), "alias/main.rs").expect("resolve");
        assert_eq!(resolved, root.join("src/main.rs"));
    }

    #[test]
    fn test_display_relative() {
        let root = Path::new("/w");
        assert_eq!(display_relative(root, Path::new("/w/src/a.py")), "src/a.py");
        assert_eq!(display_relative(root, Path::new("/w")), ".");
    }
}
