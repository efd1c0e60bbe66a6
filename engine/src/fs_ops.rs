//! Filesystem operations module.
//!
//! Low-level helpers used while staging a backup:
//! - Copying single files with timestamp and permission preservation
//! - Copying whole directory trees, isolating per-file failures
//! - Creating parent directories on demand

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::EngineError;

/// Summary of a recursive copy.
#[derive(Debug, Default)]
pub struct TreeCopyReport {
    /// Regular files copied successfully
    pub files_copied: u64,

    /// Bytes copied successfully
    pub bytes_copied: u64,

    /// Files or directories that could not be copied, with the reason
    pub failures: Vec<(PathBuf, EngineError)>,
}

/// Copy a file, keeping its access/modification times and permission bits.
///
/// Intermediate directories of `dst` are created as needed.
///
/// # Returns
/// Number of bytes copied
///
/// # Errors
/// Returns EngineError if reading the source or writing the destination fails.
/// Failing to restore timestamps or permissions is logged, not returned.
pub fn copy_file_with_metadata(src: &Path, dst: &Path) -> Result<u64, EngineError> {
    ensure_parent_dir_exists(dst)?;

    let mut src_file = fs::File::open(src).map_err(|e| EngineError::ReadError {
        path: src.to_path_buf(),
        source: e,
    })?;

    let src_metadata = src_file.metadata().map_err(|e| EngineError::ReadError {
        path: src.to_path_buf(),
        source: e,
    })?;

    let mut dst_file = fs::File::create(dst).map_err(|e| EngineError::WriteError {
        path: dst.to_path_buf(),
        source: e,
    })?;

    let bytes_copied = io::copy(&mut src_file, &mut dst_file).map_err(|e| {
        if e.kind() == io::ErrorKind::PermissionDenied {
            EngineError::WriteError {
                path: dst.to_path_buf(),
                source: e,
            }
        } else {
            EngineError::ReadError {
                path: src.to_path_buf(),
                source: e,
            }
        }
    })?;
    drop(dst_file);

    if let Err(e) = fs::set_permissions(dst, src_metadata.permissions()) {
        warn!("Could not copy permissions to {}: {}", dst.display(), e);
    }

    let atime = FileTime::from_last_access_time(&src_metadata);
    let mtime = FileTime::from_last_modification_time(&src_metadata);
    if let Err(e) = filetime::set_file_times(dst, atime, mtime) {
        warn!("Could not copy timestamps to {}: {}", dst.display(), e);
    }

    Ok(bytes_copied)
}

/// Recursively copy `src` into `dst`.
///
/// `dst` must not exist yet; it is created along with its parents. A file that
/// fails to copy is recorded in the report and the walk continues. Only a
/// failure to create `dst` itself aborts the copy.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<TreeCopyReport, EngineError> {
    fs::create_dir_all(dst).map_err(|e| EngineError::DirectoryCreationFailed {
        path: dst.to_path_buf(),
        source: e,
    })?;

    let mut report = TreeCopyReport::default();

    for entry in WalkDir::new(src).min_depth(1).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().unwrap_or(src).to_path_buf();
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "filesystem loop"));
                report
                    .failures
                    .push((path.clone(), EngineError::EnumerationFailed { path, source }));
                continue;
            }
        };

        let rel = match entry.path().strip_prefix(src) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let target = dst.join(rel);

        if entry.file_type().is_dir() {
            if let Err(e) = fs::create_dir_all(&target) {
                report.failures.push((
                    entry.path().to_path_buf(),
                    EngineError::DirectoryCreationFailed {
                        path: target,
                        source: e,
                    },
                ));
            }
        } else if entry.file_type().is_file() {
            match copy_file_with_metadata(entry.path(), &target) {
                Ok(bytes) => {
                    report.files_copied += 1;
                    report.bytes_copied += bytes;
                }
                Err(e) => report.failures.push((entry.path().to_path_buf(), e)),
            }
        } else {
            debug!("Skipping special file {}", entry.path().display());
        }
    }

    Ok(report)
}

/// Ensure the parent directory of a path exists, creating it if necessary.
///
/// # Errors
/// Returns EngineError if the parent exists as a non-directory or cannot be
/// created.
pub fn ensure_parent_dir_exists(path: &Path) -> Result<(), EngineError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => return Ok(()),
    };

    match fs::metadata(parent) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(EngineError::DirectoryCreationFailed {
            path: parent.to_path_buf(),
            source: io::Error::new(
                io::ErrorKind::InvalidInput,
                "Parent path exists but is not a directory",
            ),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(parent).map_err(|e| EngineError::DirectoryCreationFailed {
                path: parent.to_path_buf(),
                source: e,
            })
        }
        Err(e) => Err(EngineError::DirectoryCreationFailed {
            path: parent.to_path_buf(),
            source: e,
        }),
    }
}

/// Total size of the regular files directly inside `paths`.
pub fn total_size<'a>(paths: impl IntoIterator<Item = &'a PathBuf>) -> u64 {
    paths
        .into_iter()
        .filter_map(|p| fs::metadata(p).ok())
        .map(|m| m.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_copy_file_with_metadata() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src_file = temp_dir.path().join("source.db");
        let dst_file = temp_dir.path().join("nested").join("dir").join("dest.db");

        let mut file = fs::File::create(&src_file).expect("Failed to create source");
        file.write_all(b"test content").expect("Failed to write source");
        drop(file);

        let old = FileTime::from_unix_time(1_500_000_000, 0);
        filetime::set_file_mtime(&src_file, old).expect("Failed to set mtime");

        let bytes = copy_file_with_metadata(&src_file, &dst_file).expect("Failed to copy");
        assert_eq!(bytes, 12);

        let content = fs::read_to_string(&dst_file).expect("Failed to read dest");
        assert_eq!(content, "test content");

        let meta = fs::metadata(&dst_file).expect("Failed to stat dest");
        assert_eq!(FileTime::from_last_modification_time(&meta), old);
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_file_keeps_permission_bits() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src_file = temp_dir.path().join("run.sh");
        let dst_file = temp_dir.path().join("copy.sh");
        fs::write(&src_file, "#!/bin/sh\n").expect("Failed to write source");
        fs::set_permissions(&src_file, fs::Permissions::from_mode(0o750))
            .expect("Failed to chmod");

        copy_file_with_metadata(&src_file, &dst_file).expect("Failed to copy");

        let mode = fs::metadata(&dst_file).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o750);
    }

    #[test]
    fn test_copy_missing_file_is_read_error() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let result = copy_file_with_metadata(
            &temp_dir.path().join("absent"),
            &temp_dir.path().join("out"),
        );
        assert!(matches!(result, Err(EngineError::ReadError { .. })));
    }

    #[test]
    fn test_copy_tree_nested() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("plugins");
        fs::create_dir_all(src.join("a").join("b")).expect("Failed to create tree");
        fs::create_dir_all(src.join("empty")).expect("Failed to create empty dir");
        fs::write(src.join("top.dll"), b"12345").unwrap();
        fs::write(src.join("a").join("b").join("deep.xml"), b"<x/>").unwrap();

        let dst = temp_dir.path().join("staging").join("plugins");
        let report = copy_tree(&src, &dst).expect("Failed to copy tree");

        assert_eq!(report.files_copied, 2);
        assert_eq!(report.bytes_copied, 9);
        assert!(report.failures.is_empty());
        assert_eq!(fs::read(dst.join("a/b/deep.xml")).unwrap(), b"<x/>");
        assert!(dst.join("empty").is_dir());
    }

    #[test]
    fn test_ensure_parent_dir_exists() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("subdir").join("file.txt");

        ensure_parent_dir_exists(&path).expect("Failed to create parent");
        assert!(path.parent().unwrap().is_dir());
    }

    #[test]
    fn test_ensure_parent_rejects_file_parent() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, b"").unwrap();

        let result = ensure_parent_dir_exists(&blocker.join("child"));
        assert!(matches!(result, Err(EngineError::DirectoryCreationFailed { .. })));
    }
}
