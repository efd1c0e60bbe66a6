//! Archive builder.
//!
//! Copies every present backup item into a fresh staging directory, zips the
//! staging tree under a constant top-level folder, then removes the staging
//! directory again. Missing items are skipped and failed copies are recorded
//! per item; only problems with the staging directory itself or with the zip
//! writer abort the build.

use std::fs;
use std::io;
use std::path::{Component, Path};

use chrono::{DateTime, Local};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::EngineError;
use crate::fs_ops;
use crate::model::{ArchiveRecord, BackupConfig, BackupItem, ItemKind, ItemRecord, ItemState};

/// Result of a successful build.
#[derive(Debug)]
pub struct BuildReport {
    pub items: Vec<ItemRecord>,
    pub archive: ArchiveRecord,
}

/// Stage every configured item, write the archive and clean up.
///
/// `on_item` is called once per configured item as soon as its record is
/// final.
///
/// # Errors
/// `StagingDirExists` if the staging directory is present (preflight must run
/// first), `DirectoryCreationFailed` if it cannot be created, `ArchiveWrite`
/// if the zip writer fails. The staging directory is removed in every case
/// once it was created by this call.
pub fn build_archive(
    config: &BackupConfig,
    now: &DateTime<Local>,
    mut on_item: impl FnMut(&ItemRecord),
) -> Result<BuildReport, EngineError> {
    info!("Creating archive...");
    create_staging_dir(&config.staging_dir)?;

    let mut items = Vec::new();
    for item in config.items() {
        let record = stage_item(config, item);
        on_item(&record);
        items.push(record);
    }

    let archive_path = config.destination.join(config.naming.file_name(now));
    let written = write_archive(&config.staging_dir, &config.naming.top_level, &archive_path);

    info!("Cleaning up...");
    remove_staging_dir(&config.staging_dir);

    match written {
        Ok(archive) => {
            info!("Archive created at {}", archive.path.display());
            Ok(BuildReport { items, archive })
        }
        Err(e) => {
            if let Err(rm) = fs::remove_file(&archive_path) {
                if rm.kind() != io::ErrorKind::NotFound {
                    warn!("Could not remove partial archive {}: {}", archive_path.display(), rm);
                }
            }
            Err(e)
        }
    }
}

/// Create the staging directory, which must not exist yet.
pub fn create_staging_dir(path: &Path) -> Result<(), EngineError> {
    fs_ops::ensure_parent_dir_exists(path)?;
    fs::create_dir(path).map_err(|e| {
        if e.kind() == io::ErrorKind::AlreadyExists {
            EngineError::StagingDirExists {
                path: path.to_path_buf(),
            }
        } else {
            EngineError::DirectoryCreationFailed {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })
}

/// Copy one item into the staging directory and describe the outcome.
pub fn stage_item(config: &BackupConfig, item: BackupItem) -> ItemRecord {
    let source = config.source_path(&item);
    let target = config.staging_path(&item);
    let mut record = ItemRecord::new(item, source.clone());

    match record.item.kind {
        ItemKind::File | ItemKind::Extra => {
            if !source.is_file() {
                return record;
            }
            if fs::symlink_metadata(&target).is_ok() {
                let e = EngineError::InvalidPath {
                    path: target,
                    reason: "already staged by an earlier item".to_string(),
                };
                error!("Could not stage {}: {}", source.display(), e);
                record.state = ItemState::Failed;
                record.error_message = Some(e.to_string());
                return record;
            }
            match fs_ops::copy_file_with_metadata(&source, &target) {
                Ok(bytes) => {
                    record.state = ItemState::Staged;
                    record.files_copied = 1;
                    record.bytes_copied = bytes;
                }
                Err(e) => {
                    error!("Could not stage {}: {}", source.display(), e);
                    record.state = ItemState::Failed;
                    record.error_code = e.raw_os_error();
                    record.error_message = Some(e.to_string());
                }
            }
        }
        ItemKind::Folder => {
            if !source.is_dir() {
                return record;
            }
            match fs_ops::copy_tree(&source, &target) {
                Ok(report) => {
                    record.files_copied = report.files_copied;
                    record.bytes_copied = report.bytes_copied;
                    for (path, e) in &report.failures {
                        error!("Could not stage {}: {}", path.display(), e);
                    }
                    match report.failures.first() {
                        None => record.state = ItemState::Staged,
                        Some((_, first)) => {
                            record.state = ItemState::Failed;
                            record.error_code = first.raw_os_error();
                            record.error_message = Some(format!(
                                "{} of {} files failed, first: {}",
                                report.failures.len(),
                                report.failures.len() as u64 + report.files_copied,
                                first
                            ));
                        }
                    }
                }
                Err(e) => {
                    error!("Could not stage {}: {}", source.display(), e);
                    record.state = ItemState::Failed;
                    record.error_code = e.raw_os_error();
                    record.error_message = Some(e.to_string());
                }
            }
        }
    }

    record
}

/// Zip every regular file below `staging_dir` into `archive_path`.
///
/// Entries are named `<top_level>/<path relative to staging_dir>`, so the
/// staging directory's own name never shows up in the archive.
pub fn write_archive(
    staging_dir: &Path,
    top_level: &str,
    archive_path: &Path,
) -> Result<ArchiveRecord, EngineError> {
    let archive_err = |message: String| EngineError::ArchiveWrite {
        path: archive_path.to_path_buf(),
        message,
    };

    let file = fs::File::create(archive_path).map_err(|e| EngineError::WriteError {
        path: archive_path.to_path_buf(),
        source: e,
    })?;
    let mut zip = ZipWriter::new(file);
    let base_options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut entries = 0u64;

    for entry in WalkDir::new(staging_dir).min_depth(1).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                error!("Could not read staging entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = match entry.path().strip_prefix(staging_dir) {
            Ok(rel) => rel,
            Err(_) => continue,
        };

        let mut src = match fs::File::open(entry.path()) {
            Ok(src) => src,
            Err(e) => {
                error!("Skipping {} in archive: {}", entry.path().display(), e);
                continue;
            }
        };

        let mut options = base_options;
        if let Ok(meta) = src.metadata() {
            options = options.large_file(meta.len() >= u32::MAX as u64);
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                options = options.unix_permissions(meta.permissions().mode());
            }
        }

        let name = entry_name(top_level, rel);
        debug!("Adding {}", name);
        zip.start_file(name, options)
            .map_err(|e| archive_err(e.to_string()))?;
        io::copy(&mut src, &mut zip).map_err(|e| archive_err(e.to_string()))?;
        entries += 1;
    }

    zip.finish().map_err(|e| archive_err(e.to_string()))?;

    let size_bytes = fs::metadata(archive_path).map(|m| m.len()).unwrap_or(0);
    Ok(ArchiveRecord {
        path: archive_path.to_path_buf(),
        entries,
        size_bytes,
    })
}

/// Remove the staging directory; failures are logged only.
pub fn remove_staging_dir(path: &Path) {
    if let Err(e) = fs::remove_dir_all(path) {
        error!("Could not remove staging directory {}: {}", path.display(), e);
    }
}

/// Archive entry name with forward slashes regardless of platform.
fn entry_name(top_level: &str, rel: &Path) -> String {
    let mut parts: Vec<String> = vec![top_level.to_string()];
    parts.extend(rel.components().filter_map(|c| match c {
        Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
        _ => None,
    }));
    parts.join("/")
}
