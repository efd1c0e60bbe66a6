//! Preflight checks.
//!
//! Everything here runs before a run touches the staging area or the
//! destination. Problems with the source root, the destination or a leftover
//! staging directory are fatal; missing backup items are only reported.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{info, warn};

use crate::error::EngineError;
use crate::model::{BackupConfig, BackupItem, ItemKind, StaleStagingPolicy};

const WRITE_MARKER: &str = ".cfgbackup_write_check";

/// Presence of one configured item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemPresence {
    pub item: BackupItem,
    pub present: bool,
}

/// Run every preflight check in order.
///
/// # Errors
/// Returns the first precondition violation found.
pub fn run_preflight(config: &BackupConfig) -> Result<Vec<ItemPresence>, EngineError> {
    check_source_root(&config.source_root)?;
    check_destination(&config.destination)?;
    resolve_stale_staging(&config.staging_dir, config.stale_staging)?;
    Ok(check_items(config))
}

/// The source root must be an existing directory.
pub fn check_source_root(root: &Path) -> Result<(), EngineError> {
    match fs::metadata(root) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(EngineError::InvalidPath {
            path: root.to_path_buf(),
            reason: "Source root must be a directory".to_string(),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(EngineError::SourceNotFound {
            path: root.to_path_buf(),
        }),
        Err(e) => Err(EngineError::SourceAccessDenied {
            path: root.to_path_buf(),
            source: e,
        }),
    }
}

/// The destination must be an existing, writable directory.
///
/// Writability is proven by creating and removing a marker file.
pub fn check_destination(destination: &Path) -> Result<(), EngineError> {
    match fs::metadata(destination) {
        Ok(metadata) if metadata.is_dir() => {}
        Ok(_) => {
            return Err(EngineError::InvalidPath {
                path: destination.to_path_buf(),
                reason: "Destination must be a directory".to_string(),
            })
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(EngineError::DestinationNotFound {
                path: destination.to_path_buf(),
            })
        }
        Err(e) => {
            return Err(EngineError::DestinationNotWritable {
                path: destination.to_path_buf(),
                source: e,
            })
        }
    }

    let marker = destination.join(WRITE_MARKER);
    fs::write(&marker, b"").map_err(|e| EngineError::DestinationNotWritable {
        path: destination.to_path_buf(),
        source: e,
    })?;
    if let Err(e) = fs::remove_file(&marker) {
        warn!("Could not remove {}: {}", marker.display(), e);
    }
    Ok(())
}

/// Deal with a staging directory left behind by a crashed run.
pub fn resolve_stale_staging(staging_dir: &Path, policy: StaleStagingPolicy) -> Result<(), EngineError> {
    if !staging_dir.exists() {
        return Ok(());
    }

    match policy {
        StaleStagingPolicy::Abort => Err(EngineError::StagingDirExists {
            path: staging_dir.to_path_buf(),
        }),
        StaleStagingPolicy::Remove => {
            info!("{} was not cleaned last run, deleting.", staging_dir.display());
            let removed = if staging_dir.is_dir() {
                fs::remove_dir_all(staging_dir)
            } else {
                fs::remove_file(staging_dir)
            };
            removed.map_err(|e| EngineError::StagingCleanupFailed {
                path: staging_dir.to_path_buf(),
                source: e,
            })
        }
    }
}

/// Log whether each configured item exists. Never fails.
pub fn check_items(config: &BackupConfig) -> Vec<ItemPresence> {
    config
        .items()
        .map(|item| {
            let path = config.source_path(&item);
            let present = match item.kind {
                ItemKind::File | ItemKind::Extra => path.is_file(),
                ItemKind::Folder => path.is_dir(),
            };
            if present {
                info!("{} exists.", path.display());
            } else {
                warn!("{} does not exist.", path.display());
            }
            ItemPresence { item, present }
        })
        .collect()
}
