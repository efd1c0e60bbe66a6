//! Retention rotation.
//!
//! Deletes earlier archives that fall outside the retention policy. Only
//! files whose name matches the archive naming scheme are considered, so
//! anything else in the destination directory is left alone.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};
use tracing::{error, info, warn};

use crate::error::EngineError;
use crate::fs_ops;
use crate::model::{ArchiveNaming, RetentionPolicy};

/// Outcome of a rotation pass.
#[derive(Debug, Clone, Default)]
pub struct RotationReport {
    /// Archives removed
    pub deleted: Vec<PathBuf>,

    /// Archives that should have been removed but could not be
    pub failed: Vec<(PathBuf, String)>,

    /// Matching names whose timestamp did not parse (age mode only)
    pub unparsable: Vec<PathBuf>,

    /// Matching archives left after the pass
    pub remaining: usize,

    /// Combined size of the remaining archives
    pub remaining_bytes: u64,

    /// Set when the destination could not be listed; the pass stopped there
    pub listing_error: Option<String>,
}

impl RotationReport {
    /// e.g. `2.0KiB of backups in 2 files`
    pub fn summary(&self) -> String {
        let suffix = if self.remaining == 1 { "" } else { "s" };
        format!(
            "{} of backups in {} file{}",
            format_size(self.remaining_bytes),
            self.remaining,
            suffix
        )
    }
}

/// Apply `policy` to the archives in `destination`.
///
/// Never fails: deletion errors and listing errors are logged and recorded
/// on the report, and whatever was deleted before a listing error stays
/// reported.
pub fn rotate(
    destination: &Path,
    naming: &ArchiveNaming,
    policy: RetentionPolicy,
    now: &DateTime<Local>,
) -> RotationReport {
    rotate_with(destination, naming, policy, now, |path| fs::remove_file(path))
}

/// `rotate` with a caller-supplied delete operation.
pub fn rotate_with(
    destination: &Path,
    naming: &ArchiveNaming,
    policy: RetentionPolicy,
    now: &DateTime<Local>,
    mut remove: impl FnMut(&Path) -> io::Result<()>,
) -> RotationReport {
    info!("Checking backups for rotation ({})", policy);
    let mut report = RotationReport::default();

    match policy {
        RetentionPolicy::MaxAgeDays(days) => {
            let archives = match list_archives(destination, naming) {
                Ok(archives) => archives,
                Err(e) => return listing_failed(report, e),
            };
            for path in archives {
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let Some(stamp) = naming.parse_timestamp(name) else {
                    warn!("Skipping {}, name does not carry a valid date", path.display());
                    report.unparsable.push(path);
                    continue;
                };
                let age = now.signed_duration_since(stamp).num_days();
                if age > i64::from(days) {
                    info!("Deleting {}, {} days old.", path.display(), age);
                    delete(&path, &mut remove, &mut report);
                }
            }
        }
        RetentionPolicy::MaxCount(count) => {
            let keep = if count == 0 {
                warn!("Retention count of 0 would delete every backup, keeping 1 instead");
                1
            } else {
                count
            };

            let mut undeletable: HashSet<PathBuf> = HashSet::new();
            loop {
                let archives = match list_archives(destination, naming) {
                    Ok(archives) => archives,
                    Err(e) => return listing_failed(report, e),
                };
                if archives.len() <= keep {
                    break;
                }
                let oldest = archives
                    .into_iter()
                    .filter(|p| !undeletable.contains(p))
                    .filter_map(|p| created_at(&p).map(|t| (t, p)))
                    .min_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

                let Some((_, path)) = oldest else {
                    warn!("No deletable backups left, {} kept over the limit", keep);
                    break;
                };
                if !delete(&path, &mut remove, &mut report) {
                    undeletable.insert(path);
                }
            }
        }
    }

    let remaining = match list_archives(destination, naming) {
        Ok(remaining) => remaining,
        Err(e) => return listing_failed(report, e),
    };
    report.remaining = remaining.len();
    report.remaining_bytes = fs_ops::total_size(&remaining);
    info!("{}", report.summary());

    report
}

fn listing_failed(mut report: RotationReport, e: EngineError) -> RotationReport {
    error!("Rotation stopped: {}", e);
    report.listing_error = Some(e.to_string());
    report
}

fn delete(
    path: &Path,
    remove: &mut impl FnMut(&Path) -> io::Result<()>,
    report: &mut RotationReport,
) -> bool {
    match remove(path) {
        Ok(()) => {
            info!("{} deleted.", path.display());
            report.deleted.push(path.to_path_buf());
            true
        }
        Err(e) => {
            error!("Could not delete {}: {}", path.display(), e);
            report.failed.push((path.to_path_buf(), e.to_string()));
            false
        }
    }
}

/// Every entry in `destination` whose name matches `naming`, sorted by name.
pub fn list_archives(destination: &Path, naming: &ArchiveNaming) -> Result<Vec<PathBuf>, EngineError> {
    let entries = fs::read_dir(destination).map_err(|e| EngineError::EnumerationFailed {
        path: destination.to_path_buf(),
        source: e,
    })?;

    let mut archives: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .map_or(false, |name| naming.matches(name))
        })
        .map(|entry| entry.path())
        .collect();
    archives.sort();
    Ok(archives)
}

/// Creation time where the platform records it, modification time otherwise.
fn created_at(path: &Path) -> Option<SystemTime> {
    let meta = fs::metadata(path).ok()?;
    meta.created().or_else(|_| meta.modified()).ok()
}

/// Human-readable size with binary prefixes, e.g. `2.0KiB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["", "Ki", "Mi", "Gi", "Ti", "Pi", "Ei", "Zi"];
    let mut size = bytes as f64;
    for unit in UNITS {
        if size < 1024.0 {
            return format!("{:.1}{}B", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.1}YiB", size)
}
