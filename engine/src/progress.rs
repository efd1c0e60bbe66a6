//! Progress reporting trait.
//!
//! Decouples the backup pipeline from whatever front end drives it. The CLI
//! implements this for console output; tests implement it to observe the order
//! of events.

use std::path::Path;

use crate::model::{ArchiveRecord, BackupRun, ItemRecord};

/// Receives progress updates from a backup run.
///
/// All methods are called synchronously from the thread executing the run.
pub trait ProgressCallback {
    /// Called after preflight succeeded, before anything is staged.
    fn on_run_started(&self, run: &BackupRun);

    /// Called once per configured item after it was staged, skipped or failed.
    fn on_item_completed(&self, run: &BackupRun, record: &ItemRecord);

    /// Called when the archive has been closed.
    fn on_archive_written(&self, run: &BackupRun, archive: &ArchiveRecord);

    /// Called for every old archive the retention pass removed.
    fn on_archive_deleted(&self, path: &Path);

    /// Called when every stage has finished.
    fn on_run_completed(&self, run: &BackupRun);
}
