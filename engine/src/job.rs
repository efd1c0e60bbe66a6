//! Run orchestration.
//!
//! A backup run moves through four stages in order: preflight, build, rotate,
//! notify. Preflight failures abort before anything is written; everything
//! after that is best effort and recorded on the run.

use std::time::SystemTime;

use chrono::Local;
use tracing::{info, info_span};
use uuid::Uuid;

use crate::archive;
use crate::error::EngineError;
use crate::model::{BackupConfig, BackupRun, RunState};
use crate::notify;
use crate::preflight;
use crate::progress::ProgressCallback;
use crate::rotate;

/// Create a new backup run for `config`.
///
/// # Errors
/// Returns EngineError if the destination or staging path is empty.
pub fn create_run(config: &BackupConfig) -> Result<BackupRun, EngineError> {
    if config.destination.as_os_str().is_empty() {
        return Err(EngineError::InvalidPath {
            path: config.destination.clone(),
            reason: "Destination path is empty".to_string(),
        });
    }
    if config.staging_dir.as_os_str().is_empty() {
        return Err(EngineError::InvalidPath {
            path: config.staging_dir.clone(),
            reason: "Staging path is empty".to_string(),
        });
    }

    Ok(BackupRun {
        id: Uuid::new_v4(),
        state: RunState::Pending,
        presence: Vec::new(),
        items: Vec::new(),
        archive: None,
        rotation: None,
        completion: None,
        created_at: SystemTime::now(),
        start_time: None,
        end_time: None,
    })
}

/// Execute every stage of `run`.
///
/// # Errors
/// Precondition violations (source root, destination, stale staging
/// directory) and archive writer failures. Missing or failed items, rotation
/// problems and a failing completion command are recorded on the run instead.
pub fn run_backup(
    run: &mut BackupRun,
    config: &BackupConfig,
    progress: Option<&dyn ProgressCallback>,
) -> Result<(), EngineError> {
    if run.state != RunState::Pending {
        return Err(EngineError::Unknown {
            message: format!("Run must be Pending to start; current state: {:?}", run.state),
        });
    }

    let span = info_span!("backup", run_id = %run.id);
    let _enter = span.enter();

    run.presence = preflight::run_preflight(config)?;

    run.state = RunState::Running;
    run.start_time = Some(SystemTime::now());
    if let Some(callback) = progress {
        callback.on_run_started(run);
    }

    let now = Local::now();
    let report = {
        let snapshot: &BackupRun = run;
        archive::build_archive(config, &now, |record| {
            if let Some(callback) = progress {
                callback.on_item_completed(snapshot, record);
            }
        })?
    };
    run.items = report.items;
    if let Some(callback) = progress {
        callback.on_archive_written(run, &report.archive);
    }
    run.archive = Some(report.archive);

    let rotation = rotate::rotate(&config.destination, &config.naming, config.retention, &Local::now());
    if let Some(callback) = progress {
        for path in &rotation.deleted {
            callback.on_archive_deleted(path);
        }
    }
    run.rotation = Some(rotation);

    if let Some(command) = &config.on_completion {
        run.completion = Some(notify::run_completion(command));
    }

    run.state = RunState::Completed;
    run.end_time = Some(SystemTime::now());
    info!("Backup finished");
    if let Some(callback) = progress {
        callback.on_run_completed(run);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ArchiveRecord, ItemRecord, ItemState, StaleStagingPolicy};
    use crate::notify::NotifyOutcome;
    use crate::profile::Profile;
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;

    fn jellyfin_config(temp: &Path) -> BackupConfig {
        let root = temp.join("jellyfin");
        let dest = temp.join("backups");
        fs::create_dir_all(root.join("data")).unwrap();
        fs::create_dir_all(root.join("plugins/Trakt")).unwrap();
        fs::create_dir_all(&dest).unwrap();
        fs::write(root.join("data/jellyfin.db"), b"jf").unwrap();
        fs::write(root.join("data/device.txt"), b"hash").unwrap();
        fs::write(root.join("plugins/Trakt/Trakt.dll"), b"dll").unwrap();

        let mut config = Profile::Jellyfin.config(&root, &dest, 5);
        config.staging_dir = temp.join("jfcfg_bkp_temp");
        config
    }

    struct RecordingProgress {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingProgress {
        fn new() -> Self {
            RecordingProgress {
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ProgressCallback for RecordingProgress {
        fn on_run_started(&self, _run: &BackupRun) {
            self.calls.lock().unwrap().push("started".to_string());
        }

        fn on_item_completed(&self, _run: &BackupRun, record: &ItemRecord) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("item({})", record.item.path.display()));
        }

        fn on_archive_written(&self, _run: &BackupRun, _archive: &ArchiveRecord) {
            self.calls.lock().unwrap().push("archive".to_string());
        }

        fn on_archive_deleted(&self, _path: &Path) {
            self.calls.lock().unwrap().push("deleted".to_string());
        }

        fn on_run_completed(&self, _run: &BackupRun) {
            self.calls.lock().unwrap().push("completed".to_string());
        }
    }

    #[test]
    fn test_full_run_produces_archive() {
        let temp = tempfile::tempdir().unwrap();
        let config = jellyfin_config(temp.path());

        let mut run = create_run(&config).unwrap();
        run_backup(&mut run, &config, None).expect("run failed");

        assert_eq!(run.state, RunState::Completed);
        assert!(run.start_time.is_some() && run.end_time.is_some());
        let archive = run.archive.as_ref().unwrap();
        assert!(archive.path.exists());
        assert_eq!(archive.entries, 3);
        assert_eq!(run.count(ItemState::Staged), 3);
        assert_eq!(run.rotation.as_ref().unwrap().remaining, 1);
        assert!(run.completion.is_none());
        assert!(!config.staging_dir.exists());
    }

    #[test]
    fn test_progress_event_order() {
        let temp = tempfile::tempdir().unwrap();
        let mut config = jellyfin_config(temp.path());
        config.files = vec!["data/jellyfin.db".into()];
        config.folders = vec!["plugins".into()];

        let progress = RecordingProgress::new();
        let mut run = create_run(&config).unwrap();
        run_backup(&mut run, &config, Some(&progress)).unwrap();

        assert_eq!(
            progress.calls(),
            vec![
                "started",
                "item(data/jellyfin.db)",
                "item(plugins)",
                "archive",
                "completed"
            ]
        );
    }

    #[test]
    fn test_precondition_failure_leaves_no_trace() {
        let temp = tempfile::tempdir().unwrap();
        let mut config = jellyfin_config(temp.path());
        config.stale_staging = StaleStagingPolicy::Abort;
        fs::create_dir_all(&config.staging_dir).unwrap();

        let mut run = create_run(&config).unwrap();
        let result = run_backup(&mut run, &config, None);

        assert!(matches!(result, Err(EngineError::StagingDirExists { .. })));
        assert_eq!(run.state, RunState::Pending);
        assert_eq!(fs::read_dir(&config.destination).unwrap().count(), 0);
    }

    #[test]
    fn test_run_cannot_start_twice() {
        let temp = tempfile::tempdir().unwrap();
        let config = jellyfin_config(temp.path());

        let mut run = create_run(&config).unwrap();
        run_backup(&mut run, &config, None).unwrap();
        assert!(run_backup(&mut run, &config, None).is_err());
    }

    #[test]
    fn test_completion_failure_does_not_fail_run() {
        let temp = tempfile::tempdir().unwrap();
        let mut config = jellyfin_config(temp.path());
        config.on_completion = Some("definitely-not-a-real-program-4711".to_string());

        let mut run = create_run(&config).unwrap();
        run_backup(&mut run, &config, None).expect("run should succeed");

        assert!(matches!(run.completion, Some(NotifyOutcome::LaunchFailed(_))));
        assert_eq!(run.state, RunState::Completed);
    }

    #[test]
    fn test_presence_recorded_on_run() {
        let temp = tempfile::tempdir().unwrap();
        let config = jellyfin_config(temp.path());

        let mut run = create_run(&config).unwrap();
        run_backup(&mut run, &config, None).unwrap();

        assert_eq!(run.presence.len(), run.items.len());
        let present: Vec<_> = run
            .presence
            .iter()
            .filter(|p| p.present)
            .map(|p| p.item.path.clone())
            .collect();
        assert_eq!(present.len(), 3);
        assert!(present.contains(&"data/jellyfin.db".into()));
        assert!(present.contains(&"data/device.txt".into()));
        assert!(present.contains(&"plugins".into()));
    }

    /// Pulls the destination away right after the archive lands.
    struct DestinationVanishes {
        destination: std::path::PathBuf,
    }

    impl ProgressCallback for DestinationVanishes {
        fn on_run_started(&self, _run: &BackupRun) {}
        fn on_item_completed(&self, _run: &BackupRun, _record: &ItemRecord) {}
        fn on_archive_written(&self, _run: &BackupRun, _archive: &ArchiveRecord) {
            fs::remove_dir_all(&self.destination).unwrap();
        }
        fn on_archive_deleted(&self, _path: &Path) {}
        fn on_run_completed(&self, _run: &BackupRun) {}
    }

    #[test]
    fn test_rotation_listing_failure_still_notifies() {
        let temp = tempfile::tempdir().unwrap();
        let mut config = jellyfin_config(temp.path());
        config.on_completion = Some("definitely-not-a-real-program-4711".to_string());
        let progress = DestinationVanishes {
            destination: config.destination.clone(),
        };

        let mut run = create_run(&config).unwrap();
        run_backup(&mut run, &config, Some(&progress)).expect("run should succeed");

        assert_eq!(run.state, RunState::Completed);
        assert!(run.archive.is_some());
        assert!(run.rotation.as_ref().unwrap().listing_error.is_some());
        assert!(run.completion.is_some());
    }

    #[test]
    fn test_create_run_rejects_empty_destination() {
        let temp = tempfile::tempdir().unwrap();
        let mut config = jellyfin_config(temp.path());
        config.destination = "".into();
        assert!(create_run(&config).is_err());
    }
}
