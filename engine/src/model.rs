//! Core data model for backup runs.
//!
//! This module defines the main data structures:
//! - BackupConfig: the immutable configuration snapshot shared by every stage
//! - BackupRun: one invocation of the pipeline and its outcomes
//! - BackupItem / ItemRecord: a configured file or folder and what happened to it
//! - ArchiveNaming, RetentionPolicy, StaleStagingPolicy: policy values

use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Duration, Local, LocalResult, NaiveDate, NaiveDateTime, TimeZone};
use uuid::Uuid;

use crate::notify::NotifyOutcome;
use crate::preflight::ItemPresence;
use crate::profile::Profile;
use crate::rotate::RotationReport;

/// Immutable configuration for one backup run.
///
/// Built once at start (usually from a `Profile` plus command-line overrides)
/// and passed by reference into every pipeline stage.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Deployment profile the defaults were taken from
    pub profile: Profile,

    /// Root directory of the media server's data
    pub source_root: PathBuf,

    /// Directory receiving the archives
    pub destination: PathBuf,

    /// File paths relative to `source_root`
    pub files: Vec<PathBuf>,

    /// Folder paths relative to `source_root`, copied recursively
    pub folders: Vec<PathBuf>,

    /// Additional caller-supplied files, relative to the working directory
    pub extra_files: Vec<PathBuf>,

    /// Ephemeral directory that mirrors the selected content
    pub staging_dir: PathBuf,

    /// Archive file name and internal layout
    pub naming: ArchiveNaming,

    /// Which earlier archives are deleted after a successful build
    pub retention: RetentionPolicy,

    /// What to do when a staging directory is left over from an earlier run
    pub stale_staging: StaleStagingPolicy,

    /// Command executed once rotation finished
    pub on_completion: Option<String>,
}

impl BackupConfig {
    /// Iterate every configured item in staging order: files, folders, extras.
    pub fn items(&self) -> impl Iterator<Item = BackupItem> + '_ {
        let files = self.files.iter().map(|p| BackupItem::new(ItemKind::File, p));
        let folders = self.folders.iter().map(|p| BackupItem::new(ItemKind::Folder, p));
        let extras = self.extra_files.iter().map(|p| BackupItem::new(ItemKind::Extra, p));
        files.chain(folders).chain(extras)
    }

    /// Absolute (or cwd-relative) location of an item on the source side.
    pub fn source_path(&self, item: &BackupItem) -> PathBuf {
        match item.kind {
            ItemKind::File | ItemKind::Folder => self.source_root.join(&item.path),
            ItemKind::Extra => item.path.clone(),
        }
    }

    /// Location of an item inside the staging directory.
    pub fn staging_path(&self, item: &BackupItem) -> PathBuf {
        self.staging_dir.join(item.staging_relative_path())
    }

    /// Add the profile's metadata folder to the backup set.
    pub fn include_metadata(&mut self) {
        let folder = PathBuf::from(self.profile.metadata_folder());
        if !self.folders.contains(&folder) {
            self.folders.push(folder);
        }
    }

    /// Drop the profile's device hash file from the backup set.
    pub fn exclude_device_hash(&mut self) {
        if let Some(hash) = self.profile.device_hash_file() {
            self.files.retain(|f| f != Path::new(hash));
        }
    }
}

/// Kind of configured backup item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    /// Regular file under the source root
    File,
    /// Directory under the source root, copied recursively
    Folder,
    /// Caller-supplied file resolved against the working directory
    Extra,
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemKind::File => write!(f, "file"),
            ItemKind::Folder => write!(f, "folder"),
            ItemKind::Extra => write!(f, "extra file"),
        }
    }
}

/// A single configured file or folder eligible for the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupItem {
    pub kind: ItemKind,
    pub path: PathBuf,
}

impl BackupItem {
    pub fn new(kind: ItemKind, path: impl Into<PathBuf>) -> Self {
        BackupItem {
            kind,
            path: path.into(),
        }
    }

    /// Path of this item relative to the staging root.
    ///
    /// `..` removes the preceding component and is dropped when there is
    /// nothing left to remove; root, prefix and `.` are dropped. The result
    /// always lands inside the staging directory.
    pub fn staging_relative_path(&self) -> PathBuf {
        let mut rel = PathBuf::new();
        for component in self.path.components() {
            match component {
                Component::Normal(part) => rel.push(part),
                Component::ParentDir => {
                    rel.pop();
                }
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            }
        }
        rel
    }
}

/// What happened to a configured item while staging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    /// Copied into the staging directory
    Staged,
    /// Absent from the source; skipped
    Missing,
    /// Present but (partially) failed to copy
    Failed,
}

/// Outcome of staging one configured item.
#[derive(Debug, Clone)]
pub struct ItemRecord {
    pub item: BackupItem,

    /// Resolved source location
    pub source_path: PathBuf,

    pub state: ItemState,

    /// Number of regular files copied for this item
    pub files_copied: u64,

    /// Bytes copied for this item
    pub bytes_copied: u64,

    /// OS error code of the first failure, if any
    pub error_code: Option<i32>,

    /// Human-readable error message
    pub error_message: Option<String>,
}

impl ItemRecord {
    pub fn new(item: BackupItem, source_path: PathBuf) -> Self {
        ItemRecord {
            item,
            source_path,
            state: ItemState::Missing,
            files_copied: 0,
            bytes_copied: 0,
            error_code: None,
            error_message: None,
        }
    }
}

/// Naming scheme for archive files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveNaming {
    /// File name prefix, e.g. `emby_backup`
    pub prefix: String,

    /// chrono format pattern embedded after the prefix
    pub timestamp_format: String,

    /// Folder every entry is stored under inside the archive
    pub top_level: String,
}

const ARCHIVE_EXTENSION: &str = ".zip";

impl ArchiveNaming {
    pub fn new(
        prefix: impl Into<String>,
        timestamp_format: impl Into<String>,
        top_level: impl Into<String>,
    ) -> Self {
        ArchiveNaming {
            prefix: prefix.into(),
            timestamp_format: timestamp_format.into(),
            top_level: top_level.into(),
        }
    }

    /// `<prefix>_<timestamp>.zip` for the given local time.
    pub fn file_name(&self, at: &DateTime<Local>) -> String {
        format!(
            "{}_{}{}",
            self.prefix,
            at.format(&self.timestamp_format),
            ARCHIVE_EXTENSION
        )
    }

    /// True if the name looks like one of our archives.
    pub fn matches(&self, file_name: &str) -> bool {
        self.timestamp_part(file_name).is_some()
    }

    /// Recover the time embedded in an archive name.
    ///
    /// Date-only patterns yield local midnight. Returns None for names that
    /// are not ours or don't parse against the pattern.
    pub fn parse_timestamp(&self, file_name: &str) -> Option<DateTime<Local>> {
        let stamp = self.timestamp_part(file_name)?;
        let naive = match NaiveDateTime::parse_from_str(stamp, &self.timestamp_format) {
            Ok(dt) => dt,
            Err(_) => NaiveDate::parse_from_str(stamp, &self.timestamp_format)
                .ok()?
                .and_hms_opt(0, 0, 0)?,
        };
        first_valid_instant(&naive, |dt| Local.from_local_datetime(dt))
    }

    fn timestamp_part<'a>(&self, file_name: &'a str) -> Option<&'a str> {
        file_name
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix('_')?
            .strip_suffix(ARCHIVE_EXTENSION)
    }
}

/// Earliest instant for a wall-clock time, stepping past a DST gap.
///
/// Zones that switch at midnight have no 00:00 on that day; the first hour
/// after the gap is used instead.
fn first_valid_instant<T>(
    naive: &NaiveDateTime,
    resolve: impl Fn(&NaiveDateTime) -> LocalResult<T>,
) -> Option<T> {
    resolve(naive)
        .earliest()
        .or_else(|| resolve(&(*naive + Duration::hours(1))).earliest())
}

/// Rule deciding which earlier archives are deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Delete archives whose embedded date is more than N whole days old
    MaxAgeDays(u32),
    /// Keep only the newest N archives
    MaxCount(usize),
}

impl std::fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetentionPolicy::MaxAgeDays(days) => write!(f, "{} days", days),
            RetentionPolicy::MaxCount(count) => write!(f, "{} iterations", count),
        }
    }
}

/// Behavior when a staging directory already exists at the start of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleStagingPolicy {
    /// Delete the leftover directory and continue
    Remove,
    /// Refuse to run until it is removed manually
    Abort,
}

/// The state of a backup run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Created, not yet started
    Pending,
    /// Currently executing
    Running,
    /// All stages finished (items may still have failed)
    Completed,
}

/// The archive produced by a run.
#[derive(Debug, Clone)]
pub struct ArchiveRecord {
    pub path: PathBuf,

    /// Number of file entries written
    pub entries: u64,

    /// Size of the finished archive on disk
    pub size_bytes: u64,
}

/// One invocation of the backup pipeline.
#[derive(Debug)]
pub struct BackupRun {
    /// Unique identifier for this run, used to correlate log lines
    pub id: Uuid,

    pub state: RunState,

    /// Which configured items existed when preflight ran
    pub presence: Vec<ItemPresence>,

    /// Outcome per configured item
    pub items: Vec<ItemRecord>,

    /// Archive written by this run
    pub archive: Option<ArchiveRecord>,

    /// Result of the retention pass
    pub rotation: Option<RotationReport>,

    /// Result of the completion hook, if one was configured
    pub completion: Option<NotifyOutcome>,

    pub created_at: SystemTime,
    pub start_time: Option<SystemTime>,
    pub end_time: Option<SystemTime>,
}

impl BackupRun {
    /// Count of items in the given state.
    pub fn count(&self, state: ItemState) -> usize {
        self.items.iter().filter(|r| r.state == state).count()
    }
}
