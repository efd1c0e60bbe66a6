//! Per-deployment defaults.
//!
//! Each supported media server keeps its configuration in a slightly different
//! layout and was historically backed up with its own naming and retention
//! conventions. A `Profile` captures those differences so a single pipeline can
//! serve all of them.

use std::path::{Path, PathBuf};

use crate::model::{ArchiveNaming, BackupConfig, RetentionPolicy, StaleStagingPolicy};

/// Supported media servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Emby,
    Jellyfin,
}

/// How a profile interprets the retention number when no override is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionMode {
    /// Retention value is a number of days
    Age,
    /// Retention value is a number of archives
    Count,
}

impl RetentionMode {
    pub fn policy(self, keep: u32) -> RetentionPolicy {
        match self {
            RetentionMode::Age => RetentionPolicy::MaxAgeDays(keep),
            RetentionMode::Count => RetentionPolicy::MaxCount(keep as usize),
        }
    }
}

impl Profile {
    pub fn name(self) -> &'static str {
        match self {
            Profile::Emby => "Emby",
            Profile::Jellyfin => "Jellyfin",
        }
    }

    pub fn default_source_root(self) -> &'static str {
        match self {
            Profile::Emby => "/var/lib/emby",
            Profile::Jellyfin => "/volume1/docker/jellyfin",
        }
    }

    /// Database and config files, relative to the source root.
    pub fn files(self) -> &'static [&'static str] {
        match self {
            Profile::Emby => &[
                "data/displaypreferences.db",
                "data/users.db",
                "data/library.db",
            ],
            Profile::Jellyfin => &[
                "data/jellyfin.db",
                "data/library.db",
                "data/splashscreen.png",
            ],
        }
    }

    /// Folders copied recursively, relative to the source root.
    pub fn folders(self) -> &'static [&'static str] {
        match self {
            Profile::Emby => &["config", "plugins", "data/collections", "data/playlists"],
            Profile::Jellyfin => &[
                "config",
                "plugins",
                "data/subtitles",
                "data/collections",
                "data/playlists",
            ],
        }
    }

    /// Opt-in folder holding downloaded artwork and NFO data.
    pub fn metadata_folder(self) -> &'static str {
        "metadata"
    }

    /// Per-machine identity file; included unless explicitly excluded.
    pub fn device_hash_file(self) -> Option<&'static str> {
        match self {
            Profile::Emby => None,
            Profile::Jellyfin => Some("data/device.txt"),
        }
    }

    pub fn naming(self) -> ArchiveNaming {
        match self {
            Profile::Emby => ArchiveNaming::new("emby_backup", "%Y_%m_%d", "emby"),
            Profile::Jellyfin => {
                ArchiveNaming::new("jellyfin_config_backup", "%Y-%m-%d_%H%M", "jellyfin")
            }
        }
    }

    pub fn retention_mode(self) -> RetentionMode {
        match self {
            Profile::Emby => RetentionMode::Age,
            Profile::Jellyfin => RetentionMode::Count,
        }
    }

    pub fn stale_staging(self) -> StaleStagingPolicy {
        match self {
            Profile::Emby => StaleStagingPolicy::Abort,
            Profile::Jellyfin => StaleStagingPolicy::Remove,
        }
    }

    pub fn staging_dir_name(self) -> &'static str {
        match self {
            Profile::Emby => "emby_bkp_temp",
            Profile::Jellyfin => "jfcfg_bkp_temp",
        }
    }

    /// Where logs go when the caller doesn't pick a location.
    pub fn default_log_file(self) -> Option<&'static str> {
        match self {
            Profile::Emby => None,
            Profile::Jellyfin => Some("/var/log/jellyfin_config_backup.log"),
        }
    }

    /// Build a configuration with this profile's defaults.
    ///
    /// The staging directory defaults to the system temp dir; callers can
    /// overwrite any field before handing the config to a run.
    pub fn config(self, source_root: &Path, destination: &Path, keep: u32) -> BackupConfig {
        let mut files: Vec<PathBuf> = self.files().iter().map(PathBuf::from).collect();
        if let Some(hash) = self.device_hash_file() {
            files.push(PathBuf::from(hash));
        }

        BackupConfig {
            profile: self,
            source_root: source_root.to_path_buf(),
            destination: destination.to_path_buf(),
            files,
            folders: self.folders().iter().map(PathBuf::from).collect(),
            extra_files: Vec::new(),
            staging_dir: std::env::temp_dir().join(self.staging_dir_name()),
            naming: self.naming(),
            retention: self.retention_mode().policy(keep),
            stale_staging: self.stale_staging(),
            on_completion: None,
        }
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
