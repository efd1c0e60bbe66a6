//! # cfgbackup engine
//!
//! Backs up a media server's configuration (Emby, Jellyfin) into timestamped
//! zip archives and rotates old archives away.
//!
//! ## Overview
//!
//! A run is a strictly sequential pipeline:
//! - Preflight: validate source root and destination, resolve a leftover
//!   staging directory, report which configured items exist
//! - Build: copy present items into a staging directory, zip it under a
//!   constant top-level folder, remove the staging directory
//! - Rotate: delete archives outside the retention policy (age or count)
//! - Notify: optionally run a completion command
//!
//! Per-item problems never abort a run; they are recorded on the run and
//! logged through `tracing`.
//!
//! ## Basic Usage
//!
//! ```no_run
//! use std::path::Path;
//! use engine::{create_run, run_backup, Profile};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = Profile::Jellyfin.config(
//!     Path::new("/volume1/docker/jellyfin"),
//!     Path::new("/volume1/backups"),
//!     5,
//! );
//! config.include_metadata();
//!
//! let mut run = create_run(&config)?;
//! run_backup(&mut run, &config, None)?;
//!
//! if let Some(archive) = &run.archive {
//!     println!("Wrote {}", archive.path.display());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: configuration snapshot, run record, naming and policies
//! - **profile**: per-media-server defaults
//! - **error**: run-level error type
//! - **fs_ops**: file and tree copies with metadata preservation
//! - **preflight**: precondition checks and item presence report
//! - **archive**: staging and zip writing
//! - **rotate**: retention policy enforcement
//! - **notify**: completion command
//! - **job**: run orchestration
//! - **progress**: progress callback trait

pub mod archive;
pub mod error;
pub mod fs_ops;
pub mod job;
pub mod model;
pub mod notify;
pub mod preflight;
pub mod profile;
pub mod progress;
pub mod rotate;

pub use error::EngineError;
pub use job::{create_run, run_backup};
pub use model::{
    ArchiveNaming, ArchiveRecord, BackupConfig, BackupItem, BackupRun, ItemKind, ItemRecord,
    ItemState, RetentionPolicy, RunState, StaleStagingPolicy,
};
pub use notify::NotifyOutcome;
pub use preflight::ItemPresence;
pub use profile::{Profile, RetentionMode};
pub use progress::ProgressCallback;
pub use rotate::{format_size, RotationReport};
