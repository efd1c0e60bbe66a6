//! Error types for the backup engine.
//!
//! The primary error type is `EngineError`, which represents run-level errors
//! that prevent a backup from being produced. Per-item problems (a missing
//! file, a copy that failed, an archive that could not be deleted) are recorded
//! in `ItemRecord` and `RotationReport`, not as EngineError.

use std::error::Error;
use std::fmt::{self, Display};
use std::io;
use std::path::PathBuf;

/// Errors that abort a backup run.
///
/// Everything here is either a precondition violation detected before any
/// state is mutated, or a failure of the archive writer itself.
#[derive(Debug)]
pub enum EngineError {
    /// Source root does not exist
    SourceNotFound { path: PathBuf },

    /// Source root exists but cannot be inspected
    SourceAccessDenied { path: PathBuf, source: io::Error },

    /// Destination directory does not exist
    DestinationNotFound { path: PathBuf },

    /// Destination directory exists but archives cannot be written to it
    DestinationNotWritable { path: PathBuf, source: io::Error },

    /// A staging directory from an earlier run is still present
    StagingDirExists { path: PathBuf },

    /// A stale staging directory could not be removed
    StagingCleanupFailed { path: PathBuf, source: io::Error },

    /// Failed to create a directory
    DirectoryCreationFailed { path: PathBuf, source: io::Error },

    /// Failed to read from a source file
    ReadError { path: PathBuf, source: io::Error },

    /// Failed to write a staged file
    WriteError { path: PathBuf, source: io::Error },

    /// Failed to enumerate a directory
    EnumerationFailed { path: PathBuf, source: io::Error },

    /// The zip writer failed while producing the archive
    ArchiveWrite { path: PathBuf, message: String },

    /// Path is not usable for the requested operation
    InvalidPath { path: PathBuf, reason: String },

    /// Catch-all for unexpected errors
    Unknown { message: String },
}

impl Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceNotFound { path } => {
                write!(f, "Source root not found: {}", path.display())
            }
            Self::SourceAccessDenied { path, source } => {
                write!(f, "Source root not accessible: {} ({})", path.display(), source)
            }
            Self::DestinationNotFound { path } => {
                write!(f, "Destination directory not found: {}", path.display())
            }
            Self::DestinationNotWritable { path, source } => {
                write!(f, "Destination directory not writable: {} ({})", path.display(), source)
            }
            Self::StagingDirExists { path } => {
                write!(
                    f,
                    "{} was not cleaned last run, please remove manually",
                    path.display()
                )
            }
            Self::StagingCleanupFailed { path, source } => {
                write!(f, "Failed to remove stale staging directory {}: {}", path.display(), source)
            }
            Self::DirectoryCreationFailed { path, source } => {
                write!(f, "Failed to create directory {}: {}", path.display(), source)
            }
            Self::ReadError { path, source } => {
                write!(f, "Failed to read {}: {}", path.display(), source)
            }
            Self::WriteError { path, source } => {
                write!(f, "Failed to write {}: {}", path.display(), source)
            }
            Self::EnumerationFailed { path, source } => {
                write!(f, "Failed to enumerate {}: {}", path.display(), source)
            }
            Self::ArchiveWrite { path, message } => {
                write!(f, "Failed to write archive {}: {}", path.display(), message)
            }
            Self::InvalidPath { path, reason } => {
                write!(f, "Invalid path: {} ({})", path.display(), reason)
            }
            Self::Unknown { message } => {
                write!(f, "Engine error: {}", message)
            }
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::SourceAccessDenied { source, .. }
            | Self::DestinationNotWritable { source, .. }
            | Self::StagingCleanupFailed { source, .. }
            | Self::DirectoryCreationFailed { source, .. }
            | Self::ReadError { source, .. }
            | Self::WriteError { source, .. }
            | Self::EnumerationFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl EngineError {
    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::SourceAccessDenied { source, .. }
            | Self::DestinationNotWritable { source, .. }
            | Self::StagingCleanupFailed { source, .. }
            | Self::DirectoryCreationFailed { source, .. }
            | Self::ReadError { source, .. }
            | Self::WriteError { source, .. }
            | Self::EnumerationFailed { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    /// True for the precondition failures that are detected before a run
    /// touches the staging area or the destination.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::SourceNotFound { .. }
                | Self::SourceAccessDenied { .. }
                | Self::DestinationNotFound { .. }
                | Self::DestinationNotWritable { .. }
                | Self::StagingDirExists { .. }
                | Self::StagingCleanupFailed { .. }
                | Self::InvalidPath { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_message_names_directory() {
        let err = EngineError::StagingDirExists {
            path: PathBuf::from("/tmp/emby_bkp_temp"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/tmp/emby_bkp_temp"));
        assert!(err.is_precondition());
    }

    #[test]
    fn test_raw_os_error_passthrough() {
        let err = EngineError::ReadError {
            path: PathBuf::from("a"),
            source: io::Error::from_raw_os_error(13),
        };
        assert_eq!(err.raw_os_error(), Some(13));
        assert!(!err.is_precondition());
        assert!(err.source().is_some());
    }
}
