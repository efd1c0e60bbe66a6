//! Logging setup.
//!
//! Console output always goes to stderr. When a log file is configured, a
//! second layer writes plain-text lines to it, rolling the file over once it
//! grows past a size limit and keeping a fixed number of old generations
//! (`backup.log.1`, `backup.log.2`, ...).

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::warn;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Roll the log file over past this size.
pub const MAX_LOG_BYTES: u64 = 3 * 1024 * 1024;

/// Rolled-over generations kept next to the live file.
pub const LOG_BACKUPS: usize = 2;

const FALLBACK_LOG_NAME: &str = "cfgbackup.log";

/// Size-limited log file shared by every writer the subscriber creates.
#[derive(Clone)]
pub struct RollingLog {
    inner: Arc<Mutex<RollingState>>,
}

struct RollingState {
    path: PathBuf,
    file: File,
    written: u64,
    max_bytes: u64,
    backups: usize,
}

impl RollingLog {
    /// Open `path` for appending, creating it if needed.
    pub fn open(path: &Path, max_bytes: u64, backups: usize) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let written = file.metadata()?.len();
        Ok(RollingLog {
            inner: Arc::new(Mutex::new(RollingState {
                path: path.to_path_buf(),
                file,
                written,
                max_bytes,
                backups,
            })),
        })
    }

    fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log lock poisoned"))?;
        if state.written > 0 && state.written + buf.len() as u64 > state.max_bytes {
            state.roll_over()?;
        }
        state.file.write_all(buf)?;
        state.written += buf.len() as u64;
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log lock poisoned"))?;
        state.file.flush()
    }
}

impl RollingState {
    fn roll_over(&mut self) -> io::Result<()> {
        self.file.flush()?;
        if self.backups == 0 {
            self.file.set_len(0)?;
            self.written = 0;
            return Ok(());
        }

        for generation in (1..self.backups).rev() {
            let from = generation_path(&self.path, generation);
            if from.exists() {
                fs::rename(&from, generation_path(&self.path, generation + 1))?;
            }
        }
        fs::rename(&self.path, generation_path(&self.path, 1))?;

        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

/// `backup.log` -> `backup.log.<n>`
fn generation_path(path: &Path, generation: usize) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".{}", generation));
    PathBuf::from(name)
}

impl<'a> MakeWriter<'a> for RollingLog {
    type Writer = RollingLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        RollingLogWriter { log: self.clone() }
    }
}

pub struct RollingLogWriter {
    log: RollingLog,
}

impl Write for RollingLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.log.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.log.flush()
    }
}

/// Decide where the log file goes.
///
/// A requested path is used when it is an existing directory (the file is
/// created inside it) or when its parent directory exists. Otherwise the
/// profile's default applies, if it has one.
pub fn select_log_file(requested: Option<&Path>, profile_default: Option<&str>) -> Option<PathBuf> {
    if let Some(requested) = requested {
        if requested.is_dir() {
            let name = profile_default
                .and_then(|d| Path::new(d).file_name())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(FALLBACK_LOG_NAME));
            return Some(requested.join(name));
        }
        let parent_ok = match requested.parent() {
            Some(parent) if parent.as_os_str().is_empty() => true,
            Some(parent) => parent.is_dir(),
            None => false,
        };
        if parent_ok {
            return Some(requested.to_path_buf());
        }
    }
    profile_default.map(PathBuf::from)
}

/// Install the global subscriber.
///
/// Returns the log file actually in use. A log file that cannot be opened is
/// reported as a warning and logging continues on the console only.
pub fn init(log_file: Option<PathBuf>) -> Option<PathBuf> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let mut open_error = None;
    let rolling = log_file.as_ref().and_then(|path| {
        match RollingLog::open(path, MAX_LOG_BYTES, LOG_BACKUPS) {
            Ok(log) => Some(log),
            Err(e) => {
                open_error = Some(format!("Cannot write log file {}: {}", path.display(), e));
                None
            }
        }
    });
    let in_use = rolling.as_ref().and(log_file);

    let file_layer = rolling.map(|log| {
        fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(log)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(file_layer)
        .init();

    if let Some(message) = open_error {
        warn!("{}, logging to console only", message);
    }
    in_use
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolls_over_past_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.log");
        let log = RollingLog::open(&path, 10, 2).unwrap();
        let mut writer = log.make_writer();

        writer.write_all(b"first-8\n").unwrap();
        writer.write_all(b"second8\n").unwrap();
        writer.write_all(b"third-8\n").unwrap();
        writer.write_all(b"fourth8\n").unwrap();
        writer.flush().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "fourth8\n");
        assert_eq!(fs::read_to_string(generation_path(&path, 1)).unwrap(), "third-8\n");
        assert_eq!(fs::read_to_string(generation_path(&path, 2)).unwrap(), "second8\n");
        assert!(!generation_path(&path, 3).exists());
    }

    #[test]
    fn test_appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.log");
        fs::write(&path, "old\n").unwrap();

        let log = RollingLog::open(&path, 1024, 2).unwrap();
        log.make_writer().write_all(b"new\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "old\nnew\n");
    }

    #[test]
    fn test_zero_backups_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.log");
        let log = RollingLog::open(&path, 4, 0).unwrap();
        let mut writer = log.make_writer();

        writer.write_all(b"abc\n").unwrap();
        writer.write_all(b"def\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "def\n");
        assert!(!generation_path(&path, 1).exists());
    }

    #[test]
    fn test_select_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let default = Some("/var/log/jellyfin_config_backup.log");

        assert_eq!(
            select_log_file(Some(dir.path()), default),
            Some(dir.path().join("jellyfin_config_backup.log"))
        );
        assert_eq!(
            select_log_file(Some(dir.path()), None),
            Some(dir.path().join("cfgbackup.log"))
        );

        let explicit = dir.path().join("mine.log");
        assert_eq!(select_log_file(Some(&explicit), default), Some(explicit));

        let bogus = dir.path().join("missing").join("x.log");
        assert_eq!(
            select_log_file(Some(&bogus), default),
            Some(PathBuf::from("/var/log/jellyfin_config_backup.log"))
        );
        assert_eq!(select_log_file(Some(&bogus), None), None);
        assert_eq!(select_log_file(None, None), None);
    }
}
