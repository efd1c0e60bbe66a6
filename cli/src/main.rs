//! cfgbackup - Command-line front end for the backup engine.
//!
//! Parses arguments into a single configuration snapshot, installs logging,
//! runs the backup pipeline and reports a summary on stderr.

mod logging;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Local;
use clap::Parser;
use engine::{
    create_run, format_size, run_backup, ArchiveRecord, BackupConfig, BackupRun, ItemRecord,
    ItemState, ProgressCallback, Profile, RetentionMode, StaleStagingPolicy,
};
use tracing::info;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// cfgbackup - Media server configuration backup
#[derive(Parser, Debug)]
#[command(name = "cfgbackup")]
#[command(about = "Back up Emby or Jellyfin configuration into rotating zip archives")]
struct Args {
    /// Media server layout to back up: emby or jellyfin
    #[arg(long, value_name = "NAME", default_value = "jellyfin")]
    profile: String,

    /// Media server data path (default depends on the profile)
    #[arg(
        short = 'p',
        long,
        value_name = "PATH",
        visible_alias = "datapath",
        alias = "systempath",
        short_alias = 's'
    )]
    source: Option<PathBuf>,

    /// Destination folder for backups
    #[arg(short, long, value_name = "PATH")]
    destination: Option<PathBuf>,

    /// Days to keep archives (age rotation) or number of archives to keep (count rotation)
    #[arg(short, long, value_name = "N", default_value_t = 5)]
    keep: u32,

    /// Rotation mode: age or count (default depends on the profile)
    #[arg(long, value_name = "MODE")]
    rotate_by: Option<String>,

    /// Additional file to include, relative to the working directory. Can be repeated
    #[arg(short = 'o', long = "other", value_name = "FILE")]
    other: Vec<PathBuf>,

    /// Also back up the metadata folder. Can be slow and make archives much larger
    #[arg(short, long)]
    metadata: bool,

    /// Skip the device hash file, e.g. when moving the config to another machine
    #[arg(short, long)]
    ignore_device_hash: bool,

    /// Log file, or a directory to put it in
    #[arg(short, long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Staging directory (default: <temp dir>/<profile staging name>)
    #[arg(long, value_name = "PATH")]
    staging_dir: Option<PathBuf>,

    /// What to do with a staging directory left by an earlier run: remove or abort
    #[arg(long, value_name = "POLICY")]
    stale_staging: Option<String>,

    /// Command to execute on completion
    #[arg(short = 'c', long, value_name = "CMD")]
    on_completion: Option<String>,

    /// Print every backup item as it is staged
    #[arg(long)]
    verbose: bool,

    /// Print version information and exit
    #[arg(short = 'v', long = "version")]
    show_version: bool,
}

/// CLI implementation of ProgressCallback printing a run summary
struct CliProgress {
    verbose: bool,
    start_time: Instant,
}

impl CliProgress {
    fn new(verbose: bool) -> Self {
        CliProgress {
            verbose,
            start_time: Instant::now(),
        }
    }

    fn format_duration(elapsed: Duration) -> String {
        let secs = elapsed.as_secs();
        let mins = secs / 60;
        let secs = secs % 60;

        if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}.{:01}s", secs, elapsed.subsec_millis() / 100)
        }
    }
}

impl ProgressCallback for CliProgress {
    fn on_run_started(&self, run: &BackupRun) {
        if self.verbose {
            let present = run.presence.iter().filter(|p| p.present).count();
            eprintln!(
                "Run {} started, {} of {} configured items present",
                run.id,
                present,
                run.presence.len()
            );
        }
    }

    fn on_item_completed(&self, _run: &BackupRun, record: &ItemRecord) {
        if !self.verbose {
            return;
        }
        match record.state {
            ItemState::Staged => eprintln!(
                "  staged  {} {} ({} files, {})",
                record.item.kind,
                record.item.path.display(),
                record.files_copied,
                format_size(record.bytes_copied)
            ),
            ItemState::Missing => {
                eprintln!("  missing {} {}", record.item.kind, record.item.path.display())
            }
            ItemState::Failed => eprintln!(
                "  failed  {} {}: {}",
                record.item.kind,
                record.item.path.display(),
                record.error_message.as_deref().unwrap_or("(unknown error)")
            ),
        }
    }

    fn on_archive_written(&self, _run: &BackupRun, archive: &ArchiveRecord) {
        eprintln!(
            "Archive: {} ({} entries, {})",
            archive.path.display(),
            archive.entries,
            format_size(archive.size_bytes)
        );
    }

    fn on_archive_deleted(&self, path: &Path) {
        if self.verbose {
            eprintln!("Rotated out: {}", path.display());
        }
    }

    fn on_run_completed(&self, run: &BackupRun) {
        eprintln!(
            "Summary: {} staged, {} missing, {} failed",
            run.count(ItemState::Staged),
            run.count(ItemState::Missing),
            run.count(ItemState::Failed)
        );
        if let Some(rotation) = &run.rotation {
            eprintln!(
                "Rotation: {} deleted, {} could not be deleted; {}",
                rotation.deleted.len(),
                rotation.failed.len(),
                rotation.summary()
            );
            if let Some(e) = &rotation.listing_error {
                eprintln!("Rotation stopped early: {}", e);
            }
        }
        eprintln!("Elapsed: {}", Self::format_duration(self.start_time.elapsed()));

        let failed: Vec<_> = run
            .items
            .iter()
            .filter(|r| r.state == ItemState::Failed)
            .collect();
        if !failed.is_empty() {
            eprintln!();
            eprintln!("Failed items:");
            for record in failed {
                eprintln!(
                    "  {}: {}",
                    record.source_path.display(),
                    record.error_message.as_deref().unwrap_or("(unknown error)")
                );
            }
        }
    }
}

fn main() {
    let args = Args::parse();

    if args.show_version {
        println!("cfgbackup v{} - Emby/Jellyfin configuration backup", VERSION);
        return;
    }

    if args.destination.is_none() {
        eprintln!("A backup destination is required (--destination).");
        std::process::exit(2);
    }

    let profile = match parse_profile(&args.profile) {
        Ok(profile) => profile,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            std::process::exit(2);
        }
    };

    let log_file = logging::select_log_file(args.log_file.as_deref(), profile.default_log_file());
    if let Some(path) = logging::init(log_file) {
        info!("Logs to be saved to {}", path.display());
    }

    let exit_code = match run_cli(&args) {
        Ok(()) => 0,
        Err(msg) => {
            tracing::error!("{}", msg);
            eprintln!("Error: {}", msg);
            2
        }
    };

    std::process::exit(exit_code);
}

/// Main CLI logic - separated for testability
fn run_cli(args: &Args) -> Result<(), String> {
    let config = build_config(args)?;

    info!("---- {} backup version {} ----", config.profile, VERSION);
    info!("System date is {}", Local::now().format("%Y-%m-%d %H:%M:%S"));

    let mut run = create_run(&config).map_err(|e| format!("Backup setup failed: {}", e))?;
    let progress = CliProgress::new(args.verbose);

    run_backup(&mut run, &config, Some(&progress)).map_err(|e| {
        if e.is_precondition() {
            format!("Preflight check failed: {}", e)
        } else {
            format!("Backup failed: {}", e)
        }
    })
}

/// Turn arguments into the configuration snapshot shared by every stage
fn build_config(args: &Args) -> Result<BackupConfig, String> {
    let destination = args
        .destination
        .as_ref()
        .ok_or_else(|| "A backup destination is required (--destination)".to_string())?;

    let profile = parse_profile(&args.profile)?;
    let source = args
        .source
        .clone()
        .unwrap_or_else(|| PathBuf::from(profile.default_source_root()));

    let mut config = profile.config(&source, destination, args.keep);

    if let Some(mode) = &args.rotate_by {
        let mode = match mode.to_lowercase().as_str() {
            "age" | "days" => RetentionMode::Age,
            "count" => RetentionMode::Count,
            _ => return Err(format!("Invalid rotation mode '{}'. Must be 'age' or 'count'", mode)),
        };
        config.retention = mode.policy(args.keep);
    }

    if let Some(policy) = &args.stale_staging {
        config.stale_staging = match policy.to_lowercase().as_str() {
            "remove" => StaleStagingPolicy::Remove,
            "abort" => StaleStagingPolicy::Abort,
            _ => {
                return Err(format!(
                    "Invalid stale staging policy '{}'. Must be 'remove' or 'abort'",
                    policy
                ))
            }
        };
    }

    if let Some(staging) = &args.staging_dir {
        config.staging_dir = staging.clone();
    }
    if args.metadata {
        config.include_metadata();
    }
    if args.ignore_device_hash {
        config.exclude_device_hash();
    }
    config.extra_files = args.other.clone();
    config.on_completion = args.on_completion.clone();

    Ok(config)
}

fn parse_profile(name: &str) -> Result<Profile, String> {
    match name.to_lowercase().as_str() {
        "emby" => Ok(Profile::Emby),
        "jellyfin" => Ok(Profile::Jellyfin),
        _ => Err(format!("Invalid profile '{}'. Must be 'emby' or 'jellyfin'", name)),
    }
}
