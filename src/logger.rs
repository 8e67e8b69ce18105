//! Session logger: routes `tracing` output to a single file in the OS data
//! directory.
//!
//! The file is **truncated at each launch**, so it only ever contains output
//! from the most recent session.
//!
//! Log location:
//!   Windows:  `%APPDATA%\Colorbook\colorbook.log`
//!   Linux:    `~/.local/share/Colorbook/colorbook.log`
//!   macOS:    `~/Library/Application Support/Colorbook/colorbook.log`
//!
//! If the file cannot be opened, output goes to stderr instead. `RUST_LOG`
//! overrides the default level.

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

static LOG_PATH: OnceLock<Option<PathBuf>> = OnceLock::new();

#[derive(Clone, Debug, Default)]
pub struct LogConfig {
    /// Default to `debug` instead of `info`.
    pub verbose: bool,
    /// Log to stderr even when a log file is available.
    pub stderr: bool,
    /// Override the log file location.
    pub file: Option<PathBuf>,
}

/// Returns the path of the current session log file, if one is open.
pub fn log_path() -> Option<&'static PathBuf> {
    LOG_PATH.get().and_then(|p| p.as_ref())
}

/// Initialise logging. Only the first call has any effect.
///
/// The returned guard flushes the background writer when dropped; hold it
/// for the life of the process.
pub fn init(config: &LogConfig) -> Option<WorkerGuard> {
    if LOG_PATH.get().is_some() {
        return None;
    }

    let level = if config.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let path = config.file.clone().unwrap_or_else(log_file_path);
    let file = if config.stderr {
        None
    } else {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        // Truncate any previous session's content.
        match OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
        {
            Ok(f) => Some(f),
            Err(e) => {
                eprintln!("[logger] Failed to open log file {:?}: {}", path, e);
                None
            }
        }
    };

    let (guard, installed, log_file) = match file {
        Some(f) => {
            let (writer, guard) = tracing_appender::non_blocking(f);
            let ok = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(writer)
                .try_init()
                .is_ok();
            (Some(guard), ok, Some(path))
        }
        None => {
            let ok = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init()
                .is_ok();
            (None, ok, None)
        }
    };

    if LOG_PATH.set(log_file).is_err() || !installed {
        return guard;
    }

    tracing::info!(
        "=== Colorbook session started {} ===",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(p) = log_path() {
        tracing::info!("Log file: {}", p.display());
    }

    // Mirror panics into the log, then run the default handler.
    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!(target: "panic", "PANIC: {}", info);
        prev(info);
    }));

    guard
}

fn log_file_path() -> PathBuf {
    data_dir().join("Colorbook").join("colorbook.log")
}

/// Platform data directory (without the app sub-folder).
pub fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata);
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support");
        }
    }
    // Linux / fallback
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    // Last resort: current working directory
    PathBuf::from(".")
}
