//! Append-only error log file.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use directories::ProjectDirs;
use tracing::{debug, warn};

/// Error log file name.
const ERROR_LOG_FILE: &str = "errors.log";

/// Default error log location.
///
/// Returns `~/.local/share/azureadmin/errors.log` on Linux, falling back to the working
/// directory when no home directory can be determined.
pub fn default_log_path() -> PathBuf {
    ProjectDirs::from("no", "azureadmin", "azureadmin")
        .map(|dirs| dirs.data_dir().join(ERROR_LOG_FILE))
        .unwrap_or_else(|| PathBuf::from(ERROR_LOG_FILE))
}

/// Writes one timestamped entry per error event. Never read back.
#[derive(Debug, Clone)]
pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an entry stamped with the current local time.
    ///
    /// Failures to write are logged and otherwise ignored; the console keeps running.
    pub fn record(&self, message: &str, details: &str) {
        if let Err(e) = self.append(Local::now(), message, details) {
            warn!("Failed to write error log {:?}: {}", self.path, e);
        }
    }

    fn append(&self, at: DateTime<Local>, message: &str, details: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(format_entry(at, message, details).as_bytes())?;

        debug!("Recorded error in {:?}", self.path);
        Ok(())
    }
}

fn format_entry(at: DateTime<Local>, message: &str, details: &str) -> String {
    format!(
        "[{}] ERROR: {}\nDetails: {}\n",
        at.format("%Y-%m-%d %H:%M:%S"),
        message,
        details
    )
}
