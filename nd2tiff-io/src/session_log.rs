//! Plain-text log kept next to the converted files.

use crate::Result;
use log::warn;
use std::fmt::Display;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Name of the log file inside the output folder.
pub const LOG_FILE_NAME: &str = "nd2tiff.log.txt";

/// Append-only log of one or more conversion sessions.
///
/// Write failures are reported through `log` and otherwise ignored; the log
/// never stops a conversion.
#[derive(Debug)]
pub struct SessionLog {
    file: Option<File>,
    path: Option<PathBuf>,
}

impl SessionLog {
    /// Opens (or creates) the log inside `folder` for appending.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened.
    pub fn open(folder: &Path) -> Result<Self> {
        let path = folder.join(LOG_FILE_NAME);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            file: Some(file),
            path: Some(path),
        })
    }

    /// A log that discards everything, used for dry runs.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            file: None,
            path: None,
        }
    }

    /// Path of the log file, if enabled.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Appends one line.
    pub fn line(&mut self, message: impl Display) {
        if let Some(file) = &mut self.file {
            if let Err(e) = writeln!(file, "{message}") {
                warn!("failed to write to {}: {e}", self.path.as_deref().unwrap_or(Path::new("")).display());
            }
        }
    }

    /// Starts a new session: a blank separator line followed by `marker`.
    pub fn start_session(&mut self, marker: impl Display) {
        self.line("");
        self.line(marker);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_appends_sessions() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut log = SessionLog::open(dir.path()).unwrap();
            log.start_session("Input file: a.nd2");
            log.line("Skipping x.tif (file exists)");
        }
        {
            let mut log = SessionLog::open(dir.path()).unwrap();
            log.start_session("Input file: b.nd2");
        }
        let content = std::fs::read_to_string(dir.path().join(LOG_FILE_NAME)).unwrap();
        assert_eq!(
            content,
            "\nInput file: a.nd2\nSkipping x.tif (file exists)\n\nInput file: b.nd2\n"
        );
    }

    #[test]
    fn test_disabled_log_writes_nothing() {
        let mut log = SessionLog::disabled();
        log.line("ignored");
        assert!(log.path().is_none());
    }
}
