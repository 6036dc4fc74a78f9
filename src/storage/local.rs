use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::TicketPulseError;

use super::is_csv_name;

/// Directory of bundled CSV exports used when remote storage is unavailable.
/// Files are read as Windows-1252.
pub struct LocalDir {
    dir: PathBuf,
}

impl LocalDir {
    pub fn new(dir: &Path) -> Self {
        LocalDir {
            dir: dir.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// CSV file names in the directory, sorted. An unreadable directory is an
    /// error: there is nothing left to fall back to.
    pub fn list_csv_files(&self) -> Result<Vec<String>, TicketPulseError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| {
            TicketPulseError::Error(format!(
                "Local data directory {} is unreadable: {}",
                self.dir.display(),
                e
            ))
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_csv_name(&name) {
                names.push(name);
            }
        }
        names.sort();

        debug!("Found {} CSV file(s) in {}", names.len(), self.dir.display());
        Ok(names)
    }

    pub fn read(&self, name: &str) -> Result<Vec<u8>, TicketPulseError> {
        Ok(fs::read(self.dir.join(name))?)
    }
}
