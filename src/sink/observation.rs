use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::core::Result;
use crate::protocol::MountFields;

/// Append-only file of mount readouts
#[derive(Debug, Clone)]
pub struct ObservationLog {
    path: PathBuf,
}

impl ObservationLog {
    /// Creates a new log appending to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ObservationLog { path: path.into() }
    }

    /// Returns the log file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one timestamped record of the six mount fields
    pub fn append(&self, fields: &MountFields) -> Result<()> {
        let line = format_record(Utc::now(), fields);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

fn format_record(at: DateTime<Utc>, fields: &MountFields) -> String {
    let mut line = at.format("%Y-%m-%d %H:%M:%S").to_string();
    for value in fields.values() {
        line.push('\t');
        line.push_str(value);
    }
    line.push('\n');
    line
}
