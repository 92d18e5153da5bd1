use chrono::Local;
use log::info;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use crate::error::ScanError;

pub const OVERWRITE_PROMPT: &str = "Overwrite existing data?  (Y/n): ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationStatus {
    Created,
    /// Existing directory; the user agreed to overwrite
    Reused,
    /// Existing directory; the user declined
    Declined,
}

/// Destination named after the current local time, e.g. `20240131154502`
pub fn default_destination() -> PathBuf {
    PathBuf::from(Local::now().format("%Y%m%d%H%M%S").to_string())
}

/// Make sure `path` is a directory that may receive data files.
///
/// An existing directory is only reused after an explicit `Y` on `input`;
/// `n` or end of input declines. Any other answer asks again.
pub fn prepare_destination<R: BufRead, W: Write>(
    path: &Path,
    input: &mut R,
    output: &mut W,
) -> Result<DestinationStatus, ScanError> {
    if !path.exists() {
        std::fs::create_dir_all(path)
            .map_err(|e| ScanError::io(e, format!("creating directory {}", path.display())))?;
        info!("Created destination {}", path.display());
        return Ok(DestinationStatus::Created);
    }
    if !path.is_dir() {
        return Err(ScanError::Config(format!(
            "destination {} exists and is not a directory",
            path.display()
        )));
    }

    let mut line = String::new();
    loop {
        write!(output, "{OVERWRITE_PROMPT}")?;
        output.flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            return Ok(DestinationStatus::Declined);
        }
        match line.trim() {
            "Y" => return Ok(DestinationStatus::Reused),
            "n" => return Ok(DestinationStatus::Declined),
            _ => continue,
        }
    }
}
