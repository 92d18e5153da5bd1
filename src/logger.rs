use log::{debug, error, warn};
use serde::{de::DeserializeOwned, Serialize};
use std::{io::Write, path::Path, path::PathBuf};

use crate::error::ScanError;

/// Buffered JSON-lines writer.
///
/// Entries are appended to the file whenever the buffer fills and once more
/// on drop. With [`Logger::truncate_existing`] the first successful flush
/// replaces whatever the file held before. Transient write failures are logged and retried on the next
/// flush; only `max_flush_failures` consecutive failures become an error.
#[derive(Debug)]
pub struct Logger<T>
where
    T: Serialize + Clone + DeserializeOwned,
{
    buffer: Vec<T>,
    buffer_size: usize,
    file_path: PathBuf,
    flush_failures: usize,
    max_flush_failures: usize,
    truncate_pending: bool,
}

impl<T> Logger<T>
where
    T: Serialize + Clone + DeserializeOwned,
{
    pub fn new<P: Into<PathBuf>>(file_path: P, buffer_size: usize) -> Self {
        let mut path = file_path.into();
        if path.extension() != Some(std::ffi::OsStr::new("jsonl")) {
            path.set_extension("jsonl");
        }

        Self {
            buffer: Vec::with_capacity(buffer_size),
            buffer_size: buffer_size.max(1),
            file_path: path,
            flush_failures: 0,
            max_flush_failures: 10,
            truncate_pending: false,
        }
    }

    /// Start the file over on the first flush instead of appending to it
    pub fn truncate_existing(mut self) -> Self {
        self.truncate_pending = true;
        self
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    pub fn add(&mut self, data: T) -> Result<(), ScanError> {
        self.buffer.push(data);

        if self.buffer.len() >= self.buffer_size {
            self.flush()?;
        }

        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), ScanError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        match self.write_buffer() {
            Ok(()) => {
                self.flush_failures = 0;
                self.truncate_pending = false;
                debug!(
                    "Flushed {} log entries to {}",
                    self.buffer.len(),
                    self.file_path.display()
                );
                self.buffer.clear();
                Ok(())
            }
            Err(e) => {
                self.flush_failures += 1;
                error!(
                    "Flush failure {}/{}: {}",
                    self.flush_failures, self.max_flush_failures, e
                );

                if self.flush_failures % 3 == 0 {
                    warn!(
                        "Experiencing intermittent flush failures ({}/{})",
                        self.flush_failures, self.max_flush_failures
                    );
                }

                if self.flush_failures >= self.max_flush_failures {
                    return Err(ScanError::io(
                        std::io::Error::other(e.to_string()),
                        format!(
                            "too many consecutive flush failures ({}) for {}",
                            self.max_flush_failures,
                            self.file_path.display()
                        ),
                    ));
                }

                Ok(())
            }
        }
    }

    fn write_buffer(&self) -> Result<(), ScanError> {
        let mut options = std::fs::OpenOptions::new();
        options.create(true);
        if self.truncate_pending {
            options.write(true).truncate(true);
        } else {
            options.append(true);
        }
        let file = options
            .open(&self.file_path)
            .map_err(|e| ScanError::io(e, format!("opening {}", self.file_path.display())))?;

        let mut writer = std::io::BufWriter::new(file);
        for data in &self.buffer {
            let json_line = serde_json::to_string(data)?;
            writeln!(writer, "{}", json_line)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl<T> Drop for Logger<T>
where
    T: Serialize + Clone + DeserializeOwned,
{
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Read every entry of a JSON-lines log
pub fn read_entries<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, ScanError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ScanError::io(e, format!("reading {}", path.display())))?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(ScanError::from))
        .collect()
}
