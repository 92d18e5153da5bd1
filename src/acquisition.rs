use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{MetaTiming, ScanOptions};
use crate::datafile::{self, DataHeader};
use crate::device::{AcquisitionDevice, BurstStatus};
use crate::error::ScanError;
use crate::meta::MetaValue;
use crate::session::Session;
use crate::types::Cell;
use crate::utils::{poll_until, PollError};

/// Outcome of one visited cell, as written to the scan log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellRecord {
    pub xi: u32,
    pub zi: u32,
    pub file: String,
    pub samples: usize,
    pub persisted: bool,
    pub timestamp: DateTime<Utc>,
}

/// Runs the per-cell capture: tag, burst, persist, clear.
#[derive(Debug, Clone)]
pub struct Acquisition {
    dest: PathBuf,
    meta_timing: MetaTiming,
    burst_timeout: Option<Duration>,
}

impl Acquisition {
    pub fn new(dest: impl Into<PathBuf>, options: &ScanOptions) -> Self {
        Self {
            dest: dest.into(),
            meta_timing: options.meta_timing,
            burst_timeout: options.burst_timeout(),
        }
    }

    pub fn dest(&self) -> &Path {
        &self.dest
    }

    /// Capture and store one burst at `cell`.
    ///
    /// A streaming fault stops the stream, closes the device and returns
    /// [`ScanError::StreamingFailed`]. A file that cannot be written is
    /// logged and reported through `persisted = false`.
    pub fn acquire_cell<D: AcquisitionDevice>(
        &self,
        session: &mut Session<D>,
        cell: Cell,
    ) -> Result<CellRecord, ScanError> {
        if self.meta_timing == MetaTiming::Before {
            publish_indices(session, cell);
        }

        if let Err(e) = self.run_burst(session) {
            if let Err(stop) = session.device_mut().stop_burst() {
                warn!("Failed to stop the aborted burst: {stop}");
            }
            session.close_quietly();
            return Err(match e {
                ScanError::StreamingFailed(_) => e,
                other => ScanError::StreamingFailed(other.to_string()),
            });
        }

        if self.meta_timing == MetaTiming::After {
            publish_indices(session, cell);
        }

        let file = cell.file_name();
        let path = self.dest.join(&file);
        let samples = session.device().burst().sample_count();
        let header = DataHeader::new(session.config(), session.device().burst(), Some(cell));
        let persisted = match datafile::save(&path, &header, session.device().burst()) {
            Ok(()) => {
                debug!("Cell {cell}: {samples} samples -> {}", path.display());
                true
            }
            Err(e) => {
                warn!("Unable to write {}, data point lost: {e}", path.display());
                false
            }
        };

        session.device_mut().clear_buffer();

        Ok(CellRecord {
            xi: cell.xi,
            zi: cell.zi,
            file,
            samples,
            persisted,
            timestamp: Utc::now(),
        })
    }

    fn run_burst<D: AcquisitionDevice>(&self, session: &mut Session<D>) -> Result<(), ScanError> {
        let (device, config) = session.parts_mut();
        device.start_burst(config)?;

        let timeout = self.burst_timeout.unwrap_or(Duration::MAX);
        poll_until(
            || device.service_burst().map(|status| status == BurstStatus::Complete),
            timeout,
            Duration::ZERO,
        )
        .map_err(|e| match e {
            PollError::Timeout => {
                ScanError::StreamingFailed(format!("burst did not complete within {timeout:?}"))
            }
            PollError::ConditionError(e) => e,
        })?;

        device.stop_burst()
    }
}

/// Tag the descriptor with the cell indices; failure only costs metadata
fn publish_indices<D: AcquisitionDevice>(session: &mut Session<D>, cell: Cell) {
    let config = session.config_mut();
    for (key, value) in [("xi", cell.xi), ("zi", cell.zi)] {
        if let Err(e) = config.put_meta(key, MetaValue::Int(value as i64)) {
            warn!("Failed to publish {key}={value}: {e}");
        }
    }
}
