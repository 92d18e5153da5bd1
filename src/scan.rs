use log::{debug, info, warn};
use std::path::Path;
use std::time::{Duration, Instant};

use crate::acquisition::{Acquisition, CellRecord};
use crate::config::{DeviceConfig, ScanOptions};
use crate::device::AcquisitionDevice;
use crate::error::ScanError;
use crate::geometry::ScanGeometry;
use crate::job::Job;
use crate::logger::Logger;
use crate::motion::MotionDriver;
use crate::reposition::{self, ReturnMove};
use crate::session::Session;
use crate::timing::ScanTiming;
use crate::traversal::{self, Advance, Serpentine, TraversalPlan};
use crate::types::{Axis, Cell};

pub const SCAN_LOG_FILE: &str = "scan_log.jsonl";
const SCAN_LOG_BUFFER: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct ScanSummary {
    pub cells_visited: u64,
    pub files_written: u64,
    pub files_lost: u64,
    /// Cell the stage was at when the traversal finished
    pub final_cell: Cell,
    /// Moves issued to return to the start cell, if enabled
    pub returned: Option<[ReturnMove; 2]>,
    pub elapsed: Duration,
}

/// Expected motion and run time of a scan, computed without hardware
#[derive(Debug, Clone, PartialEq)]
pub struct ScanEstimate {
    pub plan: TraversalPlan,
    pub timing: ScanTiming,
    pub duration: Duration,
}

pub fn estimate(geometry: &ScanGeometry, config: &DeviceConfig, options: &ScanOptions) -> ScanEstimate {
    let plan = traversal::plan(geometry);
    let timing = scan_timing(geometry, config, options);
    let duration = planned_duration(&plan, &timing, config.acquisition.burst_duration());
    ScanEstimate {
        plan,
        timing,
        duration,
    }
}

fn planned_duration(plan: &TraversalPlan, timing: &ScanTiming, burst: Duration) -> Duration {
    repeated(timing.x_wait, plan.x_moves)
        .saturating_add(repeated(timing.z_wait, plan.z_moves))
        .saturating_add(repeated(burst, plan.cells))
}

/// `wait * n`, saturating at `Duration::MAX`
fn repeated(wait: Duration, n: u64) -> Duration {
    let nanos = wait.as_nanos().saturating_mul(n as u128);
    u64::try_from(nanos / 1_000_000_000)
        .map(|secs| Duration::new(secs, (nanos % 1_000_000_000) as u32))
        .unwrap_or(Duration::MAX)
}

fn scan_timing(geometry: &ScanGeometry, config: &DeviceConfig, options: &ScanOptions) -> ScanTiming {
    ScanTiming::new(
        geometry.x_pulses(),
        geometry.z_pulses(),
        config.pulse_frequency(),
        options.settle(),
    )
}

/// Serpentine raster scan over the configured grid.
///
/// At every cell one burst is captured and written to `<dest>/xxx_zzz.dat`;
/// between cells the stage is stepped open loop and given time to settle.
/// Any hardware fault ends the scan and closes the device. Files already
/// written are kept.
pub struct RasterScan<'a, D: AcquisitionDevice> {
    session: &'a mut Session<D>,
    geometry: ScanGeometry,
    options: ScanOptions,
    acquisition: Acquisition,
    timing: ScanTiming,
    driver: MotionDriver,
    scan_log: Option<Logger<CellRecord>>,
}

impl<'a, D: AcquisitionDevice> RasterScan<'a, D> {
    pub fn new(
        session: &'a mut Session<D>,
        geometry: ScanGeometry,
        options: ScanOptions,
        dest: &Path,
    ) -> Self {
        let timing = scan_timing(&geometry, session.config(), &options);
        let scan_log = options.record_log.then(|| {
            Logger::new(dest.join(SCAN_LOG_FILE), SCAN_LOG_BUFFER).truncate_existing()
        });

        Self {
            session,
            acquisition: Acquisition::new(dest, &options),
            geometry,
            options,
            timing,
            driver: MotionDriver::new(),
            scan_log,
        }
    }

    pub fn geometry(&self) -> &ScanGeometry {
        &self.geometry
    }

    pub fn timing(&self) -> ScanTiming {
        self.timing
    }

    /// Mark both direction bits as outputs and drive them to the initial signs
    fn initialize_axes(&mut self) -> Result<(), ScanError> {
        self.driver
            .configure_outputs(self.session, &[Axis::X, Axis::Z])?;
        self.driver
            .set_direction(self.session, Axis::X, self.geometry.xdir)?;
        self.driver
            .set_direction(self.session, Axis::Z, self.geometry.zdir)?;
        Ok(())
    }

    fn step(&mut self, axis: Axis, pulses: u32, wait: Duration) -> Result<(), ScanError> {
        self.driver.command_pulses(self.session, &[(axis, pulses)])?;
        std::thread::sleep(wait);
        Ok(())
    }

    fn record(&mut self, record: CellRecord) {
        if let Some(scan_log) = self.scan_log.as_mut() {
            if let Err(e) = scan_log.add(record) {
                warn!("Scan log disabled after repeated failures: {e}");
                self.scan_log = None;
            }
        }
    }

    fn traverse(&mut self, summary: &mut ScanSummary) -> Result<(), ScanError> {
        self.initialize_axes()?;
        let mut traversal = Serpentine::new();

        loop {
            let cell = self.geometry.cell();
            let record = self.acquisition.acquire_cell(self.session, cell)?;
            summary.cells_visited += 1;
            if record.persisted {
                summary.files_written += 1;
            } else {
                summary.files_lost += 1;
            }
            self.record(record);
            info!(
                "Cell {cell} done ({}/{})",
                summary.cells_visited,
                self.geometry.cell_count()
            );

            match traversal.advance(&mut self.geometry) {
                Some(Advance::StepX) => {
                    self.step(Axis::X, self.geometry.x_pulses(), self.timing.x_wait)?;
                }
                Some(Advance::NextRow) => {
                    debug!("Row boundary: x now {:?}", self.geometry.xdir);
                    self.driver
                        .set_direction(self.session, Axis::X, self.geometry.xdir)?;
                    self.step(Axis::Z, self.geometry.z_pulses(), self.timing.z_wait)?;
                }
                Some(Advance::Finished) => {
                    self.driver
                        .set_direction(self.session, Axis::X, self.geometry.xdir)?;
                    break;
                }
                None => break,
            }
        }
        summary.final_cell = self.geometry.cell();

        if self.options.return_to_origin {
            summary.returned = Some(reposition::return_to_origin(
                self.session,
                &mut self.driver,
                &self.geometry,
            )?);
        }
        Ok(())
    }
}

impl<D: AcquisitionDevice> Job for RasterScan<'_, D> {
    type Output = ScanSummary;

    fn run(&mut self) -> Result<ScanSummary, ScanError> {
        let start = Instant::now();
        info!(
            "Starting {}x{} scan from cell {} (x step {}, z step {})",
            self.geometry.xn,
            self.geometry.zn,
            self.geometry.cell(),
            self.geometry.xstep,
            self.geometry.zstep
        );
        info!(
            "Waits per step: x {:?}, z {:?}",
            self.timing.x_wait, self.timing.z_wait
        );

        self.session.open()?;

        let mut summary = ScanSummary {
            cells_visited: 0,
            files_written: 0,
            files_lost: 0,
            final_cell: self.geometry.cell(),
            returned: None,
            elapsed: Duration::ZERO,
        };
        let result = self.traverse(&mut summary);

        if let Some(scan_log) = self.scan_log.as_mut() {
            if let Err(e) = scan_log.flush() {
                warn!("Failed to flush the scan log: {e}");
            }
        }

        match result {
            Ok(()) => {
                self.session.close()?;
                summary.elapsed = start.elapsed();
                info!(
                    "Scan complete: {} cells, {} files written, {} lost in {:.1?}",
                    summary.cells_visited, summary.files_written, summary.files_lost, summary.elapsed
                );
                Ok(summary)
            }
            Err(e) => {
                self.session.close_quietly();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datafile;
    use crate::device::{DeviceEvent, SimulatedDevice};
    use crate::logger::read_entries;
    use crate::meta::MetaValue;

    fn grid_config(xstep: i64, xn: i64, zstep: i64, zn: i64) -> DeviceConfig {
        let mut config = DeviceConfig::default();
        config.ef.frequency_hz = 1_000_000.0;
        config.acquisition.samples_per_burst = 32;
        for (key, value) in [("xstep", xstep), ("xn", xn), ("zstep", zstep), ("zn", zn)] {
            config.put_meta(key, MetaValue::Int(value)).unwrap();
        }
        config
    }

    fn fast_options() -> ScanOptions {
        ScanOptions {
            settle_us: 0,
            ..Default::default()
        }
    }

    fn run_scan(
        device: SimulatedDevice,
        config: DeviceConfig,
        options: ScanOptions,
        dest: &Path,
    ) -> (Result<ScanSummary, ScanError>, Session<SimulatedDevice>) {
        let geometry = ScanGeometry::from_config(&config).unwrap();
        let mut session = Session::new(device, config);
        let result = RasterScan::new(&mut session, geometry, options, dest).run();
        (result, session)
    }

    fn dat_files(dest: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dest)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .filter(|name| name.ends_with(".dat"))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_one_file_per_cell() {
        let dir = tempfile::tempdir().unwrap();
        let (result, session) = run_scan(
            SimulatedDevice::new(),
            grid_config(5, 3, 5, 2),
            fast_options(),
            dir.path(),
        );
        let summary = result.unwrap();

        assert_eq!(summary.cells_visited, 6);
        assert_eq!(summary.files_written, 6);
        assert_eq!(summary.final_cell, Cell::new(0, 1));
        assert_eq!(
            dat_files(dir.path()),
            vec![
                "000_000.dat",
                "000_001.dat",
                "001_000.dat",
                "001_001.dat",
                "002_000.dat",
                "002_001.dat"
            ]
        );

        let device = session.device();
        assert!(!device.is_open());
        assert_eq!(device.bursts_started(), 6);
        assert_eq!(device.pulses_on(0), vec![5; 4]);
        assert_eq!(device.pulses_on(2), vec![5]);
        assert_eq!(device.position(0), 0);
        assert_eq!(device.position(2), 5);
    }

    #[test]
    fn test_x_direction_alternates() {
        let dir = tempfile::tempdir().unwrap();
        let (result, session) = run_scan(
            SimulatedDevice::new(),
            grid_config(2, 2, 3, 3),
            fast_options(),
            dir.path(),
        );
        result.unwrap();

        assert_eq!(session.device().writes_on(1), vec![true, false, true, false]);
        assert_eq!(session.device().writes_on(3), vec![true]);
    }

    #[test]
    fn test_buffer_cleared_once_per_cell() {
        let dir = tempfile::tempdir().unwrap();
        let (result, session) = run_scan(
            SimulatedDevice::new(),
            grid_config(1, 4, 1, 3),
            fast_options(),
            dir.path(),
        );
        result.unwrap();

        let cleared = session
            .device()
            .events()
            .iter()
            .filter(|e| **e == DeviceEvent::BufferCleared)
            .count();
        assert_eq!(cleared, 12);
    }

    #[test]
    fn test_no_pulses_during_burst() {
        let dir = tempfile::tempdir().unwrap();
        let (result, session) = run_scan(
            SimulatedDevice::new(),
            grid_config(3, 3, 3, 3),
            fast_options(),
            dir.path(),
        );
        result.unwrap();

        let mut streaming = false;
        for event in session.device().events() {
            match event {
                DeviceEvent::BurstStarted => streaming = true,
                DeviceEvent::BurstStopped => streaming = false,
                DeviceEvent::Pulses { .. } => assert!(!streaming),
                _ => {}
            }
        }
    }

    #[test]
    fn test_cell_indices_tagged_in_files() {
        let dir = tempfile::tempdir().unwrap();
        let (result, _) = run_scan(
            SimulatedDevice::new(),
            grid_config(-4, 3, 4, 2),
            fast_options(),
            dir.path(),
        );
        result.unwrap();

        for name in dat_files(dir.path()) {
            let (header, _) = datafile::load(&dir.path().join(&name)).unwrap();
            let xi = header.device.get_meta_int("xi").unwrap();
            let zi = header.device.get_meta_int("zi").unwrap();
            assert_eq!(name, format!("{xi:03}_{zi:03}.dat"));
            assert_eq!(header.device.get_meta_int("xstep").unwrap(), -4);
        }
    }

    #[test]
    fn test_stream_fault_aborts_and_keeps_earlier_files() {
        let dir = tempfile::tempdir().unwrap();
        let (result, session) = run_scan(
            SimulatedDevice::new().with_stream_fault_on_burst(3),
            grid_config(5, 3, 5, 2),
            fast_options(),
            dir.path(),
        );

        assert!(matches!(result, Err(ScanError::StreamingFailed(_))));
        assert!(!session.device().is_open());
        assert_eq!(dat_files(dir.path()), vec!["000_000.dat", "001_000.dat"]);

        let records: Vec<CellRecord> = read_entries(&dir.path().join(SCAN_LOG_FILE)).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_direction_write_fault_closes_device() {
        let dir = tempfile::tempdir().unwrap();
        let (result, session) = run_scan(
            SimulatedDevice::new().with_digital_fault_after(2),
            grid_config(5, 2, 5, 2),
            fast_options(),
            dir.path(),
        );

        assert!(matches!(result, Err(ScanError::DeviceWriteFailed { .. })));
        assert!(!session.device().is_open());
        assert_eq!(dat_files(dir.path()).len(), 2);
    }

    #[test]
    fn test_return_to_origin() {
        let dir = tempfile::tempdir().unwrap();
        let options = ScanOptions {
            return_to_origin: true,
            ..fast_options()
        };
        let (result, session) = run_scan(
            SimulatedDevice::new(),
            grid_config(-5, 3, 7, 3),
            options,
            dir.path(),
        );
        let summary = result.unwrap();

        assert_eq!(summary.final_cell, Cell::new(0, 2));
        let returned = summary.returned.unwrap();
        assert_eq!(returned[0].pulses, 10);
        assert_eq!(returned[1].pulses, 14);
        assert_eq!(session.device().position(0), 0);
        assert_eq!(session.device().position(2), 0);
    }

    #[test]
    fn test_scan_log_records_every_cell() {
        let dir = tempfile::tempdir().unwrap();
        let (result, _) = run_scan(
            SimulatedDevice::new(),
            grid_config(1, 2, 1, 2),
            fast_options(),
            dir.path(),
        );
        result.unwrap();

        let records: Vec<CellRecord> = read_entries(&dir.path().join(SCAN_LOG_FILE)).unwrap();
        let cells: Vec<_> = records.iter().map(|r| (r.xi, r.zi)).collect();
        assert_eq!(cells, vec![(0, 0), (1, 0), (1, 1), (0, 1)]);
        assert!(records.iter().all(|r| r.persisted && r.samples == 32));
    }

    #[test]
    fn test_rescan_into_same_destination_replaces_log() {
        let dir = tempfile::tempdir().unwrap();
        for _ in 0..2 {
            let (result, _) = run_scan(
                SimulatedDevice::new(),
                grid_config(1, 3, 1, 1),
                fast_options(),
                dir.path(),
            );
            result.unwrap();
        }

        let records: Vec<CellRecord> = read_entries(&dir.path().join(SCAN_LOG_FILE)).unwrap();
        assert_eq!(records.len(), 3);
    }

    #[test]
    fn test_scan_log_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let options = ScanOptions {
            record_log: false,
            ..fast_options()
        };
        let (result, _) = run_scan(
            SimulatedDevice::new(),
            grid_config(1, 2, 1, 1),
            options,
            dir.path(),
        );
        result.unwrap();
        assert!(!dir.path().join(SCAN_LOG_FILE).exists());
    }

    #[test]
    fn test_estimate_counts_moves() {
        let config = grid_config(500, 3, 1000, 2);
        let geometry = ScanGeometry::from_config(&config).unwrap();
        let mut config = config;
        config.ef.frequency_hz = 1000.0;
        config.acquisition.sample_rate_hz = 1000.0;
        config.acquisition.samples_per_burst = 100;

        let estimate = estimate(&geometry, &config, &ScanOptions::default());
        assert_eq!(estimate.plan.x_moves, 4);
        assert_eq!(estimate.plan.z_moves, 1);
        // 4 x 0.6 s + 1 x 1.1 s + 6 x 0.1 s
        assert_eq!(estimate.duration, Duration::from_millis(4100));
    }

    #[test]
    fn test_estimate_counts_beyond_u32_moves() {
        let plan = TraversalPlan {
            cells: 5_000_000_001,
            x_moves: 5_000_000_000,
            z_moves: 0,
            x_reversals: 1,
        };
        let timing = ScanTiming {
            x_wait: Duration::from_millis(1),
            z_wait: Duration::from_millis(1),
        };
        let duration = planned_duration(&plan, &timing, Duration::from_millis(1));

        // 5e9 x 1 ms + 5e9+1 x 1 ms
        assert_eq!(duration, Duration::from_millis(10_000_000_001));
    }

    #[test]
    fn test_estimate_saturates() {
        assert_eq!(repeated(Duration::MAX, 2), Duration::MAX);
        assert_eq!(repeated(Duration::from_secs(u64::MAX / 2), 3), Duration::MAX);
        assert_eq!(repeated(Duration::from_millis(1500), 3), Duration::from_millis(4500));
        assert_eq!(repeated(Duration::from_secs(1), 0), Duration::ZERO);
    }
}
