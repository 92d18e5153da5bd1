use log::{info, warn};

use crate::config::DeviceConfig;
use crate::device::AcquisitionDevice;
use crate::error::ScanError;
use crate::job::Job;
use crate::motion::MotionDriver;
use crate::session::Session;
use crate::timing::pulse_duration;
use crate::types::{Axis, Direction};

/// Parse a physical distance given on the command line
pub fn parse_distance(text: &str) -> Result<f64, ScanError> {
    match text.trim().parse::<f64>() {
        Ok(distance) if distance.is_finite() => Ok(distance),
        _ => Err(ScanError::InvalidDistance(text.to_string())),
    }
}

/// A point-to-point move of one axis, in physical units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisMotion {
    pub axis: Axis,
    /// Physical units per pulse
    pub calibration: f64,
    pub distance: f64,
    /// Signed pulse count, `round(distance / calibration)`
    pub pulses: i64,
}

impl AxisMotion {
    pub fn new(axis: Axis, calibration: f64, distance: f64) -> Result<Self, ScanError> {
        if !(calibration.is_finite() && calibration > 0.0) {
            return Err(ScanError::Config(format!(
                "the {axis} calibration must be positive, got {calibration}"
            )));
        }
        let pulses = (distance / calibration).round();
        if pulses.abs() > u32::MAX as f64 {
            return Err(ScanError::InvalidDistance(format!(
                "{distance} ({pulses} pulses exceeds the pulse counter)"
            )));
        }
        Ok(Self {
            axis,
            calibration,
            distance,
            pulses: pulses as i64,
        })
    }

    /// Use the calibration configured on the axis's EF channel
    pub fn from_config(config: &DeviceConfig, axis: Axis, distance: f64) -> Result<Self, ScanError> {
        let calibration = config.ef_channel(axis)?.calibration.ok_or_else(|| {
            ScanError::Config(format!("no calibration configured for the {axis} EF channel"))
        })?;
        Self::new(axis, calibration, distance)
    }

    pub fn direction(&self) -> Direction {
        Direction::of(self.pulses)
    }

    pub fn magnitude(&self) -> u32 {
        self.pulses.unsigned_abs() as u32
    }
}

/// Standalone move of a single axis.
///
/// Opens the session, drives the pulses, optionally waits for the pulse
/// train to finish, and closes the session again.
pub struct AxisMove<'a, D: AcquisitionDevice> {
    session: &'a mut Session<D>,
    motion: AxisMotion,
    wait: bool,
}

impl<'a, D: AcquisitionDevice> AxisMove<'a, D> {
    pub fn new(session: &'a mut Session<D>, motion: AxisMotion) -> Self {
        Self {
            session,
            motion,
            wait: true,
        }
    }

    /// Return as soon as the pulses are commanded
    pub fn fast_exit(mut self) -> Self {
        self.wait = false;
        self
    }

    fn drive(&mut self) -> Result<(), ScanError> {
        let axis = self.motion.axis;
        let mut driver = MotionDriver::new();
        let failed = |e: ScanError| ScanError::MotionFailed(format!("{axis} axis: {e}"));

        driver
            .configure_outputs(self.session, &[axis])
            .map_err(failed)?;
        driver
            .set_direction(self.session, axis, self.motion.direction())
            .map_err(failed)?;
        driver
            .command_pulses(self.session, &[(axis, self.motion.magnitude())])
            .map_err(failed)?;

        if self.wait {
            std::thread::sleep(pulse_duration(
                self.motion.magnitude(),
                self.session.config().pulse_frequency(),
            ));
        }
        Ok(())
    }
}

impl<D: AcquisitionDevice> Job for AxisMove<'_, D> {
    type Output = AxisMotion;

    fn run(&mut self) -> Result<AxisMotion, ScanError> {
        if self.motion.pulses == 0 {
            warn!(
                "{} {} rounds to zero pulses at {} per pulse; nothing to do",
                self.motion.axis, self.motion.distance, self.motion.calibration
            );
            return Ok(self.motion);
        }

        self.session.open()?;
        info!(
            "Moving {} by {} ({} pulses)",
            self.motion.axis, self.motion.distance, self.motion.pulses
        );

        if let Err(e) = self.drive() {
            self.session.close_quietly();
            return Err(e);
        }
        self.session.close()?;
        Ok(self.motion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceEvent, SimulatedDevice};

    fn calibrated() -> DeviceConfig {
        let mut config = DeviceConfig::default();
        config.ef.frequency_hz = 1_000_000.0;
        for ef in config.ef_channels.iter_mut() {
            ef.calibration = Some(0.5);
        }
        config
    }

    #[test]
    fn test_pulses_from_calibration() {
        let motion = AxisMotion::new(Axis::X, 0.5, 10.0).unwrap();
        assert_eq!(motion.pulses, 20);
        assert_eq!(motion.direction(), Direction::Positive);

        let motion = AxisMotion::new(Axis::Z, 0.5, -1.3).unwrap();
        assert_eq!(motion.pulses, -3);
        assert_eq!(motion.magnitude(), 3);
        assert_eq!(motion.direction(), Direction::Negative);
    }

    #[test]
    fn test_parse_distance() {
        assert_eq!(parse_distance("-2.5").unwrap(), -2.5);
        assert!(matches!(parse_distance("ten"), Err(ScanError::InvalidDistance(_))));
        assert!(matches!(parse_distance("NaN"), Err(ScanError::InvalidDistance(_))));
    }

    #[test]
    fn test_missing_calibration() {
        let config = DeviceConfig::default();
        assert!(matches!(
            AxisMotion::from_config(&config, Axis::X, 1.0),
            Err(ScanError::Config(_))
        ));
        assert!(AxisMotion::new(Axis::X, 0.0, 1.0).is_err());
    }

    #[test]
    fn test_negative_move_on_z() {
        let config = calibrated();
        let motion = AxisMotion::from_config(&config, Axis::Z, -10.0).unwrap();
        let mut session = Session::new(SimulatedDevice::new(), config);

        let done = AxisMove::new(&mut session, motion).run().unwrap();
        assert_eq!(done.pulses, -20);

        let device = session.device();
        assert_eq!(device.position(2), -20);
        assert_eq!(device.position(0), 0);
        assert!(device.events().contains(&DeviceEvent::DigitalOutputs(vec![3])));
        assert!(!device.is_open());
    }

    #[test]
    fn test_zero_pulses_skip_device() {
        let config = calibrated();
        let motion = AxisMotion::from_config(&config, Axis::X, 0.1).unwrap();
        let mut session = Session::new(SimulatedDevice::new(), config);

        AxisMove::new(&mut session, motion).fast_exit().run().unwrap();
        assert!(session.device().events().is_empty());
    }

    #[test]
    fn test_pulse_fault_is_motion_failure() {
        let config = calibrated();
        let motion = AxisMotion::from_config(&config, Axis::X, 5.0).unwrap();
        let mut session = Session::new(SimulatedDevice::new().with_pulse_fault(), config);

        let err = AxisMove::new(&mut session, motion).run().unwrap_err();
        assert!(matches!(err, ScanError::MotionFailed(_)));
        assert!(!session.device().is_open());
    }
}
