use log::debug;

use crate::config::EfChannelConfig;
use crate::device::AcquisitionDevice;
use crate::error::ScanError;
use crate::session::Session;
use crate::types::{Axis, Direction};

/// Pin level that drives `ef`'s axis in `direction`
pub fn direction_level(ef: &EfChannelConfig, direction: Direction) -> bool {
    match direction {
        Direction::Positive => ef.positive_level,
        Direction::Negative => !ef.positive_level,
    }
}

/// Direction bits and pulse trains for the two stage axes.
///
/// Writes are never retried: a lost pulse or direction change would leave the
/// logical grid index out of step with the stage, with no position feedback
/// to detect it.
#[derive(Debug, Default)]
pub struct MotionDriver {
    levels: [Option<bool>; 2],
}

impl MotionDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last level written to an axis's direction bit
    pub fn level(&self, axis: Axis) -> Option<bool> {
        self.levels[axis.ef_index()]
    }

    /// Mark the direction bits of the given axes as digital outputs
    pub fn configure_outputs<D: AcquisitionDevice>(
        &self,
        session: &mut Session<D>,
        axes: &[Axis],
    ) -> Result<(), ScanError> {
        let channels = axes
            .iter()
            .map(|&axis| session.config().direction_channel(axis))
            .collect::<Result<Vec<_>, _>>()?;
        session
            .device_mut()
            .set_digital_outputs(&channels)
            .map_err(|e| ScanError::DeviceWriteFailed {
                target: format!("direction outputs {channels:?}"),
                reason: e.to_string(),
            })
    }

    pub fn set_direction<D: AcquisitionDevice>(
        &mut self,
        session: &mut Session<D>,
        axis: Axis,
        direction: Direction,
    ) -> Result<(), ScanError> {
        let ef = session.config().ef_channel(axis)?;
        let channel = session.config().direction_channel(axis)?;
        let level = direction_level(ef, direction);

        session
            .device_mut()
            .write_digital(channel, level)
            .map_err(|e| ScanError::DeviceWriteFailed {
                target: format!("{axis} direction (DIO{channel})"),
                reason: e.to_string(),
            })?;
        self.levels[axis.ef_index()] = Some(level);
        debug!("{axis} direction {direction:?} -> DIO{channel}={}", level as u8);
        Ok(())
    }

    /// Start pulse trains on the listed axes in a single EF update.
    ///
    /// Axes not listed get a zero count. Does not wait for the pulses.
    pub fn command_pulses<D: AcquisitionDevice>(
        &mut self,
        session: &mut Session<D>,
        moves: &[(Axis, u32)],
    ) -> Result<(), ScanError> {
        if moves.iter().all(|&(_, counts)| counts == 0) {
            return Ok(());
        }

        let (device, config) = session.parts_mut();
        for ef in config.ef_channels.iter_mut() {
            ef.counts = 0;
        }
        for &(axis, counts) in moves {
            config.ef_channel_mut(axis)?.counts = counts;
        }

        device
            .update_ef(&config.ef_channels)
            .map_err(|e| ScanError::DeviceWriteFailed {
                target: format!("pulse output {moves:?}"),
                reason: e.to_string(),
            })?;
        debug!("Pulses issued: {moves:?}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::device::{DeviceEvent, SimulatedDevice};

    fn open_session(device: SimulatedDevice) -> Session<SimulatedDevice> {
        let mut session = Session::new(device, DeviceConfig::default());
        session.open().unwrap();
        session
    }

    #[test]
    fn test_direction_channel_is_pulse_plus_one() {
        let mut session = open_session(SimulatedDevice::new());
        let mut driver = MotionDriver::new();

        driver.set_direction(&mut session, Axis::X, Direction::Positive).unwrap();
        driver.set_direction(&mut session, Axis::Z, Direction::Negative).unwrap();

        assert_eq!(session.device().pin_level(1), Some(true));
        assert_eq!(session.device().pin_level(3), Some(false));
        assert_eq!(driver.level(Axis::X), Some(true));
        assert_eq!(driver.level(Axis::Z), Some(false));
    }

    #[test]
    fn test_inverted_polarity() {
        let mut config = DeviceConfig::default();
        config.ef_channels[0].positive_level = false;
        assert!(!direction_level(&config.ef_channels[0], Direction::Positive));
        assert!(direction_level(&config.ef_channels[0], Direction::Negative));
    }

    #[test]
    fn test_command_pulses_zeroes_unlisted_axis() {
        let mut session = open_session(SimulatedDevice::new());
        let mut driver = MotionDriver::new();

        driver.command_pulses(&mut session, &[(Axis::Z, 40)]).unwrap();
        driver.command_pulses(&mut session, &[(Axis::X, 25)]).unwrap();

        assert_eq!(session.device().pulses_on(0), vec![25]);
        assert_eq!(session.device().pulses_on(2), vec![40]);
        assert_eq!(session.config().ef_channels[1].counts, 0);
    }

    #[test]
    fn test_zero_pulses_issue_nothing() {
        let mut session = open_session(SimulatedDevice::new());
        let mut driver = MotionDriver::new();
        driver.command_pulses(&mut session, &[(Axis::X, 0)]).unwrap();
        assert!(!session
            .device()
            .events()
            .iter()
            .any(|e| matches!(e, DeviceEvent::Pulses { .. })));
    }

    #[test]
    fn test_write_failure_maps_to_device_write_failed() {
        let mut session = open_session(SimulatedDevice::new().with_digital_fault_after(0));
        let mut driver = MotionDriver::new();
        let err = driver
            .set_direction(&mut session, Axis::X, Direction::Positive)
            .unwrap_err();
        assert!(matches!(err, ScanError::DeviceWriteFailed { .. }));
        assert_eq!(driver.level(Axis::X), None);

        let mut session = open_session(SimulatedDevice::new().with_pulse_fault());
        let err = driver.command_pulses(&mut session, &[(Axis::X, 5)]).unwrap_err();
        assert!(matches!(err, ScanError::DeviceWriteFailed { .. }));
    }
}
