use std::collections::BTreeMap;

use super::{AcquisitionDevice, Burst, BurstStatus};
use crate::config::{DeviceConfig, EfChannelConfig};
use crate::error::ScanError;

/// Every hardware-facing call the simulated device received, in order
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Opened,
    Uploaded,
    DigitalOutputs(Vec<u8>),
    Digital { channel: u8, level: bool },
    Pulses { channel: u8, counts: u32 },
    BurstStarted,
    BurstStopped,
    BufferCleared,
    Closed,
}

#[derive(Debug)]
struct ActiveBurst {
    total: u32,
    channels: usize,
    polls_left: u32,
}

/// In-process stand-in for the acquisition hardware.
///
/// Records every call as a [`DeviceEvent`], keeps an open-loop stage position
/// per pulse channel, and produces deterministic synthetic samples. Faults can
/// be injected to exercise the controller's abort paths.
#[derive(Debug)]
pub struct SimulatedDevice {
    events: Vec<DeviceEvent>,
    open: bool,
    polls_per_burst: u32,
    pin_levels: BTreeMap<u8, bool>,
    positions: BTreeMap<u8, i64>,
    active: Option<ActiveBurst>,
    buffer: Burst,
    bursts_started: usize,
    digital_writes: usize,
    fail_stream_on_burst: Option<usize>,
    fail_digital_write_after: Option<usize>,
    fail_pulses: bool,
    fail_open: bool,
    fail_stop: bool,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDevice {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            open: false,
            polls_per_burst: 4,
            pin_levels: BTreeMap::new(),
            positions: BTreeMap::new(),
            active: None,
            buffer: Burst::default(),
            bursts_started: 0,
            digital_writes: 0,
            fail_stream_on_burst: None,
            fail_digital_write_after: None,
            fail_pulses: false,
            fail_open: false,
            fail_stop: false,
        }
    }

    /// Number of `service_burst` calls before a burst reports completion
    pub fn with_polls_per_burst(mut self, polls: u32) -> Self {
        self.polls_per_burst = polls.max(1);
        self
    }

    /// Fail servicing of the n-th burst (1-based)
    pub fn with_stream_fault_on_burst(mut self, burst: usize) -> Self {
        self.fail_stream_on_burst = Some(burst);
        self
    }

    /// Fail every digital write after the first `writes` succeed
    pub fn with_digital_fault_after(mut self, writes: usize) -> Self {
        self.fail_digital_write_after = Some(writes);
        self
    }

    pub fn with_pulse_fault(mut self) -> Self {
        self.fail_pulses = true;
        self
    }

    pub fn with_open_fault(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Fail every `stop_burst`, after the burst has been dropped
    pub fn with_stop_fault(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    pub fn events(&self) -> &[DeviceEvent] {
        &self.events
    }

    /// Net pulses emitted on a pulse channel, signed by the direction bit
    pub fn position(&self, pulse_channel: u8) -> i64 {
        self.positions.get(&pulse_channel).copied().unwrap_or(0)
    }

    pub fn pin_level(&self, channel: u8) -> Option<bool> {
        self.pin_levels.get(&channel).copied()
    }

    pub fn bursts_started(&self) -> usize {
        self.bursts_started
    }

    /// Pulse trains issued on one channel, in order
    pub fn pulses_on(&self, channel: u8) -> Vec<u32> {
        self.events
            .iter()
            .filter_map(|event| match event {
                DeviceEvent::Pulses { channel: ch, counts } if *ch == channel => Some(*counts),
                _ => None,
            })
            .collect()
    }

    /// Levels written to one DIO line, in order
    pub fn writes_on(&self, channel: u8) -> Vec<bool> {
        self.events
            .iter()
            .filter_map(|event| match event {
                DeviceEvent::Digital { channel: ch, level } if *ch == channel => Some(*level),
                _ => None,
            })
            .collect()
    }

    fn require_open(&self) -> Result<(), ScanError> {
        if self.open {
            Ok(())
        } else {
            Err(ScanError::Device("simulated device is not open".to_string()))
        }
    }

    fn synth_sample(&self, index: usize, channels: usize) -> (Vec<f32>, u16) {
        let phase = index as f32 / 50.0 * std::f32::consts::TAU;
        let offset = self.bursts_started as f32 * 1e-4;
        let analog = (0..channels)
            .map(|ch| offset + 1e-3 * (phase + ch as f32).sin())
            .collect();
        // encoder stripe: low for a short stretch once per rotation
        let digital = if index % 50 < 5 { 0 } else { 1 };
        (analog, digital)
    }
}

impl AcquisitionDevice for SimulatedDevice {
    fn name(&self) -> &str {
        "simulated"
    }

    fn open(&mut self, _config: &DeviceConfig) -> Result<(), ScanError> {
        if self.fail_open {
            return Err(ScanError::Device("simulated open failure".to_string()));
        }
        self.open = true;
        self.events.push(DeviceEvent::Opened);
        Ok(())
    }

    fn upload_config(&mut self, _config: &DeviceConfig) -> Result<(), ScanError> {
        self.require_open()?;
        self.events.push(DeviceEvent::Uploaded);
        Ok(())
    }

    fn set_digital_outputs(&mut self, channels: &[u8]) -> Result<(), ScanError> {
        self.require_open()?;
        self.events.push(DeviceEvent::DigitalOutputs(channels.to_vec()));
        Ok(())
    }

    fn write_digital(&mut self, channel: u8, level: bool) -> Result<(), ScanError> {
        self.require_open()?;
        if let Some(limit) = self.fail_digital_write_after {
            if self.digital_writes >= limit {
                return Err(ScanError::Device(format!(
                    "simulated write failure on DIO{channel}"
                )));
            }
        }
        self.digital_writes += 1;
        self.pin_levels.insert(channel, level);
        self.events.push(DeviceEvent::Digital { channel, level });
        Ok(())
    }

    fn update_ef(&mut self, channels: &[EfChannelConfig]) -> Result<(), ScanError> {
        self.require_open()?;
        if self.fail_pulses {
            return Err(ScanError::Device("simulated EF update failure".to_string()));
        }
        for ef in channels.iter().filter(|ef| ef.counts > 0) {
            let level = ef
                .direction_channel()
                .and_then(|dir| self.pin_levels.get(&dir).copied())
                .unwrap_or(ef.positive_level);
            let sign = if level == ef.positive_level { 1 } else { -1 };
            *self.positions.entry(ef.channel).or_insert(0) += sign * ef.counts as i64;
            self.events.push(DeviceEvent::Pulses {
                channel: ef.channel,
                counts: ef.counts,
            });
        }
        Ok(())
    }

    fn start_burst(&mut self, config: &DeviceConfig) -> Result<(), ScanError> {
        self.require_open()?;
        let labels = config
            .analog_inputs
            .iter()
            .map(|ai| ai.label.clone())
            .collect::<Vec<_>>();
        self.buffer = Burst::new(config.acquisition.sample_rate_hz, labels);
        self.active = Some(ActiveBurst {
            total: config.acquisition.samples_per_burst,
            channels: config.analog_inputs.len(),
            polls_left: self.polls_per_burst,
        });
        self.bursts_started += 1;
        self.events.push(DeviceEvent::BurstStarted);
        Ok(())
    }

    fn service_burst(&mut self) -> Result<BurstStatus, ScanError> {
        if self.fail_stream_on_burst == Some(self.bursts_started) {
            return Err(ScanError::StreamingFailed(format!(
                "simulated stream fault during burst {}",
                self.bursts_started
            )));
        }
        let Some(active) = self.active.as_mut() else {
            return Err(ScanError::StreamingFailed("no burst in progress".to_string()));
        };

        active.polls_left = active.polls_left.saturating_sub(1);
        let (total, channels, polls_left) = (active.total, active.channels, active.polls_left);

        // spread the samples evenly over the configured number of polls
        let target = if polls_left == 0 {
            total as usize
        } else {
            total as usize * (self.polls_per_burst - polls_left) as usize / self.polls_per_burst as usize
        };
        while self.buffer.sample_count() < target {
            let (analog, digital) = self.synth_sample(self.buffer.sample_count(), channels);
            self.buffer.push_sample(&analog, digital);
        }

        if polls_left == 0 {
            Ok(BurstStatus::Complete)
        } else {
            Ok(BurstStatus::InProgress)
        }
    }

    fn stop_burst(&mut self) -> Result<(), ScanError> {
        self.active = None;
        if self.fail_stop {
            return Err(ScanError::StreamingFailed("simulated stream stop failure".to_string()));
        }
        self.events.push(DeviceEvent::BurstStopped);
        Ok(())
    }

    fn burst(&self) -> &Burst {
        &self.buffer
    }

    fn clear_buffer(&mut self) {
        self.buffer.clear();
        self.events.push(DeviceEvent::BufferCleared);
    }

    fn close(&mut self) -> Result<(), ScanError> {
        if self.open {
            self.open = false;
            self.active = None;
            self.events.push(DeviceEvent::Closed);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_completes_after_configured_polls() {
        let mut config = DeviceConfig::default();
        config.acquisition.samples_per_burst = 10;
        let mut device = SimulatedDevice::new().with_polls_per_burst(3);
        device.open(&config).unwrap();
        device.start_burst(&config).unwrap();

        assert_eq!(device.service_burst().unwrap(), BurstStatus::InProgress);
        assert_eq!(device.service_burst().unwrap(), BurstStatus::InProgress);
        assert_eq!(device.service_burst().unwrap(), BurstStatus::Complete);
        assert_eq!(device.burst().sample_count(), 10);
        assert_eq!(device.burst().channel_count(), 1);
    }

    #[test]
    fn test_position_follows_direction_pin() {
        let config = DeviceConfig::default();
        let mut device = SimulatedDevice::new();
        device.open(&config).unwrap();

        let mut channels = config.ef_channels.clone();
        channels[0].counts = 30;
        device.update_ef(&channels).unwrap();
        assert_eq!(device.position(0), 30);

        device.write_digital(1, false).unwrap();
        channels[0].counts = 10;
        device.update_ef(&channels).unwrap();
        assert_eq!(device.position(0), 20);
        assert_eq!(device.position(2), 0);
    }

    #[test]
    fn test_closed_device_rejects_commands() {
        let mut device = SimulatedDevice::new();
        assert!(device.write_digital(1, true).is_err());
    }

    #[test]
    fn test_digital_fault_injection() {
        let config = DeviceConfig::default();
        let mut device = SimulatedDevice::new().with_digital_fault_after(1);
        device.open(&config).unwrap();
        assert!(device.write_digital(1, true).is_ok());
        assert!(device.write_digital(3, true).is_err());
    }
}
