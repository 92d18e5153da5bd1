pub mod labjack;
pub mod modbus;
pub mod simulated;

pub use labjack::LabJackDevice;
pub use simulated::{DeviceEvent, SimulatedDevice};

use serde::{Deserialize, Serialize};

use crate::config::{DeviceConfig, EfChannelConfig};
use crate::error::ScanError;

/// Progress of an in-flight burst
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurstStatus {
    InProgress,
    Complete,
}

/// Samples captured by one start/poll/stop acquisition cycle.
///
/// Analog data is stored sample-major: all channels of sample 0, then all
/// channels of sample 1, and so on. `digital` holds one DIO state word per
/// sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Burst {
    pub sample_rate_hz: f64,
    pub channel_labels: Vec<String>,
    pub analog: Vec<f32>,
    pub digital: Vec<u16>,
}

impl Burst {
    pub fn new(sample_rate_hz: f64, channel_labels: Vec<String>) -> Self {
        Self {
            sample_rate_hz,
            channel_labels,
            analog: Vec::new(),
            digital: Vec::new(),
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channel_labels.len()
    }

    pub fn sample_count(&self) -> usize {
        self.digital.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digital.is_empty()
    }

    /// Append one sample row
    pub fn push_sample(&mut self, analog: &[f32], digital: u16) {
        self.analog.extend_from_slice(analog);
        self.digital.push(digital);
    }

    /// Values of one analog channel across the burst
    pub fn channel(&self, index: usize) -> impl Iterator<Item = f32> + '_ {
        let stride = self.channel_count().max(1);
        self.analog.iter().skip(index).step_by(stride).copied()
    }

    pub fn clear(&mut self) {
        self.analog.clear();
        self.digital.clear();
    }
}

/// Hardware operations the scan controller needs from an acquisition device.
///
/// Everything vendor-specific lives behind this trait so that traversal,
/// timing and orchestration can run against [`SimulatedDevice`].
pub trait AcquisitionDevice {
    /// Human-readable backend name for logs
    fn name(&self) -> &str;

    /// Establish the hardware connection
    fn open(&mut self, config: &DeviceConfig) -> Result<(), ScanError>;

    /// Push channel and clock configuration to the device
    fn upload_config(&mut self, config: &DeviceConfig) -> Result<(), ScanError>;

    /// Mark the given DIO lines as outputs; all others become inputs
    fn set_digital_outputs(&mut self, channels: &[u8]) -> Result<(), ScanError>;

    /// Drive one DIO line
    fn write_digital(&mut self, channel: u8, level: bool) -> Result<(), ScanError>;

    /// Emit `counts` pulses on every EF channel with a non-zero count.
    ///
    /// Returns as soon as the pulse trains are started.
    fn update_ef(&mut self, channels: &[EfChannelConfig]) -> Result<(), ScanError>;

    /// Begin capturing a fixed-size burst
    fn start_burst(&mut self, config: &DeviceConfig) -> Result<(), ScanError>;

    /// Move data from the device; call repeatedly until `Complete`
    fn service_burst(&mut self) -> Result<BurstStatus, ScanError>;

    fn stop_burst(&mut self) -> Result<(), ScanError>;

    /// Samples captured by the last burst
    fn burst(&self) -> &Burst;

    /// Discard captured samples
    fn clear_buffer(&mut self);

    fn close(&mut self) -> Result<(), ScanError>;

    fn is_open(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_channel_view() {
        let mut burst = Burst::new(100.0, vec!["a".into(), "b".into()]);
        burst.push_sample(&[1.0, 10.0], 0);
        burst.push_sample(&[2.0, 20.0], 1);
        burst.push_sample(&[3.0, 30.0], 0);

        assert_eq!(burst.sample_count(), 3);
        assert_eq!(burst.channel(0).collect::<Vec<_>>(), vec![1.0, 2.0, 3.0]);
        assert_eq!(burst.channel(1).collect::<Vec<_>>(), vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_burst_without_analog_channels() {
        let mut burst = Burst::new(100.0, vec![]);
        burst.push_sample(&[], 3);
        assert_eq!(burst.sample_count(), 1);
        assert_eq!(burst.channel(0).count(), 0);
    }
}
