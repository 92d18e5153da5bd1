//! LabJack T-series backend over Modbus TCP.
//!
//! Only the registers this system needs are implemented: DIO lines, the EF
//! pulse-output feature on clock 0, and command-response reads of analog
//! inputs and the DIO state word. Bursts are software timed: one sample row
//! is read whenever its scheduled time has passed.

use log::{debug, info, warn};
use std::time::{Duration, Instant};

use super::modbus::{ConnectionTimeouts, ModbusClient};
use super::{AcquisitionDevice, Burst, BurstStatus};
use crate::config::{DeviceConfig, EfChannelConfig};
use crate::error::ScanError;

// Register map
const AIN0: u16 = 0;
const DIO0: u16 = 2000;
const DIO_STATE: u16 = 2800;
const DIO_DIRECTION: u16 = 2850;
const DIO_EF_CLOCK0_ENABLE: u16 = 44900;
const DIO_EF_CLOCK0_DIVISOR: u16 = 44901;
const DIO_EF_CLOCK0_ROLL_VALUE: u16 = 44904;
const DIO0_EF_ENABLE: u16 = 44000;
const DIO0_EF_INDEX: u16 = 44100;
const DIO0_EF_OPTIONS: u16 = 44200;
const DIO0_EF_CONFIG_A: u16 = 44300;
const DIO0_EF_CONFIG_B: u16 = 44400;
const DIO0_EF_CONFIG_C: u16 = 44500;

/// EF feature index for pulse output
const EF_PULSE_OUT: u32 = 2;
/// Core clock feeding the EF clock sources (Hz)
const CORE_CLOCK_HZ: f64 = 80e6;

fn ain_register(channel: u8) -> u16 {
    AIN0 + 2 * channel as u16
}

/// `DIO_DIRECTION` bit mask with one bit set per output line
fn output_mask(channels: &[u8]) -> Result<u32, ScanError> {
    channels.iter().try_fold(0u32, |mask, &channel| {
        1u32.checked_shl(channel as u32)
            .map(|bit| mask | bit)
            .ok_or_else(|| ScanError::Device(format!("DIO{channel} is not a digital line")))
    })
}

fn ef_register(base: u16, channel: u8) -> u16 {
    base + 2 * channel as u16
}

/// Clock-0 roll value producing the requested pulse frequency with divisor 1
pub fn roll_value(frequency_hz: f64) -> Result<u32, ScanError> {
    let roll = (CORE_CLOCK_HZ / frequency_hz).round();
    if !(2.0..=u32::MAX as f64).contains(&roll) {
        return Err(ScanError::Config(format!(
            "pulse frequency {frequency_hz} Hz is outside the EF clock range"
        )));
    }
    Ok(roll as u32)
}

struct SoftwareBurst {
    started: Instant,
    period: Duration,
    total: u32,
    channels: Vec<u8>,
    late: u32,
}

pub struct LabJackDevice {
    client: Option<ModbusClient>,
    active: Option<SoftwareBurst>,
    buffer: Burst,
}

impl Default for LabJackDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl LabJackDevice {
    pub fn new() -> Self {
        Self {
            client: None,
            active: None,
            buffer: Burst::default(),
        }
    }

    fn client(&mut self) -> Result<&mut ModbusClient, ScanError> {
        self.client
            .as_mut()
            .ok_or_else(|| ScanError::Device("LabJack connection is not open".to_string()))
    }

    fn read_sample(&mut self, channels: &[u8]) -> Result<(Vec<f32>, u16), ScanError> {
        let client = self.client()?;
        let mut analog = Vec::with_capacity(channels.len());
        for &channel in channels {
            analog.push(client.read_f32(ain_register(channel))?);
        }
        let state = client.read_u32(DIO_STATE)?;
        Ok((analog, state as u16))
    }
}

impl AcquisitionDevice for LabJackDevice {
    fn name(&self) -> &str {
        "labjack"
    }

    fn open(&mut self, config: &DeviceConfig) -> Result<(), ScanError> {
        let connection = &config.connection;
        let timeouts = ConnectionTimeouts {
            connect: Duration::from_millis(connection.connect_timeout_ms),
            read: Duration::from_millis(connection.read_timeout_ms),
            write: Duration::from_millis(connection.read_timeout_ms),
        };
        let client = ModbusClient::connect(&connection.address, connection.port, &timeouts)?;
        self.client = Some(client);
        info!(
            "Connected to LabJack at {}:{}",
            connection.address, connection.port
        );
        Ok(())
    }

    fn upload_config(&mut self, config: &DeviceConfig) -> Result<(), ScanError> {
        let roll = roll_value(config.ef.frequency_hz)?;
        let client = self.client()?;

        client.write_u16(DIO_EF_CLOCK0_ENABLE, 0)?;
        client.write_u16(DIO_EF_CLOCK0_DIVISOR, 1)?;
        client.write_u32(DIO_EF_CLOCK0_ROLL_VALUE, roll)?;
        client.write_u16(DIO_EF_CLOCK0_ENABLE, 1)?;

        for ef in &config.ef_channels {
            let ch = ef.channel;
            client.write_u32(ef_register(DIO0_EF_ENABLE, ch), 0)?;
            client.write_u32(ef_register(DIO0_EF_INDEX, ch), EF_PULSE_OUT)?;
            client.write_u32(ef_register(DIO0_EF_OPTIONS, ch), 0)?;
            // 50% duty: rise at 0, fall at half the roll
            client.write_u32(ef_register(DIO0_EF_CONFIG_A, ch), roll / 2)?;
            client.write_u32(ef_register(DIO0_EF_CONFIG_B, ch), 0)?;
            debug!("Configured DIO{ch} as pulse output ({})", ef.label);
        }

        debug!(
            "EF clock 0: roll {roll} for {:.1} Hz",
            config.ef.frequency_hz
        );
        Ok(())
    }

    fn set_digital_outputs(&mut self, channels: &[u8]) -> Result<(), ScanError> {
        let mask = output_mask(channels)?;
        self.client()?.write_u32(DIO_DIRECTION, mask)
    }

    fn write_digital(&mut self, channel: u8, level: bool) -> Result<(), ScanError> {
        self.client()?
            .write_u16(DIO0 + channel as u16, level as u16)
    }

    fn update_ef(&mut self, channels: &[EfChannelConfig]) -> Result<(), ScanError> {
        let client = self.client()?;
        for ef in channels.iter().filter(|ef| ef.counts > 0) {
            client.write_u32(ef_register(DIO0_EF_ENABLE, ef.channel), 0)?;
            client.write_u32(ef_register(DIO0_EF_CONFIG_C, ef.channel), ef.counts)?;
            client.write_u32(ef_register(DIO0_EF_ENABLE, ef.channel), 1)?;
        }
        Ok(())
    }

    fn start_burst(&mut self, config: &DeviceConfig) -> Result<(), ScanError> {
        self.client()?;
        let labels = config
            .analog_inputs
            .iter()
            .map(|ai| ai.label.clone())
            .collect();
        self.buffer = Burst::new(config.acquisition.sample_rate_hz, labels);
        self.active = Some(SoftwareBurst {
            started: Instant::now(),
            period: Duration::from_secs_f64(1.0 / config.acquisition.sample_rate_hz),
            total: config.acquisition.samples_per_burst,
            channels: config.analog_inputs.iter().map(|ai| ai.channel).collect(),
            late: 0,
        });
        Ok(())
    }

    fn service_burst(&mut self) -> Result<BurstStatus, ScanError> {
        let Some(active) = self.active.as_ref() else {
            return Err(ScanError::StreamingFailed("no burst in progress".to_string()));
        };
        let collected = self.buffer.sample_count() as u32;
        if collected >= active.total {
            return Ok(BurstStatus::Complete);
        }

        let due = active.started + active.period * collected;
        let now = Instant::now();
        if now < due {
            return Ok(BurstStatus::InProgress);
        }
        let late = now.duration_since(due) > active.period;
        let channels = active.channels.clone();

        let (analog, digital) = self
            .read_sample(&channels)
            .map_err(|e| ScanError::StreamingFailed(e.to_string()))?;
        self.buffer.push_sample(&analog, digital);

        if let Some(active) = self.active.as_mut() {
            if late {
                active.late += 1;
            }
            if self.buffer.sample_count() as u32 >= active.total {
                if active.late > 0 {
                    warn!(
                        "{} of {} samples were read more than one period late",
                        active.late, active.total
                    );
                }
                return Ok(BurstStatus::Complete);
            }
        }
        Ok(BurstStatus::InProgress)
    }

    fn stop_burst(&mut self) -> Result<(), ScanError> {
        self.active = None;
        Ok(())
    }

    fn burst(&self) -> &Burst {
        &self.buffer
    }

    fn clear_buffer(&mut self) {
        self.buffer.clear();
    }

    fn close(&mut self) -> Result<(), ScanError> {
        self.active = None;
        if self.client.take().is_some() {
            info!("LabJack connection closed");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.client.is_some()
    }
}
