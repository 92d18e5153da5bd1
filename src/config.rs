use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::ScanError;
use crate::meta::{self, MetaValue, RawMetaOverride, META_MAX_ENTRIES};
use crate::types::Axis;

/// Config file used by both binaries when `-c` is not given
pub const DEFAULT_CONFIG_FILE: &str = "wscan.toml";

/// Highest DIO line on a T-series device (FIO0..CIO3)
pub const DIO_MAX_CHANNEL: u8 = 22;

/// Mechanical settle allowance added after every scan motion (µs)
pub const DEFAULT_SETTLE_US: u64 = 100_000;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub console: ConsoleConfig,
    #[serde(default)]
    pub scan: ScanOptions,
    #[serde(default)]
    pub device: DeviceConfig,
}

impl AppConfig {
    /// Validate all configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.device
            .validate()
            .map_err(|e| ConfigError::Message(format!("Invalid device configuration: {e}")))?;
        self.scan.validate()?;
        Ok(())
    }

    /// Resolve command-line metadata overrides and apply them to the device
    /// descriptor, all or nothing.
    ///
    /// Any override is an error when `scan.allow_meta_override` is off.
    pub fn apply_meta_overrides(&mut self, raw: &[RawMetaOverride]) -> Result<(), ScanError> {
        if raw.is_empty() {
            return Ok(());
        }
        if !self.scan.allow_meta_override {
            return Err(ScanError::Config(
                "metadata overrides are disabled (scan.allow_meta_override = false)".to_string(),
            ));
        }
        let overrides = meta::resolve_overrides(raw)?;
        self.device.apply_overrides(&overrides)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ConsoleConfig {
    pub verbosity: String,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            verbosity: "info".to_string(),
        }
    }
}

/// When the per-cell `xi`/`zi` metadata is written relative to the burst
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MetaTiming {
    /// Publish indices before starting the burst
    #[default]
    Before,
    /// Publish indices after the burst completes, before the file is written
    After,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ScanOptions {
    /// Drive the stage back to the starting cell after the last cell
    pub return_to_origin: bool,
    pub meta_timing: MetaTiming,
    /// Accept `-i/-f/-s key=value` metadata overrides on the command line
    pub allow_meta_override: bool,
    /// Append a JSON-lines record per cell to `scan_log.jsonl` in the destination
    pub record_log: bool,
    /// Settle allowance added to every motion wait (µs)
    pub settle_us: u64,
    /// Upper bound on a single burst; unbounded when absent
    pub burst_timeout_ms: Option<u64>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            return_to_origin: false,
            meta_timing: MetaTiming::Before,
            allow_meta_override: true,
            record_log: true,
            settle_us: DEFAULT_SETTLE_US,
            burst_timeout_ms: None,
        }
    }
}

impl ScanOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.burst_timeout_ms == Some(0) {
            return Err(ConfigError::Message(
                "scan.burst_timeout_ms must be greater than zero when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn settle(&self) -> Duration {
        Duration::from_micros(self.settle_us)
    }

    pub fn burst_timeout(&self) -> Option<Duration> {
        self.burst_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// LabJack T-series device over Modbus TCP
    #[default]
    LabJack,
    /// In-process simulated device, no hardware
    Simulated,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ConnectionConfig {
    pub backend: Backend,
    pub address: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            backend: Backend::LabJack,
            address: "192.168.1.10".to_string(),
            port: 502,
            connect_timeout_ms: 5000,
            read_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub sample_rate_hz: f64,
    pub samples_per_burst: u32,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 1000.0,
            samples_per_burst: 2000,
        }
    }
}

impl AcquisitionConfig {
    /// Nominal wall-clock length of one burst
    pub fn burst_duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples_per_burst as f64 / self.sample_rate_hz)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AnalogInputConfig {
    pub channel: u8,
    #[serde(default)]
    pub label: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct DigitalInputConfig {
    /// DIO lines sampled alongside the analog inputs (disc encoder)
    #[serde(default)]
    pub channels: Vec<u8>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EfClockConfig {
    /// Pulse frequency of every EF output (Hz)
    pub frequency_hz: f64,
}

impl Default for EfClockConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 1000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EfSignal {
    Count,
    Pwm,
    Frequency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EfDirection {
    Input,
    Output,
}

fn default_positive_level() -> bool {
    true
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EfChannelConfig {
    /// DIO line emitting the pulse train; the direction bit is `channel + 1`
    pub channel: u8,
    pub signal: EfSignal,
    pub direction: EfDirection,
    #[serde(default)]
    pub label: String,
    /// Physical units per pulse, used by the point-to-point mover
    #[serde(default)]
    pub calibration: Option<f64>,
    /// Direction-pin level for motion toward increasing grid index
    #[serde(default = "default_positive_level")]
    pub positive_level: bool,
    /// Pulses to emit on the next EF update
    #[serde(default)]
    pub counts: u32,
}

impl EfChannelConfig {
    /// DIO line of the direction bit, `None` past the end of the `u8` range
    pub fn direction_channel(&self) -> Option<u8> {
        self.channel.checked_add(1)
    }
}

/// Device descriptor: hardware layout plus named metadata.
///
/// A snapshot of this struct is written into the header of every data file.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct DeviceConfig {
    pub connection: ConnectionConfig,
    pub acquisition: AcquisitionConfig,
    pub analog_inputs: Vec<AnalogInputConfig>,
    pub digital_inputs: DigitalInputConfig,
    pub ef: EfClockConfig,
    /// Ordered `[x-pulse, z-pulse]`
    pub ef_channels: Vec<EfChannelConfig>,
    pub meta: BTreeMap<String, MetaValue>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            acquisition: AcquisitionConfig::default(),
            analog_inputs: vec![AnalogInputConfig {
                channel: 0,
                label: "wire current".to_string(),
            }],
            digital_inputs: DigitalInputConfig { channels: vec![4] },
            ef: EfClockConfig::default(),
            ef_channels: vec![
                EfChannelConfig {
                    channel: 0,
                    signal: EfSignal::Count,
                    direction: EfDirection::Output,
                    label: "x pulse".to_string(),
                    calibration: None,
                    positive_level: true,
                    counts: 0,
                },
                EfChannelConfig {
                    channel: 2,
                    signal: EfSignal::Count,
                    direction: EfDirection::Output,
                    label: "z pulse".to_string(),
                    calibration: None,
                    positive_level: true,
                    counts: 0,
                },
            ],
            meta: BTreeMap::new(),
        }
    }
}

impl DeviceConfig {
    /// Check channel roles and acquisition settings.
    ///
    /// Does not require the scan metadata; the point-to-point mover shares
    /// this descriptor without needing a grid.
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.ef_channels.len() != 2 {
            return Err(ScanError::Config(format!(
                "requires exactly two extended feature channels [x-pulse, z-pulse], found {}",
                self.ef_channels.len()
            )));
        }
        for (axis, ef) in [Axis::X, Axis::Z].into_iter().zip(&self.ef_channels) {
            if ef.signal != EfSignal::Count || ef.direction != EfDirection::Output {
                return Err(ScanError::Config(format!(
                    "the {axis} EF channel (DIO{}) is not a COUNT output",
                    ef.channel
                )));
            }
            if let Some(cal) = ef.calibration {
                if !(cal.is_finite() && cal > 0.0) {
                    return Err(ScanError::Config(format!(
                        "the {axis} EF calibration must be positive, got {cal}"
                    )));
                }
            }
        }

        for (axis, ef) in [Axis::X, Axis::Z].into_iter().zip(&self.ef_channels) {
            if !ef.direction_channel().is_some_and(|dir| dir <= DIO_MAX_CHANNEL) {
                return Err(ScanError::Config(format!(
                    "the {axis} EF channel DIO{} needs DIO{} as its direction bit; lines stop at DIO{DIO_MAX_CHANNEL}",
                    ef.channel,
                    ef.channel as u16 + 1
                )));
            }
        }

        let (x, z) = (&self.ef_channels[0], &self.ef_channels[1]);
        if x.channel.abs_diff(z.channel) < 2 {
            return Err(ScanError::Config(format!(
                "EF pulse channels DIO{} and DIO{} must be at least two apart; the line above each is its direction bit",
                x.channel, z.channel
            )));
        }

        let inputs: Vec<u8> = self
            .analog_inputs
            .iter()
            .map(|ai| ai.channel)
            .collect();
        for ef in &self.ef_channels {
            let collides = [Some(ef.channel), ef.direction_channel()]
                .iter()
                .flatten()
                .any(|line| self.digital_inputs.channels.contains(line));
            if collides {
                return Err(ScanError::Config(format!(
                    "digital input list collides with EF channel DIO{} or its direction bit",
                    ef.channel
                )));
            }
        }
        if let Some(&line) = self
            .digital_inputs
            .channels
            .iter()
            .find(|&&line| line > DIO_MAX_CHANNEL)
        {
            return Err(ScanError::Config(format!(
                "digital input DIO{line} is out of range (max DIO{DIO_MAX_CHANNEL})"
            )));
        }
        if inputs.is_empty() {
            log::warn!("No analog inputs configured; bursts will carry digital data only");
        } else if inputs.len() != 1 {
            log::warn!(
                "Expected a single analog input (wire current), found {}",
                inputs.len()
            );
        }
        if self.digital_inputs.channels.is_empty() {
            log::warn!("No digital input configured for the disc encoder");
        }

        if !(self.ef.frequency_hz.is_finite() && self.ef.frequency_hz > 0.0) {
            return Err(ScanError::Config(format!(
                "ef.frequency_hz must be positive, got {}",
                self.ef.frequency_hz
            )));
        }
        if !(self.acquisition.sample_rate_hz.is_finite() && self.acquisition.sample_rate_hz > 0.0) {
            return Err(ScanError::Config(format!(
                "acquisition.sample_rate_hz must be positive, got {}",
                self.acquisition.sample_rate_hz
            )));
        }
        if self.acquisition.samples_per_burst == 0 {
            return Err(ScanError::Config(
                "acquisition.samples_per_burst must be greater than zero".to_string(),
            ));
        }

        if self.meta.len() > META_MAX_ENTRIES {
            return Err(ScanError::Config(format!(
                "too many metadata entries ({}, max {META_MAX_ENTRIES})",
                self.meta.len()
            )));
        }
        for key in self.meta.keys() {
            meta::validate_key(key)?;
        }

        Ok(())
    }

    pub fn ef_channel(&self, axis: Axis) -> Result<&EfChannelConfig, ScanError> {
        self.ef_channels.get(axis.ef_index()).ok_or_else(|| {
            ScanError::Config(format!("no EF channel configured for the {axis} axis"))
        })
    }

    pub fn ef_channel_mut(&mut self, axis: Axis) -> Result<&mut EfChannelConfig, ScanError> {
        self.ef_channels.get_mut(axis.ef_index()).ok_or_else(|| {
            ScanError::Config(format!("no EF channel configured for the {axis} axis"))
        })
    }

    pub fn direction_channel(&self, axis: Axis) -> Result<u8, ScanError> {
        let ef = self.ef_channel(axis)?;
        ef.direction_channel().ok_or_else(|| {
            ScanError::Config(format!(
                "the {axis} EF channel DIO{} has no line above it for the direction bit",
                ef.channel
            ))
        })
    }

    pub fn pulse_frequency(&self) -> f64 {
        self.ef.frequency_hz
    }

    pub fn meta(&self, key: &str) -> Option<&MetaValue> {
        self.meta.get(key)
    }

    pub fn get_meta_int(&self, key: &str) -> Result<i64, ScanError> {
        match self.meta.get(key) {
            Some(MetaValue::Int(v)) => Ok(*v),
            Some(other) => Err(ScanError::Config(format!(
                "metadata '{key}' must be an integer, found {}",
                other.type_name()
            ))),
            None => Err(ScanError::Config(format!("missing integer metadata '{key}'"))),
        }
    }

    pub fn get_meta_float(&self, key: &str) -> Result<f64, ScanError> {
        self.meta
            .get(key)
            .ok_or_else(|| ScanError::Config(format!("missing float metadata '{key}'")))?
            .as_float()
            .ok_or_else(|| ScanError::Config(format!("metadata '{key}' must be numeric")))
    }

    pub fn get_meta_str(&self, key: &str) -> Result<&str, ScanError> {
        self.meta
            .get(key)
            .ok_or_else(|| ScanError::Config(format!("missing string metadata '{key}'")))?
            .as_str()
            .ok_or_else(|| ScanError::Config(format!("metadata '{key}' must be a string")))
    }

    /// Insert or replace a metadata entry.
    ///
    /// Fails when the key is malformed or when adding a new key would
    /// overflow the table.
    pub fn put_meta(&mut self, key: &str, value: MetaValue) -> Result<(), ScanError> {
        meta::validate_key(key)?;
        if !self.meta.contains_key(key) && self.meta.len() >= META_MAX_ENTRIES {
            return Err(ScanError::Config(format!(
                "metadata table is full ({META_MAX_ENTRIES} entries); cannot add '{key}'"
            )));
        }
        self.meta.insert(key.to_string(), value);
        Ok(())
    }

    /// Apply resolved command-line overrides, all or nothing
    pub fn apply_overrides(&mut self, overrides: &[(String, MetaValue)]) -> Result<(), ScanError> {
        let mut staged = self.meta.clone();
        for (key, value) in overrides {
            if !staged.contains_key(key) && staged.len() >= META_MAX_ENTRIES {
                return Err(ScanError::Config(format!(
                    "metadata table is full ({META_MAX_ENTRIES} entries); cannot add '{key}'"
                )));
            }
            if let Some(previous) = staged.insert(key.clone(), value.clone()) {
                log::info!("Metadata override: {key} = {value} (was {previous})");
            } else {
                log::info!("Metadata added: {key} = {value}");
            }
        }
        self.meta = staged;
        Ok(())
    }
}

/// Load configuration from a TOML file, with `WSCAN__*` environment overrides
pub fn load_config(config_path: &Path) -> Result<AppConfig, ConfigError> {
    if !config_path.exists() {
        return Err(ConfigError::Message(format!(
            "Config file not found: {}",
            config_path.display()
        )));
    }

    let builder = Config::builder()
        .add_source(File::from(config_path))
        // e.g. WSCAN__CONSOLE__VERBOSITY=debug
        .add_source(
            Environment::with_prefix("WSCAN")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;
    let app_config = config.try_deserialize::<AppConfig>()?;

    app_config.validate()?;

    Ok(app_config)
}
