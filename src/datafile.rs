//! Binary data files, one per grid cell.
//!
//! Layout (little endian):
//!
//! | field          | type                               |
//! |----------------|------------------------------------|
//! | magic          | `b"WSCN"`                          |
//! | version        | u16                                |
//! | header length  | u32                                |
//! | header         | JSON [`DataHeader`]                |
//! | channel count  | u32                                |
//! | sample count   | u64                                |
//! | analog samples | f32 × channels × samples           |
//! | digital states | u16 × samples                      |

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::config::DeviceConfig;
use crate::device::Burst;
use crate::error::ScanError;
use crate::types::Cell;

pub const MAGIC: &[u8; 4] = b"WSCN";
pub const FORMAT_VERSION: u16 = 1;
const MAX_HEADER_LEN: u32 = 16 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataHeader {
    pub timestamp: DateTime<Utc>,
    pub cell: Option<Cell>,
    pub sample_rate_hz: f64,
    pub channel_labels: Vec<String>,
    /// Descriptor snapshot, including metadata, at the time of capture
    pub device: DeviceConfig,
}

impl DataHeader {
    pub fn new(device: &DeviceConfig, burst: &Burst, cell: Option<Cell>) -> Self {
        Self {
            timestamp: Utc::now(),
            cell,
            sample_rate_hz: burst.sample_rate_hz,
            channel_labels: burst.channel_labels.clone(),
            device: device.clone(),
        }
    }
}

pub fn write_data<W: Write>(writer: &mut W, header: &DataHeader, burst: &Burst) -> Result<(), ScanError> {
    let header_json = serde_json::to_vec(header)?;

    writer.write_all(MAGIC)?;
    writer.write_u16::<LittleEndian>(FORMAT_VERSION)?;
    writer.write_u32::<LittleEndian>(header_json.len() as u32)?;
    writer.write_all(&header_json)?;

    writer.write_u32::<LittleEndian>(burst.channel_count() as u32)?;
    writer.write_u64::<LittleEndian>(burst.sample_count() as u64)?;
    for &value in &burst.analog {
        writer.write_f32::<LittleEndian>(value)?;
    }
    for &state in &burst.digital {
        writer.write_u16::<LittleEndian>(state)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_data<R: Read>(reader: &mut R) -> Result<(DataHeader, Burst), ScanError> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(ScanError::Protocol("not a wscan data file".to_string()));
    }
    let version = reader.read_u16::<LittleEndian>()?;
    if version != FORMAT_VERSION {
        return Err(ScanError::Protocol(format!(
            "unsupported data file version {version}"
        )));
    }

    let header_len = reader.read_u32::<LittleEndian>()?;
    if header_len > MAX_HEADER_LEN {
        return Err(ScanError::Protocol(format!("header length {header_len} too large")));
    }
    let mut header_json = vec![0u8; header_len as usize];
    reader.read_exact(&mut header_json)?;
    let header: DataHeader = serde_json::from_slice(&header_json)?;

    let channels = reader.read_u32::<LittleEndian>()? as usize;
    let samples = reader.read_u64::<LittleEndian>()?;
    if channels != header.channel_labels.len() {
        return Err(ScanError::Protocol(format!(
            "header lists {} channels, data has {channels}",
            header.channel_labels.len()
        )));
    }

    let values = usize::try_from(samples)
        .ok()
        .and_then(|samples| samples.checked_mul(channels))
        .ok_or_else(|| {
            ScanError::Protocol(format!(
                "sample count {samples} x {channels} channels is not addressable"
            ))
        })?;

    let mut burst = Burst::new(header.sample_rate_hz, header.channel_labels.clone());
    burst.analog = (0..values)
        .map(|_| reader.read_f32::<LittleEndian>())
        .collect::<Result<_, _>>()?;
    burst.digital = (0..samples)
        .map(|_| reader.read_u16::<LittleEndian>())
        .collect::<Result<_, _>>()?;

    Ok((header, burst))
}

/// Create `path` and write one burst to it
pub fn save(path: &Path, header: &DataHeader, burst: &Burst) -> Result<(), ScanError> {
    let file = File::create(path)
        .map_err(|e| ScanError::io(e, format!("creating {}", path.display())))?;
    let mut writer = BufWriter::new(file);
    write_data(&mut writer, header, burst)
}

pub fn load(path: &Path) -> Result<(DataHeader, Burst), ScanError> {
    let file = File::open(path)
        .map_err(|e| ScanError::io(e, format!("opening {}", path.display())))?;
    read_data(&mut BufReader::new(file))
}
