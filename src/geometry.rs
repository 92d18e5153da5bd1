use serde::Serialize;

use crate::config::DeviceConfig;
use crate::error::ScanError;
use crate::types::{split_step, Cell, Direction};

/// Grid layout and traversal position of a scan.
///
/// Indices are in grid units with increasing index always meaning motion in
/// the positive direction of the axis. A negative step therefore starts the
/// scan at the high end of that axis and walks down.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanGeometry {
    pub xstep: i64,
    pub zstep: i64,
    pub xn: u32,
    pub zn: u32,
    pub xdir: Direction,
    pub zdir: Direction,
    pub xi: u32,
    pub zi: u32,
    pub x0: u32,
    pub z0: u32,
    #[serde(skip)]
    x_pulses: u32,
    #[serde(skip)]
    z_pulses: u32,
}

impl ScanGeometry {
    pub fn new(xstep: i64, xn: i64, zstep: i64, zn: i64) -> Result<Self, ScanError> {
        if xn <= 0 || zn <= 0 {
            return Err(ScanError::InvalidGeometry { xn, zn });
        }
        let (xn, zn) = match (u32::try_from(xn), u32::try_from(zn)) {
            (Ok(xn), Ok(zn)) => (xn, zn),
            _ => return Err(ScanError::InvalidGeometry { xn, zn }),
        };

        let (x_pulses, xdir) = pulses_per_step("x", xstep, xn)?;
        let (z_pulses, zdir) = pulses_per_step("z", zstep, zn)?;
        let xi = start_index(xdir, xn);
        let zi = start_index(zdir, zn);

        Ok(Self {
            xstep,
            zstep,
            xn,
            zn,
            xdir,
            zdir,
            xi,
            zi,
            x0: xi,
            z0: zi,
            x_pulses,
            z_pulses,
        })
    }

    /// Build from the `xstep`, `xn`, `zstep`, `zn` integer metadata
    pub fn from_config(config: &DeviceConfig) -> Result<Self, ScanError> {
        let lookup = |key: &str| {
            config.get_meta_int(key).map_err(|e| {
                ScanError::Config(format!(
                    "missing mandatory meta parameter(s): xstep, xn, zstep, zn ({e})"
                ))
            })
        };
        let xstep = lookup("xstep")?;
        let xn = lookup("xn")?;
        let zstep = lookup("zstep")?;
        let zn = lookup("zn")?;
        Self::new(xstep, xn, zstep, zn)
    }

    /// Unsigned pulses per x increment
    pub fn x_pulses(&self) -> u32 {
        self.x_pulses
    }

    /// Unsigned pulses per z increment
    pub fn z_pulses(&self) -> u32 {
        self.z_pulses
    }

    pub fn cell(&self) -> Cell {
        Cell::new(self.xi, self.zi)
    }

    pub fn origin(&self) -> Cell {
        Cell::new(self.x0, self.z0)
    }

    pub fn cell_count(&self) -> u64 {
        self.xn as u64 * self.zn as u64
    }

    pub fn contains(&self, xi: i64, zi: i64) -> bool {
        (0..self.xn as i64).contains(&xi) && (0..self.zn as i64).contains(&zi)
    }
}

/// Pulse magnitude of one step, checked so that both a single step and the
/// full traversal of the axis fit the EF pulse counter.
fn pulses_per_step(axis: &str, step: i64, n: u32) -> Result<(u32, Direction), ScanError> {
    let (pulses, direction) = split_step(step).ok_or_else(|| {
        ScanError::Config(format!(
            "{axis}step {step} exceeds the pulse counter limit of {}",
            u32::MAX
        ))
    })?;
    let span = pulses as u64 * (n as u64 - 1);
    if span > u32::MAX as u64 {
        return Err(ScanError::Config(format!(
            "{axis} travel of {span} pulses ({axis}step {step} x {} steps) exceeds the pulse counter limit of {}",
            n - 1,
            u32::MAX
        )));
    }
    Ok((pulses, direction))
}

fn start_index(direction: Direction, n: u32) -> u32 {
    match direction {
        Direction::Positive => 0,
        Direction::Negative => n - 1,
    }
}
