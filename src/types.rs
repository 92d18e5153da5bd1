use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ScanError;

/// Stage axis driven by an extended-feature pulse channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Z,
}

impl Axis {
    /// Position of this axis in the `[x-pulse, z-pulse]` EF channel list
    pub fn ef_index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Z => 1,
        }
    }

    pub fn letter(self) -> char {
        match self {
            Axis::X => 'x',
            Axis::Z => 'z',
        }
    }

    /// Parse an axis from a single-letter command-line argument.
    ///
    /// The stage hardware has a y-axis, but it is not driven by this system
    /// and is rejected explicitly.
    pub fn parse_letter(text: &str) -> Result<Self, ScanError> {
        let mut chars = text.chars();
        let (Some(letter), None) = (chars.next(), chars.next()) else {
            return Err(ScanError::InvalidAxis(format!(
                "'{text}': the axis must be a single character"
            )));
        };

        match letter.to_ascii_lowercase() {
            'x' => Ok(Axis::X),
            'z' => Ok(Axis::Z),
            'y' => Err(ScanError::InvalidAxis(
                "y-axis motion is not currently supported".to_string(),
            )),
            other => Err(ScanError::InvalidAxis(format!(
                "'{other}': the axis must be 'x', 'y', or 'z'"
            ))),
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// Direction of travel along an axis, in grid-index terms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Positive,
    Negative,
}

impl Direction {
    /// Direction encoded by the sign of a step value. Zero counts as positive.
    pub fn of(value: i64) -> Self {
        if value < 0 {
            Direction::Negative
        } else {
            Direction::Positive
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Positive => Direction::Negative,
            Direction::Negative => Direction::Positive,
        }
    }

    /// +1 or -1
    pub fn signum(self) -> i64 {
        match self {
            Direction::Positive => 1,
            Direction::Negative => -1,
        }
    }
}

/// Split a signed pulse count into (magnitude, direction).
///
/// `None` when the magnitude does not fit the 32-bit EF pulse counter.
pub fn split_step(step: i64) -> Option<(u32, Direction)> {
    let magnitude = u32::try_from(step.unsigned_abs()).ok()?;
    Some((magnitude, Direction::of(step)))
}

/// One `(xi, zi)` position in the scan plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub xi: u32,
    pub zi: u32,
}

impl Cell {
    pub fn new(xi: u32, zi: u32) -> Self {
        Self { xi, zi }
    }

    /// Data file name for this cell, e.g. `003_012.dat`
    pub fn file_name(&self) -> String {
        format!("{:03}_{:03}.dat", self.xi, self.zi)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.xi, self.zi)
    }
}

impl From<(u32, u32)> for Cell {
    fn from((xi, zi): (u32, u32)) -> Self {
        Cell { xi, zi }
    }
}
