use log::info;

use crate::device::AcquisitionDevice;
use crate::error::ScanError;
use crate::geometry::ScanGeometry;
use crate::motion::MotionDriver;
use crate::session::Session;
use crate::types::{Axis, Direction};

/// Pulses and direction needed on one axis to get back to the start cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReturnMove {
    pub axis: Axis,
    pub direction: Direction,
    pub pulses: u32,
}

/// Moves that take the stage from the current cell back to the origin
pub fn return_moves(geometry: &ScanGeometry) -> Result<[ReturnMove; 2], ScanError> {
    let x = return_move(Axis::X, geometry.x0, geometry.xi, geometry.x_pulses())?;
    let z = return_move(Axis::Z, geometry.z0, geometry.zi, geometry.z_pulses())?;
    Ok([x, z])
}

fn return_move(axis: Axis, origin: u32, index: u32, step: u32) -> Result<ReturnMove, ScanError> {
    let delta = origin as i64 - index as i64;
    let total = delta.unsigned_abs() * step as u64;
    let pulses = u32::try_from(total).map_err(|_| {
        ScanError::MotionFailed(format!(
            "{axis} return of {total} pulses exceeds the pulse counter limit"
        ))
    })?;
    Ok(ReturnMove {
        axis,
        direction: Direction::of(delta),
        pulses,
    })
}

/// Drive both axes back to `(x0, z0)` in one EF update.
///
/// Does not wait for the motion to finish; the stage is open loop and the
/// session is closed right after.
pub fn return_to_origin<D: AcquisitionDevice>(
    session: &mut Session<D>,
    driver: &mut MotionDriver,
    geometry: &ScanGeometry,
) -> Result<[ReturnMove; 2], ScanError> {
    let moves = return_moves(geometry)?;

    for m in moves.iter().filter(|m| m.pulses > 0) {
        driver.set_direction(session, m.axis, m.direction)?;
    }
    driver.command_pulses(session, &moves.map(|m| (m.axis, m.pulses)))?;

    info!(
        "Returning to start cell {} from {}: x {} pulses, z {} pulses",
        geometry.origin(),
        geometry.cell(),
        moves[0].pulses,
        moves[1].pulses
    );
    Ok(moves)
}
