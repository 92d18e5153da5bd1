//! Serpentine (boustrophedon) traversal of the scan grid.
//!
//! x is the fast axis: each row sweeps the full x extent, then x reverses and
//! z advances one position. z never reverses during a scan.

use crate::geometry::ScanGeometry;
use crate::types::Cell;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalState {
    Scanning,
    RowBoundary,
    Done,
}

/// Motion implied by one traversal step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// `xi` moved one increment along `xdir`; pulse x
    StepX,
    /// `xdir` reversed and `zi` moved one increment; write the x direction
    /// bit, then pulse z
    NextRow,
    /// `xdir` reversed with no rows left; write the x direction bit and stop
    Finished,
}

#[derive(Debug, Clone)]
pub struct Serpentine {
    state: TraversalState,
}

impl Default for Serpentine {
    fn default() -> Self {
        Self::new()
    }
}

impl Serpentine {
    pub fn new() -> Self {
        Self {
            state: TraversalState::Scanning,
        }
    }

    pub fn state(&self) -> TraversalState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == TraversalState::Done
    }

    /// Move to the next cell after the current one has been visited.
    ///
    /// Indices never leave the grid; at a row end the x index stays put and
    /// only `xdir` changes. Returns `None` once the traversal is done.
    pub fn advance(&mut self, geometry: &mut ScanGeometry) -> Option<Advance> {
        loop {
            match self.state {
                TraversalState::Scanning => {
                    let next = geometry.xi as i64 + geometry.xdir.signum();
                    if geometry.contains(next, geometry.zi as i64) {
                        geometry.xi = next as u32;
                        return Some(Advance::StepX);
                    }
                    self.state = TraversalState::RowBoundary;
                }
                TraversalState::RowBoundary => {
                    geometry.xdir = geometry.xdir.opposite();
                    let next = geometry.zi as i64 + geometry.zdir.signum();
                    if geometry.contains(geometry.xi as i64, next) {
                        geometry.zi = next as u32;
                        self.state = TraversalState::Scanning;
                        return Some(Advance::NextRow);
                    }
                    self.state = TraversalState::Done;
                    return Some(Advance::Finished);
                }
                TraversalState::Done => return None,
            }
        }
    }
}

/// Visiting order of a geometry, without touching hardware
pub struct Cells {
    geometry: ScanGeometry,
    traversal: Serpentine,
    started: bool,
}

impl Iterator for Cells {
    type Item = Cell;

    fn next(&mut self) -> Option<Cell> {
        if !self.started {
            self.started = true;
            return Some(self.geometry.cell());
        }
        match self.traversal.advance(&mut self.geometry)? {
            Advance::StepX | Advance::NextRow => Some(self.geometry.cell()),
            Advance::Finished => None,
        }
    }
}

pub fn cells(geometry: &ScanGeometry) -> Cells {
    Cells {
        geometry: geometry.clone(),
        traversal: Serpentine::new(),
        started: false,
    }
}

/// Motion counts for a whole scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraversalPlan {
    pub cells: u64,
    pub x_moves: u64,
    pub z_moves: u64,
    pub x_reversals: u64,
}

pub fn plan(geometry: &ScanGeometry) -> TraversalPlan {
    let mut geometry = geometry.clone();
    let mut traversal = Serpentine::new();
    let mut plan = TraversalPlan {
        cells: 1,
        ..Default::default()
    };
    while let Some(advance) = traversal.advance(&mut geometry) {
        match advance {
            Advance::StepX => {
                plan.cells += 1;
                plan.x_moves += 1;
            }
            Advance::NextRow => {
                plan.cells += 1;
                plan.z_moves += 1;
                plan.x_reversals += 1;
            }
            Advance::Finished => plan.x_reversals += 1,
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;
    use std::collections::HashSet;

    fn order(xstep: i64, xn: i64, zstep: i64, zn: i64) -> Vec<(u32, u32)> {
        let geometry = ScanGeometry::new(xstep, xn, zstep, zn).unwrap();
        cells(&geometry).map(|c| (c.xi, c.zi)).collect()
    }

    #[test]
    fn test_three_by_two_order() {
        assert_eq!(
            order(5, 3, 5, 2),
            vec![(0, 0), (1, 0), (2, 0), (2, 1), (1, 1), (0, 1)]
        );
    }

    #[test]
    fn test_negative_steps_walk_down() {
        assert_eq!(
            order(-5, 2, -5, 2),
            vec![(1, 1), (0, 1), (0, 0), (1, 0)]
        );
    }

    #[test]
    fn test_every_cell_visited_once() {
        for xn in 1..=5 {
            for zn in 1..=5 {
                for (xs, zs) in [(1, 1), (-1, 1), (1, -1), (-1, -1)] {
                    let visited = order(xs, xn, zs, zn);
                    let unique: HashSet<_> = visited.iter().copied().collect();
                    assert_eq!(visited.len() as i64, xn * zn);
                    assert_eq!(unique.len(), visited.len());
                    assert!(visited.iter().all(|&(x, z)| (x as i64) < xn && (z as i64) < zn));
                }
            }
        }
    }

    #[test]
    fn test_x_direction_alternates_z_constant() {
        let mut geometry = ScanGeometry::new(3, 4, -2, 5).unwrap();
        let mut traversal = Serpentine::new();
        let mut x_dirs = vec![geometry.xdir];
        while let Some(advance) = traversal.advance(&mut geometry) {
            assert_eq!(geometry.zdir, Direction::Negative);
            if advance != Advance::StepX {
                x_dirs.push(geometry.xdir);
            }
        }
        assert_eq!(x_dirs.len(), 6);
        for pair in x_dirs.windows(2) {
            assert_eq!(pair[1], pair[0].opposite());
        }
    }

    #[test]
    fn test_single_column_never_steps_x() {
        let geometry = ScanGeometry::new(5, 1, 5, 3).unwrap();
        let plan = plan(&geometry);
        assert_eq!(plan.cells, 3);
        assert_eq!(plan.x_moves, 0);
        assert_eq!(plan.z_moves, 2);
    }

    #[test]
    fn test_single_row_never_steps_z() {
        let geometry = ScanGeometry::new(5, 4, 5, 1).unwrap();
        let plan = plan(&geometry);
        assert_eq!(plan.cells, 4);
        assert_eq!(plan.x_moves, 3);
        assert_eq!(plan.z_moves, 0);
        assert_eq!(plan.x_reversals, 1);
    }

    #[test]
    fn test_done_is_terminal() {
        let mut geometry = ScanGeometry::new(1, 1, 1, 1).unwrap();
        let mut traversal = Serpentine::new();
        assert_eq!(traversal.advance(&mut geometry), Some(Advance::Finished));
        assert!(traversal.is_done());
        assert_eq!(traversal.advance(&mut geometry), None);
        assert_eq!(geometry.cell(), Cell::new(0, 0));
    }

    #[test]
    fn test_order_is_repeatable() {
        let geometry = ScanGeometry::new(-7, 6, 3, 4).unwrap();
        let first: Vec<_> = cells(&geometry).collect();
        let second: Vec<_> = cells(&geometry).collect();
        assert_eq!(first, second);
    }
}
