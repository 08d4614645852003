//! Occupancy-grid aggregation of thresholded concentration frames.
//!
//! Rasterizes the buffered frames into a fixed, north-aligned grid: a union
//! bitset records "ever exceeded the threshold" per cell, and an optional
//! hours-above counter accumulates exposure time, capped at one simulated
//! day.

use crate::dispersion::ConcentrationGrid;
use crate::frames::FrameRingBuffer;
use serde::{Deserialize, Serialize};

/// Exposure counters saturate at one simulated day.
pub const MAX_EXPOSURE_HOURS: u8 = 24;

const FT2_PER_M2: f64 = 10.763910417;
const M2_PER_MI2: f64 = 2_589_988.110336;

/// Thresholding mode applied per frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "mode", content = "value")]
pub enum ThresholdSpec {
    /// Fraction of the frame's own maximum concentration.
    Relative(f32),
    /// Fixed linear concentration cutoff.
    Absolute(f32),
}

impl ThresholdSpec {
    /// Linear cutoff for one frame.
    fn effective(self, frame: &ConcentrationGrid) -> f32 {
        let cutoff = match self {
            ThresholdSpec::Relative(alpha) => alpha * frame.max_concentration,
            ThresholdSpec::Absolute(value) => value,
        };
        // A non-positive cutoff would sweep in the upwind zeros and occupy
        // the whole domain; clamp to the smallest positive concentration.
        cutoff.max(f32::MIN_POSITIVE)
    }
}

/// Occupied area in the units collaborators consume.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AreaSummary {
    pub cells: usize,
    pub m2: f64,
    pub km2: f64,
    pub ft2: f64,
    pub mi2: f64,
}

/// North-aligned occupancy raster over the aggregation window.
///
/// The half-extent snaps up to a multiple of the resolution so it is never
/// smaller than requested; `dim = floor(2*half/resolution) + 1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OccupancyGrid {
    resolution: f32,
    half: f32,
    dim: usize,
    /// One bit per cell: concentration ever met the threshold.
    union: Vec<u64>,
    /// Simulated hours at or above the threshold, per cell.
    hours: Vec<u8>,
}

impl OccupancyGrid {
    /// Create an empty grid covering `[-half, half]` on both axes at the
    /// given resolution (m/cell).
    pub fn new(resolution: f32, half: f32) -> Self {
        let snapped = (half / resolution).ceil() * resolution;
        let dim = (2.0 * snapped / resolution).floor() as usize + 1;
        OccupancyGrid {
            resolution,
            half: snapped,
            dim,
            union: vec![0; (dim * dim).div_ceil(64)],
            hours: vec![0; dim * dim],
        }
    }

    pub fn resolution(&self) -> f32 {
        self.resolution
    }

    pub fn half_extent(&self) -> f32 {
        self.half
    }

    /// Cells per side.
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn is_occupied(&self, col: usize, row: usize) -> bool {
        let index = row * self.dim + col;
        (self.union[index >> 6] & (1 << (index & 63))) != 0
    }

    /// Simulated hours the cell spent at or above the threshold.
    pub fn hours_above(&self, col: usize, row: usize) -> u8 {
        self.hours[row * self.dim + col]
    }

    /// Cell center in local east/north meters.
    pub fn cell_center(&self, col: usize, row: usize) -> (f32, f32) {
        (
            -self.half + col as f32 * self.resolution,
            -self.half + row as f32 * self.resolution,
        )
    }

    fn set_occupied(&mut self, index: usize) {
        self.union[index >> 6] |= 1 << (index & 63);
    }

    /// Fold one frame into the grid.
    ///
    /// Every frame cell at or above the effective cutoff is mapped from its
    /// frame-local east/north offsets into this grid's axes, discarded when
    /// outside the half-extent, and marked occupied. With
    /// `accumulate_exposure` the cell's hours-above counter advances too,
    /// saturating at [`MAX_EXPOSURE_HOURS`]. Union growth is monotonic.
    pub fn apply(
        &mut self,
        frame: &ConcentrationGrid,
        threshold: ThresholdSpec,
        accumulate_exposure: bool,
    ) {
        let cutoff = threshold.effective(frame);

        for row in 0..frame.n {
            for col in 0..frame.n {
                if frame.value(col, row) < cutoff {
                    continue;
                }
                let center = frame.cell_center(col, row);
                if center.x.abs() > self.half || center.y.abs() > self.half {
                    continue;
                }
                let grid_col = ((center.x + self.half) / self.resolution).round() as isize;
                let grid_row = ((center.y + self.half) / self.resolution).round() as isize;
                let dim = self.dim as isize;
                if grid_col < 0 || grid_col >= dim || grid_row < 0 || grid_row >= dim {
                    continue;
                }

                let index = grid_row as usize * self.dim + grid_col as usize;
                self.set_occupied(index);
                if accumulate_exposure {
                    self.hours[index] = (self.hours[index] + 1).min(MAX_EXPOSURE_HOURS);
                }
            }
        }
    }

    /// Number of cells ever at or above the threshold.
    pub fn occupied_cells(&self) -> usize {
        self.union.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Occupied area from the union bitset.
    pub fn area(&self) -> AreaSummary {
        let cells = self.occupied_cells();
        let m2 = cells as f64 * f64::from(self.resolution) * f64::from(self.resolution);
        AreaSummary {
            cells,
            m2,
            km2: m2 / 1e6,
            ft2: m2 * FT2_PER_M2,
            mi2: m2 / M2_PER_MI2,
        }
    }
}

/// Aggregate every buffered frame into a fresh occupancy grid.
///
/// The grid is sized from the widest buffered frame so no frame is clipped;
/// frames fold in generation order (oldest first) so exposure counters read
/// as elapsed hours. Returns `None` on an empty buffer.
pub fn aggregate(
    buffer: &FrameRingBuffer,
    resolution: f32,
    threshold: ThresholdSpec,
    accumulate_exposure: bool,
) -> Option<OccupancyGrid> {
    let half = buffer.max_half_extent()?;
    let mut grid = OccupancyGrid::new(resolution, half);

    let frames: Vec<_> = buffer.newest_first().collect();
    for frame in frames.into_iter().rev() {
        grid.apply(frame, threshold, accumulate_exposure);
    }
    Some(grid)
}
