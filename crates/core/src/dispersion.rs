//! Gaussian plume solver
//!
//! Closed-form ground-level concentration downwind of a point source with
//! full ground reflection. Dispersion coefficients follow the Briggs
//! open-country parameterization per stability class; growth flattens as the
//! atmosphere stabilizes from A to F.

use crate::meteorology::{MeteorologicalState, StabilityClass};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub type Vec2 = nalgebra::Vector2<f32>;

/// Crosswind dispersion standard deviation at downwind distance `x` meters.
pub fn sigma_y(class: StabilityClass, x: f32) -> f32 {
    let flatten = (1.0 + 0.0001 * x).sqrt();
    let coefficient = match class {
        StabilityClass::A => 0.22,
        StabilityClass::B => 0.16,
        StabilityClass::C => 0.11,
        StabilityClass::D => 0.08,
        StabilityClass::E => 0.06,
        StabilityClass::F => 0.04,
    };
    coefficient * x / flatten
}

/// Vertical dispersion standard deviation at downwind distance `x` meters.
pub fn sigma_z(class: StabilityClass, x: f32) -> f32 {
    match class {
        StabilityClass::A => 0.20 * x,
        StabilityClass::B => 0.12 * x,
        StabilityClass::C => 0.08 * x / (1.0 + 0.0002 * x).sqrt(),
        StabilityClass::D => 0.06 * x / (1.0 + 0.0015 * x).sqrt(),
        StabilityClass::E => 0.03 * x / (1.0 + 0.0003 * x),
        StabilityClass::F => 0.016 * x / (1.0 + 0.0003 * x),
    }
}

/// Square concentration field over the un-rotated sample lattice.
///
/// Row-major `values`, index `row * n + col`; a cell at `(col, row)` sits at
/// east/north offsets `(-half + col*cell, -half + row*cell)` from the source.
/// The wind bearing was consumed during evaluation and is carried in the
/// producing state for consumers that need it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcentrationGrid {
    /// Cells per side.
    pub n: usize,
    /// Domain half-extent in meters.
    pub half: f32,
    /// Cell size in meters, `2*half/(n-1)`.
    pub cell: f32,
    /// Concentrations, row-major.
    pub values: Vec<f32>,
    /// Largest concentration observed.
    pub max_concentration: f32,
    /// Smallest concentration observed.
    pub min_concentration: f32,
    /// Meteorological state that produced this frame.
    pub state: MeteorologicalState,
    /// Simulated instant the frame belongs to.
    pub sim_time: DateTime<Utc>,
}

impl ConcentrationGrid {
    /// Concentration at `(col, row)`.
    pub fn value(&self, col: usize, row: usize) -> f32 {
        self.values[row * self.n + col]
    }

    /// East/north offsets of the cell center from the source, in meters.
    pub fn cell_center(&self, col: usize, row: usize) -> Vec2 {
        Vec2::new(
            -self.half + col as f32 * self.cell,
            -self.half + row as f32 * self.cell,
        )
    }
}

/// Ground-level concentration at one sample offset.
///
/// `(x0, y0)` are east/north meters from the source; the rotation puts them
/// into the downwind-aligned frame. Upwind cells (`x <= 0`) are exactly zero:
/// the ground-level plume does not exist behind the source.
fn cell_concentration(x0: f32, y0: f32, cos_t: f32, sin_t: f32, state: &MeteorologicalState) -> f32 {
    let x = x0 * cos_t + y0 * sin_t;
    let y = -x0 * sin_t + y0 * cos_t;
    if x <= 0.0 {
        return 0.0;
    }

    let sy = sigma_y(state.stability, x);
    let sz = sigma_z(state.stability, x);
    let crosswind = (-(y * y) / (2.0 * sy * sy)).exp();
    let reflection = 2.0 * (-(state.stack_height * state.stack_height) / (2.0 * sz * sz)).exp();

    state.emission_rate / (std::f32::consts::TAU * state.wind_speed * sy * sz)
        * crosswind
        * reflection
}

/// Compute the concentration grid for one meteorological state.
///
/// The domain is the square of side `2 * state.half_extent` sampled on an
/// `n x n` lattice. Callers must have range-validated the inputs
/// (`n >= 2`, positive half-extent and wind speed); see
/// [`crate::protocol::DispersionRequest::validate`]. Rows are filled in
/// parallel but every cell is written by index, so the result is
/// reproducible bit-for-bit.
pub fn compute(state: &MeteorologicalState, n: usize, sim_time: DateTime<Utc>) -> ConcentrationGrid {
    let half = state.half_extent;
    let cell = 2.0 * half / (n as f32 - 1.0);
    let theta = state.wind_bearing.to_radians();
    let (sin_t, cos_t) = theta.sin_cos();

    let mut values = vec![0.0f32; n * n];
    values
        .par_chunks_mut(n)
        .enumerate()
        .for_each(|(row, row_values)| {
            let y0 = -half + row as f32 * cell;
            for (col, value) in row_values.iter_mut().enumerate() {
                let x0 = -half + col as f32 * cell;
                *value = cell_concentration(x0, y0, cos_t, sin_t, state);
            }
        });

    let mut max_concentration = f32::NEG_INFINITY;
    let mut min_concentration = f32::INFINITY;
    for &v in &values {
        max_concentration = max_concentration.max(v);
        min_concentration = min_concentration.min(v);
    }

    ConcentrationGrid {
        n,
        half,
        cell,
        values,
        max_concentration,
        min_concentration,
        state: state.clone(),
        sim_time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meteorology::MeteorologicalState;
    use chrono::TimeZone;

    fn sim_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn reference_state() -> MeteorologicalState {
        MeteorologicalState {
            wind_speed: 5.0,
            wind_bearing: 270.0,
            stability: StabilityClass::D,
            emission_rate: 1.0,
            stack_height: 0.0,
            half_extent: 20_000.0,
        }
    }

    #[test]
    fn test_reference_scenario_geometry() {
        let grid = compute(&reference_state(), 81, sim_time());

        assert_eq!(grid.n, 81);
        assert_eq!(grid.values.len(), 81 * 81);
        assert!((grid.cell - 500.0).abs() < 1e-3);
        assert!(grid.max_concentration > 0.0);
    }

    #[test]
    fn test_upwind_cells_exactly_zero() {
        let state = reference_state();
        let grid = compute(&state, 81, sim_time());
        let theta = state.wind_bearing.to_radians();
        let (sin_t, cos_t) = theta.sin_cos();

        for row in 0..grid.n {
            for col in 0..grid.n {
                let center = grid.cell_center(col, row);
                let x = center.x * cos_t + center.y * sin_t;
                if x <= 0.0 {
                    assert_eq!(
                        grid.value(col, row),
                        0.0,
                        "upwind cell ({col},{row}) must be zero"
                    );
                }
            }
        }
    }

    #[test]
    fn test_crosswind_symmetry_at_ground_level() {
        // With the bearing along the x0 axis and Hs = 0 the field mirrors
        // across the downwind axis: C(x, y) == C(x, -y).
        let mut state = reference_state();
        state.wind_bearing = 0.0;
        let grid = compute(&state, 41, sim_time());

        for row in 0..grid.n {
            let mirrored = grid.n - 1 - row;
            for col in 0..grid.n {
                let a = grid.value(col, row);
                let b = grid.value(col, mirrored);
                assert!(
                    (a - b).abs() <= f32::EPSILON * a.abs().max(1.0),
                    "asymmetry at ({col},{row}): {a} vs {b}"
                );
            }
        }
    }

    #[test]
    fn test_all_cells_non_negative_and_finite() {
        for class in [
            StabilityClass::A,
            StabilityClass::B,
            StabilityClass::C,
            StabilityClass::D,
            StabilityClass::E,
            StabilityClass::F,
        ] {
            let mut state = reference_state();
            state.stability = class;
            state.stack_height = 25.0;
            let grid = compute(&state, 31, sim_time());

            for &v in &grid.values {
                assert!(v >= 0.0, "negative concentration in class {class}");
                assert!(v.is_finite(), "non-finite concentration in class {class}");
            }
        }
    }

    #[test]
    fn test_compute_is_bitwise_reproducible() {
        let state = reference_state();
        let a = compute(&state, 81, sim_time());
        let b = compute(&state, 81, sim_time());
        assert_eq!(a.values, b.values);
        assert_eq!(a.max_concentration, b.max_concentration);
    }

    #[test]
    fn test_sigma_curves_flatten_toward_stable_classes() {
        let x = 5000.0;
        assert!(sigma_y(StabilityClass::A, x) > sigma_y(StabilityClass::D, x));
        assert!(sigma_y(StabilityClass::D, x) > sigma_y(StabilityClass::F, x));
        assert!(sigma_z(StabilityClass::A, x) > sigma_z(StabilityClass::F, x));
    }
}
