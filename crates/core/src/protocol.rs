//! Payload shapes exchanged with external collaborators.
//!
//! The HTTP layer, map rendering, and the population-estimation service are
//! out of scope; these types pin down exactly what crosses the boundary,
//! with range validation applied before any computation runs.

use crate::clock::{ClockMode, ClockState};
use crate::dispersion::{compute, ConcentrationGrid};
use crate::error::ValidationError;
use crate::footprint::AffectedPolygon;
use crate::meteorology::{MeteorologicalState, StabilityClass};
use crate::occupancy::AreaSummary;
use crate::simulation::TickEvent;
use crate::threshold::{
    GridInfo, LogHistogram, SelectionConstraints, SelectionPriors, ThresholdOutcome,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Accepted lattice side lengths.
pub const GRID_SIZE_RANGE: (usize, usize) = (11, 201);
/// Accepted half-extent window in meters.
pub const HALF_EXTENT_RANGE: (f32, f32) = (1000.0, 100_000.0);

/// One-shot dispersion computation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispersionRequest {
    /// Wind speed, m/s.
    pub u: f32,
    /// Wind bearing, degrees.
    pub dir: f32,
    /// Stability class.
    pub stab: StabilityClass,
    /// Emission rate.
    pub q: f32,
    /// Stack height, m.
    #[serde(rename = "Hs")]
    pub hs: f32,
    /// Lattice side length.
    pub n: usize,
    /// Domain half-extent, m.
    pub half: f32,
}

impl DispersionRequest {
    /// Range-validate every field; nothing is coerced.
    ///
    /// # Errors
    /// Returns the first parameter found outside its documented range.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(self.u.is_finite() && self.u > 0.0) {
            return Err(ValidationError::out_of_range(
                "u",
                "must be positive",
                f64::from(self.u),
            ));
        }
        if !(self.dir.is_finite() && (0.0..360.0).contains(&self.dir)) {
            return Err(ValidationError::out_of_range(
                "dir",
                "must be in [0, 360)",
                f64::from(self.dir),
            ));
        }
        if !(self.q.is_finite() && self.q > 0.0) {
            return Err(ValidationError::out_of_range(
                "q",
                "must be positive",
                f64::from(self.q),
            ));
        }
        if !(self.hs.is_finite() && self.hs >= 0.0) {
            return Err(ValidationError::out_of_range(
                "Hs",
                "must be non-negative",
                f64::from(self.hs),
            ));
        }
        if self.n < GRID_SIZE_RANGE.0 || self.n > GRID_SIZE_RANGE.1 {
            return Err(ValidationError::out_of_range(
                "n",
                "must be in [11, 201]",
                self.n as f64,
            ));
        }
        if !(self.half.is_finite()
            && self.half >= HALF_EXTENT_RANGE.0
            && self.half <= HALF_EXTENT_RANGE.1)
        {
            return Err(ValidationError::out_of_range(
                "half",
                "must be in [1000, 100000] meters",
                f64::from(self.half),
            ));
        }
        Ok(())
    }

    /// The meteorological state this request describes.
    pub fn to_state(&self) -> MeteorologicalState {
        MeteorologicalState {
            wind_speed: self.u,
            wind_bearing: self.dir,
            stability: self.stab,
            emission_rate: self.q,
            stack_height: self.hs,
            half_extent: self.half,
        }
    }

    /// Validate, then run the solver.
    ///
    /// # Errors
    /// Propagates [`DispersionRequest::validate`] rejections; the solver
    /// itself cannot fail on validated input.
    pub fn evaluate(&self, sim_time: DateTime<Utc>) -> Result<DispersionResponse, ValidationError> {
        self.validate()?;
        Ok(DispersionResponse::from(&compute(
            &self.to_state(),
            self.n,
            sim_time,
        )))
    }
}

/// Echoed dispersion parameters plus observed extrema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispersionMeta {
    pub u: f32,
    pub dir: f32,
    pub stab: StabilityClass,
    pub q: f32,
    #[serde(rename = "Hs")]
    pub hs: f32,
    #[serde(rename = "maxC")]
    pub max_c: f32,
    #[serde(rename = "minC")]
    pub min_c: f32,
}

/// Dispersion grid response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispersionResponse {
    pub n: usize,
    pub half: f32,
    pub cell: f32,
    /// Row-major `n*n` concentrations.
    pub grid: Vec<f32>,
    pub meta: DispersionMeta,
}

impl From<&ConcentrationGrid> for DispersionResponse {
    fn from(grid: &ConcentrationGrid) -> Self {
        DispersionResponse {
            n: grid.n,
            half: grid.half,
            cell: grid.cell,
            grid: grid.values.clone(),
            meta: DispersionMeta {
                u: grid.state.wind_speed,
                dir: grid.state.wind_bearing,
                stab: grid.state.stability,
                q: grid.state.emission_rate,
                hs: grid.state.stack_height,
                max_c: grid.max_concentration,
                min_c: grid.min_concentration,
            },
        }
    }
}

/// Log-space histogram payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramPayload {
    /// K+1 increasing log-space edges.
    pub bins: Vec<f64>,
    /// K non-negative counts.
    pub counts: Vec<u64>,
    pub log_space: bool,
}

impl HistogramPayload {
    /// Validate into a [`LogHistogram`].
    ///
    /// # Errors
    /// Rejects payloads not marked log-space, plus everything
    /// [`LogHistogram::new`] rejects.
    pub fn into_histogram(self) -> Result<LogHistogram, ValidationError> {
        if !self.log_space {
            return Err(ValidationError::MalformedHistogram(
                "histogram must be in log space".to_string(),
            ));
        }
        LogHistogram::new(self.bins, self.counts)
    }
}

/// Threshold evaluation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRequest {
    pub histogram: HistogramPayload,
    pub grid: GridInfo,
    pub constraints: SelectionConstraints,
    pub priors: SelectionPriors,
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

/// Advisory bookkeeping attached to a threshold response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdResponseMeta {
    #[serde(rename = "usedAdvisory")]
    pub used_advisory: bool,
    #[serde(rename = "callsUsed")]
    pub calls_used: u32,
    #[serde(rename = "nextAllowedAt")]
    pub next_allowed_at: Option<DateTime<Utc>>,
}

/// Threshold evaluation response; `rate_limited` marks the 429-equivalent
/// outcome, which still carries the baseline result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdResponse {
    #[serde(rename = "C_thr")]
    pub c_thr: f64,
    pub percentile: Option<f64>,
    pub precision_proxy: f64,
    pub area_km2: f64,
    pub method: String,
    pub meta: ThresholdResponseMeta,
    #[serde(rename = "rateLimited")]
    pub rate_limited: bool,
}

impl From<&ThresholdOutcome> for ThresholdResponse {
    fn from(outcome: &ThresholdOutcome) -> Self {
        match outcome {
            ThresholdOutcome::Evaluated {
                result,
                used_advisory,
                calls_used,
                next_allowed_at,
            } => ThresholdResponse {
                c_thr: result.threshold,
                percentile: result.percentile,
                precision_proxy: result.precision_proxy,
                area_km2: result.area_km2,
                method: result.method.to_string(),
                meta: ThresholdResponseMeta {
                    used_advisory: *used_advisory,
                    calls_used: *calls_used,
                    next_allowed_at: *next_allowed_at,
                },
                rate_limited: false,
            },
            ThresholdOutcome::RateLimited {
                baseline,
                calls_used,
                next_allowed_at,
            } => ThresholdResponse {
                c_thr: baseline.threshold,
                percentile: baseline.percentile,
                precision_proxy: baseline.precision_proxy,
                area_km2: baseline.area_km2,
                method: baseline.method.to_string(),
                meta: ThresholdResponseMeta {
                    used_advisory: false,
                    calls_used: *calls_used,
                    next_allowed_at: *next_allowed_at,
                },
                rate_limited: true,
            },
        }
    }
}

/// Twin mode-control request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeControlRequest {
    pub mode: ClockMode,
    pub speed: Option<f64>,
}

/// Clock state response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClockStateResponse {
    pub mode: ClockMode,
    pub speed: f64,
    #[serde(rename = "simulatedTimeISO")]
    pub simulated_time_iso: String,
}

impl From<&ClockState> for ClockStateResponse {
    fn from(state: &ClockState) -> Self {
        ClockStateResponse {
            mode: state.mode,
            speed: state.speed,
            simulated_time_iso: state
                .simulated_time
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

/// Per-tick parameters pushed on the twin stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwinStreamParams {
    pub u: f32,
    pub dir: f32,
    pub q: f32,
    pub half: f32,
    pub stab: StabilityClass,
    #[serde(rename = "Hs")]
    pub hs: f32,
}

/// Twin stream event, one per real second while the stream is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwinStreamEvent {
    #[serde(rename = "simTimeISO")]
    pub sim_time_iso: String,
    pub speed: f64,
    pub params: TwinStreamParams,
}

impl From<&TickEvent> for TwinStreamEvent {
    fn from(event: &TickEvent) -> Self {
        TwinStreamEvent {
            sim_time_iso: event.sim_time.to_rfc3339_opts(SecondsFormat::Secs, true),
            speed: event.speed,
            params: TwinStreamParams {
                u: event.state.wind_speed,
                dir: event.state.wind_bearing,
                q: event.state.emission_rate,
                half: event.state.half_extent,
                stab: event.state.stability,
                hs: event.state.stack_height,
            },
        }
    }
}

/// The sole payload handed to the population-estimation collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FootprintPayload {
    /// Closed counter-clockwise (lon, lat) ring.
    pub polygon: Vec<[f64; 2]>,
    pub area_m2: f64,
}

impl FootprintPayload {
    pub fn new(polygon: &AffectedPolygon, area: &AreaSummary) -> Self {
        FootprintPayload {
            polygon: polygon.ring.clone(),
            area_m2: area.m2,
        }
    }
}
