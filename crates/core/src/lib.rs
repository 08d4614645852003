//! Plume Simulation Core Library
//!
//! Atmospheric dispersion and exposure-aggregation engine for a single
//! pollutant point source. A Gaussian plume solver is driven by a stochastic
//! meteorological generator under an adjustable-rate simulation clock; the
//! resulting concentration frames are held in a bounded 24-frame window,
//! thresholded into an occupancy grid, and reduced to an affected-area
//! boundary polygon for downstream population-exposure estimation.
//!
//! Transport, rendering, and the population service itself are external
//! collaborators; this crate only defines the payload shapes exchanged with
//! them (see [`protocol`]).

pub mod clock;
pub mod dispersion;
pub mod error;
pub mod footprint;
pub mod frames;
pub mod meteorology;
pub mod occupancy;
pub mod protocol;
pub mod simulation;
pub mod threshold;

// Re-export core types
pub use clock::{ClockMode, ClockState, SimulationClock};
pub use dispersion::{compute, ConcentrationGrid, Vec2};
pub use error::{AdvisoryError, ValidationError};
pub use footprint::{extract, AffectedPolygon, GeoPoint, MAX_RING_VERTICES};
pub use frames::{FrameRingBuffer, FRAME_WINDOW};
pub use meteorology::{MeteorologicalState, MeteorologyGenerator, StabilityClass};
pub use occupancy::{aggregate, AreaSummary, OccupancyGrid, ThresholdSpec, MAX_EXPOSURE_HOURS};
pub use simulation::{FootprintConfig, FootprintSummary, PlumeSimulation, TickEvent};
pub use threshold::{
    choose_baseline, AdvisoryProvider, GridInfo, LogHistogram, RateLimitPolicy,
    SelectionConstraints, SelectionInputs, SelectionPriors, ThresholdMethod, ThresholdOutcome,
    ThresholdResult, ThresholdSelector,
};
