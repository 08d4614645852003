//! Tick-driven plume simulation loop.
//!
//! Single-threaded driver: an external 1 Hz tick advances the
//! meteorological generator, runs the plume solver, maintains the 24-frame
//! window, and (when footprint tracking is enabled) recomputes the
//! occupancy grid and boundary polygon. No step blocks or suspends;
//! stopping the external tick source halts evolution immediately.

use crate::clock::{ClockMode, ClockState, SimulationClock};
use crate::dispersion::compute;
use crate::error::ValidationError;
use crate::footprint::{extract, AffectedPolygon, GeoPoint};
use crate::frames::FrameRingBuffer;
use crate::meteorology::{MeteorologicalState, MeteorologyGenerator};
use crate::occupancy::{aggregate, AreaSummary, ThresholdSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Footprint tracking settings for the tick loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FootprintConfig {
    /// Occupancy cell size in meters.
    pub resolution: f32,
    /// Thresholding applied to every buffered frame.
    pub threshold: ThresholdSpec,
    /// Accumulate per-cell exposure hours alongside the union bit.
    pub accumulate_exposure: bool,
    /// Geographic anchor of the source.
    pub origin: GeoPoint,
}

/// Footprint result attached to a tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FootprintSummary {
    pub area: AreaSummary,
    /// `None` when the hull degenerates; retry next tick.
    pub polygon: Option<AffectedPolygon>,
}

/// One tick's output, framed by the transport collaborator as a push event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickEvent {
    pub sim_time: DateTime<Utc>,
    pub speed: f64,
    pub state: MeteorologicalState,
    pub footprint: Option<FootprintSummary>,
}

/// Owns the full per-source simulation state: clock, generator, current
/// meteorology, and the frame window.
pub struct PlumeSimulation {
    clock: SimulationClock,
    generator: MeteorologyGenerator,
    state: MeteorologicalState,
    frames: FrameRingBuffer,
    /// Concentration lattice side length.
    grid_size: usize,
    footprint: Option<FootprintConfig>,
    ticks: u64,
}

impl PlumeSimulation {
    pub fn new(
        clock: SimulationClock,
        generator: MeteorologyGenerator,
        initial: MeteorologicalState,
        grid_size: usize,
    ) -> Self {
        PlumeSimulation {
            clock,
            generator,
            state: initial,
            frames: FrameRingBuffer::new(),
            grid_size,
            footprint: None,
            ticks: 0,
        }
    }

    /// Enable footprint tracking.
    pub fn with_footprint(mut self, config: FootprintConfig) -> Self {
        self.footprint = Some(config);
        self
    }

    pub fn current_state(&self) -> &MeteorologicalState {
        &self.state
    }

    pub fn frames(&self) -> &FrameRingBuffer {
        &self.frames
    }

    pub fn clock(&self) -> &SimulationClock {
        &self.clock
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Advance one simulation step.
    ///
    /// In order: generate the next meteorological state, solve the plume,
    /// push the frame, then recompute the exposure footprint when enabled.
    pub fn tick(&mut self) -> TickEvent {
        // 1. Read the simulated instant once; every step of this tick sees
        //    the same time.
        let sim_time = self.clock.now();

        // 2. Advance meteorology
        let next_state = self.generator.next(&self.state, sim_time);
        self.state = next_state;

        // 3. Solve and buffer the concentration frame
        let frame = compute(&self.state, self.grid_size, sim_time);
        self.frames.push(frame);

        // 4. Recompute the footprint over the buffered window
        let footprint = self.footprint.as_ref().and_then(|config| {
            let grid = aggregate(
                &self.frames,
                config.resolution,
                config.threshold,
                config.accumulate_exposure,
            )?;
            let polygon = extract(&grid, config.origin);
            Some(FootprintSummary {
                area: grid.area(),
                polygon,
            })
        });

        self.ticks += 1;
        debug!(
            "tick {} at {} u={} dir={} stab={}",
            self.ticks,
            sim_time,
            self.state.wind_speed,
            self.state.wind_bearing,
            self.state.stability
        );

        TickEvent {
            sim_time,
            speed: self.clock.speed(),
            state: self.state.clone(),
            footprint,
        }
    }

    /// Apply a mode-control request: relabel the mode and optionally change
    /// the clock speed. Returns the resulting clock state.
    ///
    /// # Errors
    /// Rejects negative speeds, leaving mode and clock untouched.
    pub fn set_mode(
        &mut self,
        mode: ClockMode,
        speed: Option<f64>,
    ) -> Result<ClockState, ValidationError> {
        if let Some(speed) = speed {
            self.clock.set_speed(speed)?;
        }
        self.clock.set_mode(mode);
        Ok(self.clock.state())
    }

    pub fn pause(&mut self) -> ClockState {
        self.clock.pause();
        self.clock.state()
    }

    pub fn resume(&mut self) -> ClockState {
        self.clock.resume();
        self.clock.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::DEFAULT_SPEED;
    use chrono::TimeZone;

    fn simulation() -> PlumeSimulation {
        let start = Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 0).unwrap();
        let clock = SimulationClock::new(start, DEFAULT_SPEED).unwrap();
        PlumeSimulation::new(
            clock,
            MeteorologyGenerator::with_seed(11),
            MeteorologicalState::neutral(),
            41,
        )
    }

    #[test]
    fn test_tick_produces_frame_and_event() {
        let mut sim = simulation();

        let event = sim.tick();
        assert_eq!(sim.frames().len(), 1);
        assert_eq!(event.state, *sim.current_state());
        assert!(event.footprint.is_none(), "tracking disabled by default");
    }

    #[test]
    fn test_window_saturates_at_capacity() {
        let mut sim = simulation();
        for _ in 0..30 {
            sim.tick();
        }
        assert_eq!(sim.frames().len(), crate::frames::FRAME_WINDOW);
        assert_eq!(sim.ticks(), 30);
    }

    #[test]
    fn test_footprint_tracking_attaches_summary() {
        let mut sim = simulation().with_footprint(FootprintConfig {
            resolution: 1000.0,
            threshold: ThresholdSpec::Relative(0.01),
            accumulate_exposure: true,
            origin: GeoPoint {
                lon: 13.4,
                lat: 52.5,
            },
        });

        let event = sim.tick();
        let footprint = event.footprint.expect("tracking enabled");
        assert!(footprint.area.cells > 0);
        assert!(footprint.polygon.is_some());
    }

    #[test]
    fn test_mode_control_round_trip() {
        let mut sim = simulation();

        let state = sim.set_mode(ClockMode::Simulate, Some(60.0)).unwrap();
        assert_eq!(state.mode, ClockMode::Simulate);
        assert_eq!(state.speed, 60.0);

        assert!(sim.set_mode(ClockMode::Twin, Some(-5.0)).is_err());

        let paused = sim.pause();
        assert_eq!(paused.speed, 0.0);
        let resumed = sim.resume();
        assert_eq!(resumed.speed, 60.0);
    }
}
