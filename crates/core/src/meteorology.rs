//! Meteorological state and the stochastic process generator driving it.
//!
//! The generator advances each scalar with an exact discrete-time
//! Ornstein-Uhlenbeck step, keyed to the simulated hour of day, and keeps
//! every output inside physically sane bounds with per-tick rate limits.

use chrono::{DateTime, Timelike, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Pasquill-type atmospheric stability class.
///
/// A is the most unstable (strongest turbulent mixing), F the most stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StabilityClass {
    A,
    B,
    C,
    D,
    E,
    F,
}

impl StabilityClass {
    /// Ordinal index, A = 0 .. F = 5.
    pub fn index(self) -> i8 {
        match self {
            StabilityClass::A => 0,
            StabilityClass::B => 1,
            StabilityClass::C => 2,
            StabilityClass::D => 3,
            StabilityClass::E => 4,
            StabilityClass::F => 5,
        }
    }

    /// Class at the given ordinal index, clamped to A..=F.
    pub fn from_index(index: i8) -> Self {
        match index.clamp(0, 5) {
            0 => StabilityClass::A,
            1 => StabilityClass::B,
            2 => StabilityClass::C,
            3 => StabilityClass::D,
            4 => StabilityClass::E,
            _ => StabilityClass::F,
        }
    }

    /// One class closer to `target`, or `self` when already there.
    pub fn step_toward(self, target: StabilityClass) -> Self {
        let gap = target.index() - self.index();
        Self::from_index(self.index() + gap.signum())
    }
}

impl fmt::Display for StabilityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Instantaneous meteorological driving state for the plume solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeteorologicalState {
    /// Wind speed in m/s, strictly positive.
    pub wind_speed: f32,
    /// Wind bearing in degrees, [0, 360).
    pub wind_bearing: f32,
    /// Pasquill stability class.
    pub stability: StabilityClass,
    /// Emission rate, arbitrary positive unit.
    pub emission_rate: f32,
    /// Stack height in meters, >= 0.
    pub stack_height: f32,
    /// Plume half-extent in meters (simulation window radius).
    pub half_extent: f32,
}

impl MeteorologicalState {
    /// Neutral mid-latitude conditions (moderate wind, class D).
    pub fn neutral() -> Self {
        MeteorologicalState {
            wind_speed: 5.0,
            wind_bearing: 270.0,
            stability: StabilityClass::D,
            emission_rate: 1.0,
            stack_height: 10.0,
            half_extent: 20_000.0,
        }
    }

    /// Convective afternoon conditions (light wind, class B).
    pub fn unstable_afternoon() -> Self {
        MeteorologicalState {
            wind_speed: 2.5,
            wind_bearing: 200.0,
            stability: StabilityClass::B,
            emission_rate: 1.0,
            stack_height: 10.0,
            half_extent: 15_000.0,
        }
    }

    /// Calm stable night (weak wind, class F, narrow plume).
    pub fn stable_night() -> Self {
        MeteorologicalState {
            wind_speed: 1.2,
            wind_bearing: 320.0,
            stability: StabilityClass::F,
            emission_rate: 1.0,
            stack_height: 10.0,
            half_extent: 25_000.0,
        }
    }
}

/// Per-scalar OU step parameters with hard bounds and a per-tick delta cap.
#[derive(Debug, Clone, Copy)]
struct OuParams {
    /// Mean-reversion rate per simulated hour.
    theta: f32,
    /// Diffusion strength.
    sigma: f32,
    /// Absolute floor.
    min: f32,
    /// Absolute ceiling.
    max: f32,
    /// Largest change allowed in one tick.
    max_delta: f32,
}

const WIND_SPEED_OU: OuParams = OuParams {
    theta: 0.35,
    sigma: 1.2,
    min: 0.5,
    max: 30.0,
    max_delta: 2.5,
};

const BEARING_DRIFT_OU: OuParams = OuParams {
    theta: 0.8,
    sigma: 18.0,
    min: -60.0,
    max: 60.0,
    max_delta: 30.0,
};

const EMISSION_OU: OuParams = OuParams {
    theta: 0.25,
    sigma: 0.3,
    min: 0.05,
    max: 5.0,
    max_delta: 0.5,
};

const HALF_EXTENT_OU: OuParams = OuParams {
    theta: 0.15,
    sigma: 3000.0,
    min: 5000.0,
    max: 60_000.0,
    max_delta: 2500.0,
};

/// Reversion anchors for the diurnally modulated scalars.
const WIND_SPEED_BASE: f32 = 5.0;
const EMISSION_BASE: f32 = 1.0;
const HALF_EXTENT_BASE: f32 = 20_000.0;

/// Simulated hours advanced per generation step.
const TICK_HOURS: f32 = 1.0;

/// Consecutive ticks a one-class target must hold before the move commits.
const STABILITY_HOLD_TICKS: u8 = 3;

/// Diurnal modulation factor for wind speed and emission targets.
fn diurnal_factor(hour: f32) -> f32 {
    0.6 + 0.4 * (std::f32::consts::TAU * (hour - 4.0) / 24.0).cos()
}

/// Target stability class from wind speed and day/night.
///
/// Separate lookup tables: daytime insolation favors unstable classes at
/// low wind, nighttime radiative cooling favors stable ones.
fn target_stability(wind_speed: f32, is_day: bool) -> StabilityClass {
    if is_day {
        match wind_speed {
            u if u < 2.0 => StabilityClass::A,
            u if u < 5.0 => StabilityClass::B,
            u if u < 6.0 => StabilityClass::C,
            _ => StabilityClass::D,
        }
    } else {
        match wind_speed {
            u if u < 2.0 => StabilityClass::F,
            u if u < 3.0 => StabilityClass::E,
            _ => StabilityClass::D,
        }
    }
}

/// Stochastic "digital twin" generator of meteorological time series.
///
/// Owns its RNG; two generators constructed with the same seed and fed the
/// same state/clock sequence produce identical series.
pub struct MeteorologyGenerator {
    rng: StdRng,
    held_target: StabilityClass,
    hold_streak: u8,
}

impl MeteorologyGenerator {
    /// Create a generator seeded from the operating system.
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_rng(&mut rand::rng()))
    }

    /// Create a generator with a fixed seed for reproducible runs.
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        MeteorologyGenerator {
            rng,
            held_target: StabilityClass::D,
            hold_streak: 0,
        }
    }

    /// Advance one simulated hour from `prev` at the given simulated instant.
    pub fn next(
        &mut self,
        prev: &MeteorologicalState,
        sim_time: DateTime<Utc>,
    ) -> MeteorologicalState {
        let hour = sim_time.hour() as f32 + sim_time.minute() as f32 / 60.0;
        let diurnal = diurnal_factor(hour);

        let wind_speed = self.ou_step(
            prev.wind_speed,
            WIND_SPEED_BASE * diurnal,
            &WIND_SPEED_OU,
        );
        // The bearing itself is free to wander; only its per-tick drift is
        // mean-reverting (toward zero drift).
        let drift = self.ou_step(0.0, 0.0, &BEARING_DRIFT_OU);
        let wind_bearing = (prev.wind_bearing + drift).rem_euclid(360.0);
        let emission_rate = self.ou_step(
            prev.emission_rate,
            EMISSION_BASE * diurnal,
            &EMISSION_OU,
        );
        let half_extent = self.ou_step(prev.half_extent, HALF_EXTENT_BASE, &HALF_EXTENT_OU);

        let is_day = (6..18).contains(&sim_time.hour());
        let stability = self.advance_stability(prev.stability, target_stability(wind_speed, is_day));

        MeteorologicalState {
            wind_speed: round_to(wind_speed, 0.1),
            wind_bearing: round_to(wind_bearing, 1.0).rem_euclid(360.0),
            stability,
            emission_rate: round_to(emission_rate, 0.01),
            stack_height: prev.stack_height,
            half_extent: round_to(half_extent, 100.0),
        }
    }

    /// Exact discrete OU step, clamped to the per-tick delta and the
    /// absolute range.
    fn ou_step(&mut self, prev: f32, target: f32, params: &OuParams) -> f32 {
        let decay = (-params.theta * TICK_HOURS).exp();
        let mean = target + (prev - target) * decay;
        let variance =
            (params.sigma * params.sigma / (2.0 * params.theta)) * (1.0 - decay * decay);
        let noise: f32 = StandardNormal.sample(&mut self.rng);
        let raw = variance.sqrt().mul_add(noise, mean);
        raw.clamp(prev - params.max_delta, prev + params.max_delta)
            .clamp(params.min, params.max)
    }

    /// One-step stability transition with hysteresis.
    ///
    /// A gap of two or more classes commits a one-step move immediately; a
    /// one-class gap commits only after the target has held for
    /// `STABILITY_HOLD_TICKS` consecutive ticks.
    fn advance_stability(
        &mut self,
        current: StabilityClass,
        target: StabilityClass,
    ) -> StabilityClass {
        if target == self.held_target {
            self.hold_streak = self.hold_streak.saturating_add(1);
        } else {
            self.held_target = target;
            self.hold_streak = 1;
        }

        let gap = (target.index() - current.index()).abs();
        let next = if gap >= 2 {
            current.step_toward(target)
        } else if gap == 1 && self.hold_streak >= STABILITY_HOLD_TICKS {
            current.step_toward(target)
        } else {
            current
        };

        if next != current {
            debug!("stability class {current} -> {next} (target {target})");
        }
        next
    }
}

impl Default for MeteorologyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Round onto a fixed increment grid (0.1 m/s, 1 degree, ...).
fn round_to(value: f32, increment: f32) -> f32 {
    (value / increment).round() * increment
}
