//! Simulation clock
//!
//! Maps wall-clock time to simulated time through an anchored offset and a
//! speed multiplier. Every mutation re-anchors so the simulated instant is
//! continuous across speed changes, pauses and resumes.

use crate::error::ValidationError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Simulated seconds per real second under the default twin cadence
/// (one simulated hour per real second).
pub const DEFAULT_SPEED: f64 = 3600.0;

/// Operating mode label reported to collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockMode {
    /// Free-running scenario playback.
    Simulate,
    /// Live digital-twin cadence.
    Twin,
}

/// Snapshot of the clock for the mode-control interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockState {
    pub mode: ClockMode,
    /// Simulated seconds per real second; 0 while paused.
    pub speed: f64,
    /// Current simulated instant.
    pub simulated_time: DateTime<Utc>,
}

/// Adjustable-rate mapping from wall-clock to simulated time.
///
/// Pure arithmetic over `Instant` reads; no suspension anywhere.
#[derive(Debug, Clone)]
pub struct SimulationClock {
    anchor_wall: Instant,
    anchor_sim: DateTime<Utc>,
    speed: f64,
    resume_speed: f64,
    mode: ClockMode,
}

impl SimulationClock {
    /// Create a clock starting at `start` simulated time with the given
    /// speed.
    ///
    /// # Errors
    /// Negative speeds are rejected.
    pub fn new(start: DateTime<Utc>, speed: f64) -> Result<Self, ValidationError> {
        if speed < 0.0 {
            return Err(ValidationError::out_of_range(
                "speed",
                "must be non-negative",
                speed,
            ));
        }
        Ok(SimulationClock {
            anchor_wall: Instant::now(),
            anchor_sim: start,
            speed,
            resume_speed: if speed > 0.0 { speed } else { DEFAULT_SPEED },
            mode: ClockMode::Twin,
        })
    }

    /// Current simulated instant.
    pub fn now(&self) -> DateTime<Utc> {
        self.now_at(Instant::now())
    }

    /// Simulated instant as of the given wall-clock reading.
    fn now_at(&self, wall: Instant) -> DateTime<Utc> {
        let elapsed = wall
            .checked_duration_since(self.anchor_wall)
            .unwrap_or_default();
        let sim_millis = elapsed.as_secs_f64() * self.speed * 1000.0;
        self.anchor_sim + Duration::milliseconds(sim_millis as i64)
    }

    /// Change the speed multiplier, preserving continuity of `now()`.
    ///
    /// A speed of 0 pauses the clock.
    ///
    /// # Errors
    /// Negative speeds are rejected and leave the clock untouched.
    pub fn set_speed(&mut self, speed: f64) -> Result<(), ValidationError> {
        self.set_speed_at(speed, Instant::now())
    }

    fn set_speed_at(&mut self, speed: f64, wall: Instant) -> Result<(), ValidationError> {
        if speed < 0.0 {
            return Err(ValidationError::out_of_range(
                "speed",
                "must be non-negative",
                speed,
            ));
        }
        self.apply_speed(speed, wall);
        Ok(())
    }

    /// Re-anchor at the current simulated instant so the change is
    /// continuous. Callers guarantee `speed >= 0`.
    fn apply_speed(&mut self, speed: f64, wall: Instant) {
        self.anchor_sim = self.now_at(wall);
        self.anchor_wall = wall;
        self.speed = speed;
        if speed > 0.0 {
            self.resume_speed = speed;
        }
    }

    /// Pause the clock (speed 0). The previous speed is kept for `resume`.
    pub fn pause(&mut self) {
        self.apply_speed(0.0, Instant::now());
    }

    /// Resume at the last non-zero speed.
    pub fn resume(&mut self) {
        self.apply_speed(self.resume_speed, Instant::now());
    }

    pub fn is_paused(&self) -> bool {
        self.speed == 0.0
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn mode(&self) -> ClockMode {
        self.mode
    }

    /// Relabel the operating mode; the time mapping is untouched.
    pub fn set_mode(&mut self, mode: ClockMode) {
        self.mode = mode;
    }

    /// Snapshot for the control interface.
    pub fn state(&self) -> ClockState {
        ClockState {
            mode: self.mode,
            speed: self.speed,
            simulated_time: self.now(),
        }
    }
}
