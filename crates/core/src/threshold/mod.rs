//! Auto-threshold selection for the affected-area footprint.
//!
//! Builds candidate concentration cutoffs from a log-space histogram of
//! per-cell maxima (Otsu split plus a high-percentile ladder), scores each
//! against precision/area constraints, and optionally fuses a rate-limited
//! external advisory that must independently pass the same constraints.

mod advisory;
mod histogram;

pub use advisory::{AdvisoryProvider, RateLimitPolicy};
pub use histogram::LogHistogram;

use crate::dispersion::sigma_y;
use crate::meteorology::StabilityClass;
use advisory::{GateDecision, SessionGate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// Downwind reference distance for the precision corridor, meters.
const CORRIDOR_REFERENCE_DISTANCE_M: f32 = 5_000.0;
/// Corridor reference length, meters.
const CORRIDOR_REFERENCE_LENGTH_M: f64 = 10_000.0;

/// High-percentile candidate ladder.
const PERCENTILE_LADDER: [f64; 5] = [99.5, 99.0, 98.0, 97.0, 95.0];

/// Geometry of the concentration grid the histogram was built from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridInfo {
    /// Cell edge length in meters.
    pub cell_m: f64,
    /// Total number of cells.
    pub cells: u64,
}

impl GridInfo {
    fn cell_area_m2(&self) -> f64 {
        self.cell_m * self.cell_m
    }
}

/// Acceptance window for a threshold candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SelectionConstraints {
    pub min_precision: f64,
    pub min_area_km2: f64,
    pub max_area_km2: f64,
}

/// Prior context the selector scores candidates under.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SelectionPriors {
    /// Mean wind bearing over the window, degrees.
    pub wind_dir_deg_mean: f64,
    /// Modal stability class over the window.
    pub stability_mode: StabilityClass,
}

/// How a threshold was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdMethod {
    Otsu,
    Percentile,
    Advisory,
}

impl fmt::Display for ThresholdMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdMethod::Otsu => write!(f, "otsu"),
            ThresholdMethod::Percentile => write!(f, "percentile"),
            ThresholdMethod::Advisory => write!(f, "advisory"),
        }
    }
}

/// Borrowed bundle of everything one threshold evaluation consumes.
#[derive(Debug, Clone, Copy)]
pub struct SelectionInputs<'a> {
    pub histogram: &'a LogHistogram,
    pub grid: &'a GridInfo,
    pub constraints: &'a SelectionConstraints,
    pub priors: &'a SelectionPriors,
}

/// A selected concentration threshold with its diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdResult {
    /// Absolute linear concentration cutoff, > 0.
    pub threshold: f64,
    /// Source percentile when the candidate came from the ladder.
    pub percentile: Option<f64>,
    /// Precision proxy in [0, 1].
    pub precision_proxy: f64,
    /// Affected area implied by the histogram tail, km^2.
    pub area_km2: f64,
    pub method: ThresholdMethod,
}

/// Result of an advisory-aware evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum ThresholdOutcome {
    Evaluated {
        result: ThresholdResult,
        used_advisory: bool,
        calls_used: u32,
        next_allowed_at: Option<DateTime<Utc>>,
    },
    /// The session quota refused the advisory; the baseline still stands.
    /// This is an expected outcome, not an error.
    RateLimited {
        baseline: ThresholdResult,
        calls_used: u32,
        next_allowed_at: Option<DateTime<Utc>>,
    },
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    method: ThresholdMethod,
    percentile: Option<f64>,
    log_threshold: f64,
}

#[derive(Debug, Clone, Copy)]
struct ScoredCandidate {
    method: ThresholdMethod,
    percentile: Option<f64>,
    threshold: f64,
    area_km2: f64,
    precision: f64,
}

/// Heuristic precision score: how tight the candidate area is relative to
/// the dispersion corridor expected for the prior stability class.
fn precision_proxy(area_m2: f64, stability: StabilityClass) -> f64 {
    let width_m = 4.0 * f64::from(sigma_y(stability, CORRIDOR_REFERENCE_DISTANCE_M));
    let corridor_m2 = width_m * CORRIDOR_REFERENCE_LENGTH_M;
    1.0 / (1.0 + area_m2 / corridor_m2)
}

/// Otsu's method over the log histogram: the split maximizing the
/// between-class variance `w1*w2*(mu1-mu2)^2`, via cumulative running sums.
/// Returns the midpoint of the winning bin's edges in log space.
fn otsu_split(histogram: &LogHistogram) -> Option<f64> {
    let total: f64 = histogram.total() as f64;
    let grand_sum: f64 = histogram
        .counts()
        .iter()
        .enumerate()
        .map(|(k, &c)| c as f64 * histogram.bin_midpoint(k))
        .sum();

    let mut w1 = 0.0;
    let mut sum1 = 0.0;
    let mut best: Option<(f64, usize)> = None;

    for k in 0..histogram.bin_count() - 1 {
        w1 += histogram.counts()[k] as f64;
        sum1 += histogram.counts()[k] as f64 * histogram.bin_midpoint(k);
        let w2 = total - w1;
        if w1 == 0.0 || w2 == 0.0 {
            continue;
        }
        let mu1 = sum1 / w1;
        let mu2 = (grand_sum - sum1) / w2;
        let variance = w1 * w2 * (mu1 - mu2) * (mu1 - mu2);
        if best.is_none_or(|(best_var, _)| variance > best_var) {
            best = Some((variance, k));
        }
    }

    best.map(|(_, k)| histogram.bin_midpoint(k))
}

fn score(candidate: Candidate, histogram: &LogHistogram, grid: &GridInfo, priors: &SelectionPriors) -> ScoredCandidate {
    let area_m2 = histogram.tail_count_above(candidate.log_threshold) * grid.cell_area_m2();
    ScoredCandidate {
        method: candidate.method,
        percentile: candidate.percentile,
        threshold: 10f64.powf(candidate.log_threshold),
        area_km2: area_m2 / 1e6,
        precision: precision_proxy(area_m2, priors.stability_mode),
    }
}

fn into_result(candidate: ScoredCandidate) -> ThresholdResult {
    ThresholdResult {
        threshold: candidate.threshold,
        percentile: candidate.percentile,
        precision_proxy: candidate.precision,
        area_km2: candidate.area_km2,
        method: candidate.method,
    }
}

/// Pick a defensible concentration threshold from the histogram alone.
///
/// Candidates are the Otsu split plus the percentile ladder; among them,
/// sorted by increasing linear threshold, the first that satisfies both the
/// precision floor and the area window wins. When none qualifies the most
/// precise candidate is returned, ties broken toward the smaller area.
pub fn choose_baseline(
    histogram: &LogHistogram,
    grid: &GridInfo,
    constraints: &SelectionConstraints,
    priors: &SelectionPriors,
) -> ThresholdResult {
    let mut candidates: Vec<Candidate> = Vec::with_capacity(PERCENTILE_LADDER.len() + 1);
    if let Some(log_threshold) = otsu_split(histogram) {
        candidates.push(Candidate {
            method: ThresholdMethod::Otsu,
            percentile: None,
            log_threshold,
        });
    }
    for percentile in PERCENTILE_LADDER {
        candidates.push(Candidate {
            method: ThresholdMethod::Percentile,
            percentile: Some(percentile),
            log_threshold: histogram.percentile_log(percentile),
        });
    }

    let mut scored: Vec<ScoredCandidate> = candidates
        .into_iter()
        .map(|c| score(c, histogram, grid, priors))
        .collect();
    scored.sort_by(|a, b| a.threshold.total_cmp(&b.threshold));

    for candidate in &scored {
        debug!(
            "threshold candidate {} tau={:.3e} area={:.2}km2 precision={:.3}",
            candidate.method, candidate.threshold, candidate.area_km2, candidate.precision
        );
    }

    let qualified = scored.iter().find(|c| {
        c.precision >= constraints.min_precision
            && c.area_km2 >= constraints.min_area_km2
            && c.area_km2 <= constraints.max_area_km2
    });

    let chosen = qualified.copied().unwrap_or_else(|| {
        // Fall back to the most defensible candidate on record
        let mut best = scored[0];
        for c in &scored[1..] {
            if c.precision > best.precision
                || (c.precision == best.precision && c.area_km2 < best.area_km2)
            {
                best = *c;
            }
        }
        best
    });

    info!(
        "baseline threshold {} tau={:.3e} area={:.2}km2 precision={:.3}",
        chosen.method, chosen.threshold, chosen.area_km2, chosen.precision
    );
    into_result(chosen)
}

/// Threshold selector owning the per-session advisory rate limiter.
#[derive(Debug, Default)]
pub struct ThresholdSelector {
    gate: SessionGate,
}

impl ThresholdSelector {
    pub fn new(policy: RateLimitPolicy) -> Self {
        ThresholdSelector {
            gate: SessionGate::new(policy),
        }
    }

    /// Evaluate with an optional external advisory.
    ///
    /// The baseline is always computed. Under the session's rate limit the
    /// provider is asked (one retry); its suggestion is adopted only when
    /// positive and independently inside the same precision/area window.
    /// Over the limit, the distinct [`ThresholdOutcome::RateLimited`]
    /// variant carries the unchanged baseline and the retry timing.
    pub fn evaluate_with_advisory(
        &mut self,
        inputs: SelectionInputs<'_>,
        session_id: &str,
        now: DateTime<Utc>,
        provider: &mut dyn AdvisoryProvider,
    ) -> ThresholdOutcome {
        let SelectionInputs {
            histogram,
            grid,
            constraints,
            priors,
        } = inputs;
        let baseline = choose_baseline(histogram, grid, constraints, priors);

        match self.gate.check_and_count(session_id, now) {
            GateDecision::Limited { next_allowed_at } => {
                debug!("advisory rate-limited for session {session_id}");
                ThresholdOutcome::RateLimited {
                    baseline,
                    calls_used: self.gate.calls_used(session_id),
                    next_allowed_at,
                }
            }
            GateDecision::Allowed => {
                let advisory = provider.advise(histogram, priors).or_else(|err| {
                    warn!("advisory failed, retrying once: {err}");
                    provider.advise(histogram, priors)
                });

                let accepted = match advisory {
                    Ok(threshold) if threshold > 0.0 => {
                        let scored = score(
                            Candidate {
                                method: ThresholdMethod::Advisory,
                                percentile: None,
                                log_threshold: threshold.log10(),
                            },
                            histogram,
                            grid,
                            priors,
                        );
                        let feasible = scored.precision >= constraints.min_precision
                            && scored.area_km2 >= constraints.min_area_km2
                            && scored.area_km2 <= constraints.max_area_km2;
                        if feasible {
                            Some(into_result(scored))
                        } else {
                            debug!(
                                "advisory tau={threshold:.3e} rejected: outside constraints"
                            );
                            None
                        }
                    }
                    Ok(threshold) => {
                        debug!("advisory tau={threshold:.3e} rejected: non-positive");
                        None
                    }
                    Err(err) => {
                        warn!("advisory unavailable, keeping baseline: {err}");
                        None
                    }
                };

                let used_advisory = accepted.is_some();
                ThresholdOutcome::Evaluated {
                    result: accepted.unwrap_or(baseline),
                    used_advisory,
                    calls_used: self.gate.calls_used(session_id),
                    next_allowed_at: self.gate.next_allowed_at(session_id),
                }
            }
        }
    }
}
