//! Threshold selection against a histogram built from an actual solver run,
//! plus the advisory rate-limit contract.

use chrono::{Duration, TimeZone, Utc};
use plume_sim_core::error::AdvisoryError;
use plume_sim_core::{
    choose_baseline, compute, AdvisoryProvider, GridInfo, LogHistogram, MeteorologicalState,
    RateLimitPolicy, SelectionConstraints, SelectionInputs, SelectionPriors, StabilityClass,
    ThresholdOutcome, ThresholdSelector,
};

/// Histogram of log10 concentration over the plume's positive cells.
fn histogram_from_solver() -> (LogHistogram, GridInfo) {
    let state = MeteorologicalState {
        wind_speed: 5.0,
        wind_bearing: 270.0,
        stability: StabilityClass::D,
        emission_rate: 1.0,
        stack_height: 0.0,
        half_extent: 20_000.0,
    };
    let time = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();
    let grid = compute(&state, 81, time);

    let logs: Vec<f64> = grid
        .values
        .iter()
        .filter(|&&c| c > 0.0)
        .map(|&c| f64::from(c).log10())
        .collect();
    let low = logs.iter().copied().fold(f64::INFINITY, f64::min);
    let high = logs.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let bins = 32usize;
    let width = (high - low) / bins as f64;
    let edges: Vec<f64> = (0..=bins).map(|k| low + k as f64 * width).collect();
    let mut counts = vec![0u64; bins];
    for log in logs {
        let k = (((log - low) / width) as usize).min(bins - 1);
        counts[k] += 1;
    }

    (
        LogHistogram::new(edges, counts).unwrap(),
        GridInfo {
            cell_m: f64::from(grid.cell),
            cells: (grid.n * grid.n) as u64,
        },
    )
}

fn priors() -> SelectionPriors {
    SelectionPriors {
        wind_dir_deg_mean: 270.0,
        stability_mode: StabilityClass::D,
    }
}

#[test]
fn test_baseline_on_solver_histogram_is_sane() {
    let (histogram, grid) = histogram_from_solver();
    let constraints = SelectionConstraints {
        min_precision: 0.1,
        min_area_km2: 0.0,
        max_area_km2: 1e6,
    };

    let result = choose_baseline(&histogram, &grid, &constraints, &priors());

    assert!(result.threshold > 0.0);
    assert!(result.threshold.is_finite());
    assert!((0.0..=1.0).contains(&result.precision_proxy));
    assert!(result.area_km2 >= 0.0);
}

#[test]
fn test_tighter_area_window_never_relaxes_threshold() {
    let (histogram, grid) = histogram_from_solver();
    let loose = SelectionConstraints {
        min_precision: 0.0,
        min_area_km2: 0.0,
        max_area_km2: 1e6,
    };
    let tight = SelectionConstraints {
        min_precision: 0.0,
        min_area_km2: 0.0,
        max_area_km2: choose_baseline(&histogram, &grid, &loose, &priors()).area_km2 / 2.0,
    };

    let loose_pick = choose_baseline(&histogram, &grid, &loose, &priors());
    let tight_pick = choose_baseline(&histogram, &grid, &tight, &priors());
    assert!(tight_pick.threshold >= loose_pick.threshold);
}

struct CountingAdvisory {
    calls: u32,
    value: Result<f64, AdvisoryError>,
}

impl AdvisoryProvider for CountingAdvisory {
    fn advise(
        &mut self,
        _histogram: &LogHistogram,
        _priors: &SelectionPriors,
    ) -> Result<f64, AdvisoryError> {
        self.calls += 1;
        self.value.clone()
    }
}

#[test]
fn test_rate_limit_contract_min_interval_and_session_quota() {
    // GEMINI_MIN_INTERVAL_S=30, GEMINI_MAX_PER_SESSION=10 equivalent
    let policy = RateLimitPolicy {
        min_interval: Duration::seconds(30),
        max_calls_per_session: 10,
    };
    let mut selector = ThresholdSelector::new(policy);
    let mut provider = CountingAdvisory {
        calls: 0,
        value: Err(AdvisoryError::Unavailable),
    };

    let (histogram, grid) = histogram_from_solver();
    let constraints = SelectionConstraints {
        min_precision: 0.0,
        min_area_km2: 0.0,
        max_area_km2: 1e6,
    };
    let request_priors = priors();
    let inputs = SelectionInputs {
        histogram: &histogram,
        grid: &grid,
        constraints: &constraints,
        priors: &request_priors,
    };
    let direct = choose_baseline(&histogram, &grid, &constraints, &request_priors);
    let t0 = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();

    // A call inside the 30 s interval is limited and keeps the baseline
    let _first = selector.evaluate_with_advisory(inputs, "s1", t0, &mut provider);
    let limited = selector.evaluate_with_advisory(
        inputs,
        "s1",
        t0 + Duration::seconds(10),
        &mut provider,
    );
    match limited {
        ThresholdOutcome::RateLimited {
            baseline,
            next_allowed_at,
            ..
        } => {
            assert_eq!(baseline, direct, "baseline must match a direct evaluation");
            assert_eq!(next_allowed_at, Some(t0 + Duration::seconds(30)));
        }
        ThresholdOutcome::Evaluated { .. } => panic!("expected the rate-limited outcome"),
    }

    // Exhaust the session quota: the 11th granted attempt is refused
    for call in 1..10u32 {
        let now = t0 + Duration::seconds(i64::from(call) * 60);
        let outcome = selector.evaluate_with_advisory(inputs, "s1", now, &mut provider);
        assert!(matches!(outcome, ThresholdOutcome::Evaluated { .. }));
    }
    let eleventh = selector.evaluate_with_advisory(
        inputs,
        "s1",
        t0 + Duration::seconds(24 * 3600),
        &mut provider,
    );
    match eleventh {
        ThresholdOutcome::RateLimited {
            baseline,
            calls_used,
            next_allowed_at,
        } => {
            assert_eq!(baseline, direct);
            assert_eq!(calls_used, 10);
            assert_eq!(next_allowed_at, None, "session quota has no retry time");
        }
        ThresholdOutcome::Evaluated { .. } => panic!("expected the rate-limited outcome"),
    }
}

#[test]
fn test_advisory_failures_never_break_evaluation() {
    let mut selector = ThresholdSelector::new(RateLimitPolicy::default());
    let mut provider = CountingAdvisory {
        calls: 0,
        value: Err(AdvisoryError::Timeout),
    };

    let (histogram, grid) = histogram_from_solver();
    let constraints = SelectionConstraints {
        min_precision: 0.0,
        min_area_km2: 0.0,
        max_area_km2: 1e6,
    };
    let request_priors = priors();
    let t0 = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();

    let outcome = selector.evaluate_with_advisory(
        SelectionInputs {
            histogram: &histogram,
            grid: &grid,
            constraints: &constraints,
            priors: &request_priors,
        },
        "s2",
        t0,
        &mut provider,
    );

    match outcome {
        ThresholdOutcome::Evaluated {
            result,
            used_advisory,
            ..
        } => {
            assert!(!used_advisory);
            assert!(result.threshold > 0.0);
            // One initial attempt plus exactly one retry
            assert_eq!(provider.calls, 2);
        }
        ThresholdOutcome::RateLimited { .. } => panic!("first call cannot be limited"),
    }
}
