//! Validated log-space histogram of per-cell concentration maxima.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};

/// Histogram over log10-concentration with K+1 strictly increasing bin
/// edges and K non-negative counts.
///
/// Construction validates shape; malformed payloads never reach the
/// selection math.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogHistogram {
    edges: Vec<f64>,
    counts: Vec<u64>,
}

impl LogHistogram {
    /// Build a histogram, rejecting malformed edge/count vectors.
    ///
    /// # Errors
    /// Rejects fewer than two edges, a count vector that does not match the
    /// bin count, non-finite or non-increasing edges, and zero total mass.
    pub fn new(edges: Vec<f64>, counts: Vec<u64>) -> Result<Self, ValidationError> {
        if edges.len() < 2 {
            return Err(ValidationError::MalformedHistogram(format!(
                "need at least 2 bin edges, got {}",
                edges.len()
            )));
        }
        if counts.len() != edges.len() - 1 {
            return Err(ValidationError::MalformedHistogram(format!(
                "counts length {} does not match {} bins",
                counts.len(),
                edges.len() - 1
            )));
        }
        if edges.iter().any(|e| !e.is_finite()) {
            return Err(ValidationError::MalformedHistogram(
                "bin edges must be finite".to_string(),
            ));
        }
        if edges.windows(2).any(|pair| pair[1] <= pair[0]) {
            return Err(ValidationError::MalformedHistogram(
                "bin edges must be strictly increasing".to_string(),
            ));
        }
        if counts.iter().all(|&c| c == 0) {
            return Err(ValidationError::MalformedHistogram(
                "histogram has no mass".to_string(),
            ));
        }
        Ok(LogHistogram { edges, counts })
    }

    /// Number of bins K.
    pub fn bin_count(&self) -> usize {
        self.counts.len()
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Total mass.
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Midpoint of bin `k` in log space.
    pub fn bin_midpoint(&self, k: usize) -> f64 {
        f64::midpoint(self.edges[k], self.edges[k + 1])
    }

    /// Log-space value below which `percentile` percent of the mass lies,
    /// interpolated linearly within the containing bin.
    pub fn percentile_log(&self, percentile: f64) -> f64 {
        let total = self.total() as f64;
        let target = total * percentile / 100.0;

        let mut cumulative = 0.0;
        for (k, &count) in self.counts.iter().enumerate() {
            let next = cumulative + count as f64;
            if next >= target && count > 0 {
                let fraction = (target - cumulative) / count as f64;
                return self.edges[k] + fraction.clamp(0.0, 1.0) * (self.edges[k + 1] - self.edges[k]);
            }
            cumulative = next;
        }
        // Rounding pushed the target past the last non-empty bin
        self.edges[self.edges.len() - 1]
    }

    /// Mass above the given log-space threshold, with the containing bin
    /// contributing its linear fraction.
    pub fn tail_count_above(&self, log_threshold: f64) -> f64 {
        let mut tail = 0.0;
        for (k, &count) in self.counts.iter().enumerate() {
            let low = self.edges[k];
            let high = self.edges[k + 1];
            if log_threshold <= low {
                tail += count as f64;
            } else if log_threshold < high {
                tail += count as f64 * (high - log_threshold) / (high - low);
            }
        }
        tail
    }
}
