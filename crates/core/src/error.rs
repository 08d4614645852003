use thiserror::Error;

/// Errors for inputs rejected before any computation runs.
///
/// Validation never coerces silently; the only sanctioned clamping is the
/// documented rounding/limiting inside the meteorological generator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// A scalar parameter fell outside its accepted range.
    #[error("parameter '{name}' out of range: {message} (got {value})")]
    OutOfRange {
        name: &'static str,
        message: &'static str,
        value: f64,
    },

    /// Histogram bins and counts do not describe a valid log-space histogram.
    #[error("malformed histogram: {0}")]
    MalformedHistogram(String),
}

impl ValidationError {
    pub fn out_of_range(name: &'static str, message: &'static str, value: f64) -> Self {
        Self::OutOfRange {
            name,
            message,
            value,
        }
    }
}

/// Failures of the optional external advisory call.
///
/// These are always recovered locally by keeping the baseline threshold;
/// they never surface to the caller as a hard error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdvisoryError {
    /// The advisory call did not answer within its deadline.
    #[error("advisory timed out")]
    Timeout,
    /// The advisory answered with something that does not parse.
    #[error("advisory reply malformed: {0}")]
    Malformed(String),
    /// No advisory backend is configured or reachable.
    #[error("advisory unavailable")]
    Unavailable,
}
