//! Sample Reduction
//!
//! Pure reductions over millisecond sample sets. Every reduction yields a
//! [`Metric`], so an empty sample set surfaces as the error sentinel rather
//! than a NaN or a panic.
//!
//! - `mean`: arithmetic mean
//! - `stddev`: population standard deviation (divides by N)
//! - `count_above`: strict threshold count used by dropped-frame detection

use serde::{Serialize, Serializer};
use std::fmt;

/// Sentinel rendered for a metric whose measurement failed.
pub const ERROR_SENTINEL: &str = "Error";

/// Sentinel rendered for a metric the device or delivery path cannot provide.
pub const UNSUPPORTED_SENTINEL: &str = "N/A";

/// A measured value or the sentinel that replaced it.
///
/// Each metric of a trial fails independently: a sentinel in one field never
/// changes how another field is computed or rendered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Metric {
    /// A finite measured value
    Value(f64),
    /// The underlying measurement failed or had no samples
    Error,
    /// The measurement is not available on this delivery path
    Unsupported,
}

impl Metric {
    /// Wrap a raw value, downgrading NaN and infinities to [`Metric::Error`].
    pub fn from_value(value: f64) -> Self {
        if value.is_finite() {
            Metric::Value(value)
        } else {
            Metric::Error
        }
    }

    /// The measured value, if any.
    pub fn value(&self) -> Option<f64> {
        match self {
            Metric::Value(v) => Some(*v),
            Metric::Error | Metric::Unsupported => None,
        }
    }

    /// True when this metric carries a measured value.
    pub fn is_value(&self) -> bool {
        matches!(self, Metric::Value(_))
    }

    /// Render with a fixed number of decimals, or the sentinel text.
    pub fn display(&self, decimals: usize) -> String {
        match self {
            Metric::Value(v) => format!("{v:.decimals$}"),
            Metric::Error => ERROR_SENTINEL.to_string(),
            Metric::Unsupported => UNSUPPORTED_SENTINEL.to_string(),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self, f.precision()) {
            (Metric::Value(v), Some(p)) => write!(f, "{v:.p$}"),
            (Metric::Value(v), None) => write!(f, "{v}"),
            (Metric::Error, _) => f.write_str(ERROR_SENTINEL),
            (Metric::Unsupported, _) => f.write_str(UNSUPPORTED_SENTINEL),
        }
    }
}

impl Serialize for Metric {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Metric::Value(v) => serializer.serialize_f64(*v),
            Metric::Error => serializer.serialize_str(ERROR_SENTINEL),
            Metric::Unsupported => serializer.serialize_str(UNSUPPORTED_SENTINEL),
        }
    }
}

/// Arithmetic mean; [`Metric::Error`] on an empty set.
pub fn mean(samples: &[f64]) -> Metric {
    if samples.is_empty() {
        return Metric::Error;
    }
    let sum: f64 = samples.iter().sum();
    Metric::from_value(sum / samples.len() as f64)
}

/// Population standard deviation; [`Metric::Error`] on an empty set.
pub fn stddev(samples: &[f64]) -> Metric {
    let Some(avg) = mean(samples).value() else {
        return Metric::Error;
    };
    let variance = samples.iter().map(|x| (x - avg).powi(2)).sum::<f64>() / samples.len() as f64;
    Metric::from_value(variance.sqrt())
}

/// Number of samples strictly greater than `threshold`.
pub fn count_above(samples: &[f64], threshold: f64) -> usize {
    samples.iter().filter(|&&s| s > threshold).count()
}
