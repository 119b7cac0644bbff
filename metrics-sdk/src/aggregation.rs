//! Exporter-ready views of aggregated state.
use metrics_api::Number;
use quanta::Instant;

use crate::MetricsError;

/// A read-only, exportable view of an aggregator.
///
/// Views are detached copies: holding one does not keep any aggregator state locked.
#[derive(Clone, Debug, PartialEq)]
pub enum Aggregation {
    /// The sum of all recorded values.
    Sum(Number),
    /// The most recently recorded value.
    LastValue(LastValuePoint),
    /// Recorded values counted into fixed buckets.
    Histogram(HistogramPoint),
    /// Every recorded value, in ascending order.
    Points(Points),
    /// A relative-error quantile sketch of recorded values.
    Sketch(SketchPoint),
    /// One view per member of a multi aggregator, in member order.  Members without data are
    /// `None`.
    Multiple(Vec<Option<Aggregation>>),
}

impl Aggregation {
    /// Gets the name of the aggregation kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Aggregation::Sum(_) => "sum",
            Aggregation::LastValue(_) => "last_value",
            Aggregation::Histogram(_) => "histogram",
            Aggregation::Points(_) => "exact",
            Aggregation::Sketch(_) => "sketch",
            Aggregation::Multiple(_) => "multi",
        }
    }
}

/// A last-value observation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LastValuePoint {
    /// The recorded value.
    pub value: Number,
    /// When the value was recorded.
    pub timestamp: Instant,
}

/// A histogram snapshot.
///
/// `counts[i]` holds the number of values `v` where `boundaries[i - 1] <= v < boundaries[i]`, with
/// the first and last buckets open-ended.  There is always one more count than there are
/// boundaries.
#[derive(Clone, Debug, PartialEq)]
pub struct HistogramPoint {
    /// Upper-exclusive bucket boundaries, in ascending order.
    pub boundaries: Vec<f64>,
    /// Per-bucket counts.
    pub counts: Vec<u64>,
    /// Sum of recorded values.
    pub sum: Number,
    /// Number of recorded values.
    pub count: u64,
}

/// A snapshot of raw recorded values.
#[derive(Clone, Debug, PartialEq)]
pub struct Points {
    /// Recorded values, in ascending order.
    pub values: Vec<Number>,
    /// Sum of recorded values.
    pub sum: Number,
}

impl Points {
    /// Number of recorded values.
    pub fn count(&self) -> u64 {
        self.values.len() as u64
    }

    /// Smallest recorded value.
    pub fn min(&self) -> Result<Number, MetricsError> {
        self.values.first().copied().ok_or(MetricsError::NoData)
    }

    /// Largest recorded value.
    pub fn max(&self) -> Result<Number, MetricsError> {
        self.values.last().copied().ok_or(MetricsError::NoData)
    }

    /// Gets the exact value at quantile `q`.
    ///
    /// Picks the smallest recorded value at or above the requested rank.
    pub fn quantile(&self, q: f64) -> Result<Number, MetricsError> {
        if !(0.0..=1.0).contains(&q) {
            return Err(MetricsError::InvalidQuantile(q));
        }
        if self.values.is_empty() {
            return Err(MetricsError::NoData);
        }

        let idx = ((self.values.len() - 1) as f64 * q).ceil() as usize;
        Ok(self.values[idx])
    }
}

/// A snapshot of a quantile sketch.
#[derive(Clone, Debug, PartialEq)]
pub struct SketchPoint {
    /// Number of recorded values.
    pub count: u64,
    /// Sum of recorded values.
    pub sum: f64,
    /// Smallest recorded value.
    pub min: Option<f64>,
    /// Largest recorded value.
    pub max: Option<f64>,
    /// Estimated values at the configured quantiles, as `(quantile, value)` pairs.
    pub quantiles: Vec<(f64, f64)>,
}
