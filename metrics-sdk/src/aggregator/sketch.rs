use std::{mem, sync::Arc};

use metrics_api::Numeric;
use parking_lot::Mutex;
use sketches_ddsketch::{Config, DDSketch};

use super::Methods;
use crate::{aggregation::SketchPoint, Aggregation, MetricsError};

/// A quantile sketch with relative-error guarantees.
///
/// Based on [DDSketch](ddsketch), `Summary` provides quantiles over an arbitrary distribution of
/// floating-point numbers, including for negative numbers, using a space-efficient sketch that
/// provides relative-error guarantees, regardless of the absolute range between the smallest and
/// larger values.
///
/// Numbers whose magnitude is at most `min_value` are counted as zeroes.
///
/// As negative numbers are kept in a sketch of their own, memory usage can be as high as twice that
/// of a single `DDSketch`.
///
/// [ddsketch]: https://arxiv.org/abs/1908.10693
#[derive(Clone)]
pub struct Summary {
    negative: DDSketch,
    positive: DDSketch,
    min_value: f64,
    zeroes: usize,
    min: Option<f64>,
    max: Option<f64>,
    sum: f64,
}

impl Summary {
    /// Creates a new [`Summary`].
    ///
    /// `alpha` represents the desired relative error for this summary.  If `alpha` was 0.001, that
    /// would represent a desired relative error of 0.1%.
    ///
    /// `max_buckets` caps how many buckets each underlying sketch allocates.  Each bucket costs
    /// eight bytes.
    ///
    /// `min_value` controls the smallest value that will be recognized distinctly from zero.
    pub fn new(alpha: f64, max_buckets: u32, min_value: f64) -> Summary {
        let config = Config::new(alpha, max_buckets, min_value.abs());

        Summary {
            negative: DDSketch::new(config.clone()),
            positive: DDSketch::new(config),
            min_value: min_value.abs(),
            zeroes: 0,
            min: None,
            max: None,
            sum: 0.0,
        }
    }

    /// Creates a new [`Summary`] with default values.
    ///
    /// `alpha` is 0.0001, `max_buckets` is 32,768, and `min_value` is 1.0e-9.
    pub fn with_defaults() -> Summary {
        Summary::new(0.0001, 32_768, 1.0e-9)
    }

    /// Adds a sample to the summary.
    pub fn add(&mut self, value: f64) {
        self.min = Some(self.min.map_or(value, |min| min.min(value)));
        self.max = Some(self.max.map_or(value, |max| max.max(value)));
        self.sum += value;

        let vabs = value.abs();
        if vabs <= self.min_value {
            self.zeroes += 1;
        } else if value > 0.0 {
            self.positive.add(vabs);
        } else {
            self.negative.add(vabs);
        }
    }

    /// Merges another summary into this one.
    ///
    /// Both summaries must have been created with the same parameters.
    pub fn merge(&mut self, other: &Summary) -> Result<(), MetricsError> {
        if self.min_value != other.min_value {
            return Err(MetricsError::InconsistentConfig("sketch"));
        }

        self.negative
            .merge(&other.negative)
            .map_err(|_| MetricsError::InconsistentConfig("sketch"))?;
        self.positive
            .merge(&other.positive)
            .map_err(|_| MetricsError::InconsistentConfig("sketch"))?;
        self.zeroes += other.zeroes;
        self.sum += other.sum;
        if let Some(min) = other.min {
            self.min = Some(self.min.map_or(min, |current| current.min(min)));
        }
        if let Some(max) = other.max {
            self.max = Some(self.max.map_or(max, |current| current.max(max)));
        }
        Ok(())
    }

    /// Gets the estimated value at the given quantile.
    ///
    /// If the sketch is empty, or if the quantile is less than 0.0 or greater than 1.0, then the
    /// result will be `None`.
    pub fn quantile(&self, q: f64) -> Option<f64> {
        if !(0.0..=1.0).contains(&q) || self.count() == 0 {
            return None;
        }

        let ncount = self.negative.count();
        let zcount = self.zeroes;
        let pcount = self.positive.count();
        let rank = (q * (self.count() - 1) as f64).round() as usize;

        if rank < ncount {
            // The most negative value has the largest magnitude, so walk the negative sketch from
            // the top.
            let nq = position(ncount - 1 - rank, ncount);
            self.negative.quantile(nq).ok().flatten().map(|v| -v)
        } else if rank < ncount + zcount {
            Some(0.0)
        } else {
            let pq = position(rank - ncount - zcount, pcount);
            self.positive.quantile(pq).ok().flatten()
        }
    }

    /// Gets the minimum value this summary has seen so far.
    pub fn min(&self) -> Option<f64> {
        self.min
    }

    /// Gets the maximum value this summary has seen so far.
    pub fn max(&self) -> Option<f64> {
        self.max
    }

    /// Gets the sum of the samples in this summary.
    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Gets the number of samples in this summary.
    pub fn count(&self) -> usize {
        self.negative.count() + self.zeroes + self.positive.count()
    }

    /// Whether or not this summary is empty.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Estimated size of this summary, in bytes.
    pub fn size(&self) -> usize {
        mem::size_of::<Self>() + ((self.positive.length() + self.negative.length()) * 8)
    }
}

fn position(index: usize, len: usize) -> f64 {
    if len <= 1 {
        0.0
    } else {
        index as f64 / (len - 1) as f64
    }
}

/// Configuration for [`Sketch`].
#[derive(Clone, Debug, PartialEq)]
pub struct SketchConfig {
    /// Relative error guarantee.
    pub alpha: f64,
    /// Bucket cap for each underlying sketch.
    pub max_buckets: u32,
    /// Magnitude at or below which values are counted as zero.
    pub min_value: f64,
    /// Quantiles to report in the exported view.
    pub quantiles: Arc<[f64]>,
}

impl Default for SketchConfig {
    fn default() -> Self {
        SketchConfig {
            alpha: 0.0001,
            max_buckets: 32_768,
            min_value: 1.0e-9,
            quantiles: Arc::from([0.5, 0.9, 0.95, 0.99].as_slice()),
        }
    }
}

impl SketchConfig {
    fn summary(&self) -> Summary {
        Summary::new(self.alpha, self.max_buckets, self.min_value)
    }
}

/// Estimates quantiles of recorded values with bounded relative error, in bounded memory.
pub struct Sketch;

/// State for [`Sketch`].
pub struct SketchStorage {
    config: SketchConfig,
    state: Mutex<Summary>,
}

impl SketchStorage {
    /// Gets a copy of the underlying summary.
    pub fn summary(&self) -> Summary {
        self.state.lock().clone()
    }
}

impl<N: Numeric> Methods<N> for Sketch {
    const NAME: &'static str = "sketch";

    type Storage = SketchStorage;
    type Config = SketchConfig;

    fn init(config: &SketchConfig) -> Self::Storage {
        SketchStorage { config: config.clone(), state: Mutex::new(config.summary()) }
    }

    fn update(storage: &Self::Storage, value: N) {
        storage.state.lock().add(value.as_f64());
    }

    fn synchronized_move(storage: &Self::Storage, destination: Option<&Self::Storage>) {
        let taken = mem::replace(&mut *storage.state.lock(), storage.config.summary());
        if let Some(destination) = destination {
            *destination.state.lock() = taken;
        }
    }

    fn merge(into: &Self::Storage, from: &Self::Storage) -> Result<(), MetricsError> {
        if into.config != from.config {
            return Err(MetricsError::InconsistentConfig("sketch"));
        }

        let from = from.summary();
        into.state.lock().merge(&from)
    }

    fn aggregation(storage: &Self::Storage) -> Result<Aggregation, MetricsError> {
        let summary = storage.summary();
        let quantiles = storage
            .config
            .quantiles
            .iter()
            .filter_map(|q| summary.quantile(*q).map(|v| (*q, v)))
            .collect();

        Ok(Aggregation::Sketch(SketchPoint {
            count: summary.count() as u64,
            sum: summary.sum(),
            min: summary.min(),
            max: summary.max(),
            quantiles,
        }))
    }

    fn is_empty(storage: &Self::Storage) -> bool {
        storage.state.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::{Methods, Sketch, SketchConfig, Summary};
    use crate::{Aggregation, MetricsError};

    #[test]
    fn quantiles_across_signs() {
        let mut summary = Summary::with_defaults();
        for value in [-10.0, -5.0, 0.0, 5.0, 10.0] {
            summary.add(value);
        }

        assert_eq!(summary.count(), 5);
        assert_relative_eq!(summary.quantile(0.0).unwrap(), -10.0, max_relative = 0.001);
        assert_relative_eq!(summary.quantile(0.25).unwrap(), -5.0, max_relative = 0.001);
        assert_eq!(summary.quantile(0.5), Some(0.0));
        assert_relative_eq!(summary.quantile(1.0).unwrap(), 10.0, max_relative = 0.001);
        assert_eq!(summary.quantile(1.5), None);
        assert_eq!(summary.min(), Some(-10.0));
        assert_eq!(summary.max(), Some(10.0));
    }

    #[test]
    fn empty_summary() {
        let summary = Summary::with_defaults();
        assert!(summary.is_empty());
        assert_eq!(summary.quantile(0.5), None);
        assert_eq!(summary.min(), None);
    }

    #[test]
    fn move_and_merge() {
        let config = SketchConfig::default();
        let live = <Sketch as Methods<f64>>::init(&config);
        let checkpoint = <Sketch as Methods<f64>>::init(&config);

        for value in 1..=100 {
            <Sketch as Methods<f64>>::update(&live, value as f64);
        }
        <Sketch as Methods<f64>>::synchronized_move(&live, Some(&checkpoint));
        assert!(live.summary().is_empty());

        <Sketch as Methods<f64>>::update(&live, 1000.0);
        <Sketch as Methods<f64>>::merge(&checkpoint, &live).unwrap();

        let Ok(Aggregation::Sketch(point)) = <Sketch as Methods<f64>>::aggregation(&checkpoint) else {
            panic!("expected sketch");
        };
        assert_eq!(point.count, 101);
        assert_relative_eq!(point.sum, 6050.0);
        assert_eq!(point.max, Some(1000.0));
        assert_eq!(point.quantiles.len(), 4);
        assert_relative_eq!(point.quantiles[0].1, 51.0, max_relative = 0.01);

        let other = <Sketch as Methods<f64>>::init(&SketchConfig { alpha: 0.01, ..SketchConfig::default() });
        assert_eq!(
            <Sketch as Methods<f64>>::merge(&checkpoint, &other),
            Err(MetricsError::InconsistentConfig("sketch"))
        );
    }
}
