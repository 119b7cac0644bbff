use std::{mem, sync::Arc};

use metrics_api::Numeric;
use parking_lot::Mutex;

use super::Methods;
use crate::{aggregation::HistogramPoint, Aggregation, MetricsError};

/// Bucket boundaries used when none are configured.
pub const DEFAULT_BOUNDARIES: &[f64] = &[0.0, 5.0, 10.0, 25.0, 50.0, 75.0, 100.0, 250.0, 500.0, 1000.0];

/// Counts recorded values into fixed buckets, tracking their sum and count.
///
/// Boundaries are upper-exclusive: a value equal to a boundary lands in the bucket above it.
/// Only histograms configured with identical boundaries can be merged or subtracted.  Integer sums
/// wrap on overflow.
pub struct Histogram;

struct State<N> {
    counts: Vec<u64>,
    sum: N,
    count: u64,
}

impl<N: Numeric> State<N> {
    fn empty(buckets: usize) -> Self {
        State { counts: vec![0; buckets], sum: N::zero(), count: 0 }
    }
}

/// State for [`Histogram`].
pub struct HistogramStorage<N> {
    boundaries: Arc<[f64]>,
    state: Mutex<State<N>>,
}

impl<N: Numeric> HistogramStorage<N> {
    /// Gets the bucket boundaries.
    pub fn boundaries(&self) -> &[f64] {
        &self.boundaries
    }

    /// Gets a copy of the bucket counts, sum and count.
    pub fn counts(&self) -> (Vec<u64>, N, u64) {
        let state = self.state.lock();
        (state.counts.clone(), state.sum, state.count)
    }
}

impl<N: Numeric> Methods<N> for Histogram {
    const NAME: &'static str = "histogram";

    type Storage = HistogramStorage<N>;
    type Config = Arc<[f64]>;

    fn init(boundaries: &Arc<[f64]>) -> Self::Storage {
        HistogramStorage {
            boundaries: Arc::clone(boundaries),
            state: Mutex::new(State::empty(boundaries.len() + 1)),
        }
    }

    fn update(storage: &Self::Storage, value: N) {
        let bucket = storage.boundaries.partition_point(|b| *b <= value.as_f64());

        let mut state = storage.state.lock();
        state.counts[bucket] += 1;
        state.sum = state.sum.wrapping_add(value);
        state.count += 1;
    }

    fn synchronized_move(storage: &Self::Storage, destination: Option<&Self::Storage>) {
        let empty = State::empty(storage.boundaries.len() + 1);
        let taken = mem::replace(&mut *storage.state.lock(), empty);
        if let Some(destination) = destination {
            *destination.state.lock() = taken;
        }
    }

    fn merge(into: &Self::Storage, from: &Self::Storage) -> Result<(), MetricsError> {
        check_boundaries::<N>(into, from)?;

        let (counts, sum, count) = from.counts();
        let mut state = into.state.lock();
        for (bucket, n) in state.counts.iter_mut().zip(counts) {
            *bucket += n;
        }
        state.sum = state.sum.wrapping_add(sum);
        state.count += count;
        Ok(())
    }

    fn subtract(target: &Self::Storage, operand: &Self::Storage) -> Result<(), MetricsError> {
        check_boundaries::<N>(target, operand)?;

        let (counts, sum, count) = operand.counts();
        let mut state = target.state.lock();
        for (bucket, n) in state.counts.iter_mut().zip(counts) {
            *bucket = bucket.saturating_sub(n);
        }
        state.sum = state.sum.wrapping_sub(sum);
        state.count = state.count.saturating_sub(count);
        Ok(())
    }

    fn aggregation(storage: &Self::Storage) -> Result<Aggregation, MetricsError> {
        let (counts, sum, count) = storage.counts();
        Ok(Aggregation::Histogram(HistogramPoint {
            boundaries: storage.boundaries.to_vec(),
            counts,
            sum: sum.into_number(),
            count,
        }))
    }

    fn is_empty(storage: &Self::Storage) -> bool {
        storage.state.lock().count == 0
    }
}

fn check_boundaries<N: Numeric>(
    a: &HistogramStorage<N>,
    b: &HistogramStorage<N>,
) -> Result<(), MetricsError> {
    if Arc::ptr_eq(&a.boundaries, &b.boundaries) || a.boundaries == b.boundaries {
        Ok(())
    } else {
        Err(MetricsError::InconsistentConfig(<Histogram as Methods<N>>::NAME))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use approx::assert_relative_eq;

    use super::{Histogram, HistogramStorage, Methods};
    use crate::MetricsError;

    fn init(boundaries: &[f64]) -> HistogramStorage<f64> {
        <Histogram as Methods<f64>>::init(&Arc::from(boundaries))
    }

    #[test]
    fn buckets_are_upper_exclusive() {
        let storage = init(&[10.0, 20.0]);
        for value in [0.5, 10.0, 19.9, 20.0, 35.0] {
            <Histogram as Methods<f64>>::update(&storage, value);
        }

        let (counts, sum, count) = storage.counts();
        assert_eq!(counts, vec![1, 2, 2]);
        assert_eq!(count, 5);
        assert_relative_eq!(sum, 85.4);
    }

    #[test]
    fn merge_requires_same_boundaries() {
        let a = init(&[1.0, 2.0]);
        let b = init(&[1.0, 2.0]);
        let c = init(&[1.0, 3.0]);

        <Histogram as Methods<f64>>::update(&a, 1.5);
        <Histogram as Methods<f64>>::update(&b, 2.5);
        <Histogram as Methods<f64>>::merge(&a, &b).unwrap();
        assert_eq!(a.counts().0, vec![0, 1, 1]);

        assert_eq!(
            <Histogram as Methods<f64>>::merge(&a, &c),
            Err(MetricsError::InconsistentConfig("histogram"))
        );
        assert_eq!(a.counts().2, 2);
    }

    #[test]
    fn move_resets_counts() {
        let live = init(&[1.0]);
        let checkpoint = init(&[1.0]);
        <Histogram as Methods<f64>>::update(&live, 0.0);
        <Histogram as Methods<f64>>::synchronized_move(&live, Some(&checkpoint));

        assert_eq!(live.counts(), (vec![0, 0], 0.0, 0));
        assert_eq!(checkpoint.counts(), (vec![1, 0], 0.0, 1));
        assert!(<Histogram as Methods<f64>>::is_empty(&live));
        assert!(!<Histogram as Methods<f64>>::is_empty(&checkpoint));
    }

    #[test]
    fn subtract_removes_bucket_counts() {
        let cumulative = init(&[1.0, 2.0]);
        let previous = init(&[1.0, 2.0]);
        for value in [0.5, 1.5, 1.5, 2.5] {
            <Histogram as Methods<f64>>::update(&cumulative, value);
        }
        <Histogram as Methods<f64>>::update(&previous, 1.5);

        <Histogram as Methods<f64>>::subtract(&cumulative, &previous).unwrap();
        let (counts, sum, count) = cumulative.counts();
        assert_eq!(counts, vec![1, 1, 1]);
        assert_eq!(count, 3);
        assert_relative_eq!(sum, 4.5);

        let other = init(&[1.0]);
        assert_eq!(
            <Histogram as Methods<f64>>::subtract(&cumulative, &other),
            Err(MetricsError::InconsistentConfig("histogram"))
        );
        assert_eq!(cumulative.counts().2, 3);
    }

    #[test]
    fn integer_sum_wraps_instead_of_panicking() {
        let boundaries: Arc<[f64]> = Arc::from([10.0].as_slice());
        let a = <Histogram as Methods<i64>>::init(&boundaries);
        let b = <Histogram as Methods<i64>>::init(&boundaries);

        <Histogram as Methods<i64>>::update(&a, i64::MAX);
        <Histogram as Methods<i64>>::update(&a, 1);
        assert_eq!(a.counts(), (vec![1, 1], i64::MIN, 2));

        <Histogram as Methods<i64>>::update(&b, i64::MAX);
        <Histogram as Methods<i64>>::merge(&a, &b).unwrap();
        assert_eq!(a.counts(), (vec![1, 2], -1, 3));
    }
}
