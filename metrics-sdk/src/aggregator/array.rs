use std::{cmp::Ordering, mem};

use metrics_api::Numeric;
use parking_lot::Mutex;

use super::Methods;
use crate::{aggregation::Points, Aggregation, MetricsError};

/// Keeps every recorded value, for exact quantiles.
///
/// Values are appended unsorted while recording; they are sorted once, when moved out into a
/// checkpoint.  Memory use grows with the number of measurements per collection interval.
pub struct Exact;

#[derive(Default)]
struct State<N> {
    points: Vec<N>,
    sum: N,
}

/// State for [`Exact`].
pub struct ExactStorage<N> {
    state: Mutex<State<N>>,
}

impl<N: Numeric> ExactStorage<N> {
    /// Gets a copy of the recorded values and their sum.
    pub fn points(&self) -> (Vec<N>, N) {
        let state = self.state.lock();
        (state.points.clone(), state.sum)
    }
}

fn sort_points<N: Numeric>(points: &mut [N]) {
    // Values passed the range check, so there is no NaN to order.
    points.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
}

impl<N: Numeric> Methods<N> for Exact {
    const NAME: &'static str = "exact";

    type Storage = ExactStorage<N>;
    type Config = ();

    fn init(_config: &()) -> Self::Storage {
        ExactStorage { state: Mutex::new(State::default()) }
    }

    fn update(storage: &Self::Storage, value: N) {
        let mut state = storage.state.lock();
        state.points.push(value);
        state.sum = state.sum.wrapping_add(value);
    }

    fn synchronized_move(storage: &Self::Storage, destination: Option<&Self::Storage>) {
        let mut taken = mem::take(&mut *storage.state.lock());
        if let Some(destination) = destination {
            sort_points(&mut taken.points);
            *destination.state.lock() = taken;
        }
    }

    fn merge(into: &Self::Storage, from: &Self::Storage) -> Result<(), MetricsError> {
        let (points, sum) = from.points();
        let mut state = into.state.lock();
        state.points.extend(points);
        sort_points(&mut state.points);
        state.sum = state.sum.wrapping_add(sum);
        Ok(())
    }

    fn aggregation(storage: &Self::Storage) -> Result<Aggregation, MetricsError> {
        let (mut points, sum) = storage.points();
        sort_points(&mut points);
        Ok(Aggregation::Points(Points {
            values: points.into_iter().map(Numeric::into_number).collect(),
            sum: sum.into_number(),
        }))
    }

    fn is_empty(storage: &Self::Storage) -> bool {
        storage.state.lock().points.is_empty()
    }
}
