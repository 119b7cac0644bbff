use metrics_api::Numeric;
use parking_lot::Mutex;
use quanta::{Clock, Instant};

use super::Methods;
use crate::{aggregation::LastValuePoint, Aggregation, MetricsError};

/// Keeps the most recently recorded value, along with when it was recorded.
///
/// Merging two last values keeps whichever was recorded later.  Last values cannot be subtracted.
pub struct LastValue;

/// State for [`LastValue`].
pub struct LastValueStorage<N> {
    clock: Clock,
    state: Mutex<Option<(N, Instant)>>,
}

impl<N: Numeric> LastValueStorage<N> {
    /// Gets the current value and its timestamp, if any value has been recorded.
    pub fn get(&self) -> Option<(N, Instant)> {
        *self.state.lock()
    }
}

impl<N: Numeric> Methods<N> for LastValue {
    const NAME: &'static str = "last_value";

    type Storage = LastValueStorage<N>;
    type Config = Clock;

    fn init(clock: &Clock) -> Self::Storage {
        LastValueStorage { clock: clock.clone(), state: Mutex::new(None) }
    }

    fn update(storage: &Self::Storage, value: N) {
        // Stamp under the lock so that the stored value always carries the latest timestamp.
        let mut state = storage.state.lock();
        *state = Some((value, storage.clock.now()));
    }

    fn synchronized_move(storage: &Self::Storage, destination: Option<&Self::Storage>) {
        let taken = storage.state.lock().take();
        if let Some(destination) = destination {
            *destination.state.lock() = taken;
        }
    }

    fn merge(into: &Self::Storage, from: &Self::Storage) -> Result<(), MetricsError> {
        let Some((value, timestamp)) = from.get() else {
            return Ok(());
        };

        let mut state = into.state.lock();
        match *state {
            Some((_, current)) if current >= timestamp => {}
            _ => *state = Some((value, timestamp)),
        }
        Ok(())
    }

    fn aggregation(storage: &Self::Storage) -> Result<Aggregation, MetricsError> {
        storage
            .get()
            .map(|(value, timestamp)| {
                Aggregation::LastValue(LastValuePoint { value: value.into_number(), timestamp })
            })
            .ok_or(MetricsError::NoData)
    }

    fn is_empty(storage: &Self::Storage) -> bool {
        storage.state.lock().is_none()
    }
}
