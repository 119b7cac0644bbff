use metrics_api::{AtomicNumber, Numeric};

use super::Methods;
use crate::{Aggregation, MetricsError};

/// Sums every recorded value.
///
/// State is a single atomic number, so updates never take a lock.
pub struct Sum;

impl<N: Numeric> Methods<N> for Sum {
    const NAME: &'static str = "sum";

    type Storage = AtomicNumber<N>;
    type Config = ();

    fn init(_config: &()) -> Self::Storage {
        AtomicNumber::default()
    }

    fn update(storage: &Self::Storage, value: N) {
        storage.add(value);
    }

    fn synchronized_move(storage: &Self::Storage, destination: Option<&Self::Storage>) {
        let value = storage.swap(N::zero());
        if let Some(destination) = destination {
            destination.store(value);
        }
    }

    fn merge(into: &Self::Storage, from: &Self::Storage) -> Result<(), MetricsError> {
        into.add(from.load());
        Ok(())
    }

    fn subtract(target: &Self::Storage, operand: &Self::Storage) -> Result<(), MetricsError> {
        target.sub(operand.load());
        Ok(())
    }

    fn aggregation(storage: &Self::Storage) -> Result<Aggregation, MetricsError> {
        Ok(Aggregation::Sum(storage.load().into_number()))
    }

    fn is_empty(storage: &Self::Storage) -> bool {
        storage.load() == N::zero()
    }
}
