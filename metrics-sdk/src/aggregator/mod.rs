//! Aggregation behaviors and the type-erased aggregator interface.
//!
//! Each behavior is written once against [`Methods`], generic over the instrument's [`Numeric`]
//! type, and wrapped in [`StateAggregator`] to be driven dynamically through [`Aggregator`].
use std::{any::Any, fmt, marker::PhantomData};

use metrics_api::{Descriptor, Number, NumberKind, Numeric};

use crate::{Aggregation, MetricsError};

mod array;
pub use self::array::{Exact, ExactStorage};

mod histogram;
pub use self::histogram::{Histogram, HistogramStorage, DEFAULT_BOUNDARIES};

mod last_value;
pub use self::last_value::{LastValue, LastValueStorage};

mod multi;
pub use self::multi::Multi;

mod sketch;
pub use self::sketch::{Sketch, SketchConfig, SketchStorage, Summary};

mod sum;
pub use self::sum::Sum;

/// A specific aggregation behavior over numeric type `N`.
///
/// Implementations are marker types: all state lives in [`Methods::Storage`], which is shared
/// between recording threads and the collector and must therefore be internally synchronized.
pub trait Methods<N: Numeric>: 'static {
    /// Name of the aggregation, used in error reports.
    const NAME: &'static str;

    /// Aggregation state.
    type Storage: Send + Sync + 'static;

    /// Configuration needed to build new state.
    type Config: Clone + Send + Sync + 'static;

    /// Creates empty state.
    fn init(config: &Self::Config) -> Self::Storage;

    /// Incorporates a single measurement.
    ///
    /// May be called concurrently with itself and with [`Methods::synchronized_move`].
    fn update(storage: &Self::Storage, value: N);

    /// Atomically copies `storage` into `destination` and resets `storage`.
    ///
    /// When `destination` is `None`, `storage` is only reset.  Every update lands either in the
    /// moved copy or in the reset state, never in both and never in neither.
    fn synchronized_move(storage: &Self::Storage, destination: Option<&Self::Storage>);

    /// Adds the contents of `from` to `into`.
    fn merge(into: &Self::Storage, from: &Self::Storage) -> Result<(), MetricsError>;

    /// Removes the contents of `operand` from `target`.
    fn subtract(target: &Self::Storage, operand: &Self::Storage) -> Result<(), MetricsError> {
        let _ = (target, operand);
        Err(MetricsError::NoSubtraction(Self::NAME))
    }

    /// Builds an exportable view of the state.
    fn aggregation(storage: &Self::Storage) -> Result<Aggregation, MetricsError>;

    /// Whether or not the state holds nothing worth exporting.
    fn is_empty(storage: &Self::Storage) -> bool;
}

/// A type-erased aggregator.
///
/// Operations taking another aggregator fail with [`MetricsError::InconsistentAggregator`] when
/// the two are not of the same concrete type.
pub trait Aggregator: Send + Sync + 'static {
    /// Name of the aggregation.
    fn name(&self) -> &'static str;

    /// Numeric type this aggregator stores.
    fn number_kind(&self) -> NumberKind;

    /// Incorporates a single measurement, converting it to the stored numeric type if needed.
    fn update(&self, number: Number);

    /// Copies this aggregator into `destination` and resets it.  See [`Methods::synchronized_move`].
    fn synchronized_move(&self, destination: Option<&dyn Aggregator>) -> Result<(), MetricsError>;

    /// Adds the contents of `from` to this aggregator.
    fn merge(&self, from: &dyn Aggregator) -> Result<(), MetricsError>;

    /// Removes the contents of `operand` from this aggregator.
    fn subtract(&self, operand: &dyn Aggregator) -> Result<(), MetricsError>;

    /// Builds an exportable view of this aggregator.
    fn aggregation(&self) -> Result<Aggregation, MetricsError>;

    /// Whether or not this aggregator holds nothing worth exporting.
    fn is_empty(&self) -> bool;

    /// Creates an empty aggregator of the same type and configuration.
    fn new_empty(&self) -> Box<dyn Aggregator>;

    /// Gets this aggregator as [`Any`], for downcasting.
    fn as_any(&self) -> &dyn Any;
}

impl fmt::Debug for dyn Aggregator + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregator")
            .field("name", &self.name())
            .field("number_kind", &self.number_kind())
            .finish()
    }
}

/// Adapts a [`Methods`] implementation into an [`Aggregator`].
pub struct StateAggregator<M, N>
where
    M: Methods<N>,
    N: Numeric,
{
    config: M::Config,
    storage: M::Storage,
    _behavior: PhantomData<fn() -> (M, N)>,
}

impl<M, N> StateAggregator<M, N>
where
    M: Methods<N>,
    N: Numeric,
{
    /// Creates a new, empty `StateAggregator`.
    pub fn new(config: M::Config) -> Self {
        let storage = M::init(&config);
        Self { config, storage, _behavior: PhantomData }
    }

    /// Gets the underlying state.
    pub fn storage(&self) -> &M::Storage {
        &self.storage
    }

    fn downcast<'a>(&self, other: &'a dyn Aggregator) -> Result<&'a Self, MetricsError> {
        other.as_any().downcast_ref::<Self>().ok_or(MetricsError::InconsistentAggregator {
            expected: M::NAME,
            found: other.name(),
        })
    }
}

impl<M, N> Aggregator for StateAggregator<M, N>
where
    M: Methods<N>,
    N: Numeric,
{
    fn name(&self) -> &'static str {
        M::NAME
    }

    fn number_kind(&self) -> NumberKind {
        N::KIND
    }

    fn update(&self, number: Number) {
        M::update(&self.storage, N::from_number(number));
    }

    fn synchronized_move(&self, destination: Option<&dyn Aggregator>) -> Result<(), MetricsError> {
        match destination {
            None => M::synchronized_move(&self.storage, None),
            Some(destination) => {
                let destination = self.downcast(destination)?;
                M::synchronized_move(&self.storage, Some(&destination.storage));
            }
        }
        Ok(())
    }

    fn merge(&self, from: &dyn Aggregator) -> Result<(), MetricsError> {
        let from = self.downcast(from)?;
        M::merge(&self.storage, &from.storage)
    }

    fn subtract(&self, operand: &dyn Aggregator) -> Result<(), MetricsError> {
        let operand = self.downcast(operand)?;
        M::subtract(&self.storage, &operand.storage)
    }

    fn aggregation(&self) -> Result<Aggregation, MetricsError> {
        M::aggregation(&self.storage)
    }

    fn is_empty(&self) -> bool {
        M::is_empty(&self.storage)
    }

    fn new_empty(&self) -> Box<dyn Aggregator> {
        Box::new(Self::new(self.config.clone()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Checks that a measurement is acceptable for the given instrument.
///
/// NaN and infinite values are always rejected.  Negative values are rejected when the
/// instrument is monotonic.
pub fn range_test(number: Number, descriptor: &Descriptor) -> Result<(), MetricsError> {
    if number.is_infinite() {
        return Err(MetricsError::InfInput);
    }

    if number.is_nan() {
        return Err(MetricsError::NaNInput);
    }

    if descriptor.is_monotonic() && number.is_negative() {
        return Err(MetricsError::NegativeInput);
    }

    Ok(())
}
