//! The accumulator: instrument construction, the measurement path, and collection.
//!
//! Every measurement is folded into the record for its (instrument, attribute set) pair.  A
//! collection pass walks the [`RecordStore`], moves each changed record's state into its
//! checkpoint aggregator, and hands the checkpoint to the configured [`Processor`].
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use metrics_api::{AttributeSet, Descriptor, Number};
use quanta::Clock;
use tracing::debug;

use crate::{
    aggregator::{range_test, Aggregator},
    processor::{Accumulation, Processor},
    registry::{CollectOutcome, InstrumentId, Record, RecordKey, RecordStore},
    selector::{AggregatorSelector, SimpleSelector},
    ErrorHandler, LoggingErrorHandler, MetricsError, DEFAULT_COLLECT_BATCH_SIZE,
};

struct InstrumentCore {
    id: InstrumentId,
    descriptor: Descriptor,
    prototype: Option<Box<dyn Aggregator>>,
}

struct RecordState {
    instrument: Arc<InstrumentCore>,
    current: Box<dyn Aggregator>,
    checkpoint: Box<dyn Aggregator>,
}

struct Inner {
    store: RecordStore<RecordState>,
    processor: Arc<dyn Processor>,
    selector: Arc<dyn AggregatorSelector>,
    error_handler: Arc<dyn ErrorHandler>,
    clock: Clock,
    next_instrument: AtomicU64,
}

impl Inner {
    /// Moves the record's current state into its checkpoint and hands it to the processor.
    ///
    /// An update counted as modified can land in the move of the previous pass, leaving nothing
    /// for this one.  Such empty checkpoints are not processed.
    fn checkpoint(&self, record: &Record<RecordState>) -> bool {
        let state = record.value();
        if let Err(e) = state.current.synchronized_move(Some(state.checkpoint.as_ref())) {
            self.error_handler.handle(e);
            return false;
        }
        if state.checkpoint.is_empty() {
            return false;
        }

        let accumulation = Accumulation {
            instrument: state.instrument.id,
            descriptor: &state.instrument.descriptor,
            attributes: record.attributes(),
            aggregator: state.checkpoint.as_ref(),
        };
        if let Err(e) = self.processor.process(accumulation) {
            self.error_handler.handle(e);
        }
        true
    }

    fn collect<P>(&self, proceed: P) -> CollectOutcome
    where
        P: FnMut() -> bool,
    {
        let outcome = self.store.collect(|record| self.checkpoint(record), proceed);
        debug!(
            checkpointed = outcome.checkpointed,
            retained = outcome.retained,
            reclaimed = outcome.reclaimed,
            remaining = outcome.remaining,
            records = self.store.len(),
            "Collection pass finished."
        );
        outcome
    }
}

/// Builder for creating and configuring an [`Accumulator`].
pub struct AccumulatorBuilder {
    processor: Arc<dyn Processor>,
    selector: Option<Arc<dyn AggregatorSelector>>,
    error_handler: Arc<dyn ErrorHandler>,
    clock: Clock,
    batch_size: usize,
}

impl AccumulatorBuilder {
    /// Creates a new `AccumulatorBuilder` that hands checkpoints to `processor`.
    pub fn new(processor: Arc<dyn Processor>) -> Self {
        AccumulatorBuilder {
            processor,
            selector: None,
            error_handler: Arc::new(LoggingErrorHandler),
            clock: Clock::new(),
            batch_size: DEFAULT_COLLECT_BATCH_SIZE,
        }
    }

    /// Sets the aggregator selector.
    ///
    /// Defaults to a [`SimpleSelector`] with default histogram boundaries, sharing the
    /// accumulator's clock.
    #[must_use]
    pub fn with_selector(mut self, selector: Arc<dyn AggregatorSelector>) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Sets the error handler.
    ///
    /// Defaults to [`LoggingErrorHandler`].
    #[must_use]
    pub fn with_error_handler(mut self, error_handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = error_handler;
        self
    }

    /// Sets the clock used for timestamps and collection deadlines.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Sets how many records a collection pass visits between deadline checks.
    ///
    /// Defaults to 64.  Values below one are treated as one.
    #[must_use]
    pub fn with_collect_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Builds the accumulator.
    pub fn build(self) -> Accumulator {
        let selector = self.selector.unwrap_or_else(|| {
            Arc::new(SimpleSelector::new().with_clock(self.clock.clone()))
        });

        Accumulator {
            inner: Arc::new(Inner {
                store: RecordStore::with_batch_size(self.batch_size),
                processor: self.processor,
                selector,
                error_handler: self.error_handler,
                clock: self.clock,
                next_instrument: AtomicU64::new(1),
            }),
        }
    }
}

/// Creates instruments, records measurements, and collects them.
///
/// Cloning an `Accumulator` is cheap and yields a handle to the same state.
#[derive(Clone)]
pub struct Accumulator {
    inner: Arc<Inner>,
}

impl Accumulator {
    /// Creates a new `Accumulator` with default configuration.
    pub fn new(processor: Arc<dyn Processor>) -> Self {
        AccumulatorBuilder::new(processor).build()
    }

    /// Creates an instrument.
    ///
    /// The aggregation is chosen by the configured selector.  When the selector declines to
    /// aggregate the instrument, the returned instrument is disabled and ignores measurements.
    pub fn new_instrument(&self, descriptor: Descriptor) -> Instrument {
        let id = InstrumentId::from_raw(self.inner.next_instrument.fetch_add(1, Ordering::Relaxed));
        let prototype = self.inner.selector.aggregator_for(&descriptor);
        if prototype.is_none() {
            debug!(instrument = descriptor.name(), "Instrument disabled by aggregator selector.");
        }

        Instrument {
            core: Arc::new(InstrumentCore { id, descriptor, prototype }),
            accumulator: Arc::clone(&self.inner),
        }
    }

    /// Records several measurements against the same attribute set.
    pub fn record_batch(&self, attributes: &AttributeSet, measurements: &[Measurement]) {
        for measurement in measurements {
            measurement.instrument.record_one(measurement.number, attributes);
        }
    }

    /// Runs a collection pass, returning the number of records checkpointed.
    pub fn collect(&self) -> usize {
        self.inner.collect(|| true).checkpointed
    }

    /// Runs a collection pass that stops once `timeout` has elapsed.
    ///
    /// Records left unvisited are kept untouched for the next pass, and the error handler is
    /// notified with [`MetricsError::CollectionTimeout`].
    pub fn collect_with_timeout(&self, timeout: Duration) -> CollectOutcome {
        let clock = &self.inner.clock;
        let deadline = clock.now() + timeout;
        let outcome = self.inner.collect(|| clock.now() < deadline);
        if outcome.interrupted {
            self.inner
                .error_handler
                .handle(MetricsError::CollectionTimeout { remaining: outcome.remaining });
        }
        outcome
    }

    /// Number of records currently held.
    pub fn record_count(&self) -> usize {
        self.inner.store.len()
    }
}

impl fmt::Debug for Accumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accumulator").field("records", &self.record_count()).finish()
    }
}

/// A handle for recording measurements on one instrument.
#[derive(Clone)]
pub struct Instrument {
    core: Arc<InstrumentCore>,
    accumulator: Arc<Inner>,
}

impl Instrument {
    /// Gets the descriptor of this instrument.
    pub fn descriptor(&self) -> &Descriptor {
        &self.core.descriptor
    }

    /// Whether or not this instrument aggregates measurements.
    pub fn is_enabled(&self) -> bool {
        self.core.prototype.is_some()
    }

    /// Records a single measurement against `attributes`.
    ///
    /// Invalid measurements are dropped and reported to the error handler.
    pub fn record_one<V: Into<Number>>(&self, value: V, attributes: &AttributeSet) {
        let Some(prototype) = self.core.prototype.as_deref() else {
            return;
        };

        let number = value.into();
        if let Err(e) = range_test(number, &self.core.descriptor) {
            self.accumulator.error_handler.handle(e);
            return;
        }

        let record = self.acquire(prototype, attributes.clone());
        record.value().current.update(number);
        record.mark_updated();
        self.accumulator.store.release(&record);
    }

    /// Binds this instrument to `attributes`, keeping the record referenced until the returned
    /// handle is dropped.
    pub fn bind(&self, attributes: &AttributeSet) -> BoundInstrument {
        let record = self
            .core
            .prototype
            .as_deref()
            .map(|prototype| self.acquire(prototype, attributes.clone()));
        BoundInstrument { instrument: self.clone(), record }
    }

    /// Creates a measurement of this instrument, for use with [`Accumulator::record_batch`].
    pub fn measurement<V: Into<Number>>(&self, value: V) -> Measurement {
        Measurement { instrument: self.clone(), number: value.into() }
    }

    fn acquire(
        &self,
        prototype: &dyn Aggregator,
        attributes: AttributeSet,
    ) -> Arc<Record<RecordState>> {
        let key = RecordKey::new(self.core.id, attributes);
        self.accumulator.store.bind(key, || RecordState {
            instrument: Arc::clone(&self.core),
            current: prototype.new_empty(),
            checkpoint: prototype.new_empty(),
        })
    }
}

impl fmt::Debug for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrument")
            .field("id", &self.core.id)
            .field("descriptor", &self.core.descriptor)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// An instrument bound to a single attribute set.
///
/// The underlying record stays in the store for as long as the handle lives.
pub struct BoundInstrument {
    instrument: Instrument,
    record: Option<Arc<Record<RecordState>>>,
}

impl BoundInstrument {
    /// Records a single measurement.
    pub fn record<V: Into<Number>>(&self, value: V) {
        let Some(record) = &self.record else {
            return;
        };

        let number = value.into();
        if let Err(e) = range_test(number, self.instrument.descriptor()) {
            self.instrument.accumulator.error_handler.handle(e);
            return;
        }

        record.value().current.update(number);
        record.mark_updated();
    }

    /// Gets the attribute set this handle is bound to, if the instrument is enabled.
    pub fn attributes(&self) -> Option<&AttributeSet> {
        self.record.as_ref().map(|record| record.attributes())
    }
}

impl Drop for BoundInstrument {
    fn drop(&mut self) {
        if let Some(record) = self.record.take() {
            self.instrument.accumulator.store.release(&record);
        }
    }
}

/// A value recorded on a specific instrument.
#[derive(Clone, Debug)]
pub struct Measurement {
    instrument: Instrument,
    number: Number,
}

impl Measurement {
    /// Gets the instrument this measurement belongs to.
    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    /// Gets the measured value.
    pub fn number(&self) -> Number {
        self.number
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use metrics_api::{
        default_encoder, AttributeSet, Descriptor, InstrumentKind, KeyValue, Number, NumberKind,
    };

    use super::{Accumulator, AccumulatorBuilder};
    use crate::{
        aggregator::Aggregator,
        processor::{Accumulation, Processor},
        selector::AggregatorSelector,
        Aggregation, MetricsError,
    };

    #[derive(Default)]
    struct Collected(Mutex<Vec<(String, AttributeSet, Aggregation)>>);

    impl Processor for Collected {
        fn process(&self, accumulation: Accumulation<'_>) -> Result<(), MetricsError> {
            let aggregation = accumulation.aggregator.aggregation()?;
            self.0.lock().unwrap().push((
                accumulation.descriptor.name().to_string(),
                accumulation.attributes.clone(),
                aggregation,
            ));
            Ok(())
        }
    }

    impl Collected {
        fn take(&self) -> Vec<(String, AttributeSet, Aggregation)> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    fn setup() -> (Accumulator, Arc<Collected>, Arc<Mutex<Vec<MetricsError>>>) {
        let processor = Arc::new(Collected::default());
        let errors = Arc::new(Mutex::new(Vec::new()));
        let handler = {
            let errors = Arc::clone(&errors);
            move |err: MetricsError| errors.lock().unwrap().push(err)
        };
        let accumulator = AccumulatorBuilder::new(processor.clone())
            .with_error_handler(Arc::new(handler))
            .build();
        (accumulator, processor, errors)
    }

    fn attrs(value: &'static str) -> AttributeSet {
        AttributeSet::new([KeyValue::new("A", value)])
    }

    #[test]
    fn record_and_collect() {
        let (accumulator, processor, errors) = setup();
        let counter = accumulator.new_instrument(Descriptor::new(
            "requests",
            InstrumentKind::Counter,
            NumberKind::I64,
        ));

        counter.record_one(2_i64, &attrs("B"));
        counter.record_one(3_i64, &attrs("B"));
        counter.record_one(1_i64, &attrs("C"));

        assert_eq!(accumulator.collect(), 2);
        let mut collected = processor.take();
        collected.sort_by_key(|(_, attributes, _)| attributes.encoded(default_encoder()));
        assert_eq!(collected[0].2, Aggregation::Sum(Number::I64(5)));
        assert_eq!(collected[1].2, Aggregation::Sum(Number::I64(1)));
        assert!(errors.lock().unwrap().is_empty());
    }

    #[test]
    fn values_are_converted_to_the_instrument_kind() {
        let (accumulator, processor, _) = setup();
        let counter = accumulator.new_instrument(Descriptor::new(
            "bytes",
            InstrumentKind::Counter,
            NumberKind::F64,
        ));

        counter.record_one(2_i64, &AttributeSet::empty());
        counter.record_one(0.5_f64, &AttributeSet::empty());
        assert_eq!(accumulator.collect(), 1);
        assert_eq!(processor.take()[0].2, Aggregation::Sum(Number::F64(2.5)));
    }

    #[test]
    fn invalid_measurements_are_reported() {
        let (accumulator, processor, errors) = setup();
        let histogram = accumulator.new_instrument(Descriptor::new(
            "latency",
            InstrumentKind::Histogram,
            NumberKind::F64,
        ));

        histogram.record_one(f64::NAN, &AttributeSet::empty());
        histogram.record_one(-1.0_f64, &AttributeSet::empty());
        histogram.record_one(f64::INFINITY, &AttributeSet::empty());

        assert_eq!(accumulator.collect(), 0);
        assert_eq!(accumulator.record_count(), 0);
        assert!(processor.take().is_empty());
        assert_eq!(
            *errors.lock().unwrap(),
            vec![MetricsError::NaNInput, MetricsError::NegativeInput, MetricsError::InfInput]
        );
    }

    #[test]
    fn bound_instruments_stay_resident() {
        let (accumulator, processor, _) = setup();
        let gauge = accumulator.new_instrument(Descriptor::new(
            "temperature",
            InstrumentKind::Gauge,
            NumberKind::F64,
        ));

        let bound = gauge.bind(&attrs("room"));
        bound.record(21.5_f64);
        assert_eq!(accumulator.collect(), 1);
        match &processor.take()[0].2 {
            Aggregation::LastValue(point) => assert_eq!(point.value, Number::F64(21.5)),
            other => panic!("unexpected aggregation: {:?}", other),
        }

        for _ in 0..3 {
            assert_eq!(accumulator.collect(), 0);
            assert_eq!(accumulator.record_count(), 1);
        }

        drop(bound);
        accumulator.collect();
        accumulator.collect();
        assert_eq!(accumulator.record_count(), 0);
    }

    #[test]
    fn late_update_mark_does_not_checkpoint_empty_state() {
        let (accumulator, processor, errors) = setup();
        let requests = accumulator.new_instrument(Descriptor::new(
            "requests",
            InstrumentKind::Counter,
            NumberKind::I64,
        ));
        let bound = requests.bind(&attrs("B"));

        bound.record(2_i64);
        assert_eq!(accumulator.collect(), 1);
        assert_eq!(processor.take()[0].2, Aggregation::Sum(Number::I64(2)));

        // A writer whose value was already taken by the previous pass marks the record afterwards.
        bound.record.as_ref().unwrap().mark_updated();
        assert_eq!(accumulator.collect(), 0);
        assert!(processor.take().is_empty());

        bound.record(3_i64);
        assert_eq!(accumulator.collect(), 1);
        assert_eq!(processor.take()[0].2, Aggregation::Sum(Number::I64(3)));
        assert!(errors.lock().unwrap().is_empty());
    }

    #[test]
    fn batch_recording() {
        let (accumulator, processor, _) = setup();
        let requests = accumulator.new_instrument(Descriptor::new(
            "requests",
            InstrumentKind::Counter,
            NumberKind::I64,
        ));
        let in_flight = accumulator.new_instrument(Descriptor::new(
            "in_flight",
            InstrumentKind::UpDownCounter,
            NumberKind::I64,
        ));

        accumulator.record_batch(
            &attrs("B"),
            &[requests.measurement(1_i64), in_flight.measurement(-2_i64), requests.measurement(4_i64)],
        );

        assert_eq!(accumulator.collect(), 2);
        let mut collected = processor.take();
        collected.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(collected[0].0, "in_flight");
        assert_eq!(collected[0].2, Aggregation::Sum(Number::I64(-2)));
        assert_eq!(collected[1].2, Aggregation::Sum(Number::I64(5)));
    }

    #[test]
    fn disabled_instruments_ignore_measurements() {
        struct Nothing;

        impl AggregatorSelector for Nothing {
            fn aggregator_for(&self, _: &Descriptor) -> Option<Box<dyn Aggregator>> {
                None
            }
        }

        let processor = Arc::new(Collected::default());
        let accumulator =
            AccumulatorBuilder::new(processor.clone()).with_selector(Arc::new(Nothing)).build();
        let counter = accumulator.new_instrument(Descriptor::new(
            "ignored",
            InstrumentKind::Counter,
            NumberKind::I64,
        ));

        assert!(!counter.is_enabled());
        counter.record_one(1_i64, &AttributeSet::empty());
        let bound = counter.bind(&AttributeSet::empty());
        bound.record(1_i64);
        assert!(bound.attributes().is_none());

        assert_eq!(accumulator.collect(), 0);
        assert_eq!(accumulator.record_count(), 0);
        assert!(processor.take().is_empty());
    }

    #[test]
    fn processor_errors_do_not_abort_collection() {
        struct Failing;

        impl Processor for Failing {
            fn process(&self, _: Accumulation<'_>) -> Result<(), MetricsError> {
                Err(MetricsError::Processor("unavailable".to_string()))
            }
        }

        let errors = Arc::new(Mutex::new(Vec::new()));
        let handler = {
            let errors = Arc::clone(&errors);
            move |err: MetricsError| errors.lock().unwrap().push(err)
        };
        let accumulator = AccumulatorBuilder::new(Arc::new(Failing))
            .with_error_handler(Arc::new(handler))
            .build();
        let counter = accumulator.new_instrument(Descriptor::new(
            "requests",
            InstrumentKind::Counter,
            NumberKind::I64,
        ));

        counter.record_one(1_i64, &attrs("B"));
        counter.record_one(1_i64, &attrs("C"));
        assert_eq!(accumulator.collect(), 2);
        assert_eq!(errors.lock().unwrap().len(), 2);
    }
}
