use std::sync::Arc;

use metrics_api::{Descriptor, InstrumentKind, NumberKind};
use quanta::Clock;

use crate::aggregator::{
    Aggregator, Exact, Histogram, LastValue, Methods, Multi, Sketch, SketchConfig,
    StateAggregator, Sum, DEFAULT_BOUNDARIES,
};

/// Chooses the aggregation for each instrument.
pub trait AggregatorSelector: Send + Sync {
    /// Creates an aggregator for the given instrument.
    ///
    /// Returning `None` disables the instrument: its measurements are dropped and it is never
    /// collected.
    fn aggregator_for(&self, descriptor: &Descriptor) -> Option<Box<dyn Aggregator>>;
}

/// How [`SimpleSelector`] aggregates histogram instruments.
#[derive(Clone, Debug)]
pub enum Distribution {
    /// Count values into buckets with the given boundaries.
    Histogram(Arc<[f64]>),
    /// Keep every value, for exact quantiles.
    Exact,
    /// Estimate quantiles with a relative-error sketch.
    Sketch(SketchConfig),
}

/// A selector that picks one aggregation per instrument kind.
///
/// Counters and up-down counters are summed, gauges keep their last value, and histograms use the
/// configured [`Distribution`], which defaults to a histogram with [`DEFAULT_BOUNDARIES`].
#[derive(Clone)]
pub struct SimpleSelector {
    distribution: Distribution,
    clock: Clock,
}

impl SimpleSelector {
    /// Creates a new `SimpleSelector` with the default histogram boundaries.
    pub fn new() -> Self {
        SimpleSelector {
            distribution: Distribution::Histogram(Arc::from(DEFAULT_BOUNDARIES)),
            clock: Clock::new(),
        }
    }

    /// Uses a histogram with the given boundaries for histogram instruments.
    ///
    /// Boundaries are sorted and deduplicated; non-finite boundaries are dropped.
    #[must_use]
    pub fn with_histogram(mut self, boundaries: &[f64]) -> Self {
        let mut boundaries =
            boundaries.iter().copied().filter(|b| b.is_finite()).collect::<Vec<_>>();
        boundaries.sort_by(f64::total_cmp);
        boundaries.dedup();
        self.distribution = Distribution::Histogram(Arc::from(boundaries));
        self
    }

    /// Keeps every value of histogram instruments, for exact quantiles.
    #[must_use]
    pub fn with_exact(mut self) -> Self {
        self.distribution = Distribution::Exact;
        self
    }

    /// Uses a quantile sketch for histogram instruments.
    #[must_use]
    pub fn with_sketch(mut self, config: SketchConfig) -> Self {
        self.distribution = Distribution::Sketch(config);
        self
    }

    /// Sets the clock used to timestamp last values.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Gets the configured distribution.
    pub fn distribution(&self) -> &Distribution {
        &self.distribution
    }
}

impl Default for SimpleSelector {
    fn default() -> Self {
        Self::new()
    }
}

fn build<M, C>(kind: NumberKind, config: C) -> Box<dyn Aggregator>
where
    M: Methods<i64, Config = C> + Methods<f64, Config = C>,
{
    match kind {
        NumberKind::I64 => Box::new(StateAggregator::<M, i64>::new(config)),
        NumberKind::F64 => Box::new(StateAggregator::<M, f64>::new(config)),
    }
}

impl AggregatorSelector for SimpleSelector {
    fn aggregator_for(&self, descriptor: &Descriptor) -> Option<Box<dyn Aggregator>> {
        let kind = descriptor.number_kind();
        let aggregator = match descriptor.kind() {
            InstrumentKind::Counter | InstrumentKind::UpDownCounter => build::<Sum, _>(kind, ()),
            InstrumentKind::Gauge => build::<LastValue, _>(kind, self.clock.clone()),
            InstrumentKind::Histogram => match &self.distribution {
                Distribution::Histogram(boundaries) => {
                    build::<Histogram, _>(kind, Arc::clone(boundaries))
                }
                Distribution::Exact => build::<Exact, _>(kind, ()),
                Distribution::Sketch(config) => build::<Sketch, _>(kind, config.clone()),
            },
        };
        Some(aggregator)
    }
}

/// A selector that aggregates each instrument with every one of several selectors.
///
/// Selectors that disable an instrument are skipped.  When exactly one selector enables an
/// instrument its aggregator is used directly, and when several do they are combined into a
/// [`Multi`], in selector order.
#[derive(Clone, Default)]
pub struct MultiSelector {
    selectors: Vec<Arc<dyn AggregatorSelector>>,
}

impl MultiSelector {
    /// Creates a new, empty `MultiSelector`, which disables every instrument.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a selector.
    #[must_use]
    pub fn with_selector(mut self, selector: Arc<dyn AggregatorSelector>) -> Self {
        self.selectors.push(selector);
        self
    }
}

impl AggregatorSelector for MultiSelector {
    fn aggregator_for(&self, descriptor: &Descriptor) -> Option<Box<dyn Aggregator>> {
        let mut members = self
            .selectors
            .iter()
            .filter_map(|selector| selector.aggregator_for(descriptor))
            .collect::<Vec<_>>();
        match members.len() {
            0 => None,
            1 => members.pop(),
            _ => Some(Box::new(Multi::new(descriptor.number_kind(), members))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use metrics_api::{Descriptor, InstrumentKind, Number, NumberKind};

    use super::{AggregatorSelector, Distribution, MultiSelector, SimpleSelector};
    use crate::{aggregator::SketchConfig, Aggregation};

    fn descriptor(kind: InstrumentKind, number_kind: NumberKind) -> Descriptor {
        Descriptor::new("test", kind, number_kind)
    }

    #[test]
    fn aggregation_per_kind() {
        let selector = SimpleSelector::new();
        let cases = [
            (InstrumentKind::Counter, "sum"),
            (InstrumentKind::UpDownCounter, "sum"),
            (InstrumentKind::Gauge, "last_value"),
            (InstrumentKind::Histogram, "histogram"),
        ];

        for (kind, name) in cases {
            for number_kind in [NumberKind::I64, NumberKind::F64] {
                let aggregator = selector.aggregator_for(&descriptor(kind, number_kind)).unwrap();
                assert_eq!(aggregator.name(), name);
                assert_eq!(aggregator.number_kind(), number_kind);
            }
        }

        let histogram = descriptor(InstrumentKind::Histogram, NumberKind::F64);
        let exact = SimpleSelector::new().with_exact();
        assert_eq!(exact.aggregator_for(&histogram).unwrap().name(), "exact");
        let sketch = SimpleSelector::new().with_sketch(SketchConfig::default());
        assert_eq!(sketch.aggregator_for(&histogram).unwrap().name(), "sketch");
    }

    #[test]
    fn histogram_boundaries_are_normalized() {
        let selector = SimpleSelector::new().with_histogram(&[10.0, f64::NAN, 1.0, 10.0, 5.0]);
        let Distribution::Histogram(boundaries) = selector.distribution() else {
            panic!("expected histogram distribution");
        };
        assert_eq!(&boundaries[..], &[1.0, 5.0, 10.0]);

        let aggregator = selector
            .aggregator_for(&descriptor(InstrumentKind::Histogram, NumberKind::I64))
            .unwrap();
        aggregator.update(Number::I64(7));
        match aggregator.aggregation() {
            Ok(Aggregation::Histogram(point)) => assert_eq!(point.counts, vec![0, 0, 1, 0]),
            other => panic!("unexpected aggregation: {:?}", other),
        }
    }

    #[test]
    fn multi_selector_combines_enabled_selectors() {
        struct Disabled;

        impl AggregatorSelector for Disabled {
            fn aggregator_for(&self, _: &Descriptor) -> Option<Box<dyn crate::aggregator::Aggregator>> {
                None
            }
        }

        let histogram = descriptor(InstrumentKind::Histogram, NumberKind::F64);
        assert!(MultiSelector::new().aggregator_for(&histogram).is_none());

        let single = MultiSelector::new()
            .with_selector(Arc::new(Disabled))
            .with_selector(Arc::new(SimpleSelector::new().with_exact()));
        assert_eq!(single.aggregator_for(&histogram).unwrap().name(), "exact");

        let both = single.with_selector(Arc::new(SimpleSelector::new().with_histogram(&[1.0])));
        let aggregator = both.aggregator_for(&histogram).unwrap();
        assert_eq!(aggregator.name(), "multi");
        assert_eq!(aggregator.number_kind(), NumberKind::F64);

        aggregator.update(Number::F64(2.0));
        let Ok(Aggregation::Multiple(views)) = aggregator.aggregation() else {
            panic!("expected multiple aggregations");
        };
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].as_ref().map(Aggregation::kind), Some("exact"));
        assert_eq!(views[1].as_ref().map(Aggregation::kind), Some("histogram"));
    }
}
