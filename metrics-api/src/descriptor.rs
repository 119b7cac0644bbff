use crate::{NumberKind, SharedString, Unit};

/// The kind of instrument that produced a measurement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InstrumentKind {
    /// A monotonically increasing sum.
    Counter,
    /// A sum that can go up and down.
    UpDownCounter,
    /// A distribution of recorded values.
    Histogram,
    /// A point-in-time value where only the latest recording matters.
    Gauge,
}

impl InstrumentKind {
    /// Whether or not instruments of this kind reject negative values by default.
    pub fn is_monotonic(&self) -> bool {
        matches!(self, InstrumentKind::Counter | InstrumentKind::Histogram)
    }

    /// Gets the string form of this `InstrumentKind`.
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentKind::Counter => "counter",
            InstrumentKind::UpDownCounter => "up_down_counter",
            InstrumentKind::Histogram => "histogram",
            InstrumentKind::Gauge => "gauge",
        }
    }
}

/// Describes an instrument.
///
/// Descriptors are immutable once built.  The monotonic flag defaults to
/// [`InstrumentKind::is_monotonic`] and can be overridden with [`Descriptor::with_monotonic`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Descriptor {
    name: SharedString,
    kind: InstrumentKind,
    number_kind: NumberKind,
    unit: Option<Unit>,
    description: SharedString,
    monotonic: bool,
}

impl Descriptor {
    /// Creates a new `Descriptor`.
    pub fn new<N>(name: N, kind: InstrumentKind, number_kind: NumberKind) -> Self
    where
        N: Into<SharedString>,
    {
        Descriptor {
            name: name.into(),
            kind,
            number_kind,
            unit: None,
            description: SharedString::Borrowed(""),
            monotonic: kind.is_monotonic(),
        }
    }

    /// Sets the unit.
    #[must_use]
    pub fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description<D: Into<SharedString>>(mut self, description: D) -> Self {
        self.description = description.into();
        self
    }

    /// Overrides whether negative values are rejected.
    #[must_use]
    pub fn with_monotonic(mut self, monotonic: bool) -> Self {
        self.monotonic = monotonic;
        self
    }

    /// Name of the instrument.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kind of the instrument.
    pub fn kind(&self) -> InstrumentKind {
        self.kind
    }

    /// Numeric type recorded by the instrument.
    pub fn number_kind(&self) -> NumberKind {
        self.number_kind
    }

    /// Unit of the instrument, if any.
    pub fn unit(&self) -> Option<Unit> {
        self.unit
    }

    /// Description of the instrument.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Whether or not negative values are rejected.
    pub fn is_monotonic(&self) -> bool {
        self.monotonic
    }
}

#[cfg(test)]
mod tests {
    use super::{Descriptor, InstrumentKind};
    use crate::{NumberKind, Unit};

    #[test]
    fn monotonic_follows_kind_unless_overridden() {
        let counter = Descriptor::new("requests", InstrumentKind::Counter, NumberKind::I64);
        assert!(counter.is_monotonic());

        let gauge = Descriptor::new("temperature", InstrumentKind::Gauge, NumberKind::F64)
            .with_unit(Unit::Count)
            .with_description("current temperature");
        assert!(!gauge.is_monotonic());
        assert_eq!(gauge.description(), "current temperature");
        assert_eq!(gauge.unit(), Some(Unit::Count));

        let histogram = Descriptor::new("latency", InstrumentKind::Histogram, NumberKind::F64);
        assert!(histogram.is_monotonic());

        let offset = Descriptor::new("offset", InstrumentKind::Histogram, NumberKind::F64)
            .with_monotonic(false);
        assert!(!offset.is_monotonic());
        assert!(!InstrumentKind::UpDownCounter.is_monotonic());
    }
}
