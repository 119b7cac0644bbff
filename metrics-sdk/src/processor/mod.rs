//! Processors receive checkpointed aggregators from an accumulator and prepare them for export.
use metrics_api::{AttributeSet, Descriptor};

use crate::{aggregator::Aggregator, registry::InstrumentId, Aggregation, MetricsError};

mod basic;
pub use self::basic::BasicProcessor;

/// A single checkpointed aggregator handed to a [`Processor`].
///
/// The aggregator holds the changes recorded since the record was last collected.  It is only
/// valid for the duration of the call to [`Processor::process`].
#[derive(Clone, Copy, Debug)]
pub struct Accumulation<'a> {
    /// Instrument that recorded the changes.
    pub instrument: InstrumentId,
    /// Descriptor of the instrument.
    pub descriptor: &'a Descriptor,
    /// Attribute set the changes were recorded against.
    pub attributes: &'a AttributeSet,
    /// The checkpointed state.
    pub aggregator: &'a dyn Aggregator,
}

/// Consumes accumulations produced by a collection pass.
pub trait Processor: Send + Sync {
    /// Processes a single accumulation.
    fn process(&self, accumulation: Accumulation<'_>) -> Result<(), MetricsError>;
}

/// An exportable metric: one instrument and attribute set with its aggregated value.
#[derive(Clone, Debug, PartialEq)]
pub struct ExportRecord {
    /// Descriptor of the instrument.
    pub descriptor: Descriptor,
    /// Attribute set of the metric.
    pub attributes: AttributeSet,
    /// Aggregated value.
    pub aggregation: Aggregation,
}

/// The set of metrics produced by a single checkpoint.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CheckpointSet {
    records: Vec<ExportRecord>,
}

impl CheckpointSet {
    /// Creates a new `CheckpointSet`.
    pub fn new(records: Vec<ExportRecord>) -> Self {
        CheckpointSet { records }
    }

    /// Number of metrics in the set.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether or not the set is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterates over the metrics in the set, in the order they were first seen.
    pub fn iter(&self) -> std::slice::Iter<'_, ExportRecord> {
        self.records.iter()
    }

    /// Finds the metric for the given instrument name and attribute set.
    pub fn get(&self, name: &str, attributes: &AttributeSet) -> Option<&ExportRecord> {
        self.records
            .iter()
            .find(|record| record.descriptor.name() == name && &record.attributes == attributes)
    }
}

impl IntoIterator for CheckpointSet {
    type Item = ExportRecord;
    type IntoIter = std::vec::IntoIter<ExportRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a> IntoIterator for &'a CheckpointSet {
    type Item = &'a ExportRecord;
    type IntoIter = std::slice::Iter<'a, ExportRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
