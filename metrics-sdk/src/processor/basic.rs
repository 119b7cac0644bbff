use indexmap::IndexMap;
use metrics_api::{AttributeSet, Descriptor};
use parking_lot::Mutex;
use tracing::warn;

use super::{Accumulation, CheckpointSet, ExportRecord, Processor};
use crate::{aggregator::Aggregator, registry::InstrumentId, MetricsError};

struct Entry {
    descriptor: Descriptor,
    attributes: AttributeSet,
    aggregator: Box<dyn Aggregator>,
}

/// A processor that merges accumulations per instrument and attribute set.
///
/// A stateful processor reports cumulative values: every metric seen so far appears in each
/// checkpoint, carrying everything recorded since it was first seen.  A stateless processor
/// reports deltas: each checkpoint only holds what was accumulated since the previous checkpoint.
pub struct BasicProcessor {
    stateful: bool,
    entries: Mutex<IndexMap<(InstrumentId, AttributeSet), Entry>>,
}

impl BasicProcessor {
    /// Creates a new `BasicProcessor`.
    pub fn new(stateful: bool) -> Self {
        BasicProcessor { stateful, entries: Mutex::new(IndexMap::new()) }
    }

    /// Whether or not this processor reports cumulative values.
    pub fn is_stateful(&self) -> bool {
        self.stateful
    }

    /// Builds the set of metrics to export.
    ///
    /// Metrics without data are skipped.  When stateless, the processor is reset afterwards.
    pub fn checkpoint(&self) -> CheckpointSet {
        let mut entries = self.entries.lock();

        let mut records = Vec::with_capacity(entries.len());
        for entry in entries.values() {
            match entry.aggregator.aggregation() {
                Ok(aggregation) => records.push(ExportRecord {
                    descriptor: entry.descriptor.clone(),
                    attributes: entry.attributes.clone(),
                    aggregation,
                }),
                Err(MetricsError::NoData) => {}
                Err(e) => {
                    warn!(metric = entry.descriptor.name(), error = %e, "Failed to read aggregation.");
                }
            }
        }

        if !self.stateful {
            entries.clear();
        }

        CheckpointSet::new(records)
    }
}

impl Processor for BasicProcessor {
    fn process(&self, accumulation: Accumulation<'_>) -> Result<(), MetricsError> {
        let mut entries = self.entries.lock();
        let key = (accumulation.instrument, accumulation.attributes.clone());
        let entry = entries.entry(key).or_insert_with(|| Entry {
            descriptor: accumulation.descriptor.clone(),
            attributes: accumulation.attributes.clone(),
            aggregator: accumulation.aggregator.new_empty(),
        });
        entry.aggregator.merge(accumulation.aggregator)
    }
}
