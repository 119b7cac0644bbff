//! An exporter that keeps exported values in memory, for tests and troubleshooting.
use std::sync::{Arc, Mutex, PoisonError};

use indexmap::IndexMap;
use metrics_api::{default_encoder, InstrumentKind, Unit};
use ordered_float::OrderedFloat;

use crate::{
    controller::Exporter,
    processor::{CheckpointSet, ExportRecord},
    Aggregation, MetricsError,
};

type Snapshot = Vec<(SnapshotKey, Option<Unit>, String, DebugValue)>;
type MetricMap = IndexMap<SnapshotKey, (Option<Unit>, String, DebugValue)>;

/// Identifies a metric in a snapshot: instrument name and kind plus the encoded attribute set.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SnapshotKey {
    /// Instrument name.
    pub name: String,
    /// Instrument kind.
    pub kind: InstrumentKind,
    /// Attribute set, encoded with the default encoder.
    pub attributes: Arc<str>,
}

impl SnapshotKey {
    fn from_record(record: &ExportRecord) -> Self {
        SnapshotKey {
            name: record.descriptor.name().to_string(),
            kind: record.descriptor.kind(),
            attributes: record.attributes.encoded(default_encoder()),
        }
    }
}

/// A point-in-time value for an exported metric.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DebugValue {
    /// Sum.
    Sum(OrderedFloat<f64>),
    /// Last value.
    LastValue(OrderedFloat<f64>),
    /// Histogram bucket counts, with the sum of all values.
    Histogram {
        /// Per-bucket counts.
        counts: Vec<u64>,
        /// Sum of recorded values.
        sum: OrderedFloat<f64>,
    },
    /// Raw recorded values, in ascending order.
    Points(Vec<OrderedFloat<f64>>),
    /// Sketch summary.
    Sketch {
        /// Number of recorded values.
        count: u64,
        /// Sum of recorded values.
        sum: OrderedFloat<f64>,
    },
    /// One value per member of a multi aggregator, `None` where a member had no data.
    Multiple(Vec<Option<DebugValue>>),
}

impl From<&Aggregation> for DebugValue {
    fn from(aggregation: &Aggregation) -> Self {
        match aggregation {
            Aggregation::Sum(n) => DebugValue::Sum(n.as_f64().into()),
            Aggregation::LastValue(point) => DebugValue::LastValue(point.value.as_f64().into()),
            Aggregation::Histogram(point) => DebugValue::Histogram {
                counts: point.counts.clone(),
                sum: point.sum.as_f64().into(),
            },
            Aggregation::Points(points) => {
                DebugValue::Points(points.values.iter().map(|n| n.as_f64().into()).collect())
            }
            Aggregation::Sketch(point) => {
                DebugValue::Sketch { count: point.count, sum: point.sum.into() }
            }
            Aggregation::Multiple(views) => {
                DebugValue::Multiple(views.iter().map(|v| v.as_ref().map(DebugValue::from)).collect())
            }
        }
    }
}

/// Captures point-in-time snapshots of `DebuggingExporter`.
#[derive(Clone)]
pub struct Snapshotter {
    metrics: Arc<Mutex<MetricMap>>,
}

impl Snapshotter {
    /// Takes a snapshot of the latest exported value of every metric, in the order each metric was
    /// first exported.
    pub fn snapshot(&self) -> Snapshot {
        let metrics = self.metrics.lock().unwrap_or_else(PoisonError::into_inner);
        metrics
            .iter()
            .map(|(key, (unit, description, value))| {
                (key.clone(), *unit, description.clone(), value.clone())
            })
            .collect()
    }

    /// Gets the latest exported value for the given instrument name and encoded attribute set.
    pub fn value(&self, name: &str, attributes: &str) -> Option<DebugValue> {
        let metrics = self.metrics.lock().unwrap_or_else(PoisonError::into_inner);
        metrics
            .iter()
            .find(|(key, _)| key.name == name && &*key.attributes == attributes)
            .map(|(_, (_, _, value))| value.clone())
    }
}

/// A simplistic exporter that can be used for debugging or testing.
///
/// Every export overwrites the stored value of each metric it contains.  Callers can take
/// snapshots of the stored values at any time.
pub struct DebuggingExporter {
    metrics: Arc<Mutex<MetricMap>>,
}

impl DebuggingExporter {
    /// Creates a new `DebuggingExporter`.
    pub fn new() -> DebuggingExporter {
        DebuggingExporter { metrics: Arc::new(Mutex::new(IndexMap::new())) }
    }

    /// Gets a `Snapshotter` attached to this exporter.
    pub fn snapshotter(&self) -> Snapshotter {
        Snapshotter { metrics: self.metrics.clone() }
    }
}

impl Default for DebuggingExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Exporter for DebuggingExporter {
    fn export(&self, checkpoint: &CheckpointSet) -> Result<(), MetricsError> {
        let mut metrics = self.metrics.lock().unwrap_or_else(PoisonError::into_inner);
        for record in checkpoint {
            let entry = (
                record.descriptor.unit(),
                record.descriptor.description().to_string(),
                DebugValue::from(&record.aggregation),
            );
            let _ = metrics.insert(SnapshotKey::from_record(record), entry);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use metrics_api::{AttributeSet, Descriptor, InstrumentKind, KeyValue, Number, NumberKind, Unit};

    use super::{DebugValue, DebuggingExporter};
    use crate::{
        controller::Exporter,
        processor::{CheckpointSet, ExportRecord},
        Aggregation, HistogramPoint,
    };

    fn record(name: &'static str, value: i64) -> ExportRecord {
        ExportRecord {
            descriptor: Descriptor::new(name, InstrumentKind::Counter, NumberKind::I64)
                .with_unit(Unit::Count)
                .with_description("requests served"),
            attributes: AttributeSet::new([KeyValue::new("A", "B")]),
            aggregation: Aggregation::Sum(Number::I64(value)),
        }
    }

    #[test]
    fn snapshots_keep_first_seen_order() {
        let exporter = DebuggingExporter::new();
        let snapshotter = exporter.snapshotter();
        assert!(snapshotter.snapshot().is_empty());

        exporter.export(&CheckpointSet::new(vec![record("b", 1), record("a", 2)])).unwrap();
        exporter.export(&CheckpointSet::new(vec![record("a", 3), record("b", 4)])).unwrap();

        let snapshot = snapshotter.snapshot();
        let names = snapshot.iter().map(|(key, ..)| key.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["b", "a"]);

        let (key, unit, description, value) = &snapshot[1];
        assert_eq!(&*key.attributes, "A=B");
        assert_eq!(*unit, Some(Unit::Count));
        assert_eq!(description, "requests served");
        assert_eq!(*value, DebugValue::Sum(3.0.into()));
        assert_eq!(snapshotter.value("b", "A=B"), Some(DebugValue::Sum(4.0.into())));
        assert_eq!(snapshotter.value("b", ""), None);
    }

    #[test]
    fn histogram_values() {
        let aggregation = Aggregation::Histogram(HistogramPoint {
            boundaries: vec![1.0],
            counts: vec![2, 1],
            sum: Number::F64(3.5),
            count: 3,
        });
        assert_eq!(
            DebugValue::from(&aggregation),
            DebugValue::Histogram { counts: vec![2, 1], sum: 3.5.into() }
        );
    }

    #[test]
    fn multiple_values() {
        let aggregation =
            Aggregation::Multiple(vec![Some(Aggregation::Sum(Number::I64(4))), None]);
        assert_eq!(
            DebugValue::from(&aggregation),
            DebugValue::Multiple(vec![Some(DebugValue::Sum(4.0.into())), None])
        );
    }
}
