//! Aggregation, record lifecycle and collection for the metrics SDK.
//!
//! Measurements flow through three layers:
//!
//! - an [`Accumulator`] hands out [`Instrument`]s and folds every measurement into a per
//!   (instrument, attribute set) record held in a [`RecordStore`],
//! - each collection pass checkpoints the records that changed and passes them to a
//!   [`Processor`], which merges them into exportable state,
//! - an [`Exporter`] receives the resulting [`CheckpointSet`], usually on a fixed interval driven
//!   by a [`PushController`].
//!
//! # Record lifecycle
//!
//! Records are created on first use and removed once they sit unreferenced and unmodified for a
//! full collection pass.  Recording never waits on collection, and a record that is released while
//! a pass is detaching it is moved to a reclaim list so that its last update is still collected.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use metrics_api::{AttributeSet, Descriptor, InstrumentKind, KeyValue, NumberKind};
//! use metrics_sdk::{debugging::{DebugValue, DebuggingExporter}, PushControllerBuilder};
//!
//! let exporter = Arc::new(DebuggingExporter::new());
//! let snapshotter = exporter.snapshotter();
//! let controller = PushControllerBuilder::new(exporter).build();
//!
//! let requests = controller.accumulator().new_instrument(Descriptor::new(
//!     "requests",
//!     InstrumentKind::Counter,
//!     NumberKind::I64,
//! ));
//! let attributes = AttributeSet::new([KeyValue::new("method", "GET")]);
//! requests.record_one(3_i64, &attributes);
//!
//! controller.collect_now();
//! assert_eq!(snapshotter.value("requests", "method=GET"), Some(DebugValue::Sum(3.0.into())));
//! ```
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod accumulator;
pub use self::accumulator::{
    Accumulator, AccumulatorBuilder, BoundInstrument, Instrument, Measurement,
};

mod aggregation;
pub use self::aggregation::{Aggregation, HistogramPoint, LastValuePoint, Points, SketchPoint};

pub mod aggregator;

mod common;
pub use self::common::KeyHasher;

mod controller;
pub use self::controller::{Exporter, PushController, PushControllerBuilder};

pub mod debugging;

mod error;
pub use self::error::{ErrorHandler, LoggingErrorHandler, MetricsError};

pub mod processor;
pub use self::processor::{CheckpointSet, ExportRecord, Processor};

pub mod registry;
pub use self::registry::{CollectOutcome, RecordStore, DEFAULT_COLLECT_BATCH_SIZE};

mod selector;
pub use self::selector::{AggregatorSelector, Distribution, MultiSelector, SimpleSelector};
