//! Value types shared by every layer of the metrics SDK.
//!
//! This crate holds the pieces that instrumentation code touches directly: [`AttributeSet`] and
//! its [`KeyValue`] members, the [`Encoder`] trait used to render attribute sets into strings,
//! instrument [`Descriptor`]s, and the [`Number`]/[`Numeric`] types that let aggregation code be
//! written once for both integer and floating-point instruments.
//!
//! # Attribute sets
//!
//! An [`AttributeSet`] is an immutable, sorted and deduplicated list of key/value pairs.  Two sets
//! built from the same pairs in any order are equal and hash identically, which makes them
//! suitable as map keys:
//!
//! ```rust
//! use metrics_api::{AttributeSet, KeyValue};
//!
//! let a = AttributeSet::new([KeyValue::new("service", "api"), KeyValue::new("region", "eu")]);
//! let b = AttributeSet::new([KeyValue::new("region", "eu"), KeyValue::new("service", "api")]);
//! assert_eq!(a, b);
//! ```
//!
//! Duplicate keys are collapsed, and the value given last wins.
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod common;
pub use self::common::*;

pub mod atomics;
pub use self::atomics::AtomicNumber;

mod attributes;
pub use self::attributes::{AttributeSet, Key, KeyValue, Value};

mod descriptor;
pub use self::descriptor::{Descriptor, InstrumentKind};

mod encoder;
pub use self::encoder::{default_encoder, DefaultEncoder, Encoder, EncoderId};

mod number;
pub use self::number::{Number, NumberKind, Numeric};
