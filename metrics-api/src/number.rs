use std::{
    fmt,
    ops::{Add, Sub},
    sync::atomic::Ordering,
};

use crate::atomics::AtomicU64;

/// The numeric type an instrument records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NumberKind {
    /// Signed 64-bit integers.
    I64,
    /// 64-bit floating-point numbers.
    F64,
}

impl NumberKind {
    /// Gets the string form of this `NumberKind`.
    pub fn as_str(&self) -> &'static str {
        match self {
            NumberKind::I64 => "i64",
            NumberKind::F64 => "f64",
        }
    }
}

/// A measured value, tagged with its numeric type.
///
/// `Number` is what crosses the dynamic boundary between instruments and aggregators.  Inside an
/// aggregator, values are handled through the statically-typed [`Numeric`] trait instead.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub enum Number {
    /// An integer value.
    I64(i64),
    /// A floating-point value.
    F64(f64),
}

impl Number {
    /// The zero value for the given kind.
    pub fn zero(kind: NumberKind) -> Number {
        match kind {
            NumberKind::I64 => Number::I64(0),
            NumberKind::F64 => Number::F64(0.0),
        }
    }

    /// Gets the kind of this number.
    pub fn kind(&self) -> NumberKind {
        match self {
            Number::I64(_) => NumberKind::I64,
            Number::F64(_) => NumberKind::F64,
        }
    }

    /// Converts this number to a floating-point value.
    pub fn as_f64(&self) -> f64 {
        match *self {
            Number::I64(v) => v as f64,
            Number::F64(v) => v,
        }
    }

    /// Converts this number to an integer value, truncating any fractional part.
    pub fn as_i64(&self) -> i64 {
        match *self {
            Number::I64(v) => v,
            Number::F64(v) => v as i64,
        }
    }

    /// Whether or not this number is NaN.
    pub fn is_nan(&self) -> bool {
        matches!(self, Number::F64(v) if v.is_nan())
    }

    /// Whether or not this number is positive or negative infinity.
    pub fn is_infinite(&self) -> bool {
        matches!(self, Number::F64(v) if v.is_infinite())
    }

    /// Whether or not this number is strictly less than zero.
    pub fn is_negative(&self) -> bool {
        match *self {
            Number::I64(v) => v < 0,
            Number::F64(v) => v < 0.0,
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::I64(v) => v.fmt(f),
            Number::F64(v) => v.fmt(f),
        }
    }
}

impl From<i64> for Number {
    fn from(v: i64) -> Self {
        Number::I64(v)
    }
}

impl From<f64> for Number {
    fn from(v: f64) -> Self {
        Number::F64(v)
    }
}

/// A primitive numeric type that aggregators can be generic over.
///
/// Implemented for `i64` and `f64`.  Values are stored in 64-bit atomics by way of their bit
/// representation, so every implementation must round-trip exactly through [`Numeric::to_bits`]
/// and [`Numeric::from_bits`].
pub trait Numeric:
    Copy
    + Default
    + PartialOrd
    + Add<Output = Self>
    + Sub<Output = Self>
    + fmt::Debug
    + fmt::Display
    + Send
    + Sync
    + 'static
{
    /// The kind tag for this type.
    const KIND: NumberKind;

    /// The additive identity.
    fn zero() -> Self;

    /// Converts a tagged [`Number`] into this type, converting between kinds if necessary.
    fn from_number(number: Number) -> Self;

    /// Wraps this value into a tagged [`Number`].
    fn into_number(self) -> Number;

    /// Converts this value to a floating-point value.
    fn as_f64(self) -> f64;

    /// Gets the raw bit representation of this value.
    fn to_bits(self) -> u64;

    /// Rebuilds a value from its raw bit representation.
    fn from_bits(bits: u64) -> Self;

    /// Adds `other` to this value, wrapping around at the bounds of the type instead of
    /// overflowing.
    ///
    /// Matches what [`Numeric::fetch_add`] does to an atomic cell.
    fn wrapping_add(self, other: Self) -> Self;

    /// Subtracts `other` from this value, wrapping around at the bounds of the type.
    fn wrapping_sub(self, other: Self) -> Self;

    /// Atomically adds `value` to the number stored in `cell`.
    fn fetch_add(cell: &AtomicU64, value: Self);

    /// Atomically subtracts `value` from the number stored in `cell`.
    fn fetch_sub(cell: &AtomicU64, value: Self);
}

impl Numeric for i64 {
    const KIND: NumberKind = NumberKind::I64;

    fn zero() -> Self {
        0
    }

    fn from_number(number: Number) -> Self {
        number.as_i64()
    }

    fn into_number(self) -> Number {
        Number::I64(self)
    }

    fn as_f64(self) -> f64 {
        self as f64
    }

    fn to_bits(self) -> u64 {
        self as u64
    }

    fn from_bits(bits: u64) -> Self {
        bits as i64
    }

    fn wrapping_add(self, other: Self) -> Self {
        i64::wrapping_add(self, other)
    }

    fn wrapping_sub(self, other: Self) -> Self {
        i64::wrapping_sub(self, other)
    }

    fn fetch_add(cell: &AtomicU64, value: Self) {
        // Two's complement makes wrapping unsigned addition identical to signed addition.
        let _ = cell.fetch_add(value as u64, Ordering::AcqRel);
    }

    fn fetch_sub(cell: &AtomicU64, value: Self) {
        let _ = cell.fetch_sub(value as u64, Ordering::AcqRel);
    }
}

impl Numeric for f64 {
    const KIND: NumberKind = NumberKind::F64;

    fn zero() -> Self {
        0.0
    }

    fn from_number(number: Number) -> Self {
        number.as_f64()
    }

    fn into_number(self) -> Number {
        Number::F64(self)
    }

    fn as_f64(self) -> f64 {
        self
    }

    fn to_bits(self) -> u64 {
        f64::to_bits(self)
    }

    fn from_bits(bits: u64) -> Self {
        f64::from_bits(bits)
    }

    fn wrapping_add(self, other: Self) -> Self {
        self + other
    }

    fn wrapping_sub(self, other: Self) -> Self {
        self - other
    }

    fn fetch_add(cell: &AtomicU64, value: Self) {
        loop {
            let result = cell.fetch_update(Ordering::AcqRel, Ordering::Relaxed, |curr| {
                let input = f64::from_bits(curr);
                let output = input + value;
                Some(output.to_bits())
            });

            if result.is_ok() {
                break;
            }
        }
    }

    fn fetch_sub(cell: &AtomicU64, value: Self) {
        Self::fetch_add(cell, -value);
    }
}
