mod compare;
mod text;
mod timestamp;

#[cfg(test)]
mod tests;

use crate::key::{DataType, ObjKey};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

// re-exports
pub use timestamp::{Timestamp, TimestampError};
pub(crate) use compare::float_total_cmp;
pub(crate) use text::{
    bin_begins_with, bin_contains, bin_ends_with, bin_equal, bin_like, fold_ci, str_begins_with,
    str_contains, str_ends_with, str_equal, str_like,
};

///
/// TextMode
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TextMode {
    Cs, // case-sensitive
    Ci, // case-insensitive
}

///
/// Value
///
/// Tagged value over every storable kind. `Null` is a distinct value that
/// orders below all non-null values; NaN orders below every non-NaN
/// double/float and NaN-vs-NaN compares by raw bit pattern.
///

#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum Value {
    Null,
    Int(i64),
    Bool(bool),
    Float(f32),
    Double(f64),
    String(String),
    Binary(Vec<u8>),
    Timestamp(Timestamp),
    Link(ObjKey),
    /// Ordered list of values. List order is preserved.
    List(Vec<Self>),
}

impl Value {
    ///
    /// CONSTRUCTION
    ///

    /// Build a `Value::List` from owned items.
    ///
    /// This is the canonical constructor for query / argument boundaries.
    pub fn from_list<T>(items: Vec<T>) -> Self
    where
        T: Into<Self>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    ///
    /// TYPES
    ///

    /// Storage data type of this value, when it has one. `Null` and lists
    /// carry no scalar type of their own.
    #[must_use]
    pub const fn data_type(&self) -> Option<DataType> {
        match self {
            Self::Int(_) => Some(DataType::Int),
            Self::Bool(_) => Some(DataType::Bool),
            Self::Float(_) => Some(DataType::Float),
            Self::Double(_) => Some(DataType::Double),
            Self::String(_) => Some(DataType::String),
            Self::Binary(_) => Some(DataType::Binary),
            Self::Timestamp(_) => Some(DataType::Timestamp),
            Self::Link(_) => Some(DataType::Link),
            Self::Null | Self::List(_) => None,
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns true for the variants that participate in numeric
    /// comparison and aggregation.
    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_) | Self::Double(_))
    }

    ///
    /// CONVERSION
    ///

    #[must_use]
    pub const fn as_str(&self) -> Option<&str> {
        if let Self::String(s) = self {
            Some(s.as_str())
        } else {
            None
        }
    }

    #[must_use]
    pub const fn as_bytes(&self) -> Option<&[u8]> {
        if let Self::Binary(b) = self {
            Some(b.as_slice())
        } else {
            None
        }
    }

    #[must_use]
    pub const fn as_list(&self) -> Option<&[Self]> {
        if let Self::List(items) = self {
            Some(items.as_slice())
        } else {
            None
        }
    }

    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        if let Self::Int(v) = self {
            Some(*v)
        } else {
            None
        }
    }

    #[must_use]
    pub const fn as_link(&self) -> Option<ObjKey> {
        if let Self::Link(k) = self {
            Some(*k)
        } else {
            None
        }
    }

    /// Lossless-enough promotion used by cross-width numeric comparison.
    #[must_use]
    #[expect(clippy::cast_precision_loss)]
    pub(crate) fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v as f64),
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Coerce a literal toward a column data type.
    ///
    /// Only widening numeric moves and the 0/1-to-bool exception are
    /// allowed; anything else returns `None` and the caller reports a
    /// type mismatch.
    #[must_use]
    #[expect(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub(crate) fn coerce_to(&self, target: DataType) -> Option<Self> {
        match (self, target) {
            (Self::Null, _) => Some(Self::Null),
            (Self::Int(v), DataType::Int) => Some(Self::Int(*v)),
            (Self::Int(v), DataType::Float) => Some(Self::Float(*v as f32)),
            (Self::Int(v), DataType::Double) => Some(Self::Double(*v as f64)),
            // As a special exception 0 and 1 compare against bool columns.
            (Self::Int(0), DataType::Bool) => Some(Self::Bool(false)),
            (Self::Int(1), DataType::Bool) => Some(Self::Bool(true)),
            (Self::Double(v), DataType::Double) => Some(Self::Double(*v)),
            (Self::Double(v), DataType::Float) => Some(Self::Float(*v as f32)),
            (Self::Double(v), DataType::Int) if v.fract() == 0.0 => Some(Self::Int(*v as i64)),
            (Self::Float(v), DataType::Float) => Some(Self::Float(*v)),
            (Self::Float(v), DataType::Double) => Some(Self::Double(f64::from(*v))),
            (Self::Bool(v), DataType::Bool) => Some(Self::Bool(*v)),
            (Self::String(v), DataType::String) => Some(Self::String(v.clone())),
            (Self::Binary(v), DataType::Binary) => Some(Self::Binary(v.clone())),
            // A string literal compares against binary columns byte-wise.
            (Self::String(v), DataType::Binary) => Some(Self::Binary(v.clone().into_bytes())),
            (Self::Timestamp(v), DataType::Timestamp) => Some(Self::Timestamp(*v)),
            (Self::Link(k), DataType::Link) => Some(Self::Link(*k)),
            _ => None,
        }
    }

    ///
    /// COMPARISON
    ///

    /// Total canonical comparator used by sort, distinct and the
    /// expression engine. See module ordering rules.
    #[must_use]
    pub fn canonical_cmp(left: &Self, right: &Self) -> Ordering {
        compare::canonical_cmp(left, right)
    }

    /// Strict comparator for identical orderable variants.
    ///
    /// Returns `None` for mismatched or non-orderable variants.
    #[must_use]
    pub fn strict_order_cmp(left: &Self, right: &Self) -> Option<Ordering> {
        compare::strict_order_cmp(left, right)
    }
}

// Structural equality: same variant, floats by raw bits (so NaN equals
// NaN and needle sets stay well-defined).
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Double(a), Self::Double(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Binary(a), Self::Binary(b)) => a == b,
            (Self::Timestamp(a), Self::Timestamp(b)) => a == b,
            (Self::Link(a), Self::Link(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

// NOTE:
// Value::partial_cmp is NOT the canonical ordering for database semantics.
// Cross-variant comparisons intentionally do not participate here. Use
// canonical_cmp for sort, distinct and planning surfaces.
impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        compare::strict_order_cmp(self, other)
    }
}

macro_rules! impl_from_for {
    ( $( $type:ty => $variant:ident ),* $(,)? ) => {
        $(
            impl From<$type> for Value {
                fn from(v: $type) -> Self {
                    Self::$variant(v.into())
                }
            }
        )*
    };
}

impl_from_for! {
    bool      => Bool,
    i8        => Int,
    i16       => Int,
    i32       => Int,
    i64       => Int,
    f32       => Float,
    f64       => Double,
    &str      => String,
    String    => String,
    Vec<u8>   => Binary,
    Timestamp => Timestamp,
    ObjKey    => Link,
}

impl From<Vec<Self>> for Value {
    fn from(items: Vec<Self>) -> Self {
        Self::List(items)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}
