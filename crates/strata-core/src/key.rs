use derive_more::Display;
use serde::{Deserialize, Serialize};

///
/// Keys
///
/// Opaque, stable identifiers for tables, objects and columns. Keys carry
/// no schema knowledge beyond what is packed into them; all interpretation
/// happens in `store` and `query`.
///

///
/// TableKey
///

#[derive(
    Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize,
)]
#[display("table({_0})")]
pub struct TableKey(pub(crate) u32);

impl TableKey {
    #[must_use]
    pub(crate) const fn as_index(self) -> usize {
        self.0 as usize
    }
}

///
/// ObjKey
///
/// Signed 63-bit object identifier. The value is the object's absolute key;
/// the high bits carry the owning cluster's base offset so that a key can
/// be split into (cluster, local key) without a table lookup.
///
/// The default key is the null key and refers to no object.
///

#[derive(
    Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize,
)]
#[display("O{_0}")]
pub struct ObjKey(pub i64);

impl ObjKey {
    pub(crate) const NULL_VALUE: i64 = -1;

    #[must_use]
    pub const fn null() -> Self {
        Self(Self::NULL_VALUE)
    }

    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 < 0
    }

    /// Base key of the cluster this key belongs to.
    #[must_use]
    pub(crate) const fn cluster_offset(self) -> i64 {
        self.0 & !(crate::CLUSTER_CAPACITY as i64 - 1)
    }

    /// Key relative to its cluster base.
    #[must_use]
    pub(crate) const fn local_to_cluster(self) -> i64 {
        self.0 & (crate::CLUSTER_CAPACITY as i64 - 1)
    }
}

impl Default for ObjKey {
    fn default() -> Self {
        Self::null()
    }
}

///
/// DataType
///

#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq, Deserialize, Serialize)]
pub enum DataType {
    #[display("int")]
    Int,
    #[display("bool")]
    Bool,
    #[display("float")]
    Float,
    #[display("double")]
    Double,
    #[display("string")]
    String,
    #[display("binary")]
    Binary,
    #[display("timestamp")]
    Timestamp,
    #[display("link")]
    Link,
    #[display("backlink")]
    Backlink,
}

impl DataType {
    const fn tag(self) -> u64 {
        match self {
            Self::Int => 0,
            Self::Bool => 1,
            Self::Float => 2,
            Self::Double => 3,
            Self::String => 4,
            Self::Binary => 5,
            Self::Timestamp => 6,
            Self::Link => 7,
            Self::Backlink => 8,
        }
    }

    const fn from_tag(tag: u64) -> Self {
        match tag {
            0 => Self::Int,
            1 => Self::Bool,
            2 => Self::Float,
            3 => Self::Double,
            4 => Self::String,
            5 => Self::Binary,
            6 => Self::Timestamp,
            7 => Self::Link,
            _ => Self::Backlink,
        }
    }

    /// Returns true for link-valued columns, forward or inverse.
    #[must_use]
    pub const fn is_link(self) -> bool {
        matches!(self, Self::Link | Self::Backlink)
    }
}

///
/// ColAttrs
///
/// Column attribute bitmask packed into `ColKey`.
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct ColAttrs(u8);

impl ColAttrs {
    pub const NULLABLE: Self = Self(0x01);
    pub const LIST: Self = Self(0x02);
    pub const INDEXED: Self = Self(0x04);
    pub const ENUM_STRINGS: Self = Self(0x08);
    pub const STRONG_LINKS: Self = Self(0x10);

    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    const fn bits(self) -> u8 {
        self.0
    }

    const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }
}

///
/// ColKey
///
/// Packed column identifier: column index in the low 32 bits, the data
/// type tag above it, then the attribute bitmask. The packing is an
/// implementation detail; only accessors below read it.
///

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
pub struct ColKey(u64);

const COL_TYPE_SHIFT: u64 = 32;
const COL_ATTR_SHIFT: u64 = 40;

impl ColKey {
    #[must_use]
    pub(crate) const fn new(index: usize, data_type: DataType, attrs: ColAttrs) -> Self {
        Self(
            (index as u64)
                | (data_type.tag() << COL_TYPE_SHIFT)
                | ((attrs.bits() as u64) << COL_ATTR_SHIFT),
        )
    }

    #[must_use]
    pub(crate) const fn index(self) -> usize {
        (self.0 & 0xFFFF_FFFF) as usize
    }

    #[must_use]
    pub const fn data_type(self) -> DataType {
        DataType::from_tag((self.0 >> COL_TYPE_SHIFT) & 0xFF)
    }

    #[must_use]
    pub const fn attrs(self) -> ColAttrs {
        ColAttrs::from_bits(((self.0 >> COL_ATTR_SHIFT) & 0xFF) as u8)
    }

    #[must_use]
    pub const fn is_nullable(self) -> bool {
        self.attrs().contains(ColAttrs::NULLABLE)
    }

    #[must_use]
    pub const fn is_list(self) -> bool {
        self.attrs().contains(ColAttrs::LIST)
    }

    #[must_use]
    pub const fn is_indexed(self) -> bool {
        self.attrs().contains(ColAttrs::INDEXED)
    }

    #[must_use]
    pub const fn is_enum_strings(self) -> bool {
        self.attrs().contains(ColAttrs::ENUM_STRINGS)
    }

    /// Whether the column yields at most one target per row.
    #[must_use]
    pub const fn is_unary_link(self) -> bool {
        matches!(self.data_type(), DataType::Link) && !self.is_list()
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::{ColAttrs, ColKey, DataType, ObjKey};

    #[test]
    fn col_key_round_trips_index_type_and_attrs() {
        let attrs = ColAttrs::NULLABLE.with(ColAttrs::INDEXED);
        let key = ColKey::new(7, DataType::String, attrs);

        assert_eq!(key.index(), 7);
        assert_eq!(key.data_type(), DataType::String);
        assert!(key.is_nullable());
        assert!(key.is_indexed());
        assert!(!key.is_list());
        assert!(!key.is_enum_strings());
    }

    #[test]
    fn obj_key_splits_into_cluster_offset_and_local_key() {
        let cap = crate::CLUSTER_CAPACITY as i64;
        let key = ObjKey(cap * 3 + 17);

        assert_eq!(key.cluster_offset(), cap * 3);
        assert_eq!(key.local_to_cluster(), 17);
    }

    #[test]
    fn default_obj_key_is_null() {
        assert!(ObjKey::default().is_null());
        assert!(!ObjKey(0).is_null());
    }
}
