//! Core runtime for strata: keys, values, the in-memory clustered column
//! store, condition nodes, the expression engine, descriptor ordering, the
//! predicate parser, and the ergonomics exported via the `prelude`.

pub mod error;
pub mod key;
pub mod obs;
pub mod query;
pub mod store;
pub mod value;

///
/// CONSTANTS
///

/// Maximum number of rows held by one cluster.
///
/// This bound keeps leaf slices small enough for linear probing to stay
/// cache-friendly and gives object keys a stable cluster-offset encoding.
pub const CLUSTER_CAPACITY: usize = 256;

/// Maximum byte length of a stored string or binary value.
///
/// Values beyond this cap are rejected at the write and argument
/// boundaries with an out-of-range error.
pub const MAX_STRING_SIZE: usize = 0xFFF_FFF8;

///
/// Prelude
///
/// Prelude contains only domain vocabulary.
/// No errors, executors, stores, or helpers are re-exported here.
///

pub mod prelude {
    pub use crate::{
        key::{ColKey, DataType, ObjKey, TableKey},
        query::{DescriptorOrdering, Query, ResultView},
        value::{Timestamp, Value},
    };
}
