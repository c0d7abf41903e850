//! ## Crate layout
//! - `core`: keys, values, the storage substrate, condition nodes, the
//!   expression engine, descriptor ordering, the predicate parser, and
//!   result views.
//!
//! The `prelude` module mirrors the vocabulary used by embedding code.

pub use strata_core as core;

//
// Common surface
//

pub use strata_core::error::Error;
pub use strata_core::query::{
    parse_query, parse_query_mapped, DescriptorOrdering, KeyPathMapping, ParsedStatement, Query,
    ResultView,
};
pub use strata_core::store::Store;

//
// Prelude
//

pub mod prelude {
    pub use strata_core::prelude::*;
}
