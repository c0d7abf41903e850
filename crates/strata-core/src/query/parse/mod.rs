//! The textual predicate surface: grammar, surface AST, the schema-aware
//! builder, key-path aliasing, and serialisation back to text.

pub(crate) mod ast;
mod build;
mod describe;
mod keypath;

// re-exports
pub use build::{parse_include_path, parse_query, parse_query_mapped, ParsedStatement};
pub use keypath::KeyPathMapping;
pub(crate) use describe::describe_query;
