//! Query compilation.
//!
//! - **`parser`**: user query string → `QuerySpec`.
//! - **`compiler`**: `QuerySpec` → backend `SearchRequest`, plus the fixed
//!   aggregation requests used by the tag cache and the dashboards.
//! - **`dsl`**: the typed request shapes both of them produce.

pub mod compiler;
pub mod dsl;
pub mod parser;

pub use compiler::{compile, compile_file_highlight, compile_stats, compile_tree, HighlightMode, MatchStrategy};
pub use dsl::{Clause, SearchRequest};
pub use parser::parse_query;
