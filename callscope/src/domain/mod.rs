//! Domain model for the analyzer: core types and structured errors.

pub mod errors;
pub mod types;

pub use errors::AnalyzeError;
pub use types::{AddrInfo, SortMode};
