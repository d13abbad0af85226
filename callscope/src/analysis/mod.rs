//! Analysis logic: joining the parsed dump with symbol data, the id-based
//! binary searches, and the overhead-subtraction step.
//!
//! Pure data transformations, separated from report rendering.

pub mod adjust;
pub mod join;

pub use adjust::apply_adjustment;
pub use join::{Dataset, Job, Trace};
