//! Input boundary schema
//!
//! Record types supplied by the metric, lab and intervention stores, their
//! validation, and the daily aggregation every engine consumes.

mod adapter;
mod input;

pub use adapter::*;
pub use input::*;
