//! basemirror-util - ordering helpers shared by the basemirror crates.
//!
//! - [`sort`]: insertion sort and binary insertion for slices that are
//!   already (nearly) sorted, which is the common case when a live ordering
//!   only moves a handful of entries per update.
//! - [`value_order`]: a total order over `serde_json::Value`s.

pub mod sort;
pub mod value_order;

pub use sort::{insertion_sort_by, insert_sorted_by, is_sorted_by, sorted_position_by};
pub use value_order::{compare_optional_values, compare_values};
