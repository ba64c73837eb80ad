//! Derived, pooled query results over tables and views.
//!
//! `select` never loads anything. It normalizes the options, then returns the
//! pooled result for that fingerprint or creates an unloaded one. Loading is
//! reference counted on the result.

pub mod options;
pub(crate) mod record_query;
pub(crate) mod view_metadata;
mod vis_list;

pub use options::{
    FieldRef, NormalizedColorMode, NormalizedQueryOptions, NormalizedSort, RecordColorMode,
    RecordQueryOptions, SortDirection, SortSpec, ViewRef,
};
pub use record_query::RecordQueryResult;
pub use view_metadata::ViewMetadataQueryResult;
