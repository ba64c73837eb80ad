//! On-demand data behind tables and views.
//!
//! Schema arrives with the initial snapshot; record data and per-view data do
//! not. Stores fetch them from the host when first retained and write the
//! result into the snapshot, so every read still goes through the dispatcher.

pub(crate) mod loadable;
mod record_store;
mod view_data_store;

pub use record_store::RecordStore;
pub use view_data_store::ViewDataStore;
