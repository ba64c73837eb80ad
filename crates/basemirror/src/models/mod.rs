//! Model nodes: long-lived, identity-stable wrappers over snapshot paths.
//!
//! A node is created lazily the first time it is looked up and cached by its
//! parent. It never owns data; every accessor reads through to the snapshot,
//! and once its path disappears the node is inert (`is_deleted()`), its
//! parent evicts it, and data getters return [`Error::Deleted`].

mod base;
mod field;
mod record;
mod session;
mod table;
mod view;

use std::rc::Rc;

use serde_json::{Map, Value};

use crate::core::BaseCore;
use crate::error::{Error, Result};
use crate::watchable::Watchable;

pub use base::{Base, BaseBuilder, Collaborator};
pub use field::Field;
pub use record::Record;
pub use session::Session;
pub use table::{RecordUpdate, Table};
pub use view::View;

pub(crate) trait ModelNode: Watchable {
    fn core(&self) -> &Rc<BaseCore>;
    fn node_id(&self) -> &str;
    fn data_path(&self) -> &[String];

    fn node_deleted(&self) -> bool {
        !self.core().dispatcher.exists(self.data_path())
    }

    /// Run `f` over this node's backing object.
    fn with_data<R>(&self, f: impl FnOnce(&Map<String, Value>) -> R) -> Result<R> {
        let core = self.core();
        core.dispatcher.with_value(self.data_path(), |value| {
            match value.and_then(Value::as_object) {
                Some(obj) => Ok(f(obj)),
                None => Err(Error::deleted(Self::KIND, self.node_id())),
            }
        })
    }

    fn string_prop(&self, key: &str) -> Result<String> {
        self.with_data(|obj| {
            obj.get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        })
    }

    fn optional_string_prop(&self, key: &str) -> Result<Option<String>> {
        self.with_data(|obj| obj.get(key).and_then(Value::as_str).map(str::to_string))
    }
}

/// Ids listed under `key` in a snapshot object, e.g. `tableOrder`.
pub(crate) fn id_list(obj: &Map<String, Value>, key: &str) -> Vec<String> {
    obj.get(key)
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Keys of the object under `key`, in snapshot order.
pub(crate) fn object_keys(obj: &Map<String, Value>, key: &str) -> Vec<String> {
    obj.get(key)
        .and_then(Value::as_object)
        .map(|map| map.keys().cloned().collect())
        .unwrap_or_default()
}

/// Path segments as owned strings.
pub(crate) fn node_path(segments: &[&str]) -> Vec<String> {
    segments.iter().map(|s| s.to_string()).collect()
}
