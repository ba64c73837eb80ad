//! Per-instance, per-key observer registration.
//!
//! Every model node, data store and query result implements [`Watchable`].
//! Delivery is synchronous: a notify pass runs every callback registered for
//! the key, in registration order, before returning. The callback list is
//! copied before delivery, so a callback that watches or unwatches the same key
//! only affects later passes.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::warn;

use crate::error::{Error, ModelKind, Result};
use crate::keys::WatchKey;

/// Data delivered alongside a change notification.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ChangePayload {
    #[default]
    None,
    RecordIds {
        added_record_ids: Vec<String>,
        removed_record_ids: Vec<String>,
    },
    CellValues {
        record_ids: Vec<String>,
        field_ids: Vec<String>,
    },
    CellValuesInField {
        record_ids: Vec<String>,
        field_id: String,
    },
    /// `None` means every record's color may have changed.
    RecordColors { record_ids: Option<Vec<String>> },
}

impl ChangePayload {
    pub fn record_ids_changed(added: Vec<String>, removed: Vec<String>) -> Self {
        ChangePayload::RecordIds {
            added_record_ids: added,
            removed_record_ids: removed,
        }
    }
}

type CallbackFn<M> = dyn Fn(&M, &<M as Watchable>::Key, &ChangePayload);

/// A shareable watch callback.
///
/// Identity is the allocation: clones of one `WatchCallback` are equal, two
/// callbacks built from identical closures are not. Keep the value around to
/// unwatch later.
pub struct WatchCallback<M: Watchable>(Rc<CallbackFn<M>>);

impl<M: Watchable> WatchCallback<M> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&M, &M::Key, &ChangePayload) + 'static,
    {
        Self(Rc::new(f))
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.0), Rc::as_ptr(&other.0))
    }

    fn call(&self, model: &M, key: &M::Key, payload: &ChangePayload) {
        (self.0)(model, key, payload)
    }
}

impl<M: Watchable> Clone for WatchCallback<M> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<M: Watchable> fmt::Debug for WatchCallback<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WatchCallback({:p})", Rc::as_ptr(&self.0))
    }
}

struct Registration<M: Watchable> {
    callback: WatchCallback<M>,
    context: Option<u64>,
}

impl<M: Watchable> Clone for Registration<M> {
    fn clone(&self) -> Self {
        Self {
            callback: self.callback.clone(),
            context: self.context,
        }
    }
}

impl<M: Watchable> Registration<M> {
    fn matches(&self, callback: &WatchCallback<M>, context: Option<u64>) -> bool {
        self.callback.ptr_eq(callback) && self.context == context
    }
}

/// Storage behind [`Watchable`].
pub struct WatchRegistry<M: Watchable> {
    watchers: RefCell<HashMap<M::Key, Vec<Registration<M>>>>,
    change_count: Cell<u64>,
}

impl<M: Watchable> Default for WatchRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Watchable> WatchRegistry<M> {
    pub fn new() -> Self {
        Self {
            watchers: RefCell::new(HashMap::new()),
            change_count: Cell::new(0),
        }
    }

    fn add(&self, key: M::Key, callback: WatchCallback<M>, context: Option<u64>) {
        self.watchers
            .borrow_mut()
            .entry(key)
            .or_default()
            .push(Registration { callback, context });
    }

    fn remove(&self, key: &M::Key, callback: &WatchCallback<M>, context: Option<u64>) -> usize {
        let mut watchers = self.watchers.borrow_mut();
        let Some(list) = watchers.get_mut(key) else {
            return 0;
        };
        let before = list.len();
        list.retain(|reg| !reg.matches(callback, context));
        let removed = before - list.len();
        if list.is_empty() {
            watchers.remove(key);
        }
        removed
    }

    pub fn has_watchers(&self, key: &M::Key) -> bool {
        self.watcher_count(key) > 0
    }

    pub fn watcher_count(&self, key: &M::Key) -> usize {
        self.watchers.borrow().get(key).map_or(0, Vec::len)
    }

    pub fn watched_keys(&self) -> Vec<M::Key> {
        self.watchers.borrow().keys().cloned().collect()
    }

    pub fn change_count(&self) -> u64 {
        self.change_count.get()
    }

    pub(crate) fn notify(&self, model: &M, key: &M::Key, payload: &ChangePayload) {
        self.change_count.set(self.change_count.get().wrapping_add(1));
        let snapshot: Vec<Registration<M>> = match self.watchers.borrow().get(key) {
            Some(list) => list.clone(),
            None => return,
        };
        for registration in &snapshot {
            registration.callback.call(model, key, payload);
        }
    }
}

/// Per-key subscribe/unsubscribe on a model object.
pub trait Watchable: Sized {
    type Key: WatchKey;

    const KIND: ModelKind;

    fn watch_registry(&self) -> &WatchRegistry<Self>;

    /// Checks that cannot be expressed by the key type alone.
    #[doc(hidden)]
    fn validate_watch_key(&self, _key: &Self::Key) -> Result<()> {
        Ok(())
    }

    #[doc(hidden)]
    fn did_add_watch(&self, _key: &Self::Key) {}

    #[doc(hidden)]
    fn did_remove_watch(&self, _key: &Self::Key) {}

    /// Register `callback` for every key.
    ///
    /// All keys are validated before any is registered, so an error leaves the
    /// registry untouched.
    fn watch<I>(
        &self,
        keys: I,
        callback: &WatchCallback<Self>,
        context: Option<u64>,
    ) -> Result<Vec<Self::Key>>
    where
        I: IntoIterator<Item = Self::Key>,
    {
        let keys: Vec<Self::Key> = keys.into_iter().collect();
        for key in &keys {
            self.validate_watch_key(key)?;
        }
        for key in &keys {
            self.watch_registry()
                .add(key.clone(), callback.clone(), context);
            self.did_add_watch(key);
        }
        Ok(keys)
    }

    fn watch_str(
        &self,
        keys: &[&str],
        callback: &WatchCallback<Self>,
        context: Option<u64>,
    ) -> Result<Vec<Self::Key>> {
        let parsed = keys
            .iter()
            .map(|raw| {
                raw.parse::<Self::Key>().map_err(|_| Error::InvalidWatchKey {
                    model: Self::KIND,
                    key: raw.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        self.watch(parsed, callback, context)
    }

    /// Remove every registration of `(callback, context)` for each key.
    ///
    /// Never fails: unwatching is part of teardown.
    fn unwatch<I>(
        &self,
        keys: I,
        callback: &WatchCallback<Self>,
        context: Option<u64>,
    ) -> Vec<Self::Key>
    where
        I: IntoIterator<Item = Self::Key>,
    {
        let keys: Vec<Self::Key> = keys.into_iter().collect();
        for key in &keys {
            if self.watch_registry().remove(key, callback, context) > 0 {
                self.did_remove_watch(key);
            }
        }
        keys
    }

    fn unwatch_str(
        &self,
        keys: &[&str],
        callback: &WatchCallback<Self>,
        context: Option<u64>,
    ) -> Vec<Self::Key> {
        let mut valid = Vec::with_capacity(keys.len());
        for raw in keys {
            match raw.parse::<Self::Key>() {
                Ok(key) => valid.push(key),
                Err(_) => warn!(model = %Self::KIND, key = %raw, "unwatch called with an invalid key"),
            }
        }
        self.unwatch(valid, callback, context)
    }

    /// Monotonic count of notifications fired by this instance.
    fn change_count(&self) -> u64 {
        self.watch_registry().change_count()
    }
}
