//! The snapshot and the batch dispatcher that owns it.
//!
//! All writes, remote and optimistic, go through [`Dispatcher::apply`]. A batch
//! is written completely before any observer runs; the resulting
//! [`DirtyPaths`] tree is then handed to the walker (the base's model tree)
//! exactly once. A write issued by an observer while a batch is being
//! delivered lands in the snapshot immediately, but its notifications are
//! queued and delivered after the current pass.

use std::cell::{Cell, Ref, RefCell};
use std::rc::Rc;

use basemirror_path::{self as path, Path, PathError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, trace};

use crate::dirty::DirtyPaths;

/// One `{path, value}` write. A `None` value deletes the path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelUpdate {
    pub path: Path,
    #[serde(default)]
    pub value: Option<Value>,
}

impl ModelUpdate {
    pub fn new(path: Path, value: Option<Value>) -> Self {
        Self { path, value }
    }

    /// Write `value` at a dotted path.
    pub fn set(dotted: &str, value: Value) -> Self {
        Self::new(path::parse_path(dotted), Some(value))
    }

    pub fn delete(dotted: &str) -> Self {
        Self::new(path::parse_path(dotted), None)
    }

    pub fn set_at<S: AsRef<str>>(segments: &[S], value: Value) -> Self {
        Self::new(path::to_path(segments), Some(value))
    }

    pub fn delete_at<S: AsRef<str>>(segments: &[S]) -> Self {
        Self::new(path::to_path(segments), None)
    }
}

pub(crate) type Walker = Rc<dyn Fn(&DirtyPaths)>;

struct DispatchGuard<'a>(&'a Cell<bool>);

impl<'a> DispatchGuard<'a> {
    fn enter(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

pub struct Dispatcher {
    snapshot: RefCell<Value>,
    pending: RefCell<DirtyPaths>,
    dispatching: Cell<bool>,
    walker: RefCell<Option<Walker>>,
    batch_count: Cell<u64>,
}

impl Dispatcher {
    pub fn new(snapshot: Value) -> Self {
        Self {
            snapshot: RefCell::new(snapshot),
            pending: RefCell::new(DirtyPaths::new()),
            dispatching: Cell::new(false),
            walker: RefCell::new(None),
            batch_count: Cell::new(0),
        }
    }

    pub(crate) fn set_walker(&self, walker: Walker) {
        *self.walker.borrow_mut() = Some(walker);
    }

    /// Read access to the whole snapshot. Do not hold across a write.
    pub fn snapshot(&self) -> Ref<'_, Value> {
        self.snapshot.borrow()
    }

    pub fn read<S: AsRef<str>>(&self, at: &[S]) -> Option<Value> {
        path::get(&self.snapshot.borrow(), at).cloned()
    }

    pub fn with_value<S, R, F>(&self, at: &[S], f: F) -> R
    where
        S: AsRef<str>,
        F: FnOnce(Option<&Value>) -> R,
    {
        let snapshot = self.snapshot.borrow();
        f(path::get(&snapshot, at))
    }

    pub fn exists<S: AsRef<str>>(&self, at: &[S]) -> bool {
        path::exists(&self.snapshot.borrow(), at)
    }

    /// Number of dirty trees delivered so far.
    pub fn batch_count(&self) -> u64 {
        self.batch_count.get()
    }

    pub fn is_dispatching(&self) -> bool {
        self.dispatching.get()
    }

    /// Apply a batch and deliver its notifications.
    ///
    /// Returns how many updates actually changed the snapshot. Updates whose
    /// value equals the current one are skipped and produce no notification.
    pub fn apply(&self, updates: &[ModelUpdate]) -> usize {
        let mut dirty = DirtyPaths::new();
        let mut written = 0;
        {
            let mut snapshot = self.snapshot.borrow_mut();
            for update in updates {
                match write_one(&mut snapshot, update) {
                    Ok(true) => {
                        dirty.mark(&update.path);
                        written += 1;
                    }
                    Ok(false) => {}
                    Err(err) => {
                        let at = path::format_path(&update.path);
                        error!(path = %at, %err, "skipping malformed model update");
                        debug_assert!(false, "malformed model update at '{at}': {err}");
                    }
                }
            }
        }
        if dirty.is_empty() {
            trace!(updates = updates.len(), "batch changed nothing");
            return written;
        }
        debug!(
            updates = updates.len(),
            written,
            roots = ?dirty.top_level_keys(),
            "applied model updates"
        );
        self.pending.borrow_mut().merge(dirty);
        if self.dispatching.get() {
            return written;
        }
        let _guard = DispatchGuard::enter(&self.dispatching);
        loop {
            let batch = std::mem::take(&mut *self.pending.borrow_mut());
            if batch.is_empty() {
                break;
            }
            let walker = self.walker.borrow().clone();
            if let Some(walker) = walker {
                self.batch_count.set(self.batch_count.get() + 1);
                walker(&batch);
            }
        }
        written
    }
}

fn write_one(snapshot: &mut Value, update: &ModelUpdate) -> Result<bool, PathError> {
    match &update.value {
        Some(value) => {
            if path::get(snapshot, &update.path) == Some(value) {
                return Ok(false);
            }
            path::set(snapshot, &update.path, value.clone())?;
            Ok(true)
        }
        None => Ok(path::remove(snapshot, &update.path)?.is_some()),
    }
}
