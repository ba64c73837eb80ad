//! Reference-counted load state shared by stores and query results.
//!
//! Every `load_data` call retains, every `unload_data` releases. The first
//! retain starts the underlying work; callers arriving while it is running
//! get the same [`SharedLoad`]. Each attempt is tagged with a generation so a
//! result that lands after the last release (or after a newer attempt began)
//! can be recognized and dropped.

use std::cell::{Cell, RefCell};

use futures::future::{LocalBoxFuture, Shared};

use crate::error::Result;

pub(crate) type SharedLoad = Shared<LocalBoxFuture<'static, Result<()>>>;

pub(crate) enum LoadStep {
    Loaded,
    Pending(SharedLoad),
    /// The caller must start a load for this generation and hand it to
    /// [`LoadTracker::begin`].
    Start(u64),
}

#[derive(Default)]
pub(crate) struct LoadTracker {
    retain_count: Cell<usize>,
    loaded: Cell<bool>,
    in_flight: RefCell<Option<SharedLoad>>,
    generation: Cell<u64>,
}

impl LoadTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn retain(&self) -> LoadStep {
        self.retain_count.set(self.retain_count.get() + 1);
        if self.loaded.get() {
            return LoadStep::Loaded;
        }
        if let Some(pending) = self.in_flight.borrow().as_ref() {
            return LoadStep::Pending(pending.clone());
        }
        LoadStep::Start(self.generation.get())
    }

    pub(crate) fn begin(&self, generation: u64, load: SharedLoad) {
        if generation == self.generation.get() {
            *self.in_flight.borrow_mut() = Some(load);
        }
    }

    /// Mark `generation` as loaded. Returns `false` when the result is stale
    /// and must be discarded.
    pub(crate) fn finish(&self, generation: u64) -> bool {
        if generation != self.generation.get() || self.retain_count.get() == 0 {
            return false;
        }
        self.in_flight.borrow_mut().take();
        self.loaded.set(true);
        true
    }

    /// Abandon a failed attempt. Retains taken for it are dropped so the next
    /// `load_data` starts over.
    pub(crate) fn fail(&self, generation: u64) -> bool {
        if generation != self.generation.get() {
            return false;
        }
        self.reset();
        true
    }

    /// Returns `true` when this release brought the count to zero. Releasing
    /// an unretained tracker does nothing.
    pub(crate) fn release(&self) -> bool {
        match self.retain_count.get() {
            0 => false,
            1 => {
                self.reset();
                true
            }
            n => {
                self.retain_count.set(n - 1);
                false
            }
        }
    }

    pub(crate) fn retain_count(&self) -> usize {
        self.retain_count.get()
    }

    pub(crate) fn is_loaded(&self) -> bool {
        self.loaded.get()
    }

    fn reset(&self) {
        self.retain_count.set(0);
        self.loaded.set(false);
        let pending = self.in_flight.borrow_mut().take();
        drop(pending);
        self.generation.set(self.generation.get().wrapping_add(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    fn ready_load() -> SharedLoad {
        async { Ok(()) }.boxed_local().shared()
    }

    #[test]
    fn test_first_retain_starts_later_ones_join() {
        let tracker = LoadTracker::new();
        let LoadStep::Start(generation) = tracker.retain() else {
            panic!("first retain should start a load");
        };
        tracker.begin(generation, ready_load());
        assert!(matches!(tracker.retain(), LoadStep::Pending(_)));
        assert!(tracker.finish(generation));
        assert!(matches!(tracker.retain(), LoadStep::Loaded));
        assert_eq!(tracker.retain_count(), 3);
    }

    #[test]
    fn test_result_after_last_release_is_stale() {
        let tracker = LoadTracker::new();
        let LoadStep::Start(generation) = tracker.retain() else {
            panic!("expected start");
        };
        tracker.begin(generation, ready_load());
        assert!(tracker.release());
        assert!(!tracker.finish(generation));
        assert!(!tracker.is_loaded());

        let LoadStep::Start(next) = tracker.retain() else {
            panic!("expected a fresh start");
        };
        assert_ne!(next, generation);
        assert!(!tracker.finish(generation));
        assert!(tracker.finish(next));
    }

    #[test]
    fn test_release_is_balanced_and_idempotent_at_zero() {
        let tracker = LoadTracker::new();
        assert!(!tracker.release());
        let LoadStep::Start(generation) = tracker.retain() else {
            panic!("expected start");
        };
        tracker.retain();
        assert!(tracker.finish(generation));
        assert!(!tracker.release());
        assert!(tracker.is_loaded());
        assert!(tracker.release());
        assert!(!tracker.is_loaded());
        assert!(!tracker.release());
    }

    #[test]
    fn test_failure_drops_retains() {
        let tracker = LoadTracker::new();
        let LoadStep::Start(generation) = tracker.retain() else {
            panic!("expected start");
        };
        tracker.retain();
        assert!(tracker.fail(generation));
        assert_eq!(tracker.retain_count(), 0);
        assert!(matches!(tracker.retain(), LoadStep::Start(_)));
    }
}
