//! Fingerprint-keyed reuse of expensive derived objects.
//!
//! Objects are bucketed by a coarse key and matched against a lookup by
//! [`PoolPolicy::can_reuse`]. Strong entries stay until explicitly removed;
//! weak entries expire a fixed time after their last registration or lookup.
//! Expiry is evaluated against the injected [`Clock`] whenever the pool is
//! consulted, so an expired entry is never handed out.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::clock::Clock;
use crate::error::{Error, Result};

pub trait PoolPolicy {
    type Object: Clone;
    type Options: ?Sized;

    fn key_from_object(object: &Self::Object) -> String;
    fn key_from_options(options: &Self::Options) -> String;
    fn can_reuse(object: &Self::Object, options: &Self::Options) -> bool;
    fn is_same(a: &Self::Object, b: &Self::Object) -> bool;
}

struct WeakEntry<T> {
    object: T,
    expires_at: Instant,
}

pub struct ObjectPool<P: PoolPolicy> {
    strong: RefCell<HashMap<String, Vec<P::Object>>>,
    weak: RefCell<HashMap<String, Vec<WeakEntry<P::Object>>>>,
    ttl: Duration,
    clock: Rc<dyn Clock>,
}

impl<P: PoolPolicy> ObjectPool<P> {
    pub fn new(clock: Rc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            strong: RefCell::new(HashMap::new()),
            weak: RefCell::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    /// Find a live object for `options`, strong entries first.
    ///
    /// A weak hit restarts that entry's expiry window.
    pub fn get_object_for_reuse(&self, options: &P::Options) -> Option<P::Object> {
        self.expire_weak();
        let key = P::key_from_options(options);
        if let Some(found) = self
            .strong
            .borrow()
            .get(&key)
            .and_then(|bucket| bucket.iter().find(|obj| P::can_reuse(obj, options)))
        {
            trace!(%key, "pool hit (strong)");
            return Some(found.clone());
        }
        let now = self.clock.now();
        let mut weak = self.weak.borrow_mut();
        let entry = weak
            .get_mut(&key)?
            .iter_mut()
            .find(|entry| P::can_reuse(&entry.object, options))?;
        entry.expires_at = now + self.ttl;
        trace!(%key, "pool hit (weak)");
        Some(entry.object.clone())
    }

    /// Hold `object` until [`unregister_strong`](Self::unregister_strong).
    ///
    /// Cancels any pending weak expiry for the same object.
    pub fn register_strong(&self, object: P::Object) {
        let key = P::key_from_object(&object);
        self.remove_weak_entry(&key, &object);
        self.strong.borrow_mut().entry(key).or_default().push(object);
    }

    pub fn unregister_strong(&self, object: &P::Object) -> Result<()> {
        let key = P::key_from_object(object);
        let mut strong = self.strong.borrow_mut();
        let bucket = strong.get_mut(&key);
        let position = bucket
            .as_ref()
            .and_then(|bucket| bucket.iter().position(|other| P::is_same(other, object)));
        match (bucket, position) {
            (Some(bucket), Some(position)) => {
                bucket.remove(position);
                if bucket.is_empty() {
                    strong.remove(&key);
                }
                Ok(())
            }
            _ => Err(Error::PoolImbalance(format!(
                "object with key {key} is not strongly registered"
            ))),
        }
    }

    /// Keep `object` reusable for the pool's window, restarting the window if
    /// it is already weakly registered.
    pub fn register_weak(&self, object: P::Object) {
        let key = P::key_from_object(&object);
        let expires_at = self.clock.now() + self.ttl;
        let mut weak = self.weak.borrow_mut();
        let bucket = weak.entry(key).or_default();
        match bucket
            .iter_mut()
            .find(|entry| P::is_same(&entry.object, &object))
        {
            Some(entry) => entry.expires_at = expires_at,
            None => bucket.push(WeakEntry { object, expires_at }),
        }
    }

    pub fn unregister_weak(&self, object: &P::Object) -> Result<()> {
        let key = P::key_from_object(object);
        if self.remove_weak_entry(&key, object) {
            Ok(())
        } else {
            Err(Error::PoolImbalance(format!(
                "object with key {key} is not weakly registered"
            )))
        }
    }

    pub fn is_strongly_registered(&self, object: &P::Object) -> bool {
        let key = P::key_from_object(object);
        self.strong
            .borrow()
            .get(&key)
            .is_some_and(|bucket| bucket.iter().any(|other| P::is_same(other, object)))
    }

    pub fn is_weakly_registered(&self, object: &P::Object) -> bool {
        self.expire_weak();
        let key = P::key_from_object(object);
        self.weak
            .borrow()
            .get(&key)
            .is_some_and(|bucket| bucket.iter().any(|entry| P::is_same(&entry.object, object)))
    }

    /// Drop weak entries whose window has passed. Returns how many expired.
    pub fn expire_weak(&self) -> usize {
        let now = self.clock.now();
        let mut expired = Vec::new();
        {
            let mut weak = self.weak.borrow_mut();
            for bucket in weak.values_mut() {
                let mut i = 0;
                while i < bucket.len() {
                    if bucket[i].expires_at < now {
                        expired.push(bucket.remove(i));
                    } else {
                        i += 1;
                    }
                }
            }
            weak.retain(|_, bucket| !bucket.is_empty());
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "expired weakly pooled objects");
        }
        // Objects are dropped here, after the borrow is released.
        expired.len()
    }

    /// Forget every entry.
    pub fn clear(&self) {
        let strong = std::mem::take(&mut *self.strong.borrow_mut());
        let weak = std::mem::take(&mut *self.weak.borrow_mut());
        drop(strong);
        drop(weak);
    }

    fn remove_weak_entry(&self, key: &str, object: &P::Object) -> bool {
        let removed = {
            let mut weak = self.weak.borrow_mut();
            let Some(bucket) = weak.get_mut(key) else {
                return false;
            };
            let Some(position) = bucket
                .iter()
                .position(|entry| P::is_same(&entry.object, object))
            else {
                return false;
            };
            let removed = bucket.remove(position);
            if bucket.is_empty() {
                weak.remove(key);
            }
            removed
        };
        drop(removed);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[derive(Debug)]
    struct Item {
        parent: String,
        fingerprint: String,
    }

    struct ItemPolicy;

    impl PoolPolicy for ItemPolicy {
        type Object = Rc<Item>;
        type Options = (String, String);

        fn key_from_object(object: &Rc<Item>) -> String {
            object.parent.clone()
        }

        fn key_from_options(options: &(String, String)) -> String {
            options.0.clone()
        }

        fn can_reuse(object: &Rc<Item>, options: &(String, String)) -> bool {
            object.fingerprint == options.1
        }

        fn is_same(a: &Rc<Item>, b: &Rc<Item>) -> bool {
            Rc::ptr_eq(a, b)
        }
    }

    fn item(parent: &str, fingerprint: &str) -> Rc<Item> {
        Rc::new(Item {
            parent: parent.to_string(),
            fingerprint: fingerprint.to_string(),
        })
    }

    fn opts(parent: &str, fingerprint: &str) -> (String, String) {
        (parent.to_string(), fingerprint.to_string())
    }

    fn pool() -> (Rc<ManualClock>, ObjectPool<ItemPolicy>) {
        let clock = Rc::new(ManualClock::new());
        let pool = ObjectPool::new(clock.clone(), Duration::from_millis(10));
        (clock, pool)
    }

    #[test]
    fn test_reuse_filters_by_options() {
        let (_clock, pool) = pool();
        let a = item("tbl1", "x");
        pool.register_strong(a.clone());
        assert!(Rc::ptr_eq(&pool.get_object_for_reuse(&opts("tbl1", "x")).unwrap(), &a));
        assert!(pool.get_object_for_reuse(&opts("tbl1", "y")).is_none());
        assert!(pool.get_object_for_reuse(&opts("tbl2", "x")).is_none());
    }

    #[test]
    fn test_strong_wins_over_weak() {
        let (_clock, pool) = pool();
        let weak = item("tbl1", "x");
        let strong = item("tbl1", "x");
        pool.register_weak(weak);
        pool.register_strong(strong.clone());
        assert!(Rc::ptr_eq(&pool.get_object_for_reuse(&opts("tbl1", "x")).unwrap(), &strong));
    }

    #[test]
    fn test_weak_expiry_is_sliding() {
        let (clock, pool) = pool();
        let a = item("tbl1", "x");
        pool.register_weak(a.clone());
        clock.advance_ms(10);
        assert!(pool.get_object_for_reuse(&opts("tbl1", "x")).is_some());
        clock.advance_ms(10);
        assert!(pool.get_object_for_reuse(&opts("tbl1", "x")).is_some());
        clock.advance_ms(11);
        assert!(pool.get_object_for_reuse(&opts("tbl1", "x")).is_none());
        assert!(!pool.is_weakly_registered(&a));
    }

    #[test]
    fn test_strong_registration_cancels_weak_expiry() {
        let (clock, pool) = pool();
        let a = item("tbl1", "x");
        pool.register_weak(a.clone());
        pool.register_strong(a.clone());
        assert!(!pool.is_weakly_registered(&a));
        clock.advance_ms(100);
        assert!(pool.get_object_for_reuse(&opts("tbl1", "x")).is_some());
        pool.unregister_strong(&a).unwrap();
        assert!(pool.get_object_for_reuse(&opts("tbl1", "x")).is_none());
    }

    #[test]
    fn test_unbalanced_unregister_is_reported() {
        let (_clock, pool) = pool();
        let a = item("tbl1", "x");
        assert!(matches!(pool.unregister_strong(&a), Err(Error::PoolImbalance(_))));
        assert!(matches!(pool.unregister_weak(&a), Err(Error::PoolImbalance(_))));
        pool.register_weak(a.clone());
        pool.register_weak(a.clone());
        pool.unregister_weak(&a).unwrap();
        assert!(pool.unregister_weak(&a).is_err());
    }

    #[test]
    fn test_clear_forgets_everything() {
        let (_clock, pool) = pool();
        let a = item("tbl1", "x");
        pool.register_strong(a.clone());
        pool.register_weak(item("tbl2", "y"));
        pool.clear();
        assert!(!pool.is_strongly_registered(&a));
        assert_eq!(Rc::strong_count(&a), 1);
    }
}
