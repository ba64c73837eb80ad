#![allow(dead_code)]

pub mod fixtures;
pub mod host;

use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

use basemirror::{
    Base, BaseConfig, ChangePayload, ManualClock, ModelUpdate, StructuralTypeProvider, Table,
    TypeProvider, WatchCallback, Watchable,
};
use futures::executor::LocalPool;

use host::FakeHost;

/// A connected base over a [`FakeHost`], driven by a single-threaded pool.
pub struct Harness {
    pub base: Base,
    pub host: Rc<FakeHost>,
    pub clock: Rc<ManualClock>,
    pub pool: LocalPool,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_host(fixtures::host())
    }

    pub fn with_host(host: FakeHost) -> Self {
        Self::with_host_and_config(host, BaseConfig::default())
    }

    pub fn with_host_and_config(host: FakeHost, config: BaseConfig) -> Self {
        Self::build(host, config, Rc::new(StructuralTypeProvider::new()))
    }

    pub fn with_type_provider(types: Rc<dyn TypeProvider>) -> Self {
        Self::build(fixtures::host(), BaseConfig::default(), types)
    }

    fn build(host: FakeHost, config: BaseConfig, types: Rc<dyn TypeProvider>) -> Self {
        let pool = LocalPool::new();
        let host = Rc::new(host);
        let clock = Rc::new(ManualClock::new());
        let base = Base::builder(host.clone(), Rc::new(pool.spawner()))
            .type_provider(types)
            .config(config)
            .clock(clock.clone())
            .connect()
            .unwrap_or_else(|e| panic!("connect failed: {e}"));
        Self {
            base,
            host,
            clock,
            pool,
        }
    }

    pub fn run<F: Future>(&mut self, future: F) -> F::Output {
        self.pool.run_until(future)
    }

    /// Drive every spawned load as far as it can go.
    pub fn settle(&mut self) {
        self.pool.run_until_stalled();
    }

    /// Deliver a remote batch through the host subscription.
    pub fn push(&self, updates: Vec<ModelUpdate>) {
        self.host.push(updates);
    }

    pub fn tasks(&self) -> Table {
        self.base
            .get_table_by_id(fixtures::TASKS)
            .unwrap_or_else(|e| panic!("tasks table missing: {e}"))
    }
}

/// Everything a watched object reported, as `(key, payload)` pairs.
pub struct Recorder<M: Watchable> {
    pub callback: WatchCallback<M>,
    pub events: Rc<RefCell<Vec<(String, ChangePayload)>>>,
}

impl<M: Watchable + 'static> Recorder<M> {
    pub fn new() -> Self {
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        let callback = WatchCallback::new(move |_: &M, key: &M::Key, payload: &ChangePayload| {
            sink.borrow_mut().push((key.to_string(), payload.clone()));
        });
        Self { callback, events }
    }

    pub fn keys(&self) -> Vec<String> {
        self.events.borrow().iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn payloads(&self, key: &str) -> Vec<ChangePayload> {
        self.events
            .borrow()
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

pub fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}
