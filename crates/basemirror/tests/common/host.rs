use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use basemirror::{
    Host, HostError, HostSubscription, ModelUpdate, Mutation, PartialMutation,
    PermissionCheckResult, ViewData,
};
use futures::channel::oneshot;
use futures::future::{self, LocalBoxFuture};
use futures::FutureExt;
use serde_json::{Map, Value};

type BatchSink = Box<dyn Fn(Vec<ModelUpdate>)>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableFetch {
    pub table_id: String,
    pub field_ids: Option<Vec<String>>,
}

/// An in-memory host.
///
/// Fetches resolve immediately unless [`FakeHost::defer_fetches`] is on, in
/// which case they wait for [`FakeHost::release_fetches`]. Every call is
/// logged for assertions.
pub struct FakeHost {
    snapshot: Value,
    sink: RefCell<Option<BatchSink>>,
    records: RefCell<HashMap<String, Map<String, Value>>>,
    view_data: RefCell<HashMap<String, ViewData>>,
    defer: Cell<bool>,
    fail_fetches: Cell<bool>,
    deferred: RefCell<Vec<Box<dyn FnOnce()>>>,
    permission: RefCell<PermissionCheckResult>,
    write_error: RefCell<Option<HostError>>,
    pub table_fetches: RefCell<Vec<TableFetch>>,
    pub table_unsubscribes: RefCell<Vec<TableFetch>>,
    pub view_fetches: RefCell<Vec<String>>,
    pub view_unsubscribes: RefCell<Vec<String>>,
    pub permission_checks: RefCell<Vec<PartialMutation>>,
    pub writes: RefCell<Vec<Mutation>>,
}

impl FakeHost {
    pub fn new(snapshot: Value) -> Self {
        Self {
            snapshot,
            sink: RefCell::new(None),
            records: RefCell::new(HashMap::new()),
            view_data: RefCell::new(HashMap::new()),
            defer: Cell::new(false),
            fail_fetches: Cell::new(false),
            deferred: RefCell::new(Vec::new()),
            permission: RefCell::new(PermissionCheckResult::allowed()),
            write_error: RefCell::new(None),
            table_fetches: RefCell::new(Vec::new()),
            table_unsubscribes: RefCell::new(Vec::new()),
            view_fetches: RefCell::new(Vec::new()),
            view_unsubscribes: RefCell::new(Vec::new()),
            permission_checks: RefCell::new(Vec::new()),
            writes: RefCell::new(Vec::new()),
        }
    }

    pub fn with_records(self, table_id: &str, records: Value) -> Self {
        let records = records.as_object().cloned().unwrap_or_default();
        self.records.borrow_mut().insert(table_id.to_string(), records);
        self
    }

    pub fn with_view_data(self, view_id: &str, data: ViewData) -> Self {
        self.view_data.borrow_mut().insert(view_id.to_string(), data);
        self
    }

    pub fn defer_fetches(&self, defer: bool) {
        self.defer.set(defer);
    }

    pub fn fail_fetches(&self, fail: bool) {
        self.fail_fetches.set(fail);
    }

    /// Resolve every fetch held back by `defer_fetches`.
    pub fn release_fetches(&self) -> usize {
        let pending = std::mem::take(&mut *self.deferred.borrow_mut());
        let count = pending.len();
        for resolve in pending {
            resolve();
        }
        count
    }

    pub fn deny(&self, reason: &str) {
        *self.permission.borrow_mut() = PermissionCheckResult::denied(reason);
    }

    pub fn fail_writes(&self, message: &str) {
        *self.write_error.borrow_mut() = Some(HostError::new(message));
    }

    /// Push a batch as if it came from the server.
    pub fn push(&self, updates: Vec<ModelUpdate>) {
        let sink = self.sink.borrow();
        let sink = sink
            .as_ref()
            .unwrap_or_else(|| panic!("no model update subscriber"));
        sink(updates);
    }

    pub fn table_fetch_count(&self) -> usize {
        self.table_fetches.borrow().len()
    }

    fn respond<T: 'static>(
        &self,
        result: Result<T, HostError>,
    ) -> LocalBoxFuture<'static, Result<T, HostError>> {
        let result = if self.fail_fetches.get() {
            Err(HostError::new("offline"))
        } else {
            result
        };
        if !self.defer.get() {
            return future::ready(result).boxed_local();
        }
        let (tx, rx) = oneshot::channel();
        self.deferred.borrow_mut().push(Box::new(move || {
            let _ = tx.send(result);
        }));
        rx.map(|received| received.unwrap_or_else(|_| Err(HostError::new("fetch dropped"))))
            .boxed_local()
    }
}

/// Keep only the requested fields of each record.
fn project(records: &Map<String, Value>, field_ids: Option<&[String]>) -> Map<String, Value> {
    let Some(field_ids) = field_ids else {
        return records.clone();
    };
    records
        .iter()
        .map(|(id, record)| {
            let mut record = record.clone();
            if let Some(cells) = record
                .get_mut("cellValuesByFieldId")
                .and_then(Value::as_object_mut)
            {
                cells.retain(|field_id, _| field_ids.contains(field_id));
            }
            (id.clone(), record)
        })
        .collect()
}

impl Host for FakeHost {
    fn initial_snapshot(&self) -> Value {
        self.snapshot.clone()
    }

    fn subscribe_to_model_updates(&self, on_batch: BatchSink) -> HostSubscription {
        *self.sink.borrow_mut() = Some(on_batch);
        HostSubscription::noop()
    }

    fn fetch_table_data(
        &self,
        table_id: &str,
        field_ids: Option<&[String]>,
    ) -> LocalBoxFuture<'static, Result<Map<String, Value>, HostError>> {
        self.table_fetches.borrow_mut().push(TableFetch {
            table_id: table_id.to_string(),
            field_ids: field_ids.map(<[String]>::to_vec),
        });
        let records = self
            .records
            .borrow()
            .get(table_id)
            .map(|records| project(records, field_ids))
            .unwrap_or_default();
        self.respond(Ok(records))
    }

    fn unsubscribe_from_table_data(&self, table_id: &str, field_ids: Option<&[String]>) {
        self.table_unsubscribes.borrow_mut().push(TableFetch {
            table_id: table_id.to_string(),
            field_ids: field_ids.map(<[String]>::to_vec),
        });
    }

    fn fetch_view_data(
        &self,
        _table_id: &str,
        view_id: &str,
    ) -> LocalBoxFuture<'static, Result<ViewData, HostError>> {
        self.view_fetches.borrow_mut().push(view_id.to_string());
        let data = self
            .view_data
            .borrow()
            .get(view_id)
            .cloned()
            .unwrap_or_default();
        self.respond(Ok(data))
    }

    fn unsubscribe_from_view_data(&self, _table_id: &str, view_id: &str) {
        self.view_unsubscribes.borrow_mut().push(view_id.to_string());
    }

    fn check_permission(&self, mutation: &PartialMutation) -> PermissionCheckResult {
        self.permission_checks.borrow_mut().push(mutation.clone());
        self.permission.borrow().clone()
    }

    fn write(&self, mutation: &Mutation) -> LocalBoxFuture<'static, Result<(), HostError>> {
        self.writes.borrow_mut().push(mutation.clone());
        let result = match self.write_error.borrow().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        };
        future::ready(result).boxed_local()
    }
}
