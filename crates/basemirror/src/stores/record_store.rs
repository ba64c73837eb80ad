//! Per-table record data: loading, and record-level change events.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use futures::future::{self, LocalBoxFuture};
use futures::FutureExt;
use indexmap::IndexSet;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::loadable::{LoadStep, LoadTracker, SharedLoad};
use crate::core::BaseCore;
use crate::dirty::DirtyPaths;
use crate::dispatcher::ModelUpdate;
use crate::error::{ModelKind, Result};
use crate::keys::RecordStoreKey;
use crate::models::{node_path, Record};
use crate::watchable::{ChangePayload, WatchRegistry, Watchable};

/// Loads a table's records on demand and reports changes to them.
///
/// `load_data` fetches every field; `load_fields` fetches only some. Both
/// are reference counted and must be balanced by the matching unload.
#[derive(Clone)]
pub struct RecordStore {
    inner: Rc<RecordStoreInner>,
}

struct RecordStoreInner {
    core: Rc<BaseCore>,
    table_id: String,
    path: Vec<String>,
    watchers: WatchRegistry<RecordStore>,
    tracker: LoadTracker,
    field_trackers: RefCell<HashMap<String, Rc<LoadTracker>>>,
    known_ids: RefCell<IndexSet<String>>,
    records: RefCell<HashMap<String, Record>>,
}

impl Watchable for RecordStore {
    type Key = RecordStoreKey;
    const KIND: ModelKind = ModelKind::RecordStore;

    fn watch_registry(&self) -> &WatchRegistry<Self> {
        &self.inner.watchers
    }
}

impl RecordStore {
    pub(crate) fn new(core: Rc<BaseCore>, table_id: &str) -> Self {
        let path = node_path(&["tablesById", table_id, "recordsById"]);
        let known_ids = core.dispatcher.with_value(&path, |value| {
            value
                .and_then(Value::as_object)
                .map(|records| records.keys().cloned().collect())
                .unwrap_or_default()
        });
        Self {
            inner: Rc::new(RecordStoreInner {
                core,
                table_id: table_id.to_string(),
                path,
                watchers: WatchRegistry::new(),
                tracker: LoadTracker::new(),
                field_trackers: RefCell::new(HashMap::new()),
                known_ids: RefCell::new(known_ids),
                records: RefCell::new(HashMap::new()),
            }),
        }
    }

    pub fn table_id(&self) -> &str {
        &self.inner.table_id
    }

    pub fn ptr_eq(&self, other: &RecordStore) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// `true` once every field's data has been loaded.
    pub fn is_data_loaded(&self) -> bool {
        self.inner.tracker.is_loaded()
    }

    pub fn is_field_loaded(&self, field_id: &str) -> bool {
        self.is_data_loaded()
            || self
                .inner
                .field_trackers
                .borrow()
                .get(field_id)
                .is_some_and(|tracker| tracker.is_loaded())
    }

    pub fn are_fields_loaded(&self, field_ids: &[String]) -> bool {
        field_ids.iter().all(|id| self.is_field_loaded(id))
    }

    pub(crate) fn has_any_data_loaded(&self) -> bool {
        self.is_data_loaded()
            || self
                .inner
                .field_trackers
                .borrow()
                .values()
                .any(|tracker| tracker.is_loaded())
    }

    /// Record ids in snapshot order.
    pub fn record_ids(&self) -> Vec<String> {
        self.inner.core.dispatcher.with_value(&self.inner.path, |value| {
            value
                .and_then(Value::as_object)
                .map(|records| records.keys().cloned().collect())
                .unwrap_or_default()
        })
    }

    pub fn records(&self) -> Vec<Record> {
        self.record_ids()
            .iter()
            .filter_map(|id| self.get_record_by_id_if_exists(id))
            .collect()
    }

    pub fn get_record_by_id_if_exists(&self, record_id: &str) -> Option<Record> {
        if !self.record_exists(record_id) {
            return None;
        }
        let mut records = self.inner.records.borrow_mut();
        let record = records.entry(record_id.to_string()).or_insert_with(|| {
            Record::new(Rc::clone(&self.inner.core), &self.inner.table_id, record_id)
        });
        Some(record.clone())
    }

    pub fn has_record(&self, record_id: &str) -> bool {
        self.record_exists(record_id)
    }

    /// Raw cell value, `None` when the record or the cell is missing.
    pub fn get_cell_value(&self, record_id: &str, field_id: &str) -> Option<Value> {
        self.inner.core.dispatcher.with_value(
            &[
                "tablesById",
                self.table_id(),
                "recordsById",
                record_id,
                "cellValuesByFieldId",
                field_id,
            ],
            |value| value.filter(|v| !v.is_null()).cloned(),
        )
    }

    fn record_exists(&self, record_id: &str) -> bool {
        self.inner
            .core
            .dispatcher
            .exists(&["tablesById", self.table_id(), "recordsById", record_id])
    }

    /// Load every field of every record. Concurrent calls share one fetch.
    pub fn load_data(&self) -> LocalBoxFuture<'static, Result<()>> {
        let generation = match self.inner.tracker.retain() {
            LoadStep::Loaded => return future::ready(Ok(())).boxed_local(),
            LoadStep::Pending(pending) => return pending.boxed_local(),
            LoadStep::Start(generation) => generation,
        };
        debug!(table_id = %self.table_id(), "loading record data");
        let fetch = self
            .inner
            .core
            .host
            .fetch_table_data(&self.inner.table_id, None);
        let target = Rc::downgrade(&self.inner);
        let load: SharedLoad = async move {
            let result = fetch.await;
            let Some(inner) = target.upgrade() else {
                return Ok(());
            };
            let store = RecordStore { inner };
            match result {
                Ok(records) => {
                    if store.inner.tracker.finish(generation) {
                        store.apply_fetched(records, None);
                    } else {
                        warn!(table_id = %store.table_id(), "discarding record data fetched after unload");
                    }
                    Ok(())
                }
                Err(err) => {
                    store.inner.tracker.fail(generation);
                    warn!(table_id = %store.table_id(), %err, "record data fetch failed");
                    Err(err.into())
                }
            }
        }
        .boxed_local()
        .shared();
        self.inner.tracker.begin(generation, load.clone());
        self.inner.core.spawn(load.clone().map(|_| ()).boxed_local());
        load.boxed_local()
    }

    pub fn unload_data(&self) {
        if self.inner.tracker.release() {
            debug!(table_id = %self.table_id(), "unloaded record data");
            self.inner
                .core
                .host
                .unsubscribe_from_table_data(&self.inner.table_id, None);
        }
    }

    /// Load only `field_ids`. Each field is counted separately, so
    /// overlapping callers share fetches field by field.
    pub fn load_fields(&self, field_ids: &[String]) -> LocalBoxFuture<'static, Result<()>> {
        let mut waits: Vec<SharedLoad> = Vec::new();
        let mut started: Vec<(String, Rc<LoadTracker>, u64)> = Vec::new();
        for field_id in dedup(field_ids) {
            let tracker = Rc::clone(
                self.inner
                    .field_trackers
                    .borrow_mut()
                    .entry(field_id.clone())
                    .or_insert_with(|| Rc::new(LoadTracker::new())),
            );
            match tracker.retain() {
                LoadStep::Loaded => {}
                LoadStep::Pending(pending) => waits.push(pending),
                LoadStep::Start(generation) => started.push((field_id, tracker, generation)),
            }
        }

        if !started.is_empty() {
            let ids: Vec<String> = started.iter().map(|(id, _, _)| id.clone()).collect();
            debug!(table_id = %self.table_id(), fields = ?ids, "loading record fields");
            let fetch = self
                .inner
                .core
                .host
                .fetch_table_data(&self.inner.table_id, Some(&ids));
            let target = Rc::downgrade(&self.inner);
            let pending: Vec<(String, Weak<LoadTracker>, u64)> = started
                .iter()
                .map(|(id, tracker, generation)| (id.clone(), Rc::downgrade(tracker), *generation))
                .collect();
            let load: SharedLoad = async move {
                let result = fetch.await;
                let Some(inner) = target.upgrade() else {
                    return Ok(());
                };
                let store = RecordStore { inner };
                match result {
                    Ok(records) => {
                        let live: Vec<String> = pending
                            .iter()
                            .filter(|(_, tracker, generation)| {
                                tracker
                                    .upgrade()
                                    .is_some_and(|tracker| tracker.finish(*generation))
                            })
                            .map(|(id, _, _)| id.clone())
                            .collect();
                        if live.is_empty() {
                            warn!(table_id = %store.table_id(), "discarding field data fetched after unload");
                        } else {
                            store.apply_fetched(records, Some(&live));
                        }
                        Ok(())
                    }
                    Err(err) => {
                        for (_, tracker, generation) in &pending {
                            if let Some(tracker) = tracker.upgrade() {
                                tracker.fail(*generation);
                            }
                        }
                        warn!(table_id = %store.table_id(), %err, "record field fetch failed");
                        Err(err.into())
                    }
                }
            }
            .boxed_local()
            .shared();
            for (_, tracker, generation) in &started {
                tracker.begin(*generation, load.clone());
            }
            self.inner.core.spawn(load.clone().map(|_| ()).boxed_local());
            waits.push(load);
        }

        async move {
            for wait in waits {
                wait.await?;
            }
            Ok(())
        }
        .boxed_local()
    }

    pub fn unload_fields(&self, field_ids: &[String]) {
        let released: Vec<String> = {
            let trackers = self.inner.field_trackers.borrow();
            dedup(field_ids)
                .into_iter()
                .filter(|id| trackers.get(id).is_some_and(|tracker| tracker.release()))
                .collect()
        };
        if released.is_empty() {
            return;
        }
        self.inner
            .field_trackers
            .borrow_mut()
            .retain(|_, tracker| tracker.retain_count() > 0);
        debug!(table_id = %self.table_id(), fields = ?released, "unloaded record fields");
        self.inner
            .core
            .host
            .unsubscribe_from_table_data(&self.inner.table_id, Some(&released));
    }

    /// Write fetched records into the snapshot. A full load replaces
    /// `recordsById`; a field load only touches the loaded fields.
    fn apply_fetched(&self, records: Map<String, Value>, field_ids: Option<&[String]>) {
        let dispatcher = &self.inner.core.dispatcher;
        if !dispatcher.exists(&["tablesById", self.table_id()]) {
            debug!(table_id = %self.table_id(), "table deleted before its records arrived");
            return;
        }
        let updates = match field_ids {
            None => vec![ModelUpdate::set_at(&self.inner.path, Value::Object(records))],
            Some(field_ids) => {
                let mut updates = Vec::new();
                for (record_id, record) in records {
                    let mut record_path = self.inner.path.clone();
                    record_path.push(record_id.clone());
                    if !self.record_exists(&record_id) {
                        updates.push(ModelUpdate::set_at(&record_path, record));
                        continue;
                    }
                    let cells = record.get("cellValuesByFieldId");
                    for field_id in field_ids {
                        let mut cell_path = record_path.clone();
                        cell_path.push("cellValuesByFieldId".to_string());
                        cell_path.push(field_id.clone());
                        let value = cells.and_then(|c| c.get(field_id)).filter(|v| !v.is_null());
                        updates.push(ModelUpdate::new(cell_path, value.cloned()));
                    }
                }
                updates
            }
        };
        dispatcher.apply(&updates);
    }

    fn all_field_ids(&self) -> Vec<String> {
        self.inner.core.dispatcher.with_value(
            &["tablesById", self.table_id(), "fieldsById"],
            |value| {
                value
                    .and_then(Value::as_object)
                    .map(|fields| fields.keys().cloned().collect())
                    .unwrap_or_default()
            },
        )
    }

    pub(crate) fn trigger(&self, dirty: &DirtyPaths) {
        let current: IndexSet<String> = self.record_ids().into_iter().collect();
        let mut added = Vec::new();
        let mut removed = Vec::new();
        let mut changed_records: IndexSet<String> = IndexSet::new();
        let mut changed_fields: IndexSet<String> = IndexSet::new();

        {
            let known = self.inner.known_ids.borrow();
            if dirty.is_dirty() {
                added.extend(current.iter().filter(|id| !known.contains(*id)).cloned());
                removed.extend(known.iter().filter(|id| !current.contains(*id)).cloned());
                changed_records.extend(current.iter().filter(|id| known.contains(*id)).cloned());
                if !changed_records.is_empty() {
                    changed_fields.extend(self.all_field_ids());
                }
            } else {
                for (record_id, record_dirty) in dirty.children() {
                    let is_known = known.contains(record_id);
                    let exists = current.contains(record_id);
                    match (is_known, exists) {
                        (false, true) => added.push(record_id.to_string()),
                        (true, false) => removed.push(record_id.to_string()),
                        (false, false) => {}
                        (true, true) => {
                            let cells = record_dirty.child("cellValuesByFieldId");
                            match cells {
                                Some(cells) if cells.is_dirty() => {
                                    changed_records.insert(record_id.to_string());
                                    changed_fields.extend(self.all_field_ids());
                                }
                                Some(cells) => {
                                    changed_records.insert(record_id.to_string());
                                    changed_fields
                                        .extend(cells.children().map(|(id, _)| id.to_string()));
                                }
                                None => {}
                            }
                        }
                    }
                }
            }
        }

        {
            let mut known = self.inner.known_ids.borrow_mut();
            for id in &removed {
                known.shift_remove(id);
            }
            known.extend(added.iter().cloned());
        }

        let membership_changed = !added.is_empty() || !removed.is_empty();
        let cells_changed = !changed_records.is_empty() && !changed_fields.is_empty();
        if membership_changed || cells_changed || (dirty.is_dirty() && !current.is_empty()) {
            self.notify(RecordStoreKey::Records, ChangePayload::None);
        }
        if membership_changed {
            self.notify(
                RecordStoreKey::RecordIds,
                ChangePayload::record_ids_changed(added, removed.clone()),
            );
        }
        if cells_changed {
            let record_ids: Vec<String> = changed_records.into_iter().collect();
            let field_ids: Vec<String> = changed_fields.into_iter().collect();
            self.notify(
                RecordStoreKey::CellValues,
                ChangePayload::CellValues {
                    record_ids: record_ids.clone(),
                    field_ids: field_ids.clone(),
                },
            );
            for field_id in field_ids {
                self.notify(
                    RecordStoreKey::CellValuesInField(field_id.clone()),
                    ChangePayload::CellValuesInField {
                        record_ids: record_ids.clone(),
                        field_id,
                    },
                );
            }
        }

        let cached: Vec<Record> = self.inner.records.borrow().values().cloned().collect();
        for record in cached {
            if let Some(record_dirty) = dirty.child(record.id()) {
                record.trigger(record_dirty);
            }
        }
        if !removed.is_empty() {
            self.inner
                .records
                .borrow_mut()
                .retain(|_, record| !record.is_deleted());
        }
    }

    fn notify(&self, key: RecordStoreKey, payload: ChangePayload) {
        self.inner.watchers.notify(self, &key, &payload);
    }
}

fn dedup(ids: &[String]) -> Vec<String> {
    let unique: IndexSet<&String> = ids.iter().collect();
    unique.into_iter().cloned().collect()
}
