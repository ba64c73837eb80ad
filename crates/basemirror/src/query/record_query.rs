//! Live, ordered, pooled record queries.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use futures::future::{self, LocalBoxFuture};
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, error, trace, warn};

use super::options::{
    normalize, FieldRef, NormalizedColorMode, NormalizedQueryOptions, NormalizedSort,
    RecordQueryOptions, SortDirection,
};
use super::vis_list::VisList;
use crate::core::BaseCore;
use crate::error::{Error, ModelKind, Result};
use crate::keys::{FieldKey, RecordQueryKey, RecordStoreKey, TableKey, ViewDataKey};
use crate::models::{Field, ModelNode, Record, Table, View};
use crate::pool::PoolPolicy;
use crate::stores::loadable::{LoadStep, LoadTracker, SharedLoad};
use crate::stores::{RecordStore, ViewDataStore};
use crate::watchable::{ChangePayload, WatchCallback, WatchRegistry, Watchable};

/// Cancels one watch registration when dropped or cancelled.
struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    fn watch<M>(model: &M, keys: Vec<M::Key>, callback: WatchCallback<M>) -> Result<Self>
    where
        M: Watchable + Clone + 'static,
    {
        model.watch(keys.clone(), &callback, None)?;
        let model = model.clone();
        Ok(Self {
            cancel: Some(Box::new(move || {
                model.unwatch(keys, &callback, None);
            })),
        })
    }

    fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// Store retains taken by one load, released by the matching unload.
struct StoreRetain {
    fields: Option<Vec<String>>,
    view_store: Option<ViewDataStore>,
}

struct ColorSubscription {
    store: ViewDataStore,
    subscription: Subscription,
}

#[derive(Default)]
struct QueryState {
    vis: VisList,
    sorts: Vec<NormalizedSort>,
    retained: Option<StoreRetain>,
    subscriptions: Vec<Subscription>,
    sort_field_subscriptions: HashMap<String, Subscription>,
    colors: Option<ColorSubscription>,
}

/// A live ordered set of records from a table or a view.
///
/// Results are shared: selecting with equivalent options returns the same
/// instance while it is pooled. A result starts unloaded; `load_data` and
/// `unload_data` are reference counted, and only a loaded result tracks
/// changes and fires notifications.
#[derive(Clone)]
pub struct RecordQueryResult {
    inner: Rc<QueryInner>,
}

struct QueryInner {
    core: Rc<BaseCore>,
    table: Table,
    view: Option<View>,
    normalized: NormalizedQueryOptions,
    fingerprint: String,
    parent_key: String,
    watchers: WatchRegistry<RecordQueryResult>,
    load: LoadTracker,
    state: RefCell<QueryState>,
}

impl fmt::Debug for RecordQueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordQueryResult")
            .field("parent", &self.inner.parent_key)
            .field("fingerprint", &self.inner.fingerprint)
            .field("loaded", &self.is_data_loaded())
            .finish()
    }
}

impl Watchable for RecordQueryResult {
    type Key = RecordQueryKey;
    const KIND: ModelKind = ModelKind::RecordQuery;

    fn watch_registry(&self) -> &WatchRegistry<Self> {
        &self.inner.watchers
    }

    fn validate_watch_key(&self, key: &RecordQueryKey) -> Result<()> {
        match key.field_id() {
            Some(field_id) if !self.is_field_requested(field_id) => Err(Error::UnrequestedField {
                field_id: field_id.to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn did_add_watch(&self, key: &RecordQueryKey) {
        if *key == RecordQueryKey::RecordColors {
            self.ensure_color_subscription();
        }
    }

    fn did_remove_watch(&self, key: &RecordQueryKey) {
        if *key == RecordQueryKey::RecordColors
            && !self.inner.watchers.has_watchers(&RecordQueryKey::RecordColors)
        {
            self.teardown_color_subscription();
        }
    }
}

pub(crate) fn select(
    table: &Table,
    view: Option<View>,
    options: &RecordQueryOptions,
) -> Result<RecordQueryResult> {
    if table.is_deleted() {
        return Err(Error::deleted(ModelKind::Table, table.id()));
    }
    let normalized = normalize(table, options)?;
    let lookup = QueryLookup {
        parent_key: view
            .as_ref()
            .map_or_else(|| table.id().to_string(), |v| v.id().to_string()),
        fingerprint: normalized.fingerprint()?,
    };
    let core = Rc::clone(table.core());
    if let Some(found) = core.record_queries.get_object_for_reuse(&lookup) {
        return Ok(found);
    }
    let sorts = normalized.sorts.clone();
    let query = RecordQueryResult {
        inner: Rc::new(QueryInner {
            core: Rc::clone(&core),
            table: table.clone(),
            view,
            normalized,
            fingerprint: lookup.fingerprint,
            parent_key: lookup.parent_key,
            watchers: WatchRegistry::new(),
            load: LoadTracker::new(),
            state: RefCell::new(QueryState {
                sorts,
                ..QueryState::default()
            }),
        }),
    };
    debug!(parent = %query.inner.parent_key, fingerprint = %query.inner.fingerprint, "created record query");
    core.record_queries.register_weak(query.clone());
    Ok(query)
}

impl RecordQueryResult {
    pub fn table(&self) -> &Table {
        &self.inner.table
    }

    pub fn view(&self) -> Option<&View> {
        self.inner.view.as_ref()
    }

    pub fn normalized_options(&self) -> &NormalizedQueryOptions {
        &self.inner.normalized
    }

    pub fn fingerprint(&self) -> &str {
        &self.inner.fingerprint
    }

    pub fn ptr_eq(&self, other: &RecordQueryResult) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_data_loaded(&self) -> bool {
        self.inner.load.is_loaded()
    }

    fn record_store(&self) -> &RecordStore {
        self.inner.table.record_store()
    }

    fn view_store(&self) -> Option<&ViewDataStore> {
        self.inner.view.as_ref().map(View::data_store)
    }

    fn is_field_requested(&self, field_id: &str) -> bool {
        match &self.inner.normalized.field_ids_or_null {
            Some(ids) => ids.iter().any(|id| id == field_id),
            None => true,
        }
    }

    fn ensure_loaded(&self) -> Result<()> {
        if !self.is_data_loaded() {
            return Err(Error::DataNotLoaded {
                kind: ModelKind::RecordQuery,
                id: self.inner.parent_key.clone(),
            });
        }
        Ok(())
    }

    // Data access.

    /// Record ids in query order.
    pub fn record_ids(&self) -> Result<Vec<String>> {
        self.ensure_loaded()?;
        Ok(self.inner.state.borrow().vis.ids().to_vec())
    }

    pub fn records(&self) -> Result<Vec<Record>> {
        let ids = self.record_ids()?;
        let store = self.record_store();
        Ok(ids
            .iter()
            .filter_map(|id| store.get_record_by_id_if_exists(id))
            .collect())
    }

    pub fn size(&self) -> Result<usize> {
        self.ensure_loaded()?;
        Ok(self.inner.state.borrow().vis.len())
    }

    pub fn has_record(&self, record_id: &str) -> bool {
        self.is_data_loaded() && self.inner.state.borrow().vis.contains(record_id)
    }

    pub fn get_record_by_id_if_exists(&self, record_id: &str) -> Option<Record> {
        if !self.has_record(record_id) {
            return None;
        }
        self.record_store().get_record_by_id_if_exists(record_id)
    }

    pub fn get_record_by_id(&self, record_id: &str) -> Result<Record> {
        self.ensure_loaded()?;
        self.get_record_by_id_if_exists(record_id)
            .ok_or_else(|| Error::not_found(ModelKind::Record, record_id))
    }

    /// The requested fields, in projection order. Every field of the table
    /// when the query was made without a projection.
    pub fn fields(&self) -> Result<Vec<Field>> {
        match &self.inner.normalized.field_ids_or_null {
            None => self.inner.table.fields(),
            Some(ids) => Ok(ids
                .iter()
                .filter_map(|id| self.inner.table.get_field_by_id_if_exists(id))
                .collect()),
        }
    }

    /// A cell of a record in this query. The field must be part of the
    /// projection.
    pub fn get_cell_value(
        &self,
        record_id: &str,
        field: impl Into<FieldRef>,
    ) -> Result<Option<Value>> {
        let field_id = self.requested_field_id(field.into())?;
        if !self.has_record(record_id) {
            return Err(Error::not_found(ModelKind::Record, record_id));
        }
        Ok(self.record_store().get_cell_value(record_id, &field_id))
    }

    pub fn get_cell_value_as_string(
        &self,
        record_id: &str,
        field: impl Into<FieldRef>,
    ) -> Result<String> {
        let field_id = self.requested_field_id(field.into())?;
        if !self.has_record(record_id) {
            return Err(Error::not_found(ModelKind::Record, record_id));
        }
        let field_type = self
            .inner
            .core
            .field_type(self.inner.table.id(), &field_id)
            .unwrap_or_default();
        let value = self.record_store().get_cell_value(record_id, &field_id);
        Ok(self
            .inner
            .core
            .types
            .cell_value_as_string(&field_type, value.as_ref()))
    }

    fn requested_field_id(&self, field: FieldRef) -> Result<String> {
        self.ensure_loaded()?;
        let field_id = match self.inner.table.resolve_field(&field) {
            Some(field) => field.id().to_string(),
            None => {
                let label = match field {
                    FieldRef::Id(s) | FieldRef::Name(s) | FieldRef::IdOrName(s) => s,
                };
                return Err(Error::not_found(ModelKind::Field, &label));
            }
        };
        if !self.is_field_requested(&field_id) {
            return Err(Error::UnrequestedField { field_id });
        }
        Ok(field_id)
    }

    /// The record's color under the query's coloring mode.
    pub fn get_record_color(&self, record_id: &str) -> Result<Option<String>> {
        self.ensure_loaded()?;
        if !self.has_record(record_id) {
            return Err(Error::not_found(ModelKind::Record, record_id));
        }
        Ok(match &self.inner.normalized.record_color_mode {
            NormalizedColorMode::None => None,
            NormalizedColorMode::BySelectField { field_id } => {
                let field_type = self.inner.core.field_type(self.inner.table.id(), field_id);
                let value = self.record_store().get_cell_value(record_id, field_id);
                field_type.and_then(|field_type| {
                    self.inner
                        .core
                        .types
                        .select_option_color(&field_type, value.as_ref())
                })
            }
            NormalizedColorMode::ByView { view_id } => self
                .inner
                .table
                .get_view_by_id_if_exists(view_id)
                .and_then(|view| view.data_store().color_for_record(record_id)),
        })
    }

    // Loading.

    /// Load the data this query needs and start tracking changes.
    ///
    /// Callers arriving while a load is in flight share it. Each call must
    /// be balanced by one [`unload_data`](Self::unload_data).
    pub fn load_data(&self) -> LocalBoxFuture<'static, Result<()>> {
        if self.inner.table.is_deleted() {
            return future::ready(Err(Error::deleted(ModelKind::Table, self.inner.table.id())))
                .boxed_local();
        }
        let first = self.inner.load.retain_count() == 0;
        let step = self.inner.load.retain();
        if first {
            self.inner.core.record_queries.register_strong(self.clone());
        }
        let generation = match step {
            LoadStep::Loaded => return future::ready(Ok(())).boxed_local(),
            LoadStep::Pending(pending) => return pending.boxed_local(),
            LoadStep::Start(generation) => generation,
        };

        debug!(parent = %self.inner.parent_key, "loading record query");
        let store = self.record_store();
        let fields = self.inner.normalized.fields_to_load();
        let mut loads = vec![match &fields {
            None => store.load_data(),
            Some(ids) => store.load_fields(ids),
        }];
        let view_store = self.view_store().cloned();
        if let Some(view_store) = &view_store {
            loads.push(view_store.load_data());
        }
        self.inner.state.borrow_mut().retained = Some(StoreRetain { fields, view_store });

        let target = Rc::downgrade(&self.inner);
        let load: SharedLoad = async move {
            let result = future::try_join_all(loads).await;
            let Some(inner) = target.upgrade() else {
                return Ok(());
            };
            let query = RecordQueryResult { inner };
            match result {
                Ok(_) => {
                    if query.inner.load.finish(generation) {
                        query.did_load();
                    } else {
                        warn!(parent = %query.inner.parent_key, "discarding record query load finished after unload");
                    }
                    Ok(())
                }
                Err(err) => {
                    if query.inner.load.fail(generation) {
                        query.did_unload();
                    }
                    Err(err)
                }
            }
        }
        .boxed_local()
        .shared();
        self.inner.load.begin(generation, load.clone());
        self.inner.core.spawn(load.clone().map(|_| ()).boxed_local());
        load.boxed_local()
    }

    /// Release one load. At zero the query stops tracking and drops back to
    /// the pool's weak retention. Extra calls are ignored.
    pub fn unload_data(&self) {
        if self.inner.load.release() {
            self.did_unload();
        }
    }

    fn did_load(&self) {
        let mut subscriptions = Vec::new();
        let target = Rc::downgrade(&self.inner);
        let store = self.record_store().clone();

        let on_record_ids = {
            let target = Weak::clone(&target);
            WatchCallback::new(move |_: &RecordStore, _: &RecordStoreKey, payload: &ChangePayload| {
                if let (Some(query), ChangePayload::RecordIds { added_record_ids, removed_record_ids }) =
                    (upgrade(&target), payload)
                {
                    query.on_store_record_ids(added_record_ids, removed_record_ids);
                }
            })
        };
        let on_cell_values = {
            let target = Weak::clone(&target);
            WatchCallback::new(move |_: &RecordStore, _: &RecordStoreKey, payload: &ChangePayload| {
                if let (Some(query), ChangePayload::CellValues { record_ids, field_ids }) =
                    (upgrade(&target), payload)
                {
                    query.on_cell_values(record_ids, field_ids);
                }
            })
        };
        let on_fields = {
            let target = Weak::clone(&target);
            WatchCallback::new(move |_: &Table, _: &TableKey, _: &ChangePayload| {
                if let Some(query) = upgrade(&target) {
                    query.on_table_fields();
                }
            })
        };
        let results = [
            Subscription::watch(&store, vec![RecordStoreKey::RecordIds], on_record_ids),
            Subscription::watch(&store, vec![RecordStoreKey::CellValues], on_cell_values),
            Subscription::watch(&self.inner.table, vec![TableKey::Fields], on_fields),
        ];
        for result in results {
            match result {
                Ok(subscription) => subscriptions.push(subscription),
                Err(err) => error!(%err, "record query failed to subscribe"),
            }
        }

        if let Some(view_store) = self.view_store() {
            let target = Weak::clone(&target);
            let on_visible = WatchCallback::new(
                move |_: &ViewDataStore, _: &ViewDataKey, _: &ChangePayload| {
                    if let Some(query) = upgrade(&target) {
                        query.rederive();
                    }
                },
            );
            match Subscription::watch(view_store, vec![ViewDataKey::VisibleRecordIds], on_visible) {
                Ok(subscription) => subscriptions.push(subscription),
                Err(err) => error!(%err, "record query failed to subscribe to view data"),
            }
        }

        let sort_field_ids: Vec<String> = self
            .inner
            .state
            .borrow()
            .sorts
            .iter()
            .map(|sort| sort.field_id.clone())
            .collect();
        let mut sort_field_subscriptions = HashMap::new();
        for field_id in sort_field_ids {
            if sort_field_subscriptions.contains_key(&field_id) {
                continue;
            }
            let Some(field) = self.inner.table.get_field_by_id_if_exists(&field_id) else {
                continue;
            };
            let target = Weak::clone(&target);
            let on_type = WatchCallback::new(move |field: &Field, _: &FieldKey, _: &ChangePayload| {
                if let Some(query) = upgrade(&target) {
                    query.on_sort_field_type(field.id());
                }
            });
            match Subscription::watch(&field, vec![FieldKey::Type], on_type) {
                Ok(subscription) => {
                    sort_field_subscriptions.insert(field_id, subscription);
                }
                Err(err) => error!(%err, "record query failed to subscribe to a sort field"),
            }
        }

        let base = self.base_order();
        self.with_comparator(|compare| {
            let mut state = self.inner.state.borrow_mut();
            state.vis.replace(base, compare);
            state.subscriptions = subscriptions;
            state.sort_field_subscriptions = sort_field_subscriptions;
        });
        debug!(parent = %self.inner.parent_key, size = self.inner.state.borrow().vis.len(), "record query loaded");
        self.ensure_color_subscription();
    }

    fn did_unload(&self) {
        let (subscriptions, sort_field_subscriptions, retained) = {
            let mut state = self.inner.state.borrow_mut();
            state.vis.clear();
            (
                std::mem::take(&mut state.subscriptions),
                std::mem::take(&mut state.sort_field_subscriptions),
                state.retained.take(),
            )
        };
        for subscription in subscriptions {
            subscription.cancel();
        }
        for (_, subscription) in sort_field_subscriptions {
            subscription.cancel();
        }
        self.teardown_color_subscription();
        if let Some(retained) = retained {
            match &retained.fields {
                None => self.record_store().unload_data(),
                Some(ids) => self.record_store().unload_fields(ids),
            }
            if let Some(view_store) = &retained.view_store {
                view_store.unload_data();
            }
        }

        let pool = &self.inner.core.record_queries;
        if let Err(err) = pool.unregister_strong(self) {
            error!(%err, parent = %self.inner.parent_key, "record query pool out of balance");
        }
        pool.register_weak(self.clone());
        debug!(parent = %self.inner.parent_key, "record query unloaded");
    }

    // Ordering.

    /// Records in their underlying order: the view's visible order for a
    /// view query, the table's record order otherwise.
    fn base_order(&self) -> Vec<String> {
        let store = self.record_store();
        match self.view_store() {
            Some(view_store) => view_store
                .visible_record_ids()
                .into_iter()
                .filter(|id| store.has_record(id))
                .collect(),
            None => store.record_ids(),
        }
    }

    fn should_include(&self, record_id: &str) -> bool {
        match self.view_store() {
            Some(view_store) => view_store.is_record_visible(record_id),
            None => true,
        }
    }

    /// Run `f` with the query's current comparator: the active sorts in
    /// order, then underlying order.
    fn with_comparator<R>(&self, f: impl FnOnce(&dyn Fn(&str, &str) -> Ordering) -> R) -> R {
        let table_id = self.inner.table.id();
        let sorts: Vec<(String, String, SortDirection)> = self
            .inner
            .state
            .borrow()
            .sorts
            .iter()
            .filter_map(|sort| {
                let field_type = self.inner.core.field_type(table_id, &sort.field_id)?;
                Some((sort.field_id.clone(), field_type, sort.direction))
            })
            .collect();
        let base: HashMap<String, usize> = self
            .base_order()
            .into_iter()
            .enumerate()
            .map(|(index, id)| (id, index))
            .collect();
        let types = Rc::clone(&self.inner.core.types);
        let snapshot = self.inner.core.dispatcher.snapshot();
        let records = basemirror_path::get(&snapshot, &["tablesById", table_id, "recordsById"]);
        let cell = |record_id: &str, field_id: &str| {
            records
                .and_then(|records| records.get(record_id))
                .and_then(|record| record.get("cellValuesByFieldId"))
                .and_then(|cells| cells.get(field_id))
                .filter(|value| !value.is_null())
        };
        let compare = |a: &str, b: &str| {
            for (field_id, field_type, direction) in &sorts {
                let ordering = types.compare_cell_values(
                    field_type,
                    cell(a, field_id.as_str()),
                    cell(b, field_id.as_str()),
                );
                let ordering = match direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            let position = |id: &str| base.get(id).copied().unwrap_or(usize::MAX);
            position(a).cmp(&position(b)).then_with(|| a.cmp(b))
        };
        f(&compare)
    }

    fn notify(&self, key: RecordQueryKey, payload: ChangePayload) {
        self.inner.watchers.notify(self, &key, &payload);
    }

    // Change handling.

    fn on_store_record_ids(&self, added: &[String], removed: &[String]) {
        let mut added_out = Vec::new();
        let mut removed_out = Vec::new();
        {
            let mut state = self.inner.state.borrow_mut();
            for id in removed {
                if state.vis.remove(id) {
                    removed_out.push(id.clone());
                }
            }
        }
        let candidates: Vec<&String> = added.iter().filter(|id| self.should_include(id)).collect();
        if !candidates.is_empty() {
            self.with_comparator(|compare| {
                let mut state = self.inner.state.borrow_mut();
                for id in candidates {
                    if state.vis.insert_sorted(id, compare) {
                        added_out.push(id.clone());
                    }
                }
            });
        }
        if !added_out.is_empty() || !removed_out.is_empty() {
            trace!(added = added_out.len(), removed = removed_out.len(), "record query membership changed");
            self.notify(
                RecordQueryKey::RecordIds,
                ChangePayload::record_ids_changed(added_out, removed_out),
            );
        }
    }

    fn on_cell_values(&self, record_ids: &[String], field_ids: &[String]) {
        let members: Vec<String> = {
            let state = self.inner.state.borrow();
            record_ids
                .iter()
                .filter(|id| state.vis.contains(id))
                .cloned()
                .collect()
        };
        if members.is_empty() {
            return;
        }

        let sort_touched = {
            let state = self.inner.state.borrow();
            state
                .sorts
                .iter()
                .any(|sort| field_ids.contains(&sort.field_id))
        };
        if sort_touched {
            let moved = self.with_comparator(|compare| {
                self.inner.state.borrow_mut().vis.reposition(&members, compare)
            });
            if moved {
                self.notify(
                    RecordQueryKey::RecordIds,
                    ChangePayload::record_ids_changed(Vec::new(), Vec::new()),
                );
            }
        }

        let requested: Vec<String> = field_ids
            .iter()
            .filter(|id| self.is_field_requested(id))
            .cloned()
            .collect();
        if !requested.is_empty() {
            self.notify(
                RecordQueryKey::CellValues,
                ChangePayload::CellValues {
                    record_ids: members.clone(),
                    field_ids: requested.clone(),
                },
            );
            for field_id in requested {
                self.notify(
                    RecordQueryKey::CellValuesInField(field_id.clone()),
                    ChangePayload::CellValuesInField {
                        record_ids: members.clone(),
                        field_id,
                    },
                );
            }
        }

        if let Some(color_field) = self.inner.normalized.color_field_id() {
            if field_ids.iter().any(|id| id == color_field) {
                self.notify(
                    RecordQueryKey::RecordColors,
                    ChangePayload::RecordColors {
                        record_ids: Some(members),
                    },
                );
            }
        }
    }

    /// Bring membership and order back in line with the underlying records.
    /// Only ids that joined or left move; the rest are re-sorted when the
    /// comparator no longer agrees with their order.
    fn rederive(&self) {
        let base = self.base_order();
        let (added, removed, reordered) = self.with_comparator(|compare| {
            self.inner.state.borrow_mut().vis.sync(&base, compare)
        });
        if reordered || !added.is_empty() || !removed.is_empty() {
            self.notify(
                RecordQueryKey::RecordIds,
                ChangePayload::record_ids_changed(added, removed),
            );
        }
    }

    /// Drop sorts on fields that no longer exist. The current order is kept.
    fn on_table_fields(&self) {
        let table = &self.inner.table;
        let dropped: Vec<Subscription> = {
            let mut state = self.inner.state.borrow_mut();
            let before = state.sorts.len();
            state
                .sorts
                .retain(|sort| table.get_field_by_id_if_exists(&sort.field_id).is_some());
            if state.sorts.len() == before {
                return;
            }
            let live: Vec<String> = state.sorts.iter().map(|s| s.field_id.clone()).collect();
            let gone: Vec<String> = state
                .sort_field_subscriptions
                .keys()
                .filter(|id| !live.contains(id))
                .cloned()
                .collect();
            gone.iter()
                .filter_map(|id| state.sort_field_subscriptions.remove(id))
                .collect()
        };
        debug!(parent = %self.inner.parent_key, "sort field deleted; dropped from ordering");
        for subscription in dropped {
            subscription.cancel();
        }
    }

    fn on_sort_field_type(&self, field_id: &str) {
        let still_sorted = self
            .inner
            .state
            .borrow()
            .sorts
            .iter()
            .any(|sort| sort.field_id == field_id);
        if still_sorted && self.inner.table.get_field_by_id_if_exists(field_id).is_some() {
            debug!(parent = %self.inner.parent_key, field_id, "sort field type changed; re-deriving order");
            self.rederive();
        }
    }

    // View coloring.

    fn ensure_color_subscription(&self) {
        let NormalizedColorMode::ByView { view_id } = &self.inner.normalized.record_color_mode else {
            return;
        };
        if !self.is_data_loaded()
            || !self.inner.watchers.has_watchers(&RecordQueryKey::RecordColors)
            || self.inner.state.borrow().colors.is_some()
        {
            return;
        }
        let Some(view) = self.inner.table.get_view_by_id_if_exists(view_id) else {
            return;
        };
        let store = view.data_store().clone();
        // The store drives its own load; the future is only for callers that wait.
        let _ = store.load_data();
        let target = Rc::downgrade(&self.inner);
        let on_colors = WatchCallback::new(move |_: &ViewDataStore, _: &ViewDataKey, _: &ChangePayload| {
            if let Some(query) = upgrade(&target) {
                if query.is_data_loaded() {
                    query.notify(
                        RecordQueryKey::RecordColors,
                        ChangePayload::RecordColors { record_ids: None },
                    );
                }
            }
        });
        match Subscription::watch(&store, vec![ViewDataKey::RecordColors], on_colors) {
            Ok(subscription) => {
                self.inner.state.borrow_mut().colors = Some(ColorSubscription { store, subscription });
            }
            Err(err) => {
                store.unload_data();
                error!(%err, "record query failed to subscribe to view colors");
            }
        }
    }

    /// Safe to call when no color subscription exists.
    fn teardown_color_subscription(&self) {
        let colors = self.inner.state.borrow_mut().colors.take();
        if let Some(ColorSubscription { store, subscription }) = colors {
            subscription.cancel();
            store.unload_data();
        }
    }
}

fn upgrade(target: &Weak<QueryInner>) -> Option<RecordQueryResult> {
    target.upgrade().map(|inner| RecordQueryResult { inner })
}

/// Pool lookup for record queries: the parent (table or view) plus the
/// normalized options fingerprint.
pub(crate) struct QueryLookup {
    parent_key: String,
    fingerprint: String,
}

pub(crate) struct RecordQueryPolicy;

impl PoolPolicy for RecordQueryPolicy {
    type Object = RecordQueryResult;
    type Options = QueryLookup;

    fn key_from_object(object: &RecordQueryResult) -> String {
        object.inner.parent_key.clone()
    }

    fn key_from_options(options: &QueryLookup) -> String {
        options.parent_key.clone()
    }

    fn can_reuse(object: &RecordQueryResult, options: &QueryLookup) -> bool {
        object.inner.fingerprint == options.fingerprint
    }

    fn is_same(a: &RecordQueryResult, b: &RecordQueryResult) -> bool {
        a.ptr_eq(b)
    }
}
