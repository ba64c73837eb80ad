use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::{Map, Value};

use super::{id_list, node_path, object_keys, Field, ModelNode, Record, View};
use crate::core::BaseCore;
use crate::dirty::DirtyPaths;
use crate::error::{Error, ModelKind, Result};
use crate::host::PermissionCheckResult;
use crate::ids::generate_id;
use crate::keys::TableKey;
use crate::mutations::{
    self, Mutation, MutationCompletion, PartialMutation, PartialRecordCellValues, RecordCellValues,
};
use crate::query::options::{FieldRef, RecordQueryOptions, ViewRef};
use crate::query::record_query::{self, RecordQueryResult};
use crate::stores::RecordStore;
use crate::watchable::{ChangePayload, WatchRegistry, Watchable};

/// Cell values to write to one existing record. Keys are field ids or names.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordUpdate {
    pub id: String,
    pub fields: Map<String, Value>,
}

impl RecordUpdate {
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }
}

#[derive(Clone)]
pub struct Table {
    inner: Rc<TableInner>,
}

/// Non-owning handle used by views, which the table itself caches.
#[derive(Clone)]
pub(crate) struct WeakTable(Weak<TableInner>);

impl WeakTable {
    pub(crate) fn upgrade(&self) -> Option<Table> {
        self.0.upgrade().map(|inner| Table { inner })
    }
}

struct TableInner {
    core: Rc<BaseCore>,
    id: String,
    path: Vec<String>,
    watchers: WatchRegistry<Table>,
    fields: RefCell<HashMap<String, Field>>,
    views: RefCell<HashMap<String, View>>,
    record_store: RecordStore,
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table").field("id", &self.inner.id).finish()
    }
}

impl Watchable for Table {
    type Key = TableKey;
    const KIND: ModelKind = ModelKind::Table;

    fn watch_registry(&self) -> &WatchRegistry<Self> {
        &self.inner.watchers
    }
}

impl ModelNode for Table {
    fn core(&self) -> &Rc<BaseCore> {
        &self.inner.core
    }

    fn node_id(&self) -> &str {
        &self.inner.id
    }

    fn data_path(&self) -> &[String] {
        &self.inner.path
    }
}

impl Table {
    pub(crate) fn new(core: Rc<BaseCore>, table_id: &str) -> Self {
        let record_store = RecordStore::new(Rc::clone(&core), table_id);
        Self {
            inner: Rc::new(TableInner {
                core,
                id: table_id.to_string(),
                path: node_path(&["tablesById", table_id]),
                watchers: WatchRegistry::new(),
                fields: RefCell::new(HashMap::new()),
                views: RefCell::new(HashMap::new()),
                record_store,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn is_deleted(&self) -> bool {
        self.node_deleted()
    }

    pub fn name(&self) -> Result<String> {
        self.string_prop("name")
    }

    pub fn description(&self) -> Result<Option<String>> {
        self.optional_string_prop("description")
    }

    pub fn primary_field_id(&self) -> Result<String> {
        self.string_prop("primaryFieldId")
    }

    pub fn primary_field(&self) -> Result<Field> {
        let field_id = self.primary_field_id()?;
        self.get_field_by_id(&field_id)
    }

    pub fn ptr_eq(&self, other: &Table) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> WeakTable {
        WeakTable(Rc::downgrade(&self.inner))
    }

    // Fields.

    pub fn field_ids(&self) -> Result<Vec<String>> {
        self.with_data(|obj| object_keys(obj, "fieldsById"))
    }

    pub fn fields(&self) -> Result<Vec<Field>> {
        Ok(self
            .field_ids()?
            .iter()
            .filter_map(|id| self.get_field_by_id_if_exists(id))
            .collect())
    }

    pub fn get_field_by_id_if_exists(&self, field_id: &str) -> Option<Field> {
        if !self
            .inner
            .core
            .dispatcher
            .exists(&["tablesById", self.id(), "fieldsById", field_id])
        {
            return None;
        }
        let mut fields = self.inner.fields.borrow_mut();
        let field = fields.entry(field_id.to_string()).or_insert_with(|| {
            Field::new(Rc::clone(&self.inner.core), self.id(), field_id)
        });
        Some(field.clone())
    }

    pub fn get_field_by_id(&self, field_id: &str) -> Result<Field> {
        self.ensure_exists()?;
        self.get_field_by_id_if_exists(field_id)
            .ok_or_else(|| Error::not_found(ModelKind::Field, field_id))
    }

    pub fn get_field_by_name_if_exists(&self, name: &str) -> Option<Field> {
        self.fields()
            .ok()?
            .into_iter()
            .find(|field| field.name().is_ok_and(|n| n == name))
    }

    pub fn get_field_by_name(&self, name: &str) -> Result<Field> {
        self.ensure_exists()?;
        self.get_field_by_name_if_exists(name)
            .ok_or_else(|| Error::not_found(ModelKind::Field, name))
    }

    /// Look a field up by id, falling back to name.
    pub fn get_field_if_exists(&self, id_or_name: &str) -> Option<Field> {
        self.get_field_by_id_if_exists(id_or_name)
            .or_else(|| self.get_field_by_name_if_exists(id_or_name))
    }

    pub fn get_field(&self, id_or_name: &str) -> Result<Field> {
        self.ensure_exists()?;
        self.get_field_if_exists(id_or_name)
            .ok_or_else(|| Error::not_found(ModelKind::Field, id_or_name))
    }

    pub(crate) fn resolve_field(&self, field: &FieldRef) -> Option<Field> {
        match field {
            FieldRef::Id(id) => self.get_field_by_id_if_exists(id),
            FieldRef::Name(name) => self.get_field_by_name_if_exists(name),
            FieldRef::IdOrName(key) => self.get_field_if_exists(key),
        }
    }

    // Views.

    pub fn view_ids(&self) -> Result<Vec<String>> {
        self.with_data(|obj| id_list(obj, "viewOrder"))
    }

    /// Views in `viewOrder` order.
    pub fn views(&self) -> Result<Vec<View>> {
        Ok(self
            .view_ids()?
            .iter()
            .filter_map(|id| self.get_view_by_id_if_exists(id))
            .collect())
    }

    pub fn get_view_by_id_if_exists(&self, view_id: &str) -> Option<View> {
        if !self
            .inner
            .core
            .dispatcher
            .exists(&["tablesById", self.id(), "viewsById", view_id])
        {
            return None;
        }
        let mut views = self.inner.views.borrow_mut();
        let view = views
            .entry(view_id.to_string())
            .or_insert_with(|| View::new(Rc::clone(&self.inner.core), self.downgrade(), view_id));
        Some(view.clone())
    }

    pub fn get_view_by_id(&self, view_id: &str) -> Result<View> {
        self.ensure_exists()?;
        self.get_view_by_id_if_exists(view_id)
            .ok_or_else(|| Error::not_found(ModelKind::View, view_id))
    }

    pub fn get_view_by_name_if_exists(&self, name: &str) -> Option<View> {
        self.views()
            .ok()?
            .into_iter()
            .find(|view| view.name().is_ok_and(|n| n == name))
    }

    pub fn get_view_by_name(&self, name: &str) -> Result<View> {
        self.ensure_exists()?;
        self.get_view_by_name_if_exists(name)
            .ok_or_else(|| Error::not_found(ModelKind::View, name))
    }

    pub fn get_view_if_exists(&self, id_or_name: &str) -> Option<View> {
        self.get_view_by_id_if_exists(id_or_name)
            .or_else(|| self.get_view_by_name_if_exists(id_or_name))
    }

    pub fn get_view(&self, id_or_name: &str) -> Result<View> {
        self.ensure_exists()?;
        self.get_view_if_exists(id_or_name)
            .ok_or_else(|| Error::not_found(ModelKind::View, id_or_name))
    }

    pub(crate) fn resolve_view(&self, view: &ViewRef) -> Option<View> {
        match view {
            ViewRef::Id(id) => self.get_view_by_id_if_exists(id),
            ViewRef::Name(name) => self.get_view_by_name_if_exists(name),
            ViewRef::IdOrName(key) => self.get_view_if_exists(key),
        }
    }

    // Records.

    pub fn record_store(&self) -> &RecordStore {
        &self.inner.record_store
    }

    /// `true` once any record data (all fields or some) has arrived.
    pub fn is_record_data_loaded(&self) -> bool {
        self.inner.record_store.has_any_data_loaded()
    }

    pub fn record_ids(&self) -> Result<Vec<String>> {
        self.ensure_records_loaded()?;
        Ok(self.inner.record_store.record_ids())
    }

    pub fn records(&self) -> Result<Vec<Record>> {
        self.ensure_records_loaded()?;
        Ok(self.inner.record_store.records())
    }

    pub fn get_record_by_id_if_exists(&self, record_id: &str) -> Option<Record> {
        self.inner.record_store.get_record_by_id_if_exists(record_id)
    }

    pub fn get_record_by_id(&self, record_id: &str) -> Result<Record> {
        self.ensure_records_loaded()?;
        self.get_record_by_id_if_exists(record_id)
            .ok_or_else(|| Error::not_found(ModelKind::Record, record_id))
    }

    // Queries.

    /// A live query over every record of the table. The result may be shared
    /// with other callers and starts unloaded.
    pub fn select_records(&self, options: RecordQueryOptions) -> Result<RecordQueryResult> {
        record_query::select(self, None, &options)
    }

    pub async fn select_records_async(
        &self,
        options: RecordQueryOptions,
    ) -> Result<RecordQueryResult> {
        let query = self.select_records(options)?;
        query.load_data().await?;
        Ok(query)
    }

    // Mutations.

    pub fn create_records_async(
        &self,
        records: Vec<Map<String, Value>>,
    ) -> Result<MutationCompletion> {
        let config = &self.inner.core.config;
        let mut resolved = Vec::with_capacity(records.len());
        for fields in records {
            resolved.push(RecordCellValues {
                id: generate_id(&config.record_id_prefix, config.generated_id_length),
                cell_values_by_field_id: self.resolve_field_keys(fields)?,
            });
        }
        mutations::apply_mutation(
            self,
            Mutation::CreateMultipleRecords {
                table_id: self.id().to_string(),
                records: resolved,
            },
        )
    }

    pub fn create_record_async(&self, fields: Map<String, Value>) -> Result<MutationCompletion> {
        self.create_records_async(vec![fields])
    }

    pub fn update_records_async(&self, updates: Vec<RecordUpdate>) -> Result<MutationCompletion> {
        let mut resolved = Vec::with_capacity(updates.len());
        for update in updates {
            resolved.push(RecordCellValues {
                id: update.id,
                cell_values_by_field_id: self.resolve_field_keys(update.fields)?,
            });
        }
        mutations::apply_mutation(
            self,
            Mutation::SetMultipleRecordsCellValues {
                table_id: self.id().to_string(),
                records: resolved,
            },
        )
    }

    pub fn update_record_async(
        &self,
        record_id: &str,
        fields: Map<String, Value>,
    ) -> Result<MutationCompletion> {
        self.update_records_async(vec![RecordUpdate::new(record_id, fields)])
    }

    pub fn delete_records_async(&self, record_ids: Vec<String>) -> Result<MutationCompletion> {
        mutations::apply_mutation(
            self,
            Mutation::DeleteMultipleRecords {
                table_id: self.id().to_string(),
                record_ids,
            },
        )
    }

    pub fn delete_record_async(&self, record_id: &str) -> Result<MutationCompletion> {
        self.delete_records_async(vec![record_id.to_string()])
    }

    /// Check a create without performing it. `None` asks whether creating
    /// records is possible at all.
    pub fn check_permissions_for_create_records(
        &self,
        records: Option<&[Map<String, Value>]>,
    ) -> PermissionCheckResult {
        let records = match records {
            None => None,
            Some(list) => {
                let mut partial = Vec::with_capacity(list.len());
                for fields in list {
                    match self.resolve_field_keys(fields.clone()) {
                        Ok(resolved) => partial.push(PartialRecordCellValues {
                            id: None,
                            cell_values_by_field_id: Some(resolved),
                        }),
                        Err(err) => return denied(&err),
                    }
                }
                Some(partial)
            }
        };
        mutations::check_permissions(
            self,
            &PartialMutation::CreateMultipleRecords {
                table_id: self.id().to_string(),
                records,
            },
        )
    }

    pub fn check_permissions_for_create_record(
        &self,
        fields: Option<&Map<String, Value>>,
    ) -> PermissionCheckResult {
        match fields {
            Some(fields) => {
                self.check_permissions_for_create_records(Some(std::slice::from_ref(fields)))
            }
            None => self.check_permissions_for_create_records(None),
        }
    }

    pub fn has_permission_to_create_records(&self, records: Option<&[Map<String, Value>]>) -> bool {
        self.check_permissions_for_create_records(records)
            .has_permission
    }

    pub fn has_permission_to_create_record(&self, fields: Option<&Map<String, Value>>) -> bool {
        self.check_permissions_for_create_record(fields)
            .has_permission
    }

    pub fn check_permissions_for_update_records(
        &self,
        updates: Option<&[RecordUpdate]>,
    ) -> PermissionCheckResult {
        let records = match updates {
            None => None,
            Some(list) => {
                let mut partial = Vec::with_capacity(list.len());
                for update in list {
                    match self.resolve_field_keys(update.fields.clone()) {
                        Ok(resolved) => partial.push(PartialRecordCellValues {
                            id: Some(update.id.clone()),
                            cell_values_by_field_id: Some(resolved),
                        }),
                        Err(err) => return denied(&err),
                    }
                }
                Some(partial)
            }
        };
        mutations::check_permissions(
            self,
            &PartialMutation::SetMultipleRecordsCellValues {
                table_id: self.id().to_string(),
                records,
            },
        )
    }

    /// Check an update where the record, the fields, or both may be unknown yet.
    pub fn check_permissions_for_update_record(
        &self,
        record_id: Option<&str>,
        fields: Option<&Map<String, Value>>,
    ) -> PermissionCheckResult {
        let cell_values = match fields.map(|f| self.resolve_field_keys(f.clone())) {
            None => None,
            Some(Ok(resolved)) => Some(resolved),
            Some(Err(err)) => return denied(&err),
        };
        mutations::check_permissions(
            self,
            &PartialMutation::SetMultipleRecordsCellValues {
                table_id: self.id().to_string(),
                records: Some(vec![PartialRecordCellValues {
                    id: record_id.map(str::to_string),
                    cell_values_by_field_id: cell_values,
                }]),
            },
        )
    }

    pub fn has_permission_to_update_records(&self, updates: Option<&[RecordUpdate]>) -> bool {
        self.check_permissions_for_update_records(updates)
            .has_permission
    }

    pub fn has_permission_to_update_record(
        &self,
        record_id: Option<&str>,
        fields: Option<&Map<String, Value>>,
    ) -> bool {
        self.check_permissions_for_update_record(record_id, fields)
            .has_permission
    }

    pub fn check_permissions_for_delete_records(
        &self,
        record_ids: Option<&[String]>,
    ) -> PermissionCheckResult {
        mutations::check_permissions(
            self,
            &PartialMutation::DeleteMultipleRecords {
                table_id: self.id().to_string(),
                record_ids: record_ids.map(<[String]>::to_vec),
            },
        )
    }

    pub fn check_permissions_for_delete_record(&self, record_id: Option<&str>) -> PermissionCheckResult {
        let ids = record_id.map(|id| vec![id.to_string()]);
        self.check_permissions_for_delete_records(ids.as_deref())
    }

    pub fn has_permission_to_delete_records(&self, record_ids: Option<&[String]>) -> bool {
        self.check_permissions_for_delete_records(record_ids)
            .has_permission
    }

    pub fn has_permission_to_delete_record(&self, record_id: Option<&str>) -> bool {
        self.check_permissions_for_delete_record(record_id)
            .has_permission
    }

    /// Translate id-or-name keys to field ids.
    fn resolve_field_keys(&self, fields: Map<String, Value>) -> Result<Map<String, Value>> {
        self.ensure_exists()?;
        let mut resolved = Map::with_capacity(fields.len());
        for (key, value) in fields {
            let field = self
                .get_field_if_exists(&key)
                .ok_or_else(|| Error::validation(format!("Unknown field '{key}'")))?;
            resolved.insert(field.id().to_string(), value);
        }
        Ok(resolved)
    }

    fn ensure_exists(&self) -> Result<()> {
        if self.is_deleted() {
            return Err(Error::deleted(ModelKind::Table, self.id()));
        }
        Ok(())
    }

    fn ensure_records_loaded(&self) -> Result<()> {
        self.ensure_exists()?;
        if !self.is_record_data_loaded() {
            return Err(Error::DataNotLoaded {
                kind: ModelKind::Table,
                id: self.id().to_string(),
            });
        }
        Ok(())
    }

    // Dispatch.

    /// Whether a change under a table touches its schema: name, primary
    /// field, any field, the view list or a view's name or type.
    pub(crate) fn is_schema_dirty(dirty: &DirtyPaths) -> bool {
        if dirty.is_dirty()
            || dirty.child("name").is_some()
            || dirty.child("primaryFieldId").is_some()
            || dirty.child("fieldsById").is_some()
            || dirty.child("viewOrder").is_some()
        {
            return true;
        }
        dirty.child("viewsById").is_some_and(|views| {
            views.has_dirty_child()
                || views
                    .children()
                    .any(|(_, view)| view.child("name").is_some() || view.child("type").is_some())
        })
    }

    fn notify(&self, key: TableKey) {
        self.inner
            .watchers
            .notify(self, &key, &ChangePayload::None);
    }

    pub(crate) fn trigger(&self, dirty: &DirtyPaths) {
        let fields_dirty = dirty.child("fieldsById");
        let views_dirty = dirty.child("viewsById");

        if dirty.child("name").is_some() {
            self.notify(TableKey::Name);
        }
        if dirty.child("description").is_some() {
            self.notify(TableKey::Description);
        }
        if dirty.child("primaryFieldId").is_some() {
            self.notify(TableKey::PrimaryField);
        }
        if fields_dirty.is_some_and(DirtyPaths::has_dirty_child) {
            self.notify(TableKey::Fields);
        }
        if dirty.child("viewOrder").is_some() || views_dirty.is_some_and(DirtyPaths::has_dirty_child)
        {
            self.notify(TableKey::Views);
        }
        if Self::is_schema_dirty(dirty) {
            self.notify(TableKey::Schema);
        }

        if let Some(fields_dirty) = fields_dirty {
            let cached: Vec<Field> = self.inner.fields.borrow().values().cloned().collect();
            for field in cached {
                if let Some(field_dirty) = fields_dirty.child(field.id()) {
                    field.trigger(field_dirty);
                }
            }
            self.inner
                .fields
                .borrow_mut()
                .retain(|_, field| !field.is_deleted());
        }

        if let Some(views_dirty) = views_dirty {
            let cached: Vec<View> = self.inner.views.borrow().values().cloned().collect();
            for view in cached {
                if let Some(view_dirty) = views_dirty.child(view.id()) {
                    view.trigger(view_dirty);
                }
            }
            self.inner
                .views
                .borrow_mut()
                .retain(|_, view| !view.is_deleted());
        }

        if let Some(records_dirty) = dirty.child("recordsById") {
            self.inner.record_store.trigger(records_dirty);
        }
    }
}

fn denied(err: &Error) -> PermissionCheckResult {
    PermissionCheckResult::denied(
        err.display_reason()
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string()),
    )
}
