use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use super::{node_path, ModelNode};
use crate::core::BaseCore;
use crate::dirty::DirtyPaths;
use crate::error::{Error, ModelKind, Result};
use crate::keys::RecordKey;
use crate::watchable::{ChangePayload, WatchRegistry, Watchable};

#[derive(Clone)]
pub struct Record {
    inner: Rc<RecordInner>,
}

struct RecordInner {
    core: Rc<BaseCore>,
    table_id: String,
    id: String,
    path: Vec<String>,
    watchers: WatchRegistry<Record>,
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record").field("id", &self.inner.id).finish()
    }
}

impl Watchable for Record {
    type Key = RecordKey;
    const KIND: ModelKind = ModelKind::Record;

    fn watch_registry(&self) -> &WatchRegistry<Self> {
        &self.inner.watchers
    }
}

impl ModelNode for Record {
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

impl Record {
    pub(crate) fn new(core: Rc<BaseCore>, table_id: &str, record_id: &str) -> Self {
        Self {
            inner: Rc::new(RecordInner {
                core,
                table_id: table_id.to_string(),
                id: record_id.to_string(),
                path: node_path(&["tablesById", table_id, "recordsById", record_id]),
                watchers: WatchRegistry::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn table_id(&self) -> &str {
        &self.inner.table_id
    }

    pub fn is_deleted(&self) -> bool {
        self.node_deleted()
    }

    pub fn ptr_eq(&self, other: &Record) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// The primary field's value rendered as a string.
    pub fn name(&self) -> Result<String> {
        let primary = self.primary_field_id();
        match primary {
            Some(field_id) => self.get_cell_value_as_string(&field_id),
            None => self.with_data(|_| String::new()),
        }
    }

    pub fn created_time(&self) -> Result<Option<String>> {
        self.optional_string_prop("createdTime")
    }

    pub fn comment_count(&self) -> Result<u64> {
        self.with_data(|obj| {
            obj.get("commentCount")
                .and_then(Value::as_u64)
                .unwrap_or(0)
        })
    }

    /// Raw cell value; `None` for an empty cell.
    ///
    /// Fails with [`Error::NotFound`] if the field does not exist, and with
    /// [`Error::Deleted`] once the record is gone.
    pub fn get_cell_value(&self, field_id: &str) -> Result<Option<Value>> {
        self.ensure_field(field_id)?;
        self.with_data(|obj| cell(obj, field_id).cloned())
    }

    pub fn get_cell_value_as_string(&self, field_id: &str) -> Result<String> {
        let field_type = self.ensure_field(field_id)?;
        let types = Rc::clone(&self.inner.core.types);
        self.with_data(|obj| types.cell_value_as_string(&field_type, cell(obj, field_id)))
    }

    fn ensure_field(&self, field_id: &str) -> Result<String> {
        self.inner
            .core
            .field_type(&self.inner.table_id, field_id)
            .ok_or_else(|| Error::not_found(ModelKind::Field, field_id))
    }

    fn primary_field_id(&self) -> Option<String> {
        self.inner.core.dispatcher.with_value(
            &["tablesById", self.table_id(), "primaryFieldId"],
            |value| value.and_then(Value::as_str).map(str::to_string),
        )
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

    fn notify(&self, key: RecordKey) {
        self.inner
            .watchers
            .notify(self, &key, &ChangePayload::None);
    }

    pub(crate) fn trigger(&self, dirty: &DirtyPaths) {
        let primary = self.primary_field_id();
        let cells_dirty = dirty.child("cellValuesByFieldId");

        let changed_fields: Vec<String> = match cells_dirty {
            Some(cells) if cells.is_dirty() => self.all_field_ids(),
            Some(cells) => cells.children().map(|(id, _)| id.to_string()).collect(),
            None => Vec::new(),
        };

        if !changed_fields.is_empty() {
            if primary
                .as_deref()
                .is_some_and(|p| changed_fields.iter().any(|f| f == p))
            {
                self.notify(RecordKey::Name);
            }
            self.notify(RecordKey::CellValues);
            for field_id in changed_fields {
                self.notify(RecordKey::CellValuesInField(field_id));
            }
        }
        if dirty.child("commentCount").is_some() {
            self.notify(RecordKey::CommentCount);
        }
    }
}

fn cell<'a>(record: &'a serde_json::Map<String, Value>, field_id: &str) -> Option<&'a Value> {
    record
        .get("cellValuesByFieldId")
        .and_then(|cells| cells.get(field_id))
        .filter(|v| !v.is_null())
}
