use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use super::{node_path, ModelNode};
use crate::core::BaseCore;
use crate::dirty::DirtyPaths;
use crate::error::{ModelKind, Result};
use crate::keys::FieldKey;
use crate::watchable::{ChangePayload, WatchRegistry, Watchable};

#[derive(Clone)]
pub struct Field {
    inner: Rc<FieldInner>,
}

struct FieldInner {
    core: Rc<BaseCore>,
    table_id: String,
    id: String,
    path: Vec<String>,
    watchers: WatchRegistry<Field>,
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field").field("id", &self.inner.id).finish()
    }
}

impl Watchable for Field {
    type Key = FieldKey;
    const KIND: ModelKind = ModelKind::Field;

    fn watch_registry(&self) -> &WatchRegistry<Self> {
        &self.inner.watchers
    }
}

impl ModelNode for Field {
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

impl Field {
    pub(crate) fn new(core: Rc<BaseCore>, table_id: &str, field_id: &str) -> Self {
        Self {
            inner: Rc::new(FieldInner {
                core,
                table_id: table_id.to_string(),
                id: field_id.to_string(),
                path: node_path(&["tablesById", table_id, "fieldsById", field_id]),
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

    pub fn name(&self) -> Result<String> {
        self.string_prop("name")
    }

    pub fn field_type(&self) -> Result<String> {
        self.string_prop("type")
    }

    pub fn description(&self) -> Result<Option<String>> {
        self.optional_string_prop("description")
    }

    /// Type-specific configuration, e.g. select choices.
    pub fn options(&self) -> Result<Option<Value>> {
        self.with_data(|obj| obj.get("options").filter(|v| !v.is_null()).cloned())
    }

    /// Computed fields cannot be written by mutations.
    pub fn is_computed(&self) -> Result<bool> {
        let field_type = self.field_type()?;
        Ok(self.inner.core.types.is_computed(&field_type))
    }

    pub fn is_primary_field(&self) -> Result<bool> {
        let primary = self.inner.core.dispatcher.with_value(
            &["tablesById", self.table_id(), "primaryFieldId"],
            |value| value.and_then(Value::as_str).map(str::to_string),
        );
        self.with_data(|_| primary.as_deref() == Some(self.id()))
    }

    pub fn ptr_eq(&self, other: &Field) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn notify(&self, key: FieldKey) {
        self.inner
            .watchers
            .notify(self, &key, &ChangePayload::None);
    }

    pub(crate) fn trigger(&self, dirty: &DirtyPaths) {
        if dirty.is_dirty() {
            for key in [
                FieldKey::Name,
                FieldKey::Type,
                FieldKey::Options,
                FieldKey::Description,
                FieldKey::IsComputed,
            ] {
                self.notify(key);
            }
            return;
        }
        if dirty.child("name").is_some() {
            self.notify(FieldKey::Name);
        }
        if dirty.child("type").is_some() {
            self.notify(FieldKey::Type);
            self.notify(FieldKey::IsComputed);
        }
        if dirty.child("options").is_some() {
            self.notify(FieldKey::Options);
        }
        if dirty.child("description").is_some() {
            self.notify(FieldKey::Description);
        }
    }
}
