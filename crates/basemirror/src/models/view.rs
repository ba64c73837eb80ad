use std::fmt;
use std::rc::Rc;

use super::table::WeakTable;
use super::{node_path, ModelNode, Table};
use crate::core::BaseCore;
use crate::dirty::DirtyPaths;
use crate::error::{Error, ModelKind, Result};
use crate::keys::ViewKey;
use crate::query::options::RecordQueryOptions;
use crate::query::record_query::{self, RecordQueryResult};
use crate::query::view_metadata::{self, ViewMetadataQueryResult};
use crate::stores::ViewDataStore;
use crate::watchable::{ChangePayload, WatchRegistry, Watchable};

#[derive(Clone)]
pub struct View {
    inner: Rc<ViewInner>,
}

struct ViewInner {
    core: Rc<BaseCore>,
    table: WeakTable,
    table_id: String,
    id: String,
    path: Vec<String>,
    watchers: WatchRegistry<View>,
    data_store: ViewDataStore,
}

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View").field("id", &self.inner.id).finish()
    }
}

impl Watchable for View {
    type Key = ViewKey;
    const KIND: ModelKind = ModelKind::View;

    fn watch_registry(&self) -> &WatchRegistry<Self> {
        &self.inner.watchers
    }
}

impl ModelNode for View {
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

impl View {
    pub(crate) fn new(core: Rc<BaseCore>, table: WeakTable, view_id: &str) -> Self {
        let table_id = table
            .upgrade()
            .map(|t| t.id().to_string())
            .unwrap_or_default();
        let data_store = ViewDataStore::new(Rc::clone(&core), &table_id, view_id);
        Self {
            inner: Rc::new(ViewInner {
                path: node_path(&["tablesById", table_id.as_str(), "viewsById", view_id]),
                core,
                table,
                table_id,
                id: view_id.to_string(),
                watchers: WatchRegistry::new(),
                data_store,
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

    /// `grid`, `form`, `calendar`, ...
    pub fn view_type(&self) -> Result<String> {
        self.string_prop("type")
    }

    pub fn is_locked(&self) -> Result<bool> {
        self.with_data(|obj| {
            obj.get("isLocked")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false)
        })
    }

    pub fn table(&self) -> Result<Table> {
        self.inner
            .table
            .upgrade()
            .ok_or_else(|| Error::deleted(ModelKind::Table, &self.inner.table_id))
    }

    pub fn data_store(&self) -> &ViewDataStore {
        &self.inner.data_store
    }

    pub fn ptr_eq(&self, other: &View) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// A live query over the records visible in this view, in view order
    /// unless `options` sorts them.
    pub fn select_records(&self, options: RecordQueryOptions) -> Result<RecordQueryResult> {
        if self.is_deleted() {
            return Err(Error::deleted(ModelKind::View, self.id()));
        }
        let table = self.table()?;
        record_query::select(&table, Some(self.clone()), &options)
    }

    pub async fn select_records_async(
        &self,
        options: RecordQueryOptions,
    ) -> Result<RecordQueryResult> {
        let query = self.select_records(options)?;
        query.load_data().await?;
        Ok(query)
    }

    /// Field order and visibility for this view.
    pub fn select_metadata(&self) -> Result<ViewMetadataQueryResult> {
        if self.is_deleted() {
            return Err(Error::deleted(ModelKind::View, self.id()));
        }
        let table = self.table()?;
        view_metadata::select(&table, self)
    }

    pub async fn select_metadata_async(&self) -> Result<ViewMetadataQueryResult> {
        let metadata = self.select_metadata()?;
        metadata.load_data().await?;
        Ok(metadata)
    }

    fn notify(&self, key: ViewKey) {
        self.inner
            .watchers
            .notify(self, &key, &ChangePayload::None);
    }

    pub(crate) fn trigger(&self, dirty: &DirtyPaths) {
        if dirty.child("name").is_some() {
            self.notify(ViewKey::Name);
        }
        if dirty.child("type").is_some() {
            self.notify(ViewKey::Type);
        }
        if dirty.child("isLocked").is_some() {
            self.notify(ViewKey::IsLocked);
        }
        self.inner.data_store.trigger(dirty);
    }
}
