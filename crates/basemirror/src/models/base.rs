use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use futures::task::LocalSpawn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{id_list, ModelNode, Session, Table};
use crate::clock::{Clock, SystemClock};
use crate::config::{BaseConfig, ConfigError};
use crate::core::BaseCore;
use crate::dirty::DirtyPaths;
use crate::dispatcher::{Dispatcher, ModelUpdate};
use crate::error::{Error, ModelKind, Result};
use crate::host::{Host, HostSubscription};
use crate::keys::BaseKey;
use crate::type_provider::{StructuralTypeProvider, TypeProvider};
use crate::watchable::{ChangePayload, WatchRegistry, Watchable};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collaborator {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub profile_pic_url: Option<String>,
}

impl Collaborator {
    pub(crate) fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

pub struct BaseBuilder {
    host: Rc<dyn Host>,
    spawner: Rc<dyn LocalSpawn>,
    types: Option<Rc<dyn TypeProvider>>,
    config: BaseConfig,
    clock: Option<Rc<dyn Clock>>,
}

impl BaseBuilder {
    pub fn type_provider(mut self, types: Rc<dyn TypeProvider>) -> Self {
        self.types = Some(types);
        self
    }

    pub fn config(mut self, config: BaseConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Rc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Read the host's initial snapshot and start following its updates.
    pub fn connect(self) -> Result<Base, ConfigError> {
        self.config.validate()?;
        let snapshot = self.host.initial_snapshot();
        let id = snapshot
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let types = self
            .types
            .unwrap_or_else(|| Rc::new(StructuralTypeProvider::new()));
        let clock = self.clock.unwrap_or_else(|| Rc::new(SystemClock));
        let core = Rc::new(BaseCore::new(
            Dispatcher::new(snapshot),
            Rc::clone(&self.host),
            types,
            self.config,
            clock,
            self.spawner,
        ));
        let inner = Rc::new(BaseInner {
            session: Session::new(Rc::clone(&core)),
            core,
            id,
            path: Vec::new(),
            watchers: WatchRegistry::new(),
            tables: RefCell::new(HashMap::new()),
            subscription: RefCell::new(None),
        });

        let walker_target = Rc::downgrade(&inner);
        inner.core.dispatcher.set_walker(Rc::new(move |dirty: &DirtyPaths| {
            if let Some(inner) = walker_target.upgrade() {
                Base { inner }.trigger(dirty);
            }
        }));

        let update_target = Rc::downgrade(&inner);
        let subscription = self
            .host
            .subscribe_to_model_updates(Box::new(move |updates: Vec<ModelUpdate>| {
                if let Some(inner) = update_target.upgrade() {
                    inner.core.dispatcher.apply(&updates);
                }
            }));
        *inner.subscription.borrow_mut() = Some(subscription);
        debug!(base_id = %inner.id, "connected base");
        Ok(Base { inner })
    }
}

/// Root of the model tree.
#[derive(Clone)]
pub struct Base {
    inner: Rc<BaseInner>,
}

struct BaseInner {
    core: Rc<BaseCore>,
    id: String,
    path: Vec<String>,
    watchers: WatchRegistry<Base>,
    tables: RefCell<HashMap<String, Table>>,
    session: Session,
    subscription: RefCell<Option<HostSubscription>>,
}

impl Drop for BaseInner {
    fn drop(&mut self) {
        // Pooled queries hold the core; release them so it can be freed.
        self.core.record_queries.clear();
        self.core.view_metadata.clear();
    }
}

impl fmt::Debug for Base {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Base").field("id", &self.inner.id).finish()
    }
}

impl Watchable for Base {
    type Key = BaseKey;
    const KIND: ModelKind = ModelKind::Base;

    fn watch_registry(&self) -> &WatchRegistry<Self> {
        &self.inner.watchers
    }
}

impl ModelNode for Base {
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

impl Base {
    pub fn builder(host: Rc<dyn Host>, spawner: Rc<dyn LocalSpawn>) -> BaseBuilder {
        BaseBuilder {
            host,
            spawner,
            types: None,
            config: BaseConfig::default(),
            clock: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn name(&self) -> String {
        self.string_prop("name").unwrap_or_default()
    }

    pub fn permission_level(&self) -> String {
        self.string_prop("permissionLevel").unwrap_or_default()
    }

    pub fn config(&self) -> &BaseConfig {
        &self.inner.core.config
    }

    pub fn session(&self) -> Session {
        self.inner.session.clone()
    }

    /// Apply a batch of updates pushed by the host.
    pub fn apply_updates(&self, updates: &[ModelUpdate]) -> usize {
        self.inner.core.dispatcher.apply(updates)
    }

    /// Read any snapshot value by dotted path.
    pub fn read(&self, dotted: &str) -> Option<Value> {
        self.inner
            .core
            .dispatcher
            .read(&basemirror_path::parse_path(dotted))
    }

    /// Number of dirty trees the dispatcher has delivered.
    pub fn dispatch_count(&self) -> u64 {
        self.inner.core.dispatcher.batch_count()
    }

    pub fn table_ids(&self) -> Vec<String> {
        self.with_data(|obj| id_list(obj, "tableOrder"))
            .unwrap_or_default()
    }

    /// Tables in `tableOrder` order.
    pub fn tables(&self) -> Vec<Table> {
        self.table_ids()
            .iter()
            .filter_map(|id| self.get_table_by_id_if_exists(id))
            .collect()
    }

    pub fn get_table_by_id_if_exists(&self, table_id: &str) -> Option<Table> {
        if !self
            .inner
            .core
            .dispatcher
            .exists(&["tablesById", table_id])
        {
            return None;
        }
        let mut tables = self.inner.tables.borrow_mut();
        let table = tables
            .entry(table_id.to_string())
            .or_insert_with(|| Table::new(Rc::clone(&self.inner.core), table_id));
        Some(table.clone())
    }

    pub fn get_table_by_id(&self, table_id: &str) -> Result<Table> {
        self.get_table_by_id_if_exists(table_id)
            .ok_or_else(|| Error::not_found(ModelKind::Table, table_id))
    }

    pub fn get_table_by_name_if_exists(&self, name: &str) -> Option<Table> {
        self.tables()
            .into_iter()
            .find(|table| table.name().is_ok_and(|n| n == name))
    }

    pub fn get_table_by_name(&self, name: &str) -> Result<Table> {
        self.get_table_by_name_if_exists(name)
            .ok_or_else(|| Error::not_found(ModelKind::Table, name))
    }

    /// Look a table up by id, falling back to name.
    pub fn get_table_if_exists(&self, id_or_name: &str) -> Option<Table> {
        self.get_table_by_id_if_exists(id_or_name)
            .or_else(|| self.get_table_by_name_if_exists(id_or_name))
    }

    pub fn get_table(&self, id_or_name: &str) -> Result<Table> {
        self.get_table_if_exists(id_or_name)
            .ok_or_else(|| Error::not_found(ModelKind::Table, id_or_name))
    }

    pub fn collaborators(&self) -> Vec<Collaborator> {
        self.with_data(|obj| {
            obj.get("collaboratorsById")
                .and_then(Value::as_object)
                .map(|by_id| by_id.values().filter_map(Collaborator::from_value).collect())
                .unwrap_or_default()
        })
        .unwrap_or_default()
    }

    pub fn get_collaborator_by_id_if_exists(&self, user_id: &str) -> Option<Collaborator> {
        self.inner.core.dispatcher.with_value(
            &["collaboratorsById", user_id],
            |value| value.and_then(Collaborator::from_value),
        )
    }

    pub fn active_collaborators(&self) -> Vec<Collaborator> {
        let ids = self
            .with_data(|obj| id_list(obj, "activeCollaboratorIds"))
            .unwrap_or_default();
        ids.iter()
            .filter_map(|id| self.get_collaborator_by_id_if_exists(id))
            .collect()
    }

    fn notify(&self, key: BaseKey) {
        self.inner
            .watchers
            .notify(self, &key, &ChangePayload::None);
    }

    fn trigger(&self, dirty: &DirtyPaths) {
        let tables_dirty = dirty.child("tablesById");
        let tables_changed = dirty.child("tableOrder").is_some()
            || tables_dirty.is_some_and(DirtyPaths::has_dirty_child);
        let schema_changed = tables_changed
            || tables_dirty.is_some_and(|tables| {
                tables
                    .children()
                    .any(|(_, table)| Table::is_schema_dirty(table))
            });

        if dirty.child("name").is_some() {
            self.notify(BaseKey::Name);
        }
        if dirty.child("permissionLevel").is_some() {
            self.notify(BaseKey::PermissionLevel);
        }
        if tables_changed {
            self.notify(BaseKey::Tables);
        }
        if dirty.child("collaboratorsById").is_some()
            || dirty.child("activeCollaboratorIds").is_some()
        {
            self.notify(BaseKey::Collaborators);
        }

        self.inner.session.trigger(dirty);

        if let Some(tables_dirty) = tables_dirty {
            let cached: Vec<Table> = self.inner.tables.borrow().values().cloned().collect();
            for table in cached {
                if let Some(table_dirty) = tables_dirty.child(table.id()) {
                    table.trigger(table_dirty);
                }
            }
            self.inner
                .tables
                .borrow_mut()
                .retain(|_, table| !table.is_deleted());
        }

        if schema_changed {
            self.notify(BaseKey::Schema);
        }
    }
}
