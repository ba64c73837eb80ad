use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use futures::future::{self, LocalBoxFuture};
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, warn};

use super::loadable::{LoadStep, LoadTracker, SharedLoad};
use crate::core::BaseCore;
use crate::dirty::DirtyPaths;
use crate::dispatcher::ModelUpdate;
use crate::error::{ModelKind, Result};
use crate::host::{FieldOrder, ViewData};
use crate::keys::ViewDataKey;
use crate::models::node_path;
use crate::watchable::{ChangePayload, WatchRegistry, Watchable};

/// Per-view data: which records are visible, field order, row colors.
#[derive(Clone)]
pub struct ViewDataStore {
    inner: Rc<ViewDataStoreInner>,
}

struct ViewDataStoreInner {
    core: Rc<BaseCore>,
    table_id: String,
    view_id: String,
    path: Vec<String>,
    watchers: WatchRegistry<ViewDataStore>,
    tracker: LoadTracker,
    last_visible: RefCell<Vec<String>>,
}

impl Watchable for ViewDataStore {
    type Key = ViewDataKey;
    const KIND: ModelKind = ModelKind::ViewDataStore;

    fn watch_registry(&self) -> &WatchRegistry<Self> {
        &self.inner.watchers
    }
}

impl ViewDataStore {
    pub(crate) fn new(core: Rc<BaseCore>, table_id: &str, view_id: &str) -> Self {
        let path = node_path(&["tablesById", table_id, "viewsById", view_id]);
        let store = Self {
            inner: Rc::new(ViewDataStoreInner {
                core,
                table_id: table_id.to_string(),
                view_id: view_id.to_string(),
                path,
                watchers: WatchRegistry::new(),
                tracker: LoadTracker::new(),
                last_visible: RefCell::new(Vec::new()),
            }),
        };
        *store.inner.last_visible.borrow_mut() = store.visible_record_ids();
        store
    }

    pub fn view_id(&self) -> &str {
        &self.inner.view_id
    }

    pub fn is_data_loaded(&self) -> bool {
        self.inner.tracker.is_loaded()
    }

    /// Visible record ids in view order.
    pub fn visible_record_ids(&self) -> Vec<String> {
        self.read("visibleRecordIds", |value| {
            value
                .and_then(Value::as_array)
                .map(|ids| {
                    ids.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    pub fn is_record_visible(&self, record_id: &str) -> bool {
        self.visible_record_ids().iter().any(|id| id == record_id)
    }

    pub fn field_order(&self) -> FieldOrder {
        self.read("fieldOrder", |value| {
            value
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default()
        })
    }

    /// Every field of the view in view order, skipping ids that no longer
    /// exist on the table.
    pub fn all_field_ids(&self) -> Vec<String> {
        let order = self.field_order();
        order
            .field_ids
            .into_iter()
            .filter(|id| self.field_exists(id))
            .collect()
    }

    pub fn visible_field_ids(&self) -> Vec<String> {
        let order = self.field_order();
        order
            .field_ids
            .into_iter()
            .take(order.visible_field_count)
            .filter(|id| self.field_exists(id))
            .collect()
    }

    pub fn color_for_record(&self, record_id: &str) -> Option<String> {
        self.inner.core.dispatcher.with_value(
            &[
                "tablesById",
                self.inner.table_id.as_str(),
                "viewsById",
                self.inner.view_id.as_str(),
                "colorsByRecordId",
                record_id,
            ],
            |value| value.and_then(Value::as_str).map(str::to_string),
        )
    }

    fn field_exists(&self, field_id: &str) -> bool {
        self.inner.core.dispatcher.exists(&[
            "tablesById",
            self.inner.table_id.as_str(),
            "fieldsById",
            field_id,
        ])
    }

    fn read<R>(&self, key: &str, f: impl FnOnce(Option<&Value>) -> R) -> R {
        let mut at = self.inner.path.clone();
        at.push(key.to_string());
        self.inner.core.dispatcher.with_value(&at, f)
    }

    pub fn load_data(&self) -> LocalBoxFuture<'static, Result<()>> {
        let generation = match self.inner.tracker.retain() {
            LoadStep::Loaded => return future::ready(Ok(())).boxed_local(),
            LoadStep::Pending(pending) => return pending.boxed_local(),
            LoadStep::Start(generation) => generation,
        };
        debug!(view_id = %self.view_id(), "loading view data");
        let fetch = self
            .inner
            .core
            .host
            .fetch_view_data(&self.inner.table_id, &self.inner.view_id);
        let target = Rc::downgrade(&self.inner);
        let load: SharedLoad = async move {
            let result = fetch.await;
            let Some(inner) = target.upgrade() else {
                return Ok(());
            };
            let store = ViewDataStore { inner };
            match result {
                Ok(data) => {
                    if store.inner.tracker.finish(generation) {
                        store.apply_fetched(data);
                    } else {
                        warn!(view_id = %store.view_id(), "discarding view data fetched after unload");
                    }
                    Ok(())
                }
                Err(err) => {
                    store.inner.tracker.fail(generation);
                    warn!(view_id = %store.view_id(), %err, "view data fetch failed");
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
            debug!(view_id = %self.view_id(), "unloaded view data");
            self.inner
                .core
                .host
                .unsubscribe_from_view_data(&self.inner.table_id, &self.inner.view_id);
        }
    }

    fn apply_fetched(&self, data: ViewData) {
        let dispatcher = &self.inner.core.dispatcher;
        if !dispatcher.exists(&self.inner.path) {
            debug!(view_id = %self.view_id(), "view deleted before its data arrived");
            return;
        }
        let at = |key: &str| {
            let mut path = self.inner.path.clone();
            path.push(key.to_string());
            path
        };
        let field_order = serde_json::to_value(&data.field_order).unwrap_or(Value::Null);
        let updates = vec![
            ModelUpdate::set_at(
                &at("visibleRecordIds"),
                Value::Array(
                    data.visible_record_ids
                        .into_iter()
                        .map(Value::String)
                        .collect(),
                ),
            ),
            ModelUpdate::set_at(&at("fieldOrder"), field_order),
            ModelUpdate::new(
                at("colorsByRecordId"),
                data.colors_by_record_id.map(Value::Object),
            ),
        ];
        dispatcher.apply(&updates);
    }

    fn notify(&self, key: ViewDataKey, payload: ChangePayload) {
        self.inner.watchers.notify(self, &key, &payload);
    }

    /// `dirty` is the tree for the whole view node.
    pub(crate) fn trigger(&self, dirty: &DirtyPaths) {
        if dirty.child("visibleRecordIds").is_some() {
            let current = self.visible_record_ids();
            let previous = self.inner.last_visible.replace(current.clone());
            if previous != current {
                let before: HashSet<&String> = previous.iter().collect();
                let after: HashSet<&String> = current.iter().collect();
                let added = current
                    .iter()
                    .filter(|id| !before.contains(id))
                    .cloned()
                    .collect();
                let removed = previous
                    .iter()
                    .filter(|id| !after.contains(id))
                    .cloned()
                    .collect();
                self.notify(
                    ViewDataKey::VisibleRecordIds,
                    ChangePayload::record_ids_changed(added, removed),
                );
            }
        }
        if let Some(colors) = dirty.child("colorsByRecordId") {
            let record_ids = if colors.is_dirty() {
                None
            } else {
                Some(colors.children().map(|(id, _)| id.to_string()).collect())
            };
            self.notify(
                ViewDataKey::RecordColors,
                ChangePayload::RecordColors { record_ids },
            );
        }
        if dirty.child("fieldOrder").is_some() {
            self.notify(ViewDataKey::AllFieldIds, ChangePayload::None);
            self.notify(ViewDataKey::VisibleFieldIds, ChangePayload::None);
        }
    }
}
