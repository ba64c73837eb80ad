use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use futures::future::{self, LocalBoxFuture};
use futures::FutureExt;
use tracing::{debug, error, warn};

use crate::core::BaseCore;
use crate::error::{Error, ModelKind, Result};
use crate::keys::{TableKey, ViewDataKey, ViewMetadataKey};
use crate::models::{Field, ModelNode, Table, View};
use crate::pool::PoolPolicy;
use crate::stores::loadable::{LoadStep, LoadTracker, SharedLoad};
use crate::stores::ViewDataStore;
use crate::watchable::{ChangePayload, WatchCallback, WatchRegistry, Watchable};

/// Live field order and visibility for one view.
#[derive(Clone)]
pub struct ViewMetadataQueryResult {
    inner: Rc<MetadataInner>,
}

struct MetadataInner {
    core: Rc<BaseCore>,
    table: Table,
    view: View,
    watchers: WatchRegistry<ViewMetadataQueryResult>,
    load: LoadTracker,
    watching: RefCell<Option<Watching>>,
}

struct Watching {
    store_callback: WatchCallback<ViewDataStore>,
    table_callback: WatchCallback<Table>,
}

impl fmt::Debug for ViewMetadataQueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewMetadataQueryResult")
            .field("view", &self.inner.view.id())
            .field("loaded", &self.is_data_loaded())
            .finish()
    }
}

impl Watchable for ViewMetadataQueryResult {
    type Key = ViewMetadataKey;
    const KIND: ModelKind = ModelKind::ViewMetadataQuery;

    fn watch_registry(&self) -> &WatchRegistry<Self> {
        &self.inner.watchers
    }
}

pub(crate) fn select(table: &Table, view: &View) -> Result<ViewMetadataQueryResult> {
    let core = Rc::clone(table.core());
    if let Some(found) = core.view_metadata.get_object_for_reuse(view.id()) {
        return Ok(found);
    }
    let metadata = ViewMetadataQueryResult {
        inner: Rc::new(MetadataInner {
            core: Rc::clone(&core),
            table: table.clone(),
            view: view.clone(),
            watchers: WatchRegistry::new(),
            load: LoadTracker::new(),
            watching: RefCell::new(None),
        }),
    };
    debug!(view_id = %view.id(), "created view metadata query");
    core.view_metadata.register_weak(metadata.clone());
    Ok(metadata)
}

impl ViewMetadataQueryResult {
    pub fn view(&self) -> &View {
        &self.inner.view
    }

    pub fn ptr_eq(&self, other: &ViewMetadataQueryResult) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_data_loaded(&self) -> bool {
        self.inner.load.is_loaded()
    }

    fn store(&self) -> &ViewDataStore {
        self.inner.view.data_store()
    }

    fn ensure_loaded(&self) -> Result<()> {
        if !self.is_data_loaded() {
            return Err(Error::DataNotLoaded {
                kind: ModelKind::ViewMetadataQuery,
                id: self.inner.view.id().to_string(),
            });
        }
        Ok(())
    }

    /// Every field of the view, in view order.
    pub fn all_fields(&self) -> Result<Vec<Field>> {
        self.ensure_loaded()?;
        Ok(self.resolve(self.store().all_field_ids()))
    }

    /// Fields shown in the view, in view order.
    pub fn visible_fields(&self) -> Result<Vec<Field>> {
        self.ensure_loaded()?;
        Ok(self.resolve(self.store().visible_field_ids()))
    }

    fn resolve(&self, ids: Vec<String>) -> Vec<Field> {
        ids.iter()
            .filter_map(|id| self.inner.table.get_field_by_id_if_exists(id))
            .collect()
    }

    pub fn load_data(&self) -> LocalBoxFuture<'static, Result<()>> {
        if self.inner.view.is_deleted() {
            return future::ready(Err(Error::deleted(ModelKind::View, self.inner.view.id())))
                .boxed_local();
        }
        let first = self.inner.load.retain_count() == 0;
        let step = self.inner.load.retain();
        if first {
            self.inner.core.view_metadata.register_strong(self.clone());
        }
        let generation = match step {
            LoadStep::Loaded => return future::ready(Ok(())).boxed_local(),
            LoadStep::Pending(pending) => return pending.boxed_local(),
            LoadStep::Start(generation) => generation,
        };
        let store_load = self.store().load_data();
        let target = Rc::downgrade(&self.inner);
        let load: SharedLoad = async move {
            let result = store_load.await;
            let Some(metadata) = upgrade(&target) else {
                return Ok(());
            };
            match result {
                Ok(()) => {
                    if metadata.inner.load.finish(generation) {
                        metadata.did_load();
                    } else {
                        warn!(view_id = %metadata.inner.view.id(), "discarding view metadata load finished after unload");
                    }
                    Ok(())
                }
                Err(err) => {
                    if metadata.inner.load.fail(generation) {
                        metadata.did_unload();
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

    pub fn unload_data(&self) {
        if self.inner.load.release() {
            self.did_unload();
        }
    }

    fn did_load(&self) {
        let target = Rc::downgrade(&self.inner);
        let store_callback = {
            let target = Weak::clone(&target);
            WatchCallback::new(move |_: &ViewDataStore, key: &ViewDataKey, _: &ChangePayload| {
                let Some(metadata) = upgrade(&target) else {
                    return;
                };
                match key {
                    ViewDataKey::AllFieldIds => metadata.notify(ViewMetadataKey::AllFields),
                    ViewDataKey::VisibleFieldIds => metadata.notify(ViewMetadataKey::VisibleFields),
                    _ => {}
                }
            })
        };
        let table_callback = WatchCallback::new(move |_: &Table, _: &TableKey, _: &ChangePayload| {
            if let Some(metadata) = upgrade(&target) {
                metadata.notify(ViewMetadataKey::AllFields);
                metadata.notify(ViewMetadataKey::VisibleFields);
            }
        });
        let watched = self
            .store()
            .watch(
                [ViewDataKey::AllFieldIds, ViewDataKey::VisibleFieldIds],
                &store_callback,
                None,
            )
            .and_then(|_| {
                self.inner
                    .table
                    .watch([TableKey::Fields], &table_callback, None)
            });
        if let Err(err) = watched {
            error!(%err, "view metadata query failed to subscribe");
        }
        *self.inner.watching.borrow_mut() = Some(Watching {
            store_callback,
            table_callback,
        });
        debug!(view_id = %self.inner.view.id(), "view metadata loaded");
    }

    fn did_unload(&self) {
        let watching = self.inner.watching.borrow_mut().take();
        if let Some(watching) = watching {
            self.store().unwatch(
                [ViewDataKey::AllFieldIds, ViewDataKey::VisibleFieldIds],
                &watching.store_callback,
                None,
            );
            self.inner
                .table
                .unwatch([TableKey::Fields], &watching.table_callback, None);
        }
        self.store().unload_data();
        let pool = &self.inner.core.view_metadata;
        if let Err(err) = pool.unregister_strong(self) {
            error!(%err, view_id = %self.inner.view.id(), "view metadata pool out of balance");
        }
        pool.register_weak(self.clone());
    }

    fn notify(&self, key: ViewMetadataKey) {
        self.inner
            .watchers
            .notify(self, &key, &ChangePayload::None);
    }
}

fn upgrade(target: &Weak<MetadataInner>) -> Option<ViewMetadataQueryResult> {
    target
        .upgrade()
        .map(|inner| ViewMetadataQueryResult { inner })
}

pub(crate) struct ViewMetadataPolicy;

impl PoolPolicy for ViewMetadataPolicy {
    type Object = ViewMetadataQueryResult;
    type Options = str;

    fn key_from_object(object: &ViewMetadataQueryResult) -> String {
        object.inner.view.id().to_string()
    }

    fn key_from_options(view_id: &str) -> String {
        view_id.to_string()
    }

    fn can_reuse(object: &ViewMetadataQueryResult, view_id: &str) -> bool {
        object.inner.view.id() == view_id
    }

    fn is_same(a: &ViewMetadataQueryResult, b: &ViewMetadataQueryResult) -> bool {
        a.ptr_eq(b)
    }
}
