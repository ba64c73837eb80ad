use std::rc::Rc;

use futures::future::LocalBoxFuture;
use futures::task::{LocalSpawn, LocalSpawnExt};
use tracing::warn;

use crate::clock::Clock;
use crate::config::BaseConfig;
use crate::dispatcher::Dispatcher;
use crate::host::Host;
use crate::pool::ObjectPool;
use crate::query::record_query::RecordQueryPolicy;
use crate::query::view_metadata::ViewMetadataPolicy;
use crate::type_provider::TypeProvider;

/// State shared by every object belonging to one base.
pub(crate) struct BaseCore {
    pub(crate) dispatcher: Dispatcher,
    pub(crate) host: Rc<dyn Host>,
    pub(crate) types: Rc<dyn TypeProvider>,
    pub(crate) config: BaseConfig,
    pub(crate) spawner: Rc<dyn LocalSpawn>,
    pub(crate) record_queries: ObjectPool<RecordQueryPolicy>,
    pub(crate) view_metadata: ObjectPool<ViewMetadataPolicy>,
}

impl BaseCore {
    pub(crate) fn new(
        dispatcher: Dispatcher,
        host: Rc<dyn Host>,
        types: Rc<dyn TypeProvider>,
        config: BaseConfig,
        clock: Rc<dyn Clock>,
        spawner: Rc<dyn LocalSpawn>,
    ) -> Self {
        let ttl = config.weak_pool_ttl();
        Self {
            dispatcher,
            host,
            types,
            config,
            spawner,
            record_queries: ObjectPool::new(Rc::clone(&clock), ttl),
            view_metadata: ObjectPool::new(clock, ttl),
        }
    }

    /// Drive `future` on the host executor so it completes even if nobody awaits it.
    pub(crate) fn spawn(&self, future: LocalBoxFuture<'static, ()>) {
        if let Err(err) = self.spawner.spawn_local(future) {
            warn!(%err, "executor refused background load; it will only progress when awaited");
        }
    }

    pub(crate) fn field_type(&self, table_id: &str, field_id: &str) -> Option<String> {
        self.dispatcher.with_value(
            &["tablesById", table_id, "fieldsById", field_id, "type"],
            |value| value.and_then(|v| v.as_str()).map(str::to_string),
        )
    }
}
