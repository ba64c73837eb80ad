//! The capabilities the engine consumes from its embedding host.

use futures::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dispatcher::ModelUpdate;
use crate::error::HostError;
use crate::mutations::{Mutation, PartialMutation};

/// Handle for an active host subscription. Dropping it unsubscribes.
pub struct HostSubscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl HostSubscription {
    pub fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to tear down.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for HostSubscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldOrder {
    pub field_ids: Vec<String>,
    pub visible_field_count: usize,
}

/// Per-view data fetched on demand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ViewData {
    pub visible_record_ids: Vec<String>,
    pub field_order: FieldOrder,
    pub colors_by_record_id: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionCheckResult {
    pub has_permission: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_display_string: Option<String>,
}

impl PermissionCheckResult {
    pub fn allowed() -> Self {
        Self {
            has_permission: true,
            reason_display_string: None,
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            has_permission: false,
            reason_display_string: Some(reason.into()),
        }
    }
}

/// Transport and policy supplied by the embedding application.
///
/// Fetch and write futures are started when the method is called; the engine
/// may drop a future without polling it to completion.
pub trait Host {
    fn initial_snapshot(&self) -> Value;

    /// Deliver remote update batches to `on_batch` until the subscription is dropped.
    fn subscribe_to_model_updates(&self, on_batch: Box<dyn Fn(Vec<ModelUpdate>)>)
        -> HostSubscription;

    /// Fetch `recordsById` for a table, restricted to `field_ids` when given,
    /// and keep those records flowing through model updates.
    fn fetch_table_data(
        &self,
        table_id: &str,
        field_ids: Option<&[String]>,
    ) -> LocalBoxFuture<'static, Result<Map<String, Value>, HostError>>;

    fn unsubscribe_from_table_data(&self, table_id: &str, field_ids: Option<&[String]>);

    fn fetch_view_data(
        &self,
        table_id: &str,
        view_id: &str,
    ) -> LocalBoxFuture<'static, Result<ViewData, HostError>>;

    fn unsubscribe_from_view_data(&self, table_id: &str, view_id: &str);

    fn check_permission(&self, mutation: &PartialMutation) -> PermissionCheckResult;

    fn write(&self, mutation: &Mutation) -> LocalBoxFuture<'static, Result<(), HostError>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_subscription_cancels_once() {
        let count = Rc::new(Cell::new(0));
        let counter = Rc::clone(&count);
        let sub = HostSubscription::new(move || counter.set(counter.get() + 1));
        sub.cancel();
        assert_eq!(count.get(), 1);

        let counter = Rc::clone(&count);
        drop(HostSubscription::new(move || counter.set(counter.get() + 1)));
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn test_view_data_from_host_json() {
        let data: ViewData = serde_json::from_value(json!({
            "visibleRecordIds": ["recA", "recB"],
            "fieldOrder": {"fieldIds": ["fld1", "fld2"], "visibleFieldCount": 1}
        }))
        .unwrap();
        assert_eq!(data.visible_record_ids, vec!["recA", "recB"]);
        assert_eq!(data.field_order.visible_field_count, 1);
        assert_eq!(data.colors_by_record_id, None);
    }
}
