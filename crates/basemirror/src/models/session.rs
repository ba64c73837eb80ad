use std::rc::Rc;

use super::base::Collaborator;
use super::ModelNode;
use crate::core::BaseCore;
use crate::dirty::DirtyPaths;
use crate::error::ModelKind;
use crate::keys::SessionKey;
use crate::watchable::{ChangePayload, WatchRegistry, Watchable};

const PERMISSION_LEVELS: &[&str] = &["none", "read", "comment", "edit", "create", "owner"];

fn permission_rank(level: &str) -> Option<usize> {
    PERMISSION_LEVELS.iter().position(|l| *l == level)
}

/// The current user's view of the base.
#[derive(Clone)]
pub struct Session {
    inner: Rc<SessionInner>,
}

struct SessionInner {
    core: Rc<BaseCore>,
    path: Vec<String>,
    watchers: WatchRegistry<Session>,
}

impl Watchable for Session {
    type Key = SessionKey;
    const KIND: ModelKind = ModelKind::Session;

    fn watch_registry(&self) -> &WatchRegistry<Self> {
        &self.inner.watchers
    }
}

impl ModelNode for Session {
    fn core(&self) -> &Rc<BaseCore> {
        &self.inner.core
    }

    fn node_id(&self) -> &str {
        "session"
    }

    fn data_path(&self) -> &[String] {
        &self.inner.path
    }
}

impl Session {
    pub(crate) fn new(core: Rc<BaseCore>) -> Self {
        Self {
            inner: Rc::new(SessionInner {
                core,
                path: Vec::new(),
                watchers: WatchRegistry::new(),
            }),
        }
    }

    pub fn current_user_id(&self) -> Option<String> {
        self.optional_string_prop("currentUserId").ok().flatten()
    }

    pub fn current_user(&self) -> Option<Collaborator> {
        let user_id = self.current_user_id()?;
        self.inner.core.dispatcher.with_value(
            &["collaboratorsById", user_id.as_str()],
            |value| value.and_then(Collaborator::from_value),
        )
    }

    pub fn permission_level(&self) -> String {
        self.string_prop("permissionLevel").unwrap_or_default()
    }

    /// `true` when the session's level is `level` or higher.
    ///
    /// Unknown levels on either side count as no permission.
    pub fn has_permission_level_at_least(&self, level: &str) -> bool {
        match (permission_rank(&self.permission_level()), permission_rank(level)) {
            (Some(have), Some(need)) => have >= need,
            _ => false,
        }
    }

    pub fn can_edit_records(&self) -> bool {
        self.has_permission_level_at_least("edit")
    }

    pub(crate) fn trigger(&self, dirty: &DirtyPaths) {
        let user_id = self.current_user_id();
        let user_changed = dirty.child("currentUserId").is_some()
            || user_id.as_deref().is_some_and(|id| {
                dirty
                    .child("collaboratorsById")
                    .is_some_and(|c| c.child(id).is_some())
            });
        if user_changed {
            self.inner
                .watchers
                .notify(self, &SessionKey::CurrentUser, &ChangePayload::None);
        }
        if dirty.child("permissionLevel").is_some() {
            self.inner
                .watchers
                .notify(self, &SessionKey::PermissionLevel, &ChangePayload::None);
        }
    }
}
