use std::fmt;

use basemirror_path::PathError;
use thiserror::Error;

/// The kind of object an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    Base,
    Session,
    Table,
    View,
    Field,
    Record,
    RecordStore,
    ViewDataStore,
    RecordQuery,
    ViewMetadataQuery,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Base => "base",
            ModelKind::Session => "session",
            ModelKind::Table => "table",
            ModelKind::View => "view",
            ModelKind::Field => "field",
            ModelKind::Record => "record",
            ModelKind::RecordStore => "record store",
            ModelKind::ViewDataStore => "view data store",
            ModelKind::RecordQuery => "record query",
            ModelKind::ViewMetadataQuery => "view metadata query",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by the host for a fetch or a write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("HOST_ERROR: {message}")]
pub struct HostError {
    pub message: String,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("INVALID_WATCH_KEY: {model} has no watchable key '{key}'")]
    InvalidWatchKey { model: ModelKind, key: String },
    #[error("UNREQUESTED_FIELD: field {field_id} is not part of this query's field projection")]
    UnrequestedField { field_id: String },
    #[error("NOT_FOUND: no {kind} matching '{id}'")]
    NotFound { kind: ModelKind, id: String },
    #[error("DELETED: {kind} {id} has been deleted")]
    Deleted { kind: ModelKind, id: String },
    #[error("DATA_NOT_LOADED: {kind} {id} has no loaded data")]
    DataNotLoaded { kind: ModelKind, id: String },
    #[error("INVALID_OPTIONS: {0}")]
    InvalidOptions(String),
    #[error("PERMISSION_DENIED: {reason}")]
    Permission { reason: String },
    #[error("VALIDATION_FAILED: {reason}")]
    Validation { reason: String },
    #[error("POOL_IMBALANCE: {0}")]
    PoolImbalance(String),
    #[error("MALFORMED_PATH: {0}")]
    MalformedPath(#[from] PathError),
    #[error(transparent)]
    Host(#[from] HostError),
}

impl Error {
    /// Reason suitable for showing to an end user.
    ///
    /// Only permission and validation failures carry one; every other kind is
    /// a programming or transport error.
    pub fn display_reason(&self) -> Option<&str> {
        match self {
            Error::Permission { reason } | Error::Validation { reason } => Some(reason),
            _ => None,
        }
    }

    pub(crate) fn deleted(kind: ModelKind, id: &str) -> Self {
        Error::Deleted {
            kind,
            id: id.to_string(),
        }
    }

    pub(crate) fn not_found(kind: ModelKind, id: &str) -> Self {
        Error::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        Error::Validation {
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_stable() {
        let err = Error::Deleted {
            kind: ModelKind::Table,
            id: "tbl1".to_string(),
        };
        assert_eq!(err.to_string(), "DELETED: table tbl1 has been deleted");

        let err = Error::InvalidWatchKey {
            model: ModelKind::RecordQuery,
            key: "bogus".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "INVALID_WATCH_KEY: record query has no watchable key 'bogus'"
        );
    }

    #[test]
    fn test_display_reason_only_for_user_facing_kinds() {
        let err = Error::Permission {
            reason: "You can't edit this table".to_string(),
        };
        assert_eq!(err.display_reason(), Some("You can't edit this table"));
        assert_eq!(err.to_string(), "PERMISSION_DENIED: You can't edit this table");

        let err = Error::PoolImbalance("x".to_string());
        assert_eq!(err.display_reason(), None);
    }

    #[test]
    fn test_path_and_host_errors_convert() {
        let err: Error = PathError::RootRemove.into();
        assert!(matches!(err, Error::MalformedPath(PathError::RootRemove)));

        let err: Error = HostError::new("offline").into();
        assert_eq!(err.to_string(), "HOST_ERROR: offline");
    }
}
