//! basemirror — a reactive, in-memory mirror of a remote base.
//!
//! A [`Base`] holds one JSON snapshot behind a [`Dispatcher`]. Host batches
//! of [`ModelUpdate`]s are applied to it, the touched paths are collected
//! into a [`DirtyPaths`] tree, and the tree is walked once through the model
//! hierarchy so every affected node, store and query fires its watchers.
//!
//! On top of the snapshot sit identity-stable model nodes ([`Table`],
//! [`View`], [`Field`], [`Record`]), lazily loaded data stores, pooled live
//! queries ([`RecordQueryResult`], [`ViewMetadataQueryResult`]) and
//! optimistic record mutations.
//!
//! Everything is single-threaded: handles are `Rc`-backed and the host's
//! futures are driven by the caller's [`futures::task::LocalSpawn`].

pub mod clock;
pub mod config;
mod core;
pub mod dirty;
pub mod dispatcher;
pub mod error;
pub mod host;
pub mod ids;
pub mod keys;
pub mod models;
pub mod mutations;
pub mod pool;
pub mod query;
pub mod stores;
pub mod type_provider;
pub mod watchable;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BaseConfig, ConfigError};
pub use dirty::DirtyPaths;
pub use dispatcher::{Dispatcher, ModelUpdate};
pub use error::{Error, HostError, ModelKind, Result};
pub use host::{FieldOrder, Host, HostSubscription, PermissionCheckResult, ViewData};
pub use ids::generate_id;
pub use keys::{
    BaseKey, FieldKey, RecordKey, RecordQueryKey, RecordStoreKey, SessionKey, TableKey,
    UnknownWatchKey, ViewDataKey, ViewKey, ViewMetadataKey, WatchKey,
};
pub use models::{Base, BaseBuilder, Collaborator, Field, Record, RecordUpdate, Session, Table, View};
pub use mutations::{
    Mutation, MutationCompletion, PartialMutation, PartialRecordCellValues, RecordCellValues,
    WriteFailure,
};
pub use pool::{ObjectPool, PoolPolicy};
pub use query::{
    FieldRef, NormalizedColorMode, NormalizedQueryOptions, NormalizedSort, RecordColorMode,
    RecordQueryOptions, RecordQueryResult, SortDirection, SortSpec, ViewMetadataQueryResult,
    ViewRef,
};
pub use stores::{RecordStore, ViewDataStore};
pub use type_provider::{StructuralTypeProvider, TypeProvider};
pub use watchable::{ChangePayload, WatchCallback, WatchRegistry, Watchable};
