//! Prelude module for convenient imports.
//!
//! ```rust
//! use bucket_store::prelude::*;
//! ```

pub use crate::backend::{
    AccessMode, OpenOutcome, Operation, OperationOutput, StorageBackend, UnitOfWork,
};
pub use crate::config::{BucketConfig, DEFAULT_SCHEMA_VERSION, StorageLocation};
pub use crate::driver::Driver;
pub use crate::error::{BackendError, BucketError, BucketResult, ErrorKind, Normalize};
pub use crate::key::RecordKey;
pub use crate::lifecycle::{LifecycleState, LogReadiness, ReadinessListener};
pub use crate::namespace::Namespace;
pub use crate::registry::{BackendFactory, DriverRegistry};

#[cfg(feature = "redb")]
pub use crate::databases::redb_store::RedbStore;
#[cfg(feature = "sled")]
pub use crate::databases::sled_store::SledStore;
#[cfg(feature = "sqlite")]
pub use crate::databases::sqlite_store::SqliteStore;
