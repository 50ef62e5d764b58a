//! Configuration for a bucket instance.
//!
//! One [`BucketConfig`] describes the namespace, the schema version and where
//! the backend keeps its data. It can be built in code with `typed-builder`
//! or parsed from TOML.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use typed_builder::TypedBuilder;

use crate::error::{BucketError, BucketResult, ErrorKind};
use crate::namespace::Namespace;

/// Schema version used when none is configured.
pub const DEFAULT_SCHEMA_VERSION: u32 = 3;

/// Where a backend keeps its data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageLocation {
    /// Private to the process, gone when the last handle is closed
    #[default]
    Memory,
    /// Files under this directory, named after the database
    Directory(PathBuf),
}

/// Configuration for one bucket instance.
///
/// # Examples
///
/// ```
/// use bucket_store::config::{BucketConfig, StorageLocation};
///
/// let config = BucketConfig::builder()
///     .db_name("app")
///     .table_name("sessions")
///     .location(StorageLocation::Directory("/var/lib/app".into()))
///     .operation_timeout_ms(Some(5_000))
///     .build();
/// assert_eq!(config.schema_version, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder, Serialize, Deserialize)]
#[builder(doc)]
pub struct BucketConfig {
    /// Name of the database holding the table
    #[builder(setter(into))]
    pub db_name: String,

    /// Name of the table; each table is an isolated namespace
    #[builder(setter(into))]
    pub table_name: String,

    /// When the stored version differs, the table is dropped and recreated empty
    #[builder(default = DEFAULT_SCHEMA_VERSION)]
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    #[builder(default)]
    #[serde(default)]
    pub location: StorageLocation,

    /// Upper bound on how long the open may take before the attempt fails
    #[builder(default)]
    #[serde(default)]
    pub open_timeout_ms: Option<u64>,

    /// Upper bound on a single read-only unit of work
    #[builder(default)]
    #[serde(default)]
    pub operation_timeout_ms: Option<u64>,

    /// Size cap for backends that support one (SQLite)
    #[builder(default)]
    #[serde(default)]
    pub max_size_bytes: Option<u64>,
}

fn default_schema_version() -> u32 {
    DEFAULT_SCHEMA_VERSION
}

impl BucketConfig {
    /// In-memory configuration with default settings
    pub fn new(db_name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self::builder()
            .db_name(db_name)
            .table_name(table_name)
            .build()
    }

    /// Parse a configuration from TOML. Unknown keys are ignored.
    pub fn from_toml_str(text: &str) -> BucketResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| {
            BucketError::new(
                ErrorKind::ConstraintViolation,
                format!("invalid configuration: {e}"),
            )
            .with_source(e)
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn namespace(&self) -> BucketResult<Namespace> {
        Namespace::new(self.db_name.clone(), self.table_name.clone())
    }

    /// Check the settings without touching any storage.
    pub fn validate(&self) -> BucketResult<()> {
        if self.schema_version == 0 {
            return Err(BucketError::new(
                ErrorKind::ConstraintViolation,
                "schema_version must be positive",
            ));
        }
        self.namespace().map(|_| ())
    }

    pub fn open_timeout(&self) -> Option<Duration> {
        self.open_timeout_ms.map(Duration::from_millis)
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_ms.map(Duration::from_millis)
    }
}
