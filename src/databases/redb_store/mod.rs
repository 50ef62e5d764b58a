//! Backend over the [redb](https://docs.rs/redb) embedded database.
//!
//! Each database name maps to one redb file, `<dir>/<db_name>.redb`, and each
//! namespace to a table inside it. Stores of the same file share one
//! [`Database`] handle, since redb locks the file for a single opener. Keys are the bincode encoding of
//! [`RecordKey`](crate::key::RecordKey); values are the JSON text.
//!
//! Schema versions are recorded in the `__bucket_meta` table. A version
//! change is applied in a single write transaction: the records table is
//! deleted, recreated empty and the new version recorded, so a crash never
//! leaves a table at a version it does not have.

mod transaction;

use log::debug;
use redb::{Database, ReadableDatabase, TableDefinition, TableError};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::backend::{ConnectionSlot, OpenOutcome, OperationOutput, StorageBackend, UnitOfWork};
use crate::config::{BucketConfig, StorageLocation};
use crate::databases::shared::{SharedHandles, resolve_dir};
use crate::error::{BackendError, BucketResult};
use crate::namespace::Namespace;
use crate::registry::BackendFactory;

pub const NAME: &str = "redb";

const META_TABLE: TableDefinition<&str, u32> = TableDefinition::new("__bucket_meta");

static OPEN_FILES: SharedHandles<Database> = SharedHandles::new();

pub struct RedbStore {
    namespace: Namespace,
    location: StorageLocation,
    db: ConnectionSlot<Arc<Database>>,
}

impl RedbStore {
    pub fn new(namespace: Namespace, location: StorageLocation) -> Self {
        Self {
            namespace,
            location,
            db: ConnectionSlot::default(),
        }
    }

    /// Path of the database file, or `None` for an in-memory store
    pub fn path(&self) -> Option<PathBuf> {
        match &self.location {
            StorageLocation::Memory => None,
            StorageLocation::Directory(dir) => {
                Some(dir.join(format!("{}.redb", self.namespace.db_name())))
            }
        }
    }

    fn records(&self) -> TableDefinition<'_, &'static [u8], &'static str> {
        TableDefinition::new(self.namespace.table_name())
    }

    fn create_database(&self) -> Result<Arc<Database>, BackendError> {
        match &self.location {
            StorageLocation::Directory(dir) => {
                let path = resolve_dir(dir)?.join(format!("{}.redb", self.namespace.db_name()));
                OPEN_FILES.get_or_open(&path, || Ok(Database::create(&path)?))
            }
            StorageLocation::Memory => Ok(Arc::new(
                Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?,
            )),
        }
    }

    fn recorded_version(&self, db: &Database) -> Result<Option<u32>, BackendError> {
        let read_txn = db.begin_read()?;
        let meta = match read_txn.open_table(META_TABLE) {
            Ok(meta) => meta,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let version = meta.get(self.namespace.table_name())?.map(|v| v.value());
        Ok(version)
    }

    fn upgrade(&self, db: &Database, schema_version: u32) -> Result<OpenOutcome, BackendError> {
        let recorded = self.recorded_version(db)?;
        if recorded == Some(schema_version) {
            return Ok(OpenOutcome::Opened);
        }

        let write_txn = db.begin_write()?;
        write_txn.delete_table(self.records())?;
        write_txn.open_table(self.records())?;
        {
            let mut meta = write_txn.open_table(META_TABLE)?;
            meta.insert(self.namespace.table_name(), schema_version)?;
        }
        write_txn.commit()?;

        Ok(match recorded {
            None => OpenOutcome::Created {
                version: schema_version,
            },
            Some(from) => OpenOutcome::Recreated {
                from,
                to: schema_version,
            },
        })
    }
}

impl StorageBackend for RedbStore {
    fn name(&self) -> &'static str {
        NAME
    }

    fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    fn open(&self, schema_version: u32) -> Result<OpenOutcome, BackendError> {
        let start = Instant::now();
        // Release this store's reference so a reopen can pick up a fresh handle
        self.db.replace(None)?;

        let db = self.create_database()?;
        let outcome = self.upgrade(&db, schema_version)?;
        self.db.replace(Some(db))?;

        debug!(
            "RedbStore: opened {} at version {} ({:?}) in {:?}",
            self.namespace,
            schema_version,
            outcome,
            start.elapsed()
        );
        Ok(outcome)
    }

    fn execute(&self, unit: &UnitOfWork) -> Result<Vec<OperationOutput>, BackendError> {
        let records = self.records();
        self.db.with(|db| transaction::run_unit(&**db, records, unit))
    }

    fn is_open(&self) -> bool {
        self.db.is_some()
    }

    fn destroy(&self) -> Result<(), BackendError> {
        if self.db.replace(None)?.is_some() {
            debug!("RedbStore: closed {}", self.namespace);
        }
        Ok(())
    }
}

/// Registry entry for [`RedbStore`]. Always available when compiled in.
#[derive(Debug, Default, Clone, Copy)]
pub struct RedbFactory;

impl BackendFactory for RedbFactory {
    fn test(&self) -> bool {
        true
    }

    fn build(
        &self,
        namespace: Namespace,
        config: &BucketConfig,
    ) -> BucketResult<Arc<dyn StorageBackend>> {
        Ok(Arc::new(RedbStore::new(namespace, config.location.clone())))
    }
}
