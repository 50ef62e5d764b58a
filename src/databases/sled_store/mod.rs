//! Backend over the [sled](https://docs.rs/sled) embedded database.
//!
//! Each database name maps to a sled directory, `<dir>/<db_name>`, and each
//! namespace to a tree inside it. Stores of the same directory share one
//! [`sled::Db`], since sled locks the directory for a single opener. Schema versions live in the `__bucket_meta`
//! tree. On a version change the records tree is dropped before the new
//! version is recorded and flushed, so an interrupted upgrade is simply
//! repeated on the next open.

mod transaction;

use log::debug;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::backend::{ConnectionSlot, OpenOutcome, OperationOutput, StorageBackend, UnitOfWork};
use crate::config::{BucketConfig, StorageLocation};
use crate::databases::shared::{SharedHandles, resolve_dir};
use crate::error::{BackendError, BucketResult};
use crate::namespace::Namespace;
use crate::registry::BackendFactory;

pub const NAME: &str = "sled";

const META_TREE: &str = "__bucket_meta";

static OPEN_DIRS: SharedHandles<sled::Db> = SharedHandles::new();

pub(crate) struct SledHandle {
    db: Arc<sled::Db>,
    tree: sled::Tree,
}

pub struct SledStore {
    namespace: Namespace,
    location: StorageLocation,
    handle: ConnectionSlot<SledHandle>,
}

impl SledStore {
    pub fn new(namespace: Namespace, location: StorageLocation) -> Self {
        Self {
            namespace,
            location,
            handle: ConnectionSlot::default(),
        }
    }

    /// Directory holding the sled database, or `None` for a temporary one
    pub fn path(&self) -> Option<PathBuf> {
        match &self.location {
            StorageLocation::Memory => None,
            StorageLocation::Directory(dir) => Some(dir.join(self.namespace.db_name())),
        }
    }

    fn open_db(&self) -> Result<Arc<sled::Db>, BackendError> {
        match &self.location {
            StorageLocation::Directory(dir) => {
                let path = resolve_dir(dir)?.join(self.namespace.db_name());
                OPEN_DIRS.get_or_open(&path, || Ok(sled::Config::new().path(&path).open()?))
            }
            StorageLocation::Memory => Ok(Arc::new(sled::Config::new().temporary(true).open()?)),
        }
    }

    fn upgrade(&self, db: &sled::Db, schema_version: u32) -> Result<OpenOutcome, BackendError> {
        let table = self.namespace.table_name();
        let meta = db.open_tree(META_TREE)?;
        let recorded = meta
            .get(table)?
            .map(|bytes| decode_version(&bytes))
            .transpose()?;
        if recorded == Some(schema_version) {
            return Ok(OpenOutcome::Opened);
        }

        db.drop_tree(table)?;
        meta.insert(table, schema_version.to_be_bytes().to_vec())?;
        db.flush()?;

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

fn decode_version(bytes: &[u8]) -> Result<u32, BackendError> {
    let raw: [u8; 4] = bytes.try_into().map_err(|_| {
        BackendError::Other(format!(
            "schema version record has {} bytes, expected 4",
            bytes.len()
        ))
    })?;
    Ok(u32::from_be_bytes(raw))
}

impl StorageBackend for SledStore {
    fn name(&self) -> &'static str {
        NAME
    }

    fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    fn open(&self, schema_version: u32) -> Result<OpenOutcome, BackendError> {
        let start = Instant::now();
        if let Some(previous) = self.handle.replace(None)? {
            previous.db.flush()?;
        }

        let db = self.open_db()?;
        let outcome = self.upgrade(&db, schema_version)?;
        let tree = db.open_tree(self.namespace.table_name())?;
        self.handle.replace(Some(SledHandle { db, tree }))?;

        debug!(
            "SledStore: opened {} at version {} ({:?}) in {:?}",
            self.namespace,
            schema_version,
            outcome,
            start.elapsed()
        );
        Ok(outcome)
    }

    fn execute(&self, unit: &UnitOfWork) -> Result<Vec<OperationOutput>, BackendError> {
        self.handle
            .with(|handle| transaction::run_unit(&handle.tree, unit))
    }

    fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    fn destroy(&self) -> Result<(), BackendError> {
        if let Some(handle) = self.handle.replace(None)? {
            handle.db.flush()?;
            debug!("SledStore: closed {}", self.namespace);
        }
        Ok(())
    }
}

/// Registry entry for [`SledStore`]. Always available when compiled in.
#[derive(Debug, Default, Clone, Copy)]
pub struct SledFactory;

impl BackendFactory for SledFactory {
    fn test(&self) -> bool {
        true
    }

    fn build(
        &self,
        namespace: Namespace,
        config: &BucketConfig,
    ) -> BucketResult<Arc<dyn StorageBackend>> {
        Ok(Arc::new(SledStore::new(namespace, config.location.clone())))
    }
}
