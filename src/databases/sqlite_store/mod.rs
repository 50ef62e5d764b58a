//! Backend over SQLite through [rusqlite](https://docs.rs/rusqlite).
//!
//! Each database name maps to one file, `<dir>/<db_name>.sqlite3`, and each
//! namespace to a two-column table (`key`, `value`). Every unit of work runs
//! in one SQLite transaction; writes take the write lock up front.

mod statements;

use log::debug;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params, params_from_iter};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::backend::{
    AccessMode, ConnectionSlot, OpenOutcome, Operation, OperationOutput, StorageBackend, UnitOfWork,
};
use crate::config::{BucketConfig, StorageLocation};
use crate::error::{BackendError, BucketResult};
use crate::key::{EncodedRecord, RecordKey};
use crate::namespace::Namespace;
use crate::registry::BackendFactory;
use statements::{META_CREATE, META_SELECT, META_UPSERT, Statement, Statements};

pub const NAME: &str = "sqlite";

/// First SQLite release accepting multi-row `VALUES` lists.
const MIN_SQLITE_VERSION: i32 = 3_007_011;

impl ToSql for RecordKey {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            RecordKey::Text(text) => ToSqlOutput::from(text.as_str()),
            RecordKey::Integer(int) => ToSqlOutput::from(*int),
        })
    }
}

impl FromSql for RecordKey {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Integer(int) => Ok(RecordKey::Integer(int)),
            ValueRef::Text(_) => value.as_str().map(|text| RecordKey::Text(text.to_string())),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

pub struct SqliteStore {
    namespace: Namespace,
    location: StorageLocation,
    max_size_bytes: Option<u64>,
    statements: Statements,
    conn: ConnectionSlot<Connection>,
}

impl SqliteStore {
    pub fn new(namespace: Namespace, location: StorageLocation, max_size_bytes: Option<u64>) -> Self {
        let statements = Statements::new(namespace.table_name());
        Self {
            namespace,
            location,
            max_size_bytes,
            statements,
            conn: ConnectionSlot::default(),
        }
    }

    /// Path of the database file, or `None` for an in-memory database
    pub fn path(&self) -> Option<PathBuf> {
        match &self.location {
            StorageLocation::Memory => None,
            StorageLocation::Directory(dir) => {
                Some(dir.join(format!("{}.sqlite3", self.namespace.db_name())))
            }
        }
    }

    fn connect(&self) -> Result<Connection, BackendError> {
        match (&self.location, self.path()) {
            (StorageLocation::Directory(dir), Some(path)) => {
                std::fs::create_dir_all(dir)?;
                Ok(Connection::open(path)?)
            }
            _ => Ok(Connection::open_in_memory()?),
        }
    }

    /// Cap the database size; writes past it fail with `SQLITE_FULL`.
    fn apply_quota(conn: &Connection, max_size_bytes: u64) -> Result<(), BackendError> {
        let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
        let pages = i64::try_from(max_size_bytes)
            .unwrap_or(i64::MAX)
            .checked_div(page_size)
            .unwrap_or(1)
            .max(1);
        let applied: i64 =
            conn.pragma_update_and_check(None, "max_page_count", pages, |row| row.get(0))?;
        debug!("SqliteStore: max_page_count = {applied} ({page_size} byte pages)");
        Ok(())
    }

    fn upgrade(&self, conn: &mut Connection, schema_version: u32) -> Result<OpenOutcome, BackendError> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(META_CREATE, [])?;
        let table = self.namespace.table_name();
        let recorded: Option<u32> = tx
            .query_row(META_SELECT, [table], |row| row.get(0))
            .optional()?;

        let outcome = match recorded {
            Some(version) if version == schema_version => OpenOutcome::Opened,
            Some(from) => OpenOutcome::Recreated {
                from,
                to: schema_version,
            },
            None => OpenOutcome::Created {
                version: schema_version,
            },
        };
        if outcome != OpenOutcome::Opened {
            tx.execute(&self.statements.drop_table(), [])?;
            tx.execute(&self.statements.create_table(), [])?;
            tx.execute(META_UPSERT, params![table, schema_version])?;
        }
        tx.commit()?;
        Ok(outcome)
    }

    fn query_records(&self, conn: &Connection, statement: &Statement) -> Result<Vec<EncodedRecord>, BackendError> {
        let mut prepared = conn.prepare_cached(&statement.sql)?;
        let rows = prepared.query_map(params_from_iter(statement.params.iter()), |row| {
            Ok((row.get::<_, RecordKey>(0)?, row.get::<_, String>(1)?))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn apply(&self, conn: &Connection, op: &Operation) -> Result<OperationOutput, BackendError> {
        match op {
            Operation::Get(keys) => {
                let mut found = Vec::with_capacity(keys.len());
                for statement in self.statements.select_in(keys) {
                    found.extend(self.query_records(conn, &statement)?);
                }
                Ok(OperationOutput::Records(found))
            }
            Operation::Put(records) => {
                for statement in self.statements.upsert(records) {
                    conn.execute(&statement.sql, params_from_iter(statement.params.iter()))?;
                }
                Ok(OperationOutput::Done)
            }
            Operation::Delete(keys) => {
                for statement in self.statements.delete_in(keys) {
                    conn.execute(&statement.sql, params_from_iter(statement.params.iter()))?;
                }
                Ok(OperationOutput::Done)
            }
            Operation::Clear => {
                conn.execute(&self.statements.delete_all(), [])?;
                Ok(OperationOutput::Done)
            }
            Operation::Scan => {
                let statement = Statement {
                    sql: self.statements.select_all(),
                    params: Vec::new(),
                };
                Ok(OperationOutput::Records(self.query_records(conn, &statement)?))
            }
            Operation::ScanKeys => {
                let mut prepared = conn.prepare_cached(&self.statements.select_keys())?;
                let keys = prepared
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<RecordKey>, _>>()?;
                Ok(OperationOutput::Keys(keys))
            }
            Operation::Count => {
                let count: i64 = conn.query_row(&self.statements.count(), [], |row| row.get(0))?;
                Ok(OperationOutput::Count(count.max(0) as u64))
            }
            Operation::Contains(key) => {
                let found: bool =
                    conn.query_row(&self.statements.contains(), [key], |row| row.get(0))?;
                Ok(OperationOutput::Found(found))
            }
        }
    }
}

impl StorageBackend for SqliteStore {
    fn name(&self) -> &'static str {
        NAME
    }

    fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    fn open(&self, schema_version: u32) -> Result<OpenOutcome, BackendError> {
        let start = Instant::now();
        self.conn.replace(None)?;

        let mut conn = self.connect()?;
        if let Some(limit) = self.max_size_bytes {
            Self::apply_quota(&conn, limit)?;
        }
        let outcome = self.upgrade(&mut conn, schema_version)?;
        self.conn.replace(Some(conn))?;

        debug!(
            "SqliteStore: opened {} at version {} ({:?}) in {:?}",
            self.namespace,
            schema_version,
            outcome,
            start.elapsed()
        );
        Ok(outcome)
    }

    fn execute(&self, unit: &UnitOfWork) -> Result<Vec<OperationOutput>, BackendError> {
        self.conn.with(|conn| {
            let behavior = match unit.mode {
                AccessMode::ReadOnly => TransactionBehavior::Deferred,
                AccessMode::ReadWrite => TransactionBehavior::Immediate,
            };
            let tx = conn.transaction_with_behavior(behavior)?;
            let outputs = unit
                .operations
                .iter()
                .map(|op| self.apply(&tx, op))
                .collect::<Result<Vec<_>, _>>()?;
            tx.commit()?;
            Ok(outputs)
        })
    }

    fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    fn destroy(&self) -> Result<(), BackendError> {
        if let Some(conn) = self.conn.replace(None)? {
            conn.close().map_err(|(_, e)| BackendError::Sqlite(e))?;
            debug!("SqliteStore: closed {}", self.namespace);
        }
        Ok(())
    }
}

/// Registry entry for [`SqliteStore`].
///
/// The probe checks that the linked SQLite accepts multi-row inserts.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteFactory;

impl BackendFactory for SqliteFactory {
    fn test(&self) -> bool {
        rusqlite::version_number() >= MIN_SQLITE_VERSION
    }

    fn build(
        &self,
        namespace: Namespace,
        config: &BucketConfig,
    ) -> BucketResult<Arc<dyn StorageBackend>> {
        Ok(Arc::new(SqliteStore::new(
            namespace,
            config.location.clone(),
            config.max_size_bytes,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn store() -> SqliteStore {
        let store = SqliteStore::new(
            Namespace::new("app", "users").unwrap(),
            StorageLocation::Memory,
            None,
        );
        store.open(3).unwrap();
        store
    }

    #[test]
    fn text_and_integer_keys_are_separate_rows() {
        let store = store();
        let put = UnitOfWork::for_operation(Operation::Put(vec![
            (RecordKey::from("1"), "\"text\"".to_string()),
            (RecordKey::from(1), "\"int\"".to_string()),
        ]));
        store.execute(&put).unwrap();

        let get = UnitOfWork::for_operation(Operation::Get(vec![RecordKey::from(1)]));
        assert_eq!(
            store.execute(&get).unwrap(),
            [OperationOutput::Records(vec![(
                RecordKey::from(1),
                "\"int\"".to_string()
            )])]
        );
        let count = UnitOfWork::for_operation(Operation::Count);
        assert_eq!(store.execute(&count).unwrap(), [OperationOutput::Count(2)]);
    }

    #[test]
    fn failing_unit_rolls_back() {
        let store = store();
        store
            .conn
            .with(|conn| {
                conn.execute_batch(
                    "CREATE TRIGGER refuse BEFORE INSERT ON users WHEN NEW.key = 'boom' \
                     BEGIN SELECT RAISE(ABORT, 'refused'); END;",
                )?;
                Ok(())
            })
            .unwrap();

        let unit = UnitOfWork::read_write(vec![
            Operation::Put(vec![(RecordKey::from("ok"), "1".to_string())]),
            Operation::Put(vec![(RecordKey::from("boom"), "2".to_string())]),
        ]);
        let err = store.execute(&unit).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation);

        let count = UnitOfWork::for_operation(Operation::Count);
        assert_eq!(store.execute(&count).unwrap(), [OperationOutput::Count(0)]);
    }

    #[test]
    fn probe_accepts_bundled_sqlite() {
        assert!(SqliteFactory.test());
    }
}
