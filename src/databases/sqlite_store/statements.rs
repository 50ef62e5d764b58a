//! SQL for one namespace table.
//!
//! Keys and values are always bound parameters. The table name is the only
//! identifier placed in the SQL text, and it is quoted.

use rusqlite::types::Value;

use crate::key::{EncodedRecord, RecordKey};

/// Bound parameters allowed in one statement by every SQLite build.
pub(crate) const MAX_PARAMS: usize = 999;

pub(crate) const META_CREATE: &str = "CREATE TABLE IF NOT EXISTS \"__bucket_meta\" \
     (namespace TEXT PRIMARY KEY NOT NULL, version INTEGER NOT NULL)";
pub(crate) const META_SELECT: &str = "SELECT version FROM \"__bucket_meta\" WHERE namespace = ?1";
pub(crate) const META_UPSERT: &str =
    "INSERT OR REPLACE INTO \"__bucket_meta\" (namespace, version) VALUES (?1, ?2)";

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Statement {
    pub(crate) sql: String,
    pub(crate) params: Vec<Value>,
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn key_value(key: &RecordKey) -> Value {
    match key {
        RecordKey::Text(text) => Value::Text(text.clone()),
        RecordKey::Integer(int) => Value::Integer(*int),
    }
}

fn placeholders(groups: usize, per_group: usize) -> String {
    let group = format!("({})", vec!["?"; per_group].join(", "));
    vec![group.as_str(); groups].join(", ")
}

#[derive(Debug, Clone)]
pub(crate) struct Statements {
    table: String,
}

impl Statements {
    pub(crate) fn new(table_name: &str) -> Self {
        Self {
            table: quote_ident(table_name),
        }
    }

    /// The key column has no declared type, so `'1'` and `1` stay distinct.
    pub(crate) fn create_table(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (key PRIMARY KEY NOT NULL, value TEXT NOT NULL)",
            self.table
        )
    }

    pub(crate) fn drop_table(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", self.table)
    }

    pub(crate) fn select_in(&self, keys: &[RecordKey]) -> Vec<Statement> {
        keys.chunks(MAX_PARAMS)
            .map(|chunk| Statement {
                sql: format!(
                    "SELECT key, value FROM {} WHERE key IN {}",
                    self.table,
                    placeholders(1, chunk.len())
                ),
                params: chunk.iter().map(key_value).collect(),
            })
            .collect()
    }

    pub(crate) fn delete_in(&self, keys: &[RecordKey]) -> Vec<Statement> {
        keys.chunks(MAX_PARAMS)
            .map(|chunk| Statement {
                sql: format!(
                    "DELETE FROM {} WHERE key IN {}",
                    self.table,
                    placeholders(1, chunk.len())
                ),
                params: chunk.iter().map(key_value).collect(),
            })
            .collect()
    }

    /// One multi-row `INSERT OR REPLACE` per chunk of records.
    pub(crate) fn upsert(&self, records: &[EncodedRecord]) -> Vec<Statement> {
        records
            .chunks(MAX_PARAMS / 2)
            .map(|chunk| Statement {
                sql: format!(
                    "INSERT OR REPLACE INTO {} (key, value) VALUES {}",
                    self.table,
                    placeholders(chunk.len(), 2)
                ),
                params: chunk
                    .iter()
                    .flat_map(|(key, value)| [key_value(key), Value::Text(value.clone())])
                    .collect(),
            })
            .collect()
    }

    pub(crate) fn delete_all(&self) -> String {
        format!("DELETE FROM {}", self.table)
    }

    pub(crate) fn select_all(&self) -> String {
        format!("SELECT key, value FROM {}", self.table)
    }

    pub(crate) fn select_keys(&self) -> String {
        format!("SELECT key FROM {}", self.table)
    }

    pub(crate) fn count(&self) -> String {
        format!("SELECT COUNT(*) FROM {}", self.table)
    }

    pub(crate) fn contains(&self) -> String {
        format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE key = ?1)",
            self.table
        )
    }
}
