use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::error::{BucketError, BucketResult, ErrorKind};

/// Names reserved for the crate's own bookkeeping start with this prefix.
pub const RESERVED_PREFIX: &str = "__";

/// Identifies one isolated set of records: a database and a table within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Serialize, Deserialize)]
#[display("{db_name}/{table_name}")]
pub struct Namespace {
    db_name: String,
    table_name: String,
}

impl Namespace {
    pub fn new(db_name: impl Into<String>, table_name: impl Into<String>) -> BucketResult<Self> {
        let db_name = db_name.into();
        let table_name = table_name.into();
        validate_name("db_name", &db_name)?;
        validate_name("table_name", &table_name)?;
        Ok(Self {
            db_name,
            table_name,
        })
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }
}

fn validate_name(field: &str, name: &str) -> BucketResult<()> {
    let problem = if name.is_empty() {
        Some("must not be empty")
    } else if name == "." || name == ".." {
        Some("must not be a relative path component")
    } else if name.contains(['/', '\\', '\0']) {
        Some("must not contain path separators or NUL")
    } else if name.starts_with(RESERVED_PREFIX) {
        Some("must not start with the reserved prefix `__`")
    } else {
        None
    };

    match problem {
        Some(problem) => Err(BucketError::new(
            ErrorKind::ConstraintViolation,
            format!("{field} {name:?} {problem}"),
        )),
        None => Ok(()),
    }
}
