//! Units of work handed to a backend.
//!
//! A unit is an ordered list of operations run against one namespace under a
//! single access mode. The backend applies a unit atomically: either every
//! write in it takes effect or none does.

use crate::error::{BucketError, BucketResult, ErrorKind};
use crate::key::{EncodedRecord, RecordKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Clone, PartialEq, Eq, strum::AsRefStr)]
pub enum Operation {
    /// Fetch the records for these keys; missing keys are skipped
    Get(Vec<RecordKey>),
    /// Insert or replace these records
    Put(Vec<EncodedRecord>),
    /// Remove these keys; missing keys are ignored
    Delete(Vec<RecordKey>),
    Clear,
    /// Every record in the namespace
    Scan,
    /// Every key in the namespace
    ScanKeys,
    Count,
    Contains(RecordKey),
}

impl Operation {
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Operation::Put(_) | Operation::Delete(_) | Operation::Clear
        )
    }
}

/// What one operation produced, in the same position as the operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutput {
    Records(Vec<EncodedRecord>),
    Keys(Vec<RecordKey>),
    Count(u64),
    Found(bool),
    Done,
}

impl OperationOutput {
    fn mismatch(&self, expected: &str) -> BucketError {
        BucketError::unknown(format!(
            "backend returned {self:?} where {expected} was expected"
        ))
    }

    pub fn into_records(self) -> BucketResult<Vec<EncodedRecord>> {
        match self {
            OperationOutput::Records(records) => Ok(records),
            other => Err(other.mismatch("records")),
        }
    }

    pub fn into_keys(self) -> BucketResult<Vec<RecordKey>> {
        match self {
            OperationOutput::Keys(keys) => Ok(keys),
            other => Err(other.mismatch("keys")),
        }
    }

    pub fn into_count(self) -> BucketResult<u64> {
        match self {
            OperationOutput::Count(count) => Ok(count),
            other => Err(other.mismatch("a count")),
        }
    }

    pub fn into_found(self) -> BucketResult<bool> {
        match self {
            OperationOutput::Found(found) => Ok(found),
            other => Err(other.mismatch("a membership flag")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOfWork {
    pub mode: AccessMode,
    pub operations: Vec<Operation>,
}

impl UnitOfWork {
    pub fn read_only(operations: Vec<Operation>) -> Self {
        Self {
            mode: AccessMode::ReadOnly,
            operations,
        }
    }

    pub fn read_write(operations: Vec<Operation>) -> Self {
        Self {
            mode: AccessMode::ReadWrite,
            operations,
        }
    }

    /// A unit holding one operation, read-only unless the operation writes.
    pub fn for_operation(operation: Operation) -> Self {
        if operation.is_write() {
            Self::read_write(vec![operation])
        } else {
            Self::read_only(vec![operation])
        }
    }

    /// Reject write operations in a read-only unit.
    pub fn validate(&self) -> BucketResult<()> {
        if self.mode == AccessMode::ReadOnly {
            if let Some(op) = self.operations.iter().find(|op| op.is_write()) {
                return Err(BucketError::new(
                    ErrorKind::PermissionDenied,
                    format!("{} is not allowed in a read-only unit", op.as_ref()),
                ));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
