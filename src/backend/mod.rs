//! The contract every storage backend implements.
//!
//! Backends are synchronous. The [`Driver`](crate::driver::Driver) runs them on
//! tokio's blocking pool, so an implementation may block freely inside
//! [`StorageBackend::open`] and [`StorageBackend::execute`].

pub mod unit;

use std::sync::{Mutex, MutexGuard};

use crate::error::{BackendError, BucketError, Normalize};
use crate::namespace::Namespace;
pub use unit::{AccessMode, Operation, OperationOutput, UnitOfWork};

/// What happened to the namespace when the connection was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// The recorded schema version matched; data was kept
    Opened,
    /// Nothing was recorded yet; an empty table was created
    Created { version: u32 },
    /// A different version was recorded; the table was dropped and recreated empty
    Recreated { from: u32, to: u32 },
}

pub trait StorageBackend: Send + Sync + 'static {
    /// Registry name of the backend (`"redb"`, `"sled"`, `"sqlite"`)
    fn name(&self) -> &'static str;

    fn namespace(&self) -> &Namespace;

    /// Open the physical resource and bring the namespace to `schema_version`.
    ///
    /// Opening an already open backend replaces the previous connection.
    fn open(&self, schema_version: u32) -> Result<OpenOutcome, BackendError>;

    /// Apply a unit of work atomically, one output per operation.
    fn execute(&self, unit: &UnitOfWork) -> Result<Vec<OperationOutput>, BackendError>;

    /// Convert a raw backend failure into the shared taxonomy.
    fn generate_error(&self, raw: BackendError) -> BucketError {
        raw.normalize()
    }

    fn is_open(&self) -> bool;

    /// Close the connection. Closing a closed backend does nothing.
    fn destroy(&self) -> Result<(), BackendError>;
}

/// A connection that may or may not be open, shared across blocking tasks.
#[derive(Debug)]
pub(crate) struct ConnectionSlot<T> {
    inner: Mutex<Option<T>>,
}

impl<T> Default for ConnectionSlot<T> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }
}

impl<T> ConnectionSlot<T> {
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Option<T>>, BackendError> {
        self.inner
            .lock()
            .map_err(|e| BackendError::Poisoned(e.to_string()))
    }

    /// Run `f` against the open connection, holding the lock for its duration.
    pub(crate) fn with<R>(
        &self,
        f: impl FnOnce(&mut T) -> Result<R, BackendError>,
    ) -> Result<R, BackendError> {
        let mut guard = self.lock()?;
        let conn = guard.as_mut().ok_or(BackendError::Closed)?;
        f(conn)
    }

    pub(crate) fn replace(&self, value: Option<T>) -> Result<Option<T>, BackendError> {
        let mut guard = self.lock()?;
        Ok(std::mem::replace(&mut *guard, value))
    }

    pub(crate) fn is_some(&self) -> bool {
        self.lock().map(|guard| guard.is_some()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_slot_reports_closed() {
        let slot: ConnectionSlot<u32> = ConnectionSlot::default();
        assert!(!slot.is_some());
        assert!(matches!(slot.with(|_| Ok(())), Err(BackendError::Closed)));

        assert_eq!(slot.replace(Some(4)).unwrap(), None);
        assert_eq!(slot.with(|v| Ok(*v + 1)).unwrap(), 5);
        assert_eq!(slot.replace(None).unwrap(), Some(4));
        assert!(!slot.is_some());
    }
}
