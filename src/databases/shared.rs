//! Process-wide sharing of database handles.
//!
//! redb and sled lock their files exclusively, so every namespace of one
//! on-disk database has to go through the same handle. The pool keeps a
//! [`Weak`] per path: the database stays open while any store holds it and
//! closes when the last one lets go.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};

use crate::error::BackendError;

pub(crate) struct SharedHandles<T> {
    open: Mutex<BTreeMap<PathBuf, Weak<T>>>,
}

impl<T> SharedHandles<T> {
    pub(crate) const fn new() -> Self {
        Self {
            open: Mutex::new(BTreeMap::new()),
        }
    }

    /// Return the live handle for `path`, or create one with `open`.
    ///
    /// The pool lock is held while `open` runs, so two stores racing on the
    /// same path never both reach the engine.
    pub(crate) fn get_or_open(
        &self,
        path: &Path,
        open: impl FnOnce() -> Result<T, BackendError>,
    ) -> Result<Arc<T>, BackendError> {
        let mut open_handles = self
            .open
            .lock()
            .map_err(|e| BackendError::Poisoned(e.to_string()))?;
        open_handles.retain(|_, handle| handle.strong_count() > 0);

        if let Some(handle) = open_handles.get(path).and_then(Weak::upgrade) {
            return Ok(handle);
        }
        let handle = Arc::new(open()?);
        open_handles.insert(path.to_path_buf(), Arc::downgrade(&handle));
        Ok(handle)
    }
}

/// Absolute form of `dir`, created if missing, so equal paths share a handle.
pub(crate) fn resolve_dir(dir: &Path) -> Result<PathBuf, BackendError> {
    std::fs::create_dir_all(dir)?;
    Ok(std::fs::canonicalize(dir)?)
}
