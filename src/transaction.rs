//! The transaction coordinator.
//!
//! Runs a [`UnitOfWork`] against a backend on tokio's blocking pool and turns
//! every failure into a [`BucketError`].

use log::{debug, trace};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backend::{AccessMode, OperationOutput, StorageBackend, UnitOfWork};
use crate::error::{BucketError, BucketResult};

#[derive(Clone)]
pub struct Coordinator {
    backend: Arc<dyn StorageBackend>,
    timeout: Option<Duration>,
}

impl Coordinator {
    pub fn new(backend: Arc<dyn StorageBackend>, timeout: Option<Duration>) -> Self {
        Self { backend, timeout }
    }

    /// Execute `unit` and return one output per operation.
    ///
    /// A configured operation timeout applies to read-only units only: when it
    /// elapses the caller gets an `UNKNOWN` error and the late result is
    /// dropped. Read-write units always report the outcome of their commit,
    /// however long it takes.
    pub async fn run(&self, unit: UnitOfWork) -> BucketResult<Vec<OperationOutput>> {
        unit.validate()?;
        if unit.is_empty() {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let expected = unit.len();
        let mode = unit.mode;
        let backend = self.backend.clone();
        let task = tokio::task::spawn_blocking(move || backend.execute(&unit));

        let watchdog = match mode {
            AccessMode::ReadOnly => self.timeout,
            AccessMode::ReadWrite => None,
        };
        let joined = match watchdog {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    debug!(
                        "{}: {} unit on {} exceeded {:?}",
                        self.backend.name(),
                        mode,
                        self.backend.namespace(),
                        limit
                    );
                    return Err(BucketError::timed_out("operation"));
                }
            },
            None => task.await,
        };

        let outputs = joined
            .map_err(|e| BucketError::unknown(format!("backend task failed: {e}")))?
            .map_err(|e| self.backend.generate_error(e))?;

        trace!(
            "{}: {} unit of {} ops on {} in {:?}",
            self.backend.name(),
            mode,
            expected,
            self.backend.namespace(),
            start.elapsed()
        );

        if outputs.len() != expected {
            return Err(BucketError::unknown(format!(
                "backend returned {} outputs for {} operations",
                outputs.len(),
                expected
            )));
        }
        Ok(outputs)
    }

    /// Execute a single operation and return its output.
    pub async fn run_one(&self, unit: UnitOfWork) -> BucketResult<OperationOutput> {
        self.run(unit)
            .await?
            .pop()
            .ok_or_else(|| BucketError::unknown("backend returned no output"))
    }
}
