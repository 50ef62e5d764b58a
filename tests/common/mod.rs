// Common test utilities and helpers

#![allow(dead_code)]

use bucket_store::prelude::*;
use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Every backend compiled in by the `native` feature
pub const BACKENDS: &[&str] = &["redb", "sled", "sqlite"];

pub fn memory_config(table: &str) -> BucketConfig {
    BucketConfig::new("tests", table)
}

pub fn dir_config(dir: &Path, table: &str, schema_version: u32) -> BucketConfig {
    BucketConfig::builder()
        .db_name("tests")
        .table_name(table)
        .schema_version(schema_version)
        .location(StorageLocation::Directory(dir.to_path_buf()))
        .build()
}

/// Create a driver on `backend` and wait for it to connect
pub async fn open_driver(backend: &str, config: &BucketConfig) -> Driver {
    DriverRegistry::global()
        .open(backend, config)
        .await
        .unwrap_or_else(|e| panic!("{backend}: open failed: {e}"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Failed(ErrorKind),
}

/// Listener that keeps every notification it receives
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Readiness>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<Readiness> {
        self.events.lock().unwrap().clone()
    }
}

impl ReadinessListener for RecordingListener {
    fn notify_ready(&self, _namespace: &Namespace) {
        self.events.lock().unwrap().push(Readiness::Ready);
    }

    fn notify_failed(&self, _namespace: &Namespace, error: &BucketError) {
        self.events
            .lock()
            .unwrap()
            .push(Readiness::Failed(error.kind()));
    }
}

/// In-memory backend with scripted delays and failures, counting every call
pub struct ScriptedBackend {
    namespace: Namespace,
    open_delay: Duration,
    execute_delay: Duration,
    failing_opens: AtomicUsize,
    is_open: AtomicBool,
    data: Mutex<BTreeMap<RecordKey, String>>,
    pub opens: AtomicUsize,
    pub executes: AtomicUsize,
    pub destroys: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            namespace: Namespace::new("scripted", "records").unwrap(),
            open_delay: Duration::ZERO,
            execute_delay: Duration::ZERO,
            failing_opens: AtomicUsize::new(0),
            is_open: AtomicBool::new(false),
            data: Mutex::new(BTreeMap::new()),
            opens: AtomicUsize::new(0),
            executes: AtomicUsize::new(0),
            destroys: AtomicUsize::new(0),
        }
    }

    pub fn open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn execute_delay(mut self, delay: Duration) -> Self {
        self.execute_delay = delay;
        self
    }

    /// The next `count` opens fail with a permission error
    pub fn failing_opens(self, count: usize) -> Self {
        self.failing_opens.store(count, Ordering::SeqCst);
        self
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

impl StorageBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    fn open(&self, schema_version: u32) -> Result<OpenOutcome, BackendError> {
        std::thread::sleep(self.open_delay);
        self.opens.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BackendError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "database is locked",
            )));
        }
        self.is_open.store(true, Ordering::SeqCst);
        Ok(OpenOutcome::Created {
            version: schema_version,
        })
    }

    fn execute(&self, unit: &UnitOfWork) -> Result<Vec<OperationOutput>, BackendError> {
        self.executes.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.execute_delay);
        if !self.is_open.load(Ordering::SeqCst) {
            return Err(BackendError::Closed);
        }

        let mut data = self.data.lock().unwrap();
        let mut staged = data.clone();
        let mut outputs = Vec::with_capacity(unit.len());
        for op in &unit.operations {
            outputs.push(match op {
                Operation::Get(keys) => OperationOutput::Records(
                    keys.iter()
                        .filter_map(|k| staged.get(k).map(|v| (k.clone(), v.clone())))
                        .collect(),
                ),
                Operation::Put(records) => {
                    staged.extend(records.iter().cloned());
                    OperationOutput::Done
                }
                Operation::Delete(keys) => {
                    keys.iter().for_each(|k| {
                        staged.remove(k);
                    });
                    OperationOutput::Done
                }
                Operation::Clear => {
                    staged.clear();
                    OperationOutput::Done
                }
                Operation::Scan => OperationOutput::Records(
                    staged.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                ),
                Operation::ScanKeys => OperationOutput::Keys(staged.keys().cloned().collect()),
                Operation::Count => OperationOutput::Count(staged.len() as u64),
                Operation::Contains(key) => OperationOutput::Found(staged.contains_key(key)),
            });
        }
        *data = staged;
        Ok(outputs)
    }

    fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }

    fn destroy(&self) -> Result<(), BackendError> {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        self.is_open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Wrap `backend` in a driver configured by `config`
pub fn scripted_driver(
    backend: ScriptedBackend,
    config: &BucketConfig,
) -> (Driver, Arc<ScriptedBackend>, Arc<RecordingListener>) {
    let backend = Arc::new(backend);
    let driver = Driver::new(backend.clone(), config);
    let listener = Arc::new(RecordingListener::default());
    driver.set_listener(listener.clone());
    (driver, backend, listener)
}

/// Factory whose probe answer is fixed and whose probe calls are counted
pub struct ScriptedFactory {
    pub supported: bool,
    pub probes: Arc<AtomicUsize>,
}

impl ScriptedFactory {
    pub fn new(supported: bool) -> Self {
        Self {
            supported,
            probes: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl BackendFactory for ScriptedFactory {
    fn test(&self) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.supported
    }

    fn build(
        &self,
        _namespace: Namespace,
        _config: &BucketConfig,
    ) -> BucketResult<Arc<dyn StorageBackend>> {
        Ok(Arc::new(ScriptedBackend::new()))
    }
}
