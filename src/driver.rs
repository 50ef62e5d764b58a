//! The driver instance: one namespace, one backend connection, and the
//! asynchronous key-value operation set.
//!
//! # Examples
//!
//! ```no_run
//! use bucket_store::prelude::*;
//!
//! # async fn demo() -> BucketResult<()> {
//! let config = BucketConfig::new("app", "sessions");
//! let driver = DriverRegistry::global().create("sled", &config)?;
//! driver.init().await?;
//!
//! driver.set("token", &"abc123").await?;
//! let token: Option<String> = driver.get("token").await?;
//! assert_eq!(token.as_deref(), Some("abc123"));
//!
//! driver.destroy().await?;
//! # Ok(())
//! # }
//! ```

use log::{debug, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::backend::{Operation, OperationOutput, StorageBackend, UnitOfWork};
use crate::codec;
use crate::config::BucketConfig;
use crate::error::{BucketError, BucketResult};
use crate::key::RecordKey;
use crate::lifecycle::{Begin, Lifecycle, LifecycleState, ReadinessListener};
use crate::namespace::Namespace;

/// Handle to a driver instance. Clones share the same connection and state.
#[derive(Clone)]
pub struct Driver {
    inner: Arc<Inner>,
}

struct Inner {
    backend: Arc<dyn StorageBackend>,
    coordinator: crate::transaction::Coordinator,
    lifecycle: Lifecycle,
    schema_version: u32,
    open_timeout: Option<Duration>,
    /// Held from the start of an open until its connection is settled or released
    open_gate: Arc<Mutex<()>>,
}

impl Driver {
    pub fn new(backend: Arc<dyn StorageBackend>, config: &BucketConfig) -> Self {
        let coordinator =
            crate::transaction::Coordinator::new(backend.clone(), config.operation_timeout());
        let lifecycle = Lifecycle::new(backend.namespace().clone());
        Self {
            inner: Arc::new(Inner {
                backend,
                coordinator,
                lifecycle,
                schema_version: config.schema_version,
                open_timeout: config.open_timeout(),
                open_gate: Arc::new(Mutex::new(())),
            }),
        }
    }

    pub fn set_listener(&self, listener: Arc<dyn ReadinessListener>) {
        self.inner.lifecycle.set_listener(listener);
    }

    pub fn name(&self) -> &'static str {
        self.inner.backend.name()
    }

    pub fn namespace(&self) -> &Namespace {
        self.inner.backend.namespace()
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.lifecycle.state()
    }

    /// Open the connection and bring the namespace to the configured version.
    ///
    /// Returns at once when already connected and joins the running attempt
    /// when one is in flight. After a failure or `destroy`, calling `init`
    /// starts a fresh attempt.
    pub async fn init(&self) -> BucketResult<()> {
        match self.inner.lifecycle.begin_connect() {
            Begin::Connected => Ok(()),
            Begin::InProgress(attempt) => self.inner.lifecycle.wait_settled(attempt).await,
            Begin::Started(attempt) => {
                self.launch(attempt)?;
                self.inner.lifecycle.wait_settled(attempt).await
            }
        }
    }

    /// Start connecting in the background and return immediately.
    ///
    /// The instance is `Connecting` when this returns, so operations issued
    /// right after it wait for the outcome. Must be called inside a tokio runtime.
    pub fn spawn_init(&self) -> BucketResult<()> {
        match self.inner.lifecycle.begin_connect() {
            Begin::Started(attempt) => self.launch(attempt),
            Begin::InProgress(_) | Begin::Connected => Ok(()),
        }
    }

    fn launch(&self, attempt: u64) -> BucketResult<()> {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                let error = BucketError::unknown(format!("no async runtime to open on: {e}"));
                self.inner.lifecycle.settle(attempt, Err(error.clone()));
                return Err(error);
            }
        };
        runtime.spawn(self.inner.clone().connect(attempt));
        Ok(())
    }

    /// Close the connection. Operations fail with `NOT_FOUND` until the next `init`.
    pub async fn destroy(&self) -> BucketResult<()> {
        self.inner.lifecycle.disconnect();
        let backend = self.inner.backend.clone();
        let start = Instant::now();
        tokio::task::spawn_blocking(move || backend.destroy())
            .await
            .map_err(|e| BucketError::unknown(format!("backend task failed: {e}")))?
            .map_err(|e| self.inner.backend.generate_error(e))?;
        debug!(
            "{}: closed {} in {:?}",
            self.name(),
            self.namespace(),
            start.elapsed()
        );
        Ok(())
    }

    /// Run a caller-built unit of work once the instance is connected.
    pub async fn execute(&self, unit: UnitOfWork) -> BucketResult<Vec<OperationOutput>> {
        self.inner.lifecycle.ready().await?;
        self.inner.coordinator.run(unit).await
    }

    async fn run(&self, operation: Operation) -> BucketResult<OperationOutput> {
        self.inner.lifecycle.ready().await?;
        self.inner
            .coordinator
            .run_one(UnitOfWork::for_operation(operation))
            .await
    }

    pub async fn get<V: DeserializeOwned>(
        &self,
        key: impl Into<RecordKey>,
    ) -> BucketResult<Option<V>> {
        let records = self
            .run(Operation::Get(vec![key.into()]))
            .await?
            .into_records()?;
        records
            .into_iter()
            .next()
            .map(|(_, text)| codec::decode(&text))
            .transpose()
            .map_err(BucketError::from)
    }

    /// Fetch several keys at once. Only found keys appear in the map, and a
    /// lookup that finds nothing (including an empty key list) yields `None`.
    pub async fn get_many<V, K>(
        &self,
        keys: impl IntoIterator<Item = K>,
    ) -> BucketResult<Option<BTreeMap<RecordKey, V>>>
    where
        V: DeserializeOwned,
        K: Into<RecordKey>,
    {
        let keys: Vec<RecordKey> = keys.into_iter().map(Into::into).collect();
        if keys.is_empty() {
            self.inner.lifecycle.ready().await?;
            return Ok(None);
        }
        let records = self.run(Operation::Get(keys)).await?.into_records()?;
        if records.is_empty() {
            return Ok(None);
        }
        decode_records(records).map(Some)
    }

    /// Insert or replace one record.
    pub async fn set<V: Serialize + ?Sized>(
        &self,
        key: impl Into<RecordKey>,
        value: &V,
    ) -> BucketResult<()> {
        let record = (key.into(), codec::encode(value)?);
        self.run(Operation::Put(vec![record])).await.map(|_| ())
    }

    /// Insert or replace several records in one unit of work.
    ///
    /// When a key appears more than once the last value wins.
    pub async fn set_many<K, V>(&self, entries: impl IntoIterator<Item = (K, V)>) -> BucketResult<()>
    where
        K: Into<RecordKey>,
        V: Serialize,
    {
        let mut pairs = BTreeMap::new();
        for (key, value) in entries {
            pairs.insert(key.into(), codec::encode(&value)?);
        }
        if pairs.is_empty() {
            return self.inner.lifecycle.ready().await;
        }
        self.run(Operation::Put(pairs.into_iter().collect()))
            .await
            .map(|_| ())
    }

    /// Delete one key. Deleting a missing key succeeds.
    pub async fn remove(&self, key: impl Into<RecordKey>) -> BucketResult<()> {
        self.run(Operation::Delete(vec![key.into()]))
            .await
            .map(|_| ())
    }

    pub async fn remove_many<K: Into<RecordKey>>(
        &self,
        keys: impl IntoIterator<Item = K>,
    ) -> BucketResult<()> {
        let keys: Vec<RecordKey> = keys.into_iter().map(Into::into).collect();
        if keys.is_empty() {
            return self.inner.lifecycle.ready().await;
        }
        self.run(Operation::Delete(keys)).await.map(|_| ())
    }

    pub async fn clear(&self) -> BucketResult<()> {
        self.run(Operation::Clear).await.map(|_| ())
    }

    /// Call `f` once per stored record, in backend order.
    ///
    /// Every record is decoded before the first call, so a decode failure
    /// means `f` is never called.
    pub async fn each<V, F>(&self, mut f: F) -> BucketResult<()>
    where
        V: DeserializeOwned,
        F: FnMut(RecordKey, V),
    {
        let records = self.run(Operation::Scan).await?.into_records()?;
        let decoded = records
            .into_iter()
            .map(|(key, text)| codec::decode(&text).map(|value| (key, value)))
            .collect::<Result<Vec<(RecordKey, V)>, _>>()?;
        for (key, value) in decoded {
            f(key, value);
        }
        Ok(())
    }

    /// Every record in the namespace. Empty when the namespace is empty.
    pub async fn get_all<V: DeserializeOwned>(&self) -> BucketResult<BTreeMap<RecordKey, V>> {
        let records = self.run(Operation::Scan).await?.into_records()?;
        decode_records(records)
    }

    pub async fn get_keys(&self) -> BucketResult<Vec<RecordKey>> {
        self.run(Operation::ScanKeys).await?.into_keys()
    }

    pub async fn get_length(&self) -> BucketResult<u64> {
        self.run(Operation::Count).await?.into_count()
    }

    pub async fn exists(&self, key: impl Into<RecordKey>) -> BucketResult<bool> {
        self.run(Operation::Contains(key.into()))
            .await?
            .into_found()
    }
}

impl Inner {
    /// Run connection attempt `attempt` to completion.
    async fn connect(self: Arc<Self>, attempt: u64) {
        let start = Instant::now();
        let deadline = self
            .open_timeout
            .map(|limit| tokio::time::Instant::now() + limit);

        let Some(gate) = within(deadline, self.open_gate.clone().lock_owned()).await else {
            self.lifecycle
                .settle(attempt, Err(BucketError::timed_out("open")));
            return;
        };

        let backend = self.backend.clone();
        let version = self.schema_version;
        let mut open = tokio::task::spawn_blocking(move || backend.open(version));

        let joined = match within(deadline, &mut open).await {
            Some(joined) => joined,
            None => {
                debug!(
                    "{}: open of {} timed out after {:?}",
                    self.backend.name(),
                    self.backend.namespace(),
                    start.elapsed()
                );
                self.lifecycle
                    .settle(attempt, Err(BucketError::timed_out("open")));
                open.await
            }
        };

        let result = joined
            .map_err(|e| BucketError::unknown(format!("backend task failed: {e}")))
            .and_then(|opened| opened.map_err(|e| self.backend.generate_error(e)));

        let opened = match &result {
            Ok(outcome) => {
                debug!(
                    "{}: opened {} ({:?}) in {:?}",
                    self.backend.name(),
                    self.backend.namespace(),
                    outcome,
                    start.elapsed()
                );
                true
            }
            Err(_) => false,
        };

        let applied = self.lifecycle.settle(attempt, result.map(|_| ()));
        if !applied && opened && self.lifecycle.should_release(attempt) {
            warn!(
                "{}: discarding stale connection to {} from attempt {}",
                self.backend.name(),
                self.backend.namespace(),
                attempt
            );
            let backend = self.backend.clone();
            match tokio::task::spawn_blocking(move || backend.destroy()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("{}: release failed: {e}", self.backend.name()),
                Err(e) => warn!("{}: release task failed: {e}", self.backend.name()),
            }
        }
        drop(gate);
    }
}

async fn within<F: Future>(deadline: Option<tokio::time::Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut).await.ok(),
        None => Some(fut.await),
    }
}

fn decode_records<V: DeserializeOwned>(
    records: Vec<(RecordKey, String)>,
) -> BucketResult<BTreeMap<RecordKey, V>> {
    records
        .into_iter()
        .map(|(key, text)| -> BucketResult<(RecordKey, V)> { Ok((key, codec::decode(&text)?)) })
        .collect()
}
