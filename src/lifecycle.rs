//! Connection lifecycle of a driver instance.
//!
//! The state lives in a `tokio::sync::watch` channel so that any number of
//! callers can wait for readiness. Each connection attempt is numbered and only
//! the first settlement of the current attempt is applied; a late settlement
//! (the open finishing after its watchdog fired, or after `destroy`) is ignored.

use log::{debug, warn};
use std::sync::{Arc, RwLock};
use tokio::sync::watch;

use crate::error::{BucketError, BucketResult};
use crate::namespace::Namespace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum LifecycleState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Receives the outcome of every connection attempt, exactly once per attempt.
pub trait ReadinessListener: Send + Sync {
    fn notify_ready(&self, namespace: &Namespace);

    fn notify_failed(&self, namespace: &Namespace, error: &BucketError);
}

/// Logs readiness. Installed unless another listener is set.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReadiness;

impl ReadinessListener for LogReadiness {
    fn notify_ready(&self, namespace: &Namespace) {
        debug!("{namespace}: ready");
    }

    fn notify_failed(&self, namespace: &Namespace, error: &BucketError) {
        warn!("{namespace}: connection failed: {error}");
    }
}

#[derive(Debug, Clone)]
struct Snapshot {
    state: LifecycleState,
    attempt: u64,
    failure: Option<BucketError>,
}

/// Result of asking the lifecycle to start connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Begin {
    /// A new attempt was started; the caller must run the open
    Started(u64),
    /// An attempt is already running; wait for it
    InProgress(u64),
    Connected,
}

pub(crate) struct Lifecycle {
    state: watch::Sender<Snapshot>,
    namespace: Namespace,
    listener: RwLock<Arc<dyn ReadinessListener>>,
}

impl Lifecycle {
    pub(crate) fn new(namespace: Namespace) -> Self {
        let (state, _) = watch::channel(Snapshot {
            state: LifecycleState::Disconnected,
            attempt: 0,
            failure: None,
        });
        Self {
            state,
            namespace,
            listener: RwLock::new(Arc::new(LogReadiness)),
        }
    }

    pub(crate) fn set_listener(&self, listener: Arc<dyn ReadinessListener>) {
        let mut slot = self.listener.write().unwrap_or_else(|e| e.into_inner());
        *slot = listener;
    }

    fn listener(&self) -> Arc<dyn ReadinessListener> {
        self.listener
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn state(&self) -> LifecycleState {
        self.state.borrow().state
    }

    /// Move to `Connecting` unless already connected or connecting.
    pub(crate) fn begin_connect(&self) -> Begin {
        let mut begin = Begin::Connected;
        self.state.send_if_modified(|snap| match snap.state {
            LifecycleState::Connected => false,
            LifecycleState::Connecting => {
                begin = Begin::InProgress(snap.attempt);
                false
            }
            LifecycleState::Disconnected | LifecycleState::Failed => {
                snap.attempt += 1;
                snap.state = LifecycleState::Connecting;
                snap.failure = None;
                begin = Begin::Started(snap.attempt);
                true
            }
        });
        begin
    }

    /// Record the outcome of `attempt`. Returns whether it was applied.
    pub(crate) fn settle(&self, attempt: u64, result: BucketResult<()>) -> bool {
        let mut applied = false;
        self.state.send_if_modified(|snap| {
            if snap.attempt != attempt || snap.state != LifecycleState::Connecting {
                return false;
            }
            match &result {
                Ok(()) => snap.state = LifecycleState::Connected,
                Err(error) => {
                    snap.state = LifecycleState::Failed;
                    snap.failure = Some(error.clone());
                }
            }
            applied = true;
            true
        });

        if applied {
            let listener = self.listener();
            match &result {
                Ok(()) => listener.notify_ready(&self.namespace),
                Err(error) => listener.notify_failed(&self.namespace, error),
            }
        }
        applied
    }

    /// Whether a connection opened by `attempt` is orphaned and must be closed.
    ///
    /// False once a newer attempt has started, since that attempt owns the
    /// connection now.
    pub(crate) fn should_release(&self, attempt: u64) -> bool {
        let snap = self.state.borrow();
        snap.attempt == attempt && snap.state != LifecycleState::Connected
    }

    /// Wait until `attempt` has settled and return its outcome.
    pub(crate) async fn wait_settled(&self, attempt: u64) -> BucketResult<()> {
        let mut rx = self.state.subscribe();
        let snap = rx
            .wait_for(|snap| snap.attempt != attempt || snap.state != LifecycleState::Connecting)
            .await
            .map_err(|e| BucketError::unknown(e.to_string()))?
            .clone();

        if snap.attempt != attempt {
            return Err(BucketError::connection_unavailable(
                "superseded by a newer connection attempt",
            ));
        }
        match snap.state {
            LifecycleState::Connected => Ok(()),
            LifecycleState::Failed => Err(snap
                .failure
                .unwrap_or_else(|| BucketError::unknown("connection attempt failed"))),
            _ => Err(BucketError::connection_unavailable("destroyed while connecting")),
        }
    }

    /// Wait out any in-flight attempt, then require the connected state.
    pub(crate) async fn ready(&self) -> BucketResult<()> {
        let mut rx = self.state.subscribe();
        let snap = rx
            .wait_for(|snap| snap.state != LifecycleState::Connecting)
            .await
            .map_err(|e| BucketError::unknown(e.to_string()))?
            .clone();

        match snap.state {
            LifecycleState::Connected => Ok(()),
            LifecycleState::Failed => Err(BucketError::connection_unavailable(
                snap.failure
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "open failed".to_string()),
            )),
            _ => Err(BucketError::connection_unavailable("not initialized")),
        }
    }

    /// Move to `Disconnected`. An attempt still in flight is reported failed.
    pub(crate) fn disconnect(&self) {
        let mut abandoned = false;
        self.state.send_if_modified(|snap| {
            if snap.state == LifecycleState::Disconnected {
                return false;
            }
            abandoned = snap.state == LifecycleState::Connecting;
            snap.state = LifecycleState::Disconnected;
            snap.failure = None;
            true
        });

        if abandoned {
            let error = BucketError::connection_unavailable("destroyed while connecting");
            self.listener().notify_failed(&self.namespace, &error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Counting {
        events: Mutex<Vec<&'static str>>,
    }

    impl ReadinessListener for Counting {
        fn notify_ready(&self, _: &Namespace) {
            self.events.lock().unwrap().push("ready");
        }

        fn notify_failed(&self, _: &Namespace, _: &BucketError) {
            self.events.lock().unwrap().push("failed");
        }
    }

    fn lifecycle() -> (Lifecycle, Arc<Counting>) {
        let lifecycle = Lifecycle::new(Namespace::new("db", "table").unwrap());
        let listener = Arc::new(Counting::default());
        lifecycle.set_listener(listener.clone());
        (lifecycle, listener)
    }

    #[test]
    fn begin_connect_starts_one_attempt_at_a_time() {
        let (lifecycle, _) = lifecycle();
        assert_eq!(lifecycle.state(), LifecycleState::Disconnected);
        assert_eq!(lifecycle.begin_connect(), Begin::Started(1));
        assert_eq!(lifecycle.begin_connect(), Begin::InProgress(1));
        assert!(lifecycle.settle(1, Ok(())));
        assert_eq!(lifecycle.begin_connect(), Begin::Connected);
    }

    #[test]
    fn only_first_settlement_of_current_attempt_applies() {
        let (lifecycle, listener) = lifecycle();
        let Begin::Started(attempt) = lifecycle.begin_connect() else {
            panic!("expected a new attempt");
        };

        assert!(lifecycle.settle(attempt, Err(BucketError::timed_out("open"))));
        assert!(!lifecycle.settle(attempt, Ok(())));
        assert!(!lifecycle.settle(attempt + 7, Ok(())));
        assert_eq!(lifecycle.state(), LifecycleState::Failed);
        assert!(lifecycle.should_release(attempt));
        assert_eq!(*listener.events.lock().unwrap(), ["failed"]);

        // re-init after failure
        assert_eq!(lifecycle.begin_connect(), Begin::Started(attempt + 1));
        assert!(!lifecycle.should_release(attempt));
    }

    #[test]
    fn disconnect_abandons_in_flight_attempt() {
        let (lifecycle, listener) = lifecycle();
        assert_eq!(lifecycle.begin_connect(), Begin::Started(1));
        lifecycle.disconnect();
        assert_eq!(lifecycle.state(), LifecycleState::Disconnected);
        assert!(!lifecycle.settle(1, Ok(())));
        assert!(lifecycle.should_release(1));
        assert_eq!(*listener.events.lock().unwrap(), ["failed"]);
    }

    #[tokio::test]
    async fn ready_waits_for_connecting_to_settle() {
        let (lifecycle, _) = lifecycle();
        let lifecycle = Arc::new(lifecycle);
        assert_eq!(
            lifecycle.ready().await.unwrap_err().kind(),
            ErrorKind::NotFound
        );

        assert_eq!(lifecycle.begin_connect(), Begin::Started(1));
        let waiter = {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move { lifecycle.ready().await })
        };
        tokio::task::yield_now().await;
        assert!(lifecycle.settle(1, Ok(())));
        assert!(waiter.await.unwrap().is_ok());
        assert!(lifecycle.wait_settled(1).await.is_ok());
    }

    #[tokio::test]
    async fn failed_attempt_reports_original_error() {
        let (lifecycle, _) = lifecycle();
        assert_eq!(lifecycle.begin_connect(), Begin::Started(1));
        let cause = BucketError::new(ErrorKind::PermissionDenied, "locked");
        assert!(lifecycle.settle(1, Err(cause)));

        let err = lifecycle.wait_settled(1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);

        let err = lifecycle.ready().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.message().contains("locked"));
    }
}
