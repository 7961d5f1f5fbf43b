//! The long-lived host of request execution.
//!
//! A [`DispatchService`] is created once at process start and outlives every
//! UI owner. Besides the executor it keeps, per [`OwnerKey`], the ids an
//! owner submitted and the callbacks still waiting for a terminal outcome.
//! When a recreated owner binds again, that record is how it finds its
//! requests without submitting them a second time.

use crate::error::ServiceError;
use crate::executor::{ExecutorConfig, RequestExecutor};
use crate::registry::{RequestRegistry, lock};
use dispatch_core::event::Callback;
use dispatch_core::owner::OwnerKey;
use dispatch_core::request::RequestId;
use dispatch_core::transport::Transport;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

struct PendingCallback {
    attempt: u32,
    callback: Callback,
}

struct TrackedRequest {
    id: RequestId,
    latest_attempt: u32,
    callbacks: Vec<PendingCallback>,
}

struct ServiceInner {
    executor: RequestExecutor,
    owners: Mutex<HashMap<OwnerKey, Vec<TrackedRequest>>>,
}

/// Process-wide dispatch service.
///
/// Cheap to clone; clones share the same executor, registry and owner
/// records.
#[derive(Clone)]
pub struct DispatchService {
    inner: Arc<ServiceInner>,
}

impl DispatchService {
    /// Start a service with a fresh registry on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    #[must_use]
    pub fn start(transport: Arc<dyn Transport>, config: ExecutorConfig) -> Self {
        tracing::info!(
            max_concurrent = config.max_concurrent,
            request_timeout_ms = config.request_timeout.as_millis(),
            "Starting dispatch service"
        );
        Self::with_executor(RequestExecutor::new(
            RequestRegistry::new(),
            transport,
            config,
        ))
    }

    /// Wrap an existing executor.
    #[must_use]
    pub fn with_executor(executor: RequestExecutor) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                executor,
                owners: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The executor.
    #[must_use]
    pub fn executor(&self) -> &RequestExecutor {
        &self.inner.executor
    }

    /// The registry.
    #[must_use]
    pub fn registry(&self) -> &RequestRegistry {
        self.inner.executor.registry()
    }

    /// Ids tracked for `owner`, in order of first submission.
    #[must_use]
    pub fn tracked(&self, owner: &OwnerKey) -> Vec<RequestId> {
        lock(&self.inner.owners)
            .get(owner)
            .map(|requests| requests.iter().map(|r| r.id.clone()).collect())
            .unwrap_or_default()
    }

    /// Forget everything recorded for `owner`.
    ///
    /// For owners that are finished for good. Pending callbacks are dropped
    /// without being called; the requests themselves keep running.
    pub fn release(&self, owner: &OwnerKey) {
        if let Some(requests) = lock(&self.inner.owners).remove(owner) {
            tracing::debug!(owner = %owner, tracked = requests.len(), "Owner released");
        }
    }

    /// Record that `owner` is interested in attempt `attempt` of `id`.
    pub(crate) fn track(
        &self,
        owner: &OwnerKey,
        id: &RequestId,
        attempt: u32,
        callback: Option<Callback>,
    ) {
        let mut owners = lock(&self.inner.owners);
        let requests = owners.entry(owner.clone()).or_default();

        let index = match requests.iter().position(|r| &r.id == id) {
            Some(index) => index,
            None => {
                requests.push(TrackedRequest {
                    id: id.clone(),
                    latest_attempt: attempt,
                    callbacks: Vec::new(),
                });
                requests.len() - 1
            }
        };

        let tracked = &mut requests[index];
        tracked.latest_attempt = tracked.latest_attempt.max(attempt);
        if let Some(callback) = callback {
            requests[index]
                .callbacks
                .push(PendingCallback { attempt, callback });
        }
    }

    /// Take the callbacks of `owner` that a terminal event of `attempt`
    /// completes.
    ///
    /// Returns the callbacks and whether `id` is still tracked: it stays
    /// tracked while the owner submitted or joined a later attempt.
    pub(crate) fn take_callbacks(
        &self,
        owner: &OwnerKey,
        id: &RequestId,
        attempt: u32,
    ) -> (Vec<Callback>, bool) {
        let mut owners = lock(&self.inner.owners);
        let Some(requests) = owners.get_mut(owner) else {
            return (Vec::new(), false);
        };
        let Some(index) = requests.iter().position(|r| &r.id == id) else {
            return (Vec::new(), false);
        };

        let (done, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut requests[index].callbacks)
            .into_iter()
            .partition(|pending| pending.attempt <= attempt);

        let still_tracked = requests[index].latest_attempt > attempt;
        if still_tracked {
            requests[index].callbacks = waiting;
        } else {
            requests.remove(index);
            if requests.is_empty() {
                owners.remove(owner);
            }
        }

        (done.into_iter().map(|pending| pending.callback).collect(), still_tracked)
    }

    /// Stop tracking `id` for `owner`, returning its pending callbacks.
    pub(crate) fn untrack(&self, owner: &OwnerKey, id: &RequestId) -> Vec<Callback> {
        let mut owners = lock(&self.inner.owners);
        let Some(requests) = owners.get_mut(owner) else {
            return Vec::new();
        };
        let Some(index) = requests.iter().position(|r| &r.id == id) else {
            return Vec::new();
        };

        let removed = requests.remove(index);
        if requests.is_empty() {
            owners.remove(owner);
        }
        removed.callbacks.into_iter().map(|p| p.callback).collect()
    }

    /// Wait for running requests to finish.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::ShutdownTimeout`] if requests are still running
    /// when `timeout` expires.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), ServiceError> {
        tracing::info!("Initiating dispatch service shutdown");

        let start = Instant::now();
        let poll_interval = Duration::from_millis(20);

        loop {
            let in_flight = self.inner.executor.in_flight();
            if in_flight == 0 {
                tracing::info!("All requests finished, shutdown complete");
                return Ok(());
            }

            if start.elapsed() >= timeout {
                tracing::error!(in_flight, "Shutdown timed out");
                return Err(ServiceError::ShutdownTimeout(in_flight));
            }

            tokio::time::sleep(poll_interval).await;
        }
    }
}

impl std::fmt::Debug for DispatchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchService")
            .field("executor", &self.inner.executor)
            .field("owners", &lock(&self.inner.owners).len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_core::error::TransportError;
    use dispatch_core::event::RequestOutcome;
    use dispatch_core::processor::RawResponse;
    use dispatch_core::request::Request;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Offline;

    impl Transport for Offline {
        fn execute<'a>(
            &'a self,
            _request: &'a Request,
        ) -> BoxFuture<'a, Result<RawResponse, TransportError>> {
            Box::pin(async { Err(TransportError::Connection("offline".into())) })
        }
    }

    fn counting(hits: &Arc<AtomicUsize>) -> Callback {
        let hits = Arc::clone(hits);
        Box::new(move |_: &RequestId, _: RequestOutcome| {
            hits.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn callbacks_are_taken_per_attempt() {
        let service = DispatchService::start(Arc::new(Offline), ExecutorConfig::default());
        let owner = OwnerKey::new("screen");
        let id = RequestId::new("r");
        let hits = Arc::new(AtomicUsize::new(0));

        service.track(&owner, &id, 1, Some(counting(&hits)));
        service.track(&owner, &id, 2, Some(counting(&hits)));
        assert_eq!(service.tracked(&owner), vec![id.clone()]);

        let (first, still_tracked) = service.take_callbacks(&owner, &id, 1);
        assert_eq!(first.len(), 1);
        assert!(still_tracked);

        let (second, still_tracked) = service.take_callbacks(&owner, &id, 2);
        assert_eq!(second.len(), 1);
        assert!(!still_tracked);
        assert!(service.tracked(&owner).is_empty());
    }

    #[tokio::test]
    async fn later_attempt_without_callback_stays_tracked() {
        let service = DispatchService::start(Arc::new(Offline), ExecutorConfig::default());
        let owner = OwnerKey::new("screen");
        let id = RequestId::new("r");

        service.track(&owner, &id, 1, None);
        service.track(&owner, &id, 2, None);

        let (taken, still_tracked) = service.take_callbacks(&owner, &id, 1);
        assert!(taken.is_empty());
        assert!(still_tracked, "attempt 2 is still owed to the owner");
        assert_eq!(service.tracked(&owner), vec![id.clone()]);

        let (_, still_tracked) = service.take_callbacks(&owner, &id, 2);
        assert!(!still_tracked);
        assert!(service.tracked(&owner).is_empty());
    }

    #[tokio::test]
    async fn tracked_ids_keep_submission_order() {
        let service = DispatchService::start(Arc::new(Offline), ExecutorConfig::default());
        let owner = OwnerKey::new("screen");

        for name in ["b", "a", "c", "a"] {
            service.track(&owner, &RequestId::new(name), 1, None);
        }

        let names: Vec<_> = service
            .tracked(&owner)
            .iter()
            .map(|id| id.as_str().to_string())
            .collect();
        assert_eq!(names, vec!["b", "a", "c"]);

        assert!(service.untrack(&owner, &RequestId::new("a")).is_empty());
        service.release(&owner);
        assert!(service.tracked(&owner).is_empty());
    }

    #[tokio::test]
    async fn idle_service_shuts_down_immediately() {
        let service = DispatchService::start(Arc::new(Offline), ExecutorConfig::default());
        assert_eq!(service.shutdown(Duration::from_millis(10)).await, Ok(()));
    }
}
