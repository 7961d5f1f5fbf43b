//! Background execution of requests.
//!
//! # State machine
//!
//! ```text
//! submit ──► register ──┬─ Joined ──► (no-op, caller subscribes to the running attempt)
//!                       │
//!                       └─ Started ─► Pending ──(permit)──► Running ──► transport
//!                                                                         │
//!                                      Success ◄── processor Ok ◄─────────┤
//!                                      Failed  ◄── processor Err          │
//!                                      Failed  ◄── transport Err ◄────────┘
//! cancel ─────────────────────────────► Cancelled (from Pending or Running)
//! ```
//!
//! Only one transport operation is ever in flight per request id. Work runs
//! on a Tokio runtime, never on the caller's context: [`RequestExecutor::submit`]
//! only registers the request and spawns a task.

use crate::error::RegistryError;
use crate::metrics::{REQUEST_DURATION, REQUESTS_COALESCED, REQUESTS_COMPLETED, REQUESTS_SUBMITTED};
use crate::registry::{Registration, RequestHandle, RequestRegistry, Subscription, lock};
use crate::retry::{RetryPolicy, retry_with_predicate};
use dispatch_core::error::{ProcessorError, RequestError, TransportError};
use dispatch_core::event::{EventSink, RequestOutcome};
use dispatch_core::processor::Processor;
use dispatch_core::request::{Request, RequestId, RequestState};
use dispatch_core::transport::Transport;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;

/// Configuration for [`RequestExecutor`].
///
/// # Example
///
/// ```
/// use dispatch_runtime::executor::ExecutorConfig;
/// use std::time::Duration;
///
/// let config = ExecutorConfig::default()
///     .with_max_concurrent(4)
///     .with_request_timeout(Duration::from_secs(10));
/// assert_eq!(config.max_concurrent, 4);
/// ```
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum number of transports running at once; further requests wait in `Pending`
    pub max_concurrent: usize,
    /// Timeout for requests that do not set their own
    pub request_timeout: Duration,
    /// Apply jitter to transport retry delays
    pub retry_jitter: bool,
}

impl ExecutorConfig {
    /// Set the concurrency limit, clamped to `1..=Semaphore::MAX_PERMITS`
    #[must_use]
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = clamp_permits(max_concurrent);
        self
    }

    /// Set the default request timeout
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Enable or disable retry jitter
    #[must_use]
    pub const fn with_retry_jitter(mut self, jitter: bool) -> Self {
        self.retry_jitter = jitter;
        self
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            request_timeout: Duration::from_secs(30),
            retry_jitter: true,
        }
    }
}

fn clamp_permits(max_concurrent: usize) -> usize {
    max_concurrent.clamp(1, Semaphore::MAX_PERMITS)
}

/// Result of [`RequestExecutor::submit`].
#[derive(Debug)]
pub struct Submission {
    /// Whether a new attempt was started or an in-flight one joined
    pub registration: Registration,
    /// Subscription of the sink passed to `submit`, if any
    pub subscription: Option<Subscription>,
}

struct ExecutorInner {
    registry: RequestRegistry,
    transport: Arc<dyn Transport>,
    config: ExecutorConfig,
    permits: Arc<Semaphore>,
    tasks: Mutex<HashMap<RequestId, (u32, AbortHandle)>>,
    runtime: Handle,
}

/// Runs requests through their transport and processor in the background.
///
/// Cheap to clone; clones share the same registry and task table.
#[derive(Clone)]
pub struct RequestExecutor {
    inner: Arc<ExecutorInner>,
}

impl RequestExecutor {
    /// Create an executor that spawns onto the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    #[must_use]
    pub fn new(
        registry: RequestRegistry,
        transport: Arc<dyn Transport>,
        config: ExecutorConfig,
    ) -> Self {
        Self::with_runtime(registry, transport, config, Handle::current())
    }

    /// Create an executor that spawns onto the given runtime.
    #[must_use]
    pub fn with_runtime(
        registry: RequestRegistry,
        transport: Arc<dyn Transport>,
        config: ExecutorConfig,
        runtime: Handle,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(clamp_permits(config.max_concurrent)));
        Self {
            inner: Arc::new(ExecutorInner {
                registry,
                transport,
                config,
                permits,
                tasks: Mutex::new(HashMap::new()),
                runtime,
            }),
        }
    }

    /// The registry this executor updates.
    #[must_use]
    pub fn registry(&self) -> &RequestRegistry {
        &self.inner.registry
    }

    /// The executor configuration.
    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.config
    }

    /// Submit a request.
    ///
    /// Never waits on I/O. If the request id is already in flight the call
    /// joins it; otherwise a new attempt starts in `Pending`.
    ///
    /// When `sink` is given it is subscribed before the new attempt is
    /// spawned, so it observes the attempt from `Pending` on. When joining,
    /// it receives the current state first.
    #[tracing::instrument(skip(self, request, processor, sink), fields(request_id = %request.id()))]
    pub fn submit(
        &self,
        request: Request,
        processor: Arc<dyn Processor>,
        sink: Option<Arc<dyn EventSink>>,
    ) -> Submission {
        let registration = self
            .inner
            .registry
            .register(request.id().clone(), processor.id());

        let subscription = sink.and_then(|sink| {
            self.inner
                .registry
                .subscribe(request.id(), sink)
                .map_err(|err| tracing::warn!(error = %err, "Subscribe after register failed"))
                .ok()
        });

        match &registration {
            Registration::Started(handle) => {
                metrics::counter!(REQUESTS_SUBMITTED).increment(1);
                tracing::info!(
                    attempt = handle.attempt(),
                    url = request.url(),
                    processor = %processor.id(),
                    "Request submitted"
                );
                self.spawn(handle.clone(), request, processor);
            }
            Registration::Joined(handle) => {
                metrics::counter!(REQUESTS_COALESCED).increment(1);
                tracing::debug!(attempt = handle.attempt(), "Joined in-flight request");
            }
        }

        Submission {
            registration,
            subscription,
        }
    }

    fn spawn(&self, handle: RequestHandle, request: Request, processor: Arc<dyn Processor>) {
        let id = handle.id().clone();
        let attempt = handle.attempt();

        // The task removes itself from `tasks` when done; holding the lock
        // across the spawn keeps that removal ordered after this insert.
        let mut tasks = lock(&self.inner.tasks);
        let task = self
            .inner
            .runtime
            .spawn(run(Arc::clone(&self.inner), handle, request, processor));
        tasks.insert(id, (attempt, task.abort_handle()));
    }

    /// Cancel the current attempt of `id` if it is still in flight.
    ///
    /// Returns `true` if the request moved to `Cancelled`. Subscribers see the
    /// `Cancelled` event; the transport task is aborted.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownRequest`] if `id` was never submitted.
    pub fn cancel(&self, id: &RequestId) -> Result<bool, RegistryError> {
        let Some(attempt) = self.inner.registry.cancel(id)? else {
            return Ok(false);
        };
        metrics::counter!(REQUESTS_COMPLETED, "state" => RequestState::Cancelled.to_string())
            .increment(1);

        // A submit racing this call may already have started the next
        // attempt; only the cancelled attempt's task is aborted.
        let mut tasks = lock(&self.inner.tasks);
        if tasks.get(id).is_some_and(|(running, _)| *running == attempt) {
            if let Some((_, task)) = tasks.remove(id) {
                task.abort();
            }
        }
        drop(tasks);

        tracing::info!(request_id = %id, attempt, "Request cancelled");
        Ok(true)
    }

    /// Number of attempts with a live background task.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        lock(&self.inner.tasks).len()
    }
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("config", &self.inner.config)
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

const fn is_retryable(err: &TransportError) -> bool {
    matches!(err, TransportError::Connection(_) | TransportError::Timeout(_))
}

async fn run(
    inner: Arc<ExecutorInner>,
    handle: RequestHandle,
    request: Request,
    processor: Arc<dyn Processor>,
) {
    let Ok(_permit) = Arc::clone(&inner.permits).acquire_owned().await else {
        return;
    };

    if let Err(err) = handle.transition(RequestState::Running, None) {
        // Cancelled or superseded while waiting for a permit.
        tracing::debug!(error = %err, "Request no longer pending");
        finish(&inner, &handle);
        return;
    }

    let started = Instant::now();
    let outcome = execute(&inner, &request, processor).await;
    let state = if outcome.is_ok() {
        RequestState::Success
    } else {
        RequestState::Failed
    };

    match handle.transition(state, Some(outcome)) {
        Ok(()) => {
            metrics::counter!(REQUESTS_COMPLETED, "state" => state.to_string()).increment(1);
            metrics::histogram!(REQUEST_DURATION).record(started.elapsed().as_secs_f64());
            tracing::info!(
                request_id = %handle.id(),
                attempt = handle.attempt(),
                state = %state,
                elapsed_ms = started.elapsed().as_millis(),
                "Request finished"
            );
        }
        Err(err) => {
            tracing::debug!(error = %err, "Discarding result of finished attempt");
        }
    }

    finish(&inner, &handle);
}

async fn execute(
    inner: &ExecutorInner,
    request: &Request,
    processor: Arc<dyn Processor>,
) -> RequestOutcome {
    let transport = &*inner.transport;
    let timeout = request.timeout().unwrap_or(inner.config.request_timeout);
    let policy = RetryPolicy::for_request(request).with_jitter(inner.config.retry_jitter);

    // Transports that enforce their own deadline see the effective one.
    let defaulted;
    let request = if request.timeout().is_some() {
        request
    } else {
        defaulted = request.clone().with_timeout(timeout);
        &defaulted
    };

    let response = retry_with_predicate(
        policy,
        || async move {
            match tokio::time::timeout(timeout, transport.execute(request)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(timeout)),
            }
        },
        is_retryable,
    )
    .await?;

    // Decoding may be CPU-bound; keep it off the async workers.
    match tokio::task::spawn_blocking(move || processor.process(response)).await {
        Ok(result) => result.map_err(RequestError::from),
        Err(err) => Err(ProcessorError::Malformed(format!("processor panicked: {err}")).into()),
    }
}

fn finish(inner: &ExecutorInner, handle: &RequestHandle) {
    let mut tasks = lock(&inner.tasks);
    if tasks
        .get(handle.id())
        .is_some_and(|(attempt, _)| *attempt == handle.attempt())
    {
        tasks.remove(handle.id());
    }
}
