//! Per-owner connector between a transient UI owner and the dispatch service.
//!
//! ```text
//!            submit                      bind(service)
//!   owner ───────────► ServiceAssister ◄──────────────── DispatchService
//!     ▲                   │      │
//!     │ callbacks,        │      └─ unbound: queue (FIFO, admission timeout)
//!     │ listeners         │
//!     └──── UiContext ◄───┴─ AssisterSink ◄── registry events
//! ```
//!
//! Events reach the assister through an [`EventSink`] that only posts to the
//! owner's [`UiContext`]. Everything that touches callbacks or listeners runs
//! when the owner drains its queue.
//!
//! Each `bind`/`unbind` starts a new generation. Events posted under an older
//! generation are dropped on arrival, so an owner never sees an event twice
//! across a rebind.
//!
//! Lock order: assister state, then service owner records, then registry.

use crate::metrics::BINDING_TIMEOUTS;
use crate::registry::{RequestRegistry, Subscription, lock};
use crate::service::DispatchService;
use dispatch_core::context::UiContext;
use dispatch_core::error::RequestError;
use dispatch_core::event::{Callback, EventSink, LifecycleEvent, LifecycleListener};
use dispatch_core::owner::OwnerKey;
use dispatch_core::processor::Processor;
use dispatch_core::request::{Request, RequestId};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

/// Configuration for [`ServiceAssister`].
#[derive(Debug, Clone)]
pub struct AssisterConfig {
    /// How long a submission made before `bind` may wait in the queue
    pub admission_timeout: Duration,
}

impl AssisterConfig {
    /// Set the admission timeout
    #[must_use]
    pub const fn with_admission_timeout(mut self, timeout: Duration) -> Self {
        self.admission_timeout = timeout;
        self
    }
}

impl Default for AssisterConfig {
    fn default() -> Self {
        Self {
            admission_timeout: Duration::from_secs(10),
        }
    }
}

struct Queued {
    seq: u64,
    request: Request,
    processor: Arc<dyn Processor>,
    callback: Option<Callback>,
    timer: Option<AbortHandle>,
}

#[derive(Default)]
struct AssisterState {
    service: Option<DispatchService>,
    queued: VecDeque<Queued>,
    next_seq: u64,
    subscriptions: HashMap<RequestId, Subscription>,
    listeners: Vec<Arc<dyn LifecycleListener>>,
}

struct AssisterInner {
    owner: OwnerKey,
    ui: UiContext,
    config: AssisterConfig,
    runtime: Handle,
    generation: Arc<AtomicU64>,
    state: Mutex<AssisterState>,
}

/// Lifecycle-safe request submission for one UI owner.
///
/// Cheap to clone; clones share state. The assister is owned by the UI owner
/// and dropped with it; requests it submitted keep running in the service.
///
/// # Example
///
/// ```no_run
/// use dispatch_core::context::ui_context;
/// use dispatch_core::owner::OwnerKey;
/// use dispatch_core::request::Request;
/// use dispatch_runtime::{DispatchService, DummyProcessor, ExecutorConfig, HttpTransport, ServiceAssister};
/// use std::sync::Arc;
///
/// # async fn example() {
/// let (ui, mut queue) = ui_context();
/// let assister = ServiceAssister::new(OwnerKey::new("main"), ui);
///
/// // Submitted before the service is bound: queued.
/// let id = assister.submit(Request::get("https://example.com/"), Arc::new(DummyProcessor), None);
///
/// let service = DispatchService::start(Arc::new(HttpTransport::new()), ExecutorConfig::default());
/// assister.bind(&service);
/// assert_eq!(service.tracked(&OwnerKey::new("main")), vec![id]);
/// # queue.drain();
/// # }
/// ```
#[derive(Clone)]
pub struct ServiceAssister {
    inner: Arc<AssisterInner>,
}

impl ServiceAssister {
    /// Create an unbound assister with the default configuration.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    #[must_use]
    pub fn new(owner: OwnerKey, ui: UiContext) -> Self {
        Self::with_config(owner, ui, AssisterConfig::default())
    }

    /// Create an unbound assister.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    #[must_use]
    pub fn with_config(owner: OwnerKey, ui: UiContext, config: AssisterConfig) -> Self {
        Self {
            inner: Arc::new(AssisterInner {
                owner,
                ui,
                config,
                runtime: Handle::current(),
                generation: Arc::new(AtomicU64::new(0)),
                state: Mutex::new(AssisterState::default()),
            }),
        }
    }

    /// The owner this assister serves.
    #[must_use]
    pub fn owner(&self) -> &OwnerKey {
        &self.inner.owner
    }

    /// The owner's UI context.
    #[must_use]
    pub fn ui(&self) -> &UiContext {
        &self.inner.ui
    }

    /// Whether a service is bound.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        lock(&self.inner.state).service.is_some()
    }

    /// Number of submissions waiting for `bind`.
    #[must_use]
    pub fn queued(&self) -> usize {
        lock(&self.inner.state).queued.len()
    }

    /// The bound service's registry, if bound.
    #[must_use]
    pub fn registry(&self) -> Option<RequestRegistry> {
        lock(&self.inner.state)
            .service
            .as_ref()
            .map(|service| service.registry().clone())
    }

    /// Submit a request on behalf of the owner.
    ///
    /// Never waits on I/O. When bound, the request goes straight to the
    /// executor (joining an in-flight request with the same id). When
    /// unbound, it is queued and dispatched in submission order on the next
    /// `bind`; if that does not happen within the admission timeout the
    /// callback receives [`RequestError::Binding`].
    ///
    /// `callback` runs on the owner's UI context with the terminal outcome of
    /// the attempt this submission started or joined.
    #[tracing::instrument(skip_all, fields(owner = %self.inner.owner, request_id = %request.id()))]
    pub fn submit(
        &self,
        request: Request,
        processor: Arc<dyn Processor>,
        callback: Option<Callback>,
    ) -> RequestId {
        let id = request.id().clone();
        let mut state = lock(&self.inner.state);

        if let Some(service) = state.service.clone() {
            self.inner
                .dispatch(&mut state, &service, request, processor, callback);
            return id;
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.queued.push_back(Queued {
            seq,
            request,
            processor,
            callback,
            timer: None,
        });
        let timer = self.arm_admission_timer(seq);
        if let Some(queued) = state.queued.back_mut() {
            queued.timer = Some(timer);
        }

        tracing::debug!(queued = state.queued.len(), "Not bound, submission queued");
        id
    }

    fn arm_admission_timer(&self, seq: u64) -> AbortHandle {
        let inner = Arc::downgrade(&self.inner);
        let timeout = self.inner.config.admission_timeout;

        self.inner
            .runtime
            .spawn(async move {
                tokio::time::sleep(timeout).await;
                if let Some(inner) = inner.upgrade() {
                    inner.expire(seq);
                }
            })
            .abort_handle()
    }

    /// Attach to a service.
    ///
    /// Re-subscribes to every request this owner submitted earlier (running
    /// or already terminal) without submitting anything again, then flushes
    /// the queue in submission order.
    #[tracing::instrument(skip_all, fields(owner = %self.inner.owner))]
    pub fn bind(&self, service: &DispatchService) {
        let mut state = lock(&self.inner.state);
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        state.service = Some(service.clone());
        state.subscriptions.clear();

        let tracked = service.tracked(&self.inner.owner);
        for id in &tracked {
            match service.registry().subscribe(id, self.inner.sink(generation)) {
                Ok(subscription) => {
                    state.subscriptions.insert(id.clone(), subscription);
                }
                Err(err) => {
                    let dropped = service.untrack(&self.inner.owner, id);
                    tracing::warn!(request_id = %id, error = %err, "Tracked request is gone, dropping it");
                    tracing::debug!(request_id = %id, callbacks = dropped.len(), "Pending callbacks dropped");
                }
            }
        }

        let queued = std::mem::take(&mut state.queued);
        let flushed = queued.len();
        for item in queued {
            if let Some(timer) = item.timer {
                timer.abort();
            }
            self.inner
                .dispatch(&mut state, service, item.request, item.processor, item.callback);
        }

        tracing::info!(
            generation,
            reattached = tracked.len(),
            flushed,
            "Assister bound"
        );
    }

    /// Detach from the service.
    ///
    /// Stops delivery to this owner. Nothing is cancelled: requests keep
    /// running and their results wait for the next `bind`.
    #[tracing::instrument(skip_all, fields(owner = %self.inner.owner))]
    pub fn unbind(&self) {
        let mut state = lock(&self.inner.state);
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        state.service = None;
        state.subscriptions.clear();
        tracing::info!("Assister unbound");
    }

    /// Cancel a request submitted through this assister.
    ///
    /// A queued submission is removed and its callback receives
    /// [`RequestError::Cancelled`]. A dispatched one is cancelled in the
    /// executor. Returns `false` if there was nothing to cancel.
    pub fn cancel(&self, id: &RequestId) -> bool {
        let mut state = lock(&self.inner.state);

        if let Some(position) = state.queued.iter().position(|q| q.request.id() == id) {
            if let Some(item) = state.queued.remove(position) {
                if let Some(timer) = item.timer {
                    timer.abort();
                }
                if let Some(callback) = item.callback {
                    let id = id.clone();
                    self.inner
                        .ui
                        .post(move || callback(&id, Err(RequestError::Cancelled)));
                }
            }
            return true;
        }

        state.service.as_ref().is_some_and(|service| {
            service
                .executor()
                .cancel(id)
                .map_err(|err| tracing::debug!(error = %err, "Nothing to cancel"))
                .unwrap_or(false)
        })
    }

    /// Register a lifecycle listener.
    ///
    /// The listener receives every event of this owner's requests on the UI
    /// context. If bound, it is first sent the current state of each request
    /// still in flight.
    ///
    /// The replay is checked against the registry when it runs: a request
    /// that moved on in between is skipped, since the listener receives that
    /// newer event through the normal path.
    pub fn register_receiver(&self, listener: Arc<dyn LifecycleListener>) {
        let mut state = lock(&self.inner.state);
        state.listeners.push(Arc::clone(&listener));

        let Some(service) = state.service.as_ref() else {
            return;
        };
        let registry = service.registry().clone();
        let in_flight: Vec<LifecycleEvent> = state
            .subscriptions
            .keys()
            .filter_map(|id| registry.snapshot(id))
            .filter(|event| event.state.is_in_flight())
            .collect();

        if !in_flight.is_empty() {
            let generation = self.inner.generation.load(Ordering::Acquire);
            let inner = Arc::downgrade(&self.inner);
            self.inner.ui.post(move || {
                let current = inner
                    .upgrade()
                    .is_some_and(|inner| inner.generation.load(Ordering::Acquire) == generation);
                if !current {
                    return;
                }
                for event in &in_flight {
                    let unchanged = registry.snapshot(&event.request_id).is_some_and(|now| {
                        now.attempt == event.attempt && now.state == event.state
                    });
                    if unchanged {
                        listener.on_lifecycle(event);
                    } else {
                        tracing::debug!(request_id = %event.request_id, "Request moved on, skipping replay");
                    }
                }
            });
        }
    }

    /// Remove a listener registered with [`register_receiver`](Self::register_receiver).
    ///
    /// Returns `false` if it was not registered.
    pub fn unregister_receiver(&self, listener: &Arc<dyn LifecycleListener>) -> bool {
        let mut state = lock(&self.inner.state);
        let before = state.listeners.len();
        state.listeners.retain(|l| !Arc::ptr_eq(l, listener));
        state.listeners.len() != before
    }
}

impl std::fmt::Debug for ServiceAssister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAssister")
            .field("owner", &self.inner.owner)
            .field("generation", &self.inner.generation.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl AssisterInner {
    fn sink(self: &Arc<Self>, generation: u64) -> Arc<dyn EventSink> {
        Arc::new(AssisterSink {
            ui: self.ui.clone(),
            inner: Arc::downgrade(self),
            current: Arc::clone(&self.generation),
            generation,
        })
    }

    fn dispatch(
        self: &Arc<Self>,
        state: &mut AssisterState,
        service: &DispatchService,
        request: Request,
        processor: Arc<dyn Processor>,
        callback: Option<Callback>,
    ) {
        let id = request.id().clone();
        let sink = if state.subscriptions.contains_key(&id) {
            None
        } else {
            Some(self.sink(self.generation.load(Ordering::Acquire)))
        };

        let submission = service.executor().submit(request, processor, sink);
        service.track(
            &self.owner,
            &id,
            submission.registration.handle().attempt(),
            callback,
        );
        if let Some(subscription) = submission.subscription {
            state.subscriptions.insert(id, subscription);
        }
    }

    fn expire(&self, seq: u64) {
        let expired = {
            let mut state = lock(&self.state);
            let Some(position) = state.queued.iter().position(|q| q.seq == seq) else {
                return;
            };
            state.queued.remove(position)
        };
        let Some(item) = expired else {
            return;
        };

        let timeout = self.config.admission_timeout;
        let id = item.request.id().clone();
        metrics::counter!(BINDING_TIMEOUTS).increment(1);
        tracing::warn!(
            owner = %self.owner,
            request_id = %id,
            timeout_ms = timeout.as_millis(),
            "No service bound within admission timeout"
        );

        if let Some(callback) = item.callback {
            self.ui
                .post(move || callback(&id, Err(RequestError::Binding(timeout))));
        }
    }

    /// Runs on the UI context.
    fn on_event(&self, generation: u64, event: &LifecycleEvent) {
        let (listeners, callbacks) = {
            let mut state = lock(&self.state);
            if self.generation.load(Ordering::Acquire) != generation {
                return;
            }
            let Some(service) = state.service.clone() else {
                return;
            };

            let mut callbacks = Vec::new();
            if event.is_terminal() {
                let (taken, still_tracked) =
                    service.take_callbacks(&self.owner, &event.request_id, event.attempt);
                callbacks = taken;
                if !still_tracked {
                    state.subscriptions.remove(&event.request_id);
                }
            }
            (state.listeners.clone(), callbacks)
        };

        for listener in &listeners {
            listener.on_lifecycle(event);
        }

        if let Some(outcome) = &event.outcome {
            for callback in callbacks {
                callback(&event.request_id, outcome.clone());
            }
        }
    }
}

// Called under the registry's entry lock: must not lock assister state or
// hold a strong reference to the assister.
struct AssisterSink {
    ui: UiContext,
    inner: Weak<AssisterInner>,
    current: Arc<AtomicU64>,
    generation: u64,
}

impl EventSink for AssisterSink {
    fn deliver(&self, event: &LifecycleEvent) -> bool {
        if self.inner.strong_count() == 0
            || self.current.load(Ordering::Acquire) != self.generation
        {
            return false;
        }

        let inner = Weak::clone(&self.inner);
        let generation = self.generation;
        let event = event.clone();
        self.ui.post(move || {
            if let Some(inner) = inner.upgrade() {
                inner.on_event(generation, &event);
            }
        })
    }
}
