//! Process-wide table of requests and their lifecycle state.
//!
//! The registry is the single source of truth for request state. It is a
//! leaf component: it knows nothing about transports, processors or owners.
//!
//! # Locking
//!
//! ```text
//! RwLock<HashMap<RequestId, Arc<Mutex<Entry>>>>
//!        │                         │
//!        │ held only for           └── held for every state change and every
//!        │ lookup / insert / evict     subscribe, so check-and-deliver is atomic
//! ```
//!
//! Updates to unrelated requests never contend on the same entry lock.
//! Lock order is always map, then entry.
//!
//! # Delivery
//!
//! Subscribers are notified synchronously with the state change, while the
//! entry lock is held, by calling [`EventSink::deliver`]. Sinks only enqueue;
//! the subscriber processes the event on its own context. Because every
//! delivery for an id happens under the same lock, each sink receives the
//! events of that id in state order.

use crate::error::RegistryError;
use chrono::Utc;
use dispatch_core::error::{FailureCause, RequestError};
use dispatch_core::event::{EventSink, LifecycleEvent, RequestOutcome};
use dispatch_core::processor::ProcessorId;
use dispatch_core::request::{RequestId, RequestState};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct SubscriberSlot {
    id: u64,
    sink: Arc<dyn EventSink>,
}

struct Entry {
    request_id: RequestId,
    state: RequestState,
    processor_id: ProcessorId,
    attempt: u32,
    cause: Option<FailureCause>,
    outcome: Option<RequestOutcome>,
    subscribers: Vec<SubscriberSlot>,
    next_subscriber: u64,
}

impl Entry {
    fn new(request_id: RequestId, processor_id: ProcessorId) -> Self {
        Self {
            request_id,
            state: RequestState::Pending,
            processor_id,
            attempt: 1,
            cause: None,
            outcome: None,
            subscribers: Vec::new(),
            next_subscriber: 0,
        }
    }

    fn event(&self) -> LifecycleEvent {
        LifecycleEvent {
            request_id: self.request_id.clone(),
            state: self.state,
            cause: self.cause,
            processor_id: self.processor_id,
            attempt: self.attempt,
            outcome: self.outcome.clone(),
            occurred_at: Utc::now(),
        }
    }

    fn publish(&mut self) {
        let event = self.event();
        self.subscribers.retain(|slot| slot.sink.deliver(&event));
    }

    fn transition(
        &mut self,
        next: RequestState,
        outcome: Option<RequestOutcome>,
    ) -> Result<(), RegistryError> {
        if !self.state.can_transition_to(next) {
            return Err(RegistryError::InvalidTransition {
                request_id: self.request_id.clone(),
                from: self.state,
                to: next,
            });
        }

        let outcome = match (next, outcome) {
            (RequestState::Cancelled, None) => Some(Err(RequestError::Cancelled)),
            (RequestState::Success | RequestState::Failed, None) => {
                return Err(RegistryError::MissingOutcome(self.request_id.clone()));
            }
            (_, outcome) => outcome,
        };

        self.cause = match (next, &outcome) {
            (RequestState::Failed, Some(Err(err))) => err.cause(),
            _ => None,
        };
        self.state = next;
        self.outcome = outcome;

        tracing::debug!(
            request_id = %self.request_id,
            attempt = self.attempt,
            state = %next,
            "Request state changed"
        );

        self.publish();
        Ok(())
    }
}

/// Result of [`RequestRegistry::register`].
#[derive(Debug)]
pub enum Registration {
    /// A new attempt was created in `Pending`; the caller must run it.
    Started(RequestHandle),
    /// The id is already in flight; the caller must not run it again.
    Joined(RequestHandle),
}

impl Registration {
    /// The handle of the attempt, started or joined.
    #[must_use]
    pub const fn handle(&self) -> &RequestHandle {
        match self {
            Self::Started(handle) | Self::Joined(handle) => handle,
        }
    }

    /// Whether a new attempt was started.
    #[must_use]
    pub const fn is_started(&self) -> bool {
        matches!(self, Self::Started(_))
    }
}

/// Handle to one attempt of a registered request.
///
/// Transitions made through a handle are rejected once a newer attempt for
/// the same id exists, so a late result from a superseded attempt can never
/// overwrite the current one.
#[derive(Clone)]
pub struct RequestHandle {
    request_id: RequestId,
    attempt: u32,
    entry: Arc<Mutex<Entry>>,
}

impl RequestHandle {
    /// The request id.
    #[must_use]
    pub const fn id(&self) -> &RequestId {
        &self.request_id
    }

    /// The attempt this handle belongs to.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Move this attempt to `next`.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::StaleAttempt`] if a newer attempt exists
    /// - [`RegistryError::InvalidTransition`] if the transition is not legal
    /// - [`RegistryError::MissingOutcome`] for `Success`/`Failed` without an outcome
    pub fn transition(
        &self,
        next: RequestState,
        outcome: Option<RequestOutcome>,
    ) -> Result<(), RegistryError> {
        let mut entry = lock(&self.entry);
        if entry.attempt != self.attempt {
            return Err(RegistryError::StaleAttempt {
                request_id: self.request_id.clone(),
                attempt: self.attempt,
                current: entry.attempt,
            });
        }
        entry.transition(next, outcome)
    }

    /// Current state of the request (which may belong to a newer attempt).
    #[must_use]
    pub fn state(&self) -> RequestState {
        lock(&self.entry).state
    }
}

impl std::fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandle")
            .field("request_id", &self.request_id)
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

/// A registered interest in one request's lifecycle.
///
/// Dropping the subscription stops delivery to its sink. It never affects the
/// request itself: removing every subscriber does not cancel anything.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    request_id: RequestId,
    slot: u64,
    entry: Weak<Mutex<Entry>>,
}

impl Subscription {
    /// The request this subscription observes.
    #[must_use]
    pub const fn request_id(&self) -> &RequestId {
        &self.request_id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.upgrade() {
            lock(&entry).subscribers.retain(|slot| slot.id != self.slot);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("request_id", &self.request_id)
            .field("slot", &self.slot)
            .finish()
    }
}

/// Process-wide request table.
///
/// Cheap to clone; clones share the same table. Create one per process (the
/// [`DispatchService`](crate::service::DispatchService) owns it) and drop it
/// at shutdown.
///
/// # Example
///
/// ```
/// use dispatch_core::processor::ProcessorId;
/// use dispatch_core::request::{RequestId, RequestState};
/// use dispatch_runtime::registry::RequestRegistry;
///
/// let registry = RequestRegistry::new();
/// let id = RequestId::new("profile");
///
/// let registration = registry.register(id.clone(), ProcessorId::new("json"));
/// assert!(registration.is_started());
/// assert_eq!(registry.current_state(&id), Some(RequestState::Pending));
///
/// // Same id while in flight: joins the existing attempt.
/// assert!(!registry.register(id.clone(), ProcessorId::new("json")).is_started());
/// ```
#[derive(Clone, Default)]
pub struct RequestRegistry {
    entries: Arc<RwLock<HashMap<RequestId, Arc<Mutex<Entry>>>>>,
}

impl RequestRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, id: &RequestId) -> Result<Arc<Mutex<Entry>>, RegistryError> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownRequest(id.clone()))
    }

    /// Register a request id.
    ///
    /// - Unknown id: creates attempt 1 in `Pending` → [`Registration::Started`]
    /// - `Pending`/`Running`: joins the current attempt → [`Registration::Joined`]
    /// - Terminal: starts the next attempt in `Pending` (existing subscribers
    ///   observe the new `Pending` event) → [`Registration::Started`]
    pub fn register(&self, id: RequestId, processor_id: ProcessorId) -> Registration {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(shared) = entries.get(&id) {
            let mut entry = lock(shared);
            let handle = RequestHandle {
                request_id: id.clone(),
                attempt: entry.attempt,
                entry: Arc::clone(shared),
            };

            if entry.state.is_in_flight() {
                return Registration::Joined(handle);
            }

            entry.attempt += 1;
            entry.state = RequestState::Pending;
            entry.processor_id = processor_id;
            entry.cause = None;
            entry.outcome = None;
            entry.publish();

            tracing::debug!(request_id = %id, attempt = entry.attempt, "Request re-registered");
            return Registration::Started(RequestHandle {
                attempt: entry.attempt,
                ..handle
            });
        }

        let shared = Arc::new(Mutex::new(Entry::new(id.clone(), processor_id)));
        entries.insert(id.clone(), Arc::clone(&shared));
        tracing::debug!(request_id = %id, "Request registered");

        Registration::Started(RequestHandle {
            request_id: id,
            attempt: 1,
            entry: shared,
        })
    }

    /// Move the current attempt of `id` to `next`.
    ///
    /// `outcome` is required for `Success` and `Failed`; `Cancelled` defaults
    /// to [`RequestError::Cancelled`].
    ///
    /// # Errors
    ///
    /// - [`RegistryError::UnknownRequest`] if `id` is not registered
    /// - [`RegistryError::InvalidTransition`] if the transition is not legal
    /// - [`RegistryError::MissingOutcome`] for `Success`/`Failed` without an outcome
    pub fn update_state(
        &self,
        id: &RequestId,
        next: RequestState,
        outcome: Option<RequestOutcome>,
    ) -> Result<(), RegistryError> {
        let shared = self.entry(id)?;
        let mut entry = lock(&shared);
        entry.transition(next, outcome)
    }

    /// Cancel the current attempt if it is still in flight.
    ///
    /// Returns the attempt that moved to `Cancelled`, or `None` if nothing
    /// was in flight.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownRequest`] if `id` is not registered.
    pub fn cancel(&self, id: &RequestId) -> Result<Option<u32>, RegistryError> {
        let shared = self.entry(id)?;
        let mut entry = lock(&shared);
        if !entry.state.is_in_flight() {
            return Ok(None);
        }
        entry.transition(RequestState::Cancelled, None)?;
        Ok(Some(entry.attempt))
    }

    /// Current state of `id`, if registered.
    #[must_use]
    pub fn current_state(&self, id: &RequestId) -> Option<RequestState> {
        self.entry(id).ok().map(|shared| lock(&shared).state)
    }

    /// The current state of `id` as an event, including the outcome once terminal.
    #[must_use]
    pub fn snapshot(&self, id: &RequestId) -> Option<LifecycleEvent> {
        self.entry(id).ok().map(|shared| lock(&shared).event())
    }

    /// Subscribe a sink to `id`.
    ///
    /// The sink immediately receives the current state, under the entry lock,
    /// and then every later state change. A subscriber attaching after the
    /// request terminated therefore receives the terminal event exactly once;
    /// a concurrent terminal transition is either already visible in that
    /// replay or delivered after it, never both.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownRequest`] if `id` is not registered.
    pub fn subscribe(
        &self,
        id: &RequestId,
        sink: Arc<dyn EventSink>,
    ) -> Result<Subscription, RegistryError> {
        let shared = self.entry(id)?;
        let mut entry = lock(&shared);

        let slot = entry.next_subscriber;
        entry.next_subscriber += 1;

        if sink.deliver(&entry.event()) {
            entry.subscribers.push(SubscriberSlot { id: slot, sink });
        }

        Ok(Subscription {
            request_id: id.clone(),
            slot,
            entry: Arc::downgrade(&shared),
        })
    }

    /// Release a subscription. Equivalent to dropping it.
    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    /// Number of live subscribers of `id`.
    #[must_use]
    pub fn subscriber_count(&self, id: &RequestId) -> usize {
        self.entry(id)
            .map(|shared| lock(&shared).subscribers.len())
            .unwrap_or(0)
    }

    /// Remove a terminal request from the table.
    ///
    /// Returns `false` if `id` was not registered.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InFlight`] if the request is still `Pending` or `Running`.
    pub fn evict(&self, id: &RequestId) -> Result<bool, RegistryError> {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let Some(shared) = entries.get(id) else {
            return Ok(false);
        };
        if lock(shared).state.is_in_flight() {
            return Err(RegistryError::InFlight(id.clone()));
        }

        entries.remove(id);
        tracing::debug!(request_id = %id, "Request evicted");
        Ok(true)
    }

    /// Number of registered requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for RequestRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestRegistry")
            .field("len", &self.len())
            .finish()
    }
}
