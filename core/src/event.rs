//! Lifecycle events and the sinks that receive them.
//!
//! The registry publishes one [`LifecycleEvent`] per state change. Each
//! subscriber owns an [`EventSink`]; the registry calls
//! [`EventSink::deliver`] while holding the lock of the request being
//! updated, so the sink must only enqueue the event and return. The
//! subscriber consumes it later on its own context.
//!
//! # Ordering
//!
//! For a single request id, a sink observes a suffix of
//! `Pending → Running → terminal` with no gaps: it starts at the state the
//! request was in when the sink subscribed and never skips `Running` if the
//! request entered it afterwards.

use crate::error::{FailureCause, RequestError};
use crate::processor::{Payload, ProcessorId};
use crate::request::{RequestId, RequestState};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

/// Terminal result of one attempt.
pub type RequestOutcome = Result<Payload, RequestError>;

/// Caller-supplied completion callback.
///
/// Invoked at most once per logical attempt, with the terminal outcome, on
/// the caller's UI context.
pub type Callback = Box<dyn FnOnce(&RequestId, RequestOutcome) + Send>;

/// One state change of one request.
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    /// Request whose state changed
    pub request_id: RequestId,
    /// New state
    pub state: RequestState,
    /// Typed cause, set only when `state` is `Failed`
    pub cause: Option<FailureCause>,
    /// Processor handling the request
    pub processor_id: ProcessorId,
    /// Attempt number (starts at 1, bumped on each re-submission after a terminal state)
    pub attempt: u32,
    /// Outcome, set only when `state` is terminal
    pub outcome: Option<RequestOutcome>,
    /// When the state changed
    pub occurred_at: DateTime<Utc>,
}

impl LifecycleEvent {
    /// Whether this event ends its attempt.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Receives lifecycle events from the registry.
pub trait EventSink: Send + Sync {
    /// Enqueue an event.
    ///
    /// Returns `false` once the sink is closed; the registry then drops the
    /// subscription.
    fn deliver(&self, event: &LifecycleEvent) -> bool;
}

impl EventSink for mpsc::UnboundedSender<LifecycleEvent> {
    fn deliver(&self, event: &LifecycleEvent) -> bool {
        self.send(event.clone()).is_ok()
    }
}

/// UI-side consumer of lifecycle events for the requests of one owner.
///
/// Always invoked on the owner's UI context.
pub trait LifecycleListener: Send + Sync {
    /// Handle one lifecycle event.
    fn on_lifecycle(&self, event: &LifecycleEvent);
}
