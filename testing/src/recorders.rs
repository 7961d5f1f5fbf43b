//! Recording implementations of the dispatch callbacks and UI hooks.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use dispatch_core::event::{Callback, EventSink, LifecycleEvent, LifecycleListener, RequestOutcome};
use dispatch_core::request::{RequestId, RequestState};
use dispatch_ui::annotation::{Annotated, Phase, ProcessReport, UiAnnotationProcessor};
use dispatch_ui::progress::IndeterminateProgressControl;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// [`EventSink`] that keeps every delivered event.
///
/// Closing the sink makes the next delivery report `false`, which is how a
/// dead subscriber looks to the registry.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<LifecycleEvent>>,
    closed: AtomicBool,
}

impl RecordingSink {
    /// Create an open sink.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every event delivered so far.
    #[must_use]
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().unwrap().clone()
    }

    /// States of the delivered events, in delivery order.
    #[must_use]
    pub fn states(&self) -> Vec<RequestState> {
        self.events.lock().unwrap().iter().map(|e| e.state).collect()
    }

    /// Number of terminal events delivered.
    #[must_use]
    pub fn terminal_count(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.is_terminal())
            .count()
    }

    /// Refuse further deliveries.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl EventSink for RecordingSink {
    fn deliver(&self, event: &LifecycleEvent) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        self.events.lock().unwrap().push(event.clone());
        true
    }
}

/// Collects the outcomes of completion callbacks.
///
/// ```
/// use dispatch_core::processor::Payload;
/// use dispatch_core::request::RequestId;
/// use dispatch_testing::OutcomeLog;
///
/// let log = OutcomeLog::new();
/// let callback = log.callback();
/// callback(&RequestId::new("a"), Ok(Payload::new(1_u8)));
/// assert_eq!(log.len(), 1);
/// assert_eq!(log.successes(), 1);
/// ```
#[derive(Clone, Default)]
pub struct OutcomeLog {
    outcomes: Arc<Mutex<Vec<(RequestId, RequestOutcome)>>>,
}

impl OutcomeLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A callback appending to this log.
    #[must_use]
    pub fn callback(&self) -> Callback {
        let outcomes = Arc::clone(&self.outcomes);
        Box::new(move |id: &RequestId, outcome: RequestOutcome| {
            outcomes.lock().unwrap().push((id.clone(), outcome));
        })
    }

    /// Number of callbacks invoked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.outcomes.lock().unwrap().len()
    }

    /// Whether no callback has been invoked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of successful outcomes.
    #[must_use]
    pub fn successes(&self) -> usize {
        self.outcomes
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, outcome)| outcome.is_ok())
            .count()
    }

    /// Every recorded outcome, in invocation order.
    #[must_use]
    pub fn outcomes(&self) -> Vec<(RequestId, RequestOutcome)> {
        self.outcomes.lock().unwrap().clone()
    }
}

/// [`LifecycleListener`] that keeps every event it sees.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingListener {
    /// Create an empty listener.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every event seen so far.
    #[must_use]
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().unwrap().clone()
    }

    /// States seen for `id`, in order.
    #[must_use]
    pub fn states_for(&self, id: &RequestId) -> Vec<RequestState> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| &e.request_id == id)
            .map(|e| e.state)
            .collect()
    }
}

impl LifecycleListener for RecordingListener {
    fn on_lifecycle(&self, event: &LifecycleEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// [`IndeterminateProgressControl`] that records what it was asked to do.
///
/// With an owner attached, annotation processing is forwarded to it.
#[derive(Default)]
pub struct RecordingProgress {
    showing: AtomicBool,
    shown: AtomicUsize,
    hidden: AtomicUsize,
    phases: Mutex<Vec<Phase>>,
    reports: Mutex<Vec<ProcessReport>>,
    owner: Option<Arc<dyn Annotated>>,
}

impl RecordingProgress {
    /// Create a control without an annotated owner.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a control that processes `owner`'s annotations.
    #[must_use]
    pub fn with_owner(owner: Arc<dyn Annotated>) -> Arc<Self> {
        Arc::new(Self {
            owner: Some(owner),
            ..Self::default()
        })
    }

    /// Times the indicator was shown.
    #[must_use]
    pub fn shown(&self) -> usize {
        self.shown.load(Ordering::SeqCst)
    }

    /// Times the indicator was hidden.
    #[must_use]
    pub fn hidden(&self) -> usize {
        self.hidden.load(Ordering::SeqCst)
    }

    /// Annotation phases processed, in order.
    #[must_use]
    pub fn phases(&self) -> Vec<Phase> {
        self.phases.lock().unwrap().clone()
    }

    /// Reports of the forwarded annotation passes.
    #[must_use]
    pub fn reports(&self) -> Vec<ProcessReport> {
        self.reports.lock().unwrap().clone()
    }
}

impl IndeterminateProgressControl for RecordingProgress {
    fn show_indeterminate_progress(&self) {
        self.showing.store(true, Ordering::SeqCst);
        self.shown.fetch_add(1, Ordering::SeqCst);
    }

    fn hide_indeterminate_progress(&self) {
        self.showing.store(false, Ordering::SeqCst);
        self.hidden.fetch_add(1, Ordering::SeqCst);
    }

    fn is_indeterminate_progress_showing(&self) -> bool {
        self.showing.load(Ordering::SeqCst)
    }

    fn process_ui_annotations(&self, processor: &UiAnnotationProcessor, phase: Phase) {
        self.phases.lock().unwrap().push(phase);
        if let Some(owner) = &self.owner {
            let mut report = ProcessReport::default();
            owner.apply_rules(processor, phase, 0, &mut report).unwrap();
            self.reports.lock().unwrap().push(report);
        }
    }
}
