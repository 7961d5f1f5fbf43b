//! Progress signalling for one owner's requests.
//!
//! A [`ProgressReceiver`] is registered with an owner's
//! [`ServiceAssister`](dispatch_runtime::ServiceAssister) and sees the
//! lifecycle of every request that owner tracks. It turns them into a single
//! busy/idle boundary: the progress indicator is shown when the first request
//! starts running and hidden when the last one stops, and the owner's UI
//! annotations are processed at the same two points.

use crate::annotation::{Phase, UiAnnotationProcessor};
use crate::lock;
use dispatch_core::event::{LifecycleEvent, LifecycleListener};
use dispatch_core::request::{RequestId, RequestState};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// An owner that can show an indeterminate progress indicator.
pub trait IndeterminateProgressControl: Send + Sync {
    /// Show the indicator.
    fn show_indeterminate_progress(&self);

    /// Hide the indicator.
    fn hide_indeterminate_progress(&self);

    /// Whether the indicator is showing.
    fn is_indeterminate_progress_showing(&self) -> bool;

    /// Process the owner's UI annotations for `phase`.
    ///
    /// Owners that declare UI rules typically forward to
    /// [`UiAnnotationProcessor::process`] with themselves.
    fn process_ui_annotations(&self, processor: &UiAnnotationProcessor, phase: Phase) {
        let _ = (processor, phase);
    }
}

/// Lifecycle listener driving an [`IndeterminateProgressControl`].
///
/// # Example
///
/// ```
/// use dispatch_ui::progress::{IndeterminateProgressControl, ProgressReceiver};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicBool, Ordering};
///
/// #[derive(Default)]
/// struct Spinner(AtomicBool);
///
/// impl IndeterminateProgressControl for Spinner {
///     fn show_indeterminate_progress(&self) { self.0.store(true, Ordering::SeqCst) }
///     fn hide_indeterminate_progress(&self) { self.0.store(false, Ordering::SeqCst) }
///     fn is_indeterminate_progress_showing(&self) -> bool { self.0.load(Ordering::SeqCst) }
/// }
///
/// let receiver = ProgressReceiver::new(Arc::new(Spinner::default()));
/// assert_eq!(receiver.running(), 0);
/// ```
pub struct ProgressReceiver {
    control: Arc<dyn IndeterminateProgressControl>,
    processor: Arc<UiAnnotationProcessor>,
    running: Mutex<HashSet<RequestId>>,
}

impl ProgressReceiver {
    /// Create a receiver with its own annotation processor.
    #[must_use]
    pub fn new(control: Arc<dyn IndeterminateProgressControl>) -> Self {
        Self::with_processor(control, Arc::new(UiAnnotationProcessor::default()))
    }

    /// Create a receiver sharing an annotation processor (and its rule cache).
    #[must_use]
    pub fn with_processor(
        control: Arc<dyn IndeterminateProgressControl>,
        processor: Arc<UiAnnotationProcessor>,
    ) -> Self {
        Self {
            control,
            processor,
            running: Mutex::new(HashSet::new()),
        }
    }

    /// Number of tracked requests currently running.
    #[must_use]
    pub fn running(&self) -> usize {
        lock(&self.running).len()
    }

    /// The annotation processor.
    #[must_use]
    pub fn processor(&self) -> &Arc<UiAnnotationProcessor> {
        &self.processor
    }

    fn start(&self) {
        if !self.control.is_indeterminate_progress_showing() {
            self.control.show_indeterminate_progress();
        }
        self.control.process_ui_annotations(&self.processor, Phase::OnStart);
    }

    fn end(&self) {
        if self.control.is_indeterminate_progress_showing() {
            self.control.hide_indeterminate_progress();
        }
        self.control.process_ui_annotations(&self.processor, Phase::OnEnd);
    }
}

impl LifecycleListener for ProgressReceiver {
    fn on_lifecycle(&self, event: &LifecycleEvent) {
        // Only the 0 -> 1 and 1 -> 0 edges of the running set matter.
        let edge = {
            let mut running = lock(&self.running);
            let was_idle = running.is_empty();
            let changed = if event.state == RequestState::Running {
                running.insert(event.request_id.clone())
            } else {
                running.remove(&event.request_id)
            };
            match (changed, was_idle, running.is_empty()) {
                (true, true, false) => Some(Phase::OnStart),
                (true, false, true) => Some(Phase::OnEnd),
                _ => None,
            }
        };

        match edge {
            Some(Phase::OnStart) => {
                tracing::debug!(request_id = %event.request_id, "First request running, showing progress");
                self.start();
            }
            Some(Phase::OnEnd) => {
                tracing::debug!(request_id = %event.request_id, "Last request finished, hiding progress");
                self.end();
            }
            None => {}
        }
    }
}

impl std::fmt::Debug for ProgressReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReceiver")
            .field("running", &self.running())
            .finish_non_exhaustive()
    }
}
