//! The owner's UI execution context.
//!
//! Background work never touches UI state directly. Anything that must run
//! on the owner's context is posted to a [`UiContext`] and executed, in FIFO
//! order, when the owner drains its [`UiQueue`].
//!
//! ```text
//!  background task ──► UiContext::post(job) ──► [FIFO] ──► UiQueue::drain()
//!                                                            (owner's thread)
//! ```
//!
//! # Example
//!
//! ```
//! use dispatch_core::context::ui_context;
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! let (ui, mut queue) = ui_context();
//! let hits = Arc::new(AtomicUsize::new(0));
//!
//! let counter = Arc::clone(&hits);
//! ui.post(move || {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! assert_eq!(hits.load(Ordering::SeqCst), 0);
//! assert_eq!(queue.drain(), 1);
//! assert_eq!(hits.load(Ordering::SeqCst), 1);
//! ```

use tokio::sync::mpsc;

type Job = Box<dyn FnOnce() + Send>;

/// Create a connected context/queue pair.
#[must_use]
pub fn ui_context() -> (UiContext, UiQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (UiContext { tx }, UiQueue { rx })
}

/// Handle for posting work onto an owner's UI context.
#[derive(Clone, Debug)]
pub struct UiContext {
    tx: mpsc::UnboundedSender<Job>,
}

impl UiContext {
    /// Post a job. Never blocks.
    ///
    /// Returns `false` if the queue has been dropped (the owner is gone), in
    /// which case the job is discarded.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> bool {
        self.tx.send(Box::new(job)).is_ok()
    }

    /// Whether the owner's queue has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The owner's end of the UI context: runs posted jobs.
#[derive(Debug)]
pub struct UiQueue {
    rx: mpsc::UnboundedReceiver<Job>,
}

impl UiQueue {
    /// Run every job currently queued, including jobs posted by those jobs.
    ///
    /// Returns the number of jobs run.
    pub fn drain(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    /// Wait for at least one job, then drain.
    ///
    /// Returns `0` once every [`UiContext`] has been dropped and the queue is empty.
    pub async fn run_next(&mut self) -> usize {
        match self.rx.recv().await {
            Some(job) => {
                job();
                1 + self.drain()
            }
            None => 0,
        }
    }

    /// Run jobs until every [`UiContext`] has been dropped.
    pub async fn run(mut self) {
        while let Some(job) = self.rx.recv().await {
            job();
        }
    }
}
