//! # Dispatch Testing
//!
//! Testing utilities for request dispatch.
//!
//! This crate provides:
//! - [`MockTransport`]: scripted, gateable in-memory transport
//! - Recorders for sinks, callbacks, lifecycle listeners and progress controls
//! - Helpers for draining a UI queue until a condition holds
//!
//! ## Example
//!
//! ```ignore
//! use dispatch_testing::{MockTransport, OutcomeLog, settle};
//!
//! #[tokio::test]
//! async fn callback_fires_on_the_ui_context() {
//!     let transport = MockTransport::new();
//!     let service = DispatchService::start(Arc::new(transport.clone()), ExecutorConfig::default());
//!     let (ui, mut queue) = ui_context();
//!     let assister = ServiceAssister::new(OwnerKey::new("a"), ui);
//!     assister.bind(&service);
//!
//!     let log = OutcomeLog::new();
//!     assister.submit(Request::get("u"), Arc::new(DummyProcessor), Some(log.callback()));
//!
//!     assert!(settle(&mut queue, || log.len() == 1).await);
//! }
//! ```

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use dispatch_core::context::UiQueue;
use std::time::{Duration, Instant};

pub mod recorders;
pub mod transport;

pub use recorders::{OutcomeLog, RecordingListener, RecordingProgress, RecordingSink};
pub use transport::{MockTransport, Reply};

/// How long [`settle`] and [`eventually`] wait by default.
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Drain `queue` until `done` holds, for at most [`SETTLE_TIMEOUT`].
///
/// Returns whether `done` held in time.
pub async fn settle(queue: &mut UiQueue, done: impl FnMut() -> bool) -> bool {
    settle_within(queue, SETTLE_TIMEOUT, done).await
}

/// Drain `queue` until `done` holds, for at most `timeout`.
pub async fn settle_within(
    queue: &mut UiQueue,
    timeout: Duration,
    mut done: impl FnMut() -> bool,
) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        queue.drain();
        if done() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Wait until `done` holds, for at most [`SETTLE_TIMEOUT`].
pub async fn eventually(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + SETTLE_TIMEOUT;
    while !done() {
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    true
}

/// Encode a transparent `width` x `height` PNG.
#[must_use]
pub fn png_fixture(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(image::RgbaImage::new(width, height))
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

/// Install a test-friendly tracing subscriber (idempotent).
///
/// Honours `RUST_LOG`; defaults to `warn`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_core::context::ui_context;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn settle_runs_posted_jobs() {
        let (ui, mut queue) = ui_context();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        ui.post(move || flag.store(true, Ordering::SeqCst));

        assert!(settle(&mut queue, || ran.load(Ordering::SeqCst)).await);
    }

    #[tokio::test]
    async fn settle_gives_up() {
        let (_ui, mut queue) = ui_context();
        assert!(!settle_within(&mut queue, Duration::from_millis(20), || false).await);
    }

    #[test]
    fn png_fixture_decodes() {
        let image = image::load_from_memory(&png_fixture(4, 3)).unwrap();
        assert_eq!((image.width(), image.height()), (4, 3));
    }
}
