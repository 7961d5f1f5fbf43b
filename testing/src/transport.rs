//! Scripted in-memory transport.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use dispatch_core::error::TransportError;
use dispatch_core::processor::RawResponse;
use dispatch_core::request::Request;
use dispatch_core::transport::Transport;
use futures::future::BoxFuture;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// What the mock answers for one execution.
pub type Reply = Result<RawResponse, TransportError>;

#[derive(Default)]
struct Route {
    once: VecDeque<Reply>,
    always: Option<Reply>,
}

struct MockInner {
    routes: Mutex<HashMap<String, Route>>,
    fallback: Mutex<Reply>,
    calls: Mutex<Vec<String>>,
    delay: Mutex<Duration>,
    gated: AtomicBool,
    gate: Semaphore,
}

/// In-memory [`Transport`] with per-url scripted replies.
///
/// Replies are looked up in order: one-shot replies queued with
/// [`enqueue`](Self::enqueue), then the url's persistent reply set with
/// [`route`](Self::route), then the fallback (`200` with an empty body).
///
/// [`hold`](Self::hold) parks every execution until
/// [`release`](Self::release) lets it through, which keeps requests in
/// `Running` for as long as a test needs.
///
/// # Example
///
/// ```
/// use dispatch_core::processor::RawResponse;
/// use dispatch_core::request::Request;
/// use dispatch_core::transport::Transport;
/// use dispatch_testing::MockTransport;
///
/// # tokio_test::block_on(async {
/// let transport = MockTransport::new();
/// transport.route("http://api/user", Ok(RawResponse::ok(r#"{"name":"ada"}"#)));
///
/// let response = transport.execute(&Request::get("http://api/user")).await.unwrap();
/// assert_eq!(response.body, br#"{"name":"ada"}"#);
/// assert_eq!(transport.calls_for("http://api/user"), 1);
/// # });
/// ```
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

impl MockTransport {
    /// Create a mock answering `200` with an empty body.
    #[must_use]
    pub fn new() -> Self {
        Self::with_fallback(Ok(RawResponse::ok(Vec::new())))
    }

    /// Create a mock answering `fallback` for unrouted urls.
    #[must_use]
    pub fn with_fallback(fallback: Reply) -> Self {
        Self {
            inner: Arc::new(MockInner {
                routes: Mutex::new(HashMap::new()),
                fallback: Mutex::new(fallback),
                calls: Mutex::new(Vec::new()),
                delay: Mutex::new(Duration::ZERO),
                gated: AtomicBool::new(false),
                gate: Semaphore::new(0),
            }),
        }
    }

    /// Always answer `reply` for `url`.
    pub fn route(&self, url: impl Into<String>, reply: Reply) -> &Self {
        self.inner
            .routes
            .lock()
            .unwrap()
            .entry(url.into())
            .or_default()
            .always = Some(reply);
        self
    }

    /// Answer `reply` for the next execution of `url` only.
    pub fn enqueue(&self, url: impl Into<String>, reply: Reply) -> &Self {
        self.inner
            .routes
            .lock()
            .unwrap()
            .entry(url.into())
            .or_default()
            .once
            .push_back(reply);
        self
    }

    /// Sleep for `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.inner.delay.lock().unwrap() = delay;
    }

    /// Park every execution until released.
    pub fn hold(&self) {
        self.inner.gated.store(true, Ordering::SeqCst);
    }

    /// Let `n` parked (or future) executions through.
    pub fn release(&self, n: usize) {
        self.inner.gate.add_permits(n);
    }

    /// Stop parking and let every parked execution through.
    pub fn open(&self) {
        self.inner.gated.store(false, Ordering::SeqCst);
        self.inner.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }

    /// Total number of executions started.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.inner.calls.lock().unwrap().len()
    }

    /// Number of executions started for `url`.
    #[must_use]
    pub fn calls_for(&self, url: &str) -> usize {
        self.inner
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|called| called.as_str() == url)
            .count()
    }

    /// Urls in execution order.
    #[must_use]
    pub fn requests(&self) -> Vec<String> {
        self.inner.calls.lock().unwrap().clone()
    }

    fn reply_for(&self, url: &str) -> Reply {
        let mut routes = self.inner.routes.lock().unwrap();
        if let Some(route) = routes.get_mut(url) {
            if let Some(reply) = route.once.pop_front() {
                return reply;
            }
            if let Some(reply) = &route.always {
                return reply.clone();
            }
        }
        self.inner.fallback.lock().unwrap().clone()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("calls", &self.calls())
            .field("gated", &self.inner.gated.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Transport for MockTransport {
    fn execute<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Reply> {
        Box::pin(async move {
            self.inner.calls.lock().unwrap().push(request.url().to_string());

            if self.inner.gated.load(Ordering::SeqCst) {
                if let Ok(permit) = self.inner.gate.acquire().await {
                    permit.forget();
                }
            }

            let delay = *self.inner.delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            self.reply_for(request.url())
        })
    }
}
