//! Request description, identity and lifecycle states.
//!
//! A [`Request`] describes *what* to fetch. It carries no runtime state: the
//! [`RequestState`] of a request lives in the registry, keyed by [`RequestId`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

static NEXT_GENERATED_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of a logical request.
///
/// An id is unique among requests that are `Pending` or `Running`. Submitting
/// a request whose id is already in flight joins the existing execution
/// instead of starting a second one. Once the request is terminal, the same
/// id may be submitted again as a new attempt.
///
/// # Examples
///
/// ```
/// use dispatch_core::request::RequestId;
///
/// let id = RequestId::new("avatar-42");
/// assert_eq!(id.as_str(), "avatar-42");
///
/// let a = RequestId::generate();
/// let b = RequestId::generate();
/// assert_ne!(a, b);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(String);

impl RequestId {
    /// Create a caller-assigned request id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a process-unique id (`req-<n>`).
    #[must_use]
    pub fn generate() -> Self {
        let n = NEXT_GENERATED_ID.fetch_add(1, Ordering::Relaxed);
        Self(format!("req-{n}"))
    }

    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// HTTP method of a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `DELETE`
    Delete,
    /// `PATCH`
    Patch,
    /// `HEAD`
    Head,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Head => "HEAD",
        };
        f.write_str(name)
    }
}

/// Description of a network request.
///
/// `retries` and `retry_interval` configure transport-level retries inside a
/// single attempt: while they run, the request stays `Running` and no extra
/// lifecycle event is published.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    id: RequestId,
    url: String,
    method: Method,
    headers: Vec<(String, String)>,
    body: Option<Vec<u8>>,
    timeout: Option<Duration>,
    retries: usize,
    retry_interval: Duration,
}

impl Request {
    /// Create a request with a generated id.
    #[must_use]
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            id: RequestId::generate(),
            url: url.into(),
            method,
            headers: Vec::new(),
            body: None,
            timeout: None,
            retries: 0,
            retry_interval: Duration::from_millis(500),
        }
    }

    /// Shorthand for a `GET` request with a generated id.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    /// Replace the id (caller-assigned ids enable coalescing).
    #[must_use]
    pub fn with_id(mut self, id: impl Into<RequestId>) -> Self {
        self.id = id.into();
        self
    }

    /// Append a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the request body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Override the executor's default timeout for this request.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Retry transport failures `retries` times, waiting `interval` in between.
    #[must_use]
    pub const fn with_retries(mut self, retries: usize, interval: Duration) -> Self {
        self.retries = retries;
        self.retry_interval = interval;
        self
    }

    /// The request id.
    #[must_use]
    pub const fn id(&self) -> &RequestId {
        &self.id
    }

    /// The target URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The HTTP method.
    #[must_use]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// Request headers in insertion order.
    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Request body, if any.
    #[must_use]
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Per-request timeout, if overridden.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Number of transport retries.
    #[must_use]
    pub const fn retries(&self) -> usize {
        self.retries
    }

    /// Delay between transport retries.
    #[must_use]
    pub const fn retry_interval(&self) -> Duration {
        self.retry_interval
    }
}

/// Lifecycle state of a request.
///
/// ```text
/// Pending ──► Running ──► Success
///    │           │   ├──► Failed
///    │           └───┴──► Cancelled
///    └──────────────────► Cancelled
/// ```
///
/// Terminal states never transition again within the same attempt. A new
/// attempt for the same id starts over at `Pending`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestState {
    /// Queued, not yet handed to the transport.
    Pending,
    /// Transport active.
    Running,
    /// Processed successfully.
    Success,
    /// Transport or processor failure.
    Failed,
    /// Explicitly cancelled.
    Cancelled,
}

impl RequestState {
    /// Whether the state ends an attempt.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }

    /// Whether the state counts as in flight (occupies the id).
    #[must_use]
    pub const fn is_in_flight(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    /// Whether `next` is a legal transition within one attempt.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running | Self::Cancelled)
                | (Self::Running, Self::Success | Self::Failed | Self::Cancelled)
        )
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALL: [RequestState; 5] = [
        RequestState::Pending,
        RequestState::Running,
        RequestState::Success,
        RequestState::Failed,
        RequestState::Cancelled,
    ];

    fn rank(state: RequestState) -> u8 {
        match state {
            RequestState::Pending => 0,
            RequestState::Running => 1,
            _ => 2,
        }
    }

    #[test]
    fn terminal_states_are_final() {
        for from in ALL.iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn success_requires_running() {
        assert!(!RequestState::Pending.can_transition_to(RequestState::Success));
        assert!(!RequestState::Pending.can_transition_to(RequestState::Failed));
        assert!(RequestState::Running.can_transition_to(RequestState::Success));
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = Request::get("http://a/");
        let b = Request::get("http://a/");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn builder_sets_fields() {
        let request = Request::new(Method::Post, "http://example.com/submit")
            .with_id("submit")
            .with_body("payload")
            .with_timeout(Duration::from_secs(3))
            .with_retries(2, Duration::from_millis(10));

        assert_eq!(request.id(), &RequestId::new("submit"));
        assert_eq!(request.body(), Some(&b"payload"[..]));
        assert_eq!(request.timeout(), Some(Duration::from_secs(3)));
        assert_eq!(request.retries(), 2);
        assert_eq!(request.method().to_string(), "POST");
    }

    proptest! {
        #[test]
        fn legal_transitions_only_move_forward(from in 0usize..5, to in 0usize..5) {
            let (from, to) = (ALL[from], ALL[to]);
            if from.can_transition_to(to) {
                prop_assert!(rank(to) > rank(from));
            }
        }
    }
}
