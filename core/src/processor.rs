//! Processor SPI: turns a raw transport response into a typed result.
//!
//! Processors are supplied per request. The executor hands every successful
//! transport response to the request's processor; a processor error ends the
//! attempt as `Failed` with [`FailureCause::Processor`](crate::error::FailureCause::Processor).

use crate::error::ProcessorError;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Identity of a processor, reported on every lifecycle event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProcessorId(&'static str);

impl ProcessorId {
    /// Create a processor id from a static name.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// The processor name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for ProcessorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Transport response before processing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: Vec<u8>,
}

impl RawResponse {
    /// A `200` response with the given body.
    #[must_use]
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Whether the status is `2xx`.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// First header value with the given name (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Type-erased, cheaply clonable processor result.
///
/// Every subscriber of a request receives a clone of the same payload, so
/// the value is shared rather than copied.
///
/// ```
/// use dispatch_core::processor::Payload;
///
/// let payload = Payload::new(42_u32);
/// assert_eq!(payload.downcast_ref::<u32>(), Some(&42));
/// assert!(payload.downcast_ref::<String>().is_none());
/// ```
#[derive(Clone)]
pub struct Payload(Arc<dyn Any + Send + Sync>);

impl Payload {
    /// Wrap a processor result.
    #[must_use]
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Borrow the result as `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Get a shared handle to the result as `T`.
    #[must_use]
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.0).downcast::<T>().ok()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Payload(<opaque>)")
    }
}

/// Turns a [`RawResponse`] into a typed [`Payload`].
///
/// # Example
///
/// ```
/// use dispatch_core::error::ProcessorError;
/// use dispatch_core::processor::{Payload, Processor, ProcessorId, RawResponse};
///
/// struct Utf8;
///
/// impl Processor for Utf8 {
///     fn id(&self) -> ProcessorId {
///         ProcessorId::new("utf8")
///     }
///
///     fn process(&self, response: RawResponse) -> Result<Payload, ProcessorError> {
///         String::from_utf8(response.body)
///             .map(Payload::new)
///             .map_err(|e| ProcessorError::Malformed(e.to_string()))
///     }
/// }
///
/// let payload = Utf8.process(RawResponse::ok("hi")).unwrap();
/// assert_eq!(payload.downcast_ref::<String>().map(String::as_str), Some("hi"));
/// ```
pub trait Processor: Send + Sync {
    /// Identity reported on lifecycle events.
    fn id(&self) -> ProcessorId;

    /// Process a transport response.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessorError`] when the response cannot be turned into a result.
    fn process(&self, response: RawResponse) -> Result<Payload, ProcessorError>;
}
