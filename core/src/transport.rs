//! Transport SPI: the external collaborator that performs network I/O.
//!
//! TLS, redirects and connection pooling are the transport's business. The
//! executor only needs a raw response or a [`TransportError`].

use crate::error::TransportError;
use crate::processor::RawResponse;
use crate::request::Request;
use futures::future::BoxFuture;

/// Performs the network part of a request.
///
/// # Design Principles
///
/// - **Status-agnostic**: any HTTP status is a response; deciding whether a
///   `404` is acceptable belongs to the processor
/// - **Connectivity only**: unreachable hosts and timeouts are
///   [`TransportError`]s
///
/// # Dyn Compatibility
///
/// Returns a boxed future instead of using `async fn` so the executor can hold
/// an `Arc<dyn Transport>`.
///
/// # Example
///
/// ```
/// use dispatch_core::error::TransportError;
/// use dispatch_core::processor::RawResponse;
/// use dispatch_core::request::Request;
/// use dispatch_core::transport::Transport;
/// use futures::future::BoxFuture;
///
/// struct Offline;
///
/// impl Transport for Offline {
///     fn execute<'a>(
///         &'a self,
///         request: &'a Request,
///     ) -> BoxFuture<'a, Result<RawResponse, TransportError>> {
///         Box::pin(async move { Err(TransportError::Connection(request.url().to_string())) })
///     }
/// }
/// ```
pub trait Transport: Send + Sync {
    /// Execute a request and return its raw response.
    fn execute<'a>(&'a self, request: &'a Request)
    -> BoxFuture<'a, Result<RawResponse, TransportError>>;
}
