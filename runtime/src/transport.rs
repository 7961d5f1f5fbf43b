//! HTTP transport over `reqwest`.
//!
//! Any HTTP response, including `4xx`/`5xx`, is a transport success; judging
//! the status is the processor's job. Only failures to obtain a response are
//! [`TransportError`]s.

use dispatch_core::error::TransportError;
use dispatch_core::processor::RawResponse;
use dispatch_core::request::{Method, Request};
use dispatch_core::transport::Transport;
use futures::StreamExt;
use futures::future::BoxFuture;
use std::time::Duration;

/// Default maximum response body size (50MB)
pub const DEFAULT_MAX_BODY: usize = 50 * 1024 * 1024;

/// Timeout for requests that do not set their own (matches the executor default)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport executing requests with a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    max_body: usize,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport with a default client.
    #[must_use]
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    /// Create a transport with a preconfigured client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            max_body: DEFAULT_MAX_BODY,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the timeout used when a request does not carry one.
    ///
    /// Requests run by the executor always carry its configured timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the maximum accepted body size.
    #[must_use]
    pub const fn with_max_body(mut self, max_body: usize) -> Self {
        self.max_body = max_body;
        self
    }

    fn timeout_for(&self, request: &Request) -> Duration {
        request.timeout().unwrap_or(self.timeout)
    }

    fn build(&self, request: &Request) -> reqwest::RequestBuilder {
        let url = request.url();
        let mut builder = match request.method() {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
            Method::Put => self.client.put(url),
            Method::Delete => self.client.delete(url),
            Method::Patch => self.client.patch(url),
            Method::Head => self.client.head(url),
        };

        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body() {
            builder = builder.body(body.to_vec());
        }
        builder.timeout(self.timeout_for(request))
    }

    async fn send(&self, request: &Request) -> Result<RawResponse, TransportError> {
        let timeout = self.timeout_for(request);
        let map_error = |err: reqwest::Error| classify(&err, timeout);
        let response = self.build(request).send().await.map_err(map_error)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_error)?;
            if body.len() + chunk.len() > self.max_body {
                return Err(TransportError::Other(format!(
                    "Response too large (>{} bytes)",
                    self.max_body
                )));
            }
            body.extend_from_slice(&chunk);
        }

        tracing::debug!(url = request.url(), status, bytes = body.len(), "Response received");
        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for HttpTransport {
    fn execute<'a>(
        &'a self,
        request: &'a Request,
    ) -> BoxFuture<'a, Result<RawResponse, TransportError>> {
        Box::pin(self.send(request))
    }
}

fn classify(err: &reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(timeout)
    } else if err.is_connect() || err.is_request() {
        TransportError::Connection(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}
