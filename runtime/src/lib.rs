//! # Dispatch Runtime
//!
//! Background request execution for UI owners that come and go.
//!
//! This crate provides the moving parts built on the types of
//! [`dispatch_core`]:
//!
//! ## Core Components
//!
//! - **[`RequestRegistry`]**: Process-wide table of request state and subscribers
//! - **[`RequestExecutor`]**: Runs transport and processor off the owner's context
//! - **[`DispatchService`]**: Long-lived host of the executor and per-owner bookkeeping
//! - **[`ServiceAssister`]**: Per-owner façade that survives binding and unbinding
//! - **[`HttpTransport`]**: `reqwest`-backed transport
//! - **Processors**: [`DummyProcessor`], [`JsonProcessor`]
//!
//! ## Example
//!
//! ```no_run
//! use dispatch_core::context::ui_context;
//! use dispatch_core::owner::OwnerKey;
//! use dispatch_core::event::RequestOutcome;
//! use dispatch_core::request::{Request, RequestId};
//! use dispatch_runtime::{
//!     DispatchService, ExecutorConfig, HttpTransport, JsonProcessor, ServiceAssister,
//! };
//! use std::sync::Arc;
//!
//! # #[derive(serde::Deserialize)]
//! # struct Profile { name: String }
//! # async fn example() {
//! let service = DispatchService::start(Arc::new(HttpTransport::new()), ExecutorConfig::default());
//!
//! let (ui, mut queue) = ui_context();
//! let assister = ServiceAssister::new(OwnerKey::new("profile-screen"), ui);
//! assister.bind(&service);
//!
//! assister.submit(
//!     Request::get("https://example.com/profile.json"),
//!     Arc::new(JsonProcessor::<Profile>::new()),
//!     Some(Box::new(|_id: &RequestId, outcome: RequestOutcome| {
//!         if let Ok(payload) = outcome {
//!             let _profile = payload.downcast_ref::<Profile>();
//!         }
//!     })),
//! );
//!
//! // The owner's event loop runs callbacks on its own context.
//! queue.run_next().await;
//! # }
//! ```

/// Request table and lifecycle subscriptions
pub mod registry;

/// Background executor
pub mod executor;

/// Long-lived service host
pub mod service;

/// Per-owner façade
pub mod assister;

/// Built-in processors
pub mod processors;

/// HTTP transport
pub mod transport;

/// Transport retries with backoff
pub mod retry;

/// Prometheus metrics for observability
pub mod metrics;

/// Error types for the runtime
pub mod error {
    use dispatch_core::request::{RequestId, RequestState};
    use thiserror::Error;

    /// Errors returned by [`RequestRegistry`](crate::registry::RequestRegistry) operations
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum RegistryError {
        /// The id was never registered, or has been evicted
        #[error("Unknown request: {0}")]
        UnknownRequest(RequestId),

        /// The requested state change is not allowed from the current state
        #[error("Invalid transition for {request_id}: {from} -> {to}")]
        InvalidTransition {
            /// Request id
            request_id: RequestId,
            /// Current state
            from: RequestState,
            /// Rejected target state
            to: RequestState,
        },

        /// `Success` and `Failed` must carry an outcome
        #[error("Terminal state without outcome for {0}")]
        MissingOutcome(RequestId),

        /// A superseded attempt tried to change the state of a newer one
        ///
        /// Raised when a late result arrives after the request was cancelled
        /// and resubmitted. The executor discards it.
        #[error("Attempt {attempt} of {request_id} is stale (current attempt {current})")]
        StaleAttempt {
            /// Request id
            request_id: RequestId,
            /// Attempt of the caller
            attempt: u32,
            /// Attempt currently registered
            current: u32,
        },

        /// The request is still `Pending` or `Running`
        #[error("Request {0} is still in flight")]
        InFlight(RequestId),
    }

    /// Errors returned by [`DispatchService`](crate::service::DispatchService)
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum ServiceError {
        /// Shutdown timed out waiting for requests to finish
        ///
        /// The remaining requests keep running; their results are still
        /// recorded in the registry.
        #[error("Shutdown timed out with {0} requests still running")]
        ShutdownTimeout(usize),
    }
}

pub use assister::{AssisterConfig, ServiceAssister};
pub use error::{RegistryError, ServiceError};
pub use executor::{ExecutorConfig, RequestExecutor, Submission};
pub use processors::{DummyProcessor, JsonProcessor};
pub use registry::{Registration, RequestHandle, RequestRegistry, Subscription};
pub use service::DispatchService;
pub use transport::HttpTransport;
