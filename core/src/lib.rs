//! # Dispatch Core
//!
//! Core types and collaborator traits for background request dispatch.
//!
//! This crate defines the vocabulary shared by the runtime and the UI layer:
//! requests and their lifecycle states, the events broadcast when a state
//! changes, the error taxonomy, and the two pluggable collaborators a request
//! runs through (a [`Transport`](transport::Transport) and a
//! [`Processor`](processor::Processor)).
//!
//! ## Core Concepts
//!
//! - **Request**: a unit of network-bound work, tracked by [`RequestId`]
//! - **State**: `Pending → Running → Success | Failed | Cancelled`
//! - **Lifecycle event**: one state change, delivered to every subscriber in order
//! - **Owner**: a transient UI object identified by a stable [`OwnerKey`]
//! - **UI context**: the owner's own execution queue ([`UiContext`] / [`UiQueue`])
//!
//! ## Architecture
//!
//! ```text
//! UI owner ──► ServiceAssister ──► RequestExecutor ──► Transport ──► Processor
//!    ▲                                    │
//!    │                                    ▼
//!    └──── UiQueue ◄── EventSink ◄── RequestRegistry
//! ```
//!
//! ## Example
//!
//! ```
//! use dispatch_core::request::{Method, Request, RequestState};
//!
//! let request = Request::get("http://example.com/")
//!     .with_id("home")
//!     .with_header("accept", "text/html");
//!
//! assert_eq!(request.id().as_str(), "home");
//! assert_eq!(request.method(), Method::Get);
//! assert!(RequestState::Pending.can_transition_to(RequestState::Running));
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod context;
pub mod error;
pub mod event;
pub mod owner;
pub mod processor;
pub mod request;
pub mod transport;

pub use context::{UiContext, UiQueue, ui_context};
pub use error::{FailureCause, ProcessorError, RequestError, TransportError};
pub use event::{Callback, EventSink, LifecycleEvent, LifecycleListener, RequestOutcome};
pub use owner::OwnerKey;
pub use processor::{Payload, Processor, ProcessorId, RawResponse};
pub use request::{Method, Request, RequestId, RequestState};
pub use transport::Transport;
