//! Error taxonomy for request dispatch.
//!
//! Transport and processor failures never cross the dispatch boundary as
//! panics or `Err` returns from `submit`: they end the attempt in
//! [`RequestState::Failed`](crate::request::RequestState::Failed) and reach
//! every subscriber as part of the terminal event. A binding failure is only
//! ever seen by the caller whose queued submission could not be admitted.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Failure raised by a [`Transport`](crate::transport::Transport).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The target could not be reached
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The transport did not answer in time
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Any other transport-level failure
    #[error("Transport error: {0}")]
    Other(String),
}

/// Failure raised by a [`Processor`](crate::processor::Processor).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    /// The response status is not one the processor accepts
    #[error("Unexpected response status {status}")]
    UnexpectedStatus {
        /// HTTP status code
        status: u16,
    },

    /// The body could not be parsed or decoded
    #[error("Malformed payload: {0}")]
    Malformed(String),
}

/// Typed cause carried by a `Failed` request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureCause {
    /// Network or connectivity failure
    Transport,
    /// Malformed or undecodable payload
    Processor,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport => f.write_str("transport"),
            Self::Processor => f.write_str("processor"),
        }
    }
}

/// Error half of a [`RequestOutcome`](crate::event::RequestOutcome).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// Transport failed (unreachable, timeout)
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Processor rejected the response
    #[error(transparent)]
    Processor(#[from] ProcessorError),

    /// The submission was queued but the executor never became reachable
    #[error("Executor not reachable within {0:?}")]
    Binding(Duration),

    /// The request was cancelled explicitly
    #[error("Request was cancelled")]
    Cancelled,
}

impl RequestError {
    /// Cause to report on the `Failed` lifecycle event, if this error ends in `Failed`.
    #[must_use]
    pub const fn cause(&self) -> Option<FailureCause> {
        match self {
            Self::Transport(_) => Some(FailureCause::Transport),
            Self::Processor(_) => Some(FailureCause::Processor),
            Self::Binding(_) | Self::Cancelled => None,
        }
    }
}
