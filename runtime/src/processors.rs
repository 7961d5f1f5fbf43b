//! Built-in processors.

use dispatch_core::error::ProcessorError;
use dispatch_core::processor::{Payload, Processor, ProcessorId, RawResponse};
use serde::de::DeserializeOwned;
use std::any::Any;
use std::marker::PhantomData;

/// Ignores the body; the payload is the HTTP status (`u16`).
///
/// Useful for requests whose only interesting result is that they ran.
#[derive(Debug, Clone, Copy, Default)]
pub struct DummyProcessor;

impl DummyProcessor {
    /// Processor id.
    pub const ID: ProcessorId = ProcessorId::new("dummy");
}

impl Processor for DummyProcessor {
    fn id(&self) -> ProcessorId {
        Self::ID
    }

    fn process(&self, response: RawResponse) -> Result<Payload, ProcessorError> {
        Ok(Payload::new(response.status))
    }
}

/// Deserializes a successful JSON body into `T`.
///
/// # Errors
///
/// Processing fails with [`ProcessorError::UnexpectedStatus`] for non-2xx
/// responses and [`ProcessorError::Malformed`] when the body does not parse.
///
/// # Example
///
/// ```
/// use dispatch_core::processor::{Processor, RawResponse};
/// use dispatch_runtime::processors::JsonProcessor;
///
/// #[derive(serde::Deserialize, Debug, PartialEq)]
/// struct Ping { ok: bool }
///
/// let processor = JsonProcessor::<Ping>::new();
/// let payload = processor.process(RawResponse::ok(br#"{"ok":true}"#.to_vec()));
/// let ping = payload.ok().and_then(|p| p.downcast::<Ping>());
/// assert_eq!(ping.as_deref(), Some(&Ping { ok: true }));
/// ```
pub struct JsonProcessor<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonProcessor<T> {
    /// Processor id.
    pub const ID: ProcessorId = ProcessorId::new("json");

    /// Create a processor.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonProcessor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for JsonProcessor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonProcessor")
            .field("target", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> Processor for JsonProcessor<T>
where
    T: DeserializeOwned + Any + Send + Sync,
{
    fn id(&self) -> ProcessorId {
        Self::ID
    }

    fn process(&self, response: RawResponse) -> Result<Payload, ProcessorError> {
        if !response.is_success() {
            return Err(ProcessorError::UnexpectedStatus {
                status: response.status,
            });
        }

        serde_json::from_slice::<T>(&response.body)
            .map(Payload::new)
            .map_err(|err| ProcessorError::Malformed(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        name: String,
        count: u32,
    }

    #[test]
    fn dummy_reports_status_regardless_of_body() {
        let response = RawResponse {
            status: 404,
            body: b"not json".to_vec(),
            ..RawResponse::default()
        };
        let payload = DummyProcessor.process(response);
        assert_eq!(
            payload.ok().and_then(|p| p.downcast_ref::<u16>().copied()),
            Some(404)
        );
    }

    #[test]
    fn json_parses_success_body() {
        let processor = JsonProcessor::<Item>::new();
        let payload = processor.process(RawResponse::ok(br#"{"name":"a","count":3}"#.to_vec()));
        let item = payload.ok().and_then(|p| p.downcast::<Item>());
        assert_eq!(
            item.as_deref(),
            Some(&Item {
                name: "a".into(),
                count: 3
            })
        );
    }

    #[test]
    fn json_rejects_error_status_and_bad_body() {
        let processor = JsonProcessor::<Item>::new();

        let status = processor.process(RawResponse {
            status: 500,
            ..RawResponse::default()
        });
        assert!(matches!(
            status,
            Err(ProcessorError::UnexpectedStatus { status: 500 })
        ));

        let malformed = processor.process(RawResponse::ok(b"{".to_vec()));
        assert!(matches!(malformed, Err(ProcessorError::Malformed(_))));
    }
}
