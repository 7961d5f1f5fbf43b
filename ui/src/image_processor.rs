//! Image-decode processor.

use dispatch_core::error::ProcessorError;
use dispatch_core::processor::{Payload, Processor, ProcessorId, RawResponse};

/// Decodes a successful PNG or JPEG body.
///
/// The payload is an [`image::DynamicImage`]; read it back with
/// `payload.downcast::<DynamicImage>()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageProcessor;

impl ImageProcessor {
    /// Processor id.
    pub const ID: ProcessorId = ProcessorId::new("image");
}

impl Processor for ImageProcessor {
    fn id(&self) -> ProcessorId {
        Self::ID
    }

    fn process(&self, response: RawResponse) -> Result<Payload, ProcessorError> {
        if !response.is_success() {
            return Err(ProcessorError::UnexpectedStatus {
                status: response.status,
            });
        }

        let image = image::load_from_memory(&response.body)
            .map_err(|err| ProcessorError::Malformed(err.to_string()))?;
        tracing::debug!(width = image.width(), height = image.height(), "Image decoded");
        Ok(Payload::new(image))
    }
}
