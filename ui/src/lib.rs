//! # Dispatch UI
//!
//! UI-facing consumers of request dispatch.
//!
//! ## Components
//!
//! - **[`View`]**: shared handle to a UI element's state
//! - **[`UiAnnotationProcessor`]**: derives per-type rules from declarations
//!   and applies them on request start/end
//! - **[`ProgressReceiver`]**: folds an owner's request lifecycle into one
//!   busy/idle boundary for progress and annotations
//! - **[`ImageProcessor`]** and **[`ImageLoader`]**: image download with a
//!   load/fail/retry state machine per view
//!
//! Everything here runs on the owner's UI context. Background work stays in
//! [`dispatch_runtime`].
//!
//! ## Example
//!
//! ```no_run
//! use dispatch_core::context::ui_context;
//! use dispatch_core::owner::OwnerKey;
//! use dispatch_runtime::{DispatchService, ExecutorConfig, HttpTransport, ServiceAssister};
//! use dispatch_ui::{ImageContent, ImageLoader, ScaleType, View};
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let service = DispatchService::start(Arc::new(HttpTransport::new()), ExecutorConfig::default());
//! let (ui, mut queue) = ui_context();
//! let assister = ServiceAssister::new(OwnerKey::new("gallery"), ui);
//! assister.bind(&service);
//!
//! let loader = ImageLoader::new(assister);
//! let image = View::new();
//! loader.load_image(
//!     &image,
//!     ScaleType::CenterInside,
//!     None,
//!     "https://example.com/comic.png",
//!     ImageContent::Resource(1),
//!     None,
//! );
//!
//! queue.run_next().await;
//! # }
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Widgets mutated by lifecycle rules
pub mod widget;

/// Declarative UI reactivity
pub mod annotation;

/// Progress signalling
pub mod progress;

/// Image-decode processor
pub mod image_processor;

/// Image loader with retry
pub mod image_loader;

pub use annotation::{
    ActionKind, AnnotationConfig, AnnotationError, Phase, ProcessReport, RuleBuilder, RuleError,
    UiAnnotated, UiAnnotationProcessor, UiAnnotationRule,
};
pub use image_loader::{ImageLoadTask, ImageLoader, LoadState, LoadedCallback};
pub use image_processor::ImageProcessor;
pub use progress::{IndeterminateProgressControl, ProgressReceiver};
pub use widget::{ClickHandler, ImageContent, ScaleType, View, ViewId};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
