//! Asynchronous image loading onto views, with user-driven retry.
//!
//! # Task state machine
//!
//! ```text
//!            load_image                    success
//! Initial ──────────────► Loading ─────────────────────► Loaded
//!                          ▲   │                          (image, scale mode and
//!                          │   │ failure                   click handler restored)
//!                    click │   ▼
//!                          └─ Failed
//!                             (error image, click handler = retry)
//! ```
//!
//! One task exists per view. Loading a new image onto a view supersedes its
//! task; a result arriving for a superseded task is discarded.

use crate::image_processor::ImageProcessor;
use crate::lock;
use crate::widget::{ClickHandler, ImageContent, ScaleType, View, ViewId};
use dispatch_core::event::{Callback, RequestOutcome};
use dispatch_core::request::{Request, RequestId};
use dispatch_runtime::ServiceAssister;
use image::DynamicImage;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

/// Where an [`ImageLoadTask`] is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoadState {
    /// Created, nothing shown yet
    Initial,
    /// Fallback shown, request running
    Loading,
    /// Decoded image shown
    Loaded,
    /// Error image shown, waiting for a retry click
    Failed,
}

#[derive(Debug)]
struct Progress {
    state: LoadState,
    retries: u32,
}

/// One image load onto one view.
pub struct ImageLoadTask {
    view: View,
    url: String,
    fallback: ImageContent,
    error: ImageContent,
    scale_type: ScaleType,
    handler: Option<ClickHandler>,
    progress: Mutex<Progress>,
}

impl ImageLoadTask {
    /// The target view.
    #[must_use]
    pub const fn view(&self) -> &View {
        &self.view
    }

    /// The image url.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> LoadState {
        lock(&self.progress).state
    }

    /// Number of retries triggered by the user.
    #[must_use]
    pub fn retries(&self) -> u32 {
        lock(&self.progress).retries
    }

    fn set_state(&self, state: LoadState) {
        lock(&self.progress).state = state;
    }

    fn request_id(&self) -> RequestId {
        RequestId::new(format!("image:{}", self.url))
    }
}

impl std::fmt::Debug for ImageLoadTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageLoadTask")
            .field("view", &self.view.id())
            .field("url", &self.url)
            .field("progress", &*lock(&self.progress))
            .finish_non_exhaustive()
    }
}

/// Called on the UI context after every successful load.
pub type LoadedCallback = Arc<dyn Fn(&View, &Arc<DynamicImage>) + Send + Sync>;

struct LoaderInner {
    assister: ServiceAssister,
    processor: Arc<ImageProcessor>,
    tasks: Mutex<HashMap<ViewId, Arc<ImageLoadTask>>>,
    on_loaded: Option<LoadedCallback>,
}

/// Loads images onto views through a [`ServiceAssister`].
///
/// Every method must be called on the owner's UI context; results are
/// applied there too, when the owner drains its queue.
#[derive(Clone)]
pub struct ImageLoader {
    inner: Arc<LoaderInner>,
}

impl ImageLoader {
    /// Create a loader submitting through `assister`.
    #[must_use]
    pub fn new(assister: ServiceAssister) -> Self {
        Self::build(assister, None)
    }

    /// Create a loader that calls `on_loaded` after each successful load.
    #[must_use]
    pub fn with_loaded_callback(assister: ServiceAssister, on_loaded: LoadedCallback) -> Self {
        Self::build(assister, Some(on_loaded))
    }

    fn build(assister: ServiceAssister, on_loaded: Option<LoadedCallback>) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                assister,
                processor: Arc::new(ImageProcessor),
                tasks: Mutex::new(HashMap::new()),
                on_loaded,
            }),
        }
    }

    /// Load `url` onto `view`.
    ///
    /// Saves `scale_type` and `original_handler`, shows `fallback`
    /// immediately and submits the download. On success the decoded image is
    /// shown and the saved scale mode and handler are put back. On failure
    /// `error` (or `fallback` when `None`) is shown and a click on the view
    /// retries the same load.
    ///
    /// Supersedes any earlier load onto the same view.
    #[tracing::instrument(skip_all, fields(view = %view.id()))]
    pub fn load_image(
        &self,
        view: &View,
        scale_type: ScaleType,
        original_handler: Option<ClickHandler>,
        url: impl AsRef<str>,
        fallback: ImageContent,
        error: Option<ImageContent>,
    ) {
        let task = Arc::new(ImageLoadTask {
            view: view.clone(),
            url: url.as_ref().to_string(),
            error: error.unwrap_or_else(|| fallback.clone()),
            fallback,
            scale_type,
            handler: original_handler,
            progress: Mutex::new(Progress {
                state: LoadState::Initial,
                retries: 0,
            }),
        });

        if lock(&self.inner.tasks)
            .insert(view.id(), Arc::clone(&task))
            .is_some()
        {
            tracing::debug!(url = %task.url, "Superseding previous load");
        }

        LoaderInner::start(&self.inner, &task);
    }

    /// The current task of `view`.
    #[must_use]
    pub fn task(&self, view: &View) -> Option<Arc<ImageLoadTask>> {
        lock(&self.inner.tasks).get(&view.id()).cloned()
    }

    /// The state of `view`'s current task.
    #[must_use]
    pub fn state(&self, view: &View) -> Option<LoadState> {
        self.task(view).map(|task| task.state())
    }

    /// Drop the task of a detached view. Its pending result is discarded.
    ///
    /// Returns `false` if the view had no task.
    pub fn forget(&self, view: &View) -> bool {
        lock(&self.inner.tasks).remove(&view.id()).is_some()
    }
}

impl std::fmt::Debug for ImageLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageLoader")
            .field("tasks", &lock(&self.inner.tasks).len())
            .finish_non_exhaustive()
    }
}

impl LoaderInner {
    fn is_current(&self, task: &Arc<ImageLoadTask>) -> bool {
        lock(&self.tasks)
            .get(&task.view.id())
            .is_some_and(|current| Arc::ptr_eq(current, task))
    }

    fn start(this: &Arc<Self>, task: &Arc<ImageLoadTask>) {
        let view = &task.view;
        view.set_image(Some(task.fallback.clone()));
        view.set_scale_type(ScaleType::Center);
        view.set_on_click(None);
        task.set_state(LoadState::Loading);

        let loader = Arc::downgrade(this);
        let pending = Arc::clone(task);
        let callback: Callback = Box::new(move |_id: &RequestId, outcome: RequestOutcome| {
            if let Some(loader) = loader.upgrade() {
                Self::finish(&loader, &pending, outcome);
            }
        });

        let request = Request::get(task.url.as_str()).with_id(task.request_id());
        this.assister
            .submit(request, Arc::clone(&this.processor) as _, Some(callback));
    }

    fn finish(this: &Arc<Self>, task: &Arc<ImageLoadTask>, outcome: RequestOutcome) {
        if !this.is_current(task) {
            tracing::debug!(view = %task.view.id(), url = %task.url, "Discarding result of superseded load");
            return;
        }

        let view = &task.view;
        let decoded = outcome
            .map_err(|err| err.to_string())
            .and_then(|payload| {
                payload
                    .downcast::<DynamicImage>()
                    .ok_or_else(|| "payload is not an image".to_string())
            });

        match decoded {
            Ok(image) => {
                view.set_image(Some(ImageContent::Bitmap(Arc::clone(&image))));
                view.set_scale_type(task.scale_type);
                view.set_on_click(task.handler.clone());
                task.set_state(LoadState::Loaded);
                tracing::info!(view = %view.id(), url = %task.url, "Image loaded");

                if let Some(on_loaded) = &this.on_loaded {
                    on_loaded(view, &image);
                }
            }
            Err(reason) => {
                view.set_image(Some(task.error.clone()));
                view.set_on_click(Some(Self::retry_handler(this, task)));
                task.set_state(LoadState::Failed);
                tracing::warn!(view = %view.id(), url = %task.url, error = %reason, "Image load failed");
            }
        }
    }

    // Holds the task weakly: the view owns the handler and the task owns the view.
    fn retry_handler(this: &Arc<Self>, task: &Arc<ImageLoadTask>) -> ClickHandler {
        let loader: Weak<Self> = Arc::downgrade(this);
        let task = Arc::downgrade(task);
        Arc::new(move |_view: &View| {
            let (Some(loader), Some(task)) = (loader.upgrade(), task.upgrade()) else {
                return;
            };
            if !loader.is_current(&task) {
                return;
            }
            lock(&task.progress).retries += 1;
            tracing::info!(url = %task.url, retries = task.retries(), "Retrying image load");
            Self::start(&loader, &task);
        })
    }
}
