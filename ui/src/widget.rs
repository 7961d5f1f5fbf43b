//! Minimal retained-mode widgets.
//!
//! A [`View`] is a shared handle to one UI element's state: interaction,
//! visibility, text or image content, scale mode and click handler. It is
//! just enough surface for lifecycle-driven mutations; rendering and layout
//! belong to the embedding toolkit.

use crate::lock;
use image::DynamicImage;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

static NEXT_VIEW: AtomicU64 = AtomicU64::new(1);

/// Identity of a [`View`], stable across clones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewId(u64);

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "view-{}", self.0)
    }
}

/// How an image is fitted into its view.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ScaleType {
    /// Centered, not scaled
    Center,
    /// Scaled uniformly to cover the view
    CenterCrop,
    /// Scaled down uniformly to fit inside the view
    CenterInside,
    /// Scaled uniformly to fit, centered
    #[default]
    FitCenter,
    /// Stretched to the view's bounds
    FitXy,
}

/// Image shown by a view.
#[derive(Clone)]
pub enum ImageContent {
    /// A bundled image resource
    Resource(u32),
    /// A decoded bitmap
    Bitmap(Arc<DynamicImage>),
}

impl ImageContent {
    /// The resource id, if this is a resource.
    #[must_use]
    pub const fn resource(&self) -> Option<u32> {
        match self {
            Self::Resource(id) => Some(*id),
            Self::Bitmap(_) => None,
        }
    }

    /// The bitmap, if this is a decoded image.
    #[must_use]
    pub const fn bitmap(&self) -> Option<&Arc<DynamicImage>> {
        match self {
            Self::Bitmap(image) => Some(image),
            Self::Resource(_) => None,
        }
    }
}

impl PartialEq for ImageContent {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Resource(a), Self::Resource(b)) => a == b,
            (Self::Bitmap(a), Self::Bitmap(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for ImageContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource(id) => f.debug_tuple("Resource").field(id).finish(),
            Self::Bitmap(image) => write!(f, "Bitmap({}x{})", image.width(), image.height()),
        }
    }
}

/// Click handler attached to a view.
pub type ClickHandler = Arc<dyn Fn(&View) + Send + Sync>;

#[derive(Default)]
struct ViewState {
    enabled: bool,
    visible: bool,
    text: String,
    image: Option<ImageContent>,
    scale_type: ScaleType,
    on_click: Option<ClickHandler>,
    // Values replaced by a lifecycle mutation, restored when it ends.
    saved_enabled: Option<bool>,
    saved_visible: Option<bool>,
}

/// Shared handle to a UI element.
///
/// Clones refer to the same element.
///
/// ```
/// use dispatch_ui::widget::View;
///
/// let button = View::new().with_text("OK");
/// let same = button.clone();
/// same.set_enabled(false);
/// assert!(!button.is_enabled());
/// assert_eq!(button.id(), same.id());
/// ```
#[derive(Clone)]
pub struct View {
    id: ViewId,
    state: Arc<Mutex<ViewState>>,
}

impl View {
    /// A new enabled, visible, empty view.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: ViewId(NEXT_VIEW.fetch_add(1, Ordering::Relaxed)),
            state: Arc::new(Mutex::new(ViewState {
                enabled: true,
                visible: true,
                ..ViewState::default()
            })),
        }
    }

    /// Set the initial text.
    #[must_use]
    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.set_text(text);
        self
    }

    /// The view's identity.
    #[must_use]
    pub const fn id(&self) -> ViewId {
        self.id
    }

    /// Whether the view accepts interaction.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        lock(&self.state).enabled
    }

    /// Enable or disable interaction.
    pub fn set_enabled(&self, enabled: bool) {
        lock(&self.state).enabled = enabled;
    }

    /// Whether the view is visible.
    #[must_use]
    pub fn is_visible(&self) -> bool {
        lock(&self.state).visible
    }

    /// Show or hide the view.
    pub fn set_visible(&self, visible: bool) {
        lock(&self.state).visible = visible;
    }

    /// The text content.
    #[must_use]
    pub fn text(&self) -> String {
        lock(&self.state).text.clone()
    }

    /// Replace the text content.
    pub fn set_text(&self, text: impl Into<String>) {
        lock(&self.state).text = text.into();
    }

    /// The image content.
    #[must_use]
    pub fn image(&self) -> Option<ImageContent> {
        lock(&self.state).image.clone()
    }

    /// Replace the image content.
    pub fn set_image(&self, image: Option<ImageContent>) {
        lock(&self.state).image = image;
    }

    /// The scale mode.
    #[must_use]
    pub fn scale_type(&self) -> ScaleType {
        lock(&self.state).scale_type
    }

    /// Replace the scale mode.
    pub fn set_scale_type(&self, scale_type: ScaleType) {
        lock(&self.state).scale_type = scale_type;
    }

    /// The click handler.
    #[must_use]
    pub fn on_click(&self) -> Option<ClickHandler> {
        lock(&self.state).on_click.clone()
    }

    /// Replace the click handler.
    pub fn set_on_click(&self, handler: Option<ClickHandler>) {
        lock(&self.state).on_click = handler;
    }

    /// Simulate a click.
    ///
    /// Runs the handler if the view is enabled and has one. Returns whether
    /// a handler ran.
    pub fn click(&self) -> bool {
        let handler = {
            let state = lock(&self.state);
            if !state.enabled {
                return false;
            }
            state.on_click.clone()
        };

        match handler {
            Some(handler) => {
                handler(self);
                true
            }
            None => false,
        }
    }

    /// Disable interaction, remembering the previous value.
    ///
    /// Idempotent until [`restore_interaction`](Self::restore_interaction).
    pub(crate) fn suspend_interaction(&self) {
        let mut state = lock(&self.state);
        if state.saved_enabled.is_none() {
            state.saved_enabled = Some(state.enabled);
            state.enabled = false;
        }
    }

    /// Put back the value saved by [`suspend_interaction`](Self::suspend_interaction).
    pub(crate) fn restore_interaction(&self) {
        let mut state = lock(&self.state);
        if let Some(enabled) = state.saved_enabled.take() {
            state.enabled = enabled;
        }
    }

    pub(crate) fn suspend_visibility(&self) {
        let mut state = lock(&self.state);
        if state.saved_visible.is_none() {
            state.saved_visible = Some(state.visible);
            state.visible = false;
        }
    }

    pub(crate) fn restore_visibility(&self) {
        let mut state = lock(&self.state);
        if let Some(visible) = state.saved_visible.take() {
            state.visible = visible;
        }
    }

    /// Empty text and image content. Not restorable.
    pub(crate) fn clear_content(&self) {
        let mut state = lock(&self.state);
        state.text.clear();
        state.image = None;
    }
}

impl Default for View {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for View {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for View {}

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("View")
            .field("id", &self.id)
            .field("enabled", &state.enabled)
            .field("visible", &state.visible)
            .field("text", &state.text)
            .field("image", &state.image)
            .field("scale_type", &state.scale_type)
            .field("has_click_handler", &state.on_click.is_some())
            .finish()
    }
}
