//! Image loading onto views: fallback, failure, click-to-retry, supersede.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use dispatch_core::context::{UiQueue, ui_context};
use dispatch_core::error::TransportError;
use dispatch_core::owner::OwnerKey;
use dispatch_core::processor::RawResponse;
use dispatch_core::request::{RequestId, RequestState};
use dispatch_runtime::{DispatchService, ExecutorConfig, ServiceAssister};
use dispatch_testing::{MockTransport, init_tracing, png_fixture, settle};
use dispatch_ui::{ClickHandler, ImageContent, ImageLoader, LoadState, ScaleType, View};
use image::DynamicImage;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const FALLBACK: ImageContent = ImageContent::Resource(1);
const BROKEN: ImageContent = ImageContent::Resource(2);

struct Harness {
    transport: MockTransport,
    loader: ImageLoader,
    assister: ServiceAssister,
    queue: UiQueue,
    _service: DispatchService,
}

fn harness() -> Harness {
    init_tracing();
    let transport = MockTransport::new();
    let service = DispatchService::start(
        Arc::new(transport.clone()),
        ExecutorConfig::default().with_retry_jitter(false),
    );
    let (ui, queue) = ui_context();
    let assister = ServiceAssister::new(OwnerKey::new("gallery"), ui);
    assister.bind(&service);

    Harness {
        transport,
        loader: ImageLoader::new(assister.clone()),
        assister,
        queue,
        _service: service,
    }
}

fn counting_handler() -> (ClickHandler, Arc<AtomicUsize>) {
    let clicks = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&clicks);
    let handler: ClickHandler = Arc::new(move |_view: &View| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    (handler, clicks)
}

fn image_size(view: &View) -> Option<(u32, u32)> {
    view.image()
        .and_then(|content| content.bitmap().map(|image| (image.width(), image.height())))
}

#[tokio::test]
async fn failed_load_shows_error_image_and_retries_on_click() {
    let mut h = harness();
    let url = "http://img/comic.png";
    h.transport
        .enqueue(url, Err(TransportError::Connection("offline".into())))
        .route(url, Ok(RawResponse::ok(png_fixture(6, 4))));

    let view = View::new();
    let (original, clicks) = counting_handler();
    h.loader.load_image(
        &view,
        ScaleType::CenterInside,
        Some(Arc::clone(&original)),
        url,
        FALLBACK,
        Some(BROKEN),
    );

    // Loading: fallback shown centered, no click handler.
    assert_eq!(h.loader.state(&view), Some(LoadState::Loading));
    assert_eq!(view.image(), Some(FALLBACK));
    assert_eq!(view.scale_type(), ScaleType::Center);
    assert!(view.on_click().is_none());

    let loader = h.loader.clone();
    let watched = view.clone();
    assert!(settle(&mut h.queue, || loader.state(&watched) == Some(LoadState::Failed)).await);
    assert_eq!(view.image(), Some(BROKEN));
    assert!(view.on_click().is_some());

    // The click handler is now the retry trigger, not the original one.
    assert!(view.click());
    assert_eq!(clicks.load(Ordering::SeqCst), 0);
    assert_eq!(h.loader.state(&view), Some(LoadState::Loading));
    assert_eq!(view.image(), Some(FALLBACK));
    assert_eq!(h.loader.task(&view).map(|t| t.retries()), Some(1));

    assert!(settle(&mut h.queue, || loader.state(&watched) == Some(LoadState::Loaded)).await);
    assert_eq!(image_size(&view), Some((6, 4)));
    assert_eq!(view.scale_type(), ScaleType::CenterInside);
    assert_eq!(h.transport.calls_for(url), 2);

    // The original handler is back.
    assert!(view.click());
    assert_eq!(clicks.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn undecodable_body_fails_with_fallback_as_error_image() {
    let mut h = harness();
    h.transport
        .route("http://img/not-an-image", Ok(RawResponse::ok("<html>nope</html>")));

    let view = View::new();
    h.loader.load_image(
        &view,
        ScaleType::FitCenter,
        None,
        "http://img/not-an-image",
        FALLBACK,
        None,
    );

    let loader = h.loader.clone();
    let watched = view.clone();
    assert!(settle(&mut h.queue, || loader.state(&watched) == Some(LoadState::Failed)).await);
    assert_eq!(view.image(), Some(FALLBACK));
    assert!(view.on_click().is_some());
}

#[tokio::test]
async fn newer_load_supersedes_older_result() {
    let mut h = harness();
    h.transport.hold();
    h.transport
        .route("http://img/old.png", Ok(RawResponse::ok(png_fixture(2, 2))))
        .route("http://img/new.png", Ok(RawResponse::ok(png_fixture(5, 5))));

    let view = View::new();
    h.loader
        .load_image(&view, ScaleType::FitXy, None, "http://img/old.png", FALLBACK, None);
    h.loader
        .load_image(&view, ScaleType::FitXy, None, "http://img/new.png", FALLBACK, None);
    assert_eq!(h.loader.task(&view).map(|t| t.url().to_string()).as_deref(), Some("http://img/new.png"));

    h.transport.open();
    let registry = h.assister.registry().unwrap();
    let done = |url: &str| {
        registry.current_state(&RequestId::new(format!("image:{url}"))) == Some(RequestState::Success)
    };
    let loader = h.loader.clone();
    let watched = view.clone();
    assert!(settle(&mut h.queue, || {
        done("http://img/old.png")
            && done("http://img/new.png")
            && loader.state(&watched) == Some(LoadState::Loaded)
    })
    .await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.queue.drain();

    assert_eq!(image_size(&view), Some((5, 5)));
    assert_eq!(view.scale_type(), ScaleType::FitXy);
}

#[tokio::test]
async fn same_url_on_two_views_downloads_once() {
    init_tracing();
    let transport = MockTransport::new();
    transport.hold();
    transport.route("http://img/shared.png", Ok(RawResponse::ok(png_fixture(3, 3))));
    let service = DispatchService::start(Arc::new(transport.clone()), ExecutorConfig::default());
    let (ui, mut queue) = ui_context();
    let assister = ServiceAssister::new(OwnerKey::new("grid"), ui);
    assister.bind(&service);

    let loaded = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&loaded);
    let loader = ImageLoader::with_loaded_callback(
        assister,
        Arc::new(move |_view: &View, _image: &Arc<DynamicImage>| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );

    let left = View::new();
    let right = View::new();
    for view in [&left, &right] {
        loader.load_image(view, ScaleType::CenterCrop, None, "http://img/shared.png", FALLBACK, None);
    }

    transport.open();
    assert!(settle(&mut queue, || loaded.load(Ordering::SeqCst) == 2).await);
    assert_eq!(transport.calls_for("http://img/shared.png"), 1);
    assert_eq!(image_size(&left), Some((3, 3)));
    assert_eq!(image_size(&right), Some((3, 3)));
}

#[tokio::test]
async fn forgotten_view_keeps_its_fallback() {
    let mut h = harness();
    h.transport.hold();
    h.transport
        .route("http://img/detached.png", Ok(RawResponse::ok(png_fixture(1, 1))));

    let view = View::new();
    h.loader
        .load_image(&view, ScaleType::Center, None, "http://img/detached.png", FALLBACK, None);
    assert!(h.loader.forget(&view));
    assert!(!h.loader.forget(&view));

    h.transport.open();
    let registry = h.assister.registry().unwrap();
    let id = RequestId::new("image:http://img/detached.png");
    assert!(settle(&mut h.queue, || registry.current_state(&id) == Some(RequestState::Success)).await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.queue.drain();

    assert_eq!(view.image(), Some(FALLBACK));
    assert_eq!(h.loader.state(&view), None);
}
