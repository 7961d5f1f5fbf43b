//! Progress and UI annotations driven by an owner's request lifecycle.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use dispatch_core::context::ui_context;
use dispatch_core::owner::OwnerKey;
use dispatch_core::request::{Request, RequestState};
use dispatch_runtime::{DispatchService, DummyProcessor, ExecutorConfig, ServiceAssister};
use dispatch_testing::{MockTransport, RecordingProgress, eventually, init_tracing, settle};
use dispatch_ui::annotation::Annotated;
use dispatch_ui::{
    ActionKind, AnnotationConfig, IndeterminateProgressControl, Phase, ProgressReceiver,
    RuleBuilder, RuleError, UiAnnotated, UiAnnotationProcessor, View,
};
use std::sync::Arc;

struct Details {
    save: View,
}

impl UiAnnotated for Details {
    fn declare(rules: &mut RuleBuilder<Self>) {
        rules.element("save", |d| Some(d.save.clone()), &[ActionKind::Disable]);
    }
}

struct SearchScreen {
    submit: View,
    hint: View,
    results: View,
    help: View,
    details: Arc<Details>,
}

impl UiAnnotated for SearchScreen {
    fn declare(rules: &mut RuleBuilder<Self>) {
        rules
            .element("submit", |s| Some(s.submit.clone()), &[ActionKind::Disable])
            .element("hint", |s| Some(s.hint.clone()), &[ActionKind::Hide])
            .element("results", |s| Some(s.results.clone()), &[ActionKind::Clear])
            .element("help", |s| Some(s.help.clone()), &[ActionKind::Hide])
            .nested("details", |s| Some(Arc::clone(&s.details) as Arc<dyn Annotated>));
    }
}

fn screen() -> Arc<SearchScreen> {
    let help = View::new();
    help.set_visible(false);
    Arc::new(SearchScreen {
        submit: View::new(),
        hint: View::new().with_text("type to search"),
        results: View::new().with_text("previous results"),
        help,
        details: Arc::new(Details { save: View::new() }),
    })
}

#[tokio::test]
async fn progress_is_shown_exactly_while_requests_run() {
    init_tracing();
    let transport = MockTransport::new();
    transport.hold();
    let service = DispatchService::start(Arc::new(transport.clone()), ExecutorConfig::default());
    let (ui, mut queue) = ui_context();
    let assister = ServiceAssister::new(OwnerKey::new("search"), ui);
    assister.bind(&service);

    let screen = screen();
    let progress = RecordingProgress::with_owner(Arc::clone(&screen) as Arc<dyn Annotated>);
    let receiver = Arc::new(ProgressReceiver::new(progress.clone()));
    assister.register_receiver(receiver.clone());

    assister.submit(Request::get("http://svc/q1"), Arc::new(DummyProcessor), None);
    assister.submit(Request::get("http://svc/q2"), Arc::new(DummyProcessor), None);

    assert!(eventually(|| transport.calls() == 2).await);
    assert!(settle(&mut queue, || receiver.running() == 2).await);

    assert!(progress.is_indeterminate_progress_showing());
    assert_eq!(progress.shown(), 1);
    assert_eq!(progress.phases(), vec![Phase::OnStart]);
    assert!(!screen.submit.is_enabled());
    assert!(!screen.hint.is_visible());
    assert!(screen.results.text().is_empty());
    assert!(!screen.details.save.is_enabled());

    transport.open();
    assert!(settle(&mut queue, || receiver.running() == 0 && progress.hidden() == 1).await);

    assert!(!progress.is_indeterminate_progress_showing());
    assert_eq!(progress.shown(), 1);
    assert_eq!(progress.phases(), vec![Phase::OnStart, Phase::OnEnd]);
    assert!(screen.submit.is_enabled());
    assert!(screen.hint.is_visible());
    assert!(!screen.help.is_visible(), "hidden before the request, stays hidden");
    assert!(screen.results.text().is_empty(), "clear is not undone");
    assert!(screen.details.save.is_enabled());
    assert!(progress.reports().iter().all(|report| report.is_clean()));
}

#[tokio::test]
async fn receiver_registered_mid_flight_shows_progress() {
    let transport = MockTransport::new();
    transport.hold();
    let service = DispatchService::start(Arc::new(transport.clone()), ExecutorConfig::default());
    let (ui, mut queue) = ui_context();
    let assister = ServiceAssister::new(OwnerKey::new("late"), ui);
    assister.bind(&service);

    assister.submit(Request::get("http://svc/slow"), Arc::new(DummyProcessor), None);
    assert!(eventually(|| transport.calls() == 1).await);
    queue.drain();

    let progress = RecordingProgress::new();
    let receiver = Arc::new(ProgressReceiver::new(progress.clone()));
    assister.register_receiver(receiver.clone());
    assert!(settle(&mut queue, || progress.shown() == 1).await);

    transport.open();
    assert!(settle(&mut queue, || progress.hidden() == 1).await);
    assert_eq!(receiver.running(), 0);
}

#[tokio::test]
async fn resubmit_before_draining_hides_progress_when_done() {
    let transport = MockTransport::new();
    let service = DispatchService::start(Arc::new(transport.clone()), ExecutorConfig::default());
    let (ui, mut queue) = ui_context();
    let assister = ServiceAssister::new(OwnerKey::new("refresh"), ui);
    assister.bind(&service);

    let progress = RecordingProgress::new();
    let receiver = Arc::new(ProgressReceiver::new(progress.clone()));
    assister.register_receiver(receiver.clone());

    let id = assister.submit(Request::get("http://svc/x").with_id("x"), Arc::new(DummyProcessor), None);
    let registry = service.registry().clone();
    assert!(eventually(|| registry.current_state(&id) == Some(RequestState::Success)).await);

    // Second attempt submitted while the first result still sits in the queue.
    transport.hold();
    assister.submit(Request::get("http://svc/x").with_id("x"), Arc::new(DummyProcessor), None);
    queue.drain();

    transport.open();
    assert!(settle(&mut queue, || progress.hidden() == 2).await);
    assert_eq!(registry.snapshot(&id).map(|event| event.attempt), Some(2));
    assert_eq!(progress.shown(), 2);
    assert_eq!(receiver.running(), 0);
    assert!(!progress.is_indeterminate_progress_showing());
}

#[tokio::test]
async fn replay_skips_requests_that_finished_before_it_ran() {
    let transport = MockTransport::new();
    transport.hold();
    let service = DispatchService::start(Arc::new(transport.clone()), ExecutorConfig::default());
    let (ui, mut queue) = ui_context();
    let assister = ServiceAssister::new(OwnerKey::new("quick"), ui);
    assister.bind(&service);

    let id = assister.submit(Request::get("http://svc/quick"), Arc::new(DummyProcessor), None);
    let registry = service.registry().clone();
    assert!(eventually(|| registry.current_state(&id) == Some(RequestState::Running)).await);
    queue.drain();

    // The replay is queued while running but runs after the request ended.
    let progress = RecordingProgress::new();
    let receiver = Arc::new(ProgressReceiver::new(progress.clone()));
    assister.register_receiver(receiver.clone());
    transport.open();
    assert!(eventually(|| registry.current_state(&id) == Some(RequestState::Success)).await);
    queue.drain();

    assert_eq!(progress.shown(), 0);
    assert_eq!(receiver.running(), 0);
    assert!(!progress.is_indeterminate_progress_showing());
}

struct Link {
    button: View,
    next: Option<Arc<Link>>,
}

impl UiAnnotated for Link {
    fn declare(rules: &mut RuleBuilder<Self>) {
        rules
            .element("button", |l| Some(l.button.clone()), &[ActionKind::Disable])
            .nested("next", |l| l.next.clone().map(|n| n as Arc<dyn Annotated>));
    }
}

fn chain(len: usize) -> Link {
    (1..len).fold(
        Link {
            button: View::new(),
            next: None,
        },
        |next, _| Link {
            button: View::new(),
            next: Some(Arc::new(next)),
        },
    )
}

fn buttons(link: &Link) -> Vec<View> {
    let mut views = vec![link.button.clone()];
    let mut current = link.next.clone();
    while let Some(link) = current {
        views.push(link.button.clone());
        current = link.next.clone();
    }
    views
}

#[test]
fn nested_search_stops_at_the_depth_limit() {
    let processor = UiAnnotationProcessor::new(AnnotationConfig::default().with_max_depth(2));
    let root = chain(4);

    let report = processor.process(&root, Phase::OnStart).unwrap();

    let enabled: Vec<bool> = buttons(&root).iter().map(View::is_enabled).collect();
    assert_eq!(enabled, vec![false, false, false, true]);
    assert_eq!(report.applied, 5);
    assert!(matches!(
        report.errors.as_slice(),
        [RuleError::DepthExceeded { field: "next", max_depth: 2, .. }]
    ));
    assert_eq!(processor.derivations(), 1);
}

#[test]
fn nested_search_resolves_through_every_level() {
    let processor = UiAnnotationProcessor::default();
    let root = chain(3);

    let started = processor.process(&root, Phase::OnStart).unwrap();
    assert!(buttons(&root).iter().all(|b| !b.is_enabled()));
    // The last link has nothing nested.
    assert!(matches!(
        started.errors.as_slice(),
        [RuleError::Unresolved { field: "next", action: ActionKind::SearchNested, .. }]
    ));

    processor.process(&root, Phase::OnEnd).unwrap();
    assert!(buttons(&root).iter().all(View::is_enabled));
}
