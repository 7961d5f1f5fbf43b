//! Executor behaviour against a scripted transport.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use dispatch_core::error::{FailureCause, ProcessorError, RequestError, TransportError};
use dispatch_core::event::EventSink;
use dispatch_core::processor::RawResponse;
use dispatch_core::request::{Request, RequestId, RequestState};
use dispatch_runtime::{
    DummyProcessor, ExecutorConfig, JsonProcessor, Registration, RequestExecutor, RequestRegistry,
};
use dispatch_testing::{MockTransport, RecordingSink, eventually};
use std::sync::Arc;
use std::time::Duration;

fn executor(transport: &MockTransport, config: ExecutorConfig) -> RequestExecutor {
    RequestExecutor::new(
        RequestRegistry::new(),
        Arc::new(transport.clone()),
        config.with_retry_jitter(false),
    )
}

fn sink(recorder: &Arc<RecordingSink>) -> Option<Arc<dyn EventSink>> {
    Some(Arc::clone(recorder) as Arc<dyn EventSink>)
}

#[tokio::test]
async fn subscriber_sees_every_state_in_order() {
    let transport = MockTransport::new();
    let executor = executor(&transport, ExecutorConfig::default());
    let recorder = RecordingSink::new();

    let submission = executor.submit(
        Request::get("http://svc/a").with_id("a"),
        Arc::new(DummyProcessor),
        sink(&recorder),
    );
    assert!(submission.registration.is_started());

    assert!(eventually(|| recorder.terminal_count() == 1).await);
    assert_eq!(
        recorder.states(),
        vec![RequestState::Pending, RequestState::Running, RequestState::Success]
    );

    let events = recorder.events();
    let terminal = events.last().unwrap();
    assert_eq!(terminal.attempt, 1);
    assert_eq!(terminal.processor_id, DummyProcessor::ID);
    let status = terminal.outcome.clone().unwrap().unwrap();
    assert_eq!(status.downcast_ref::<u16>(), Some(&200));
}

#[tokio::test]
async fn identical_ids_share_one_transport_execution() {
    let transport = MockTransport::new();
    transport.hold();
    let executor = executor(&transport, ExecutorConfig::default());
    let first = RecordingSink::new();
    let second = RecordingSink::new();

    let a = executor.submit(
        Request::get("http://svc/shared").with_id("shared"),
        Arc::new(DummyProcessor),
        sink(&first),
    );
    let b = executor.submit(
        Request::get("http://svc/shared").with_id("shared"),
        Arc::new(DummyProcessor),
        sink(&second),
    );

    assert!(a.registration.is_started());
    assert!(matches!(b.registration, Registration::Joined(_)));
    assert_eq!(b.registration.handle().attempt(), 1);

    transport.open();
    assert!(eventually(|| first.terminal_count() == 1 && second.terminal_count() == 1).await);
    assert_eq!(transport.calls_for("http://svc/shared"), 1);
    assert_eq!(first.states().last(), Some(&RequestState::Success));
    assert_eq!(second.states().last(), Some(&RequestState::Success));
}

#[tokio::test]
async fn transport_failure_is_typed() {
    let transport = MockTransport::new();
    transport.route(
        "http://down/",
        Err(TransportError::Connection("refused".into())),
    );
    let executor = executor(&transport, ExecutorConfig::default());
    let recorder = RecordingSink::new();

    let _submission = executor.submit(
        Request::get("http://down/"),
        Arc::new(DummyProcessor),
        sink(&recorder),
    );

    assert!(eventually(|| recorder.terminal_count() == 1).await);
    let terminal = recorder.events().pop().unwrap();
    assert_eq!(terminal.state, RequestState::Failed);
    assert_eq!(terminal.cause, Some(FailureCause::Transport));
    assert!(matches!(
        terminal.outcome,
        Some(Err(RequestError::Transport(TransportError::Connection(_))))
    ));
}

#[tokio::test]
async fn processor_failure_is_typed() {
    #[derive(serde::Deserialize)]
    struct Profile {
        #[allow(dead_code)]
        name: String,
    }

    let transport = MockTransport::new();
    transport.route("http://api/profile", Ok(RawResponse::ok("<html>")));
    let executor = executor(&transport, ExecutorConfig::default());
    let recorder = RecordingSink::new();

    let _submission = executor.submit(
        Request::get("http://api/profile"),
        Arc::new(JsonProcessor::<Profile>::new()),
        sink(&recorder),
    );

    assert!(eventually(|| recorder.terminal_count() == 1).await);
    let terminal = recorder.events().pop().unwrap();
    assert_eq!(terminal.state, RequestState::Failed);
    assert_eq!(terminal.cause, Some(FailureCause::Processor));
    assert!(matches!(
        terminal.outcome,
        Some(Err(RequestError::Processor(ProcessorError::Malformed(_))))
    ));
}

#[tokio::test]
async fn transport_retries_stay_inside_running() {
    let transport = MockTransport::new();
    transport
        .enqueue("http://flaky/", Err(TransportError::Connection("reset".into())))
        .enqueue("http://flaky/", Err(TransportError::Connection("reset".into())));
    let executor = executor(&transport, ExecutorConfig::default());
    let recorder = RecordingSink::new();

    let _submission = executor.submit(
        Request::get("http://flaky/").with_retries(2, Duration::from_millis(1)),
        Arc::new(DummyProcessor),
        sink(&recorder),
    );

    assert!(eventually(|| recorder.terminal_count() == 1).await);
    assert_eq!(transport.calls_for("http://flaky/"), 3);
    assert_eq!(
        recorder.states(),
        vec![RequestState::Pending, RequestState::Running, RequestState::Success]
    );
}

#[tokio::test]
async fn slow_transport_times_out() {
    let transport = MockTransport::new();
    transport.set_delay(Duration::from_secs(5));
    let executor = executor(&transport, ExecutorConfig::default());
    let recorder = RecordingSink::new();

    let _submission = executor.submit(
        Request::get("http://slow/").with_timeout(Duration::from_millis(20)),
        Arc::new(DummyProcessor),
        sink(&recorder),
    );

    assert!(eventually(|| recorder.terminal_count() == 1).await);
    let terminal = recorder.events().pop().unwrap();
    assert_eq!(terminal.cause, Some(FailureCause::Transport));
    assert!(matches!(
        terminal.outcome,
        Some(Err(RequestError::Transport(TransportError::Timeout(_))))
    ));
}

#[tokio::test]
async fn cancel_ends_a_running_request() {
    let transport = MockTransport::new();
    transport.hold();
    let executor = executor(&transport, ExecutorConfig::default());
    let recorder = RecordingSink::new();
    let id = RequestId::new("doomed");

    let _submission = executor.submit(
        Request::get("http://svc/doomed").with_id(id.clone()),
        Arc::new(DummyProcessor),
        sink(&recorder),
    );
    assert!(eventually(|| executor.registry().current_state(&id) == Some(RequestState::Running)).await);

    assert_eq!(executor.cancel(&id), Ok(true));
    assert_eq!(executor.cancel(&id), Ok(false));
    assert!(executor.cancel(&RequestId::new("never")).is_err());

    assert_eq!(
        recorder.states(),
        vec![RequestState::Pending, RequestState::Running, RequestState::Cancelled]
    );
    let terminal = recorder.events().pop().unwrap();
    assert!(matches!(terminal.outcome, Some(Err(RequestError::Cancelled))));
    assert_eq!(executor.in_flight(), 0);

    // A late transport answer must not resurrect the attempt.
    transport.open();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(recorder.terminal_count(), 1);
}

#[tokio::test]
async fn concurrency_limit_keeps_extra_requests_pending() {
    let transport = MockTransport::new();
    transport.hold();
    let executor = executor(&transport, ExecutorConfig::default().with_max_concurrent(2));
    let ids: Vec<RequestId> = (0..4).map(|i| RequestId::new(format!("r{i}"))).collect();

    for id in &ids {
        let _submission = executor.submit(
            Request::get(format!("http://svc/{id}")).with_id(id.clone()),
            Arc::new(DummyProcessor),
            None,
        );
    }

    assert!(eventually(|| transport.calls() == 2).await);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(transport.calls(), 2);

    let count = |state: RequestState| {
        ids.iter()
            .filter(|id| executor.registry().current_state(id) == Some(state))
            .count()
    };
    assert_eq!(count(RequestState::Running), 2);
    assert_eq!(count(RequestState::Pending), 2);

    transport.open();
    assert!(eventually(|| count(RequestState::Success) == 4).await);
    assert_eq!(transport.calls(), 4);
}

#[tokio::test]
async fn resubmitting_a_finished_id_starts_the_next_attempt() {
    let transport = MockTransport::new();
    let executor = executor(&transport, ExecutorConfig::default());
    let recorder = RecordingSink::new();
    let id = RequestId::new("again");

    let _first = executor.submit(
        Request::get("http://svc/again").with_id(id.clone()),
        Arc::new(DummyProcessor),
        sink(&recorder),
    );
    assert!(eventually(|| recorder.terminal_count() == 1).await);

    let second = executor.submit(
        Request::get("http://svc/again").with_id(id.clone()),
        Arc::new(DummyProcessor),
        None,
    );
    assert!(second.registration.is_started());
    assert_eq!(second.registration.handle().attempt(), 2);

    assert!(eventually(|| recorder.terminal_count() == 2).await);
    assert_eq!(transport.calls_for("http://svc/again"), 2);
    let attempts: Vec<u32> = recorder.events().iter().map(|e| e.attempt).collect();
    assert_eq!(attempts, vec![1, 1, 1, 2, 2, 2]);
}

#[tokio::test]
async fn late_subscriber_gets_the_terminal_event_once() {
    let transport = MockTransport::new();
    let executor = executor(&transport, ExecutorConfig::default());
    let id = RequestId::new("done");

    let _submission = executor.submit(
        Request::get("http://svc/done").with_id(id.clone()),
        Arc::new(DummyProcessor),
        None,
    );
    assert!(eventually(|| executor.in_flight() == 0
        && executor.registry().current_state(&id) == Some(RequestState::Success))
    .await);

    let late = RecordingSink::new();
    let _subscription = executor
        .registry()
        .subscribe(&id, Arc::clone(&late) as Arc<dyn EventSink>)
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(late.states(), vec![RequestState::Success]);
}
