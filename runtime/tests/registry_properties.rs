//! Subscribers observe a monotonic, gap-free lifecycle whatever the update order.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use dispatch_core::error::TransportError;
use dispatch_core::event::{EventSink, RequestOutcome};
use dispatch_core::processor::Payload;
use dispatch_core::request::{RequestId, RequestState};
use dispatch_runtime::{DummyProcessor, RequestRegistry};
use dispatch_testing::RecordingSink;
use proptest::prelude::*;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
enum Op {
    Advance(RequestState),
    Resubmit,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Advance(RequestState::Running)),
        Just(Op::Advance(RequestState::Success)),
        Just(Op::Advance(RequestState::Failed)),
        Just(Op::Advance(RequestState::Cancelled)),
        Just(Op::Resubmit),
    ]
}

fn outcome_for(state: RequestState) -> Option<RequestOutcome> {
    match state {
        RequestState::Success => Some(Ok(Payload::new(()))),
        RequestState::Failed => Some(Err(TransportError::Connection("reset".into()).into())),
        _ => None,
    }
}

proptest! {
    #[test]
    fn subscriber_sees_monotonic_attempts(ops in prop::collection::vec(op(), 0..40)) {
        let registry = RequestRegistry::new();
        let id = RequestId::new("p");
        let _ = registry.register(id.clone(), DummyProcessor::ID);
        let sink = RecordingSink::new();
        let _subscription = registry
            .subscribe(&id, Arc::clone(&sink) as Arc<dyn EventSink>)
            .unwrap();

        for op in ops {
            match op {
                Op::Advance(state) => {
                    let _ = registry.update_state(&id, state, outcome_for(state));
                }
                Op::Resubmit => {
                    let _ = registry.register(id.clone(), DummyProcessor::ID);
                }
            }
        }

        let events = sink.events();
        prop_assert_eq!(events.first().map(|e| e.state), Some(RequestState::Pending));
        prop_assert_eq!(events.last().map(|e| e.state), registry.current_state(&id));

        for pair in events.windows(2) {
            let (before, after) = (&pair[0], &pair[1]);
            if before.attempt == after.attempt {
                prop_assert!(before.state.can_transition_to(after.state));
            } else {
                prop_assert_eq!(after.attempt, before.attempt + 1);
                prop_assert!(before.is_terminal());
                prop_assert_eq!(after.state, RequestState::Pending);
            }
        }

        for event in &events {
            prop_assert_eq!(event.outcome.is_some(), event.is_terminal());
        }
    }
}
