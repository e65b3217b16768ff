//! Tests with tracing feature enabled

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use mediafetch::{block_fn, CoordinatorConfig, TaskHandle, TransportError};

use crate::common::{coordinator, init_tracing, settle, MockTransport, Recorder};

#[tokio::test(flavor = "multi_thread")]
async fn test_tracing_with_subscriber() {
    init_tracing();

    let transport = MockTransport::new();
    transport.respond("ok", b"P");
    transport.fail("down", TransportError::Unreachable("offline".into()));
    transport.respond("stale", b"P");
    let coordinator = coordinator(CoordinatorConfig::default(), &transport);
    let recorder = Recorder::new();

    let requests = [
        coordinator.request("ok", recorder.requester()),
        coordinator.request("down", recorder.requester()),
        coordinator.request("stale", recorder.requester_while(Arc::new(AtomicBool::new(false)))),
    ];
    for request in &requests {
        settle(request.chain().expect("expected a new chain").finished()).await;
    }

    // Cache hit and cancellation paths log too
    coordinator.request("ok", recorder.requester());
    assert!(!coordinator.cancel(&"ok".into()));

    assert_eq!(recorder.count(), 2);
}

#[tokio::test]
async fn test_tracing_panicking_task() {
    init_tracing();

    let scheduler = crate::common::tokio_scheduler(Default::default());
    let handle = scheduler.spawn(block_fn(|_: &TaskHandle| panic!("logged, not propagated")));

    settle(handle.finished()).await;
    assert_eq!(scheduler.live_tasks(), 0);
}
