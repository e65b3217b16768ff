//! End-to-end request scenarios

use std::time::Duration;

use bytes::Bytes;
use futures::channel::oneshot;
use mediafetch::{
    task_fn, Cache, CoordinatorConfig, RequestOutcome, ResourceKey, SchedulerConfig, TaskHandle,
    TaskState, TransportError, Undelivered,
};

use crate::common::{
    coordinator, coordinator_on, eventually, settle, tokio_scheduler, MockTransport, Recorder,
};

#[tokio::test]
async fn test_delayed_payload_is_cached_and_delivered_once() {
    let transport = MockTransport::new();
    transport.respond_after("A", b"P", Duration::from_millis(30));
    let coordinator = coordinator(CoordinatorConfig::default(), &transport);
    let recorder = Recorder::new();
    let key = ResourceKey::from("A");

    let outcome = coordinator.request("A", recorder.requester());
    assert!(matches!(outcome, RequestOutcome::Scheduled(_)));

    // Nothing is cached until the fetch completes
    assert_eq!(coordinator.lookup(&key), None);

    eventually(|| coordinator.lookup(&key).is_some()).await;
    assert_eq!(coordinator.lookup(&key), Some(Bytes::from_static(b"P")));

    eventually(|| recorder.count() > 0).await;
    settle(outcome.chain().expect("expected a new chain").finished()).await;
    assert_eq!(recorder.payloads(), vec![Bytes::from_static(b"P")]);
    assert_eq!(recorder.keys(), vec![key]);
}

#[tokio::test]
async fn test_second_request_after_apply_is_served_from_cache() {
    let transport = MockTransport::new();
    transport.respond("A", b"P");
    let coordinator = coordinator(CoordinatorConfig::default(), &transport);
    let recorder = Recorder::new();

    let first = coordinator.request("A", recorder.requester());
    settle(first.chain().expect("expected a new chain").finished()).await;
    let tasks_before = coordinator.scheduler().live_tasks();

    let second = coordinator.request("A", recorder.requester());

    assert!(second.is_cached());
    assert_eq!(transport.calls("A"), 1);
    assert_eq!(coordinator.scheduler().live_tasks(), tasks_before);
    assert_eq!(recorder.count(), 2);
}

#[tokio::test]
async fn test_request_after_apply_is_served_before_cache_store_runs() {
    let transport = MockTransport::new();
    let gate = transport.respond_when_opened("A", b"P");
    let scheduler = tokio_scheduler(SchedulerConfig::default().with_max_concurrent_workers(1));
    let coordinator = coordinator_on(CoordinatorConfig::default(), &transport, scheduler);
    let recorder = Recorder::new();

    let first = coordinator.request("A", recorder.requester());
    let chain = first.chain().expect("expected a new chain");

    // Queued behind the running fetch, so it takes the single worker before cache-store
    let (unblock, blocked) = oneshot::channel::<()>();
    let blocker = coordinator.scheduler().spawn(task_fn(move |_: TaskHandle| async move {
        let _ = blocked.await;
    }));

    gate.open();
    settle(chain.apply().finished()).await;
    assert_eq!(recorder.count(), 1);
    assert_eq!(chain.store().state(), TaskState::Ready);

    let second = coordinator.request("A", recorder.requester());
    assert!(second.is_cached(), "second request after apply should be served from cache");
    assert_eq!(transport.calls("A"), 1);
    assert_eq!(recorder.payloads(), vec![Bytes::from_static(b"P"), Bytes::from_static(b"P")]);

    unblock.send(()).expect("blocker is waiting");
    settle(blocker.finished()).await;
    settle(chain.finished()).await;
    assert_eq!(coordinator.lookup(&"A".into()), Some(Bytes::from_static(b"P")));
    assert_eq!(coordinator.in_flight_len(), 0);
}

#[tokio::test]
async fn test_registry_returns_to_baseline_for_every_outcome() {
    let transport = MockTransport::new();
    transport.respond("ok", b"P");
    transport.fail("down", TransportError::Unreachable("no route".into()));
    let cancelled_gate = transport.respond_when_opened("cancelled", b"never");
    let coordinator = coordinator(CoordinatorConfig::default(), &transport);
    let recorder = Recorder::new();

    let baseline = coordinator.in_flight_len();

    let ok = coordinator.request("ok", recorder.requester());
    let down = coordinator.request("down", recorder.requester());
    let missing = coordinator.request("missing", recorder.requester());
    let cancelled = coordinator.request("cancelled", recorder.requester());
    assert!(coordinator.in_flight_len() > baseline);
    assert!(coordinator.cancel(&"cancelled".into()));

    let outcome = |request: &RequestOutcome| request.chain().expect("expected a new chain").outcome();
    assert_eq!(settle(outcome(&ok)).await, Ok(()));
    assert_eq!(
        settle(outcome(&down)).await,
        Err(Undelivered::Transport(TransportError::Unreachable("no route".into())))
    );
    assert_eq!(
        settle(outcome(&missing)).await,
        Err(Undelivered::Transport(TransportError::Status(404)))
    );
    assert_eq!(settle(outcome(&cancelled)).await, Err(Undelivered::Cancelled));

    assert_eq!(coordinator.in_flight_len(), baseline);
    assert_eq!(recorder.count(), 1);
    assert_eq!(coordinator.cache().len(), 1);
    drop(cancelled_gate);
}

#[tokio::test]
async fn test_empty_body_is_cached_and_delivered() {
    let transport = MockTransport::new();
    transport.respond("blank", b"");
    let coordinator = coordinator(CoordinatorConfig::default(), &transport);
    let recorder = Recorder::new();

    let request = coordinator.request("blank", recorder.requester());
    let chain = request.chain().expect("expected a new chain");

    assert_eq!(settle(chain.outcome()).await, Ok(()));
    assert_eq!(chain.result().payload(), Some(Bytes::new()));
    assert_eq!(recorder.payloads(), vec![Bytes::new()]);
    assert_eq!(coordinator.lookup(&"blank".into()), Some(Bytes::new()));

    // Zero bytes is still a cached payload; no second fetch
    assert!(coordinator.request("blank", recorder.requester()).is_cached());
    assert_eq!(transport.calls("blank"), 1);
    assert_eq!(recorder.count(), 2);
}

#[tokio::test]
async fn test_failed_request_can_be_retried() {
    let transport = MockTransport::new();
    transport.fail("A", TransportError::Status(503));
    let coordinator = coordinator(CoordinatorConfig::default(), &transport);
    let recorder = Recorder::new();

    let first = coordinator.request("A", recorder.requester());
    settle(first.chain().expect("expected a new chain").finished()).await;
    assert_eq!(recorder.count(), 0);

    transport.respond("A", b"P");
    let retry = coordinator.request("A", recorder.requester());
    settle(retry.chain().expect("expected a retry chain").finished()).await;

    assert_eq!(transport.calls("A"), 2);
    assert_eq!(recorder.payloads(), vec![Bytes::from_static(b"P")]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_keys_in_parallel() {
    let transport = MockTransport::new();
    let keys: Vec<String> = (0..32).map(|i| format!("img-{i}")).collect();
    for key in &keys {
        transport.respond_after(key, b"payload", Duration::from_millis(5));
    }
    let coordinator = coordinator(CoordinatorConfig::default(), &transport);
    let recorder = Recorder::new();

    let chains: Vec<_> = keys
        .iter()
        .filter_map(|key| coordinator.request(key.as_str(), recorder.requester()).chain().cloned())
        .collect();
    assert_eq!(chains.len(), keys.len());

    for chain in &chains {
        assert_eq!(settle(chain.outcome()).await, Ok(()));
    }
    assert_eq!(recorder.count(), keys.len());
    assert_eq!(coordinator.cache().len(), keys.len());
    assert_eq!(coordinator.in_flight_len(), 0);
    assert_eq!(coordinator.scheduler().live_tasks(), 0);
}
