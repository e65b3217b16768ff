//! Cancelling fetches: nothing cached, nothing delivered, nothing leaked.

use std::time::Duration;

use mediafetch::{
    task_fn, Cache, CoordinatorConfig, ExecContext, FetchTask, ResourceKey, Scheduler,
    SchedulerConfig, TaskHandle, TaskState, Undelivered,
};

use crate::common::{coordinator, eventually, settle, tokio_scheduler, MockTransport, Recorder};

#[tokio::test]
async fn test_cancel_before_transport_responds() {
    let transport = MockTransport::new();
    let _gate = transport.respond_when_opened("A", b"P");
    let coordinator = coordinator(CoordinatorConfig::default(), &transport);
    let recorder = Recorder::new();
    let key = ResourceKey::from("A");

    let request = coordinator.request("A", recorder.requester());
    let chain = request.chain().expect("expected a new chain");

    eventually(|| transport.calls("A") == 1).await;
    assert!(coordinator.cancel(&key));

    assert_eq!(settle(chain.outcome()).await, Err(Undelivered::Cancelled));
    assert_eq!(recorder.count(), 0);
    assert_eq!(coordinator.lookup(&key), None);
    assert!(!coordinator.is_in_flight(&key));
    assert!(chain.fetch().is_cancelled());
    assert!(!chain.result().is_set());
    // The in-flight transport call was dropped, not left running
    assert_eq!(transport.aborted_calls(), 1);
}

#[tokio::test]
async fn test_cancel_before_fetch_starts() {
    let transport = MockTransport::new();
    transport.respond("A", b"P");
    // One worker, kept busy, so the fetch cannot start yet
    let scheduler = tokio_scheduler(SchedulerConfig::default().with_max_concurrent_workers(1));
    let (release, hold) = futures::channel::oneshot::channel::<()>();
    let blocker = scheduler.spawn(task_fn(move |_: TaskHandle| async move {
        let _ = hold.await;
    }));
    let coordinator = crate::common::coordinator_on(CoordinatorConfig::default(), &transport, scheduler);
    let recorder = Recorder::new();

    let request = coordinator.request("A", recorder.requester());
    let chain = request.chain().expect("expected a new chain");
    assert_eq!(chain.fetch().state(), TaskState::Ready);

    chain.cancel();
    release.send(()).expect("blocker is waiting");
    settle(blocker.finished()).await;

    assert_eq!(settle(chain.outcome()).await, Err(Undelivered::Cancelled));
    assert_eq!(transport.calls("A"), 0);
    assert_eq!(recorder.count(), 0);
    assert!(coordinator.cache().is_empty());
    assert_eq!(coordinator.in_flight_len(), 0);
}

#[tokio::test]
async fn test_cancel_after_completion_is_a_no_op() {
    let transport = MockTransport::new();
    transport.respond("A", b"P");
    let coordinator = coordinator(CoordinatorConfig::default(), &transport);
    let recorder = Recorder::new();

    let request = coordinator.request("A", recorder.requester());
    settle(request.chain().expect("expected a new chain").finished()).await;

    assert!(!coordinator.cancel(&"A".into()));
    assert_eq!(recorder.count(), 1);
    assert!(coordinator.lookup(&"A".into()).is_some());
}

#[tokio::test]
async fn test_cancel_all_clears_every_chain() {
    let transport = MockTransport::new();
    let gates: Vec<_> = ["A", "B", "C", "D"]
        .into_iter()
        .map(|key| transport.respond_when_opened(key, b"P"))
        .collect();
    let coordinator = coordinator(CoordinatorConfig::default(), &transport);
    let recorder = Recorder::new();

    let chains: Vec<_> = ["A", "B", "C", "D"]
        .into_iter()
        .filter_map(|key| coordinator.request(key, recorder.requester()).chain().cloned())
        .collect();
    assert_eq!(coordinator.in_flight_len(), 4);

    assert_eq!(coordinator.cancel_all(), 4);
    for chain in &chains {
        assert_eq!(settle(chain.outcome()).await, Err(Undelivered::Cancelled));
    }

    assert_eq!(coordinator.in_flight_len(), 0);
    assert_eq!(recorder.count(), 0);
    assert!(coordinator.cache().is_empty());
    drop(gates);
}

#[tokio::test]
async fn test_cancelled_key_can_be_requested_again() {
    let transport = MockTransport::new();
    let _gate = transport.respond_when_opened("A", b"P");
    let coordinator = coordinator(CoordinatorConfig::default(), &transport);
    let recorder = Recorder::new();

    let first = coordinator.request("A", recorder.requester());
    coordinator.cancel(&"A".into());
    settle(first.chain().expect("expected a new chain").finished()).await;

    transport.respond("A", b"fresh");
    let second = coordinator.request("A", recorder.requester());
    assert_eq!(
        settle(second.chain().expect("expected a new chain").outcome()).await,
        Ok(())
    );
    assert_eq!(recorder.payloads(), vec![bytes::Bytes::from_static(b"fresh")]);
}

#[tokio::test]
async fn test_cancelled_fetch_task_releases_dependents() {
    let transport = MockTransport::new();
    let _gate = transport.respond_when_opened("A", b"P");
    let scheduler = Scheduler::new(|fut| {
        tokio::spawn(fut);
    });

    let fetch_task = FetchTask::new("A", std::sync::Arc::new(transport.clone()));
    let result = fetch_task.result();
    let mut batch = scheduler.batch();
    let fetch = batch.add_task(fetch_task).handle();
    let after = batch
        .add_task(task_fn(|_: TaskHandle| async {}))
        .depends_on(&fetch)
        .on(ExecContext::Apply)
        .handle();
    batch.submit();

    eventually(|| fetch.state() == TaskState::Executing).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(after.state(), TaskState::Ready);

    fetch.cancel();
    settle(after.finished()).await;
    assert!(fetch.is_finished());
    assert!(!result.is_set());
}
