use std::sync::Arc;
use std::time::Duration;

use crate::core::broadcaster::DEFAULT_LOG_CAPACITY;
use crate::core::client::fake::FakeClient;
use crate::core::config::PollConfig;
use crate::core::connection::{ConnectionEvent, ConnectionState};
use crate::core::dispatcher::PollDispatcher;
use crate::core::poll::DispatchStatus;
use crate::core::scheduler::TriggerSpec;
use crate::core::status::{BotStatus, StatusUpdate};

const GROUP: &str = "1203630@g.us";

fn setup() -> (Arc<BotStatus>, Arc<FakeClient>, Arc<PollDispatcher>) {
    let status = Arc::new(BotStatus::new(DEFAULT_LOG_CAPACITY));
    let (client, _events) = FakeClient::new();
    let dispatcher = Arc::new(PollDispatcher::new(
        client.clone(),
        status.clone(),
        GROUP,
        PollConfig::default(),
    ));
    (status, client, dispatcher)
}

fn make_ready(status: &BotStatus) {
    for event in [
        ConnectionEvent::Start,
        ConnectionEvent::Authenticated,
        ConnectionEvent::Ready,
    ] {
        status.apply(StatusUpdate::Connection(event));
    }
}

#[tokio::test]
async fn not_ready_never_reaches_the_client() {
    let (status, client, dispatcher) = setup();
    status.apply(StatusUpdate::Connection(ConnectionEvent::Start));

    let scheduled = dispatcher.send_scheduled().await;
    let test = dispatcher.send_test().await;

    assert_eq!(
        scheduled.status,
        DispatchStatus::NotReady {
            state: "loading".to_string()
        }
    );
    assert!(!scheduled.success());
    assert!(matches!(test.status, DispatchStatus::NotReady { .. }));
    assert!(client.sent().is_empty());
    assert!(status.snapshot().last_poll_sent_at.is_none());
}

#[tokio::test]
async fn scheduled_send_updates_last_and_next() {
    let (status, client, dispatcher) = setup();
    make_ready(&status);
    let trigger = TriggerSpec::daily(10, 0, "Asia/Kolkata").unwrap();
    let registered_next = trigger.next_after(chrono::Utc::now());
    status.apply(StatusUpdate::ScheduleRegistered {
        trigger,
        next_poll_at: registered_next,
    });

    let outcome = dispatcher.send_scheduled().await;

    assert!(outcome.success());
    assert!(!outcome.is_test);
    assert_eq!(outcome.poll_name, "Are you coming today?");
    let sent = client.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, GROUP);
    assert_eq!(sent[0].1.options, ["Yes".to_string(), "No".to_string()]);
    assert!(!sent[0].1.allow_multiple_answers);

    let snap = status.snapshot();
    assert_eq!(snap.last_poll_sent_at, outcome.sent_at());
    let next = snap.next_poll_at.unwrap();
    assert!(next > snap.last_poll_sent_at.unwrap());
}

#[tokio::test]
async fn test_send_leaves_schedule_fields_alone() {
    let (status, client, dispatcher) = setup();
    make_ready(&status);
    let before = status.snapshot();

    let outcome = dispatcher.send_test().await;

    assert!(outcome.success());
    assert!(outcome.is_test);
    assert_eq!(outcome.poll_name, "[TEST] Are you coming today?");
    assert!(client.sent()[0].1.is_test);
    let after = status.snapshot();
    assert_eq!(after.last_poll_sent_at, before.last_poll_sent_at);
    assert_eq!(after.next_poll_at, before.next_poll_at);
}

#[tokio::test]
async fn failure_records_error_without_changing_state() {
    let (status, client, dispatcher) = setup();
    make_ready(&status);
    client.fail_sends("chat not found");

    let outcome = dispatcher.send_scheduled().await;

    assert!(matches!(outcome.status, DispatchStatus::Failed { .. }));
    assert!(outcome.error().unwrap().contains("chat not found"));
    let snap = status.snapshot();
    assert_eq!(snap.state, ConnectionState::Ready);
    assert!(snap.last_error.unwrap().contains("chat not found"));
    assert!(snap.last_poll_sent_at.is_none());
}

#[tokio::test]
async fn malformed_poll_fails_before_sending() {
    let (status, client, dispatcher) = setup();
    make_ready(&status);

    let outcome = dispatcher
        .send("Lunch?", &["Only one".to_string()], false, false)
        .await;

    assert!(matches!(outcome.status, DispatchStatus::Failed { .. }));
    assert!(client.sent().is_empty());
    assert!(status.snapshot().last_error.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn overlapping_sends_are_rejected_as_busy() {
    let (status, client, dispatcher) = setup();
    make_ready(&status);
    client.delay_sends(Duration::from_millis(300));

    let first = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.send_scheduled().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = dispatcher.send_test().await;
    let first = first.await.unwrap();

    assert_eq!(second.status, DispatchStatus::Busy);
    assert!(first.success());
    assert_eq!(client.sent().len(), 1);

    // The slot frees up once the first send finishes.
    let third = dispatcher.send_test().await;
    assert!(third.success());
}

#[tokio::test]
async fn groups_require_ready_client() {
    let (status, _client, dispatcher) = setup();
    assert!(dispatcher.list_groups().await.is_err());

    make_ready(&status);
    assert!(dispatcher.list_groups().await.unwrap().is_empty());
}
