//! Offline queue behavior through the full courier: queueing while offline,
//! replay on reconnect, persistence and permanent drops.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::timeout;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::fixtures::{
    SHARED_CHAT_PATH, build_courier, courier_with_kv, mount_health, mount_shared_chat, test_settings,
};
use courier::core::queue::DrainSummary;
use courier::core::service::{CourierEvent, CourierSettings, QueueReason, SendReport};
use courier::storage::kv::{KvStore, SqliteKvStore};
use courier::{TestDir, make_test_request};

fn offline(settings: CourierSettings) -> CourierSettings {
    CourierSettings {
        online: false,
        ..settings
    }
}

async fn next_drain(events: &mut broadcast::Receiver<CourierEvent>) -> DrainSummary {
    timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(CourierEvent::Drained(summary)) = events.recv().await {
                return summary;
            }
        }
    })
    .await
    .expect("drain event within timeout")
}

#[tokio::test]
async fn offline_send_is_queued_without_any_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let courier = build_courier(&offline(test_settings(&server.uri())));
    let report = courier.send("c1", make_test_request("hi")).await.unwrap();
    let SendReport::Queued { entry, reason } = report else {
        panic!("expected queued");
    };
    assert_eq!(reason, QueueReason::Offline);
    assert_eq!(entry.retry_count, 0);
    assert_eq!(entry.max_retries, 3);
    assert_eq!(courier.queue().len(), 1);
    assert!(!courier.status(&Default::default()).await.online);
}

#[tokio::test]
async fn reconnect_drains_queue_once_in_order() {
    let server = MockServer::start().await;
    mount_health(&server, 200).await;
    Mock::given(method("POST"))
        .and(path(SHARED_CHAT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(2)
        .mount(&server)
        .await;

    let courier = build_courier(&offline(test_settings(&server.uri())));
    courier.send("c1", make_test_request("first")).await.unwrap();
    courier.send("c1", make_test_request("second")).await.unwrap();
    assert_eq!(courier.queue().len(), 2);

    let mut events = courier.subscribe();
    let listener = courier.spawn_network_listener();

    assert!(courier.set_online(true));
    let summary = next_drain(&mut events).await;
    assert_eq!(summary.sent, 2);
    assert_eq!(summary.failed, 0);
    assert!(courier.queue().is_empty());

    // Same state again is not a transition; nothing replays.
    assert!(!courier.set_online(true));
    listener.stop().await;

    let requests = server.received_requests().await.unwrap_or_default();
    let texts: Vec<String> = requests
        .iter()
        .filter(|r| r.url.path() == SHARED_CHAT_PATH)
        .map(|r| {
            let body: serde_json::Value = serde_json::from_slice(&r.body).unwrap();
            body["messages"][0]["content"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(texts, ["first", "second"]);
}

#[tokio::test]
async fn queue_survives_a_restart() {
    let server = MockServer::start().await;
    mount_health(&server, 200).await;
    mount_shared_chat(&server, 200, "ok").await;
    let dir = TestDir::new();
    let db = dir.file_path("courier.db");

    {
        let kv: Arc<dyn KvStore> = Arc::new(SqliteKvStore::open(&db).unwrap());
        let first = courier_with_kv(kv, &offline(test_settings(&server.uri())));
        first.send("c1", make_test_request("persist me")).await.unwrap();
        assert_eq!(first.queue().len(), 1);
    }

    let kv: Arc<dyn KvStore> = Arc::new(SqliteKvStore::open(&db).unwrap());
    let second = courier_with_kv(kv, &test_settings(&server.uri()));
    let entries = second.queue().list();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].chat_id, "c1");
    assert_eq!(entries[0].message.messages[0].content, "persist me");

    let report = second.drain().await;
    assert_eq!(report.sent, 1);
    assert!(second.queue().is_empty());
}

#[tokio::test]
async fn message_is_dropped_after_three_failed_drains() {
    let server = MockServer::start().await;
    mount_health(&server, 200).await;
    mount_shared_chat(&server, 503, "down").await;

    let courier = build_courier(&test_settings(&server.uri()));
    let mut events = courier.subscribe();

    let report = courier.send("c1", make_test_request("hi")).await.unwrap();
    assert!(matches!(report, SendReport::Queued { .. }));

    for expected_retries in 1..=2 {
        let report = courier.drain().await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.retried, 1);
        assert_eq!(courier.queue().list()[0].retry_count, expected_retries);
    }

    let report = courier.drain().await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.permanent_failures.len(), 1);
    assert_eq!(report.permanent_failures[0].attempts, 3);
    assert!(courier.queue().is_empty());

    let mut saw_permanent = false;
    while let Ok(event) = events.try_recv() {
        if let CourierEvent::PermanentFailure(failure) = event {
            assert_eq!(failure.chat_id, "c1");
            saw_permanent = true;
        }
    }
    assert!(saw_permanent, "expected a permanent failure event");
}

#[tokio::test]
async fn going_offline_mid_session_queues_new_sends() {
    let server = MockServer::start().await;
    mount_health(&server, 200).await;
    mount_shared_chat(&server, 200, "ok").await;

    let courier = build_courier(&test_settings(&server.uri()));
    let listener = courier.spawn_network_listener();
    assert!(matches!(
        courier.send("c1", make_test_request("online")).await.unwrap(),
        SendReport::Delivered(_)
    ));

    courier.set_online(false);
    assert!(matches!(
        courier.send("c1", make_test_request("offline")).await.unwrap(),
        SendReport::Queued {
            reason: QueueReason::Offline,
            ..
        }
    ));
    listener.stop().await;
}
