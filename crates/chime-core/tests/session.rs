//! End-to-end dispatcher behaviour over the in-memory transport.

use chime_core::{
    ConnectionId, ConnectionRegistry, Credential, Dispatcher, DispatcherConfig, LogSink,
    WebhookEvent, WebhookNotifier,
};
use async_trait::async_trait;
use chime_transport::memory::{self, MemoryClient};
use chime_transport::{FrameWriter, TransportError};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;

#[derive(Default)]
struct RecordingNotifier {
    events: Mutex<Vec<WebhookEvent>>,
}

impl RecordingNotifier {
    fn events(&self) -> Vec<WebhookEvent> {
        self.events.lock().clone()
    }

    fn count(&self, event: &str) -> usize {
        self.events.lock().iter().filter(|e| e.event == event).count()
    }
}

impl WebhookNotifier for RecordingNotifier {
    fn notify(&self, event: WebhookEvent) {
        self.events.lock().push(event);
    }
}

#[derive(Default)]
struct RecordingLog {
    records: Mutex<Vec<(String, String, String, ConnectionId)>>,
}

impl LogSink for RecordingLog {
    fn record(&self, app_id: &str, channel: &str, event: &str, connection: ConnectionId) {
        self.records.lock().push((
            app_id.to_string(),
            channel.to_string(),
            event.to_string(),
            connection,
        ));
    }
}

/// A writer whose peer never reads: every send waits forever.
struct StuckWriter;

#[async_trait]
impl FrameWriter for StuckWriter {
    async fn send(&mut self, _text: Arc<str>) -> Result<(), TransportError> {
        std::future::pending().await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

struct Harness {
    dispatcher: Arc<Dispatcher>,
    notifier: Arc<RecordingNotifier>,
    log: Arc<RecordingLog>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(DispatcherConfig::default())
    }

    fn with_config(config: DispatcherConfig) -> Self {
        let notifier = Arc::new(RecordingNotifier::default());
        let log = Arc::new(RecordingLog::default());
        let dispatcher = Arc::new(Dispatcher::with_config(
            Arc::new(ConnectionRegistry::new()),
            notifier.clone(),
            log.clone(),
            config,
        ));
        Self {
            dispatcher,
            notifier,
            log,
        }
    }

    fn registry(&self) -> &ConnectionRegistry {
        self.dispatcher.registry()
    }

    /// Connect a client and wait for the greeting.
    async fn connect(&self) -> (MemoryClient, JoinHandle<ConnectionId>) {
        let (mut client, reader, writer) = memory::pair();
        let dispatcher = Arc::clone(&self.dispatcher);
        let task = tokio::spawn(async move {
            dispatcher
                .on_upgrade_success(Credential::new("app-1", "key-1", "secret"), reader, writer)
                .await
        });
        let greeting = next_frame(&mut client).await;
        assert_eq!(greeting["event"], "pusher:connection_established");
        (client, task)
    }
}

async fn next_frame(client: &mut MemoryClient) -> Value {
    let text = timeout(Duration::from_secs(5), client.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("connection closed");
    serde_json::from_str(&text).unwrap()
}

/// Send a frame and wait until the server has processed it, using a ping as
/// a barrier.
async fn send_and_sync(client: &mut MemoryClient, frame: Value) -> Vec<Value> {
    client.send_text(frame.to_string()).unwrap();
    client
        .send_text(json!({"event": "pusher:ping", "data": {}}).to_string())
        .unwrap();
    let mut seen = Vec::new();
    loop {
        let frame = next_frame(client).await;
        if frame["event"] == "pusher:pong" {
            return seen;
        }
        seen.push(frame);
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn test_occupancy_webhooks_and_broadcast_end_to_end() {
    let harness = Harness::new();

    let (mut c1, c1_task) = harness.connect().await;
    let replies = send_and_sync(&mut c1, json!({"event": "subscribe", "channel": "room1"})).await;
    assert_eq!(
        replies,
        vec![json!({
            "event": "pusher_internal:subscription_succeeded",
            "data": {"channel": "room1"}
        })]
    );
    assert_eq!(harness.registry().occupancy("room1"), 1);
    assert_eq!(harness.notifier.count("channel_occupied"), 1);

    let (mut c2, _c2_task) = harness.connect().await;
    send_and_sync(&mut c2, json!({"event": "subscribe", "channel": "room1"})).await;
    assert_eq!(harness.registry().occupancy("room1"), 2);
    assert_eq!(harness.notifier.count("channel_occupied"), 1);

    c1.close();
    c1_task.await.unwrap();
    assert_eq!(harness.registry().occupancy("room1"), 1);
    assert_eq!(harness.notifier.count("channel_vacated"), 0);

    let seen = send_and_sync(
        &mut c2,
        json!({"event": "client_event", "channel": "room1", "data": {"x": 1}}),
    )
    .await;
    assert_eq!(seen, vec![json!({"event": "client_event", "data": {"x": 1}})]);
    assert_eq!(harness.notifier.count("client_event"), 1);

    let occupied = &harness.notifier.events()[0];
    assert_eq!(occupied.app_id, "app-1");
    assert_eq!(occupied.channel, "room1");
    assert_eq!(occupied.data, None);

    let client_event = harness
        .notifier
        .events()
        .into_iter()
        .find(|e| e.event == "client_event")
        .unwrap();
    assert_eq!(client_event.data, Some(json!({"x": 1})));
}

#[tokio::test]
async fn test_unsubscribe_last_subscriber_vacates() {
    let harness = Harness::new();
    let (mut client, _task) = harness.connect().await;

    let subscribe = json!({"event": "pusher:subscribe", "data": {"channel": "a"}});
    let unsubscribe = json!({"event": "pusher:unsubscribe", "data": {"channel": "a"}});
    send_and_sync(&mut client, subscribe).await;
    send_and_sync(&mut client, unsubscribe).await;
    assert_eq!(harness.registry().occupancy("a"), 0);
    assert_eq!(harness.notifier.count("channel_vacated"), 1);

    // Unsubscribing again changes nothing.
    send_and_sync(&mut client, json!({"event": "unsubscribe", "channel": "a"})).await;
    assert_eq!(harness.notifier.count("channel_vacated"), 1);
}

#[tokio::test]
async fn test_malformed_frames_do_not_close_connection() {
    let harness = Harness::new();
    let (mut client, _task) = harness.connect().await;

    client.send_text("{not json").unwrap();
    client.send_text(r#"{"event":"subscribe"}"#).unwrap();
    client.send_text(r#"{"event":"client_event","channel":"x","data":[1]}"#).unwrap();
    client.send_text(r#"{"event":"pusher:signin","data":{}}"#).unwrap();

    let replies = send_and_sync(&mut client, json!({"event": "subscribe", "channel": "x"})).await;
    assert_eq!(replies.len(), 1);
    assert_eq!(harness.registry().occupancy("x"), 1);
    assert!(harness.notifier.count("client_event") == 0);
}

#[tokio::test]
async fn test_member_events_pass_through() {
    let harness = Harness::new();
    let (mut client, _task) = harness.connect().await;

    let replies = send_and_sync(
        &mut client,
        json!({"event": "member_added", "channel": "presence-1", "data": {"user_id": "u1"}}),
    )
    .await;
    assert!(replies.is_empty());
    send_and_sync(
        &mut client,
        json!({"event": "member_removed", "channel": "presence-1", "data": {"user_id": "u1"}}),
    )
    .await;

    assert_eq!(harness.notifier.count("member_added"), 1);
    assert_eq!(harness.notifier.count("member_removed"), 1);
    assert_eq!(harness.registry().occupancy("presence-1"), 0);
}

#[tokio::test]
async fn test_invalid_channel_reports_error_and_stays_open() {
    let harness = Harness::new();
    let (mut client, _task) = harness.connect().await;

    let replies =
        send_and_sync(&mut client, json!({"event": "subscribe", "channel": "bad name"})).await;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0]["event"], "pusher:error");
    assert_eq!(replies[0]["data"]["code"], 4300);
    assert_eq!(harness.registry().stats().channel_count, 0);
}

#[tokio::test]
async fn test_disconnect_of_last_subscriber_vacates_and_purges() {
    let harness = Harness::new();
    let (mut client, task) = harness.connect().await;

    send_and_sync(&mut client, json!({"event": "subscribe", "channel": "x"})).await;
    send_and_sync(&mut client, json!({"event": "subscribe", "channel": "y"})).await;

    client.abort();
    let id = task.await.unwrap();

    assert!(!harness.registry().is_registered(id));
    assert_eq!(harness.registry().occupancy("x"), 0);
    assert_eq!(harness.registry().occupancy("y"), 0);
    assert_eq!(harness.notifier.count("channel_vacated"), 2);

    let events: Vec<String> = harness.log.records.lock().iter().map(|r| r.2.clone()).collect();
    assert_eq!(events.first().map(String::as_str), Some("connection"));
    assert_eq!(events.last().map(String::as_str), Some("disconnection"));

    // The writer closed the stream after the purge.
    assert!(timeout(Duration::from_secs(5), client.recv()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_broadcast_write_failure_disconnects_only_that_peer() {
    let harness = Harness::with_config(DispatcherConfig {
        outbound_buffer: 4,
        ..DispatcherConfig::default()
    });
    let (mut sender, _sender_task) = harness.connect().await;
    let (mut gone, gone_task) = harness.connect().await;

    send_and_sync(&mut sender, json!({"event": "subscribe", "channel": "x"})).await;
    send_and_sync(&mut gone, json!({"event": "subscribe", "channel": "x"})).await;
    gone.stop_reading();

    let seen = send_and_sync(
        &mut sender,
        json!({"event": "client-typing", "channel": "x", "data": {"on": true}}),
    )
    .await;
    assert_eq!(seen, vec![json!({"event": "client-typing", "data": {"on": true}})]);

    timeout(Duration::from_secs(5), gone_task).await.unwrap().unwrap();
    wait_until(|| harness.registry().occupancy("x") == 1).await;

    // The sender is unaffected.
    let seen = send_and_sync(
        &mut sender,
        json!({"event": "client_event", "channel": "x", "data": {"n": 2}}),
    )
    .await;
    assert_eq!(seen.len(), 1);
}

#[tokio::test]
async fn test_terminate_hook_is_idempotent() {
    let harness = Harness::new();
    let (mut client, task) = harness.connect().await;
    send_and_sync(&mut client, json!({"event": "subscribe", "channel": "x"})).await;
    client.close();
    let id = task.await.unwrap();

    let credential = Credential::new("app-1", "key-1", "secret");
    harness.dispatcher.on_stream_terminated(&credential, id);
    assert_eq!(harness.notifier.count("channel_vacated"), 1);
}

#[tokio::test]
async fn test_slow_consumer_close_does_not_wait_for_writer() {
    let harness = Harness::with_config(DispatcherConfig {
        outbound_buffer: 1,
        ..DispatcherConfig::default()
    });
    let (client, reader, _writer) = memory::pair();
    let dispatcher = Arc::clone(&harness.dispatcher);
    let task = tokio::spawn(async move {
        dispatcher
            .on_upgrade_success(Credential::new("app-1", "key-1", "secret"), reader, StuckWriter)
            .await
    });

    for _ in 0..4 {
        client
            .send_text(json!({"event": "pusher:ping", "data": {}}).to_string())
            .unwrap();
    }

    let id = timeout(Duration::from_secs(3), task)
        .await
        .expect("connection task did not finish")
        .unwrap();
    assert!(!harness.registry().is_registered(id));
    drop(client);
}

#[tokio::test(start_paused = true)]
async fn test_client_close_bounds_writer_drain() {
    let harness = Harness::new();
    let (mut client, reader, _writer) = memory::pair();
    let dispatcher = Arc::clone(&harness.dispatcher);
    let task = tokio::spawn(async move {
        dispatcher
            .on_upgrade_success(Credential::new("app-1", "key-1", "secret"), reader, StuckWriter)
            .await
    });

    client.close();
    let id = task.await.unwrap();
    assert!(!harness.registry().is_registered(id));
    assert_eq!(harness.registry().stats().connection_count, 0);
}
