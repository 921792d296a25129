//! Handshake and relay tests against a running server.

use async_trait::async_trait;
use chime_core::{
    ConnectionRegistry, Credential, CredentialCache, CredentialStore, Dispatcher, MemoryCache,
    StoreError, TracingLogSink,
};
use chime_server::config::{Config, WebhookConfig};
use chime_server::storage::SqliteStore;
use chime_server::webhook::WebhookDispatcher;
use chime_server::{build_router, AppState};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct DownStore;

#[async_trait]
impl CredentialStore for DownStore {
    async fn find_credential(&self, _app_key: &str) -> Result<Option<Credential>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
}

async fn serve(store: Arc<dyn CredentialStore>) -> SocketAddr {
    let webhooks = WebhookDispatcher::spawn(Vec::new(), &WebhookConfig::default()).unwrap();
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(ConnectionRegistry::new()),
        Arc::new(webhooks),
        Arc::new(TracingLogSink),
    ));
    let resolver = Arc::new(CredentialCache::new(store, Arc::new(MemoryCache::new())));
    let state = Arc::new(AppState::new(dispatcher, resolver, Config::default()));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, build_router(state)).await.unwrap();
    });
    addr
}

async fn serve_with_app() -> SocketAddr {
    let store = SqliteStore::open_in_memory().unwrap();
    store.migrate().unwrap();
    store
        .insert_app(&Credential::new("app-1", "key-1", "secret"))
        .unwrap();
    serve(Arc::new(store)).await
}

async fn next_json(client: &mut Client) -> Value {
    loop {
        let message = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn send_json(client: &mut Client, frame: Value) {
    client.send(Message::Text(frame.to_string())).await.unwrap();
}

async fn connect(addr: SocketAddr) -> Client {
    let (mut client, _) = connect_async(format!("ws://{addr}/app/key-1")).await.unwrap();
    let greeting = next_json(&mut client).await;
    assert_eq!(greeting["event"], "pusher:connection_established");
    assert_eq!(greeting["data"]["activity_timeout"], 120);
    client
}

async fn subscribe(client: &mut Client, channel: &str) {
    send_json(client, json!({"event": "pusher:subscribe", "data": {"channel": channel}})).await;
    let reply = next_json(client).await;
    assert_eq!(reply["event"], "pusher_internal:subscription_succeeded");
    assert_eq!(reply["data"]["channel"], channel);
}

type ConnectResult =
    Result<(Client, tungstenite::handshake::client::Response), tungstenite::Error>;

fn rejected_status(result: ConnectResult) -> u16 {
    match result {
        Err(tungstenite::Error::Http(response)) => response.status().as_u16(),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("upgrade should have been refused"),
    }
}

#[tokio::test]
async fn test_unknown_key_is_unauthorized() {
    let addr = serve_with_app().await;
    let result = connect_async(format!("ws://{addr}/app/nope")).await;
    assert_eq!(rejected_status(result), 401);
}

#[tokio::test]
async fn test_store_outage_is_service_unavailable() {
    let addr = serve(Arc::new(DownStore)).await;
    let result = connect_async(format!("ws://{addr}/app/key-1")).await;
    assert_eq!(rejected_status(result), 503);
}

#[tokio::test]
async fn test_client_event_reaches_all_subscribers() {
    let addr = serve_with_app().await;
    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;
    subscribe(&mut alice, "room1").await;
    subscribe(&mut bob, "room1").await;

    send_json(
        &mut bob,
        json!({"event": "client_event", "channel": "room1", "data": {"x": 1}}),
    )
    .await;

    let expected = json!({"event": "client_event", "data": {"x": 1}});
    assert_eq!(next_json(&mut alice).await, expected);
    assert_eq!(next_json(&mut bob).await, expected);
}

#[tokio::test]
async fn test_ping_and_invalid_channel() {
    let addr = serve_with_app().await;
    let mut client = connect(addr).await;

    send_json(&mut client, json!({"event": "subscribe", "channel": "no spaces"})).await;
    let reply = next_json(&mut client).await;
    assert_eq!(reply["event"], "pusher:error");
    assert_eq!(reply["data"]["code"], 4300);

    client.send(Message::Text("garbage".into())).await.unwrap();
    send_json(&mut client, json!({"event": "pusher:ping", "data": {}})).await;
    assert_eq!(
        next_json(&mut client).await,
        json!({"event": "pusher:pong", "data": {}})
    );
}

#[tokio::test]
async fn test_health_reports_counts() {
    let addr = serve_with_app().await;
    let mut client = connect(addr).await;
    subscribe(&mut client, "room1").await;

    let health: Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["connections"], 1);
    assert_eq!(health["channels"], 1);
}
