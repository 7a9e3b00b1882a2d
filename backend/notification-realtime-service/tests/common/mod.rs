#![allow(dead_code)]

use async_trait::async_trait;
use event_schema::{ServerMessage, NOTIFICATION_CHANNEL};
use futures_util::StreamExt;
use jsonwebtoken::{encode, EncodingKey, Header};
use notification_realtime_service::{
    auth::{WsClaims, WS_TOKEN_TYPE},
    bus::EventBusBridge,
    config::Config,
    error::BusError,
    services::ReadReceiptSink,
    state::AppState,
    ServerHandle,
};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const SECRET: &str = "test-secret";

/// Receipts captured instead of published
#[derive(Default)]
pub struct RecordingReceipts {
    pub calls: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl ReadReceiptSink for RecordingReceipts {
    async fn mark_read(&self, user_id: &str, notification_id: &str) -> Result<(), BusError> {
        self.calls
            .lock()
            .unwrap()
            .push((user_id.to_string(), notification_id.to_string()));
        Ok(())
    }
}

pub struct TestServer {
    pub handle: ServerHandle,
    /// Bridge over the server's registry, driven directly instead of through Redis
    pub bridge: EventBusBridge,
    pub receipts: Arc<RecordingReceipts>,
}

impl TestServer {
    pub fn ws_url(&self, token: Option<&str>) -> String {
        let addr = self.handle.local_addr();
        match token {
            Some(token) => format!("ws://{addr}/ws/notifications?token={token}"),
            None => format!("ws://{addr}/ws/notifications"),
        }
    }
}

pub async fn start_server() -> TestServer {
    start_server_with(Config::test_defaults()).await
}

pub async fn start_server_with(config: Config) -> TestServer {
    let receipts = Arc::new(RecordingReceipts::default());
    let state = AppState::new(config, receipts.clone());
    let bridge = EventBusBridge::new(state.registry.clone(), NOTIFICATION_CHANNEL);

    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let handle = ServerHandle::serve(listener, state).unwrap();

    TestServer {
        handle,
        bridge,
        receipts,
    }
}

pub fn mint_token(sub: &str, exp_offset_secs: i64) -> String {
    mint_token_with(sub, exp_offset_secs, WS_TOKEN_TYPE, SECRET)
}

pub fn mint_token_with(sub: &str, exp_offset_secs: i64, token_type: &str, secret: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = WsClaims {
        sub: sub.to_string(),
        exp: now + exp_offset_secs,
        iat: now,
        token_type: token_type.to_string(),
        iss: None,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

pub async fn connect(server: &TestServer, user: &str) -> Client {
    let token = mint_token(user, 60);
    let (mut ws, _) = tokio_tungstenite::connect_async(server.ws_url(Some(&token)))
        .await
        .unwrap();

    match next_frame(&mut ws).await {
        ServerMessage::Connection { user_id, .. } => assert_eq!(user_id, user),
        other => panic!("expected connection frame, got {other:?}"),
    }
    ws
}

/// Next application frame, skipping transport-level ping/pong
pub async fn next_frame(ws: &mut Client) -> ServerMessage {
    try_next_frame(ws, Duration::from_secs(5))
        .await
        .expect("timed out waiting for a frame")
}

pub async fn try_next_frame(ws: &mut Client, wait: Duration) -> Option<ServerMessage> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let msg = tokio::time::timeout_at(deadline, ws.next()).await.ok()??;
        match msg.ok()? {
            Message::Text(text) => return Some(ServerMessage::from_json(&text).unwrap()),
            Message::Ping(_) | Message::Pong(_) => continue,
            _ => return None,
        }
    }
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
