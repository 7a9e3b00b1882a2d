mod common;

use common::*;
use event_schema::{ClientMessage, ReadTargets, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use notification_realtime_service::config::Config;
use std::time::Duration;
use tokio_tungstenite::tungstenite::{protocol::frame::coding::CloseCode, Message};

async fn send(ws: &mut Client, message: &ClientMessage) {
    ws.send(Message::Text(message.to_json().unwrap().into()))
        .await
        .unwrap();
}

#[tokio::test]
async fn bus_event_reaches_every_tab_of_recipient_only() {
    let server = start_server().await;
    let mut tab1 = connect(&server, "A").await;
    let mut tab2 = connect(&server, "A").await;
    let mut other = connect(&server, "B").await;

    let report = server
        .bridge
        .dispatch(r#"{"userId":"A","type":"like","id":"n-1","actor":"carol"}"#)
        .await
        .unwrap();
    assert_eq!(report.delivered, 2);

    for ws in [&mut tab1, &mut tab2] {
        match next_frame(ws).await {
            ServerMessage::Notification { data } => {
                assert_eq!(data.kind, "like");
                assert_eq!(data.id.as_deref(), Some("n-1"));
                assert_eq!(data.payload["actor"], "carol");
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    assert!(try_next_frame(&mut other, Duration::from_millis(300)).await.is_none());
}

#[tokio::test]
async fn malformed_bus_message_does_not_block_later_delivery() {
    let server = start_server().await;
    let mut ws = connect(&server, "A").await;

    server.bridge.handle_payload("{not json").await;
    server.bridge.handle_payload(r#"{"type":"like"}"#).await;
    server
        .bridge
        .handle_payload(r#"{"userId":"A","type":"follow","id":"n-2"}"#)
        .await;

    assert_eq!(next_frame(&mut ws).await.kind(), "notification");
}

#[tokio::test]
async fn event_for_offline_user_is_dropped() {
    let server = start_server().await;
    let report = server
        .bridge
        .dispatch(r#"{"userId":"nobody","type":"like"}"#)
        .await
        .unwrap();
    assert!(report.is_empty());
}

#[tokio::test]
async fn application_ping_gets_pong() {
    let server = start_server().await;
    let mut ws = connect(&server, "A").await;

    send(&mut ws, &ClientMessage::Ping).await;
    assert!(matches!(next_frame(&mut ws).await, ServerMessage::Pong { .. }));
}

#[tokio::test]
async fn malformed_client_frame_keeps_connection_open() {
    let server = start_server().await;
    let mut ws = connect(&server, "A").await;

    ws.send(Message::Text("definitely not json".into()))
        .await
        .unwrap();
    ws.send(Message::Text(r#"{"type":"subscribe"}"#.into()))
        .await
        .unwrap();
    send(&mut ws, &ClientMessage::Ping).await;

    assert!(matches!(next_frame(&mut ws).await, ServerMessage::Pong { .. }));
    assert_eq!(server.handle.registry().connection_count("A").await, 1);
}

#[tokio::test]
async fn mark_read_fans_out_and_records_receipt() {
    let server = start_server().await;
    let mut tab1 = connect(&server, "A").await;
    let mut tab2 = connect(&server, "A").await;

    send(&mut tab1, &ClientMessage::MarkRead { id: "n-9".into() }).await;

    let expected = ServerMessage::MarkRead {
        ids: ReadTargets::Ids(vec!["n-9".into()]),
    };
    assert_eq!(next_frame(&mut tab1).await, expected);
    assert_eq!(next_frame(&mut tab2).await, expected);

    let receipts = server.receipts.clone();
    assert!(
        eventually(|| {
            let receipts = receipts.clone();
            async move {
                receipts.calls.lock().unwrap().as_slice() == [("A".to_string(), "n-9".to_string())]
            }
        })
        .await
    );
}

#[tokio::test]
async fn delete_fans_out_to_every_tab() {
    let server = start_server().await;
    let mut tab1 = connect(&server, "A").await;
    let mut tab2 = connect(&server, "A").await;

    send(&mut tab2, &ClientMessage::Delete { id: "n-3".into() }).await;

    let expected = ServerMessage::Delete { id: "n-3".into() };
    assert_eq!(next_frame(&mut tab1).await, expected);
    assert_eq!(next_frame(&mut tab2).await, expected);
}

#[tokio::test]
async fn abrupt_disconnect_unregisters_connection() {
    let server = start_server().await;
    let ws = connect(&server, "A").await;
    assert_eq!(server.handle.registry().connection_count("A").await, 1);

    drop(ws);

    let registry = server.handle.registry().clone();
    assert!(
        eventually(|| {
            let registry = registry.clone();
            async move { registry.connected_users_count().await == 0 }
        })
        .await
    );

    let report = server
        .bridge
        .dispatch(r#"{"userId":"A","type":"like"}"#)
        .await
        .unwrap();
    assert_eq!(report.delivered, 0);
}

#[tokio::test]
async fn close_frame_unregisters_connection() {
    let server = start_server().await;
    let mut ws = connect(&server, "A").await;

    ws.close(None).await.unwrap();

    let registry = server.handle.registry().clone();
    assert!(
        eventually(|| {
            let registry = registry.clone();
            async move { registry.total_connections().await == 0 }
        })
        .await
    );
}

#[tokio::test]
async fn silent_peer_is_dropped_after_missed_pings() {
    let mut config = Config::test_defaults();
    config.websocket.ping_interval_secs = 1;
    config.websocket.max_missed_pongs = 1;
    let server = start_server_with(config).await;

    // Never polled again, so the client never answers pings
    let _ws = connect(&server, "A").await;
    assert_eq!(server.handle.registry().connection_count("A").await, 1);

    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(server.handle.registry().connection_count("A").await, 0);
}

#[tokio::test]
async fn connection_limit_closes_with_policy_code() {
    let mut config = Config::test_defaults();
    config.websocket.max_connections_per_user = Some(1);
    let server = start_server_with(config).await;

    let _first = connect(&server, "A").await;

    let token = mint_token("A", 60);
    let (mut second, _) = tokio_tungstenite::connect_async(server.ws_url(Some(&token)))
        .await
        .unwrap();

    match second.next().await {
        Some(Ok(Message::Close(Some(frame)))) => assert_eq!(frame.code, CloseCode::Policy),
        other => panic!("expected policy close, got {other:?}"),
    }
    assert_eq!(server.handle.registry().connection_count("A").await, 1);
}

#[tokio::test]
async fn shutdown_terminates_live_connections() {
    let server = start_server().await;
    let mut ws = connect(&server, "A").await;
    let registry = server.handle.registry().clone();

    server.handle.shutdown().await.unwrap();

    assert!(try_next_frame(&mut ws, Duration::from_secs(2)).await.is_none());
    assert!(
        eventually(|| {
            let registry = registry.clone();
            async move { registry.total_connections().await == 0 }
        })
        .await
    );
}
