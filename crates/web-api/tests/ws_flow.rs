//! WebSocket 端到端流程测试
//!
//! 启动真实服务，用 tokio-tungstenite 客户端走完
//! 握手 → 订阅 → 事件注入 → 投递 → 权限撤销的完整链路。

mod support;

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use serde_json::{json, Value};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use domain::{IdentityId, StoreId};
use support::{spawn_server, TestServer};

type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn next_json(ws: &mut WsClient) -> Value {
    loop {
        let message = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for message")
            .expect("stream ended")
            .expect("websocket error");
        match message {
            TungsteniteMessage::Text(text) => {
                return serde_json::from_str(text.as_str()).expect("valid JSON")
            }
            // 忽略传输层控制帧
            _ => continue,
        }
    }
}

async fn assert_silent(ws: &mut WsClient) {
    let result = timeout(Duration::from_millis(300), ws.next()).await;
    assert!(result.is_err(), "expected no message, got {result:?}");
}

async fn connect(server: &TestServer, identity_id: IdentityId, store_id: StoreId, tab: &str) -> WsClient {
    let token = server
        .jwt_service
        .generate_token(identity_id, store_id)
        .expect("token");
    let (ws, _) = connect_async(server.ws_url(&token, tab))
        .await
        .expect("websocket connect");
    ws
}

async fn subscribe(ws: &mut WsClient, body: Value) -> Value {
    ws.send(TungsteniteMessage::text(body.to_string()))
        .await
        .expect("send subscribe");
    next_json(ws).await
}

async fn ingest(client: &Client, server: &TestServer, store_id: StoreId, severity: &str) -> Value {
    client
        .post(server.http_url("/internal/events"))
        .json(&json!({
            "store_id": Uuid::from(store_id),
            "event": {
                "kind": "notification",
                "alert_id": Uuid::new_v4(),
                "store_id": Uuid::from(store_id),
                "camera_id": Uuid::new_v4(),
                "severity": severity,
                "alert_type": "theft_detected",
                "description": "suspicious concealment near exit",
                "area": "checkout",
                "assigned_to": null,
                "snapshot_ref": null,
                "payload": {}
            }
        }))
        .send()
        .await
        .expect("ingest event")
        .json::<Value>()
        .await
        .expect("ingest response")
}

#[tokio::test]
async fn alert_stream_end_to_end() {
    let server = spawn_server().await;
    sleep(Duration::from_millis(50)).await;

    let identity_id = IdentityId::new(Uuid::new_v4());
    let store_id = StoreId::new(Uuid::new_v4());
    server
        .grant(identity_id, 1, &["alerts:receive", "alerts:acknowledge"])
        .await;

    let mut ws = connect(&server, identity_id, store_id, "tab-1").await;

    // 订阅 high/critical 告警
    let confirmed = subscribe(
        &mut ws,
        json!({
            "type": "subscribe_alerts",
            "filters": { "severities": ["high", "critical"] },
            "preferences": { "max_alerts_per_minute": 10 }
        }),
    )
    .await;
    assert_eq!(confirmed["type"], "alert_subscription_confirmed");
    assert_eq!(
        confirmed["subscription"]["filters"]["severities"],
        json!(["high", "critical"])
    );

    let client = Client::new();

    // critical 告警送达并带立即处理标记
    let response = ingest(&client, &server, store_id, "critical").await;
    assert_eq!(response["sequence"], 1);

    let notification = next_json(&mut ws).await;
    assert_eq!(notification["type"], "alert_notification");
    assert_eq!(notification["sequence"], 1);
    assert_eq!(notification["alert"]["severity"], "critical");
    assert_eq!(notification["requires_immediate_attention"], true);

    // low 告警被过滤，不送达
    ingest(&client, &server, store_id, "low").await;
    assert_silent(&mut ws).await;

    // 确认操作广播给订阅者自己
    let alert_id = notification["alert"]["alert_id"].as_str().expect("alert id");
    ws.send(TungsteniteMessage::text(
        json!({
            "type": "acknowledge_alert",
            "alert_id": alert_id,
            "notes": "patrol dispatched"
        })
        .to_string(),
    ))
    .await
    .expect("send ack");

    let ack = next_json(&mut ws).await;
    assert_eq!(ack["type"], "alert_acknowledgment");
    assert_eq!(ack["alert_id"], alert_id);
    assert_eq!(ack["acknowledged_by"], Uuid::from(identity_id).to_string());
}

#[tokio::test]
async fn reconnect_replays_backlog_before_live_events() {
    let server = spawn_server().await;
    sleep(Duration::from_millis(50)).await;

    let identity_id = IdentityId::new(Uuid::new_v4());
    let store_id = StoreId::new(Uuid::new_v4());
    server.grant(identity_id, 1, &["alerts:receive"]).await;

    let mut ws = connect(&server, identity_id, store_id, "tab-1").await;
    let confirmed = subscribe(&mut ws, json!({ "type": "subscribe_alerts" })).await;
    assert_eq!(confirmed["type"], "alert_subscription_confirmed");

    let client = Client::new();

    // 在线收到第一条
    ingest(&client, &server, store_id, "high").await;
    let first = next_json(&mut ws).await;
    assert_eq!(first["sequence"], 1);

    // 掉线期间积压两条
    ws.send(TungsteniteMessage::Close(None)).await.expect("close");
    drop(ws);
    sleep(Duration::from_millis(100)).await;
    ingest(&client, &server, store_id, "high").await;
    ingest(&client, &server, store_id, "critical").await;

    // 重连：积压按序回放，且先于重连后的实时事件
    let mut ws = connect(&server, identity_id, store_id, "tab-1").await;
    ingest(&client, &server, store_id, "high").await;

    let mut sequences = Vec::new();
    for _ in 0..3 {
        let message = next_json(&mut ws).await;
        assert_eq!(message["type"], "alert_notification");
        sequences.push(message["sequence"].as_u64().expect("sequence"));
    }
    assert_eq!(sequences, vec![2, 3, 4]);
}

#[tokio::test]
async fn unknown_types_ignored_and_malformed_reported() {
    let server = spawn_server().await;
    sleep(Duration::from_millis(50)).await;

    let identity_id = IdentityId::new(Uuid::new_v4());
    let store_id = StoreId::new(Uuid::new_v4());
    server.grant(identity_id, 1, &["alerts:receive"]).await;

    let mut ws = connect(&server, identity_id, store_id, "tab-1").await;

    // 旧版演示通道的消息被静默忽略
    ws.send(TungsteniteMessage::text(
        json!({ "type": "subscribe-camera", "cameraId": Uuid::new_v4() }).to_string(),
    ))
    .await
    .expect("send legacy");
    assert_silent(&mut ws).await;

    // JSON 损坏：回送 error 控制消息，连接保持打开
    ws.send(TungsteniteMessage::text("{not json")).await.expect("send");
    let error = next_json(&mut ws).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "MALFORMED_MESSAGE");

    // 缺少必填字段同样回送 error
    ws.send(TungsteniteMessage::text(
        json!({ "type": "acknowledge_alert", "notes": "missing alert_id" }).to_string(),
    ))
    .await
    .expect("send");
    let error = next_json(&mut ws).await;
    assert_eq!(error["type"], "error");

    // 连接仍可用
    ws.send(TungsteniteMessage::text(json!({ "type": "ping" }).to_string()))
        .await
        .expect("send ping");
    let pong = next_json(&mut ws).await;
    assert_eq!(pong["type"], "pong");
}

#[tokio::test]
async fn permission_revocation_notifies_client() {
    let server = spawn_server().await;
    sleep(Duration::from_millis(50)).await;

    let identity_id = IdentityId::new(Uuid::new_v4());
    let store_id = StoreId::new(Uuid::new_v4());
    server.grant(identity_id, 1, &["alerts:receive"]).await;

    let mut ws = connect(&server, identity_id, store_id, "tab-1").await;
    let confirmed = subscribe(&mut ws, json!({ "type": "subscribe_alerts" })).await;
    assert_eq!(confirmed["type"], "alert_subscription_confirmed");

    // 授权系统推送降级快照
    let client = Client::new();
    let response = client
        .post(server.http_url("/internal/permissions"))
        .json(&json!({
            "identity_id": Uuid::from(identity_id),
            "version": 2,
            "permissions": [],
            "security_roles": []
        }))
        .send()
        .await
        .expect("push permissions");
    assert_eq!(response.status(), 204);

    let revoked = next_json(&mut ws).await;
    assert_eq!(revoked["type"], "alert_subscription_revoked");

    // 撤销后的事件不再送达
    ingest(&client, &server, store_id, "critical").await;
    assert_silent(&mut ws).await;
}

#[tokio::test]
async fn handshake_requires_valid_token() {
    let server = spawn_server().await;
    sleep(Duration::from_millis(50)).await;

    let result = connect_async(server.ws_url("not-a-jwt", "tab-1")).await;
    assert!(result.is_err(), "invalid token must refuse the upgrade");
}

#[tokio::test]
async fn missing_subscription_filter_update_errors() {
    let server = spawn_server().await;
    sleep(Duration::from_millis(50)).await;

    let identity_id = IdentityId::new(Uuid::new_v4());
    let store_id = StoreId::new(Uuid::new_v4());
    server.grant(identity_id, 1, &["alerts:receive"]).await;

    let mut ws = connect(&server, identity_id, store_id, "tab-1").await;
    ws.send(TungsteniteMessage::text(
        json!({ "type": "update_alert_filters", "filters": { "areas": ["entrance"] } }).to_string(),
    ))
    .await
    .expect("send update");

    let error = next_json(&mut ws).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "SUBSCRIPTION_NOT_FOUND");
}
