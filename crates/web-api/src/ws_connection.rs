//! 告警流 WebSocket 连接
//!
//! 封装单条连接的完整生命周期：注册、断线回放、入站控制消息
//! 处理、出站消息泵与资源清理。出站通道是有界的，由注册表以
//! `try_send` 写入；本模块只负责把通道里的消息泵到 socket。

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use domain::permissions::alert_permissions;
use domain::{
    AlertEvent, AuthorizationService, ClientMessage, ConnectionId, ConnectionInfo,
    IdentityContext, PermissionSnapshot, ServerMessage, TabId,
};

use crate::state::AppState;

/// 入站控制消息的已知类型，其余一律忽略
/// （包括共享同一传输通道的旧版 subscribe-camera 演示通道）
const KNOWN_MESSAGE_TYPES: &[&str] = &[
    "subscribe_alerts",
    "unsubscribe_alerts",
    "update_alert_filters",
    "acknowledge_alert",
    "dismiss_alert",
    "escalate_alert",
    "ping",
];

#[derive(Clone)]
pub struct AlertStreamConnection {
    state: AppState,
    identity: IdentityContext,
    tab_id: TabId,
}

impl AlertStreamConnection {
    pub fn new(state: AppState, identity: IdentityContext, tab_id: TabId) -> Self {
        Self {
            state,
            identity,
            tab_id,
        }
    }

    /// 运行连接主循环直到断开
    pub async fn run(self, socket: WebSocket) {
        let identity_id = self.identity.identity_id;
        let store_id = self.identity.store_id;

        let (tx, mut rx) = mpsc::channel::<ServerMessage>(self.state.stream.send_queue_capacity);
        let (mut sender, mut incoming) = socket.split();

        // 发送任务先于挂接启动：回放量可能超过队列容量
        let send_task = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let payload = match message.to_json() {
                    Ok(json) => json,
                    Err(err) => {
                        warn!(error = %err, "出站消息序列化失败");
                        continue;
                    }
                };
                if sender.send(WsMessage::Text(payload.into())).await.is_err() {
                    break;
                }
            }
        });

        // 挂接到分发管线：回放写入发送端后才注册，实时投递
        // 因此不可能先于回放到达
        let info = ConnectionInfo::new(identity_id, store_id, self.tab_id.clone());
        let connection_id = match self.state.dispatcher.attach(info, tx).await {
            Ok((connection_id, _)) => connection_id,
            Err(err) => {
                warn!(identity_id = %identity_id, error = %err, "断线回放失败，连接关闭");
                send_task.abort();
                if self
                    .state
                    .registry
                    .connections_for(identity_id)
                    .await
                    .is_empty()
                {
                    self.state.subscriptions.note_disconnected(identity_id).await;
                }
                return;
            }
        };

        info!(
            connection_id = %connection_id,
            identity_id = %identity_id,
            store_id = %store_id,
            "告警流连接已建立"
        );

        // 接收任务：处理客户端控制消息
        let recv_task = {
            let connection = self.clone();
            tokio::spawn(async move {
                while let Some(Ok(message)) = incoming.next().await {
                    match message {
                        WsMessage::Close(_) => break,
                        WsMessage::Ping(_) | WsMessage::Pong(_) => {
                            connection.state.registry.touch(connection_id).await;
                        }
                        WsMessage::Text(text) => {
                            connection.handle_text(connection_id, text.as_str()).await;
                        }
                        WsMessage::Binary(_) => {
                            debug!(connection_id = %connection_id, "忽略二进制消息");
                        }
                    }
                }
            })
        };

        tokio::select! {
            _ = send_task => {}
            _ = recv_task => {}
        }

        // 注销连接；订阅在宽限期内保留以支持重连
        self.state.registry.unregister(connection_id).await;
        if self
            .state
            .registry
            .connections_for(identity_id)
            .await
            .is_empty()
        {
            self.state.subscriptions.note_disconnected(identity_id).await;
        }

        info!(
            connection_id = %connection_id,
            identity_id = %identity_id,
            "告警流连接已断开"
        );
    }

    /// 解析一条入站文本消息。未知类型被忽略；JSON 损坏或缺少
    /// 必填字段回送 error 控制消息，连接保持打开。
    async fn handle_text(&self, connection_id: ConnectionId, text: &str) {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(_) => {
                self.send_control(
                    connection_id,
                    ServerMessage::error("MALFORMED_MESSAGE", "invalid JSON"),
                )
                .await;
                return;
            }
        };

        let Some(message_type) = value.get("type").and_then(|t| t.as_str()) else {
            self.send_control(
                connection_id,
                ServerMessage::error("MALFORMED_MESSAGE", "missing type field"),
            )
            .await;
            return;
        };

        if !KNOWN_MESSAGE_TYPES.contains(&message_type) {
            debug!(
                connection_id = %connection_id,
                message_type,
                "忽略未知消息类型"
            );
            return;
        }

        match serde_json::from_value::<ClientMessage>(value) {
            Ok(message) => self.handle_message(connection_id, message).await,
            Err(err) => {
                self.send_control(
                    connection_id,
                    ServerMessage::error("MALFORMED_MESSAGE", err.to_string()),
                )
                .await;
            }
        }
    }

    async fn handle_message(&self, connection_id: ConnectionId, message: ClientMessage) {
        let identity_id = self.identity.identity_id;
        let store_id = self.identity.store_id;

        match message {
            ClientMessage::SubscribeAlerts {
                filters,
                preferences,
            } => {
                let snapshot = self
                    .state
                    .authorization
                    .permission_snapshot(identity_id)
                    .await
                    .unwrap_or_else(|_| PermissionSnapshot::empty());
                if !snapshot.can_receive_alerts() {
                    self.send_control(
                        connection_id,
                        ServerMessage::error(
                            "INSUFFICIENT_PERMISSIONS",
                            "alerts:receive permission required",
                        ),
                    )
                    .await;
                    return;
                }

                let subscription = self
                    .state
                    .subscriptions
                    .upsert(identity_id, store_id, filters, preferences, snapshot)
                    .await;
                self.send_control(
                    connection_id,
                    ServerMessage::AlertSubscriptionConfirmed {
                        subscription: subscription.view(),
                    },
                )
                .await;
            }
            ClientMessage::UnsubscribeAlerts {} => {
                self.state.subscriptions.remove(identity_id).await;
                self.state.dispatcher.forget_identity(identity_id).await;
                self.send_control(
                    connection_id,
                    ServerMessage::AlertUnsubscriptionConfirmed {},
                )
                .await;
            }
            ClientMessage::UpdateAlertFilters { filters } => {
                match self
                    .state
                    .subscriptions
                    .replace_filters(identity_id, filters)
                    .await
                {
                    Ok(subscription) => {
                        self.send_control(
                            connection_id,
                            ServerMessage::AlertFiltersUpdated {
                                filters: subscription.filters.clone(),
                            },
                        )
                        .await;
                    }
                    Err(_) => {
                        self.send_control(
                            connection_id,
                            ServerMessage::error(
                                "SUBSCRIPTION_NOT_FOUND",
                                "no active alert subscription",
                            ),
                        )
                        .await;
                    }
                }
            }
            ClientMessage::AcknowledgeAlert { alert_id, notes } => {
                if !self
                    .check_permission(alert_permissions::ALERTS_ACKNOWLEDGE)
                    .await
                {
                    self.send_control(
                        connection_id,
                        ServerMessage::error(
                            "INSUFFICIENT_PERMISSIONS",
                            "alerts:acknowledge permission required",
                        ),
                    )
                    .await;
                    return;
                }
                self.publish(
                    connection_id,
                    AlertEvent::Acknowledgment {
                        alert_id,
                        acknowledged_by: identity_id,
                        notes,
                    },
                )
                .await;
            }
            ClientMessage::DismissAlert { alert_id, reason } => {
                if !self.check_permission(alert_permissions::ALERTS_DISMISS).await {
                    self.send_control(
                        connection_id,
                        ServerMessage::error(
                            "INSUFFICIENT_PERMISSIONS",
                            "alerts:dismiss permission required",
                        ),
                    )
                    .await;
                    return;
                }
                // 忽略操作转发给事件记录系统，不向其他订阅者广播
                info!(
                    identity_id = %identity_id,
                    alert_id = %alert_id,
                    reason = reason.as_deref().unwrap_or(""),
                    "告警已被忽略"
                );
            }
            ClientMessage::EscalateAlert {
                alert_id,
                new_severity,
                reason,
            } => {
                if !self
                    .check_permission(alert_permissions::ALERTS_ESCALATE)
                    .await
                {
                    self.send_control(
                        connection_id,
                        ServerMessage::error(
                            "INSUFFICIENT_PERMISSIONS",
                            "alerts:escalate permission required",
                        ),
                    )
                    .await;
                    return;
                }
                self.publish(
                    connection_id,
                    AlertEvent::Escalation {
                        alert_id,
                        new_severity,
                        reason,
                    },
                )
                .await;
            }
            ClientMessage::Ping => {
                self.state.registry.touch(connection_id).await;
                self.send_control(connection_id, ServerMessage::Pong).await;
            }
        }
    }

    async fn publish(&self, connection_id: ConnectionId, event: AlertEvent) {
        if let Err(err) = self
            .state
            .dispatcher
            .publish(self.identity.store_id, event)
            .await
        {
            warn!(connection_id = %connection_id, error = %err, "事件发布失败");
            self.send_control(
                connection_id,
                ServerMessage::error("DISPATCH_FAILED", "event could not be dispatched"),
            )
            .await;
        }
    }

    async fn check_permission(&self, permission: &str) -> bool {
        self.state
            .authorization
            .has_permission(self.identity.identity_id, permission)
            .await
            .unwrap_or(false)
    }

    async fn send_control(&self, connection_id: ConnectionId, message: ServerMessage) {
        if let Err(err) = self.state.registry.send(connection_id, message).await {
            debug!(connection_id = %connection_id, error = %err, "控制消息投递失败");
        }
    }
}
