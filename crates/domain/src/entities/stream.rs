//! 告警流通道实体
//!
//! 定义连接元数据与客户端/服务端之间的 JSON 控制消息。
//! 所有消息都带 `type` 判别字段；未知类型被忽略而非报错，
//! 以兼容共享同一传输通道的其他消费者。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::alert::{Alert, AlertEvent, SequencedEvent, Severity};
use crate::entities::subscription::{AlertFilters, AlertPreferences, SubscriptionView};
use crate::value_objects::{AlertId, ConnectionId, IdentityId, StoreId, TabId, Timestamp};

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// 正常收发
    Active,
    /// 写队列曾满或写失败，跳过后续投递直到下一次心跳恢复
    Degraded,
}

/// 连接元数据：一条传输会话，同一身份可同时持有多条（多标签页）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub connection_id: ConnectionId,
    pub identity_id: IdentityId,
    pub store_id: StoreId,
    pub tab_id: TabId,
    pub status: ConnectionStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub opened_at: Timestamp,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen_at: Timestamp,
}

impl ConnectionInfo {
    pub fn new(identity_id: IdentityId, store_id: StoreId, tab_id: TabId) -> Self {
        let now = Timestamp::now_utc();
        Self {
            connection_id: ConnectionId::generate(),
            identity_id,
            store_id,
            tab_id,
            status: ConnectionStatus::Active,
            opened_at: now,
            last_seen_at: now,
        }
    }

    /// 收到任何入站流量（含 pong）时刷新活动时间
    pub fn update_activity(&mut self) {
        self.last_seen_at = Timestamp::now_utc();
    }

    pub fn mark_degraded(&mut self) {
        self.status = ConnectionStatus::Degraded;
    }

    /// 心跳恢复后重新参与投递
    pub fn restore(&mut self) {
        self.status = ConnectionStatus::Active;
        self.update_activity();
    }

    pub fn is_degraded(&self) -> bool {
        self.status == ConnectionStatus::Degraded
    }

    pub fn is_idle(&self, timeout: std::time::Duration) -> bool {
        Timestamp::now_utc() - self.last_seen_at > timeout
    }
}

/// 客户端发往服务端的控制消息
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// 订阅告警流（或整体替换现有订阅）
    SubscribeAlerts {
        #[serde(default)]
        filters: AlertFilters,
        #[serde(default)]
        preferences: AlertPreferences,
    },
    /// 取消订阅
    UnsubscribeAlerts {},
    /// 整体替换过滤器，偏好保持不变
    UpdateAlertFilters { filters: AlertFilters },
    /// 确认告警
    AcknowledgeAlert {
        alert_id: AlertId,
        notes: Option<String>,
    },
    /// 忽略告警（转发给事件记录系统，不广播）
    DismissAlert {
        alert_id: AlertId,
        reason: Option<String>,
    },
    /// 升级告警
    EscalateAlert {
        alert_id: AlertId,
        new_severity: Severity,
        reason: Option<String>,
    },
    /// 心跳
    Ping,
}

/// 服务端推送给客户端的消息
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// 订阅确认
    AlertSubscriptionConfirmed { subscription: SubscriptionView },
    /// 取消订阅确认
    AlertUnsubscriptionConfirmed {},
    /// 过滤器更新确认
    AlertFiltersUpdated { filters: AlertFilters },
    /// 告警通知
    AlertNotification {
        sequence: u64,
        alert: Alert,
        requires_immediate_attention: bool,
        timestamp: DateTime<Utc>,
    },
    /// 告警确认通知
    AlertAcknowledgment {
        sequence: u64,
        alert_id: AlertId,
        acknowledged_by: IdentityId,
        notes: Option<String>,
    },
    /// 告警升级通知（仅携带引用，新晋匹配者通过事件系统补全详情）
    AlertEscalation {
        sequence: u64,
        alert_id: AlertId,
        new_severity: Severity,
    },
    /// 批量确认，单个逻辑单元
    BulkAcknowledgmentConfirmed {
        sequence: u64,
        alert_ids: Vec<AlertId>,
        acknowledged_by: IdentityId,
    },
    /// 订阅被撤销（权限变更），客户端必须被告知原因
    AlertSubscriptionRevoked { reason: String },
    /// 回放窗口缺口：客户端应通过事件 REST 接口做全量对账
    ReplayGap { lowest_available_sequence: u64 },
    /// 错误控制消息，连接保持打开
    Error { code: String, message: String },
    /// 心跳响应
    Pong,
}

impl ServerMessage {
    /// 由已定序事件构造出站消息
    pub fn from_event(sequenced: &SequencedEvent) -> Self {
        match &sequenced.event {
            AlertEvent::Notification(alert) => ServerMessage::AlertNotification {
                sequence: sequenced.sequence,
                alert: alert.clone(),
                requires_immediate_attention: alert.severity.requires_immediate_attention(),
                timestamp: Utc::now(),
            },
            AlertEvent::Acknowledgment {
                alert_id,
                acknowledged_by,
                notes,
            } => ServerMessage::AlertAcknowledgment {
                sequence: sequenced.sequence,
                alert_id: *alert_id,
                acknowledged_by: *acknowledged_by,
                notes: notes.clone(),
            },
            AlertEvent::Escalation {
                alert_id,
                new_severity,
                ..
            } => ServerMessage::AlertEscalation {
                sequence: sequenced.sequence,
                alert_id: *alert_id,
                new_severity: *new_severity,
            },
            AlertEvent::BulkAcknowledgment {
                alert_ids,
                acknowledged_by,
            } => ServerMessage::BulkAcknowledgmentConfirmed {
                sequence: sequenced.sequence,
                alert_ids: alert_ids.clone(),
                acknowledged_by: *acknowledged_by,
            },
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
