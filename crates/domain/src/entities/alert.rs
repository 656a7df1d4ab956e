//! 告警事件实体
//!
//! 事件是不可变的分发事实：由分析管线或客户端操作产生，
//! 经分发器按门店分配单调递增序列号后推送给订阅者。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::value_objects::{AlertId, CameraId, IdentityId, StoreId, Timestamp};

/// 告警严重级别，对应分析管线输出的 threat_level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }

    /// critical 告警在推送时额外标记为需要立即处理
    pub fn requires_immediate_attention(&self) -> bool {
        matches!(self, Severity::Critical)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 告警通知载荷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: AlertId,
    pub store_id: StoreId,
    pub camera_id: CameraId,
    pub severity: Severity,
    /// 告警类型（theft_detected / intrusion / loitering 等，由分析管线定义）
    pub alert_type: String,
    pub description: String,
    /// 摄像头所在区域，供区域过滤使用
    pub area: Option<String>,
    /// 指派处理人，供 only_assigned_alerts 偏好使用
    pub assigned_to: Option<IdentityId>,
    /// 触发帧截图的引用
    pub snapshot_ref: Option<String>,
    /// 分析管线附带的检测元数据，原样透传
    #[serde(default)]
    pub payload: Value,
}

/// 待分发的领域事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertEvent {
    /// 新告警
    Notification(Alert),
    /// 告警确认
    Acknowledgment {
        alert_id: AlertId,
        acknowledged_by: IdentityId,
        notes: Option<String>,
    },
    /// 告警升级：更新已投递告警的严重级别
    Escalation {
        alert_id: AlertId,
        new_severity: Severity,
        reason: Option<String>,
    },
    /// 批量确认，作为单个逻辑投递单元处理
    BulkAcknowledgment {
        alert_ids: Vec<AlertId>,
        acknowledged_by: IdentityId,
    },
}

impl AlertEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AlertEvent::Notification(_) => "alert_notification",
            AlertEvent::Acknowledgment { .. } => "alert_acknowledgment",
            AlertEvent::Escalation { .. } => "alert_escalation",
            AlertEvent::BulkAcknowledgment { .. } => "bulk_acknowledgment",
        }
    }

    /// 参与过滤匹配的严重级别；升级事件按新级别评估候选集
    pub fn severity_for_matching(&self) -> Option<Severity> {
        match self {
            AlertEvent::Notification(alert) => Some(alert.severity),
            AlertEvent::Escalation { new_severity, .. } => Some(*new_severity),
            _ => None,
        }
    }

    /// 确认/升级类事件不受限流约束（运营完整性事件绝不因配额被丢弃）
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AlertEvent::Notification(_))
    }

    pub fn as_notification(&self) -> Option<&Alert> {
        match self {
            AlertEvent::Notification(alert) => Some(alert),
            _ => None,
        }
    }
}

/// 已分配序列号的事件，分发与回放的最小单元
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencedEvent {
    pub store_id: StoreId,
    /// 每门店单调递增，回放排序与去重键的一部分
    pub sequence: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub occurred_at: Timestamp,
    pub event: AlertEvent,
}
