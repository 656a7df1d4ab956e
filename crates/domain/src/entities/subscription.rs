//! 订阅实体
//!
//! 每个身份同一时刻至多一个活跃订阅；过滤器与偏好的更新是整体替换，
//! 不做部分合并——最新一次更新完全取代之前的过滤集。

use serde::{Deserialize, Serialize};

use crate::entities::alert::{Alert, AlertEvent, Severity};
use crate::entities::identity::PermissionSnapshot;
use crate::value_objects::{CameraId, IdentityId, StoreId};

/// 告警过滤器：各非空维度之间取 AND，空维度匹配一切
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertFilters {
    #[serde(default)]
    pub severities: Vec<Severity>,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub cameras: Vec<CameraId>,
    #[serde(default)]
    pub areas: Vec<String>,
}

impl AlertFilters {
    /// 告警通知的完整维度匹配
    pub fn matches_alert(&self, alert: &Alert) -> bool {
        self.matches_severity(alert.severity)
            && (self.types.is_empty() || self.types.iter().any(|t| t == &alert.alert_type))
            && (self.cameras.is_empty() || self.cameras.contains(&alert.camera_id))
            && (self.areas.is_empty()
                || alert
                    .area
                    .as_ref()
                    .is_some_and(|area| self.areas.iter().any(|a| a == area)))
    }

    pub fn matches_severity(&self, severity: Severity) -> bool {
        self.severities.is_empty() || self.severities.contains(&severity)
    }

    /// 事件级别的匹配入口。确认类事件只携带告警引用，不参与维度过滤；
    /// 升级事件只能按新严重级别评估（原始告警载荷不在事件中）。
    pub fn matches_event(&self, event: &AlertEvent) -> bool {
        match event {
            AlertEvent::Notification(alert) => self.matches_alert(alert),
            AlertEvent::Escalation { new_severity, .. } => self.matches_severity(*new_severity),
            AlertEvent::Acknowledgment { .. } | AlertEvent::BulkAcknowledgment { .. } => true,
        }
    }
}

/// 订阅偏好
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPreferences {
    /// 每分钟最大告警数（令牌桶容量）
    #[serde(default = "default_max_alerts_per_minute")]
    pub max_alerts_per_minute: u32,
    /// 低严重级别告警在限流前直接过滤，不消耗配额
    #[serde(default)]
    pub suppress_low_severity: bool,
    /// 只接收指派给自己的告警
    #[serde(default)]
    pub only_assigned_alerts: bool,
    /// 是否推送浏览器通知（客户端关心，服务端原样保存）
    #[serde(default)]
    pub push_notifications: bool,
}

fn default_max_alerts_per_minute() -> u32 {
    10
}

impl Default for AlertPreferences {
    fn default() -> Self {
        Self {
            max_alerts_per_minute: default_max_alerts_per_minute(),
            suppress_low_severity: false,
            only_assigned_alerts: false,
            push_notifications: false,
        }
    }
}

/// 身份的当前订阅状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub identity_id: IdentityId,
    pub store_id: StoreId,
    pub filters: AlertFilters,
    pub preferences: AlertPreferences,
    pub active: bool,
    /// 每次整体替换时递增，用于判定针对旧过滤集的在途评估已失效
    pub revision: u64,
    /// 授权服务下发的权限快照
    pub permission_snapshot: PermissionSnapshot,
}

impl Subscription {
    pub fn new(
        identity_id: IdentityId,
        store_id: StoreId,
        filters: AlertFilters,
        preferences: AlertPreferences,
        permission_snapshot: PermissionSnapshot,
    ) -> Self {
        Self {
            identity_id,
            store_id,
            filters,
            preferences,
            active: true,
            revision: 1,
            permission_snapshot,
        }
    }

    /// 该身份是否应收到此事件：授权 + 租户隔离 + 过滤匹配 + 指派范围。
    /// 限流在此之后单独评估。
    pub fn accepts(&self, store_id: StoreId, event: &AlertEvent) -> bool {
        if !self.active || self.store_id != store_id {
            return false;
        }
        if !self.permission_snapshot.can_receive_alerts() {
            return false;
        }
        if let Some(alert) = event.as_notification() {
            // 指派范围只约束告警通知，确认/升级事件不携带指派信息
            if self.preferences.only_assigned_alerts
                && alert.assigned_to != Some(self.identity_id)
            {
                return false;
            }
            // 低严重级别抑制发生在限流之前，被抑制的事件不消耗令牌
            if self.preferences.suppress_low_severity && alert.severity == Severity::Low {
                return false;
            }
        }
        self.filters.matches_event(event)
    }

    /// 客户端可见的订阅视图（不含权限快照）
    pub fn view(&self) -> SubscriptionView {
        SubscriptionView {
            filters: self.filters.clone(),
            preferences: self.preferences.clone(),
            active: self.active,
        }
    }
}

/// 订阅确认消息中回显给客户端的视图
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionView {
    pub filters: AlertFilters,
    pub preferences: AlertPreferences,
    pub active: bool,
}
