//! 身份与权限快照
//!
//! 权限由外部授权服务解析，核心只持有带版本号的只读快照；
//! 快照更新通过权限变更反应器驱动，版本号保证乱序更新不回退。

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::permissions::alert_permissions;
use crate::value_objects::{IdentityId, StoreId};

/// 权限快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSnapshot {
    /// 快照版本，单调递增
    pub version: u64,
    /// 权限集合（"alerts:receive" 等）
    pub permissions: HashSet<String>,
    /// 安全角色集合
    pub security_roles: HashSet<String>,
}

impl PermissionSnapshot {
    pub fn new(
        version: u64,
        permissions: HashSet<String>,
        security_roles: HashSet<String>,
    ) -> Self {
        Self {
            version,
            permissions,
            security_roles,
        }
    }

    /// 空快照（无任何授权），握手失败时的安全缺省
    pub fn empty() -> Self {
        Self {
            version: 0,
            permissions: HashSet::new(),
            security_roles: HashSet::new(),
        }
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    pub fn has_security_role(&self, role: &str) -> bool {
        self.security_roles.contains(role)
    }

    /// 是否允许接收告警流
    pub fn can_receive_alerts(&self) -> bool {
        self.has_permission(alert_permissions::ALERTS_RECEIVE)
    }
}

/// 握手后确定的身份上下文，贯穿连接生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityContext {
    pub identity_id: IdentityId,
    /// 租户边界，事件绝不跨门店投递
    pub store_id: StoreId,
}
