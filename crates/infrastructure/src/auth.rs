//! 内存授权服务
//!
//! 权限快照目录的内存实现。生产部署中快照来自外部授权系统的
//! 推送（/internal/permissions），此处同时充当其落地存储：
//! 每次推送整体替换身份的快照。

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use domain::{AuthorizationService, DomainError, IdentityId, PermissionSnapshot};

#[derive(Default)]
pub struct InMemoryAuthorizationService {
    snapshots: RwLock<HashMap<IdentityId, PermissionSnapshot>>,
}

impl InMemoryAuthorizationService {
    pub fn new() -> Self {
        Self::default()
    }

    /// 存入（整体替换）身份的权限快照
    pub async fn load_snapshot(&self, identity_id: IdentityId, snapshot: PermissionSnapshot) {
        debug!(identity_id = %identity_id, version = snapshot.version, "权限快照已存入");
        self.snapshots.write().await.insert(identity_id, snapshot);
    }
}

#[async_trait]
impl AuthorizationService for InMemoryAuthorizationService {
    async fn permission_snapshot(
        &self,
        identity_id: IdentityId,
    ) -> Result<PermissionSnapshot, DomainError> {
        self.snapshots
            .read()
            .await
            .get(&identity_id)
            .cloned()
            .ok_or(DomainError::IdentityNotFound)
    }

    async fn has_permission(
        &self,
        identity_id: IdentityId,
        permission: &str,
    ) -> Result<bool, DomainError> {
        Ok(self
            .permission_snapshot(identity_id)
            .await?
            .has_permission(permission))
    }

    async fn has_security_role(
        &self,
        identity_id: IdentityId,
        role: &str,
    ) -> Result<bool, DomainError> {
        Ok(self
            .permission_snapshot(identity_id)
            .await?
            .has_security_role(role))
    }
}
