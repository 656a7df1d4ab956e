//! 授权服务接口
//!
//! 权限与角色的存储、解析由外部认证/授权系统负责；
//! 核心在订阅建立和敏感操作时调用此接口，并缓存返回的快照。

use async_trait::async_trait;

use crate::entities::identity::PermissionSnapshot;
use crate::errors::DomainError;
use crate::value_objects::IdentityId;

#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait AuthorizationService: Send + Sync {
    /// 解析身份的当前权限快照
    async fn permission_snapshot(
        &self,
        identity_id: IdentityId,
    ) -> Result<PermissionSnapshot, DomainError>;

    /// 单项权限检查
    async fn has_permission(
        &self,
        identity_id: IdentityId,
        permission: &str,
    ) -> Result<bool, DomainError>;

    /// 安全角色检查
    async fn has_security_role(
        &self,
        identity_id: IdentityId,
        role: &str,
    ) -> Result<bool, DomainError>;
}
