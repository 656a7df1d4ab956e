//! 告警流服务接口
//!
//! 连接注册表追踪每条活跃传输连接，并持有其出站发送端；
//! 分发器通过该接口向目标连接写入消息，从不直接触碰 socket。

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::entities::stream::{ConnectionInfo, ServerMessage};
use crate::value_objects::{ConnectionId, IdentityId};

/// 投递错误类型
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("connection not found: {0}")]
    NotFound(ConnectionId),
    #[error("connection closed: {0}")]
    ConnectionClosed(ConnectionId),
    #[error("send queue full for connection: {0}")]
    QueueFull(ConnectionId),
    #[error("connection degraded, delivery skipped: {0}")]
    Degraded(ConnectionId),
}

/// 注册表统计信息
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct RegistryStats {
    pub total_connections: u64,
    pub active_connections: usize,
    pub degraded_connections: usize,
    pub peak_connections: usize,
}

/// 连接注册表
///
/// 每个身份到其连接集合的查找必须是 O(1)：分发器的每次扇出
/// 和权限撤销时的定向关闭都依赖它。
#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    /// 注册新连接及其出站发送端，返回连接标识
    async fn register(
        &self,
        info: ConnectionInfo,
        sender: mpsc::Sender<ServerMessage>,
    ) -> ConnectionId;

    /// 注销连接。不触碰订阅状态：偏好在宽限期内保留以支持重连
    async fn unregister(&self, connection_id: ConnectionId);

    /// 某身份当前所有活跃连接（多标签页扇出的基础）
    async fn connections_for(&self, identity_id: IdentityId) -> Vec<ConnectionId>;

    /// 向单个连接写入消息。写队列满或连接已关闭时返回错误，
    /// 并把连接标记为降级；降级连接的后续写入被跳过，
    /// 直到下一次心跳恢复或重连。
    async fn send(
        &self,
        connection_id: ConnectionId,
        message: ServerMessage,
    ) -> Result<(), DeliveryError>;

    /// 获取连接元数据
    async fn get(&self, connection_id: ConnectionId) -> Option<ConnectionInfo>;

    /// 刷新连接活动时间并清除降级标记（心跳恢复）
    async fn touch(&self, connection_id: ConnectionId);

    /// 注销所有空闲超时的连接，返回注销数量
    async fn cleanup_idle(&self, timeout: std::time::Duration) -> usize;

    /// 统计信息
    async fn stats(&self) -> RegistryStats;
}
