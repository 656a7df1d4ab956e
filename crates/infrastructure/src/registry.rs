//! 内存连接注册表
//!
//! 维护连接元数据、身份到连接集合的索引，以及每条连接的有界
//! 出站发送端。写入使用 `try_send`：队列满立即失败并把连接
//! 标记为降级，慢消费者不能阻塞分发循环。降级连接的后续写入
//! 被跳过，直到心跳（touch）恢复或重连。

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use domain::{
    ConnectionId, ConnectionInfo, ConnectionRegistry, ConnectionStatus, DeliveryError, IdentityId,
    RegistryStats, ServerMessage,
};

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, ConnectionInfo>,
    identity_index: HashMap<IdentityId, Vec<ConnectionId>>,
    senders: HashMap<ConnectionId, mpsc::Sender<ServerMessage>>,
    total_connections: u64,
    peak_connections: usize,
}

/// 内存连接注册表
#[derive(Default)]
pub struct InMemoryConnectionRegistry {
    state: RwLock<RegistryState>,
}

impl InMemoryConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn detach(state: &mut RegistryState, connection_id: ConnectionId) -> Option<ConnectionInfo> {
        let info = state.connections.remove(&connection_id)?;
        state.senders.remove(&connection_id);
        if let Some(connections) = state.identity_index.get_mut(&info.identity_id) {
            connections.retain(|id| *id != connection_id);
            if connections.is_empty() {
                state.identity_index.remove(&info.identity_id);
            }
        }
        Some(info)
    }
}

#[async_trait]
impl ConnectionRegistry for InMemoryConnectionRegistry {
    async fn register(
        &self,
        info: ConnectionInfo,
        sender: mpsc::Sender<ServerMessage>,
    ) -> ConnectionId {
        let connection_id = info.connection_id;
        let identity_id = info.identity_id;

        let mut state = self.state.write().await;
        state.senders.insert(connection_id, sender);
        state
            .identity_index
            .entry(identity_id)
            .or_default()
            .push(connection_id);
        state.connections.insert(connection_id, info);
        state.total_connections += 1;
        state.peak_connections = state.peak_connections.max(state.connections.len());

        info!(connection_id = %connection_id, identity_id = %identity_id, "连接已注册");
        connection_id
    }

    async fn unregister(&self, connection_id: ConnectionId) {
        let mut state = self.state.write().await;
        if let Some(info) = Self::detach(&mut state, connection_id) {
            info!(
                connection_id = %connection_id,
                identity_id = %info.identity_id,
                "连接已注销"
            );
        }
    }

    async fn connections_for(&self, identity_id: IdentityId) -> Vec<ConnectionId> {
        self.state
            .read()
            .await
            .identity_index
            .get(&identity_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn send(
        &self,
        connection_id: ConnectionId,
        message: ServerMessage,
    ) -> Result<(), DeliveryError> {
        let mut state = self.state.write().await;
        let info = state
            .connections
            .get(&connection_id)
            .ok_or(DeliveryError::NotFound(connection_id))?;
        if info.is_degraded() {
            return Err(DeliveryError::Degraded(connection_id));
        }

        let sender = state
            .senders
            .get(&connection_id)
            .ok_or(DeliveryError::NotFound(connection_id))?;

        match sender.try_send(message) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                if let Some(info) = state.connections.get_mut(&connection_id) {
                    info.mark_degraded();
                }
                warn!(connection_id = %connection_id, "写队列已满，连接标记为降级");
                Err(DeliveryError::QueueFull(connection_id))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(DeliveryError::ConnectionClosed(connection_id))
            }
        }
    }

    async fn get(&self, connection_id: ConnectionId) -> Option<ConnectionInfo> {
        self.state.read().await.connections.get(&connection_id).cloned()
    }

    async fn touch(&self, connection_id: ConnectionId) {
        let mut state = self.state.write().await;
        if let Some(info) = state.connections.get_mut(&connection_id) {
            if info.is_degraded() {
                debug!(connection_id = %connection_id, "降级连接经心跳恢复");
            }
            info.restore();
        }
    }

    async fn cleanup_idle(&self, timeout: Duration) -> usize {
        let mut state = self.state.write().await;
        let idle: Vec<ConnectionId> = state
            .connections
            .values()
            .filter(|info| info.is_idle(timeout))
            .map(|info| info.connection_id)
            .collect();

        for connection_id in &idle {
            Self::detach(&mut state, *connection_id);
        }
        if !idle.is_empty() {
            info!(count = idle.len(), "已清理空闲超时连接");
        }
        idle.len()
    }

    async fn stats(&self) -> RegistryStats {
        let state = self.state.read().await;
        let degraded = state
            .connections
            .values()
            .filter(|info| info.is_degraded())
            .count();
        RegistryStats {
            total_connections: state.total_connections,
            active_connections: state.connections.len() - degraded,
            degraded_connections: degraded,
            peak_connections: state.peak_connections,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{StoreId, TabId};
    use uuid::Uuid;

    fn connection(identity_id: IdentityId) -> ConnectionInfo {
        ConnectionInfo::new(
            identity_id,
            StoreId::new(Uuid::new_v4()),
            TabId::parse("tab-1").expect("tab"),
        )
    }

    #[tokio::test]
    async fn test_register_send_unregister() {
        let registry = InMemoryConnectionRegistry::new();
        let identity_id = IdentityId::new(Uuid::new_v4());
        let (tx, mut rx) = mpsc::channel(8);

        let connection_id = registry.register(connection(identity_id), tx).await;
        registry
            .send(connection_id, ServerMessage::Pong)
            .await
            .expect("send");
        assert!(matches!(rx.recv().await, Some(ServerMessage::Pong)));

        registry.unregister(connection_id).await;
        let result = registry.send(connection_id, ServerMessage::Pong).await;
        assert_eq!(result, Err(DeliveryError::NotFound(connection_id)));
        assert!(registry.connections_for(identity_id).await.is_empty());
    }

    #[tokio::test]
    async fn test_identity_index_tracks_every_tab() {
        let registry = InMemoryConnectionRegistry::new();
        let identity_id = IdentityId::new(Uuid::new_v4());
        let other = IdentityId::new(Uuid::new_v4());

        for _ in 0..3 {
            let (tx, _rx) = mpsc::channel(8);
            registry.register(connection(identity_id), tx).await;
        }
        let (tx, _rx) = mpsc::channel(8);
        registry.register(connection(other), tx).await;

        assert_eq!(registry.connections_for(identity_id).await.len(), 3);
        assert_eq!(registry.connections_for(other).await.len(), 1);
    }

    #[tokio::test]
    async fn test_full_queue_degrades_until_touch() {
        let registry = InMemoryConnectionRegistry::new();
        let identity_id = IdentityId::new(Uuid::new_v4());
        // 容量 1：第二次写入即满
        let (tx, mut rx) = mpsc::channel(1);
        let connection_id = registry.register(connection(identity_id), tx).await;

        registry
            .send(connection_id, ServerMessage::Pong)
            .await
            .expect("first send");
        let result = registry.send(connection_id, ServerMessage::Pong).await;
        assert_eq!(result, Err(DeliveryError::QueueFull(connection_id)));

        // 降级后跳过投递，不再尝试写队列
        let result = registry.send(connection_id, ServerMessage::Pong).await;
        assert_eq!(result, Err(DeliveryError::Degraded(connection_id)));

        // 客户端消费掉积压并发来心跳，恢复投递
        let _ = rx.recv().await;
        registry.touch(connection_id).await;
        registry
            .send(connection_id, ServerMessage::Pong)
            .await
            .expect("send after restore");

        let stats = registry.stats().await;
        assert_eq!(stats.degraded_connections, 0);
    }

    #[tokio::test]
    async fn test_closed_receiver_reports_connection_closed() {
        let registry = InMemoryConnectionRegistry::new();
        let identity_id = IdentityId::new(Uuid::new_v4());
        let (tx, rx) = mpsc::channel(8);
        let connection_id = registry.register(connection(identity_id), tx).await;
        drop(rx);

        let result = registry.send(connection_id, ServerMessage::Pong).await;
        assert_eq!(result, Err(DeliveryError::ConnectionClosed(connection_id)));
    }

    #[tokio::test]
    async fn test_cleanup_idle() {
        let registry = InMemoryConnectionRegistry::new();
        let identity_id = IdentityId::new(Uuid::new_v4());
        let (tx, _rx) = mpsc::channel(8);
        let connection_id = registry.register(connection(identity_id), tx).await;

        // 宽超时：无连接应被清理
        assert_eq!(registry.cleanup_idle(Duration::from_secs(3600)).await, 0);

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(registry.cleanup_idle(Duration::ZERO).await, 1);
        assert!(registry.get(connection_id).await.is_none());
    }

    #[tokio::test]
    async fn test_stats_track_peak() {
        let registry = InMemoryConnectionRegistry::new();
        let identity_id = IdentityId::new(Uuid::new_v4());

        let (tx_a, _rx_a) = mpsc::channel(8);
        let (tx_b, _rx_b) = mpsc::channel(8);
        let a = registry.register(connection(identity_id), tx_a).await;
        registry.register(connection(identity_id), tx_b).await;
        registry.unregister(a).await;

        let stats = registry.stats().await;
        assert_eq!(stats.total_connections, 2);
        assert_eq!(stats.active_connections, 1);
        assert_eq!(stats.peak_connections, 2);
    }
}
