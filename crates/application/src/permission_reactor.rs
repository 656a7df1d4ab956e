//! 权限变更反应器
//!
//! 授权系统推送权限快照更新；快照按版本号门控，乱序到达的
//! 旧版本被忽略。失去 alerts:receive 的身份会主动收到
//! alert_subscription_revoked 并被停用订阅——客户端不允许
//! 在不知情的情况下停止接收告警。

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::ApplicationError;
use crate::subscription_store::SubscriptionStore;
use domain::{ConnectionRegistry, IdentityId, PermissionSnapshot, ServerMessage};

/// 授权系统下发的权限更新
#[derive(Debug, Clone, Deserialize)]
pub struct PermissionUpdate {
    pub identity_id: IdentityId,
    /// 严格递增的快照版本号
    pub version: u64,
    #[serde(default)]
    pub permissions: HashSet<String>,
    #[serde(default)]
    pub security_roles: HashSet<String>,
}

pub struct PermissionChangeReactor {
    subscriptions: Arc<SubscriptionStore>,
    registry: Arc<dyn ConnectionRegistry>,
}

impl PermissionChangeReactor {
    pub fn new(subscriptions: Arc<SubscriptionStore>, registry: Arc<dyn ConnectionRegistry>) -> Self {
        Self {
            subscriptions,
            registry,
        }
    }

    /// 应用一次权限更新。无订阅的身份直接忽略；旧版本快照由
    /// 订阅存储的版本门控丢弃。
    pub async fn apply(&self, update: PermissionUpdate) -> Result<(), ApplicationError> {
        let identity_id = update.identity_id;
        let snapshot =
            PermissionSnapshot::new(update.version, update.permissions, update.security_roles);

        let Some(updated) = self
            .subscriptions
            .update_permission_snapshot(identity_id, snapshot)
            .await
        else {
            debug!(identity_id = %identity_id, "权限更新的身份没有订阅，忽略");
            return Ok(());
        };

        if updated.permission_snapshot.version != update.version {
            // 版本门控已丢弃这次更新
            return Ok(());
        }

        if updated.permission_snapshot.can_receive_alerts() {
            debug!(
                identity_id = %identity_id,
                version = update.version,
                "权限快照已应用"
            );
            return Ok(());
        }

        self.revoke(identity_id).await;
        Ok(())
    }

    /// 撤销告警流访问：先通知所有活跃连接，再停用订阅。
    /// 通知失败（连接降级或刚关闭）不阻止停用。
    async fn revoke(&self, identity_id: IdentityId) {
        let message = ServerMessage::AlertSubscriptionRevoked {
            reason: "alerts:receive permission revoked".to_string(),
        };
        for connection_id in self.registry.connections_for(identity_id).await {
            if let Err(err) = self.registry.send(connection_id, message.clone()).await {
                warn!(
                    connection_id = %connection_id,
                    error = %err,
                    "撤销通知投递失败"
                );
            }
        }

        self.subscriptions.deactivate(identity_id).await;
        info!(identity_id = %identity_id, "权限变更，告警订阅已撤销");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use async_trait::async_trait;
    use domain::{
        AlertFilters, AlertPreferences, ConnectionId, ConnectionInfo, DeliveryError,
        RegistryStats, StoreId,
    };
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingRegistry {
        connections: Mutex<HashMap<ConnectionId, IdentityId>>,
        sent: Mutex<Vec<(ConnectionId, ServerMessage)>>,
    }

    impl RecordingRegistry {
        fn connect(&self, identity_id: IdentityId) -> ConnectionId {
            let connection_id = ConnectionId::generate();
            self.connections
                .lock()
                .unwrap()
                .insert(connection_id, identity_id);
            connection_id
        }
    }

    #[async_trait]
    impl ConnectionRegistry for RecordingRegistry {
        async fn register(
            &self,
            info: ConnectionInfo,
            _sender: tokio::sync::mpsc::Sender<ServerMessage>,
        ) -> ConnectionId {
            self.connections
                .lock()
                .unwrap()
                .insert(info.connection_id, info.identity_id);
            info.connection_id
        }

        async fn unregister(&self, connection_id: ConnectionId) {
            self.connections.lock().unwrap().remove(&connection_id);
        }

        async fn connections_for(&self, identity_id: IdentityId) -> Vec<ConnectionId> {
            self.connections
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, id)| **id == identity_id)
                .map(|(connection_id, _)| *connection_id)
                .collect()
        }

        async fn send(
            &self,
            connection_id: ConnectionId,
            message: ServerMessage,
        ) -> Result<(), DeliveryError> {
            self.sent.lock().unwrap().push((connection_id, message));
            Ok(())
        }

        async fn get(&self, _connection_id: ConnectionId) -> Option<ConnectionInfo> {
            None
        }

        async fn touch(&self, _connection_id: ConnectionId) {}

        async fn cleanup_idle(&self, _timeout: Duration) -> usize {
            0
        }

        async fn stats(&self) -> RegistryStats {
            RegistryStats::default()
        }
    }

    fn receive_snapshot(version: u64) -> PermissionSnapshot {
        let mut permissions = HashSet::new();
        permissions.insert("alerts:receive".to_string());
        PermissionSnapshot::new(version, permissions, HashSet::new())
    }

    async fn subscribed_identity(
        subscriptions: &SubscriptionStore,
        store_id: StoreId,
    ) -> IdentityId {
        let identity_id = IdentityId::new(Uuid::new_v4());
        subscriptions
            .upsert(
                identity_id,
                store_id,
                AlertFilters::default(),
                AlertPreferences::default(),
                receive_snapshot(1),
            )
            .await;
        identity_id
    }

    #[tokio::test]
    async fn test_downgrade_revokes_and_notifies_every_tab() {
        let subscriptions = Arc::new(SubscriptionStore::new(Arc::new(SystemClock)));
        let registry = Arc::new(RecordingRegistry::default());
        let reactor = PermissionChangeReactor::new(subscriptions.clone(), registry.clone());

        let store_id = StoreId::new(Uuid::new_v4());
        let identity_id = subscribed_identity(&subscriptions, store_id).await;
        registry.connect(identity_id);
        registry.connect(identity_id);

        reactor
            .apply(PermissionUpdate {
                identity_id,
                version: 2,
                permissions: HashSet::new(),
                security_roles: HashSet::new(),
            })
            .await
            .expect("apply");

        // 每个标签页都收到撤销通知
        let sent = registry.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(_, message)| matches!(
            message,
            ServerMessage::AlertSubscriptionRevoked { .. }
        )));
        drop(sent);

        // 订阅被停用，不再是候选
        assert!(subscriptions.candidates_for(store_id).await.is_empty());
        let subscription = subscriptions.get(identity_id).await.expect("retained");
        assert!(!subscription.active);
    }

    #[tokio::test]
    async fn test_upgrade_keeps_subscription_active() {
        let subscriptions = Arc::new(SubscriptionStore::new(Arc::new(SystemClock)));
        let registry = Arc::new(RecordingRegistry::default());
        let reactor = PermissionChangeReactor::new(subscriptions.clone(), registry.clone());

        let store_id = StoreId::new(Uuid::new_v4());
        let identity_id = subscribed_identity(&subscriptions, store_id).await;
        registry.connect(identity_id);

        let mut permissions = HashSet::new();
        permissions.insert("alerts:receive".to_string());
        permissions.insert("alerts:escalate".to_string());
        reactor
            .apply(PermissionUpdate {
                identity_id,
                version: 2,
                permissions,
                security_roles: HashSet::new(),
            })
            .await
            .expect("apply");

        assert!(registry.sent.lock().unwrap().is_empty());
        let subscription = subscriptions.get(identity_id).await.expect("subscription");
        assert!(subscription.active);
        assert!(subscription
            .permission_snapshot
            .has_permission("alerts:escalate"));
    }

    #[tokio::test]
    async fn test_stale_version_does_not_revoke() {
        let subscriptions = Arc::new(SubscriptionStore::new(Arc::new(SystemClock)));
        let registry = Arc::new(RecordingRegistry::default());
        let reactor = PermissionChangeReactor::new(subscriptions.clone(), registry.clone());

        let store_id = StoreId::new(Uuid::new_v4());
        let identity_id = IdentityId::new(Uuid::new_v4());
        subscriptions
            .upsert(
                identity_id,
                store_id,
                AlertFilters::default(),
                AlertPreferences::default(),
                receive_snapshot(5),
            )
            .await;
        registry.connect(identity_id);

        // 版本 3 的空权限快照迟到：必须被忽略
        reactor
            .apply(PermissionUpdate {
                identity_id,
                version: 3,
                permissions: HashSet::new(),
                security_roles: HashSet::new(),
            })
            .await
            .expect("apply");

        assert!(registry.sent.lock().unwrap().is_empty());
        assert_eq!(subscriptions.candidates_for(store_id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_update_without_subscription_is_ignored() {
        let subscriptions = Arc::new(SubscriptionStore::new(Arc::new(SystemClock)));
        let registry = Arc::new(RecordingRegistry::default());
        let reactor = PermissionChangeReactor::new(subscriptions.clone(), registry.clone());

        reactor
            .apply(PermissionUpdate {
                identity_id: IdentityId::new(Uuid::new_v4()),
                version: 1,
                permissions: HashSet::new(),
                security_roles: HashSet::new(),
            })
            .await
            .expect("apply");

        assert!(registry.sent.lock().unwrap().is_empty());
    }
}
