//! 订阅存储
//!
//! 每个身份至多一个活跃订阅。所有写入都是整体替换并递增修订号；
//! 读取返回 `Arc` 快照，保证进行中的扇出评估看到的是一致的
//! 过滤集，不会出现一半旧一半新的状态。
//!
//! 最后一个连接断开后订阅保留一段宽限期，重连无需重新订阅；
//! 宽限期过后由维护任务清除。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::clock::Clock;
use domain::{
    AlertFilters, AlertPreferences, DomainError, IdentityId, PermissionSnapshot, StoreId,
    Subscription, Timestamp,
};

pub struct SubscriptionStore {
    subscriptions: RwLock<HashMap<IdentityId, Arc<Subscription>>>,
    /// 身份最后一个连接断开的时刻，存在即处于宽限期
    disconnected_at: RwLock<HashMap<IdentityId, Timestamp>>,
    clock: Arc<dyn Clock>,
}

impl SubscriptionStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            disconnected_at: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// 创建或整体替换订阅（subscribe_alerts 的语义：替换而非
    /// 先退订再订阅，避免出现漏收事件的窗口）
    pub async fn upsert(
        &self,
        identity_id: IdentityId,
        store_id: StoreId,
        filters: AlertFilters,
        preferences: AlertPreferences,
        permission_snapshot: PermissionSnapshot,
    ) -> Arc<Subscription> {
        let mut subscriptions = self.subscriptions.write().await;
        let revision = subscriptions
            .get(&identity_id)
            .map(|existing| existing.revision + 1)
            .unwrap_or(1);

        let mut subscription = Subscription::new(
            identity_id,
            store_id,
            filters,
            preferences,
            permission_snapshot,
        );
        subscription.revision = revision;

        let subscription = Arc::new(subscription);
        subscriptions.insert(identity_id, subscription.clone());
        debug!(identity_id = %identity_id, revision, "订阅已替换");
        subscription
    }

    /// 整体替换过滤器，偏好与权限快照保持不变
    pub async fn replace_filters(
        &self,
        identity_id: IdentityId,
        filters: AlertFilters,
    ) -> Result<Arc<Subscription>, DomainError> {
        let mut subscriptions = self.subscriptions.write().await;
        let existing = subscriptions
            .get(&identity_id)
            .ok_or(DomainError::SubscriptionNotFound)?;

        let mut updated = existing.as_ref().clone();
        updated.filters = filters;
        updated.revision += 1;

        let updated = Arc::new(updated);
        subscriptions.insert(identity_id, updated.clone());
        Ok(updated)
    }

    pub async fn get(&self, identity_id: IdentityId) -> Option<Arc<Subscription>> {
        self.subscriptions.read().await.get(&identity_id).cloned()
    }

    pub async fn remove(&self, identity_id: IdentityId) -> Option<Arc<Subscription>> {
        self.disconnected_at.write().await.remove(&identity_id);
        self.subscriptions.write().await.remove(&identity_id)
    }

    /// 应用新的权限快照。版本号不高于当前快照的更新被忽略，
    /// 防止乱序到达的旧快照回退授权状态。
    pub async fn update_permission_snapshot(
        &self,
        identity_id: IdentityId,
        snapshot: PermissionSnapshot,
    ) -> Option<Arc<Subscription>> {
        let mut subscriptions = self.subscriptions.write().await;
        let existing = subscriptions.get(&identity_id)?;
        if snapshot.version <= existing.permission_snapshot.version {
            debug!(
                identity_id = %identity_id,
                incoming = snapshot.version,
                current = existing.permission_snapshot.version,
                "忽略过期的权限快照"
            );
            return Some(existing.clone());
        }

        let mut updated = existing.as_ref().clone();
        updated.permission_snapshot = snapshot;
        updated.revision += 1;

        let updated = Arc::new(updated);
        subscriptions.insert(identity_id, updated.clone());
        Some(updated)
    }

    /// 标记订阅为不活跃（权限撤销时调用），保留过滤器与偏好
    pub async fn deactivate(&self, identity_id: IdentityId) -> Option<Arc<Subscription>> {
        let mut subscriptions = self.subscriptions.write().await;
        let existing = subscriptions.get(&identity_id)?;

        let mut updated = existing.as_ref().clone();
        updated.active = false;
        updated.revision += 1;

        let updated = Arc::new(updated);
        subscriptions.insert(identity_id, updated.clone());
        Some(updated)
    }

    /// 某门店的全部活跃订阅快照（分发器的候选解析）
    pub async fn candidates_for(&self, store_id: StoreId) -> Vec<Arc<Subscription>> {
        self.subscriptions
            .read()
            .await
            .values()
            .filter(|s| s.active && s.store_id == store_id)
            .cloned()
            .collect()
    }

    /// 身份的最后一个连接断开，进入宽限期
    pub async fn note_disconnected(&self, identity_id: IdentityId) {
        self.disconnected_at
            .write()
            .await
            .insert(identity_id, self.clock.now());
    }

    /// 身份重新建立了连接，退出宽限期
    pub async fn note_connected(&self, identity_id: IdentityId) {
        self.disconnected_at.write().await.remove(&identity_id);
    }

    /// 清除宽限期已过的订阅，返回清除数量
    pub async fn purge_expired(&self, grace: Duration) -> usize {
        let now = self.clock.now();
        let expired: Vec<IdentityId> = {
            let stamps = self.disconnected_at.read().await;
            stamps
                .iter()
                .filter(|(_, at)| now - **at > grace)
                .map(|(id, _)| *id)
                .collect()
        };

        if expired.is_empty() {
            return 0;
        }

        let mut subscriptions = self.subscriptions.write().await;
        let mut stamps = self.disconnected_at.write().await;
        for identity_id in &expired {
            subscriptions.remove(identity_id);
            stamps.remove(identity_id);
            info!(identity_id = %identity_id, "宽限期已过，订阅被清除");
        }
        expired.len()
    }

    pub async fn len(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.subscriptions.read().await.is_empty()
    }
}
